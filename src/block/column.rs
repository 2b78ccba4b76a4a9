use std::{
    io::{Read, Write},
    net::{Ipv4Addr, Ipv6Addr},
    ops::Range,
};

use chrono::DateTime;
use uuid::Uuid;

use crate::{
    Error, Result,
    binary::{Reader, RunningOffset, Writer},
    error::{ProtocolError, ReadContext, WriteContext},
    types::{
        ColumnType, Value, date_from_days, datetime_from_ticks, days_from_date,
        ticks_from_datetime,
    },
};

use super::low_cardinality;

/// Physical buffers of one column.
///
/// The shape mirrors the [`ColumnType`] tree: wrappers that change the wire layout
/// (`Array`, `Nullable`, `Tuple`) become nodes, every other type is stored in the leaf
/// vector of its physical representation (`Date` as `UInt16` days, `Decimal(18, s)` as
/// `Int64`, `Enum8` as `Int8`, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Int128(Vec<i128>),
    UInt8(Vec<u8>),
    UInt16(Vec<u16>),
    UInt32(Vec<u32>),
    UInt64(Vec<u64>),
    UInt128(Vec<u128>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    String(Vec<Vec<u8>>),
    FixedString { width: usize, bytes: Vec<u8> },
    Uuid(Vec<Uuid>),
    Ipv4(Vec<Ipv4Addr>),
    Ipv6(Vec<Ipv6Addr>),
    Array {
        offsets: Vec<u64>,
        values: Box<ColumnData>,
    },
    Nullable {
        nulls: Vec<u8>,
        values: Box<ColumnData>,
    },
    Tuple(Vec<ColumnData>),
}

/// Expands `$body` once per fixed-width numeric variant, binding the vector to `$v`.
macro_rules! numeric {
    ($value:expr, |$v:ident| $body:expr, |$other:ident| $fallback:expr) => {
        match $value {
            ColumnData::Int8($v) => $body,
            ColumnData::Int16($v) => $body,
            ColumnData::Int32($v) => $body,
            ColumnData::Int64($v) => $body,
            ColumnData::Int128($v) => $body,
            ColumnData::UInt8($v) => $body,
            ColumnData::UInt16($v) => $body,
            ColumnData::UInt32($v) => $body,
            ColumnData::UInt64($v) => $body,
            ColumnData::UInt128($v) => $body,
            ColumnData::Float32($v) => $body,
            ColumnData::Float64($v) => $body,
            $other => $fallback,
        }
    };
}

/// Maps each fixed-width numeric variant to the same variant built from `$make`.
macro_rules! map_numeric {
    ($value:expr, |$v:ident| $make:expr, |$other:ident| $fallback:expr) => {
        match $value {
            ColumnData::Int8($v) => ColumnData::Int8($make),
            ColumnData::Int16($v) => ColumnData::Int16($make),
            ColumnData::Int32($v) => ColumnData::Int32($make),
            ColumnData::Int64($v) => ColumnData::Int64($make),
            ColumnData::Int128($v) => ColumnData::Int128($make),
            ColumnData::UInt8($v) => ColumnData::UInt8($make),
            ColumnData::UInt16($v) => ColumnData::UInt16($make),
            ColumnData::UInt32($v) => ColumnData::UInt32($make),
            ColumnData::UInt64($v) => ColumnData::UInt64($make),
            ColumnData::UInt128($v) => ColumnData::UInt128($make),
            ColumnData::Float32($v) => ColumnData::Float32($make),
            ColumnData::Float64($v) => ColumnData::Float64($make),
            $other => $fallback,
        }
    };
}

/// Pushes a value whose [`Value`] variant carries the same name as the storage variant.
macro_rules! push_same {
    ($data:expr, $value:expr, $mismatch:expr, $($variant:ident),*) => {
        match ($data, $value) {
            $((ColumnData::$variant(v), Value::$variant(x)) => {
                v.push(x);
                Ok(())
            })*
            (_, value) => Err($mismatch(&value)),
        }
    };
}

impl ColumnData {
    pub fn with_capacity(ty: &ColumnType, capacity: usize) -> Self {
        match ty {
            ColumnType::Int8 | ColumnType::Enum8(_) => ColumnData::Int8(Vec::with_capacity(capacity)),
            ColumnType::Int16 | ColumnType::Enum16(_) => {
                ColumnData::Int16(Vec::with_capacity(capacity))
            }
            ColumnType::Int32 | ColumnType::Date32 => ColumnData::Int32(Vec::with_capacity(capacity)),
            ColumnType::Int64 | ColumnType::DateTime64(..) => {
                ColumnData::Int64(Vec::with_capacity(capacity))
            }
            ColumnType::Int128 => ColumnData::Int128(Vec::with_capacity(capacity)),
            ColumnType::Decimal(precision, _) => match precision {
                0..=9 => ColumnData::Int32(Vec::with_capacity(capacity)),
                10..=18 => ColumnData::Int64(Vec::with_capacity(capacity)),
                _ => ColumnData::Int128(Vec::with_capacity(capacity)),
            },
            ColumnType::UInt8 | ColumnType::Bool | ColumnType::Nothing => {
                ColumnData::UInt8(Vec::with_capacity(capacity))
            }
            ColumnType::UInt16 | ColumnType::Date => ColumnData::UInt16(Vec::with_capacity(capacity)),
            ColumnType::UInt32 | ColumnType::DateTime(_) => {
                ColumnData::UInt32(Vec::with_capacity(capacity))
            }
            ColumnType::UInt64 => ColumnData::UInt64(Vec::with_capacity(capacity)),
            ColumnType::UInt128 => ColumnData::UInt128(Vec::with_capacity(capacity)),
            ColumnType::Float32 => ColumnData::Float32(Vec::with_capacity(capacity)),
            ColumnType::Float64 => ColumnData::Float64(Vec::with_capacity(capacity)),
            ColumnType::String => ColumnData::String(Vec::with_capacity(capacity)),
            ColumnType::FixedString(width) => ColumnData::FixedString {
                width: *width,
                bytes: Vec::with_capacity(width.saturating_mul(capacity)),
            },
            ColumnType::Uuid => ColumnData::Uuid(Vec::with_capacity(capacity)),
            ColumnType::Ipv4 => ColumnData::Ipv4(Vec::with_capacity(capacity)),
            ColumnType::Ipv6 => ColumnData::Ipv6(Vec::with_capacity(capacity)),
            ColumnType::LowCardinality(inner) | ColumnType::SimpleAggregateFunction(_, inner) => {
                Self::with_capacity(inner, capacity)
            }
            ColumnType::Array(inner) => ColumnData::Array {
                offsets: Vec::with_capacity(capacity),
                values: Box::new(Self::with_capacity(inner, 0)),
            },
            ColumnType::Nullable(inner) => ColumnData::Nullable {
                nulls: Vec::with_capacity(capacity),
                values: Box::new(Self::with_capacity(inner, capacity)),
            },
            ColumnType::Tuple(fields) => ColumnData::Tuple(
                fields
                    .iter()
                    .map(|f| Self::with_capacity(f, capacity))
                    .collect(),
            ),
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        numeric!(self, |v| v.len(), |other| match other {
            ColumnData::String(v) => v.len(),
            ColumnData::FixedString { width, bytes } => bytes.len() / (*width).max(1),
            ColumnData::Uuid(v) => v.len(),
            ColumnData::Ipv4(v) => v.len(),
            ColumnData::Ipv6(v) => v.len(),
            ColumnData::Array { offsets, .. } => offsets.len(),
            ColumnData::Nullable { nulls, .. } => nulls.len(),
            ColumnData::Tuple(fields) => fields.first().map_or(0, ColumnData::len),
            _ => 0,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element range of `row` in the values of an array column.
    pub fn element_range(&self, row: usize) -> Option<Range<usize>> {
        match self {
            ColumnData::Array { offsets, .. } => element_range(offsets, row),
            _ => None,
        }
    }

    /// True when both trees have the same nodes and leaf kinds.
    pub(crate) fn same_layout(&self, other: &ColumnData) -> bool {
        match (self, other) {
            (
                ColumnData::Array { values: a, .. },
                ColumnData::Array { values: b, .. },
            )
            | (
                ColumnData::Nullable { values: a, .. },
                ColumnData::Nullable { values: b, .. },
            ) => a.same_layout(b),
            (ColumnData::Tuple(a), ColumnData::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.same_layout(b))
            }
            (
                ColumnData::FixedString { width: a, .. },
                ColumnData::FixedString { width: b, .. },
            ) => a == b,
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }

    /// True when every nested level is internally consistent (offsets, null map and tuple
    /// fields agree on their row counts).
    pub(crate) fn is_consistent(&self) -> bool {
        match self {
            ColumnData::Array { offsets, values } => {
                offsets.windows(2).all(|w| w[0] <= w[1])
                    && offsets.last().copied().unwrap_or(0) == values.len() as u64
                    && values.is_consistent()
            }
            ColumnData::Nullable { nulls, values } => {
                nulls.len() == values.len() && values.is_consistent()
            }
            ColumnData::Tuple(fields) => {
                let rows = self.len();
                fields
                    .iter()
                    .all(|f| f.len() == rows && f.is_consistent())
            }
            ColumnData::FixedString { width, bytes } => *width > 0 && bytes.len() % width == 0,
            _ => true,
        }
    }

    /// Decodes `rows` rows of `ty`, after the state prefix has been consumed.
    pub(crate) fn read<R: Read>(reader: &mut Reader<R>, ty: &ColumnType, rows: usize) -> Result<Self> {
        let data = match ty {
            ColumnType::LowCardinality(inner) => low_cardinality::read(reader, inner, rows)?,
            ColumnType::SimpleAggregateFunction(_, inner) => Self::read(reader, inner, rows)?,
            ColumnType::Array(inner) => {
                let offsets: Vec<u64> = reader
                    .fixed_vec(rows)
                    .read_context("read array offsets")?;
                let mut running = RunningOffset::new();
                for offset in &offsets {
                    running.length(*offset)?;
                }
                let total = usize::try_from(running.total()).map_err(|_| {
                    ProtocolError::MalformedOffsets {
                        previous: 0,
                        offset: running.total(),
                    }
                })?;
                ColumnData::Array {
                    offsets,
                    values: Box::new(Self::read(reader, inner, total)?),
                }
            }
            ColumnType::Nullable(inner) => {
                let nulls = reader.bytes(rows).read_context("read null map")?;
                ColumnData::Nullable {
                    nulls,
                    values: Box::new(Self::read(reader, inner, rows)?),
                }
            }
            ColumnType::Tuple(fields) => ColumnData::Tuple(
                fields
                    .iter()
                    .map(|f| Self::read(reader, f, rows))
                    .collect::<Result<_>>()?,
            ),
            ColumnType::String => ColumnData::String(
                (0..rows)
                    .map(|_| reader.string_bytes())
                    .collect::<std::io::Result<_>>()
                    .read_context("read String values")?,
            ),
            ColumnType::FixedString(width) => ColumnData::FixedString {
                width: *width,
                bytes: reader
                    .bytes(width.saturating_mul(rows))
                    .read_context("read FixedString values")?,
            },
            ColumnType::Uuid => ColumnData::Uuid(
                (0..rows)
                    .map(|_| reader.uuid())
                    .collect::<std::io::Result<_>>()
                    .read_context("read UUID values")?,
            ),
            ColumnType::Ipv4 => ColumnData::Ipv4(
                reader
                    .fixed_vec::<u32>(rows)
                    .read_context("read IPv4 values")?
                    .into_iter()
                    .map(Ipv4Addr::from)
                    .collect(),
            ),
            ColumnType::Ipv6 => ColumnData::Ipv6(
                reader
                    .bytes(rows.saturating_mul(16))
                    .read_context("read IPv6 values")?
                    .chunks_exact(16)
                    .map(|chunk| {
                        let mut octets = [0_u8; 16];
                        octets.copy_from_slice(chunk);
                        Ipv6Addr::from(octets)
                    })
                    .collect(),
            ),
            leaf => map_numeric!(
                Self::with_capacity(leaf, 0),
                |_empty| reader.fixed_vec(rows).read_context("read values")?,
                |other| other
            ),
        };
        Ok(data)
    }

    /// Encodes every row of `self` as `ty`, after the state prefix has been written.
    pub(crate) fn write<W: Write>(&self, writer: &mut Writer<W>, ty: &ColumnType) -> Result<()> {
        match (ty, self) {
            (ColumnType::LowCardinality(inner), data) => low_cardinality::write(writer, inner, data),
            (ColumnType::SimpleAggregateFunction(_, inner), data) => data.write(writer, inner),
            (ColumnType::Array(inner), ColumnData::Array { offsets, values }) => {
                writer
                    .fixed_slice(offsets)
                    .write_context("write array offsets")?;
                values.write(writer, inner)
            }
            (ColumnType::Nullable(inner), ColumnData::Nullable { nulls, values }) => {
                writer.bytes(nulls).write_context("write null map")?;
                values.write(writer, inner)
            }
            (ColumnType::Tuple(types), ColumnData::Tuple(fields)) if types.len() == fields.len() => {
                types
                    .iter()
                    .zip(fields)
                    .try_for_each(|(ty, field)| field.write(writer, ty))
            }
            (_, ColumnData::String(values)) => values
                .iter()
                .try_for_each(|v| writer.string_bytes(v))
                .write_context("write String values"),
            (_, ColumnData::FixedString { bytes, .. }) => {
                writer.bytes(bytes).write_context("write FixedString values")
            }
            (_, ColumnData::Uuid(values)) => values
                .iter()
                .try_for_each(|v| writer.uuid(v))
                .write_context("write UUID values"),
            (_, ColumnData::Ipv4(values)) => values
                .iter()
                .try_for_each(|v| writer.u32(u32::from(*v)))
                .write_context("write IPv4 values"),
            (_, ColumnData::Ipv6(values)) => values
                .iter()
                .try_for_each(|v| writer.bytes(&v.octets()))
                .write_context("write IPv6 values"),
            (ty, data) => numeric!(
                data,
                |v| writer.fixed_slice(v).write_context("write values"),
                |_other| Err(ProtocolError::TypeMismatch {
                    column: String::new(),
                    expected: ty.to_string(),
                    actual: data.kind().to_string(),
                }
                .into())
            ),
        }
    }

    /// Short name of the storage variant.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            ColumnData::Int8(_) => "Int8",
            ColumnData::Int16(_) => "Int16",
            ColumnData::Int32(_) => "Int32",
            ColumnData::Int64(_) => "Int64",
            ColumnData::Int128(_) => "Int128",
            ColumnData::UInt8(_) => "UInt8",
            ColumnData::UInt16(_) => "UInt16",
            ColumnData::UInt32(_) => "UInt32",
            ColumnData::UInt64(_) => "UInt64",
            ColumnData::UInt128(_) => "UInt128",
            ColumnData::Float32(_) => "Float32",
            ColumnData::Float64(_) => "Float64",
            ColumnData::String(_) => "String",
            ColumnData::FixedString { .. } => "FixedString",
            ColumnData::Uuid(_) => "UUID",
            ColumnData::Ipv4(_) => "IPv4",
            ColumnData::Ipv6(_) => "IPv6",
            ColumnData::Array { .. } => "Array",
            ColumnData::Nullable { .. } => "Nullable",
            ColumnData::Tuple(_) => "Tuple",
        }
    }

    /// Appends one row. On error the column is left unchanged.
    pub fn push(&mut self, ty: &ColumnType, value: Value) -> Result<()> {
        let rows = self.len();
        let result = self.push_value(ty, value);
        if result.is_err() {
            self.truncate(rows);
        }
        result
    }

    fn push_value(&mut self, ty: &ColumnType, value: Value) -> Result<()> {
        let mismatch = |value: &Value| Error::Value(format!("cannot store {} in {ty}", value.kind()));

        match (ty, self) {
            (
                ColumnType::LowCardinality(inner) | ColumnType::SimpleAggregateFunction(_, inner),
                data,
            ) => data.push_value(inner, value),
            (ColumnType::Nullable(inner), ColumnData::Nullable { nulls, values }) => {
                if value.is_null() {
                    values.push_default();
                    nulls.push(1);
                } else {
                    values.push_value(inner, value)?;
                    nulls.push(0);
                }
                Ok(())
            }
            (ColumnType::Array(inner), ColumnData::Array { offsets, values }) => match value {
                Value::Array(items) => {
                    for item in items {
                        values.push_value(inner, item)?;
                    }
                    offsets.push(values.len() as u64);
                    Ok(())
                }
                other => Err(mismatch(&other)),
            },
            (ColumnType::Tuple(types), ColumnData::Tuple(fields)) => match value {
                Value::Tuple(items) if items.len() == types.len() => types
                    .iter()
                    .zip(fields.iter_mut())
                    .zip(items)
                    .try_for_each(|((ty, field), item)| field.push_value(ty, item)),
                other => Err(mismatch(&other)),
            },
            (ColumnType::Bool, ColumnData::UInt8(v)) => match value {
                Value::Bool(b) => {
                    v.push(u8::from(b));
                    Ok(())
                }
                other => Err(mismatch(&other)),
            },
            (ColumnType::Nothing, ColumnData::UInt8(v)) => match value {
                Value::Null => {
                    v.push(0);
                    Ok(())
                }
                other => Err(mismatch(&other)),
            },
            (ColumnType::Enum8(items), ColumnData::Int8(v)) => {
                let key = match value {
                    Value::Enum8(k) | Value::Int8(k) => k,
                    Value::String(name) => enum_key(items, &name).ok_or_else(|| {
                        Error::Value(format!(
                            "'{}' is not a member of {ty}",
                            String::from_utf8_lossy(&name)
                        ))
                    })?,
                    other => return Err(mismatch(&other)),
                };
                v.push(key);
                Ok(())
            }
            (ColumnType::Enum16(items), ColumnData::Int16(v)) => {
                let key = match value {
                    Value::Enum16(k) | Value::Int16(k) => k,
                    Value::String(name) => enum_key(items, &name).ok_or_else(|| {
                        Error::Value(format!(
                            "'{}' is not a member of {ty}",
                            String::from_utf8_lossy(&name)
                        ))
                    })?,
                    other => return Err(mismatch(&other)),
                };
                v.push(key);
                Ok(())
            }
            (ColumnType::Date, ColumnData::UInt16(v)) => match value {
                Value::Date(date) => {
                    let days = u16::try_from(days_from_date(date))
                        .map_err(|_| Error::Value(format!("{date} is outside the Date range")))?;
                    v.push(days);
                    Ok(())
                }
                other => Err(mismatch(&other)),
            },
            (ColumnType::Date32, ColumnData::Int32(v)) => match value {
                Value::Date(date) => {
                    let days = i32::try_from(days_from_date(date))
                        .map_err(|_| Error::Value(format!("{date} is outside the Date32 range")))?;
                    v.push(days);
                    Ok(())
                }
                other => Err(mismatch(&other)),
            },
            (ColumnType::DateTime(_), ColumnData::UInt32(v)) => match value {
                Value::DateTime(instant) => {
                    let seconds = u32::try_from(instant.timestamp()).map_err(|_| {
                        Error::Value(format!("{instant} is outside the DateTime range"))
                    })?;
                    v.push(seconds);
                    Ok(())
                }
                other => Err(mismatch(&other)),
            },
            (ColumnType::DateTime64(precision, _), ColumnData::Int64(v)) => match value {
                Value::DateTime(instant) => {
                    let ticks = ticks_from_datetime(&instant, *precision).ok_or_else(|| {
                        Error::Value(format!("{instant} is outside the {ty} range"))
                    })?;
                    v.push(ticks);
                    Ok(())
                }
                other => Err(mismatch(&other)),
            },
            (ColumnType::Decimal(_, scale), data) => match value {
                Value::Decimal {
                    mantissa,
                    scale: from,
                } => {
                    let mantissa = rescale(mantissa, from, *scale).ok_or_else(|| {
                        Error::Value(format!("decimal with scale {from} does not fit {ty}"))
                    })?;
                    push_decimal(data, mantissa)
                        .ok_or_else(|| Error::Value(format!("decimal overflows {ty}")))
                }
                other => Err(mismatch(&other)),
            },
            (ColumnType::FixedString(width), ColumnData::FixedString { bytes, .. }) => match value {
                Value::String(s) if s.len() <= *width => {
                    bytes.extend_from_slice(&s);
                    bytes.resize(bytes.len() + (width - s.len()), 0);
                    Ok(())
                }
                Value::String(s) => Err(Error::Value(format!(
                    "{} bytes do not fit {ty}",
                    s.len()
                ))),
                other => Err(mismatch(&other)),
            },
            (_, data) => push_same!(
                data,
                value,
                mismatch,
                Int8,
                Int16,
                Int32,
                Int64,
                Int128,
                UInt8,
                UInt16,
                UInt32,
                UInt64,
                UInt128,
                Float32,
                Float64,
                String,
                Uuid,
                Ipv4,
                Ipv6
            ),
        }
    }

    /// Appends the placeholder stored under a NULL.
    pub(crate) fn push_default(&mut self) {
        numeric!(self, |v| v.push(Default::default()), |other| match other {
            ColumnData::String(v) => v.push(Vec::new()),
            ColumnData::FixedString { width, bytes } => bytes.resize(bytes.len() + *width, 0),
            ColumnData::Uuid(v) => v.push(Uuid::nil()),
            ColumnData::Ipv4(v) => v.push(Ipv4Addr::UNSPECIFIED),
            ColumnData::Ipv6(v) => v.push(Ipv6Addr::UNSPECIFIED),
            ColumnData::Array { offsets, .. } => {
                let last = offsets.last().copied().unwrap_or(0);
                offsets.push(last);
            }
            ColumnData::Nullable { nulls, values } => {
                values.push_default();
                nulls.push(1);
            }
            ColumnData::Tuple(fields) => fields.iter_mut().for_each(ColumnData::push_default),
            _ => {}
        })
    }

    /// Drops every row from `rows` onward.
    pub(crate) fn truncate(&mut self, rows: usize) {
        numeric!(self, |v| v.truncate(rows), |other| match other {
            ColumnData::String(v) => v.truncate(rows),
            ColumnData::FixedString { width, bytes } => bytes.truncate(rows.saturating_mul(*width)),
            ColumnData::Uuid(v) => v.truncate(rows),
            ColumnData::Ipv4(v) => v.truncate(rows),
            ColumnData::Ipv6(v) => v.truncate(rows),
            ColumnData::Array { offsets, values } => {
                offsets.truncate(rows);
                let elements = offsets.last().copied().unwrap_or(0) as usize;
                values.truncate(elements);
            }
            ColumnData::Nullable { nulls, values } => {
                nulls.truncate(rows);
                values.truncate(rows);
            }
            ColumnData::Tuple(fields) => fields.iter_mut().for_each(|f| f.truncate(rows)),
            _ => {}
        })
    }

    /// Value of `row` interpreted as `ty`.
    pub fn get(&self, ty: &ColumnType, row: usize) -> Option<Value> {
        let value = match (ty, self) {
            (
                ColumnType::LowCardinality(inner) | ColumnType::SimpleAggregateFunction(_, inner),
                data,
            ) => return data.get(inner, row),
            (ColumnType::Nullable(inner), ColumnData::Nullable { nulls, values }) => {
                if *nulls.get(row)? != 0 {
                    Value::Null
                } else {
                    values.get(inner, row)?
                }
            }
            (ColumnType::Array(inner), ColumnData::Array { offsets, values }) => Value::Array(
                element_range(offsets, row)?
                    .map(|i| values.get(inner, i))
                    .collect::<Option<_>>()?,
            ),
            (ColumnType::Tuple(types), ColumnData::Tuple(fields)) => Value::Tuple(
                types
                    .iter()
                    .zip(fields)
                    .map(|(ty, field)| field.get(ty, row))
                    .collect::<Option<_>>()?,
            ),
            (ColumnType::Bool, ColumnData::UInt8(v)) => Value::Bool(*v.get(row)? != 0),
            (ColumnType::Nothing, ColumnData::UInt8(v)) => {
                v.get(row)?;
                Value::Null
            }
            (ColumnType::Enum8(_), ColumnData::Int8(v)) => Value::Enum8(*v.get(row)?),
            (ColumnType::Enum16(_), ColumnData::Int16(v)) => Value::Enum16(*v.get(row)?),
            (ColumnType::Date, ColumnData::UInt16(v)) => {
                Value::Date(date_from_days(i64::from(*v.get(row)?))?)
            }
            (ColumnType::Date32, ColumnData::Int32(v)) => {
                Value::Date(date_from_days(i64::from(*v.get(row)?))?)
            }
            (ColumnType::DateTime(_), ColumnData::UInt32(v)) => {
                Value::DateTime(DateTime::from_timestamp(i64::from(*v.get(row)?), 0)?)
            }
            (ColumnType::DateTime64(precision, _), ColumnData::Int64(v)) => {
                Value::DateTime(datetime_from_ticks(*v.get(row)?, *precision)?)
            }
            (ColumnType::Decimal(_, scale), data) => Value::Decimal {
                mantissa: match data {
                    ColumnData::Int32(v) => i128::from(*v.get(row)?),
                    ColumnData::Int64(v) => i128::from(*v.get(row)?),
                    ColumnData::Int128(v) => *v.get(row)?,
                    _ => return None,
                },
                scale: *scale,
            },
            (_, ColumnData::Int8(v)) => Value::Int8(*v.get(row)?),
            (_, ColumnData::Int16(v)) => Value::Int16(*v.get(row)?),
            (_, ColumnData::Int32(v)) => Value::Int32(*v.get(row)?),
            (_, ColumnData::Int64(v)) => Value::Int64(*v.get(row)?),
            (_, ColumnData::Int128(v)) => Value::Int128(*v.get(row)?),
            (_, ColumnData::UInt8(v)) => Value::UInt8(*v.get(row)?),
            (_, ColumnData::UInt16(v)) => Value::UInt16(*v.get(row)?),
            (_, ColumnData::UInt32(v)) => Value::UInt32(*v.get(row)?),
            (_, ColumnData::UInt64(v)) => Value::UInt64(*v.get(row)?),
            (_, ColumnData::UInt128(v)) => Value::UInt128(*v.get(row)?),
            (_, ColumnData::Float32(v)) => Value::Float32(*v.get(row)?),
            (_, ColumnData::Float64(v)) => Value::Float64(*v.get(row)?),
            (_, ColumnData::String(v)) => Value::String(v.get(row)?.clone()),
            (_, ColumnData::FixedString { width, bytes }) => {
                let start = row.checked_mul(*width)?;
                Value::String(bytes.get(start..start + width)?.to_vec())
            }
            (_, ColumnData::Uuid(v)) => Value::Uuid(*v.get(row)?),
            (_, ColumnData::Ipv4(v)) => Value::Ipv4(*v.get(row)?),
            (_, ColumnData::Ipv6(v)) => Value::Ipv6(*v.get(row)?),
            _ => return None,
        };
        Some(value)
    }

    /// Leaf column built from the rows at `indices`. Returns `None` for nested columns
    /// or out-of-range indices.
    pub(crate) fn gather(&self, indices: &[usize]) -> Option<ColumnData> {
        fn pick<T: Clone>(values: &[T], indices: &[usize]) -> Option<Vec<T>> {
            indices.iter().map(|i| values.get(*i).cloned()).collect()
        }

        let data = map_numeric!(self, |v| pick(v, indices)?, |other| match other {
            ColumnData::String(v) => ColumnData::String(pick(v, indices)?),
            ColumnData::FixedString { width, bytes } => {
                let mut out = Vec::with_capacity(indices.len() * width);
                for i in indices {
                    let start = i.checked_mul(*width)?;
                    out.extend_from_slice(bytes.get(start..start + width)?);
                }
                ColumnData::FixedString {
                    width: *width,
                    bytes: out,
                }
            }
            ColumnData::Uuid(v) => ColumnData::Uuid(pick(v, indices)?),
            ColumnData::Ipv4(v) => ColumnData::Ipv4(pick(v, indices)?),
            ColumnData::Ipv6(v) => ColumnData::Ipv6(pick(v, indices)?),
            _ => return None,
        });
        Some(data)
    }
}

fn element_range(offsets: &[u64], row: usize) -> Option<Range<usize>> {
    let end = usize::try_from(*offsets.get(row)?).ok()?;
    let start = match row {
        0 => 0,
        _ => usize::try_from(offsets[row - 1]).ok()?,
    };
    (start <= end).then_some(start..end)
}

fn enum_key<T: Copy>(items: &[(String, T)], name: &[u8]) -> Option<T> {
    items
        .iter()
        .find(|(item, _)| item.as_bytes() == name)
        .map(|(_, key)| *key)
}

fn rescale(mantissa: i128, from: u8, to: u8) -> Option<i128> {
    match from.cmp(&to) {
        std::cmp::Ordering::Equal => Some(mantissa),
        std::cmp::Ordering::Less => mantissa.checked_mul(10_i128.checked_pow(u32::from(to - from))?),
        std::cmp::Ordering::Greater => {
            let divisor = 10_i128.checked_pow(u32::from(from - to))?;
            (mantissa % divisor == 0).then(|| mantissa / divisor)
        }
    }
}

fn push_decimal(data: &mut ColumnData, mantissa: i128) -> Option<()> {
    match data {
        ColumnData::Int32(v) => v.push(i32::try_from(mantissa).ok()?),
        ColumnData::Int64(v) => v.push(i64::try_from(mantissa).ok()?),
        ColumnData::Int128(v) => v.push(mantissa),
        _ => return None,
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn round_trip(type_name: &str, values: Vec<Value>) {
        let ty = ColumnType::parse(type_name).unwrap();
        let mut data = ColumnData::with_capacity(&ty, values.len());
        for value in values.clone() {
            data.push(&ty, value).unwrap();
        }
        assert!(data.is_consistent(), "{type_name}");

        let mut bytes = Vec::new();
        let mut writer = Writer::new(&mut bytes);
        low_cardinality::write_state_prefix(&mut writer, &ty).unwrap();
        data.write(&mut writer, &ty).unwrap();

        let mut reader = Reader::new(&bytes[..]);
        low_cardinality::read_state_prefix(&mut reader, &ty).unwrap();
        let decoded = ColumnData::read(&mut reader, &ty, values.len()).unwrap();
        assert!(reader.get_mut().is_empty(), "{type_name}: trailing bytes");

        let decoded: Vec<Value> = (0..values.len())
            .map(|row| decoded.get(&ty, row).unwrap())
            .collect();
        assert_eq!(decoded, values, "{type_name}");
    }

    #[test]
    fn scalar_round_trips() {
        round_trip("Int8", vec![(-128_i8).into(), 0_i8.into(), 127_i8.into()]);
        round_trip("UInt64", vec![0_u64.into(), u64::MAX.into()]);
        round_trip("Int128", vec![i128::MIN.into(), 1_i128.into()]);
        round_trip("Float64", vec![1.5_f64.into(), f64::MIN_POSITIVE.into()]);
        round_trip("Bool", vec![true.into(), false.into()]);
        round_trip("String", vec!["".into(), "clickhouse".into()]);
        round_trip("FixedString(3)", vec!["abc".into(), "a\0\0".into()]);
        round_trip("UUID", vec![Uuid::nil().into(), Uuid::from_u128(42).into()]);
        round_trip(
            "IPv4",
            vec![Ipv4Addr::new(127, 0, 0, 1).into(), Ipv4Addr::BROADCAST.into()],
        );
        round_trip("IPv6", vec![Ipv6Addr::LOCALHOST.into()]);
        round_trip("Nothing", vec![Value::Null]);
    }

    #[test]
    fn temporal_round_trips() {
        let date = NaiveDate::from_ymd_opt(2021, 6, 1).unwrap();
        round_trip("Date", vec![date.into()]);
        round_trip(
            "Date32",
            vec![NaiveDate::from_ymd_opt(1900, 1, 1).unwrap().into()],
        );
        round_trip(
            "DateTime('UTC')",
            vec![DateTime::from_timestamp(1_600_000_000, 0).unwrap().into()],
        );
        round_trip(
            "DateTime64(6)",
            vec![DateTime::from_timestamp(1_600_000_000, 123_456_000).unwrap().into()],
        );
    }

    #[test]
    fn decimal_and_enum_round_trips() {
        round_trip(
            "Decimal(9, 2)",
            vec![Value::Decimal {
                mantissa: -12345,
                scale: 2,
            }],
        );
        round_trip(
            "Decimal(38, 10)",
            vec![Value::Decimal {
                mantissa: i128::from(i64::MAX) * 1000,
                scale: 10,
            }],
        );
        round_trip("Enum8('a' = 1, 'b' = -1)", vec![Value::Enum8(-1)]);
        round_trip("Enum16('x' = 1000)", vec![Value::Enum16(1000)]);
    }

    #[test]
    fn nested_round_trips() {
        round_trip(
            "Array(Nullable(UInt8))",
            vec![
                Value::Array(vec![1_u8.into(), Value::Null, 3_u8.into()]),
                Value::Array(vec![]),
                Value::Array(vec![Value::Null]),
            ],
        );
        round_trip(
            "Array(Array(String))",
            vec![
                Value::Array(vec![
                    Value::Array(vec!["a".into()]),
                    Value::Array(vec![]),
                ]),
                Value::Array(vec![]),
            ],
        );
        round_trip(
            "Tuple(UInt8, Nullable(String))",
            vec![
                Value::Tuple(vec![1_u8.into(), Value::Null]),
                Value::Tuple(vec![2_u8.into(), "b".into()]),
            ],
        );
        round_trip(
            "Nullable(Decimal(18, 3))",
            vec![
                Value::Null,
                Value::Decimal {
                    mantissa: 1,
                    scale: 3,
                },
            ],
        );
    }

    #[test]
    fn low_cardinality_round_trips() {
        round_trip("LowCardinality(String)", vec!["a".into(), "b".into(), "a".into()]);
        round_trip(
            "LowCardinality(Nullable(String))",
            vec!["x".into(), Value::Null, "".into()],
        );
        round_trip(
            "Array(LowCardinality(String))",
            vec![Value::Array(vec!["a".into()]), Value::Array(vec![])],
        );
        round_trip(
            "SimpleAggregateFunction(sum, UInt64)",
            vec![10_u64.into()],
        );
    }

    #[test]
    fn array_offsets_on_the_wire() {
        let ty = ColumnType::parse("Array(UInt8)").unwrap();
        let mut data = ColumnData::with_capacity(&ty, 3);
        for len in [3_u8, 0, 5] {
            data.push(&ty, Value::Array((0..len).map(Value::from).collect()))
                .unwrap();
        }

        let mut bytes = Vec::new();
        data.write(&mut Writer::new(&mut bytes), &ty).unwrap();
        let offsets: Vec<u64> = Reader::new(&bytes[..]).fixed_vec(3).unwrap();
        assert_eq!(offsets, vec![3, 3, 8]);
        assert_eq!(data.element_range(1), Some(3..3));
        assert_eq!(data.element_range(2), Some(3..8));
    }

    #[test]
    fn failed_push_leaves_column_unchanged() {
        let ty = ColumnType::parse("Array(UInt8)").unwrap();
        let mut data = ColumnData::with_capacity(&ty, 1);
        data.push(&ty, Value::Array(vec![1_u8.into()])).unwrap();

        let err = data
            .push(&ty, Value::Array(vec![2_u8.into(), "x".into()]))
            .unwrap_err();
        assert!(matches!(err, Error::Value(_)));
        assert_eq!(data.len(), 1);
        assert!(data.is_consistent());
    }

    #[test]
    fn values_that_do_not_fit() {
        let ty = ColumnType::parse("FixedString(2)").unwrap();
        let mut data = ColumnData::with_capacity(&ty, 1);
        assert!(data.push(&ty, "abc".into()).is_err());

        let ty = ColumnType::parse("Decimal(9, 1)").unwrap();
        let mut data = ColumnData::with_capacity(&ty, 1);
        assert!(
            data.push(
                &ty,
                Value::Decimal {
                    mantissa: 15,
                    scale: 2
                }
            )
            .is_err()
        );
        data.push(
            &ty,
            Value::Decimal {
                mantissa: 10,
                scale: 2,
            },
        )
        .unwrap();
        assert_eq!(
            data.get(&ty, 0),
            Some(Value::Decimal {
                mantissa: 1,
                scale: 1
            })
        );
    }

    #[test]
    fn enum_accepts_member_names() {
        let ty = ColumnType::parse("Enum8('on' = 1, 'off' = 0)").unwrap();
        let mut data = ColumnData::with_capacity(&ty, 1);
        data.push(&ty, "off".into()).unwrap();
        assert_eq!(data.get(&ty, 0), Some(Value::Enum8(0)));
        assert!(data.push(&ty, "maybe".into()).is_err());
    }

    #[test]
    fn decreasing_offsets_fail_decoding() {
        let ty = ColumnType::parse("Array(UInt8)").unwrap();
        let mut bytes = Vec::new();
        let mut writer = Writer::new(&mut bytes);
        writer.fixed_slice(&[2_u64, 1]).unwrap();
        writer.bytes(&[1, 2]).unwrap();

        let err = ColumnData::read(&mut Reader::new(&bytes[..]), &ty, 2).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::MalformedOffsets { .. })
        ));
    }
}
