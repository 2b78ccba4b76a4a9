use std::fmt;

use crate::error::ProtocolError;

/// Physical stream kind a column needs on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRole {
    /// Values of a leaf type.
    Scalar,
    /// Cumulative `u64` offsets of an array level.
    Offsets,
    /// One byte per row, non-zero marks NULL.
    Nulls,
}

/// Parsed form of a ClickHouse type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
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
    Bool,
    Nothing,
    String,
    FixedString(usize),
    Uuid,
    Ipv4,
    Ipv6,
    Date,
    Date32,
    DateTime(Option<String>),
    DateTime64(u8, Option<String>),
    Decimal(u8, u8),
    Enum8(Vec<(String, i8)>),
    Enum16(Vec<(String, i16)>),
    LowCardinality(Box<ColumnType>),
    SimpleAggregateFunction(String, Box<ColumnType>),
    Array(Box<ColumnType>),
    Nullable(Box<ColumnType>),
    Tuple(Vec<ColumnType>),
}

impl ColumnType {
    /// Parses a type name. A failure anywhere in the tree reports the whole name.
    pub fn parse(name: &str) -> Result<Self, ProtocolError> {
        Self::parse_node(name)
            .map_err(|_| ProtocolError::UnsupportedType(name.trim().to_string()))
    }

    fn parse_node(name: &str) -> Result<Self, ProtocolError> {
        let name = name.trim();
        let unsupported = || ProtocolError::UnsupportedType(name.to_string());

        let Some(open) = name.find('(') else {
            return Self::leaf(name).ok_or_else(unsupported);
        };
        if !name.ends_with(')') {
            return Err(unsupported());
        }
        let head = &name[..open];
        let body = &name[open + 1..name.len() - 1];

        let ty = match head {
            "Array" => ColumnType::Array(Box::new(Self::parse_node(body)?)),
            "Nullable" => {
                let inner = Self::parse_node(body)?;
                if !inner.can_be_inside_nullable() {
                    return Err(unsupported());
                }
                ColumnType::Nullable(Box::new(inner))
            }
            "LowCardinality" => ColumnType::LowCardinality(Box::new(Self::parse_node(body)?)),
            "Tuple" => {
                let fields = split_arguments(body)
                    .into_iter()
                    .map(Self::parse_tuple_field)
                    .collect::<Result<Vec<_>, _>>()?;
                if fields.is_empty() {
                    return Err(unsupported());
                }
                ColumnType::Tuple(fields)
            }
            "SimpleAggregateFunction" => match split_arguments(body).as_slice() {
                [function, inner] => ColumnType::SimpleAggregateFunction(
                    function.to_string(),
                    Box::new(Self::parse_node(inner)?),
                ),
                _ => return Err(unsupported()),
            },
            "FixedString" => match body.trim().parse() {
                Ok(0) | Err(_) => return Err(unsupported()),
                Ok(width) => ColumnType::FixedString(width),
            },
            "DateTime" => ColumnType::DateTime(Some(unquote(body))),
            "DateTime64" => match split_arguments(body).as_slice() {
                [precision] => ColumnType::DateTime64(parse_precision(precision, 9)?, None),
                [precision, tz] => {
                    ColumnType::DateTime64(parse_precision(precision, 9)?, Some(unquote(tz)))
                }
                _ => return Err(unsupported()),
            },
            "Decimal" => match split_arguments(body).as_slice() {
                [precision, scale] => {
                    let precision = parse_precision(precision, 38)?;
                    let scale = parse_precision(scale, precision)?;
                    ColumnType::Decimal(precision, scale)
                }
                _ => return Err(unsupported()),
            },
            "Decimal32" => ColumnType::Decimal(9, parse_precision(body, 9)?),
            "Decimal64" => ColumnType::Decimal(18, parse_precision(body, 18)?),
            "Decimal128" => ColumnType::Decimal(38, parse_precision(body, 38)?),
            "Enum8" => ColumnType::Enum8(parse_enum(body).ok_or_else(unsupported)?),
            "Enum16" => ColumnType::Enum16(parse_enum(body).ok_or_else(unsupported)?),
            _ => return Err(unsupported()),
        };
        Ok(ty)
    }

    fn leaf(name: &str) -> Option<Self> {
        let ty = match name {
            "Int8" => ColumnType::Int8,
            "Int16" => ColumnType::Int16,
            "Int32" => ColumnType::Int32,
            "Int64" => ColumnType::Int64,
            "Int128" => ColumnType::Int128,
            "UInt8" => ColumnType::UInt8,
            "UInt16" => ColumnType::UInt16,
            "UInt32" => ColumnType::UInt32,
            "UInt64" => ColumnType::UInt64,
            "UInt128" => ColumnType::UInt128,
            "Float32" => ColumnType::Float32,
            "Float64" => ColumnType::Float64,
            "Bool" => ColumnType::Bool,
            "Nothing" => ColumnType::Nothing,
            "String" => ColumnType::String,
            "UUID" => ColumnType::Uuid,
            "IPv4" => ColumnType::Ipv4,
            "IPv6" => ColumnType::Ipv6,
            "Date" => ColumnType::Date,
            "Date32" => ColumnType::Date32,
            "DateTime" => ColumnType::DateTime(None),
            _ => return None,
        };
        Some(ty)
    }

    /// Tuple elements may carry a name: `Tuple(id UInt64, tags Array(String))`.
    fn parse_tuple_field(field: &str) -> Result<Self, ProtocolError> {
        match Self::parse_node(field) {
            Ok(ty) => Ok(ty),
            Err(e) => match field.trim().split_once(' ') {
                Some((name, ty)) if is_identifier(name) => Self::parse_node(ty),
                _ => Err(e),
            },
        }
    }

    /// Composite types and other wrappers cannot be made nullable.
    fn can_be_inside_nullable(&self) -> bool {
        !matches!(
            self,
            ColumnType::Nullable(_)
                | ColumnType::Array(_)
                | ColumnType::Tuple(_)
                | ColumnType::LowCardinality(_)
                | ColumnType::SimpleAggregateFunction(..)
        )
    }

    /// Ordered list of physical streams this column occupies.
    pub fn buffer_plan(&self) -> Vec<BufferRole> {
        let mut plan = Vec::new();
        self.collect_plan(&mut plan);
        plan
    }

    pub fn buffer_count(&self) -> usize {
        match self {
            ColumnType::Array(inner) | ColumnType::Nullable(inner) => 1 + inner.buffer_count(),
            ColumnType::Tuple(fields) => fields.iter().map(ColumnType::buffer_count).sum(),
            ColumnType::LowCardinality(inner) | ColumnType::SimpleAggregateFunction(_, inner) => {
                inner.buffer_count()
            }
            _ => 1,
        }
    }

    fn collect_plan(&self, plan: &mut Vec<BufferRole>) {
        match self {
            ColumnType::Array(inner) => {
                plan.push(BufferRole::Offsets);
                inner.collect_plan(plan);
            }
            ColumnType::Nullable(inner) => {
                plan.push(BufferRole::Nulls);
                inner.collect_plan(plan);
            }
            ColumnType::Tuple(fields) => fields.iter().for_each(|f| f.collect_plan(plan)),
            ColumnType::LowCardinality(inner) | ColumnType::SimpleAggregateFunction(_, inner) => {
                inner.collect_plan(plan)
            }
            _ => plan.push(BufferRole::Scalar),
        }
    }

    /// Type that actually determines the column storage, looking through wrappers that
    /// do not change the values (LowCardinality, SimpleAggregateFunction).
    pub fn storage(&self) -> &ColumnType {
        match self {
            ColumnType::LowCardinality(inner) | ColumnType::SimpleAggregateFunction(_, inner) => {
                inner.storage()
            }
            other => other,
        }
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self.storage(), ColumnType::Nullable(_))
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Int8 => write!(f, "Int8"),
            ColumnType::Int16 => write!(f, "Int16"),
            ColumnType::Int32 => write!(f, "Int32"),
            ColumnType::Int64 => write!(f, "Int64"),
            ColumnType::Int128 => write!(f, "Int128"),
            ColumnType::UInt8 => write!(f, "UInt8"),
            ColumnType::UInt16 => write!(f, "UInt16"),
            ColumnType::UInt32 => write!(f, "UInt32"),
            ColumnType::UInt64 => write!(f, "UInt64"),
            ColumnType::UInt128 => write!(f, "UInt128"),
            ColumnType::Float32 => write!(f, "Float32"),
            ColumnType::Float64 => write!(f, "Float64"),
            ColumnType::Bool => write!(f, "Bool"),
            ColumnType::Nothing => write!(f, "Nothing"),
            ColumnType::String => write!(f, "String"),
            ColumnType::FixedString(n) => write!(f, "FixedString({n})"),
            ColumnType::Uuid => write!(f, "UUID"),
            ColumnType::Ipv4 => write!(f, "IPv4"),
            ColumnType::Ipv6 => write!(f, "IPv6"),
            ColumnType::Date => write!(f, "Date"),
            ColumnType::Date32 => write!(f, "Date32"),
            ColumnType::DateTime(None) => write!(f, "DateTime"),
            ColumnType::DateTime(Some(tz)) => write!(f, "DateTime('{tz}')"),
            ColumnType::DateTime64(p, None) => write!(f, "DateTime64({p})"),
            ColumnType::DateTime64(p, Some(tz)) => write!(f, "DateTime64({p}, '{tz}')"),
            ColumnType::Decimal(p, s) => write!(f, "Decimal({p}, {s})"),
            ColumnType::Enum8(items) => write_enum(f, "Enum8", items),
            ColumnType::Enum16(items) => write_enum(f, "Enum16", items),
            ColumnType::LowCardinality(inner) => write!(f, "LowCardinality({inner})"),
            ColumnType::SimpleAggregateFunction(func, inner) => {
                write!(f, "SimpleAggregateFunction({func}, {inner})")
            }
            ColumnType::Array(inner) => write!(f, "Array({inner})"),
            ColumnType::Nullable(inner) => write!(f, "Nullable({inner})"),
            ColumnType::Tuple(fields) => {
                write!(f, "Tuple(")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{field}")?;
                }
                write!(f, ")")
            }
        }
    }
}

fn write_enum<T: fmt::Display>(
    f: &mut fmt::Formatter<'_>,
    head: &str,
    items: &[(String, T)],
) -> fmt::Result {
    write!(f, "{head}(")?;
    for (i, (name, value)) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        let escaped = name.replace('\\', "\\\\").replace('\'', "\\'");
        write!(f, "'{escaped}' = {value}")?;
    }
    write!(f, ")")
}

/// Splits generic arguments on commas at parenthesis depth zero, ignoring commas inside
/// quoted literals.
fn split_arguments(body: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0_usize;
    let mut quoted = false;
    let mut escaped = false;
    let mut start = 0;

    for (i, ch) in body.char_indices() {
        if quoted {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '\'' => quoted = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '\'' => quoted = true,
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(body[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    let last = body[start..].trim();
    if !last.is_empty() || !parts.is_empty() {
        parts.push(last);
    }
    parts
}

fn parse_precision(value: &str, max: u8) -> Result<u8, ProtocolError> {
    value
        .trim()
        .parse::<u8>()
        .ok()
        .filter(|v| *v <= max)
        .ok_or_else(|| ProtocolError::UnsupportedType(value.trim().to_string()))
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    let inner = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value);
    unescape(inner)
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

fn parse_enum<T: std::str::FromStr>(body: &str) -> Option<Vec<(String, T)>> {
    split_arguments(body)
        .into_iter()
        .map(|item| {
            let (name, value) = item.rsplit_once('=')?;
            let name = name.trim();
            if !(name.len() >= 2 && name.starts_with('\'') && name.ends_with('\'')) {
                return None;
            }
            Some((unquote(name), value.trim().parse().ok()?))
        })
        .collect()
}

fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}
