//! Dictionary encoding of `LowCardinality(T)` columns.
//!
//! Each column carries a state prefix (one serialization version per LowCardinality node)
//! written before any column data of the block, then per node a dictionary of keys and
//! one index per row. For `LowCardinality(Nullable(T))` the dictionary stores `T` and
//! index 0 stands for NULL.
use std::io::{Read, Write};

use crate::{
    Result,
    binary::{Reader, Writer},
    error::{ProtocolError, ReadContext, WriteContext},
    types::ColumnType,
};

use super::ColumnData;

const SHARED_DICTIONARIES_WITH_ADDITIONAL_KEYS: u64 = 1;

const KEY_WIDTH_MASK: u64 = 0xff;
const NEED_GLOBAL_DICTIONARY: u64 = 1 << 8;
const HAS_ADDITIONAL_KEYS: u64 = 1 << 9;
const NEED_UPDATE_DICTIONARY: u64 = 1 << 10;

/// Reads the serialization version of every LowCardinality node under `ty`.
pub(crate) fn read_state_prefix<R: Read>(reader: &mut Reader<R>, ty: &ColumnType) -> Result<()> {
    match ty {
        ColumnType::LowCardinality(_) => {
            let version = reader
                .u64()
                .read_context("low cardinality: read serialization version")?;
            if version != SHARED_DICTIONARIES_WITH_ADDITIONAL_KEYS {
                return Err(ProtocolError::MalformedDictionary(format!(
                    "unknown serialization version {version}"
                ))
                .into());
            }
            Ok(())
        }
        ColumnType::Array(inner)
        | ColumnType::Nullable(inner)
        | ColumnType::SimpleAggregateFunction(_, inner) => read_state_prefix(reader, inner),
        ColumnType::Tuple(fields) => fields.iter().try_for_each(|f| read_state_prefix(reader, f)),
        _ => Ok(()),
    }
}

pub(crate) fn write_state_prefix<W: Write>(writer: &mut Writer<W>, ty: &ColumnType) -> Result<()> {
    match ty {
        ColumnType::LowCardinality(_) => writer
            .u64(SHARED_DICTIONARIES_WITH_ADDITIONAL_KEYS)
            .write_context("low cardinality: write serialization version"),
        ColumnType::Array(inner)
        | ColumnType::Nullable(inner)
        | ColumnType::SimpleAggregateFunction(_, inner) => write_state_prefix(writer, inner),
        ColumnType::Tuple(fields) => fields
            .iter()
            .try_for_each(|f| write_state_prefix(writer, f)),
        _ => Ok(()),
    }
}

/// Splits `Nullable(T)` into the dictionary type `T` and a nullable flag.
fn dictionary_type(inner: &ColumnType) -> (&ColumnType, bool) {
    match inner {
        ColumnType::Nullable(t) => (t, true),
        t => (t, false),
    }
}

/// Decodes `rows` rows into the materialized representation of `inner`.
pub(super) fn read<R: Read>(reader: &mut Reader<R>, inner: &ColumnType, rows: usize) -> Result<ColumnData> {
    if rows == 0 {
        return Ok(ColumnData::with_capacity(inner, 0));
    }

    let flags = reader
        .u64()
        .read_context("low cardinality: read index type")?;
    if flags & NEED_GLOBAL_DICTIONARY != 0 {
        return Err(ProtocolError::MalformedDictionary("global dictionaries are not supported".into()).into());
    }
    if flags & HAS_ADDITIONAL_KEYS == 0 {
        return Err(ProtocolError::MalformedDictionary("block carries no dictionary keys".into()).into());
    }

    let (dictionary_type, nullable) = dictionary_type(inner);
    let key_count = reader
        .u64()
        .read_context("low cardinality: read key count")?;
    let key_count = usize::try_from(key_count)
        .map_err(|_| ProtocolError::MalformedDictionary(format!("{key_count} keys")))?;
    let keys = ColumnData::read(reader, dictionary_type, key_count)?;

    let index_count = reader
        .u64()
        .read_context("low cardinality: read index count")?;
    if index_count != rows as u64 {
        return Err(ProtocolError::MalformedDictionary(format!(
            "{index_count} indices for {rows} rows"
        ))
        .into());
    }

    let location = "low cardinality: read indices";
    let indices: Vec<usize> = match flags & KEY_WIDTH_MASK {
        0 => widen(reader.fixed_vec::<u8>(rows).read_context(location)?),
        1 => widen(reader.fixed_vec::<u16>(rows).read_context(location)?),
        2 => widen(reader.fixed_vec::<u32>(rows).read_context(location)?),
        3 => widen(reader.fixed_vec::<u64>(rows).read_context(location)?),
        width => {
            return Err(ProtocolError::MalformedDictionary(format!("index width {width}")).into());
        }
    };

    let values = keys.gather(&indices).ok_or_else(|| {
        ProtocolError::MalformedDictionary(format!("index out of range for {key_count} keys"))
    })?;

    Ok(if nullable {
        ColumnData::Nullable {
            nulls: indices.iter().map(|i| u8::from(*i == 0)).collect(),
            values: Box::new(values),
        }
    } else {
        values
    })
}

fn widen<T: TryInto<usize>>(indices: Vec<T>) -> Vec<usize> {
    indices
        .into_iter()
        .map(|i| i.try_into().unwrap_or(usize::MAX))
        .collect()
}

/// Encodes every row as its own dictionary key. Duplicated keys are legal on the wire and
/// the server rebuilds the dictionary on insert.
pub(super) fn write<W: Write>(writer: &mut Writer<W>, inner: &ColumnType, data: &ColumnData) -> Result<()> {
    let rows = data.len();
    if rows == 0 {
        return Ok(());
    }

    let (dictionary_type, nullable) = dictionary_type(inner);
    let (nulls, values) = match data {
        ColumnData::Nullable { nulls, values } if nullable => (Some(nulls), values.as_ref()),
        data => (None, data),
    };
    let key_count = rows + usize::from(nulls.is_some());
    let width = key_width(key_count);

    writer
        .u64(width | HAS_ADDITIONAL_KEYS | NEED_UPDATE_DICTIONARY)
        .write_context("low cardinality: write index type")?;
    writer
        .u64(key_count as u64)
        .write_context("low cardinality: write key count")?;
    if nulls.is_some() {
        let mut placeholder = ColumnData::with_capacity(dictionary_type, 1);
        placeholder.push_default();
        placeholder.write(writer, dictionary_type)?;
    }
    values.write(writer, dictionary_type)?;

    writer
        .u64(rows as u64)
        .write_context("low cardinality: write index count")?;
    let index = |row: usize| match nulls {
        Some(nulls) if nulls[row] != 0 => 0,
        Some(_) => row as u64 + 1,
        None => row as u64,
    };
    let written = match width {
        0 => (0..rows).try_for_each(|r| writer.u8(index(r) as u8)),
        1 => (0..rows).try_for_each(|r| writer.fixed(index(r) as u16)),
        2 => (0..rows).try_for_each(|r| writer.u32(index(r) as u32)),
        _ => (0..rows).try_for_each(|r| writer.u64(index(r))),
    };
    written.write_context("low cardinality: write indices")
}

fn key_width(key_count: usize) -> u64 {
    match key_count {
        0..=0xff => 0,
        0x100..=0xffff => 1,
        0x1_0000..=0xffff_ffff => 2,
        _ => 3,
    }
}

#[cfg(test)]
mod tests {
    use crate::{Error, types::Value};

    use super::*;

    fn encode(type_name: &str, values: Vec<Value>) -> Vec<u8> {
        let ty = ColumnType::parse(type_name).unwrap();
        let mut data = ColumnData::with_capacity(&ty, values.len());
        for value in values {
            data.push(&ty, value).unwrap();
        }
        let mut out = Vec::new();
        data.write(&mut Writer::new(&mut out), &ty).unwrap();
        out
    }

    #[test]
    fn nullable_dictionary_layout() {
        let bytes = encode(
            "LowCardinality(Nullable(String))",
            vec!["a".into(), Value::Null],
        );
        let mut r = Reader::new(&bytes[..]);
        assert_eq!(r.u64().unwrap(), HAS_ADDITIONAL_KEYS | NEED_UPDATE_DICTIONARY);
        assert_eq!(r.u64().unwrap(), 3);
        assert_eq!(r.string().unwrap(), "");
        assert_eq!(r.string().unwrap(), "a");
        assert_eq!(r.string().unwrap(), "");
        assert_eq!(r.u64().unwrap(), 2);
        assert_eq!(r.bytes(2).unwrap(), vec![1, 0]);
    }

    #[test]
    fn shared_keys_decode() {
        let mut bytes = Vec::new();
        let mut w = Writer::new(&mut bytes);
        w.u64(HAS_ADDITIONAL_KEYS).unwrap();
        w.u64(2).unwrap();
        w.string("x").unwrap();
        w.string("y").unwrap();
        w.u64(4).unwrap();
        w.bytes(&[1, 1, 0, 1]).unwrap();

        let ty = ColumnType::String;
        let data = read(&mut Reader::new(&bytes[..]), &ty, 4).unwrap();
        let values: Vec<_> = (0..4).map(|row| data.get(&ty, row).unwrap()).collect();
        assert_eq!(
            values,
            vec!["y".into(), "y".into(), "x".into(), "y".into()]
        );
    }

    #[test]
    fn wide_indices() {
        let values: Vec<Value> = (0..300_u32).map(|i| i.to_string().into()).collect();
        let bytes = encode("LowCardinality(String)", values.clone());
        assert_eq!(bytes[0] as u64, 1);

        let ty = ColumnType::String;
        let data = read(&mut Reader::new(&bytes[..]), &ty, 300).unwrap();
        assert_eq!(data.get(&ty, 299), values.last().cloned());
    }

    #[test]
    fn index_out_of_range() {
        let mut bytes = Vec::new();
        let mut w = Writer::new(&mut bytes);
        w.u64(HAS_ADDITIONAL_KEYS).unwrap();
        w.u64(1).unwrap();
        w.string("x").unwrap();
        w.u64(1).unwrap();
        w.u8(5).unwrap();

        let err = read(&mut Reader::new(&bytes[..]), &ColumnType::String, 1).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::MalformedDictionary(_))
        ));
    }

    #[test]
    fn global_dictionary_rejected() {
        let mut bytes = Vec::new();
        Writer::new(&mut bytes)
            .u64(NEED_GLOBAL_DICTIONARY | HAS_ADDITIONAL_KEYS)
            .unwrap();
        assert!(read(&mut Reader::new(&bytes[..]), &ColumnType::String, 1).is_err());
    }

    #[test]
    fn state_prefix_per_node() {
        let ty = ColumnType::parse("Tuple(LowCardinality(String), Array(LowCardinality(UInt8)))").unwrap();
        let mut bytes = Vec::new();
        write_state_prefix(&mut Writer::new(&mut bytes), &ty).unwrap();
        assert_eq!(bytes.len(), 16);

        bytes[8] = 2;
        assert!(read_state_prefix(&mut Reader::new(&bytes[..]), &ty).is_err());
    }
}
