//! Column-oriented blocks, the unit of data exchanged in both directions.
//!
//! A block on the wire is a [`BlockInfo`] header, a column count, a row count and then,
//! per column, its name, its type name and (when the block has rows) the column data.
//! The data of every column is decoded into a [`ColumnData`] tree shaped after the parsed
//! [`ColumnType`].
mod column;
mod low_cardinality;

use std::io::{self, Read, Write};

pub use column::ColumnData;

use crate::{
    Result,
    binary::{Reader, Writer},
    error::{ProtocolError, ReadContext, WriteContext},
    protocol::revision,
    types::{BufferRole, ColumnType, Value},
};

/// Block header fields.
///
/// On the wire each field is preceded by its field number (1 and 2) and the list ends
/// with field number 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub is_overflows: bool,
    pub bucket_num: i32,
}

impl Default for BlockInfo {
    fn default() -> Self {
        Self {
            is_overflows: false,
            bucket_num: -1,
        }
    }
}

impl BlockInfo {
    const OVERFLOWS_FIELD: u64 = 1;
    const BUCKET_FIELD: u64 = 2;

    fn read<R: Read>(reader: &mut Reader<R>) -> Result<Self> {
        let mut info = Self::default();
        loop {
            let field = reader
                .uvarint()
                .read_context("block: read info field number")?;
            match field {
                0 => return Ok(info),
                Self::OVERFLOWS_FIELD => {
                    info.is_overflows = reader.bool().read_context("block: read is_overflows")?;
                }
                Self::BUCKET_FIELD => {
                    info.bucket_num = reader.i32().read_context("block: read bucket number")?;
                }
                other => return Err(ProtocolError::UnknownBlockInfoField(other).into()),
            }
        }
    }

    fn write<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        writer
            .uvarint(Self::OVERFLOWS_FIELD)
            .write_context("block: write info field number")?;
        writer
            .bool(self.is_overflows)
            .write_context("block: write is_overflows")?;
        writer
            .uvarint(Self::BUCKET_FIELD)
            .write_context("block: write info field number")?;
        writer
            .i32(self.bucket_num)
            .write_context("block: write bucket number")?;
        writer
            .uvarint(0)
            .write_context("block: write info terminator")
    }
}

/// Name and type of a column, with the type parsed once.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDescriptor {
    name: String,
    type_name: String,
    column_type: ColumnType,
    plan: Vec<BufferRole>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Result<Self> {
        let type_name = type_name.into();
        let column_type = ColumnType::parse(&type_name)?;
        let plan = column_type.buffer_plan();
        Ok(Self {
            name: name.into(),
            type_name,
            column_type,
            plan,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The type name exactly as the server spelled it.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn column_type(&self) -> &ColumnType {
        &self.column_type
    }

    /// Physical buffers of this column, in wire order.
    pub fn buffer_plan(&self) -> &[BufferRole] {
        &self.plan
    }
}

/// A named, typed column and its rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    descriptor: ColumnDescriptor,
    data: ColumnData,
}

impl Column {
    /// An empty column.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Result<Self> {
        let descriptor = ColumnDescriptor::new(name, type_name)?;
        Ok(Self::with_capacity(descriptor, 0))
    }

    pub fn with_capacity(descriptor: ColumnDescriptor, capacity: usize) -> Self {
        let data = ColumnData::with_capacity(descriptor.column_type(), capacity);
        Self { descriptor, data }
    }

    /// Wraps prebuilt buffers. The buffers must have the layout of the declared type.
    pub fn from_data(
        name: impl Into<String>,
        type_name: impl Into<String>,
        data: ColumnData,
    ) -> Result<Self> {
        let descriptor = ColumnDescriptor::new(name, type_name)?;
        let expected = ColumnData::with_capacity(descriptor.column_type(), 0);
        if !expected.same_layout(&data) || !data.is_consistent() {
            return Err(ProtocolError::TypeMismatch {
                column: descriptor.name,
                expected: descriptor.type_name,
                actual: data.kind().to_string(),
            }
            .into());
        }
        Ok(Self { descriptor, data })
    }

    pub fn from_values<V: Into<Value>>(
        name: impl Into<String>,
        type_name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self> {
        let mut column = Self::new(name, type_name)?;
        for value in values {
            column.push(value)?;
        }
        Ok(column)
    }

    /// Same rows under `descriptor`, which must describe the same type.
    pub(crate) fn with_descriptor(self, descriptor: ColumnDescriptor) -> Self {
        debug_assert_eq!(descriptor.column_type, self.descriptor.column_type);
        Self {
            descriptor,
            data: self.data,
        }
    }

    pub fn descriptor(&self) -> &ColumnDescriptor {
        &self.descriptor
    }

    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    pub fn type_name(&self) -> &str {
        self.descriptor.type_name()
    }

    pub fn data(&self) -> &ColumnData {
        &self.data
    }

    pub fn into_data(self) -> ColumnData {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn push(&mut self, value: impl Into<Value>) -> Result<()> {
        self.data
            .push(self.descriptor.column_type(), value.into())
            .map_err(|e| e.within(self.descriptor.name()))
    }

    pub fn get(&self, row: usize) -> Option<Value> {
        self.data.get(self.descriptor.column_type(), row)
    }

    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        (0..self.len()).map_while(|row| self.get(row))
    }

    /// Typed view of a flat column, `None` when `T` is not its storage type.
    pub fn as_slice<T: Primitive>(&self) -> Option<&[T]> {
        T::slice(&self.data)
    }

    pub(crate) fn truncate(&mut self, rows: usize) {
        self.data.truncate(rows);
    }
}

/// Element types that can be borrowed directly from a flat column's storage.
pub trait Primitive: Sized {
    fn slice(data: &ColumnData) -> Option<&[Self]>;
}

macro_rules! primitive {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl Primitive for $t {
                fn slice(data: &ColumnData) -> Option<&[Self]> {
                    match data {
                        ColumnData::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }
        )*
    };
}

primitive!(
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    i128 => Int128,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    u128 => UInt128,
    f32 => Float32,
    f64 => Float64,
    Vec<u8> => String,
    uuid::Uuid => Uuid,
    std::net::Ipv4Addr => Ipv4,
    std::net::Ipv6Addr => Ipv6,
);

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub info: BlockInfo,
    rows: usize,
    columns: Vec<Column>,
}

impl Block {
    /// Builds a block, checking that every column has the same number of rows.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let rows = columns.first().map_or(0, Column::len);
        if let Some(column) = columns.iter().find(|c| c.len() != rows) {
            return Err(ProtocolError::RowCountMismatch {
                column: column.name().to_string(),
                expected: rows,
                actual: column.len(),
            }
            .into());
        }
        Ok(Self {
            info: BlockInfo::default(),
            rows,
            columns,
        })
    }

    /// The zero-column, zero-row block that terminates data streams.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ColumnDescriptor> {
        self.columns.iter().map(Column::descriptor)
    }

    pub fn into_columns(self) -> Vec<Column> {
        self.columns
    }

    /// Values of one row, in column order.
    pub fn row(&self, row: usize) -> Option<Vec<Value>> {
        if row >= self.rows {
            return None;
        }
        self.columns.iter().map(|c| c.get(row)).collect()
    }

    pub(crate) fn read<R: Read>(reader: &mut Reader<R>, revision: u64) -> Result<Self> {
        let info = BlockInfo::read(reader)?;
        let column_count = reader
            .uvarint()
            .read_context("block: read column count")?;
        let rows = reader.uvarint().read_context("block: read row count")?;
        let rows = usize::try_from(rows)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "row count overflows usize"))
            .read_context("block: read row count")?;

        let mut columns = Vec::with_capacity(column_count.min(1024) as usize);
        for _ in 0..column_count {
            let name = reader.string().read_context("block: read column name")?;
            let type_name = reader.string().read_context("block: read column type")?;
            if revision >= revision::CUSTOM_SERIALIZATION {
                let custom = reader
                    .bool()
                    .read_context("block: read custom serialization flag")?;
                if custom {
                    return Err(ProtocolError::UnsupportedType(format!(
                        "{type_name} with custom serialization"
                    ))
                    .into());
                }
            }

            let descriptor = ColumnDescriptor::new(name, type_name)?;
            let data = if rows > 0 {
                read_column_data(reader, descriptor.column_type(), rows)
                    .map_err(|e| e.within(&format!("block: column '{}'", descriptor.name())))?
            } else {
                ColumnData::with_capacity(descriptor.column_type(), 0)
            };
            columns.push(Column { descriptor, data });
        }

        Ok(Self {
            info,
            rows,
            columns,
        })
    }

    pub(crate) fn write<W: Write>(&self, writer: &mut Writer<W>, revision: u64) -> Result<()> {
        self.info.write(writer)?;
        writer
            .uvarint(self.columns.len() as u64)
            .write_context("block: write column count")?;
        writer
            .uvarint(self.rows as u64)
            .write_context("block: write row count")?;

        for column in &self.columns {
            writer
                .string(column.name())
                .write_context("block: write column name")?;
            writer
                .string(column.type_name())
                .write_context("block: write column type")?;
            if revision >= revision::CUSTOM_SERIALIZATION {
                writer
                    .bool(false)
                    .write_context("block: write custom serialization flag")?;
            }
            if self.rows > 0 {
                let ty = column.descriptor.column_type();
                low_cardinality::write_state_prefix(writer, ty)
                    .and_then(|()| column.data.write(writer, ty))
                    .map_err(|e| e.within(&format!("block: column '{}'", column.name())))?;
            }
        }
        Ok(())
    }
}

fn read_column_data<R: Read>(reader: &mut Reader<R>, ty: &ColumnType, rows: usize) -> Result<ColumnData> {
    low_cardinality::read_state_prefix(reader, ty)?;
    ColumnData::read(reader, ty, rows)
}

#[cfg(test)]
mod tests {
    use crate::{Error, protocol::revision::CLIENT_REVISION};

    use super::*;

    fn numbers(rows: u64) -> Block {
        Block::new(vec![Column::from_values("number", "UInt64", 0..rows).unwrap()]).unwrap()
    }

    #[test]
    fn block_wire_layout() {
        let mut bytes = Vec::new();
        numbers(2)
            .write(&mut Writer::new(&mut bytes), CLIENT_REVISION)
            .unwrap();

        let mut expected = vec![1, 0, 2, 0xff, 0xff, 0xff, 0xff, 0, 1, 2];
        expected.extend_from_slice(b"\x06number\x06UInt64\x00");
        expected.extend_from_slice(&0_u64.to_le_bytes());
        expected.extend_from_slice(&1_u64.to_le_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn old_revision_has_no_custom_flag() {
        let mut bytes = Vec::new();
        numbers(0)
            .write(&mut Writer::new(&mut bytes), revision::CUSTOM_SERIALIZATION - 1)
            .unwrap();
        assert!(bytes.ends_with(b"\x06UInt64"));

        let block = Block::read(
            &mut Reader::new(&bytes[..]),
            revision::CUSTOM_SERIALIZATION - 1,
        )
        .unwrap();
        assert_eq!(block.rows(), 0);
        assert_eq!(block.columns()[0].type_name(), "UInt64");
    }

    #[test]
    fn header_only_block_has_no_data() {
        let mut bytes = Vec::new();
        numbers(0)
            .write(&mut Writer::new(&mut bytes), CLIENT_REVISION)
            .unwrap();
        let block = Block::read(&mut Reader::new(&bytes[..]), CLIENT_REVISION).unwrap();
        assert!(block.is_empty());
        assert_eq!(block.column_by_name("number").unwrap().len(), 0);
    }

    #[test]
    fn info_fields_survive_round_trip() {
        let mut block = numbers(1);
        block.info = BlockInfo {
            is_overflows: true,
            bucket_num: 3,
        };
        let mut bytes = Vec::new();
        block
            .write(&mut Writer::new(&mut bytes), CLIENT_REVISION)
            .unwrap();
        assert_eq!(bytes[..8], [1, 1, 2, 3, 0, 0, 0, 0]);
        let decoded = Block::read(&mut Reader::new(&bytes[..]), CLIENT_REVISION).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn info_fields_in_any_order_or_missing() {
        let mut bytes = vec![2, 5, 0, 0, 0, 0];
        bytes.extend_from_slice(&[0, 0]);
        let block = Block::read(&mut Reader::new(&bytes[..]), CLIENT_REVISION).unwrap();
        assert_eq!(
            block.info,
            BlockInfo {
                is_overflows: false,
                bucket_num: 5
            }
        );
        assert!(block.is_empty());
    }

    #[test]
    fn unknown_info_field_is_rejected() {
        let mut bytes = Vec::new();
        numbers(1)
            .write(&mut Writer::new(&mut bytes), CLIENT_REVISION)
            .unwrap();
        // Byte 7 is the terminator.
        bytes[7] = 4;
        let err = Block::read(&mut Reader::new(&bytes[..]), CLIENT_REVISION).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UnknownBlockInfoField(4))
        ));
        assert!(err.is_fatal());

        let err = Block::read(&mut Reader::new(&[3_u8, 1, 0][..]), CLIENT_REVISION).unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::UnknownBlockInfoField(3))
        ));
    }

    #[test]
    fn mixed_block_round_trip() {
        let block = Block::new(vec![
            Column::from_values("id", "UInt32", [1_u32, 2]).unwrap(),
            Column::from_values(
                "tag",
                "LowCardinality(Nullable(String))",
                [Some("a"), None],
            )
            .unwrap(),
            Column::from_values(
                "scores",
                "Array(Float64)",
                [
                    Value::Array(vec![1.0_f64.into()]),
                    Value::Array(vec![]),
                ],
            )
            .unwrap(),
        ])
        .unwrap();

        let mut bytes = Vec::new();
        block
            .write(&mut Writer::new(&mut bytes), CLIENT_REVISION)
            .unwrap();
        let decoded = Block::read(&mut Reader::new(&bytes[..]), CLIENT_REVISION).unwrap();
        assert_eq!(decoded.row(1), block.row(1));
        assert_eq!(decoded.row(0).unwrap()[1], Value::from("a"));
        assert_eq!(decoded.column(0).unwrap().as_slice::<u32>(), Some(&[1, 2][..]));
    }

    #[test]
    fn ragged_columns_rejected() {
        let err = Block::new(vec![
            Column::from_values("a", "UInt8", [1_u8]).unwrap(),
            Column::from_values("b", "UInt8", [1_u8, 2]).unwrap(),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::RowCountMismatch { .. })
        ));
    }

    #[test]
    fn truncated_column_names_location() {
        let mut bytes = Vec::new();
        numbers(3)
            .write(&mut Writer::new(&mut bytes), CLIENT_REVISION)
            .unwrap();
        bytes.truncate(bytes.len() - 4);

        let err = Block::read(&mut Reader::new(&bytes[..]), CLIENT_REVISION).unwrap_err();
        match err {
            Error::Read { location, .. } => {
                assert_eq!(location, "block: column 'number': read values")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn from_data_checks_layout() {
        assert!(Column::from_data("n", "UInt8", ColumnData::UInt8(vec![1, 2])).is_ok());
        assert!(Column::from_data("n", "UInt8", ColumnData::Int8(vec![1])).is_err());
        assert!(
            Column::from_data(
                "a",
                "Array(UInt8)",
                ColumnData::Array {
                    offsets: vec![3],
                    values: Box::new(ColumnData::UInt8(vec![1])),
                },
            )
            .is_err()
        );
    }

    #[test]
    fn buffer_plan_is_cached() {
        let column = Column::new("x", "Array(Nullable(UInt8))").unwrap();
        assert_eq!(
            column.descriptor().buffer_plan(),
            &[BufferRole::Offsets, BufferRole::Nulls, BufferRole::Scalar]
        );
    }
}
