//! Column type grammar and cell values.
//!
//! [`ColumnType::parse`] turns a server type name such as `Array(Nullable(UInt8))` into a
//! tree once, when a block header is read or a column is built. Everything downstream
//! (buffer layout, decoding, encoding, value conversion) matches on that tree instead of
//! re-inspecting the string.
mod grammar;
mod value;

pub use grammar::{BufferRole, ColumnType};
pub use value::Value;

pub(crate) use value::{date_from_days, datetime_from_ticks, days_from_date, ticks_from_datetime};
