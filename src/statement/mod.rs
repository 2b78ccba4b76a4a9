//! Statements running on a [`Session`](crate::Session).
//!
//! [`Query`] carries the SQL and its per-query options. [`SelectStream`] walks the result
//! blocks of a query, [`Insert`] sends blocks to a table.
mod insert;
mod query;
mod select;

pub use insert::{Insert, RowBuilder};
pub use query::{ProgressHook, Query};
pub use select::SelectStream;
