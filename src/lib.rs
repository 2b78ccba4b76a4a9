//! Blocking client for the ClickHouse native TCP protocol.
//!
//! Open a [`Session`] from a [`Config`], then run statements on it:
//!
//! ```no_run
//! use chwire::{Column, Config, Session};
//!
//! # fn main() -> chwire::Result<()> {
//! let mut session = Session::connect(&Config::default())?;
//! session.exec("CREATE TABLE IF NOT EXISTS t (x Int8) ENGINE = Memory")?;
//!
//! let mut insert = session.insert("INSERT INTO t VALUES")?;
//! insert.commit(vec![Column::from_values("x", "Int8", 0..10_i8)?])?;
//! drop(insert);
//!
//! let mut rows = session.select("SELECT x FROM t")?;
//! while rows.next()? {
//!     let block = rows.block().expect("current block");
//!     println!("{} rows", block.rows());
//! }
//! # Ok(())
//! # }
//! ```
pub mod binary;
pub mod block;
pub mod cli;
pub mod config;
mod error;
pub mod protocol;
pub mod session;
pub mod settings;
pub mod statement;
pub mod types;

pub use block::{Block, BlockInfo, Column, ColumnData, ColumnDescriptor};
pub use cli::{Command, prompt, render_block};
pub use config::{Config, Endpoint};
pub use error::{Error, ProtocolError, Result};
pub use protocol::{ChError, Compression, ProfileInfo, Progress, ServerInfo, Transport};
pub use session::{CancelToken, Session, SessionStatus};
pub use settings::{Parameters, Setting, Settings};
pub use statement::{Insert, Query, RowBuilder, SelectStream};
pub use types::{ColumnType, Value};
