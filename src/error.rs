//! Error types shared by every layer of the client.
//!
//! Primitive I/O failures never escape as a bare [`io::Error`]: they are wrapped in
//! [`Error::Read`] or [`Error::Write`] together with a location tag naming the logical
//! field that was being transferred (for example `"block: read column name"`). A single
//! block transfer performs dozens of primitive operations, so the tag is what makes a
//! short read debuggable.
use std::io;

use thiserror::Error;

use crate::{protocol::ChError, session::SessionStatus};

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Server error codes that mean the credentials were rejected. Retrying another host with
/// the same credentials is pointless.
const AUTHENTICATION_CODES: [i32; 5] = [192, 193, 194, 195, 516];

/// Violations of the wire protocol or of the column model.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unexpected packet: expected {expected}, got {actual}")]
    UnexpectedPacket {
        expected: &'static str,
        actual: String,
    },

    #[error("unsupported column type '{0}'")]
    UnsupportedType(String),

    #[error("column count mismatch: expected {expected}, got {actual}")]
    ColumnCountMismatch { expected: usize, actual: usize },

    #[error("row count mismatch in column '{column}': expected {expected}, got {actual}")]
    RowCountMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("unknown column '{0}'")]
    UnknownColumn(String),

    #[error("column '{column}' is declared as {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: String,
        actual: String,
    },

    #[error("array offset {offset} is smaller than the previous offset {previous}")]
    MalformedOffsets { previous: u64, offset: u64 },

    #[error("low cardinality dictionary: {0}")]
    MalformedDictionary(String),

    #[error("compressed frame: {0}")]
    Compression(String),

    #[error("compressed frame checksum mismatch")]
    Checksum,

    #[error("unknown block info field {0}")]
    UnknownBlockInfoField(u64),

    #[error("server exception nested deeper than {0} levels")]
    ExceptionDepth(usize),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{location}: {source}")]
    Read { location: String, source: io::Error },

    #[error("{location}: {source}")]
    Write { location: String, source: io::Error },

    #[error("transport: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("server exception: {0}")]
    Server(#[from] ChError),

    #[error("connection is {status}")]
    ConnLock { status: SessionStatus },

    #[error("connect: {message}")]
    Connect {
        message: String,
        #[source]
        source: Option<Box<Error>>,
    },

    #[error("operation canceled")]
    Canceled {
        #[source]
        source: Option<Box<Error>>,
    },

    #[error("invalid value: {0}")]
    Value(String),
}

impl Error {
    pub fn read(location: impl Into<String>, source: io::Error) -> Self {
        Error::Read {
            location: location.into(),
            source,
        }
    }

    pub fn write(location: impl Into<String>, source: io::Error) -> Self {
        Error::Write {
            location: location.into(),
            source,
        }
    }

    pub(crate) fn unexpected(expected: &'static str, actual: impl Into<String>) -> Self {
        ProtocolError::UnexpectedPacket {
            expected,
            actual: actual.into(),
        }
        .into()
    }

    /// Prefixes the location of read/write errors, other errors pass through.
    pub(crate) fn within(self, prefix: &str) -> Self {
        match self {
            Error::Read { location, source } => Error::Read {
                location: format!("{prefix}: {location}"),
                source,
            },
            Error::Write { location, source } => Error::Write {
                location: format!("{prefix}: {location}"),
                source,
            },
            other => other,
        }
    }

    /// True when the error came from an expired deadline on the transport.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Read { source, .. } | Error::Write { source, .. } | Error::Io(source) => {
                matches!(
                    source.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                )
            }
            Error::Connect {
                source: Some(source),
                ..
            }
            | Error::Canceled {
                source: Some(source),
            } => source.is_timeout(),
            _ => false,
        }
    }

    /// True when the server rejected the credentials.
    pub fn is_authentication(&self) -> bool {
        match self {
            Error::Server(e) => AUTHENTICATION_CODES.contains(&e.code),
            Error::Connect {
                source: Some(source),
                ..
            } => source.is_authentication(),
            _ => false,
        }
    }

    /// True when the byte stream can no longer be trusted to be aligned on a packet
    /// boundary, so the session must be closed.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Read { .. }
            | Error::Write { .. }
            | Error::Io(_)
            | Error::Server(_)
            | Error::Connect { .. }
            | Error::Canceled { .. } => true,
            Error::Protocol(e) => matches!(
                e,
                ProtocolError::UnexpectedPacket { .. }
                    | ProtocolError::UnsupportedType(_)
                    | ProtocolError::MalformedOffsets { .. }
                    | ProtocolError::MalformedDictionary(_)
                    | ProtocolError::Compression(_)
                    | ProtocolError::Checksum
                    | ProtocolError::UnknownBlockInfoField(_)
                    | ProtocolError::ExceptionDepth(_)
            ),
            Error::ConnLock { .. } | Error::Value(_) => false,
        }
    }
}

/// Tags a failed primitive read with the field it was reading.
pub(crate) trait ReadContext<T> {
    fn read_context(self, location: &str) -> Result<T>;
}

impl<T> ReadContext<T> for io::Result<T> {
    fn read_context(self, location: &str) -> Result<T> {
        self.map_err(|e| Error::read(location, e))
    }
}

/// Tags a failed primitive write with the field it was writing.
pub(crate) trait WriteContext<T> {
    fn write_context(self, location: &str) -> Result<T>;
}

impl<T> WriteContext<T> for io::Result<T> {
    fn write_context(self, location: &str) -> Result<T> {
        self.map_err(|e| Error::write(location, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_is_part_of_message() {
        let err: Result<()> = Err(io::Error::from(io::ErrorKind::UnexpectedEof))
            .read_context("ServerInfo: could not read server timezone");
        let err = err.unwrap_err();

        assert!(
            err.to_string()
                .starts_with("ServerInfo: could not read server timezone")
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn within_prefixes_location() {
        let err = Error::read("read offsets", io::ErrorKind::UnexpectedEof.into()).within("block");
        match err {
            Error::Read { location, .. } => assert_eq!(location, "block: read offsets"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn timeout_is_detected_through_cancel() {
        let err = Error::Canceled {
            source: Some(Box::new(Error::read(
                "packet: read packet kind",
                io::ErrorKind::TimedOut.into(),
            ))),
        };
        assert!(err.is_timeout());
    }

    #[test]
    fn authentication_codes() {
        let err = Error::Connect {
            message: "handshake".into(),
            source: Some(Box::new(Error::Server(ChError {
                code: 516,
                name: "DB::Exception".into(),
                message: "default: Authentication failed".into(),
                stack_trace: String::new(),
                nested: None,
            }))),
        };
        assert!(err.is_authentication());
        assert!(!Error::Value("x".into()).is_authentication());
    }
}
