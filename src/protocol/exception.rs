use std::{error, fmt, io::Read};

use crate::{
    Result,
    binary::Reader,
    error::{ProtocolError, ReadContext},
};

/// Deepest exception chain accepted from the server.
const MAX_NESTED: usize = 64;

/// An exception raised by the server, possibly wrapping the exception that caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChError {
    pub code: i32,
    pub name: String,
    pub message: String,
    pub stack_trace: String,
    pub nested: Option<Box<ChError>>,
}

impl ChError {
    /// Reads an exception packet body, including every nested exception.
    pub(crate) fn read<R: Read>(reader: &mut Reader<R>) -> Result<Self> {
        Self::read_nested(reader, 0)
    }

    fn read_nested<R: Read>(reader: &mut Reader<R>, depth: usize) -> Result<Self> {
        if depth > MAX_NESTED {
            return Err(ProtocolError::ExceptionDepth(MAX_NESTED).into());
        }
        let code = reader.i32().read_context("exception: read code")?;
        let name = reader.string().read_context("exception: read name")?;
        let message = reader.string().read_context("exception: read message")?;
        let stack_trace = reader
            .string()
            .read_context("exception: read stack trace")?;
        let has_nested = reader
            .bool()
            .read_context("exception: read nested flag")?;

        let message = match message.strip_prefix(&format!("{name}: ")) {
            Some(stripped) => stripped.to_string(),
            None => message,
        };
        let nested = if has_nested {
            Some(Box::new(Self::read_nested(reader, depth + 1)?))
        } else {
            None
        };

        Ok(Self {
            code,
            name,
            message,
            stack_trace,
            nested,
        })
    }
}

impl fmt::Display for ChError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.name, self.message)
    }
}

impl error::Error for ChError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.nested.as_deref().map(|e| e as &(dyn error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use crate::binary::Writer;

    use super::*;

    fn encode(code: i32, name: &str, message: &str, nested: bool) -> Vec<u8> {
        let mut out = Vec::new();
        let mut w = Writer::new(&mut out);
        w.i32(code).unwrap();
        w.string(name).unwrap();
        w.string(message).unwrap();
        w.string("trace").unwrap();
        w.bool(nested).unwrap();
        out
    }

    #[test]
    fn name_prefix_is_stripped() {
        let bytes = encode(62, "DB::Exception", "DB::Exception: Syntax error", false);
        let err = ChError::read(&mut Reader::new(&bytes[..])).unwrap();

        assert_eq!(err.code, 62);
        assert_eq!(err.message, "Syntax error");
        assert_eq!(err.stack_trace, "trace");
        assert_eq!(err.to_string(), "[62] DB::Exception: Syntax error");
    }

    #[test]
    fn nested_chain_is_exposed_as_source() {
        let mut bytes = encode(1, "DB::Exception", "outer", true);
        bytes.extend(encode(2, "DB::Exception", "DB::Exception: inner", false));

        let err = ChError::read(&mut Reader::new(&bytes[..])).unwrap();
        let inner = err.nested.as_deref().unwrap();
        assert_eq!(inner.code, 2);
        assert_eq!(inner.message, "inner");
        assert_eq!(err.source().unwrap().to_string(), "[2] DB::Exception: inner");
    }

    #[test]
    fn nesting_depth_is_bounded() {
        let chain = |levels: usize| {
            let mut bytes = Vec::new();
            for level in 0..levels {
                bytes.extend(encode(1, "DB::Exception", "boom", level + 1 < levels));
            }
            bytes
        };

        let bytes = chain(MAX_NESTED + 1);
        let err = ChError::read(&mut Reader::new(&bytes[..])).unwrap();
        let levels = std::iter::successors(Some(&err), |e| e.nested.as_deref()).count();
        assert_eq!(levels, MAX_NESTED + 1);

        let bytes = chain(MAX_NESTED + 2);
        let err = ChError::read(&mut Reader::new(&bytes[..])).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Protocol(ProtocolError::ExceptionDepth(MAX_NESTED))
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn truncated_exception() {
        let mut bytes = encode(1, "DB::Exception", "outer", true);
        bytes.pop();
        let err = ChError::read(&mut Reader::new(&bytes[..])).unwrap_err();
        assert!(err.to_string().starts_with("exception: read nested flag"));
    }
}
