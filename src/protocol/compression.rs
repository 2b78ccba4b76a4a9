//! Checksummed frames wrapped around block bodies when compression is enabled.
//!
//! ```text
//! | checksum (16) | method (1) | compressed size (4) | decompressed size (4) | payload |
//! ```
//!
//! The compressed size counts the 9 header bytes after the checksum, and the checksum is
//! CityHash128 (version 1.0.2) over everything after it.
use std::{
    cmp,
    io::{self, Read, Write},
};

use crate::{Error, Result, error::ProtocolError, error::WriteContext};

/// Block compression negotiated in the query packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    None,
    Lz4,
}

impl Compression {
    pub fn is_enabled(self) -> bool {
        self != Compression::None
    }
}

const METHOD_NONE: u8 = 0x02;
const METHOD_LZ4: u8 = 0x82;

const CHECKSUM_SIZE: usize = 16;
const HEADER_SIZE: usize = 9;

/// Largest uncompressed chunk written per frame.
pub const MAX_FRAME_SIZE: usize = 1 << 20;

/// Upper bound accepted for a decompressed frame.
const MAX_DECOMPRESSED_SIZE: usize = 1 << 30;

fn checksum(data: &[u8]) -> [u8; CHECKSUM_SIZE] {
    cityhash_rs::cityhash_102_128(data)
        .rotate_right(64)
        .to_le_bytes()
}

fn encode_frame(chunk: &[u8], compression: Compression) -> Result<Vec<u8>> {
    let (method, payload) = match compression {
        Compression::Lz4 => (METHOD_LZ4, lz4_flex::block::compress(chunk)),
        Compression::None => (METHOD_NONE, chunk.to_vec()),
    };
    let compressed_size = u32::try_from(payload.len() + HEADER_SIZE)
        .map_err(|_| ProtocolError::Compression("frame too large".into()))?;
    let decompressed_size = u32::try_from(chunk.len())
        .map_err(|_| ProtocolError::Compression("frame too large".into()))?;

    let mut frame = Vec::with_capacity(CHECKSUM_SIZE + HEADER_SIZE + payload.len());
    frame.extend_from_slice(&[0; CHECKSUM_SIZE]);
    frame.push(method);
    frame.extend_from_slice(&compressed_size.to_le_bytes());
    frame.extend_from_slice(&decompressed_size.to_le_bytes());
    frame.extend_from_slice(&payload);

    let sum = checksum(&frame[CHECKSUM_SIZE..]);
    frame[..CHECKSUM_SIZE].copy_from_slice(&sum);
    Ok(frame)
}

/// Splits `data` into frames of at most [`MAX_FRAME_SIZE`] bytes and writes them.
pub(crate) fn write_frames<W: Write>(writer: &mut W, data: &[u8], compression: Compression) -> Result<()> {
    for chunk in data.chunks(MAX_FRAME_SIZE) {
        let frame = encode_frame(chunk, compression)?;
        writer
            .write_all(&frame)
            .write_context("compression: write frame")?;
    }
    Ok(())
}

/// Decompresses frames lazily from `inner` as bytes are requested.
pub(crate) struct CompressedReader<'a, R> {
    inner: &'a mut R,
    buffer: Vec<u8>,
    position: usize,
}

impl<'a, R: Read> CompressedReader<'a, R> {
    pub(crate) fn new(inner: &'a mut R) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            position: 0,
        }
    }

    /// Bytes decoded but not consumed yet.
    pub(crate) fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut head = [0_u8; CHECKSUM_SIZE + HEADER_SIZE];
        self.inner.read_exact(&mut head)?;

        let method = head[CHECKSUM_SIZE];
        let compressed_size = read_u32(&head[CHECKSUM_SIZE + 1..]) as usize;
        let decompressed_size = read_u32(&head[CHECKSUM_SIZE + 5..]) as usize;
        if compressed_size < HEADER_SIZE || decompressed_size > MAX_DECOMPRESSED_SIZE {
            return Err(invalid(ProtocolError::Compression(format!(
                "bad frame sizes {compressed_size}/{decompressed_size}"
            ))));
        }

        let mut frame = Vec::with_capacity(compressed_size);
        frame.extend_from_slice(&head[CHECKSUM_SIZE..]);
        (&mut *self.inner)
            .take((compressed_size - HEADER_SIZE) as u64)
            .read_to_end(&mut frame)?;
        if frame.len() != compressed_size {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        if checksum(&frame) != head[..CHECKSUM_SIZE] {
            return Err(invalid(ProtocolError::Checksum));
        }

        let payload = &frame[HEADER_SIZE..];
        self.buffer = match method {
            METHOD_LZ4 => lz4_flex::block::decompress(payload, decompressed_size)
                .map_err(|e| invalid(ProtocolError::Compression(e.to_string())))?,
            METHOD_NONE => payload.to_vec(),
            other => {
                return Err(invalid(ProtocolError::Compression(format!(
                    "unknown method {other:#04x}"
                ))));
            }
        };
        if self.buffer.len() != decompressed_size {
            return Err(invalid(ProtocolError::Compression(format!(
                "expected {decompressed_size} bytes, decompressed {}",
                self.buffer.len()
            ))));
        }
        self.position = 0;
        Ok(())
    }
}

impl<R: Read> Read for CompressedReader<'_, R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        while self.remaining() == 0 {
            self.fill()?;
        }
        let n = cmp::min(out.len(), self.remaining());
        out[..n].copy_from_slice(&self.buffer[self.position..self.position + n]);
        self.position += n;
        Ok(n)
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0_u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn invalid(error: ProtocolError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, error)
}

/// Lifts a frame error carried inside an I/O error back to a protocol error.
pub(crate) fn unwrap_frame_error(error: Error) -> Error {
    match error {
        Error::Read { location, source } => match source.downcast::<ProtocolError>() {
            Ok(protocol) => Error::Protocol(protocol),
            Err(source) => Error::Read { location, source },
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8], len: usize) -> io::Result<Vec<u8>> {
        let mut input = bytes;
        let mut reader = CompressedReader::new(&mut input);
        let mut out = vec![0; len];
        reader.read_exact(&mut out)?;
        Ok(out)
    }

    #[test]
    fn lz4_round_trip_across_frames() {
        let data: Vec<u8> = (0..MAX_FRAME_SIZE + 1000).map(|i| (i % 251) as u8).collect();
        let mut wire = Vec::new();
        write_frames(&mut wire, &data, Compression::Lz4).unwrap();
        assert!(wire.len() < data.len());

        assert_eq!(decode_all(&wire, data.len()).unwrap(), data);
    }

    #[test]
    fn uncompressed_frame_layout() {
        let mut wire = Vec::new();
        write_frames(&mut wire, b"abc", Compression::None).unwrap();

        assert_eq!(wire.len(), CHECKSUM_SIZE + HEADER_SIZE + 3);
        assert_eq!(wire[16], METHOD_NONE);
        assert_eq!(read_u32(&wire[17..]), 12);
        assert_eq!(read_u32(&wire[21..]), 3);
        assert_eq!(&wire[25..], b"abc");
        assert_eq!(decode_all(&wire, 3).unwrap(), b"abc");
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let mut wire = Vec::new();
        write_frames(&mut wire, b"hello, world", Compression::Lz4).unwrap();
        let last = wire.len() - 1;
        wire[last] ^= 0xff;

        let err = decode_all(&wire, 12).unwrap_err();
        let err = unwrap_frame_error(Error::read("block: read values", err));
        assert!(matches!(err, Error::Protocol(ProtocolError::Checksum)));
    }

    #[test]
    fn unknown_method_rejected() {
        let mut frame = vec![0_u8; CHECKSUM_SIZE];
        frame.push(0x90);
        frame.extend_from_slice(&10_u32.to_le_bytes());
        frame.extend_from_slice(&1_u32.to_le_bytes());
        frame.push(7);
        let sum = checksum(&frame[CHECKSUM_SIZE..]);
        frame[..CHECKSUM_SIZE].copy_from_slice(&sum);

        let err = unwrap_frame_error(Error::read("x", decode_all(&frame, 1).unwrap_err()));
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::Compression(_))
        ));
    }

    #[test]
    fn truncated_frame_is_a_read_error() {
        let mut wire = Vec::new();
        write_frames(&mut wire, b"abcdef", Compression::None).unwrap();
        wire.truncate(wire.len() - 2);

        let err = unwrap_frame_error(Error::read("x", decode_all(&wire, 6).unwrap_err()));
        assert!(matches!(err, Error::Read { .. }));
    }
}
