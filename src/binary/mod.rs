//! Primitive wire encoding.
//!
//! Everything the native protocol sends is built from a handful of primitives:
//!
//! - unsigned LEB128 varints, used for packet kinds, counts and string lengths;
//! - signed varints, which are the two's-complement `u64` image of the value pushed
//!   through the unsigned routine (no zig-zag);
//! - fixed-width little-endian integers and IEEE-754 floats;
//! - strings as a varint length followed by raw bytes;
//! - UUIDs as two little-endian `u64` halves, high half first.
//!
//! Array columns are preceded by a stream of cumulative `u64` offsets. The helpers in this
//! module turn row lengths into offsets and back; the baseline for the subtraction lives in
//! a [`RunningOffset`] owned by a single column decode, so two unrelated columns can never
//! share it.
mod reader;
mod writer;

use std::io::{self, Write};

use uuid::Uuid;

use crate::error::ProtocolError;

pub use reader::Reader;
pub use writer::Writer;

/// Fixed-width little-endian value.
pub trait FixedWidth: Copy + Default + Sized {
    const WIDTH: usize;

    fn from_le_slice(bytes: &[u8]) -> Self;

    fn write_le<W: Write>(self, out: &mut W) -> io::Result<()>;
}

macro_rules! fixed_width {
    ($($t:ty),* $(,)?) => {
        $(
            impl FixedWidth for $t {
                const WIDTH: usize = size_of::<$t>();

                fn from_le_slice(bytes: &[u8]) -> Self {
                    let mut buf = [0_u8; size_of::<$t>()];
                    buf.copy_from_slice(&bytes[..size_of::<$t>()]);
                    <$t>::from_le_bytes(buf)
                }

                fn write_le<W: Write>(self, out: &mut W) -> io::Result<()> {
                    out.write_all(&self.to_le_bytes())
                }
            }
        )*
    };
}

fixed_width!(i8, i16, i32, i64, i128, u8, u16, u32, u64, u128, f32, f64);

/// Running baseline of one array column's offset stream.
#[derive(Debug, Default)]
pub struct RunningOffset {
    previous: u64,
}

impl RunningOffset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Element count of the row whose cumulative offset is `offset`.
    pub fn length(&mut self, offset: u64) -> Result<u64, ProtocolError> {
        if offset < self.previous {
            return Err(ProtocolError::MalformedOffsets {
                previous: self.previous,
                offset,
            });
        }
        let length = offset - self.previous;
        self.previous = offset;
        Ok(length)
    }

    pub fn total(&self) -> u64 {
        self.previous
    }
}

/// Converts per-row element counts into the cumulative offset stream.
pub fn offsets_from_lengths(lengths: &[u64]) -> Vec<u64> {
    lengths
        .iter()
        .scan(0_u64, |total, len| {
            *total += len;
            Some(*total)
        })
        .collect()
}

/// Recovers per-row element counts from one column's offset stream.
pub fn lengths_from_offsets(offsets: &[u64]) -> Result<Vec<u64>, ProtocolError> {
    let mut running = RunningOffset::new();
    offsets.iter().map(|o| running.length(*o)).collect()
}

/// Wire image of a UUID: high half then low half, each little-endian.
pub fn uuid_to_wire(uuid: &Uuid) -> [u8; 16] {
    let (high, low) = uuid.as_u64_pair();
    let mut out = [0_u8; 16];
    out[..8].copy_from_slice(&high.to_le_bytes());
    out[8..].copy_from_slice(&low.to_le_bytes());
    out
}

pub fn uuid_from_wire(bytes: [u8; 16]) -> Uuid {
    let high = u64::from_le_slice(&bytes[..8]);
    let low = u64::from_le_slice(&bytes[8..]);
    Uuid::from_u64_pair(high, low)
}
