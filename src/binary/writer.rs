use std::io::{self, Write};

use uuid::Uuid;

use super::{FixedWidth, uuid_to_wire};

/// Writes protocol primitives to any byte sink.
pub struct Writer<W> {
    inner: W,
}

impl<W: Write> Writer<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn uvarint(&mut self, mut value: u64) -> io::Result<()> {
        let mut buf = [0_u8; 10];
        let mut len = 0;
        while value >= 0x80 {
            buf[len] = (value as u8) | 0x80;
            value >>= 7;
            len += 1;
        }
        buf[len] = value as u8;
        self.inner.write_all(&buf[..=len])
    }

    pub fn varint(&mut self, value: i64) -> io::Result<()> {
        self.uvarint(value as u64)
    }

    pub fn u8(&mut self, value: u8) -> io::Result<()> {
        self.inner.write_all(&[value])
    }

    pub fn bool(&mut self, value: bool) -> io::Result<()> {
        self.u8(u8::from(value))
    }

    pub fn fixed<T: FixedWidth>(&mut self, value: T) -> io::Result<()> {
        value.write_le(&mut self.inner)
    }

    pub fn fixed_slice<T: FixedWidth>(&mut self, values: &[T]) -> io::Result<()> {
        values.iter().try_for_each(|v| v.write_le(&mut self.inner))
    }

    pub fn u32(&mut self, value: u32) -> io::Result<()> {
        self.fixed(value)
    }

    pub fn i32(&mut self, value: i32) -> io::Result<()> {
        self.fixed(value)
    }

    pub fn u64(&mut self, value: u64) -> io::Result<()> {
        self.fixed(value)
    }

    /// Raw bytes without a length prefix.
    pub fn bytes(&mut self, value: &[u8]) -> io::Result<()> {
        self.inner.write_all(value)
    }

    /// Length-prefixed byte string.
    pub fn string_bytes(&mut self, value: &[u8]) -> io::Result<()> {
        self.uvarint(value.len() as u64)?;
        self.inner.write_all(value)
    }

    pub fn string(&mut self, value: &str) -> io::Result<()> {
        self.string_bytes(value.as_bytes())
    }

    pub fn uuid(&mut self, value: &Uuid) -> io::Result<()> {
        self.inner.write_all(&uuid_to_wire(value))
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use crate::binary::Reader;

    use super::*;

    fn written(f: impl FnOnce(&mut Writer<&mut Vec<u8>>) -> io::Result<()>) -> Vec<u8> {
        let mut out = Vec::new();
        f(&mut Writer::new(&mut out)).unwrap();
        out
    }

    #[test]
    fn uvarint_encoding() {
        assert_eq!(written(|w| w.uvarint(0)), vec![0x00]);
        assert_eq!(written(|w| w.uvarint(127)), vec![0x7f]);
        assert_eq!(written(|w| w.uvarint(300)), vec![0xac, 0x02]);
        assert_eq!(written(|w| w.uvarint(u64::MAX)).len(), 10);
    }

    #[test]
    fn negative_varint_uses_unsigned_routine() {
        let bytes = written(|w| w.varint(-2));
        assert_eq!(
            bytes,
            vec![0xfe, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]
        );
        assert_eq!(Reader::new(&bytes[..]).varint().unwrap(), -2);
    }

    #[test]
    fn string_is_length_prefixed() {
        assert_eq!(written(|w| w.string("abc")), vec![3, b'a', b'b', b'c']);
        assert_eq!(written(|w| w.string("")), vec![0]);
    }

    #[test]
    fn float_bits_round_trip() {
        let bytes = written(|w| {
            w.fixed(1.5_f64)?;
            w.fixed(f32::NEG_INFINITY)
        });
        let mut r = Reader::new(&bytes[..]);
        assert_eq!(r.fixed::<f64>().unwrap(), 1.5);
        assert_eq!(r.fixed::<f32>().unwrap(), f32::NEG_INFINITY);
    }
}
