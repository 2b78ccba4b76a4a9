use std::io::{self, Read};

use uuid::Uuid;

use super::{FixedWidth, uuid_from_wire};

/// Reads protocol primitives from any byte source.
///
/// Methods return plain [`io::Result`]; callers attach a location with
/// [`ReadContext`](crate::error::ReadContext) at the point where they know which field
/// was being read.
pub struct Reader<R> {
    inner: R,
}

impl<R: Read> Reader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    pub fn uvarint(&mut self) -> io::Result<u64> {
        let mut value = 0_u64;
        for shift in (0..64).step_by(7) {
            let byte = self.u8()?;
            if shift == 63 && byte > 1 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "varint overflows a 64-bit integer",
                ));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "varint overflows a 64-bit integer",
        ))
    }

    pub fn varint(&mut self) -> io::Result<i64> {
        self.uvarint().map(|v| v as i64)
    }

    pub fn u8(&mut self) -> io::Result<u8> {
        let mut buf = [0_u8; 1];
        self.inner.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn bool(&mut self) -> io::Result<bool> {
        Ok(self.u8()? != 0)
    }

    pub fn fixed<T: FixedWidth>(&mut self) -> io::Result<T> {
        let mut buf = [0_u8; 16];
        let buf = &mut buf[..T::WIDTH];
        self.inner.read_exact(buf)?;
        Ok(T::from_le_slice(buf))
    }

    pub fn fixed_vec<T: FixedWidth>(&mut self, count: usize) -> io::Result<Vec<T>> {
        let raw = self.bytes(count.saturating_mul(T::WIDTH))?;
        Ok(raw.chunks_exact(T::WIDTH).map(T::from_le_slice).collect())
    }

    pub fn u32(&mut self) -> io::Result<u32> {
        self.fixed()
    }

    pub fn i32(&mut self) -> io::Result<i32> {
        self.fixed()
    }

    pub fn u64(&mut self) -> io::Result<u64> {
        self.fixed()
    }

    /// Reads exactly `len` raw bytes.
    ///
    /// The buffer grows with the data actually received, so a corrupt length cannot force a
    /// huge allocation up front.
    pub fn bytes(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(len.min(64 * 1024));
        (&mut self.inner).take(len as u64).read_to_end(&mut buf)?;
        if buf.len() != len {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok(buf)
    }

    /// Length-prefixed byte string.
    pub fn string_bytes(&mut self) -> io::Result<Vec<u8>> {
        let len = self.uvarint()?;
        let len = usize::try_from(len)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "string length overflow"))?;
        self.bytes(len)
    }

    /// Length-prefixed UTF-8 string.
    pub fn string(&mut self) -> io::Result<String> {
        String::from_utf8(self.string_bytes()?)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn uuid(&mut self) -> io::Result<Uuid> {
        let mut buf = [0_u8; 16];
        self.inner.read_exact(&mut buf)?;
        Ok(uuid_from_wire(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(bytes: &[u8]) -> Reader<&[u8]> {
        Reader::new(bytes)
    }

    #[test]
    fn uvarint_decodes_multi_byte() {
        assert_eq!(reader(&[0x00]).uvarint().unwrap(), 0);
        assert_eq!(reader(&[0x7f]).uvarint().unwrap(), 127);
        assert_eq!(reader(&[0x80, 0x01]).uvarint().unwrap(), 128);
        assert_eq!(reader(&[0xe5, 0x8e, 0x26]).uvarint().unwrap(), 624_485);
    }

    #[test]
    fn uvarint_max_value() {
        let bytes = [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01];
        assert_eq!(reader(&bytes).uvarint().unwrap(), u64::MAX);
    }

    #[test]
    fn uvarint_overflow_is_invalid_data() {
        let bytes = [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x02];
        let err = reader(&bytes).uvarint().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let bytes = [0x80; 11];
        let err = reader(&bytes).uvarint().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn negative_varint_is_twos_complement() {
        let bytes = [0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01];
        assert_eq!(reader(&bytes).varint().unwrap(), -1);
    }

    #[test]
    fn short_string_is_unexpected_eof() {
        let err = reader(&[0x05, b'a', b'b']).string().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn fixed_little_endian() {
        let mut r = reader(&[0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x80, 0x3f]);
        assert_eq!(r.fixed::<u16>().unwrap(), 0x0201);
        assert_eq!(r.fixed::<u16>().unwrap(), 0);
        assert_eq!(r.fixed::<f32>().unwrap(), 1.0);
    }

    #[test]
    fn fixed_vec_reads_count_values() {
        let mut r = reader(&[1, 0, 2, 0, 3, 0]);
        assert_eq!(r.fixed_vec::<i16>(3).unwrap(), vec![1, 2, 3]);
    }
}
