//! Serialize data into the bytecode protocol.
use bytes::{BufMut, Bytes};

use crate::error::Result;

pub trait ToByte {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()>;
}

impl<'a, T: ToByte + 'a + ?Sized> ToByte for &'a T {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        (*self).encode(buffer)
    }
}

impl ToByte for bool {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i8(*self as i8);
        Ok(())
    }
}

impl ToByte for i8 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i8(*self);
        Ok(())
    }
}

impl ToByte for i16 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i16(*self);
        Ok(())
    }
}

impl ToByte for i32 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i32(*self);
        Ok(())
    }
}

impl ToByte for u32 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_u32(*self);
        Ok(())
    }
}

impl ToByte for i64 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i64(*self);
        Ok(())
    }
}

impl ToByte for str {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i16(self.len() as i16);
        buffer.put(self.as_bytes());
        Ok(())
    }
}

impl ToByte for String {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        self.as_str().encode(buffer)
    }
}

impl<V: ToByte> ToByte for [V] {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        encode_as_array(buffer, self, |buffer, x| x.encode(buffer))
    }
}

impl ToByte for [u8] {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_i32(self.len() as i32);
        buffer.put(self);
        Ok(())
    }
}

impl ToByte for Bytes {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        buffer.put_i32(self.len() as i32);
        buffer.put_slice(self);
        Ok(())
    }
}

impl ToByte for Option<&[u8]> {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        match *self {
            Some(xs) => xs.encode(buffer),
            None => (-1i32).encode(buffer),
        }
    }
}

impl ToByte for Option<Bytes> {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        match self {
            Some(xs) => xs.encode(buffer),
            None => (-1i32).encode(buffer),
        }
    }
}

impl ToByte for Option<&str> {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        match *self {
            Some(xs) => xs.encode(buffer),
            None => (-1i16).encode(buffer), // NULLABLE_STRING uses i16 length prefix
        }
    }
}

impl ToByte for Option<String> {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        match self {
            Some(xs) => xs.encode(buffer),
            None => (-1i16).encode(buffer), // NULLABLE_STRING uses i16 length prefix
        }
    }
}

/// Renders the length of `xs` to `buffer` as the start of a
/// protocol array and then for each element of `xs` invokes `f`
/// assuming that function will render the element to the buffer.
pub fn encode_as_array<T, F, W>(buffer: &mut W, xs: &[T], mut f: F) -> Result<()>
where
    F: FnMut(&mut W, &T) -> Result<()>,
    W: BufMut,
{
    buffer.put_i32(xs.len() as i32);
    for x in xs {
        f(buffer, x)?;
    }
    Ok(())
}

/// Reserve a 4-byte length slot, render the child content, then backfill
/// the slot with the number of bytes the child wrote.
///
/// Used for request frames and for the message-set size field inside
/// produce bodies.
pub fn encode_length_prefixed<F>(buffer: &mut Vec<u8>, f: F) -> Result<()>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let slot = buffer.len();
    buffer.extend_from_slice(&[0, 0, 0, 0]);
    f(buffer)?;
    let size = (buffer.len() - slot - 4) as i32;
    buffer[slot..slot + 4].copy_from_slice(&size.to_be_bytes());
    Ok(())
}

/// Reserve a 4-byte CRC slot, render the child content, then backfill the
/// slot with the CRC-32 (IEEE, reflected) of the child bytes.
///
/// This is the message checksum of the classic message format: the CRC
/// covers everything from the magic byte through the value.
pub fn encode_crc_prefixed<F>(buffer: &mut Vec<u8>, f: F) -> Result<()>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let slot = buffer.len();
    buffer.extend_from_slice(&[0, 0, 0, 0]);
    f(buffer)?;
    let crc = crc32fast::hash(&buffer[slot + 4..]);
    buffer[slot..slot + 4].copy_from_slice(&crc.to_be_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_bool() {
        let mut buf = Vec::new();
        true.encode(&mut buf).unwrap();
        false.encode(&mut buf).unwrap();
        assert_eq!(buf, vec![1, 0]);
    }

    #[test]
    fn test_encode_i8() {
        let mut buf = Vec::new();
        (-42i8).encode(&mut buf).unwrap();
        assert_eq!(buf, vec![0xD6]); // -42 in two's complement
    }

    #[test]
    fn test_encode_i16() {
        let mut buf = Vec::new();
        (0x1234i16).encode(&mut buf).unwrap();
        assert_eq!(buf, vec![0x12, 0x34]); // big-endian
    }

    #[test]
    fn test_encode_i32() {
        let mut buf = Vec::new();
        (0x12345678i32).encode(&mut buf).unwrap();
        assert_eq!(buf, vec![0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_encode_i64() {
        let mut buf = Vec::new();
        (0x123456789ABCDEF0i64).encode(&mut buf).unwrap();
        assert_eq!(buf, vec![0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0]);
    }

    #[test]
    fn test_encode_str() {
        let mut buf = Vec::new();
        "hi".encode(&mut buf).unwrap();
        // i16 length prefix (2) + bytes
        assert_eq!(buf, vec![0x00, 0x02, b'h', b'i']);
    }

    #[test]
    fn test_encode_bytes() {
        let mut buf = Vec::new();
        Bytes::from(vec![1, 2, 3]).encode(&mut buf).unwrap();
        // i32 length prefix (3) + bytes
        assert_eq!(buf, vec![0x00, 0x00, 0x00, 0x03, 1, 2, 3]);
    }

    #[test]
    fn test_encode_option_bytes_none() {
        let mut buf = Vec::new();
        let opt: Option<&[u8]> = None;
        opt.encode(&mut buf).unwrap();
        assert_eq!(buf, vec![0xFF, 0xFF, 0xFF, 0xFF]); // -1 as i32
    }

    #[test]
    fn test_encode_option_str_none() {
        let mut buf = Vec::new();
        let opt: Option<&str> = None;
        opt.encode(&mut buf).unwrap();
        assert_eq!(buf, vec![0xFF, 0xFF]); // -1 as i16 (nullable string)
    }

    #[test]
    fn test_encode_as_array() {
        let mut buf = Vec::new();
        let items = vec![10i16, 20i16];
        encode_as_array(&mut buf, &items, |b, x| x.encode(b)).unwrap();
        let expected = vec![
            0x00, 0x00, 0x00, 0x02, // length = 2
            0x00, 0x0A, // 10
            0x00, 0x14, // 20
        ];
        assert_eq!(buf, expected);
    }

    #[test]
    fn test_length_prefix_backfill() {
        let mut buf = Vec::new();
        encode_length_prefixed(&mut buf, |b| {
            b.extend_from_slice(b"hello");
            Ok(())
        })
        .unwrap();
        assert_eq!(&buf[..4], &[0x00, 0x00, 0x00, 0x05]);
        assert_eq!(&buf[4..], b"hello");
    }

    #[test]
    fn test_length_prefix_nested() {
        let mut buf = Vec::new();
        encode_length_prefixed(&mut buf, |b| {
            encode_length_prefixed(b, |inner| {
                inner.extend_from_slice(&[0xAA; 3]);
                Ok(())
            })
        })
        .unwrap();
        // outer length counts the inner prefix too
        assert_eq!(&buf[..4], &[0x00, 0x00, 0x00, 0x07]);
        assert_eq!(&buf[4..8], &[0x00, 0x00, 0x00, 0x03]);
    }

    #[test]
    fn test_crc_prefix_backfill() {
        let mut buf = Vec::new();
        encode_crc_prefixed(&mut buf, |b| {
            b.extend_from_slice(b"123456789");
            Ok(())
        })
        .unwrap();
        // IETF check value for the IEEE reflected polynomial
        assert_eq!(&buf[..4], &0xCBF43926u32.to_be_bytes());
    }

    #[test]
    fn test_crc_prefix_empty_child() {
        let mut buf = Vec::new();
        encode_crc_prefixed(&mut buf, |_| Ok(())).unwrap();
        assert_eq!(&buf[..4], &0u32.to_be_bytes());
    }
}
