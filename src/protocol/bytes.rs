//! Big-endian payload reading and writing helpers

use crate::error::{Error, Result};

/// Cursor over a payload that reads big-endian fields
pub struct PayloadReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(Error::InvalidPacket(format!(
                "payload truncated: need {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.buf.len()
            )));
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn i16(&mut self) -> Result<i16> {
        Ok(i16::from_be_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    /// NUL-padded string field of fixed width
    pub fn fixed_str(&mut self, len: usize) -> Result<String> {
        let raw = self.bytes(len)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Fail if unread bytes are left
    pub fn finish(self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(Error::InvalidPacket(format!(
                "{} trailing bytes in payload",
                self.remaining()
            )));
        }
        Ok(())
    }
}

/// Append `s` as a NUL-padded field of exactly `len` bytes (truncating)
pub fn put_fixed_str(out: &mut Vec<u8>, s: &str, len: usize) {
    let raw = s.as_bytes();
    let n = raw.len().min(len);
    out.extend_from_slice(&raw[..n]);
    out.resize(out.len() + (len - n), 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_fields() {
        let buf = [0x12, 0x34, 0xff, 0xfe, 0, 0, 0, 7, 9];
        let mut r = PayloadReader::new(&buf);
        assert_eq!(r.u16().unwrap(), 0x1234);
        assert_eq!(r.i16().unwrap(), -2);
        assert_eq!(r.u32().unwrap(), 7);
        assert_eq!(r.remaining(), 1);
        assert!(r.u16().is_err());
        assert_eq!(r.u8().unwrap(), 9);
        assert!(r.finish().is_ok());
    }

    #[test]
    fn test_fixed_str() {
        let mut out = Vec::new();
        put_fixed_str(&mut out, "hello", 8);
        assert_eq!(out, b"hello\0\0\0");
        put_fixed_str(&mut out, "truncated", 4);
        assert_eq!(&out[8..], b"trun");

        let mut r = PayloadReader::new(&out);
        assert_eq!(r.fixed_str(8).unwrap(), "hello");
        assert_eq!(r.fixed_str(4).unwrap(), "trun");
    }
}
