//! Cursor for reading fields back out of a packet.
//!
//! Mirrors [`PacketBuilder`](super::PacketBuilder): integers are big-endian,
//! byte strings carry a `u16` length prefix. Running off the end of the
//! buffer is reported as [`DmsError::Malformed`].

use crate::codec::{u16_from_wire, u32_from_wire, u64_from_wire};
use crate::error::{DmsError, Result};

/// Read-only cursor over a packet.
#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    /// Start reading at the first byte of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset into the packet.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes not yet consumed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// `true` once every byte has been read.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Consume exactly `n` bytes.
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(DmsError::Malformed(format!(
                "need {} bytes at offset {}, only {} left",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read a big-endian `u16` (tags, lengths, the command id, the version).
    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16_from_wire(self.take_array()?))
    }

    /// Read a big-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32_from_wire(self.take_array()?))
    }

    /// Read a big-endian `u64`.
    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64_from_wire(self.take_array()?))
    }

    /// Read a big-endian two's-complement `i32`.
    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// Read a tag and check it matches `expected`.
    pub fn expect_tag(&mut self, expected: u16) -> Result<()> {
        let tag = self.read_u16()?;
        if tag != expected {
            return Err(DmsError::Malformed(format!(
                "expected tag {} at offset {}, found {}",
                expected,
                self.pos - 2,
                tag
            )));
        }
        Ok(())
    }

    /// Read a length-prefixed byte string.
    ///
    /// The returned slice borrows from the packet, not from the reader.
    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_u16()? as usize;
        self.take(len)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> Result<&'a str> {
        let bytes = self.read_bytes()?;
        std::str::from_utf8(bytes)
            .map_err(|e| DmsError::Malformed(format!("invalid UTF-8 in string field: {}", e)))
    }
}
