//! Reassembles packets from a session byte stream.
//!
//! State machine:
//! - `WaitingForLength`: need the 4-byte length prefix
//! - `WaitingForPacket`: length known, need that many bytes
//!
//! # Example
//!
//! ```
//! use dmslite::transport::PacketAssembler;
//!
//! let mut assembler = PacketAssembler::new(1024);
//! assert!(assembler.push(&[0, 0, 0, 2, 0x00]).unwrap().is_empty());
//! let packets = assembler.push(&[0x01]).unwrap();
//! assert_eq!(&packets[0][..], &[0x00, 0x01]);
//! ```

use bytes::{Bytes, BytesMut};

use super::session::SESSION_HEADER_SIZE;
use crate::codec::u32_from_wire;
use crate::error::{DmsError, Result};

#[derive(Debug, Clone, Copy)]
enum State {
    WaitingForLength,
    WaitingForPacket { remaining: usize },
}

/// Accumulates stream chunks and yields whole packets.
pub struct PacketAssembler {
    buffer: BytesMut,
    state: State,
    max_packet_size: usize,
}

impl PacketAssembler {
    pub fn new(max_packet_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_packet_size.min(4096) + SESSION_HEADER_SIZE),
            state: State::WaitingForLength,
            max_packet_size,
        }
    }

    /// Add bytes and return every packet now complete.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` for an empty packet or one above the ceiling.
    /// The stream cannot be resynchronized after that.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut packets = Vec::new();
        while let Some(packet) = self.try_extract_one()? {
            packets.push(packet);
        }
        Ok(packets)
    }

    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        if let State::WaitingForLength = self.state {
            if self.buffer.len() < SESSION_HEADER_SIZE {
                return Ok(None);
            }
            let mut prefix = [0u8; SESSION_HEADER_SIZE];
            prefix.copy_from_slice(&self.buffer[..SESSION_HEADER_SIZE]);
            let len = u32_from_wire(prefix) as usize;

            if len == 0 {
                return Err(DmsError::Malformed("empty session packet".to_string()));
            }
            if len > self.max_packet_size {
                return Err(DmsError::Malformed(format!(
                    "session packet of {} bytes exceeds maximum {}",
                    len, self.max_packet_size
                )));
            }

            let _ = self.buffer.split_to(SESSION_HEADER_SIZE);
            self.state = State::WaitingForPacket { remaining: len };
        }

        let State::WaitingForPacket { remaining } = self.state else {
            return Ok(None);
        };
        if self.buffer.len() < remaining {
            return Ok(None);
        }

        let packet = self.buffer.split_to(remaining).freeze();
        self.state = State::WaitingForLength;
        Ok(Some(packet))
    }

    /// Number of buffered bytes not yet returned as packets.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop buffered bytes and wait for a fresh length prefix.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForPacket { .. } => "WaitingForPacket",
        }
    }
}
