//! Packet builder for outbound commands.
//!
//! A packet is a contiguous buffer of fields written in a fixed order:
//!
//! ```text
//! ┌──────────┬─────────────┬───────────────┬─────┐
//! │ Command  │ Tag │ Value │ Tag │ Len │ … │ ... │
//! │ uint16 BE│ u16 │ u16   │ u16 │ u16 │   │     │
//! └──────────┴─────────────┴───────────────┴─────┘
//! ```
//!
//! Marshalling is fail-fast: the first field that cannot be written
//! releases the buffer and leaves the builder in `Aborted`. A packet is
//! only ever handed out through [`PacketBuilder::seal`].
//!
//! # Example
//!
//! ```
//! use dmslite::protocol::{Field, PacketBuilder, WireValue};
//!
//! let mut builder = PacketBuilder::new();
//! builder.begin().unwrap();
//! builder
//!     .marshall_all(&[
//!         Field::untagged(WireValue::U16(1)),
//!         Field::tagged(2, WireValue::str("com.app")),
//!     ])
//!     .unwrap();
//! let packet = builder.seal().unwrap();
//! assert_eq!(&packet[..2], &[0x00, 0x01]);
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{u16_to_wire, u32_to_wire, u64_to_wire};
use crate::config::DEFAULT_MAX_PACKET_SIZE;
use crate::error::{DmsError, Result};

/// Size of a field tag on the wire.
pub const TAG_SIZE: usize = 2;

/// Size of a byte-string length prefix on the wire.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Upper bound on the buffer reserved up front.
const INITIAL_CAPACITY: usize = 256;

/// Kind of a wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireKind {
    UInt16,
    UInt32,
    UInt64,
    LengthPrefixedBytes,
}

/// A typed scalar or byte sequence destined for the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireValue<'a> {
    U16(u16),
    U32(u32),
    U64(u64),
    /// Written as `[u16 length][bytes]`.
    Bytes(&'a [u8]),
}

impl<'a> WireValue<'a> {
    /// Length-prefixed UTF-8 string.
    pub fn str(value: &'a str) -> Self {
        WireValue::Bytes(value.as_bytes())
    }

    pub fn kind(&self) -> WireKind {
        match self {
            WireValue::U16(_) => WireKind::UInt16,
            WireValue::U32(_) => WireKind::UInt32,
            WireValue::U64(_) => WireKind::UInt64,
            WireValue::Bytes(_) => WireKind::LengthPrefixedBytes,
        }
    }

    /// Bytes this value occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        match self {
            WireValue::U16(_) => 2,
            WireValue::U32(_) => 4,
            WireValue::U64(_) => 8,
            WireValue::Bytes(b) => LENGTH_PREFIX_SIZE + b.len(),
        }
    }
}

/// One field of a packet, optionally preceded by a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field<'a> {
    pub tag: Option<u16>,
    pub value: WireValue<'a>,
}

impl<'a> Field<'a> {
    /// A field written without a tag (the leading command id).
    pub fn untagged(value: WireValue<'a>) -> Self {
        Self { tag: None, value }
    }

    pub fn tagged(tag: u16, value: WireValue<'a>) -> Self {
        Self {
            tag: Some(tag),
            value,
        }
    }

    pub fn encoded_len(&self) -> usize {
        let tag_len = if self.tag.is_some() { TAG_SIZE } else { 0 };
        tag_len + self.value.encoded_len()
    }
}

/// Lifecycle of the builder's current packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketState {
    /// No packet under construction.
    Idle,
    /// A packet is being built.
    Open,
    /// The last packet failed a field and was discarded.
    Aborted,
}

/// Accumulating buffer for one packet at a time.
#[derive(Debug)]
pub struct PacketBuilder {
    /// Backing buffer, present only while a packet is open.
    buffer: Option<BytesMut>,
    state: PacketState,
    max_size: usize,
}

impl PacketBuilder {
    /// Create a builder with the default packet ceiling.
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_PACKET_SIZE)
    }

    /// Create a builder whose packets never grow past `max_size` bytes.
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            buffer: None,
            state: PacketState::Idle,
            max_size,
        }
    }

    #[inline]
    pub fn state(&self) -> PacketState {
        self.state
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.state == PacketState::Open
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Bytes written so far to the open packet.
    pub fn len(&self) -> usize {
        self.buffer.as_ref().map_or(0, BytesMut::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// View of the open packet's bytes (empty if none is open).
    pub fn as_bytes(&self) -> &[u8] {
        self.buffer.as_deref().unwrap_or(&[])
    }

    /// Open a new packet.
    ///
    /// Fails without touching the current packet if one is already open.
    pub fn begin(&mut self) -> Result<()> {
        if self.is_open() {
            return Err(DmsError::Marshalling(
                "a packet is already open".to_string(),
            ));
        }
        self.buffer = Some(BytesMut::with_capacity(self.max_size.min(INITIAL_CAPACITY)));
        self.state = PacketState::Open;
        Ok(())
    }

    /// Append one field.
    ///
    /// On failure the open packet is aborted and its buffer released.
    pub fn marshall(&mut self, field: Field<'_>) -> Result<()> {
        if !self.is_open() {
            return Err(DmsError::Marshalling("no open packet".to_string()));
        }

        if let WireValue::Bytes(b) = field.value {
            if b.len() > u16::MAX as usize {
                return Err(self.fail(format!(
                    "byte field of {} bytes exceeds length prefix",
                    b.len()
                )));
            }
        }

        let needed = field.encoded_len();
        let current = self.len();
        if current + needed > self.max_size {
            return Err(self.fail(format!(
                "packet would grow to {} bytes, maximum is {}",
                current + needed,
                self.max_size
            )));
        }

        let Some(buf) = self.buffer.as_mut() else {
            return Err(self.fail("open packet has no buffer".to_string()));
        };
        if let Some(tag) = field.tag {
            buf.put_slice(&u16_to_wire(tag));
        }
        match field.value {
            WireValue::U16(v) => buf.put_slice(&u16_to_wire(v)),
            WireValue::U32(v) => buf.put_slice(&u32_to_wire(v)),
            WireValue::U64(v) => buf.put_slice(&u64_to_wire(v)),
            WireValue::Bytes(b) => {
                buf.put_slice(&u16_to_wire(b.len() as u16));
                buf.put_slice(b);
            }
        }
        Ok(())
    }

    /// Append fields in order, stopping at the first failure.
    pub fn marshall_all(&mut self, fields: &[Field<'_>]) -> Result<()> {
        fields.iter().try_for_each(|field| self.marshall(*field))
    }

    /// Finish the open packet and hand out its bytes.
    ///
    /// The builder returns to `Idle`, ready for the next packet.
    pub fn seal(&mut self) -> Result<Bytes> {
        if !self.is_open() {
            return Err(DmsError::Marshalling(format!(
                "cannot seal packet in state {:?}",
                self.state
            )));
        }
        let buf = self.buffer.take().unwrap_or_default();
        self.state = PacketState::Idle;
        Ok(buf.freeze())
    }

    /// Discard the open packet. No-op when nothing is open.
    pub fn abort(&mut self) {
        if !self.is_open() {
            return;
        }
        tracing::debug!("aborting packet after {} bytes", self.len());
        self.buffer = None;
        self.state = PacketState::Aborted;
    }

    fn fail(&mut self, reason: String) -> DmsError {
        tracing::error!("marshall value failed: {}", reason);
        self.abort();
        DmsError::Marshalling(reason)
    }
}

impl Default for PacketBuilder {
    fn default() -> Self {
        Self::new()
    }
}
