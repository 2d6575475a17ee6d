//! Result envelope delivered by the ability service after a launch.
//!
//! ```text
//! [u16 len][device id][u16 len][bundle][u16 len][ability][i32 status BE]
//! ```
//!
//! The element is opaque to this layer but must be read first to reach
//! the status.

use bytes::{BufMut, Bytes, BytesMut};

use super::reader::PacketReader;
use crate::ability::ElementName;
use crate::codec::{u16_to_wire, u32_to_wire};
use crate::error::{DmsError, Result};

/// Status the ability service reports for a successful launch.
pub const LAUNCH_SUCCESS: i32 = 0;

/// Deserialized completion notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultEnvelope {
    /// Ability the result is about. Carried through, never interpreted.
    pub target: ElementName,
    /// Launch status from the ability service; [`LAUNCH_SUCCESS`] or an
    /// error code.
    pub status: i32,
}

impl ResultEnvelope {
    /// Create an envelope for `target` with a raw launch status.
    pub fn new(target: ElementName, status: i32) -> Self {
        Self { target, status }
    }

    /// `true` only for [`LAUNCH_SUCCESS`].
    #[inline]
    pub fn is_success(&self) -> bool {
        self.status == LAUNCH_SUCCESS
    }

    /// Decode an envelope delivered by the IPC runtime.
    ///
    /// # Errors
    ///
    /// `Malformed` when the element or the status is truncated or a
    /// string is not UTF-8. Trailing bytes are ignored.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(buf);
        let device_id = reader.read_str()?.to_string();
        let bundle_name = reader.read_str()?.to_string();
        let ability_name = reader.read_str()?.to_string();
        let status = reader.read_i32()?;
        Ok(Self {
            target: ElementName {
                device_id,
                bundle_name,
                ability_name,
            },
            status,
        })
    }

    /// Encode the envelope as the ability service would send it.
    ///
    /// # Errors
    ///
    /// `Marshalling` when an element string does not fit a `u16` length.
    pub fn encode(&self) -> Result<Bytes> {
        let element = &self.target;
        let parts = [
            element.device_id.as_bytes(),
            element.bundle_name.as_bytes(),
            element.ability_name.as_bytes(),
        ];

        let mut buf = BytesMut::with_capacity(parts.iter().map(|p| 2 + p.len()).sum::<usize>() + 4);
        for part in parts {
            let len = u16::try_from(part.len()).map_err(|_| {
                DmsError::Marshalling(format!("element field of {} bytes too long", part.len()))
            })?;
            buf.put_slice(&u16_to_wire(len));
            buf.put_slice(part);
        }
        buf.put_slice(&u32_to_wire(self.status as u32));
        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element() -> ElementName {
        ElementName::new("dev-1", "com.app", "MainAbility")
    }

    #[test]
    fn test_encode_decode() {
        let envelope = ResultEnvelope::new(element(), LAUNCH_SUCCESS);
        let bytes = envelope.encode().unwrap();
        let decoded = ResultEnvelope::decode(&bytes).unwrap();
        assert_eq!(decoded, envelope);
        assert!(decoded.is_success());
    }

    #[test]
    fn test_status_is_big_endian_tail() {
        let bytes = ResultEnvelope::new(ElementName::default(), -1).encode().unwrap();
        // Three empty strings, then the status.
        assert_eq!(&bytes[..], &[0, 0, 0, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(!ResultEnvelope::decode(&bytes).unwrap().is_success());
    }

    #[test]
    fn test_missing_status_is_malformed() {
        let bytes = ResultEnvelope::new(element(), 0).encode().unwrap();
        let truncated = &bytes[..bytes.len() - 2];
        assert!(matches!(
            ResultEnvelope::decode(truncated),
            Err(DmsError::Malformed(_))
        ));
    }
}
