//! Command packets exchanged between peers.
//!
//! A START_ABILITY packet has a fixed field order:
//!
//! ```text
//! [u16 command]
//! [u16 CALLEE_BUNDLE_NAME][u16 len][bundle]
//! [u16 CALLEE_ABILITY_NAME][u16 len][ability]
//! [u16 CALLER_SIGNATURE][u16 len][signature]
//! [u16 DMS_VERSION][u16 version]
//! ```
//!
//! The command id is the one untagged field. Tag 1 is never written: peers
//! that send a tagged command id (`[u16 1][u16 command]`) are not
//! compatible with this layout.
//!
//! The peer that served a START_ABILITY answers with START_ABILITY_RESULT
//! once the launch outcome is known:
//!
//! ```text
//! [u16 command]
//! [u16 CALLEE_BUNDLE_NAME][u16 len][bundle]
//! [u16 CALLEE_ABILITY_NAME][u16 len][ability]
//! [u16 RESULT_CODE][u32 status]
//! ```
//!
//! Tag values and the version constant are shared with the peer and must
//! not change.

use bytes::Bytes;

use super::packet::{Field, PacketBuilder, WireValue};
use super::reader::PacketReader;
use crate::channel::AsyncStatus;
use crate::error::{DmsError, Result};

/// Command id for "start ability".
pub const START_ABILITY: u16 = 1;

/// Command id for the launch outcome sent back to the requesting peer.
pub const START_ABILITY_RESULT: u16 = 2;

/// Protocol version carried in every command.
pub const DMS_VERSION_VALUE: u16 = 200;

/// Field tags.
pub mod tags {
    /// Bundle that hosts the target ability.
    pub const CALLEE_BUNDLE_NAME: u16 = 2;
    /// Ability to launch inside the bundle.
    pub const CALLEE_ABILITY_NAME: u16 = 3;
    /// Signing identity of the requesting bundle.
    pub const CALLER_SIGNATURE: u16 = 4;
    /// Protocol version, always [`DMS_VERSION_VALUE`](super::DMS_VERSION_VALUE).
    pub const DMS_VERSION: u16 = 5;
    /// Launch outcome in a result packet.
    pub const RESULT_CODE: u16 = 6;
}

/// Target of one outbound start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationRequest {
    /// Bundle that hosts the ability on the remote device.
    pub bundle_name: String,
    /// Ability to launch.
    pub ability_name: String,
    /// Signing identity of the calling bundle; empty when unknown.
    pub caller_signature: String,
}

impl InvocationRequest {
    /// Create a request. Nothing is validated until [`build`](Self::build).
    pub fn new(
        bundle_name: impl Into<String>,
        ability_name: impl Into<String>,
        caller_signature: impl Into<String>,
    ) -> Self {
        Self {
            bundle_name: bundle_name.into(),
            ability_name: ability_name.into(),
            caller_signature: caller_signature.into(),
        }
    }

    /// Bundle and ability names must be non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.bundle_name.is_empty() {
            return Err(DmsError::InvalidParameter("empty bundle name".to_string()));
        }
        if self.ability_name.is_empty() {
            return Err(DmsError::InvalidParameter("empty ability name".to_string()));
        }
        Ok(())
    }

    /// Fields of the START_ABILITY packet, in wire order.
    pub fn fields(&self) -> [Field<'_>; 5] {
        [
            Field::untagged(WireValue::U16(START_ABILITY)),
            Field::tagged(tags::CALLEE_BUNDLE_NAME, WireValue::str(&self.bundle_name)),
            Field::tagged(tags::CALLEE_ABILITY_NAME, WireValue::str(&self.ability_name)),
            Field::tagged(tags::CALLER_SIGNATURE, WireValue::str(&self.caller_signature)),
            Field::tagged(tags::DMS_VERSION, WireValue::U16(DMS_VERSION_VALUE)),
        ]
    }

    /// Validate, then build and seal the packet.
    ///
    /// Nothing is written when validation fails. A marshalling failure
    /// leaves the builder aborted, never holding a partial packet.
    pub fn build(&self, builder: &mut PacketBuilder) -> Result<Bytes> {
        self.validate()?;
        builder.begin()?;
        builder.marshall_all(&self.fields())?;
        builder.seal()
    }
}

/// Read the command id without decoding the rest.
pub fn peek_command(packet: &[u8]) -> Result<u16> {
    PacketReader::new(packet).read_u16()
}

/// A decoded START_ABILITY packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartAbilityCommand {
    pub bundle_name: String,
    pub ability_name: String,
    /// Empty when the requester had no signature for its bundle.
    pub caller_signature: String,
    /// Protocol version the requester speaks.
    pub version: u16,
}

impl StartAbilityCommand {
    /// Decode a START_ABILITY packet, checking the command id and every tag.
    ///
    /// Trailing bytes after the version are ignored.
    pub fn decode(packet: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(packet);

        let command = reader.read_u16()?;
        if command != START_ABILITY {
            return Err(DmsError::Malformed(format!(
                "expected command {}, found {}",
                START_ABILITY, command
            )));
        }

        reader.expect_tag(tags::CALLEE_BUNDLE_NAME)?;
        let bundle_name = reader.read_str()?.to_string();
        reader.expect_tag(tags::CALLEE_ABILITY_NAME)?;
        let ability_name = reader.read_str()?.to_string();
        reader.expect_tag(tags::CALLER_SIGNATURE)?;
        let caller_signature = reader.read_str()?.to_string();
        reader.expect_tag(tags::DMS_VERSION)?;
        let version = reader.read_u16()?;

        if !reader.is_empty() {
            tracing::debug!("ignoring {} trailing bytes in command", reader.remaining());
        }

        Ok(Self {
            bundle_name,
            ability_name,
            caller_signature,
            version,
        })
    }
}

/// Launch outcome relayed back to the peer that requested the start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartAbilityResult {
    pub bundle_name: String,
    pub ability_name: String,
    pub status: AsyncStatus,
}

impl StartAbilityResult {
    pub fn new(
        bundle_name: impl Into<String>,
        ability_name: impl Into<String>,
        status: AsyncStatus,
    ) -> Self {
        Self {
            bundle_name: bundle_name.into(),
            ability_name: ability_name.into(),
            status,
        }
    }

    /// Fields of the START_ABILITY_RESULT packet, in wire order.
    pub fn fields(&self) -> [Field<'_>; 4] {
        [
            Field::untagged(WireValue::U16(START_ABILITY_RESULT)),
            Field::tagged(tags::CALLEE_BUNDLE_NAME, WireValue::str(&self.bundle_name)),
            Field::tagged(tags::CALLEE_ABILITY_NAME, WireValue::str(&self.ability_name)),
            Field::tagged(tags::RESULT_CODE, WireValue::U32(self.status.code() as u32)),
        ]
    }

    /// Build and seal the result packet.
    pub fn build(&self, builder: &mut PacketBuilder) -> Result<Bytes> {
        builder.begin()?;
        builder.marshall_all(&self.fields())?;
        builder.seal()
    }

    /// Decode a START_ABILITY_RESULT packet.
    ///
    /// A status other than the two async codes is `Malformed`.
    pub fn decode(packet: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(packet);

        let command = reader.read_u16()?;
        if command != START_ABILITY_RESULT {
            return Err(DmsError::Malformed(format!(
                "expected command {}, found {}",
                START_ABILITY_RESULT, command
            )));
        }

        reader.expect_tag(tags::CALLEE_BUNDLE_NAME)?;
        let bundle_name = reader.read_str()?.to_string();
        reader.expect_tag(tags::CALLEE_ABILITY_NAME)?;
        let ability_name = reader.read_str()?.to_string();
        reader.expect_tag(tags::RESULT_CODE)?;
        let code = reader.read_i32()?;
        let status = AsyncStatus::from_code(code)
            .ok_or_else(|| DmsError::Malformed(format!("unknown launch status {}", code)))?;

        Ok(Self {
            bundle_name,
            ability_name,
            status,
        })
    }
}
