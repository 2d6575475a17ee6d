//! Protocol module - packets, commands, and result envelopes.
//!
//! This module implements the binary protocol between peers:
//! - Packet builder with fail-fast field marshalling
//! - Packet reader for decoding fields back
//! - START_ABILITY command layout and the result relayed back to the requester
//! - Result envelope returned by the ability service

mod command;
mod envelope;
mod packet;
mod reader;

pub use command::{
    peek_command, tags, InvocationRequest, StartAbilityCommand, StartAbilityResult,
    DMS_VERSION_VALUE, START_ABILITY, START_ABILITY_RESULT,
};
pub use envelope::{ResultEnvelope, LAUNCH_SUCCESS};
pub use packet::{
    Field, PacketBuilder, PacketState, WireKind, WireValue, LENGTH_PREFIX_SIZE, TAG_SIZE,
};
pub use reader::PacketReader;
