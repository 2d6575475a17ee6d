//! Transport module - handing sealed packets to a session.
//!
//! Provides:
//! - [`DmsTransport`] - the seam the invoker sends packets through
//! - [`SessionSender`] / [`spawn_session_writer`] - queued writer over any `AsyncWrite`
//! - [`PacketAssembler`] - splits a session byte stream back into packets
//!
//! On a stream session every packet is framed as `[u32 length BE][packet]`.

mod assembler;
mod session;

use bytes::Bytes;

use crate::error::Result;

pub use assembler::PacketAssembler;
pub use session::{spawn_session_writer, SessionPacket, SessionSender, SESSION_HEADER_SIZE};

/// Moves sealed packets toward the remote peer.
///
/// `Ok` only means the packet was accepted for sending, not that the peer
/// received or acted on it.
pub trait DmsTransport: Send + Sync {
    fn send(&self, packet: Bytes) -> Result<()>;
}
