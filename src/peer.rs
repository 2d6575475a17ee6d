//! Receive loop for the peer side of a session.
//!
//! Reads the session stream, reassembles packets, and launches each
//! START_ABILITY through [`AbilityInvoker::handle_start_command`]. The
//! launch outcome goes back to the requester as a START_ABILITY_RESULT on
//! the reply transport:
//!
//! - a synchronous failure is answered at once with `Failure`
//! - an accepted launch is answered when the completion channel fires
//!
//! Only the request that armed the completion slot gets an asynchronous
//! answer; a request accepted while another callback is pending is logged
//! and left unanswered.
//!
//! Per-packet failures are logged and do not end the session; framing
//! errors do.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::channel::AsyncStatus;
use crate::error::{DmsError, Result};
use crate::invoker::AbilityInvoker;
use crate::protocol::{
    peek_command, PacketBuilder, StartAbilityCommand, StartAbilityResult, START_ABILITY,
    START_ABILITY_RESULT,
};
use crate::transport::{DmsTransport, PacketAssembler};

/// Read buffer size for session reads.
const READ_CHUNK_SIZE: usize = 4 * 1024;

/// Serve inbound commands until the stream closes.
///
/// Launch outcomes are sent on `reply`. Result packets arriving from the
/// other side (answers to our own requests) are logged.
///
/// Returns `Ok(())` on a clean close.
pub async fn serve_session<R>(
    mut reader: R,
    invoker: Arc<AbilityInvoker>,
    reply: Arc<dyn DmsTransport>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let max_packet_size = invoker.config().max_packet_size;
    let mut assembler = PacketAssembler::new(max_packet_size);
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            tracing::debug!("session closed");
            return Ok(());
        }

        for packet in assembler.push(&buf[..n])? {
            if let Err(e) = handle_packet(&invoker, &reply, max_packet_size, &packet) {
                tracing::warn!("remote packet failed: {}", e);
            }
        }
    }
}

fn handle_packet(
    invoker: &AbilityInvoker,
    reply: &Arc<dyn DmsTransport>,
    max_packet_size: usize,
    packet: &[u8],
) -> Result<()> {
    match peek_command(packet)? {
        START_ABILITY => {
            let start = StartAbilityCommand::decode(packet)?;
            let relay = ResultRelay {
                reply: reply.clone(),
                max_packet_size,
                bundle_name: start.bundle_name.clone(),
                ability_name: start.ability_name.clone(),
            };

            match invoker.handle_start_command(&start, relay.clone().into_callback()) {
                Ok(accepted) => {
                    if !accepted.callback_armed {
                        tracing::warn!(
                            "launch of {}/{} accepted, outcome will not be relayed",
                            start.bundle_name,
                            start.ability_name
                        );
                    }
                    Ok(())
                }
                Err(e) => {
                    relay.send(AsyncStatus::Failure);
                    Err(e)
                }
            }
        }
        START_ABILITY_RESULT => {
            let result = StartAbilityResult::decode(packet)?;
            tracing::debug!(
                "remote start of {}/{} finished: {:?}",
                result.bundle_name,
                result.ability_name,
                result.status
            );
            Ok(())
        }
        command => Err(DmsError::InvalidParameter(format!(
            "unsupported command {}",
            command
        ))),
    }
}

/// Sends one launch outcome back to the requesting peer.
#[derive(Clone)]
struct ResultRelay {
    reply: Arc<dyn DmsTransport>,
    max_packet_size: usize,
    bundle_name: String,
    ability_name: String,
}

impl ResultRelay {
    fn into_callback(self) -> impl FnOnce(AsyncStatus) + Send + 'static {
        move |status| self.send(status)
    }

    fn send(&self, status: AsyncStatus) {
        let result = StartAbilityResult::new(&self.bundle_name, &self.ability_name, status);
        let sent = result
            .build(&mut PacketBuilder::with_max_size(self.max_packet_size))
            .and_then(|packet| self.reply.send(packet));
        if let Err(e) = sent {
            tracing::error!("failed to relay launch result: {}", e);
        }
    }
}
