//! Remote Start - one device asks another to launch an ability.
//!
//! This example demonstrates:
//! - Sending a START_ABILITY packet through a queued session writer
//! - Serving the request on the peer with `serve_session`
//! - Reporting the launch outcome through the completion channel
//! - Reading the relayed START_ABILITY_RESULT on the requesting side
//!
//! Both devices live in this process and talk over in-memory streams.
//!
//! ```text
//! cargo run --example remote_start
//! ```

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{duplex, AsyncReadExt};
use tokio::sync::mpsc;

use dmslite::ability::{AbilityManager, FixedIdentity, ServiceRegistry};
use dmslite::channel::{InboundResult, IpcRuntime, MessageId, RegistrationToken};
use dmslite::protocol::{ResultEnvelope, StartAbilityResult};
use dmslite::transport::{spawn_session_writer, PacketAssembler};
use dmslite::{serve_session, AbilityInvoker, DmsConfig, ElementName, InvocationChannel, Want};

/// IPC runtime of the serving device. Buffers are owned by the demo, so
/// freeing is a no-op.
struct LocalRuntime;

impl IpcRuntime for LocalRuntime {
    fn register_completion(&self) -> Result<RegistrationToken, i32> {
        Ok(RegistrationToken(1))
    }

    fn free_buffer(&self, _id: MessageId) {}
}

/// Ability manager that "starts" every ability and reports the outcome
/// later, the way the real service answers on the completion channel.
struct LaunchQueue(mpsc::UnboundedSender<ElementName>);

impl AbilityManager for LaunchQueue {
    fn start_ability(&self, want: &Want) -> Result<(), i32> {
        let element = want.element.clone().ok_or(-1)?;
        println!("[server] launching {}/{}", element.bundle_name, element.ability_name);
        self.0.send(element).map_err(|_| -1)
    }
}

struct Registry(Arc<LaunchQueue>);

impl ServiceRegistry for Registry {
    fn ability_manager(&self) -> Option<Arc<dyn AbilityManager>> {
        let manager: Arc<dyn AbilityManager> = self.0.clone();
        Some(manager)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = DmsConfig::from_json_str(r#"{ "max_packet_size": 512 }"#)?;

    // requests: client -> server, replies: server -> client
    let (client_out, server_in) = duplex(4096);
    let (server_out, mut client_in) = duplex(4096);

    // Serving device.
    let (launched_tx, mut launched_rx) = mpsc::unbounded_channel();
    let launcher = Arc::new(LaunchQueue(launched_tx));
    let server_channel = Arc::new(InvocationChannel::new(Arc::new(LocalRuntime)));
    let (reply, _reply_writer) = spawn_session_writer(server_out, &config);
    let server = AbilityInvoker::builder()
        .config(config.clone())
        .channel(server_channel.clone())
        .transport(Arc::new(reply.clone()))
        .service_registry(Arc::new(Registry(launcher.clone())))
        .public_launcher(launcher)
        .identity(Arc::new(FixedIdentity(config.privileged_uid)))
        .build()?;
    let serving = tokio::spawn(serve_session(server_in, Arc::new(server), Arc::new(reply)));

    // The ability service reports each launch on the completion channel.
    let reporter = tokio::spawn(async move {
        let mut id = 0;
        while let Some(element) = launched_rx.recv().await {
            id += 1;
            match ResultEnvelope::new(element, 0).encode() {
                Ok(payload) => {
                    server_channel.dispatch(InboundResult::new(MessageId(id), payload));
                }
                Err(e) => eprintln!("[server] cannot encode result: {}", e),
            }
        }
    });

    // Requesting device.
    let (session, _request_writer) = spawn_session_writer(client_out, &config);
    let client = AbilityInvoker::builder()
        .config(config.clone())
        .channel(Arc::new(InvocationChannel::new(Arc::new(LocalRuntime))))
        .transport(Arc::new(session))
        .service_registry(Arc::new(Registry(Arc::new(LaunchQueue(
            mpsc::unbounded_channel().0,
        )))))
        .public_launcher(Arc::new(LaunchQueue(mpsc::unbounded_channel().0)))
        .identity(Arc::new(FixedIdentity(config.privileged_uid)))
        .build()?;

    let want = Want::new(ElementName::new("remote-device", "com.example.music", "PlayerAbility"))
        .with_caller_bundle("com.example.remote");
    client.request_remote_start(&want)?;
    println!("[client] start request sent");

    // Wait for the relayed outcome.
    let mut assembler = PacketAssembler::new(config.max_packet_size);
    let mut buf = [0u8; 512];
    let packet: Bytes = loop {
        let n = client_in.read(&mut buf).await?;
        if n == 0 {
            return Err("server closed the session before answering".into());
        }
        if let Some(packet) = assembler.push(&buf[..n])?.into_iter().next() {
            break packet;
        }
    };

    let result = StartAbilityResult::decode(&packet)?;
    println!(
        "[client] {}/{} finished: {:?}",
        result.bundle_name, result.ability_name, result.status
    );

    drop(client);
    serving.await??;
    reporter.abort();
    Ok(())
}
