//! Integration tests for dmslite.
//!
//! These tests drive both invocation directions through the public API
//! with in-memory collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{duplex, AsyncReadExt};

use dmslite::ability::{
    AbilityManager, BundleInfoProvider, FixedIdentity, ServiceRegistry,
};
use dmslite::channel::{
    ChannelState, DispatchOutcome, InboundResult, IpcRuntime, MessageId, RegistrationToken,
};
use dmslite::protocol::{
    ResultEnvelope, StartAbilityCommand, StartAbilityResult, DMS_VERSION_VALUE,
};
use dmslite::transport::{spawn_session_writer, DmsTransport, PacketAssembler};
use dmslite::{
    serve_session, AbilityInvoker, AsyncStatus, DmsConfig, DmsError, ElementName,
    InvocationChannel, Want,
};

#[derive(Default)]
struct TestRuntime {
    registrations: AtomicUsize,
    freed: Mutex<Vec<MessageId>>,
}

impl IpcRuntime for TestRuntime {
    fn register_completion(&self) -> Result<RegistrationToken, i32> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(RegistrationToken(42))
    }

    fn free_buffer(&self, id: MessageId) {
        self.freed.lock().unwrap().push(id);
    }
}

#[derive(Default)]
struct TestLauncher {
    calls: Mutex<Vec<Want>>,
}

impl AbilityManager for TestLauncher {
    fn start_ability(&self, want: &Want) -> Result<(), i32> {
        self.calls.lock().unwrap().push(want.clone());
        Ok(())
    }
}

struct TestRegistry(Option<Arc<TestLauncher>>);

impl ServiceRegistry for TestRegistry {
    fn ability_manager(&self) -> Option<Arc<dyn AbilityManager>> {
        let manager: Arc<dyn AbilityManager> = self.0.clone()?;
        Some(manager)
    }
}

struct TestBundles;

impl BundleInfoProvider for TestBundles {
    fn app_id(&self, bundle_name: &str) -> Option<String> {
        (bundle_name == "com.caller").then(|| "caller-app-id".to_string())
    }
}

#[derive(Default)]
struct CapturingTransport {
    sent: Mutex<Vec<Bytes>>,
    reject: bool,
}

impl DmsTransport for CapturingTransport {
    fn send(&self, packet: Bytes) -> dmslite::error::Result<()> {
        if self.reject {
            return Err(DmsError::TransportRejected("peer offline".to_string()));
        }
        self.sent.lock().unwrap().push(packet);
        Ok(())
    }
}

struct Fixture {
    runtime: Arc<TestRuntime>,
    privileged: Arc<TestLauncher>,
    public: Arc<TestLauncher>,
    transport: Arc<CapturingTransport>,
    invoker: AbilityInvoker,
}

fn fixture(uid: u32) -> Fixture {
    fixture_with(uid, CapturingTransport::default(), 1024)
}

fn fixture_with(uid: u32, transport: CapturingTransport, max_packet_size: usize) -> Fixture {
    let runtime = Arc::new(TestRuntime::default());
    let privileged = Arc::new(TestLauncher::default());
    let public = Arc::new(TestLauncher::default());
    let transport = Arc::new(transport);

    let invoker = AbilityInvoker::builder()
        .max_packet_size(max_packet_size)
        .channel(Arc::new(InvocationChannel::new(runtime.clone())))
        .transport(transport.clone())
        .bundle_info(Arc::new(TestBundles))
        .service_registry(Arc::new(TestRegistry(Some(privileged.clone()))))
        .public_launcher(public.clone())
        .identity(Arc::new(FixedIdentity(uid)))
        .build()
        .unwrap();

    Fixture {
        runtime,
        privileged,
        public,
        transport,
        invoker,
    }
}

fn target_want(bundle: &str, ability: &str) -> Want {
    Want::new(ElementName::new("remote-device", bundle, ability)).with_caller_bundle("com.caller")
}

fn result(id: u64, status: i32) -> InboundResult {
    let payload = ResultEnvelope::new(ElementName::new("", "com.app", "MainAbility"), status)
        .encode()
        .unwrap();
    InboundResult::new(MessageId(id), payload)
}

/// Outbound request produces one packet with the caller's signature.
#[test]
fn test_remote_start_sends_packet() {
    let f = fixture(7);
    f.invoker
        .request_remote_start(&target_want("com.app", "MainAbility"))
        .unwrap();

    let sent = f.transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    let command = StartAbilityCommand::decode(&sent[0]).unwrap();
    assert_eq!(command.bundle_name, "com.app");
    assert_eq!(command.ability_name, "MainAbility");
    assert_eq!(command.caller_signature, "caller-app-id");
    assert_eq!(command.version, DMS_VERSION_VALUE);
}

/// Unknown caller bundle still sends, with an empty signature.
#[test]
fn test_unknown_caller_sends_empty_signature() {
    let f = fixture(7);
    let want = Want::new(ElementName::new("", "com.app", "MainAbility"))
        .with_caller_bundle("com.stranger");
    f.invoker.request_remote_start(&want).unwrap();

    let sent = f.transport.sent.lock().unwrap();
    let command = StartAbilityCommand::decode(&sent[0]).unwrap();
    assert_eq!(command.caller_signature, "");
}

/// Empty names are rejected before anything reaches the transport.
#[test]
fn test_remote_start_rejects_empty_names() {
    let f = fixture(7);

    let err = f
        .invoker
        .request_remote_start(&target_want("", "MainAbility"))
        .unwrap_err();
    assert!(matches!(err, DmsError::InvalidParameter(_)));

    let err = f
        .invoker
        .request_remote_start(&target_want("com.app", ""))
        .unwrap_err();
    assert!(matches!(err, DmsError::InvalidParameter(_)));

    let err = f.invoker.request_remote_start(&Want::default()).unwrap_err();
    assert!(matches!(err, DmsError::InvalidParameter(_)));

    assert!(f.transport.sent.lock().unwrap().is_empty());
}

/// A packet that outgrows the ceiling is aborted; the next one still builds.
#[test]
fn test_marshalling_failure_does_not_poison_builder() {
    let f = fixture_with(7, CapturingTransport::default(), 32);

    let err = f
        .invoker
        .request_remote_start(&target_want("com.example.a.very.long.bundle", "MainAbility"))
        .unwrap_err();
    assert!(matches!(err, DmsError::Marshalling(_)));
    assert_eq!(err.code(), dmslite::error::codes::MARSHALLING_FAILURE);

    let want = Want::new(ElementName::new("", "a", "B")).with_caller_bundle("x");
    f.invoker.request_remote_start(&want).unwrap();
    assert_eq!(f.transport.sent.lock().unwrap().len(), 1);
}

/// Transport rejection is returned to the caller.
#[test]
fn test_transport_rejection_propagates() {
    let transport = CapturingTransport {
        reject: true,
        ..Default::default()
    };
    let f = fixture_with(7, transport, 1024);

    let err = f
        .invoker
        .request_remote_start(&target_want("com.app", "MainAbility"))
        .unwrap_err();
    assert!(matches!(err, DmsError::TransportRejected(_)));
}

/// Privileged caller: launch goes to the ability manager and the result
/// comes back through the armed callback exactly once.
#[test]
fn test_inbound_round_trip() {
    let f = fixture(7);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let accepted = f
        .invoker
        .handle_start_request("com.app", "MainAbility", move |status| {
            sink.lock().unwrap().push(status)
        })
        .unwrap();
    assert!(accepted.callback_armed);

    let calls = f.privileged.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].reply_to, Some(RegistrationToken(42)));
    assert!(f.public.calls.lock().unwrap().is_empty());

    let channel = f.invoker.channel();
    assert_eq!(channel.state(), ChannelState::Armed);

    assert_eq!(
        channel.dispatch(result(1, 0)),
        DispatchOutcome::Delivered(AsyncStatus::Success)
    );
    assert_eq!(channel.dispatch(result(2, 0)), DispatchOutcome::Dropped);

    assert_eq!(*seen.lock().unwrap(), vec![AsyncStatus::Success]);
    assert_eq!(channel.state(), ChannelState::Idle);
    assert_eq!(
        *f.runtime.freed.lock().unwrap(),
        vec![MessageId(1), MessageId(2)]
    );
}

/// Registration happens once across many requests.
#[test]
fn test_registration_is_lazy_and_single() {
    let f = fixture(7);
    assert_eq!(f.invoker.channel().state(), ChannelState::Unregistered);

    for _ in 0..3 {
        f.invoker
            .handle_start_request("com.app", "MainAbility", |_| {})
            .unwrap();
        f.invoker.channel().dispatch(result(1, 0));
    }

    assert_eq!(f.runtime.registrations.load(Ordering::SeqCst), 1);
}

/// Second arm while the first is pending keeps the first callback.
#[test]
fn test_second_request_does_not_replace_callback() {
    let f = fixture(7);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let a = seen.clone();
    let first = f
        .invoker
        .handle_start_request("com.app", "MainAbility", move |s| {
            a.lock().unwrap().push(("a", s))
        })
        .unwrap();
    let b = seen.clone();
    let second = f
        .invoker
        .handle_start_request("com.app", "OtherAbility", move |s| {
            b.lock().unwrap().push(("b", s))
        })
        .unwrap();

    assert!(first.callback_armed);
    assert!(!second.callback_armed);
    assert_eq!(f.privileged.calls.lock().unwrap().len(), 2);

    f.invoker.channel().dispatch(result(1, 3));
    assert_eq!(*seen.lock().unwrap(), vec![("a", AsyncStatus::Failure)]);
}

/// Shell identity goes through the public entry point.
#[test]
fn test_shell_caller_uses_public_launcher() {
    let f = fixture(2);
    f.invoker
        .handle_start_request("com.app", "MainAbility", |_| {})
        .unwrap();

    assert!(f.privileged.calls.lock().unwrap().is_empty());
    assert_eq!(f.public.calls.lock().unwrap().len(), 1);
}

/// Any other identity is refused without touching a launcher.
#[test]
fn test_unauthorized_caller() {
    let f = fixture(1000);
    let err = f
        .invoker
        .handle_start_request("com.app", "MainAbility", |_| {})
        .unwrap_err();

    assert!(matches!(err, DmsError::UnauthorizedCaller(1000)));
    assert!(f.privileged.calls.lock().unwrap().is_empty());
    assert!(f.public.calls.lock().unwrap().is_empty());
    assert!(!f.invoker.channel().is_armed());
}

/// Empty names on the inbound side are invalid and register nothing.
#[test]
fn test_inbound_rejects_empty_names() {
    let f = fixture(7);
    let err = f
        .invoker
        .handle_start_request("", "MainAbility", |_| {})
        .unwrap_err();
    assert!(matches!(err, DmsError::InvalidParameter(_)));
    assert_eq!(f.runtime.registrations.load(Ordering::SeqCst), 0);
}

/// Missing ability manager is a resolution failure.
#[test]
fn test_unresolvable_ability_manager() {
    let runtime = Arc::new(TestRuntime::default());
    let invoker = AbilityInvoker::builder()
        .channel(Arc::new(InvocationChannel::new(runtime)))
        .transport(Arc::new(CapturingTransport::default()))
        .service_registry(Arc::new(TestRegistry(None)))
        .public_launcher(Arc::new(TestLauncher::default()))
        .identity(Arc::new(FixedIdentity(7)))
        .build()
        .unwrap();

    let err = invoker
        .handle_start_request("com.app", "MainAbility", |_| {})
        .unwrap_err();
    assert!(matches!(err, DmsError::Resolution(_)));
}

/// A packet produced on one side is accepted by the other side.
#[test]
fn test_packet_from_one_peer_launches_on_another() {
    let sender = fixture(7);
    let receiver = fixture(7);

    sender
        .invoker
        .request_remote_start(&target_want("com.app", "MainAbility"))
        .unwrap();
    let packet = sender.transport.sent.lock().unwrap()[0].clone();

    receiver.invoker.handle_remote_packet(&packet, |_| {}).unwrap();

    let calls = receiver.privileged.calls.lock().unwrap();
    let element = calls[0].element.as_ref().unwrap();
    assert_eq!(element.bundle_name, "com.app");
    assert_eq!(element.ability_name, "MainAbility");
}

/// Promise-style arming receives the dispatched status.
#[tokio::test]
async fn test_oneshot_completion() {
    let f = fixture(7);
    let channel = f.invoker.channel().clone();
    channel.ensure_registered().unwrap();
    let done = channel.arm_oneshot().unwrap();

    f.invoker
        .handle_start_request("com.app", "MainAbility", |_| {})
        .unwrap();

    channel.dispatch(result(5, 0));
    assert_eq!(done.await.unwrap(), AsyncStatus::Success);
}

/// Packets sent through a session arrive framed and decodable.
#[tokio::test]
async fn test_session_delivery() {
    let (client, mut server) = duplex(4096);
    let (session, _task) = spawn_session_writer(client, &DmsConfig::default());

    let runtime = Arc::new(TestRuntime::default());
    let invoker = AbilityInvoker::builder()
        .channel(Arc::new(InvocationChannel::new(runtime)))
        .transport(Arc::new(session))
        .service_registry(Arc::new(TestRegistry(None)))
        .public_launcher(Arc::new(TestLauncher::default()))
        .identity(Arc::new(FixedIdentity(7)))
        .build()
        .unwrap();

    invoker
        .request_remote_start(&target_want("com.app", "MainAbility"))
        .unwrap();
    invoker
        .request_remote_start(&target_want("com.other", "Second"))
        .unwrap();

    let mut assembler = PacketAssembler::new(1024);
    let mut packets = Vec::new();
    let mut buf = [0u8; 256];
    while packets.len() < 2 {
        let n = tokio::time::timeout(Duration::from_secs(1), server.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0);
        packets.extend(assembler.push(&buf[..n]).unwrap());
    }

    let first = StartAbilityCommand::decode(&packets[0]).unwrap();
    let second = StartAbilityCommand::decode(&packets[1]).unwrap();
    assert_eq!(first.bundle_name, "com.app");
    assert_eq!(second.ability_name, "Second");
}

/// A request served by a peer loop comes back as a relayed outcome.
#[tokio::test]
async fn test_peer_relays_launch_outcome() {
    let config = DmsConfig::default();
    let (requests_out, requests_in) = duplex(4096);
    let (replies_out, mut replies_in) = duplex(4096);

    let (requester_session, _requester_writer) = spawn_session_writer(requests_out, &config);
    let requester = AbilityInvoker::builder()
        .channel(Arc::new(InvocationChannel::new(Arc::new(TestRuntime::default()))))
        .transport(Arc::new(requester_session))
        .bundle_info(Arc::new(TestBundles))
        .service_registry(Arc::new(TestRegistry(None)))
        .public_launcher(Arc::new(TestLauncher::default()))
        .identity(Arc::new(FixedIdentity(7)))
        .build()
        .unwrap();

    let served = fixture(7);
    let served_channel = served.invoker.channel().clone();
    let (reply, _writer) = spawn_session_writer(replies_out, &config);
    let serving = tokio::spawn(serve_session(
        requests_in,
        Arc::new(served.invoker),
        Arc::new(reply),
    ));

    requester
        .request_remote_start(&target_want("com.app", "MainAbility"))
        .unwrap();
    drop(requester);
    serving.await.unwrap().unwrap();
    assert_eq!(served.privileged.calls.lock().unwrap().len(), 1);

    assert_eq!(
        served_channel.dispatch(result(1, 0)),
        DispatchOutcome::Delivered(AsyncStatus::Success)
    );

    let mut assembler = PacketAssembler::new(1024);
    let mut buf = [0u8; 256];
    let packet = loop {
        let n = tokio::time::timeout(Duration::from_secs(1), replies_in.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0);
        if let Some(packet) = assembler.push(&buf[..n]).unwrap().into_iter().next() {
            break packet;
        }
    };
    let outcome = StartAbilityResult::decode(&packet).unwrap();
    assert_eq!(outcome.bundle_name, "com.app");
    assert_eq!(outcome.status, AsyncStatus::Success);
}
