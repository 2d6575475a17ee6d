//! Ability invoker: both directions of remote ability invocation.
//!
//! - Outbound: [`AbilityInvoker::request_remote_start`] turns a [`Want`] into
//!   a START_ABILITY packet and hands it to the transport. Fire-and-forget:
//!   `Ok` means the packet was enqueued.
//! - Inbound: [`AbilityInvoker::handle_start_request`] launches a local
//!   ability and arms a completion callback that the [`InvocationChannel`]
//!   fires when the ability manager reports back.
//!
//! # Example
//!
//! ```ignore
//! use dmslite::{AbilityInvoker, ElementName, Want};
//!
//! let invoker = AbilityInvoker::builder()
//!     .channel(channel)
//!     .transport(session)
//!     .service_registry(registry)
//!     .public_launcher(client)
//!     .identity(identity)
//!     .build()?;
//!
//! let want = Want::new(ElementName::new("", "com.app", "MainAbility"))
//!     .with_caller_bundle("com.caller");
//! invoker.request_remote_start(&want)?;
//!
//! invoker.handle_start_request("com.app", "MainAbility", |status| {
//!     println!("launch finished: {:?}", status);
//! })?;
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use crate::ability::{
    AbilityManager, BundleInfoProvider, CallerIdentity, ElementName, NoBundleInfo,
    ServiceRegistry, Want,
};
use crate::channel::{ArmOutcome, AsyncStatus, InvocationChannel, RegistrationToken};
use crate::config::DmsConfig;
use crate::error::{codes, DmsError, Result};
use crate::protocol::{
    peek_command, InvocationRequest, PacketBuilder, StartAbilityCommand, DMS_VERSION_VALUE,
    START_ABILITY,
};
use crate::transport::DmsTransport;

/// Which launch path a caller is allowed to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerRole {
    /// Same process as the ability manager; calls it directly.
    Privileged,
    /// Shell-launched test process; goes through the public entry point.
    Shell,
}

impl CallerRole {
    /// Classify a uid, or `None` if it may not launch abilities.
    pub fn classify(uid: u32, config: &DmsConfig) -> Option<Self> {
        if uid == config.privileged_uid {
            Some(CallerRole::Privileged)
        } else if uid == config.shell_uid {
            Some(CallerRole::Shell)
        } else {
            None
        }
    }
}

/// A launch request was accepted by the ability manager.
///
/// The ability may still fail to start; that arrives later through the
/// completion callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartAccepted {
    /// `false` when an earlier callback was still armed and this call's
    /// callback was dropped.
    pub callback_armed: bool,
}

impl StartAccepted {
    /// Numeric status for an accepted launch.
    pub fn code(&self) -> i32 {
        codes::START_ABILITY_SYNC_SUCCESS
    }
}

/// Builder for [`AbilityInvoker`].
pub struct AbilityInvokerBuilder {
    config: DmsConfig,
    channel: Option<Arc<InvocationChannel>>,
    transport: Option<Arc<dyn DmsTransport>>,
    bundles: Arc<dyn BundleInfoProvider>,
    registry: Option<Arc<dyn ServiceRegistry>>,
    public_launcher: Option<Arc<dyn AbilityManager>>,
    identity: Option<Arc<dyn CallerIdentity>>,
}

impl AbilityInvokerBuilder {
    pub fn new() -> Self {
        Self {
            config: DmsConfig::default(),
            channel: None,
            transport: None,
            bundles: Arc::new(NoBundleInfo),
            registry: None,
            public_launcher: None,
            identity: None,
        }
    }

    pub fn config(mut self, config: DmsConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum packet size.
    ///
    /// Default: 1024 bytes
    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.config.max_packet_size = size;
        self
    }

    /// The process's completion channel. Share one per process.
    pub fn channel(mut self, channel: Arc<InvocationChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn DmsTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Bundle lookup for caller signatures. Defaults to none (empty signature).
    pub fn bundle_info(mut self, bundles: Arc<dyn BundleInfoProvider>) -> Self {
        self.bundles = bundles;
        self
    }

    pub fn service_registry(mut self, registry: Arc<dyn ServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Public launch entry point used by the shell identity.
    pub fn public_launcher(mut self, launcher: Arc<dyn AbilityManager>) -> Self {
        self.public_launcher = Some(launcher);
        self
    }

    pub fn identity(mut self, identity: Arc<dyn CallerIdentity>) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn build(self) -> Result<AbilityInvoker> {
        self.config.validate()?;

        fn required<T>(value: Option<T>, name: &str) -> Result<T> {
            value.ok_or_else(|| DmsError::Config(format!("missing {}", name)))
        }

        Ok(AbilityInvoker {
            builder: Mutex::new(PacketBuilder::with_max_size(self.config.max_packet_size)),
            channel: required(self.channel, "channel")?,
            transport: required(self.transport, "transport")?,
            bundles: self.bundles,
            registry: required(self.registry, "service registry")?,
            public_launcher: required(self.public_launcher, "public launcher")?,
            identity: required(self.identity, "caller identity")?,
            config: self.config,
        })
    }
}

impl Default for AbilityInvokerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Remote ability invocation state machine.
pub struct AbilityInvoker {
    config: DmsConfig,
    channel: Arc<InvocationChannel>,
    /// The single packet buffer; one packet is built at a time.
    builder: Mutex<PacketBuilder>,
    transport: Arc<dyn DmsTransport>,
    bundles: Arc<dyn BundleInfoProvider>,
    registry: Arc<dyn ServiceRegistry>,
    public_launcher: Arc<dyn AbilityManager>,
    identity: Arc<dyn CallerIdentity>,
}

impl AbilityInvoker {
    pub fn builder() -> AbilityInvokerBuilder {
        AbilityInvokerBuilder::new()
    }

    #[inline]
    pub fn config(&self) -> &DmsConfig {
        &self.config
    }

    #[inline]
    pub fn channel(&self) -> &Arc<InvocationChannel> {
        &self.channel
    }

    /// Ask the remote peer to start the ability named in `want`.
    ///
    /// `want` must carry a target element with non-empty bundle and
    /// ability names, and the caller's bundle name. An unknown caller
    /// bundle is sent with an empty signature.
    pub fn request_remote_start(&self, want: &Want) -> Result<()> {
        let element = want
            .element
            .as_ref()
            .ok_or_else(|| DmsError::InvalidParameter("want has no target element".to_string()))?;
        let caller_bundle = want
            .caller_bundle
            .as_deref()
            .ok_or_else(|| DmsError::InvalidParameter("want has no caller bundle".to_string()))?;

        let mut request =
            InvocationRequest::new(&element.bundle_name, &element.ability_name, String::new());
        request.validate()?;

        match self.bundles.app_id(caller_bundle) {
            Some(app_id) => request.caller_signature = app_id,
            None => tracing::debug!("no app id for {}, sending empty signature", caller_bundle),
        }

        let packet = {
            let mut builder = self.builder.lock().unwrap_or_else(PoisonError::into_inner);
            request.build(&mut builder)?
        };

        tracing::debug!(
            "start remote ability {}/{}, packet len {}",
            request.bundle_name,
            request.ability_name,
            packet.len()
        );

        self.transport.send(packet).map_err(|e| {
            tracing::error!("transport rejected start ability packet: {}", e);
            e
        })
    }

    /// Launch a local ability on behalf of a peer or privileged caller.
    ///
    /// Registers the completion channel on first use and arms `on_complete`
    /// if no callback is armed yet. `Ok` means the ability manager accepted
    /// the launch; `on_complete` later receives the final outcome.
    ///
    /// If this call armed `on_complete` and then fails, the callback is
    /// disarmed again and never runs.
    pub fn handle_start_request<F>(
        &self,
        bundle_name: &str,
        ability_name: &str,
        on_complete: F,
    ) -> Result<StartAccepted>
    where
        F: FnOnce(AsyncStatus) + Send + 'static,
    {
        if bundle_name.is_empty() || ability_name.is_empty() {
            tracing::error!("invalid start request parameters");
            return Err(DmsError::InvalidParameter(
                "bundle and ability names are required".to_string(),
            ));
        }

        let token = self.channel.ensure_registered()?;

        let outcome = self.channel.arm(on_complete);
        let result = self.launch(bundle_name, ability_name, token);

        match (result, outcome) {
            (Ok(()), outcome) => Ok(StartAccepted {
                callback_armed: outcome.is_armed(),
            }),
            (Err(e), ArmOutcome::Armed(ticket)) => {
                self.channel.disarm(ticket);
                Err(e)
            }
            (Err(e), ArmOutcome::AlreadyArmed) => Err(e),
        }
    }

    /// Decode a START_ABILITY packet from a peer and launch it locally.
    pub fn handle_remote_packet<F>(&self, packet: &[u8], on_complete: F) -> Result<StartAccepted>
    where
        F: FnOnce(AsyncStatus) + Send + 'static,
    {
        let command = peek_command(packet)?;
        if command != START_ABILITY {
            tracing::warn!("unsupported command {}", command);
            return Err(DmsError::InvalidParameter(format!(
                "unsupported command {}",
                command
            )));
        }

        let start = StartAbilityCommand::decode(packet)?;
        self.handle_start_command(&start, on_complete)
    }

    /// Launch an already decoded START_ABILITY command.
    ///
    /// A version other than [`DMS_VERSION_VALUE`] is logged and accepted.
    pub fn handle_start_command<F>(
        &self,
        start: &StartAbilityCommand,
        on_complete: F,
    ) -> Result<StartAccepted>
    where
        F: FnOnce(AsyncStatus) + Send + 'static,
    {
        if start.version != DMS_VERSION_VALUE {
            tracing::warn!(
                "peer protocol version {} differs from {}",
                start.version,
                DMS_VERSION_VALUE
            );
        }

        self.handle_start_request(&start.bundle_name, &start.ability_name, on_complete)
    }

    fn launch(&self, bundle_name: &str, ability_name: &str, token: RegistrationToken) -> Result<()> {
        let want = Want::new(ElementName::new("", bundle_name, ability_name)).with_reply_to(token);

        let uid = self.identity.caller_uid();
        let status = match CallerRole::classify(uid, &self.config) {
            Some(CallerRole::Privileged) => {
                let manager = self.registry.ability_manager().ok_or_else(|| {
                    tracing::error!("ability manager not found in service registry");
                    DmsError::Resolution("ability manager unavailable".to_string())
                })?;
                manager.start_ability(&want)
            }
            Some(CallerRole::Shell) => self.public_launcher.start_ability(&want),
            None => {
                tracing::error!("caller uid {} may not start abilities", uid);
                return Err(DmsError::UnauthorizedCaller(uid));
            }
        };

        status.map_err(|code| {
            tracing::error!("start ability failed, code {}", code);
            DmsError::Dispatch(code)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{IpcRuntime, MessageId};
    use bytes::Bytes;

    struct NullRuntime;

    impl IpcRuntime for NullRuntime {
        fn register_completion(&self) -> std::result::Result<RegistrationToken, i32> {
            Ok(RegistrationToken(1))
        }
        fn free_buffer(&self, _id: MessageId) {}
    }

    struct NullTransport;

    impl DmsTransport for NullTransport {
        fn send(&self, _packet: Bytes) -> Result<()> {
            Ok(())
        }
    }

    struct NoManager;

    impl ServiceRegistry for NoManager {
        fn ability_manager(&self) -> Option<Arc<dyn AbilityManager>> {
            None
        }
    }

    struct Accept;

    impl AbilityManager for Accept {
        fn start_ability(&self, _want: &Want) -> std::result::Result<(), i32> {
            Ok(())
        }
    }

    struct Refuse(i32);

    impl AbilityManager for Refuse {
        fn start_ability(&self, _want: &Want) -> std::result::Result<(), i32> {
            Err(self.0)
        }
    }

    fn builder() -> AbilityInvokerBuilder {
        AbilityInvoker::builder()
            .channel(Arc::new(InvocationChannel::new(Arc::new(NullRuntime))))
            .transport(Arc::new(NullTransport))
            .service_registry(Arc::new(NoManager))
            .public_launcher(Arc::new(Refuse(-1)))
            .identity(Arc::new(crate::ability::FixedIdentity(7)))
    }

    #[test]
    fn test_classify() {
        let config = DmsConfig::default();
        assert_eq!(
            CallerRole::classify(config.privileged_uid, &config),
            Some(CallerRole::Privileged)
        );
        assert_eq!(
            CallerRole::classify(config.shell_uid, &config),
            Some(CallerRole::Shell)
        );
        assert_eq!(CallerRole::classify(1000, &config), None);
    }

    #[test]
    fn test_build_requires_collaborators() {
        let result = AbilityInvoker::builder().build();
        assert!(matches!(result, Err(DmsError::Config(_))));
        assert!(builder().build().is_ok());
    }

    #[test]
    fn test_build_rejects_bad_config() {
        let result = builder().max_packet_size(0).build();
        assert!(matches!(result, Err(DmsError::Config(_))));
    }

    #[test]
    fn test_resolution_failure_disarms() {
        let invoker = builder().build().unwrap();

        let err = invoker
            .handle_start_request("com.app", "MainAbility", |_| {})
            .unwrap_err();

        assert!(matches!(err, DmsError::Resolution(_)));
        assert!(!invoker.channel().is_armed());
    }

    #[test]
    fn test_shell_dispatch_failure_carries_code() {
        let invoker = builder()
            .identity(Arc::new(crate::ability::FixedIdentity(2)))
            .public_launcher(Arc::new(Refuse(-42)))
            .build()
            .unwrap();

        let err = invoker
            .handle_start_request("com.app", "MainAbility", |_| {})
            .unwrap_err();
        assert!(matches!(err, DmsError::Dispatch(-42)));
        assert!(!invoker.channel().is_armed());
    }

    #[test]
    fn test_remote_packet_rejects_unknown_command() {
        let invoker = builder().build().unwrap();
        let err = invoker.handle_remote_packet(&[0x00, 0x63], |_| {}).unwrap_err();
        assert!(matches!(err, DmsError::InvalidParameter(_)));
    }

    #[test]
    fn test_missing_caller_bundle() {
        let invoker = builder().build().unwrap();
        let want = Want::new(ElementName::new("", "com.app", "MainAbility"));
        assert!(matches!(
            invoker.request_remote_start(&want),
            Err(DmsError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_accepted_code() {
        let invoker = builder()
            .identity(Arc::new(crate::ability::FixedIdentity(2)))
            .public_launcher(Arc::new(Accept))
            .build()
            .unwrap();

        let accepted = invoker
            .handle_start_request("com.app", "MainAbility", |_| {})
            .unwrap();
        assert_eq!(accepted.code(), codes::START_ABILITY_SYNC_SUCCESS);
    }

    #[test]
    fn test_old_version_still_launches() {
        let invoker = builder()
            .identity(Arc::new(crate::ability::FixedIdentity(2)))
            .public_launcher(Arc::new(Accept))
            .build()
            .unwrap();
        let start = StartAbilityCommand {
            bundle_name: "com.app".to_string(),
            ability_name: "MainAbility".to_string(),
            caller_signature: String::new(),
            version: 100,
        };

        let accepted = invoker.handle_start_command(&start, |_| {}).unwrap();
        assert!(accepted.callback_armed);
    }
}
