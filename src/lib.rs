//! # dmslite
//!
//! Remote ability invocation for a lightweight distributed scheduler.
//!
//! One device asks another (or a privileged local process) to launch a
//! named ability. This crate is the protocol layer between the caller and
//! the transport:
//!
//! - **Outbound**: build a big-endian START_ABILITY packet and hand it to
//!   the session transport
//! - **Inbound**: launch the ability locally and deliver the asynchronous
//!   outcome to a single armed completion callback
//! - **Peer loop**: [`serve_session`] launches requests read from a session
//!   and relays each outcome back to the requester
//!
//! A runnable end-to-end setup over in-memory sessions lives in
//! `demos/remote_start.rs` (`cargo run --example remote_start`).
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dmslite::{AbilityInvoker, DmsConfig, ElementName, InvocationChannel, Want};
//! use dmslite::transport::spawn_session_writer;
//!
//! let config = DmsConfig::from_json_str(&config_json)?;
//! let channel = Arc::new(InvocationChannel::new(ipc_runtime));
//! let (session, _writer) = spawn_session_writer(stream, &config);
//!
//! let invoker = AbilityInvoker::builder()
//!     .config(config)
//!     .channel(channel.clone())
//!     .transport(Arc::new(session))
//!     .service_registry(registry)
//!     .public_launcher(ability_client)
//!     .identity(identity)
//!     .build()?;
//!
//! let want = Want::new(ElementName::new("", "com.app", "MainAbility"))
//!     .with_caller_bundle("com.caller");
//! invoker.request_remote_start(&want)?;
//! ```

pub mod ability;
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;

mod invoker;
mod peer;

pub use ability::{ElementName, Want};
pub use channel::{AsyncStatus, InvocationChannel};
pub use config::DmsConfig;
pub use error::DmsError;
pub use invoker::{AbilityInvoker, AbilityInvokerBuilder, CallerRole, StartAccepted};
pub use peer::serve_session;
