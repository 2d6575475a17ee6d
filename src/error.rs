//! Error types for dmslite.

use thiserror::Error;

/// Main error type for all invocation operations.
///
/// Every variant is reported synchronously to the immediate caller.
/// Nothing is retried inside the crate.
#[derive(Debug, Error)]
pub enum DmsError {
    /// A required field was missing or empty.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A packet field could not be written. The packet was aborted.
    #[error("Marshalling failed: {0}")]
    Marshalling(String),

    /// The completion channel could not be registered with the IPC runtime.
    #[error("Completion channel registration failed (code {0})")]
    Registration(i32),

    /// The ability-launch service could not be resolved.
    #[error("Service resolution failed: {0}")]
    Resolution(String),

    /// The ability-launch service rejected the launch call.
    #[error("Ability launch dispatch failed (code {0})")]
    Dispatch(i32),

    /// The calling identity is neither privileged nor the shell identity.
    #[error("Unauthorized caller uid {0}")]
    UnauthorizedCaller(u32),

    /// The transport refused to enqueue a sealed packet.
    #[error("Transport rejected packet: {0}")]
    TransportRejected(String),

    /// An inbound packet or envelope could not be decoded.
    #[error("Malformed input: {0}")]
    Malformed(String),

    /// Invalid or incomplete configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error on a session stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The session closed while a packet was being enqueued.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl DmsError {
    /// Numeric status code for callers that speak integer codes.
    pub fn code(&self) -> i32 {
        match self {
            DmsError::InvalidParameter(_) => codes::INVALID_PARAMETER,
            DmsError::Marshalling(_) => codes::MARSHALLING_FAILURE,
            DmsError::Registration(_) => codes::REGISTRATION_FAILURE,
            DmsError::Resolution(_) => codes::RESOLUTION_FAILURE,
            DmsError::Dispatch(_) => codes::DISPATCH_FAILURE,
            DmsError::UnauthorizedCaller(_) => codes::UNAUTHORIZED_CALLER,
            DmsError::TransportRejected(_) | DmsError::ConnectionClosed | DmsError::Io(_) => {
                codes::TRANSPORT_FAILURE
            }
            DmsError::Malformed(_) => codes::MALFORMED,
            DmsError::Config(_) | DmsError::Json(_) => codes::FAILURE,
        }
    }
}

/// Numeric status codes.
///
/// Positive values report success, negative values failure. Errors map
/// here through [`DmsError::code`], accepted launches through
/// [`StartAccepted::code`](crate::StartAccepted::code), and asynchronous
/// outcomes through [`AsyncStatus::code`](crate::AsyncStatus::code).
pub mod codes {
    /// Generic failure (configuration problems).
    pub const FAILURE: i32 = -1;
    /// Launch request accepted by the ability service.
    pub const START_ABILITY_SYNC_SUCCESS: i32 = 1;
    /// Ability started and shown.
    pub const START_ABILITY_ASYNC_SUCCESS: i32 = 2;
    /// Ability failed to start after the request was accepted.
    pub const START_ABILITY_ASYNC_FAILURE: i32 = -2;
    /// A required name or descriptor was missing or empty.
    pub const INVALID_PARAMETER: i32 = -3;
    /// A packet field could not be written.
    pub const MARSHALLING_FAILURE: i32 = -4;
    /// The completion channel could not be registered.
    pub const REGISTRATION_FAILURE: i32 = -5;
    /// The ability service could not be resolved from the registry.
    pub const RESOLUTION_FAILURE: i32 = -6;
    /// The ability service rejected the launch call.
    pub const DISPATCH_FAILURE: i32 = -7;
    /// The caller identity may not launch abilities.
    pub const UNAUTHORIZED_CALLER: i32 = -8;
    /// The session refused or lost the packet.
    pub const TRANSPORT_FAILURE: i32 = -9;
    /// An inbound packet or result could not be decoded.
    pub const MALFORMED: i32 = -10;
}

/// Result type alias using DmsError.
pub type Result<T> = std::result::Result<T, DmsError>;
