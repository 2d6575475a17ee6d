//! Completion channel for asynchronous launch results.
//!
//! The channel owns two pieces of process-wide state:
//! - the registration with the IPC runtime, created lazily and kept for the
//!   life of the channel
//! - a single slot holding the armed completion callback
//!
//! ```text
//! Unregistered ──register──► Idle ──arm──► Armed ──dispatch──► Idle
//! ```
//!
//! Arming is first-wins: while a callback is armed, further arms are
//! refused and the earlier callback stays in place.
//!
//! # Example
//!
//! ```ignore
//! let channel = InvocationChannel::new(runtime);
//! channel.ensure_registered()?;
//! let done = channel.arm_oneshot().expect("slot was idle");
//! // ... ability manager reports back through the runtime ...
//! channel.dispatch(inbound);
//! assert_eq!(done.await?, AsyncStatus::Success);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::{codes, DmsError, Result};
use crate::protocol::{ResultEnvelope, LAUNCH_SUCCESS};

/// Callback invoked once with the asynchronous launch outcome.
pub type CompletionCallback = Box<dyn FnOnce(AsyncStatus) + Send + 'static>;

/// Handle identifying this process's completion endpoint to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationToken(pub u64);

/// Identifier of a runtime-owned response buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(pub u64);

/// A result notification delivered by the IPC runtime.
#[derive(Debug, Clone)]
pub struct InboundResult {
    /// Buffer to hand back to the runtime once read.
    pub id: MessageId,
    /// Encoded [`ResultEnvelope`].
    pub payload: Bytes,
}

impl InboundResult {
    /// Wrap a runtime buffer and its id.
    pub fn new(id: MessageId, payload: Bytes) -> Self {
        Self { id, payload }
    }
}

/// The IPC runtime that delivers launch results into this process.
pub trait IpcRuntime: Send + Sync {
    /// Register the completion endpoint. `Err` carries the runtime's code.
    fn register_completion(&self) -> std::result::Result<RegistrationToken, i32>;

    /// Return a response buffer to the runtime.
    fn free_buffer(&self, id: MessageId);
}

/// Two-valued asynchronous outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncStatus {
    Success,
    Failure,
}

impl AsyncStatus {
    /// Map the ability service's status: only success maps to `Success`.
    pub fn from_launch_status(status: i32) -> Self {
        if status == LAUNCH_SUCCESS {
            AsyncStatus::Success
        } else {
            AsyncStatus::Failure
        }
    }

    /// Numeric form, as carried in result packets.
    pub fn code(self) -> i32 {
        match self {
            AsyncStatus::Success => codes::START_ABILITY_ASYNC_SUCCESS,
            AsyncStatus::Failure => codes::START_ABILITY_ASYNC_FAILURE,
        }
    }

    /// Inverse of [`AsyncStatus::code`]. `None` for any other value.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            codes::START_ABILITY_ASYNC_SUCCESS => Some(AsyncStatus::Success),
            codes::START_ABILITY_ASYNC_FAILURE => Some(AsyncStatus::Failure),
            _ => None,
        }
    }
}

/// Proof that a particular arm call filled the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmTicket(u64);

/// Result of an arm attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmOutcome {
    Armed(ArmTicket),
    /// Another callback already holds the slot; the new one was dropped.
    AlreadyArmed,
}

impl ArmOutcome {
    #[inline]
    pub fn is_armed(&self) -> bool {
        matches!(self, ArmOutcome::Armed(_))
    }
}

/// Result of dispatching one inbound notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The armed callback ran with this status.
    Delivered(AsyncStatus),
    /// No callback was armed.
    Dropped,
}

/// Observable channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Unregistered,
    Idle,
    Armed,
}

struct ArmedCallback {
    ticket: u64,
    callback: CompletionCallback,
}

#[derive(Default)]
struct Slot {
    registration: Option<RegistrationToken>,
    armed: Option<ArmedCallback>,
    next_ticket: u64,
}

/// Frees a runtime buffer when dropped.
struct BufferRelease<'a> {
    runtime: &'a dyn IpcRuntime,
    id: MessageId,
}

impl Drop for BufferRelease<'_> {
    fn drop(&mut self) {
        self.runtime.free_buffer(self.id);
    }
}

/// Registration plus single completion slot, shared by every invocation
/// in the process.
pub struct InvocationChannel {
    runtime: Arc<dyn IpcRuntime>,
    slot: Mutex<Slot>,
}

impl InvocationChannel {
    /// Create an unregistered channel. Nothing talks to `runtime` until
    /// the first [`ensure_registered`](Self::ensure_registered).
    pub fn new(runtime: Arc<dyn IpcRuntime>) -> Self {
        Self {
            runtime,
            slot: Mutex::new(Slot::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        let slot = self.lock();
        match (&slot.registration, &slot.armed) {
            (None, _) => ChannelState::Unregistered,
            (Some(_), None) => ChannelState::Idle,
            (Some(_), Some(_)) => ChannelState::Armed,
        }
    }

    /// The registration token, once registered.
    pub fn registration(&self) -> Option<RegistrationToken> {
        self.lock().registration
    }

    pub fn is_armed(&self) -> bool {
        self.lock().armed.is_some()
    }

    /// Register with the runtime unless already registered.
    ///
    /// The slot lock is held across the runtime call so two callers can
    /// never both register.
    pub fn ensure_registered(&self) -> Result<RegistrationToken> {
        let mut slot = self.lock();
        if let Some(token) = slot.registration {
            return Ok(token);
        }

        match self.runtime.register_completion() {
            Ok(token) => {
                tracing::debug!("completion channel registered: {:?}", token);
                slot.registration = Some(token);
                Ok(token)
            }
            Err(code) => {
                tracing::error!("completion channel registration failed: {}", code);
                Err(DmsError::Registration(code))
            }
        }
    }

    /// Arm `callback` if the slot is idle.
    pub fn arm<F>(&self, callback: F) -> ArmOutcome
    where
        F: FnOnce(AsyncStatus) + Send + 'static,
    {
        let mut slot = self.lock();
        if slot.armed.is_some() {
            tracing::warn!("completion callback already armed, keeping the earlier one");
            return ArmOutcome::AlreadyArmed;
        }

        slot.next_ticket += 1;
        let ticket = slot.next_ticket;
        slot.armed = Some(ArmedCallback {
            ticket,
            callback: Box::new(callback),
        });
        ArmOutcome::Armed(ArmTicket(ticket))
    }

    /// Arm a oneshot sender and return its receiving end.
    ///
    /// Returns `None` when another callback is already armed.
    pub fn arm_oneshot(&self) -> Option<oneshot::Receiver<AsyncStatus>> {
        let (tx, rx) = oneshot::channel();
        let outcome = self.arm(move |status| {
            let _ = tx.send(status);
        });
        outcome.is_armed().then_some(rx)
    }

    /// Remove the callback armed under `ticket`, if it is still there.
    ///
    /// Returns `true` when a callback was removed. The removed callback is
    /// dropped without being called.
    pub fn disarm(&self, ticket: ArmTicket) -> bool {
        let mut slot = self.lock();
        match &slot.armed {
            Some(armed) if armed.ticket == ticket.0 => {
                slot.armed = None;
                true
            }
            _ => false,
        }
    }

    /// Deliver a launch result to the armed callback.
    ///
    /// The runtime buffer is always released, including when the payload
    /// cannot be decoded (reported as `Failure`) or nothing is armed.
    pub fn dispatch(&self, result: InboundResult) -> DispatchOutcome {
        let release = BufferRelease {
            runtime: self.runtime.as_ref(),
            id: result.id,
        };

        let status = match ResultEnvelope::decode(&result.payload) {
            Ok(envelope) => AsyncStatus::from_launch_status(envelope.status),
            Err(e) => {
                tracing::warn!("undecodable launch result treated as failure: {}", e);
                AsyncStatus::Failure
            }
        };
        drop(release);

        // Take the callback before calling it so it may re-arm the slot.
        let armed = self.lock().armed.take();
        match armed {
            Some(armed) => {
                (armed.callback)(status);
                DispatchOutcome::Delivered(status)
            }
            None => {
                tracing::warn!("launch result {:?} dropped: no callback armed", status);
                DispatchOutcome::Dropped
            }
        }
    }
}
