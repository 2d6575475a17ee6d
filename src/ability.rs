//! Ability descriptors and the services this layer talks to.
//!
//! Only the interfaces live here. The ability manager, the service
//! registry, bundle lookup, and process identity are provided by the host.

use std::sync::Arc;

use crate::channel::RegistrationToken;

/// Identifies an ability on a device.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementName {
    /// Empty for the local device.
    pub device_id: String,
    /// Bundle that hosts the ability.
    pub bundle_name: String,
    /// Ability inside the bundle.
    pub ability_name: String,
}

impl ElementName {
    /// Create an element name. Pass an empty `device_id` for this device.
    pub fn new(
        device_id: impl Into<String>,
        bundle_name: impl Into<String>,
        ability_name: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            bundle_name: bundle_name.into(),
            ability_name: ability_name.into(),
        }
    }
}

/// A launch request.
///
/// Outbound calls fill `element` and `caller_bundle`; the inbound
/// direction fills `element` and `reply_to` so the ability manager knows
/// where to deliver the launch result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Want {
    /// Ability to launch. Required in both directions.
    pub element: Option<ElementName>,
    /// Bundle name of the local caller, used to look up its signature.
    pub caller_bundle: Option<String>,
    /// Completion channel that receives the result envelope.
    pub reply_to: Option<RegistrationToken>,
}

impl Want {
    /// A want targeting `element`, with no caller or reply channel yet.
    pub fn new(element: ElementName) -> Self {
        Self {
            element: Some(element),
            ..Self::default()
        }
    }

    /// Set the calling bundle (outbound direction).
    pub fn with_caller_bundle(mut self, bundle_name: impl Into<String>) -> Self {
        self.caller_bundle = Some(bundle_name.into());
        self
    }

    /// Set where the launch result goes (inbound direction).
    pub fn with_reply_to(mut self, token: RegistrationToken) -> Self {
        self.reply_to = Some(token);
        self
    }
}

/// Launches abilities.
///
/// Implemented both by the in-process ability manager (privileged path)
/// and by the public client entry point (shell path). `Err` carries the
/// service's status code.
pub trait AbilityManager: Send + Sync {
    /// Start the ability named in `want`. `Ok` means the launch was
    /// accepted; the outcome arrives later on `want.reply_to`.
    fn start_ability(&self, want: &Want) -> std::result::Result<(), i32>;
}

/// Resolves the in-process ability manager by its well-known identifier.
pub trait ServiceRegistry: Send + Sync {
    /// The in-process ability manager, or `None` if it is not registered.
    fn ability_manager(&self) -> Option<Arc<dyn AbilityManager>>;
}

/// Looks up installed bundle metadata.
pub trait BundleInfoProvider: Send + Sync {
    /// Signing identity (app id) of a bundle, if known.
    fn app_id(&self, bundle_name: &str) -> Option<String>;
}

/// Bundle lookup that never knows anything; callers fall back to an
/// empty signature.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBundleInfo;

impl BundleInfoProvider for NoBundleInfo {
    fn app_id(&self, _bundle_name: &str) -> Option<String> {
        None
    }
}

/// Reports the uid of the process calling into this layer.
pub trait CallerIdentity: Send + Sync {
    /// Uid of the current caller.
    fn caller_uid(&self) -> u32;
}

/// Identity fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedIdentity(pub u32);

impl CallerIdentity for FixedIdentity {
    fn caller_uid(&self) -> u32 {
        self.0
    }
}
