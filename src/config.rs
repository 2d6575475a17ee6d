//! Runtime configuration.
//!
//! All fields have defaults, so an empty JSON object is a valid config.
//!
//! ```
//! use dmslite::config::DmsConfig;
//!
//! let config = DmsConfig::from_json_str(r#"{ "max_packet_size": 512 }"#).unwrap();
//! assert_eq!(config.max_packet_size, 512);
//! assert_eq!(config.privileged_uid, dmslite::config::DEFAULT_PRIVILEGED_UID);
//! ```

use serde::Deserialize;

use crate::error::{DmsError, Result};

/// Default ceiling for one outbound packet.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 1024;

/// Uid of the foundation process that hosts the ability service in-process.
pub const DEFAULT_PRIVILEGED_UID: u32 = 7;

/// Uid of the shell, used by conformance test suites.
pub const DEFAULT_SHELL_UID: u32 = 2;

/// Default number of sealed packets a session queue holds.
pub const DEFAULT_SESSION_QUEUE_CAPACITY: usize = 64;

/// Smallest packet ceiling that still fits a command id.
const MIN_PACKET_SIZE: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DmsConfig {
    /// Maximum bytes a single packet may grow to.
    pub max_packet_size: usize,
    /// Identity allowed to call the ability manager directly.
    pub privileged_uid: u32,
    /// Identity allowed to use the public launch entry point.
    pub shell_uid: u32,
    /// Capacity of the outbound session queue.
    pub session_queue_capacity: usize,
}

impl Default for DmsConfig {
    fn default() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            privileged_uid: DEFAULT_PRIVILEGED_UID,
            shell_uid: DEFAULT_SHELL_UID,
            session_queue_capacity: DEFAULT_SESSION_QUEUE_CAPACITY,
        }
    }
}

impl DmsConfig {
    /// Parse a config from JSON and validate it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: DmsConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that limits are usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_packet_size < MIN_PACKET_SIZE {
            return Err(DmsError::Config(format!(
                "max_packet_size {} is below minimum {}",
                self.max_packet_size, MIN_PACKET_SIZE
            )));
        }
        if self.session_queue_capacity == 0 {
            return Err(DmsError::Config(
                "session_queue_capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
