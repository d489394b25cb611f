//! Flow configuration.
//!
//! Every field has a default, so a config file only needs the values it
//! changes:
//!
//! ```json
//! { "max_secret_attempts": 5, "transceive_timeout_ms": 1500 }
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tapsign_core::constants::{
    DEFAULT_EVENT_CHANNEL_CAPACITY, DEFAULT_MAX_DISCONNECT_RETRIES, DEFAULT_MAX_SECRET_ATTEMPTS,
    DEFAULT_TRANSCEIVE_TIMEOUT_MS,
};
use tapsign_core::{Error, RequestCode, Result};

/// Configuration for a [`TapFlow`](crate::flow::TapFlow).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Wrong secrets tolerated before the flow locks out.
    pub max_secret_attempts: u8,

    /// Link timeout applied when a tapped tag is connected.
    pub transceive_timeout_ms: u64,

    /// Lost sessions re-prompted before `Disconnected` is surfaced.
    pub max_disconnect_retries: u8,

    /// Request codes that never prompt for a secret.
    pub exempt_request_codes: Vec<RequestCode>,

    /// Capacity of the flow event channel.
    pub event_channel_capacity: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_secret_attempts: DEFAULT_MAX_SECRET_ATTEMPTS,
            transceive_timeout_ms: DEFAULT_TRANSCEIVE_TIMEOUT_MS,
            max_disconnect_retries: DEFAULT_MAX_DISCONNECT_RETRIES,
            exempt_request_codes: RequestCode::default_exempt(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl FlowConfig {
    /// Parse and validate a JSON config.
    ///
    /// # Errors
    /// Returns `Error::Config` for malformed JSON or invalid values.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns `Error::Config` if any limit is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_secret_attempts == 0 {
            return Err(Error::Config(
                "max_secret_attempts must be at least 1".to_string(),
            ));
        }
        if self.transceive_timeout_ms == 0 {
            return Err(Error::Config(
                "transceive_timeout_ms must be at least 1".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(Error::Config(
                "event_channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn transceive_timeout(&self) -> Duration {
        Duration::from_millis(self.transceive_timeout_ms)
    }
}
