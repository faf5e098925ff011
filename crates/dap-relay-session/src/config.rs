//! Registry configuration.

use std::{collections::HashMap, time::Duration};

use dap_relay_core::DEFAULT_EVENT_LOG_CAPACITY;
use dap_relay_process::AdapterCommand;
use serde::{Deserialize, Serialize};

/// Tunables for a [`SessionRegistry`](crate::SessionRegistry).
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use dap_relay_session::RegistryConfig;
///
/// let config = RegistryConfig::from_json_str(r#"{"event_log_capacity": 50}"#).unwrap();
/// assert_eq!(config.event_log_capacity, 50);
/// assert!(config.terminate_debuggee);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Buffered events per session before the oldest are dropped.
    pub event_log_capacity: usize,
    /// Upper bound on the disconnect write performed by `stop`.
    pub disconnect_timeout_ms: u64,
    /// How long to wait for an exit status once the adapter goes away.
    pub exit_grace_ms: u64,
    /// `terminateDebuggee` argument of the disconnect request.
    pub terminate_debuggee: bool,
    /// Adapter types added to (or replacing entries of) the built-in catalog.
    pub adapters: HashMap<String, AdapterCommand>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            event_log_capacity: DEFAULT_EVENT_LOG_CAPACITY,
            disconnect_timeout_ms: 500,
            exit_grace_ms: 2_000,
            terminate_debuggee: true,
            adapters: HashMap::new(),
        }
    }
}

impl RegistryConfig {
    /// Parse a JSON configuration document.
    ///
    /// # Errors
    /// Returns error if the document is not valid JSON of the expected shape.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Register an adapter type.
    #[must_use]
    pub fn with_adapter(mut self, adapter_type: impl Into<String>, command: AdapterCommand) -> Self {
        self.adapters.insert(adapter_type.into(), command);
        self
    }

    #[must_use]
    pub const fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout_ms)
    }

    #[must_use]
    pub const fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }
}
