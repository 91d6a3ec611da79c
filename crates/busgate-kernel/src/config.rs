//! Supervisor timings and module declarations.

use std::time::Duration;

use busgate_middleware::ModuleConfig;
use busgate_types::ModuleKind;
use serde::{Deserialize, Serialize};

/// Timings shared by the router and every supervised loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Bounded wait on router and interface-module queues.
    pub poll_timeout_ms: u64,
    /// Longest a communication loop waits for new traffic when idle.
    pub idle_backoff_ms: u64,
    /// Pause after a failed transmit before the retry.
    pub retry_backoff_ms: u64,
    /// How long a module gets to exit after its poison pill.
    pub stop_grace_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 1_000,
            idle_backoff_ms: 25,
            retry_backoff_ms: 500,
            stop_grace_ms: 10_000,
        }
    }
}

impl SupervisorConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// One `[[modules]]` entry of the gateway config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Catalog name of the module to import.
    pub module: String,
    /// Instance id; defaults to the module name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Expected kind. Checked against the imported module when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ModuleKind>,
    #[serde(default, skip_serializing_if = "toml::Table::is_empty")]
    pub config: ModuleConfig,
}

impl ModuleSpec {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            id: None,
            kind: None,
            config: ModuleConfig::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_kind(mut self, kind: ModuleKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_config(mut self, config: ModuleConfig) -> Self {
        self.config = config;
        self
    }

    /// The instance id this module runs under.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.module)
    }
}
