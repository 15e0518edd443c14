//! Agent configuration.
//!
//! Settings come from the command line, optionally overlaid on a TOML
//! configuration file (default location `/etc/vnet/flowsyncd.conf`).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FlowsyncError, Result};

fn default_rundir() -> PathBuf {
    PathBuf::from("/var/run/openvswitch")
}

fn default_probe_interval_secs() -> u64 {
    5
}

fn default_max_backoff_secs() -> u64 {
    8
}

fn default_tick_interval_ms() -> u64 {
    250
}

/// Validated agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Name of the integration bridge to attach to.
    pub bridge: String,

    /// Runtime directory holding the switch's management sockets; the
    /// connection target is `unix:<rundir>/<bridge>.mgmt`.
    #[serde(default = "default_rundir")]
    pub rundir: PathBuf,

    /// Idle interval before the transport sends an echo probe, seconds.
    #[serde(default = "default_probe_interval_secs")]
    pub probe_interval_secs: u64,

    /// Cap on the transport's reconnect backoff, seconds.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,

    /// Main-loop tick interval, milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Port to serve Prometheus metrics on; disabled when absent.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl AgentConfig {
    /// Builds a configuration for `bridge` with defaults everywhere else.
    pub fn for_bridge(bridge: impl Into<String>) -> Self {
        Self {
            bridge: bridge.into(),
            rundir: default_rundir(),
            probe_interval_secs: default_probe_interval_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            tick_interval_ms: default_tick_interval_ms(),
            metrics_port: None,
        }
    }

    /// Loads a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            FlowsyncError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| FlowsyncError::config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates field values.
    pub fn validate(&self) -> Result<()> {
        if self.bridge.is_empty() {
            return Err(FlowsyncError::config("bridge name cannot be empty"));
        }
        if self.bridge.contains('/') {
            return Err(FlowsyncError::config(format!(
                "bridge name '{}' cannot contain '/'",
                self.bridge
            )));
        }
        if self.tick_interval_ms == 0 {
            return Err(FlowsyncError::config("tick_interval_ms must be non-zero"));
        }
        Ok(())
    }

    /// The idle interval before the transport probes the connection.
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    /// The reconnect backoff cap.
    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }

    /// The main-loop tick interval.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
