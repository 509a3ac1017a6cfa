//! TOML configuration for netgauge.
//!
//! Layered like this: an explicit path, then the `NETGAUGE_CONFIG`
//! environment variable, then `/etc/netgauge/netgauge.toml`, then the
//! compiled-in defaults. Every field is optional.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::model::Protocol;
use crate::process::ToolCommand;

pub const CONFIG_ENV_VAR: &str = "NETGAUGE_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/netgauge/netgauge.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetgaugeConfig {
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub defaults: TestDefaults,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetgaugeConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded netgauge configuration");
        Ok(config)
    }

    /// Resolve the configuration. An explicitly requested file must load;
    /// the environment and system locations fall through on error.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "NETGAUGE_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// External executables the engine drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub iperf3: ToolCommand,
    pub ping: ToolCommand,
    pub traceroute: ToolCommand,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            iperf3: ToolCommand::new("iperf3"),
            ping: ToolCommand::new("ping"),
            traceroute: ToolCommand::new("traceroute"),
        }
    }
}

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

/// Per-process deadlines. A speed-test phase may run for its requested
/// duration plus `speed_grace_secs`; a ping run for
/// `count * ping_interval_secs + ping_grace_secs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub speed_grace_secs: u64,
    pub ping_interval_secs: u64,
    pub ping_grace_secs: u64,
    pub traceroute_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            speed_grace_secs: 30,
            ping_interval_secs: 1,
            ping_grace_secs: 10,
            traceroute_secs: 60,
        }
    }
}

impl TimeoutConfig {
    pub fn speed_deadline(&self, duration_secs: u32) -> Duration {
        Duration::from_secs(u64::from(duration_secs) + self.speed_grace_secs)
    }

    pub fn ping_deadline(&self, count: u32) -> Duration {
        Duration::from_secs(u64::from(count) * self.ping_interval_secs + self.ping_grace_secs)
    }

    pub fn traceroute_deadline(&self) -> Duration {
        Duration::from_secs(self.traceroute_secs)
    }
}

// ---------------------------------------------------------------------------
// Test defaults
// ---------------------------------------------------------------------------

/// Values used when a caller does not specify them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestDefaults {
    pub port: u16,
    pub duration_secs: u32,
    pub ping_count: u32,
    pub max_hops: u32,
    pub streams: u32,
    pub protocol: Protocol,
    /// Target bitrate for UDP runs, in iperf3 notation (`100M`).
    pub udp_bitrate: Option<String>,
}

impl Default for TestDefaults {
    fn default() -> Self {
        Self {
            port: 5201,
            duration_secs: 10,
            ping_count: 4,
            max_hops: 30,
            streams: 1,
            protocol: Protocol::Tcp,
            udp_bitrate: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
