//! Pop-in CLI Configuration Management
//!
//! Configuration is layered with figment, lowest priority first:
//! - Default values
//! - A configuration file (`popin.toml`, or the file given with `--config`)
//! - Environment variables (`POPIN_*`, nested keys split on `__`)

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use popin_core::{NodeId, ProtocolConfig};

use crate::error::{CliError, Result};

/// Configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "popin.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "POPIN_";

// ----------------------------------------------------------------------------
// CLI Application Configuration
// ----------------------------------------------------------------------------

/// Complete configuration for the Pop-in CLI application
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Booth protocol configuration shared by every node
    pub protocol: ProtocolConfig,

    /// UDP loopback link configuration
    pub link: LinkConfig,

    /// Runtime behavior configuration
    pub runtime: RuntimeConfig,
}

/// UDP loopback link settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Address every node binds on
    pub host: String,
    /// Node `N` listens on `base_port + N`
    pub base_port: u16,
    /// Highest node id that receives broadcasts
    pub max_node_id: u8,
    /// RSSI stamped on every frame this node sends
    pub tx_rssi: i8,
    /// SNR stamped on every frame this node sends
    pub snr: i8,
}

/// Runtime behavior configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Scheduler tick period in milliseconds
    pub tick_interval_ms: u64,
    /// Read console intents from stdin
    pub console: bool,
}

// ----------------------------------------------------------------------------
// Default Implementations
// ----------------------------------------------------------------------------

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            base_port: 47_000,
            max_node_id: 16,
            tx_rssi: -60,
            snr: 8,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10,
            console: true,
        }
    }
}

// ----------------------------------------------------------------------------
// Configuration Loading Logic
// ----------------------------------------------------------------------------

impl AppConfig {
    /// Load defaults, then `popin.toml` if present, then `POPIN_*` variables
    pub fn load() -> Result<Self> {
        Self::extract(
            Figment::new()
                .merge(Serialized::defaults(Self::default()))
                .merge(Toml::file(DEFAULT_CONFIG_FILE))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Load defaults, then `path`, then `POPIN_*` variables
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CliError::Config(format!(
                "Configuration file {} does not exist",
                path.display()
            )));
        }

        Self::extract(
            Figment::new()
                .merge(Serialized::defaults(Self::default()))
                .merge(Toml::file(path))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Parse a configuration from TOML text layered over the defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Self::extract(
            Figment::new()
                .merge(Serialized::defaults(Self::default()))
                .merge(Toml::string(content)),
        )
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: AppConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a specific file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate the configuration for consistency and correctness
    pub fn validate(&self) -> Result<()> {
        self.protocol.validate()?;

        if self.runtime.tick_interval_ms == 0 {
            return Err(CliError::Config(
                "Tick interval must be greater than 0".to_string(),
            ));
        }
        if self.link.max_node_id == 0 || NodeId::new(self.link.max_node_id).is_broadcast() {
            return Err(CliError::Config(format!(
                "max_node_id {} is outside 1..=254",
                self.link.max_node_id
            )));
        }
        if self.link.max_node_id < self.protocol.admin_id_end {
            return Err(CliError::Config(format!(
                "max_node_id {} leaves admin {} unreachable",
                self.link.max_node_id, self.protocol.admin_id_end
            )));
        }
        if u32::from(self.link.base_port) + u32::from(self.link.max_node_id) > u32::from(u16::MAX) {
            return Err(CliError::Config(format!(
                "base_port {} overflows for node {}",
                self.link.base_port, self.link.max_node_id
            )));
        }
        Ok(())
    }

    /// Check that `id` can run on the configured link
    pub fn validate_node_id(&self, id: u8) -> Result<NodeId> {
        if id == 0 || id > self.link.max_node_id {
            return Err(CliError::Config(format!(
                "Node id {} is outside 1..={}",
                id, self.link.max_node_id
            )));
        }
        Ok(NodeId::new(id))
    }

    /// Create example configuration file content
    pub fn example_config() -> String {
        let example = AppConfig::default();
        match example.to_toml() {
            Ok(content) => format!(
                "# Pop-in node configuration\n# Environment overrides use POPIN_<SECTION>__<KEY>, e.g. POPIN_LINK__TX_RSSI=-40\n\n{}",
                content
            ),
            Err(_) => "# Failed to generate example config".to_string(),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
