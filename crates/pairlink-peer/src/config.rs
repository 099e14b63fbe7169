//! Peer configuration management
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/pairlink/config.toml, or an explicit path)
//! 3. Environment variables (PAIRLINK__*)
//!
//! Command line arguments are applied on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use pairlink_common::{
    error::{LinkError, Result},
    protocol::{handshake::validate_secret, DEFAULT_HANDSHAKE_TIMEOUT_MS, MAX_PAYLOAD_SIZE},
};

/// Settings shared by every peer built from this configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerConfig {
    /// Shared secret sent in both hellos (empty when unset)
    #[serde(default)]
    pub secret: Option<String>,

    /// Time allowed for each handshake step, in milliseconds
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,

    /// Close a connected peer after this many seconds without a frame
    /// (unset = wait forever)
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,

    /// Largest payload accepted or sent, never above the protocol ceiling
    #[serde(default = "default_max_payload_size")]
    pub max_payload_size: u32,
}

fn default_handshake_timeout() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_MS
}

fn default_max_payload_size() -> u32 {
    MAX_PAYLOAD_SIZE
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            secret: None,
            handshake_timeout_ms: default_handshake_timeout(),
            idle_timeout_secs: None,
            max_payload_size: default_max_payload_size(),
        }
    }
}

impl PeerConfig {
    /// Load configuration from an optional file and the environment
    ///
    /// With no explicit path the default location is used if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("handshake_timeout_ms", default_handshake_timeout() as i64)?
            .set_default("max_payload_size", i64::from(default_max_payload_size()))?;

        match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(default_path) = Self::config_path().filter(|p| p.exists()) {
                    builder = builder.add_source(config::File::from(default_path).required(false));
                }
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("PAIRLINK")
                .separator("__")
                .try_parsing(true),
        );

        let config: PeerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    /// Default configuration file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pairlink").join("config.toml"))
    }

    /// Reject settings a peer cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.handshake_timeout_ms == 0 {
            return Err(LinkError::ConfigError(
                "handshake_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.idle_timeout_secs == Some(0) {
            return Err(LinkError::ConfigError(
                "idle_timeout_secs must be greater than zero when set".to_string(),
            ));
        }
        if self.max_payload_size == 0 || self.max_payload_size > MAX_PAYLOAD_SIZE {
            return Err(LinkError::ConfigError(format!(
                "max_payload_size must be in 1..={}",
                MAX_PAYLOAD_SIZE
            )));
        }
        if let Some(ref secret) = self.secret {
            validate_secret(secret)?;
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}
