//! Server configuration, parsed from a TOML file with environment overrides.
//!
//! Priority: environment variables > config file > defaults.

use anyhow::{Context, Result};
use lifeline_pol::{GuardianConfig, PolConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,

    /// The wallet this daemon keeps alive
    pub wallet: WalletSection,

    /// Check-in timing, escalation and retry policy
    #[serde(default)]
    pub pol: PolConfig,

    /// Liveness server API
    #[serde(default)]
    pub api: ApiSection,

    /// Guardians and the on-chain recovery path
    #[serde(default)]
    pub recovery: RecoverySection,
}

/// General server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Data directory (device key, proofs, status)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// How often to log heartbeat status in seconds (default: 1 hour)
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            status_interval_secs: default_status_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSection {
    pub wallet_id: String,

    /// Name shown to guardians
    #[serde(default = "default_display_name")]
    pub display_name: String,

    /// Passphrase protecting the device key. Prefer `LIFELINE_PASSPHRASE`.
    #[serde(default)]
    pub passphrase: String,

    /// Whether the owner's identity has been verified out of band
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSection {
    #[serde(default = "default_api_url")]
    pub base_url: String,

    /// Bearer token, if the server requires one
    #[serde(default)]
    pub auth_token: Option<String>,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySection {
    /// Bitcoin network: "bitcoin", "testnet", "signet", "regtest"
    #[serde(default = "default_network")]
    pub network: String,

    /// Owner's x-only key (hex), the Taproot internal key
    #[serde(default)]
    pub owner_key: Option<String>,

    /// Guardian signatures needed on the recovery path
    #[serde(default = "default_threshold")]
    pub threshold: usize,

    #[serde(default)]
    pub guardians: Vec<GuardianConfig>,
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            network: default_network(),
            owner_key: None,
            threshold: default_threshold(),
            guardians: Vec::new(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_status_interval() -> u64 {
    3600
}

fn default_display_name() -> String {
    "owner".to_string()
}

fn default_api_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_network() -> String {
    "bitcoin".to_string()
}

fn default_threshold() -> usize {
    2
}

// ============================================================================
// Loading & environment override
// ============================================================================

impl ServerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: ServerConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `LIFELINE_DATA_DIR`
    /// - `LIFELINE_LOG_LEVEL`
    /// - `LIFELINE_WALLET_ID`
    /// - `LIFELINE_PASSPHRASE`
    /// - `LIFELINE_API_URL`
    /// - `LIFELINE_API_TOKEN`
    /// - `LIFELINE_CHECK_INTERVAL`
    /// - `LIFELINE_GRACE_PERIOD`
    /// - `LIFELINE_NETWORK`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LIFELINE_DATA_DIR") {
            self.server.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("LIFELINE_LOG_LEVEL") {
            self.server.log_level = v;
        }
        if let Ok(v) = std::env::var("LIFELINE_WALLET_ID") {
            self.wallet.wallet_id = v;
        }
        if let Ok(v) = std::env::var("LIFELINE_PASSPHRASE") {
            self.wallet.passphrase = v;
        }
        if let Ok(v) = std::env::var("LIFELINE_API_URL") {
            self.api.base_url = v;
        }
        if let Ok(v) = std::env::var("LIFELINE_API_TOKEN") {
            self.api.auth_token = Some(v);
        }
        if let Ok(v) = std::env::var("LIFELINE_CHECK_INTERVAL") {
            if let Ok(secs) = v.parse::<u64>() {
                self.pol.check_in_interval_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("LIFELINE_GRACE_PERIOD") {
            if let Ok(secs) = v.parse::<u64>() {
                self.pol.grace_period_secs = secs;
            }
        }
        if let Ok(v) = std::env::var("LIFELINE_NETWORK") {
            self.recovery.network = v;
        }
    }

    /// Parse the network string to a `bitcoin::Network`.
    pub fn network(&self) -> bitcoin::Network {
        match self.recovery.network.as_str() {
            "testnet" | "testnet3" => bitcoin::Network::Testnet,
            "signet" => bitcoin::Network::Signet,
            "regtest" => bitcoin::Network::Regtest,
            _ => bitcoin::Network::Bitcoin,
        }
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.wallet.wallet_id.trim().is_empty(),
            "wallet.wallet_id must not be empty"
        );
        anyhow::ensure!(
            !self.wallet.passphrase.is_empty(),
            "wallet.passphrase must be set (or LIFELINE_PASSPHRASE)"
        );
        anyhow::ensure!(
            self.api.base_url.starts_with("http://") || self.api.base_url.starts_with("https://"),
            "api.base_url must be an http(s) URL"
        );
        anyhow::ensure!(
            self.server.status_interval_secs >= 60,
            "server.status_interval_secs must be >= 60"
        );

        self.pol
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid [pol] section: {}", e))?;
        self.pol
            .recovery_timelock()
            .map_err(|e| anyhow::anyhow!("[pol] deadlines do not fit a CSV timelock: {}", e))?;

        let guardians = self.recovery.guardians.len();
        if guardians > 0 {
            anyhow::ensure!(
                self.recovery.threshold >= 1 && self.recovery.threshold <= guardians,
                "recovery.threshold must be between 1 and {} (the number of guardians)",
                guardians
            );
        }
        if let Some(ref key) = self.recovery.owner_key {
            key.parse::<bitcoin::XOnlyPublicKey>()
                .context("recovery.owner_key is not a valid x-only public key")?;
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
