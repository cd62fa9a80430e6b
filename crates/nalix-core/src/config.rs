//! Configuration for the packet runtime.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $NALIX_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/nalix/config.toml
//!   3. ~/.config/nalix/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NalixConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
    pub policy: PolicyConfig,
    pub transform: TransformConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Path to the X25519 keypair used for the Noise handshake. Generated
    /// on first run if missing.
    pub keypair_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind the TCP listener. Empty = disabled.
    pub tcp_bind: String,
    /// Address to bind the UDP socket. Empty = disabled.
    pub udp_bind: String,
    /// Maximum packet length accepted on the wire, in bytes.
    pub max_packet_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Default rate-limit window, in milliseconds.
    pub rate_limit_window_ms: u64,
    /// Default request budget within one window.
    pub rate_limit_max_requests: u32,
    /// Lockout duration applied once a caller exceeds its budget, in
    /// milliseconds.
    pub rate_limit_lockout_ms: u64,
    /// Default handler timeout, in milliseconds, for handlers that don't
    /// declare their own.
    pub default_handler_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Payloads smaller than this are never compressed, regardless of the
    /// handler's declared preference — the framing overhead isn't worth it.
    pub compression_min_bytes: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NalixConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            network: NetworkConfig::default(),
            policy: PolicyConfig::default(),
            transform: TransformConfig::default(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            keypair_path: config_dir().join("keypair"),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tcp_bind: "0.0.0.0:7878".to_string(),
            udp_bind: String::new(),
            max_packet_len: crate::wire::MAX_PACKET_LEN,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            rate_limit_window_ms: 1_000,
            rate_limit_max_requests: 100,
            rate_limit_lockout_ms: 5_000,
            default_handler_timeout_ms: 2_000,
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            compression_min_bytes: 256,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("nalix")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl NalixConfig {
    /// Load config: file → defaults, then apply env var overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            NalixConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path: $NALIX_CONFIG, else the XDG config dir.
    pub fn file_path() -> PathBuf {
        std::env::var("NALIX_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&NalixConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply NALIX_* env var overrides on top of whatever was loaded.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("NALIX_NETWORK__TCP_BIND") {
            self.network.tcp_bind = v;
        }
        if let Ok(v) = std::env::var("NALIX_NETWORK__UDP_BIND") {
            self.network.udp_bind = v;
        }
        if let Ok(v) = std::env::var("NALIX_POLICY__RATE_LIMIT_MAX_REQUESTS") {
            if let Ok(n) = v.parse() {
                self.policy.rate_limit_max_requests = n;
            }
        }
        if let Ok(v) = std::env::var("NALIX_POLICY__RATE_LIMIT_WINDOW_MS") {
            if let Ok(n) = v.parse() {
                self.policy.rate_limit_window_ms = n;
            }
        }
        if let Ok(v) = std::env::var("NALIX_POLICY__DEFAULT_HANDLER_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.policy.default_handler_timeout_ms = n;
            }
        }
    }
}
