//! Configuration system for Muster.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MUSTER_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/muster/config.toml
//!   3. ~/.config/muster/config.toml
//!
//! The raw config is whatever the file says. [`MusterConfig::validate`] turns
//! it into typed [`Settings`] or fails before any socket is touched.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::peer::{Descriptor, DescriptorError};
use crate::wire::{DEFAULT_ADDRESS, DEFAULT_PERIOD_MS, DEFAULT_PORT, DEFAULT_TIMEOUT_MS, DEFAULT_TTL};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MusterConfig {
    pub network: NetworkConfig,
    pub presence: PresenceConfig,
    /// What this participant advertises. `id` is required.
    pub identity: Descriptor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// IPv4 multicast group, dotted quad.
    pub address: String,
    /// UDP port, 1-65535.
    pub port: u32,
    /// Multicast TTL. 0 = this host's segment only.
    pub ttl: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Heartbeat period in milliseconds.
    pub period_ms: u64,
    /// Silence after which an active peer becomes inactive, and an inactive
    /// one disconnects.
    pub timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            port: u32::from(DEFAULT_PORT),
            ttl: i64::from(DEFAULT_TTL),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            period_ms: DEFAULT_PERIOD_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

// ── Validated settings ────────────────────────────────────────────────────────

/// Where heartbeats are exchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub address: Ipv4Addr,
    pub port: u16,
    pub ttl: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub period: Duration,
    pub timeout: Duration,
}

/// A fully validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub endpoint: Endpoint,
    pub timing: Timing,
    pub identity: Descriptor,
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<Endpoint, ConfigError> {
        let address = parse_dotted_quad(&self.address)?;
        let port = u16::try_from(self.port)
            .ok()
            .filter(|p| *p >= 1)
            .ok_or(ConfigError::InvalidPort(self.port))?;
        let ttl = u32::try_from(self.ttl).map_err(|_| ConfigError::InvalidTtl(self.ttl))?;
        Ok(Endpoint { address, port, ttl })
    }
}

impl PresenceConfig {
    pub fn validate(&self) -> Result<Timing, ConfigError> {
        if self.period_ms < 1 {
            return Err(ConfigError::InvalidPeriod(self.period_ms));
        }
        if self.timeout_ms < 1 {
            return Err(ConfigError::InvalidTimeout(self.timeout_ms));
        }
        Ok(Timing {
            period: Duration::from_millis(self.period_ms),
            timeout: Duration::from_millis(self.timeout_ms),
        })
    }
}

/// Accepts `X.X.X.X` with each component a decimal in [0, 255].
/// Leading zeros are allowed.
fn parse_dotted_quad(address: &str) -> Result<Ipv4Addr, ConfigError> {
    let invalid = || ConfigError::InvalidAddress(address.to_string());

    let parts: Vec<&str> = address.split('.').collect();
    if parts.len() != 4 {
        return Err(invalid());
    }
    let mut octets = [0u8; 4];
    for (octet, part) in octets.iter_mut().zip(parts) {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        *octet = part.parse::<u8>().map_err(|_| invalid())?;
    }
    Ok(Ipv4Addr::from(octets))
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("muster")
}

fn home_dir() -> PathBuf {
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
    #[error("address {0:?} must be a dotted quad with components in [0, 255]")]
    InvalidAddress(String),
    #[error("port {0} must be in [1, 65535]")]
    InvalidPort(u32),
    #[error("ttl {0} must be >= 0")]
    InvalidTtl(i64),
    #[error("period of {0} ms must be at least 1 ms")]
    InvalidPeriod(u64),
    #[error("timeout of {0} ms must be at least 1 ms")]
    InvalidTimeout(u64),
    #[error("invalid identity: {0}")]
    Identity(#[from] DescriptorError),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MusterConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            MusterConfig::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MUSTER_CONFIG")
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
            let text = toml::to_string_pretty(&MusterConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Validate every section. Nothing is acquired here.
    pub fn validate(&self) -> Result<Settings, ConfigError> {
        let endpoint = self.network.validate()?;
        let timing = self.presence.validate()?;
        self.identity.validate()?;
        Ok(Settings {
            endpoint,
            timing,
            identity: self.identity.clone(),
        })
    }

    /// Apply MUSTER_* overrides. Numeric values that fail to parse are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("MUSTER_NETWORK__ADDRESS") {
            self.network.address = v;
        }
        if let Some(p) = lookup("MUSTER_NETWORK__PORT").and_then(|v| v.parse().ok()) {
            self.network.port = p;
        }
        if let Some(t) = lookup("MUSTER_NETWORK__TTL").and_then(|v| v.parse().ok()) {
            self.network.ttl = t;
        }
        if let Some(ms) = lookup("MUSTER_PRESENCE__PERIOD_MS").and_then(|v| v.parse().ok()) {
            self.presence.period_ms = ms;
        }
        if let Some(ms) = lookup("MUSTER_PRESENCE__TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.presence.timeout_ms = ms;
        }
        if let Some(v) = lookup("MUSTER_IDENTITY__ID") {
            self.identity.id = v;
        }
        if let Some(v) = lookup("MUSTER_IDENTITY__TYPE") {
            self.identity.kind = v;
        }
        if let Some(v) = lookup("MUSTER_IDENTITY__DESCRIPTION") {
            self.identity.description = v;
        }
    }
}
