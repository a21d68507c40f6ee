//! Configuration system for peerwire.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PEERWIRE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/peerwire/config.toml
//!   3. ~/.config/peerwire/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerwireConfig {
    pub network: NetworkConfig,
    pub altlocs: AltLocConfig,
    pub reply_cache: ReplyCacheConfig,
    pub push_proxy: PushProxyConfig,
    pub filter: FilterConfig,
    pub uploads: UploadConfig,
    pub security: SecurityConfig,
    pub hosts: HostConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the UDP socket binds to.
    pub bind_addr: String,
    /// UDP port for the packet-receive path. 0 = OS-assigned.
    pub udp_port: u16,
    /// Local HTTP API port (127.0.0.1 only).
    pub api_port: u16,
    /// Outbound connections default to the TLS handshake variant.
    pub prefer_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AltLocConfig {
    /// Max sources kept per content hash.
    pub max_locations: usize,
    /// Max explicitly-removed sources remembered per content hash.
    pub max_removed: usize,
    /// Sources not seen for this long are expired. 0 = never.
    pub max_age_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyCacheConfig {
    /// Handlers unused for this long are dropped by the sweeper.
    pub idle_expiry_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushProxyConfig {
    /// Proxy entries older than this are stale.
    pub ttl_secs: u64,
    /// Max proxies remembered per firewalled peer.
    pub max_per_peer: usize,
    /// How long to wait for a push proxy to accept a connection.
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// IP range file loaded by `reload_ip_filter`. Empty = none.
    pub ip_filter_path: PathBuf,
    /// Networks always rejected (CIDR, address, or wildcard).
    pub deny: Vec<String>,
    /// Networks always accepted, overriding `deny` and the range file.
    pub allow: Vec<String>,
    /// The user's own block list, applied by the reply cache's personal filter.
    pub personal_deny: Vec<String>,
    /// Upper bound on one range-file reload.
    pub reload_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Concurrent uploads allowed to one host.
    pub per_host: usize,
    /// Concurrent uploads allowed in total.
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// How often the query-key MAC secret rotates.
    pub key_rotation_secs: u64,
    /// How long keys from the previous secret stay valid.
    pub key_grace_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Max hosts kept in the connect-candidate pool.
    pub max_hosts: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            udp_port: 6346,
            api_port: 7346,
            prefer_tls: false,
        }
    }
}

impl Default for AltLocConfig {
    fn default() -> Self {
        Self {
            max_locations: 10,
            max_removed: 500,
            max_age_secs: 24 * 60 * 60,
        }
    }
}

impl Default for ReplyCacheConfig {
    fn default() -> Self {
        Self {
            idle_expiry_secs: 60,
            sweep_interval_secs: 30,
        }
    }
}

impl Default for PushProxyConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 30 * 60,
            max_per_peer: 4,
            connect_timeout_secs: 10,
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            ip_filter_path: config_dir().join("ip-filter.txt"),
            deny: Vec::new(),
            allow: Vec::new(),
            personal_deny: Vec::new(),
            reload_timeout_secs: 10,
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            per_host: 2,
            total: 8,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            key_rotation_secs: 60 * 60,
            key_grace_secs: 5 * 60,
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self { max_hosts: 400 }
    }
}

// ── Durations ─────────────────────────────────────────────────────────────────

impl AltLocConfig {
    pub fn max_age(&self) -> Option<Duration> {
        (self.max_age_secs > 0).then(|| Duration::from_secs(self.max_age_secs))
    }
}

impl ReplyCacheConfig {
    pub fn idle_expiry(&self) -> Duration {
        Duration::from_secs(self.idle_expiry_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl PushProxyConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl FilterConfig {
    pub fn reload_timeout(&self) -> Duration {
        Duration::from_secs(self.reload_timeout_secs.max(1))
    }
}

impl SecurityConfig {
    pub fn key_rotation(&self) -> Duration {
        Duration::from_secs(self.key_rotation_secs.max(1))
    }

    pub fn key_grace(&self) -> Duration {
        Duration::from_secs(self.key_grace_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("peerwire")
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

impl PeerwireConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            PeerwireConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PEERWIRE_CONFIG")
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
            let text = toml::to_string_pretty(&PeerwireConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply PEERWIRE_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("PEERWIRE_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Some(p) = lookup("PEERWIRE_NETWORK__UDP_PORT").and_then(|v| v.parse().ok()) {
            self.network.udp_port = p;
        }
        if let Some(p) = lookup("PEERWIRE_NETWORK__API_PORT").and_then(|v| v.parse().ok()) {
            self.network.api_port = p;
        }
        if let Some(v) = lookup("PEERWIRE_NETWORK__PREFER_TLS") {
            self.network.prefer_tls = v == "true" || v == "1";
        }
        if let Some(v) = lookup("PEERWIRE_FILTER__IP_FILTER_PATH") {
            self.filter.ip_filter_path = PathBuf::from(v);
        }
        if let Some(n) = lookup("PEERWIRE_ALTLOCS__MAX_LOCATIONS").and_then(|v| v.parse().ok()) {
            self.altlocs.max_locations = n;
        }
        if let Some(n) = lookup("PEERWIRE_UPLOADS__PER_HOST").and_then(|v| v.parse().ok()) {
            self.uploads.per_host = n;
        }
        if let Some(n) = lookup("PEERWIRE_UPLOADS__TOTAL").and_then(|v| v.parse().ok()) {
            self.uploads.total = n;
        }
    }
}
