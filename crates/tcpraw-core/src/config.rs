//! Configuration for the tcpraw daemon and client.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $TCPRAW_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/tcpraw/config.toml
//!   3. ~/.config/tcpraw/config.toml

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TcprawConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// This server's position (0–9) in the public server list. Minted codes
    /// carry it as their first digit.
    pub server_id: u8,
    /// TCP port for the binary protocol.
    pub tcp_port: u16,
    /// HTTP download port. 0 = disabled.
    pub http_port: u16,
    /// Directory holding the index, metadata, and data files.
    pub data_dir: PathBuf,
    /// Maximum plaintext bytes per blob.
    pub max_blob_bytes: u64,
    /// Seconds a blob is served after ingest.
    pub retention_secs: u64,
    /// Seconds between GC sweeps.
    pub sweep_secs: u64,
    pub limit: RateLimitConfig,
}

/// Per-IP download throttling. The window is shared between the TCP and
/// HTTP surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Attempts allowed per window before a ban.
    pub max_attempts: u32,
    pub window_secs: u64,
    pub ban_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// URL of the line-based `<id>:<host:port>` server list.
    pub list_url: String,
    /// Where downloads land.
    pub output_dir: PathBuf,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_id: 0,
            tcp_port: 9999,
            http_port: 0,
            data_dir: data_dir().join("blobs"),
            max_blob_bytes: 8 * 1024 * 1024 * 1024,
            retention_secs: 3600,
            sweep_secs: 60,
            limit: RateLimitConfig::default(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_secs: 3600,
            ban_secs: 3600,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            list_url: "http://tcpraw.net/servers.txt".into(),
            output_dir: PathBuf::from("."),
        }
    }
}

impl ServerConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_secs)
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn ban(&self) -> Duration {
        Duration::from_secs(self.ban_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_or_tmp().join(".config"))
        .join("tcpraw")
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_or_tmp().join(".local").join("share"))
        .join("tcpraw")
}

fn home_or_tmp() -> PathBuf {
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

impl TcprawConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            TcprawConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TCPRAW_CONFIG")
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
            let text = toml::to_string_pretty(&TcprawConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text)
                .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply TCPRAW_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("TCPRAW_SERVER__SERVER_ID") {
            if let Ok(id) = v.parse() {
                self.server.server_id = id;
            }
        }
        if let Ok(v) = std::env::var("TCPRAW_SERVER__TCP_PORT") {
            if let Ok(p) = v.parse() {
                self.server.tcp_port = p;
            }
        }
        if let Ok(v) = std::env::var("TCPRAW_SERVER__HTTP_PORT") {
            if let Ok(p) = v.parse() {
                self.server.http_port = p;
            }
        }
        if let Ok(v) = std::env::var("TCPRAW_SERVER__DATA_DIR") {
            self.server.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("TCPRAW_SERVER__MAX_BLOB_BYTES") {
            if let Ok(n) = v.parse() {
                self.server.max_blob_bytes = n;
            }
        }
        if let Ok(v) = std::env::var("TCPRAW_SERVER__RETENTION_SECS") {
            if let Ok(n) = v.parse() {
                self.server.retention_secs = n;
            }
        }
        if let Ok(v) = std::env::var("TCPRAW_CLIENT__LIST_URL") {
            self.client.list_url = v;
        }
        if let Ok(v) = std::env::var("TCPRAW_CLIENT__OUTPUT_DIR") {
            self.client.output_dir = PathBuf::from(v);
        }
    }
}
