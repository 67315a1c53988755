use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::network::Deadline;

pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

/// Runtime settings shared by the server and the client.
///
/// Loaded from an optional TOML file; every key has a default, and CLI flags override.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Host the client connects to
    pub server_address: String,
    /// Interface the server binds
    pub bind_address: String,
    pub port: u16,
    pub server_directory: PathBuf,
    #[serde(deserialize_with = "duration_str")]
    pub connect_timeout: Duration,
    /// Idle threshold: longest a transfer may go without moving a byte
    #[serde(deserialize_with = "duration_str")]
    pub io_timeout: Duration,
    /// Deadline for reading the single command of a session
    #[serde(deserialize_with = "duration_str")]
    pub command_timeout: Duration,
    /// Extra time granted per MiB of payload on top of `io_timeout`
    #[serde(deserialize_with = "duration_str")]
    pub transfer_allowance_per_mib: Duration,
    pub chunk_size: usize,
    /// Ceiling on concurrently running sessions
    pub max_sessions: usize,
    #[serde(deserialize_with = "duration_str")]
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            server_directory: PathBuf::from("server_files"),
            connect_timeout: Duration::from_secs(2),
            io_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(5),
            transfer_allowance_per_mib: Duration::from_secs(1),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_sessions: 256,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Read a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            bail!(
                "chunk_size must be between 1 and {} bytes (got {})",
                MAX_CHUNK_SIZE,
                self.chunk_size
            );
        }
        if self.max_sessions == 0 {
            bail!("max_sessions must be at least 1");
        }
        if self.io_timeout.is_zero() {
            bail!("io_timeout must be non-zero");
        }
        if self.command_timeout.is_zero() {
            bail!("command_timeout must be non-zero");
        }
        Ok(())
    }

    /// `host:port` the client dials
    pub fn server_endpoint(&self) -> String {
        format!("{}:{}", self.server_address, self.port)
    }

    /// `host:port` the server binds
    pub fn bind_endpoint(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Deadline for a control exchange
    pub fn command_deadline(&self) -> Deadline {
        Deadline::after(self.command_timeout)
    }

    /// Deadline for moving `bytes` of payload: base idle allowance plus a per-MiB share.
    pub fn transfer_deadline(&self, bytes: u64) -> Deadline {
        let mib = bytes.div_ceil(MIB);
        let extra = self
            .transfer_allowance_per_mib
            .saturating_mul(u32::try_from(mib).unwrap_or(u32::MAX));
        Deadline::after(self.io_timeout.saturating_add(extra))
    }
}

fn duration_str<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}
