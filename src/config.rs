//! Server configuration, loaded from a TOML file with every field
//! defaulted so a bare `config.toml` (or none at all) still boots.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid listen address {0}")]
    InvalidAddress(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub motd: MotdSection,
    pub logging: LoggingSection,
    pub trace_packets: TracePacketsSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub ip: String,
    pub port: u16,
    pub max_players: u32,
    /// Open handshakes allowed at once; defaults to `max_players`.
    pub max_concurrent_connects: Option<u32>,
    pub inactivity_timeout_ms: u64,
    /// Route ordered delivery through a dedicated dispatcher task instead
    /// of emitting inline from the session task.
    pub force_ordering_for_all: bool,
    /// Answer unconnected pings with a second, EDU-flavored MOTD.
    pub enable_edu: bool,
    pub enable_query: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        ServerSection {
            ip: "0.0.0.0".to_string(),
            port: 19132,
            max_players: 1000,
            max_concurrent_connects: None,
            inactivity_timeout_ms: 8500,
            force_ordering_for_all: false,
            enable_edu: false,
            enable_query: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MotdSection {
    pub server_name: String,
    pub world_name: String,
    pub game_version: String,
    pub protocol_version: u32,
    pub gamemode: String,
}

impl Default for MotdSection {
    fn default() -> Self {
        MotdSection {
            server_name: "Dedicated Server".to_string(),
            world_name: "Bedrock level".to_string(),
            game_version: "1.19.1".to_string(),
            protocol_version: 527,
            gamemode: "Survival".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        LoggingSection {
            level: "info".to_string(),
        }
    }
}

/// Per-packet trace filtering. With an empty include list every ID traces
/// except the excluded ones; otherwise only included IDs trace.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TracePacketsSection {
    pub include: Vec<u8>,
    pub exclude: Vec<u8>,
    /// 0 = off, 1 = packet IDs, 2 = IDs plus sizes.
    pub verbosity: u8,
}

impl TracePacketsSection {
    pub fn should_trace(&self, id: u8) -> bool {
        if self.verbosity == 0 || self.exclude.contains(&id) {
            return false;
        }
        self.include.is_empty() || self.include.contains(&id)
    }
}

impl ServerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.server.ip, self.server.port)
            .parse()
            .map_err(|_| ConfigError::InvalidAddress(self.server.ip.clone()))
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.server.inactivity_timeout_ms)
    }

    pub fn max_concurrent_connects(&self) -> u32 {
        self.server
            .max_concurrent_connects
            .unwrap_or(self.server.max_players)
    }
}
