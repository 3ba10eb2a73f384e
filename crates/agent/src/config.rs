//! Peer agent configuration.

use std::net::IpAddr;
use std::ops::RangeInclusive;
use std::path::PathBuf;

use peerdex_protocol::{validate_peer_name, DEFAULT_INDEX_PORT};
use serde::Deserialize;

/// Lowest port handed out to serving tasks by default.
pub const DEFAULT_PORT_RANGE_START: u16 = 20_000;
pub const DEFAULT_PORT_RANGE_END: u16 = 65_535;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Index server host name or IP.
    pub server_host: String,
    pub server_port: u16,

    /// Name announced in REGISTER; prompted for when absent.
    pub peer_name: Option<String>,

    /// Directory holding served files and receiving downloads.
    pub shared_dir: PathBuf,

    /// Address serving tasks listen on.
    pub bind_host: String,
    pub port_range_start: u16,
    pub port_range_end: u16,

    pub log_level: String,
    pub log_format: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: DEFAULT_INDEX_PORT,
            peer_name: None,
            shared_dir: PathBuf::from("."),
            bind_host: "0.0.0.0".to_string(),
            port_range_start: DEFAULT_PORT_RANGE_START,
            port_range_end: DEFAULT_PORT_RANGE_END,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server_host.trim().is_empty() {
            return Err("server_host must not be empty".to_string());
        }
        if self.server_port == 0 {
            return Err("server_port must be greater than zero".to_string());
        }
        if self.port_range_start == 0 || self.port_range_start > self.port_range_end {
            return Err(format!(
                "invalid serving port range {}..={}",
                self.port_range_start, self.port_range_end
            ));
        }
        self.bind_ip()?;
        if let Some(name) = &self.peer_name {
            validate_peer_name(name).map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    pub fn bind_ip(&self) -> Result<IpAddr, String> {
        self.bind_host
            .parse()
            .map_err(|_| format!("bind_host {} is not an IP address", self.bind_host))
    }

    pub fn port_range(&self) -> RangeInclusive<u16> {
        self.port_range_start..=self.port_range_end
    }
}
