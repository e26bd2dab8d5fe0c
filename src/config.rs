use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{AgentError, AgentResult};

/// How check execution is partitioned into concurrent units of work
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadPolicy {
    /// One unit of work per server
    Server,

    /// One unit of work per host (default)
    #[default]
    Host,

    /// One unit of work per check
    Check,
}

/// Backing store used by collection streams
///
/// The four values span two independent axes: disk-backed vs. memory-backed
/// and direct (pre-reserved, zero-copy freezable) vs. plain growable buffers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollationMode {
    /// Growable heap buffer
    #[default]
    Memory,

    /// Pre-reserved `BytesMut` buffer, frozen without copying on flush
    DirectMemory,

    /// Heap staging buffer spilled to a temporary file
    Disk,

    /// Direct staging buffer spilled to a temporary file, streamed to the
    /// socket through a small copy buffer
    DirectDisk,
}

impl CollationMode {
    /// Select a mode from the (disk, direct) capability pair
    pub fn from_capabilities(disk: bool, direct: bool) -> Self {
        match (disk, direct) {
            (false, false) => CollationMode::Memory,
            (false, true) => CollationMode::DirectMemory,
            (true, false) => CollationMode::Disk,
            (true, true) => CollationMode::DirectDisk,
        }
    }

    pub fn is_disk(&self) -> bool {
        matches!(self, CollationMode::Disk | CollationMode::DirectDisk)
    }

    pub fn is_direct(&self) -> bool {
        matches!(self, CollationMode::DirectMemory | CollationMode::DirectDisk)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,

    pub servers: Vec<ServerConfig>,
}

/// Agent-wide runtime settings
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub thread_policy: ThreadPolicy,

    #[serde(default)]
    pub collation: CollationMode,

    /// Directory for disk collation temp files (system temp dir if unset)
    pub collation_dir: Option<PathBuf>,

    /// Seconds between marching-orders refresh sweeps
    #[serde(default = "default_refresh_sweep")]
    pub refresh_sweep: u64,

    /// Connect and round-trip timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            thread_policy: ThreadPolicy::default(),
            collation: CollationMode::default(),
            collation_dir: None,
            refresh_sweep: default_refresh_sweep(),
            timeout: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub address: String,

    #[serde(default = "crate::util::get_default_port")]
    pub port: u16,

    /// Refresh period inherited by hosts that do not set their own
    #[serde(default = "default_refresh_period")]
    pub refresh_period: u64,

    #[serde(default)]
    pub hosts: Vec<HostConfig>,
}

impl ServerConfig {
    /// Identity of the server (`address:port`)
    pub fn id(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    pub name: String,

    /// Overrides the server's refresh period for this host
    #[serde(default)]
    pub refresh_period: Option<u64>,
}

fn default_refresh_period() -> u64 {
    120
}

fn default_refresh_sweep() -> u64 {
    10
}

fn default_timeout() -> u64 {
    30
}

impl Config {
    /// Reject configurations the agent cannot run with.
    ///
    /// Called before any server or host is constructed so that bad input fails
    /// the process at startup instead of surfacing during steady state.
    pub fn validate(&self) -> AgentResult<()> {
        if self.agent.refresh_sweep == 0 {
            return Err(AgentError::InvalidConfig(
                "refresh_sweep must be at least 1 second".into(),
            ));
        }
        if self.agent.timeout == 0 {
            return Err(AgentError::InvalidConfig(
                "timeout must be at least 1 second".into(),
            ));
        }

        let mut server_ids = HashSet::new();
        for server in &self.servers {
            server.validate()?;
            if !server_ids.insert(server.id()) {
                return Err(AgentError::InvalidConfig(format!(
                    "duplicate server {}",
                    server.id()
                )));
            }
        }

        Ok(())
    }
}

impl ServerConfig {
    pub fn validate(&self) -> AgentResult<()> {
        if self.address.trim().is_empty() {
            return Err(AgentError::InvalidConfig("server address is empty".into()));
        }
        if self.port == 0 {
            return Err(AgentError::InvalidConfig(format!(
                "server {} has port 0",
                self.address
            )));
        }
        if self.refresh_period == 0 {
            return Err(AgentError::InvalidConfig(format!(
                "server {} has a zero refresh period",
                self.id()
            )));
        }

        let mut names = HashSet::new();
        for host in &self.hosts {
            host.validate()?;
            if !names.insert(host.name.as_str()) {
                return Err(AgentError::InvalidConfig(format!(
                    "duplicate host '{}' on server {}",
                    host.name,
                    self.id()
                )));
            }
        }

        Ok(())
    }
}

impl HostConfig {
    pub fn validate(&self) -> AgentResult<()> {
        if self.name.trim().is_empty() {
            return Err(AgentError::InvalidConfig("host name is empty".into()));
        }
        if self.refresh_period == Some(0) {
            return Err(AgentError::InvalidConfig(format!(
                "host '{}' has a zero refresh period",
                self.name
            )));
        }
        Ok(())
    }

    /// This host's refresh period, falling back to `inherited`
    pub fn refresh_period_or(&self, inherited: u64) -> u64 {
        self.refresh_period.unwrap_or(inherited)
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))?;
    config.validate()?;
    trace!("loaded config: {config:?}");
    Ok(config)
}
