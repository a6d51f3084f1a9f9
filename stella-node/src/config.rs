//! Node configuration
//!
//! Persisted as JSON. The identity file referenced here holds the
//! node's serialized identity and is created on first start.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default UDP bind address
pub const DEFAULT_BIND_ADDR: &str = ":9993";

/// Log verbosity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// The matching `tracing` filter directive
    pub const fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            // tracing has no fatal level; both map to error
            LogLevel::Error | LogLevel::Fatal => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        };
        f.write_str(s)
    }
}

/// Node configuration, persisted as JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier; filled from the identity address when
    /// empty
    #[serde(default)]
    pub node_id: String,

    /// Directory for node state
    pub data_dir: PathBuf,

    /// Path of this configuration file
    pub config_file: PathBuf,

    /// Path of the serialized identity
    pub identity_file: PathBuf,

    /// Log verbosity
    #[serde(default)]
    pub log_level: LogLevel,

    /// UDP listen address, `host:port` or `:port` for all interfaces
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Controller endpoint, when coordination is used
    #[serde(default)]
    pub controller_url: Option<String>,

    /// Start the node as soon as it is constructed
    #[serde(default)]
    pub auto_start: bool,

    /// Run the transport without binding a real socket
    #[serde(default)]
    pub test_mode: bool,
}

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let data_dir = home.join(".stella");

        Self {
            node_id: String::new(),
            config_file: data_dir.join("config.json"),
            identity_file: data_dir.join("identity"),
            data_dir,
            log_level: LogLevel::default(),
            bind_addr: default_bind_addr(),
            controller_url: None,
            auto_start: false,
            test_mode: false,
        }
    }
}

impl NodeConfig {
    /// Load a configuration file; an empty path yields the defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Persist the configuration as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Check the configuration for internal consistency
    pub fn validate(&self) -> Result<()> {
        self.bind_socket_addr()?;
        if self.identity_file.as_os_str().is_empty() {
            return Err(Error::Config("identity_file must be set".to_string()));
        }
        Ok(())
    }

    /// Parse `bind_addr` into an address and port
    ///
    /// `:9993` means all interfaces.
    pub fn bind_socket_addr(&self) -> Result<(IpAddr, u16)> {
        let (host, port) = self
            .bind_addr
            .rsplit_once(':')
            .ok_or_else(|| Error::Config(format!("invalid bind_addr {:?}", self.bind_addr)))?;

        let port: u16 = port
            .parse()
            .map_err(|_| Error::Config(format!("invalid port in bind_addr {:?}", self.bind_addr)))?;

        let addr = if host.is_empty() {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            host.parse()
                .map_err(|_| Error::Config(format!("invalid host in bind_addr {:?}", self.bind_addr)))?
        };

        Ok((addr, port))
    }
}
