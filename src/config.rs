//! Server configuration: loading from a TOML file and validating the
//! role-dependent fields before the core is constructed.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;

/// Which of the two roles this process should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Master,
    Slave,
}

/// A raw representation of the config file before role validation.
#[derive(Deserialize)]
struct RawConfig {
    role: Role,
    #[serde(default)]
    mirror: Option<String>,
    #[serde(default)]
    master_addr: Option<String>,
    #[serde(default = "default_listen_addr")]
    listen_addr: String,
    #[serde(default = "default_cachedir")]
    cachedir: String,
    #[serde(default = "default_token")]
    token: String,
    #[serde(default)]
    logfile: Option<String>,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    metrics_port: Option<u16>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:5000".to_string()
}
fn default_cachedir() -> String {
    "cache".to_string()
}
fn default_token() -> String {
    "1234567890ABCDEFG".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

/// Validated, role-resolved server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,
    /// Origin base URL. Always `Some` for a master; unused on a slave, which
    /// learns the mirror from the master's login reply.
    pub mirror: Option<String>,
    /// Control-channel URL of the master. Always `Some` for a slave.
    pub master_addr: Option<String>,
    pub listen_addr: String,
    pub cachedir: String,
    pub token: String,
    pub logfile: Option<String>,
    pub log_level: String,
    pub metrics_port: Option<u16>,
}

impl Config {
    /// Reads and parses a TOML file, then validates the role-dependent fields.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at '{path}'"))?;
        let raw: RawConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse TOML from '{path}'"))?;

        let config = Config {
            role: raw.role,
            mirror: raw.mirror,
            master_addr: raw.master_addr,
            listen_addr: raw.listen_addr,
            cachedir: raw.cachedir,
            token: raw.token,
            logfile: raw.logfile,
            log_level: raw.log_level,
            metrics_port: raw.metrics_port,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        match self.role {
            Role::Master => {
                if self.mirror.is_none() {
                    bail!("'mirror' is required when role = \"master\"");
                }
            }
            Role::Slave => {
                if self.master_addr.is_none() {
                    bail!("'master_addr' is required when role = \"slave\"");
                }
            }
        }
        Ok(())
    }
}
