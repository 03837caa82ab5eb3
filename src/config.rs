//! Transfer configuration
//!
//! All values are constructed once by the caller and injected into the
//! orchestrator. Components never read the environment themselves; a run
//! aborts before any remote side effect if a value is missing.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing configuration value: {0}")]
    MissingValue(String),

    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// SFTP endpoint for one host's relay transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Remote root under which the world lives (usually "/").
    pub root_path: String,
}

/// One panel-managed host: control-plane credentials plus relay transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Panel base URL, e.g. "https://panel.example.com".
    pub panel_url: String,
    /// Client API credential for this host.
    pub api_key: String,
    /// Panel server identifier.
    pub server_id: String,
    /// World directory relative to the managed root, e.g. "world".
    pub world_path: String,
    pub sftp: SftpEndpoint,
}

/// Full configuration for one transfer run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    pub source: HostConfig,
    pub dest: HostConfig,
    /// Local directory for staging files (relay temp, player-data backup).
    pub staging_dir: PathBuf,
    /// Player-data directory relative to the managed root, e.g. "world/playerdata".
    pub playerdata_path: String,
    /// Console message broadcast on both hosts before the transfer starts.
    pub notify_message: String,
}

impl SftpEndpoint {
    fn validate(&self, prefix: &str) -> Result<(), ConfigError> {
        require(&self.host, format!("{prefix}.host"))?;
        if self.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("{prefix}.port"),
                reason: "port must be non-zero".into(),
            });
        }
        require(&self.username, format!("{prefix}.username"))?;
        require(&self.password, format!("{prefix}.password"))?;
        require(&self.root_path, format!("{prefix}.root_path"))?;
        Ok(())
    }
}

impl HostConfig {
    fn validate(&self, side: &str) -> Result<(), ConfigError> {
        require(&self.panel_url, format!("{side}.panel_url"))?;
        require(&self.api_key, format!("{side}.api_key"))?;
        require(&self.server_id, format!("{side}.server_id"))?;
        require(&self.world_path, format!("{side}.world_path"))?;
        self.sftp.validate(&format!("{side}.sftp"))
    }
}

impl TransferConfig {
    /// Check every value for presence. Called before any remote side effect.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.source.validate("source")?;
        self.dest.validate("dest")?;
        if self.staging_dir.as_os_str().is_empty() {
            return Err(ConfigError::MissingValue("staging_dir".into()));
        }
        require(&self.playerdata_path, "playerdata_path".into())?;
        require(&self.notify_message, "notify_message".into())?;
        Ok(())
    }
}

fn require(value: &str, field: String) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        Err(ConfigError::MissingValue(field))
    } else {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_config(staging_dir: PathBuf) -> TransferConfig {
    let endpoint = |host: &str| SftpEndpoint {
        host: host.to_string(),
        port: 2022,
        username: "ferry".to_string(),
        password: "secret".to_string(),
        root_path: "/".to_string(),
    };
    TransferConfig {
        source: HostConfig {
            panel_url: "https://panel-a.example.com".to_string(),
            api_key: "key-a".to_string(),
            server_id: "aaaa1111".to_string(),
            world_path: "world".to_string(),
            sftp: endpoint("node-a.example.com"),
        },
        dest: HostConfig {
            panel_url: "https://panel-b.example.com".to_string(),
            api_key: "key-b".to_string(),
            server_id: "bbbb2222".to_string(),
            world_path: "world".to_string(),
            sftp: endpoint("node-b.example.com"),
        },
        staging_dir,
        playerdata_path: "world/playerdata".to_string(),
        notify_message: "World transfer starting, server going down".to_string(),
    }
}
