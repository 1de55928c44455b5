//! Configuration file.
//!
//! ```toml
//! [server]
//! share_as = true
//! op_timeout_ms = 2000
//! stat_cache_ttl_ms = 1000
//! restart_backoff_ms = 1000
//!
//! [[share]]
//! name = "docs"
//! path = "/srv/docs"
//! run_as = "alice"
//! readers = ["*"]
//! writers = ["alice@example.com"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use sharefs_vfs::RemoteFsOptions;

use crate::constants::DEFAULT_SUDO_PROGRAM;
use crate::dispatcher::{DispatcherOptions, ServerAddr};
use crate::launcher::SudoLauncher;
use crate::share::{Share, WILDCARD};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid share {name:?}: {reason}")]
    InvalidShare { name: String, reason: String },

    #[error("duplicate share name: {0}")]
    DuplicateShare(String),

    #[error("invalid file_server_addr: {0}")]
    InvalidAddr(String),
}

/// `[server]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Serve each share as its `run_as` identity.
    pub share_as: bool,
    pub op_timeout_ms: u64,
    /// Zero disables the stat cache.
    pub stat_cache_ttl_ms: u64,
    pub restart_backoff_ms: u64,
    pub sudo_program: String,
    /// Shared file server, used when `share_as` is off.
    pub file_server_addr: Option<String>,
    /// Binary launched as the user server. Defaults to the running one.
    pub executable: Option<PathBuf>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            share_as: true,
            op_timeout_ms: 2000,
            stat_cache_ttl_ms: 1000,
            restart_backoff_ms: 1000,
            sudo_program: DEFAULT_SUDO_PROGRAM.to_string(),
            file_server_addr: None,
            executable: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSettings,
    #[serde(rename = "share")]
    pub shares: Vec<Share>,
}

impl Config {
    /// Read and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_shares(&self.shares, self.server.share_as)?;
        if let Some(addr) = &self.server.file_server_addr {
            ServerAddr::parse(addr).map_err(|e| ConfigError::InvalidAddr(e.0))?;
        }
        Ok(())
    }

    pub fn dispatcher_options(&self) -> DispatcherOptions {
        DispatcherOptions {
            share_as: self.server.share_as,
            remote: RemoteFsOptions {
                op_timeout: Duration::from_millis(self.server.op_timeout_ms),
                stat_cache_ttl: Duration::from_millis(self.server.stat_cache_ttl_ms),
            },
            restart_backoff: Duration::from_millis(self.server.restart_backoff_ms),
        }
    }

    /// Shared file server address, already validated.
    pub fn file_server_addr(&self) -> Option<ServerAddr> {
        self.server
            .file_server_addr
            .as_deref()
            .and_then(|a| ServerAddr::parse(a).ok())
    }

    /// Launcher for user servers.
    pub fn launcher(&self) -> io::Result<SudoLauncher> {
        let executable = match &self.server.executable {
            Some(path) => path.clone(),
            None => std::env::current_exe()?,
        };
        Ok(SudoLauncher::new(&self.server.sudo_program, executable))
    }
}

/// Parse a JSON array of shares, as handed over by a control plane.
pub fn shares_from_json(text: &str, share_as: bool) -> Result<Vec<Share>, ConfigError> {
    let shares: Vec<Share> = serde_json::from_str(text)?;
    validate_shares(&shares, share_as)?;
    Ok(shares)
}

fn validate_shares(shares: &[Share], share_as: bool) -> Result<(), ConfigError> {
    let invalid = |share: &Share, reason: &str| ConfigError::InvalidShare {
        name: share.name.clone(),
        reason: reason.to_string(),
    };

    let mut seen = HashSet::new();
    for share in shares {
        if share.name.is_empty() || share.name == WILDCARD {
            return Err(invalid(share, "name must be a non-empty share name"));
        }
        if share.name.contains('/') {
            return Err(invalid(share, "name must not contain '/'"));
        }
        if !share.path.is_absolute() {
            return Err(invalid(share, "path must be absolute"));
        }
        if share_as && share.run_as.is_empty() {
            return Err(invalid(share, "run_as is required when share_as is on"));
        }
        if !seen.insert(share.name.as_str()) {
            return Err(ConfigError::DuplicateShare(share.name.clone()));
        }
    }
    Ok(())
}
