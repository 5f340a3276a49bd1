//! Settings for `taskdeck-server`.
//!
//! Two keys matter: the listen address and the bearer token. Each comes
//! from the command line (or its environment variable), then from the
//! `[server]` table of `~/.config/taskdeck-server/config.toml`, then from
//! the built-in default.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Address the server listens on when nothing else is configured.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Errors that can occur when loading server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The listen address is not `host:port`.
    #[error("invalid bind address {0:?}")]
    InvalidBind(String),
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerConfigFile {
    server: ServerSection,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerSection {
    bind_addr: Option<String>,
    token: Option<String>,
}

/// CLI arguments for the list server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Taskdeck list server")]
pub struct ServerCliArgs {
    /// Address to listen on.
    #[arg(short, long, env = "TASKDECK_SERVER_ADDR")]
    pub bind: Option<String>,

    /// Config file to read instead of the default location.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Bearer token clients must present. Unset accepts any caller.
    #[arg(long, env = "TASKDECK_SERVER_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKDECK_SERVER_LOG")]
    pub log_level: String,
}

/// Resolved server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Validated listen address.
    pub bind_addr: SocketAddr,
    /// Expected bearer token; `None` disables authentication.
    pub token: Option<String>,
    /// Log level filter string.
    pub log_level: String,
}

impl ServerConfig {
    /// Reads the config file (if any) and layers the CLI on top.
    ///
    /// An explicit `--config` path must exist; the default path may be
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or
    /// the bind address is malformed.
    pub fn load(cli: &ServerCliArgs) -> Result<Self, ConfigError> {
        let file = read_config_file(cli.config.as_deref())?;
        Self::resolve(cli, file)
    }

    fn resolve(cli: &ServerCliArgs, file: ServerConfigFile) -> Result<Self, ConfigError> {
        let bind = cli
            .bind
            .clone()
            .or(file.server.bind_addr)
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind
            .parse()
            .map_err(|_| ConfigError::InvalidBind(bind.clone()))?;

        // An empty token, from either source, switches authentication off.
        let token = cli
            .token
            .clone()
            .or(file.server.token)
            .filter(|t| !t.trim().is_empty());

        Ok(Self {
            bind_addr,
            token,
            log_level: cli.log_level.clone(),
        })
    }
}

fn read_config_file(explicit: Option<&Path>) -> Result<ServerConfigFile, ConfigError> {
    let (path, required) = match explicit {
        Some(p) => (p.to_path_buf(), true),
        None => match dirs::config_dir() {
            Some(dir) => (dir.join("taskdeck-server").join("config.toml"), false),
            None => return Ok(ServerConfigFile::default()),
        },
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            Ok(ServerConfigFile::default())
        }
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
