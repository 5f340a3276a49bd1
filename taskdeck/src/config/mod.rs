//! Configuration system for the `taskdeck` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/taskdeck/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use taskdeck_proto::codec::FileFormat;

use crate::store::FileBackend;
use crate::sync::EngineOptions;
use crate::sync::engine::DEFAULT_EVENT_BUFFER;

/// Errors that can occur when loading configuration.
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

    /// The server URL is not a valid absolute URL.
    #[error("invalid server url {value:?}: {reason}")]
    InvalidUrl {
        /// The configured value.
        value: String,
        /// Parser message.
        reason: String,
    },

    /// The storage format is not one of `json` or `tabular`.
    #[error("unknown storage format {0:?} (expected json or tabular)")]
    InvalidFormat(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    device: DeviceFileConfig,
    storage: StorageFileConfig,
    sync: SyncFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    base_url: Option<String>,
    token: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// `[device]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct DeviceFileConfig {
    device_id: Option<String>,
}

/// `[storage]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct StorageFileConfig {
    path: Option<PathBuf>,
    format: Option<String>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    event_buffer: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// Root of the list API. `None` runs without a server.
    pub base_url: Option<Url>,
    /// Bearer token.
    pub token: String,
    /// Upper bound for each request.
    pub request_timeout: Duration,

    // -- Device --
    /// Identifier written into `last_updated_by`.
    pub device_id: String,

    // -- Storage --
    /// Task file location.
    pub store_path: PathBuf,
    /// Task file format.
    pub store_format: FileFormat,

    // -- Sync --
    /// Capacity of the engine event channel.
    pub event_buffer: usize,
    /// Use an in-process server instead of `base_url`.
    pub offline_demo: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let store_path = default_store_path();
        Self {
            base_url: None,
            token: String::new(),
            request_timeout: Duration::from_secs(30),
            device_id: "taskdeck-cli".to_string(),
            store_format: infer_format(&store_path),
            store_path,
            event_buffer: DEFAULT_EVENT_BUFFER,
            offline_demo: false,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. If no `--config` is given, the default path
    /// (`~/.config/taskdeck/config.toml`) is tried and silently ignored if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read,
    /// any file cannot be parsed, or a value is invalid.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let base_url = cli
            .base_url
            .clone()
            .or_else(|| file.server.base_url.clone())
            .filter(|u| !u.trim().is_empty())
            .map(|raw| {
                Url::parse(raw.trim()).map_err(|e| ConfigError::InvalidUrl {
                    value: raw.clone(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        let store_path = cli
            .store
            .clone()
            .or_else(|| file.storage.path.clone())
            .unwrap_or(defaults.store_path);

        let store_format = match cli.format.as_deref().or(file.storage.format.as_deref()) {
            Some(name) => FileFormat::from_name(name)
                .ok_or_else(|| ConfigError::InvalidFormat(name.to_string()))?,
            None => infer_format(&store_path),
        };

        Ok(Self {
            base_url,
            token: cli
                .token
                .clone()
                .or_else(|| file.server.token.clone())
                .unwrap_or(defaults.token),
            request_timeout: cli
                .request_timeout_secs
                .or(file.server.request_timeout_secs)
                .map_or(defaults.request_timeout, Duration::from_secs),
            device_id: cli
                .device_id
                .clone()
                .or_else(|| file.device.device_id.clone())
                .unwrap_or(defaults.device_id),
            store_path,
            store_format,
            event_buffer: file.sync.event_buffer.unwrap_or(defaults.event_buffer),
            offline_demo: cli.offline_demo,
        })
    }

    /// Engine settings derived from this configuration.
    #[must_use]
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            device_id: self.device_id.clone(),
            request_timeout: self.request_timeout,
            event_buffer: self.event_buffer,
        }
    }

    /// Persistence backend for the configured task file.
    #[must_use]
    pub fn backend(&self) -> FileBackend {
        FileBackend::new(&self.store_path, self.store_format)
    }

    /// Sidecar file holding sync bookkeeping between runs.
    #[must_use]
    pub fn sync_state_path(&self) -> PathBuf {
        let mut name = self
            .store_path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".sync.json");
        self.store_path.with_file_name(name)
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Offline-first task list with server sync")]
pub struct CliArgs {
    /// Path to config file (default: `~/.config/taskdeck/config.toml`).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Root URL of the list API.
    #[arg(long, env = "TASKDECK_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// Bearer token for the list API.
    #[arg(long, env = "TASKDECK_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Upper bound for each request to the list API, in seconds.
    #[arg(long, env = "TASKDECK_REQUEST_TIMEOUT_SECS", global = true)]
    pub request_timeout_secs: Option<u64>,

    /// Identifier of this device, recorded on every change.
    #[arg(long, env = "TASKDECK_DEVICE_ID", global = true)]
    pub device_id: Option<String>,

    /// Task file location.
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Task file format: json or tabular (default: from the file extension).
    #[arg(long, global = true)]
    pub format: Option<String>,

    /// Run against an in-process server seeded from the task file.
    #[arg(long, global = true)]
    pub offline_demo: bool,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "TASKDECK_LOG", global = true)]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/taskdeck.log`).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// What to do (default: list).
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Client commands.
#[derive(clap::Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show all tasks.
    List,
    /// Add a task.
    Add {
        /// Task text.
        text: String,
        /// low, normal or high.
        #[arg(long)]
        importance: Option<String>,
        /// Due date (RFC 3339, e.g. 2025-07-01T18:00:00Z).
        #[arg(long)]
        deadline: Option<String>,
        /// Color tag, e.g. #FF8800.
        #[arg(long)]
        color: Option<String>,
        /// work, study, hobby or other.
        #[arg(long)]
        category: Option<String>,
    },
    /// Mark a task done.
    Done {
        /// Task id.
        id: String,
    },
    /// Mark a task not done.
    Undo {
        /// Task id.
        id: String,
    },
    /// Replace a task's text.
    Edit {
        /// Task id.
        id: String,
        /// New text.
        text: String,
    },
    /// Remove a task.
    Remove {
        /// Task id.
        id: String,
    },
    /// Push pending local changes to the server.
    Sync,
    /// Show sync status.
    Status,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn default_store_path() -> PathBuf {
    dirs::data_dir().map_or_else(
        || PathBuf::from("tasks.json"),
        |dir| dir.join("taskdeck").join("tasks.json"),
    )
}

fn infer_format(path: &Path) -> FileFormat {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(FileFormat::from_extension)
        .unwrap_or_default()
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("taskdeck").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
