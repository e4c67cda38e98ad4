//! Configuration system for the convsync client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/convsync/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use convsync_proto::message::MAX_CONTENT_CHARS;

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

    /// A URL setting is unusable.
    #[error("invalid {field} URL {value:?}: {reason}")]
    InvalidUrl {
        /// Which setting.
        field: &'static str,
        /// The configured value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Which transport carries real-time events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// WebSocket push channel with REST polling as fallback.
    #[default]
    Push,
    /// REST polling only.
    Polling,
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    sync: SyncFileConfig,
    typing: TypingFileConfig,
    reconnect: ReconnectFileConfig,
    ui: UiFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    base_url: Option<String>,
    push_url: Option<String>,
    user_id: Option<String>,
    transport: Option<TransportKind>,
    request_timeout_secs: Option<u64>,
}

/// `[sync]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SyncFileConfig {
    ack_timeout_secs: Option<u64>,
    poll_interval_secs: Option<u64>,
    page_size: Option<usize>,
    max_content_chars: Option<usize>,
    max_duplicate_tracking: Option<usize>,
    event_buffer: Option<usize>,
}

/// `[typing]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TypingFileConfig {
    idle_timeout_ms: Option<u64>,
    remote_timeout_ms: Option<u64>,
}

/// `[reconnect]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ReconnectFileConfig {
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    multiplier: Option<f64>,
    jitter_ms: Option<u64>,
    connect_timeout_secs: Option<u64>,
}

/// `[ui]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    timestamp_format: Option<String>,
    preview_chars: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Timers and limits of the sync core (used by `SyncClient`).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How long a sent message may stay `sending` before it is failed.
    pub ack_timeout: Duration,
    /// Idle time after the last keystroke before `typing_stop` is sent.
    pub typing_idle: Duration,
    /// How long the other party's typing indicator survives without a
    /// fresh `user_typing`.
    pub remote_typing_timeout: Duration,
    /// Fallback polling period while the push channel is down.
    pub poll_interval: Duration,
    /// Longest accepted message, in characters.
    pub max_content_chars: usize,
    /// Maximum number of message ids remembered for non-active
    /// conversations.
    pub max_duplicate_tracking: usize,
    /// Capacity of the change-notification channel.
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(15),
            typing_idle: Duration::from_secs(2),
            remote_typing_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_secs(10),
            max_content_chars: MAX_CONTENT_CHARS,
            max_duplicate_tracking: 10_000,
            event_buffer: 64,
        }
    }
}

/// Push-channel reconnect policy (used by `PushTransport`).
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Growth factor applied per failed attempt.
    pub multiplier: f64,
    /// Maximum random delay added to each attempt.
    pub jitter: Duration,
    /// Timeout of a single WebSocket handshake.
    pub connect_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: Duration::from_millis(250),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Endpoints and identity needed to open a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// REST API root.
    pub base_url: String,
    /// WebSocket endpoint.
    pub push_url: String,
    /// The local user.
    pub user_id: String,
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// REST API root, e.g. `https://host/api/`.
    pub base_url: Option<String>,
    /// WebSocket push endpoint; derived from `base_url` when unset.
    pub push_url: Option<String>,
    /// The local user's id.
    pub user_id: Option<String>,
    /// Transport carrying real-time events.
    pub transport: TransportKind,
    /// Timeout of a single REST request.
    pub request_timeout: Duration,

    // -- Sync --
    /// Sync core timers and limits.
    pub sync: SyncConfig,
    /// Messages requested per page.
    pub page_size: usize,

    // -- Reconnect --
    /// Push reconnect policy.
    pub reconnect: ReconnectConfig,

    // -- UI --
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
    /// Length of conversation-list previews in characters.
    pub preview_chars: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            push_url: None,
            user_id: None,
            transport: TransportKind::Push,
            request_timeout: Duration::from_secs(15),
            sync: SyncConfig::default(),
            page_size: 50,
            reconnect: ReconnectConfig::default(),
            timestamp_format: "%H:%M".to_string(),
            preview_chars: 50,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an
    /// error. Otherwise the default path
    /// (`~/.config/convsync/config.toml`) is tried and silently ignored if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or if any config file cannot be parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. Separated from `load()` so it can
    /// be unit tested without CLI parsing.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let sync_defaults = defaults.sync;
        let reconnect_defaults = defaults.reconnect;

        Self {
            base_url: cli
                .base_url
                .clone()
                .or_else(|| file.server.base_url.clone()),
            push_url: cli
                .push_url
                .clone()
                .or_else(|| file.server.push_url.clone()),
            user_id: cli.user.clone().or_else(|| file.server.user_id.clone()),
            transport: cli
                .transport
                .or(file.server.transport)
                .unwrap_or(defaults.transport),
            request_timeout: file
                .server
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            sync: SyncConfig {
                ack_timeout: file
                    .sync
                    .ack_timeout_secs
                    .map_or(sync_defaults.ack_timeout, Duration::from_secs),
                typing_idle: file
                    .typing
                    .idle_timeout_ms
                    .map_or(sync_defaults.typing_idle, Duration::from_millis),
                remote_typing_timeout: file
                    .typing
                    .remote_timeout_ms
                    .map_or(sync_defaults.remote_typing_timeout, Duration::from_millis),
                poll_interval: file
                    .sync
                    .poll_interval_secs
                    .map_or(sync_defaults.poll_interval, Duration::from_secs),
                max_content_chars: file
                    .sync
                    .max_content_chars
                    .unwrap_or(sync_defaults.max_content_chars),
                max_duplicate_tracking: file
                    .sync
                    .max_duplicate_tracking
                    .unwrap_or(sync_defaults.max_duplicate_tracking),
                event_buffer: file
                    .sync
                    .event_buffer
                    .unwrap_or(sync_defaults.event_buffer),
            },
            page_size: file.sync.page_size.unwrap_or(defaults.page_size),
            reconnect: ReconnectConfig {
                initial_delay: file
                    .reconnect
                    .initial_delay_ms
                    .map_or(reconnect_defaults.initial_delay, Duration::from_millis),
                max_delay: file
                    .reconnect
                    .max_delay_ms
                    .map_or(reconnect_defaults.max_delay, Duration::from_millis),
                multiplier: file
                    .reconnect
                    .multiplier
                    .unwrap_or(reconnect_defaults.multiplier),
                jitter: file
                    .reconnect
                    .jitter_ms
                    .map_or(reconnect_defaults.jitter, Duration::from_millis),
                connect_timeout: file
                    .reconnect
                    .connect_timeout_secs
                    .map_or(reconnect_defaults.connect_timeout, Duration::from_secs),
            },
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.ui.timestamp_format.clone())
                .unwrap_or(defaults.timestamp_format),
            preview_chars: file.ui.preview_chars.unwrap_or(defaults.preview_chars),
        }
    }

    /// Build a [`SessionConfig`] if the base URL and user are known.
    ///
    /// Returns `Ok(None)` when either is missing. The push URL falls back
    /// to `ws(s)://<base host>/ws` when not configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUrl`] if the push URL has to be
    /// derived and the base URL cannot be parsed.
    pub fn to_session_config(&self) -> Result<Option<SessionConfig>, ConfigError> {
        let (Some(base_url), Some(user_id)) = (self.base_url.clone(), self.user_id.clone()) else {
            return Ok(None);
        };
        if user_id.is_empty() {
            return Ok(None);
        }

        let push_url = match &self.push_url {
            Some(url) => url.clone(),
            None => derive_push_url(&base_url)?,
        };

        Ok(Some(SessionConfig {
            base_url,
            push_url,
            user_id,
        }))
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Real-time conversation sync client")]
pub struct CliArgs {
    /// REST API root, e.g. `https://example.com/api/`.
    #[arg(long, env = "CONVSYNC_BASE_URL")]
    pub base_url: Option<String>,

    /// WebSocket push endpoint (default: derived from the base URL).
    #[arg(long, env = "CONVSYNC_PUSH_URL")]
    pub push_url: Option<String>,

    /// Your user id.
    #[arg(long, env = "CONVSYNC_USER")]
    pub user: Option<String>,

    /// Transport carrying real-time events.
    #[arg(long, value_enum)]
    pub transport: Option<TransportKind>,

    /// Conversation to open at startup.
    #[arg(long)]
    pub conversation: Option<String>,

    /// Path to config file (default: `~/.config/convsync/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Timestamp display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "CONVSYNC_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/convsync.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Push endpoint on the same host as the REST API.
fn derive_push_url(base_url: &str) -> Result<String, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidUrl {
        field: "base",
        value: base_url.to_string(),
        reason,
    };

    let mut url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(invalid(format!("unsupported scheme {other:?}"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| invalid("cannot switch to a WebSocket scheme".to_string()))?;
    url.set_path("/ws");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url.to_string())
}

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
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
        config_dir.join("convsync").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
