//! Relay settings.
//!
//! A setting is taken from the first source that provides it: command line,
//! environment (through clap's `env` support), the TOML settings file, then
//! the built-in default. `--bind` names a full address; `--port` (or `PORT`)
//! only picks the port and listens on every interface.
//!
//! The settings file is flat:
//!
//! ```toml
//! bind_addr = "127.0.0.1:5000"
//! max_frame_size = 65536
//! log_level = "debug"
//! ```

use std::path::{Path, PathBuf};

/// Listen port when nothing else is configured.
pub const DEFAULT_PORT: u16 = 5000;

/// Largest inbound frame accepted by default, in bytes.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

const DEFAULT_LOG_LEVEL: &str = "info";

/// Reasons the relay settings could not be assembled.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The settings file exists (or was named explicitly) but could not be read.
    #[error("cannot read settings file {}: {source}", path.display())]
    Unreadable {
        /// File that was tried.
        path: PathBuf,
        /// I/O failure.
        source: std::io::Error,
    },

    /// The settings file is not valid TOML or has unexpected keys or types.
    #[error("invalid settings file {}: {source}", path.display())]
    Malformed {
        /// File that was parsed.
        path: PathBuf,
        /// Parser failure.
        source: toml::de::Error,
    },

    /// A frame limit of zero would reject every frame.
    #[error("max_frame_size must be at least 1 byte")]
    ZeroFrameSize,
}

/// Command line of the `pairlink-relay` binary.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Pairlink signaling relay")]
pub struct RelayArgs {
    /// Full listen address, e.g. `127.0.0.1:5000`.
    #[arg(short, long, env = "PAIRLINK_ADDR")]
    pub bind: Option<String>,

    /// Listen on this port on all interfaces. `--bind` takes precedence.
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Settings file to read instead of the per-user one.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Largest inbound frame in bytes; bigger frames are dropped.
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Tracing filter used when `RUST_LOG` is unset.
    #[arg(long, env = "PAIRLINK_LOG")]
    pub log_level: Option<String>,
}

/// Contents of the settings file. Every key is optional.
#[derive(Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileSettings {
    bind_addr: Option<String>,
    port: Option<u16>,
    max_frame_size: Option<usize>,
    log_level: Option<String>,
}

impl FileSettings {
    fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reads an explicitly named file, which must exist.
    fn read_required(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(path, &text),
            Err(source) => Err(ConfigError::Unreadable {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Reads the per-user file if there is one.
    fn read_optional(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(path, &text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Unreadable {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Per-user settings file location, e.g. `~/.config/pairlink-relay/config.toml`.
#[must_use]
pub fn user_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pairlink-relay").join("config.toml"))
}

/// Settings the relay runs with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Address handed to the listener.
    pub bind_addr: String,
    /// Largest inbound frame in bytes.
    pub max_frame_size: usize,
    /// Fallback tracing filter.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: any_interface(DEFAULT_PORT),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl RelayConfig {
    /// Reads the settings file named by `--config`, or the per-user one, and
    /// layers the command line over it.
    ///
    /// # Errors
    ///
    /// Fails if a named file is missing, if any file that exists cannot be
    /// read or parsed, or if the resulting frame limit is zero.
    pub fn from_args(args: &RelayArgs) -> Result<Self, ConfigError> {
        let file = match (&args.config, user_settings_path()) {
            (Some(path), _) => FileSettings::read_required(path)?,
            (None, Some(path)) => FileSettings::read_optional(&path)?,
            (None, None) => FileSettings::default(),
        };
        Self::layer(args, file)
    }

    fn layer(args: &RelayArgs, file: FileSettings) -> Result<Self, ConfigError> {
        let bind_addr = args
            .bind
            .clone()
            .or_else(|| args.port.map(any_interface))
            .or(file.bind_addr)
            .or_else(|| file.port.map(any_interface))
            .unwrap_or_else(|| any_interface(DEFAULT_PORT));

        let max_frame_size = args
            .max_frame_size
            .or(file.max_frame_size)
            .unwrap_or(DEFAULT_MAX_FRAME_SIZE);
        if max_frame_size == 0 {
            return Err(ConfigError::ZeroFrameSize);
        }

        let log_level = args
            .log_level
            .clone()
            .or(file.log_level)
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        Ok(Self {
            bind_addr,
            max_frame_size,
            log_level,
        })
    }
}

fn any_interface(port: u16) -> String {
    format!("0.0.0.0:{port}")
}
