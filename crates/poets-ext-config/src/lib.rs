//! Shared configuration for the POETS external-connection daemon.
//!
//! Values are layered by `ortho_config`: built-in defaults, then an optional
//! configuration file, then `POETS_EXT_*` environment variables, then command
//! line flags. The resolved [`Config`] tells the daemon where to listen (or
//! whether to serve a single connection over stdio), how large an echo graph
//! to simulate, how long the reactor rests between idle cycles, and how to
//! format its logs.

mod defaults;
mod logging;
mod socket;

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_ECHO_DEVICES, DEFAULT_IDLE_BACKOFF_MS, DEFAULT_LOG_FILTER, DEFAULT_TCP_HOST,
    DEFAULT_TCP_PORT, default_listen_endpoint, default_log_filter, default_log_filter_string,
    default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Resolved daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "POETS_EXT")]
pub struct Config {
    /// Socket the daemon accepts external connections on.
    #[ortho_config(default = default_listen_endpoint())]
    pub listen: SocketEndpoint,
    /// Serve exactly one connection over stdin/stdout instead of listening.
    #[ortho_config(default = false)]
    pub stdio: bool,
    /// Number of internal/external device pairs in the echo graph.
    #[ortho_config(default = DEFAULT_ECHO_DEVICES)]
    pub echo_devices: u32,
    /// Milliseconds the reactor sleeps after a cycle made no progress.
    #[ortho_config(default = DEFAULT_IDLE_BACKOFF_MS)]
    pub idle_backoff_ms: u64,
    /// `tracing-subscriber` filter expression.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format for structured logs.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen_endpoint(),
            stdio: false,
            echo_devices: DEFAULT_ECHO_DEVICES,
            idle_backoff_ms: DEFAULT_IDLE_BACKOFF_MS,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Socket the daemon listens on.
    #[must_use]
    pub fn listen(&self) -> &SocketEndpoint {
        &self.listen
    }

    /// Whether the daemon serves a single stdio connection.
    #[must_use]
    pub fn stdio(&self) -> bool {
        self.stdio
    }

    /// Number of device pairs in the echo graph.
    #[must_use]
    pub fn echo_devices(&self) -> u32 {
        self.echo_devices
    }

    /// Pause applied after an idle reactor cycle.
    #[must_use]
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
