use crate::logging::LogFormat;
use crate::socket::SocketEndpoint;

/// Default TCP port the daemon listens on for external connections.
pub const DEFAULT_TCP_PORT: u16 = 9780;

/// Default host the daemon binds when listening on TCP.
pub const DEFAULT_TCP_HOST: &str = "127.0.0.1";

/// Default log filter expression used by the daemon.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default number of internal/external device pairs in the echo graph.
pub const DEFAULT_ECHO_DEVICES: u32 = 1;

/// Default pause, in milliseconds, after a reactor cycle made no progress.
pub const DEFAULT_IDLE_BACKOFF_MS: u64 = 1;

/// Default log filter expression used by the daemon.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the daemon.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Computes the default listening endpoint for the daemon.
#[must_use]
pub fn default_listen_endpoint() -> SocketEndpoint {
    SocketEndpoint::tcp(DEFAULT_TCP_HOST, DEFAULT_TCP_PORT)
}
