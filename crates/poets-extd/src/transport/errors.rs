//! Errors raised while binding or running the socket listener.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors surfaced by [`super::SocketListener`].
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The TCP host name could not be resolved.
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        /// Host name from the endpoint.
        host: String,
        /// Port from the endpoint.
        port: u16,
        /// Resolver error.
        #[source]
        source: io::Error,
    },
    /// Resolution succeeded but produced no addresses.
    #[error("{host}:{port} resolved to no addresses")]
    NoAddress {
        /// Host name from the endpoint.
        host: String,
        /// Port from the endpoint.
        port: u16,
    },
    /// Binding the TCP socket failed.
    #[error("failed to listen on {addr}: {source}")]
    BindTcp {
        /// Address that was tried.
        addr: SocketAddr,
        /// Bind error.
        #[source]
        source: io::Error,
    },
    /// The listening socket could not be switched to non-blocking mode.
    #[error("failed to make listener non-blocking: {source}")]
    NonBlocking {
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The accept thread could not be spawned.
    #[error("failed to spawn listener thread: {source}")]
    Spawn {
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// Unix sockets are not available on this platform.
    #[cfg(not(unix))]
    #[error("unix socket endpoint {endpoint} is not supported on this platform")]
    UnsupportedUnix {
        /// Endpoint that was requested.
        endpoint: String,
    },
    /// Binding the Unix socket failed.
    #[cfg(unix)]
    #[error("failed to listen on unix socket {path}: {source}")]
    BindUnix {
        /// Socket path.
        path: String,
        /// Bind error.
        #[source]
        source: io::Error,
    },
    /// Another process is still serving the Unix socket.
    #[cfg(unix)]
    #[error("unix socket {path} is in use by another listener")]
    UnixInUse {
        /// Socket path.
        path: String,
    },
    /// Something other than a socket already exists at the path.
    #[cfg(unix)]
    #[error("{path} exists and is not a unix socket")]
    UnixNotSocket {
        /// Offending path.
        path: String,
    },
    /// Inspecting or removing a stale Unix socket failed.
    #[cfg(unix)]
    #[error("failed to reclaim stale unix socket {path}: {source}")]
    UnixStale {
        /// Socket path.
        path: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// The accept thread panicked.
    #[error("listener thread panicked")]
    ThreadPanic,
}
