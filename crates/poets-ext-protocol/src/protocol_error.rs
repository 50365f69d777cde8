use std::fmt;

/// Application-level error codes carried in JSON-RPC error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolError {
    /// The connection has moved into the FINISHED state.
    ConnectionFinished,
    /// The connection has hit an unrecoverable error.
    ConnectionErrored,
    /// A device is unknown, or not available to this connection.
    InvalidDevice,
    /// An endpoint is malformed or does not exist.
    InvalidEndpoint,
    /// An endpoint was used in the wrong direction.
    InvalidDirection,
    /// The requested graph type does not match the running graph.
    GraphTypeMismatch,
    /// The requested graph instance does not match the running graph.
    GraphInstanceMismatch,
    /// The owner passed to `bind` is invalid or unknown.
    InvalidOwner,
    /// The owner cookie passed to `bind` is invalid or unknown.
    InvalidCookie,
}

impl ProtocolError {
    /// Wire code for the error.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::ConnectionFinished => -1,
            Self::ConnectionErrored => -2,
            Self::InvalidDevice => -3,
            Self::InvalidEndpoint => -4,
            Self::InvalidDirection => -5,
            Self::GraphTypeMismatch => -6,
            Self::GraphInstanceMismatch => -7,
            Self::InvalidOwner => -9,
            Self::InvalidCookie => -10,
        }
    }

    /// Looks up an error by wire code.
    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            -1 => Self::ConnectionFinished,
            -2 => Self::ConnectionErrored,
            -3 => Self::InvalidDevice,
            -4 => Self::InvalidEndpoint,
            -5 => Self::InvalidDirection,
            -6 => Self::GraphTypeMismatch,
            -7 => Self::GraphInstanceMismatch,
            -9 => Self::InvalidOwner,
            -10 => Self::InvalidCookie,
            _ => return None,
        })
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ConnectionFinished => "connection finished",
            Self::ConnectionErrored => "connection errored",
            Self::InvalidDevice => "invalid device",
            Self::InvalidEndpoint => "invalid endpoint",
            Self::InvalidDirection => "invalid direction",
            Self::GraphTypeMismatch => "graph type mismatch",
            Self::GraphInstanceMismatch => "graph instance mismatch",
            Self::InvalidOwner => "invalid owner",
            Self::InvalidCookie => "invalid cookie",
        };
        formatter.write_str(text)
    }
}
