use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};

use crate::rpc::{RequestId, RpcMethod};

/// Lifecycle of a server-side connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// Waiting for `bind`.
    Connected,
    /// Bound to devices; waiting for `run`.
    Bound,
    /// `run` received; waiting for the owner to accept it.
    RunRequested,
    /// Exchanging events.
    Running,
    /// `halt` acknowledged; the halt event has not been delivered yet.
    HaltRequested,
    /// A halt event has been delivered. Terminal.
    Finished,
    /// An owner callback failed. Terminal.
    Errored,
}

impl ConnectionState {
    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Errored)
    }

    /// Methods a client may invoke in this state.
    #[must_use]
    pub fn allowed_methods(self) -> &'static [Method] {
        match self {
            Self::Connected => &[Method::Bind],
            Self::Bound => &[Method::Run],
            Self::Running => &[Method::Poll, Method::Send, Method::Halt],
            Self::HaltRequested => &[Method::Poll],
            Self::RunRequested | Self::Finished | Self::Errored => &[],
        }
    }
}

/// Methods of the external-connection protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Method {
    /// Claim devices and learn the graph's wiring.
    Bind,
    /// Wait for the graph to start.
    Run,
    /// Inject messages from owned devices.
    Send,
    /// Collect events destined for owned devices.
    Poll,
    /// Ask the graph to stop.
    Halt,
}

impl RpcMethod for Method {
    fn parse(name: &str) -> Option<Self> {
        name.parse().ok()
    }

    fn name(&self) -> &'static str {
        self.into()
    }
}

/// Identifies a connection to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "conn-{}", self.0)
    }
}

/// An asynchronous poll waiting for events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPoll {
    /// Id of the poll request; `None` when it was a notification.
    pub id: Option<RequestId>,
    /// Largest batch the client will accept.
    pub max_events: usize,
}
