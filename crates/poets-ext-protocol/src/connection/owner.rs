use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ConnectionId;
use crate::event::{Endpoint, Event, Halt, MulticastMessage};
use crate::protocol_error::ProtocolError;

/// Failure reported by a [`ConnectionOwner`] callback.
///
/// The failing call is answered with `code` and `message`, and the
/// connection becomes ERRORED.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct OwnerError {
    /// Protocol error code sent to the client.
    pub code: ProtocolError,
    /// Human-readable explanation sent to the client.
    pub message: String,
}

impl OwnerError {
    /// Creates an owner error.
    #[must_use]
    pub fn new(code: ProtocolError, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Parameters of a `bind` call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BindRequest {
    /// Claimed owner; defaults to `"user"`.
    #[serde(default = "default_owner")]
    pub owner: String,
    /// Optional cookie proving ownership.
    #[serde(default)]
    pub owner_cookie: Option<String>,
    /// Graph type to attach to; `"*"` matches any.
    #[serde(default = "wildcard")]
    pub graph_type: String,
    /// Graph instance to attach to; `"*"` matches any.
    #[serde(default = "wildcard")]
    pub graph_instance: String,
    /// External devices the client takes ownership of.
    #[serde(default)]
    pub owned_devices: BTreeSet<String>,
}

fn default_owner() -> String {
    "user".to_owned()
}

fn wildcard() -> String {
    "*".to_owned()
}

/// Successful result of [`ConnectionOwner::on_connect`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindOutcome {
    /// Graph type actually attached to.
    pub graph_type: String,
    /// Graph instance actually attached to.
    pub graph_instance: String,
    /// For each source endpoint, the owned input endpoints it feeds.
    pub incoming_edges: BTreeMap<Endpoint, Vec<Endpoint>>,
}

/// Callbacks through which a connection consults the graph it serves.
///
/// Every callback names the connection it acts for, so one owner can serve
/// many connections.
pub trait ConnectionOwner {
    /// Validates a bind and describes the wiring seen by the owned devices.
    ///
    /// # Errors
    ///
    /// Returns [`OwnerError`] when the bind is refused.
    fn on_connect(
        &mut self,
        connection: ConnectionId,
        request: &BindRequest,
    ) -> Result<BindOutcome, OwnerError>;

    /// Returns `true` once the graph is ready to run.
    ///
    /// Re-invoked on every scheduling opportunity until it returns `true`.
    ///
    /// # Errors
    ///
    /// Returns [`OwnerError`] when the run can never be granted.
    fn on_run(&mut self, connection: ConnectionId) -> Result<bool, OwnerError>;

    /// Accepts a batch of messages from the connection's devices.
    ///
    /// # Errors
    ///
    /// Returns [`OwnerError`] when any message is refused.
    fn on_send(
        &mut self,
        connection: ConnectionId,
        messages: Vec<MulticastMessage>,
    ) -> Result<(), OwnerError>;

    /// Returns at most `max_events` events for the connection, possibly none.
    ///
    /// # Errors
    ///
    /// Returns [`OwnerError`] when events cannot be produced.
    fn on_poll(
        &mut self,
        connection: ConnectionId,
        max_events: usize,
    ) -> Result<Vec<Event>, OwnerError>;

    /// Records a halt request from the client.
    ///
    /// # Errors
    ///
    /// Returns [`OwnerError`] when the halt is refused.
    fn on_halt(&mut self, connection: ConnectionId, halt: Halt) -> Result<(), OwnerError>;
}

impl<T: ConnectionOwner + ?Sized> ConnectionOwner for &mut T {
    fn on_connect(
        &mut self,
        connection: ConnectionId,
        request: &BindRequest,
    ) -> Result<BindOutcome, OwnerError> {
        (**self).on_connect(connection, request)
    }

    fn on_run(&mut self, connection: ConnectionId) -> Result<bool, OwnerError> {
        (**self).on_run(connection)
    }

    fn on_send(
        &mut self,
        connection: ConnectionId,
        messages: Vec<MulticastMessage>,
    ) -> Result<(), OwnerError> {
        (**self).on_send(connection, messages)
    }

    fn on_poll(
        &mut self,
        connection: ConnectionId,
        max_events: usize,
    ) -> Result<Vec<Event>, OwnerError> {
        (**self).on_poll(connection, max_events)
    }

    fn on_halt(&mut self, connection: ConnectionId, halt: Halt) -> Result<(), OwnerError> {
        (**self).on_halt(connection, halt)
    }
}
