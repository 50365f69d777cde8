//! Client side of the external-connection protocol.
//!
//! [`UpwardConnection`] wraps a [`ClientProxy`] and tracks the client's view
//! of the session so calls made out of order fail locally instead of being
//! sent. After `halt` the client stays RUNNING and keeps polling until the
//! halt event arrives.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use serde_json::{Map, Value, json};
use strum::Display;
use thiserror::Error;
use tracing::debug;

use crate::channel::RawChannel;
use crate::event::{Endpoint, Event, MulticastMessage, contains_halt};
use crate::rpc::{ClientProxy, RpcError};

const CLIENT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::client");

/// Client-side session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientState {
    /// Not yet bound.
    Connected,
    /// Bound; `run` not yet granted.
    Bound,
    /// Exchanging events.
    Running,
    /// A halt event has been received.
    Finished,
    /// A call failed. Terminal.
    Errored,
}

/// Errors raised by [`UpwardConnection`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The call is not legal in the client's current state.
    #[error("cannot call {method} while {state}")]
    WrongState {
        /// Method attempted.
        method: &'static str,
        /// State at the time of the call.
        state: ClientState,
    },
    /// The server or transport rejected the call.
    #[error(transparent)]
    Rpc(#[from] RpcError),
    /// The server's result did not have the expected shape.
    #[error("malformed {method} result: {reason}")]
    Malformed {
        /// Method whose result was malformed.
        method: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

/// Optional `bind` parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindOptions {
    /// Owner name; `"user"` unless set.
    pub owner: String,
    /// Cookie proving ownership.
    pub owner_cookie: Option<String>,
    /// Graph type to attach to; `"*"` matches any.
    pub graph_type: String,
    /// Graph instance to attach to; `"*"` matches any.
    pub graph_instance: String,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self {
            owner: "user".to_owned(),
            owner_cookie: None,
            graph_type: "*".to_owned(),
            graph_instance: "*".to_owned(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BindReply {
    graph_type: String,
    graph_instance: String,
    #[serde(default)]
    incoming_edges: BTreeMap<Endpoint, Vec<Endpoint>>,
}

#[derive(Debug, Deserialize)]
struct PollReply {
    events: Vec<Event>,
}

/// A client session with a graph.
#[derive(Debug)]
pub struct UpwardConnection<C> {
    proxy: ClientProxy<C>,
    state: ClientState,
    devices: BTreeSet<String>,
    graph: Option<(String, String)>,
    incoming_edges: BTreeMap<Endpoint, Vec<Endpoint>>,
}

impl<C: RawChannel> UpwardConnection<C> {
    /// Starts a session over `channel`.
    #[must_use]
    pub fn new(channel: C) -> Self {
        Self {
            proxy: ClientProxy::new(channel),
            state: ClientState::Connected,
            devices: BTreeSet::new(),
            graph: None,
            incoming_edges: BTreeMap::new(),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Devices owned after a successful bind.
    #[must_use]
    pub fn devices(&self) -> &BTreeSet<String> {
        &self.devices
    }

    /// Graph type reported by the server.
    #[must_use]
    pub fn graph_type(&self) -> Option<&str> {
        self.graph.as_ref().map(|(graph_type, _)| graph_type.as_str())
    }

    /// Graph instance reported by the server.
    #[must_use]
    pub fn graph_instance(&self) -> Option<&str> {
        self.graph.as_ref().map(|(_, instance)| instance.as_str())
    }

    /// For each source, the owned input endpoints it feeds.
    #[must_use]
    pub fn incoming_edges(&self) -> &BTreeMap<Endpoint, Vec<Endpoint>> {
        &self.incoming_edges
    }

    /// Claims `owned_devices` and learns how they are wired.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::WrongState`] unless CONNECTED, and any server
    /// or transport failure, after which the client is ERRORED.
    pub fn bind<I, S>(&mut self, owned_devices: I, options: &BindOptions) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expect_state("bind", ClientState::Connected)?;
        let devices: BTreeSet<String> = owned_devices.into_iter().map(Into::into).collect();
        let params = json!({
            "owner": options.owner,
            "owner_cookie": options.owner_cookie,
            "graph_type": options.graph_type,
            "graph_instance": options.graph_instance,
            "owned_devices": devices,
        });
        let result = self.call("bind", Some(params))?;
        let reply: BindReply = self.decode("bind", result)?;
        self.devices = devices;
        self.graph = Some((reply.graph_type, reply.graph_instance));
        self.incoming_edges = reply.incoming_edges;
        self.enter(ClientState::Bound);
        Ok(())
    }

    /// Blocks until the server lets the graph run.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::WrongState`] unless BOUND, and any server or
    /// transport failure.
    pub fn run(&mut self) -> Result<(), ClientError> {
        self.expect_state("run", ClientState::Bound)?;
        self.call("run", None)?;
        self.enter(ClientState::Running);
        Ok(())
    }

    /// Sends messages from owned devices.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::WrongState`] unless RUNNING, and any server or
    /// transport failure.
    pub fn send(&mut self, messages: &[MulticastMessage]) -> Result<(), ClientError> {
        self.expect_state("send", ClientState::Running)?;
        let messages: Vec<Value> = messages
            .iter()
            .map(|message| Event::Message(message.clone()).to_json())
            .collect();
        self.call("send", Some(json!({ "messages": messages })))?;
        Ok(())
    }

    /// Collects pending events, at most `max_events` when given.
    ///
    /// The client becomes FINISHED when the batch contains a halt.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::WrongState`] unless RUNNING, and any server or
    /// transport failure.
    pub fn poll(&mut self, max_events: Option<usize>) -> Result<Vec<Event>, ClientError> {
        self.expect_state("poll", ClientState::Running)?;
        let mut params = Map::new();
        if let Some(max) = max_events {
            params.insert("max_events".to_owned(), Value::from(max));
        }
        let result = self.call("poll", Some(Value::Object(params)))?;
        let reply: PollReply = self.decode("poll", result)?;
        if contains_halt(&reply.events) {
            self.enter(ClientState::Finished);
        }
        Ok(reply.events)
    }

    /// Asks the graph to halt.
    ///
    /// The halt event itself arrives later through [`UpwardConnection::poll`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::WrongState`] unless RUNNING, and any server or
    /// transport failure.
    pub fn halt(&mut self, code: i64, message: Option<&str>) -> Result<(), ClientError> {
        self.expect_state("halt", ClientState::Running)?;
        let mut params = Map::new();
        params.insert("code".to_owned(), Value::from(code));
        if let Some(text) = message {
            params.insert("message".to_owned(), Value::from(text));
        }
        self.call("halt", Some(Value::Object(params)))?;
        Ok(())
    }

    /// Ends the session and returns the channel.
    #[must_use]
    pub fn into_channel(self) -> C {
        self.proxy.into_channel()
    }

    fn expect_state(&self, method: &'static str, wanted: ClientState) -> Result<(), ClientError> {
        if self.state == wanted {
            Ok(())
        } else {
            Err(ClientError::WrongState {
                method,
                state: self.state,
            })
        }
    }

    fn call(&mut self, method: &'static str, params: Option<Value>) -> Result<Value, ClientError> {
        self.proxy.call(method, params).map_err(|error| {
            self.enter(ClientState::Errored);
            ClientError::Rpc(error)
        })
    }

    fn decode<T: for<'de> Deserialize<'de>>(
        &mut self,
        method: &'static str,
        result: Value,
    ) -> Result<T, ClientError> {
        serde_json::from_value(result).map_err(|error| {
            self.enter(ClientState::Errored);
            ClientError::Malformed {
                method,
                reason: error.to_string(),
            }
        })
    }

    fn enter(&mut self, next: ClientState) {
        debug!(target: CLIENT_TARGET, from = %self.state, to = %next, "client state");
        self.state = next;
    }
}
