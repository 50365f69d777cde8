//! Server-side connection state machine.
//!
//! A [`Connection`] drives one client through `bind`, `run`, the exchange of
//! events, and `halt`. It owns the [`ServerPull`] for the client's channel and
//! consults a [`ConnectionOwner`] for everything graph-specific. Each call to
//! [`Connection::do_events`] performs at most one transition's worth of work
//! and never blocks, so a single thread can pump many connections.
//!
//! Polling follows two rules. Asynchronous polls are queued and answered
//! strictly in submission order once the owner has events for them. The
//! moment any delivered batch contains a halt, every other queued poll is
//! completed with an empty batch and the connection becomes FINISHED.

mod claims;
mod owner;
mod params;
mod state;

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, error, warn};

pub use claims::{ClaimConflict, DeviceClaims};
pub use owner::{BindOutcome, BindRequest, ConnectionOwner, OwnerError};
pub use state::{ConnectionId, ConnectionState, Method, PendingPoll};

use self::params::SendRejection;
use crate::channel::RawChannel;
use crate::event::{Event, contains_halt};
use crate::protocol_error::ProtocolError;
use crate::rpc::{
    DispatchError, INVALID_PARAMS, IncomingCall, METHOD_UNAVAILABLE, Pulled, RequestId, ServerPull,
};

const CONNECTION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::connection");
const ERRORED_MESSAGE: &str = "connection has encountered an unrecoverable error";

/// Marker returned in every successful `bind` result.
pub const BIND_MAGIC: &str = "POETS-external-JSON-server";

/// One client attached to a graph instance.
#[derive(Debug)]
pub struct Connection<C> {
    id: ConnectionId,
    dispatcher: ServerPull<C>,
    claims: Arc<DeviceClaims>,
    state: ConnectionState,
    devices: BTreeSet<String>,
    binding: Option<BindOutcome>,
    run_request: Option<RequestId>,
    pending_polls: VecDeque<PendingPoll>,
    closed: bool,
}

type Step = Result<bool, DispatchError>;

impl<C: RawChannel> Connection<C> {
    /// Creates a connection in the CONNECTED state.
    ///
    /// `claims` must be shared by every connection of the same graph
    /// instance so that no device is bound twice.
    #[must_use]
    pub fn new(id: ConnectionId, channel: C, claims: Arc<DeviceClaims>) -> Self {
        Self {
            id,
            dispatcher: ServerPull::new(channel),
            claims,
            state: ConnectionState::Connected,
            devices: BTreeSet::new(),
            binding: None,
            run_request: None,
            pending_polls: VecDeque::new(),
            closed: false,
        }
    }

    /// Identifier passed to the owner.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Devices claimed by a successful bind.
    #[must_use]
    pub fn devices(&self) -> &BTreeSet<String> {
        &self.devices
    }

    /// Result of the successful bind, if any.
    #[must_use]
    pub fn binding(&self) -> Option<&BindOutcome> {
        self.binding.as_ref()
    }

    /// Number of asynchronous polls awaiting events.
    #[must_use]
    pub fn pending_polls(&self) -> usize {
        self.pending_polls.len()
    }

    /// Whether the channel has ended or can no longer be written.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Borrows the underlying channel.
    #[must_use]
    pub fn channel(&self) -> &C {
        self.dispatcher.channel()
    }

    /// Performs any work that is ready and reports whether progress was made.
    ///
    /// Returns `false` when nothing could be done without new input or a
    /// change in the owner. A closed or failing channel is reported as no
    /// progress and flagged through [`Connection::is_closed`].
    pub fn do_events<O: ConnectionOwner + ?Sized>(&mut self, owner: &mut O) -> bool {
        match self.step(owner) {
            Ok(progress) => progress,
            Err(DispatchError::Channel(error)) => {
                warn!(
                    target: CONNECTION_TARGET,
                    connection = %self.id,
                    %error,
                    "channel failed; connection closed"
                );
                self.closed = true;
                false
            }
            Err(DispatchError::UnknownRequest(id)) => {
                error!(
                    target: CONNECTION_TARGET,
                    connection = %self.id,
                    %id,
                    "answered a request that was not in flight"
                );
                self.transition(ConnectionState::Errored);
                false
            }
        }
    }

    fn step<O: ConnectionOwner + ?Sized>(&mut self, owner: &mut O) -> Step {
        match self.state {
            ConnectionState::Connected => self.step_connected(owner),
            ConnectionState::Bound => self.step_bound(),
            ConnectionState::RunRequested => self.step_run_requested(owner),
            ConnectionState::Running | ConnectionState::HaltRequested => {
                self.step_active(owner)
            }
            ConnectionState::Finished => self.step_terminal(
                ProtocolError::ConnectionFinished,
                "connection has finished due to halt",
            ),
            ConnectionState::Errored => self.step_terminal(
                ProtocolError::ConnectionErrored,
                ERRORED_MESSAGE,
            ),
        }
    }

    fn pull(&mut self) -> Result<Option<IncomingCall<Method>>, DispatchError> {
        let allowed = self.state.allowed_methods();
        let restrict = (!self.state.is_terminal()).then_some(allowed);
        match self.dispatcher.try_begin(restrict, false)? {
            Pulled::Call(call) => Ok(Some(call)),
            Pulled::Pending => Ok(None),
            Pulled::Closed => {
                if !self.closed {
                    debug!(target: CONNECTION_TARGET, connection = %self.id, "input closed");
                }
                self.closed = true;
                Ok(None)
            }
        }
    }

    fn step_connected<O: ConnectionOwner + ?Sized>(&mut self, owner: &mut O) -> Step {
        let Some(IncomingCall { id, params, .. }) = self.pull()? else {
            return Ok(false);
        };
        let request: BindRequest = match serde_json::from_value(params) {
            Ok(request) => request,
            Err(error) => return self.reject_params(id.as_ref(), &error.to_string()),
        };

        if let Err(conflict) = self.claims.claim(self.id, &request.owned_devices) {
            let refusal = OwnerError::new(ProtocolError::InvalidDevice, conflict.to_string());
            return self.fail(id.as_ref(), &refusal);
        }
        let outcome = match owner.on_connect(self.id, &request) {
            Ok(outcome) => outcome,
            Err(refusal) => {
                self.claims.release(self.id);
                return self.fail(id.as_ref(), &refusal);
            }
        };

        self.dispatcher.complete(
            id.as_ref(),
            json!({
                "magic": BIND_MAGIC,
                "graph_type": outcome.graph_type,
                "graph_instance": outcome.graph_instance,
                "incoming_edges": outcome.incoming_edges,
            }),
        )?;
        self.devices = request.owned_devices;
        self.binding = Some(outcome);
        self.transition(ConnectionState::Bound);
        Ok(true)
    }

    fn step_bound(&mut self) -> Step {
        let Some(call) = self.pull()? else {
            return Ok(false);
        };
        self.run_request = call.id;
        self.transition(ConnectionState::RunRequested);
        Ok(true)
    }

    fn step_run_requested<O: ConnectionOwner + ?Sized>(&mut self, owner: &mut O) -> Step {
        match owner.on_run(self.id) {
            Ok(false) => Ok(false),
            Ok(true) => {
                let id = self.run_request.take();
                self.dispatcher.complete(id.as_ref(), json!({}))?;
                self.transition(ConnectionState::Running);
                Ok(true)
            }
            Err(refusal) => {
                let id = self.run_request.take();
                self.fail(id.as_ref(), &refusal)
            }
        }
    }

    fn step_active<O: ConnectionOwner + ?Sized>(&mut self, owner: &mut O) -> Step {
        let Some(IncomingCall { method, id, params }) = self.pull()? else {
            return self.serve_queued_poll(owner);
        };
        match method {
            Method::Poll => self.handle_poll(owner, id, params),
            Method::Send => self.handle_send(owner, id.as_ref(), params),
            Method::Halt => self.handle_halt(owner, id.as_ref(), params),
            Method::Bind | Method::Run => {
                self.dispatcher.error(
                    id.as_ref(),
                    METHOD_UNAVAILABLE,
                    "method is not currently available",
                )?;
                Ok(true)
            }
        }
    }

    fn step_terminal(&mut self, code: ProtocolError, message: &str) -> Step {
        let Some(call) = self.pull()? else {
            return Ok(false);
        };
        self.dispatcher.error(call.id.as_ref(), code.code(), message)?;
        Ok(true)
    }

    fn handle_poll<O: ConnectionOwner + ?Sized>(
        &mut self,
        owner: &mut O,
        id: Option<RequestId>,
        params: Value,
    ) -> Step {
        let request = match params::poll(params) {
            Ok(request) => request,
            Err(reason) => return self.reject_params(id.as_ref(), &reason),
        };
        if request.asynchronous {
            self.pending_polls.push_back(PendingPoll {
                id,
                max_events: request.max_events,
            });
            return Ok(true);
        }

        // Earlier asynchronous polls see events before this one does.
        while self.serve_queued_poll(owner)? {}
        match self.state {
            ConnectionState::Finished => {
                self.dispatcher.complete(id.as_ref(), json!({"events": []}))?;
                return Ok(true);
            }
            ConnectionState::Errored => {
                let code = ProtocolError::ConnectionErrored;
                self.dispatcher.error(id.as_ref(), code.code(), ERRORED_MESSAGE)?;
                return Ok(true);
            }
            _ => {}
        }

        match owner.on_poll(self.id, request.max_events) {
            Ok(events) => {
                self.deliver(id.as_ref(), events)?;
                Ok(true)
            }
            Err(refusal) => self.fail(id.as_ref(), &refusal),
        }
    }

    fn handle_send<O: ConnectionOwner + ?Sized>(
        &mut self,
        owner: &mut O,
        id: Option<&RequestId>,
        params: Value,
    ) -> Step {
        let messages = match params::send(params) {
            Ok(messages) => messages,
            Err(SendRejection::Params(reason)) => return self.reject_params(id, &reason),
            Err(SendRejection::Endpoint(reason)) => {
                warn!(target: CONNECTION_TARGET, connection = %self.id, %reason, "send refused");
                self.dispatcher
                    .error(id, ProtocolError::InvalidEndpoint.code(), &reason)?;
                return Ok(true);
            }
        };
        match owner.on_send(self.id, messages) {
            Ok(()) => {
                self.dispatcher.complete(id, json!({}))?;
                Ok(true)
            }
            Err(refusal) => self.fail(id, &refusal),
        }
    }

    fn handle_halt<O: ConnectionOwner + ?Sized>(
        &mut self,
        owner: &mut O,
        id: Option<&RequestId>,
        params: Value,
    ) -> Step {
        let halt = match params::halt(params) {
            Ok(halt) => halt,
            Err(reason) => return self.reject_params(id, &reason),
        };
        match owner.on_halt(self.id, halt) {
            Ok(()) => {
                self.transition(ConnectionState::HaltRequested);
                self.dispatcher.complete(id, json!({}))?;
                Ok(true)
            }
            Err(refusal) => self.fail(id, &refusal),
        }
    }

    /// Answers the oldest queued poll if the owner has events for it.
    fn serve_queued_poll<O: ConnectionOwner + ?Sized>(&mut self, owner: &mut O) -> Step {
        let Some(max_events) = self.pending_polls.front().map(|poll| poll.max_events) else {
            return Ok(false);
        };
        let result = owner.on_poll(self.id, max_events);
        match result {
            Ok(events) if events.is_empty() => Ok(false),
            Ok(events) => {
                let Some(poll) = self.pending_polls.pop_front() else {
                    return Ok(false);
                };
                self.deliver(poll.id.as_ref(), events)?;
                Ok(true)
            }
            Err(refusal) => {
                let id = self.pending_polls.pop_front().and_then(|poll| poll.id);
                self.fail(id.as_ref(), &refusal)
            }
        }
    }

    fn deliver(&mut self, id: Option<&RequestId>, events: Vec<Event>) -> Result<(), DispatchError> {
        let halted = contains_halt(&events);
        debug!(
            target: CONNECTION_TARGET,
            connection = %self.id,
            count = events.len(),
            halted,
            "delivering events"
        );
        self.dispatcher.complete(id, json!({"events": events}))?;
        if halted {
            for poll in std::mem::take(&mut self.pending_polls) {
                self.dispatcher
                    .complete(poll.id.as_ref(), json!({"events": []}))?;
            }
            self.transition(ConnectionState::Finished);
        }
        Ok(())
    }

    fn reject_params(&mut self, id: Option<&RequestId>, reason: &str) -> Step {
        warn!(target: CONNECTION_TARGET, connection = %self.id, %reason, "invalid params");
        self.dispatcher.error(id, INVALID_PARAMS, reason)?;
        Ok(true)
    }

    /// Answers `id` with the owner's refusal and enters ERRORED.
    fn fail(&mut self, id: Option<&RequestId>, refusal: &OwnerError) -> Step {
        warn!(
            target: CONNECTION_TARGET,
            connection = %self.id,
            code = refusal.code.code(),
            error = %refusal,
            "owner refused call"
        );
        self.transition(ConnectionState::Errored);
        self.dispatcher
            .error(id, refusal.code.code(), &refusal.message)?;
        let abandoned = ProtocolError::ConnectionErrored;
        for poll in std::mem::take(&mut self.pending_polls) {
            self.dispatcher.error(
                poll.id.as_ref(),
                abandoned.code(),
                ERRORED_MESSAGE,
            )?;
        }
        Ok(true)
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!(
            target: CONNECTION_TARGET,
            connection = %self.id,
            from = %self.state,
            to = %next,
            "state transition"
        );
        self.state = next;
    }
}

#[cfg(test)]
mod tests;
