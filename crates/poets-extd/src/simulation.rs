//! In-process graph simulation answering connection callbacks.
//!
//! [`GraphSimulation`] stands in for a hardware graph instance. Internal
//! devices run as receive hooks on the reactor thread; external devices are
//! claimed by client connections through `bind`. Every emitted message is
//! routed with a [`RoutingTable`]: local destinations run their hook at once,
//! and each subscribed connection gets one copy queued for its next poll.
//!
//! Hooks never call back into the simulation. They push follow-up messages
//! into an [`Emitter`], and the simulation drains those through a work queue
//! so a chain of internal devices cannot recurse.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use poets_ext_protocol::ProtocolError;
use poets_ext_protocol::connection::{
    BindOutcome, BindRequest, ConnectionId, ConnectionOwner, OwnerError,
};
use poets_ext_protocol::event::{Endpoint, EndpointParseError, Event, Halt, MulticastMessage};
use poets_ext_protocol::router::{Delivery, RouterError, RoutingTable};

const SIMULATION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::simulation");

/// Callback run when a message arrives at an internal device's input port.
pub type ReceiveHook = Box<dyn FnMut(&Endpoint, &MulticastMessage, &mut Emitter) + Send>;

/// Errors raised by [`GraphSimulation`] outside the protocol callbacks.
#[derive(Debug, Error)]
pub enum SimulationError {
    /// Building or querying the wiring failed.
    #[error(transparent)]
    Routing(#[from] RouterError),
    /// A device or port name could not form an endpoint.
    #[error(transparent)]
    Endpoint(#[from] EndpointParseError),
    /// Only internal devices may inject messages directly.
    #[error("device '{0}' is not simulated locally")]
    NotLocal(String),
}

enum Emission {
    Multicast(MulticastMessage),
    Unicast {
        dst: Endpoint,
        message: MulticastMessage,
    },
}

/// Collects the messages a receive hook emits.
pub struct Emitter {
    device: String,
    emissions: Vec<Emission>,
}

impl Emitter {
    fn new(device: &str) -> Self {
        Self {
            device: device.to_owned(),
            emissions: Vec::new(),
        }
    }

    /// Device the hook is running for.
    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Multicasts `data` from `port` on this device along every wired edge.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointParseError`] when `port` is not a valid port name.
    pub fn multicast(&mut self, port: &str, data: Option<Value>) -> Result<(), EndpointParseError> {
        let src = Endpoint::new(&self.device, port)?;
        self.emissions
            .push(Emission::Multicast(MulticastMessage::new(src, data)));
        Ok(())
    }

    /// Sends `data` from `port` on this device to `dst` alone, ignoring the
    /// wiring.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointParseError`] when `port` is not a valid port name.
    pub fn unicast(
        &mut self,
        dst: Endpoint,
        port: &str,
        data: Option<Value>,
    ) -> Result<(), EndpointParseError> {
        let src = Endpoint::new(&self.device, port)?;
        self.emissions.push(Emission::Unicast {
            dst,
            message: MulticastMessage::new(src, data),
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Subscriber {
    outgoing: VecDeque<MulticastMessage>,
    halt_delivered: bool,
}

/// A simulated graph instance serving any number of connections.
pub struct GraphSimulation {
    graph_type: String,
    graph_instance: String,
    table: RoutingTable<ConnectionId>,
    hooks: HashMap<String, ReceiveHook>,
    subscribers: BTreeMap<ConnectionId, Subscriber>,
    detached: BTreeSet<ConnectionId>,
    connected: BTreeSet<String>,
    halt: Option<Halt>,
}

impl fmt::Debug for GraphSimulation {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("GraphSimulation")
            .field("graph_type", &self.graph_type)
            .field("graph_instance", &self.graph_instance)
            .field("connected", &self.connected)
            .field("halt", &self.halt)
            .finish_non_exhaustive()
    }
}

impl GraphSimulation {
    /// Creates an empty graph instance.
    #[must_use]
    pub fn new(graph_type: impl Into<String>, graph_instance: impl Into<String>) -> Self {
        Self {
            graph_type: graph_type.into(),
            graph_instance: graph_instance.into(),
            table: RoutingTable::new(),
            hooks: HashMap::new(),
            subscribers: BTreeMap::new(),
            detached: BTreeSet::new(),
            connected: BTreeSet::new(),
            halt: None,
        }
    }

    /// Graph type reported to clients.
    #[must_use]
    pub fn graph_type(&self) -> &str {
        &self.graph_type
    }

    /// Graph instance reported to clients.
    #[must_use]
    pub fn graph_instance(&self) -> &str {
        &self.graph_instance
    }

    /// Adds an internal device whose inputs are handled by `hook`.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError`] once running or when the name is taken.
    pub fn add_internal<F>(&mut self, device: &str, hook: F) -> Result<(), RouterError>
    where
        F: FnMut(&Endpoint, &MulticastMessage, &mut Emitter) + Send + 'static,
    {
        self.table.add_local(device)?;
        self.hooks.insert(device.to_owned(), Box::new(hook));
        Ok(())
    }

    /// Adds a device that a connection must claim with `bind`.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError`] once running or when the name is taken.
    pub fn add_external(&mut self, device: &str) -> Result<(), RouterError> {
        self.table.add_external(device)
    }

    /// Wires `src` to feed `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError`] once running or when either device is unknown.
    pub fn add_route(&mut self, dst: Endpoint, src: Endpoint) -> Result<(), RouterError> {
        self.table.add_edge(dst, src)
    }

    /// Fixes the wiring. Devices and routes can no longer be added.
    pub fn start(&mut self) {
        if !self.table.is_frozen() {
            info!(
                target: SIMULATION_TARGET,
                graph_type = %self.graph_type,
                graph_instance = %self.graph_instance,
                externals = self.table.externals().count(),
                "graph running"
            );
        }
        self.table.freeze();
    }

    /// Whether [`GraphSimulation::start`] has been called.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.table.is_frozen()
    }

    /// The halt requested by the first connection to call `halt`.
    #[must_use]
    pub fn halt(&self) -> Option<&Halt> {
        self.halt.as_ref()
    }

    /// Messages waiting for `connection`'s next poll.
    #[must_use]
    pub fn queued(&self, connection: ConnectionId) -> usize {
        self.subscribers
            .get(&connection)
            .map_or(0, |subscriber| subscriber.outgoing.len())
    }

    /// Forgets the queue of a connection whose channel has closed.
    ///
    /// The devices it bound stay claimed; messages routed to them afterwards
    /// are dropped.
    pub fn detach(&mut self, connection: ConnectionId) {
        if let Some(subscriber) = self.subscribers.remove(&connection) {
            debug!(
                target: SIMULATION_TARGET,
                %connection,
                discarded = subscriber.outgoing.len(),
                "subscriber detached"
            );
            self.detached.insert(connection);
        }
    }

    /// Multicasts a message from an internal device.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::NotLocal`] unless the source device is
    /// internal.
    pub fn inject(&mut self, message: MulticastMessage) -> Result<(), SimulationError> {
        if !self.table.is_local(message.src.device()) {
            return Err(SimulationError::NotLocal(message.src.device().to_owned()));
        }
        self.route(Emission::Multicast(message));
        Ok(())
    }

    fn route(&mut self, first: Emission) {
        let mut pending = VecDeque::from([first]);
        while let Some(emission) = pending.pop_front() {
            match emission {
                Emission::Multicast(message) => {
                    let fanout = self.table.route(&message.src);
                    for dst in &fanout.local {
                        self.receive(dst, &message, &mut pending);
                    }
                    for subscriber in fanout.external {
                        self.post(subscriber, message.clone());
                    }
                }
                Emission::Unicast { dst, message } => match self.table.route_unicast(&dst) {
                    Ok(Delivery::Local) => self.receive(&dst, &message, &mut pending),
                    Ok(Delivery::External(subscriber)) => self.post(subscriber, message),
                    Ok(Delivery::Unclaimed) => {
                        warn!(
                            target: SIMULATION_TARGET,
                            %dst,
                            "dropping message to unclaimed device"
                        );
                    }
                    Err(error) => {
                        warn!(
                            target: SIMULATION_TARGET,
                            %dst,
                            %error,
                            "dropping undeliverable message"
                        );
                    }
                },
            }
        }
    }

    fn receive(
        &mut self,
        dst: &Endpoint,
        message: &MulticastMessage,
        pending: &mut VecDeque<Emission>,
    ) {
        let Some(hook) = self.hooks.get_mut(dst.device()) else {
            warn!(target: SIMULATION_TARGET, %dst, "no receive hook for local device");
            return;
        };
        let mut emitter = Emitter::new(dst.device());
        hook(dst, message, &mut emitter);
        pending.extend(emitter.emissions);
    }

    fn post(&mut self, connection: ConnectionId, message: MulticastMessage) {
        match self.subscribers.get_mut(&connection) {
            Some(subscriber) => subscriber.outgoing.push_back(message),
            None if self.detached.contains(&connection) => {
                debug!(
                    target: SIMULATION_TARGET,
                    %connection,
                    "dropping message to detached subscriber"
                );
            }
            None => warn!(target: SIMULATION_TARGET, %connection, "no queue for subscriber"),
        }
    }
}

fn wildcard_or_equal(requested: &str, actual: &str) -> bool {
    requested == "*" || requested == actual
}

impl ConnectionOwner for GraphSimulation {
    fn on_connect(
        &mut self,
        connection: ConnectionId,
        request: &BindRequest,
    ) -> Result<BindOutcome, OwnerError> {
        if request.owner_cookie.is_some() {
            return Err(OwnerError::new(
                ProtocolError::InvalidCookie,
                "owner cookies are not supported",
            ));
        }
        if !wildcard_or_equal(&request.graph_type, &self.graph_type) {
            return Err(OwnerError::new(
                ProtocolError::GraphTypeMismatch,
                format!("graph type is '{}', not '{}'", self.graph_type, request.graph_type),
            ));
        }
        if !wildcard_or_equal(&request.graph_instance, &self.graph_instance) {
            return Err(OwnerError::new(
                ProtocolError::GraphInstanceMismatch,
                format!(
                    "graph instance is '{}', not '{}'",
                    self.graph_instance, request.graph_instance
                ),
            ));
        }
        for device in &request.owned_devices {
            if !self.table.is_external(device) {
                return Err(OwnerError::new(
                    ProtocolError::InvalidDevice,
                    format!("no external device called {device}"),
                ));
            }
            if self.connected.contains(device) {
                return Err(OwnerError::new(
                    ProtocolError::InvalidDevice,
                    format!("a connection has already bound to external {device}"),
                ));
            }
        }

        let incoming_edges = self
            .table
            .subscribe(connection, &request.owned_devices)
            .map_err(|error| OwnerError::new(ProtocolError::InvalidDevice, error.to_string()))?;
        self.subscribers.entry(connection).or_default();
        self.connected.extend(request.owned_devices.iter().cloned());
        info!(
            target: SIMULATION_TARGET,
            %connection,
            owner = %request.owner,
            devices = ?request.owned_devices,
            "externals bound"
        );
        Ok(BindOutcome {
            graph_type: self.graph_type.clone(),
            graph_instance: self.graph_instance.clone(),
            incoming_edges,
        })
    }

    fn on_run(&mut self, _connection: ConnectionId) -> Result<bool, OwnerError> {
        Ok(self.connected.len() == self.table.externals().count())
    }

    fn on_send(
        &mut self,
        connection: ConnectionId,
        messages: Vec<MulticastMessage>,
    ) -> Result<(), OwnerError> {
        for message in &messages {
            let device = message.src.device();
            if self.table.owner(device) != Some(connection) {
                return Err(OwnerError::new(
                    ProtocolError::InvalidDevice,
                    format!("connection does not own device {device}"),
                ));
            }
            if !self.table.is_routed(&message.src) {
                return Err(OwnerError::new(
                    ProtocolError::InvalidEndpoint,
                    format!("endpoint {} has no outgoing edges", message.src),
                ));
            }
        }
        debug!(target: SIMULATION_TARGET, %connection, count = messages.len(), "routing batch");
        for message in messages {
            self.route(Emission::Multicast(message));
        }
        Ok(())
    }

    fn on_poll(
        &mut self,
        connection: ConnectionId,
        max_events: usize,
    ) -> Result<Vec<Event>, OwnerError> {
        let halt = self.halt.clone();
        let Some(subscriber) = self.subscribers.get_mut(&connection) else {
            return Err(OwnerError::new(
                ProtocolError::InvalidOwner,
                format!("{connection} has not bound any devices"),
            ));
        };
        let take = max_events.min(subscriber.outgoing.len());
        let mut events: Vec<Event> = subscriber
            .outgoing
            .drain(..take)
            .map(Event::Message)
            .collect();
        if let Some(halt) = halt
            && !subscriber.halt_delivered
            && events.len() < max_events
        {
            subscriber.halt_delivered = true;
            events.push(Event::Halt(halt));
        }
        Ok(events)
    }

    fn on_halt(&mut self, connection: ConnectionId, halt: Halt) -> Result<(), OwnerError> {
        if self.halt.is_some() {
            debug!(
                target: SIMULATION_TARGET,
                %connection,
                code = halt.code,
                "graph already halting"
            );
            return Ok(());
        }
        info!(target: SIMULATION_TARGET, %connection, code = halt.code, "graph halting");
        self.halt = Some(halt);
        Ok(())
    }
}
