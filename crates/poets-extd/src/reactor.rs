//! Single-threaded pump driving every connection of one graph.
//!
//! The reactor owns the [`GraphSimulation`] and all of its connections, so
//! callbacks never race with routing. Each cycle calls `do_events` on every
//! connection until none of them makes progress, then sleeps for the idle
//! back-off before looking for new input.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, TryRecvError};
use std::thread;
use std::time::Duration;

use tracing::debug;

use poets_ext_protocol::channel::RawChannel;
use poets_ext_protocol::connection::{Connection, ConnectionId, DeviceClaims};

use crate::health::HealthReporter;
use crate::simulation::GraphSimulation;

const REACTOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::reactor");

/// Where new connections come from.
#[derive(Debug)]
pub enum Admission<'a, C> {
    /// Only the connections admitted before the loop started. The loop ends
    /// once all of them have closed.
    Fixed,
    /// Connections keep arriving until the stop flag is raised.
    Incoming(&'a Receiver<C>),
}

/// Pumps connections against a shared simulation.
pub struct Reactor<C> {
    simulation: GraphSimulation,
    claims: Arc<DeviceClaims>,
    connections: Vec<Connection<C>>,
    next_id: u64,
    idle_backoff: Duration,
    reporter: Arc<dyn HealthReporter>,
}

impl<C> std::fmt::Debug for Reactor<C> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Reactor")
            .field("simulation", &self.simulation)
            .field("connections", &self.connections.len())
            .field("idle_backoff", &self.idle_backoff)
            .finish_non_exhaustive()
    }
}

impl<C: RawChannel> Reactor<C> {
    /// Starts `simulation` and prepares to serve connections to it.
    #[must_use]
    pub fn new(
        mut simulation: GraphSimulation,
        idle_backoff: Duration,
        reporter: Arc<dyn HealthReporter>,
    ) -> Self {
        simulation.start();
        Self {
            simulation,
            claims: Arc::new(DeviceClaims::new()),
            connections: Vec::new(),
            next_id: 0,
            idle_backoff,
            reporter,
        }
    }

    /// The simulation being served.
    #[must_use]
    pub fn simulation(&self) -> &GraphSimulation {
        &self.simulation
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Adds a connection over `channel`.
    pub fn admit(&mut self, channel: C) -> ConnectionId {
        self.next_id += 1;
        let id = ConnectionId::new(self.next_id);
        self.connections
            .push(Connection::new(id, channel, Arc::clone(&self.claims)));
        self.reporter.connection_opened(id);
        id
    }

    /// Pumps every connection until none makes progress, then drops those
    /// whose channel has closed. Returns whether anything happened.
    pub fn pump(&mut self) -> bool {
        let mut progressed = false;
        loop {
            let mut cycle = false;
            for connection in &mut self.connections {
                while connection.do_events(&mut self.simulation) {
                    cycle = true;
                }
            }
            if !cycle {
                break;
            }
            progressed = true;
        }
        self.reap();
        progressed
    }

    fn reap(&mut self) {
        let reporter = &self.reporter;
        let simulation = &mut self.simulation;
        self.connections.retain(|connection| {
            if connection.is_closed() {
                simulation.detach(connection.id());
                reporter.connection_closed(connection.id(), connection.state());
                false
            } else {
                true
            }
        });
    }

    /// Runs until `stop` is raised or, with [`Admission::Fixed`], until
    /// every connection has closed.
    pub fn run(&mut self, stop: &AtomicBool, admission: &Admission<'_, C>) {
        debug!(target: REACTOR_TARGET, "reactor running");
        while !stop.load(Ordering::SeqCst) {
            let admitted = match admission {
                Admission::Fixed => false,
                Admission::Incoming(incoming) => self.admit_waiting(incoming),
            };
            let progressed = self.pump();
            if matches!(admission, Admission::Fixed) && self.connections.is_empty() {
                break;
            }
            if !progressed && !admitted {
                thread::sleep(self.idle_backoff);
            }
        }
        debug!(
            target: REACTOR_TARGET,
            remaining = self.connections.len(),
            "reactor stopped"
        );
    }

    fn admit_waiting(&mut self, incoming: &Receiver<C>) -> bool {
        let mut admitted = false;
        loop {
            match incoming.try_recv() {
                Ok(channel) => {
                    self.admit(channel);
                    admitted = true;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return admitted,
            }
        }
    }
}
