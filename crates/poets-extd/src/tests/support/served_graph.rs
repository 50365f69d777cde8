//! A graph served by a reactor on a background thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use poets_ext_protocol::channel::{PipeChannel, pipe_pair};
use poets_ext_protocol::client::UpwardConnection;

use crate::health::HealthReporter;
use crate::reactor::{Admission, Reactor};
use crate::simulation::GraphSimulation;

/// Runs a reactor until dropped; clients attach over in-process pipes.
pub struct ServedGraph {
    incoming: Sender<PipeChannel>,
    stop: Arc<AtomicBool>,
    reactor: Option<JoinHandle<()>>,
}

impl ServedGraph {
    pub fn start(simulation: GraphSimulation, reporter: Arc<dyn HealthReporter>) -> Self {
        let (incoming, receiver) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let reactor = thread::spawn(move || {
            let mut reactor = Reactor::new(simulation, Duration::from_millis(1), reporter);
            reactor.run(&thread_stop, &Admission::Incoming(&receiver));
        });
        Self {
            incoming,
            stop,
            reactor: Some(reactor),
        }
    }

    /// Opens a new client session with the graph.
    pub fn connect(&self) -> UpwardConnection<PipeChannel> {
        let (server_end, client_end) = pipe_pair();
        self.incoming
            .send(server_end)
            .expect("reactor accepts connections");
        UpwardConnection::new(client_end)
    }
}

impl Drop for ServedGraph {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(reactor) = self.reactor.take() {
            let _ = reactor.join();
        }
    }
}
