//! Supervises daemon launch and the serving loop.

use std::io::{self, BufWriter, Write};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc;
use std::time::Duration;

use tracing::info;

use poets_ext_protocol::channel::StreamChannel;

use crate::bootstrap::{ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::reactor::{Admission, Reactor};
use crate::simulation::GraphSimulation;
use crate::transport::{ChannelForwarder, SocketListener};

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};

/// Runs the daemon using the production collaborators.
///
/// # Errors
///
/// Returns [`LaunchError`] when bootstrap, signal handling or the
/// transport fails.
pub fn run_daemon() -> Result<(), LaunchError> {
    let reporter: Arc<dyn HealthReporter> = Arc::new(StructuredHealthReporter::new());
    run_daemon_with(&SystemConfigLoader, reporter, &SystemShutdownSignal::new())
}

/// Runs the daemon with injected collaborators.
pub(crate) fn run_daemon_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    shutdown: &dyn ShutdownSignal,
) -> Result<(), LaunchError> {
    let daemon = bootstrap_with(loader, reporter)?;
    let stop = shutdown.install()?;
    let (config, simulation, reporter) = daemon.into_parts();

    if config.stdio() {
        info!(target: PROCESS_TARGET, "serving one connection over stdio");
        return serve_stdio(simulation, config.idle_backoff(), reporter, &stop);
    }

    let listener = match SocketListener::bind(config.listen()) {
        Ok(listener) => listener,
        Err(error) => {
            reporter.listener_failed(&error);
            return Err(error.into());
        }
    };
    serve_socket(listener, simulation, config.idle_backoff(), reporter, &stop)
}

/// Serves a single session over stdin and stdout, returning once the input
/// ends or `stop` is raised.
fn serve_stdio(
    simulation: GraphSimulation,
    idle_backoff: Duration,
    reporter: Arc<dyn HealthReporter>,
    stop: &AtomicBool,
) -> Result<(), LaunchError> {
    let channel = StreamChannel::spawn(io::stdin(), BufWriter::new(io::stdout()))
        .map_err(|source| LaunchError::Stdio { source })?;
    let mut reactor = Reactor::new(simulation, idle_backoff, reporter);
    reactor.admit(channel);
    reactor.run(stop, &Admission::Fixed);
    io::stdout()
        .flush()
        .map_err(|source| LaunchError::Flush { source })?;
    info!(target: PROCESS_TARGET, "stdio session ended");
    Ok(())
}

/// Accepts connections on `listener` until `stop` is raised.
pub(crate) fn serve_socket(
    listener: SocketListener,
    simulation: GraphSimulation,
    idle_backoff: Duration,
    reporter: Arc<dyn HealthReporter>,
    stop: &AtomicBool,
) -> Result<(), LaunchError> {
    if let Some(addr) = listener.local_addr() {
        info!(target: PROCESS_TARGET, %addr, "accepting TCP connections");
    }
    let (sender, incoming) = mpsc::channel();
    let handle = match listener.start(Arc::new(ChannelForwarder::new(sender))) {
        Ok(handle) => handle,
        Err(error) => {
            reporter.listener_failed(&error);
            return Err(error.into());
        }
    };

    let mut reactor = Reactor::new(simulation, idle_backoff, reporter);
    reactor.run(stop, &Admission::Incoming(&incoming));

    handle.shutdown();
    handle.join()?;
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    Ok(())
}
