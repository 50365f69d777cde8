//! Daemon exposing a simulated POETS graph to external devices.
//!
//! The daemon loads its configuration through [`poets_ext_config`], installs
//! structured telemetry, builds an echo graph and serves the external
//! connection protocol from [`poets_ext_protocol`] over a Unix or TCP socket,
//! or over stdin and stdout when asked to serve a single session.
//!
//! One reactor thread owns the graph and every connection. The listener
//! thread only accepts sockets and hands their channels over, so owner
//! callbacks never run concurrently.

mod bootstrap;
mod echo;
mod health;
mod process;
mod reactor;
mod simulation;
mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use echo::{ECHO_GRAPH_TYPE, echo_graph};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{LaunchError, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_daemon};
pub use reactor::{Admission, Reactor};
pub use simulation::{Emitter, GraphSimulation, ReceiveHook, SimulationError};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::ListenerError;

#[cfg(test)]
mod tests;
