//! Test harness utilities for the daemon behavioural suites.

mod config_loader;
mod graphs;
mod reporter;
mod served_graph;

pub use config_loader::{FailingConfigLoader, TestConfigLoader};
pub use graphs::{fork_graph, join_graph};
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use served_graph::ServedGraph;
