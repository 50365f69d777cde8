//! Test suites for the daemon bootstrap and graph serving.

mod graph_behaviour;
mod support;
