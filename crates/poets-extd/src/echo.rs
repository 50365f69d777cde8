//! The echo application served by the daemon.
//!
//! `echo_graph(n)` builds `n` pairs of devices. External `extN` feeds
//! internal `intN`, which repeats every payload back to `extN`:
//!
//! ```text
//! extN:out -> intN:in
//! intN:out -> extN:in
//! ```

use tracing::warn;

use poets_ext_protocol::event::Endpoint;

use crate::simulation::{GraphSimulation, SimulationError};

const ECHO_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::echo");

/// Graph type reported by the echo application.
pub const ECHO_GRAPH_TYPE: &str = "echo";

/// Builds an unstarted echo graph with `count` device pairs.
///
/// # Errors
///
/// Returns [`SimulationError`] if the generated wiring is rejected.
pub fn echo_graph(count: u32) -> Result<GraphSimulation, SimulationError> {
    let mut graph = GraphSimulation::new(ECHO_GRAPH_TYPE, format!("echo_{count}"));
    for index in 0..count {
        let internal = format!("int{index}");
        let external = format!("ext{index}");
        graph.add_internal(&internal, |_dst, message, emitter| {
            if let Err(error) = emitter.multicast("out", message.data.clone()) {
                warn!(target: ECHO_TARGET, device = emitter.device(), %error, "echo failed");
            }
        })?;
        graph.add_external(&external)?;
        graph.add_route(Endpoint::new(&internal, "in")?, Endpoint::new(&external, "out")?)?;
        graph.add_route(Endpoint::new(&external, "in")?, Endpoint::new(&internal, "out")?)?;
    }
    Ok(graph)
}
