//! Small graphs exercising routing shapes the echo application lacks.

use poets_ext_protocol::event::Endpoint;

use crate::simulation::GraphSimulation;

fn endpoint(text: &str) -> Endpoint {
    text.parse().expect("valid endpoint")
}

/// `extA` and `extB` both feed `int0`, which answers both of them.
pub fn join_graph() -> GraphSimulation {
    let mut graph = GraphSimulation::new("join", "join_1");
    graph
        .add_internal("int0", |_dst, message, emitter| {
            emitter
                .multicast("out", message.data.clone())
                .expect("int0:out is a valid endpoint");
        })
        .expect("add int0");
    for external in ["extA", "extB"] {
        graph.add_external(external).expect("add external");
        graph
            .add_route(endpoint("int0:in"), endpoint(&format!("{external}:out")))
            .expect("wire into int0");
        graph
            .add_route(endpoint(&format!("{external}:in")), endpoint("int0:out"))
            .expect("wire out of int0");
    }
    graph
}

/// `ext0` feeds both `extA` and `extB` directly.
pub fn fork_graph() -> GraphSimulation {
    let mut graph = GraphSimulation::new("fork", "fork_1");
    for external in ["ext0", "extA", "extB"] {
        graph.add_external(external).expect("add external");
    }
    for dst in ["extA:in", "extB:in"] {
        graph
            .add_route(endpoint(dst), endpoint("ext0:out"))
            .expect("wire fork");
    }
    graph
}
