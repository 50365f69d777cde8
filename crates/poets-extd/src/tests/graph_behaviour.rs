//! Behavioural tests for graphs served to external clients.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::json;

use poets_ext_protocol::channel::PipeChannel;
use poets_ext_protocol::client::{BindOptions, ClientError, ClientState, UpwardConnection};
use poets_ext_protocol::event::{Endpoint, Event, Halt, MulticastMessage};
use poets_ext_protocol::rpc::ClientProxy;

use crate::echo::echo_graph;
use crate::health::StructuredHealthReporter;

use super::support::{ServedGraph, fork_graph, join_graph};

type Client = UpwardConnection<PipeChannel>;

/// Scenario world: one served graph and its named clients.
#[derive(Default)]
struct GraphWorld {
    graph: Option<ServedGraph>,
    clients: BTreeMap<String, Client>,
    polled: BTreeMap<String, Vec<Event>>,
    sent: u32,
}

impl GraphWorld {
    fn client(&mut self, name: &str) -> &mut Client {
        self.clients
            .get_mut(name)
            .unwrap_or_else(|| panic!("no client called {name}"))
    }

    fn polled(&self, name: &str) -> &[Event] {
        self.polled.get(name).map(Vec::as_slice).unwrap_or_default()
    }
}

fn strip_quotes(value: &str) -> &str {
    value.trim_matches('"')
}

fn names(list: &str) -> Vec<String> {
    strip_quotes(list)
        .split(',')
        .map(|name| name.trim().to_owned())
        .collect()
}

fn endpoint(text: &str) -> Endpoint {
    strip_quotes(text).parse().expect("endpoint")
}

#[fixture]
fn world() -> RefCell<GraphWorld> {
    RefCell::new(GraphWorld::default())
}

#[given("the {kind} graph is being served")]
fn given_served(world: &RefCell<GraphWorld>, kind: String) {
    let simulation = match strip_quotes(&kind) {
        "echo" => echo_graph(1).expect("echo graph"),
        "join" => join_graph(),
        "fork" => fork_graph(),
        other => panic!("unknown graph kind {other}"),
    };
    world.borrow_mut().graph = Some(ServedGraph::start(
        simulation,
        Arc::new(StructuredHealthReporter::new()),
    ));
}

#[given("client {name} has bound {devices}")]
fn given_bound(world: &RefCell<GraphWorld>, name: String, devices: String) {
    let mut world = world.borrow_mut();
    let mut client = world
        .graph
        .as_ref()
        .expect("graph is served")
        .connect();
    client
        .bind(names(&devices), &BindOptions::default())
        .expect("bind");
    assert_eq!(client.state(), ClientState::Bound);
    world.clients.insert(strip_quotes(&name).to_owned(), client);
}

#[when("clients {clients} start the graph")]
fn when_run(world: &RefCell<GraphWorld>, clients: String) {
    let mut world = world.borrow_mut();
    let mut starting: Vec<(String, Client)> = names(&clients)
        .into_iter()
        .map(|name| {
            let client = world
                .clients
                .remove(&name)
                .unwrap_or_else(|| panic!("no client called {name}"));
            (name, client)
        })
        .collect();

    // `run` blocks until every external is claimed, so all clients ask at once.
    let outcomes: Vec<Result<(), ClientError>> = thread::scope(|scope| {
        let handles: Vec<_> = starting
            .iter_mut()
            .map(|(_, client)| scope.spawn(move || client.run()))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("run thread"))
            .collect()
    });
    for outcome in outcomes {
        outcome.expect("run");
    }
    world.clients.extend(starting);
}

#[when("client {name} sends from {src}")]
fn when_send(world: &RefCell<GraphWorld>, name: String, src: String) {
    let mut world = world.borrow_mut();
    world.sent += 1;
    let payload = json!({"seq": world.sent});
    let message = MulticastMessage::new(endpoint(&src), Some(payload));
    world
        .client(strip_quotes(&name))
        .send(&[message])
        .expect("send");
}

#[when("client {name} polls")]
fn when_poll(world: &RefCell<GraphWorld>, name: String) {
    let mut world = world.borrow_mut();
    let name = strip_quotes(&name).to_owned();
    let events = world.client(&name).poll(None).expect("poll");
    world.polled.insert(name, events);
}

#[when("client {name} halts with code {code}")]
fn when_halt(world: &RefCell<GraphWorld>, name: String, code: i64) {
    world
        .borrow_mut()
        .client(strip_quotes(&name))
        .halt(code, None)
        .expect("halt");
}

#[then("client {name} received 1 message from {src}")]
fn then_received_one(world: &RefCell<GraphWorld>, name: String, src: String) {
    assert_received(&world.borrow(), &name, 1, &src);
}

#[then("client {name} received {count} messages from {src}")]
fn then_received(world: &RefCell<GraphWorld>, name: String, count: usize, src: String) {
    assert_received(&world.borrow(), &name, count, &src);
}

fn assert_received(world: &GraphWorld, name: &str, count: usize, src: &str) {
    let polled = world.polled(strip_quotes(name));
    let src = endpoint(src);
    assert_eq!(polled.len(), count, "polled: {polled:?}");
    assert!(
        polled
            .iter()
            .all(|event| matches!(event, Event::Message(message) if message.src == src)),
        "every event should come from {src}: {polled:?}"
    );
}

#[then("client {name} received a halt with code {code}")]
fn then_halted(world: &RefCell<GraphWorld>, name: String, code: i64) {
    let mut world = world.borrow_mut();
    let name = strip_quotes(&name).to_owned();
    assert_eq!(world.polled(&name), [Event::Halt(Halt::new(code, None))]);
    assert_eq!(world.client(&name).state(), ClientState::Finished);
}

#[then("a further poll by client {name} is refused with code {code}")]
fn then_poll_refused(world: &RefCell<GraphWorld>, name: String, code: i64) {
    let client = world
        .borrow_mut()
        .clients
        .remove(strip_quotes(&name))
        .expect("client exists");
    // A finished client refuses locally, so ask through a bare proxy.
    let mut proxy = ClientProxy::new(client.into_channel());
    let error = proxy
        .call("poll", Some(json!({})))
        .expect_err("poll after halt should fail");
    assert_eq!(error.code, Some(code), "error: {error}");
}

#[then("client {name} saw {src} arrive once at each of {destinations}")]
fn then_forked(world: &RefCell<GraphWorld>, name: String, src: String, destinations: String) {
    let mut world = world.borrow_mut();
    let name = strip_quotes(&name).to_owned();
    let src = endpoint(&src);
    let expected: Vec<Endpoint> = names(&destinations)
        .iter()
        .map(|text| endpoint(text))
        .collect();

    let edges = world.client(&name).incoming_edges().clone();
    assert_eq!(edges.get(&src), Some(&expected));

    let mut arrivals: BTreeMap<Endpoint, usize> = BTreeMap::new();
    for event in world.polled(&name) {
        let Event::Message(message) = event else {
            panic!("unexpected event {event:?}");
        };
        for dst in edges.get(&message.src).into_iter().flatten() {
            *arrivals.entry(dst.clone()).or_default() += 1;
        }
    }
    let expected_arrivals: BTreeMap<Endpoint, usize> =
        expected.into_iter().map(|dst| (dst, 1)).collect();
    assert_eq!(arrivals, expected_arrivals);
}

#[scenario(path = "tests/features/graph_scenarios.feature")]
fn graph_scenarios(#[from(world)] world: RefCell<GraphWorld>) {
    drop(world);
}
