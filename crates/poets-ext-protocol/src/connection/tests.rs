//! Unit tests for the connection state machine.

use std::collections::{BTreeMap, VecDeque};

use mockall::mock;
use rstest::{fixture, rstest};
use serde_json::{Value, json};

use super::*;
use crate::channel::{ArrayChannel, PipeChannel, RawChannel, Received, pipe_pair};
use crate::event::{Halt, MulticastMessage};
use crate::rpc::{INVALID_REQUEST, METHOD_NOT_FOUND};

mock! {
    Owner {}
    impl ConnectionOwner for Owner {
        fn on_connect(
            &mut self,
            connection: ConnectionId,
            request: &BindRequest,
        ) -> Result<BindOutcome, OwnerError>;
        fn on_run(&mut self, connection: ConnectionId) -> Result<bool, OwnerError>;
        fn on_send(
            &mut self,
            connection: ConnectionId,
            messages: Vec<MulticastMessage>,
        ) -> Result<(), OwnerError>;
        fn on_poll(
            &mut self,
            connection: ConnectionId,
            max_events: usize,
        ) -> Result<Vec<Event>, OwnerError>;
        fn on_halt(&mut self, connection: ConnectionId, halt: Halt) -> Result<(), OwnerError>;
    }
}

/// Owner that echoes back a queue of prepared events.
#[derive(Default)]
struct ScriptedOwner {
    received: Vec<MulticastMessage>,
    to_send: VecDeque<Event>,
    enable_run: bool,
}

fn outcome() -> BindOutcome {
    BindOutcome {
        graph_type: "gt0".to_owned(),
        graph_instance: "gi0".to_owned(),
        incoming_edges: BTreeMap::from([(
            "int0:out".parse().expect("src"),
            vec!["ext0:in".parse().expect("dst")],
        )]),
    }
}

impl ConnectionOwner for ScriptedOwner {
    fn on_connect(
        &mut self,
        _connection: ConnectionId,
        _request: &BindRequest,
    ) -> Result<BindOutcome, OwnerError> {
        Ok(outcome())
    }

    fn on_run(&mut self, _connection: ConnectionId) -> Result<bool, OwnerError> {
        Ok(self.enable_run)
    }

    fn on_send(
        &mut self,
        _connection: ConnectionId,
        messages: Vec<MulticastMessage>,
    ) -> Result<(), OwnerError> {
        self.received.extend(messages);
        Ok(())
    }

    fn on_poll(
        &mut self,
        _connection: ConnectionId,
        max_events: usize,
    ) -> Result<Vec<Event>, OwnerError> {
        let take = max_events.min(self.to_send.len());
        Ok(self.to_send.drain(..take).collect())
    }

    fn on_halt(&mut self, _connection: ConnectionId, halt: Halt) -> Result<(), OwnerError> {
        self.to_send.push_back(Event::Halt(halt));
        Ok(())
    }
}

fn message(src: &str, data: Option<Value>) -> MulticastMessage {
    MulticastMessage::new(src.parse().expect("endpoint"), data)
}

fn request(id: &str, method: &str, params: Option<Value>) -> Value {
    let mut value = json!({"jsonrpc": "2.0", "id": id, "method": method});
    if let Some(params) = params {
        value["params"] = params;
    }
    value
}

fn events_of(response: &Value) -> &Vec<Value> {
    response["result"]["events"]
        .as_array()
        .expect("response carries events")
}

struct Session {
    connection: Connection<PipeChannel>,
    client: PipeChannel,
    owner: ScriptedOwner,
}

impl Session {
    fn send(&mut self, id: &str, method: &str, params: Option<Value>) {
        self.client
            .send(&request(id, method, params))
            .expect("client send");
    }

    fn pump(&mut self) {
        while self.connection.do_events(&mut self.owner) {}
    }

    fn response(&mut self) -> Option<Value> {
        match self.client.try_recv() {
            Received::Value(value) => Some(value),
            Received::Pending | Received::Closed => None,
        }
    }

    fn call(&mut self, id: &str, method: &str, params: Option<Value>) -> Value {
        self.send(id, method, params);
        self.pump();
        self.response().expect("response after pump")
    }

    fn running(mut self) -> Self {
        self.owner.enable_run = true;
        self.call("b", "bind", Some(json!({"owned_devices": ["ext0"]})));
        self.call("r", "run", None);
        assert_eq!(self.connection.state(), ConnectionState::Running);
        self
    }
}

#[fixture]
fn session() -> Session {
    let (server_end, client) = pipe_pair();
    Session {
        connection: Connection::new(
            ConnectionId::new(1),
            server_end,
            Arc::new(DeviceClaims::new()),
        ),
        client,
        owner: ScriptedOwner::default(),
    }
}

#[rstest]
fn scripted_session_produces_one_response_per_request() {
    let msg1 = message("ext0:out", None);
    let msg2 = message("ext0:out", Some(json!([10])));
    let msg3 = message("ext0:out", Some(json!([11])));
    let as_json = |msg: &MulticastMessage| Event::Message(msg.clone()).to_json();
    let input = vec![
        request("id0", "bind", Some(json!({"owned_devices": ["ext0"]}))),
        request("id1", "run", None),
        request("id2", "send", Some(json!({"messages": [as_json(&msg1)]}))),
        request(
            "id3",
            "send",
            Some(json!({"messages": [as_json(&msg2), as_json(&msg3)]})),
        ),
        request("id4", "poll", Some(json!({"max_messages": 1}))),
        request("id5", "poll", None),
        request("id6", "poll", None),
        request("id7", "halt", Some(json!({"code": 10}))),
        request("id8", "poll", None),
        request("id9", "poll", None),
    ];
    let mut owner = ScriptedOwner {
        enable_run: true,
        to_send: [&msg1, &msg2, &msg3]
            .into_iter()
            .map(|msg| Event::Message(msg.clone()))
            .collect(),
        ..ScriptedOwner::default()
    };
    let mut connection = Connection::new(
        ConnectionId::new(7),
        ArrayChannel::new(input),
        Arc::new(DeviceClaims::new()),
    );

    while connection.do_events(&mut owner) {}

    let output = connection.channel().output();
    assert_eq!(output.len(), 10);
    assert_eq!(
        output[0]["result"],
        json!({
            "magic": BIND_MAGIC,
            "graph_type": "gt0",
            "graph_instance": "gi0",
            "incoming_edges": {"int0:out": ["ext0:in"]}
        })
    );
    assert_eq!(output[1]["result"], json!({}));
    assert_eq!(owner.received, vec![msg1, msg2, msg3]);
    assert_eq!(events_of(&output[4]).len(), 1);
    assert_eq!(events_of(&output[5]).len(), 2);
    assert_eq!(events_of(&output[6]).len(), 0);
    assert_eq!(output[7]["result"], json!({}));
    assert_eq!(
        events_of(&output[8]),
        &vec![json!({"type": "halt", "code": 10})]
    );
    assert_eq!(
        output[9]["error"]["code"],
        json!(ProtocolError::ConnectionFinished.code())
    );
    assert_eq!(connection.state(), ConnectionState::Finished);
    assert!(connection.is_closed());
}

#[rstest]
fn run_is_parked_until_the_owner_accepts(mut session: Session) {
    session.call("id0", "bind", Some(json!({"owned_devices": ["ext0", "ext1"]})));
    assert_eq!(session.connection.state(), ConnectionState::Bound);
    assert_eq!(session.connection.devices().len(), 2);

    session.send("id1", "run", None);
    session.send("id2", "poll", None);
    session.pump();
    assert_eq!(session.connection.state(), ConnectionState::RunRequested);
    assert!(session.response().is_none());

    session.owner.enable_run = true;
    session.pump();
    let run = session.response().expect("run answered");
    assert_eq!(run["id"], json!("id1"));
    let poll = session.response().expect("queued poll answered after run");
    assert_eq!(poll["id"], json!("id2"));
    assert_eq!(events_of(&poll).len(), 0);
}

#[rstest]
fn async_polls_complete_in_order_and_halt_flushes_the_rest(session: Session) {
    let mut session = session.running();

    session.send("a1", "poll", Some(json!({"async": true, "max_messages": 1})));
    session.pump();
    assert!(session.response().is_none());
    assert_eq!(session.connection.pending_polls(), 1);

    let sent = session.call(
        "s1",
        "send",
        Some(json!({"messages": [{"src": "ext0:out", "data": 1}]})),
    );
    assert_eq!(sent["id"], json!("s1"));

    session
        .owner
        .to_send
        .push_back(Event::Message(message("int0:out", Some(json!(5)))));
    session.pump();
    let first = session.response().expect("async poll answered");
    assert_eq!(first["id"], json!("a1"));
    assert_eq!(events_of(&first), &vec![json!({"src": "int0:out", "data": 5})]);

    session.send("a2", "poll", Some(json!({"async": true, "max_messages": 1})));
    session.send("a3", "poll", Some(json!({"async": true, "max_messages": 1})));
    let halt = session.call("h", "halt", Some(json!({"code": 0})));
    assert_eq!(halt["id"], json!("h"));

    session.pump();
    let with_halt = session.response().expect("first queued poll");
    assert_eq!(with_halt["id"], json!("a2"));
    assert_eq!(events_of(&with_halt), &vec![json!({"type": "halt", "code": 0})]);
    let flushed = session.response().expect("second queued poll");
    assert_eq!(flushed["id"], json!("a3"));
    assert!(events_of(&flushed).is_empty());
    assert_eq!(session.connection.state(), ConnectionState::Finished);
    assert_eq!(session.connection.pending_polls(), 0);
}

#[rstest]
fn synchronous_poll_lets_queued_polls_go_first(session: Session) {
    let mut session = session.running();
    session.send("a1", "poll", Some(json!({"async": true})));
    session.pump();
    session
        .owner
        .to_send
        .push_back(Event::Message(message("int0:out", None)));

    session.send("s1", "poll", None);
    session.pump();

    let first = session.response().expect("queued poll");
    assert_eq!(first["id"], json!("a1"));
    assert_eq!(events_of(&first).len(), 1);
    let second = session.response().expect("sync poll");
    assert_eq!(second["id"], json!("s1"));
    assert!(events_of(&second).is_empty());
}

#[rstest]
fn synchronous_poll_after_flush_receives_an_empty_batch(session: Session) {
    let mut session = session.running();
    session.send("a1", "poll", Some(json!({"async": true})));
    session.pump();
    session.owner.to_send.push_back(Event::Halt(Halt::new(3, None)));

    session.send("s1", "poll", None);
    session.pump();

    let queued = session.response().expect("queued poll");
    assert_eq!(queued["id"], json!("a1"));
    assert_eq!(events_of(&queued), &vec![json!({"type": "halt", "code": 3})]);
    let sync = session.response().expect("sync poll");
    assert_eq!(sync["id"], json!("s1"));
    assert!(events_of(&sync).is_empty());
    assert_eq!(session.connection.state(), ConnectionState::Finished);
}

#[rstest]
#[case("poll", json!({"max_messages": 0}), INVALID_PARAMS)]
#[case("send", json!({"messages": [{"type": "halt", "code": 1}]}), INVALID_PARAMS)]
#[case("send", json!({"messages": [{"src": "ext0"}]}), ProtocolError::InvalidEndpoint.code())]
#[case("halt", json!({"message": "no code"}), INVALID_PARAMS)]
fn bad_params_leave_the_state_unchanged(
    session: Session,
    #[case] method: &str,
    #[case] params: Value,
    #[case] code: i64,
) {
    let mut session = session.running();
    let response = session.call("x", method, Some(params));
    assert_eq!(response["error"]["code"], json!(code));
    assert_eq!(session.connection.state(), ConnectionState::Running);
    assert!(session.owner.received.is_empty());
}

#[rstest]
fn methods_outside_their_state_are_unavailable(mut session: Session) {
    let early = session.call("r0", "run", None);
    assert_eq!(early["error"]["code"], json!(METHOD_UNAVAILABLE));
    assert_eq!(session.connection.state(), ConnectionState::Connected);

    let unknown = session.call("u0", "teleport", None);
    assert_eq!(unknown["error"]["code"], json!(METHOD_NOT_FOUND));

    let mut session = session.running();
    session.call("h1", "halt", Some(json!({"code": 1})));
    let second_halt = session.call("h2", "halt", Some(json!({"code": 2})));
    assert_eq!(second_halt["error"]["code"], json!(METHOD_UNAVAILABLE));
    assert_eq!(session.connection.state(), ConnectionState::HaltRequested);
}

#[rstest]
fn malformed_envelopes_do_not_disturb_the_connection(mut session: Session) {
    session.client.send(&json!([1, 2, 3])).expect("send");
    session.pump();
    let response = session.response().expect("rejection");
    assert_eq!(response["id"], Value::Null);
    assert_eq!(response["error"]["code"], json!(INVALID_REQUEST));
    assert_eq!(session.connection.state(), ConnectionState::Connected);
}

#[rstest]
fn notifications_drive_the_machine_silently(mut session: Session) {
    session.owner.enable_run = true;
    session.call("b", "bind", Some(json!({"owned_devices": ["ext0"]})));
    session
        .client
        .send(&json!({"jsonrpc": "2.0", "method": "run"}))
        .expect("send");
    session.pump();
    assert_eq!(session.connection.state(), ConnectionState::Running);
    assert!(session.response().is_none());
}

#[rstest]
fn closed_input_reports_no_progress(session: Session) {
    let Session {
        mut connection,
        client,
        mut owner,
    } = session;
    drop(client);
    assert!(!connection.do_events(&mut owner));
    assert!(connection.is_closed());
    assert_eq!(connection.state(), ConnectionState::Connected);
}

#[rstest]
fn owner_refusal_errors_the_connection_for_good() {
    let mut owner = MockOwner::new();
    owner.expect_on_connect().once().returning(|_, _| {
        Err(OwnerError::new(
            ProtocolError::GraphTypeMismatch,
            "graph type mismatch",
        ))
    });
    let channel = ArrayChannel::new([
        request("id0", "bind", Some(json!({"graph_type": "other"}))),
        request("id1", "run", None),
        request("id2", "poll", None),
    ]);
    let mut connection =
        Connection::new(ConnectionId::new(1), channel, Arc::new(DeviceClaims::new()));

    while connection.do_events(&mut owner) {}

    let output = connection.channel().output();
    assert_eq!(connection.state(), ConnectionState::Errored);
    assert_eq!(output[0]["error"]["code"], json!(-6));
    assert_eq!(output[1]["error"]["code"], json!(-2));
    assert_eq!(output[2]["error"]["code"], json!(-2));
}

#[rstest]
fn poll_failure_errors_pending_polls_too(session: Session) {
    let mut session = session.running();
    session.send("a1", "poll", Some(json!({"async": true})));
    session.pump();

    let mut owner = MockOwner::new();
    owner.expect_on_poll().returning(|_, _| {
        Err(OwnerError::new(ProtocolError::InvalidDevice, "device vanished"))
    });
    session
        .client
        .send(&request("s1", "poll", None))
        .expect("send");
    while session.connection.do_events(&mut owner) {}

    let queued = session.response().expect("queued poll answered");
    assert_eq!(queued["id"], json!("a1"));
    assert_eq!(queued["error"]["code"], json!(-3));
    let sync = session.response().expect("sync poll answered");
    assert_eq!(sync["id"], json!("s1"));
    assert_eq!(sync["error"]["code"], json!(-2));
    assert_eq!(session.connection.state(), ConnectionState::Errored);
}

#[rstest]
fn overlapping_binds_are_refused_before_the_owner_sees_them() {
    let claims = Arc::new(DeviceClaims::new());
    let bind =
        |id: &str, devices: Value| request(id, "bind", Some(json!({"owned_devices": devices})));
    let mut first = Connection::new(
        ConnectionId::new(1),
        ArrayChannel::new([bind("a", json!(["ext0", "ext1"]))]),
        Arc::clone(&claims),
    );
    let mut second = Connection::new(
        ConnectionId::new(2),
        ArrayChannel::new([bind("b", json!(["ext1"]))]),
        Arc::clone(&claims),
    );
    let mut owner = MockOwner::new();
    owner
        .expect_on_connect()
        .once()
        .returning(|_, _| Ok(outcome()));

    assert!(first.do_events(&mut owner));
    assert!(second.do_events(&mut owner));

    assert_eq!(first.state(), ConnectionState::Bound);
    assert_eq!(second.state(), ConnectionState::Errored);
    assert_eq!(
        second.channel().output()[0]["error"]["code"],
        json!(ProtocolError::InvalidDevice.code())
    );
    assert_eq!(claims.holder("ext1"), Some(ConnectionId::new(1)));
}

#[rstest]
fn refused_bind_releases_its_claims() {
    let claims = Arc::new(DeviceClaims::new());
    let mut connection = Connection::new(
        ConnectionId::new(1),
        ArrayChannel::new([request(
            "a",
            "bind",
            Some(json!({"owned_devices": ["ext0"], "owner_cookie": "c"})),
        )]),
        Arc::clone(&claims),
    );
    let mut owner = MockOwner::new();
    owner
        .expect_on_connect()
        .once()
        .returning(|_, _| Err(OwnerError::new(ProtocolError::InvalidCookie, "no cookies")));

    assert!(connection.do_events(&mut owner));

    assert_eq!(connection.state(), ConnectionState::Errored);
    assert_eq!(claims.holder("ext0"), None);
}
