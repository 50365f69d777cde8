//! External-connection protocol for POETS application graphs.
//!
//! Clients outside a running graph attach to it over a JSON-RPC 2.0 control
//! channel and take ownership of the graph's external devices. Through the
//! connection they inject messages from those devices and collect the
//! messages the graph routes to them, until a halt ends the session.
//!
//! The crate is layered bottom-up:
//!
//! - [`splitter`] recovers whole JSON values from an unframed byte stream.
//! - [`channel`] moves those values over streams, in-process pipes or
//!   scripted arrays without blocking the caller.
//! - [`rpc`] correlates requests with responses and screens malformed,
//!   duplicate or disallowed requests.
//! - [`event`] defines endpoints, multicast messages and the terminal halt.
//! - [`connection`] is the server-side state machine driven by
//!   [`connection::Connection::do_events`] against a
//!   [`connection::ConnectionOwner`].
//! - [`client`] is the matching client session.
//! - [`router`] holds the static wiring used to deliver emitted messages.

pub mod channel;
pub mod client;
pub mod connection;
pub mod event;
mod protocol_error;
pub mod router;
pub mod rpc;
pub mod splitter;

pub use protocol_error::ProtocolError;

#[cfg(test)]
mod tests;
