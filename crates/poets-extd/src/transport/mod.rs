//! Socket transport feeding the reactor.
//!
//! The listener accepts TCP or Unix socket connections on a background
//! thread, wraps each one in a `StreamChannel`, and hands it to the reactor
//! over an mpsc channel.

mod errors;
mod handler;
mod listener;

pub use self::errors::ListenerError;
pub(crate) use self::handler::{ChannelForwarder, ConnectionHandler, ConnectionStream};
pub(crate) use self::listener::SocketListener;

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
