//! Bidirectional transport of whole JSON values.
//!
//! A [`RawChannel`] moves complete `serde_json::Value`s between two peers. It
//! never blocks on receive unless asked to: [`RawChannel::try_recv`] reports
//! [`Received::Pending`] when nothing is ready, which is what lets a single
//! reactor thread service many connections.
//!
//! Three implementations ship with the crate:
//!
//! - [`StreamChannel`] frames values over any byte stream (stdio, TCP, Unix
//!   sockets) using [`crate::splitter::JsonSplitter`] on a reader thread.
//! - [`PipeChannel`] joins two in-process endpoints with message queues.
//! - [`ArrayChannel`] replays a scripted input and records everything sent.

mod array;
mod pipe;
mod stream;

use serde_json::Value;
use thiserror::Error;

pub use array::ArrayChannel;
pub use pipe::{PipeChannel, pipe_pair};
pub use stream::StreamChannel;

/// Outcome of a non-blocking receive.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    /// A complete value arrived.
    Value(Value),
    /// Nothing is ready yet; the peer may still send more.
    Pending,
    /// The input side has ended and no further values will arrive.
    Closed,
}

/// Errors raised by channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The peer has gone away.
    #[error("channel closed")]
    Closed,
    /// Writing to the underlying stream failed.
    #[error("channel I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// A value could not be encoded.
    #[error("failed to encode JSON value: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A duplex channel carrying whole JSON values.
pub trait RawChannel {
    /// Writes one value, followed by a delimiter where the transport needs one.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] when the value cannot be encoded or the peer
    /// can no longer receive.
    fn send(&mut self, value: &Value) -> Result<(), ChannelError>;

    /// Returns the next value if one is ready without blocking.
    fn try_recv(&mut self) -> Received;

    /// Blocks until a value is ready.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] once the input side has ended.
    fn recv(&mut self) -> Result<Value, ChannelError>;

    /// Pushes buffered output to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Io`] when the underlying stream rejects the flush.
    fn flush(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }
}

impl<T: RawChannel + ?Sized> RawChannel for Box<T> {
    fn send(&mut self, value: &Value) -> Result<(), ChannelError> {
        (**self).send(value)
    }

    fn try_recv(&mut self) -> Received {
        (**self).try_recv()
    }

    fn recv(&mut self) -> Result<Value, ChannelError> {
        (**self).recv()
    }

    fn flush(&mut self) -> Result<(), ChannelError> {
        (**self).flush()
    }
}
