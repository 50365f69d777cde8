use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

use serde_json::Value;

use super::{ChannelError, RawChannel, Received};

/// One end of an in-process duplex channel.
///
/// Values sent on one end arrive, in order, on the other. Dropping an end
/// closes the peer's input once its queue drains.
#[derive(Debug)]
pub struct PipeChannel {
    outgoing: Sender<Value>,
    incoming: Receiver<Value>,
}

/// Creates a connected pair of pipe endpoints.
#[must_use]
pub fn pipe_pair() -> (PipeChannel, PipeChannel) {
    let (left_tx, right_rx) = mpsc::channel();
    let (right_tx, left_rx) = mpsc::channel();
    (
        PipeChannel {
            outgoing: left_tx,
            incoming: left_rx,
        },
        PipeChannel {
            outgoing: right_tx,
            incoming: right_rx,
        },
    )
}

impl RawChannel for PipeChannel {
    fn send(&mut self, value: &Value) -> Result<(), ChannelError> {
        self.outgoing
            .send(value.clone())
            .map_err(|_| ChannelError::Closed)
    }

    fn try_recv(&mut self) -> Received {
        match self.incoming.try_recv() {
            Ok(value) => Received::Value(value),
            Err(TryRecvError::Empty) => Received::Pending,
            Err(TryRecvError::Disconnected) => Received::Closed,
        }
    }

    fn recv(&mut self) -> Result<Value, ChannelError> {
        self.incoming.recv().map_err(|_| ChannelError::Closed)
    }
}
