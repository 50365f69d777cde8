//! Channel framing JSON values over a byte stream.

use std::io::{ErrorKind, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvError, SyncSender, TryRecvError};
use std::thread;

use serde_json::Value;
use tracing::{debug, warn};

use super::{ChannelError, RawChannel, Received};
use crate::splitter::JsonSplitter;

const READ_CHUNK: usize = 4096;
const QUEUE_DEPTH: usize = 64;
const CHANNEL_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::channel");

/// Channel over a readable and a writable byte stream.
///
/// Input is drained by a background thread that splits the bytes into JSON
/// values and queues them, so [`RawChannel::try_recv`] never blocks on I/O.
/// Truncated or malformed input is logged and reported as end-of-stream.
pub struct StreamChannel {
    incoming: Receiver<Value>,
    writer: Box<dyn Write + Send>,
    flush_on_send: bool,
}

impl std::fmt::Debug for StreamChannel {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("StreamChannel")
            .field("flush_on_send", &self.flush_on_send)
            .finish_non_exhaustive()
    }
}

impl StreamChannel {
    /// Starts reading `reader` on a background thread and writes to `writer`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Io`] when the reader thread cannot be spawned.
    pub fn spawn<R, W>(reader: R, writer: W) -> Result<Self, ChannelError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let (sender, incoming) = mpsc::sync_channel(QUEUE_DEPTH);
        thread::Builder::new()
            .name("poets-ext-reader".to_owned())
            .spawn(move || pump_reader(reader, &sender))?;
        Ok(Self {
            incoming,
            writer: Box::new(writer),
            flush_on_send: true,
        })
    }

    /// Controls whether every send is followed by a flush. Defaults to `true`.
    #[must_use]
    pub fn with_flush_on_send(mut self, flush_on_send: bool) -> Self {
        self.flush_on_send = flush_on_send;
        self
    }
}

fn pump_reader<R: Read>(mut reader: R, sender: &SyncSender<Value>) {
    let mut splitter = JsonSplitter::new();
    let mut buffer = vec![0_u8; READ_CHUNK];
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(error) => {
                warn!(target: CHANNEL_TARGET, %error, "stream read failed; treating as closed");
                return;
            }
        };
        let Some(chunk) = buffer.get(..read) else {
            return;
        };
        let values = match splitter.push(chunk) {
            Ok(values) => values,
            Err(error) => {
                warn!(target: CHANNEL_TARGET, %error, "malformed input; treating as closed");
                return;
            }
        };
        for value in values {
            if sender.send(value).is_err() {
                debug!(target: CHANNEL_TARGET, "channel dropped; reader exiting");
                return;
            }
        }
        if let Some(error) = splitter.take_error() {
            warn!(target: CHANNEL_TARGET, %error, "malformed input; treating as closed");
            return;
        }
    }
    if splitter.in_progress() {
        warn!(target: CHANNEL_TARGET, "stream ended part-way through a value");
    } else {
        debug!(target: CHANNEL_TARGET, "stream reached end of input");
    }
}

impl RawChannel for StreamChannel {
    fn send(&mut self, value: &Value) -> Result<(), ChannelError> {
        serde_json::to_writer(&mut self.writer, value)?;
        self.writer.write_all(b"\n")?;
        if self.flush_on_send {
            self.writer.flush()?;
        }
        Ok(())
    }

    fn try_recv(&mut self) -> Received {
        match self.incoming.try_recv() {
            Ok(value) => Received::Value(value),
            Err(TryRecvError::Empty) => Received::Pending,
            Err(TryRecvError::Disconnected) => Received::Closed,
        }
    }

    fn recv(&mut self) -> Result<Value, ChannelError> {
        self.incoming
            .recv()
            .map_err(|RecvError| ChannelError::Closed)
    }

    fn flush(&mut self) -> Result<(), ChannelError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("buffer lock").extend_from_slice(bytes);
            Ok(bytes.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[rstest]
    fn receives_concatenated_values_then_closes() {
        let input = Cursor::new(br#"{"a":1} [2]{"b":"}"}"#.to_vec());
        let mut channel = StreamChannel::spawn(input, std::io::sink()).expect("spawn channel");

        assert_eq!(channel.recv().expect("first"), json!({"a": 1}));
        assert_eq!(channel.recv().expect("second"), json!([2]));
        assert_eq!(channel.recv().expect("third"), json!({"b": "}"}));
        assert!(matches!(channel.recv(), Err(ChannelError::Closed)));
        assert_eq!(channel.try_recv(), Received::Closed);
    }

    #[rstest]
    #[case(br#"{"a":1} {"truncated"#.as_slice())]
    #[case(br#"{"a":1} 17 {"b":2}"#.as_slice())]
    fn bad_input_ends_the_stream_after_good_values(#[case] input: &'static [u8]) {
        let mut channel =
            StreamChannel::spawn(Cursor::new(input), std::io::sink()).expect("spawn channel");

        assert_eq!(channel.recv().expect("first"), json!({"a": 1}));
        assert!(matches!(channel.recv(), Err(ChannelError::Closed)));
    }

    #[rstest]
    fn sends_newline_delimited_values() {
        let buffer = SharedBuffer::default();
        let mut channel =
            StreamChannel::spawn(Cursor::new(Vec::new()), buffer.clone()).expect("spawn channel");

        channel.send(&json!({"x": 1})).expect("send first");
        channel.send(&json!([true])).expect("send second");

        let written = String::from_utf8(buffer.0.lock().expect("lock").clone()).expect("utf8");
        assert_eq!(written, "{\"x\":1}\n[true]\n");
    }
}
