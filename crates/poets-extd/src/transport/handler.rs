//! Hand-off of accepted sockets to the reactor.

use std::io::{self, BufWriter, Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::sync::mpsc::Sender;

use tracing::{debug, warn};

use poets_ext_protocol::channel::{ChannelError, StreamChannel};

use super::LISTENER_TARGET;

/// A connected socket of either transport.
#[derive(Debug)]
pub(crate) enum ConnectionStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl ConnectionStream {
    /// Returns independent read and write handles to the same socket.
    pub(crate) fn split(self) -> io::Result<(Self, Self)> {
        match self {
            Self::Tcp(stream) => Ok((Self::Tcp(stream.try_clone()?), Self::Tcp(stream))),
            #[cfg(unix)]
            Self::Unix(stream) => Ok((Self::Unix(stream.try_clone()?), Self::Unix(stream))),
        }
    }
}

impl Read for ConnectionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ConnectionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

/// Receives sockets accepted by the listener thread.
pub(crate) trait ConnectionHandler: Send + Sync + 'static {
    /// Takes ownership of an accepted socket. Must not block.
    fn handle(&self, stream: ConnectionStream);
}

/// Wraps each accepted socket in a [`StreamChannel`] and forwards it to the
/// reactor.
#[derive(Debug)]
pub(crate) struct ChannelForwarder {
    reactor: Sender<StreamChannel>,
}

impl ChannelForwarder {
    pub(crate) fn new(reactor: Sender<StreamChannel>) -> Self {
        Self { reactor }
    }
}

impl ConnectionHandler for ChannelForwarder {
    fn handle(&self, stream: ConnectionStream) {
        let channel = match open_channel(stream) {
            Ok(channel) => channel,
            Err(error) => {
                warn!(target: LISTENER_TARGET, %error, "failed to open connection channel");
                return;
            }
        };
        if self.reactor.send(channel).is_err() {
            debug!(target: LISTENER_TARGET, "reactor stopped; dropping connection");
        }
    }
}

fn open_channel(stream: ConnectionStream) -> Result<StreamChannel, ChannelError> {
    let (reader, writer) = stream.split()?;
    StreamChannel::spawn(reader, BufWriter::new(writer))
}
