//! Socket abstraction under the live channel.

use crate::error::ChannelError;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One thing a transport can report.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportMessage {
    /// The handshake completed.
    Opened,
    /// A text frame arrived.
    Frame(String),
    /// The connection ended (server close, network error, failed handshake).
    Closed(ChannelError),
}

/// A reconnectable message source.
///
/// `connect` starts a handshake and returns immediately; completion is
/// reported through [`TransportMessage::Opened`]. After `close`, nothing from
/// the closed connection may be returned by `poll_message`.
pub trait Transport {
    fn connect(&mut self) -> Result<(), ChannelError>;

    /// Next pending message, or `None` when nothing is ready.
    fn poll_message(&mut self) -> Option<TransportMessage>;

    fn close(&mut self);
}

/// Sending side handed to whatever owns the real socket.
///
/// Each connection gets its own feed; once the transport moves on (close or
/// reconnect), sends on an old feed fail and are dropped.
#[derive(Clone, Debug)]
pub struct TransportFeed {
    sender: Sender<TransportMessage>,
    live: Arc<AtomicBool>,
}

impl TransportFeed {
    /// False once the transport closed or reconnected. A reader blocked on
    /// its socket should check this between reads and hang up.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Report a completed handshake. Returns false if nobody listens anymore.
    pub fn opened(&self) -> bool {
        self.sender.send(TransportMessage::Opened).is_ok()
    }

    /// Deliver a text frame. Returns false if nobody listens anymore.
    pub fn frame(&self, frame: impl Into<String>) -> bool {
        self.sender.send(TransportMessage::Frame(frame.into())).is_ok()
    }

    /// Report that the connection ended.
    pub fn closed(&self, reason: impl Into<String>) -> bool {
        self.sender
            .send(TransportMessage::Closed(ChannelError::Closed(reason.into())))
            .is_ok()
    }

    /// Report a failed connection with a specific error.
    pub fn failed(&self, error: ChannelError) -> bool {
        self.sender.send(TransportMessage::Closed(error)).is_ok()
    }
}

/// Default buffered messages per connection.
const DEFAULT_BUFFER: usize = 1024;

type Connector = Box<dyn FnMut(TransportFeed) -> Result<(), ChannelError> + Send>;

/// A [`Transport`] fed through a crossbeam channel.
///
/// The connector is called on every connect with a fresh [`TransportFeed`];
/// a typical connector spawns a socket reader thread that pushes into it.
/// The UI thread drains messages with [`Transport::poll_message`].
pub struct ChannelTransport {
    connector: Connector,
    receiver: Option<Receiver<TransportMessage>>,
    live: Option<Arc<AtomicBool>>,
    buffer_size: usize,
}

impl ChannelTransport {
    pub fn new<F>(connector: F) -> Self
    where
        F: FnMut(TransportFeed) -> Result<(), ChannelError> + Send + 'static,
    {
        Self {
            connector: Box::new(connector),
            receiver: None,
            live: None,
            buffer_size: DEFAULT_BUFFER,
        }
    }

    /// Override the per-connection buffer size.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    fn hang_up(&mut self) {
        if let Some(live) = self.live.take() {
            live.store(false, Ordering::Release);
        }
        self.receiver = None;
    }
}

impl Transport for ChannelTransport {
    fn connect(&mut self) -> Result<(), ChannelError> {
        // Any previous feed goes dead here.
        self.hang_up();

        let (sender, receiver) = bounded(self.buffer_size);
        let live = Arc::new(AtomicBool::new(true));
        self.receiver = Some(receiver);
        self.live = Some(Arc::clone(&live));
        if let Err(e) = (self.connector)(TransportFeed { sender, live }) {
            self.hang_up();
            return Err(e);
        }
        Ok(())
    }

    fn poll_message(&mut self) -> Option<TransportMessage> {
        let receiver = self.receiver.as_ref()?;
        match receiver.try_recv() {
            Ok(message) => Some(message),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.hang_up();
                Some(TransportMessage::Closed(ChannelError::Closed(
                    "feed dropped".to_string(),
                )))
            }
        }
    }

    fn close(&mut self) {
        self.hang_up();
    }
}
