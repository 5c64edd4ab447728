//! Auto-reconnecting live event channel.

use super::transport::{Transport, TransportMessage};
use crate::error::ChannelError;
use crate::types::{ConnectivityState, MutationEvent};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// What the channel reports to its owner, in receipt order.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelSignal {
    /// The connection is open; the owner should resynchronize its snapshot.
    Opened,
    /// A decoded mutation event.
    Event(MutationEvent),
    /// The connection closed; a reconnect has been scheduled.
    Closed(ChannelError),
}

/// Live channel state machine.
///
/// `Connecting -> Open -> Closed -> Connecting -> ...` until
/// [`teardown`](Self::teardown), after which every call is a no-op.
pub struct LiveChannel<T: Transport> {
    transport: T,
    state: ConnectivityState,
    reconnect_interval: Duration,
    /// Single pending reconnect deadline.
    reconnect_at: Option<Instant>,
    torn_down: bool,
    /// Connection attempts so far (for logs).
    attempts: u64,
}

impl<T: Transport> LiveChannel<T> {
    pub fn new(transport: T, reconnect_interval: Duration) -> Self {
        Self {
            transport,
            state: ConnectivityState::Closed,
            reconnect_interval,
            reconnect_at: None,
            torn_down: false,
            attempts: 0,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectivityState::Open
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Pending reconnect deadline, if one is scheduled.
    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// First connect attempt. Ignored unless the channel is idle.
    pub fn start(&mut self, now: Instant) -> Vec<ChannelSignal> {
        if self.torn_down || self.state != ConnectivityState::Closed || self.reconnect_at.is_some() {
            return Vec::new();
        }
        self.connect(now)
    }

    /// Perform the scheduled reconnect if its deadline has passed.
    pub fn reconnect_due(&mut self, now: Instant) -> Vec<ChannelSignal> {
        match self.reconnect_at {
            Some(at) if !self.torn_down && now >= at => {
                self.reconnect_at = None;
                self.connect(now)
            }
            _ => Vec::new(),
        }
    }

    /// Drain everything the transport has ready.
    pub fn poll(&mut self, now: Instant) -> Vec<ChannelSignal> {
        let mut signals = Vec::new();
        if self.torn_down {
            return signals;
        }

        while let Some(message) = self.transport.poll_message() {
            match message {
                TransportMessage::Opened => {
                    if self.state == ConnectivityState::Connecting {
                        info!(attempt = self.attempts, "live channel open");
                        self.state = ConnectivityState::Open;
                        signals.push(ChannelSignal::Opened);
                    }
                }
                TransportMessage::Frame(frame) => {
                    if self.state != ConnectivityState::Open {
                        debug!(state = %self.state, "frame outside open state ignored");
                        continue;
                    }
                    match MutationEvent::from_frame(&frame) {
                        Ok(event) => signals.push(ChannelSignal::Event(event)),
                        Err(e) => warn!(error = %e, "skipping undecodable frame"),
                    }
                }
                TransportMessage::Closed(reason) => {
                    signals.push(self.on_closed(reason, now));
                    // Nothing after a close belongs to this connection.
                    break;
                }
            }
        }
        signals
    }

    /// Close the socket and cancel the pending reconnect. Terminal.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.reconnect_at = None;
        self.transport.close();
        self.state = ConnectivityState::Closed;
        debug!("live channel torn down");
    }

    fn connect(&mut self, now: Instant) -> Vec<ChannelSignal> {
        self.attempts += 1;
        self.state = ConnectivityState::Connecting;
        debug!(attempt = self.attempts, "live channel connecting");
        match self.transport.connect() {
            Ok(()) => Vec::new(),
            Err(reason) => vec![self.on_closed(reason, now)],
        }
    }

    fn on_closed(&mut self, reason: ChannelError, now: Instant) -> ChannelSignal {
        self.transport.close();
        self.state = ConnectivityState::Closed;
        self.reconnect_at = Some(now + self.reconnect_interval);
        warn!(error = %reason, retry_in_ms = self.reconnect_interval.as_millis() as u64, "live channel closed");
        ChannelSignal::Closed(reason)
    }
}
