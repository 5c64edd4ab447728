//! Real-time mutation events.
//!
//! This module keeps one persistent connection to the event stream:
//! - Connecting, open and closed states with a single pending reconnect
//! - Frames decoded into mutation events, bad frames skipped
//! - Teardown that cancels everything
//!
//! The socket itself sits behind [`Transport`]. [`ChannelTransport`] bridges
//! a socket reader thread into the single-threaded session through a
//! bounded crossbeam channel; with the `ws` feature,
//! [`websocket_transport`] provides that reader over tungstenite.
//!
//! # Example
//!
//! ```ignore
//! let transport = websocket_transport("ws://localhost:8000/ws");
//! let mut channel = LiveChannel::new(transport, Duration::from_secs(5));
//! channel.start(Instant::now());
//!
//! loop {
//!     for signal in channel.poll(Instant::now()) {
//!         match signal {
//!             ChannelSignal::Opened => println!("live"),
//!             ChannelSignal::Event(event) => println!("event: {:?}", event),
//!             ChannelSignal::Closed(reason) => println!("closed: {}", reason),
//!         }
//!     }
//!     channel.reconnect_due(Instant::now());
//! }
//! ```

mod channel;
mod transport;
#[cfg(feature = "ws")]
mod ws;

pub use channel::{ChannelSignal, LiveChannel};
pub use transport::{ChannelTransport, Transport, TransportFeed, TransportMessage};
#[cfg(feature = "ws")]
pub use ws::websocket_transport;
