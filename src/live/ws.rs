//! WebSocket connector over tungstenite.

use super::transport::{ChannelTransport, TransportFeed};
use crate::error::ChannelError;
use std::io::ErrorKind;
use std::net::TcpStream;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

/// How long a blocked read waits before checking whether the feed is still
/// wanted.
const READ_POLL: Duration = Duration::from_millis(250);

/// A [`ChannelTransport`] that opens `url` (e.g. `ws://host:8000/ws`) on
/// every connect.
///
/// Each connection gets its own reader thread. The thread reports the
/// handshake, forwards text frames and reports the close; it hangs up on its
/// own once the transport closes or reconnects.
pub fn websocket_transport(url: impl Into<String>) -> ChannelTransport {
    let url = url.into();
    ChannelTransport::new(move |feed| {
        let url = url.clone();
        thread::Builder::new()
            .name("rowsync-ws".to_string())
            .spawn(move || read_loop(&url, feed))
            .map(|_| ())
            .map_err(|e| ChannelError::Handshake(format!("reader thread: {}", e)))
    })
}

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

fn read_loop(url: &str, feed: TransportFeed) {
    let mut socket: Socket = match tungstenite::connect(url) {
        Ok((socket, _response)) => socket,
        Err(e) => {
            debug!(%url, error = %e, "websocket handshake failed");
            feed.failed(ChannelError::Handshake(e.to_string()));
            return;
        }
    };

    if let MaybeTlsStream::Plain(stream) = socket.get_mut() {
        if let Err(e) = stream.set_read_timeout(Some(READ_POLL)) {
            warn!(error = %e, "could not set websocket read timeout");
        }
    }

    if !feed.opened() {
        let _ = socket.close(None);
        return;
    }
    debug!(%url, "websocket open");

    loop {
        if !feed.is_live() {
            let _ = socket.close(None);
            return;
        }
        match socket.read() {
            Ok(Message::Text(text)) => {
                if !feed.frame(text) {
                    let _ = socket.close(None);
                    return;
                }
            }
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.to_string())
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "server closed".to_string());
                feed.closed(reason);
                return;
            }
            // Pings are answered by tungstenite; binary frames are not events.
            Ok(_) => {}
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                feed.closed(e.to_string());
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::{Transport, TransportMessage};
    use std::net::TcpListener;
    use std::time::Instant;

    fn next_message(transport: &mut ChannelTransport) -> Option<TransportMessage> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Some(message) = transport.poll_message() {
                return Some(message);
            }
            thread::sleep(Duration::from_millis(10));
        }
        None
    }

    #[test]
    fn test_websocket_frames_reach_the_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut ws = tungstenite::accept(stream).unwrap();
            ws.send(Message::text(r#"{"drug_standard_code": "A", "count_quantity": 3}"#))
                .unwrap();
            ws.close(None).unwrap();
            // Drain until the client acknowledges the close.
            while ws.read().is_ok() {}
        });

        let mut transport = websocket_transport(format!("ws://{}/ws", addr));
        transport.connect().unwrap();

        assert_eq!(next_message(&mut transport), Some(TransportMessage::Opened));
        assert_eq!(
            next_message(&mut transport),
            Some(TransportMessage::Frame(
                r#"{"drug_standard_code": "A", "count_quantity": 3}"#.to_string()
            ))
        );
        assert!(matches!(
            next_message(&mut transport),
            Some(TransportMessage::Closed(ChannelError::Closed(_)))
        ));
        server.join().unwrap();
    }

    #[test]
    fn test_refused_connection_reports_handshake_error() {
        // Bind then drop to get a port nobody listens on.
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();

        let mut transport = websocket_transport(format!("ws://{}/ws", addr));
        transport.connect().unwrap();

        assert!(matches!(
            next_message(&mut transport),
            Some(TransportMessage::Closed(ChannelError::Handshake(_)))
        ));
    }
}
