//! Gemini Live transport over WebSocket

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::{
    ClientFrame, RealtimeConnection, RealtimeTransport, ServerMessage, SessionConfig,
    TransportEvent,
};
use crate::{Error, Result};

/// Bidirectional streaming endpoint of the Live API
pub const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// How long the socket handshake may take before the connect is abandoned
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to the Gemini Live API
#[derive(Clone)]
pub struct GeminiLiveTransport {
    api_key: String,
    endpoint: String,
    connect_timeout: Duration,
}

impl GeminiLiveTransport {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: LIVE_ENDPOINT.to_string(),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    /// Override the endpoint (for proxies and tests)
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl std::fmt::Debug for GeminiLiveTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiLiveTransport")
            .field("endpoint", &self.endpoint)
            .field("connect_timeout", &self.connect_timeout)
            .field("api_key", &"[redacted]")
            .finish()
    }
}

#[async_trait]
impl RealtimeTransport for GeminiLiveTransport {
    async fn connect(
        &self,
        config: &SessionConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn RealtimeConnection>> {
        let url = format!("{}?key={}", self.endpoint, self.api_key);
        let (socket, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| {
                    Error::WebSocket(format!(
                        "connect timed out after {:?}",
                        self.connect_timeout
                    ))
                })?
                .map_err(|e| Error::WebSocket(e.to_string()))?;

        let (mut sink, stream) = socket.split();

        sink.send(Message::Text(config.setup_message().to_string().into()))
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;

        tracing::debug!(endpoint = %self.endpoint, "live socket connected, setup sent");

        let reader = tokio::spawn(read_loop(stream, events));

        Ok(Box::new(LiveConnection {
            sink: Mutex::new(sink),
            reader,
        }))
    }
}

async fn read_loop(
    mut stream: SplitStream<Socket>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    while let Some(message) = stream.next().await {
        let event = match message {
            Ok(Message::Text(text)) => parse_frame(text.as_bytes()),
            Ok(Message::Binary(bytes)) => parse_frame(&bytes),
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.as_str().to_string())
                    .filter(|r| !r.is_empty());
                let _ = events.send(TransportEvent::Closed { reason });
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e.to_string()));
                let _ = events.send(TransportEvent::Closed { reason: None });
                return;
            }
        };

        let Some(event) = event else { continue };
        if events.send(event).is_err() {
            // Nobody is listening any more
            return;
        }
    }

    let _ = events.send(TransportEvent::Closed { reason: None });
}

fn parse_frame(raw: &[u8]) -> Option<TransportEvent> {
    match ServerMessage::parse(raw) {
        Ok(message) => Some(TransportEvent::Message(message)),
        Err(e) => {
            tracing::warn!(error = %e, "unparseable live message");
            None
        }
    }
}

struct LiveConnection {
    sink: Mutex<SplitSink<Socket, Message>>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl RealtimeConnection for LiveConnection {
    async fn send(&self, frame: &ClientFrame) -> Result<()> {
        self.sink
            .lock()
            .await
            .send(Message::Text(frame.to_json().to_string().into()))
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_key() {
        let transport = GeminiLiveTransport::new("secret-key");
        let debug = format!("{transport:?}");
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains(LIVE_ENDPOINT));
    }

    #[tokio::test]
    async fn connect_gives_up_on_silent_server() {
        // Accepts TCP connections but never answers the handshake
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let transport = GeminiLiveTransport::new("key")
            .with_endpoint(format!("ws://{addr}"))
            .with_connect_timeout(Duration::from_millis(100));
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = crate::Config::default().session_config();

        let result = transport.connect(&config, tx).await;

        match result {
            Err(Error::WebSocket(message)) => assert!(message.contains("timed out")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connect should not succeed"),
        }
        drop(listener);
    }

    #[test]
    fn parse_frame_skips_garbage() {
        assert!(parse_frame(b"not json").is_none());
        assert!(matches!(
            parse_frame(br#"{"setupComplete": {}}"#),
            Some(TransportEvent::Message(_))
        ));
    }
}
