//! Realtime model session
//!
//! A bidirectional connection to a live audio model: microphone frames
//! and tool acknowledgements go out, speech, transcriptions and tool
//! calls come back.

mod message;
mod session;
mod websocket;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use message::{
    ClientFrame, FunctionDeclaration, FunctionResponse, InboundEvent, Modality, ServerMessage,
    SessionConfig,
};
pub use session::{SessionState, StreamingSession};
pub use websocket::{GeminiLiveTransport, LIVE_ENDPOINT};

use crate::Result;

/// Something the transport observed on the connection
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A decoded server message
    Message(ServerMessage),
    /// A transport-level failure; the connection may still be open
    Error(String),
    /// The remote side closed the connection
    Closed { reason: Option<String> },
}

/// Opens realtime connections
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Connect and send the setup frame for `config`
    ///
    /// Everything the connection observes afterwards is pushed to `events`
    /// until the connection ends or the receiver is dropped.
    ///
    /// # Errors
    ///
    /// Returns error if the connection cannot be established
    async fn connect(
        &self,
        config: &SessionConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn RealtimeConnection>>;
}

/// One open realtime connection
#[async_trait]
pub trait RealtimeConnection: Send + Sync {
    /// Send one frame
    ///
    /// # Errors
    ///
    /// Returns error if the frame cannot be written
    async fn send(&self, frame: &ClientFrame) -> Result<()>;

    /// Close the connection
    ///
    /// # Errors
    ///
    /// Returns error if the connection was already gone
    async fn close(&self) -> Result<()>;
}
