//! Streaming session state machine

use std::collections::VecDeque;

use tokio::sync::{Mutex, mpsc};

use super::{
    ClientFrame, FunctionResponse, RealtimeConnection, RealtimeTransport, SessionConfig,
    TransportEvent,
};
use crate::audio::AudioChunk;
use crate::{Error, Result};

/// Lifecycle of a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Open,
    Closed,
}

/// A single-use realtime session
///
/// Frames sent before the connection opens are queued and flushed in order
/// once it does. Frames sent after close are dropped.
pub struct StreamingSession {
    inner: Mutex<Inner>,
}

struct Inner {
    state: SessionState,
    connection: Option<Box<dyn RealtimeConnection>>,
    pending: VecDeque<ClientFrame>,
}

impl Default for StreamingSession {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingSession {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: SessionState::Disconnected,
                connection: None,
                pending: VecDeque::new(),
            }),
        }
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Open the session over `transport`
    ///
    /// Returns the stream of transport events for this session.
    ///
    /// # Errors
    ///
    /// Returns error if the session was already used, the transport fails
    /// to connect, or the session was closed while connecting
    pub async fn connect(
        &self,
        transport: &dyn RealtimeTransport,
        config: &SessionConfig,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>> {
        {
            let mut inner = self.inner.lock().await;
            if inner.state != SessionState::Disconnected {
                return Err(Error::Transport(format!(
                    "session cannot connect from {:?}",
                    inner.state
                )));
            }
            inner.state = SessionState::Connecting;
        }

        tracing::debug!(model = %config.model, "connecting realtime session");

        let (tx, rx) = mpsc::unbounded_channel();
        let connection = match transport.connect(config, tx).await {
            Ok(connection) => connection,
            Err(e) => {
                let mut inner = self.inner.lock().await;
                inner.state = SessionState::Closed;
                inner.pending.clear();
                return Err(e);
            }
        };

        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Closed {
            drop(inner);
            if let Err(e) = connection.close().await {
                tracing::debug!(error = %e, "ignoring close failure for abandoned connection");
            }
            return Err(Error::Transport(
                "session closed while connecting".to_string(),
            ));
        }

        let queued = inner.pending.len();
        while let Some(frame) = inner.pending.pop_front() {
            if let Err(e) = connection.send(&frame).await {
                tracing::warn!(error = %e, "failed to flush queued frame");
            }
        }
        inner.connection = Some(connection);
        inner.state = SessionState::Open;

        tracing::info!(flushed = queued, "realtime session open");
        Ok(rx)
    }

    /// Send a frame, queueing it if the session is not open yet
    ///
    /// # Errors
    ///
    /// Returns error if the open connection fails to write the frame
    pub async fn send(&self, frame: ClientFrame) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            SessionState::Disconnected | SessionState::Connecting => {
                inner.pending.push_back(frame);
                Ok(())
            }
            SessionState::Open => match inner.connection.as_ref() {
                Some(connection) => connection.send(&frame).await,
                None => Ok(()),
            },
            SessionState::Closed => {
                tracing::trace!("dropping frame sent after close");
                Ok(())
            }
        }
    }

    /// Send one captured audio chunk
    ///
    /// # Errors
    ///
    /// Returns error if the open connection fails to write the frame
    pub async fn send_audio(&self, chunk: AudioChunk) -> Result<()> {
        self.send(ClientFrame::Media(chunk)).await
    }

    /// Acknowledge a tool invocation
    ///
    /// # Errors
    ///
    /// Returns error if the open connection fails to write the frame
    pub async fn send_tool_response(&self, response: FunctionResponse) -> Result<()> {
        self.send(ClientFrame::ToolResponse(response)).await
    }

    /// Close the session. Later calls are no-ops and close failures are
    /// swallowed.
    pub async fn close(&self) {
        let connection = {
            let mut inner = self.inner.lock().await;
            if inner.state == SessionState::Closed {
                return;
            }
            inner.state = SessionState::Closed;
            inner.pending.clear();
            inner.connection.take()
        };

        if let Some(connection) = connection {
            if let Err(e) = connection.close().await {
                tracing::debug!(error = %e, "ignoring realtime close failure");
            }
        }
        tracing::debug!("realtime session closed");
    }
}

impl std::fmt::Debug for StreamingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.try_lock().map(|inner| inner.state).ok();
        f.debug_struct("StreamingSession")
            .field("state", &state)
            .finish_non_exhaustive()
    }
}
