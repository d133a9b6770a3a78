//! Studio state shared between the voice session, the creative actions and
//! the API
//!
//! Every change is broadcast to subscribers as a [`StudioEvent`].

use std::collections::VecDeque;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

/// Channel capacity for studio events
const CHANNEL_CAPACITY: usize = 64;

/// Most recent artifacts kept in history
pub const HISTORY_CAPACITY: usize = 10;

/// What the studio is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStatus {
    Idle,
    ConnectingVoice,
    VoiceActive,
    Generating,
    Editing,
}

/// One image produced, edited or uploaded in the studio
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageArtifact {
    pub id: Uuid,
    /// `data:` URL form, ready for display
    pub url: String,
    /// Raw base64 payload
    #[serde(skip)]
    pub data: String,
    pub mime_type: String,
    pub created_at: DateTime<Utc>,
    /// Prompt or instruction that produced the image, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl ImageArtifact {
    #[must_use]
    pub fn new(data: String, mime_type: String, prompt: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: format!("data:{mime_type};base64,{data}"),
            data,
            mime_type,
            created_at: Utc::now(),
            prompt,
        }
    }

    /// Build an artifact from raw image bytes
    #[must_use]
    pub fn from_bytes(bytes: &[u8], mime_type: &str) -> Self {
        Self::new(STANDARD.encode(bytes), mime_type.to_string(), None)
    }
}

/// Bounded most-recent-first list of artifacts
#[derive(Debug, Clone, Default)]
pub struct ImageHistory {
    items: VecDeque<ImageArtifact>,
}

impl ImageHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend `artifact`, dropping the oldest entry past capacity
    pub fn push(&mut self, artifact: ImageArtifact) {
        self.items.push_front(artifact);
        self.items.truncate(HISTORY_CAPACITY);
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ImageArtifact> {
        self.items.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageArtifact> {
        self.items.iter()
    }
}

/// Point-in-time view of the studio
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudioSnapshot {
    pub status: AppStatus,
    pub voice_active: bool,
    pub transcript: Option<String>,
    pub current_image: Option<ImageArtifact>,
    pub history: Vec<ImageArtifact>,
}

/// Change notifications pushed to subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StudioEvent {
    /// Full state, sent once when a client subscribes
    Snapshot { studio: StudioSnapshot },
    StatusChanged { status: AppStatus, voice_active: bool },
    TranscriptChanged { text: Option<String> },
    ImageChanged { image: ImageArtifact },
    HistoryChanged { ids: Vec<Uuid> },
}

#[derive(Debug)]
struct StudioState {
    status: AppStatus,
    voice_active: bool,
    transcript: Option<String>,
    current: Option<ImageArtifact>,
    history: ImageHistory,
}

impl StudioState {
    fn settled_status(&self) -> AppStatus {
        if self.voice_active {
            AppStatus::VoiceActive
        } else {
            AppStatus::Idle
        }
    }

    fn status_event(&self) -> StudioEvent {
        StudioEvent::StatusChanged {
            status: self.status,
            voice_active: self.voice_active,
        }
    }

    fn history_event(&self) -> StudioEvent {
        StudioEvent::HistoryChanged {
            ids: self.history.iter().map(|a| a.id).collect(),
        }
    }
}

/// Observable studio state
pub struct StudioStore {
    state: RwLock<StudioState>,
    tx: broadcast::Sender<StudioEvent>,
}

impl Default for StudioStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StudioStore {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(StudioState {
                status: AppStatus::Idle,
                voice_active: false,
                transcript: None,
                current: None,
                history: ImageHistory::new(),
            }),
            tx,
        }
    }

    /// Subscribe to studio changes
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StudioEvent> {
        self.tx.subscribe()
    }

    fn emit(&self, event: StudioEvent) {
        // No subscribers is fine
        let _ = self.tx.send(event);
    }

    pub async fn snapshot(&self) -> StudioSnapshot {
        let state = self.state.read().await;
        StudioSnapshot {
            status: state.status,
            voice_active: state.voice_active,
            transcript: state.transcript.clone(),
            current_image: state.current.clone(),
            history: state.history.iter().cloned().collect(),
        }
    }

    pub async fn status(&self) -> AppStatus {
        self.state.read().await.status
    }

    pub async fn voice_active(&self) -> bool {
        self.state.read().await.voice_active
    }

    pub async fn transcript(&self) -> Option<String> {
        self.state.read().await.transcript.clone()
    }

    pub async fn current_image(&self) -> Option<ImageArtifact> {
        self.state.read().await.current.clone()
    }

    pub async fn history(&self) -> Vec<ImageArtifact> {
        self.state.read().await.history.iter().cloned().collect()
    }

    pub async fn set_status(&self, status: AppStatus) {
        let mut state = self.state.write().await;
        if state.status == status {
            return;
        }
        state.status = status;
        tracing::debug!(?status, "status changed");
        self.emit(state.status_event());
    }

    /// Leave `expected` for the settled status
    ///
    /// Only applies if the status is still `expected`; anything that moved
    /// the status on in the meantime wins.
    pub async fn restore_status(&self, expected: AppStatus) {
        let mut state = self.state.write().await;
        if state.status != expected {
            return;
        }
        state.status = state.settled_status();
        self.emit(state.status_event());
    }

    /// Mark the voice session live
    pub async fn voice_started(&self) {
        let mut state = self.state.write().await;
        state.voice_active = true;
        state.status = AppStatus::VoiceActive;
        self.emit(state.status_event());
    }

    /// Return the voice fields to their idle values
    ///
    /// Status always lands on `Idle`. A generation or edit still running
    /// finds its status moved on and leaves it alone when it finishes.
    pub async fn reset_voice(&self) {
        let mut state = self.state.write().await;
        let status_changed = state.status != AppStatus::Idle || state.voice_active;
        state.status = AppStatus::Idle;
        state.voice_active = false;

        if status_changed {
            self.emit(state.status_event());
        }
        if state.transcript.take().is_some() {
            self.emit(StudioEvent::TranscriptChanged { text: None });
        }
    }

    pub async fn set_transcript(&self, text: impl Into<String>) {
        let text = text.into();
        let mut state = self.state.write().await;
        state.transcript = Some(text.clone());
        self.emit(StudioEvent::TranscriptChanged { text: Some(text) });
    }

    /// Make `artifact` current and record it in history
    pub async fn publish(&self, artifact: ImageArtifact) {
        let mut state = self.state.write().await;
        state.history.push(artifact.clone());
        state.current = Some(artifact.clone());

        tracing::info!(id = %artifact.id, history = state.history.len(), "image published");
        self.emit(StudioEvent::ImageChanged { image: artifact });
        self.emit(state.history_event());
    }

    /// Make the history entry at `index` current again
    ///
    /// History itself is left untouched.
    pub async fn select(&self, index: usize) -> Option<ImageArtifact> {
        let mut state = self.state.write().await;
        let artifact = state.history.get(index)?.clone();
        state.current = Some(artifact.clone());
        self.emit(StudioEvent::ImageChanged {
            image: artifact.clone(),
        });
        Some(artifact)
    }
}

impl std::fmt::Debug for StudioStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StudioStore")
            .field("subscribers", &self.tx.receiver_count())
            .finish_non_exhaustive()
    }
}
