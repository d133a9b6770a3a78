//! Voice session lifecycle
//!
//! Starts and stops the realtime voice session: microphone, device
//! contexts, streaming session, capture pump and receive loop. At most one
//! session exists at a time. Every session gets a generation number; work
//! belonging to an older generation is ignored once that session is gone.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::audio::{
    self, AudioBackend, AudioPipeline, INPUT_SAMPLE_RATE, InputContext, MicrophoneStream,
    OUTPUT_SAMPLE_RATE, OutputContext,
};
use crate::realtime::{
    InboundEvent, RealtimeTransport, SessionConfig, StreamingSession, TransportEvent,
};
use crate::studio::{AppStatus, StudioStore};
use crate::tools::{ToolCallDispatcher, ToolInvocation};
use crate::Result;

/// What a start/toggle request ended up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceOutcome {
    /// A new session is live
    Started,
    /// The running or connecting session was stopped
    Stopped,
    /// The session was stopped while it was still starting
    Cancelled,
}

/// Lifecycle phase of the voice session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoicePhase {
    Inactive,
    Connecting,
    Active,
}

/// Everything a voice session holds, filled in as start acquires it
#[derive(Default)]
struct VoiceResources {
    session: Option<Arc<StreamingSession>>,
    microphone: Option<Arc<dyn MicrophoneStream>>,
    input: Option<Arc<dyn InputContext>>,
    output: Option<Arc<dyn OutputContext>>,
    pipeline: Option<Arc<AudioPipeline>>,
}

impl VoiceResources {
    /// Release in order: session, microphone, device contexts, playback
    async fn release(self) {
        if let Some(session) = self.session {
            session.close().await;
        }

        if let Some(microphone) = self.microphone {
            microphone.stop_tracks();
        }

        match self.pipeline {
            Some(pipeline) => {
                pipeline.close_contexts();
                pipeline.interrupt();
            }
            None => {
                if let Some(input) = &self.input {
                    audio::release_context("input", input.as_ref());
                }
                if let Some(output) = &self.output {
                    audio::release_context("output", output.as_ref());
                }
            }
        }
    }
}

struct VoiceSlot {
    generation: u64,
    phase: VoicePhase,
    resources: VoiceResources,
}

/// Orchestrates the voice session
pub struct VoiceController {
    backend: Arc<dyn AudioBackend>,
    transport: Arc<dyn RealtimeTransport>,
    store: Arc<StudioStore>,
    dispatcher: ToolCallDispatcher,
    session_config: SessionConfig,
    slot: Mutex<Option<VoiceSlot>>,
    generation: AtomicU64,
    /// Serializes claim, activation and teardown
    transitions: tokio::sync::Mutex<()>,
}

impl VoiceController {
    #[must_use]
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        transport: Arc<dyn RealtimeTransport>,
        store: Arc<StudioStore>,
        dispatcher: ToolCallDispatcher,
        session_config: SessionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            backend,
            transport,
            store,
            dispatcher,
            session_config,
            slot: Mutex::new(None),
            generation: AtomicU64::new(0),
            transitions: tokio::sync::Mutex::new(()),
        })
    }

    #[must_use]
    pub fn store(&self) -> &Arc<StudioStore> {
        &self.store
    }

    fn slot(&self) -> MutexGuard<'_, Option<VoiceSlot>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn phase(&self) -> VoicePhase {
        self.slot()
            .as_ref()
            .map_or(VoicePhase::Inactive, |slot| slot.phase)
    }

    /// Generation of the current session, if any
    #[must_use]
    pub fn current_generation(&self) -> Option<u64> {
        self.slot().as_ref().map(|slot| slot.generation)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.current_generation() == Some(generation)
    }

    /// Store a freshly acquired resource in the slot of `generation`
    ///
    /// Returns false if that session is gone; the caller still owns the
    /// resource and must release it.
    fn adopt(&self, generation: u64, fill: impl FnOnce(&mut VoiceResources)) -> bool {
        let mut slot = self.slot();
        match slot.as_mut() {
            Some(current) if current.generation == generation => {
                fill(&mut current.resources);
                true
            }
            _ => false,
        }
    }

    /// Same as [`toggle`](Self::toggle)
    ///
    /// # Errors
    ///
    /// Returns error if the session fails to start. Everything acquired so
    /// far has been released by then.
    pub async fn start(self: &Arc<Self>) -> Result<VoiceOutcome> {
        self.toggle().await
    }

    /// Start a voice session, or stop the one that is active or connecting
    ///
    /// # Errors
    ///
    /// Returns error if the session fails to start. Everything acquired so
    /// far has been released by then.
    pub async fn toggle(self: &Arc<Self>) -> Result<VoiceOutcome> {
        let generation = {
            let _transition = self.transitions.lock().await;
            if self.slot().is_some() {
                self.teardown_current().await;
                return Ok(VoiceOutcome::Stopped);
            }

            let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
            *self.slot() = Some(VoiceSlot {
                generation,
                phase: VoicePhase::Connecting,
                resources: VoiceResources::default(),
            });
            self.store.set_status(AppStatus::ConnectingVoice).await;
            generation
        };

        tracing::info!(generation, "starting voice session");

        match self.open(generation).await {
            Ok(true) => {
                tracing::info!(generation, "voice session active");
                Ok(VoiceOutcome::Started)
            }
            Ok(false) => {
                tracing::info!(generation, "voice session start cancelled");
                Ok(VoiceOutcome::Cancelled)
            }
            Err(e) => {
                tracing::warn!(generation, error = %e, "voice session failed to start");
                self.stop_session(generation).await;
                Err(e)
            }
        }
    }

    /// Acquire everything the session needs and wire it up
    ///
    /// Returns false if the session was stopped along the way.
    async fn open(self: &Arc<Self>, generation: u64) -> Result<bool> {
        let microphone = self.backend.acquire_microphone().await?;
        if !self.adopt(generation, |r| r.microphone = Some(Arc::clone(&microphone))) {
            microphone.stop_tracks();
            return Ok(false);
        }

        let input = self.backend.open_input(INPUT_SAMPLE_RATE).await?;
        if !self.adopt(generation, |r| r.input = Some(Arc::clone(&input))) {
            audio::release_context("input", input.as_ref());
            return Ok(false);
        }

        let output = self.backend.open_output(OUTPUT_SAMPLE_RATE).await?;
        if !self.adopt(generation, |r| r.output = Some(Arc::clone(&output))) {
            audio::release_context("output", output.as_ref());
            return Ok(false);
        }

        let pipeline = Arc::new(AudioPipeline::new(input, output));
        let session = Arc::new(StreamingSession::new());
        let adopted = self.adopt(generation, |r| {
            r.pipeline = Some(Arc::clone(&pipeline));
            r.session = Some(Arc::clone(&session));
        });
        if !adopted {
            pipeline.teardown();
            return Ok(false);
        }

        let events = match session
            .connect(self.transport.as_ref(), &self.session_config)
            .await
        {
            Ok(events) => events,
            Err(e) if !self.is_current(generation) => {
                tracing::debug!(generation, error = %e, "connect abandoned after stop");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if !self.activate(generation).await {
            session.close().await;
            return Ok(false);
        }

        let frames = pipeline.start_capture(microphone.as_ref())?;

        tokio::spawn(Arc::clone(self).capture_pump(generation, frames, Arc::clone(&session)));
        tokio::spawn(Arc::clone(self).receive_loop(generation, events, pipeline, session));

        Ok(true)
    }

    async fn activate(&self, generation: u64) -> bool {
        let _transition = self.transitions.lock().await;
        {
            let mut slot = self.slot();
            match slot.as_mut() {
                Some(current) if current.generation == generation => {
                    current.phase = VoicePhase::Active;
                }
                _ => return false,
            }
        }
        self.store.voice_started().await;
        true
    }

    /// Stop the voice session, if any. Safe to call at any time and any
    /// number of times.
    pub async fn stop(&self) {
        let _transition = self.transitions.lock().await;
        self.teardown_current().await;
    }

    /// Stop the session only if `generation` is still the current one
    pub async fn stop_session(&self, generation: u64) {
        let _transition = self.transitions.lock().await;
        if self.is_current(generation) {
            self.teardown_current().await;
        } else {
            tracing::debug!(generation, "ignoring stop for stale session");
        }
    }

    /// Single teardown path. Callers hold the transition lock.
    async fn teardown_current(&self) {
        // Clearing the slot first makes every in-flight callback stale
        let slot = self.slot().take();

        if let Some(slot) = slot {
            tracing::info!(generation = slot.generation, "stopping voice session");
            slot.resources.release().await;
        }

        self.store.reset_voice().await;
    }

    async fn capture_pump(
        self: Arc<Self>,
        generation: u64,
        mut frames: mpsc::UnboundedReceiver<Vec<f32>>,
        session: Arc<StreamingSession>,
    ) {
        while let Some(frame) = frames.recv().await {
            if !self.is_current(generation) {
                break;
            }
            if let Err(e) = session.send_audio(audio::encode(&frame)).await {
                tracing::warn!(generation, error = %e, "failed to send audio frame");
            }
        }
        tracing::debug!(generation, "capture pump finished");
    }

    async fn receive_loop(
        self: Arc<Self>,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        pipeline: Arc<AudioPipeline>,
        session: Arc<StreamingSession>,
    ) {
        while let Some(event) = events.recv().await {
            if !self.is_current(generation) {
                break;
            }

            match event {
                TransportEvent::Message(message) => {
                    for inbound in message.into_events() {
                        self.handle_inbound(generation, inbound, &pipeline, &session)
                            .await;
                    }
                }
                TransportEvent::Error(error) => {
                    tracing::warn!(generation, %error, "realtime session error");
                    self.stop_session(generation).await;
                    break;
                }
                TransportEvent::Closed { reason } => {
                    tracing::info!(generation, ?reason, "realtime session closed remotely");
                    self.stop_session(generation).await;
                    break;
                }
            }
        }
        tracing::debug!(generation, "receive loop finished");
    }

    async fn handle_inbound(
        self: &Arc<Self>,
        generation: u64,
        event: InboundEvent,
        pipeline: &AudioPipeline,
        session: &Arc<StreamingSession>,
    ) {
        if !self.is_current(generation) {
            return;
        }

        match event {
            InboundEvent::Audio(data) => {
                if let Err(e) = pipeline.play_chunk(&data) {
                    tracing::debug!(generation, error = %e, "dropping audio chunk");
                }
            }
            InboundEvent::Transcription(text) => {
                // Under the transition lock so it cannot land after a reset
                let _transition = self.transitions.lock().await;
                if self.is_current(generation) {
                    self.store.set_transcript(text).await;
                }
            }
            InboundEvent::ToolCall(invocation) => {
                tokio::spawn(Arc::clone(self).run_tool(
                    generation,
                    invocation,
                    Arc::clone(session),
                ));
            }
            InboundEvent::Interrupted => {
                pipeline.interrupt();
            }
        }
    }

    async fn run_tool(
        self: Arc<Self>,
        generation: u64,
        invocation: ToolInvocation,
        session: Arc<StreamingSession>,
    ) {
        let response = self.dispatcher.dispatch(&invocation).await;

        if !self.is_current(generation) {
            tracing::debug!(generation, id = %response.id, "session gone, dropping tool response");
            return;
        }
        if let Err(e) = session.send_tool_response(response).await {
            tracing::warn!(generation, error = %e, "failed to send tool response");
        }
    }
}

impl std::fmt::Debug for VoiceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceController")
            .field("phase", &self.phase())
            .field("generation", &self.current_generation())
            .finish_non_exhaustive()
    }
}
