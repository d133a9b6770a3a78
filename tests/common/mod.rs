//! Shared test utilities
//!
//! In-memory stand-ins for the audio hardware, the realtime transport and
//! the image model, plus builders wiring them into the studio.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use atelier_studio::api::{ApiServer, ApiServerBuilder, ApiState};
use atelier_studio::audio::{
    AudioBackend, AudioBuffer, DeviceContext, EndedCallback, FramingInputContext, InputContext,
    MicrophoneStream, OutputContext, SampleTap, SourceHandle,
};
use atelier_studio::realtime::{
    ClientFrame, RealtimeConnection, RealtimeTransport, ServerMessage, SessionConfig,
    TransportEvent,
};
use atelier_studio::studio::{ImageBackend, ImageRequest, InlineImage, ResponsePart};
use atelier_studio::{
    CreativeActionService, Error, Result, StudioStore, ToolCallDispatcher, VoiceController,
};
use tokio::sync::{Notify, mpsc};

/// Base64 of a tiny PNG header, good enough as image payload
pub const PNG_DATA: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAAB";

/// Poll `check` until it holds, failing the test after two seconds
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Give spawned tasks a chance to run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ---------------------------------------------------------------------------
// Audio
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeMicrophone {
    tap: Mutex<Option<SampleTap>>,
    stopped: AtomicBool,
}

impl FakeMicrophone {
    /// Deliver `samples` as if the hardware captured them
    pub fn emit(&self, samples: &[f32]) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        if let Some(tap) = self.tap.lock().unwrap().as_mut() {
            tap(samples);
        }
    }
}

impl MicrophoneStream for FakeMicrophone {
    fn set_tap(&self, tap: Option<SampleTap>) {
        *self.tap.lock().unwrap() = tap;
    }

    fn stop_tracks(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.tap.lock().unwrap().take();
    }

    fn is_live(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }
}

pub struct FakeSourceState {
    pub when: f64,
    pub duration: f64,
    stopped: AtomicBool,
    finished: AtomicBool,
    on_ended: Mutex<Option<EndedCallback>>,
}

impl FakeSourceState {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

struct FakeSource(Arc<FakeSourceState>);

impl SourceHandle for FakeSource {
    fn stop(&self) -> Result<()> {
        if self.0.finished.load(Ordering::SeqCst) || self.0.stopped.swap(true, Ordering::SeqCst) {
            return Err(Error::Audio("source already ended".to_string()));
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.0.finished.load(Ordering::SeqCst) || self.0.stopped.load(Ordering::SeqCst)
    }
}

/// Output context driven by a manual clock
pub struct FakeOutput {
    sample_rate: u32,
    now: Mutex<f64>,
    closed: AtomicBool,
    sources: Mutex<Vec<Arc<FakeSourceState>>>,
}

impl FakeOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            now: Mutex::new(0.0),
            closed: AtomicBool::new(false),
            sources: Mutex::new(Vec::new()),
        }
    }

    pub fn set_time(&self, seconds: f64) {
        *self.now.lock().unwrap() = seconds;
    }

    /// Every source ever started, in start order
    pub fn sources(&self) -> Vec<Arc<FakeSourceState>> {
        self.sources.lock().unwrap().clone()
    }

    pub fn start_times(&self) -> Vec<f64> {
        self.sources().iter().map(|s| s.when).collect()
    }

    /// Play every running source to its natural end
    pub fn finish_all(&self) {
        let callbacks: Vec<EndedCallback> = self
            .sources()
            .iter()
            .filter(|s| !s.stopped.load(Ordering::SeqCst))
            .filter(|s| !s.finished.swap(true, Ordering::SeqCst))
            .filter_map(|s| s.on_ended.lock().unwrap().take())
            .collect();

        for callback in callbacks {
            callback();
        }
    }
}

impl DeviceContext for FakeOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        *self.now.lock().unwrap()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::Device("output already closed".to_string()));
        }
        Ok(())
    }
}

impl OutputContext for FakeOutput {
    fn start_source(
        &self,
        buffer: Arc<AudioBuffer>,
        when: f64,
        on_ended: EndedCallback,
    ) -> Result<Box<dyn SourceHandle>> {
        if self.is_closed() {
            return Err(Error::Device("output is closed".to_string()));
        }

        let state = Arc::new(FakeSourceState {
            when,
            duration: buffer.duration(),
            stopped: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            on_ended: Mutex::new(Some(on_ended)),
        });
        self.sources.lock().unwrap().push(Arc::clone(&state));
        Ok(Box::new(FakeSource(state)))
    }
}

/// Audio backend handing out fakes and remembering what it opened
#[derive(Default)]
pub struct FakeBackend {
    deny_microphone: AtomicBool,
    microphones: Mutex<Vec<Arc<FakeMicrophone>>>,
    inputs: Mutex<Vec<Arc<FramingInputContext>>>,
    outputs: Mutex<Vec<Arc<FakeOutput>>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Backend whose microphone permission is refused
    pub fn denied() -> Arc<Self> {
        let backend = Self::default();
        backend.deny_microphone.store(true, Ordering::SeqCst);
        Arc::new(backend)
    }

    pub fn microphone(&self) -> Arc<FakeMicrophone> {
        Arc::clone(self.microphones.lock().unwrap().last().unwrap())
    }

    pub fn input(&self) -> Arc<FramingInputContext> {
        Arc::clone(self.inputs.lock().unwrap().last().unwrap())
    }

    pub fn output(&self) -> Arc<FakeOutput> {
        Arc::clone(self.outputs.lock().unwrap().last().unwrap())
    }

    pub fn microphones_opened(&self) -> usize {
        self.microphones.lock().unwrap().len()
    }

    /// Whether every microphone is stopped and every context closed
    pub fn all_released(&self) -> bool {
        self.microphones.lock().unwrap().iter().all(|m| !m.is_live())
            && self.inputs.lock().unwrap().iter().all(|c| c.is_closed())
            && self.outputs.lock().unwrap().iter().all(|c| c.is_closed())
    }
}

#[async_trait]
impl AudioBackend for FakeBackend {
    async fn acquire_microphone(&self) -> Result<Arc<dyn MicrophoneStream>> {
        if self.deny_microphone.load(Ordering::SeqCst) {
            return Err(Error::Device("microphone permission denied".to_string()));
        }
        let microphone = Arc::new(FakeMicrophone::default());
        self.microphones.lock().unwrap().push(Arc::clone(&microphone));
        Ok(microphone)
    }

    async fn open_input(&self, sample_rate: u32) -> Result<Arc<dyn InputContext>> {
        let input = Arc::new(FramingInputContext::new(sample_rate));
        self.inputs.lock().unwrap().push(Arc::clone(&input));
        Ok(input)
    }

    async fn open_output(&self, sample_rate: u32) -> Result<Arc<dyn OutputContext>> {
        let output = Arc::new(FakeOutput::new(sample_rate));
        self.outputs.lock().unwrap().push(Arc::clone(&output));
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Realtime transport
// ---------------------------------------------------------------------------

#[derive(Default)]
struct TransportShared {
    sent: Mutex<Vec<ClientFrame>>,
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
    configs: Mutex<Vec<SessionConfig>>,
    closed: AtomicBool,
}

struct FakeConnection {
    shared: Arc<TransportShared>,
}

#[async_trait]
impl RealtimeConnection for FakeConnection {
    async fn send(&self, frame: &ClientFrame) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::Transport("connection closed".to_string()));
        }
        self.shared.sent.lock().unwrap().push(frame.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.shared.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Transport that records frames and lets tests inject server events
#[derive(Default)]
pub struct FakeTransport {
    shared: Arc<TransportShared>,
    gate: Option<Notify>,
    fail: AtomicBool,
    attempts: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Transport whose connect waits for [`release`](Self::release)
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Notify::new()),
            ..Self::default()
        })
    }

    /// Transport whose connect always fails
    pub fn failing() -> Arc<Self> {
        let transport = Self::default();
        transport.fail.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<ClientFrame> {
        self.shared.sent.lock().unwrap().clone()
    }

    pub fn audio_frames(&self) -> usize {
        self.sent()
            .iter()
            .filter(|f| matches!(f, ClientFrame::Media(_)))
            .count()
    }

    /// Tool responses sent so far as `(id, name, result)`
    pub fn tool_responses(&self) -> Vec<(String, String, String)> {
        self.sent()
            .into_iter()
            .filter_map(|f| match f {
                ClientFrame::ToolResponse(r) => Some((r.id, r.name, r.result)),
                ClientFrame::Media(_) => None,
            })
            .collect()
    }

    pub fn last_config(&self) -> Option<SessionConfig> {
        self.shared.configs.lock().unwrap().last().cloned()
    }

    pub fn connection_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    fn emit(&self, event: TransportEvent) {
        let events = self.shared.events.lock().unwrap();
        let sender = events.as_ref().expect("no connection to emit on");
        let _ = sender.send(event);
    }

    /// Deliver a raw server message
    pub fn push(&self, json: &str) {
        let message = ServerMessage::parse(json.as_bytes()).unwrap();
        self.emit(TransportEvent::Message(message));
    }

    pub fn push_error(&self, error: &str) {
        self.emit(TransportEvent::Error(error.to_string()));
    }

    pub fn close_remote(&self, reason: &str) {
        self.emit(TransportEvent::Closed {
            reason: Some(reason.to_string()),
        });
    }
}

#[async_trait]
impl RealtimeTransport for FakeTransport {
    async fn connect(
        &self,
        config: &SessionConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn RealtimeConnection>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.shared.configs.lock().unwrap().push(config.clone());

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Transport("connection refused".to_string()));
        }

        *self.shared.events.lock().unwrap() = Some(events);
        self.shared.closed.store(false, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            shared: Arc::clone(&self.shared),
        }))
    }
}

// ---------------------------------------------------------------------------
// Image model
// ---------------------------------------------------------------------------

/// Image backend returning a fixed image, or failing on demand
#[derive(Default)]
pub struct FakeImageBackend {
    fail: AtomicBool,
    text_only: AtomicBool,
    /// Fail only requests whose prompt contains this
    fail_on: Mutex<Option<String>>,
    gated: AtomicBool,
    gate: Notify,
    requests: Mutex<Vec<ImageRequest>>,
}

impl FakeImageBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let backend = Self::default();
        backend.fail.store(true, Ordering::SeqCst);
        Arc::new(backend)
    }

    /// Backend that answers with text and no image
    pub fn text_only() -> Arc<Self> {
        let backend = Self::default();
        backend.text_only.store(true, Ordering::SeqCst);
        Arc::new(backend)
    }

    pub fn failing_on(needle: &str) -> Arc<Self> {
        let backend = Self::default();
        *backend.fail_on.lock().unwrap() = Some(needle.to_string());
        Arc::new(backend)
    }

    /// Backend that holds every request until [`release`](Self::release)
    pub fn gated() -> Arc<Self> {
        let backend = Self::default();
        backend.gated.store(true, Ordering::SeqCst);
        Arc::new(backend)
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn requests(&self) -> Vec<ImageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ImageBackend for FakeImageBackend {
    async fn generate_content(&self, request: &ImageRequest) -> Result<Vec<ResponsePart>> {
        self.requests.lock().unwrap().push(request.clone());

        if self.gated.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }

        let fail_here = self
            .fail_on
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|needle| request.prompt.contains(needle));
        if fail_here || self.fail.load(Ordering::SeqCst) {
            return Err(Error::Creative("model overloaded".to_string()));
        }
        if self.text_only.load(Ordering::SeqCst) {
            return Ok(vec![ResponsePart::Text("I cannot draw that".to_string())]);
        }

        Ok(vec![
            ResponsePart::Text("Here you go".to_string()),
            ResponsePart::InlineData(InlineImage {
                mime_type: "image/png".to_string(),
                data: PNG_DATA.to_string(),
            }),
        ])
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn session_config() -> SessionConfig {
    atelier_studio::Config::default().session_config()
}

/// Everything a controller test needs to poke at
pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub transport: Arc<FakeTransport>,
    pub images: Arc<FakeImageBackend>,
    pub store: Arc<StudioStore>,
    pub service: Arc<CreativeActionService>,
    pub controller: Arc<VoiceController>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(FakeBackend::new(), FakeTransport::new(), FakeImageBackend::new())
    }

    pub fn with(
        backend: Arc<FakeBackend>,
        transport: Arc<FakeTransport>,
        images: Arc<FakeImageBackend>,
    ) -> Self {
        let store = Arc::new(StudioStore::new());
        let service = Arc::new(CreativeActionService::new(
            Arc::clone(&images) as Arc<dyn ImageBackend>,
            Arc::clone(&store),
        ));
        let controller = VoiceController::new(
            Arc::clone(&backend) as Arc<dyn AudioBackend>,
            Arc::clone(&transport) as Arc<dyn RealtimeTransport>,
            Arc::clone(&store),
            ToolCallDispatcher::new(Arc::clone(&service)),
            session_config(),
        );

        Self {
            backend,
            transport,
            images,
            store,
            service,
            controller,
        }
    }

    pub fn server(&self) -> ApiServer {
        let state = ApiState::new(Arc::clone(&self.service), Arc::clone(&self.controller));
        ApiServerBuilder::new(state, 0).build()
    }
}
