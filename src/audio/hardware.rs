//! `cpal` implementation of the audio capabilities
//!
//! `cpal::Stream` is not `Send`, so every stream is built and owned by a
//! dedicated thread that keeps it alive until its stop channel closes.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc as std_mpsc};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use tokio::sync::oneshot;

use super::codec::{AudioBuffer, INPUT_SAMPLE_RATE};
use super::device::{
    AudioBackend, DeviceContext, EndedCallback, InputContext, MicrophoneStream, OutputContext,
    SampleTap, SourceHandle,
};
use crate::{Error, Result};

type FrameSink = Box<dyn FnMut(Vec<f32>) + Send>;

/// Audio backend using the default host devices
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioBackend for CpalBackend {
    async fn acquire_microphone(&self) -> Result<Arc<dyn MicrophoneStream>> {
        let microphone = CpalMicrophone::open().await?;
        Ok(Arc::new(microphone))
    }

    async fn open_input(&self, sample_rate: u32) -> Result<Arc<dyn InputContext>> {
        Ok(Arc::new(FramingInputContext::new(sample_rate)))
    }

    async fn open_output(&self, sample_rate: u32) -> Result<Arc<dyn OutputContext>> {
        let output = CpalOutputContext::open(sample_rate).await?;
        Ok(Arc::new(output))
    }
}

/// Run `build` on a dedicated thread and keep the stream alive there
///
/// Resolves once the stream is playing. Dropping the returned sender stops
/// and releases the stream.
async fn spawn_stream_thread<F>(name: &str, build: F) -> Result<std_mpsc::Sender<()>>
where
    F: FnOnce() -> Result<Stream> + Send + 'static,
{
    let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
    let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let stream = match build() {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(Error::Device(e.to_string())));
                return;
            }

            let _ = ready_tx.send(Ok(()));

            // Blocks until the sender is dropped
            let _ = stop_rx.recv();
            drop(stream);
        })?;

    ready_rx
        .await
        .map_err(|_| Error::Device(format!("{name} thread exited before starting")))??;

    Ok(stop_tx)
}

/// Default input device captured at 16 kHz mono
pub struct CpalMicrophone {
    tap: Arc<Mutex<Option<SampleTap>>>,
    stop: Mutex<Option<std_mpsc::Sender<()>>>,
    live: AtomicBool,
}

impl CpalMicrophone {
    /// Open the default input device and start its stream
    ///
    /// # Errors
    ///
    /// Returns error if no suitable input device is available
    pub async fn open() -> Result<Self> {
        let tap: Arc<Mutex<Option<SampleTap>>> = Arc::new(Mutex::new(None));
        let callback_tap = Arc::clone(&tap);

        let stop = spawn_stream_thread("atelier-mic", move || {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| Error::Device("no input device available".to_string()))?;

            let supported = device
                .supported_input_configs()
                .map_err(|e| Error::Device(e.to_string()))?
                .find(|c| {
                    c.channels() == 1
                        && c.min_sample_rate() <= SampleRate(INPUT_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(INPUT_SAMPLE_RATE)
                })
                .ok_or_else(|| Error::Device("no suitable input config found".to_string()))?;

            let config = supported
                .with_sample_rate(SampleRate(INPUT_SAMPLE_RATE))
                .config();

            tracing::debug!(
                device = %device.name().unwrap_or_default(),
                sample_rate = INPUT_SAMPLE_RATE,
                channels = config.channels,
                "microphone opened"
            );

            device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if let Ok(mut tap) = callback_tap.lock() {
                            if let Some(tap) = tap.as_mut() {
                                tap(data);
                            }
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "microphone stream error");
                    },
                    None,
                )
                .map_err(|e| Error::Device(e.to_string()))
        })
        .await?;

        Ok(Self {
            tap,
            stop: Mutex::new(Some(stop)),
            live: AtomicBool::new(true),
        })
    }
}

impl MicrophoneStream for CpalMicrophone {
    fn set_tap(&self, tap: Option<SampleTap>) {
        if let Ok(mut current) = self.tap.lock() {
            *current = tap;
        }
    }

    fn stop_tracks(&self) {
        if !self.live.swap(false, Ordering::SeqCst) {
            return;
        }
        self.set_tap(None);
        if let Ok(mut stop) = self.stop.lock() {
            stop.take();
        }
        tracing::debug!("microphone tracks stopped");
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

impl Drop for CpalMicrophone {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

/// Accumulates samples and emits fixed-size frames
#[derive(Debug)]
pub(crate) struct FrameAccumulator {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameAccumulator {
    pub(crate) fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append `samples`, returning every frame that filled up
    pub(crate) fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();
        let mut rest = samples;

        while !rest.is_empty() {
            let room = self.frame_size - self.pending.len();
            let take = room.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.frame_size {
                let full = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                frames.push(full);
            }
        }

        frames
    }
}

/// Input context that frames whatever the attached microphone delivers
pub struct FramingInputContext {
    sample_rate: u32,
    samples_seen: Arc<AtomicU64>,
    sink: Arc<Mutex<Option<FrameSink>>>,
    closed: AtomicBool,
}

impl FramingInputContext {
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            samples_seen: Arc::new(AtomicU64::new(0)),
            sink: Arc::new(Mutex::new(None)),
            closed: AtomicBool::new(false),
        }
    }
}

impl DeviceContext for FramingInputContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[allow(clippy::cast_precision_loss)]
    fn current_time(&self) -> f64 {
        self.samples_seen.load(Ordering::Relaxed) as f64 / f64::from(self.sample_rate.max(1))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::Device("input context already closed".to_string()));
        }
        self.detach();
        Ok(())
    }
}

impl InputContext for FramingInputContext {
    fn attach(
        &self,
        stream: &dyn MicrophoneStream,
        frame_size: usize,
        sink: FrameSink,
    ) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Device("input context is closed".to_string()));
        }

        if let Ok(mut current) = self.sink.lock() {
            *current = Some(sink);
        }

        let sink = Arc::clone(&self.sink);
        let seen = Arc::clone(&self.samples_seen);
        let mut accumulator = FrameAccumulator::new(frame_size);

        stream.set_tap(Some(Box::new(move |samples: &[f32]| {
            seen.fetch_add(samples.len() as u64, Ordering::Relaxed);
            let frames = accumulator.push(samples);
            if frames.is_empty() {
                return;
            }
            if let Ok(mut sink) = sink.lock() {
                if let Some(sink) = sink.as_mut() {
                    for frame in frames {
                        sink(frame);
                    }
                }
            }
        })));

        Ok(())
    }

    fn detach(&self) {
        // Dropping the sink ends the frame receiver
        if let Ok(mut sink) = self.sink.lock() {
            sink.take();
        }
    }
}

/// One buffer scheduled on the mixer
struct Voice {
    buffer: Arc<AudioBuffer>,
    start_frame: u64,
    stopped: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    on_ended: Option<EndedCallback>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.buffer.frames() as u64
    }

    /// Mono sample at absolute frame `frame`, if this voice covers it
    fn sample_at(&self, frame: u64) -> Option<f32> {
        if frame < self.start_frame || frame >= self.end_frame() {
            return None;
        }
        let channels = usize::from(self.buffer.channels());
        let offset = usize::try_from(frame - self.start_frame).ok()? * channels;
        let samples = self.buffer.samples().get(offset..offset + channels)?;
        #[allow(clippy::cast_precision_loss)]
        Some(samples.iter().sum::<f32>() / channels as f32)
    }
}

/// Sample-accurate mixer driven by the output device clock
pub(crate) struct Mixer {
    sample_rate: u32,
    frames_rendered: u64,
    voices: Vec<Voice>,
}

impl Mixer {
    pub(crate) const fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames_rendered: 0,
            voices: Vec::new(),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / f64::from(self.sample_rate.max(1))
    }

    /// Place `buffer` at device time `when`
    pub(crate) fn schedule(
        &mut self,
        buffer: Arc<AudioBuffer>,
        when: f64,
        on_ended: EndedCallback,
    ) -> MixerSource {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let start_frame = (when.max(0.0) * f64::from(self.sample_rate)).round() as u64;
        let stopped = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));

        self.voices.push(Voice {
            buffer,
            start_frame: start_frame.max(self.frames_rendered),
            stopped: Arc::clone(&stopped),
            finished: Arc::clone(&finished),
            on_ended: Some(on_ended),
        });

        MixerSource { stopped, finished }
    }

    /// Fill `out` (interleaved, `channels` wide) and advance the clock
    ///
    /// Returns the completion callbacks of voices that finished; the caller
    /// runs them after releasing the mixer.
    pub(crate) fn render(&mut self, out: &mut [f32], channels: usize) -> Vec<EndedCallback> {
        let channels = channels.max(1);
        let frames = out.len() / channels;

        for (index, frame) in out.chunks_mut(channels).enumerate() {
            let position = self.frames_rendered + index as u64;
            let mixed: f32 = self
                .voices
                .iter()
                .filter(|v| !v.stopped.load(Ordering::Relaxed))
                .filter_map(|v| v.sample_at(position))
                .sum();
            frame.fill(mixed.clamp(-1.0, 1.0));
        }

        self.frames_rendered += frames as u64;

        let now = self.frames_rendered;
        let mut ended = Vec::new();
        self.voices.retain_mut(|voice| {
            if voice.stopped.load(Ordering::Relaxed) {
                return false;
            }
            if voice.end_frame() <= now {
                voice.finished.store(true, Ordering::SeqCst);
                if let Some(callback) = voice.on_ended.take() {
                    ended.push(callback);
                }
                return false;
            }
            true
        });

        ended
    }

    pub(crate) fn scheduled(&self) -> usize {
        self.voices.len()
    }
}

/// Handle to a voice on the mixer
#[derive(Debug)]
pub(crate) struct MixerSource {
    stopped: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl SourceHandle for MixerSource {
    fn stop(&self) -> Result<()> {
        if self.finished.load(Ordering::SeqCst) {
            return Err(Error::Audio("source already finished".to_string()));
        }
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Err(Error::Audio("source already stopped".to_string()));
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

/// Default output device rendering scheduled buffers
pub struct CpalOutputContext {
    sample_rate: u32,
    mixer: Arc<Mutex<Mixer>>,
    stop: Mutex<Option<std_mpsc::Sender<()>>>,
    closed: AtomicBool,
}

impl CpalOutputContext {
    /// Open the default output device at `sample_rate`
    ///
    /// Prefers a mono config, falling back to stereo.
    ///
    /// # Errors
    ///
    /// Returns error if no suitable output device is available
    pub async fn open(sample_rate: u32) -> Result<Self> {
        let mixer = Arc::new(Mutex::new(Mixer::new(sample_rate)));
        let callback_mixer = Arc::clone(&mixer);

        let stop = spawn_stream_thread("atelier-speaker", move || {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| Error::Device("no output device available".to_string()))?;

            let config = output_config(&device, sample_rate)?;
            let channels = usize::from(config.channels);

            tracing::debug!(
                device = %device.name().unwrap_or_default(),
                sample_rate,
                channels,
                "output context opened"
            );

            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let ended = match callback_mixer.lock() {
                            Ok(mut mixer) => mixer.render(data, channels),
                            Err(_) => {
                                data.fill(0.0);
                                Vec::new()
                            }
                        };
                        for callback in ended {
                            callback();
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Device(e.to_string()))
        })
        .await?;

        Ok(Self {
            sample_rate,
            mixer,
            stop: Mutex::new(Some(stop)),
            closed: AtomicBool::new(false),
        })
    }
}

fn output_config(device: &cpal::Device, sample_rate: u32) -> Result<StreamConfig> {
    let rate = SampleRate(sample_rate);
    let supports = |channels: u16| {
        device.supported_output_configs().ok()?.find(|c| {
            c.channels() == channels && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
        })
    };

    let supported = supports(1)
        .or_else(|| supports(2))
        .ok_or_else(|| Error::Device("no suitable output config found".to_string()))?;

    Ok(supported.with_sample_rate(rate).config())
}

impl DeviceContext for CpalOutputContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.mixer
            .lock()
            .map(|m| m.current_time())
            .unwrap_or_default()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::Device("output context already closed".to_string()));
        }
        if let Ok(mut stop) = self.stop.lock() {
            stop.take();
        }
        tracing::debug!("output context closed");
        Ok(())
    }
}

impl OutputContext for CpalOutputContext {
    fn start_source(
        &self,
        buffer: Arc<AudioBuffer>,
        when: f64,
        on_ended: EndedCallback,
    ) -> Result<Box<dyn SourceHandle>> {
        if self.is_closed() {
            return Err(Error::Audio("output context is closed".to_string()));
        }

        let mut mixer = self
            .mixer
            .lock()
            .map_err(|_| Error::Audio("mixer poisoned".to_string()))?;
        Ok(Box::new(mixer.schedule(buffer, when, on_ended)))
    }
}

impl Drop for CpalOutputContext {
    fn drop(&mut self) {
        if let Ok(mut stop) = self.stop.lock() {
            stop.take();
        }
    }
}
