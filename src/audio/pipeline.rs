//! Audio pipeline for one voice session
//!
//! Owns the input and output contexts of the session, turns microphone
//! samples into transport frames, and schedules received speech so that
//! consecutive chunks play back to back.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use super::codec::{self, AudioBuffer, CAPTURE_FRAME_SIZE, OUTPUT_SAMPLE_RATE};
use super::device::{DeviceContext, InputContext, MicrophoneStream, OutputContext};
use super::playback::{PlaybackClock, SourceRegistry};
use crate::{Error, Result};

/// Capture and playback state of a voice session
pub struct AudioPipeline {
    input: Arc<dyn InputContext>,
    output: Arc<dyn OutputContext>,
    clock: Mutex<PlaybackClock>,
    sources: SourceRegistry,
}

impl AudioPipeline {
    /// Build a pipeline over already-opened contexts
    #[must_use]
    pub fn new(input: Arc<dyn InputContext>, output: Arc<dyn OutputContext>) -> Self {
        Self {
            input,
            output,
            clock: Mutex::new(PlaybackClock::new()),
            sources: SourceRegistry::new(),
        }
    }

    /// Start pushing microphone frames
    ///
    /// Each frame holds `CAPTURE_FRAME_SIZE` samples and is delivered as
    /// soon as it fills. The receiver ends once capture stops.
    ///
    /// # Errors
    ///
    /// Returns error if the input context is closed
    pub fn start_capture(
        &self,
        stream: &dyn MicrophoneStream,
    ) -> Result<mpsc::UnboundedReceiver<Vec<f32>>> {
        let (tx, rx) = mpsc::unbounded_channel();

        self.input.attach(
            stream,
            CAPTURE_FRAME_SIZE,
            Box::new(move |frame| {
                // Receiver gone means the session is shutting down
                let _ = tx.send(frame);
            }),
        )?;

        tracing::debug!(
            sample_rate = self.input.sample_rate(),
            frame_size = CAPTURE_FRAME_SIZE,
            "capture started"
        );
        Ok(rx)
    }

    /// Decode a base64 chunk from the model and schedule it
    ///
    /// Returns the device time the chunk starts at.
    ///
    /// # Errors
    ///
    /// Returns error if the payload is not base64 or the output is closed
    pub fn play_chunk(&self, data: &str) -> Result<f64> {
        let bytes = codec::decode(data)?;
        let buffer = codec::decode_audio_data(&bytes, OUTPUT_SAMPLE_RATE, 1);
        self.schedule_playback(buffer)
    }

    /// Schedule `buffer` right after everything already queued
    ///
    /// # Errors
    ///
    /// Returns error if the output context is closed
    pub fn schedule_playback(&self, buffer: AudioBuffer) -> Result<f64> {
        if self.output.is_closed() {
            return Err(Error::Audio("output context is closed".to_string()));
        }

        let duration = buffer.duration();
        let start = {
            let mut clock = self
                .clock
                .lock()
                .map_err(|_| Error::Audio("playback clock poisoned".to_string()))?;
            clock.reserve(self.output.current_time(), duration)
        };

        let id = self.sources.next_id();
        let handle = self.output.start_source(
            Arc::new(buffer),
            start,
            self.sources.remove_on_complete(id),
        )?;
        self.sources.add(id, handle);

        tracing::trace!(start, duration, "scheduled playback chunk");
        Ok(start)
    }

    /// Silence all queued speech and rewind the cursor
    ///
    /// Returns how many sources were stopped.
    pub fn interrupt(&self) -> usize {
        let stopped = self.sources.stop_all();
        if let Ok(mut clock) = self.clock.lock() {
            clock.reset();
        }

        if stopped > 0 {
            tracing::debug!(stopped, "playback interrupted");
        }
        stopped
    }

    /// Stop capture and close both contexts
    ///
    /// Contexts that are already closed are left alone; close failures are
    /// logged and swallowed.
    pub fn close_contexts(&self) {
        self.input.detach();
        release_context("input", self.input.as_ref());
        release_context("output", self.output.as_ref());
    }

    /// Release everything the pipeline holds. Safe to call repeatedly.
    pub fn teardown(&self) {
        self.close_contexts();
        self.interrupt();
    }

    /// Number of sources still playing
    #[must_use]
    pub fn active_sources(&self) -> usize {
        self.sources.len()
    }

    /// Current playback cursor in device seconds
    #[must_use]
    pub fn cursor(&self) -> f64 {
        self.clock.lock().map(|c| c.cursor()).unwrap_or_default()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.input.is_closed() && self.output.is_closed()
    }
}

/// Close `context` unless it is already closed, logging failures
pub fn release_context(label: &str, context: &dyn DeviceContext) {
    if context.is_closed() {
        return;
    }
    if let Err(e) = context.close() {
        tracing::debug!(context = label, error = %e, "ignoring context close failure");
    }
}

impl std::fmt::Debug for AudioPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioPipeline")
            .field("sources", &self.sources)
            .field("cursor", &self.cursor())
            .finish_non_exhaustive()
    }
}
