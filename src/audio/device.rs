//! Audio hardware capabilities
//!
//! The session core only talks to these traits. `CpalBackend` is the
//! hardware implementation; tests provide their own.

use std::sync::Arc;

use async_trait::async_trait;

use super::AudioBuffer;
use crate::Result;

/// Callback receiving raw microphone samples as the device delivers them
pub type SampleTap = Box<dyn FnMut(&[f32]) + Send>;

/// Callback fired once when a scheduled source finishes on its own
pub type EndedCallback = Box<dyn FnOnce() + Send>;

/// Opens the microphone and device contexts for one voice session
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Acquire microphone access
    ///
    /// # Errors
    ///
    /// Returns error if no input device exists or access is denied
    async fn acquire_microphone(&self) -> Result<Arc<dyn MicrophoneStream>>;

    /// Open a capture context running at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the context cannot be created
    async fn open_input(&self, sample_rate: u32) -> Result<Arc<dyn InputContext>>;

    /// Open a playback context running at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    async fn open_output(&self, sample_rate: u32) -> Result<Arc<dyn OutputContext>>;
}

/// A live microphone stream and its hardware tracks
pub trait MicrophoneStream: Send + Sync {
    /// Route captured samples to `tap`, replacing any previous tap
    fn set_tap(&self, tap: Option<SampleTap>);

    /// Stop the hardware tracks. Calling this again is a no-op.
    fn stop_tracks(&self);

    /// Whether the tracks are still capturing
    fn is_live(&self) -> bool;
}

/// Common surface of input and output contexts
pub trait DeviceContext: Send + Sync {
    fn sample_rate(&self) -> u32;

    /// Device clock in seconds since the context was opened
    fn current_time(&self) -> f64;

    fn is_closed(&self) -> bool;

    /// Release the device
    ///
    /// # Errors
    ///
    /// Returns error if the context was already closed or the device refuses
    fn close(&self) -> Result<()>;
}

/// Capture context that slices microphone samples into fixed frames
pub trait InputContext: DeviceContext {
    /// Attach `stream`, delivering each complete frame of `frame_size`
    /// samples to `sink` as soon as it fills
    ///
    /// # Errors
    ///
    /// Returns error if the context is closed
    fn attach(
        &self,
        stream: &dyn MicrophoneStream,
        frame_size: usize,
        sink: Box<dyn FnMut(Vec<f32>) + Send>,
    ) -> Result<()>;

    /// Stop delivering frames from the attached stream
    fn detach(&self);
}

/// Playback context that renders buffers at scheduled device times
pub trait OutputContext: DeviceContext {
    /// Start `buffer` at device time `when` (seconds)
    ///
    /// `on_ended` fires once if the source plays to completion; it does not
    /// fire for sources stopped through their handle.
    ///
    /// # Errors
    ///
    /// Returns error if the context is closed
    fn start_source(
        &self,
        buffer: Arc<AudioBuffer>,
        when: f64,
        on_ended: EndedCallback,
    ) -> Result<Box<dyn SourceHandle>>;
}

/// Handle to one scheduled playback source
pub trait SourceHandle: Send + Sync {
    /// Stop the source immediately
    ///
    /// # Errors
    ///
    /// Returns error if the source already finished or was stopped
    fn stop(&self) -> Result<()>;

    fn is_finished(&self) -> bool;
}
