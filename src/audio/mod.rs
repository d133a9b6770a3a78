//! Audio pipeline
//!
//! Microphone capture and wire encoding on the way out; decoding and
//! gapless scheduling of synthesized speech on the way back.

mod codec;
mod device;
mod hardware;
mod pipeline;
mod playback;

pub use codec::{
    AudioBuffer, AudioChunk, CAPTURE_FRAME_SIZE, INPUT_MIME_TYPE, INPUT_SAMPLE_RATE,
    OUTPUT_SAMPLE_RATE, decode, decode_audio_data, encode,
};
pub use device::{
    AudioBackend, DeviceContext, EndedCallback, InputContext, MicrophoneStream, OutputContext,
    SampleTap, SourceHandle,
};
pub use hardware::{CpalBackend, CpalMicrophone, CpalOutputContext, FramingInputContext};
pub use pipeline::{AudioPipeline, release_context};
pub use playback::{PlaybackClock, SourceRegistry};
