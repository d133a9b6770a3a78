//! Atelier Studio - voice-driven image creation
//!
//! The user talks to a realtime audio model; the model answers with speech
//! and calls creative tools that generate or edit the image on the canvas.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  frames   ┌──────────────────┐   JSON    ┌──────────────┐
//! │ AudioPipeline│──────────▶│ StreamingSession │◀─────────▶│ Live model   │
//! │ capture/play │◀──────────│                  │           └──────────────┘
//! └──────────────┘   audio   └────────┬─────────┘
//!                                     │ tool calls
//!                            ┌────────▼─────────┐  request  ┌──────────────┐
//!                            │ToolCallDispatcher│──────────▶│ Image model  │
//!                            └────────┬─────────┘           └──────────────┘
//!                                     │
//!                            ┌────────▼─────────┐  events   ┌──────────────┐
//!                            │   StudioStore    │──────────▶│ API / UI     │
//!                            └──────────────────┘           └──────────────┘
//! ```
//!
//! [`VoiceController`] owns the lifecycle of all of the above for one
//! voice session.

pub mod api;
pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod realtime;
pub mod studio;
pub mod tools;

pub use config::Config;
pub use controller::{VoiceController, VoiceOutcome, VoicePhase};
pub use error::{Error, Result};
pub use realtime::{GeminiLiveTransport, RealtimeTransport, SessionConfig, StreamingSession};
pub use studio::{
    AppStatus, CreativeActionService, GeminiImageClient, ImageArtifact, ImageBackend,
    StudioEvent, StudioSnapshot, StudioStore,
};
pub use tools::{ToolCallDispatcher, ToolInvocation};
