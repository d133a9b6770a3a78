//! Image studio
//!
//! Current image, bounded history and status, plus the creative actions
//! that change them.

mod gemini;
mod service;
mod state;

pub use gemini::{API_ENDPOINT, GeminiImageClient};
pub use service::{
    CreativeActionService, DEFAULT_QUALITY_QUALIFIER, ImageBackend, ImageRequest, InlineImage,
    ResponsePart,
};
pub use state::{
    AppStatus, HISTORY_CAPACITY, ImageArtifact, ImageHistory, StudioEvent, StudioSnapshot,
    StudioStore,
};
