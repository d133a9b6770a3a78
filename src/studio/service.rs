//! Creative actions - generate, edit, upload and select images

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::state::{AppStatus, ImageArtifact, StudioStore};
use crate::{Error, Result};

/// Appended to every generation prompt
pub const DEFAULT_QUALITY_QUALIFIER: &str =
    ", high quality, highly detailed, striking composition, professional lighting";

/// Inline image payload as exchanged with the image model
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineImage {
    pub mime_type: String,
    /// Base64 payload
    pub data: String,
}

/// One request to the image model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub prompt: String,
    /// Source image for edits
    pub image: Option<InlineImage>,
}

/// One part of the image model's answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePart {
    Text(String),
    InlineData(InlineImage),
}

/// Image model capability
#[async_trait]
pub trait ImageBackend: Send + Sync {
    /// Run `request` and return the response parts in order
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the model rejects it
    async fn generate_content(&self, request: &ImageRequest) -> Result<Vec<ResponsePart>>;
}

/// Runs creative actions against the image model and publishes results to
/// the studio
pub struct CreativeActionService {
    backend: Arc<dyn ImageBackend>,
    store: Arc<StudioStore>,
    quality_qualifier: String,
}

impl CreativeActionService {
    #[must_use]
    pub fn new(backend: Arc<dyn ImageBackend>, store: Arc<StudioStore>) -> Self {
        Self {
            backend,
            store,
            quality_qualifier: DEFAULT_QUALITY_QUALIFIER.to_string(),
        }
    }

    #[must_use]
    pub fn with_quality_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.quality_qualifier = qualifier.into();
        self
    }

    #[must_use]
    pub fn store(&self) -> &Arc<StudioStore> {
        &self.store
    }

    /// Generate a new image from `prompt`
    ///
    /// The result becomes the current image and is added to history.
    /// Status is `Generating` for the duration of the request.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response has no image
    pub async fn generate(&self, prompt: &str) -> Result<ImageArtifact> {
        self.store.set_status(AppStatus::Generating).await;

        let request = ImageRequest {
            prompt: format!("{prompt}{}", self.quality_qualifier),
            image: None,
        };
        let result = self.run(&request, prompt).await;

        self.store.restore_status(AppStatus::Generating).await;
        result
    }

    /// Apply `instruction` to the current image
    ///
    /// Returns `Ok(None)` without calling the model if there is no current
    /// image.
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response has no image
    pub async fn edit(&self, instruction: &str) -> Result<Option<ImageArtifact>> {
        let Some(current) = self.store.current_image().await else {
            return Ok(None);
        };

        self.store.set_status(AppStatus::Editing).await;

        let request = ImageRequest {
            prompt: instruction.to_string(),
            image: Some(InlineImage {
                mime_type: current.mime_type,
                data: current.data,
            }),
        };
        let result = self.run(&request, instruction).await;

        self.store.restore_status(AppStatus::Editing).await;
        result.map(Some)
    }

    /// Make an uploaded image current
    ///
    /// # Errors
    ///
    /// Returns error if `bytes` is empty or `mime_type` is not an image type
    pub async fn upload(&self, bytes: &[u8], mime_type: &str) -> Result<ImageArtifact> {
        if bytes.is_empty() {
            return Err(Error::Creative("uploaded image is empty".to_string()));
        }
        if !mime_type.starts_with("image/") {
            return Err(Error::Creative(format!(
                "unsupported upload type: {mime_type}"
            )));
        }

        let artifact = ImageArtifact::from_bytes(bytes, mime_type);
        self.store.publish(artifact.clone()).await;
        Ok(artifact)
    }

    /// Make the history entry at `index` current
    pub async fn select(&self, index: usize) -> Option<ImageArtifact> {
        self.store.select(index).await
    }

    async fn run(&self, request: &ImageRequest, prompt: &str) -> Result<ImageArtifact> {
        let parts = match self.backend.generate_content(request).await {
            Ok(parts) => parts,
            Err(e) => {
                tracing::warn!(error = %e, "image request failed");
                return Err(e);
            }
        };

        let image = parts.into_iter().find_map(|part| match part {
            ResponsePart::InlineData(image) => Some(image),
            ResponsePart::Text(text) => {
                tracing::debug!(%text, "image model commentary");
                None
            }
        });

        let Some(image) = image else {
            tracing::warn!("image model returned no image");
            return Err(Error::Creative("response contained no image".to_string()));
        };

        let artifact = ImageArtifact::new(image.data, image.mime_type, Some(prompt.to_string()));
        self.store.publish(artifact.clone()).await;
        Ok(artifact)
    }
}

impl std::fmt::Debug for CreativeActionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreativeActionService")
            .field("quality_qualifier", &self.quality_qualifier)
            .finish_non_exhaustive()
    }
}
