//! Gemini image model client

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::service::{ImageBackend, ImageRequest, InlineImage, ResponsePart};
use crate::{Error, Result};

/// REST endpoint of the Generative Language API
pub const API_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Generates and edits images through `generateContent`
pub struct GeminiImageClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl GeminiImageClient {
    /// Create a client for `model`
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(Error::Config(
                "Gemini API key required for image generation".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model: model.into(),
            endpoint: API_ENDPOINT.to_string(),
        })
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum RequestPart<'a> {
    InlineData {
        #[serde(rename = "mimeType")]
        mime_type: &'a str,
        data: &'a str,
    },
    Text(&'a str),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: [&'static str; 2],
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    inline_data: Option<InlineImage>,
}

fn build_request(request: &ImageRequest) -> GenerateRequest<'_> {
    let mut parts = Vec::with_capacity(2);
    if let Some(image) = &request.image {
        parts.push(RequestPart::InlineData {
            mime_type: &image.mime_type,
            data: &image.data,
        });
    }
    parts.push(RequestPart::Text(&request.prompt));

    GenerateRequest {
        contents: vec![RequestContent { parts }],
        generation_config: GenerationConfig {
            response_modalities: ["TEXT", "IMAGE"],
        },
    }
}

fn response_parts(response: GenerateResponse) -> Vec<ResponsePart> {
    response
        .candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .filter_map(|part| match (part.inline_data, part.text) {
            (Some(image), _) => Some(ResponsePart::InlineData(image)),
            (None, Some(text)) => Some(ResponsePart::Text(text)),
            (None, None) => None,
        })
        .collect()
}

#[async_trait]
impl ImageBackend for GeminiImageClient {
    async fn generate_content(&self, request: &ImageRequest) -> Result<Vec<ResponsePart>> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&build_request(request))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Creative(format!("Gemini image error {status}: {body}")));
        }

        let body: GenerateResponse = response.json().await?;
        Ok(response_parts(body))
    }
}

impl std::fmt::Debug for GeminiImageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiImageClient")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
