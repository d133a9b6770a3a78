//! Configuration management for Atelier studio
//!
//! Defaults, then the TOML file, then environment variables. CLI flags are
//! applied on top by the binary.

pub mod file;

use std::path::PathBuf;

use crate::realtime::{Modality, SessionConfig};
use crate::studio::DEFAULT_QUALITY_QUALIFIER;
use crate::{Error, Result, tools};

use file::StudioConfigFile;

pub const DEFAULT_REALTIME_MODEL: &str = "gemini-2.5-flash-native-audio-preview-09-2025";
pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_VOICE: &str = "Zephyr";
pub const DEFAULT_PORT: u16 = 18790;

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a friendly creative director in an image \
studio. Talk with the user about what they want to see. When they describe a new picture, call \
generateImage with a rich visual description. When they want to change the picture on screen, \
call editImage with a precise instruction. When they want words laid out on the picture as a \
poster or flyer, call posterLayout with the look they want and the exact text. Keep spoken \
replies short.";

/// Atelier studio configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Gemini API key (from `GEMINI_API_KEY` or the config file)
    pub gemini_api_key: Option<String>,

    /// Realtime voice session configuration
    pub realtime: RealtimeConfig,

    /// Image model configuration
    pub image: ImageConfig,

    /// HTTP API server configuration
    pub api_server: ApiServerConfig,
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    /// Live endpoint override
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ImageConfig {
    pub model: String,
    pub quality_qualifier: String,
    pub endpoint: Option<String>,
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port to listen on
    pub port: u16,

    /// Path to static files directory (web UI)
    pub static_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            realtime: RealtimeConfig {
                model: DEFAULT_REALTIME_MODEL.to_string(),
                voice: DEFAULT_VOICE.to_string(),
                system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
                endpoint: None,
            },
            image: ImageConfig {
                model: DEFAULT_IMAGE_MODEL.to_string(),
                quality_qualifier: DEFAULT_QUALITY_QUALIFIER.to_string(),
                endpoint: None,
            },
            api_server: ApiServerConfig {
                port: DEFAULT_PORT,
                static_dir: None,
            },
        }
    }
}

impl Config {
    /// Load configuration from the config file and the process environment
    ///
    /// # Errors
    ///
    /// Returns error if an environment variable holds an invalid value
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Build configuration from an already-loaded file and an environment
    /// lookup
    ///
    /// # Errors
    ///
    /// Returns error if an environment variable holds an invalid value
    pub fn from_sources(
        fc: StudioConfigFile,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = Self::default();
        let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match env("ATELIER_PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid ATELIER_PORT: {raw}")))?,
            None => fc.server.port.unwrap_or(defaults.api_server.port),
        };

        Ok(Self {
            gemini_api_key: env("GEMINI_API_KEY").or(fc.api_keys.gemini),
            realtime: RealtimeConfig {
                model: env("ATELIER_REALTIME_MODEL")
                    .or(fc.realtime.model)
                    .unwrap_or(defaults.realtime.model),
                voice: env("ATELIER_VOICE")
                    .or(fc.realtime.voice)
                    .unwrap_or(defaults.realtime.voice),
                system_instruction: env("ATELIER_SYSTEM_INSTRUCTION")
                    .or(fc.realtime.system_instruction)
                    .unwrap_or(defaults.realtime.system_instruction),
                endpoint: fc.realtime.endpoint,
            },
            image: ImageConfig {
                model: env("ATELIER_IMAGE_MODEL")
                    .or(fc.image.model)
                    .unwrap_or(defaults.image.model),
                quality_qualifier: fc
                    .image
                    .quality_qualifier
                    .unwrap_or(defaults.image.quality_qualifier),
                endpoint: fc.image.endpoint,
            },
            api_server: ApiServerConfig {
                port,
                static_dir: env("ATELIER_STATIC_DIR")
                    .or(fc.server.static_dir)
                    .map(PathBuf::from),
            },
        })
    }

    /// The Gemini API key, required by both remote models
    ///
    /// # Errors
    ///
    /// Returns error if no key is configured
    pub fn require_api_key(&self) -> Result<&str> {
        self.gemini_api_key.as_deref().ok_or_else(|| {
            Error::Config(
                "GEMINI_API_KEY is not set (env or [api_keys] gemini in config file)".to_string(),
            )
        })
    }

    /// Fixed realtime session configuration: audio responses, output
    /// transcription and the creative tool set
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            model: self.realtime.model.clone(),
            system_instruction: self.realtime.system_instruction.clone(),
            tools: tools::declarations(),
            response_modality: Modality::Audio,
            voice: self.realtime.voice.clone(),
            output_transcription: true,
        }
    }
}
