//! TOML configuration file loading
//!
//! Supports `~/.config/atelier/studio/config.toml` as a persistent config
//! source. All fields are optional; the file is a partial overlay on top of
//! defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct StudioConfigFile {
    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Realtime voice session configuration
    #[serde(default)]
    pub realtime: RealtimeFileConfig,

    /// Image model configuration
    #[serde(default)]
    pub image: ImageFileConfig,

    /// Local API server configuration
    #[serde(default)]
    pub server: ServerFileConfig,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub gemini: Option<String>,
}

/// Realtime session settings
#[derive(Debug, Default, Deserialize)]
pub struct RealtimeFileConfig {
    /// Live model identifier
    pub model: Option<String>,

    /// Prebuilt voice name (e.g. "Zephyr")
    pub voice: Option<String>,

    pub system_instruction: Option<String>,

    /// Override for the Live WebSocket endpoint
    pub endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ImageFileConfig {
    pub model: Option<String>,

    /// Suffix appended to generation prompts
    pub quality_qualifier: Option<String>,

    pub endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,

    /// Browser UI directory
    pub static_dir: Option<String>,
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the contents are not valid TOML for the schema
pub fn parse_config(content: &str) -> Result<StudioConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file from the standard path
///
/// Returns `StudioConfigFile::default()` if the file doesn't exist or can't
/// be parsed.
#[must_use]
pub fn load_config_file() -> StudioConfigFile {
    config_file_path().map_or_else(StudioConfigFile::default, |path| load_config_from(&path))
}

/// Load a config file from `path`, falling back to defaults
#[must_use]
pub fn load_config_from(path: &Path) -> StudioConfigFile {
    if !path.exists() {
        return StudioConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                StudioConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            StudioConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/atelier/studio/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("atelier")
            .join("studio")
            .join("config.toml")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_parses() {
        let config = parse_config(
            r#"
            [realtime]
            voice = "Puck"

            [server]
            port = 9000
            "#,
        )
        .unwrap();

        assert_eq!(config.realtime.voice.as_deref(), Some("Puck"));
        assert_eq!(config.server.port, Some(9000));
        assert!(config.realtime.model.is_none());
        assert!(config.api_keys.gemini.is_none());
    }

    #[test]
    fn invalid_file_is_an_error() {
        assert!(parse_config("[server]\nport = \"not a number\"").is_err());
    }

    #[test]
    fn missing_or_broken_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();

        let missing = load_config_from(&dir.path().join("config.toml"));
        assert!(missing.server.port.is_none());

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "this is = = not toml").unwrap();
        assert!(load_config_from(&broken).image.model.is_none());
    }

    #[test]
    fn file_on_disk_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[image]\nmodel = \"custom-image\"\n").unwrap();

        assert_eq!(
            load_config_from(&path).image.model.as_deref(),
            Some("custom-image")
        );
    }
}
