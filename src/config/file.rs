//! TOML configuration file loading
//!
//! Supports `~/.config/live-tutor/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

use crate::Result;

/// Environment variable overriding the config file location
pub const CONFIG_PATH_ENV: &str = "LIVE_TUTOR_CONFIG";

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TutorConfigFile {
    /// Streaming session configuration
    #[serde(default)]
    pub session: SessionFileConfig,

    /// Microphone configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Spoken reply configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// Streaming session configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionFileConfig {
    /// Service host (e.g. "generativelanguage.googleapis.com")
    pub host: Option<String>,

    /// Model name (e.g. "gemini-2.0-flash-exp")
    pub model: Option<String>,

    /// Practice theme (e.g. "travel")
    pub theme: Option<String>,

    /// HTTP proxy URL
    pub proxy: Option<String>,

    /// Connect timeout in seconds
    pub connect_timeout_secs: Option<u64>,
}

/// Microphone configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AudioFileConfig {
    /// Capture rate in Hz
    pub sample_rate: Option<u32>,

    /// Frames per outbound chunk
    pub chunk_frames: Option<usize>,
}

/// Spoken reply configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VoiceFileConfig {
    /// Speak replies aloud
    pub enabled: Option<bool>,

    /// `ElevenLabs` voice identifier
    pub voice_id: Option<String>,

    /// `ElevenLabs` model (e.g. "`eleven_flash_v2_5`")
    pub model: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiKeysFileConfig {
    /// Streaming service key
    pub google: Option<String>,
    /// Speech synthesis key
    pub elevenlabs: Option<String>,
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the contents are not valid TOML for this schema
pub fn parse_config(content: &str) -> Result<TutorConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file from the standard path
///
/// Returns `TutorConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> TutorConfigFile {
    let Some(path) = config_file_path() else {
        return TutorConfigFile::default();
    };

    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file");
        return TutorConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
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
                TutorConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            TutorConfigFile::default()
        }
    }
}

/// Return the config file path: `$LIVE_TUTOR_CONFIG`, else `~/.config/live-tutor/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
        return Some(PathBuf::from(path));
    }

    directories::BaseDirs::new().map(|d| d.config_dir().join("live-tutor").join("config.toml"))
}
