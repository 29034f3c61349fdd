//! Configuration management for the tutor
//!
//! Values are layered, lowest precedence first: built-in defaults, the TOML
//! config file, environment variables (a `.env` file is loaded into the
//! environment at startup) and command-line flags.

pub mod file;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::prompt::find_theme;
use crate::transport::{TransportConfig, redact};
use crate::voice::{CHUNK_FRAMES, DEFAULT_TTS_MODEL, DEFAULT_TTS_VOICE, SAMPLE_RATE};
use crate::{Error, Result};

pub use file::TutorConfigFile;

/// Default service host
pub const DEFAULT_HOST: &str = "generativelanguage.googleapis.com";

/// Default streaming model
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-exp";

/// Path of the bidirectional streaming endpoint
pub const ENDPOINT_PATH: &str =
    "/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";

/// Default connect timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Tutor configuration
#[derive(Clone)]
pub struct Config {
    /// Credential for the streaming service (`GOOGLE_API_KEY`)
    pub api_key: String,

    /// Service host
    pub host: String,

    /// Model name
    pub model: String,

    /// HTTP proxy to tunnel the WebSocket through
    pub proxy: Option<Url>,

    /// Deadline for establishing the connection
    pub connect_timeout: Duration,

    /// Microphone configuration
    pub audio: AudioConfig,

    /// Spoken reply configuration
    pub voice: VoiceConfig,

    /// Practice theme chosen up front
    pub theme: Option<String>,
}

/// Microphone configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConfig {
    /// Capture rate in Hz
    pub sample_rate: u32,

    /// Frames per outbound chunk
    pub chunk_frames: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            chunk_frames: CHUNK_FRAMES,
        }
    }
}

/// Spoken reply configuration
#[derive(Clone)]
pub struct VoiceConfig {
    /// Speak replies aloud when a TTS key is available
    pub enabled: bool,

    /// `ElevenLabs` API key
    pub api_key: Option<String>,

    /// `ElevenLabs` voice identifier
    pub voice_id: String,

    /// `ElevenLabs` model
    pub model: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            voice_id: DEFAULT_TTS_VOICE.to_string(),
            model: DEFAULT_TTS_MODEL.to_string(),
        }
    }
}

impl fmt::Debug for VoiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceConfig")
            .field("enabled", &self.enabled)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("voice_id", &self.voice_id)
            .field("model", &self.model)
            .finish()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("host", &self.host)
            .field("model", &self.model)
            .field("proxy", &self.proxy.as_ref().map(redact))
            .field("connect_timeout", &self.connect_timeout)
            .field("audio", &self.audio)
            .field("voice", &self.voice)
            .field("theme", &self.theme)
            .finish()
    }
}

/// Values given on the command line; they win over every other layer
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Practice theme to start on
    pub theme: Option<String>,
    /// Model name, without the `models/` prefix
    pub model: Option<String>,
    /// HTTP proxy URL
    pub proxy: Option<String>,
    /// Print replies without speaking them
    pub no_voice: bool,
}

impl Config {
    /// Load configuration from the config file, the environment and `overrides`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `GOOGLE_API_KEY` is missing or a value is invalid
    pub fn load(overrides: &Overrides) -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(fc, &|name| std::env::var(name).ok(), overrides)
    }

    /// Merge the configuration layers
    ///
    /// `lookup` reads one environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the merged configuration is invalid
    pub fn resolve(
        fc: TutorConfigFile,
        lookup: &dyn Fn(&str) -> Option<String>,
        overrides: &Overrides,
    ) -> Result<Self> {
        let env = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let api_key = env("GOOGLE_API_KEY")
            .or(fc.api_keys.google)
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("GOOGLE_API_KEY is not set".to_string()))?;

        let host = env("LIVE_TUTOR_HOST")
            .or(fc.session.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let model = overrides
            .model
            .clone()
            .or_else(|| env("LIVE_TUTOR_MODEL"))
            .or(fc.session.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        let proxy = overrides
            .proxy
            .clone()
            .or_else(|| env("HTTP_PROXY"))
            .or_else(|| env("http_proxy"))
            .or(fc.session.proxy)
            .filter(|p| !p.trim().is_empty())
            .map(|p| {
                Url::parse(p.trim()).map_err(|e| Error::Config(format!("invalid proxy URL: {e}")))
            })
            .transpose()?;

        let timeout_secs = env("LIVE_TUTOR_CONNECT_TIMEOUT");
        let connect_timeout = parse_var("LIVE_TUTOR_CONNECT_TIMEOUT", timeout_secs)?
            .or(fc.session.connect_timeout_secs)
            .map_or(DEFAULT_CONNECT_TIMEOUT, Duration::from_secs);

        let audio = AudioConfig {
            sample_rate: parse_var("LIVE_TUTOR_SAMPLE_RATE", env("LIVE_TUTOR_SAMPLE_RATE"))?
                .or(fc.audio.sample_rate)
                .unwrap_or(SAMPLE_RATE),
            chunk_frames: parse_var("LIVE_TUTOR_CHUNK_FRAMES", env("LIVE_TUTOR_CHUNK_FRAMES"))?
                .or(fc.audio.chunk_frames)
                .unwrap_or(CHUNK_FRAMES),
        };

        let voice = VoiceConfig {
            enabled: !overrides.no_voice && fc.voice.enabled.unwrap_or(true),
            api_key: env("ELEVENLABS_API_KEY")
                .or(fc.api_keys.elevenlabs)
                .filter(|k| !k.trim().is_empty()),
            voice_id: env("ELEVENLABS_VOICE_ID")
                .or(fc.voice.voice_id)
                .unwrap_or_else(|| DEFAULT_TTS_VOICE.to_string()),
            model: env("ELEVENLABS_MODEL")
                .or(fc.voice.model)
                .unwrap_or_else(|| DEFAULT_TTS_MODEL.to_string()),
        };

        let theme = overrides
            .theme
            .clone()
            .or(fc.session.theme)
            .filter(|t| !t.trim().is_empty());

        let config = Self {
            api_key,
            host,
            model,
            proxy,
            connect_timeout,
            audio,
            voice,
            theme,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check values that cannot be used as given
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid value
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(Error::Config("GOOGLE_API_KEY is empty".to_string()));
        }
        if self.host.trim().is_empty() {
            return Err(Error::Config("host is empty".to_string()));
        }
        if self.model.trim().is_empty() {
            return Err(Error::Config("model is empty".to_string()));
        }
        if self.audio.sample_rate == 0 {
            return Err(Error::Config("sample rate must be positive".to_string()));
        }
        if self.audio.chunk_frames == 0 {
            return Err(Error::Config("chunk size must be positive".to_string()));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::Config("connect timeout must be positive".to_string()));
        }
        if let Some(theme) = &self.theme
            && find_theme(theme).is_none()
        {
            return Err(Error::Config(format!("unknown theme {theme:?}")));
        }
        Ok(())
    }

    /// Whether replies should be spoken
    #[must_use]
    pub const fn speech_enabled(&self) -> bool {
        self.voice.enabled && self.voice.api_key.is_some()
    }

    /// Streaming endpoint with the credential attached
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the host does not form a valid URL
    pub fn endpoint(&self) -> Result<Url> {
        let mut url = Url::parse(&format!("wss://{}{ENDPOINT_PATH}", self.host.trim()))
            .map_err(|e| Error::Config(format!("invalid host {:?}: {e}", self.host)))?;
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }

    /// Transport settings for [`crate::transport::connect`]
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the endpoint is invalid
    pub fn transport(&self) -> Result<TransportConfig> {
        Ok(TransportConfig {
            url: self.endpoint()?,
            proxy: self.proxy.clone(),
            connect_timeout: self.connect_timeout,
        })
    }
}

fn parse_var<T>(name: &str, value: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|e| Error::Config(format!("invalid {name} {v:?}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn resolve_with(
        vars: &[(&str, &str)],
        fc: TutorConfigFile,
        overrides: &Overrides,
    ) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::resolve(fc, &|name| vars.get(name).cloned(), overrides)
    }

    #[test]
    fn test_defaults() {
        let config =
            resolve_with(&[("GOOGLE_API_KEY", "g-key")], TutorConfigFile::default(), &Overrides::default())
                .unwrap();

        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
        assert_eq!(config.audio, AudioConfig::default());
        assert!(config.proxy.is_none());
        assert!(config.voice.enabled);
        assert!(!config.speech_enabled());
    }

    #[test]
    fn test_missing_api_key() {
        let err = resolve_with(&[], TutorConfigFile::default(), &Overrides::default()).unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("GOOGLE_API_KEY")));

        let err = resolve_with(
            &[("GOOGLE_API_KEY", "  ")],
            TutorConfigFile::default(),
            &Overrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_layer_precedence() {
        let fc = file::parse_config(
            r#"
            [session]
            model = "file-model"
            theme = "social"

            [audio]
            chunk_frames = 256

            [api_keys]
            google = "file-key"
            "#,
        )
        .unwrap();
        let overrides = Overrides {
            model: Some("cli-model".to_string()),
            ..Overrides::default()
        };

        let config = resolve_with(
            &[("GOOGLE_API_KEY", "env-key"), ("LIVE_TUTOR_CHUNK_FRAMES", "1024")],
            fc,
            &overrides,
        )
        .unwrap();

        assert_eq!(config.api_key, "env-key");
        assert_eq!(config.model, "cli-model");
        assert_eq!(config.audio.chunk_frames, 1024);
        assert_eq!(config.theme.as_deref(), Some("social"));
    }

    #[test]
    fn test_zero_chunk_rejected() {
        let err = resolve_with(
            &[("GOOGLE_API_KEY", "k"), ("LIVE_TUTOR_CHUNK_FRAMES", "0")],
            TutorConfigFile::default(),
            &Overrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("chunk")));
    }

    #[test]
    fn test_bad_number_rejected() {
        let err = resolve_with(
            &[("GOOGLE_API_KEY", "k"), ("LIVE_TUTOR_SAMPLE_RATE", "fast")],
            TutorConfigFile::default(),
            &Overrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("LIVE_TUTOR_SAMPLE_RATE")));
    }

    #[test]
    fn test_unknown_theme_rejected() {
        let overrides = Overrides {
            theme: Some("cooking".to_string()),
            ..Overrides::default()
        };
        assert!(resolve_with(&[("GOOGLE_API_KEY", "k")], TutorConfigFile::default(), &overrides).is_err());
    }

    #[test]
    fn test_endpoint_carries_key() {
        let config =
            resolve_with(&[("GOOGLE_API_KEY", "g key")], TutorConfigFile::default(), &Overrides::default())
                .unwrap();
        let url = config.endpoint().unwrap();

        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.host_str(), Some(DEFAULT_HOST));
        assert_eq!(url.path(), ENDPOINT_PATH);
        assert_eq!(url.query(), Some("key=g+key"));
    }

    #[test]
    fn test_proxy_and_voice() {
        let overrides = Overrides {
            no_voice: true,
            ..Overrides::default()
        };
        let config = resolve_with(
            &[
                ("GOOGLE_API_KEY", "k"),
                ("HTTP_PROXY", "http://127.0.0.1:7890"),
                ("ELEVENLABS_API_KEY", "xi"),
            ],
            TutorConfigFile::default(),
            &overrides,
        )
        .unwrap();

        assert_eq!(config.proxy.as_ref().map(Url::as_str), Some("http://127.0.0.1:7890/"));
        assert_eq!(config.voice.api_key.as_deref(), Some("xi"));
        assert!(!config.speech_enabled());

        let err = resolve_with(
            &[("GOOGLE_API_KEY", "k"), ("HTTP_PROXY", "not a url")],
            TutorConfigFile::default(),
            &Overrides::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = resolve_with(
            &[("GOOGLE_API_KEY", "super-secret"), ("ELEVENLABS_API_KEY", "xi-secret")],
            TutorConfigFile::default(),
            &Overrides::default(),
        )
        .unwrap();
        let shown = format!("{config:?}");
        assert!(!shown.contains("super-secret"));
        assert!(!shown.contains("xi-secret"));
    }
}
