//! Spoken output for completed turns

use async_trait::async_trait;

use super::{AudioPlayback, TextToSpeech};
use crate::Result;

/// Turns text into audible speech
///
/// `speak` returns once playback has finished, so a caller awaiting it is
/// held for the duration of the audio.
#[async_trait]
pub trait Speaker: Send + Sync {
    /// Synthesize and play `text`
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    async fn speak(&self, text: &str) -> Result<()>;
}

/// ElevenLabs synthesis played through the default output device
pub struct SpeechOutput {
    tts: TextToSpeech,
    playback: AudioPlayback,
}

impl SpeechOutput {
    /// Combine a TTS client with a playback device
    #[must_use]
    pub const fn new(tts: TextToSpeech, playback: AudioPlayback) -> Self {
        Self { tts, playback }
    }
}

#[async_trait]
impl Speaker for SpeechOutput {
    async fn speak(&self, text: &str) -> Result<()> {
        let audio = self.tts.synthesize(text).await?;
        tracing::debug!(bytes = audio.len(), "speech synthesized");

        self.playback.play_mp3(audio).await
    }
}
