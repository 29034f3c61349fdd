//! Voice processing module
//!
//! Handles microphone capture, chunk loudness, speech synthesis and playback.

mod capture;
mod chunk;
mod playback;
mod speaker;
mod tts;

pub use capture::{AudioSource, CHUNK_FRAMES, MicrophoneSource, SAMPLE_RATE};
pub use chunk::{
    AudioChunk, BYTES_PER_SAMPLE, UtteranceMeter, VOLUME_THRESHOLD, pronunciation_score,
};
pub use playback::{AudioPlayback, DecodedAudio, decode_mp3, resample_linear};
pub use speaker::{Speaker, SpeechOutput};
pub use tts::{DEFAULT_TTS_MODEL, DEFAULT_TTS_VOICE, ELEVENLABS_BASE_URL, TextToSpeech};
