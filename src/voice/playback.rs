//! Audio playback to speakers

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, SampleRate, StreamConfig};
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// How often the blocking playback loop checks for completion
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Grace period past the expected duration before giving up
const COMPLETION_SLACK: Duration = Duration::from_millis(500);

/// Decoded mono audio ready to play
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate of `samples`
    pub sample_rate: u32,
}

/// Plays audio to the default output device
///
/// Playback blocks the calling thread; the async entry points move it onto
/// the blocking pool. Cancelling the token stops any playback in progress.
#[derive(Clone)]
pub struct AudioPlayback {
    device_name: String,
    cancel: CancellationToken,
}

impl AudioPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("no output device available".to_string()))?;
        let device_name = device.name().unwrap_or_default();

        tracing::debug!(device = %device_name, "audio playback initialized");

        Ok(Self {
            device_name,
            cancel: CancellationToken::new(),
        })
    }

    /// Stop playback when `cancel` fires
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Name of the output device
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Play mono f32 samples at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if playback fails
    pub async fn play(&self, samples: Vec<f32>, sample_rate: u32) -> Result<()> {
        let this = self.clone();
        let audio = DecodedAudio {
            samples,
            sample_rate,
        };
        tokio::task::spawn_blocking(move || this.play_blocking(audio))
            .await
            .map_err(|e| Error::Device(format!("playback task failed: {e}")))?
    }

    /// Play audio from MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if decoding or playback fails
    pub async fn play_mp3(&self, mp3_data: Vec<u8>) -> Result<()> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            let audio = decode_mp3(&mp3_data)?;
            this.play_blocking(audio)
        })
        .await
        .map_err(|e| Error::Device(format!("playback task failed: {e}")))?
    }

    /// Play decoded audio, blocking until it finishes or is cancelled
    fn play_blocking(&self, audio: DecodedAudio) -> Result<()> {
        if audio.samples.is_empty() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("no output device".to_string()))?;

        let (config, output_rate) = select_output_config(&device, audio.sample_rate)?;
        let channels = usize::from(config.channels).max(1);

        let samples = Arc::new(resample_linear(&audio.samples, audio.sample_rate, output_rate));
        let sample_count = samples.len();
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        let stream = {
            let samples = Arc::clone(&samples);
            let position = Arc::clone(&position);
            let finished = Arc::clone(&finished);

            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for frame in data.chunks_mut(channels) {
                            let pos = position.load(Ordering::Relaxed);
                            let sample = samples.get(pos).copied().unwrap_or_else(|| {
                                finished.store(true, Ordering::Release);
                                0.0
                            });
                            frame.fill(sample);
                            if pos < samples.len() {
                                position.store(pos + 1, Ordering::Relaxed);
                            }
                        }
                    },
                    |err| {
                        tracing::error!(error = %err, "audio playback error");
                    },
                    None,
                )
                .map_err(|e| Error::Device(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Device(e.to_string()))?;

        let duration_ms = (sample_count as u64 * 1000) / u64::from(output_rate);
        let deadline = Instant::now() + Duration::from_millis(duration_ms) + COMPLETION_SLACK;

        while !finished.load(Ordering::Acquire) {
            if self.cancel.is_cancelled() {
                tracing::debug!("playback cancelled");
                break;
            }
            if Instant::now() > deadline {
                tracing::warn!("playback did not report completion, stopping");
                break;
            }
            std::thread::sleep(POLL_INTERVAL);
        }

        // Let the device drain its last buffer
        std::thread::sleep(Duration::from_millis(100));

        drop(stream);
        tracing::debug!(samples = sample_count, rate = output_rate, "playback complete");

        Ok(())
    }
}

/// Pick an f32 output config, preferring mono and the source sample rate
///
/// Falls back to the device default rate when `preferred_rate` is not
/// supported; the caller resamples.
fn select_output_config(device: &Device, preferred_rate: u32) -> Result<(StreamConfig, u32)> {
    let ranges: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| Error::Device(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    let exact = ranges
        .iter()
        .filter(|c| {
            c.min_sample_rate() <= SampleRate(preferred_rate)
                && c.max_sample_rate() >= SampleRate(preferred_rate)
        })
        .min_by_key(|c| c.channels());

    if let Some(range) = exact {
        let config = range.clone().with_sample_rate(SampleRate(preferred_rate)).config();
        return Ok((config, preferred_rate));
    }

    let fallback = device
        .default_output_config()
        .map_err(|e| Error::Device(e.to_string()))?;
    if fallback.sample_format() != SampleFormat::F32 {
        return Err(Error::Device("no f32 output config available".to_string()));
    }

    let rate = fallback.sample_rate().0;
    tracing::debug!(preferred_rate, rate, "resampling for output device");
    Ok((fallback.config(), rate))
}

/// Linear-interpolation resampler, good enough for speech playback
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let out_len = ((samples.len() as f64) / ratio).round() as usize;

    (0..out_len)
        .map(|i| {
            let src = i as f64 * ratio;
            let idx = src.floor() as usize;
            let frac = (src - idx as f64) as f32;
            let a = samples[idx.min(samples.len() - 1)];
            let b = samples[(idx + 1).min(samples.len() - 1)];
            (b - a).mul_add(frac, a)
        })
        .collect()
}

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns [`Error::Synthesis`] if the stream is not valid MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if sample_rate == 0 {
                    sample_rate = u32::try_from(frame.sample_rate).unwrap_or_default();
                }
                // Convert i16 samples to f32 and fold stereo down to mono
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|pair| {
                        let left = f32::from(pair[0]) / 32768.0;
                        let right = f32::from(pair.get(1).copied().unwrap_or(pair[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Synthesis(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() {
        return Err(Error::Synthesis("MP3 stream contained no audio".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}
