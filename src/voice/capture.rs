//! Audio capture from microphone

use std::sync::mpsc as std_mpsc;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    Device, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
    StreamError,
};
use tokio::sync::mpsc;

use super::{AudioChunk, BYTES_PER_SAMPLE};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Frames per captured chunk
pub const CHUNK_FRAMES: usize = 512;

/// Device callbacks buffered between the capture thread and the session
///
/// When the session stops reading (paused or shutting down) the oldest
/// audio is kept and newer callbacks are dropped.
const CALLBACK_BUFFER: usize = 256;

/// A source of fixed-size PCM chunks
#[async_trait]
pub trait AudioSource: Send {
    /// Read the next full chunk, suspending until enough audio is available
    ///
    /// Must be cancel-safe: a read dropped before completion loses no audio.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if the device stops delivering audio
    async fn read_chunk(&mut self) -> Result<AudioChunk>;

    /// Drop audio buffered while nobody was reading
    fn discard_pending(&mut self) {}
}

enum CaptureEvent {
    Samples(Vec<i16>),
    Failed(String),
}

/// Captures audio from the default input device
///
/// The cpal stream is not `Send`, so it lives on a dedicated thread for the
/// lifetime of the source. Dropping the source stops that thread and
/// releases the device.
pub struct MicrophoneSource {
    rx: mpsc::Receiver<CaptureEvent>,
    pending: Vec<i16>,
    failure: Option<String>,
    frames_per_chunk: usize,
    // Dropped with the source, which ends the capture thread
    _stop: std_mpsc::Sender<()>,
}

impl MicrophoneSource {
    /// Open the default input device and start capturing
    ///
    /// # Errors
    ///
    /// Returns [`Error::Device`] if no suitable input device can be opened
    pub fn open(sample_rate: u32, frames_per_chunk: usize) -> Result<Self> {
        if frames_per_chunk == 0 {
            return Err(Error::Config("chunk size must be at least one frame".to_string()));
        }

        let (tx, rx) = mpsc::channel(CALLBACK_BUFFER);
        let (ready_tx, ready_rx) = std_mpsc::sync_channel::<Result<String>>(1);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let stream = match start_input_stream(sample_rate, tx) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Blocks until the source is dropped
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("audio capture stopped");
            })?;

        let device = ready_rx
            .recv()
            .map_err(|_| Error::Device("capture thread exited during startup".to_string()))??;

        tracing::debug!(
            device,
            sample_rate,
            frames_per_chunk,
            "audio capture initialized"
        );

        Ok(Self {
            rx,
            pending: Vec::with_capacity(frames_per_chunk * 2),
            failure: None,
            frames_per_chunk,
            _stop: stop_tx,
        })
    }

    /// Chunk length in bytes
    #[must_use]
    pub const fn chunk_bytes(&self) -> usize {
        self.frames_per_chunk * BYTES_PER_SAMPLE
    }
}

#[async_trait]
impl AudioSource for MicrophoneSource {
    async fn read_chunk(&mut self) -> Result<AudioChunk> {
        while self.pending.len() < self.frames_per_chunk {
            if let Some(reason) = self.failure.take() {
                return Err(Error::Device(reason));
            }
            match self.rx.recv().await {
                Some(CaptureEvent::Samples(samples)) => self.pending.extend(samples),
                Some(CaptureEvent::Failed(reason)) => return Err(Error::Device(reason)),
                None => return Err(Error::Device("capture stream ended".to_string())),
            }
        }

        let rest = self.pending.split_off(self.frames_per_chunk);
        let frame = std::mem::replace(&mut self.pending, rest);
        Ok(AudioChunk::from_samples(&frame))
    }

    fn discard_pending(&mut self) {
        let mut dropped = self.pending.len();
        self.pending.clear();

        while let Ok(event) = self.rx.try_recv() {
            match event {
                CaptureEvent::Samples(samples) => dropped += samples.len(),
                CaptureEvent::Failed(reason) => self.failure = Some(reason),
            }
        }

        tracing::trace!(samples = dropped, "discarded buffered capture audio");
    }
}

/// Pick an input config at `sample_rate`, preferring the fewest channels
fn select_input_config(device: &Device, sample_rate: u32) -> Result<(StreamConfig, SampleFormat)> {
    let supported = device
        .supported_input_configs()
        .map_err(|e| Error::Device(e.to_string()))?
        .filter(|c| {
            c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .min_by_key(cpal::SupportedStreamConfigRange::channels)
        .ok_or_else(|| {
            Error::Device(format!("no input config supports {sample_rate} Hz"))
        })?;

    let format = supported.sample_format();
    let config = supported.with_sample_rate(SampleRate(sample_rate)).config();
    Ok((config, format))
}

/// Open and start the default input stream, returning it with the device name
fn start_input_stream(
    sample_rate: u32,
    tx: mpsc::Sender<CaptureEvent>,
) -> Result<(Stream, String)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Device("no input device available".to_string()))?;
    let name = device.name().unwrap_or_default();

    let (config, format) = select_input_config(&device, sample_rate)?;

    let stream = match format {
        SampleFormat::I16 => build_input_stream::<i16>(&device, &config, tx),
        SampleFormat::U16 => build_input_stream::<u16>(&device, &config, tx),
        SampleFormat::F32 => build_input_stream::<f32>(&device, &config, tx),
        other => Err(Error::Device(format!("unsupported sample format {other:?}"))),
    }?;

    stream.play().map_err(|e| Error::Device(e.to_string()))?;
    Ok((stream, name))
}

fn build_input_stream<T>(
    device: &Device,
    config: &StreamConfig,
    tx: mpsc::Sender<CaptureEvent>,
) -> Result<Stream>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let channels = usize::from(config.channels).max(1);
    let error_tx = tx.clone();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono: Vec<i16> = data.chunks(channels).map(downmix::<T>).collect();
                // Full buffer means the session is not reading; drop the audio
                let _ = tx.try_send(CaptureEvent::Samples(mono));
            },
            move |err| match err {
                StreamError::DeviceNotAvailable => {
                    tracing::error!("audio input device disconnected");
                    let _ = error_tx
                        .try_send(CaptureEvent::Failed("input device disconnected".to_string()));
                }
                StreamError::BackendSpecific { err } => {
                    tracing::warn!(error = %err, "audio capture error");
                }
            },
            None,
        )
        .map_err(|e| Error::Device(e.to_string()))
}

/// Average the channels of one frame into a single sample
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn downmix<T>(frame: &[T]) -> i16
where
    T: SizedSample,
    i16: FromSample<T>,
{
    if frame.len() == 1 {
        return i16::from_sample(frame[0]);
    }
    let sum: i32 = frame.iter().map(|&s| i32::from(i16::from_sample(s))).sum();
    (sum / frame.len() as i32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_mono_passthrough() {
        assert_eq!(downmix(&[1234i16]), 1234);
    }

    #[test]
    fn test_downmix_averages_channels() {
        assert_eq!(downmix(&[1000i16, 3000]), 2000);
        assert_eq!(downmix(&[i16::MAX, i16::MAX]), i16::MAX);
    }

    #[test]
    fn test_downmix_converts_float() {
        assert_eq!(downmix(&[0.0f32]), 0);
        assert!(downmix(&[1.0f32]) > 32000);
    }
}
