//! PCM audio chunks and loudness metrics

/// Mean absolute amplitude above which a chunk counts as voiced
///
/// In raw 16-bit sample units, not normalized.
pub const VOLUME_THRESHOLD: f32 = 200.0;

/// Bytes per 16-bit sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// A fixed-size buffer of 16-bit signed little-endian mono PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    data: Vec<u8>,
}

impl AudioChunk {
    /// Wrap raw little-endian PCM bytes
    #[must_use]
    pub const fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Encode samples as little-endian PCM
    #[must_use]
    pub fn from_samples(samples: &[i16]) -> Self {
        let data = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self { data }
    }

    /// Raw PCM bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the chunk holds no audio
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decoded samples; a trailing odd byte is ignored
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.data
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
    }

    /// Mean absolute sample value
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn loudness(&self) -> f32 {
        let (sum, count) = self
            .samples()
            .fold((0u64, 0u64), |(sum, count), s| {
                (sum + u64::from(s.unsigned_abs()), count + 1)
            });

        if count == 0 {
            return 0.0;
        }
        (sum as f64 / count as f64) as f32
    }

    /// Whether the chunk is loud enough to count as speech
    #[must_use]
    pub fn is_voiced(&self) -> bool {
        self.loudness() > VOLUME_THRESHOLD
    }
}

/// Rough 0-100 delivery score for a chunk of speech
///
/// Blends mean energy with zero-crossing density. Only a coarse energy cue,
/// not a pronunciation assessment.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn pronunciation_score(chunk: &AudioChunk) -> u8 {
    let samples: Vec<i16> = chunk.samples().collect();
    if samples.is_empty() {
        return 0;
    }

    let energy = f64::from(chunk.loudness());
    let zero_crossings = samples
        .windows(2)
        .filter(|w| (w[0] < 0) != (w[1] < 0))
        .count() as f64;

    let energy_score = (energy / 1000.0).min(100.0);
    let rhythm_score = (zero_crossings / 100.0).min(100.0);

    (0.6f64.mul_add(energy_score, 0.4 * rhythm_score)).clamp(0.0, 100.0) as u8
}

/// Running average of scores across the voiced chunks of one utterance
#[derive(Debug, Default)]
pub struct UtteranceMeter {
    total: u32,
    chunks: u32,
}

impl UtteranceMeter {
    /// Record a voiced chunk
    pub fn record(&mut self, chunk: &AudioChunk) {
        self.total += u32::from(pronunciation_score(chunk));
        self.chunks += 1;
    }

    /// Close the utterance and return its average score, if any chunk was voiced
    #[allow(clippy::cast_possible_truncation)]
    pub fn finish(&mut self) -> Option<u8> {
        if self.chunks == 0 {
            return None;
        }
        let average = self.total / self.chunks;
        *self = Self::default();
        Some(average.min(100) as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loudness_is_mean_absolute_value() {
        let chunk = AudioChunk::from_samples(&[100, -300, 200, -400]);
        assert!((chunk.loudness() - 250.0).abs() < f32::EPSILON);
        assert!(chunk.is_voiced());
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let chunk = AudioChunk::from_samples(&[200, -200, 200, -200]);
        assert!(!chunk.is_voiced());
    }

    #[test]
    fn test_silence_is_unvoiced() {
        let chunk = AudioChunk::from_samples(&[0; 512]);
        assert!((chunk.loudness()).abs() < f32::EPSILON);
        assert!(!chunk.is_voiced());
    }

    #[test]
    fn test_extreme_negative_sample() {
        let chunk = AudioChunk::from_samples(&[i16::MIN]);
        assert!((chunk.loudness() - 32768.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_samples_little_endian() {
        let chunk = AudioChunk::from_bytes(vec![0x34, 0x12, 0xff, 0xff, 0x01]);
        let samples: Vec<i16> = chunk.samples().collect();
        assert_eq!(samples, vec![0x1234, -1]);
        assert_eq!(chunk.len(), 5);
    }

    #[test]
    fn test_empty_chunk() {
        let chunk = AudioChunk::from_bytes(Vec::new());
        assert!(chunk.is_empty());
        assert!((chunk.loudness()).abs() < f32::EPSILON);
        assert_eq!(pronunciation_score(&chunk), 0);
    }

    #[test]
    fn test_score_rises_with_energy_and_crossings() {
        let quiet = AudioChunk::from_samples(&[10; 512]);
        let busy: Vec<i16> = (0..512).map(|i| if i % 2 == 0 { 20_000 } else { -20_000 }).collect();
        let busy = AudioChunk::from_samples(&busy);
        assert_eq!(pronunciation_score(&quiet), 0);
        assert!(pronunciation_score(&busy) > pronunciation_score(&quiet));
        assert!(pronunciation_score(&busy) <= 100);
    }

    #[test]
    fn test_meter_averages_and_resets() {
        let busy: Vec<i16> = (0..512).map(|i| if i % 2 == 0 { 20_000 } else { -20_000 }).collect();
        let busy = AudioChunk::from_samples(&busy);
        let expected = pronunciation_score(&busy);

        let mut meter = UtteranceMeter::default();
        assert_eq!(meter.finish(), None);
        meter.record(&busy);
        meter.record(&busy);
        assert_eq!(meter.finish(), Some(expected));
        assert_eq!(meter.finish(), None);
    }
}
