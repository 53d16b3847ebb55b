use std::time::Duration;

use tonedial_foundation::PcmError;

/// A raw PCM payload: 16-bit signed little-endian samples, mono.
///
/// This is the only thing callers hand to the playback path. The buffer is
/// immutable once constructed; validation happens again at submission time
/// so a malformed buffer is dropped rather than played.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmAudio {
    pub sample_rate: u32,
    pub data: Vec<u8>,
}

impl PcmAudio {
    pub fn new(sample_rate: u32, data: Vec<u8>) -> Self {
        Self { sample_rate, data }
    }

    /// Encode i16 samples as little-endian bytes.
    pub fn from_samples(sample_rate: u32, samples: &[i16]) -> Self {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            data.extend_from_slice(&s.to_le_bytes());
        }
        Self { sample_rate, data }
    }

    pub fn validate(&self) -> Result<(), PcmError> {
        if self.sample_rate == 0 {
            return Err(PcmError::ZeroRate);
        }
        if self.data.is_empty() {
            return Err(PcmError::Empty);
        }
        if self.data.len() % 2 != 0 {
            return Err(PcmError::OddLength {
                len: self.data.len(),
            });
        }
        Ok(())
    }

    /// Decode the byte buffer back into i16 samples. Requires even length;
    /// callers go through `validate` first.
    pub fn to_samples(&self) -> Vec<i16> {
        self.data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    pub fn frame_count(&self) -> usize {
        self.data.len() / 2
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / self.sample_rate as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_round_trip_through_bytes() {
        let samples = [0i16, 1, -1, i16::MAX, i16::MIN, 12345];
        let audio = PcmAudio::from_samples(8000, &samples);
        assert_eq!(audio.data.len(), samples.len() * 2);
        assert_eq!(audio.to_samples(), samples);
    }

    #[test]
    fn validate_accepts_well_formed_buffer() {
        let audio = PcmAudio::new(8000, vec![0; 100]);
        assert_eq!(audio.validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_odd_length() {
        let audio = PcmAudio::new(8000, vec![0; 5]);
        assert_eq!(audio.validate(), Err(PcmError::OddLength { len: 5 }));
    }

    #[test]
    fn validate_rejects_empty_buffer() {
        let audio = PcmAudio::new(8000, Vec::new());
        assert_eq!(audio.validate(), Err(PcmError::Empty));
    }

    #[test]
    fn validate_rejects_zero_rate() {
        let audio = PcmAudio::new(0, vec![0; 4]);
        assert_eq!(audio.validate(), Err(PcmError::ZeroRate));
    }

    #[test]
    fn duration_counts_frames_not_bytes() {
        let audio = PcmAudio::new(8000, vec![0; 16000]);
        assert_eq!(audio.frame_count(), 8000);
        assert_eq!(audio.duration(), Duration::from_secs(1));
    }
}
