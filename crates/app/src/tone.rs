//! DTMF tone synthesis: the dual-sine feedback clip played for each
//! accepted keypress, using the ITU Q.23 row/column frequency pairs.

use std::time::Duration;

use crate::keypad::DtmfKey;
use tonedial_audio::PcmAudio;

const ROW_FREQS: [f32; 4] = [697.0, 770.0, 852.0, 941.0];
const COL_FREQS: [f32; 3] = [1209.0, 1336.0, 1477.0];

/// Per-component amplitude; the two sines sum to at most ~16000, well
/// inside the i16 range.
const AMPLITUDE: f32 = 8000.0;

fn frequencies(key: DtmfKey) -> (f32, f32) {
    let (row, col) = match key.as_char() {
        '1' => (0, 0),
        '2' => (0, 1),
        '3' => (0, 2),
        '4' => (1, 0),
        '5' => (1, 1),
        '6' => (1, 2),
        '7' => (2, 0),
        '8' => (2, 1),
        '9' => (2, 2),
        '*' => (3, 0),
        '0' => (3, 1),
        '#' => (3, 2),
        _ => unreachable!("DtmfKey is validated at construction"),
    };
    (ROW_FREQS[row], COL_FREQS[col])
}

/// Synthesize the tone for `key` as 16-bit signed mono PCM at `sample_rate`.
pub fn dtmf_tone(key: DtmfKey, sample_rate: u32, duration: Duration) -> PcmAudio {
    let (f_low, f_high) = frequencies(key);
    let n = (sample_rate as f64 * duration.as_secs_f64()).round() as usize;

    let mut samples = Vec::with_capacity(n);
    for i in 0..n {
        let t = i as f32 / sample_rate as f32;
        let low = (2.0 * std::f32::consts::PI * f_low * t).sin();
        let high = (2.0 * std::f32::consts::PI * f_high * t).sin();
        samples.push((AMPLITUDE * (low + high)) as i16);
    }
    PcmAudio::from_samples(sample_rate, &samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypad::KEY_SYMBOLS;

    #[test]
    fn tone_has_the_requested_length() {
        let key = DtmfKey::from_char('5').unwrap();
        let audio = dtmf_tone(key, 8000, Duration::from_millis(100));
        assert_eq!(audio.frame_count(), 800);
        assert_eq!(audio.sample_rate, 8000);
        assert_eq!(audio.validate(), Ok(()));
    }

    #[test]
    fn tone_is_not_silence() {
        let key = DtmfKey::from_char('1').unwrap();
        let audio = dtmf_tone(key, 8000, Duration::from_millis(50));
        let peak = audio.to_samples().iter().map(|s| s.unsigned_abs()).max();
        assert!(peak.unwrap() > 4000, "peak {:?} too quiet", peak);
    }

    #[test]
    fn every_key_maps_to_a_distinct_frequency_pair() {
        let mut seen = std::collections::HashSet::new();
        for ch in KEY_SYMBOLS {
            let key = DtmfKey::from_char(ch).unwrap();
            let (low, high) = frequencies(key);
            assert!(ROW_FREQS.contains(&low));
            assert!(COL_FREQS.contains(&high));
            assert!(seen.insert((low as u32, high as u32)), "duplicate pair for {ch}");
        }
    }

    #[test]
    fn samples_stay_within_headroom() {
        let key = DtmfKey::from_char('#').unwrap();
        let audio = dtmf_tone(key, 16000, Duration::from_millis(80));
        for s in audio.to_samples() {
            assert!(s.abs() <= 16_001);
        }
    }
}
