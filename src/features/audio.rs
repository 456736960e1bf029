// Audio features: level, spectrum summary, and the speech heuristic

use crate::capture::AudioWindow;
use crate::constants::{
    FFT_MAX_SIZE, FFT_MIN_SIZE, LOW_BAND_MAX_HZ, SILENCE_ENERGY_FLOOR, SPEECH_MIN_LEVEL,
    SPEECH_VOICE_BAND_MIN, VOICE_BAND_MAX_HZ,
};
use super::fft::{floor_pow2, power_spectrum};

/// Audio half of a feature vector
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AudioFeatures {
    pub level: f64,
    pub dominant_frequency_hz: f64,
    pub zero_crossing_rate: f64,
    pub low_band_ratio: f64,
    pub voice_band_ratio: f64,
    pub high_band_ratio: f64,
    pub speech_detected: bool,
}

/// Average interleaved channels into one mono signal in [-1, 1]
pub fn downmix(window: &AudioWindow) -> Vec<f64> {
    let channels = window.channels.max(1) as usize;
    window
        .samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: f64 = frame.iter().map(|&s| s as f64).sum();
            (sum / channels as f64 / i16::MAX as f64).clamp(-1.0, 1.0)
        })
        .collect()
}

pub fn mean_square(signal: &[f64]) -> f64 {
    if signal.is_empty() {
        return 0.0;
    }
    signal.iter().map(|x| x * x).sum::<f64>() / signal.len() as f64
}

pub fn zero_crossing_rate(signal: &[f64]) -> f64 {
    if signal.len() < 2 {
        return 0.0;
    }
    let crossings = signal
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f64 / (signal.len() - 1) as f64
}

#[derive(Debug, Clone, Copy, Default)]
struct SpectrumSummary {
    dominant_frequency_hz: f64,
    low: f64,
    voice: f64,
    high: f64,
}

fn summarize_spectrum(signal: &[f64], sample_rate: u32) -> Option<SpectrumSummary> {
    let n = floor_pow2(signal.len()).min(FFT_MAX_SIZE);
    if n < FFT_MIN_SIZE {
        return None;
    }

    let spectrum = power_spectrum(&signal[..n]);
    let bin_hz = sample_rate as f64 / n as f64;

    let (mut low, mut voice, mut high) = (0.0, 0.0, 0.0);
    for (bin, power) in spectrum.iter().enumerate() {
        let freq = bin as f64 * bin_hz;
        if freq < LOW_BAND_MAX_HZ {
            low += power;
        } else if freq <= VOICE_BAND_MAX_HZ {
            voice += power;
        } else {
            high += power;
        }
    }

    let total = low + voice + high;
    if total <= 0.0 {
        return None;
    }

    // DC is excluded from the peak search
    let peak_bin = spectrum
        .iter()
        .enumerate()
        .skip(1)
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);

    Some(SpectrumSummary {
        dominant_frequency_hz: peak_bin as f64 * bin_hz,
        low: low / total,
        voice: voice / total,
        high: high / total,
    })
}

/// Extract audio features. Malformed or empty windows yield all zeros.
pub fn analyze(window: &AudioWindow) -> AudioFeatures {
    if !window.is_well_formed() {
        return AudioFeatures::default();
    }

    let signal = downmix(window);
    let energy = mean_square(&signal);
    let level = energy.sqrt().clamp(0.0, 1.0);
    let zcr = zero_crossing_rate(&signal);

    if energy < SILENCE_ENERGY_FLOOR {
        return AudioFeatures {
            level,
            zero_crossing_rate: zcr,
            ..AudioFeatures::default()
        };
    }

    let Some(spectrum) = summarize_spectrum(&signal, window.sample_rate) else {
        return AudioFeatures {
            level,
            zero_crossing_rate: zcr,
            ..AudioFeatures::default()
        };
    };

    let speech_detected = spectrum.voice >= SPEECH_VOICE_BAND_MIN && level >= SPEECH_MIN_LEVEL;

    AudioFeatures {
        level,
        dominant_frequency_hz: spectrum.dominant_frequency_hz,
        zero_crossing_rate: zcr,
        low_band_ratio: spectrum.low,
        voice_band_ratio: spectrum.voice,
        high_band_ratio: spectrum.high,
        speech_detected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::f64::consts::PI;

    fn tone(freq: f64, amplitude: f64, sample_rate: u32, len: usize) -> AudioWindow {
        let samples = (0..len)
            .map(|n| {
                let v = amplitude * (2.0 * PI * freq * n as f64 / sample_rate as f64).sin();
                (v * i16::MAX as f64) as i16
            })
            .collect();
        AudioWindow::new(sample_rate, 1, samples, Utc::now())
    }

    #[test]
    fn test_downmix_averages_channels() {
        let window = AudioWindow::new(8000, 2, vec![i16::MAX, 0, -i16::MAX, -i16::MAX], Utc::now());
        let mono = downmix(&window);
        assert_eq!(mono.len(), 2);
        assert!((mono[0] - 0.5).abs() < 1e-9);
        assert!((mono[1] + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_rms_of_full_scale_square_wave() {
        let samples: Vec<i16> = (0..1024).map(|i| if i % 2 == 0 { i16::MAX } else { -i16::MAX }).collect();
        let features = analyze(&AudioWindow::new(16_000, 1, samples, Utc::now()));
        assert!((features.level - 1.0).abs() < 1e-9);
        assert!((features.zero_crossing_rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_voice_band_tone_is_speech() {
        let features = analyze(&tone(440.0, 0.5, 16_000, 4096));
        let bin_hz = 16_000.0 / 4096.0;
        assert!((features.dominant_frequency_hz - 440.0).abs() <= bin_hz);
        assert!(features.voice_band_ratio > 0.9);
        assert!(features.speech_detected);
    }

    #[test]
    fn test_low_hum_is_not_speech() {
        let features = analyze(&tone(100.0, 0.5, 16_000, 4096));
        assert!(features.low_band_ratio > 0.9);
        assert!(!features.speech_detected);
    }

    #[test]
    fn test_quiet_voice_is_not_speech() {
        let features = analyze(&tone(440.0, 0.02, 16_000, 4096));
        assert!(features.voice_band_ratio > 0.9);
        assert!(features.level < SPEECH_MIN_LEVEL);
        assert!(!features.speech_detected);
    }

    #[test]
    fn test_silence_has_no_frequency() {
        let window = AudioWindow::new(16_000, 1, vec![0; 4096], Utc::now());
        let features = analyze(&window);
        assert_eq!(features.level, 0.0);
        assert_eq!(features.dominant_frequency_hz, 0.0);
        assert_eq!(features.voice_band_ratio, 0.0);
        assert!(!features.speech_detected);
    }

    #[test]
    fn test_short_window_keeps_level_only() {
        let features = analyze(&tone(440.0, 0.5, 16_000, 32));
        assert!(features.level > 0.0);
        assert_eq!(features.dominant_frequency_hz, 0.0);
        assert!(!features.speech_detected);
    }
}
