// Feature extraction
// Turns a frame pair and an audio window into a compact FeatureVector. Stateless:
// the caller passes the previous frame explicitly.

pub mod audio;
pub mod fft;
pub mod video;


use serde::{Deserialize, Serialize};

use crate::capture::{AudioWindow, FrameSample};

/// Names accepted by model artifacts, in a stable order.
pub const FEATURE_NAMES: [&str; 10] = [
    "motion_ratio",
    "skin_ratio",
    "brightness",
    "audio_level",
    "dominant_frequency_hz",
    "speech_detected",
    "zero_crossing_rate",
    "low_band_ratio",
    "voice_band_ratio",
    "high_band_ratio",
];

/// Numeric summary of one sampling tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Fraction of pixels changed vs the previous frame (0-1)
    pub motion_ratio: f64,
    /// Fraction of pixels inside the skin-tone range (0-1)
    pub skin_ratio: f64,
    /// Mean luminance (0-255)
    pub brightness: f64,
    /// RMS amplitude normalized to full scale (0-1)
    pub audio_level: f64,
    /// Peak spectral bin; 0 when silent
    pub dominant_frequency_hz: f64,
    pub speech_detected: bool,
    pub zero_crossing_rate: f64,
    pub low_band_ratio: f64,
    pub voice_band_ratio: f64,
    pub high_band_ratio: f64,
    /// False when motion could not be computed (no previous frame, resolution change)
    pub has_motion_reference: bool,
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self {
            motion_ratio: 0.0,
            skin_ratio: 0.0,
            brightness: 0.0,
            audio_level: 0.0,
            dominant_frequency_hz: 0.0,
            speech_detected: false,
            zero_crossing_rate: 0.0,
            low_band_ratio: 0.0,
            voice_band_ratio: 0.0,
            high_band_ratio: 0.0,
            has_motion_reference: true,
        }
    }
}

fn unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

impl FeatureVector {
    /// All-zero vector used when both inputs are unusable.
    pub fn zeroed() -> Self {
        Self {
            has_motion_reference: false,
            ..Self::default()
        }
    }

    /// Clamp ratios to [0,1], brightness to [0,255], and replace non-finite values with 0.
    pub fn sanitized(self) -> Self {
        let brightness = if self.brightness.is_finite() {
            self.brightness.clamp(0.0, 255.0)
        } else {
            0.0
        };
        let dominant_frequency_hz = if self.dominant_frequency_hz.is_finite() {
            self.dominant_frequency_hz.max(0.0)
        } else {
            0.0
        };

        Self {
            motion_ratio: unit(self.motion_ratio),
            skin_ratio: unit(self.skin_ratio),
            brightness,
            audio_level: unit(self.audio_level),
            dominant_frequency_hz,
            speech_detected: self.speech_detected,
            zero_crossing_rate: unit(self.zero_crossing_rate),
            low_band_ratio: unit(self.low_band_ratio),
            voice_band_ratio: unit(self.voice_band_ratio),
            high_band_ratio: unit(self.high_band_ratio),
            has_motion_reference: self.has_motion_reference,
        }
    }

    /// Look up a feature by its artifact name. Booleans read as 0/1.
    pub fn get(&self, name: &str) -> Option<f64> {
        let value = match name {
            "motion_ratio" => self.motion_ratio,
            "skin_ratio" => self.skin_ratio,
            "brightness" => self.brightness,
            "audio_level" => self.audio_level,
            "dominant_frequency_hz" => self.dominant_frequency_hz,
            "speech_detected" => if self.speech_detected { 1.0 } else { 0.0 },
            "zero_crossing_rate" => self.zero_crossing_rate,
            "low_band_ratio" => self.low_band_ratio,
            "voice_band_ratio" => self.voice_band_ratio,
            "high_band_ratio" => self.high_band_ratio,
            _ => return None,
        };
        Some(value)
    }
}

/// Extract a feature vector from the current frame, its predecessor, and the latest audio window.
///
/// Never fails: an unusable frame zeroes the video fields, an unusable window zeroes the
/// audio fields. A missing or mismatched previous frame gives `motion_ratio = 0` and
/// clears `has_motion_reference`.
pub fn extract(
    previous_frame: Option<&FrameSample>,
    current_frame: Option<&FrameSample>,
    audio_window: Option<&AudioWindow>,
) -> FeatureVector {
    let mut features = FeatureVector::zeroed();

    match current_frame.filter(|f| f.is_well_formed()) {
        Some(frame) => {
            match video::motion_ratio(previous_frame, frame) {
                Some(ratio) => {
                    features.motion_ratio = ratio;
                    features.has_motion_reference = true;
                }
                None => {
                    features.motion_ratio = 0.0;
                    features.has_motion_reference = false;
                }
            }
            features.skin_ratio = video::skin_ratio(frame);
            features.brightness = video::mean_brightness(frame);
        }
        None => {
            if current_frame.is_some() {
                log::debug!("Malformed frame, video features zeroed");
            }
        }
    }

    if let Some(window) = audio_window {
        if !window.is_well_formed() {
            log::debug!("Malformed audio window, audio features zeroed");
        }
        let a = audio::analyze(window);
        features.audio_level = a.level;
        features.dominant_frequency_hz = a.dominant_frequency_hz;
        features.speech_detected = a.speech_detected;
        features.zero_crossing_rate = a.zero_crossing_rate;
        features.low_band_ratio = a.low_band_ratio;
        features.voice_band_ratio = a.voice_band_ratio;
        features.high_band_ratio = a.high_band_ratio;
    }

    features.sanitized()
}
