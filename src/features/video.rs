// Video features: motion against the previous frame, skin-tone coverage, brightness

use crate::capture::FrameSample;
use crate::constants::{MOTION_NOISE_THRESHOLD, SKIN_HUE_MAX_DEG, SKIN_SAT_MIN, SKIN_VAL_MIN};

/// Rec.601 luma, 0-255
pub fn luminance(rgb: [u8; 3]) -> f64 {
    0.299 * rgb[0] as f64 + 0.587 * rgb[1] as f64 + 0.114 * rgb[2] as f64
}

/// RGB to HSV with hue in degrees [0, 360) and saturation/value in [0, 1]
pub fn rgb_to_hsv(rgb: [u8; 3]) -> (f64, f64, f64) {
    let r = rgb[0] as f64 / 255.0;
    let g = rgb[1] as f64 / 255.0;
    let b = rgb[2] as f64 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * (((b - r) / delta) + 2.0)
    } else {
        60.0 * (((r - g) / delta) + 4.0)
    };
    let saturation = if max == 0.0 { 0.0 } else { delta / max };

    (hue, saturation, max)
}

pub fn is_skin_tone(rgb: [u8; 3]) -> bool {
    let (h, s, v) = rgb_to_hsv(rgb);
    h <= SKIN_HUE_MAX_DEG && s >= SKIN_SAT_MIN && v >= SKIN_VAL_MIN
}

/// Fraction of pixels whose luminance moved more than the noise threshold.
/// Returns None when there is no usable reference frame.
pub fn motion_ratio(previous: Option<&FrameSample>, current: &FrameSample) -> Option<f64> {
    let previous = previous?;
    if !previous.is_well_formed() || !current.is_well_formed() || !previous.same_resolution(current) {
        return None;
    }

    let changed = previous
        .rgb_pixels()
        .zip(current.rgb_pixels())
        .filter(|(a, b)| (luminance(*a) - luminance(*b)).abs() > MOTION_NOISE_THRESHOLD)
        .count();

    Some(changed as f64 / current.pixel_count() as f64)
}

pub fn skin_ratio(frame: &FrameSample) -> f64 {
    let skin = frame.rgb_pixels().filter(|px| is_skin_tone(*px)).count();
    skin as f64 / frame.pixel_count() as f64
}

pub fn mean_brightness(frame: &FrameSample) -> f64 {
    let total: f64 = frame.rgb_pixels().map(luminance).sum();
    total / frame.pixel_count() as f64
}
