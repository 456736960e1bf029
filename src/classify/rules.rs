// Rule-based classifier
// Priority-ordered threshold policy. Deterministic, dependency-free, always available.
//
// Every label has a "distance" from being triggered (0 when its own condition holds).
// The winner's confidence grows with how far its decisive feature is past the
// threshold; the remaining mass is shared by the other labels inversely to their
// distance.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::constants::*;
use crate::features::FeatureVector;
use super::{Activity, ClassificationResult, ClassificationSource, ConfidenceMap};

/// Short history the engine supplies on top of the feature vector.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext {
    /// Result timestamp
    pub at: DateTime<Utc>,
    /// How long the quiet (silent and still) condition has held before this tick
    pub quiet_for: Duration,
    /// Quiet longer than this reads as idle rather than sleeping; None disables it
    pub idle_after: Option<Duration>,
}

impl RuleContext {
    pub fn at(at: DateTime<Utc>) -> Self {
        Self {
            at,
            quiet_for: Duration::ZERO,
            idle_after: None,
        }
    }
}

impl Default for RuleContext {
    fn default() -> Self {
        Self::at(Utc::now())
    }
}

/// Which rule fired and by how much
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleDecision {
    pub activity: Activity,
    /// 1-based priority of the rule that matched
    pub rule: u8,
    /// Margin of the decisive feature, saturated to [0, 1]
    pub margin: f64,
}

fn saturate(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn excess(value: f64, limit: f64, scale: f64) -> f64 {
    (value - limit).max(0.0) / scale
}

fn shortfall(value: f64, limit: f64, scale: f64) -> f64 {
    (limit - value).max(0.0) / scale
}

/// Rule 1 precondition: silent room and (almost) no motion
pub fn is_quiet(f: &FeatureVector) -> bool {
    f.audio_level < AUDIO_SILENCE_FLOOR && f.motion_ratio < MOTION_LOW_FLOOR
}

fn in_activity_band(f: &FeatureVector) -> bool {
    f.motion_ratio >= MOTION_LOW_FLOOR
        && f.motion_ratio <= MOTION_HIGH_FLOOR
        && f.skin_ratio >= SKIN_PRESENCE_FLOOR
}

fn speech_gap(f: &FeatureVector) -> f64 {
    if f.speech_detected {
        0.0
    } else {
        1.0 + shortfall(f.audio_level, SPEECH_MIN_LEVEL, MARGIN_SCALE_AUDIO)
    }
}

fn band_gap(f: &FeatureVector) -> f64 {
    shortfall(f.motion_ratio, MOTION_LOW_FLOOR, MARGIN_SCALE_MOTION)
        + excess(f.motion_ratio, MOTION_HIGH_FLOOR, MARGIN_SCALE_MOTION)
        + shortfall(f.skin_ratio, SKIN_PRESENCE_FLOOR, MARGIN_SCALE_SKIN)
}

// Eating: steady hand-to-mouth motion around a lit table
fn eating_subdistance(f: &FeatureVector) -> f64 {
    (f.motion_ratio - EATING_MOTION_CENTER).abs() / MARGIN_SCALE_MOTION
        + shortfall(f.brightness, EATING_BRIGHTNESS_MIN, MARGIN_SCALE_BRIGHTNESS)
}

// Reading: small page-turn motion in a quiet room
fn reading_subdistance(f: &FeatureVector) -> f64 {
    (f.motion_ratio - READING_MOTION_CENTER).abs() / MARGIN_SCALE_MOTION
        + excess(f.audio_level, READING_AUDIO_MAX, MARGIN_SCALE_AUDIO)
}

/// Distance of each label from being triggered, in `Activity::ALL` order.
fn distances(f: &FeatureVector) -> [f64; 7] {
    let mut d = [0.0; 7];
    d[Activity::Sleeping.index()] = excess(f.audio_level, AUDIO_SILENCE_FLOOR, MARGIN_SCALE_AUDIO)
        + excess(f.motion_ratio, MOTION_LOW_FLOOR, MARGIN_SCALE_MOTION);
    d[Activity::OnPhone.index()] =
        speech_gap(f) + excess(f.motion_ratio, MOTION_MODERATE_CEILING, MARGIN_SCALE_MOTION);
    d[Activity::InConversation.index()] =
        speech_gap(f) + shortfall(f.motion_ratio, MOTION_MODERATE_CEILING, MARGIN_SCALE_MOTION);
    d[Activity::Busy.index()] = shortfall(f.motion_ratio, MOTION_HIGH_FLOOR, MARGIN_SCALE_MOTION);
    d[Activity::Eating.index()] = band_gap(f) + eating_subdistance(f);
    d[Activity::Reading.index()] = band_gap(f) + reading_subdistance(f);
    d[Activity::Idle.index()] = excess(f.motion_ratio, MOTION_LOW_FLOOR, MARGIN_SCALE_MOTION)
        + if f.speech_detected { 1.0 } else { 0.0 };
    d
}

/// Apply the priority-ordered policy. First matching rule wins.
pub fn decide(f: &FeatureVector) -> RuleDecision {
    // 1. Silent and still
    if is_quiet(f) {
        let audio_margin = (AUDIO_SILENCE_FLOOR - f.audio_level) / AUDIO_SILENCE_FLOOR;
        let motion_margin = (MOTION_LOW_FLOOR - f.motion_ratio) / MOTION_LOW_FLOOR;
        return RuleDecision {
            activity: Activity::Sleeping,
            rule: 1,
            margin: saturate(audio_margin.min(motion_margin)),
        };
    }

    // 2-3. Speech, split by how much the person moves
    if f.speech_detected {
        let margin = saturate((f.audio_level - SPEECH_MIN_LEVEL) / MARGIN_SCALE_AUDIO);
        return if f.motion_ratio < MOTION_MODERATE_CEILING {
            RuleDecision { activity: Activity::OnPhone, rule: 2, margin }
        } else {
            RuleDecision { activity: Activity::InConversation, rule: 3, margin }
        };
    }

    // 4. Lots of movement
    if f.motion_ratio > MOTION_HIGH_FLOOR {
        return RuleDecision {
            activity: Activity::Busy,
            rule: 4,
            margin: saturate((f.motion_ratio - MOTION_HIGH_FLOOR) / (1.0 - MOTION_HIGH_FLOOR)),
        };
    }

    // 5. Someone present with low-to-moderate motion
    if in_activity_band(f) {
        let margin = saturate((f.skin_ratio - SKIN_PRESENCE_FLOOR) / MARGIN_SCALE_SKIN);
        let activity = if eating_subdistance(f) + EAT_READ_AMBIGUITY < reading_subdistance(f) {
            Activity::Eating
        } else {
            Activity::Reading
        };
        return RuleDecision { activity, rule: 5, margin };
    }

    // 6. Nothing else fits
    let d = distances(f);
    let nearest = Activity::ALL
        .into_iter()
        .filter(|a| *a != Activity::Idle)
        .map(|a| d[a.index()])
        .fold(f64::INFINITY, f64::min);
    RuleDecision {
        activity: Activity::Idle,
        rule: 6,
        margin: saturate(nearest),
    }
}

/// Confidence map for a decision: winner gets base + span * margin, the rest is shared
/// inversely to distance, then renormalized.
pub fn confidences(f: &FeatureVector, decision: &RuleDecision) -> ConfidenceMap {
    let winner_score = WINNER_BASE_CONFIDENCE + WINNER_CONFIDENCE_SPAN * decision.margin;
    let remaining = 1.0 - winner_score;

    let d = distances(f);
    let mut inverse = [0.0; 7];
    for activity in Activity::ALL {
        if activity != decision.activity {
            inverse[activity.index()] = 1.0 / (d[activity.index()] + DISTANCE_EPSILON);
        }
    }
    let inverse_total: f64 = inverse.iter().sum();

    let mut weights = [0.0; 7];
    for activity in Activity::ALL {
        let i = activity.index();
        weights[i] = if activity == decision.activity {
            winner_score
        } else if inverse_total > 0.0 {
            remaining * inverse[i] / inverse_total
        } else {
            0.0
        };
    }

    ConfidenceMap::from_weights(weights)
}

/// Classify with no history, timestamped now.
pub fn classify(features: &FeatureVector) -> ClassificationResult {
    classify_with_context(features, &RuleContext::default())
}

/// Classify with engine-supplied history. Pure in (features, context).
pub fn classify_with_context(features: &FeatureVector, ctx: &RuleContext) -> ClassificationResult {
    let features = features.sanitized();
    let decision = decide(&features);
    let mut map = confidences(&features, &decision);

    if decision.activity == Activity::Sleeping {
        if let Some(idle_after) = ctx.idle_after {
            if ctx.quiet_for >= idle_after {
                // Long stretches of silence read as an empty or unattended room
                map = map.swapped(Activity::Sleeping, Activity::Idle);
            }
        }
    }

    ClassificationResult::from_confidences(map, features, ClassificationSource::Rule, ctx.at)
}
