// Classifier properties: normalization, determinism, monotonicity, reference scenarios,
// and model artifact handling

use std::io::Write;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::{NamedTempFile, TempDir};

use super::model::LinearArtifact;
use super::rules::{self, RuleContext};
use super::*;
use crate::features::FeatureVector;
use crate::hash;

fn grid() -> Vec<FeatureVector> {
    let mut out = Vec::new();
    for &motion_ratio in &[0.0, 0.02, 0.05, 0.1, 0.2, 0.25, 0.3, 0.6, 1.0] {
        for &audio_level in &[0.0, 0.03, 0.1, 0.4, 1.0] {
            for &skin_ratio in &[0.0, 0.1, 0.5] {
                for &brightness in &[40.0, 150.0] {
                    for &speech_detected in &[false, true] {
                        out.push(FeatureVector {
                            motion_ratio,
                            audio_level,
                            skin_ratio,
                            brightness,
                            speech_detected,
                            ..FeatureVector::default()
                        });
                    }
                }
            }
        }
    }
    out
}

fn fixed_context() -> RuleContext {
    RuleContext::at(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
}

fn features(motion_ratio: f64, audio_level: f64, speech_detected: bool) -> FeatureVector {
    FeatureVector {
        motion_ratio,
        audio_level,
        speech_detected,
        ..FeatureVector::default()
    }
}

// ----- Rule classifier -----

#[test]
fn test_rule_confidences_are_normalized_and_complete() {
    for f in grid() {
        let result = rules::classify(&f);
        assert!((result.confidence_by_activity.sum() - 1.0).abs() < 1e-6, "{:?}", f);
        assert_eq!(result.confidence_by_activity.iter().count(), 7);
        for (_, score) in result.confidence_by_activity.iter() {
            assert!((0.0..=1.0).contains(&score));
        }
        assert_eq!(result.source, ClassificationSource::Rule);
    }
}

#[test]
fn test_rule_label_is_argmax() {
    for f in grid() {
        let result = rules::classify(&f);
        let (top, _) = result.confidence_by_activity.top();
        assert_eq!(result.activity, top, "{:?}", f);
        assert!(result.confidence() >= 0.5);
    }
}

#[test]
fn test_rule_classification_is_idempotent() {
    let ctx = fixed_context();
    for f in grid() {
        assert_eq!(rules::classify_with_context(&f, &ctx), rules::classify_with_context(&f, &ctx));
    }
}

#[test]
fn test_busy_confidence_is_monotonic_in_motion() {
    for speech in [false, true] {
        let mut previous = 0.0;
        for step in 0..=75 {
            let motion = 0.25 + step as f64 * 0.01;
            let result = rules::classify(&features(motion, 0.3, speech));
            let busy = result.confidence_by_activity.get(Activity::Busy);
            assert!(busy + 1e-12 >= previous, "busy dropped at motion {} (speech {})", motion, speech);
            previous = busy;
        }
    }
}

#[test]
fn test_silence_and_stillness_is_sleeping() {
    for skin_ratio in [0.0, 0.3, 0.9] {
        for brightness in [0.0, 40.0, 200.0] {
            let f = FeatureVector {
                skin_ratio,
                brightness,
                ..features(0.0, 0.0, false)
            };
            let result = rules::classify(&f);
            assert_eq!(result.activity, Activity::Sleeping);
            let sleeping = result.confidence_by_activity.get(Activity::Sleeping);
            for (_, score) in result.confidence_by_activity.iter() {
                assert!(sleeping >= score);
            }
        }
    }
}

#[test]
fn test_scenario_dark_quiet_room_is_sleeping() {
    let f = FeatureVector {
        skin_ratio: 0.3,
        brightness: 40.0,
        ..features(0.02, 0.01, false)
    };
    let result = rules::classify(&f);
    assert_eq!(result.activity, Activity::Sleeping);
    assert!(result.confidence() >= 0.5);
}

#[test]
fn test_scenario_lots_of_motion_is_busy() {
    assert_eq!(rules::classify(&features(0.5, 0.05, false)).activity, Activity::Busy);
}

#[test]
fn test_scenario_speech_while_still_is_on_phone() {
    assert_eq!(rules::classify(&features(0.05, 0.0, true)).activity, Activity::OnPhone);
}

#[test]
fn test_scenario_speech_while_moving_is_conversation() {
    assert_eq!(rules::classify(&features(0.4, 0.0, true)).activity, Activity::InConversation);
}

#[test]
fn test_present_and_lit_table_is_eating() {
    let f = FeatureVector {
        skin_ratio: 0.3,
        brightness: 180.0,
        ..features(0.10, 0.1, false)
    };
    assert_eq!(rules::classify(&f).activity, Activity::Eating);
}

#[test]
fn test_present_small_motion_is_reading() {
    let f = FeatureVector {
        skin_ratio: 0.3,
        brightness: 180.0,
        ..features(0.05, 0.1, false)
    };
    assert_eq!(rules::classify(&f).activity, Activity::Reading);

    // Dim room pushes the ambiguous case to reading
    let dim = FeatureVector {
        skin_ratio: 0.3,
        brightness: 20.0,
        ..features(0.08, 0.1, false)
    };
    assert_eq!(rules::classify(&dim).activity, Activity::Reading);
}

#[test]
fn test_long_quiet_becomes_idle() {
    let f = features(0.0, 0.0, false);
    let mut ctx = fixed_context();
    ctx.idle_after = Some(Duration::from_secs(3600));

    ctx.quiet_for = Duration::from_secs(600);
    assert_eq!(rules::classify_with_context(&f, &ctx).activity, Activity::Sleeping);

    ctx.quiet_for = Duration::from_secs(3600);
    let result = rules::classify_with_context(&f, &ctx);
    assert_eq!(result.activity, Activity::Idle);
    assert!((result.confidence_by_activity.sum() - 1.0).abs() < 1e-6);
}

#[test]
fn test_out_of_range_input_is_sanitized() {
    let f = FeatureVector {
        motion_ratio: f64::NAN,
        audio_level: -3.0,
        ..FeatureVector::default()
    };
    let result = rules::classify(&f);
    assert_eq!(result.activity, Activity::Sleeping);
    assert_eq!(result.features.motion_ratio, 0.0);
}

// ----- Confidence map -----

#[test]
fn test_confidence_map_serde_uses_label_keys() {
    let map = ConfidenceMap::uniform();
    let json = serde_json::to_value(&map).unwrap();
    assert!(json.get("on-phone").is_some());
    assert!(json.get("in-conversation").is_some());
    let back: ConfidenceMap = serde_json::from_value(json).unwrap();
    assert_eq!(back, map);
}

#[test]
fn test_confidence_map_round_trip_is_exact() {
    let map = rules::classify(&features(0.6, 0.1, false)).confidence_by_activity;
    let json = serde_json::to_string(&map).unwrap();
    let back: ConfidenceMap = serde_json::from_str(&json).unwrap();
    assert_eq!(back.as_array(), map.as_array());
}

#[test]
fn test_confidence_map_unnormalized_input_is_rescaled() {
    let json = serde_json::json!({
        "sleeping": 2.0, "eating": 0.0, "reading": 0.0, "on-phone": 0.0,
        "in-conversation": 0.0, "busy": 2.0, "idle": 0.0
    });
    let map: ConfidenceMap = serde_json::from_value(json).unwrap();
    assert!((map.get(Activity::Sleeping) - 0.5).abs() < 1e-12);
    assert!((map.get(Activity::Busy) - 0.5).abs() < 1e-12);
    assert!((map.sum() - 1.0).abs() < 1e-12);
}

#[test]
fn test_confidence_map_rejects_negative_score() {
    let json = serde_json::json!({
        "sleeping": 1.2, "eating": -0.2, "reading": 0.0, "on-phone": 0.0,
        "in-conversation": 0.0, "busy": 0.0, "idle": 0.0
    });
    assert!(serde_json::from_value::<ConfidenceMap>(json).is_err());
}

#[test]
fn test_confidence_map_rejects_missing_label() {
    let json = serde_json::json!({ "sleeping": 1.0 });
    assert!(serde_json::from_value::<ConfidenceMap>(json).is_err());
}

#[test]
fn test_degraded_blend_keeps_label_and_sum() {
    let result = rules::classify(&features(0.6, 0.1, false));
    let before = result.confidence();
    let degraded = result.degraded(0.3);
    assert!(degraded.degraded);
    assert_eq!(degraded.activity, Activity::Busy);
    assert_eq!(degraded.confidence_by_activity.top().0, Activity::Busy);
    assert!(degraded.confidence() < before);
    assert!((degraded.confidence_by_activity.sum() - 1.0).abs() < 1e-6);
}

#[test]
fn test_activity_keys_round_trip() {
    for activity in Activity::ALL {
        assert_eq!(Activity::parse(activity.as_str()), Some(activity));
    }
    assert_eq!(Activity::parse("dancing"), None);
}

// ----- Model classifier -----

fn artifact() -> LinearArtifact {
    LinearArtifact {
        format: "roomwatch-linear".to_string(),
        version: 1,
        labels: Activity::ALL.iter().map(|a| a.as_str().to_string()).collect(),
        feature_names: vec![
            "motion_ratio".to_string(),
            "audio_level".to_string(),
            "speech_detected".to_string(),
        ],
        weights: vec![
            vec![-8.0, -8.0, -4.0], // sleeping
            vec![0.0, 0.0, -1.0],   // eating
            vec![0.0, 0.0, -1.0],   // reading
            vec![-4.0, 1.0, 4.0],   // on-phone
            vec![4.0, 1.0, 4.0],    // in-conversation
            vec![10.0, 0.0, -2.0],  // busy
            vec![-2.0, -2.0, -2.0], // idle
        ],
        bias: vec![2.0, 0.0, 0.0, 0.0, 0.0, -2.0, 0.5],
    }
}

fn write_artifact(artifact: &LinearArtifact) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&serde_json::to_vec(artifact).unwrap()).unwrap();
    file
}

#[test]
fn test_model_import_and_classify() {
    let file = write_artifact(&artifact());
    let classifier = ModelClassifier::unavailable();
    let loaded = classifier.import(file.path()).unwrap();

    assert!(classifier.is_available());
    assert_eq!(loaded.fingerprint, hash::fingerprint_file(file.path()).unwrap());

    let result = classifier.classify(&loaded, &features(0.9, 0.1, false)).unwrap();
    assert_eq!(result.source, ClassificationSource::Model);
    assert_eq!(result.activity, Activity::Busy);
    assert!((result.confidence_by_activity.sum() - 1.0).abs() < 1e-6);

    let quiet = classifier.classify(&loaded, &features(0.0, 0.0, false)).unwrap();
    assert_eq!(quiet.activity, Activity::Sleeping);
}

#[test]
fn test_model_strategy_is_resolved_per_call() {
    let file = write_artifact(&artifact());
    let classifier = ModelClassifier::unavailable();
    assert!(matches!(classifier.strategy(), Strategy::Rule));
    classifier.import(file.path()).unwrap();
    assert_eq!(classifier.strategy().source(), ClassificationSource::Model);
}

#[test]
fn test_label_mismatch_rejected() {
    let mut bad = artifact();
    bad.labels.swap(0, 1);
    let file = write_artifact(&bad);
    let err = ModelClassifier::unavailable().import(file.path()).unwrap_err();
    assert!(matches!(err, crate::error::MonitorError::ModelLoad(_)));
}

#[test]
fn test_shape_mismatch_rejected() {
    let mut bad = artifact();
    bad.weights[3].pop();
    assert!(LinearModel::from_artifact(bad).is_err());

    let mut bad = artifact();
    bad.bias.push(0.0);
    assert!(LinearModel::from_artifact(bad).is_err());

    let mut bad = artifact();
    bad.feature_names[0] = "heart_rate".to_string();
    assert!(LinearModel::from_artifact(bad).is_err());
}

#[test]
fn test_failed_import_keeps_current_model() {
    let good = write_artifact(&artifact());
    let classifier = ModelClassifier::unavailable();
    let original = classifier.import(good.path()).unwrap();

    let mut garbage = NamedTempFile::new().unwrap();
    garbage.write_all(b"not a model").unwrap();
    assert!(classifier.import(garbage.path()).is_err());

    let mut wrong_version = artifact();
    wrong_version.version = 7;
    let wrong = write_artifact(&wrong_version);
    assert!(classifier.import(wrong.path()).is_err());

    let current = classifier.current().unwrap();
    assert_eq!(current.fingerprint, original.fingerprint);
}

#[test]
fn test_export_round_trip_preserves_fingerprint() {
    let source = write_artifact(&artifact());
    let classifier = ModelClassifier::unavailable();
    let loaded = classifier.import(source.path()).unwrap();

    let dir = TempDir::new().unwrap();
    let exported = dir.path().join("exported.json");
    classifier.export(&exported).unwrap();

    let reloaded = ModelClassifier::unavailable();
    let again = reloaded.import(&exported).unwrap();
    assert_eq!(again.fingerprint, loaded.fingerprint);
}

#[test]
fn test_export_without_model_fails() {
    let dir = TempDir::new().unwrap();
    let err = ModelClassifier::unavailable().export(&dir.path().join("m.json")).unwrap_err();
    assert!(matches!(err, crate::error::MonitorError::ModelUnavailable));
}

struct NanModel;

impl ActivityModel for NanModel {
    fn name(&self) -> &str {
        "nan"
    }

    fn predict(&self, _features: &FeatureVector) -> crate::error::Result<[f64; 7]> {
        Ok([f64::NAN; 7])
    }
}

#[test]
fn test_non_finite_output_is_an_error() {
    let classifier = ModelClassifier::with_model(LoadedModel::in_memory(std::sync::Arc::new(NanModel)));
    let handle = classifier.current().unwrap();
    assert!(classifier.classify(&handle, &FeatureVector::default()).is_err());

    classifier.mark_failed(&handle, "non-finite output");
    assert!(!classifier.is_available());
}

#[test]
fn test_mark_failed_ignores_replaced_model() {
    let classifier = ModelClassifier::with_model(LoadedModel::in_memory(std::sync::Arc::new(NanModel)));
    let stale = classifier.current().unwrap();

    let file = write_artifact(&artifact());
    classifier.import(file.path()).unwrap();
    classifier.mark_failed(&stale, "late failure report");
    assert!(classifier.is_available());
}
