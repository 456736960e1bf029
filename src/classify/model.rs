// Model classifier
// Wraps an optional trained model behind an atomically swappable slot. The shipped
// artifact is a linear-softmax model stored as JSON; other models plug in through
// the ActivityModel trait.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{MODEL_FORMAT, MODEL_FORMAT_VERSION};
use crate::error::{MonitorError, Result};
use crate::features::{FeatureVector, FEATURE_NAMES};
use crate::hash;
use super::{Activity, ClassificationResult, ClassificationSource, ConfidenceMap, Strategy};

/// A trained model. Returns raw scores (logits) in `Activity::ALL` order.
pub trait ActivityModel: Send + Sync {
    fn name(&self) -> &str;
    fn predict(&self, features: &FeatureVector) -> Result<[f64; 7]>;
}

/// On-disk form of a linear-softmax model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearArtifact {
    pub format: String,
    pub version: u32,
    pub labels: Vec<String>,
    pub feature_names: Vec<String>,
    /// One row per label, one column per feature
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

/// Validated linear model: `score[i] = bias[i] + sum_j weights[i][j] * feature_j`
#[derive(Debug, Clone)]
pub struct LinearModel {
    name: String,
    feature_names: Vec<String>,
    weights: [Vec<f64>; 7],
    bias: [f64; 7],
}

impl LinearModel {
    pub fn from_artifact(artifact: LinearArtifact) -> Result<Self> {
        if artifact.format != MODEL_FORMAT {
            return Err(MonitorError::ModelLoad(format!(
                "unknown model format '{}', expected '{}'",
                artifact.format, MODEL_FORMAT
            )));
        }
        if artifact.version != MODEL_FORMAT_VERSION {
            return Err(MonitorError::ModelLoad(format!(
                "unsupported model version {}",
                artifact.version
            )));
        }

        let expected: Vec<&str> = Activity::ALL.iter().map(|a| a.as_str()).collect();
        if artifact.labels.iter().map(String::as_str).ne(expected.iter().copied()) {
            return Err(MonitorError::ModelLoad(format!(
                "labels must be exactly {:?}, got {:?}",
                expected, artifact.labels
            )));
        }

        if artifact.feature_names.is_empty() {
            return Err(MonitorError::ModelLoad("model uses no features".to_string()));
        }
        for name in &artifact.feature_names {
            if !FEATURE_NAMES.contains(&name.as_str()) {
                return Err(MonitorError::ModelLoad(format!("unknown feature '{}'", name)));
            }
        }

        let n = artifact.feature_names.len();
        if artifact.weights.len() != 7 || artifact.bias.len() != 7 {
            return Err(MonitorError::ModelLoad(format!(
                "expected 7 weight rows and 7 biases, got {} and {}",
                artifact.weights.len(),
                artifact.bias.len()
            )));
        }
        for (i, row) in artifact.weights.iter().enumerate() {
            if row.len() != n {
                return Err(MonitorError::ModelLoad(format!(
                    "weight row {} has {} columns, expected {}",
                    i,
                    row.len(),
                    n
                )));
            }
        }
        let all_finite = artifact.weights.iter().flatten().chain(artifact.bias.iter()).all(|v| v.is_finite());
        if !all_finite {
            return Err(MonitorError::ModelLoad("non-finite parameter".to_string()));
        }

        let mut bias = [0.0; 7];
        bias.copy_from_slice(&artifact.bias);
        let mut rows = artifact.weights.into_iter();
        let weights = std::array::from_fn(|_| rows.next().unwrap_or_default());

        Ok(Self {
            name: format!("{} v{}", MODEL_FORMAT, artifact.version),
            feature_names: artifact.feature_names,
            weights,
            bias,
        })
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let artifact: LinearArtifact = serde_json::from_slice(bytes)
            .map_err(|e| MonitorError::ModelLoad(format!("invalid artifact: {}", e)))?;
        Self::from_artifact(artifact)
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }
}

impl ActivityModel for LinearModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&self, features: &FeatureVector) -> Result<[f64; 7]> {
        let mut inputs = Vec::with_capacity(self.feature_names.len());
        for name in &self.feature_names {
            let value = features
                .get(name)
                .ok_or_else(|| MonitorError::ModelInference(format!("missing feature '{}'", name)))?;
            inputs.push(value);
        }

        let mut scores = self.bias;
        for (score, row) in scores.iter_mut().zip(self.weights.iter()) {
            *score += row.iter().zip(&inputs).map(|(w, x)| w * x).sum::<f64>();
        }
        Ok(scores)
    }
}

/// A model currently (or previously) installed in the classifier.
pub struct LoadedModel {
    pub model: Arc<dyn ActivityModel>,
    pub fingerprint: String,
    pub source_path: Option<PathBuf>,
    pub loaded_at: DateTime<Utc>,
    /// Raw artifact bytes, kept for export
    pub artifact: Option<Vec<u8>>,
}

impl LoadedModel {
    /// Parse and validate a linear artifact.
    pub fn from_bytes(bytes: Vec<u8>, source_path: Option<PathBuf>) -> Result<Self> {
        let model = LinearModel::from_json(&bytes)?;
        Ok(Self {
            model: Arc::new(model),
            fingerprint: hash::fingerprint_bytes(&bytes),
            source_path,
            loaded_at: Utc::now(),
            artifact: Some(bytes),
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(bytes, Some(path.to_path_buf()))
    }

    /// Wrap an in-process model that has no serialized artifact.
    pub fn in_memory(model: Arc<dyn ActivityModel>) -> Self {
        let fingerprint = hash::fingerprint_bytes(model.name().as_bytes());
        Self {
            model,
            fingerprint,
            source_path: None,
            loaded_at: Utc::now(),
            artifact: None,
        }
    }
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("name", &self.model.name())
            .field("fingerprint", &self.fingerprint)
            .field("source_path", &self.source_path)
            .finish()
    }
}

/// Summary of the installed model for display
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub fingerprint: String,
    pub source_path: Option<PathBuf>,
    pub loaded_at: DateTime<Utc>,
}

fn softmax(scores: [f64; 7]) -> Option<[f64; 7]> {
    if scores.iter().any(|s| !s.is_finite()) {
        return None;
    }
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps = scores.map(|s| (s - max).exp());
    let total: f64 = exps.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return None;
    }
    Some(exps.map(|e| e / total))
}

/// Holds the optional current model. Readers take a cheap `Arc` handle; swaps are atomic.
pub struct ModelClassifier {
    slot: RwLock<Option<Arc<LoadedModel>>>,
}

impl Default for ModelClassifier {
    fn default() -> Self {
        Self::unavailable()
    }
}

impl ModelClassifier {
    pub fn unavailable() -> Self {
        Self { slot: RwLock::new(None) }
    }

    pub fn with_model(model: LoadedModel) -> Self {
        Self { slot: RwLock::new(Some(Arc::new(model))) }
    }

    /// Load the startup artifact if there is one. Never fails: problems are logged
    /// and the classifier stays unavailable.
    pub fn load_startup(&self, path: Option<&Path>) -> bool {
        let Some(path) = path else {
            log::info!("No model configured, using rule-based classification");
            return false;
        };
        if !path.exists() {
            log::info!("Model file {} not found, using rule-based classification", path.display());
            return false;
        }
        match LoadedModel::from_path(path) {
            Ok(loaded) => {
                let installed = self.install(loaded);
                log::info!(
                    "Loaded model {} ({}) from {}",
                    installed.model.name(),
                    hash::short(&installed.fingerprint),
                    path.display()
                );
                true
            }
            Err(e) => {
                log::warn!("Failed to load model {}: {}, using rule-based classification", path.display(), e);
                false
            }
        }
    }

    /// Validate an artifact and swap it in. On failure the current model is untouched.
    pub fn import(&self, path: &Path) -> Result<Arc<LoadedModel>> {
        let loaded = LoadedModel::from_path(path)?;
        let installed = self.install(loaded);
        log::info!(
            "Imported model {} ({}) from {}",
            installed.model.name(),
            hash::short(&installed.fingerprint),
            path.display()
        );
        Ok(installed)
    }

    pub fn install(&self, model: LoadedModel) -> Arc<LoadedModel> {
        let model = Arc::new(model);
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::clone(&model));
        model
    }

    /// Write the current artifact bytes to `path`.
    pub fn export(&self, path: &Path) -> Result<()> {
        let current = self.current().ok_or(MonitorError::ModelUnavailable)?;
        let bytes = current.artifact.as_ref().ok_or_else(|| {
            MonitorError::Other(format!("model {} has no exportable artifact", current.model.name()))
        })?;
        std::fs::write(path, bytes)?;
        log::info!("Exported model {} to {}", hash::short(&current.fingerprint), path.display());
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub fn current(&self) -> Option<Arc<LoadedModel>> {
        self.slot.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn info(&self) -> Option<ModelInfo> {
        self.current().map(|m| ModelInfo {
            name: m.model.name().to_string(),
            fingerprint: m.fingerprint.clone(),
            source_path: m.source_path.clone(),
            loaded_at: m.loaded_at,
        })
    }

    /// Which strategy a cycle starting now should use
    pub fn strategy(&self) -> Strategy {
        match self.current() {
            Some(model) => Strategy::Model(model),
            None => Strategy::Rule,
        }
    }

    pub fn classify(&self, handle: &LoadedModel, features: &FeatureVector) -> Result<ClassificationResult> {
        self.classify_at(handle, features, Utc::now())
    }

    /// Run the model and normalize its scores. Any non-finite output is an error.
    pub fn classify_at(
        &self,
        handle: &LoadedModel,
        features: &FeatureVector,
        at: DateTime<Utc>,
    ) -> Result<ClassificationResult> {
        let features = features.sanitized();
        let scores = handle.model.predict(&features)?;
        let probabilities = softmax(scores).ok_or_else(|| {
            MonitorError::ModelInference(format!("{} produced non-finite scores", handle.model.name()))
        })?;
        Ok(ClassificationResult::from_confidences(
            ConfidenceMap::from_weights(probabilities),
            features,
            ClassificationSource::Model,
            at,
        ))
    }

    /// Unload `handle` after an inference failure. A model imported since then is kept.
    pub fn mark_failed(&self, handle: &LoadedModel, reason: &str) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        let is_current = slot
            .as_ref()
            .map(|m| m.fingerprint == handle.fingerprint)
            .unwrap_or(false);
        if is_current {
            log::error!(
                "Model {} failed: {}. Falling back to rule-based classification",
                hash::short(&handle.fingerprint),
                reason
            );
            *slot = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_normalizes() {
        let p = softmax([1.0, 2.0, 3.0, 0.0, -1.0, 1000.0, 0.0]).unwrap();
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(p[5] > 0.99);
    }

    struct ConstantModel;

    impl ActivityModel for ConstantModel {
        fn name(&self) -> &str {
            "constant"
        }

        fn predict(&self, _features: &FeatureVector) -> Result<[f64; 7]> {
            Ok([0.0; 7])
        }
    }

    #[test]
    fn test_loaded_model_debug_shows_name_and_fingerprint() {
        let loaded = LoadedModel::in_memory(Arc::new(ConstantModel));
        let text = format!("{:?}", loaded);
        assert!(text.contains("constant"));
        assert!(text.contains(&loaded.fingerprint));
    }

    #[test]
    fn test_softmax_rejects_non_finite() {
        assert!(softmax([f64::NAN, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).is_none());
        assert!(softmax([f64::INFINITY, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).is_none());
    }

    #[test]
    fn test_unavailable_resolves_rule_strategy() {
        let classifier = ModelClassifier::unavailable();
        assert!(!classifier.is_available());
        assert!(matches!(classifier.strategy(), Strategy::Rule));
        assert!(classifier.info().is_none());
    }

    #[test]
    fn test_load_startup_without_path() {
        let classifier = ModelClassifier::default();
        assert!(!classifier.load_startup(None));
        assert!(!classifier.load_startup(Some(Path::new("/nonexistent/model.json"))));
        assert!(!classifier.is_available());
    }
}
