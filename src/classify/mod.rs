// Activity classification
// Shared result types plus the two strategies: a rule policy that is always available
// and an optional trained model with the same output shape.

pub mod model;
pub mod rules;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::features::FeatureVector;

pub use model::{ActivityModel, LinearModel, LoadedModel, ModelClassifier};
pub use rules::RuleContext;

/// The closed set of activities, in model output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Activity {
    Sleeping,
    Eating,
    Reading,
    OnPhone,
    InConversation,
    Busy,
    Idle,
}

impl Activity {
    pub const ALL: [Activity; 7] = [
        Activity::Sleeping,
        Activity::Eating,
        Activity::Reading,
        Activity::OnPhone,
        Activity::InConversation,
        Activity::Busy,
        Activity::Idle,
    ];

    pub fn index(self) -> usize {
        match self {
            Activity::Sleeping => 0,
            Activity::Eating => 1,
            Activity::Reading => 2,
            Activity::OnPhone => 3,
            Activity::InConversation => 4,
            Activity::Busy => 5,
            Activity::Idle => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Activity::Sleeping => "sleeping",
            Activity::Eating => "eating",
            Activity::Reading => "reading",
            Activity::OnPhone => "on-phone",
            Activity::InConversation => "in-conversation",
            Activity::Busy => "busy",
            Activity::Idle => "idle",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Activity::ALL.into_iter().find(|a| a.as_str() == s)
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized score for every activity. Always holds all seven labels and sums to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<Activity, f64>", into = "BTreeMap<Activity, f64>")]
pub struct ConfidenceMap {
    scores: [f64; 7],
}

impl ConfidenceMap {
    /// Normalize raw non-negative weights. Non-finite or negative weights count as zero;
    /// an all-zero input becomes the uniform distribution.
    pub fn from_weights(weights: [f64; 7]) -> Self {
        let cleaned = weights.map(|w| if w.is_finite() && w > 0.0 { w } else { 0.0 });
        let total: f64 = cleaned.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            return Self::uniform();
        }
        Self {
            scores: cleaned.map(|w| w / total),
        }
    }

    pub fn uniform() -> Self {
        Self {
            scores: [1.0 / 7.0; 7],
        }
    }

    pub fn get(&self, activity: Activity) -> f64 {
        self.scores[activity.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Activity, f64)> + '_ {
        Activity::ALL.into_iter().map(move |a| (a, self.get(a)))
    }

    pub fn as_array(&self) -> [f64; 7] {
        self.scores
    }

    pub fn sum(&self) -> f64 {
        self.scores.iter().sum()
    }

    /// Highest-scoring activity; ties go to the earlier label.
    pub fn top(&self) -> (Activity, f64) {
        let mut best = (Activity::ALL[0], self.scores[0]);
        for (activity, score) in self.iter().skip(1) {
            if score > best.1 {
                best = (activity, score);
            }
        }
        best
    }

    /// Blend toward uniform by `alpha` (0 = unchanged, 1 = uniform). Ordering is preserved.
    pub fn blended_toward_uniform(&self, alpha: f64) -> Self {
        let alpha = alpha.clamp(0.0, 1.0);
        Self::from_weights(self.scores.map(|s| (1.0 - alpha) * s + alpha / 7.0))
    }

    pub fn swapped(&self, a: Activity, b: Activity) -> Self {
        let mut scores = self.scores;
        scores.swap(a.index(), b.index());
        Self { scores }
    }
}

impl TryFrom<BTreeMap<Activity, f64>> for ConfidenceMap {
    type Error = String;

    fn try_from(map: BTreeMap<Activity, f64>) -> Result<Self, Self::Error> {
        let mut scores = [0.0; 7];
        for activity in Activity::ALL {
            let score = *map
                .get(&activity)
                .ok_or_else(|| format!("missing confidence for {}", activity))?;
            if !score.is_finite() || score < 0.0 {
                return Err(format!("invalid confidence for {}: {}", activity, score));
            }
            scores[activity.index()] = score;
        }

        // Already normalized maps are kept bit-for-bit
        let total: f64 = scores.iter().sum();
        if (total - 1.0).abs() <= 1e-6 {
            Ok(Self { scores })
        } else {
            Ok(Self::from_weights(scores))
        }
    }
}

impl From<ConfidenceMap> for BTreeMap<Activity, f64> {
    fn from(map: ConfidenceMap) -> Self {
        map.iter().collect()
    }
}

/// Which strategy produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationSource {
    Model,
    Rule,
}

impl ClassificationSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ClassificationSource::Model => "model",
            ClassificationSource::Rule => "rule",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "model" => Some(ClassificationSource::Model),
            "rule" => Some(ClassificationSource::Rule),
            _ => None,
        }
    }
}

/// What caused a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trigger {
    Periodic,
    OnDemand,
    /// Classifier called directly, outside the engine
    Direct,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::Periodic => "periodic",
            Trigger::OnDemand => "on-demand",
            Trigger::Direct => "direct",
        }
    }
}

/// One labeled, confidence-scored decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub cycle_id: u64,
    pub activity: Activity,
    pub confidence_by_activity: ConfidenceMap,
    pub timestamp: DateTime<Utc>,
    pub source: ClassificationSource,
    pub trigger: Trigger,
    pub degraded: bool,
    pub features: FeatureVector,
}

impl ClassificationResult {
    /// Build a result whose label is the arg-max of `confidences`.
    pub fn from_confidences(
        confidences: ConfidenceMap,
        features: FeatureVector,
        source: ClassificationSource,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let (activity, _) = confidences.top();
        Self {
            cycle_id: 0,
            activity,
            confidence_by_activity: confidences,
            timestamp,
            source,
            trigger: Trigger::Direct,
            degraded: false,
            features,
        }
    }

    /// Confidence of the selected label
    pub fn confidence(&self) -> f64 {
        self.confidence_by_activity.get(self.activity)
    }

    pub fn with_cycle(mut self, cycle_id: u64, trigger: Trigger) -> Self {
        self.cycle_id = cycle_id;
        self.trigger = trigger;
        self
    }

    /// Context stored and sent alongside the label
    pub fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "cycle_id": self.cycle_id,
            "trigger": self.trigger.as_str(),
            "degraded": self.degraded,
            "confidences": self.confidence_by_activity,
            "features": self.features,
        })
    }

    /// Mark as low-confidence and flatten the distribution; the label is unchanged.
    pub fn degraded(mut self, alpha: f64) -> Self {
        self.degraded = true;
        self.confidence_by_activity = self.confidence_by_activity.blended_toward_uniform(alpha);
        self
    }
}

/// Strategy chosen for one cycle. Resolved fresh every time.
#[derive(Clone)]
pub enum Strategy {
    Model(Arc<LoadedModel>),
    Rule,
}

impl Strategy {
    pub fn source(&self) -> ClassificationSource {
        match self {
            Strategy::Model(_) => ClassificationSource::Model,
            Strategy::Rule => ClassificationSource::Rule,
        }
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Model(m) => write!(f, "Model({})", m.fingerprint),
            Strategy::Rule => f.write_str("Rule"),
        }
    }
}
