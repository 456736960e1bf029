// Bounded history of published results

use std::collections::VecDeque;

use crate::classify::{Activity, ClassificationResult};

#[derive(Debug)]
pub struct History {
    capacity: usize,
    entries: VecDeque<ClassificationResult>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, result: ClassificationResult) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(result);
    }

    pub fn current(&self) -> Option<&ClassificationResult> {
        self.entries.back()
    }

    /// Oldest first
    pub fn recent(&self) -> Vec<ClassificationResult> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Majority label over the retained results; ties go to the most recent label.
    pub fn smoothed_activity(&self) -> Option<Activity> {
        let mut counts = [0usize; 7];
        for entry in &self.entries {
            counts[entry.activity.index()] += 1;
        }
        let best = counts.iter().copied().max().filter(|&c| c > 0)?;

        self.entries
            .iter()
            .rev()
            .map(|e| e.activity)
            .find(|a| counts[a.index()] == best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ClassificationSource, ConfidenceMap};
    use crate::features::FeatureVector;
    use chrono::Utc;

    fn result(activity: Activity) -> ClassificationResult {
        let mut weights = [0.0; 7];
        weights[activity.index()] = 1.0;
        ClassificationResult::from_confidences(
            ConfidenceMap::from_weights(weights),
            FeatureVector::default(),
            ClassificationSource::Rule,
            Utc::now(),
        )
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut history = History::new(2);
        history.push(result(Activity::Busy));
        history.push(result(Activity::Idle));
        history.push(result(Activity::Reading));
        assert_eq!(history.len(), 2);
        let labels: Vec<_> = history.recent().iter().map(|r| r.activity).collect();
        assert_eq!(labels, vec![Activity::Idle, Activity::Reading]);
        assert_eq!(history.current().unwrap().activity, Activity::Reading);
    }

    #[test]
    fn test_smoothed_majority() {
        let mut history = History::new(5);
        assert_eq!(history.smoothed_activity(), None);
        for a in [Activity::Busy, Activity::Busy, Activity::Idle] {
            history.push(result(a));
        }
        assert_eq!(history.smoothed_activity(), Some(Activity::Busy));
    }

    #[test]
    fn test_smoothed_tie_prefers_most_recent() {
        let mut history = History::new(4);
        for a in [Activity::Busy, Activity::Eating, Activity::Eating, Activity::Busy] {
            history.push(result(a));
        }
        assert_eq!(history.smoothed_activity(), Some(Activity::Busy));
    }
}
