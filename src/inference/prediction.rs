//! Classifier output as an ordered label to confidence mapping.

use crate::error::{Error, Result};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// One label with its confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    /// Class label.
    pub label: String,
    /// Confidence in [0, 1].
    pub confidence: f32,
}

/// Confidences for every configured label, in label order.
///
/// Serializes as a `{label: confidence}` object whose keys keep label order.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassPrediction {
    scores: Vec<ClassScore>,
}

impl ClassPrediction {
    /// Pair `labels` with `probabilities` one to one.
    pub fn new(labels: &[String], probabilities: &[f32]) -> Result<Self> {
        if labels.is_empty() || labels.len() != probabilities.len() {
            return Err(Error::Inference {
                reason: format!(
                    "{} probabilities for {} labels",
                    probabilities.len(),
                    labels.len()
                ),
            });
        }
        if let Some(p) = probabilities
            .iter()
            .find(|p| !p.is_finite() || !(0.0..=1.0).contains(*p))
        {
            return Err(Error::Inference {
                reason: format!("probability {p} outside [0, 1]"),
            });
        }

        let scores = labels
            .iter()
            .zip(probabilities)
            .map(|(label, &confidence)| ClassScore {
                label: label.clone(),
                confidence,
            })
            .collect();
        Ok(Self { scores })
    }

    /// Highest-confidence class. The first label wins ties.
    pub fn top(&self) -> &ClassScore {
        // Never empty: `new` rejects empty label lists.
        let mut best = &self.scores[0];
        for score in &self.scores[1..] {
            if score.confidence > best.confidence {
                best = score;
            }
        }
        best
    }

    /// Confidence for `label`, if configured.
    pub fn confidence(&self, label: &str) -> Option<f32> {
        self.scores
            .iter()
            .find(|s| s.label == label)
            .map(|s| s.confidence)
    }

    /// Scores in label order.
    pub fn scores(&self) -> &[ClassScore] {
        &self.scores
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Always false for a constructed prediction.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

impl Serialize for ClassPrediction {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.scores.len()))?;
        for score in &self.scores {
            map.serialize_entry(&score.label, &score.confidence)?;
        }
        map.end()
    }
}

struct PredictionVisitor;

impl<'de> Visitor<'de> for PredictionVisitor {
    type Value = ClassPrediction;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of class label to confidence")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
        let mut scores = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((label, confidence)) = access.next_entry::<String, f32>()? {
            scores.push(ClassScore { label, confidence });
        }
        Ok(ClassPrediction { scores })
    }
}

impl<'de> Deserialize<'de> for ClassPrediction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(PredictionVisitor)
    }
}
