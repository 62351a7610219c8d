//! Persisted records.

use crate::constants::{classes, confidence};
use crate::error::{Error, Result};
use crate::inference::ClassPrediction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row identifier.
pub type RecordId = i64;

/// A stored classification result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Row id.
    pub id: RecordId,
    /// Name of the classified file.
    pub file_name: String,
    /// Where the file was stored when classified.
    pub file_path: String,
    /// Highest-confidence class.
    pub top_class: String,
    /// Confidence of `top_class`.
    pub top_confidence: f32,
    /// Every class with its confidence.
    pub prediction: ClassPrediction,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
}

/// Prediction to insert.
#[derive(Debug, Clone)]
pub struct NewPrediction {
    /// Name of the classified file.
    pub file_name: String,
    /// Where the file was stored when classified.
    pub file_path: String,
    /// Classifier output.
    pub prediction: ClassPrediction,
}

impl NewPrediction {
    /// Stamp the record.
    pub fn into_record(self, id: RecordId, created_at: DateTime<Utc>) -> Prediction {
        let top = self.prediction.top().clone();
        Prediction {
            id,
            file_name: self.file_name,
            file_path: self.file_path,
            top_class: top.label,
            top_confidence: top.confidence,
            prediction: self.prediction,
            created_at,
        }
    }
}

/// A class that may raise alerts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifiableClass {
    /// Row id.
    pub id: RecordId,
    /// Unique class name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Minimum confidence for an alert.
    pub min_confidence: f64,
    /// Inactive classes never alert.
    pub is_active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Notifiable class to create.
#[derive(Debug, Clone)]
pub struct NewNotifiableClass {
    /// Unique class name.
    pub name: String,
    /// Free-form description.
    pub description: Option<String>,
    /// Minimum confidence for an alert.
    pub min_confidence: f64,
    /// Whether the class alerts.
    pub is_active: bool,
}

fn validate_name(name: &str) -> Result<()> {
    let len = name.chars().count();
    if !(classes::NAME_MIN_LEN..=classes::NAME_MAX_LEN).contains(&len) {
        return Err(Error::invalid_input(format!(
            "class name must be {}-{} characters, got {len}",
            classes::NAME_MIN_LEN,
            classes::NAME_MAX_LEN
        )));
    }
    Ok(())
}

fn validate_description(description: Option<&str>) -> Result<()> {
    if let Some(text) = description
        && text.chars().count() > classes::DESCRIPTION_MAX_LEN
    {
        return Err(Error::invalid_input(format!(
            "description must be at most {} characters",
            classes::DESCRIPTION_MAX_LEN
        )));
    }
    Ok(())
}

/// Reject confidences outside [0, 1].
pub fn validate_confidence(value: f64) -> Result<()> {
    if !(confidence::MIN..=confidence::MAX).contains(&value) {
        return Err(Error::InvalidConfidence { value });
    }
    Ok(())
}

impl NewNotifiableClass {
    /// Active class with the given threshold.
    pub fn new(name: impl Into<String>, min_confidence: f64) -> Self {
        Self {
            name: name.into(),
            description: None,
            min_confidence,
            is_active: true,
        }
    }

    /// Check field constraints.
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        validate_description(self.description.as_deref())?;
        validate_confidence(self.min_confidence)
    }
}

/// Partial update of a notifiable class; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct ClassUpdate {
    /// New name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New threshold.
    pub min_confidence: Option<f64>,
    /// New active flag.
    pub is_active: Option<bool>,
}

impl ClassUpdate {
    /// Check the fields being changed.
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        validate_description(self.description.as_deref())?;
        if let Some(value) = self.min_confidence {
            validate_confidence(value)?;
        }
        Ok(())
    }

    /// Apply to `class`, stamping `updated_at`.
    pub fn apply(&self, class: &mut NotifiableClass, now: DateTime<Utc>) {
        if let Some(name) = &self.name {
            class.name.clone_from(name);
        }
        if let Some(description) = &self.description {
            class.description = Some(description.clone());
        }
        if let Some(value) = self.min_confidence {
            class.min_confidence = value;
        }
        if let Some(active) = self.is_active {
            class.is_active = active;
        }
        class.updated_at = now;
    }
}

/// Class lookup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassRef {
    /// By row id.
    Id(RecordId),
    /// By unique name.
    Name(String),
}

impl std::fmt::Display for ClassRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "notifiable class #{id}"),
            Self::Name(name) => write!(f, "notifiable class '{name}'"),
        }
    }
}

/// A located detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Row id.
    pub id: RecordId,
    /// Notifiable class id.
    pub class_id: RecordId,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Detection confidence.
    pub confidence: f64,
    /// Reporting device.
    pub device_id: String,
    /// Confirmed by an operator.
    pub is_verified: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// End of validity.
    pub expires_at: DateTime<Utc>,
}

impl Alert {
    /// Whether the alert is still valid at `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Alert to insert.
#[derive(Debug, Clone)]
pub struct NewAlert {
    /// Notifiable class id.
    pub class_id: RecordId,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Detection confidence.
    pub confidence: f64,
    /// Reporting device.
    pub device_id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// End of validity.
    pub expires_at: DateTime<Utc>,
}

impl NewAlert {
    /// Stamp the record.
    pub fn into_record(self, id: RecordId) -> Alert {
        Alert {
            id,
            class_id: self.class_id,
            latitude: self.latitude,
            longitude: self.longitude,
            confidence: self.confidence,
            device_id: self.device_id,
            is_verified: false,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// User feedback on a detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Row id.
    pub id: RecordId,
    /// Reporting device.
    pub device_id: String,
    /// When the recording was made.
    pub recording_date: DateTime<Utc>,
    /// Recording file name.
    pub recording_name: String,
    /// Class that was detected.
    pub detection_class: String,
    /// Confidence of the detection.
    pub detection_confidence: f64,
    /// Whether the detection was correct.
    pub success: bool,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
}

/// Evaluation to insert.
#[derive(Debug, Clone)]
pub struct NewEvaluation {
    /// Reporting device.
    pub device_id: String,
    /// When the recording was made.
    pub recording_date: DateTime<Utc>,
    /// Recording file name.
    pub recording_name: String,
    /// Class that was detected.
    pub detection_class: String,
    /// Confidence of the detection.
    pub detection_confidence: f64,
    /// Whether the detection was correct.
    pub success: bool,
}

impl NewEvaluation {
    /// Check field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.recording_name.trim().is_empty() {
            return Err(Error::invalid_input("recording name must not be empty"));
        }
        if self.detection_class.trim().is_empty() {
            return Err(Error::invalid_input("detection class must not be empty"));
        }
        validate_confidence(self.detection_confidence)
    }

    /// Stamp the record.
    pub fn into_record(self, id: RecordId, created_at: DateTime<Utc>) -> Evaluation {
        Evaluation {
            id,
            device_id: self.device_id,
            recording_date: self.recording_date,
            recording_name: self.recording_name,
            detection_class: self.detection_class,
            detection_confidence: self.detection_confidence,
            success: self.success,
            created_at,
        }
    }
}

/// Aggregate over a set of evaluations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    /// Number of evaluations.
    pub total: u64,
    /// Evaluations marked correct.
    pub successful: u64,
    /// Evaluations marked wrong.
    pub unsuccessful: u64,
    /// Mean detection confidence (0 when empty).
    pub average_confidence: f64,
}

impl EvaluationSummary {
    /// Fraction of successful evaluations (0 when empty).
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successful as f64 / self.total as f64
        }
    }
}

/// Summary for one detection class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassEvaluationSummary {
    /// Detection class.
    pub detection_class: String,
    /// Aggregate for this class.
    #[serde(flatten)]
    pub summary: EvaluationSummary,
}

/// Overall and per-class evaluation statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationStats {
    /// Over every evaluation.
    pub overall: EvaluationSummary,
    /// Per class, largest total first.
    pub by_class: Vec<ClassEvaluationSummary>,
}
