//! Persistence for predictions, alerts, notifiable classes and evaluations.

mod memory;
mod models;
mod sqlite;

pub use memory::MemoryStore;
pub use models::{
    Alert, ClassEvaluationSummary, ClassRef, ClassUpdate, Evaluation, EvaluationStats,
    EvaluationSummary, NewAlert, NewEvaluation, NewNotifiableClass, NewPrediction,
    NotifiableClass, Prediction, RecordId, validate_confidence,
};
pub use sqlite::SqliteStore;

use crate::alerts::BoundingBox;
use crate::error::Result;
use chrono::{DateTime, Utc};

/// Prefilter for alert lookups.
#[derive(Debug, Clone)]
pub struct AlertQuery {
    /// Coordinates must fall inside this box.
    pub bbox: BoundingBox,
    /// Restrict to these class ids.
    pub class_ids: Option<Vec<RecordId>>,
    /// Only alerts created at or after this time.
    pub since: Option<DateTime<Utc>>,
}

impl AlertQuery {
    /// Whether `alert` passes every filter.
    pub fn matches(&self, alert: &Alert) -> bool {
        self.bbox.contains(alert.latitude, alert.longitude)
            && self
                .class_ids
                .as_ref()
                .is_none_or(|ids| ids.contains(&alert.class_id))
            && self.since.is_none_or(|since| alert.created_at >= since)
    }
}

/// Classification history.
pub trait PredictionStore: Send + Sync {
    /// Insert a prediction, evicting the oldest beyond the retention limit.
    fn save_prediction(&self, prediction: NewPrediction) -> Result<RecordId>;

    /// Most recent predictions first.
    fn list_recent_predictions(&self, limit: usize) -> Result<Vec<Prediction>>;
}

/// Located detections.
pub trait AlertStore: Send + Sync {
    /// Insert an alert.
    fn save_alert(&self, alert: NewAlert) -> Result<RecordId>;

    /// Alerts passing the query's prefilter, in no particular order.
    fn query_alerts_in_bbox(&self, query: &AlertQuery) -> Result<Vec<Alert>>;

    /// Returns Ok(None) if the alert does not exist.
    fn get_alert(&self, id: RecordId) -> Result<Option<Alert>>;
}

/// Classes curated for alerting.
pub trait NotifiableClassStore: Send + Sync {
    /// Create a class. Fails with `DuplicateClass` if the name is taken.
    fn create_notifiable_class(&self, class: NewNotifiableClass) -> Result<NotifiableClass>;

    /// Update a class. Fails with `NotFound` if it does not exist.
    fn update_notifiable_class(&self, id: RecordId, update: &ClassUpdate)
    -> Result<NotifiableClass>;

    /// Returns Ok(None) if the class does not exist.
    fn get_notifiable_class(&self, key: &ClassRef) -> Result<Option<NotifiableClass>>;

    /// Classes ordered by name.
    fn list_notifiable_classes(&self, include_inactive: bool) -> Result<Vec<NotifiableClass>>;
}

/// User feedback on detections.
pub trait EvaluationStore: Send + Sync {
    /// Insert an evaluation.
    fn add_evaluation(&self, evaluation: NewEvaluation) -> Result<RecordId>;

    /// Overall and per-class aggregates.
    fn evaluation_stats(&self) -> Result<EvaluationStats>;
}

/// Every store capability.
pub trait Store: PredictionStore + AlertStore + NotifiableClassStore + EvaluationStore {}

impl<T: PredictionStore + AlertStore + NotifiableClassStore + EvaluationStore> Store for T {}
