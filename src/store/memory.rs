//! In-process store for tests and one-shot runs.

use super::models::{
    Alert, ClassEvaluationSummary, ClassRef, ClassUpdate, Evaluation, EvaluationStats,
    EvaluationSummary, NewAlert, NewEvaluation, NewNotifiableClass, NewPrediction,
    NotifiableClass, Prediction, RecordId,
};
use super::{AlertQuery, AlertStore, EvaluationStore, NotifiableClassStore, PredictionStore};
use crate::constants::storage::PREDICTION_RETENTION;
use crate::error::{Error, Result};
use chrono::Utc;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct Tables {
    next_id: RecordId,
    predictions: VecDeque<Prediction>,
    alerts: Vec<Alert>,
    classes: Vec<NotifiableClass>,
    evaluations: Vec<Evaluation>,
}

impl Tables {
    fn allocate_id(&mut self) -> RecordId {
        self.next_id += 1;
        self.next_id
    }
}

/// Store backed by plain collections behind a mutex.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    retention: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(PREDICTION_RETENTION)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Empty store keeping at most `retention` predictions.
    pub fn new(retention: usize) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            retention,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables.lock().map_err(|_| Error::Internal {
            message: "memory store lock poisoned".to_string(),
        })
    }
}

impl PredictionStore for MemoryStore {
    fn save_prediction(&self, prediction: NewPrediction) -> Result<RecordId> {
        let mut tables = self.lock()?;
        let id = tables.allocate_id();
        tables
            .predictions
            .push_back(prediction.into_record(id, Utc::now()));
        while tables.predictions.len() > self.retention {
            tables.predictions.pop_front();
        }
        Ok(id)
    }

    fn list_recent_predictions(&self, limit: usize) -> Result<Vec<Prediction>> {
        let tables = self.lock()?;
        Ok(tables
            .predictions
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }
}

impl AlertStore for MemoryStore {
    fn save_alert(&self, alert: NewAlert) -> Result<RecordId> {
        let mut tables = self.lock()?;
        let id = tables.allocate_id();
        tables.alerts.push(alert.into_record(id));
        Ok(id)
    }

    fn query_alerts_in_bbox(&self, query: &AlertQuery) -> Result<Vec<Alert>> {
        let tables = self.lock()?;
        Ok(tables
            .alerts
            .iter()
            .filter(|alert| query.matches(alert))
            .cloned()
            .collect())
    }

    fn get_alert(&self, id: RecordId) -> Result<Option<Alert>> {
        let tables = self.lock()?;
        Ok(tables.alerts.iter().find(|a| a.id == id).cloned())
    }
}

impl NotifiableClassStore for MemoryStore {
    fn create_notifiable_class(&self, class: NewNotifiableClass) -> Result<NotifiableClass> {
        class.validate()?;
        let mut tables = self.lock()?;
        if tables.classes.iter().any(|c| c.name == class.name) {
            return Err(Error::DuplicateClass { name: class.name });
        }

        let now = Utc::now();
        let record = NotifiableClass {
            id: tables.allocate_id(),
            name: class.name,
            description: class.description,
            min_confidence: class.min_confidence,
            is_active: class.is_active,
            created_at: now,
            updated_at: now,
        };
        tables.classes.push(record.clone());
        Ok(record)
    }

    fn update_notifiable_class(
        &self,
        id: RecordId,
        update: &ClassUpdate,
    ) -> Result<NotifiableClass> {
        update.validate()?;
        let mut tables = self.lock()?;
        if let Some(name) = &update.name
            && tables.classes.iter().any(|c| c.id != id && &c.name == name)
        {
            return Err(Error::DuplicateClass { name: name.clone() });
        }

        let class = tables
            .classes
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| Error::NotFound {
                what: ClassRef::Id(id).to_string(),
            })?;
        update.apply(class, Utc::now());
        Ok(class.clone())
    }

    fn get_notifiable_class(&self, key: &ClassRef) -> Result<Option<NotifiableClass>> {
        let tables = self.lock()?;
        Ok(tables
            .classes
            .iter()
            .find(|c| match key {
                ClassRef::Id(id) => c.id == *id,
                ClassRef::Name(name) => &c.name == name,
            })
            .cloned())
    }

    fn list_notifiable_classes(&self, include_inactive: bool) -> Result<Vec<NotifiableClass>> {
        let tables = self.lock()?;
        let mut classes: Vec<_> = tables
            .classes
            .iter()
            .filter(|c| include_inactive || c.is_active)
            .cloned()
            .collect();
        classes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(classes)
    }
}

impl EvaluationStore for MemoryStore {
    fn add_evaluation(&self, evaluation: NewEvaluation) -> Result<RecordId> {
        evaluation.validate()?;
        let mut tables = self.lock()?;
        let id = tables.allocate_id();
        tables
            .evaluations
            .push(evaluation.into_record(id, Utc::now()));
        Ok(id)
    }

    fn evaluation_stats(&self) -> Result<EvaluationStats> {
        let tables = self.lock()?;
        Ok(aggregate(&tables.evaluations))
    }
}

#[derive(Default)]
struct Accumulator {
    total: u64,
    successful: u64,
    confidence_sum: f64,
}

impl Accumulator {
    fn add(&mut self, evaluation: &Evaluation) {
        self.total += 1;
        if evaluation.success {
            self.successful += 1;
        }
        self.confidence_sum += evaluation.detection_confidence;
    }

    #[allow(clippy::cast_precision_loss)]
    fn finish(&self) -> EvaluationSummary {
        EvaluationSummary {
            total: self.total,
            successful: self.successful,
            unsuccessful: self.total - self.successful,
            average_confidence: if self.total == 0 {
                0.0
            } else {
                self.confidence_sum / self.total as f64
            },
        }
    }
}

fn aggregate(evaluations: &[Evaluation]) -> EvaluationStats {
    let mut overall = Accumulator::default();
    let mut per_class: BTreeMap<&str, Accumulator> = BTreeMap::new();
    for evaluation in evaluations {
        overall.add(evaluation);
        per_class
            .entry(evaluation.detection_class.as_str())
            .or_default()
            .add(evaluation);
    }

    let mut by_class: Vec<_> = per_class
        .into_iter()
        .map(|(name, acc)| ClassEvaluationSummary {
            detection_class: name.to_string(),
            summary: acc.finish(),
        })
        .collect();
    // Stable sort keeps name order among equal totals.
    by_class.sort_by(|a, b| b.summary.total.cmp(&a.summary.total));

    EvaluationStats {
        overall: overall.finish(),
        by_class,
    }
}
