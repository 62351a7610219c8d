//! Training task status and handles.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use uuid::Uuid;

/// Summary of a completed training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Class names in output order.
    pub classes: Vec<String>,
    /// Spectrograms used for fitting.
    pub num_training_samples: usize,
    /// Spectrograms held out for testing.
    pub num_test_samples: usize,
    /// Epochs actually run.
    pub num_epochs: usize,
    /// Training accuracy of the last epoch.
    pub training_accuracy: f32,
    /// Validation accuracy of the last epoch.
    pub validation_accuracy: f32,
    /// Accuracy on the held-out set with the restored weights.
    pub test_accuracy: f32,
    /// Loss on the held-out set with the restored weights.
    pub test_loss: f32,
    /// Written weights file.
    pub model_path: PathBuf,
}

/// Lifecycle of a training task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainingStatus {
    /// Accepted, not started.
    Initializing,
    /// Running the named stage.
    Processing {
        /// Current stage, e.g. "extracting features".
        stage: String,
    },
    /// Finished successfully.
    Completed {
        /// Run summary.
        report: TrainingReport,
    },
    /// Aborted.
    Failed {
        /// What went wrong.
        message: String,
    },
}

impl TrainingStatus {
    /// Whether the task has finished, successfully or not.
    pub const fn is_finished(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Handle to a background training task.
#[derive(Debug, Clone)]
pub struct TrainingHandle {
    id: Uuid,
    rx: watch::Receiver<TrainingStatus>,
}

impl TrainingHandle {
    pub(crate) fn new(id: Uuid, rx: watch::Receiver<TrainingStatus>) -> Self {
        Self { id, rx }
    }

    /// Task id.
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Current status.
    pub fn status(&self) -> TrainingStatus {
        self.rx.borrow().clone()
    }

    /// Wait until the task completes or fails.
    pub async fn wait(mut self) -> TrainingStatus {
        let finished = self
            .rx
            .wait_for(TrainingStatus::is_finished)
            .await
            .map(|status| status.clone());
        finished.unwrap_or_else(|_| self.rx.borrow().clone())
    }
}

/// Registry of training tasks by id, for polling.
#[derive(Debug, Clone, Default)]
pub struct TrainingTasks {
    tasks: Arc<Mutex<HashMap<Uuid, TrainingHandle>>>,
}

impl TrainingTasks {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a handle.
    pub fn insert(&self, handle: TrainingHandle) -> Uuid {
        let id = handle.id();
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.insert(id, handle);
        }
        id
    }

    /// Status of a tracked task.
    pub fn status(&self, id: Uuid) -> Option<TrainingStatus> {
        self.get(id).map(|handle| handle.status())
    }

    /// Clone of a tracked handle.
    pub fn get(&self, id: Uuid) -> Option<TrainingHandle> {
        self.tasks.lock().ok()?.get(&id).cloned()
    }

    /// Ids and statuses of every tracked task.
    pub fn list(&self) -> Vec<(Uuid, TrainingStatus)> {
        self.tasks
            .lock()
            .map(|tasks| {
                tasks
                    .iter()
                    .map(|(id, handle)| (*id, handle.status()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_with_tag() {
        let json = serde_json::to_string(&TrainingStatus::Processing {
            stage: "training".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"status":"processing","stage":"training"}"#);
    }

    #[tokio::test]
    async fn test_wait_returns_final_status() {
        let (tx, rx) = watch::channel(TrainingStatus::Initializing);
        let handle = TrainingHandle::new(Uuid::new_v4(), rx);
        let tasks = TrainingTasks::new();
        let id = tasks.insert(handle.clone());

        std::thread::spawn(move || {
            tx.send_replace(TrainingStatus::Processing {
                stage: "training".to_string(),
            });
            tx.send_replace(TrainingStatus::Failed {
                message: "boom".to_string(),
            });
        });

        let status = handle.wait().await;
        assert_eq!(
            status,
            TrainingStatus::Failed {
                message: "boom".to_string()
            }
        );
        assert!(tasks.status(id).unwrap().is_finished());
        assert_eq!(tasks.list().len(), 1);
    }

    #[test]
    fn test_unknown_task() {
        assert!(TrainingTasks::new().status(Uuid::new_v4()).is_none());
    }
}
