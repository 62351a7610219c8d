//! Integration tests for prediction retention and evaluation statistics.

#![allow(clippy::unwrap_used, clippy::float_cmp)]

use chrono::Utc;
use earshot::error::Error;
use earshot::inference::ClassPrediction;
use earshot::store::{
    ClassRef, ClassUpdate, MemoryStore, NewEvaluation, NewNotifiableClass, NewPrediction,
    NotifiableClassStore, PredictionStore, SqliteStore, Store,
};
use tempfile::TempDir;

fn prediction(i: usize) -> NewPrediction {
    let labels = vec!["background".to_string(), "siren".to_string()];
    NewPrediction {
        file_name: format!("rec-{i}.wav"),
        file_path: format!("/uploads/rec-{i}.wav"),
        prediction: ClassPrediction::new(&labels, &[0.25, 0.75]).unwrap(),
    }
}

fn check_retention(store: &dyn Store) {
    for i in 0..101 {
        store.save_prediction(prediction(i)).unwrap();
    }

    let kept = store.list_recent_predictions(1000).unwrap();
    assert_eq!(kept.len(), 100);
    assert_eq!(kept[0].file_name, "rec-100.wav");
    assert_eq!(kept[99].file_name, "rec-1.wav");
    assert!(kept.iter().all(|p| p.file_name != "rec-0.wav"));
    assert_eq!(kept[0].top_class, "siren");
    assert_eq!(kept[0].top_confidence, 0.75);

    assert_eq!(store.list_recent_predictions(3).unwrap().len(), 3);
}

#[test]
fn test_memory_store_keeps_newest_hundred() {
    check_retention(&MemoryStore::new(100));
}

#[test]
fn test_sqlite_store_keeps_newest_hundred() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteStore::open(&tmp.path().join("nested").join("earshot.db"), 100).unwrap();
    check_retention(&store);
}

#[test]
fn test_sqlite_store_persists_across_reopen() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("earshot.db");
    {
        let store = SqliteStore::open(&path, 100).unwrap();
        store.save_prediction(prediction(1)).unwrap();
        store
            .create_notifiable_class(NewNotifiableClass::new("siren", 0.7))
            .unwrap();
    }

    let store = SqliteStore::open(&path, 100).unwrap();
    let predictions = store.list_recent_predictions(10).unwrap();
    assert_eq!(predictions.len(), 1);
    assert_eq!(
        predictions[0].prediction.confidence("siren"),
        Some(0.75)
    );
    assert!(
        store
            .get_notifiable_class(&ClassRef::Name("siren".to_string()))
            .unwrap()
            .is_some()
    );
}

fn check_classes(store: &dyn Store) {
    let siren = store
        .create_notifiable_class(NewNotifiableClass::new("siren", 0.7))
        .unwrap();
    let err = store
        .create_notifiable_class(NewNotifiableClass::new("siren", 0.9))
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateClass { .. }));

    let horn = store
        .create_notifiable_class(NewNotifiableClass::new("horn", 0.7))
        .unwrap();
    let err = store
        .update_notifiable_class(
            horn.id,
            &ClassUpdate {
                name: Some("siren".to_string()),
                ..ClassUpdate::default()
            },
        )
        .unwrap_err();
    assert!(matches!(err, Error::DuplicateClass { .. }));

    let updated = store
        .update_notifiable_class(
            siren.id,
            &ClassUpdate {
                is_active: Some(false),
                min_confidence: Some(0.9),
                ..ClassUpdate::default()
            },
        )
        .unwrap();
    assert!(!updated.is_active);
    assert_eq!(updated.min_confidence, 0.9);
    assert_eq!(updated.name, "siren");

    let active: Vec<String> = store
        .list_notifiable_classes(false)
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(active, vec!["horn"]);
    assert_eq!(store.list_notifiable_classes(true).unwrap().len(), 2);

    let err = store
        .update_notifiable_class(9999, &ClassUpdate::default())
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[test]
fn test_class_rules_in_both_stores() {
    check_classes(&MemoryStore::default());
    check_classes(&SqliteStore::open_in_memory(100).unwrap());
}

fn evaluation(class: &str, confidence: f64, success: bool) -> NewEvaluation {
    NewEvaluation {
        device_id: "device-1".to_string(),
        recording_date: Utc::now(),
        recording_name: "rec.wav".to_string(),
        detection_class: class.to_string(),
        detection_confidence: confidence,
        success,
    }
}

fn check_stats(store: &dyn Store) {
    let empty = store.evaluation_stats().unwrap();
    assert_eq!(empty.overall.total, 0);
    assert!(empty.by_class.is_empty());

    store.add_evaluation(evaluation("siren", 0.9, true)).unwrap();
    store.add_evaluation(evaluation("siren", 0.7, false)).unwrap();
    store.add_evaluation(evaluation("siren", 0.8, true)).unwrap();
    store.add_evaluation(evaluation("horn", 0.6, true)).unwrap();

    let stats = store.evaluation_stats().unwrap();
    assert_eq!(stats.overall.total, 4);
    assert_eq!(stats.overall.successful, 3);
    assert_eq!(stats.overall.unsuccessful, 1);
    assert!((stats.overall.average_confidence - 0.75).abs() < 1e-9);

    assert_eq!(stats.by_class.len(), 2);
    assert_eq!(stats.by_class[0].detection_class, "siren");
    assert_eq!(stats.by_class[0].summary.total, 3);
    assert!((stats.by_class[0].summary.average_confidence - 0.8).abs() < 1e-9);
    assert_eq!(stats.by_class[1].detection_class, "horn");
    assert_eq!(stats.by_class[1].summary.successful, 1);

    let err = store.add_evaluation(evaluation("siren", 1.5, true)).unwrap_err();
    assert!(err.is_input_error());
}

#[test]
fn test_evaluation_stats_in_both_stores() {
    check_stats(&MemoryStore::default());
    check_stats(&SqliteStore::open_in_memory(100).unwrap());
}
