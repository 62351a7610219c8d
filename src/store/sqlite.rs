//! `SQLite` store with versioned migrations.

use super::models::{
    Alert, ClassEvaluationSummary, ClassRef, ClassUpdate, EvaluationStats, EvaluationSummary,
    NewAlert, NewEvaluation, NewNotifiableClass, NewPrediction, NotifiableClass, Prediction,
    RecordId,
};
use super::{AlertQuery, AlertStore, EvaluationStore, NotifiableClassStore, PredictionStore};
use crate::error::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, Row, params, params_from_iter};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

const SCHEMA_VERSION: i32 = 1;

/// Thread-safe `SQLite` store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    retention: usize,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply migrations.
    pub fn open(path: &Path, retention: usize) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        debug!("Opened database: {}", path.display());
        Self::from_connection(conn, retention)
    }

    /// Private in-memory database.
    pub fn open_in_memory(retention: usize) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, retention)
    }

    fn from_connection(conn: Connection, retention: usize) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            retention,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::Internal {
            message: "database connection lock poisoned".to_string(),
        })
    }
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version < 1 {
        migration_v1(conn)?;
        conn.execute("INSERT INTO schema_migrations (version) VALUES (?1)", [1])?;
        info!("Applied database schema v{SCHEMA_VERSION}");
    }

    Ok(())
}

fn migration_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS predictions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_name TEXT NOT NULL,
            file_path TEXT NOT NULL,
            top_class TEXT NOT NULL,
            top_confidence REAL NOT NULL,
            scores TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS notifiable_classes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            description TEXT,
            min_confidence REAL NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS alerts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            class_id INTEGER NOT NULL,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            confidence REAL NOT NULL,
            device_id TEXT NOT NULL,
            is_verified INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            FOREIGN KEY (class_id) REFERENCES notifiable_classes(id)
        );

        CREATE INDEX IF NOT EXISTS idx_alerts_location ON alerts(latitude, longitude);
        CREATE INDEX IF NOT EXISTS idx_alerts_created_at ON alerts(created_at);

        CREATE TABLE IF NOT EXISTS evaluations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id TEXT NOT NULL,
            recording_date TEXT NOT NULL,
            recording_name TEXT NOT NULL,
            detection_class TEXT NOT NULL,
            detection_confidence REAL NOT NULL,
            success INTEGER NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_evaluations_class ON evaluations(detection_class);",
    )?;
    Ok(())
}

/// Fixed-width UTC form so text comparison follows time order.
fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn prediction_from_row(row: &Row<'_>) -> rusqlite::Result<Prediction> {
    let scores: String = row.get(5)?;
    let prediction = serde_json::from_str(&scores)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;
    Ok(Prediction {
        id: row.get(0)?,
        file_name: row.get(1)?,
        file_path: row.get(2)?,
        top_class: row.get(3)?,
        top_confidence: row.get(4)?,
        prediction,
        created_at: parse_timestamp(row, 6)?,
    })
}

fn alert_from_row(row: &Row<'_>) -> rusqlite::Result<Alert> {
    Ok(Alert {
        id: row.get(0)?,
        class_id: row.get(1)?,
        latitude: row.get(2)?,
        longitude: row.get(3)?,
        confidence: row.get(4)?,
        device_id: row.get(5)?,
        is_verified: row.get(6)?,
        created_at: parse_timestamp(row, 7)?,
        expires_at: parse_timestamp(row, 8)?,
    })
}

fn class_from_row(row: &Row<'_>) -> rusqlite::Result<NotifiableClass> {
    Ok(NotifiableClass {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        min_confidence: row.get(3)?,
        is_active: row.get(4)?,
        created_at: parse_timestamp(row, 5)?,
        updated_at: parse_timestamp(row, 6)?,
    })
}

#[allow(clippy::cast_sign_loss)]
fn summary_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<EvaluationSummary> {
    let total: i64 = row.get(offset)?;
    let successful: i64 = row.get(offset + 1)?;
    Ok(EvaluationSummary {
        total: total as u64,
        successful: successful as u64,
        unsuccessful: (total - successful) as u64,
        average_confidence: row.get(offset + 2)?,
    })
}

const PREDICTION_COLUMNS: &str =
    "id, file_name, file_path, top_class, top_confidence, scores, created_at";
const ALERT_COLUMNS: &str =
    "id, class_id, latitude, longitude, confidence, device_id, is_verified, created_at, expires_at";
const CLASS_COLUMNS: &str =
    "id, name, description, min_confidence, is_active, created_at, updated_at";

fn get_class(conn: &Connection, key: &ClassRef) -> Result<Option<NotifiableClass>> {
    let result = match key {
        ClassRef::Id(id) => conn.query_row(
            &format!("SELECT {CLASS_COLUMNS} FROM notifiable_classes WHERE id = ?1"),
            [id],
            class_from_row,
        ),
        ClassRef::Name(name) => conn.query_row(
            &format!("SELECT {CLASS_COLUMNS} FROM notifiable_classes WHERE name = ?1"),
            [name],
            class_from_row,
        ),
    };

    match result {
        Ok(class) => Ok(Some(class)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl PredictionStore for SqliteStore {
    fn save_prediction(&self, prediction: NewPrediction) -> Result<RecordId> {
        let scores = serde_json::to_string(&prediction.prediction).map_err(|e| Error::Internal {
            message: format!("failed to serialize prediction: {e}"),
        })?;
        let record = prediction.into_record(0, Utc::now());

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO predictions (file_name, file_path, top_class, top_confidence, scores, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.file_name,
                record.file_path,
                record.top_class,
                record.top_confidence,
                scores,
                timestamp(record.created_at),
            ],
        )?;
        let id = conn.last_insert_rowid();

        let evicted = conn.execute(
            "DELETE FROM predictions WHERE id NOT IN (
                SELECT id FROM predictions ORDER BY id DESC LIMIT ?1
            )",
            [i64::try_from(self.retention).unwrap_or(i64::MAX)],
        )?;
        if evicted > 0 {
            debug!("Evicted {evicted} old prediction(s)");
        }
        Ok(id)
    }

    fn list_recent_predictions(&self, limit: usize) -> Result<Vec<Prediction>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PREDICTION_COLUMNS} FROM predictions ORDER BY id DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(
            [i64::try_from(limit).unwrap_or(i64::MAX)],
            prediction_from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

impl AlertStore for SqliteStore {
    fn save_alert(&self, alert: NewAlert) -> Result<RecordId> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO alerts (class_id, latitude, longitude, confidence, device_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                alert.class_id,
                alert.latitude,
                alert.longitude,
                alert.confidence,
                alert.device_id,
                timestamp(alert.created_at),
                timestamp(alert.expires_at),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn query_alerts_in_bbox(&self, query: &AlertQuery) -> Result<Vec<Alert>> {
        let mut sql = format!(
            "SELECT {ALERT_COLUMNS} FROM alerts
             WHERE latitude BETWEEN ?1 AND ?2 AND longitude BETWEEN ?3 AND ?4"
        );
        let mut values = vec![
            Value::Real(query.bbox.min_lat),
            Value::Real(query.bbox.max_lat),
            Value::Real(query.bbox.min_lon),
            Value::Real(query.bbox.max_lon),
        ];

        if let Some(ids) = &query.class_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders: Vec<String> = (0..ids.len())
                .map(|i| format!("?{}", values.len() + i + 1))
                .collect();
            sql.push_str(&format!(" AND class_id IN ({})", placeholders.join(", ")));
            values.extend(ids.iter().map(|&id| Value::Integer(id)));
        }

        if let Some(since) = query.since {
            sql.push_str(&format!(" AND created_at >= ?{}", values.len() + 1));
            values.push(Value::Text(timestamp(since)));
        }

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), alert_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn get_alert(&self, id: RecordId) -> Result<Option<Alert>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            &format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1"),
            [id],
            alert_from_row,
        );
        match result {
            Ok(alert) => Ok(Some(alert)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl NotifiableClassStore for SqliteStore {
    fn create_notifiable_class(&self, class: NewNotifiableClass) -> Result<NotifiableClass> {
        class.validate()?;
        let conn = self.lock()?;
        if get_class(&conn, &ClassRef::Name(class.name.clone()))?.is_some() {
            return Err(Error::DuplicateClass { name: class.name });
        }

        let now = timestamp(Utc::now());
        conn.execute(
            "INSERT INTO notifiable_classes (name, description, min_confidence, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                class.name,
                class.description,
                class.min_confidence,
                class.is_active,
                now
            ],
        )?;
        let id = conn.last_insert_rowid();
        get_class(&conn, &ClassRef::Id(id))?.ok_or_else(|| Error::Internal {
            message: format!("class #{id} vanished after insert"),
        })
    }

    fn update_notifiable_class(
        &self,
        id: RecordId,
        update: &ClassUpdate,
    ) -> Result<NotifiableClass> {
        update.validate()?;
        let conn = self.lock()?;
        let mut class = get_class(&conn, &ClassRef::Id(id))?.ok_or_else(|| Error::NotFound {
            what: ClassRef::Id(id).to_string(),
        })?;

        if let Some(name) = &update.name
            && let Some(existing) = get_class(&conn, &ClassRef::Name(name.clone()))?
            && existing.id != id
        {
            return Err(Error::DuplicateClass { name: name.clone() });
        }

        update.apply(&mut class, Utc::now());
        conn.execute(
            "UPDATE notifiable_classes
             SET name = ?1, description = ?2, min_confidence = ?3, is_active = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                class.name,
                class.description,
                class.min_confidence,
                class.is_active,
                timestamp(class.updated_at),
                id
            ],
        )?;
        Ok(class)
    }

    fn get_notifiable_class(&self, key: &ClassRef) -> Result<Option<NotifiableClass>> {
        let conn = self.lock()?;
        get_class(&conn, key)
    }

    fn list_notifiable_classes(&self, include_inactive: bool) -> Result<Vec<NotifiableClass>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CLASS_COLUMNS} FROM notifiable_classes
             WHERE ?1 OR is_active = 1
             ORDER BY name"
        ))?;
        let rows = stmt.query_map([include_inactive], class_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

impl EvaluationStore for SqliteStore {
    fn add_evaluation(&self, evaluation: NewEvaluation) -> Result<RecordId> {
        evaluation.validate()?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO evaluations (device_id, recording_date, recording_name, detection_class,
                                      detection_confidence, success, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                evaluation.device_id,
                timestamp(evaluation.recording_date),
                evaluation.recording_name,
                evaluation.detection_class,
                evaluation.detection_confidence,
                evaluation.success,
                timestamp(Utc::now()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn evaluation_stats(&self) -> Result<EvaluationStats> {
        let conn = self.lock()?;
        let overall = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END), 0),
                    COALESCE(AVG(detection_confidence), 0.0)
             FROM evaluations",
            [],
            |row| summary_from_row(row, 0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT detection_class,
                    COUNT(*) AS total,
                    SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END),
                    AVG(detection_confidence)
             FROM evaluations
             GROUP BY detection_class
             ORDER BY total DESC, detection_class",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ClassEvaluationSummary {
                detection_class: row.get(0)?,
                summary: summary_from_row(row, 1)?,
            })
        })?;
        let by_class = rows.collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(EvaluationStats { overall, by_class })
    }
}
