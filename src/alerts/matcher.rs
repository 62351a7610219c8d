//! Radius search over stored alerts and the class-threshold gate.

use super::geo::{BoundingBox, haversine_km, validate_coordinates};
use crate::error::{Error, RejectionReason, Result};
use crate::store::{
    Alert, AlertQuery, AlertStore, ClassRef, NewAlert, NotifiableClass, NotifiableClassStore,
    RecordId, validate_confidence,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

/// Parameters of a nearby-alerts search.
#[derive(Debug, Clone)]
pub struct NearbyQuery {
    /// Centre latitude in degrees.
    pub latitude: f64,
    /// Centre longitude in degrees.
    pub longitude: f64,
    /// Search radius in km.
    pub radius_km: f64,
    /// Restrict to these classes.
    pub class_ids: Option<Vec<RecordId>>,
    /// Only alerts created within this many hours.
    pub hours_ago: Option<u32>,
}

impl NearbyQuery {
    /// Unfiltered query.
    pub const fn new(latitude: f64, longitude: f64, radius_km: f64) -> Self {
        Self {
            latitude,
            longitude,
            radius_km,
            class_ids: None,
            hours_ago: None,
        }
    }

    fn validate(&self) -> Result<()> {
        validate_coordinates(self.latitude, self.longitude)?;
        if !self.radius_km.is_finite() || self.radius_km <= 0.0 {
            return Err(Error::InvalidRadius {
                value: self.radius_km,
            });
        }
        Ok(())
    }
}

/// An alert with its distance from the query point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyAlert {
    /// The stored alert.
    #[serde(flatten)]
    pub alert: Alert,
    /// Great-circle distance in km.
    pub distance_km: f64,
}

/// Alerts within `radius_km` of the query point, nearest first.
///
/// Candidates come from a bounding-box prefilter; the Haversine distance
/// decides membership. An alert exactly on the radius is included.
pub fn find_nearby(
    store: &dyn AlertStore,
    query: &NearbyQuery,
    now: DateTime<Utc>,
) -> Result<Vec<NearbyAlert>> {
    query.validate()?;

    let prefilter = AlertQuery {
        bbox: BoundingBox::around(query.latitude, query.longitude, query.radius_km),
        class_ids: query.class_ids.clone(),
        since: query.hours_ago.and_then(|hours| cutoff(now, hours)),
    };
    let candidates = store.query_alerts_in_bbox(&prefilter)?;
    let candidate_count = candidates.len();

    let mut nearby: Vec<NearbyAlert> = candidates
        .into_iter()
        .filter_map(|alert| {
            let distance_km =
                haversine_km(query.latitude, query.longitude, alert.latitude, alert.longitude);
            (distance_km <= query.radius_km).then_some(NearbyAlert { alert, distance_km })
        })
        .collect();
    nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));

    debug!(
        "Nearby search: {} of {candidate_count} candidates within {} km",
        nearby.len(),
        query.radius_km
    );
    Ok(nearby)
}

/// Earliest creation time for a `hours`-hour window.
///
/// Windows reaching past the earliest representable time have no cutoff.
fn cutoff(now: DateTime<Utc>, hours: u32) -> Option<DateTime<Utc>> {
    Duration::try_hours(i64::from(hours)).and_then(|window| now.checked_sub_signed(window))
}

/// Whether a detection of `class` at `confidence` should raise an alert.
pub fn should_alert(class: &NotifiableClass, confidence: f64) -> bool {
    class.is_active && confidence >= class.min_confidence
}

/// Request to raise an alert.
#[derive(Debug, Clone)]
pub struct CreateAlertRequest {
    /// Detected class.
    pub class: ClassRef,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Detection confidence in [0, 1].
    pub confidence: f64,
    /// Reporting device.
    pub device_id: String,
}

/// Store an alert if the class gate lets it through.
///
/// Returns the new alert id. Inactive classes and confidences below the
/// class threshold are refused with [`Error::AlertRejected`].
pub fn create_alert<S>(
    store: &S,
    request: CreateAlertRequest,
    now: DateTime<Utc>,
    validity: Duration,
) -> Result<RecordId>
where
    S: AlertStore + NotifiableClassStore + ?Sized,
{
    validate_coordinates(request.latitude, request.longitude)?;
    validate_confidence(request.confidence)?;

    let class = store
        .get_notifiable_class(&request.class)?
        .ok_or_else(|| Error::NotFound {
            what: request.class.to_string(),
        })?;

    if !class.is_active {
        return Err(Error::AlertRejected {
            reason: RejectionReason::ClassInactive,
        });
    }
    if request.confidence < class.min_confidence {
        return Err(Error::AlertRejected {
            reason: RejectionReason::BelowThreshold,
        });
    }

    let expires_at = now.checked_add_signed(validity).ok_or_else(|| {
        Error::invalid_input(format!("alert validity of {validity} is out of range"))
    })?;

    let id = store.save_alert(NewAlert {
        class_id: class.id,
        latitude: request.latitude,
        longitude: request.longitude,
        confidence: request.confidence,
        device_id: request.device_id,
        created_at: now,
        expires_at,
    })?;
    info!(
        "Alert #{id} for '{}' at ({}, {})",
        class.name, request.latitude, request.longitude
    );
    Ok(id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::{ClassUpdate, MemoryStore, NewNotifiableClass};

    fn class(active: bool, min_confidence: f64) -> NotifiableClass {
        let now = Utc::now();
        NotifiableClass {
            id: 1,
            name: "siren".to_string(),
            description: None,
            min_confidence,
            is_active: active,
            created_at: now,
            updated_at: now,
        }
    }

    fn request(confidence: f64) -> CreateAlertRequest {
        CreateAlertRequest {
            class: ClassRef::Name("siren".to_string()),
            latitude: 39.9,
            longitude: 32.8,
            confidence,
            device_id: "device-1".to_string(),
        }
    }

    #[test]
    fn test_should_alert_boundaries() {
        assert!(should_alert(&class(true, 0.7), 0.7));
        assert!(should_alert(&class(true, 0.7), 0.71));
        assert!(!should_alert(&class(true, 0.7), 0.699_999));
        assert!(!should_alert(&class(false, 0.7), 1.0));
        assert!(should_alert(&class(true, 0.0), 0.0));
    }

    #[test]
    fn test_create_alert_rejections_are_distinct() {
        let store = MemoryStore::default();
        let siren = store
            .create_notifiable_class(NewNotifiableClass::new("siren", 0.7))
            .unwrap();
        let now = Utc::now();

        let err = create_alert(&store, request(0.5), now, Duration::hours(1)).unwrap_err();
        assert!(matches!(
            err,
            Error::AlertRejected {
                reason: RejectionReason::BelowThreshold
            }
        ));

        store
            .update_notifiable_class(siren.id, &ClassUpdate {
                is_active: Some(false),
                ..ClassUpdate::default()
            })
            .unwrap();
        let err = create_alert(&store, request(0.9), now, Duration::hours(1)).unwrap_err();
        assert!(matches!(
            err,
            Error::AlertRejected {
                reason: RejectionReason::ClassInactive
            }
        ));
    }

    #[test]
    fn test_create_alert_sets_expiry() {
        let store = MemoryStore::default();
        store
            .create_notifiable_class(NewNotifiableClass::new("siren", 0.7))
            .unwrap();
        let now = Utc::now();
        let id = create_alert(&store, request(0.7), now, Duration::hours(1)).unwrap();

        let alert = store.get_alert(id).unwrap().unwrap();
        assert_eq!(alert.expires_at, now + Duration::hours(1));
        assert!(alert.is_active_at(now));
        assert!(!alert.is_active_at(now + Duration::hours(1)));
    }

    #[test]
    fn test_create_alert_unknown_class() {
        let store = MemoryStore::default();
        let err = create_alert(&store, request(0.9), Utc::now(), Duration::hours(1)).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_create_alert_validates_input() {
        let store = MemoryStore::default();
        let mut bad = request(0.9);
        bad.latitude = 91.0;
        assert!(
            create_alert(&store, bad, Utc::now(), Duration::hours(1))
                .unwrap_err()
                .is_input_error()
        );
        assert!(matches!(
            create_alert(&store, request(1.5), Utc::now(), Duration::hours(1)),
            Err(Error::InvalidConfidence { .. })
        ));
    }

    #[test]
    fn test_create_alert_validity_overflow_is_input_error() {
        let store = MemoryStore::default();
        store
            .create_notifiable_class(NewNotifiableClass::new("siren", 0.7))
            .unwrap();
        let err = create_alert(&store, request(0.9), Utc::now(), Duration::MAX).unwrap_err();
        assert!(err.is_input_error(), "{err}");
    }

    #[test]
    fn test_widest_hour_window_keeps_every_alert() {
        let store = MemoryStore::default();
        let siren = store
            .create_notifiable_class(NewNotifiableClass::new("siren", 0.7))
            .unwrap();
        let now = Utc::now();
        create_alert(&store, request(0.9), now - Duration::days(3650), Duration::hours(1)).unwrap();

        let query = NearbyQuery {
            class_ids: Some(vec![siren.id]),
            hours_ago: Some(u32::MAX),
            ..NearbyQuery::new(39.9, 32.8, 1.0)
        };
        let found = find_nearby(&store, &query, now).unwrap();
        assert_eq!(found.len(), 1);

        // Also when the window reaches past the earliest representable time.
        let found = find_nearby(&store, &query, DateTime::<Utc>::MIN_UTC + Duration::hours(1))
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_find_nearby_rejects_bad_radius() {
        let store = MemoryStore::default();
        let err = find_nearby(&store, &NearbyQuery::new(0.0, 0.0, 0.0), Utc::now()).unwrap_err();
        assert!(matches!(err, Error::InvalidRadius { .. }));
    }
}
