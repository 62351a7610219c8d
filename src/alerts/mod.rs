//! Location-based alert matching.

mod geo;
mod matcher;

pub use geo::{BoundingBox, haversine_km, validate_coordinates};
pub use matcher::{
    CreateAlertRequest, NearbyAlert, NearbyQuery, create_alert, find_nearby, should_alert,
};
