//! Great-circle distance and search boxes.

use crate::constants::geo::{EARTH_RADIUS_KM, KM_PER_DEGREE, MAX_LATITUDE, MAX_LONGITUDE};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Check that a coordinate pair is on the globe.
pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<()> {
    if !latitude.is_finite() || latitude.abs() > MAX_LATITUDE {
        return Err(Error::InvalidLatitude { value: latitude });
    }
    if !longitude.is_finite() || longitude.abs() > MAX_LONGITUDE {
        return Err(Error::InvalidLongitude { value: longitude });
    }
    Ok(())
}

/// Haversine distance in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Latitude/longitude rectangle, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Southern edge.
    pub min_lat: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Western edge.
    pub min_lon: f64,
    /// Eastern edge.
    pub max_lon: f64,
}

impl BoundingBox {
    /// Box containing every point within `radius_km` of the centre.
    ///
    /// The latitude half-width is `radius_km / 111` degrees. The longitude
    /// half-width grows with latitude; boxes reaching a pole or crossing the
    /// antimeridian cover every longitude.
    pub fn around(latitude: f64, longitude: f64, radius_km: f64) -> Self {
        let lat_delta = radius_km / KM_PER_DEGREE;
        let min_lat = (latitude - lat_delta).max(-MAX_LATITUDE);
        let max_lat = (latitude + lat_delta).min(MAX_LATITUDE);

        let full = (-MAX_LONGITUDE, MAX_LONGITUDE);
        let (min_lon, max_lon) = if latitude.abs() + lat_delta >= MAX_LATITUDE {
            full
        } else {
            let angular = lat_delta.to_radians();
            let ratio = angular.sin() / latitude.to_radians().cos();
            if ratio >= 1.0 {
                full
            } else {
                let lon_delta = ratio.asin().to_degrees();
                let west = longitude - lon_delta;
                let east = longitude + lon_delta;
                if west < -MAX_LONGITUDE || east > MAX_LONGITUDE {
                    full
                } else {
                    (west, east)
                }
            }
        };

        Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    /// Whether the point lies inside the box.
    pub fn contains(&self, latitude: f64, longitude: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&latitude)
            && (self.min_lon..=self.max_lon).contains(&longitude)
    }
}
