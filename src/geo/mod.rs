//! Location resolution and coarse spatial fingerprinting.
//!
//! Free-text place descriptions are geocoded to a coordinate pair, then
//! truncated to four decimal places to form a fingerprint. Two points that
//! truncate to the same strings are treated as "same area"; the grid matches
//! them with left-anchored prefix filters, so no geometric distance support
//! is needed from the store.

use crate::config::GeocoderConfig;
use crate::error::RidepoolError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A resolved coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLong {
    pub lat: f64,
    pub lng: f64,
}

/// Truncates a coordinate to four decimal places without rounding.
///
/// Works on the decimal expansion rather than float math, so values near a
/// truncation boundary never round up and negative coordinates truncate
/// toward zero the same way their string form does.
///
/// # Examples
///
/// ```
/// use ridepool::geo::truncate_coordinate;
///
/// assert_eq!(truncate_coordinate(30.267153), "30.2671");
/// assert_eq!(truncate_coordinate(-97.74306), "-97.7430");
/// assert_eq!(truncate_coordinate(45.0), "45.0000");
/// ```
pub fn truncate_coordinate(value: f64) -> String {
    let text = format!("{}", value);
    match text.find('.') {
        None => format!("{}.0000", text),
        Some(dot) => {
            let (int_part, frac_part) = text.split_at(dot);
            let mut frac: String = frac_part[1..].chars().take(4).collect();
            while frac.len() < 4 {
                frac.push('0');
            }
            format!("{}.{}", int_part, frac)
        }
    }
}

/// Coarse spatial bucket for one point: both axes truncated to four
/// decimals. Used both as the stored cell value and as the search prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub lat: String,
    pub lng: String,
}

impl Fingerprint {
    /// Fingerprint of a resolved coordinate.
    pub fn from_latlong(point: &LatLong) -> Self {
        Self {
            lat: truncate_coordinate(point.lat),
            lng: truncate_coordinate(point.lng),
        }
    }
}

/// Converts free-text place descriptions to coordinates.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve `location` to the first matching coordinate.
    ///
    /// # Errors
    ///
    /// Returns `RidepoolError::Resolution` when the geocoder returns no
    /// results or the call fails. Callers must treat this as non-retryable
    /// within the current invocation.
    async fn resolve(&self, location: &str) -> Result<LatLong, RidepoolError>;
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLong,
}

/// Geocoder backed by an HTTP geocoding API.
pub struct HttpGeocoder {
    client: Client,
    config: GeocoderConfig,
}

impl HttpGeocoder {
    /// Creates a new geocoder client.
    ///
    /// # Errors
    ///
    /// Returns `RidepoolError::Resolution` if the HTTP client cannot be built.
    pub fn new(config: GeocoderConfig) -> Result<Self, RidepoolError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RidepoolError::Resolution(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Geocoder for HttpGeocoder {
    async fn resolve(&self, location: &str) -> Result<LatLong, RidepoolError> {
        let url = format!("{}/json", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("address", location), ("key", &self.config.api_key)])
            .send()
            .await
            .map_err(|e| RidepoolError::Resolution(format!("geocode request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RidepoolError::Resolution(format!(
                "geocode returned {}",
                status
            )));
        }

        let parsed: GeocodeResponse = response
            .json()
            .await
            .map_err(|e| RidepoolError::Resolution(format!("geocode body: {}", e)))?;

        let first = parsed.results.into_iter().next().ok_or_else(|| {
            RidepoolError::Resolution(format!("no results for {:?}", location))
        })?;
        debug!(location, lat = first.geometry.location.lat, lng = first.geometry.location.lng, "resolved location");
        Ok(first.geometry.location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_positive() {
        assert_eq!(truncate_coordinate(30.267153), "30.2671");
    }

    #[test]
    fn test_truncate_negative_toward_zero() {
        assert_eq!(truncate_coordinate(-97.74306), "-97.7430");
    }

    #[test]
    fn test_truncate_pads_short_expansions() {
        assert_eq!(truncate_coordinate(12.5), "12.5000");
        assert_eq!(truncate_coordinate(12.34), "12.3400");
    }

    #[test]
    fn test_truncate_integer_coordinate() {
        assert_eq!(truncate_coordinate(45.0), "45.0000");
        assert_eq!(truncate_coordinate(0.0), "0.0000");
    }

    #[test]
    fn test_truncate_never_rounds_up() {
        assert_eq!(truncate_coordinate(1.23749), "1.2374");
        assert_eq!(truncate_coordinate(-1.99999), "-1.9999");
    }

    #[test]
    fn test_fingerprint_equality_for_nearby_points() {
        let a = Fingerprint::from_latlong(&LatLong {
            lat: 30.26711,
            lng: -97.74301,
        });
        let b = Fingerprint::from_latlong(&LatLong {
            lat: 30.26719,
            lng: -97.74309,
        });
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_differs_across_buckets() {
        let a = Fingerprint::from_latlong(&LatLong {
            lat: 30.2671,
            lng: -97.7430,
        });
        let b = Fingerprint::from_latlong(&LatLong {
            lat: 30.2672,
            lng: -97.7430,
        });
        assert_ne!(a, b);
    }

    #[test]
    fn test_geocode_response_first_result() {
        let parsed: GeocodeResponse = serde_json::from_str(
            r#"{"results":[{"geometry":{"location":{"lat":30.2,"lng":-97.7}}},{"geometry":{"location":{"lat":1.0,"lng":2.0}}}]}"#,
        )
        .unwrap();
        let first = parsed.results.into_iter().next().unwrap();
        assert_eq!(first.geometry.location.lat, 30.2);
    }
}
