//! Free-text place search
//!
//! `NominatimClient` queries an OpenStreetMap Nominatim endpoint and keeps
//! the first hit only.

use crate::domain::normalize::coerce_number;
use crate::domain::types::{Coordinate, LocationId};
use crate::error::TransportError;
use crate::infra::config::Config;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A resolved search hit
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeResult {
    pub coords: Coordinate,
    pub display_name: String,
}

impl GeocodeResult {
    /// Id for a place found by search rather than picked from the store
    pub fn location_id(&self) -> LocationId {
        LocationId::from_coords(self.coords)
    }
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Best match for `query`, or `None` when nothing matched
    async fn resolve(&self, query: &str) -> Result<Option<GeocodeResult>, TransportError>;
}

/// First usable hit of a Nominatim `format=json` response
pub fn parse_search_response(body: &Value) -> Result<Option<GeocodeResult>, TransportError> {
    let hits = body
        .as_array()
        .ok_or_else(|| TransportError::Decode("expected a JSON array of places".to_string()))?;
    let Some(first) = hits.first() else {
        return Ok(None);
    };

    let lat = first.get("lat").and_then(coerce_number);
    let lon = first.get("lon").and_then(coerce_number);
    let coords = lat
        .zip(lon)
        .and_then(|(lat, lon)| Coordinate::new(lat, lon))
        .ok_or_else(|| TransportError::Decode("place without usable lat/lon".to_string()))?;
    let display_name = first
        .get("display_name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| coords.to_string());

    Ok(Some(GeocodeResult { coords, display_name }))
}

pub struct NominatimClient {
    url: String,
    enabled: bool,
    http_client: reqwest::Client,
}

impl NominatimClient {
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        // Nominatim's usage policy requires an identifying user agent
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.geocoder_timeout_ms()))
            .user_agent(concat!("waitline/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { url: config.geocoder_url().to_string(), enabled: config.geocoder_enabled(), http_client })
    }
}

#[async_trait]
impl Geocoder for NominatimClient {
    async fn resolve(&self, query: &str) -> Result<Option<GeocodeResult>, TransportError> {
        if !self.enabled {
            return Err(TransportError::Disabled);
        }
        let query = query.trim();
        if query.is_empty() {
            return Ok(None);
        }

        debug!(query = %query, "geocode_request");
        let response = self
            .http_client
            .get(&self.url)
            .query(&[("format", "json"), ("q", query), ("limit", "1")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(status = %status.as_u16(), "geocode_failed");
            return Err(TransportError::Status { status: status.as_u16(), message });
        }

        let body: Value = response.json().await?;
        let result = parse_search_response(&body)?;
        match &result {
            Some(hit) => info!(query = %query, coords = %hit.coords, "geocode_resolved"),
            None => info!(query = %query, "geocode_no_results"),
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_first_hit() {
        let body = json!([
            {"lat": "32.0853", "lon": "34.7818", "display_name": "Tel Aviv-Yafo, Israel"},
            {"lat": "0", "lon": "0", "display_name": "ignored"}
        ]);

        let hit = parse_search_response(&body).unwrap().unwrap();

        assert_eq!(hit.coords, Coordinate { lat: 32.0853, lon: 34.7818 });
        assert_eq!(hit.display_name, "Tel Aviv-Yafo, Israel");
        assert_eq!(hit.location_id().as_str(), "loc_32.085300_34.781800");
    }

    #[test]
    fn test_parse_empty_is_none() {
        assert_eq!(parse_search_response(&json!([])).unwrap(), None);
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        assert!(matches!(parse_search_response(&json!({"error": "x"})), Err(TransportError::Decode(_))));
        assert!(matches!(
            parse_search_response(&json!([{"lat": "north", "lon": "1"}])),
            Err(TransportError::Decode(_))
        ));
    }

    #[test]
    fn test_missing_display_name_falls_back_to_coords() {
        let hit = parse_search_response(&json!([{"lat": 1.5, "lon": 2.5}])).unwrap().unwrap();
        assert_eq!(hit.display_name, hit.coords.to_string());
    }

    #[tokio::test]
    async fn test_disabled_client() {
        let config = crate::infra::config::Config::default();
        let mut client = NominatimClient::new(&config).unwrap();
        client.enabled = false;
        assert!(matches!(client.resolve("clinic").await, Err(TransportError::Disabled)));
    }
}
