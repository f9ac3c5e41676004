//! Nominatim-style forward and reverse geocoding.
//!
//! Both lookups are recovered locally: a failed search reads as "not found"
//! and a failed reverse lookup falls back to the raw coordinate.

use crate::location::Coordinate;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_SEARCH_URL: &str = "https://nominatim.openstreetmap.org/search";
pub const DEFAULT_REVERSE_URL: &str = "https://nominatim.openstreetmap.org/reverse";
pub const DEFAULT_USER_AGENT: &str = "crowd-flow/0.4";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const UNKNOWN_CITY: &str = "Unknown City";

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("geocoding request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("geocoding rate limited")]
    RateLimited,
    #[error("failed to parse geocoding response: {message}")]
    Parse { message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Place {
    pub coordinate: Coordinate,
    pub display_name: String,
}

impl Place {
    /// Leading component of the display name, e.g. "Trafalgar Square".
    pub fn short_name(&self) -> &str {
        self.display_name
            .split(',')
            .next()
            .map(str::trim)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct Geocoder {
    client: reqwest::Client,
    search_url: String,
    reverse_url: String,
}

impl Geocoder {
    pub fn new(
        search_url: impl Into<String>,
        reverse_url: impl Into<String>,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            search_url: search_url.into(),
            reverse_url: reverse_url.into(),
        })
    }

    /// Free-text search; `None` when nothing matched or the lookup failed.
    pub async fn search(&self, query: &str) -> Option<Place> {
        match self.try_search(query).await {
            Ok(place) => place,
            Err(err) => {
                warn!(query, error = %err, "Location search failed");
                None
            }
        }
    }

    /// City, town or village name for a coordinate, or the coordinate
    /// itself when the lookup fails.
    pub async fn reverse(&self, coordinate: Coordinate) -> String {
        match self.try_reverse(coordinate).await {
            Ok(name) => name,
            Err(err) => {
                warn!(
                    lat = coordinate.lat,
                    lng = coordinate.lng,
                    error = %err,
                    "Reverse geocoding failed"
                );
                coordinate.display()
            }
        }
    }

    async fn try_search(&self, query: &str) -> Result<Option<Place>, GeocodeError> {
        let resp = self
            .client
            .get(&self.search_url)
            .query(&[("format", "json"), ("q", query)])
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GeocodeError::RateLimited);
        }

        let body: serde_json::Value = resp.error_for_status()?.json().await?;
        parse_search_response(&body)
    }

    async fn try_reverse(&self, coordinate: Coordinate) -> Result<String, GeocodeError> {
        let lat = coordinate.lat.to_string();
        let lon = coordinate.lng.to_string();
        let resp = self
            .client
            .get(&self.reverse_url)
            .query(&[("format", "json"), ("lat", lat.as_str()), ("lon", lon.as_str())])
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(GeocodeError::RateLimited);
        }

        let body: serde_json::Value = resp.error_for_status()?.json().await?;
        parse_reverse_response(&body)
    }
}

fn parse_search_response(body: &serde_json::Value) -> Result<Option<Place>, GeocodeError> {
    let results = body.as_array().ok_or_else(|| GeocodeError::Parse {
        message: "search response is not an array".to_string(),
    })?;

    let Some(first) = results.first() else {
        return Ok(None);
    };

    let lat = first["lat"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| GeocodeError::Parse {
            message: "missing lat in search result".to_string(),
        })?;
    let lng = first["lon"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| GeocodeError::Parse {
            message: "missing lon in search result".to_string(),
        })?;
    let coordinate = Coordinate::new(lat, lng).map_err(|err| GeocodeError::Parse {
        message: err.to_string(),
    })?;

    let display_name = first["display_name"]
        .as_str()
        .map(String::from)
        .unwrap_or_else(|| coordinate.display());

    Ok(Some(Place {
        coordinate,
        display_name,
    }))
}

fn parse_reverse_response(body: &serde_json::Value) -> Result<String, GeocodeError> {
    let address = body
        .get("address")
        .filter(|address| address.is_object())
        .ok_or_else(|| GeocodeError::Parse {
            message: "reverse response has no address".to_string(),
        })?;

    let name = ["city", "town", "village"]
        .iter()
        .find_map(|key| address[*key].as_str())
        .unwrap_or(UNKNOWN_CITY);

    Ok(name.to_string())
}
