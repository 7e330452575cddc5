//! Reverse geocoding used to enrich reach metadata with a city and state.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::{ForecastError, Result};

/// A place name resolved from coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Place {
    pub city: String,
    pub state: String,
}

/// Resolves coordinates to a place.
///
/// Callers treat every error as "no enrichment available".
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<Option<Place>>;
}

/// Geocoder that never resolves anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGeocoder;

#[async_trait]
impl ReverseGeocoder for NoGeocoder {
    async fn reverse(&self, _latitude: f64, _longitude: f64) -> Result<Option<Place>> {
        Ok(None)
    }
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    address: Option<Address>,
}

#[derive(Debug, Deserialize)]
struct Address {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    hamlet: Option<String>,
    county: Option<String>,
    state: Option<String>,
}

/// Nominatim-compatible reverse geocoder.
#[derive(Debug, Clone)]
pub struct HttpGeocoder {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpGeocoder {
    pub fn new(client: Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl ReverseGeocoder for HttpGeocoder {
    async fn reverse(&self, latitude: f64, longitude: f64) -> Result<Option<Place>> {
        let url = format!(
            "{}/reverse?format=jsonv2&lat={}&lon={}",
            self.base_url, latitude, longitude
        );
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ForecastError::from_reqwest(e, &url))?;

        if !response.status().is_success() {
            return Err(ForecastError::Http {
                status: response.status().as_u16(),
            });
        }

        let body = response
            .json::<ReverseResponse>()
            .await
            .map_err(|e| ForecastError::from_reqwest(e, &url))?;

        let Some(address) = body.address else {
            return Ok(None);
        };
        let city = address
            .city
            .or(address.town)
            .or(address.village)
            .or(address.hamlet)
            .or(address.county);
        Ok(match (city, address.state) {
            (Some(city), Some(state)) => Some(Place { city, state }),
            _ => None,
        })
    }
}
