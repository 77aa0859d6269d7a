// src/clients/vinfast.rs
//
// Client for the VinFast charging-station API. Both endpoints are flaky in
// practice, so every call runs under a small bounded retry budget.

use anyhow::Result;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AppConfig;

/// Success code used by the location-info endpoint.
const LOCATION_INFO_OK: i64 = 200_000;

const MAX_RETRIES: u32 = 3;

#[derive(Debug, Serialize)]
struct LocationInfoRequest<'a> {
    #[serde(rename = "locationIds")]
    location_ids: &'a [String],
}

#[derive(Debug, Deserialize)]
struct LocationInfoResponse {
    code: i64,
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Debug, Serialize)]
struct SearchStationsRequest {
    latitude: f64,
    longitude: f64,
    #[serde(rename = "excludeFavorite")]
    exclude_favorite: bool,
}

#[derive(Debug, Deserialize)]
struct SearchStationsResponse {
    #[serde(default)]
    data: Vec<Value>,
}

pub struct VinfastClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl VinfastClient {
    pub fn new(config: &AppConfig) -> Self {
        VinfastClient {
            http: reqwest::Client::new(),
            base_url: config.vinfast_base_url.clone(),
            api_key: config.vinfast_api_key.clone(),
        }
    }

    /// Fetches fresh station documents for a batch of location ids.
    pub async fn location_info(&self, location_ids: &[String]) -> Result<Vec<Value>> {
        let url = format!("{}/api/vf/location-info", self.base_url);
        let request = LocationInfoRequest { location_ids };

        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    match response.json::<LocationInfoResponse>().await {
                        Ok(body) if body.code == LOCATION_INFO_OK => return Ok(body.data),
                        Ok(body) => {
                            warn!("location-info returned code {}, retrying", body.code)
                        }
                        Err(e) => warn!("Failed to decode location-info response: {}", e),
                    }
                }
                Ok(response) => warn!("location-info returned status {}", response.status()),
                Err(e) => warn!("location-info request failed: {}", e),
            }

            if attempts >= MAX_RETRIES {
                anyhow::bail!(
                    "location-info failed after {} attempts for {} stations",
                    MAX_RETRIES,
                    location_ids.len()
                );
            }
        }
    }

    /// Stations near a coordinate, nearest first. Used to locate the station
    /// serving an internal charging-station POI.
    pub async fn search_stations(&self, latitude: f64, longitude: f64) -> Result<Vec<Value>> {
        let url = format!("{}/api/vf/search-stations", self.base_url);
        let request = SearchStationsRequest {
            latitude,
            longitude,
            exclude_favorite: true,
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&request)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    match response.json::<SearchStationsResponse>().await {
                        Ok(body) => return Ok(body.data),
                        Err(e) => warn!("Failed to decode search-stations response: {}", e),
                    }
                }
                Ok(response) => warn!("search-stations returned status {}", response.status()),
                Err(e) => warn!("search-stations request failed: {}", e),
            }

            if attempts >= MAX_RETRIES {
                anyhow::bail!(
                    "search-stations failed after {} attempts at ({}, {})",
                    MAX_RETRIES,
                    latitude,
                    longitude
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_info_request_shape() {
        let ids = vec!["loc-1".to_string(), "loc-2".to_string()];
        let request = LocationInfoRequest { location_ids: &ids };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["locationIds"][1], "loc-2");
    }

    #[test]
    fn test_search_stations_request_shape() {
        let request = SearchStationsRequest {
            latitude: 10.8,
            longitude: 106.7,
            exclude_favorite: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["excludeFavorite"], true);
        assert_eq!(json["latitude"], 10.8);
    }

    #[test]
    fn test_location_info_response_decoding() {
        let body = r#"{"code": 200000, "data": [{"locationId": "loc-1"}]}"#;
        let resp: LocationInfoResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.code, LOCATION_INFO_OK);
        assert_eq!(resp.data.len(), 1);
    }
}
