// src/clients/autocomplete.rs
//
// Client for the Waze autocomplete endpoint. The wire format is positional:
// `[query, [[name, _, _, {x, y, v, o: {d}}], ...]]` where x/y are lng/lat,
// v is the place id and o.d the display address. Entries without a place id
// carry no identity and are dropped during decoding.

use anyhow::{Context, Result};
use log::debug;
use serde_json::Value;

use crate::config::AppConfig;
use crate::matching::text;
use crate::models::Candidate;

pub struct AutocompleteClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AutocompleteClient {
    pub fn new(config: &AppConfig) -> Self {
        AutocompleteClient {
            http: reqwest::Client::new(),
            base_url: config.autocomplete_base_url.clone(),
            api_key: config.autocomplete_api_key.clone(),
        }
    }

    /// Runs one autocomplete query anchored at the given origin and decodes
    /// the result into scored candidates.
    pub async fn search(&self, query: &str, lat: f64, lng: f64) -> Result<Vec<Candidate>> {
        let url = format!("{}/autocomplete/q", self.base_url);
        let sll = format!("{},{}", lat, lng);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("c", "wd"),
                ("sll", sll.as_str()),
                ("s", self.api_key.as_str()),
                ("q", query),
                ("lang", "vi"),
                ("e", "ROW"),
                ("exp", "14,15,16,18"),
            ])
            .send()
            .await
            .context("Autocomplete request failed")?
            .error_for_status()
            .context("Autocomplete returned an error status")?;

        let body: Value = response
            .json()
            .await
            .context("Failed to decode autocomplete response body")?;
        let candidates = parse_candidates(&body, query);
        debug!(
            "Autocomplete '{}' returned {} candidates",
            query,
            candidates.len()
        );
        Ok(candidates)
    }
}

/// Decodes the positional autocomplete payload. Malformed entries are
/// skipped rather than failing the whole response.
pub fn parse_candidates(body: &Value, query: &str) -> Vec<Candidate> {
    let entries = match body.as_array().and_then(|outer| outer.get(1)).and_then(Value::as_array) {
        Some(entries) => entries,
        None => return Vec::new(),
    };

    let mut candidates = Vec::new();
    for entry in entries {
        let fields = match entry.as_array() {
            Some(fields) => fields,
            None => continue,
        };
        let name = match fields.first().and_then(Value::as_str) {
            Some(name) => name,
            None => continue,
        };
        let meta = match fields.get(3) {
            Some(meta) if meta.is_object() => meta,
            _ => continue,
        };
        let place_id = match meta.get("v").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id,
            _ => continue,
        };

        let lng = meta.get("x").and_then(Value::as_f64).unwrap_or(0.0);
        let lat = meta.get("y").and_then(Value::as_f64).unwrap_or(0.0);
        let address = meta
            .get("o")
            .and_then(|o| o.get("d"))
            .and_then(Value::as_str)
            .filter(|d| !d.is_empty())
            .unwrap_or(name);

        candidates.push(Candidate {
            place_id: place_id.to_string(),
            name: name.to_string(),
            address: address.to_string(),
            lat,
            lng,
            category_name: None,
            similarity: Some(text::similarity(query, address)),
        });
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_body() -> Value {
        json!([
            "coffee x hanoi",
            [
                [
                    "Coffee X",
                    null,
                    null,
                    {
                        "x": 105.8342,
                        "y": 21.0278,
                        "v": "venues.12345",
                        "o": { "d": "12 Main St, Hanoi" }
                    }
                ],
                [
                    "No Place Id",
                    null,
                    null,
                    { "x": 105.0, "y": 21.0, "v": "" }
                ],
                [
                    "Address Fallback",
                    null,
                    null,
                    { "x": 105.83, "y": 21.02, "v": "venues.67890" }
                ]
            ]
        ])
    }

    #[test]
    fn test_parse_candidates_basic() {
        let candidates = parse_candidates(&sample_body(), "coffee x hanoi");
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].place_id, "venues.12345");
        assert_eq!(candidates[0].name, "Coffee X");
        assert_eq!(candidates[0].address, "12 Main St, Hanoi");
        assert_eq!(candidates[0].lat, 21.0278);
        assert_eq!(candidates[0].lng, 105.8342);
        assert!(candidates[0].similarity.is_some());
    }

    #[test]
    fn test_entries_without_place_id_are_dropped() {
        let candidates = parse_candidates(&sample_body(), "q");
        assert!(candidates.iter().all(|c| !c.place_id.is_empty()));
    }

    #[test]
    fn test_address_falls_back_to_name() {
        let candidates = parse_candidates(&sample_body(), "q");
        assert_eq!(candidates[1].address, "Address Fallback");
    }

    #[test]
    fn test_non_array_body_yields_nothing() {
        assert!(parse_candidates(&json!({"err": true}), "q").is_empty());
        assert!(parse_candidates(&json!(["only query"]), "q").is_empty());
    }
}
