// src/config.rs

use anyhow::{Context, Result};
use log::{info, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::matching::resolver::SearchStrategy;

/// Runtime configuration for the batch passes. Built once from the
/// environment in each binary and passed down explicitly; nothing in the
/// library reads env vars after startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Records fetched per page during paginated sweeps.
    pub page_size: i64,
    /// Search texts per submitted crawl batch.
    pub crawl_batch_size: usize,
    /// Maximum in-flight record groups per page.
    pub concurrency: usize,
    /// Crawl-job polling bounds.
    pub poll_max_attempts: u32,
    pub poll_interval: Duration,
    /// Acceptance threshold for crawl-result matching, meters.
    pub crawl_match_distance_meters: f64,
    /// Wider threshold for re-applying already-crawled results, meters.
    pub presweep_match_distance_meters: f64,
    /// A VinFast station mapping is valid only below this distance, meters.
    pub vinfast_valid_distance_meters: f64,
    /// Autocomplete strategies tried in order; others stay dormant unless
    /// explicitly enabled.
    pub enabled_strategies: Vec<SearchStrategy>,
    pub autocomplete_base_url: String,
    pub autocomplete_api_key: String,
    pub crawl_base_url: String,
    pub crawl_api_key: String,
    pub vinfast_base_url: String,
    pub vinfast_api_key: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let enabled_strategies = parse_strategies(
            &std::env::var("ENABLED_SEARCH_STRATEGIES").unwrap_or_default(),
        );
        AppConfig {
            page_size: env_i64("PAGE_SIZE", 100),
            crawl_batch_size: env_i64("CRAWL_BATCH_SIZE", 500) as usize,
            concurrency: env_i64("CONCURRENCY", 5) as usize,
            poll_max_attempts: env_i64("CRAWL_POLL_MAX_ATTEMPTS", 90) as u32,
            poll_interval: Duration::from_secs(env_i64("CRAWL_POLL_INTERVAL_SECS", 60) as u64),
            crawl_match_distance_meters: env_f64("CRAWL_MATCH_DISTANCE_METERS", 400.0),
            presweep_match_distance_meters: env_f64("PRESWEEP_MATCH_DISTANCE_METERS", 500.0),
            vinfast_valid_distance_meters: env_f64("VINFAST_VALID_DISTANCE_METERS", 400.0),
            enabled_strategies,
            autocomplete_base_url: std::env::var("AUTOCOMPLETE_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8090".to_string()),
            autocomplete_api_key: std::env::var("AUTOCOMPLETE_API_KEY").unwrap_or_default(),
            crawl_base_url: std::env::var("CRAWL_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8091".to_string()),
            crawl_api_key: std::env::var("CRAWL_API_KEY").unwrap_or_default(),
            vinfast_base_url: std::env::var("VINFAST_BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8092".to_string()),
            vinfast_api_key: std::env::var("VINFAST_API_KEY").unwrap_or_default(),
        }
    }
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(default)
}

/// Parses a comma-separated strategy list. Unknown names are logged and
/// skipped; an empty or fully-unknown list falls back to the default chain.
pub fn parse_strategies(raw: &str) -> Vec<SearchStrategy> {
    let mut strategies = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match SearchStrategy::from_str(name) {
            Some(strategy) => strategies.push(strategy),
            None => warn!("Unknown search strategy '{}', skipping", name),
        }
    }
    if strategies.is_empty() {
        strategies.push(SearchStrategy::NameAndAdmin);
    }
    strategies
}

/// Canonical category a vm category id maps onto. `code` marks the handful
/// of categories with special import behavior (ChargingStation, GasStation,
/// Parking); empty for everything else.
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryMapping {
    pub category_id: Uuid,
    #[serde(default)]
    pub code: String,
}

/// Static lookup tables mapping master-dataset attributes onto canonical
/// category, brand and branch ids. Loaded once per pass from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct MappingTables {
    pub default_category_id: Uuid,
    pub charging_station_category_id: Uuid,
    pub gas_station_category_id: Uuid,
    pub parking_category_id: Uuid,
    /// vm category id -> canonical category.
    #[serde(default)]
    pub categories: HashMap<String, CategoryMapping>,
    /// chain name -> brand id.
    #[serde(default)]
    pub brands: HashMap<String, Uuid>,
    /// branch name -> branch id.
    #[serde(default)]
    pub branches: HashMap<String, Uuid>,
}

impl MappingTables {
    pub fn load(path: &str) -> Result<Self> {
        info!("Loading mapping tables from: {}", path);
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read mapping tables file '{}'", path))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse mapping tables file '{}'", path))
    }

    pub fn load_from_env() -> Result<Self> {
        let path = std::env::var("MAPPING_TABLES_PATH")
            .unwrap_or_else(|_| "mapping_tables.json".to_string());
        Self::load(&path)
    }

    /// First mapped category among a comma-separated vm category id list.
    pub fn category_for(&self, cat_ids: &str) -> Option<&CategoryMapping> {
        cat_ids
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .find_map(|id| self.categories.get(id))
    }

    pub fn brand_for(&self, chain_name: &str) -> Option<Uuid> {
        if chain_name.trim().is_empty() {
            return None;
        }
        self.brands.get(chain_name.trim()).copied()
    }

    pub fn branch_for(&self, branch_name: &str) -> Option<Uuid> {
        if branch_name.trim().is_empty() {
            return None;
        }
        self.branches.get(branch_name.trim()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strategies_defaults_to_name_and_admin() {
        assert_eq!(parse_strategies(""), vec![SearchStrategy::NameAndAdmin]);
        assert_eq!(
            parse_strategies("NoSuchStrategy"),
            vec![SearchStrategy::NameAndAdmin]
        );
    }

    #[test]
    fn test_parse_strategies_ordered_list() {
        let chain = parse_strategies("NameAndAddress, FullName,NameAndAdmin");
        assert_eq!(
            chain,
            vec![
                SearchStrategy::NameAndAddress,
                SearchStrategy::FullName,
                SearchStrategy::NameAndAdmin,
            ]
        );
    }

    #[test]
    fn test_mapping_tables_lookups() {
        let json = r#"{
            "default_category_id": "11111111-1111-1111-1111-111111111111",
            "charging_station_category_id": "22222222-2222-2222-2222-222222222222",
            "gas_station_category_id": "33333333-3333-3333-3333-333333333333",
            "parking_category_id": "44444444-4444-4444-4444-444444444444",
            "categories": {
                "42": { "category_id": "55555555-5555-5555-5555-555555555555" },
                "10013-1": { "category_id": "77777777-7777-7777-7777-777777777777",
                             "code": "ChargingStation" }
            },
            "brands": { "Coffee X": "66666666-6666-6666-6666-666666666666" }
        }"#;
        let tables: MappingTables = serde_json::from_str(json).unwrap();

        let plain = tables.category_for("7, 42").unwrap();
        assert_eq!(
            plain.category_id,
            "55555555-5555-5555-5555-555555555555".parse::<Uuid>().unwrap()
        );
        assert!(plain.code.is_empty());
        assert_eq!(tables.category_for("10013-1").unwrap().code, "ChargingStation");
        assert!(tables.category_for("7,8").is_none());
        assert!(tables.category_for("").is_none());
        assert!(tables.brand_for("Coffee X").is_some());
        assert!(tables.brand_for("  ").is_none());
        assert!(tables.branch_for("anything").is_none());
    }
}
