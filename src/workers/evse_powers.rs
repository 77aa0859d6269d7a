// src/workers/evse_powers.rs
//
// EVSE propagation: every validated VinFast mapping gets its party's charger
// powers and images replaced from the freshest station data available. Pages
// of mappings are refreshed through one batched location-info call; stations
// the API does not return fall back to the stored crawl document.

use anyhow::Result;
use log::{error, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::watch;
use uuid::Uuid;

use crate::clients::vinfast::VinfastClient;
use crate::config::AppConfig;
use crate::db::PgPool;
use crate::models::{
    ImportErrorKind, ImportStatus, PartyEvsePower, PartyImage, UpdatePartyData,
    VinfastStationMapping,
};
use crate::results::{self, PassOutcome};
use crate::store::{party, raw_poi, vinfast};

pub const PASS_NAME: &str = "AddVfEvsePowers";

pub async fn run(
    pool: &PgPool,
    config: &AppConfig,
    cancel: watch::Receiver<bool>,
) -> Result<PassOutcome> {
    let total = vinfast::count_mappings(pool, true).await?;
    info!("Starting EVSE propagation over {} valid mappings", total);

    let client = VinfastClient::new(config);
    let mut statuses: Vec<ImportStatus> = Vec::new();

    let mut page = 0i64;
    loop {
        if *cancel.borrow() {
            warn!("EVSE propagation cancelled before page {}", page);
            break;
        }
        let mappings = vinfast::query_mappings(pool, true, page, config.page_size).await?;
        if mappings.is_empty() {
            break;
        }
        info!("EVSE page {} ({} mappings)", page, mappings.len());

        let fresh = refresh_stations(pool, &client, &mappings).await?;

        for mapping in &mappings {
            let status = match apply_one(pool, &fresh, mapping).await {
                Ok(status) => status,
                Err(e) => {
                    error!("EVSE update failed for {}: {:#}", mapping.vml_id, e);
                    ImportStatus::error(&mapping.vml_id, ImportErrorKind::UnhandledError)
                }
            };
            statuses.push(status);
        }
        page += 1;
    }

    let summary = results::summarize(PASS_NAME, &statuses);
    info!(
        "{} done: {} total, {} updated, {} without station data, {} errors",
        PASS_NAME,
        summary.total,
        summary.total_added_new,
        summary.total_ignored,
        summary.total_error
    );
    raw_poi::insert_import_summary(pool, &summary).await?;
    Ok(PassOutcome::from_summary(&summary))
}

/// Batched refresh of one page of stations, persisted and returned keyed by
/// location id. An API failure degrades to the stored documents.
async fn refresh_stations(
    pool: &PgPool,
    client: &VinfastClient,
    mappings: &[VinfastStationMapping],
) -> Result<HashMap<String, Value>> {
    let location_ids: Vec<String> = mappings
        .iter()
        .map(|m| m.location_id.clone())
        .filter(|id| !id.is_empty())
        .collect();
    if location_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let docs = match client.location_info(&location_ids).await {
        Ok(docs) => docs,
        Err(e) => {
            warn!("Station refresh failed, using stored documents: {:#}", e);
            Vec::new()
        }
    };

    let mut fresh = HashMap::new();
    for doc in docs {
        if let Some(location_id) = doc.get("locationId").and_then(Value::as_str) {
            vinfast::upsert_station_raw(pool, location_id, &doc).await?;
            fresh.insert(location_id.to_string(), doc);
        }
    }
    Ok(fresh)
}

async fn apply_one(
    pool: &PgPool,
    fresh: &HashMap<String, Value>,
    mapping: &VinfastStationMapping,
) -> Result<ImportStatus> {
    let doc = match fresh.get(&mapping.location_id) {
        Some(doc) => Some(doc.clone()),
        None => vinfast::get_station_raw(pool, &mapping.location_id).await?,
    };
    let doc = match doc {
        Some(doc) => doc,
        None => {
            return Ok(ImportStatus::ignored(
                &mapping.vml_id,
                "no station document",
            ))
        }
    };

    let update = UpdatePartyData {
        party_id: mapping.vml_id.clone(),
        evse_powers: Some(evse_powers_from_doc(&mapping.vml_id, &doc)),
        images: Some(images_from_doc(&mapping.vml_id, &doc)),
        rating: None,
    };
    party::update_party_partial(pool, &update).await?;
    Ok(ImportStatus::success(&mapping.vml_id))
}

/// Charger power rows from a station document's `evsePowers` list.
fn evse_powers_from_doc(party_id: &str, doc: &Value) -> Vec<PartyEvsePower> {
    let powers = match doc.get("evsePowers").and_then(Value::as_array) {
        Some(powers) => powers,
        None => return Vec::new(),
    };
    powers
        .iter()
        .map(|p| PartyEvsePower {
            id: Uuid::new_v4(),
            party_id: party_id.to_string(),
            power_type: p.get("type").and_then(Value::as_i64).unwrap_or(0) as i32,
            total_evse: p.get("totalEvse").and_then(Value::as_i64).unwrap_or(0) as i32,
        })
        .collect()
}

/// Numbered image rows from a station document's `images` list.
fn images_from_doc(party_id: &str, doc: &Value) -> Vec<PartyImage> {
    let images = match doc.get("images").and_then(Value::as_array) {
        Some(images) => images,
        None => return Vec::new(),
    };
    images
        .iter()
        .filter_map(|img| img.get("url").and_then(Value::as_str))
        .enumerate()
        .map(|(i, url)| PartyImage {
            party_id: party_id.to_string(),
            name: i.to_string(),
            image_url: url.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_evse_powers_from_doc() {
        let doc = json!({
            "locationId": "vf-001",
            "evsePowers": [
                {"type": 60000, "totalEvse": 6, "numberOfAvailableEvse": 4},
                {"type": 150000, "totalEvse": 2, "numberOfAvailableEvse": 2}
            ]
        });
        let powers = evse_powers_from_doc("vml.p1", &doc);
        assert_eq!(powers.len(), 2);
        assert_eq!(powers[0].power_type, 60_000);
        assert_eq!(powers[0].total_evse, 6);
        assert_eq!(powers[1].power_type, 150_000);
        assert!(powers.iter().all(|p| p.party_id == "vml.p1"));

        assert!(evse_powers_from_doc("vml.p1", &json!({})).is_empty());
    }

    #[test]
    fn test_images_from_doc_numbered_in_order() {
        let doc = json!({
            "images": [
                {"url": "https://img/0.jpg", "thumbnail": "https://img/0_t.jpg"},
                {"thumbnail": "https://img/skip_t.jpg"},
                {"url": "https://img/1.jpg"}
            ]
        });
        let images = images_from_doc("vml.p1", &doc);
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].name, "0");
        assert_eq!(images[0].image_url, "https://img/0.jpg");
        assert_eq!(images[1].name, "1");
        assert_eq!(images[1].image_url, "https://img/1.jpg");
    }
}
