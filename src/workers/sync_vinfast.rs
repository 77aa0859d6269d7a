// src/workers/sync_vinfast.rs
//
// VinFast station matching: for every mapping that has not been validated
// yet, crawl the nearest stations around the master POI's coordinates,
// persist the returned documents, and take the first station as the match.
// The mapping becomes valid only when it sits inside the distance threshold.

use anyhow::Result;
use log::{error, info, warn};
use serde_json::Value;
use tokio::sync::watch;

use crate::clients::vinfast::VinfastClient;
use crate::config::AppConfig;
use crate::db::PgPool;
use crate::matching::geo;
use crate::models::{ImportErrorKind, ImportStatus, VinfastStationMapping};
use crate::results::{self, PassOutcome};
use crate::store::{raw_poi, vinfast};

pub const PASS_NAME: &str = "SyncVinfastStations";

pub async fn run(
    pool: &PgPool,
    config: &AppConfig,
    cancel: watch::Receiver<bool>,
) -> Result<PassOutcome> {
    let total = vinfast::count_mappings(pool, false).await?;
    info!("Starting vinfast station sync over {} unmatched mappings", total);

    let client = VinfastClient::new(config);
    let mut statuses: Vec<ImportStatus> = Vec::new();

    // Snapshot before processing: validated mappings leave this set, which
    // would shift page offsets mid-sweep otherwise.
    let mut pending: Vec<VinfastStationMapping> = Vec::new();
    let mut page = 0i64;
    loop {
        let mappings = vinfast::query_mappings(pool, false, page, config.page_size).await?;
        if mappings.is_empty() {
            break;
        }
        pending.extend(mappings);
        page += 1;
    }

    for mut mapping in pending {
        if *cancel.borrow() {
            warn!("Vinfast sync cancelled");
            break;
        }
        let id = mapping.vml_id.clone();
        let status = match sync_one(pool, &client, config, &mut mapping).await {
            Ok(status) => status,
            Err(e) => {
                error!("Vinfast sync failed for {}: {:#}", id, e);
                ImportStatus::error(&id, ImportErrorKind::UnhandledError)
            }
        };
        statuses.push(status);
    }

    let summary = results::summarize(PASS_NAME, &statuses);
    info!(
        "{} done: {} total, {} matched, {} beyond threshold, {} without results, {} errors",
        PASS_NAME,
        summary.total,
        summary.total_added_new,
        summary.total_updated,
        summary.total_ignored,
        summary.total_error
    );
    raw_poi::insert_import_summary(pool, &summary).await?;
    Ok(PassOutcome::from_summary(&summary))
}

async fn sync_one(
    pool: &PgPool,
    client: &VinfastClient,
    config: &AppConfig,
    mapping: &mut VinfastStationMapping,
) -> Result<ImportStatus> {
    let stations = client.search_stations(mapping.vm_lat, mapping.vm_lng).await?;
    for doc in &stations {
        if let Some(location_id) = doc.get("locationId").and_then(Value::as_str) {
            vinfast::upsert_station_raw(pool, location_id, doc).await?;
        }
    }

    let nearest = stations.first().and_then(|doc| station_fields(doc));
    match nearest {
        Some(station) => {
            let distance = geo::distance_meters(
                station.latitude,
                station.longitude,
                mapping.vm_lat,
                mapping.vm_lng,
            );
            mapping.location_id = station.location_id;
            mapping.station_name = station.name;
            mapping.station_address = station.address;
            mapping.latitude = station.latitude;
            mapping.longitude = station.longitude;
            mapping.vm_distance = distance;
            mapping.vm_is_valid = distance < config.vinfast_valid_distance_meters;
            vinfast::upsert_station_mapping(pool, mapping).await?;

            if mapping.vm_is_valid {
                info!(
                    "Matched {} to station {} at {:.0}m",
                    mapping.vml_id, mapping.location_id, distance
                );
                Ok(ImportStatus::success(&mapping.vml_id))
            } else {
                Ok(ImportStatus::updated(
                    &mapping.vml_id,
                    &format!("nearest station {:.0}m away", distance),
                ))
            }
        }
        None => {
            // Nothing nearby: clear any stale station fields so the row does
            // not pretend to be matched.
            mapping.location_id = String::new();
            mapping.station_name = String::new();
            mapping.station_address = String::new();
            mapping.latitude = 0.0;
            mapping.longitude = 0.0;
            mapping.vm_distance = 0.0;
            mapping.vm_is_valid = false;
            vinfast::upsert_station_mapping(pool, mapping).await?;
            Ok(ImportStatus::ignored(&mapping.vml_id, "no stations returned"))
        }
    }
}

struct StationFields {
    location_id: String,
    name: String,
    address: String,
    latitude: f64,
    longitude: f64,
}

fn station_fields(doc: &Value) -> Option<StationFields> {
    let location_id = doc.get("locationId").and_then(Value::as_str)?;
    if location_id.is_empty() {
        return None;
    }
    Some(StationFields {
        location_id: location_id.to_string(),
        name: doc
            .get("stationName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        address: doc
            .get("stationAddress")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        latitude: doc.get("latitude").and_then(Value::as_f64).unwrap_or(0.0),
        longitude: doc.get("longitude").and_then(Value::as_f64).unwrap_or(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_station_fields_requires_location_id() {
        let doc = json!({
            "locationId": "vf-001",
            "stationName": "VinFast Landmark 81",
            "stationAddress": "720A Dien Bien Phu",
            "latitude": 10.795,
            "longitude": 106.722
        });
        let station = station_fields(&doc).unwrap();
        assert_eq!(station.location_id, "vf-001");
        assert_eq!(station.name, "VinFast Landmark 81");
        assert_eq!(station.latitude, 10.795);

        assert!(station_fields(&json!({"stationName": "x"})).is_none());
        assert!(station_fields(&json!({"locationId": ""})).is_none());
    }

    #[test]
    fn test_station_fields_tolerates_missing_optionals() {
        let station = station_fields(&json!({"locationId": "vf-002"})).unwrap();
        assert!(station.name.is_empty());
        assert_eq!(station.latitude, 0.0);
    }
}
