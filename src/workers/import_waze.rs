// src/workers/import_waze.rs
//
// Click-stream reconciliation: every Waze venue users navigate to ends up
// aliased onto an existing party when one can be found through any known id,
// and otherwise becomes a new Waze-only party. Waze-only parties are cheap to
// rebuild, so a re-run deletes and recreates them with the latest click data.

use anyhow::Result;
use log::{error, info, warn};
use serde_json::Value;
use tokio::sync::watch;

use crate::clients::crawl::CrawlClient;
use crate::config::AppConfig;
use crate::db::PgPool;
use crate::merge;
use crate::models::{
    fresh_party_id, unix_now, ImportErrorKind, ImportStatus, MappingGoogle, MappingWaze, Party,
    PartyMapping, PartySource, Poi, UpdatePartyData, WazeClick, WazeMappingTracking,
    GOOGLE_PLACES_PREFIX, VENUES_PREFIX,
};
use crate::results::{self, PassOutcome};
use crate::store::{clicks, google_raw, party, raw_poi};

pub const PASS_NAME: &str = "WazePoi";

pub async fn run(
    pool: &PgPool,
    config: &AppConfig,
    cancel: watch::Receiver<bool>,
) -> Result<PassOutcome> {
    let total = clicks::count(pool).await?;
    info!("Starting waze click import over {} records", total);

    let crawl = CrawlClient::new(config);
    let mut statuses: Vec<ImportStatus> = Vec::new();

    let mut page = 0i64;
    loop {
        if *cancel.borrow() {
            warn!("Waze import cancelled before page {}", page);
            break;
        }
        let records = clicks::fetch_page(pool, page, config.page_size).await?;
        if records.is_empty() {
            break;
        }
        info!("Waze clicks page {} ({} records)", page, records.len());

        for click in records {
            let status = match import_one(pool, &crawl, &click).await {
                Ok(status) => status,
                Err(e) => {
                    error!(
                        "Waze import failed for {} ({}): {:#}",
                        click.waze_venue_id, click.name, e
                    );
                    ImportStatus::error(&click.id, ImportErrorKind::UnhandledError)
                }
            };
            clicks::set_import_status(pool, &status).await?;
            statuses.push(status);
        }
        page += 1;
    }

    let summary = results::summarize(PASS_NAME, &statuses);
    info!(
        "{} done: {} total, {} new parties, {} aliased, {} ignored, {} errors",
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

async fn import_one(pool: &PgPool, crawl: &CrawlClient, click: &WazeClick) -> Result<ImportStatus> {
    let mut click = click.clone();
    let mut tracking = google_raw::get_waze_tracking(pool, &click.waze_venue_id).await?;

    // A venue already aliased onto a master party stays as it is. A Waze-only
    // party gets torn down so it can be rebuilt from the current click data.
    if let Some(mapping) = party::get_mapping_waze(pool, &click.waze_venue_id).await? {
        if let Some(tracking) = &tracking {
            let from_master = !tracking.vml_id.is_empty()
                && party::get_mapping_vm_by_party_id(pool, &tracking.vml_id)
                    .await?
                    .is_some();
            if !from_master {
                party::delete_party(pool, &tracking.vml_id).await?;
            } else {
                return Ok(ImportStatus::updated(&click.id, "already on master party"));
            }
        } else {
            return Ok(ImportStatus::updated(
                &click.id,
                &format!("already mapped to {}", mapping.party_id),
            ));
        }
    }

    // Resolve venues.* ids to their google place id once and persist the
    // alternate id on the raw record.
    if click.waze_venue_id.starts_with(VENUES_PREFIX) && click.alter_venue_id.is_empty() {
        let venue_id = &click.waze_venue_id[VENUES_PREFIX.len()..];
        if let Some(info) = crawl.get_venue(venue_id).await? {
            if !info.google_place_id.is_empty() {
                click.alter_venue_id = format!("{}{}", GOOGLE_PLACES_PREFIX, info.google_place_id);
                clicks::update_alter_venue_id(pool, &click.waze_venue_id, &click.alter_venue_id)
                    .await?;
            }
        }
    }

    // Alias chain: direct id (or the alternate for venues.*), the tracked
    // google id, then the tracked party itself.
    let mut existing_party = if click.waze_venue_id.starts_with(VENUES_PREFIX) {
        if click.alter_venue_id.is_empty() {
            None
        } else {
            party::find_party_id_by_source_id(pool, &click.alter_venue_id).await?
        }
    } else {
        party::find_party_id_by_source_id(pool, &click.waze_venue_id).await?
    };
    if existing_party.is_none() {
        if let Some(t) = &tracking {
            if !t.gg_place_id.trim().is_empty() {
                existing_party = party::find_party_id_by_source_id(pool, &t.gg_place_id).await?;
            }
            if existing_party.is_none()
                && !t.vml_id.is_empty()
                && party::party_has_mappings(pool, &t.vml_id).await?
            {
                existing_party = Some(t.vml_id.clone());
            }
        }
    }

    if let Some(party_id) = existing_party {
        alias_onto_party(pool, &party_id, &click).await?;
        if let Some(mut t) = tracking {
            t.vml_id = party_id.clone();
            google_raw::upsert_waze_tracking(pool, &t).await?;
        }
        return Ok(ImportStatus::updated(
            &click.id,
            &format!("aliased onto {}", party_id),
        ));
    }

    // No party anywhere: mint one. The tracking row keeps the party id and
    // stays flagged for google rematching.
    let mut tracking = tracking.unwrap_or_else(|| new_tracking(&click));
    if tracking.vml_id.is_empty() {
        tracking.vml_id = fresh_party_id();
    }
    let party_id = tracking.vml_id.clone();
    party::delete_party(pool, &party_id).await?;
    tracking.is_rerun_gg_search = true;
    google_raw::upsert_waze_tracking(pool, &tracking).await?;

    let mut new_party = Party::new(&party_id);
    let mut new_poi = Poi {
        id: party_id.clone(),
        name: click.name.clone(),
        address: click.address.clone(),
        label: String::new(),
        lat: click.lat,
        lng: click.lng,
        parent_id: String::new(),
        google_place_id: String::new(),
        is_delete: false,
    };

    new_party.mappings.push(PartyMapping {
        party_id: party_id.clone(),
        source: PartySource::Waze,
        source_id: click.waze_venue_id.clone(),
    });
    if !click.alter_venue_id.is_empty() {
        new_party.mappings.push(PartyMapping {
            party_id: party_id.clone(),
            source: PartySource::Waze,
            source_id: click.alter_venue_id.clone(),
        });
    }

    // A previously crawled google document upgrades the new party with the
    // google identity, images and rating.
    let crawled = crawled_doc_for(pool, &tracking).await?;
    if let Some(doc) = &crawled {
        new_poi.google_place_id = tracking.gg_place_id.clone();
        if let Some(place_id) = doc.get("placeId").and_then(Value::as_str) {
            new_party.mappings.push(PartyMapping {
                party_id: party_id.clone(),
                source: PartySource::Google,
                source_id: format!("{}{}", GOOGLE_PLACES_PREFIX, place_id),
            });
        }
    }

    party::create_party(pool, &new_party, &new_poi).await?;
    persist_waze_aliases(pool, &party_id, &click).await?;

    if let Some(doc) = &crawled {
        if let Some(place_id) = doc.get("placeId").and_then(Value::as_str) {
            party::upsert_mapping_google(
                pool,
                &MappingGoogle {
                    google_place_id: format!("{}{}", GOOGLE_PLACES_PREFIX, place_id),
                    party_id: party_id.clone(),
                    name: doc
                        .get("title")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    address: doc
                        .get("address")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    lat: doc
                        .pointer("/location/lat")
                        .and_then(Value::as_f64)
                        .unwrap_or_default(),
                    lng: doc
                        .pointer("/location/lng")
                        .and_then(Value::as_f64)
                        .unwrap_or_default(),
                },
            )
            .await?;
        }
        let images = merge::party_images_from_doc(&party_id, doc);
        let rating = merge::party_rating_from_doc(doc);
        if !images.is_empty() || rating.is_some() {
            party::update_party_partial(
                pool,
                &UpdatePartyData {
                    party_id: party_id.clone(),
                    images: Some(images),
                    rating,
                    evse_powers: None,
                },
            )
            .await?;
        }
    }

    info!("Created waze party {} for {}", party_id, click.waze_venue_id);
    Ok(ImportStatus::success(&click.id))
}

/// Registers the click's ids as additional aliases of an existing party.
async fn alias_onto_party(pool: &PgPool, party_id: &str, click: &WazeClick) -> Result<()> {
    party::add_party_mapping(
        pool,
        &PartyMapping {
            party_id: party_id.to_string(),
            source: PartySource::Waze,
            source_id: click.waze_venue_id.clone(),
        },
    )
    .await?;
    if !click.alter_venue_id.is_empty() {
        party::add_party_mapping(
            pool,
            &PartyMapping {
                party_id: party_id.to_string(),
                source: PartySource::Waze,
                source_id: click.alter_venue_id.clone(),
            },
        )
        .await?;
    }
    persist_waze_aliases(pool, party_id, click).await
}

async fn persist_waze_aliases(pool: &PgPool, party_id: &str, click: &WazeClick) -> Result<()> {
    let mut ids = vec![click.waze_venue_id.clone()];
    if !click.alter_venue_id.is_empty() {
        ids.push(click.alter_venue_id.clone());
    }
    for waze_id in ids {
        party::upsert_mapping_waze(
            pool,
            &MappingWaze {
                waze_id,
                party_id: party_id.to_string(),
                name: click.name.clone(),
                address: click.address.clone(),
                lat: click.lat,
                lng: click.lng,
            },
        )
        .await?;
    }
    Ok(())
}

/// The stored crawl document behind a validated tracking row, if any.
async fn crawled_doc_for(
    pool: &PgPool,
    tracking: &WazeMappingTracking,
) -> Result<Option<Value>> {
    if !tracking.gg_is_valid || tracking.gg_place_id.is_empty() {
        return Ok(None);
    }
    let place_id = tracking
        .gg_place_id
        .strip_prefix(GOOGLE_PLACES_PREFIX)
        .unwrap_or(&tracking.gg_place_id);
    google_raw::get_place(pool, place_id).await
}

fn new_tracking(click: &WazeClick) -> WazeMappingTracking {
    let now = unix_now();
    WazeMappingTracking {
        waze_id: click.waze_venue_id.clone(),
        waze_alter_id: click.alter_venue_id.clone(),
        waze_name: click.name.clone(),
        waze_address: click.address.clone(),
        waze_latitude: click.lat,
        waze_longitude: click.lng,
        created_date: now,
        last_modified: now,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tracking_snapshots_click() {
        let click = WazeClick {
            id: "c1".to_string(),
            waze_venue_id: "venues.42".to_string(),
            alter_venue_id: "googlePlaces.ChIJabc".to_string(),
            name: "Coffee X".to_string(),
            address: "12 Main St".to_string(),
            lat: 10.0,
            lng: 106.0,
            total_clicks: 250,
        };
        let tracking = new_tracking(&click);
        assert_eq!(tracking.waze_id, "venues.42");
        assert_eq!(tracking.waze_alter_id, "googlePlaces.ChIJabc");
        assert_eq!(tracking.waze_latitude, 10.0);
        assert!(tracking.vml_id.is_empty());
        assert!(!tracking.gg_is_valid);
        assert!(tracking.created_date > 0);
    }
}
