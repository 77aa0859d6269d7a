// src/workers/add_mapping.rs
//
// Autocomplete mapping pass: finds a Google-side identity for every raw POI
// that does not have a validated one yet. Strategies run in configured order
// and the first match inside its strategy threshold wins. Misses still record
// the nearest candidate so a later crawl pass can re-evaluate it.

use anyhow::{Context, Result};
use futures::future::join_all;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex, Semaphore};

use crate::clients::autocomplete::AutocompleteClient;
use crate::clients::crawl::CrawlClient;
use crate::config::AppConfig;
use crate::db::PgPool;
use crate::matching::geo;
use crate::matching::resolver::{resolve_best_match, ResolvedMatch, SearchStrategy};
use crate::models::{
    party_id_for_vm, ImportErrorKind, ImportStatus, PlaceMappingTracking, RawPoi, VenueMapping,
    GOOGLE_PLACES_PREFIX, VENUES_PREFIX,
};
use crate::results::{self, PassOutcome, PassStats};
use crate::store::raw_poi::PoiScope;
use crate::store::{google_raw, raw_poi, vinfast};

pub const PASS_NAME: &str = "AddMappingPlaces";

pub async fn run(
    pool: &PgPool,
    config: &AppConfig,
    cancel: watch::Receiver<bool>,
) -> Result<PassOutcome> {
    let total = raw_poi::count(pool, PoiScope::All).await?;
    info!("Starting mapping pass over {} raw records", total);

    let autocomplete = Arc::new(AutocompleteClient::new(config));
    let crawl = Arc::new(CrawlClient::new(config));
    let strategies = Arc::new(config.enabled_strategies.clone());
    let semaphore = Arc::new(Semaphore::new(config.concurrency));
    let statuses: Arc<Mutex<Vec<ImportStatus>>> = Arc::new(Mutex::new(Vec::new()));
    let mut stats = PassStats::default();

    let mut page = 0i64;
    loop {
        if *cancel.borrow() {
            warn!("Mapping pass cancelled before page {}", page);
            break;
        }
        let started = Instant::now();
        let pois = raw_poi::fetch_page(pool, PoiScope::All, page, config.page_size).await?;
        if pois.is_empty() {
            break;
        }
        let fetched = pois.len();

        let mut raw_ids = Vec::with_capacity(pois.len());
        let mut handles = Vec::with_capacity(pois.len());
        for poi in pois {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("Mapping semaphore closed")?;
            let pool = pool.clone();
            let autocomplete = autocomplete.clone();
            let crawl = crawl.clone();
            let strategies = strategies.clone();
            raw_ids.push(poi.id.clone());
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                process_poi(&pool, &autocomplete, &crawl, &strategies, poi).await
            }));
        }

        for (raw_id, result) in raw_ids.iter().zip(join_all(handles).await) {
            let status = match result {
                Ok(status) => status,
                Err(e) => {
                    error!("Mapping task for {} panicked: {}", raw_id, e);
                    ImportStatus::error(raw_id, ImportErrorKind::UnhandledError)
                }
            };
            raw_poi::set_import_status(pool, &status).await?;
            statuses.lock().await.push(status);
        }

        stats.record_page(fetched, started.elapsed());
        info!("Mapped page {} ({} records)", page, fetched);
        page += 1;
    }

    let statuses = statuses.lock().await;
    let summary = results::summarize(PASS_NAME, &statuses);
    info!(
        "{} done: {} total, {} matched, {} propagated, {} unmatched, {} errors in {:.1?}",
        PASS_NAME,
        summary.total,
        summary.total_added_new,
        summary.total_updated,
        summary.total_ignored,
        summary.total_error,
        stats.elapsed
    );
    raw_poi::insert_import_summary(pool, &summary).await?;
    Ok(PassOutcome::from_summary(&summary))
}

async fn process_poi(
    pool: &PgPool,
    autocomplete: &AutocompleteClient,
    crawl: &CrawlClient,
    strategies: &[SearchStrategy],
    poi: RawPoi,
) -> ImportStatus {
    match map_one(pool, autocomplete, crawl, strategies, &poi).await {
        Ok(status) => status,
        Err(e) => {
            error!("Mapping failed for vm {} ({}): {:#}", poi.vm_id, poi.name, e);
            ImportStatus::error(&poi.id, ImportErrorKind::UnhandledError)
        }
    }
}

async fn map_one(
    pool: &PgPool,
    autocomplete: &AutocompleteClient,
    crawl: &CrawlClient,
    strategies: &[SearchStrategy],
    poi: &RawPoi,
) -> Result<ImportStatus> {
    let existing = google_raw::get_place_tracking(pool, poi.vm_id).await?;

    if let Some(tracking) = &existing {
        if tracking.gg_is_valid && !tracking.gg_place_id.trim().is_empty() {
            // Already matched: just make sure the raw record carries the id.
            let place_id = effective_place_id(tracking);
            raw_poi::set_gg_place_id(pool, &poi.id, &place_id).await?;
            return Ok(ImportStatus::updated(&poi.id, "existing match propagated"));
        }
        if tracking.is_ignore_mapping && !tracking.is_rerun_gg_search {
            return Ok(ImportStatus::ignored(&poi.id, "mapping ignored"));
        }
    }

    let mut tracking = existing.unwrap_or_else(|| PlaceMappingTracking::from_raw_poi(poi));

    // Station name is only needed by one strategy; fetch it lazily.
    let vf_station_name = if strategies.contains(&SearchStrategy::NameAndStationName) {
        vinfast::get_station_mapping(pool, &party_id_for_vm(poi.vm_id))
            .await?
            .map(|m| m.station_name)
    } else {
        None
    };

    let mut nearest_miss: Option<(ResolvedMatch, String)> = None;
    let mut last_query = String::new();

    for strategy in strategies {
        let query = match strategy.query_text(poi, vf_station_name.as_deref()) {
            Some(query) => query,
            None => continue,
        };
        last_query = query.clone();

        let candidates = autocomplete.search(&query, poi.lat, poi.lng).await?;
        if candidates.is_empty() {
            continue;
        }

        if let Some(resolved) =
            resolve_best_match(poi.lat, poi.lng, &candidates, strategy.max_distance_meters())
        {
            tracking.apply_match(&resolved.candidate, resolved.distance_meters, true);
            tracking.search_method = strategy.as_str().to_string();
            tracking.search_text = query;
            tracking.is_rerun_gg_search = false;
            tracking.is_ignore_mapping = false;

            if tracking.gg_place_id.starts_with(VENUES_PREFIX) {
                tracking.venue_mapping =
                    resolve_venue(crawl, &tracking.gg_place_id, poi.lat, poi.lng).await?;
            }
            google_raw::upsert_place_tracking(pool, &tracking).await?;
            raw_poi::set_gg_place_id(pool, &poi.id, &effective_place_id(&tracking)).await?;
            return Ok(ImportStatus::success(&poi.id));
        }

        // Remember the overall nearest candidate even when nothing passes
        // the threshold; crawls re-examine these rows later.
        if let Some(resolved) = resolve_best_match(poi.lat, poi.lng, &candidates, f64::INFINITY) {
            let is_closer = match &nearest_miss {
                Some((current, _)) => resolved.distance_meters < current.distance_meters,
                None => true,
            };
            if is_closer {
                nearest_miss = Some((resolved, strategy.as_str().to_string()));
            }
        }
    }

    if let Some((resolved, method)) = nearest_miss {
        tracking.apply_match(&resolved.candidate, resolved.distance_meters, false);
        tracking.search_method = method;
    }
    tracking.search_text = last_query;
    tracking.is_rerun_gg_search = false;
    google_raw::upsert_place_tracking(pool, &tracking).await?;
    Ok(ImportStatus::ignored(&poi.id, "no match within threshold"))
}

/// Resolves a `venues.*` place id to its google place id through the venue
/// info endpoint. An unknown venue or one without a google id yields `None`.
async fn resolve_venue(
    crawl: &CrawlClient,
    place_id: &str,
    origin_lat: f64,
    origin_lng: f64,
) -> Result<Option<VenueMapping>> {
    let venue_id = &place_id[VENUES_PREFIX.len()..];
    let info = match crawl.get_venue(venue_id).await? {
        Some(info) => info,
        None => {
            warn!("Venue {} not resolvable", venue_id);
            return Ok(None);
        }
    };
    if info.google_place_id.is_empty() {
        return Ok(None);
    }
    let (lat, lng, distance) = match &info.lat_lng {
        Some(ll) => (
            ll.lat,
            ll.lng,
            geo::distance_meters(origin_lat, origin_lng, ll.lat, ll.lng),
        ),
        None => (0.0, 0.0, 0.0),
    };
    Ok(Some(VenueMapping {
        id: info.id,
        google_place_id: info.google_place_id,
        lat,
        lng,
        distance_meters: distance,
    }))
}

/// The id written onto the raw record: the venue's google place id when the
/// match went through the Waze venue namespace, otherwise the matched id.
fn effective_place_id(tracking: &PlaceMappingTracking) -> String {
    if tracking.gg_place_id.starts_with(VENUES_PREFIX) {
        if let Some(venue) = &tracking.venue_mapping {
            if !venue.google_place_id.is_empty() {
                return format!("{}{}", GOOGLE_PLACES_PREFIX, venue.google_place_id);
            }
        }
    }
    tracking.gg_place_id.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_place_id_prefers_venue_mapping() {
        let tracking = PlaceMappingTracking {
            gg_place_id: "venues.42".to_string(),
            venue_mapping: Some(VenueMapping {
                id: "42".to_string(),
                google_place_id: "ChIJxyz".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(effective_place_id(&tracking), "googlePlaces.ChIJxyz");
    }

    #[test]
    fn test_effective_place_id_keeps_unresolved_venue_id() {
        let tracking = PlaceMappingTracking {
            gg_place_id: "venues.42".to_string(),
            venue_mapping: None,
            ..Default::default()
        };
        assert_eq!(effective_place_id(&tracking), "venues.42");
    }

    #[test]
    fn test_effective_place_id_passes_google_ids_through() {
        let tracking = PlaceMappingTracking {
            gg_place_id: "googlePlaces.abc".to_string(),
            ..Default::default()
        };
        assert_eq!(effective_place_id(&tracking), "googlePlaces.abc");
    }
}
