// src/workers/crawl_places.rs
//
// Crawl pass: rematches every tracking row not ruled out by the ignore flag,
// including already valid rows flagged for a forced re-search. Crawled
// documents from earlier runs are re-applied first with a wider radius;
// whatever is left is batched into crawl runs, polled to completion, merged
// into the raw document store, and matched by distance.

use anyhow::Result;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::clients::crawl::CrawlClient;
use crate::config::AppConfig;
use crate::coordinator::{
    candidate_from_doc, should_submit_batch, spawn_event_listener, stamp_version_code,
    uncrawled_texts, version_code_today, Coordinator, CrawlEvent, JobTracker,
};
use crate::db::PgPool;
use crate::matching::resolver::resolve_best_match;
use crate::models::{
    Candidate, ImportStatus, PlaceMappingTracking, GOOGLE_PLACES_PREFIX,
};
use crate::results::{self, PassOutcome};
use crate::store::{google_raw, raw_poi};

pub const PASS_NAME: &str = "CrawlPlaceData";

pub async fn run(
    pool: &PgPool,
    config: &AppConfig,
    events: mpsc::Receiver<CrawlEvent>,
    cancel: watch::Receiver<bool>,
) -> Result<PassOutcome> {
    let version_code = version_code_today();
    let total = google_raw::count_invalid_place_tracking(pool).await?;
    info!(
        "Starting crawl pass: {} unresolved tracking rows, version code {}",
        total, version_code
    );

    let tracker = JobTracker::new();
    let listener = spawn_event_listener(tracker.clone(), events);
    let client = Arc::new(CrawlClient::new(config));
    let coordinator = Coordinator::new(client, tracker, config);

    let mut statuses: Vec<ImportStatus> = Vec::new();

    // Snapshot the unresolved rows up front: the re-apply step below flips
    // rows out of the unresolved set, which would shift page offsets if we
    // paged and mutated at the same time.
    let mut unresolved: Vec<PlaceMappingTracking> = Vec::new();
    let mut page = 0i64;
    loop {
        let trackings =
            google_raw::query_invalid_place_tracking(pool, page, config.page_size).await?;
        if trackings.is_empty() {
            break;
        }
        unresolved.extend(trackings);
        page += 1;
    }

    // Phase one: re-apply documents from earlier runs and collect the search
    // texts that still need a fresh crawl.
    let mut pending_texts: Vec<String> = Vec::new();
    for chunk in unresolved.chunks(config.page_size.max(1) as usize) {
        if *cancel.borrow() {
            warn!("Crawl pass cancelled during re-apply");
            break;
        }
        let texts: Vec<String> = chunk
            .iter()
            .map(|t| t.search_text.clone())
            .filter(|t| !t.trim().is_empty())
            .collect();
        let docs = google_raw::query_places_by_search_strings(pool, &texts).await?;
        let by_text = candidates_by_search_string(&docs);

        for tracking in chunk {
            let mut tracking = tracking.clone();
            if tracking.search_text.trim().is_empty() {
                statuses.push(ImportStatus::ignored(
                    &tracking.vm_id.to_string(),
                    "no search text",
                ));
                continue;
            }
            let candidates = by_text.get(&tracking.search_text);
            let resolved = candidates.and_then(|c| {
                resolve_best_match(tracking.vm_latitude, tracking.vm_longitude, c, f64::INFINITY)
            });
            match resolved {
                Some(resolved)
                    if resolved.distance_meters < config.presweep_match_distance_meters =>
                {
                    accept_crawl_match(
                        &mut tracking,
                        &resolved.candidate,
                        resolved.distance_meters,
                        true,
                    );
                    google_raw::upsert_place_tracking(pool, &tracking).await?;
                    propagate_to_raw(pool, &tracking).await?;
                    statuses.push(ImportStatus::updated(
                        &tracking.vm_id.to_string(),
                        "crawled match re-applied",
                    ));
                }
                _ => pending_texts.push(tracking.search_text.clone()),
            }
        }
    }
    pending_texts.sort();
    pending_texts.dedup();
    info!(
        "{} search texts left to crawl after re-apply",
        pending_texts.len()
    );

    // Phase two: submit near-full batches and match the returned documents.
    for chunk in pending_texts.chunks(config.crawl_batch_size) {
        if *cancel.borrow() {
            warn!("Crawl pass cancelled, skipping remaining batches");
            break;
        }
        let crawled = google_raw::list_crawled_search_strings(pool, chunk).await?;
        let to_crawl = uncrawled_texts(chunk, &crawled);
        if !should_submit_batch(to_crawl.len(), config.crawl_batch_size) {
            info!(
                "Batch of {} uncrawled texts below fill threshold, deferring",
                to_crawl.len()
            );
            continue;
        }

        let run_info = match coordinator.submit(&to_crawl).await? {
            Some(info) => info,
            None => {
                warn!("Crawl submission returned no run info, skipping batch");
                continue;
            }
        };
        info!(
            "Submitted crawl task {} with {} search texts",
            run_info.task_id,
            to_crawl.len()
        );

        let result = match coordinator.wait_for_run(&run_info).await? {
            Some(result) => result,
            None => {
                warn!("Crawl task {} never finished, skipping batch", run_info.task_id);
                continue;
            }
        };

        let mut docs = result.data;
        stamp_version_code(&mut docs, &version_code);
        let persisted = google_raw::bulk_merge_places(pool, &docs, &version_code).await?;
        info!(
            "Persisted {}/{} documents from task {}",
            persisted,
            docs.len(),
            run_info.task_id
        );

        apply_run_results(pool, config, &to_crawl, &docs, &mut statuses).await?;
    }

    listener.abort();

    let summary = results::summarize(PASS_NAME, &statuses);
    info!(
        "{} done: {} total, {} newly matched, {} re-applied, {} unmatched, {} errors",
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

/// Matches the documents of one finished run back onto the tracking rows
/// whose search text was part of the batch.
async fn apply_run_results(
    pool: &PgPool,
    config: &AppConfig,
    batch_texts: &[String],
    docs: &[serde_json::Value],
    statuses: &mut Vec<ImportStatus>,
) -> Result<()> {
    let by_text = candidates_by_search_string(docs);
    let trackings = google_raw::query_place_tracking_by_search_text(pool, batch_texts).await?;

    for mut tracking in trackings {
        // The lookup is by search text alone; a row ignored for good that
        // happens to share a text with the batch stays untouched.
        if !tracking.needs_gg_search() {
            continue;
        }
        let id = tracking.vm_id.to_string();
        let resolved = by_text.get(&tracking.search_text).and_then(|c| {
            resolve_best_match(tracking.vm_latitude, tracking.vm_longitude, c, f64::INFINITY)
        });
        match resolved {
            Some(resolved) => {
                let valid = resolved.distance_meters < config.crawl_match_distance_meters;
                accept_crawl_match(
                    &mut tracking,
                    &resolved.candidate,
                    resolved.distance_meters,
                    valid,
                );
                google_raw::upsert_place_tracking(pool, &tracking).await?;
                if valid {
                    propagate_to_raw(pool, &tracking).await?;
                    statuses.push(ImportStatus::success(&id));
                } else {
                    statuses.push(ImportStatus::ignored(&id, "nearest candidate too far"));
                }
            }
            None => {
                // The crawl found nothing for this text; stop re-examining
                // the row on future runs.
                tracking.clear_match();
                tracking.is_ignore_mapping = true;
                tracking.is_rerun_gg_search = false;
                google_raw::upsert_place_tracking(pool, &tracking).await?;
                statuses.push(ImportStatus::ignored(&id, "no crawl results"));
            }
        }
    }
    Ok(())
}

/// Records a crawl-derived match. Clearing the search method marks the id as
/// coming straight from Google rather than the autocomplete namespace.
fn accept_crawl_match(
    tracking: &mut PlaceMappingTracking,
    candidate: &Candidate,
    distance_meters: f64,
    valid: bool,
) {
    let mut prefixed = candidate.clone();
    prefixed.place_id = format!("{}{}", GOOGLE_PLACES_PREFIX, candidate.place_id);
    tracking.apply_match(&prefixed, distance_meters, valid);
    tracking.search_method = String::new();
    tracking.venue_mapping = None;
    tracking.is_ignore_mapping = false;
    tracking.is_rerun_gg_search = false;
}

async fn propagate_to_raw(pool: &PgPool, tracking: &PlaceMappingTracking) -> Result<()> {
    if let Some(raw) = raw_poi::fetch_by_vm_id(pool, tracking.vm_id).await? {
        raw_poi::set_gg_place_id(pool, &raw.id, &tracking.gg_place_id).await?;
    }
    Ok(())
}

/// Groups crawled documents into resolver candidates keyed by the search
/// string that produced them. Documents without a location are dropped.
fn candidates_by_search_string(docs: &[serde_json::Value]) -> HashMap<String, Vec<Candidate>> {
    let mut by_text: HashMap<String, Vec<Candidate>> = HashMap::new();
    for doc in docs {
        let text = match doc.get("searchString").and_then(serde_json::Value::as_str) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => continue,
        };
        if let Some(candidate) = candidate_from_doc(doc) {
            by_text.entry(text).or_default().push(candidate);
        }
    }
    by_text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_candidates_grouped_by_search_string() {
        let docs = vec![
            json!({"placeId": "a", "searchString": "coffee x", "location": {"lat": 10.0, "lng": 106.0}}),
            json!({"placeId": "b", "searchString": "coffee x", "location": {"lat": 10.1, "lng": 106.0}}),
            json!({"placeId": "c", "searchString": "gas y", "location": {"lat": 11.0, "lng": 106.5}}),
            // no location, dropped
            json!({"placeId": "d", "searchString": "gas y"}),
            // no search string, dropped
            json!({"placeId": "e", "location": {"lat": 11.0, "lng": 106.5}}),
        ];
        let by_text = candidates_by_search_string(&docs);
        assert_eq!(by_text.len(), 2);
        assert_eq!(by_text["coffee x"].len(), 2);
        assert_eq!(by_text["gas y"].len(), 1);
    }

    #[test]
    fn test_accept_crawl_match_prefixes_and_resets_flags() {
        let mut tracking = PlaceMappingTracking {
            search_method: "NameAndAdmin".to_string(),
            is_ignore_mapping: true,
            is_rerun_gg_search: true,
            ..Default::default()
        };
        let candidate = Candidate {
            place_id: "ChIJabc".to_string(),
            name: "Coffee X".to_string(),
            address: "12 Main St".to_string(),
            lat: 10.0,
            lng: 106.0,
            category_name: None,
            similarity: None,
        };
        accept_crawl_match(&mut tracking, &candidate, 120.0, true);
        assert_eq!(tracking.gg_place_id, "googlePlaces.ChIJabc");
        assert!(tracking.gg_is_valid);
        assert!(tracking.search_method.is_empty());
        assert!(!tracking.is_ignore_mapping);
        assert!(!tracking.is_rerun_gg_search);
        assert_eq!(tracking.gg_distance, 120.0);
    }

    #[test]
    fn test_invalid_crawl_match_still_recorded() {
        let mut tracking = PlaceMappingTracking::default();
        let candidate = Candidate {
            place_id: "ChIJfar".to_string(),
            name: String::new(),
            address: String::new(),
            lat: 10.0,
            lng: 106.0,
            category_name: None,
            similarity: None,
        };
        accept_crawl_match(&mut tracking, &candidate, 950.0, false);
        assert_eq!(tracking.gg_place_id, "googlePlaces.ChIJfar");
        assert!(!tracking.gg_is_valid);
    }
}
