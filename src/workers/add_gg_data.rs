// src/workers/add_gg_data.rs
//
// Google enrichment sweep: every live POI carrying a google place id gets its
// party's images and rating refreshed from the stored crawl document. The
// waze import only enriches the parties it mints; this pass catches up the
// rest after a crawl run has merged fresh documents.

use anyhow::Result;
use log::{error, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::watch;

use crate::config::AppConfig;
use crate::db::PgPool;
use crate::merge;
use crate::models::{
    ImportErrorKind, ImportStatus, Poi, UpdatePartyData, GOOGLE_PLACES_PREFIX,
};
use crate::results::{self, PassOutcome};
use crate::store::{google_raw, party, raw_poi};

pub const PASS_NAME: &str = "AddGgData";

pub async fn run(
    pool: &PgPool,
    config: &AppConfig,
    cancel: watch::Receiver<bool>,
) -> Result<PassOutcome> {
    info!("Starting google enrichment sweep");
    let mut statuses: Vec<ImportStatus> = Vec::new();

    let mut page = 0i64;
    loop {
        if *cancel.borrow() {
            warn!("Google enrichment cancelled before page {}", page);
            break;
        }
        let pois = party::fetch_poi_page(pool, page, config.page_size).await?;
        if pois.is_empty() {
            break;
        }

        let place_ids = bare_place_ids(&pois);
        if !place_ids.is_empty() {
            let docs = google_raw::query_places_by_ids(pool, &place_ids).await?;
            let by_id = docs_by_prefixed_id(&docs);

            for poi in pois.iter().filter(|p| !p.google_place_id.is_empty()) {
                let doc = match by_id.get(&poi.google_place_id) {
                    Some(doc) => doc,
                    None => {
                        statuses.push(ImportStatus::ignored(&poi.id, "no crawled document"));
                        continue;
                    }
                };
                let status = match enrich_one(pool, poi, doc).await {
                    Ok(status) => status,
                    Err(e) => {
                        error!("Google enrichment failed for {}: {:#}", poi.id, e);
                        ImportStatus::error(&poi.id, ImportErrorKind::UnhandledError)
                    }
                };
                statuses.push(status);
            }
        }

        info!("Google enrichment page {} ({} pois)", page, pois.len());
        page += 1;
    }

    let summary = results::summarize(PASS_NAME, &statuses);
    info!(
        "{} done: {} total, {} enriched, {} without documents, {} errors",
        PASS_NAME,
        summary.total,
        summary.total_added_new,
        summary.total_ignored,
        summary.total_error
    );
    raw_poi::insert_import_summary(pool, &summary).await?;
    Ok(PassOutcome::from_summary(&summary))
}

/// Replaces the party's images with the document's gallery and updates the
/// rating when the document carries reviews. An empty gallery still replaces
/// whatever was stored, so a document that lost its images clears them.
async fn enrich_one(pool: &PgPool, poi: &Poi, doc: &Value) -> Result<ImportStatus> {
    party::update_party_partial(
        pool,
        &UpdatePartyData {
            party_id: poi.id.clone(),
            images: Some(merge::party_images_from_doc(&poi.id, doc)),
            rating: merge::party_rating_from_doc(doc),
            evse_powers: None,
        },
    )
    .await?;
    Ok(ImportStatus::success(&poi.id))
}

/// Distinct bare place ids for one page, prefix stripped for the raw store.
fn bare_place_ids(pois: &[Poi]) -> Vec<String> {
    let mut ids: Vec<String> = pois
        .iter()
        .filter(|p| !p.google_place_id.is_empty())
        .map(|p| {
            p.google_place_id
                .strip_prefix(GOOGLE_PLACES_PREFIX)
                .unwrap_or(&p.google_place_id)
                .to_string()
        })
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

/// Crawled documents keyed by the prefixed id convention the poi table uses.
fn docs_by_prefixed_id(docs: &[Value]) -> HashMap<String, Value> {
    let mut by_id = HashMap::new();
    for doc in docs {
        if let Some(id) = merge::place_id(doc) {
            by_id.insert(format!("{}{}", GOOGLE_PLACES_PREFIX, id), doc.clone());
        }
    }
    by_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn poi(id: &str, gg_place_id: &str) -> Poi {
        Poi {
            id: id.to_string(),
            name: String::new(),
            address: String::new(),
            label: String::new(),
            lat: 0.0,
            lng: 0.0,
            parent_id: String::new(),
            google_place_id: gg_place_id.to_string(),
            is_delete: false,
        }
    }

    #[test]
    fn test_bare_place_ids_strips_prefix_and_dedupes() {
        let pois = vec![
            poi("vml.a", "googlePlaces.ChIJabc"),
            poi("vml.b", ""),
            poi("vml.c", "googlePlaces.ChIJabc"),
            poi("vml.d", "ChIJraw"),
        ];
        let ids = bare_place_ids(&pois);
        assert_eq!(ids, vec!["ChIJabc".to_string(), "ChIJraw".to_string()]);
    }

    #[test]
    fn test_docs_keyed_by_prefixed_place_id() {
        let docs = vec![
            json!({"placeId": "ChIJabc", "title": "Coffee X"}),
            json!({"title": "no id"}),
        ];
        let by_id = docs_by_prefixed_id(&docs);
        assert_eq!(by_id.len(), 1);
        assert!(by_id.contains_key("googlePlaces.ChIJabc"));
    }
}
