// src/store/google_raw.rs
//
// Crawled google place documents plus the two mapping-tracking tables
// (internal vm ids and external waze ids). Tracking rows are upserted in a
// single statement so concurrent passes stay last-write-wins per key without
// ever losing the row.

use anyhow::{Context, Result};
use log::{debug, warn};
use serde_json::Value;

use crate::db::PgPool;
use crate::merge;
use crate::models::{unix_now, PlaceMappingTracking, WazeMappingTracking};

// ---------------------------------------------------------------------------
// Place mapping tracking (keyed by vm_id)
// ---------------------------------------------------------------------------

pub async fn get_place_tracking(pool: &PgPool, vm_id: i64) -> Result<Option<PlaceMappingTracking>> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for place tracking lookup")?;
    let row = conn
        .query_opt(
            "SELECT * FROM place_mapping_tracking WHERE vm_id = $1",
            &[&vm_id],
        )
        .await
        .context("Failed to fetch place mapping tracking")?;
    row.as_ref()
        .map(PlaceMappingTracking::from_row)
        .transpose()
        .context("Malformed place mapping tracking row")
}

/// Inserts or fully replaces the tracking row for a vm id. `created_date`
/// survives replacement; `last_modified` is bumped to now.
pub async fn upsert_place_tracking(pool: &PgPool, tracking: &PlaceMappingTracking) -> Result<u64> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for place tracking upsert")?;
    let venue_mapping: Option<Value> = match &tracking.venue_mapping {
        Some(v) => Some(serde_json::to_value(v).context("Failed to serialize venue mapping")?),
        None => None,
    };
    let now = unix_now();

    const UPSERT_SQL: &str = "
        INSERT INTO place_mapping_tracking (
            vm_id, vm_parent_id, vm_name, vm_short_name, vm_full_name,
            vm_alter_name, vm_address, vm_cat_id, vm_latitude, vm_longitude,
            vml_id, gg_place_id, gg_is_valid, gg_name, gg_address, gg_lat,
            gg_lng, gg_distance, gg_category_name, search_method, search_text,
            venue_mapping, is_ignore_mapping, is_rerun_gg_search,
            created_date, last_modified
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                  $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26)
        ON CONFLICT (vm_id) DO UPDATE SET
            vm_parent_id = EXCLUDED.vm_parent_id,
            vm_name = EXCLUDED.vm_name,
            vm_short_name = EXCLUDED.vm_short_name,
            vm_full_name = EXCLUDED.vm_full_name,
            vm_alter_name = EXCLUDED.vm_alter_name,
            vm_address = EXCLUDED.vm_address,
            vm_cat_id = EXCLUDED.vm_cat_id,
            vm_latitude = EXCLUDED.vm_latitude,
            vm_longitude = EXCLUDED.vm_longitude,
            vml_id = EXCLUDED.vml_id,
            gg_place_id = EXCLUDED.gg_place_id,
            gg_is_valid = EXCLUDED.gg_is_valid,
            gg_name = EXCLUDED.gg_name,
            gg_address = EXCLUDED.gg_address,
            gg_lat = EXCLUDED.gg_lat,
            gg_lng = EXCLUDED.gg_lng,
            gg_distance = EXCLUDED.gg_distance,
            gg_category_name = EXCLUDED.gg_category_name,
            search_method = EXCLUDED.search_method,
            search_text = EXCLUDED.search_text,
            venue_mapping = EXCLUDED.venue_mapping,
            is_ignore_mapping = EXCLUDED.is_ignore_mapping,
            is_rerun_gg_search = EXCLUDED.is_rerun_gg_search,
            created_date = place_mapping_tracking.created_date,
            last_modified = EXCLUDED.last_modified";

    conn.execute(
        UPSERT_SQL,
        &[
            &tracking.vm_id,
            &tracking.vm_parent_id,
            &tracking.vm_name,
            &tracking.vm_short_name,
            &tracking.vm_full_name,
            &tracking.vm_alter_name,
            &tracking.vm_address,
            &tracking.vm_cat_id,
            &tracking.vm_latitude,
            &tracking.vm_longitude,
            &tracking.vml_id,
            &tracking.gg_place_id,
            &tracking.gg_is_valid,
            &tracking.gg_name,
            &tracking.gg_address,
            &tracking.gg_lat,
            &tracking.gg_lng,
            &tracking.gg_distance,
            &tracking.gg_category_name,
            &tracking.search_method,
            &tracking.search_text,
            &venue_mapping,
            &tracking.is_ignore_mapping,
            &tracking.is_rerun_gg_search,
            &now,
            &now,
        ],
    )
    .await
    .context("Failed to upsert place mapping tracking")
}

/// Predicate shared by the matching passes: every row not explicitly ignored,
/// plus ignored rows flagged for another search. Deliberately blind to
/// `gg_is_valid` so the re-run flag forces a re-match of rows that already
/// hold a valid google id. Mirrors `PlaceMappingTracking::needs_gg_search`.
const INVALID_PLACE_PREDICATE: &str = "(NOT is_ignore_mapping) OR is_rerun_gg_search";

pub async fn count_invalid_place_tracking(pool: &PgPool) -> Result<i64> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for invalid tracking count")?;
    let sql = format!(
        "SELECT COUNT(*) FROM place_mapping_tracking WHERE {}",
        INVALID_PLACE_PREDICATE
    );
    let row = conn
        .query_one(&sql, &[])
        .await
        .context("Failed to count invalid place tracking rows")?;
    Ok(row.get(0))
}

pub async fn query_invalid_place_tracking(
    pool: &PgPool,
    page: i64,
    page_size: i64,
) -> Result<Vec<PlaceMappingTracking>> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for invalid tracking page")?;
    let sql = format!(
        "SELECT * FROM place_mapping_tracking WHERE {}
         ORDER BY vm_id LIMIT $1 OFFSET $2",
        INVALID_PLACE_PREDICATE
    );
    let rows = conn
        .query(&sql, &[&page_size, &(page * page_size)])
        .await
        .context("Failed to fetch invalid place tracking page")?;
    debug!(
        "Fetched invalid tracking page {} ({} rows)",
        page,
        rows.len()
    );
    Ok(super::collect_rows(
        &rows,
        "place_mapping_tracking",
        PlaceMappingTracking::from_row,
    ))
}

/// Bulk correlation lookup: every tracking row waiting on any of the given
/// search texts, regardless of current validity.
pub async fn query_place_tracking_by_search_text(
    pool: &PgPool,
    texts: &[String],
) -> Result<Vec<PlaceMappingTracking>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for tracking search-text lookup")?;
    let rows = conn
        .query(
            "SELECT * FROM place_mapping_tracking WHERE search_text = ANY($1)",
            &[&texts],
        )
        .await
        .context("Failed to fetch place tracking rows by search text")?;
    Ok(super::collect_rows(
        &rows,
        "place_mapping_tracking",
        PlaceMappingTracking::from_row,
    ))
}

// ---------------------------------------------------------------------------
// Waze mapping tracking (keyed by waze_id)
// ---------------------------------------------------------------------------

pub async fn get_waze_tracking(pool: &PgPool, waze_id: &str) -> Result<Option<WazeMappingTracking>> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for waze tracking lookup")?;
    let row = conn
        .query_opt(
            "SELECT * FROM waze_mapping_tracking WHERE waze_id = $1",
            &[&waze_id],
        )
        .await
        .context("Failed to fetch waze mapping tracking")?;
    row.as_ref()
        .map(WazeMappingTracking::from_row)
        .transpose()
        .context("Malformed waze mapping tracking row")
}

pub async fn upsert_waze_tracking(pool: &PgPool, tracking: &WazeMappingTracking) -> Result<u64> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for waze tracking upsert")?;
    let now = unix_now();

    const UPSERT_SQL: &str = "
        INSERT INTO waze_mapping_tracking (
            waze_id, waze_alter_id, waze_name, waze_address, waze_latitude,
            waze_longitude, vml_id, gg_place_id, gg_is_valid, gg_name,
            gg_address, gg_lat, gg_lng, gg_distance, gg_category_name,
            search_method, search_text, is_ignore_mapping, is_rerun_gg_search,
            created_date, last_modified
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                  $15, $16, $17, $18, $19, $20, $21)
        ON CONFLICT (waze_id) DO UPDATE SET
            waze_alter_id = EXCLUDED.waze_alter_id,
            waze_name = EXCLUDED.waze_name,
            waze_address = EXCLUDED.waze_address,
            waze_latitude = EXCLUDED.waze_latitude,
            waze_longitude = EXCLUDED.waze_longitude,
            vml_id = EXCLUDED.vml_id,
            gg_place_id = EXCLUDED.gg_place_id,
            gg_is_valid = EXCLUDED.gg_is_valid,
            gg_name = EXCLUDED.gg_name,
            gg_address = EXCLUDED.gg_address,
            gg_lat = EXCLUDED.gg_lat,
            gg_lng = EXCLUDED.gg_lng,
            gg_distance = EXCLUDED.gg_distance,
            gg_category_name = EXCLUDED.gg_category_name,
            search_method = EXCLUDED.search_method,
            search_text = EXCLUDED.search_text,
            is_ignore_mapping = EXCLUDED.is_ignore_mapping,
            is_rerun_gg_search = EXCLUDED.is_rerun_gg_search,
            created_date = waze_mapping_tracking.created_date,
            last_modified = EXCLUDED.last_modified";

    conn.execute(
        UPSERT_SQL,
        &[
            &tracking.waze_id,
            &tracking.waze_alter_id,
            &tracking.waze_name,
            &tracking.waze_address,
            &tracking.waze_latitude,
            &tracking.waze_longitude,
            &tracking.vml_id,
            &tracking.gg_place_id,
            &tracking.gg_is_valid,
            &tracking.gg_name,
            &tracking.gg_address,
            &tracking.gg_lat,
            &tracking.gg_lng,
            &tracking.gg_distance,
            &tracking.gg_category_name,
            &tracking.search_method,
            &tracking.search_text,
            &tracking.is_ignore_mapping,
            &tracking.is_rerun_gg_search,
            &now,
            &now,
        ],
    )
    .await
    .context("Failed to upsert waze mapping tracking")
}

// ---------------------------------------------------------------------------
// Crawled place documents
// ---------------------------------------------------------------------------

pub async fn get_place(pool: &PgPool, place_id: &str) -> Result<Option<Value>> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for crawled place lookup")?;
    let row = conn
        .query_opt(
            "SELECT doc FROM google_place_raw WHERE place_id = $1",
            &[&place_id],
        )
        .await
        .context("Failed to fetch crawled place document")?;
    Ok(row.map(|r| r.get("doc")))
}

/// Crawled documents for a set of bare (unprefixed) place ids.
pub async fn query_places_by_ids(pool: &PgPool, place_ids: &[String]) -> Result<Vec<Value>> {
    if place_ids.is_empty() {
        return Ok(Vec::new());
    }
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for crawled documents by id")?;
    let rows = conn
        .query(
            "SELECT doc FROM google_place_raw WHERE place_id = ANY($1)",
            &[&place_ids],
        )
        .await
        .context("Failed to fetch crawled documents by place id")?;
    Ok(rows.iter().map(|r| r.get("doc")).collect())
}

/// Which of the given search texts already have crawled documents.
pub async fn list_crawled_search_strings(
    pool: &PgPool,
    texts: &[String],
) -> Result<Vec<String>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for crawled search-string lookup")?;
    let rows = conn
        .query(
            "SELECT DISTINCT search_string FROM google_place_raw
             WHERE search_string = ANY($1)",
            &[&texts],
        )
        .await
        .context("Failed to list crawled search strings")?;
    Ok(rows.iter().map(|r| r.get("search_string")).collect())
}

/// Crawled documents whose `searchString` matches one of the given texts.
pub async fn query_places_by_search_strings(
    pool: &PgPool,
    texts: &[String],
) -> Result<Vec<Value>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for crawled documents lookup")?;
    let rows = conn
        .query(
            "SELECT doc FROM google_place_raw WHERE search_string = ANY($1)",
            &[&texts],
        )
        .await
        .context("Failed to fetch crawled documents by search string")?;
    Ok(rows.iter().map(|r| r.get("doc")).collect())
}

/// Merge-upserts a crawl result set. Each document is merged against the
/// stored version through the merge engine and written back with the run's
/// version code. Bulk semantics are unordered continue-on-error: a bad
/// document is logged and skipped, never failing the batch. Returns the
/// number of documents persisted.
pub async fn bulk_merge_places(
    pool: &PgPool,
    docs: &[Value],
    version_code: &str,
) -> Result<usize> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for crawled document bulk upsert")?;

    const UPSERT_SQL: &str = "
        INSERT INTO google_place_raw (place_id, search_string, version_code, doc, last_modified)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (place_id) DO UPDATE SET
            search_string = EXCLUDED.search_string,
            version_code = EXCLUDED.version_code,
            doc = EXCLUDED.doc,
            last_modified = EXCLUDED.last_modified";

    let mut persisted = 0usize;
    for (idx, incoming) in docs.iter().enumerate() {
        let place_id = match merge::place_id(incoming) {
            Some(id) => id.to_string(),
            None => {
                warn!("Crawled document at index {} has no placeId, skipping", idx);
                continue;
            }
        };

        let existing = match conn
            .query_opt(
                "SELECT doc FROM google_place_raw WHERE place_id = $1",
                &[&place_id],
            )
            .await
        {
            Ok(row) => row.map(|r| r.get::<_, Value>("doc")),
            Err(e) => {
                warn!("Failed to read existing document {}: {}", place_id, e);
                continue;
            }
        };

        let merged = match merge::merge_place_document(existing.as_ref(), incoming) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Failed to merge document {}: {}", place_id, e);
                continue;
            }
        };

        let search_string = merged
            .get("searchString")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let now = unix_now();

        match conn
            .execute(
                UPSERT_SQL,
                &[&place_id, &search_string, &version_code, &merged, &now],
            )
            .await
        {
            Ok(_) => persisted += 1,
            Err(e) => warn!("Failed to upsert document {}: {}", place_id, e),
        }
    }

    debug!("Persisted {}/{} crawled documents", persisted, docs.len());
    Ok(persisted)
}
