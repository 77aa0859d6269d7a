// src/store/raw_poi.rs
//
// Raw Store access for the internal master POI dataset. An external loading
// process fills these tables; the passes here only read pages and write back
// per-record statuses, the accepted google place id and the pass summary.

use anyhow::{Context, Result};
use log::debug;

use crate::db::PgPool;
use crate::models::{ImportStatus, ImportSummary, RawPoi};

/// Which slice of the master dataset a paginated sweep walks. Parents must be
/// imported before children so `parent_party_id` references resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoiScope {
    Parents,
    Children,
    All,
}

impl PoiScope {
    fn where_clause(&self) -> &'static str {
        match self {
            PoiScope::Parents => "WHERE vm_parent_id = 0",
            PoiScope::Children => "WHERE vm_parent_id <> 0",
            PoiScope::All => "",
        }
    }
}

pub async fn count(pool: &PgPool, scope: PoiScope) -> Result<i64> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for raw_poi count")?;
    let sql = format!("SELECT COUNT(*) FROM raw_poi {}", scope.where_clause());
    let row = conn
        .query_one(&sql, &[])
        .await
        .context("Failed to count raw_poi records")?;
    Ok(row.get(0))
}

/// One page of raw POIs, zero-based, ordered by vm_id for a stable sweep.
pub async fn fetch_page(
    pool: &PgPool,
    scope: PoiScope,
    page: i64,
    page_size: i64,
) -> Result<Vec<RawPoi>> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for raw_poi page")?;
    let sql = format!(
        "SELECT id, vm_id, vm_parent_id, name, short_name, full_name, alt_name,
                address, lat, lng, cat_ids, cat_name, chain_name, branch_name,
                phones, emails, websites, specials, working_time, status,
                gg_place_id, admin
         FROM raw_poi {}
         ORDER BY vm_id
         LIMIT $1 OFFSET $2",
        scope.where_clause()
    );
    let rows = conn
        .query(&sql, &[&page_size, &(page * page_size)])
        .await
        .context("Failed to fetch raw_poi page")?;
    debug!("Fetched raw_poi page {} ({} rows)", page, rows.len());
    Ok(super::collect_rows(&rows, "raw_poi", RawPoi::from_row))
}

pub async fn fetch_by_vm_id(pool: &PgPool, vm_id: i64) -> Result<Option<RawPoi>> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for raw_poi lookup")?;
    let row = conn
        .query_opt(
            "SELECT id, vm_id, vm_parent_id, name, short_name, full_name, alt_name,
                    address, lat, lng, cat_ids, cat_name, chain_name, branch_name,
                    phones, emails, websites, specials, working_time, status,
                    gg_place_id, admin
             FROM raw_poi WHERE vm_id = $1",
            &[&vm_id],
        )
        .await
        .context("Failed to fetch raw_poi by vm_id")?;
    row.as_ref()
        .map(RawPoi::from_row)
        .transpose()
        .context("Malformed raw_poi row")
}

/// Writes the accepted google place id back onto the raw record.
pub async fn set_gg_place_id(pool: &PgPool, raw_id: &str, gg_place_id: &str) -> Result<u64> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for gg_place_id writeback")?;
    conn.execute(
        "UPDATE raw_poi SET gg_place_id = $1 WHERE id = $2",
        &[&gg_place_id, &raw_id],
    )
    .await
    .context("Failed to write gg_place_id back to raw_poi")
}

pub async fn set_import_status(pool: &PgPool, status: &ImportStatus) -> Result<u64> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for import status writeback")?;
    conn.execute(
        "UPDATE raw_poi SET import_status = $1, import_msg = $2 WHERE id = $3",
        &[&status.status.as_str(), &status.msg, &status.id],
    )
    .await
    .context("Failed to write import status back to raw_poi")
}

/// Persists the pass rollup. Write-once per pass run.
pub async fn insert_import_summary(pool: &PgPool, summary: &ImportSummary) -> Result<u64> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for import summary")?;
    conn.execute(
        "INSERT INTO import_summary
            (name, total, total_added_new, total_updated, total_ignored,
             total_error, last_modified)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
        &[
            &summary.name,
            &summary.total,
            &summary.total_added_new,
            &summary.total_updated,
            &summary.total_ignored,
            &summary.total_error,
            &summary.last_modified,
        ],
    )
    .await
    .context("Failed to insert import summary")
}
