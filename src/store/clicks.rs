// src/store/clicks.rs
//
// Waze click-stream raw store: aggregated navigation targets loaded by an
// external process, read here page by page for reconciliation.

use anyhow::{Context, Result};
use log::debug;

use crate::db::PgPool;
use crate::models::{ImportStatus, WazeClick};

pub async fn count(pool: &PgPool) -> Result<i64> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for waze clicks count")?;
    let row = conn
        .query_one("SELECT COUNT(*) FROM waze_clicks_raw", &[])
        .await
        .context("Failed to count waze click records")?;
    Ok(row.get(0))
}

pub async fn fetch_page(pool: &PgPool, page: i64, page_size: i64) -> Result<Vec<WazeClick>> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for waze clicks page")?;
    let rows = conn
        .query(
            "SELECT id, waze_venue_id, alter_venue_id, name, address, lat, lng, total_clicks
             FROM waze_clicks_raw
             ORDER BY total_clicks DESC, id
             LIMIT $1 OFFSET $2",
            &[&page_size, &(page * page_size)],
        )
        .await
        .context("Failed to fetch waze clicks page")?;
    debug!("Fetched waze clicks page {} ({} rows)", page, rows.len());
    Ok(super::collect_rows(&rows, "waze_clicks_raw", WazeClick::from_row))
}

/// Persists a resolved alternate id so later runs skip the venue lookup.
pub async fn update_alter_venue_id(
    pool: &PgPool,
    waze_venue_id: &str,
    alter_venue_id: &str,
) -> Result<u64> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for alter venue id update")?;
    conn.execute(
        "UPDATE waze_clicks_raw SET alter_venue_id = $1 WHERE waze_venue_id = $2",
        &[&alter_venue_id, &waze_venue_id],
    )
    .await
    .context("Failed to update alter venue id")
}

pub async fn set_import_status(pool: &PgPool, status: &ImportStatus) -> Result<u64> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for waze click status writeback")?;
    conn.execute(
        "UPDATE waze_clicks_raw SET import_status = $1, import_msg = $2 WHERE id = $3",
        &[&status.status.as_str(), &status.msg, &status.id],
    )
    .await
    .context("Failed to write import status back to waze_clicks_raw")
}
