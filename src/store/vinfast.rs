// src/store/vinfast.rs
//
// VinFast charging-station mapping rows plus the raw crawled station
// documents. The validity invariant (vm_is_valid only below the distance
// threshold) is enforced by the sync pass; this layer just persists it.

use anyhow::{Context, Result};
use log::debug;
use serde_json::Value;

use crate::db::PgPool;
use crate::models::{unix_now, VinfastStationMapping};

pub async fn get_station_mapping(
    pool: &PgPool,
    vml_id: &str,
) -> Result<Option<VinfastStationMapping>> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for vinfast mapping lookup")?;
    let row = conn
        .query_opt(
            "SELECT * FROM vinfast_station_mapping WHERE vml_id = $1",
            &[&vml_id],
        )
        .await
        .context("Failed to fetch vinfast station mapping")?;
    row.as_ref()
        .map(VinfastStationMapping::from_row)
        .transpose()
        .context("Malformed vinfast station mapping row")
}

pub async fn upsert_station_mapping(
    pool: &PgPool,
    mapping: &VinfastStationMapping,
) -> Result<u64> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for vinfast mapping upsert")?;
    let now = unix_now();

    const UPSERT_SQL: &str = "
        INSERT INTO vinfast_station_mapping (
            vml_id, location_id, station_name, station_address, latitude,
            longitude, vm_name, vm_address, vm_lat, vm_lng, vm_distance,
            vm_is_valid, created_date, last_modified
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (vml_id) DO UPDATE SET
            location_id = EXCLUDED.location_id,
            station_name = EXCLUDED.station_name,
            station_address = EXCLUDED.station_address,
            latitude = EXCLUDED.latitude,
            longitude = EXCLUDED.longitude,
            vm_name = EXCLUDED.vm_name,
            vm_address = EXCLUDED.vm_address,
            vm_lat = EXCLUDED.vm_lat,
            vm_lng = EXCLUDED.vm_lng,
            vm_distance = EXCLUDED.vm_distance,
            vm_is_valid = EXCLUDED.vm_is_valid,
            created_date = vinfast_station_mapping.created_date,
            last_modified = EXCLUDED.last_modified";

    conn.execute(
        UPSERT_SQL,
        &[
            &mapping.vml_id,
            &mapping.location_id,
            &mapping.station_name,
            &mapping.station_address,
            &mapping.latitude,
            &mapping.longitude,
            &mapping.vm_name,
            &mapping.vm_address,
            &mapping.vm_lat,
            &mapping.vm_lng,
            &mapping.vm_distance,
            &mapping.vm_is_valid,
            &now,
            &now,
        ],
    )
    .await
    .context("Failed to upsert vinfast station mapping")
}

pub async fn count_mappings(pool: &PgPool, valid: bool) -> Result<i64> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for vinfast mapping count")?;
    let row = conn
        .query_one(
            "SELECT COUNT(*) FROM vinfast_station_mapping WHERE vm_is_valid = $1",
            &[&valid],
        )
        .await
        .context("Failed to count vinfast station mappings")?;
    Ok(row.get(0))
}

/// One page of mappings filtered on validity, ordered by vml_id.
pub async fn query_mappings(
    pool: &PgPool,
    valid: bool,
    page: i64,
    page_size: i64,
) -> Result<Vec<VinfastStationMapping>> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for vinfast mapping page")?;
    let rows = conn
        .query(
            "SELECT * FROM vinfast_station_mapping WHERE vm_is_valid = $1
             ORDER BY vml_id LIMIT $2 OFFSET $3",
            &[&valid, &page_size, &(page * page_size)],
        )
        .await
        .context("Failed to fetch vinfast station mapping page")?;
    debug!(
        "Fetched vinfast mapping page {} (valid={}, {} rows)",
        page,
        valid,
        rows.len()
    );
    Ok(super::collect_rows(
        &rows,
        "vinfast_station_mapping",
        VinfastStationMapping::from_row,
    ))
}

pub async fn get_station_raw(pool: &PgPool, location_id: &str) -> Result<Option<Value>> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for vinfast raw lookup")?;
    let row = conn
        .query_opt(
            "SELECT doc FROM vinfast_station_raw WHERE location_id = $1",
            &[&location_id],
        )
        .await
        .context("Failed to fetch vinfast station raw document")?;
    Ok(row.map(|r| r.get("doc")))
}

/// Persists a crawled station document keyed by the station location id.
pub async fn upsert_station_raw(pool: &PgPool, location_id: &str, doc: &Value) -> Result<u64> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for vinfast raw upsert")?;
    let now = unix_now();
    conn.execute(
        "INSERT INTO vinfast_station_raw (location_id, doc, last_modified)
         VALUES ($1, $2, $3)
         ON CONFLICT (location_id) DO UPDATE SET
             doc = EXCLUDED.doc,
             last_modified = EXCLUDED.last_modified",
        &[&location_id, &doc, &now],
    )
    .await
    .context("Failed to upsert vinfast station raw document")
}
