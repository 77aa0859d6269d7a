// src/store/party.rs
//
// Canonical Party Store. A party and its satellite rows (categories, contact,
// EVSE powers, specials, mappings, the flat search POI) are written in one
// transaction so a re-import can never leave a half-built entity behind.

use anyhow::{Context, Result};
use log::debug;

use crate::db::PgPool;
use crate::models::{Party, PartyMapping, Poi, UpdatePartyData};
use crate::models::{MappingGoogle, MappingVm, MappingWaze};

/// Looks up the party owning an external id no matter which source namespace
/// it was registered under.
pub async fn find_party_id_by_source_id(
    pool: &PgPool,
    source_id: &str,
) -> Result<Option<String>> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for source-id mapping lookup")?;
    let row = conn
        .query_opt(
            "SELECT party_id FROM party_mapping WHERE source_id = $1 LIMIT 1",
            &[&source_id],
        )
        .await
        .context("Failed to look up party by source id")?;
    Ok(row.map(|r| r.get("party_id")))
}

/// Whether any mapping rows are attached to the party.
pub async fn party_has_mappings(pool: &PgPool, party_id: &str) -> Result<bool> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for party mapping count")?;
    let row = conn
        .query_one(
            "SELECT COUNT(*) FROM party_mapping WHERE party_id = $1",
            &[&party_id],
        )
        .await
        .context("Failed to count party mappings")?;
    let count: i64 = row.get(0);
    Ok(count > 0)
}

/// Correlation row for an imported master-dataset POI, used to resolve
/// parent references during import.
pub async fn get_mapping_vm(pool: &PgPool, vm_id: i64) -> Result<Option<MappingVm>> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for mapping_vm lookup")?;
    let row = conn
        .query_opt(
            "SELECT vm_id, parent_id, party_id, name, address, lat, lng, poi_type
             FROM mapping_vm WHERE vm_id = $1",
            &[&vm_id],
        )
        .await
        .context("Failed to fetch mapping_vm")?;
    row.as_ref()
        .map(MappingVm::from_row)
        .transpose()
        .context("Malformed mapping_vm row")
}

/// Resolves a working-time expression to its stored working-hour id.
/// Correlation row for a Waze-sourced place.
pub async fn get_mapping_waze(pool: &PgPool, waze_id: &str) -> Result<Option<MappingWaze>> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for mapping_waze lookup")?;
    let row = conn
        .query_opt(
            "SELECT waze_id, party_id, name, address, lat, lng
             FROM mapping_waze WHERE waze_id = $1",
            &[&waze_id],
        )
        .await
        .context("Failed to fetch mapping_waze")?;
    Ok(row.map(|r| MappingWaze {
        waze_id: r.get("waze_id"),
        party_id: r.get("party_id"),
        name: r.get("name"),
        address: r.get("address"),
        lat: r.get("lat"),
        lng: r.get("lng"),
    }))
}

/// Whether a party originated from the master dataset. Waze-only parties
/// have no mapping_vm row and may be rebuilt from the click stream.
pub async fn get_mapping_vm_by_party_id(
    pool: &PgPool,
    party_id: &str,
) -> Result<Option<MappingVm>> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for mapping_vm party lookup")?;
    let row = conn
        .query_opt(
            "SELECT vm_id, parent_id, party_id, name, address, lat, lng, poi_type
             FROM mapping_vm WHERE party_id = $1",
            &[&party_id],
        )
        .await
        .context("Failed to fetch mapping_vm by party id")?;
    row.as_ref()
        .map(MappingVm::from_row)
        .transpose()
        .context("Malformed mapping_vm row")
}

pub async fn get_working_hour_id(pool: &PgPool, working_time: &str) -> Result<Option<uuid::Uuid>> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for working hour lookup")?;
    let row = conn
        .query_opt(
            "SELECT id FROM working_hour WHERE expression = $1",
            &[&working_time],
        )
        .await
        .context("Failed to fetch working hour")?;
    Ok(row.map(|r| r.get("id")))
}

/// One page of live flat POI records, ordered by id for a stable sweep.
pub async fn fetch_poi_page(pool: &PgPool, page: i64, page_size: i64) -> Result<Vec<Poi>> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for poi page")?;
    let rows = conn
        .query(
            "SELECT id, name, address, label, lat, lng, parent_id,
                    google_place_id, is_delete
             FROM poi WHERE NOT is_delete
             ORDER BY id LIMIT $1 OFFSET $2",
            &[&page_size, &(page * page_size)],
        )
        .await
        .context("Failed to fetch poi page")?;
    debug!("Fetched poi page {} ({} rows)", page, rows.len());
    Ok(super::collect_rows(&rows, "poi", Poi::from_row))
}

pub async fn party_exists(pool: &PgPool, party_id: &str) -> Result<bool> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for party existence check")?;
    let row = conn
        .query_one(
            "SELECT COUNT(*) FROM party WHERE id = $1",
            &[&party_id],
        )
        .await
        .context("Failed to check party existence")?;
    let count: i64 = row.get(0);
    Ok(count > 0)
}

/// Removes a party and every satellite row. Used by the delete-then-recreate
/// import path; a missing party is not an error.
pub async fn delete_party(pool: &PgPool, party_id: &str) -> Result<()> {
    let mut conn = pool
        .get()
        .await
        .context("Failed to get DB connection for party delete")?;
    let tx = conn
        .transaction()
        .await
        .context("Failed to start party delete transaction")?;

    for sql in [
        "DELETE FROM party_category WHERE party_id = $1",
        "DELETE FROM party_contact WHERE party_id = $1",
        "DELETE FROM party_evse_power WHERE party_id = $1",
        "DELETE FROM party_special WHERE party_id = $1",
        "DELETE FROM party_image WHERE party_id = $1",
        "DELETE FROM party_mapping WHERE party_id = $1",
        "DELETE FROM mapping_waze WHERE party_id = $1",
        "DELETE FROM mapping_google WHERE party_id = $1",
        "DELETE FROM poi WHERE id = $1",
        "DELETE FROM party WHERE id = $1",
    ] {
        tx.execute(sql, &[&party_id])
            .await
            .with_context(|| format!("Failed delete step for party {}", party_id))?;
    }

    tx.commit()
        .await
        .context("Failed to commit party delete transaction")?;
    debug!("Deleted party {}", party_id);
    Ok(())
}

/// Creates a party with all satellite rows and its flat search POI record.
pub async fn create_party(pool: &PgPool, party: &Party, poi: &Poi) -> Result<()> {
    let mut conn = pool
        .get()
        .await
        .context("Failed to get DB connection for party create")?;
    let tx = conn
        .transaction()
        .await
        .context("Failed to start party create transaction")?;

    tx.execute(
        "INSERT INTO party (id, party_type_id, parent_party_id, working_hour_id)
         VALUES ($1, $2, $3, $4)",
        &[
            &party.id,
            &party.party_type_id,
            &party.parent_party_id,
            &party.working_hour_id,
        ],
    )
    .await
    .with_context(|| format!("Failed to insert party {}", party.id))?;

    for category in &party.categories {
        tx.execute(
            "INSERT INTO party_category (party_id, category_id, brand_id, branch_id)
             VALUES ($1, $2, $3, $4)",
            &[
                &category.party_id,
                &category.category_id,
                &category.brand_id,
                &category.branch_id,
            ],
        )
        .await
        .context("Failed to insert party category")?;
    }

    if let Some(contact) = &party.contact {
        tx.execute(
            "INSERT INTO party_contact (party_id, tel_num, website, email)
             VALUES ($1, $2, $3, $4)",
            &[
                &contact.party_id,
                &contact.tel_num,
                &contact.website,
                &contact.email,
            ],
        )
        .await
        .context("Failed to insert party contact")?;
    }

    for power in &party.evse_powers {
        tx.execute(
            "INSERT INTO party_evse_power (id, party_id, power_type, total_evse)
             VALUES ($1, $2, $3, $4)",
            &[&power.id, &power.party_id, &power.power_type, &power.total_evse],
        )
        .await
        .context("Failed to insert party evse power")?;
    }

    if let Some(special) = &party.special {
        tx.execute(
            "INSERT INTO party_special (party_id, special) VALUES ($1, $2)",
            &[&special.party_id, &special.special],
        )
        .await
        .context("Failed to insert party special")?;
    }

    for mapping in &party.mappings {
        tx.execute(
            "INSERT INTO party_mapping (party_id, source, source_id)
             VALUES ($1, $2, $3)
             ON CONFLICT (source, source_id) DO UPDATE SET party_id = EXCLUDED.party_id",
            &[&mapping.party_id, &mapping.source.as_str(), &mapping.source_id],
        )
        .await
        .context("Failed to insert party mapping")?;
    }

    tx.execute(
        "INSERT INTO poi (id, name, address, label, lat, lng, parent_id,
                          google_place_id, is_delete)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        &[
            &poi.id,
            &poi.name,
            &poi.address,
            &poi.label,
            &poi.lat,
            &poi.lng,
            &poi.parent_id,
            &poi.google_place_id,
            &poi.is_delete,
        ],
    )
    .await
    .with_context(|| format!("Failed to insert poi for party {}", party.id))?;

    tx.commit()
        .await
        .context("Failed to commit party create transaction")?;
    debug!("Created party {}", party.id);
    Ok(())
}

/// Attaches one more external id to an existing party.
pub async fn add_party_mapping(pool: &PgPool, mapping: &PartyMapping) -> Result<u64> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for party mapping insert")?;
    conn.execute(
        "INSERT INTO party_mapping (party_id, source, source_id)
         VALUES ($1, $2, $3)
         ON CONFLICT (source, source_id) DO UPDATE SET party_id = EXCLUDED.party_id",
        &[&mapping.party_id, &mapping.source.as_str(), &mapping.source_id],
    )
    .await
    .context("Failed to add party mapping")
}

/// Applies a partial enrichment update. Only the populated collections are
/// replaced; `None` leaves the stored rows untouched.
pub async fn update_party_partial(pool: &PgPool, update: &UpdatePartyData) -> Result<()> {
    let mut conn = pool
        .get()
        .await
        .context("Failed to get DB connection for party partial update")?;
    let tx = conn
        .transaction()
        .await
        .context("Failed to start party partial update transaction")?;

    if let Some(powers) = &update.evse_powers {
        tx.execute(
            "DELETE FROM party_evse_power WHERE party_id = $1",
            &[&update.party_id],
        )
        .await
        .context("Failed to clear party evse powers")?;
        for power in powers {
            tx.execute(
                "INSERT INTO party_evse_power (id, party_id, power_type, total_evse)
                 VALUES ($1, $2, $3, $4)",
                &[&power.id, &power.party_id, &power.power_type, &power.total_evse],
            )
            .await
            .context("Failed to insert replacement evse power")?;
        }
    }

    if let Some(images) = &update.images {
        tx.execute(
            "DELETE FROM party_image WHERE party_id = $1",
            &[&update.party_id],
        )
        .await
        .context("Failed to clear party images")?;
        for image in images {
            tx.execute(
                "INSERT INTO party_image (party_id, name, image_url)
                 VALUES ($1, $2, $3)",
                &[&image.party_id, &image.name, &image.image_url],
            )
            .await
            .context("Failed to insert replacement party image")?;
        }
    }

    if let Some(rating) = &update.rating {
        tx.execute(
            "UPDATE poi SET average_rating = $1, total_reviews = $2 WHERE id = $3",
            &[&rating.average_rating, &rating.total_reviews, &update.party_id],
        )
        .await
        .context("Failed to update poi rating")?;
    }

    tx.commit()
        .await
        .context("Failed to commit party partial update transaction")?;
    Ok(())
}

// Flat correlation rows consumed by downstream reporting.

pub async fn upsert_mapping_vm(pool: &PgPool, mapping: &MappingVm) -> Result<u64> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for mapping_vm upsert")?;
    conn.execute(
        "INSERT INTO mapping_vm (vm_id, parent_id, party_id, name, address, lat, lng, poi_type)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (vm_id) DO UPDATE SET
             parent_id = EXCLUDED.parent_id,
             party_id = EXCLUDED.party_id,
             name = EXCLUDED.name,
             address = EXCLUDED.address,
             lat = EXCLUDED.lat,
             lng = EXCLUDED.lng,
             poi_type = EXCLUDED.poi_type",
        &[
            &mapping.vm_id,
            &mapping.parent_id,
            &mapping.party_id,
            &mapping.name,
            &mapping.address,
            &mapping.lat,
            &mapping.lng,
            &mapping.poi_type,
        ],
    )
    .await
    .context("Failed to upsert mapping_vm")
}

pub async fn upsert_mapping_waze(pool: &PgPool, mapping: &MappingWaze) -> Result<u64> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for mapping_waze upsert")?;
    conn.execute(
        "INSERT INTO mapping_waze (waze_id, party_id, name, address, lat, lng)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (waze_id) DO UPDATE SET
             party_id = EXCLUDED.party_id,
             name = EXCLUDED.name,
             address = EXCLUDED.address,
             lat = EXCLUDED.lat,
             lng = EXCLUDED.lng",
        &[
            &mapping.waze_id,
            &mapping.party_id,
            &mapping.name,
            &mapping.address,
            &mapping.lat,
            &mapping.lng,
        ],
    )
    .await
    .context("Failed to upsert mapping_waze")
}

pub async fn upsert_mapping_google(pool: &PgPool, mapping: &MappingGoogle) -> Result<u64> {
    let conn = pool
        .get()
        .await
        .context("Failed to get DB connection for mapping_google upsert")?;
    conn.execute(
        "INSERT INTO mapping_google (google_place_id, party_id, name, address, lat, lng)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (google_place_id) DO UPDATE SET
             party_id = EXCLUDED.party_id,
             name = EXCLUDED.name,
             address = EXCLUDED.address,
             lat = EXCLUDED.lat,
             lng = EXCLUDED.lng",
        &[
            &mapping.google_place_id,
            &mapping.party_id,
            &mapping.name,
            &mapping.address,
            &mapping.lat,
            &mapping.lng,
        ],
    )
    .await
    .context("Failed to upsert mapping_google")
}
