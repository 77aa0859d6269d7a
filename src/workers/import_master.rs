// src/workers/import_master.rs
//
// Master-dataset import: rebuilds the canonical party for every raw POI.
// Parents are swept before children so affiliation references resolve, and
// each record is processed in isolation: one bad POI records an error status
// and the sweep moves on.

use anyhow::{Context, Result};
use futures::future::join_all;
use log::{error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex, Semaphore};
use uuid::Uuid;

use crate::config::{AppConfig, MappingTables};
use crate::db::PgPool;
use crate::models::{
    party_id_for_vm, fresh_party_id, AdminArea, ImportErrorKind, ImportStatus, MappingVm, Party,
    PartyCategory, PartyContact, PartyEvsePower, PartyMapping, PartySource, PartySpecial, Poi,
    PlaceMappingTracking, RawPoi, VinfastStationMapping, GOOGLE_PLACES_PREFIX, VENUES_PREFIX,
};
use crate::results::{self, PassOutcome, PassStats};
use crate::store::raw_poi::PoiScope;
use crate::store::{google_raw, party, raw_poi, vinfast};

pub const PASS_NAME: &str = "ImportMasterPois";

/// Fallback when a raw record carries no usable working time.
const DEFAULT_WORKING_TIME: &str = "T2-CN:0000-2400";

// Fixed ability-POI categories generated from the specials field.
const FOOD_CATEGORY_ID: Uuid = Uuid::from_u128(0xc1736e3f_0fc0_4b15_afd4_31b3bdc1edf9);
const TOILET_CATEGORY_ID: Uuid = Uuid::from_u128(0xd0d11857_f175_49b4_ac07_3058d53184a6);

pub async fn run(
    pool: &PgPool,
    config: &AppConfig,
    tables: &MappingTables,
    cancel: watch::Receiver<bool>,
) -> Result<PassOutcome> {
    info!("Starting master dataset import");
    let statuses: Arc<Mutex<Vec<ImportStatus>>> = Arc::new(Mutex::new(Vec::new()));
    let mut stats = PassStats::default();

    // Parents first: children reference their party ids.
    for scope in [PoiScope::Parents, PoiScope::Children] {
        sweep(pool, config, tables, &cancel, scope, &statuses, &mut stats).await?;
    }

    let statuses = statuses.lock().await;
    let summary = results::summarize(PASS_NAME, &statuses);
    info!(
        "{} done: {} total, {} added, {} updated, {} ignored, {} errors ({} pages in {:.1?})",
        PASS_NAME,
        summary.total,
        summary.total_added_new,
        summary.total_updated,
        summary.total_ignored,
        summary.total_error,
        stats.pages,
        stats.elapsed
    );
    raw_poi::insert_import_summary(pool, &summary).await?;
    Ok(PassOutcome::from_summary(&summary))
}

async fn sweep(
    pool: &PgPool,
    config: &AppConfig,
    tables: &MappingTables,
    cancel: &watch::Receiver<bool>,
    scope: PoiScope,
    statuses: &Arc<Mutex<Vec<ImportStatus>>>,
    stats: &mut PassStats,
) -> Result<()> {
    let semaphore = Arc::new(Semaphore::new(config.concurrency));
    let mut page = 0i64;

    loop {
        if *cancel.borrow() {
            warn!("Import cancelled before page {}", page);
            break;
        }
        let started = Instant::now();
        let pois = raw_poi::fetch_page(pool, scope, page, config.page_size).await?;
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
                .context("Import semaphore closed")?;
            let pool = pool.clone();
            let tables = tables.clone();
            raw_ids.push(poi.id.clone());
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                process_raw_poi(&pool, &tables, poi).await
            }));
        }

        for (raw_id, result) in raw_ids.iter().zip(join_all(handles).await) {
            let status = match result {
                Ok(status) => status,
                Err(e) => {
                    error!("Import task for {} panicked: {}", raw_id, e);
                    ImportStatus::error(raw_id, ImportErrorKind::UnhandledError)
                }
            };
            raw_poi::set_import_status(pool, &status).await?;
            statuses.lock().await.push(status);
        }

        stats.record_page(fetched, started.elapsed());
        info!("Imported {:?} page {} ({} records)", scope, page, fetched);
        page += 1;
    }
    Ok(())
}

async fn process_raw_poi(pool: &PgPool, tables: &MappingTables, poi: RawPoi) -> ImportStatus {
    match import_one(pool, tables, &poi).await {
        Ok(status) => status,
        Err(e) => {
            error!(
                "Import failed for vm {} ({}): {:#}",
                poi.vm_id, poi.name, e
            );
            ImportStatus::error(&poi.id, ImportErrorKind::UnhandledError)
        }
    }
}

async fn import_one(pool: &PgPool, tables: &MappingTables, poi: &RawPoi) -> Result<ImportStatus> {
    // Parent party must already exist; children are swept after parents.
    let parent_mapping = if poi.vm_parent_id > 0 {
        match party::get_mapping_vm(pool, poi.vm_parent_id).await? {
            Some(mapping) => Some(mapping),
            None => return Ok(ImportStatus::error(&poi.id, ImportErrorKind::NotFoundParent)),
        }
    } else {
        None
    };

    let (category_id, category_code) = match tables.category_for(&poi.cat_ids) {
        Some(mapping) => (mapping.category_id, mapping.code.clone()),
        None => (tables.default_category_id, String::new()),
    };
    let brand_id = tables.brand_for(&poi.chain_name);
    let branch_id = brand_id.and_then(|_| tables.branch_for(&poi.branch_name));

    let working_time = if poi.working_time.trim().is_empty() {
        DEFAULT_WORKING_TIME
    } else {
        poi.working_time.as_str()
    };
    let working_hour_id = party::get_working_hour_id(pool, working_time).await?;

    // Deterministic id: re-imports replace the previous party wholesale.
    let party_id = party_id_for_vm(poi.vm_id);
    let existed = party::party_exists(pool, &party_id).await?;
    party::delete_party(pool, &party_id).await?;

    let mut new_party = Party::new(&party_id);
    new_party.working_hour_id = working_hour_id;
    new_party.parent_party_id = parent_mapping.as_ref().map(|m| m.party_id.clone());
    new_party.categories.push(PartyCategory {
        party_id: party_id.clone(),
        category_id,
        brand_id,
        branch_id,
    });
    if let Some(convenience) = convenience_category_id(tables, &category_code) {
        new_party.categories.push(PartyCategory {
            party_id: party_id.clone(),
            category_id: convenience,
            brand_id: None,
            branch_id: None,
        });
    }

    if !poi.phones.is_empty() || !poi.websites.is_empty() || !poi.emails.is_empty() {
        new_party.contact = Some(PartyContact {
            party_id: party_id.clone(),
            tel_num: poi.phones.first().cloned().unwrap_or_default(),
            website: poi.websites.first().cloned().unwrap_or_default(),
            email: poi.emails.first().cloned().unwrap_or_default(),
        });
    }

    apply_specials(&mut new_party, poi, &category_code);

    let address = augment_address(
        poi.address.as_deref().unwrap_or_default(),
        poi.admin.as_ref(),
    );

    // Tracking row: create a fresh one flagged for matching, or attach the
    // party id to the existing one.
    let tracking = match google_raw::get_place_tracking(pool, poi.vm_id).await? {
        Some(mut tracking) => {
            tracking.vml_id = party_id.clone();
            google_raw::upsert_place_tracking(pool, &tracking).await?;
            Some(tracking)
        }
        None => {
            let mut tracking = PlaceMappingTracking::from_raw_poi(poi);
            tracking.is_rerun_gg_search = true;
            tracking.search_text = address.clone();
            google_raw::upsert_place_tracking(pool, &tracking).await?;
            None
        }
    };

    if is_vinfast_charging_station(&category_code, &poi.chain_name)
        && vinfast::get_station_mapping(pool, &party_id).await?.is_none()
    {
        let seed = VinfastStationMapping {
            vml_id: party_id.clone(),
            vm_name: poi.name.clone(),
            vm_address: poi.address.clone().unwrap_or_default(),
            vm_lat: poi.lat,
            vm_lng: poi.lng,
            ..Default::default()
        };
        vinfast::upsert_station_mapping(pool, &seed).await?;
    }

    let gg_place_id = resolved_place_id(tracking.as_ref());

    new_party.mappings.push(PartyMapping {
        party_id: party_id.clone(),
        source: PartySource::Vml,
        source_id: party_id.clone(),
    });
    if let Some(tracking) = &tracking {
        if tracking.gg_is_valid && !tracking.gg_place_id.trim().is_empty() {
            if !tracking.search_method.is_empty() {
                // Matched through autocomplete: the id lives in the Waze
                // namespace, with the venue alias when one was resolved.
                new_party.mappings.push(PartyMapping {
                    party_id: party_id.clone(),
                    source: PartySource::Vm,
                    source_id: tracking.gg_place_id.clone(),
                });
                if let Some(venue) = &tracking.venue_mapping {
                    if !venue.google_place_id.is_empty() {
                        new_party.mappings.push(PartyMapping {
                            party_id: party_id.clone(),
                            source: PartySource::Waze,
                            source_id: format!(
                                "{}{}",
                                GOOGLE_PLACES_PREFIX, venue.google_place_id
                            ),
                        });
                    }
                }
            } else {
                new_party.mappings.push(PartyMapping {
                    party_id: party_id.clone(),
                    source: PartySource::Google,
                    source_id: tracking.gg_place_id.clone(),
                });
            }
        }
    }

    let full_name = poi.full_name.clone().unwrap_or_default();
    let new_poi = Poi {
        id: party_id.clone(),
        name: full_name.clone(),
        address: address.clone(),
        label: format!("{}, {}", full_name, poi.address.as_deref().unwrap_or_default()),
        lat: poi.lat,
        lng: poi.lng,
        parent_id: parent_mapping
            .as_ref()
            .map(|m| m.party_id.clone())
            .unwrap_or_default(),
        google_place_id: gg_place_id.clone(),
        is_delete: poi.status.to_uppercase() == "DELETE",
    };

    party::create_party(pool, &new_party, &new_poi).await?;
    party::upsert_mapping_vm(
        pool,
        &MappingVm {
            vm_id: poi.vm_id,
            parent_id: poi.vm_parent_id,
            party_id: party_id.clone(),
            name: full_name,
            address: poi.address.clone().unwrap_or_default(),
            lat: poi.lat,
            lng: poi.lng,
            poi_type: poi.cat_ids.clone(),
        },
    )
    .await?;
    if !gg_place_id.is_empty() {
        raw_poi::set_gg_place_id(pool, &poi.id, &gg_place_id).await?;
    }

    create_ability_pois(pool, poi, &party_id).await?;

    if existed {
        Ok(ImportStatus::updated(&poi.id, "replaced existing party"))
    } else {
        Ok(ImportStatus::success(&poi.id))
    }
}

/// Rest stops always expose food and toilets regardless of what the raw
/// specials say.
const REST_STOP_CAT_IDS: &str = "3001";
const REST_STOP_SPECIALS: &str = "Ăn Uống,Vệ Sinh";

/// Generates standalone child POIs for the abilities listed in the specials
/// field (food, toilets, parking). Unknown specials are skipped.
async fn create_ability_pois(pool: &PgPool, poi: &RawPoi, parent_party_id: &str) -> Result<()> {
    let specials = if poi.cat_ids == REST_STOP_CAT_IDS {
        REST_STOP_SPECIALS.to_string()
    } else {
        poi.specials.clone()
    };

    for special in specials.split(',').map(str::trim) {
        let (category_id, name) = match special {
            "Ăn Uống" => (FOOD_CATEGORY_ID, "Điểm ăn uống"),
            "Vệ Sinh" | "Nhà Vệ Sinh" => (TOILET_CATEGORY_ID, "Nhà vệ sinh"),
            "Đỗ Xe" => (ABILITY_PARKING_CATEGORY_ID, "Bãi đỗ xe"),
            _ => continue,
        };

        let child_id = fresh_party_id();
        let mut child = Party::new(&child_id);
        child.parent_party_id = Some(parent_party_id.to_string());
        child.categories.push(PartyCategory {
            party_id: child_id.clone(),
            category_id,
            brand_id: None,
            branch_id: None,
        });

        let child_poi = Poi {
            id: child_id.clone(),
            name: name.to_string(),
            address: poi.address.clone().unwrap_or_default(),
            label: String::new(),
            lat: poi.lat,
            lng: poi.lng,
            parent_id: parent_party_id.to_string(),
            google_place_id: String::new(),
            is_delete: false,
        };
        party::create_party(pool, &child, &child_poi).await?;
    }
    Ok(())
}

const ABILITY_PARKING_CATEGORY_ID: Uuid =
    Uuid::from_u128(0x22f84f8c_d69c_4eea_bec0_dfe087c5b574);

fn convenience_category_id(tables: &MappingTables, category_code: &str) -> Option<Uuid> {
    match category_code {
        "ChargingStation" => Some(tables.charging_station_category_id),
        "GasStation" => Some(tables.gas_station_category_id),
        "Parking" => Some(tables.parking_category_id),
        _ => None,
    }
}

fn is_vinfast_charging_station(category_code: &str, chain_name: &str) -> bool {
    category_code == "ChargingStation" && chain_name.eq_ignore_ascii_case("vinfast")
}

/// EVSE powers and gas-station specials derived from the raw specials field.
/// VinFast chargers are skipped here; their powers come from the station API.
fn apply_specials(party: &mut Party, poi: &RawPoi, category_code: &str) {
    if poi.specials.is_empty() {
        return;
    }
    match category_code {
        "ChargingStation" => {
            if !poi.chain_name.eq_ignore_ascii_case("vinfast") {
                for (power_type, total_evse) in evse_powers_from_special(&poi.specials) {
                    party.evse_powers.push(PartyEvsePower {
                        id: Uuid::new_v4(),
                        party_id: party.id.clone(),
                        power_type,
                        total_evse,
                    });
                }
            }
        }
        "GasStation" => {
            if let Some(special) = gas_station_special(&poi.specials) {
                party.special = Some(PartySpecial {
                    party_id: party.id.clone(),
                    special,
                });
            }
        }
        _ => {}
    }
}

/// Parses `EV=<vendor>,<type>[/<type>...],<count>` specials into
/// `(power_type_watts, total_evse)` pairs. A single connector type keeps the
/// station count; multiple types share it and report zero each.
fn evse_powers_from_special(special: &str) -> Vec<(i32, i32)> {
    let payload = match special.strip_prefix("EV=") {
        Some(payload) => payload,
        None => return Vec::new(),
    };
    let parts: Vec<&str> = payload.split(',').collect();
    if parts.len() < 2 {
        return Vec::new();
    }
    let types: Vec<&str> = parts[1].split('/').collect();
    let total: i32 = parts.get(2).and_then(|t| t.trim().parse().ok()).unwrap_or(0);

    if types.len() == 1 {
        vec![(evse_power_type(types[0]), total)]
    } else {
        types.iter().map(|t| (evse_power_type(t), 0)).collect()
    }
}

static POWER_LABEL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(AC|DC)(\d+)").expect("valid power label regex"));

/// `AC<kW>` / `DC<kW>` connector labels, converted to watts. Anything else
/// is logged and mapped to zero.
fn evse_power_type(raw: &str) -> i32 {
    if let Some(caps) = POWER_LABEL_RE.captures(raw.trim()) {
        if let Ok(kw) = caps[2].parse::<i32>() {
            return kw * 1000;
        }
    }
    error!("Cannot convert power type {}", raw);
    0
}

/// Keeps only the fuel-grade entries of a gas-station specials list.
fn gas_station_special(special: &str) -> Option<String> {
    let fuels: Vec<&str> = special
        .split(',')
        .filter(|s| s.contains("Xăng") || s.contains("Do"))
        .collect();
    if fuels.is_empty() {
        None
    } else {
        Some(fuels.join(","))
    }
}

/// Appends the administrative area names to the street address, widening the
/// search text used for matching.
fn augment_address(address: &str, admin: Option<&AdminArea>) -> String {
    let mut suffix = String::new();
    if let Some(admin) = admin {
        for part in [&admin.ward, &admin.district, &admin.city] {
            if let Some(name) = part {
                if !name.trim().is_empty() {
                    suffix.push_str(", ");
                    suffix.push_str(name.trim());
                }
            }
        }
    }
    if suffix.is_empty() {
        address.to_string()
    } else if address.is_empty() {
        suffix[2..].to_string()
    } else {
        format!("{} {}", address, suffix)
    }
}

/// The google place id a valid tracking row contributes to the POI record,
/// with `venues.*` ids remapped through the stored venue mapping.
fn resolved_place_id(tracking: Option<&PlaceMappingTracking>) -> String {
    let tracking = match tracking {
        Some(t) if t.gg_is_valid && !t.gg_place_id.trim().is_empty() => t,
        _ => return String::new(),
    };
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
    use crate::models::VenueMapping;

    #[test]
    fn test_evse_powers_single_type_keeps_count() {
        let powers = evse_powers_from_special("EV=VinBus,AC11,4");
        assert_eq!(powers, vec![(11_000, 4)]);
    }

    #[test]
    fn test_evse_powers_multiple_types_share_station() {
        let powers = evse_powers_from_special("EV=Other,AC22/DC60,6");
        assert_eq!(powers, vec![(22_000, 0), (60_000, 0)]);
    }

    #[test]
    fn test_evse_powers_rejects_malformed() {
        assert!(evse_powers_from_special("no prefix").is_empty());
        assert!(evse_powers_from_special("EV=onlyvendor").is_empty());
        // unknown connector label maps to zero watts
        assert_eq!(evse_powers_from_special("EV=x,USB5,2"), vec![(0, 2)]);
    }

    #[test]
    fn test_evse_power_type_parses_kilowatts() {
        assert_eq!(evse_power_type("AC11"), 11_000);
        assert_eq!(evse_power_type("DC150kW"), 150_000);
        assert_eq!(evse_power_type("11AC"), 0);
    }

    #[test]
    fn test_gas_station_special_filters_fuel_entries() {
        assert_eq!(
            gas_station_special("Xăng 95,Rửa xe,Do 0.05S"),
            Some("Xăng 95,Do 0.05S".to_string())
        );
        assert_eq!(gas_station_special("Rửa xe,Cafe"), None);
    }

    #[test]
    fn test_augment_address() {
        let admin = AdminArea {
            country: Some("Việt Nam".to_string()),
            city: Some("Hà Nội".to_string()),
            district: Some("Hoàn Kiếm".to_string()),
            ward: None,
        };
        assert_eq!(
            augment_address("12 Hàng Bài", Some(&admin)),
            "12 Hàng Bài , Hoàn Kiếm, Hà Nội"
        );
        // empty street address drops the leading separator
        assert_eq!(augment_address("", Some(&admin)), "Hoàn Kiếm, Hà Nội");
        assert_eq!(augment_address("12 Hàng Bài", None), "12 Hàng Bài");
    }

    #[test]
    fn test_resolved_place_id_remaps_venues() {
        let mut tracking = PlaceMappingTracking {
            gg_is_valid: true,
            gg_place_id: "venues.123".to_string(),
            venue_mapping: Some(VenueMapping {
                id: "123".to_string(),
                google_place_id: "ChIJabc".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(resolved_place_id(Some(&tracking)), "googlePlaces.ChIJabc");

        tracking.venue_mapping = None;
        assert_eq!(resolved_place_id(Some(&tracking)), "venues.123");

        tracking.gg_is_valid = false;
        assert_eq!(resolved_place_id(Some(&tracking)), "");
        assert_eq!(resolved_place_id(None), "");
    }

    #[test]
    fn test_vinfast_detection_is_case_insensitive() {
        assert!(is_vinfast_charging_station("ChargingStation", "VinFast"));
        assert!(is_vinfast_charging_station("ChargingStation", "VINFAST"));
        assert!(!is_vinfast_charging_station("GasStation", "VinFast"));
        assert!(!is_vinfast_charging_station("ChargingStation", "Tesla"));
    }
}
