// src/models.rs
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_postgres::Row as PgRow;
use uuid::Uuid;

/// Outcome recorded against a single raw record after a processing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStatusKind {
    Success,
    Updated,
    Ignored,
    Error,
}

impl ImportStatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatusKind::Success => "Success",
            ImportStatusKind::Updated => "Updated",
            ImportStatusKind::Ignored => "Ignored",
            ImportStatusKind::Error => "Error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Success" => Some(ImportStatusKind::Success),
            "Updated" => Some(ImportStatusKind::Updated),
            "Ignored" => Some(ImportStatusKind::Ignored),
            "Error" => Some(ImportStatusKind::Error),
            _ => None,
        }
    }
}

/// Categorized per-record failure reasons. A record-level error never aborts
/// the page it belongs to; it is recorded here and the sweep moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportErrorKind {
    NotFoundCategory,
    NotFoundParent,
    UnhandledError,
}

impl ImportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportErrorKind::NotFoundCategory => "NotFoundCategory",
            ImportErrorKind::NotFoundParent => "NotFoundParent",
            ImportErrorKind::UnhandledError => "UnHandleError",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportStatus {
    pub id: String,
    pub status: ImportStatusKind,
    pub msg: String,
}

impl ImportStatus {
    pub fn success(id: &str) -> Self {
        ImportStatus {
            id: id.to_string(),
            status: ImportStatusKind::Success,
            msg: String::new(),
        }
    }

    pub fn updated(id: &str, msg: &str) -> Self {
        ImportStatus {
            id: id.to_string(),
            status: ImportStatusKind::Updated,
            msg: msg.to_string(),
        }
    }

    pub fn ignored(id: &str, msg: &str) -> Self {
        ImportStatus {
            id: id.to_string(),
            status: ImportStatusKind::Ignored,
            msg: msg.to_string(),
        }
    }

    pub fn error(id: &str, kind: ImportErrorKind) -> Self {
        ImportStatus {
            id: id.to_string(),
            status: ImportStatusKind::Error,
            msg: kind.as_str().to_string(),
        }
    }
}

/// Administrative area attached to a raw POI, used to widen search text when
/// the exact address fails to match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminArea {
    pub country: Option<String>,
    pub city: Option<String>,
    pub district: Option<String>,
    pub ward: Option<String>,
}

/// One record of the internal master POI dataset. Populated by an external
/// raw-loading process; the orchestrator only writes back `gg_place_id` and
/// the per-run import status.
#[derive(Debug, Clone)]
pub struct RawPoi {
    pub id: String,
    pub vm_id: i64,
    pub vm_parent_id: i64,
    pub name: String,
    pub short_name: String,
    pub full_name: Option<String>,
    pub alt_name: String,
    pub address: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub cat_ids: String,
    pub cat_name: String,
    pub chain_name: String,
    pub branch_name: String,
    pub phones: Vec<String>,
    pub emails: Vec<String>,
    pub websites: Vec<String>,
    pub specials: String,
    pub working_time: String,
    pub status: String,
    pub gg_place_id: String,
    pub admin: Option<AdminArea>,
}

impl RawPoi {
    pub fn from_row(row: &PgRow) -> Result<Self, tokio_postgres::Error> {
        let admin: Option<serde_json::Value> = row.try_get("admin")?;
        Ok(RawPoi {
            id: row.try_get("id")?,
            vm_id: row.try_get("vm_id")?,
            vm_parent_id: row.try_get("vm_parent_id")?,
            name: row.try_get("name")?,
            short_name: row.try_get("short_name")?,
            full_name: row.try_get("full_name")?,
            alt_name: row.try_get("alt_name")?,
            address: row.try_get("address")?,
            lat: row.try_get("lat")?,
            lng: row.try_get("lng")?,
            cat_ids: row.try_get("cat_ids")?,
            cat_name: row.try_get("cat_name")?,
            chain_name: row.try_get("chain_name")?,
            branch_name: row.try_get("branch_name")?,
            phones: row.try_get("phones")?,
            emails: row.try_get("emails")?,
            websites: row.try_get("websites")?,
            specials: row.try_get("specials")?,
            working_time: row.try_get("working_time")?,
            status: row.try_get("status")?,
            gg_place_id: row.try_get("gg_place_id")?,
            admin: admin.and_then(|v| serde_json::from_value(v).ok()),
        })
    }
}

/// Alternate google place id recovered for a `venues.*` identifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VenueMapping {
    pub id: String,
    pub google_place_id: String,
    pub lat: f64,
    pub lng: f64,
    pub distance_meters: f64,
}

/// Durable record of the best-known Google match for one internal POI.
/// At most one row per `vm_id`; mutated on every re-evaluation, never deleted.
#[derive(Debug, Clone, Default)]
pub struct PlaceMappingTracking {
    pub vm_id: i64,
    pub vm_parent_id: i64,
    pub vm_name: String,
    pub vm_short_name: String,
    pub vm_full_name: String,
    pub vm_alter_name: String,
    pub vm_address: String,
    pub vm_cat_id: String,
    pub vm_latitude: f64,
    pub vm_longitude: f64,
    pub vml_id: String,
    pub gg_place_id: String,
    pub gg_is_valid: bool,
    pub gg_name: String,
    pub gg_address: String,
    pub gg_lat: f64,
    pub gg_lng: f64,
    pub gg_distance: f64,
    pub gg_category_name: String,
    pub search_method: String,
    pub search_text: String,
    pub venue_mapping: Option<VenueMapping>,
    pub is_ignore_mapping: bool,
    pub is_rerun_gg_search: bool,
    pub created_date: i64,
    pub last_modified: i64,
}

impl PlaceMappingTracking {
    /// Snapshot of a raw POI for a brand-new tracking row; the Google side is
    /// left empty until a match attempt runs.
    pub fn from_raw_poi(poi: &RawPoi) -> Self {
        PlaceMappingTracking {
            vm_id: poi.vm_id,
            vm_parent_id: poi.vm_parent_id,
            vm_name: poi.name.clone(),
            vm_short_name: poi.short_name.clone(),
            vm_full_name: poi.full_name.clone().unwrap_or_default(),
            vm_alter_name: poi.alt_name.clone(),
            vm_address: poi.address.clone().unwrap_or_default(),
            vm_cat_id: poi.cat_ids.clone(),
            vm_latitude: poi.lat,
            vm_longitude: poi.lng,
            ..Default::default()
        }
    }

    pub fn from_row(row: &PgRow) -> Result<Self, tokio_postgres::Error> {
        let venue_mapping: Option<serde_json::Value> = row.try_get("venue_mapping")?;
        Ok(PlaceMappingTracking {
            vm_id: row.try_get("vm_id")?,
            vm_parent_id: row.try_get("vm_parent_id")?,
            vm_name: row.try_get("vm_name")?,
            vm_short_name: row.try_get("vm_short_name")?,
            vm_full_name: row.try_get("vm_full_name")?,
            vm_alter_name: row.try_get("vm_alter_name")?,
            vm_address: row.try_get("vm_address")?,
            vm_cat_id: row.try_get("vm_cat_id")?,
            vm_latitude: row.try_get("vm_latitude")?,
            vm_longitude: row.try_get("vm_longitude")?,
            vml_id: row.try_get("vml_id")?,
            gg_place_id: row.try_get("gg_place_id")?,
            gg_is_valid: row.try_get("gg_is_valid")?,
            gg_name: row.try_get("gg_name")?,
            gg_address: row.try_get("gg_address")?,
            gg_lat: row.try_get("gg_lat")?,
            gg_lng: row.try_get("gg_lng")?,
            gg_distance: row.try_get("gg_distance")?,
            gg_category_name: row.try_get("gg_category_name")?,
            search_method: row.try_get("search_method")?,
            search_text: row.try_get("search_text")?,
            venue_mapping: venue_mapping.and_then(|v| serde_json::from_value(v).ok()),
            is_ignore_mapping: row.try_get("is_ignore_mapping")?,
            is_rerun_gg_search: row.try_get("is_rerun_gg_search")?,
            created_date: row.try_get("created_date")?,
            last_modified: row.try_get("last_modified")?,
        })
    }

    /// Whether the matching passes should still examine this row. Ignored
    /// rows are skipped unless explicitly flagged for another search; the
    /// flag also forces a re-match of rows already holding a valid google id.
    pub fn needs_gg_search(&self) -> bool {
        !self.is_ignore_mapping || self.is_rerun_gg_search
    }

    /// Overwrites the Google-side fields from an accepted match.
    pub fn apply_match(&mut self, candidate: &Candidate, distance_meters: f64, valid: bool) {
        self.gg_place_id = candidate.place_id.clone();
        self.gg_name = candidate.name.clone();
        self.gg_address = candidate.address.clone();
        self.gg_lat = candidate.lat;
        self.gg_lng = candidate.lng;
        self.gg_distance = distance_meters;
        self.gg_category_name = candidate.category_name.clone().unwrap_or_default();
        self.gg_is_valid = valid;
    }

    /// Clears the Google side after a crawl returned nothing usable.
    pub fn clear_match(&mut self) {
        self.gg_place_id = String::new();
        self.gg_name = String::new();
        self.gg_address = String::new();
        self.gg_lat = 0.0;
        self.gg_lng = 0.0;
        self.gg_distance = 0.0;
        self.gg_category_name = String::new();
        self.gg_is_valid = false;
    }
}

/// Parallel tracking record keyed by an external Waze id rather than an
/// internal one. `vml_id` back-references the party once one is assigned;
/// a party may accumulate several waze ids but never the reverse.
#[derive(Debug, Clone, Default)]
pub struct WazeMappingTracking {
    pub waze_id: String,
    pub waze_alter_id: String,
    pub waze_name: String,
    pub waze_address: String,
    pub waze_latitude: f64,
    pub waze_longitude: f64,
    pub vml_id: String,
    pub gg_place_id: String,
    pub gg_is_valid: bool,
    pub gg_name: String,
    pub gg_address: String,
    pub gg_lat: f64,
    pub gg_lng: f64,
    pub gg_distance: f64,
    pub gg_category_name: String,
    pub search_method: String,
    pub search_text: String,
    pub is_ignore_mapping: bool,
    pub is_rerun_gg_search: bool,
    pub created_date: i64,
    pub last_modified: i64,
}

impl WazeMappingTracking {
    pub fn from_row(row: &PgRow) -> Result<Self, tokio_postgres::Error> {
        Ok(WazeMappingTracking {
            waze_id: row.try_get("waze_id")?,
            waze_alter_id: row.try_get("waze_alter_id")?,
            waze_name: row.try_get("waze_name")?,
            waze_address: row.try_get("waze_address")?,
            waze_latitude: row.try_get("waze_latitude")?,
            waze_longitude: row.try_get("waze_longitude")?,
            vml_id: row.try_get("vml_id")?,
            gg_place_id: row.try_get("gg_place_id")?,
            gg_is_valid: row.try_get("gg_is_valid")?,
            gg_name: row.try_get("gg_name")?,
            gg_address: row.try_get("gg_address")?,
            gg_lat: row.try_get("gg_lat")?,
            gg_lng: row.try_get("gg_lng")?,
            gg_distance: row.try_get("gg_distance")?,
            gg_category_name: row.try_get("gg_category_name")?,
            search_method: row.try_get("search_method")?,
            search_text: row.try_get("search_text")?,
            is_ignore_mapping: row.try_get("is_ignore_mapping")?,
            is_rerun_gg_search: row.try_get("is_rerun_gg_search")?,
            created_date: row.try_get("created_date")?,
            last_modified: row.try_get("last_modified")?,
        })
    }
}

/// Mapping from a canonical party to a VinFast charging-station location.
/// `vm_is_valid` may only be true when `vm_distance` < 400 meters.
#[derive(Debug, Clone, Default)]
pub struct VinfastStationMapping {
    pub vml_id: String,
    pub location_id: String,
    pub station_name: String,
    pub station_address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub vm_name: String,
    pub vm_address: String,
    pub vm_lat: f64,
    pub vm_lng: f64,
    pub vm_distance: f64,
    pub vm_is_valid: bool,
    pub created_date: i64,
    pub last_modified: i64,
}

impl VinfastStationMapping {
    pub fn from_row(row: &PgRow) -> Result<Self, tokio_postgres::Error> {
        Ok(VinfastStationMapping {
            vml_id: row.try_get("vml_id")?,
            location_id: row.try_get("location_id")?,
            station_name: row.try_get("station_name")?,
            station_address: row.try_get("station_address")?,
            latitude: row.try_get("latitude")?,
            longitude: row.try_get("longitude")?,
            vm_name: row.try_get("vm_name")?,
            vm_address: row.try_get("vm_address")?,
            vm_lat: row.try_get("vm_lat")?,
            vm_lng: row.try_get("vm_lng")?,
            vm_distance: row.try_get("vm_distance")?,
            vm_is_valid: row.try_get("vm_is_valid")?,
            created_date: row.try_get("created_date")?,
            last_modified: row.try_get("last_modified")?,
        })
    }
}

/// A place returned by an external search or crawl call, evaluated for
/// equivalence against an internal POI by the resolver.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub place_id: String,
    pub name: String,
    pub address: String,
    pub lat: f64,
    pub lng: f64,
    pub category_name: Option<String>,
    pub similarity: Option<f64>,
}

/// Source namespaces for `PartyMapping.source_id` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartySource {
    Vml,
    Vm,
    Google,
    Waze,
}

impl PartySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartySource::Vml => "VML",
            PartySource::Vm => "VM",
            PartySource::Google => "Google",
            PartySource::Waze => "Waze",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PartyMapping {
    pub party_id: String,
    pub source: PartySource,
    pub source_id: String,
}

#[derive(Debug, Clone)]
pub struct PartyCategory {
    pub party_id: String,
    pub category_id: Uuid,
    pub brand_id: Option<Uuid>,
    pub branch_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct PartyContact {
    pub party_id: String,
    pub tel_num: String,
    pub website: String,
    pub email: String,
}

#[derive(Debug, Clone)]
pub struct PartyEvsePower {
    pub id: Uuid,
    pub party_id: String,
    pub power_type: i32,
    pub total_evse: i32,
}

#[derive(Debug, Clone)]
pub struct PartySpecial {
    pub party_id: String,
    pub special: String,
}

#[derive(Debug, Clone)]
pub struct PartyImage {
    pub party_id: String,
    pub name: String,
    pub image_url: String,
}

#[derive(Debug, Clone)]
pub struct PartyRating {
    pub average_rating: f64,
    pub total_reviews: i64,
}

/// The canonical entity assembled per raw record and handed to the party
/// store in one transaction.
#[derive(Debug, Clone)]
pub struct Party {
    pub id: String,
    pub party_type_id: Uuid,
    pub parent_party_id: Option<String>,
    pub categories: Vec<PartyCategory>,
    pub contact: Option<PartyContact>,
    pub working_hour_id: Option<Uuid>,
    pub evse_powers: Vec<PartyEvsePower>,
    pub special: Option<PartySpecial>,
    pub mappings: Vec<PartyMapping>,
}

impl Party {
    pub fn new(id: &str) -> Self {
        Party {
            id: id.to_string(),
            party_type_id: PLACE_PARTY_TYPE_ID,
            parent_party_id: None,
            categories: Vec::new(),
            contact: None,
            working_hour_id: None,
            evse_powers: Vec::new(),
            special: None,
            mappings: Vec::new(),
        }
    }
}

/// The flat search-facing POI record created alongside each party.
#[derive(Debug, Clone)]
pub struct Poi {
    pub id: String,
    pub name: String,
    pub address: String,
    pub label: String,
    pub lat: f64,
    pub lng: f64,
    pub parent_id: String,
    pub google_place_id: String,
    pub is_delete: bool,
}

impl Poi {
    pub fn from_row(row: &PgRow) -> Result<Self, tokio_postgres::Error> {
        Ok(Poi {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            address: row.try_get("address")?,
            label: row.try_get("label")?,
            lat: row.try_get("lat")?,
            lng: row.try_get("lng")?,
            parent_id: row.try_get("parent_id")?,
            google_place_id: row.try_get("google_place_id")?,
            is_delete: row.try_get("is_delete")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MappingVm {
    pub vm_id: i64,
    pub parent_id: i64,
    pub party_id: String,
    pub name: String,
    pub address: String,
    pub lat: f64,
    pub lng: f64,
    pub poi_type: String,
}

impl MappingVm {
    pub fn from_row(row: &PgRow) -> Result<Self, tokio_postgres::Error> {
        Ok(MappingVm {
            vm_id: row.try_get("vm_id")?,
            parent_id: row.try_get("parent_id")?,
            party_id: row.try_get("party_id")?,
            name: row.try_get("name")?,
            address: row.try_get("address")?,
            lat: row.try_get("lat")?,
            lng: row.try_get("lng")?,
            poi_type: row.try_get("poi_type")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MappingWaze {
    pub waze_id: String,
    pub party_id: String,
    pub name: String,
    pub address: String,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone)]
pub struct MappingGoogle {
    pub google_place_id: String,
    pub party_id: String,
    pub name: String,
    pub address: String,
    pub lat: f64,
    pub lng: f64,
}

/// One aggregated Waze click-stream record: an external place users navigate
/// to, identified by a Waze venue id.
#[derive(Debug, Clone)]
pub struct WazeClick {
    pub id: String,
    pub waze_venue_id: String,
    /// Alternate id in another namespace, e.g. the `googlePlaces.*` id
    /// recovered for a `venues.*` venue. Empty until resolved.
    pub alter_venue_id: String,
    pub name: String,
    pub address: String,
    pub lat: f64,
    pub lng: f64,
    pub total_clicks: i64,
}

impl WazeClick {
    pub fn from_row(row: &PgRow) -> Result<Self, tokio_postgres::Error> {
        Ok(WazeClick {
            id: row.try_get("id")?,
            waze_venue_id: row.try_get("waze_venue_id")?,
            alter_venue_id: row.try_get("alter_venue_id")?,
            name: row.try_get("name")?,
            address: row.try_get("address")?,
            lat: row.try_get("lat")?,
            lng: row.try_get("lng")?,
            total_clicks: row.try_get("total_clicks")?,
        })
    }
}

/// Partial party update applied by the enrichment passes (images, rating,
/// EVSE powers); `None` collections are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdatePartyData {
    pub party_id: String,
    pub images: Option<Vec<PartyImage>>,
    pub rating: Option<PartyRating>,
    pub evse_powers: Option<Vec<PartyEvsePower>>,
}

/// Per-pass operational rollup; write-once at the end of a sweep.
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub name: String,
    pub total: i64,
    pub total_added_new: i64,
    pub total_updated: i64,
    pub total_ignored: i64,
    pub total_error: i64,
    #[serde(skip)]
    pub last_modified: NaiveDateTime,
}

impl ImportSummary {
    pub fn new(name: &str) -> Self {
        ImportSummary {
            name: name.to_string(),
            total: 0,
            total_added_new: 0,
            total_updated: 0,
            total_ignored: 0,
            total_error: 0,
            last_modified: Utc::now().naive_utc(),
        }
    }
}

/// Fixed party type id for place parties.
pub const PLACE_PARTY_TYPE_ID: Uuid = Uuid::from_u128(0xd9c03a5c_51d8_42de_bb77_7cff5ff5fc0b);

/// Prefix convention for google place ids stored in party mappings.
pub const GOOGLE_PLACES_PREFIX: &str = "googlePlaces.";
/// Prefix marking Waze venue ids that need resolution to a google place id.
pub const VENUES_PREFIX: &str = "venues.";

/// Deterministic party id for a master-dataset POI. The same vm id always
/// hashes to the same party id so re-imports replace rather than duplicate.
pub fn party_id_for_vm(vm_id: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(vm_id.to_string().as_bytes());
    format!("vml.{}", hex::encode(hasher.finalize()))
}

/// Fresh party id for places that have no master-dataset identity (e.g. a
/// Waze-only POI).
pub fn fresh_party_id() -> String {
    format!("vml.{}", Uuid::new_v4().simple())
}

pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_party_id_for_vm_is_deterministic() {
        let a = party_id_for_vm(123456);
        let b = party_id_for_vm(123456);
        assert_eq!(a, b);
        assert!(a.starts_with("vml."));
        // sha256 hex digest is 64 chars
        assert_eq!(a.len(), "vml.".len() + 64);
        assert_ne!(a, party_id_for_vm(123457));
    }

    #[test]
    fn test_fresh_party_ids_are_unique() {
        let a = fresh_party_id();
        let b = fresh_party_id();
        assert_ne!(a, b);
        assert!(a.starts_with("vml."));
    }

    #[test]
    fn test_import_status_constructors() {
        let s = ImportStatus::error("raw-1", ImportErrorKind::NotFoundCategory);
        assert_eq!(s.status, ImportStatusKind::Error);
        assert_eq!(s.msg, "NotFoundCategory");
        assert_eq!(ImportStatusKind::from_str("Success"), Some(ImportStatusKind::Success));
        assert_eq!(ImportStatusKind::from_str("bogus"), None);
    }

    #[test]
    fn test_needs_gg_search_rerun_overrides_everything() {
        let mut tracking = PlaceMappingTracking::default();
        // Fresh rows are always examined.
        assert!(tracking.needs_gg_search());

        tracking.is_ignore_mapping = true;
        assert!(!tracking.needs_gg_search());

        // The re-run flag wins even over an ignored row.
        tracking.is_rerun_gg_search = true;
        assert!(tracking.needs_gg_search());

        // A row that already holds a valid match but is flagged for another
        // search must still come back for re-matching.
        tracking.is_ignore_mapping = false;
        tracking.gg_is_valid = true;
        assert!(tracking.needs_gg_search());
    }

    #[test]
    fn test_apply_and_clear_match() {
        let mut tracking = PlaceMappingTracking::default();
        let candidate = Candidate {
            place_id: "googlePlaces.abc".to_string(),
            name: "Coffee X".to_string(),
            address: "12 Main St".to_string(),
            lat: 10.0,
            lng: 106.0,
            category_name: Some("Cafe".to_string()),
            similarity: None,
        };
        tracking.apply_match(&candidate, 30.0, true);
        assert!(tracking.gg_is_valid);
        assert_eq!(tracking.gg_place_id, "googlePlaces.abc");
        assert_eq!(tracking.gg_distance, 30.0);

        tracking.clear_match();
        assert!(!tracking.gg_is_valid);
        assert!(tracking.gg_place_id.is_empty());
        assert_eq!(tracking.gg_distance, 0.0);
    }
}
