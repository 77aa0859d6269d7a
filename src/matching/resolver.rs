// src/matching/resolver.rs
//
// The single decision point for "is external place X the same real-world
// place as internal POI Y". Every pass funnels through `resolve_best_match`
// instead of carrying its own distance-and-filter logic.

use crate::matching::geo::distance_meters;
use crate::models::{Candidate, RawPoi};

/// An accepted candidate together with its computed distance from the origin.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMatch {
    pub candidate: Candidate,
    pub distance_meters: f64,
}

/// Picks the single best match from a candidate list: candidates at or beyond
/// `max_distance_meters` are discarded, the minimum-distance survivor wins,
/// and ties go to the first-seen candidate. Returns `None` when nothing
/// survives the threshold or the list is empty.
pub fn resolve_best_match(
    origin_lat: f64,
    origin_lng: f64,
    candidates: &[Candidate],
    max_distance_meters: f64,
) -> Option<ResolvedMatch> {
    let mut best: Option<ResolvedMatch> = None;
    for candidate in candidates {
        let distance = distance_meters(origin_lat, origin_lng, candidate.lat, candidate.lng);
        if distance >= max_distance_meters {
            continue;
        }
        // Strict less-than keeps the first-seen candidate on exact ties.
        let is_better = match &best {
            Some(current) => distance < current.distance_meters,
            None => true,
        };
        if is_better {
            best = Some(ResolvedMatch {
                candidate: candidate.clone(),
                distance_meters: distance,
            });
        }
    }
    best
}

/// Search strategies in decreasing specificity. Only `NameAndAdmin` is active
/// by default; the others are selectable per deployment and run earlier in
/// the chain when enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
    NameAndAddress,
    NameAndStationName,
    FullName,
    NameAndCategory,
    NameAndAdmin,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::NameAndAddress => "NameAndAddress",
            SearchStrategy::NameAndStationName => "NameAndVFStationName",
            SearchStrategy::FullName => "FullName",
            SearchStrategy::NameAndCategory => "NameAndCatName",
            SearchStrategy::NameAndAdmin => "NameAndAdmin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "NameAndAddress" => Some(SearchStrategy::NameAndAddress),
            "NameAndVFStationName" => Some(SearchStrategy::NameAndStationName),
            "FullName" => Some(SearchStrategy::FullName),
            "NameAndCatName" => Some(SearchStrategy::NameAndCategory),
            "NameAndAdmin" => Some(SearchStrategy::NameAndAdmin),
            _ => None,
        }
    }

    /// Acceptance threshold for this strategy. Looser admin-area queries get
    /// a wider radius than exact name+address queries.
    pub fn max_distance_meters(&self) -> f64 {
        match self {
            SearchStrategy::NameAndAdmin => 400.0,
            _ => 200.0,
        }
    }

    /// Builds the query text for this strategy from a raw record, or `None`
    /// when the record lacks the fields the strategy needs.
    pub fn query_text(&self, poi: &RawPoi, vf_station_name: Option<&str>) -> Option<String> {
        match self {
            SearchStrategy::NameAndAddress => {
                let address = poi.address.as_deref()?;
                Some(format!("{} {}", poi.name, address))
            }
            SearchStrategy::NameAndStationName => {
                let station = vf_station_name?;
                if station.is_empty() {
                    return None;
                }
                Some(format!("{} {}", poi.name, station))
            }
            SearchStrategy::FullName => poi.full_name.clone().filter(|s| !s.is_empty()),
            SearchStrategy::NameAndCategory => {
                if poi.cat_name.is_empty() {
                    return None;
                }
                Some(format!("{} {}", poi.name, poi.cat_name))
            }
            SearchStrategy::NameAndAdmin => {
                let full_name = poi.full_name.clone().filter(|s| !s.is_empty())?;
                match poi.admin.as_ref().and_then(|a| a.district.clone()) {
                    Some(district) if !district.trim().is_empty() => {
                        Some(format!("{},{}", full_name, district))
                    }
                    _ => Some(full_name),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AdminArea;

    fn candidate(place_id: &str, lat: f64, lng: f64) -> Candidate {
        Candidate {
            place_id: place_id.to_string(),
            name: place_id.to_string(),
            address: String::new(),
            lat,
            lng,
            category_name: None,
            similarity: None,
        }
    }

    // ~50m and ~150m north of the origin (one degree of latitude ~111.2km).
    const ORIGIN: (f64, f64) = (10.0, 106.0);
    const LAT_50M: f64 = 10.0 + 50.0 / 111_195.0;
    const LAT_150M: f64 = 10.0 + 150.0 / 111_195.0;

    #[test]
    fn test_picks_minimum_distance_within_threshold() {
        let candidates = vec![candidate("b", LAT_150M, 106.0), candidate("a", LAT_50M, 106.0)];
        let resolved = resolve_best_match(ORIGIN.0, ORIGIN.1, &candidates, 200.0).unwrap();
        assert_eq!(resolved.candidate.place_id, "a");
        assert!((resolved.distance_meters - 50.0).abs() < 2.0);
    }

    #[test]
    fn test_threshold_excludes_far_candidates() {
        let candidates = vec![candidate("a", LAT_50M, 106.0), candidate("b", LAT_150M, 106.0)];
        // 100m: only A survives.
        let resolved = resolve_best_match(ORIGIN.0, ORIGIN.1, &candidates, 100.0).unwrap();
        assert_eq!(resolved.candidate.place_id, "a");
        // 40m: nothing survives.
        assert!(resolve_best_match(ORIGIN.0, ORIGIN.1, &candidates, 40.0).is_none());
    }

    #[test]
    fn test_empty_candidates_yield_none() {
        assert!(resolve_best_match(ORIGIN.0, ORIGIN.1, &[], 500.0).is_none());
    }

    #[test]
    fn test_tie_goes_to_first_seen() {
        let candidates = vec![candidate("first", LAT_50M, 106.0), candidate("second", LAT_50M, 106.0)];
        let resolved = resolve_best_match(ORIGIN.0, ORIGIN.1, &candidates, 200.0).unwrap();
        assert_eq!(resolved.candidate.place_id, "first");
    }

    #[test]
    fn test_deterministic() {
        let candidates = vec![candidate("a", LAT_50M, 106.0), candidate("b", LAT_150M, 106.0)];
        let first = resolve_best_match(ORIGIN.0, ORIGIN.1, &candidates, 200.0);
        for _ in 0..5 {
            assert_eq!(resolve_best_match(ORIGIN.0, ORIGIN.1, &candidates, 200.0), first);
        }
    }

    fn raw_poi() -> RawPoi {
        RawPoi {
            id: "raw-1".to_string(),
            vm_id: 1,
            vm_parent_id: 0,
            name: "Coffee X".to_string(),
            short_name: "CX".to_string(),
            full_name: Some("Coffee X Saigon".to_string()),
            alt_name: String::new(),
            address: Some("12 Main St".to_string()),
            lat: 10.0,
            lng: 106.0,
            cat_ids: "3001".to_string(),
            cat_name: "Cafe".to_string(),
            chain_name: String::new(),
            branch_name: String::new(),
            phones: vec![],
            emails: vec![],
            websites: vec![],
            specials: String::new(),
            working_time: String::new(),
            status: "ACTIVE".to_string(),
            gg_place_id: String::new(),
            admin: Some(AdminArea {
                country: Some("Vietnam".to_string()),
                city: Some("Ho Chi Minh".to_string()),
                district: Some("District 1".to_string()),
                ward: None,
            }),
        }
    }

    #[test]
    fn test_query_text_per_strategy() {
        let poi = raw_poi();
        assert_eq!(
            SearchStrategy::NameAndAddress.query_text(&poi, None).as_deref(),
            Some("Coffee X 12 Main St")
        );
        assert_eq!(
            SearchStrategy::NameAndAdmin.query_text(&poi, None).as_deref(),
            Some("Coffee X Saigon,District 1")
        );
        assert_eq!(
            SearchStrategy::NameAndCategory.query_text(&poi, None).as_deref(),
            Some("Coffee X Cafe")
        );
        assert_eq!(SearchStrategy::NameAndStationName.query_text(&poi, None), None);
        assert_eq!(
            SearchStrategy::NameAndStationName
                .query_text(&poi, Some("VF Station 7"))
                .as_deref(),
            Some("Coffee X VF Station 7")
        );
    }

    #[test]
    fn test_admin_query_without_district_falls_back_to_full_name() {
        let mut poi = raw_poi();
        poi.admin = None;
        assert_eq!(
            SearchStrategy::NameAndAdmin.query_text(&poi, None).as_deref(),
            Some("Coffee X Saigon")
        );
    }

    #[test]
    fn test_strategy_thresholds() {
        assert_eq!(SearchStrategy::NameAndAddress.max_distance_meters(), 200.0);
        assert_eq!(SearchStrategy::NameAndAdmin.max_distance_meters(), 400.0);
    }

    #[test]
    fn test_strategy_round_trip() {
        for s in [
            SearchStrategy::NameAndAddress,
            SearchStrategy::NameAndStationName,
            SearchStrategy::FullName,
            SearchStrategy::NameAndCategory,
            SearchStrategy::NameAndAdmin,
        ] {
            assert_eq!(SearchStrategy::from_str(s.as_str()), Some(s));
        }
    }
}
