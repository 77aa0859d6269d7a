// src/merge.rs
//
// Raw-data merge engine for crawled place documents. Two crawls of the same
// place must never lose previously collected reviews, and aggregate rating
// fields are always derived from the merged review set rather than trusted
// from either input.

use anyhow::{anyhow, Result};
use serde_json::{json, Map, Value};
use std::collections::HashSet;

use crate::models::{PartyImage, PartyRating};

/// Merges two versions of the same crawled place document.
///
/// The incoming document wins for every scalar field; reviews are unioned by
/// `reviewId` with existing reviews first, then unseen incoming ones. When
/// the merged set is non-empty, `reviewsCount`, `reviewsDistribution` and
/// `totalScore` are recomputed from it. Unknown fields round-trip untouched.
///
/// Only `placeId` is structurally required; a review without a `reviewId` is
/// dropped from the union and a review without `stars` is excluded from the
/// recomputed aggregates, neither aborts the merge.
pub fn merge_place_document(existing: Option<&Value>, incoming: &Value) -> Result<Value> {
    place_id(incoming)
        .ok_or_else(|| anyhow!("crawled document is missing a string placeId"))?;

    let existing = match existing {
        Some(doc) => doc,
        None => return Ok(incoming.clone()),
    };

    // Fresher non-review fields win.
    let mut merged = incoming.clone();

    let existing_reviews = review_array(existing);
    if existing_reviews.is_empty() {
        return Ok(merged);
    }

    let incoming_reviews = review_array(incoming);
    let merged_reviews = if incoming_reviews.is_empty() {
        existing_reviews
    } else {
        union_reviews(&existing_reviews, &incoming_reviews)
    };

    if !merged_reviews.is_empty() {
        let aggregates = compute_aggregates(&merged_reviews);
        let obj = merged
            .as_object_mut()
            .ok_or_else(|| anyhow!("crawled document is not a JSON object"))?;
        obj.insert("reviewsCount".to_string(), json!(merged_reviews.len()));
        obj.insert("reviewsDistribution".to_string(), aggregates.distribution);
        obj.insert("totalScore".to_string(), json!(aggregates.total_score));
        obj.insert("reviews".to_string(), Value::Array(merged_reviews));
    }

    Ok(merged)
}

pub fn place_id(doc: &Value) -> Option<&str> {
    doc.get("placeId").and_then(Value::as_str)
}

/// Image rows from a crawled document: the main image first, then the
/// numbered gallery.
pub fn party_images_from_doc(party_id: &str, doc: &Value) -> Vec<PartyImage> {
    let mut images = Vec::new();
    if let Some(url) = doc.get("imageUrl").and_then(Value::as_str) {
        if !url.is_empty() {
            images.push(PartyImage {
                party_id: party_id.to_string(),
                name: "Main".to_string(),
                image_url: url.to_string(),
            });
        }
    }
    if let Some(urls) = doc.get("imageUrls").and_then(Value::as_array) {
        for (i, url) in urls.iter().filter_map(Value::as_str).enumerate() {
            images.push(PartyImage {
                party_id: party_id.to_string(),
                name: i.to_string(),
                image_url: url.to_string(),
            });
        }
    }
    images
}

pub fn party_rating_from_doc(doc: &Value) -> Option<PartyRating> {
    let total_reviews = doc.get("reviewsCount").and_then(Value::as_i64)?;
    if total_reviews <= 0 {
        return None;
    }
    Some(PartyRating {
        average_rating: doc.get("totalScore").and_then(Value::as_f64).unwrap_or(0.0),
        total_reviews,
    })
}

/// Reviews carrying a `reviewId`; anything else cannot participate in the
/// keyed union.
fn review_array(doc: &Value) -> Vec<Value> {
    match doc.get("reviews").and_then(Value::as_array) {
        Some(reviews) => reviews
            .iter()
            .filter(|r| review_id(r).is_some())
            .cloned()
            .collect(),
        None => Vec::new(),
    }
}

fn review_id(review: &Value) -> Option<&str> {
    review.get("reviewId").and_then(Value::as_str)
}

/// Union by review id: every existing review is kept in order, then incoming
/// reviews whose id has not been seen are appended in order.
fn union_reviews(existing: &[Value], incoming: &[Value]) -> Vec<Value> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut merged = Vec::with_capacity(existing.len() + incoming.len());

    for review in existing {
        if let Some(id) = review_id(review) {
            seen.insert(id.to_string());
            merged.push(review.clone());
        }
    }
    for review in incoming {
        if let Some(id) = review_id(review) {
            if seen.insert(id.to_string()) {
                merged.push(review.clone());
            }
        }
    }
    merged
}

struct Aggregates {
    distribution: Value,
    total_score: f64,
}

/// Star-bucket counts and the mean score, recomputed from scratch. Fractional
/// star ratings are rounded to the nearest whole star for bucketing; reviews
/// without a numeric `stars` field are skipped.
fn compute_aggregates(reviews: &[Value]) -> Aggregates {
    let mut buckets = [0u64; 5];
    let mut total_stars = 0.0;

    for review in reviews {
        if let Some(stars) = review.get("stars").and_then(Value::as_f64) {
            total_stars += stars;
            let bucket = stars.round() as i64;
            if (1..=5).contains(&bucket) {
                buckets[(bucket - 1) as usize] += 1;
            }
        }
    }

    let mut distribution = Map::new();
    distribution.insert("oneStar".to_string(), json!(buckets[0]));
    distribution.insert("twoStar".to_string(), json!(buckets[1]));
    distribution.insert("threeStar".to_string(), json!(buckets[2]));
    distribution.insert("fourStar".to_string(), json!(buckets[3]));
    distribution.insert("fiveStar".to_string(), json!(buckets[4]));

    let total_score = if reviews.is_empty() {
        0.0
    } else {
        (total_stars / reviews.len() as f64 * 10.0).round() / 10.0
    };

    Aggregates {
        distribution: Value::Object(distribution),
        total_score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(place_id: &str, reviews: Value) -> Value {
        json!({
            "placeId": place_id,
            "title": "Coffee X",
            "address": "12 Main St",
            "reviews": reviews,
            "reviewsCount": 999,
            "totalScore": 9.9,
        })
    }

    fn review(id: &str, stars: f64) -> Value {
        json!({ "reviewId": id, "stars": stars, "text": format!("review {}", id) })
    }

    #[test]
    fn test_missing_place_id_is_an_error() {
        assert!(merge_place_document(None, &json!({"title": "no id"})).is_err());
    }

    #[test]
    fn test_no_existing_returns_incoming_unchanged() {
        let incoming = doc("p1", json!([review("r1", 4.0)]));
        let merged = merge_place_document(None, &incoming).unwrap();
        assert_eq!(merged, incoming);
    }

    #[test]
    fn test_union_by_review_id() {
        let existing = doc("p1", json!([review("r1", 5.0), review("r2", 3.0)]));
        let incoming = doc("p1", json!([review("r2", 3.0), review("r3", 4.0)]));
        let merged = merge_place_document(Some(&existing), &incoming).unwrap();

        let reviews = merged["reviews"].as_array().unwrap();
        assert_eq!(reviews.len(), 3);
        let ids: Vec<&str> = reviews.iter().map(|r| r["reviewId"].as_str().unwrap()).collect();
        // Existing first, then new, stable.
        assert_eq!(ids, vec!["r1", "r2", "r3"]);
        assert_eq!(merged["reviewsCount"], json!(3));
        // (5 + 3 + 4) / 3 = 4.0
        assert_eq!(merged["totalScore"], json!(4.0));
    }

    #[test]
    fn test_aggregates_recomputed_not_copied() {
        let existing = doc("p1", json!([review("r1", 5.0)]));
        let incoming = doc("p1", json!([review("r2", 1.0)]));
        let merged = merge_place_document(Some(&existing), &incoming).unwrap();
        assert_eq!(merged["totalScore"], json!(3.0));
        let dist = &merged["reviewsDistribution"];
        assert_eq!(dist["oneStar"], json!(1));
        assert_eq!(dist["fiveStar"], json!(1));
        assert_eq!(dist["threeStar"], json!(0));
    }

    #[test]
    fn test_incoming_without_reviews_keeps_existing() {
        let existing = doc("p1", json!([review("r1", 4.0), review("r2", 2.0)]));
        let mut incoming = doc("p1", json!([]));
        incoming.as_object_mut().unwrap().remove("reviews");
        let merged = merge_place_document(Some(&existing), &incoming).unwrap();
        assert_eq!(merged["reviews"].as_array().unwrap().len(), 2);
        assert_eq!(merged["reviewsCount"], json!(2));
        assert_eq!(merged["totalScore"], json!(3.0));
    }

    #[test]
    fn test_existing_without_reviews_returns_incoming() {
        let mut existing = doc("p1", json!([]));
        existing.as_object_mut().unwrap().remove("reviews");
        let incoming = doc("p1", json!([review("r1", 4.0)]));
        let merged = merge_place_document(Some(&existing), &incoming).unwrap();
        assert_eq!(merged, incoming);
    }

    #[test]
    fn test_merge_with_self_is_idempotent() {
        let document = doc("p1", json!([review("r1", 4.0), review("r2", 3.5)]));
        let merged = merge_place_document(Some(&document), &document).unwrap();
        assert_eq!(merged["reviews"], document["reviews"]);
        assert_eq!(merged["reviewsCount"], json!(2));
        // (4.0 + 3.5) / 2 = 3.75 -> 3.8 after one-decimal rounding
        assert_eq!(merged["totalScore"], json!(3.8));
        let again = merge_place_document(Some(&merged), &merged).unwrap();
        assert_eq!(again, merged);
    }

    #[test]
    fn test_fractional_stars_round_to_nearest_bucket() {
        let existing = doc("p1", json!([review("r1", 4.6)]));
        let incoming = doc("p1", json!([review("r2", 2.4)]));
        let merged = merge_place_document(Some(&existing), &incoming).unwrap();
        let dist = &merged["reviewsDistribution"];
        assert_eq!(dist["fiveStar"], json!(1));
        assert_eq!(dist["twoStar"], json!(1));
    }

    #[test]
    fn test_malformed_reviews_do_not_abort() {
        let existing = doc("p1", json!([review("r1", 5.0), {"text": "no id"}]));
        let incoming = doc(
            "p1",
            json!([{"reviewId": "r2"}, review("r3", 1.0)]),
        );
        let merged = merge_place_document(Some(&existing), &incoming).unwrap();
        let reviews = merged["reviews"].as_array().unwrap();
        // The id-less review is dropped; the stars-less one is kept but
        // excluded from buckets.
        assert_eq!(reviews.len(), 3);
        let dist = &merged["reviewsDistribution"];
        assert_eq!(dist["fiveStar"], json!(1));
        assert_eq!(dist["oneStar"], json!(1));
        // Mean still divides by the merged count (3 reviews, 6 stars).
        assert_eq!(merged["totalScore"], json!(2.0));
    }

    #[test]
    fn test_party_images_from_doc_orders_main_first() {
        let doc = json!({
            "imageUrl": "https://img/main.jpg",
            "imageUrls": ["https://img/0.jpg", "https://img/1.jpg"]
        });
        let images = party_images_from_doc("vml.p1", &doc);
        assert_eq!(images.len(), 3);
        assert_eq!(images[0].name, "Main");
        assert_eq!(images[1].name, "0");
        assert_eq!(images[2].name, "1");
        assert!(images.iter().all(|i| i.party_id == "vml.p1"));
    }

    #[test]
    fn test_party_images_from_doc_without_images() {
        assert!(party_images_from_doc("vml.p1", &json!({})).is_empty());
        // empty main url is skipped
        assert!(party_images_from_doc("vml.p1", &json!({"imageUrl": ""})).is_empty());
    }

    #[test]
    fn test_party_rating_requires_reviews() {
        let rated = json!({"totalScore": 4.3, "reviewsCount": 12});
        let rating = party_rating_from_doc(&rated).unwrap();
        assert_eq!(rating.average_rating, 4.3);
        assert_eq!(rating.total_reviews, 12);

        assert!(party_rating_from_doc(&json!({"totalScore": 4.3, "reviewsCount": 0})).is_none());
        assert!(party_rating_from_doc(&json!({"totalScore": 4.3})).is_none());
    }

    #[test]
    fn test_unknown_fields_round_trip() {
        let existing = doc("p1", json!([review("r1", 4.0)]));
        let mut incoming = doc("p1", json!([review("r2", 4.0)]));
        incoming
            .as_object_mut()
            .unwrap()
            .insert("crawlerExtra".to_string(), json!({"nested": [1, 2, 3]}));
        let merged = merge_place_document(Some(&existing), &incoming).unwrap();
        assert_eq!(merged["crawlerExtra"], json!({"nested": [1, 2, 3]}));
    }
}
