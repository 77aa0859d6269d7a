// src/matching/geo.rs

/// Mean Earth radius in meters (IUGG).
const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Great-circle distance between two coordinates in meters, using the
/// haversine formula on a spherical Earth. All distance thresholds in this
/// crate are meters; callers must not rescale the result.
pub fn distance_meters(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_to_self_is_zero() {
        assert_eq!(distance_meters(10.0, 106.0, 10.0, 106.0), 0.0);
        assert_eq!(distance_meters(-45.5, 170.25, -45.5, 170.25), 0.0);
    }

    #[test]
    fn test_known_pair() {
        // Ho Chi Minh City center to Tan Son Nhat airport, roughly 7 km.
        let d = distance_meters(10.7769, 106.7009, 10.8188, 106.6520);
        assert!((6000.0..9000.0).contains(&d), "got {}", d);
    }

    #[test]
    fn test_one_degree_latitude() {
        // One degree of latitude is ~111.2 km regardless of longitude.
        let d = distance_meters(10.0, 106.0, 11.0, 106.0);
        assert!((110_000.0..112_500.0).contains(&d), "got {}", d);
    }

    #[test]
    fn test_monotonic_moving_away() {
        let origin = (10.0, 106.0);
        let mut prev = 0.0;
        for step in 1..=10 {
            let lat = origin.0 + step as f64 * 0.0005;
            let d = distance_meters(origin.0, origin.1, lat, origin.1);
            assert!(d > prev, "distance must grow as the point moves away");
            prev = d;
        }
    }

    #[test]
    fn test_symmetric() {
        let a = distance_meters(10.0, 106.0, 10.5, 106.5);
        let b = distance_meters(10.5, 106.5, 10.0, 106.0);
        assert!((a - b).abs() < 1e-9);
    }
}
