use foodshare_core::GeoPoint;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometers (haversine).
///
/// Invalid coordinates yield `f64::INFINITY`, which every caller treats as
/// unreachable.
pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    if !a.is_valid() || !b.is_valid() {
        return f64::INFINITY;
    }
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_KM * c
}

/// Distance between two optional locations; a missing side is unreachable.
pub fn distance_between(a: Option<&GeoPoint>, b: Option<&GeoPoint>) -> f64 {
    match (a, b) {
        (Some(a), Some(b)) => haversine_km(a, b),
        _ => f64::INFINITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NEW_YORK: GeoPoint = GeoPoint::new(40.7128, -74.0060);
    const LOS_ANGELES: GeoPoint = GeoPoint::new(34.0522, -118.2437);

    #[test]
    fn new_york_to_los_angeles() {
        let d = haversine_km(&NEW_YORK, &LOS_ANGELES);
        assert!((d - 3935.75).abs() < 0.5, "got {d}");
    }

    #[test]
    fn distance_is_symmetric_and_zero_on_identity() {
        let points = [
            NEW_YORK,
            LOS_ANGELES,
            GeoPoint::new(-33.8688, 151.2093),
            GeoPoint::new(0.0, 179.9),
            GeoPoint::new(0.0, -179.9),
            GeoPoint::new(89.9, 0.0),
        ];
        for a in &points {
            assert_eq!(haversine_km(a, a), 0.0);
            for b in &points {
                let ab = haversine_km(a, b);
                let ba = haversine_km(b, a);
                assert!((ab - ba).abs() < 1e-9, "{a:?} {b:?}: {ab} vs {ba}");
            }
        }
    }

    #[test]
    fn invalid_or_missing_points_are_unreachable() {
        let bad = GeoPoint::new(f64::NAN, 10.0);
        assert!(haversine_km(&NEW_YORK, &bad).is_infinite());
        assert!(haversine_km(&GeoPoint::new(120.0, 0.0), &NEW_YORK).is_infinite());
        assert!(distance_between(Some(&NEW_YORK), None).is_infinite());
        assert!(distance_between(None, None).is_infinite());
        assert!(distance_between(Some(&NEW_YORK), Some(&NEW_YORK)) == 0.0);
    }
}
