use std::f64::consts::PI;

/// A geodetic point: latitude in `[-pi/2, pi/2]`, longitude in `[-pi, pi]`, altitude in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeodeticPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

impl GeodeticPoint {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        GeodeticPoint {
            latitude,
            longitude,
            altitude,
        }
    }
}

/// A geodetic point whose longitude has been normalized into `[lc - pi, lc + pi]`.
///
/// Carrying the reference longitude `lc` alongside the point prevents discontinuities
/// when a ray is traced across the antimeridian: two points on either side of +/-pi
/// compare and interpolate correctly once expressed relative to the same `lc`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizedGeodeticPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub lc: f64,
}

impl NormalizedGeodeticPoint {
    pub fn new(latitude: f64, longitude: f64, altitude: f64, lc: f64) -> Self {
        NormalizedGeodeticPoint {
            latitude,
            longitude: normalize_longitude(longitude, lc),
            altitude,
            lc,
        }
    }

    pub fn to_geodetic(self) -> GeodeticPoint {
        GeodeticPoint::new(self.latitude, self.longitude, self.altitude)
    }
}

impl From<NormalizedGeodeticPoint> for GeodeticPoint {
    fn from(p: NormalizedGeodeticPoint) -> Self {
        p.to_geodetic()
    }
}

/// Normalizes `longitude` into `[lc - pi, lc + pi]`.
pub fn normalize_longitude(longitude: f64, lc: f64) -> f64 {
    let delta = longitude - lc;
    let wrapped = delta - (2.0 * PI) * ((delta + PI) / (2.0 * PI)).floor();
    lc + wrapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn normalizes_around_reference() {
        assert_abs_diff_eq!(normalize_longitude(PI + 0.1, 0.0), -PI + 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(normalize_longitude(0.2, 0.0), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn normalizes_across_antimeridian_relative_to_lc() {
        // lc close to +pi: a point just west of the antimeridian stays close to lc.
        let lc = PI - 0.01;
        let lon = -PI + 0.01; // same physical point as PI + 0.01 = lc + 2*pi - ...
        let normalized = normalize_longitude(lon, lc);
        assert!((normalized - lc).abs() < 0.1);
    }
}
