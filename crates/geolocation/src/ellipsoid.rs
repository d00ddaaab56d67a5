//! Ray/ellipsoid intersection and cartesian/geodetic conversions.

use nalgebra::Vector3;

use crate::error::{Error, Result};
use crate::geodetic::{GeodeticPoint, NormalizedGeodeticPoint};

/// An oblate ellipsoid of revolution tied to a body-fixed rotation frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Ellipsoid {
    /// Equatorial radius (semi-major axis), in meters.
    pub equatorial_radius: f64,
    /// Flattening `f = (a-b)/a`.
    pub flattening: f64,
    /// Name of the body-fixed rotation frame this ellipsoid is expressed in.
    pub frame: String,
}

impl Ellipsoid {
    pub fn new(equatorial_radius: f64, flattening: f64, frame: impl Into<String>) -> Self {
        Ellipsoid {
            equatorial_radius,
            flattening,
            frame: frame.into(),
        }
    }

    pub fn wgs84() -> Self {
        Ellipsoid::new(6_378_137.0, 1.0 / 298.257_223_563, "ITRF")
    }

    pub fn grs80() -> Self {
        Ellipsoid::new(6_378_137.0, 1.0 / 298.257_222_101, "ITRF")
    }

    pub fn iers96() -> Self {
        Ellipsoid::new(6_378_136.49, 1.0 / 298.256_45, "ITRF")
    }

    pub fn iers2003() -> Self {
        Ellipsoid::new(6_378_136.6, 1.0 / 298.256_42, "ITRF")
    }

    /// Polar semi-minor axis `b = a*(1-f)`.
    pub fn polar_radius(&self) -> f64 {
        self.equatorial_radius * (1.0 - self.flattening)
    }

    /// First eccentricity squared, `e2 = f*(2-f)`.
    pub fn eccentricity_squared(&self) -> f64 {
        self.flattening * (2.0 - self.flattening)
    }

    /// Converts a body-frame cartesian point to geodetic latitude/longitude/altitude.
    ///
    /// Uses Bowring's closed-form initial guess followed by a couple of Newton
    /// refinement steps; converges to machine precision for any point off the
    /// polar axis within a handful of iterations.
    pub fn transform_to_geodetic(&self, cartesian: Vector3<f64>) -> GeodeticPoint {
        let a = self.equatorial_radius;
        let b = self.polar_radius();
        let e2 = self.eccentricity_squared();
        let ep2 = (a * a - b * b) / (b * b);

        let x = cartesian.x;
        let y = cartesian.y;
        let z = cartesian.z;
        let p = (x * x + y * y).sqrt();
        let longitude = y.atan2(x);

        if p < 1e-9 {
            // On (or extremely near) the polar axis: latitude is +/- pi/2.
            let latitude = if z >= 0.0 { std::f64::consts::FRAC_PI_2 } else { -std::f64::consts::FRAC_PI_2 };
            let altitude = z.abs() - b;
            return GeodeticPoint::new(latitude, longitude, altitude);
        }

        let theta = (z * a).atan2(p * b);
        let mut latitude = (z + ep2 * b * theta.sin().powi(3)).atan2(p - e2 * a * theta.cos().powi(3));

        for _ in 0..3 {
            let sin_lat = latitude.sin();
            let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
            let altitude = p / latitude.cos() - n;
            latitude = (z / p + e2 * n * sin_lat / p).atan();
            let _ = altitude;
        }

        let sin_lat = latitude.sin();
        let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        let altitude = p / latitude.cos() - n;

        GeodeticPoint::new(latitude, longitude, altitude)
    }

    /// Converts a geodetic point to body-frame cartesian coordinates.
    pub fn transform_to_cartesian(&self, point: GeodeticPoint) -> Vector3<f64> {
        let a = self.equatorial_radius;
        let e2 = self.eccentricity_squared();
        let sin_lat = point.latitude.sin();
        let cos_lat = point.latitude.cos();
        let n = a / (1.0 - e2 * sin_lat * sin_lat).sqrt();

        Vector3::new(
            (n + point.altitude) * cos_lat * point.longitude.cos(),
            (n + point.altitude) * cos_lat * point.longitude.sin(),
            (n * (1.0 - e2) + point.altitude) * sin_lat,
        )
    }

    /// Point on the ray `{p + t*los, t >= 0}` whose geodetic altitude equals `h`,
    /// choosing the smaller non-negative root (closest forward intersection).
    ///
    /// The altitude iso-surface is modeled as the ellipsoid uniformly scaled by
    /// `1 + h/a`, matching the spec's "ellipsoid scaled by h/a".
    pub fn point_at_altitude(&self, p: Vector3<f64>, los: Vector3<f64>, h: f64) -> Result<Vector3<f64>> {
        let k = 1.0 + h / self.equatorial_radius;
        let ar = self.equatorial_radius * k;
        let br = self.polar_radius() * k;
        let f2 = (ar / br).powi(2);

        let a_coef = los.x * los.x + los.y * los.y + f2 * los.z * los.z;
        let b_coef = 2.0 * (p.x * los.x + p.y * los.y + f2 * p.z * los.z);
        let c_coef = p.x * p.x + p.y * p.y + f2 * p.z * p.z - ar * ar;

        smallest_forward_root(a_coef, b_coef, c_coef)
            .map(|t| p + los * t)
            .ok_or(Error::RayMissesEllipsoid)
    }

    /// Point on the ray whose geodetic latitude equals `phi`, closest to `p` along `+los`.
    ///
    /// The iso-latitude locus (for the spherical-normal, i.e. geodetic, latitude
    /// definition) is the cone `z^2 = k^2*(x^2+y^2)` with `k = (1-e2)*tan(phi)`,
    /// restricted to the half matching the sign of `phi`.
    pub fn point_at_latitude(&self, p: Vector3<f64>, los: Vector3<f64>, phi: f64) -> Result<Vector3<f64>> {
        if phi.abs() < 1e-12 {
            // Equatorial plane z=0 is linear in t.
            if los.z.abs() < 1e-15 {
                return Err(Error::RayMissesEllipsoid);
            }
            let t = -p.z / los.z;
            if t < 0.0 {
                return Err(Error::RayMissesEllipsoid);
            }
            return Ok(p + los * t);
        }

        let e2 = self.eccentricity_squared();
        let k = (1.0 - e2) * phi.tan();
        let k2 = k * k;

        let a_coef = los.z * los.z - k2 * (los.x * los.x + los.y * los.y);
        let b_coef = 2.0 * (p.z * los.z - k2 * (p.x * los.x + p.y * los.y));
        let c_coef = p.z * p.z - k2 * (p.x * p.x + p.y * p.y);

        let roots = real_roots(a_coef, b_coef, c_coef);
        roots
            .into_iter()
            .filter(|&t| t >= 0.0)
            .map(|t| (t, p + los * t))
            .filter(|(_, point)| point.z.signum() == phi.signum() || point.z.abs() < 1e-9)
            .min_by(|(t1, _), (t2, _)| t1.partial_cmp(t2).unwrap())
            .map(|(_, point)| point)
            .ok_or(Error::RayMissesEllipsoid)
    }

    /// Point on the ray whose geodetic longitude equals `lambda`, closest to `p` along `+los`.
    ///
    /// The iso-longitude locus is the half-plane through the polar axis at azimuth
    /// `lambda`; intersecting it with the ray is a single linear solve.
    pub fn point_at_longitude(&self, p: Vector3<f64>, los: Vector3<f64>, lambda: f64) -> Result<Vector3<f64>> {
        let (sin_l, cos_l) = (lambda.sin(), lambda.cos());
        let denom = los.x * sin_l - los.y * cos_l;
        if denom.abs() < 1e-15 {
            return Err(Error::RayMissesEllipsoid);
        }
        let t = -(p.x * sin_l - p.y * cos_l) / denom;
        if t < 0.0 {
            return Err(Error::RayMissesEllipsoid);
        }
        let point = p + los * t;
        if point.x * cos_l + point.y * sin_l < 0.0 {
            // landed on the opposite half-plane (lambda + pi)
            return Err(Error::RayMissesEllipsoid);
        }
        Ok(point)
    }

    /// Intersection at altitude 0, normalized to reference longitude `lc`.
    pub fn point_on_ground(&self, p: Vector3<f64>, los: Vector3<f64>, lc: f64) -> Result<NormalizedGeodeticPoint> {
        let ground = self.point_at_altitude(p, los, 0.0)?;
        let gp = self.transform_to_geodetic(ground);
        Ok(NormalizedGeodeticPoint::new(gp.latitude, gp.longitude, gp.altitude, lc))
    }
}

/// Smaller non-negative root of `a*t^2 + b*t + c = 0`, falling back to the linear
/// solve when `a` is (numerically) zero.
fn smallest_forward_root(a: f64, b: f64, c: f64) -> Option<f64> {
    real_roots(a, b, c).into_iter().filter(|&t| t >= 0.0).min_by(|x, y| x.partial_cmp(y).unwrap())
}

fn real_roots(a: f64, b: f64, c: f64) -> Vec<f64> {
    if a.abs() < 1e-9 * b.abs().max(1.0) {
        if b.abs() < 1e-300 {
            return Vec::new();
        }
        return vec![-c / b];
    }
    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 {
        return Vec::new();
    }
    let sqrt_d = discriminant.sqrt();
    vec![(-b - sqrt_d) / (2.0 * a), (-b + sqrt_d) / (2.0 * a)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn cartesian_geodetic_roundtrip() {
        let ellipsoid = Ellipsoid::wgs84();
        let gp = GeodeticPoint::new(0.73, -1.2, 1250.0);
        let cart = ellipsoid.transform_to_cartesian(gp);
        let back = ellipsoid.transform_to_geodetic(cart);
        assert_abs_diff_eq!(back.latitude, gp.latitude, epsilon = 1e-10);
        assert_abs_diff_eq!(back.longitude, gp.longitude, epsilon = 1e-10);
        assert_abs_diff_eq!(back.altitude, gp.altitude, epsilon = 1e-6);
    }

    #[test]
    fn point_at_altitude_zero_lands_on_surface() {
        let ellipsoid = Ellipsoid::wgs84();
        let p = Vector3::new(8_000_000.0, 0.0, 0.0);
        let los = Vector3::new(-1.0, 0.0, 0.0);
        let ground = ellipsoid.point_at_altitude(p, los, 0.0).unwrap();
        let gp = ellipsoid.transform_to_geodetic(ground);
        assert_abs_diff_eq!(gp.altitude, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn ray_missing_ellipsoid_is_reported() {
        let ellipsoid = Ellipsoid::wgs84();
        let p = Vector3::new(0.0, 0.0, 20_000_000.0);
        let los = Vector3::new(0.0, 0.0, 1.0); // pointing away, never crosses
        assert!(matches!(ellipsoid.point_at_altitude(p, los, 0.0), Err(Error::RayMissesEllipsoid)));
    }

    #[test]
    fn point_at_latitude_matches_target() {
        let ellipsoid = Ellipsoid::wgs84();
        let p = Vector3::new(8_000_000.0, 0.0, 4_000_000.0);
        let los = (Vector3::new(0.0, 0.0, 0.0) - p).normalize();
        let hit = ellipsoid.point_at_latitude(p, los, 0.4).unwrap();
        let gp = ellipsoid.transform_to_geodetic(hit);
        assert_abs_diff_eq!(gp.latitude, 0.4, epsilon = 1e-6);
    }
}
