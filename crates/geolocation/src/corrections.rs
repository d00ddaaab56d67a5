//! Light-time and aberration-of-light geometric corrections.
//!
//! Both are independent, optional refinements applied around the core ray/terrain
//! intersection: aberration corrects the observed line-of-sight direction for the
//! spacecraft's own motion before the ray is cast; light-time corrects the target's
//! apparent position for the finite speed of light after an approximate intersection
//! is known.

use nalgebra::Vector3;

/// Speed of light in vacuum, meters per second.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Number of fixed-point iterations used to converge the light-time delay.
/// Two iterations are sufficient at near-Earth orbital speeds (the correction
/// itself is already sub-millisecond; the second iteration refines it to well
/// under a micrometer of ground displacement).
pub const LIGHT_TIME_ITERATIONS: usize = 2;

/// Solves `c*l + v_sat = k*l_obs` for the true unit line-of-sight `l` and scale `k >= 0`,
/// given the observed direction `l_obs` (not necessarily unit) and spacecraft velocity
/// `v_sat`, both in the same inertial frame.
///
/// This is the classical (non-relativistic) velocity-addition correction: adequate at
/// spacecraft speeds (a few km/s against `c`).
pub fn aberration_of_light(l_obs: Vector3<f64>, v_sat: Vector3<f64>) -> Vector3<f64> {
    let a = l_obs.dot(&l_obs);
    let b = -l_obs.dot(&v_sat);
    let c = v_sat.dot(&v_sat) - SPEED_OF_LIGHT * SPEED_OF_LIGHT;
    let s = (b * b - a * c).max(0.0).sqrt();

    let k = if b > 0.0 { -c / (s + b) } else { (s - b) / a };

    (l_obs * k - v_sat) / SPEED_OF_LIGHT
}

/// Hook for an atmospheric-refraction correction on the line-of-sight direction,
/// applied (if ever) between aberration correction and the terrain intersection.
///
/// No implementation ships in this crate: refraction modeling needs an atmospheric
/// density profile this core has no opinion on. A caller with one can implement
/// this trait and bend `los` before handing it to [`crate::intersection::intersect`].
pub trait RefractionCorrection {
    fn apply(&self, position: Vector3<f64>, los: Vector3<f64>) -> Vector3<f64>;
}

/// Converges the light-time delay by repeatedly re-evaluating the ground point at
/// an earlier date, fixed-point style: `ground_point_at(dt)` must return the ground
/// point as it would be observed if light took `dt` additional seconds (negative)
/// to travel, i.e. the body/target position at `date + dt`.
pub fn iterate_light_time(satellite_position: Vector3<f64>, mut ground_point_at: impl FnMut(f64) -> Vector3<f64>) -> (Vector3<f64>, f64) {
    let mut ground = ground_point_at(0.0);
    let mut dt = 0.0;
    for _ in 0..LIGHT_TIME_ITERATIONS {
        dt = -(ground - satellite_position).norm() / SPEED_OF_LIGHT;
        ground = ground_point_at(dt);
    }
    (ground, dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn aberration_is_negligible_for_zero_velocity() {
        let l_obs = Vector3::new(1.0, 0.0, 0.0) * SPEED_OF_LIGHT;
        let l = aberration_of_light(l_obs, Vector3::zeros());
        assert_abs_diff_eq!(l.x, 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(l.norm(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn aberration_shifts_direction_towards_velocity() {
        let l_obs = Vector3::new(1.0, 0.0, 0.0) * SPEED_OF_LIGHT;
        let v_sat = Vector3::new(0.0, 7_500.0, 0.0); // typical LEO speed
        let l = aberration_of_light(l_obs, v_sat);
        assert_abs_diff_eq!(l.norm(), 1.0, epsilon = 1e-9);
        assert!(l.y < 0.0, "true direction should tilt opposite to spacecraft velocity");
    }

    #[test]
    fn light_time_converges_for_stationary_target() {
        let satellite_position = Vector3::new(7_000_000.0, 0.0, 0.0);
        let target = Vector3::new(6_378_137.0, 0.0, 0.0);
        let (ground, dt) = iterate_light_time(satellite_position, |_| target);
        assert_abs_diff_eq!(ground.x, target.x, epsilon = 1e-9);
        let expected_dt = -(target - satellite_position).norm() / SPEED_OF_LIGHT;
        assert_abs_diff_eq!(dt, expected_dt, epsilon = 1e-12);
    }
}
