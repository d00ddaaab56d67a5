//! Line sensor model, mean-plane crossing search, and inverse-location refinement.

use std::f64::consts::FRAC_PI_2;

use hifitime::Epoch;
use nalgebra::Vector3;

use crate::corrections::{self, SPEED_OF_LIGHT};
use crate::ellipsoid::Ellipsoid;
use crate::error::Result;
use crate::geodetic::GeodeticPoint;
use crate::transform::Trajectory;

/// Hard bound on Newton iterations for the mean-plane-crossing search.
pub const MAX_EVAL: usize = 50;
/// Target accuracy, in pixels, for the coarse bisection pixel locate.
pub const COARSE_ACCURACY: f64 = 0.01;

const LINE_STEP_FOR_DERIVATIVE: f64 = 1e-3;

/// A push-broom line sensor: a fixed position in the spacecraft frame, a
/// per-pixel line-of-sight provider, a line-to-date mapping (possibly
/// nonlinear but monotone), and the precomputed mean viewing plane normal.
pub struct LineSensor {
    pub name: String,
    pub position: Vector3<f64>,
    pub pixel_count: usize,
    pub mean_plane_normal: Vector3<f64>,
    los_fn: Box<dyn Fn(Epoch, usize) -> Vector3<f64>>,
    date_fn: Box<dyn Fn(f64) -> Epoch>,
    rate_fn: Box<dyn Fn(f64) -> f64>,
}

impl LineSensor {
    pub fn new(
        name: impl Into<String>,
        position: Vector3<f64>,
        pixel_count: usize,
        mean_plane_normal: Vector3<f64>,
        los_fn: impl Fn(Epoch, usize) -> Vector3<f64> + 'static,
        date_fn: impl Fn(f64) -> Epoch + 'static,
        rate_fn: impl Fn(f64) -> f64 + 'static,
    ) -> Self {
        LineSensor {
            name: name.into(),
            position,
            pixel_count,
            mean_plane_normal: mean_plane_normal.normalize(),
            los_fn: Box::new(los_fn),
            date_fn: Box::new(date_fn),
            rate_fn: Box::new(rate_fn),
        }
    }

    /// Unit line-of-sight of pixel `i` at `date`, in the spacecraft frame.
    pub fn los(&self, date: Epoch, i: usize) -> Vector3<f64> {
        (self.los_fn)(date, i).normalize()
    }

    pub fn date(&self, line: f64) -> Epoch {
        (self.date_fn)(line)
    }

    /// `d(line)/d(time)`, in lines per second.
    pub fn rate(&self, line: f64) -> f64 {
        (self.rate_fn)(line)
    }
}

/// The target's apparent direction from the sensor, in the spacecraft frame, at a
/// given line, together with its first derivative with respect to line — used by
/// both the mean-plane-crossing Newton search and the per-pixel refinement.
fn target_direction_at_line<T: Trajectory>(
    sensor: &LineSensor,
    trajectory: &T,
    target_body: Vector3<f64>,
    line: f64,
    light_time_correction: bool,
    aberration_correction: bool,
) -> Vector3<f64> {
    let date = sensor.date(line);
    let sc_to_inertial = trajectory.sc_to_inertial(date);
    let inertial_to_body = trajectory.inertial_to_body(date);
    let body_to_inertial = inertial_to_body.inverse();
    let satellite_position_inertial = sc_to_inertial.translation;

    let target_inertial = if light_time_correction {
        let (ground, _dt) = corrections::iterate_light_time(satellite_position_inertial, |dt_seconds| {
            let shifted_date = date + hifitime::Duration::from_seconds(dt_seconds);
            trajectory.inertial_to_body(shifted_date).inverse().transform_position(target_body)
        });
        ground
    } else {
        body_to_inertial.transform_position(target_body)
    };

    let mut direction_inertial = target_inertial - satellite_position_inertial;

    if aberration_correction {
        let l_obs = direction_inertial.normalize() * SPEED_OF_LIGHT;
        direction_inertial = corrections::aberration_of_light(l_obs, sc_to_inertial.velocity);
    }

    // `direction_inertial` is a free vector (satellite -> target), so only the
    // rotation part of the inverse transform applies; translation would be wrong here.
    let direction_in_sc_frame = sc_to_inertial.inverse().transform_vector(direction_inertial);
    (direction_in_sc_frame - sensor.position).normalize()
}

/// Central-difference derivative of `target_direction_at_line` with respect to line.
fn target_direction_derivative<T: Trajectory>(sensor: &LineSensor, trajectory: &T, target_body: Vector3<f64>, line: f64, light_time_correction: bool, aberration_correction: bool) -> Vector3<f64> {
    let h = LINE_STEP_FOR_DERIVATIVE;
    let plus = target_direction_at_line(sensor, trajectory, target_body, line + h, light_time_correction, aberration_correction);
    let minus = target_direction_at_line(sensor, trajectory, target_body, line - h, light_time_correction, aberration_correction);
    (plus - minus) / (2.0 * h)
}

fn angle_between(a: Vector3<f64>, b: Vector3<f64>) -> f64 {
    (a.normalize().dot(&b.normalize())).clamp(-1.0, 1.0).acos()
}

#[derive(Debug, Clone, Copy)]
pub struct MeanPlaneCrossing {
    pub line: f64,
    pub target_direction: Vector3<f64>,
    pub target_direction_derivative: Vector3<f64>,
}

/// Searches for the line at which the target crosses the sensor's mean viewing plane.
pub struct SensorMeanPlaneCrossing<'a, T: Trajectory> {
    sensor: &'a LineSensor,
    trajectory: &'a T,
    min_line: f64,
    max_line: f64,
    accuracy: f64,
    light_time_correction: bool,
    aberration_correction: bool,
}

impl<'a, T: Trajectory> SensorMeanPlaneCrossing<'a, T> {
    pub fn new(sensor: &'a LineSensor, trajectory: &'a T, min_line: f64, max_line: f64, accuracy: f64, light_time_correction: bool, aberration_correction: bool) -> Self {
        SensorMeanPlaneCrossing {
            sensor,
            trajectory,
            min_line,
            max_line,
            accuracy,
            light_time_correction,
            aberration_correction,
        }
    }

    fn direction_and_derivative(&self, target_body: Vector3<f64>, line: f64) -> (Vector3<f64>, Vector3<f64>) {
        let dir = target_direction_at_line(self.sensor, self.trajectory, target_body, line, self.light_time_correction, self.aberration_correction);
        let ddir = target_direction_derivative(self.sensor, self.trajectory, target_body, line, self.light_time_correction, self.aberration_correction);
        (dir, ddir)
    }

    /// Newton search for the mean-plane crossing, bounded by `MAX_EVAL` iterations
    /// and clamped at most once at each of `min_line`/`max_line`.
    pub fn find(&self, target_body: Vector3<f64>) -> Option<MeanPlaneCrossing> {
        let mut line = 0.5 * (self.min_line + self.max_line);
        let mut clamped_min = false;
        let mut clamped_max = false;

        for _ in 0..MAX_EVAL {
            let (dir, ddir) = self.direction_and_derivative(target_body, line);
            let beta = angle_between(dir, self.sensor.mean_plane_normal);

            // dβ/dline via the chain rule on acos(dir·n / (|dir||n|)); since n is
            // fixed and dir is already unit by construction, this reduces to the
            // projection of the direction derivative onto the plane tangent.
            let sin_beta = (1.0 - beta.cos().powi(2)).max(1e-12).sqrt();
            let dbeta = -ddir.dot(&self.sensor.mean_plane_normal) / sin_beta;

            let residual = FRAC_PI_2 - beta;
            if residual.abs() <= self.accuracy * dbeta.abs().max(1e-12) {
                return Some(MeanPlaneCrossing {
                    line,
                    target_direction: dir,
                    target_direction_derivative: ddir,
                });
            }
            if dbeta.abs() < 1e-300 {
                return None;
            }

            line += residual / dbeta;

            if line < self.min_line {
                if clamped_min {
                    return None;
                }
                line = self.min_line;
                clamped_min = true;
            } else if line > self.max_line {
                if clamped_max {
                    return None;
                }
                line = self.max_line;
                clamped_max = true;
            }
        }
        None
    }
}

/// Bisects the sensor's pixel fan to find the pixel whose local in-fan azimuth
/// brackets `target_direction`, to within `COARSE_ACCURACY` pixels. Assumes the
/// fan's azimuth is monotone in pixel index, as for a real push-broom array.
fn coarse_pixel(sensor: &LineSensor, date: Epoch, target_direction: Vector3<f64>) -> f64 {
    let n = sensor.pixel_count;
    if n < 2 {
        return 0.0;
    }

    let metric = |i: usize| -> f64 {
        let l = sensor.los(date, i);
        let y = sensor.mean_plane_normal.cross(&l);
        y.dot(&target_direction).atan2(l.dot(&target_direction))
    };

    let mut lo = 0usize;
    let mut hi = n - 1;
    let ascending = metric(hi) >= metric(lo);
    while hi - lo > 1 {
        let mid = (lo + hi) / 2;
        let m = metric(mid);
        if (m < 0.0) == ascending {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    let m_lo = metric(lo);
    let m_hi = metric(hi);
    if (m_hi - m_lo).abs() < 1e-15 {
        lo as f64
    } else {
        lo as f64 + (0.0 - m_lo) / (m_hi - m_lo)
    }
}

/// Exact per-pixel refinement around a coarse pixel estimate: builds the local
/// (in-plane, cross-plane) frame from the two bracketing pixel LOS vectors and
/// solves for the line correction that exactly crosses that local plane, then the
/// fractional pixel offset within it.
#[allow(clippy::too_many_arguments)]
fn refine_pixel<T: Trajectory>(
    sensor: &LineSensor,
    trajectory: &T,
    target_body: Vector3<f64>,
    mpc: &MeanPlaneCrossing,
    coarse_pixel_estimate: f64,
    light_time_correction: bool,
    aberration_correction: bool,
) -> (f64, f64) {
    let i_low = (coarse_pixel_estimate.floor() as i64).clamp(0, sensor.pixel_count as i64 - 2) as usize;
    let date0 = sensor.date(mpc.line);
    let l0 = sensor.los(date0, i_low);
    let l1 = sensor.los(date0, i_low + 1);
    let z = l0.cross(&l1).normalize();

    let local_beta = angle_between(mpc.target_direction, z);
    let sin_beta = (1.0 - local_beta.cos().powi(2)).max(1e-12).sqrt();
    let dbeta = -mpc.target_direction_derivative.dot(&z) / sin_beta;
    let delta_line = if dbeta.abs() > 1e-300 { (FRAC_PI_2 - local_beta) / dbeta } else { 0.0 };
    let fixed_line = mpc.line + delta_line;

    let fixed_direction = target_direction_at_line(sensor, trajectory, target_body, fixed_line, light_time_correction, aberration_correction);

    let date1 = sensor.date(fixed_line);
    let l0 = sensor.los(date1, i_low);
    let l1 = sensor.los(date1, i_low + 1);
    let x = l0;
    let zz = l0.cross(&l1).normalize();
    let y = zz.cross(&x);

    let pixel_width = l1.dot(&y).atan2(l1.dot(&x));
    let pixel_offset = fixed_direction.dot(&y).atan2(fixed_direction.dot(&x)) / pixel_width;

    (fixed_line, i_low as f64 + pixel_offset)
}

/// Finds the `(line, pixel)` observing `target`, searching `[min_line, max_line]`.
/// Returns `Ok(None)` (not an error) when the target is never seen in that range.
#[allow(clippy::too_many_arguments)]
pub fn inverse_location<T: Trajectory>(
    sensor: &LineSensor,
    trajectory: &T,
    ellipsoid: &Ellipsoid,
    target: GeodeticPoint,
    min_line: f64,
    max_line: f64,
    accuracy: f64,
    light_time_correction: bool,
    aberration_correction: bool,
) -> Result<Option<(f64, f64)>> {
    let target_body = ellipsoid.transform_to_cartesian(target);
    let crossing = SensorMeanPlaneCrossing::new(sensor, trajectory, min_line, max_line, accuracy, light_time_correction, aberration_correction);

    let Some(mpc) = crossing.find(target_body) else {
        return Ok(None);
    };

    let coarse = coarse_pixel(sensor, sensor.date(mpc.line), mpc.target_direction);
    let (fixed_line, pixel) = refine_pixel(sensor, trajectory, target_body, &mpc, coarse, light_time_correction, aberration_correction);

    if pixel < 0.0 || pixel > (sensor.pixel_count - 1) as f64 {
        return Ok(None);
    }
    Ok(Some((fixed_line, pixel)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::RigidTransform;
    use approx::assert_abs_diff_eq;
    use hifitime::{Duration, Epoch, TimeScale};
    use nalgebra::UnitQuaternion;

    /// A non-rotating body frame and a spacecraft moving on a straight line
    /// directly above the equator, looking straight down (nadir) with a small
    /// across-track fan — enough to exercise the crossing search and refinement
    /// without a full orbit propagator.
    struct NadirTrajectory {
        altitude: f64,
        speed: f64,
    }

    impl Trajectory for NadirTrajectory {
        fn sc_to_inertial(&self, date: Epoch) -> RigidTransform {
            let t = (date - self.epoch()).to_seconds();
            let x = self.speed * t;
            RigidTransform::new(
                UnitQuaternion::identity(),
                Vector3::new(x, 0.0, 6_378_137.0 + self.altitude),
                Vector3::zeros(),
                Vector3::new(self.speed, 0.0, 0.0),
            )
        }

        fn inertial_to_body(&self, _date: Epoch) -> RigidTransform {
            RigidTransform::identity()
        }

        fn min_date(&self) -> Epoch {
            self.epoch() - Duration::from_seconds(1000.0)
        }
        fn max_date(&self) -> Epoch {
            self.epoch() + Duration::from_seconds(1000.0)
        }
        fn overshoot_tolerance(&self) -> Duration {
            Duration::from_seconds(1.0)
        }
    }

    impl NadirTrajectory {
        fn epoch(&self) -> Epoch {
            Epoch::from_gregorian(2024, 1, 1, 0, 0, 0, 0, TimeScale::UTC)
        }
    }

    fn nadir_sensor(pixel_count: usize) -> LineSensor {
        let fan_half_angle = 0.05_f64; // radians, small across-track fan
        LineSensor::new(
            "test-sensor",
            Vector3::zeros(),
            pixel_count,
            Vector3::new(1.0, 0.0, 0.0), // mean plane normal: along-track axis
            move |_date, i| {
                let frac = if pixel_count > 1 { i as f64 / (pixel_count - 1) as f64 - 0.5 } else { 0.0 };
                let angle = frac * 2.0 * fan_half_angle;
                Vector3::new(0.0, angle.sin(), -angle.cos())
            },
            move |line| Epoch::from_gregorian(2024, 1, 1, 0, 0, 0, 0, TimeScale::UTC) + Duration::from_seconds(line * 0.01),
            |_line| 100.0,
        )
    }

    #[test]
    fn inverse_location_recovers_nadir_pixel() {
        let trajectory = NadirTrajectory { altitude: 700_000.0, speed: 7_500.0 };
        let sensor = nadir_sensor(11);
        let ellipsoid = Ellipsoid::wgs84();

        let date_at_line_50 = sensor.date(50.0);
        let sc = trajectory.sc_to_inertial(date_at_line_50);
        let ground = Vector3::new(sc.translation.x, 0.0, 6_378_137.0);
        let target = ellipsoid.transform_to_geodetic(ground);

        let result = inverse_location(&sensor, &trajectory, &ellipsoid, target, 0.0, 100.0, 1e-8, false, false).unwrap();
        let (line, pixel) = result.expect("target should be within the search range");
        assert_abs_diff_eq!(line, 50.0, epsilon = 0.05);
        assert_abs_diff_eq!(pixel, 5.0, epsilon = 0.05);
    }

    #[test]
    fn target_outside_range_returns_none() {
        let trajectory = NadirTrajectory { altitude: 700_000.0, speed: 7_500.0 };
        let sensor = nadir_sensor(11);
        let ellipsoid = Ellipsoid::wgs84();
        // A target far off the ground track and far from any crossing in range.
        let target = GeodeticPoint::new(80.0_f64.to_radians(), 0.0, 0.0);
        let result = inverse_location(&sensor, &trajectory, &ellipsoid, target, 0.0, 100.0, 1e-8, false, false).unwrap();
        assert!(result.is_none());
    }
}
