//! Synthetic test doubles shared by the unit tests across this crate: a tiled
//! digital-elevation-model updater and a Hermite-interpolated trajectory.
//!
//! Kept behind `#[cfg(test)]` re-export only — these are fixtures, not part of
//! the public API.

use hifitime::{Duration, Epoch};
use nalgebra::{UnitQuaternion, Vector3};

use crate::cache::TileUpdater;
use crate::error::Result;
use crate::tile::Tile;

/// Shape of the synthetic terrain a [`GridTileUpdater`] hands out.
#[derive(Debug, Clone, Copy)]
pub enum Terrain {
    /// Flat terrain at a fixed elevation.
    Flat(f64),
    /// Checkerboard pattern alternating between two elevations, one cell wide.
    Checkerboard { low: f64, high: f64 },
    /// A single Gaussian hill centered at `(center_lat, center_lon)` (radians),
    /// `amplitude` meters tall, `sigma` radians wide.
    GaussianHill { center_lat: f64, center_lon: f64, amplitude: f64, sigma: f64 },
}

impl Terrain {
    fn elevation_at(&self, i: usize, j: usize, lat: f64, lon: f64) -> f64 {
        match *self {
            Terrain::Flat(h) => h,
            Terrain::Checkerboard { low, high } => {
                if (i + j) % 2 == 0 {
                    low
                } else {
                    high
                }
            }
            Terrain::GaussianHill { center_lat, center_lon, amplitude, sigma } => {
                let dlat = lat - center_lat;
                let dlon = lon - center_lon;
                let r2 = dlat * dlat + dlon * dlon;
                amplitude * (-r2 / (2.0 * sigma * sigma)).exp()
            }
        }
    }
}

/// Hands out fixed-size tiles on a regular lat/lon grid, covering the whole body.
pub struct GridTileUpdater {
    pub tile_size: f64,
    pub cells_per_tile: usize,
    pub terrain: Terrain,
}

impl TileUpdater for GridTileUpdater {
    fn update_tile(&self, lat: f64, lon: f64, tile: &mut Tile) -> Result<()> {
        let step = self.tile_size / self.cells_per_tile as f64;
        let tile_lat0 = (lat / self.tile_size).floor() * self.tile_size + step / 2.0;
        let tile_lon0 = (lon / self.tile_size).floor() * self.tile_size + step / 2.0;
        tile.set_geometry(tile_lat0, tile_lon0, step, step, self.cells_per_tile, self.cells_per_tile)?;
        for i in 0..self.cells_per_tile {
            let cell_lat = tile_lat0 + i as f64 * step;
            for j in 0..self.cells_per_tile {
                let cell_lon = tile_lon0 + j as f64 * step;
                tile.set_elevation(i, j, self.terrain.elevation_at(i, j, cell_lat, cell_lon))?;
            }
        }
        Ok(())
    }
}

/// One time-stamped ephemeris/attitude sample.
#[derive(Debug, Clone, Copy)]
pub struct TrajectorySample {
    pub date: Epoch,
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    pub attitude: UnitQuaternion<f64>,
    pub angular_velocity: Vector3<f64>,
}

/// Cubic-Hermite-interpolated spacecraft-to-inertial transform over a sparse
/// sample table, composed with a constant-rate rotating body frame (Earth-like
/// sidereal rotation about the polar axis) for the inertial-to-body leg.
///
/// This mirrors how a real orbit/attitude ephemeris is consumed: samples are
/// precomputed at a coarse cadence and refined by interpolation between them
/// rather than re-propagated on every query.
pub struct SimpleTrajectory {
    samples: Vec<TrajectorySample>,
    rotation_rate: f64,
    reference_epoch: Epoch,
    overshoot_tolerance: Duration,
}

impl SimpleTrajectory {
    /// `samples` must be sorted by `date` and contain at least two entries.
    /// `rotation_rate` is the body frame's constant angular rate about +z (rad/s).
    pub fn new(samples: Vec<TrajectorySample>, rotation_rate: f64) -> Self {
        assert!(samples.len() >= 2, "a trajectory needs at least two samples to interpolate between");
        let reference_epoch = samples[0].date;
        SimpleTrajectory {
            samples,
            rotation_rate,
            reference_epoch,
            overshoot_tolerance: Duration::from_seconds(0.0),
        }
    }

    pub fn with_overshoot_tolerance(mut self, tolerance: Duration) -> Self {
        self.overshoot_tolerance = tolerance;
        self
    }

    fn bracket(&self, date: Epoch) -> (usize, usize) {
        let idx = self.samples.partition_point(|s| s.date <= date);
        if idx == 0 {
            (0, 1)
        } else if idx >= self.samples.len() {
            (self.samples.len() - 2, self.samples.len() - 1)
        } else {
            (idx - 1, idx)
        }
    }
}

impl crate::transform::Trajectory for SimpleTrajectory {
    fn sc_to_inertial(&self, date: Epoch) -> crate::transform::RigidTransform {
        let (lo, hi) = self.bracket(date);
        let a = &self.samples[lo];
        let b = &self.samples[hi];
        let span = (b.date - a.date).to_seconds();
        let alpha = if span.abs() < 1e-12 { 0.0 } else { ((date - a.date).to_seconds() / span).clamp(0.0, 1.0) };

        // Cubic Hermite basis, consistent with the bracketing velocities.
        let h00 = 2.0 * alpha.powi(3) - 3.0 * alpha.powi(2) + 1.0;
        let h10 = alpha.powi(3) - 2.0 * alpha.powi(2) + alpha;
        let h01 = -2.0 * alpha.powi(3) + 3.0 * alpha.powi(2);
        let h11 = alpha.powi(3) - alpha.powi(2);

        let position = a.position * h00 + a.velocity * span * h10 + b.position * h01 + b.velocity * span * h11;

        // Velocity is the position Hermite's derivative, not a separately interpolated
        // quantity, so the two stay consistent under differentiation.
        let dh00 = 6.0 * alpha.powi(2) - 6.0 * alpha;
        let dh10 = 3.0 * alpha.powi(2) - 4.0 * alpha + 1.0;
        let dh01 = -6.0 * alpha.powi(2) + 6.0 * alpha;
        let dh11 = 3.0 * alpha.powi(2) - 2.0 * alpha;
        let velocity = if span.abs() < 1e-12 {
            a.velocity
        } else {
            (a.position * dh00 + a.velocity * span * dh10 + b.position * dh01 + b.velocity * span * dh11) / span
        };

        let rotation = a.attitude.slerp(&b.attitude, alpha);
        let rotation_rate = a.angular_velocity.lerp(&b.angular_velocity, alpha);

        crate::transform::RigidTransform::new(rotation, position, rotation_rate, velocity)
    }

    fn inertial_to_body(&self, date: Epoch) -> crate::transform::RigidTransform {
        let t = (date - self.reference_epoch).to_seconds();
        let angle = self.rotation_rate * t;
        let rotation = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angle);
        crate::transform::RigidTransform::new(rotation, Vector3::zeros(), Vector3::new(0.0, 0.0, self.rotation_rate), Vector3::zeros())
    }

    fn min_date(&self) -> Epoch {
        self.samples.first().unwrap().date
    }

    fn max_date(&self) -> Epoch {
        self.samples.last().unwrap().date
    }

    fn overshoot_tolerance(&self) -> Duration {
        self.overshoot_tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Trajectory;
    use approx::assert_abs_diff_eq;
    use hifitime::TimeScale;

    fn epoch(seconds: f64) -> Epoch {
        Epoch::from_gregorian(2024, 1, 1, 0, 0, 0, 0, TimeScale::UTC) + Duration::from_seconds(seconds)
    }

    #[test]
    fn grid_tile_updater_reports_checkerboard_bounds() {
        let updater = GridTileUpdater {
            tile_size: 2.0_f64.to_radians(),
            cells_per_tile: 4,
            terrain: Terrain::Checkerboard { low: 5.0, high: 15.0 },
        };
        let mut tile = Tile::new();
        updater.update_tile(0.1, 0.1, &mut tile).unwrap();
        tile.tile_update_completed().unwrap();
        assert_eq!(tile.min_elevation(), 5.0);
        assert_eq!(tile.max_elevation(), 15.0);
    }

    #[test]
    fn simple_trajectory_interpolates_through_samples() {
        let samples = vec![
            TrajectorySample {
                date: epoch(0.0),
                position: Vector3::new(7_000_000.0, 0.0, 0.0),
                velocity: Vector3::new(0.0, 7_500.0, 0.0),
                attitude: UnitQuaternion::identity(),
                angular_velocity: Vector3::zeros(),
            },
            TrajectorySample {
                date: epoch(100.0),
                position: Vector3::new(0.0, 750_000.0, 0.0),
                velocity: Vector3::new(-7_500.0, 0.0, 0.0),
                attitude: UnitQuaternion::identity(),
                angular_velocity: Vector3::zeros(),
            },
        ];
        let trajectory = SimpleTrajectory::new(samples, 7.292_115e-5);

        let at_start = trajectory.sc_to_inertial(epoch(0.0));
        assert_abs_diff_eq!(at_start.translation.x, 7_000_000.0, epsilon = 1e-6);

        let at_end = trajectory.sc_to_inertial(epoch(100.0));
        assert_abs_diff_eq!(at_end.translation.y, 750_000.0, epsilon = 1e-6);

        assert!(trajectory.is_in_range(epoch(50.0)));
        assert!(!trajectory.is_in_range(epoch(-10.0)));
    }

    #[test]
    fn body_frame_rotates_at_configured_rate() {
        let samples = vec![
            TrajectorySample {
                date: epoch(0.0),
                position: Vector3::zeros(),
                velocity: Vector3::zeros(),
                attitude: UnitQuaternion::identity(),
                angular_velocity: Vector3::zeros(),
            },
            TrajectorySample {
                date: epoch(10.0),
                position: Vector3::zeros(),
                velocity: Vector3::zeros(),
                attitude: UnitQuaternion::identity(),
                angular_velocity: Vector3::zeros(),
            },
        ];
        let rate = 1.0e-4;
        let trajectory = SimpleTrajectory::new(samples, rate);
        let body = trajectory.inertial_to_body(epoch(5.0));
        let expected = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), rate * 5.0);
        assert_abs_diff_eq!(body.rotation.angle(), expected.angle(), epsilon = 1e-12);
    }
}
