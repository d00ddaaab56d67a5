//! Rigid-body transforms between reference frames, and the trajectory contract
//! that supplies them over time.

use hifitime::Epoch;
use nalgebra::{UnitQuaternion, Vector3};

/// A rigid transform between two frames: rotation, translation, and their time
/// derivatives (angular velocity, velocity), all expressed in the origin frame.
#[derive(Debug, Clone, Copy)]
pub struct RigidTransform {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
    pub rotation_rate: Vector3<f64>,
    pub velocity: Vector3<f64>,
}

impl RigidTransform {
    pub fn identity() -> Self {
        RigidTransform {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
            rotation_rate: Vector3::zeros(),
            velocity: Vector3::zeros(),
        }
    }

    pub fn new(rotation: UnitQuaternion<f64>, translation: Vector3<f64>, rotation_rate: Vector3<f64>, velocity: Vector3<f64>) -> Self {
        RigidTransform {
            rotation,
            translation,
            rotation_rate,
            velocity,
        }
    }

    /// Maps a point from the origin frame to the destination frame.
    pub fn transform_position(&self, p: Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Maps a free vector (direction, velocity) from the origin frame to the
    /// destination frame: rotation only, no translation.
    pub fn transform_vector(&self, v: Vector3<f64>) -> Vector3<f64> {
        self.rotation * v
    }

    /// The inverse transform, mapping destination-frame quantities back to the origin frame.
    pub fn inverse(&self) -> Self {
        let inv_rotation = self.rotation.inverse();
        RigidTransform {
            rotation: inv_rotation,
            translation: inv_rotation * (-self.translation),
            rotation_rate: -(inv_rotation * self.rotation_rate),
            velocity: inv_rotation * (-self.velocity),
        }
    }

    /// Composes `self` after `other`: applying the result equals applying `other`
    /// then `self`.
    pub fn compose(&self, other: &Self) -> Self {
        RigidTransform {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
            rotation_rate: self.rotation_rate + self.rotation * other.rotation_rate,
            velocity: self.velocity + self.rotation * other.velocity,
        }
    }

    /// Linear interpolation between two transforms sampled at nearby dates;
    /// used to refresh a mean-plane-crossing search between precomputed samples.
    ///
    /// Rotation is interpolated with spherical linear interpolation (`nlerp` would
    /// do for the small angular steps involved here); translation and rates are
    /// interpolated linearly.
    pub fn interpolate(a: &Self, b: &Self, alpha: f64) -> Self {
        RigidTransform {
            rotation: a.rotation.slerp(&b.rotation, alpha),
            translation: a.translation.lerp(&b.translation, alpha),
            rotation_rate: a.rotation_rate.lerp(&b.rotation_rate, alpha),
            velocity: a.velocity.lerp(&b.velocity, alpha),
        }
    }
}

/// Supplies the rigid transforms between the spacecraft, inertial, and body
/// frames at any date within its validity range.
///
/// Implementations own the interpolation of time-stamped position/velocity/attitude
/// samples; the geolocation core only ever calls these two accessors.
pub trait Trajectory {
    /// Transform from the spacecraft frame to the inertial frame at `date`.
    fn sc_to_inertial(&self, date: Epoch) -> RigidTransform;

    /// Transform from the inertial frame to the body-fixed (rotating) frame at `date`.
    fn inertial_to_body(&self, date: Epoch) -> RigidTransform;

    fn min_date(&self) -> Epoch;
    fn max_date(&self) -> Epoch;

    /// How far past `[min_date, max_date]` a query may still be served, by
    /// extrapolation, before `is_in_range` rejects it.
    fn overshoot_tolerance(&self) -> hifitime::Duration;

    fn is_in_range(&self, date: Epoch) -> bool {
        date >= self.min_date() - self.overshoot_tolerance() && date <= self.max_date() + self.overshoot_tolerance()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn inverse_undoes_transform() {
        let rotation = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2);
        let t = RigidTransform::new(rotation, Vector3::new(1.0, 2.0, 3.0), Vector3::zeros(), Vector3::new(7.0, 0.0, 0.0));
        let p = Vector3::new(10.0, -4.0, 2.0);
        let forward = t.transform_position(p);
        let back = t.inverse().transform_position(forward);
        assert_abs_diff_eq!(back.x, p.x, epsilon = 1e-10);
        assert_abs_diff_eq!(back.y, p.y, epsilon = 1e-10);
        assert_abs_diff_eq!(back.z, p.z, epsilon = 1e-10);
    }

    #[test]
    fn compose_matches_sequential_application() {
        let a = RigidTransform::new(UnitQuaternion::from_axis_angle(&Vector3::z_axis(), 0.3), Vector3::new(1.0, 0.0, 0.0), Vector3::zeros(), Vector3::zeros());
        let b = RigidTransform::new(UnitQuaternion::from_axis_angle(&Vector3::y_axis(), 0.2), Vector3::new(0.0, 1.0, 0.0), Vector3::zeros(), Vector3::zeros());
        let p = Vector3::new(2.0, 3.0, 5.0);
        let composed = a.compose(&b).transform_position(p);
        let sequential = a.transform_position(b.transform_position(p));
        assert_abs_diff_eq!(composed.x, sequential.x, epsilon = 1e-10);
        assert_abs_diff_eq!(composed.y, sequential.y, epsilon = 1e-10);
        assert_abs_diff_eq!(composed.z, sequential.z, epsilon = 1e-10);
    }
}
