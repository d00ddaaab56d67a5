//! Public facade: wires the ellipsoid, tile cache, sensors, and trajectory together
//! behind `directLocation` / `inverseLocation` / `dateLocation`.

use std::collections::HashMap;

use hifitime::{Duration, Epoch};
use nalgebra::Vector3;

use crate::cache::{TileCache, TileUpdater};
use crate::corrections::{self, SPEED_OF_LIGHT};
use crate::ellipsoid::Ellipsoid;
use crate::error::{Error, Result};
use crate::geodetic::GeodeticPoint;
use crate::intersection::{self, IntersectionAlgorithm};
use crate::sensor::{self, LineSensor};
use crate::transform::Trajectory;

/// Number of light-time fixed-point iterations applied around a direct-location
/// intersection; mirrors `corrections::LIGHT_TIME_ITERATIONS`.
const LIGHT_TIME_ITERATIONS: usize = corrections::LIGHT_TIME_ITERATIONS;
/// Default Newton-accuracy (fractional line units: the search stops once the
/// next Newton step would move `line` by less than this) for the mean-plane-crossing search.
const DEFAULT_CROSSING_ACCURACY: f64 = 1e-8;

/// Builder for a [`Geolocation`] instance: mirrors the construction-time choices
/// that are fixed for the lifetime of the instance (ellipsoid, algorithm,
/// correction flags, cache sizing and overlap mode).
pub struct GeolocationBuilder<T, U> {
    ellipsoid: Ellipsoid,
    trajectory: T,
    updater: U,
    overlapping: bool,
    max_tiles: usize,
    algorithm: IntersectionAlgorithm,
    light_time_correction: bool,
    aberration_of_light_correction: bool,
    crossing_accuracy: f64,
}

impl<T: Trajectory, U: TileUpdater> GeolocationBuilder<T, U> {
    pub fn new(ellipsoid: Ellipsoid, trajectory: T, updater: U) -> Self {
        GeolocationBuilder {
            ellipsoid,
            trajectory,
            updater,
            overlapping: false,
            max_tiles: 16,
            algorithm: IntersectionAlgorithm::Duvenhage,
            light_time_correction: true,
            aberration_of_light_correction: true,
            crossing_accuracy: DEFAULT_CROSSING_ACCURACY,
        }
    }

    pub fn overlapping_tiles(mut self, overlapping: bool) -> Self {
        self.overlapping = overlapping;
        self
    }

    pub fn max_tiles(mut self, max_tiles: usize) -> Self {
        self.max_tiles = max_tiles;
        self
    }

    pub fn algorithm(mut self, algorithm: IntersectionAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn light_time_correction(mut self, enabled: bool) -> Self {
        self.light_time_correction = enabled;
        self
    }

    pub fn aberration_of_light_correction(mut self, enabled: bool) -> Self {
        self.aberration_of_light_correction = enabled;
        self
    }

    pub fn crossing_accuracy(mut self, accuracy: f64) -> Self {
        self.crossing_accuracy = accuracy;
        self
    }

    pub fn build(self) -> Geolocation<T, U> {
        Geolocation {
            ellipsoid: self.ellipsoid,
            trajectory: self.trajectory,
            cache: TileCache::new(self.updater, self.overlapping, self.max_tiles),
            sensors: HashMap::new(),
            algorithm: self.algorithm,
            light_time_correction: self.light_time_correction,
            aberration_of_light_correction: self.aberration_of_light_correction,
            crossing_accuracy: self.crossing_accuracy,
        }
    }
}

/// The assembled geolocation core: one ellipsoid, one trajectory, one tile cache,
/// and a registry of named line sensors.
///
/// Per the single-threaded cooperative scheduling model, a `Geolocation` instance
/// must not be shared across threads — the tile cache mutates its MRU array on
/// every query.
pub struct Geolocation<T, U> {
    ellipsoid: Ellipsoid,
    trajectory: T,
    cache: TileCache<U>,
    sensors: HashMap<String, LineSensor>,
    algorithm: IntersectionAlgorithm,
    light_time_correction: bool,
    aberration_of_light_correction: bool,
    crossing_accuracy: f64,
}

impl<T: Trajectory, U: TileUpdater> Geolocation<T, U> {
    pub fn add_sensor(&mut self, sensor: LineSensor) {
        self.sensors.insert(sensor.name.clone(), sensor);
    }

    fn sensor(&self, name: &str) -> Result<&LineSensor> {
        self.sensors.get(name).ok_or_else(|| Error::UnknownSensor(name.to_string()))
    }

    /// Intersects a single ray (given directly in the spacecraft frame at `date`)
    /// with the terrain, applying the configured corrections and algorithm.
    pub fn direct_location_ray(&mut self, date: Epoch, position_sc: Vector3<f64>, los_sc: Vector3<f64>) -> Result<GeodeticPoint> {
        let sc_to_inertial = self.trajectory.sc_to_inertial(date);
        let position_inertial = sc_to_inertial.transform_position(position_sc);
        let mut los_inertial = sc_to_inertial.transform_vector(los_sc);

        if self.aberration_of_light_correction {
            let l_obs = los_inertial.normalize() * SPEED_OF_LIGHT;
            los_inertial = corrections::aberration_of_light(l_obs, sc_to_inertial.velocity);
        }

        let position_body_nominal = self.trajectory.inertial_to_body(date).transform_position(position_inertial);

        let mut intersect_at = |this: &mut Self, dt_seconds: f64| -> Result<Vector3<f64>> {
            let shifted_date = date + Duration::from_seconds(dt_seconds);
            let inertial_to_body = this.trajectory.inertial_to_body(shifted_date);
            let position_body = inertial_to_body.transform_position(position_inertial);
            let los_body = inertial_to_body.transform_vector(los_inertial);
            intersection::intersect(this.algorithm, &mut this.cache, &this.ellipsoid, position_body, los_body)
        };

        let mut ground = intersect_at(self, 0.0)?;
        if self.light_time_correction {
            for _ in 0..LIGHT_TIME_ITERATIONS {
                let dt = -(ground - position_body_nominal).norm() / SPEED_OF_LIGHT;
                ground = intersect_at(self, dt)?;
            }
        }

        Ok(self.ellipsoid.transform_to_geodetic(ground))
    }

    /// Direct location of every pixel of line `line_number` on sensor `sensor_name`.
    pub fn direct_location(&mut self, sensor_name: &str, line_number: f64) -> Result<Vec<GeodeticPoint>> {
        let sensor = self.sensor(sensor_name)?;
        let date = sensor.date(line_number);
        let position = sensor.position;
        let pixel_count = sensor.pixel_count;
        let los: Vec<Vector3<f64>> = (0..pixel_count).map(|i| sensor.los(date, i)).collect();

        los.into_iter().map(|l| self.direct_location_ray(date, position, l)).collect()
    }

    /// The `(line, pixel)` on `sensor_name` observing geodetic point `(lat, lon)`
    /// (altitude taken from the DEM at that point), searched within `[min_line, max_line]`.
    pub fn inverse_location(&mut self, sensor_name: &str, lat: f64, lon: f64, min_line: f64, max_line: f64) -> Result<Option<(f64, f64)>> {
        let accuracy = self.crossing_accuracy;
        let light_time = self.light_time_correction;
        let aberration = self.aberration_of_light_correction;
        let ellipsoid = self.ellipsoid.clone();
        let sensor_name_owned = sensor_name.to_string();

        // Resolve the target's altitude against the DEM: cast a straight-down ray
        // from high above `(lat, lon)` through the terrain, same engine as direct location.
        let probe_from = ellipsoid.transform_to_cartesian(GeodeticPoint::new(lat, lon, 1_000_000.0));
        let probe_to = ellipsoid.transform_to_cartesian(GeodeticPoint::new(lat, lon, 0.0));
        let probe_los = (probe_to - probe_from).normalize();
        let ground = intersection::intersect(self.algorithm, &mut self.cache, &ellipsoid, probe_from, probe_los)?;
        let target = ellipsoid.transform_to_geodetic(ground);

        let sensor = self.sensor(&sensor_name_owned)?;
        sensor::inverse_location(sensor, &self.trajectory, &ellipsoid, target, min_line, max_line, accuracy, light_time, aberration)
    }

    /// The date at which `sensor_name` observes `(lat, lon)`, if any, within `[min_line, max_line]`.
    pub fn date_location(&mut self, sensor_name: &str, lat: f64, lon: f64, min_line: f64, max_line: f64) -> Result<Option<Epoch>> {
        let result = self.inverse_location(sensor_name, lat, lon, min_line, max_line)?;
        match result {
            Some((line, _pixel)) => {
                let sensor = self.sensor(sensor_name)?;
                Ok(Some(sensor.date(line)))
            }
            None => Ok(None),
        }
    }
}

/// Self-describing tag persisted alongside a serialized trajectory-transforms cache,
/// so a later-configured ellipsoid's body frame can be checked against the frame the
/// interpolator was built for.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InterpolatorDumpHeader {
    pub format_version: u32,
    pub frame: String,
}

impl InterpolatorDumpHeader {
    pub fn new(frame: impl Into<String>) -> Self {
        InterpolatorDumpHeader {
            format_version: 1,
            frame: frame.into(),
        }
    }

    pub fn check_frame(&self, ellipsoid: &Ellipsoid) -> Result<()> {
        if self.frame != ellipsoid.frame {
            return Err(Error::FramesMismatchWithInterpolatorDump {
                loaded: self.frame.clone(),
                configured: ellipsoid.frame.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::Tile;
    use crate::transform::RigidTransform;
    use approx::assert_abs_diff_eq;
    use hifitime::TimeScale;
    use nalgebra::UnitQuaternion;

    struct FlatDem {
        elevation: f64,
    }

    impl TileUpdater for FlatDem {
        fn update_tile(&self, lat: f64, lon: f64, tile: &mut Tile) -> Result<()> {
            let step = 1.0_f64.to_radians();
            let lat0 = (lat / step).floor() * step;
            let lon0 = (lon / step).floor() * step;
            tile.set_geometry(lat0, lon0, step, step, 5, 5)?;
            for i in 0..5 {
                for j in 0..5 {
                    tile.set_elevation(i, j, self.elevation)?;
                }
            }
            Ok(())
        }
    }

    struct StationKeeping {
        altitude: f64,
    }

    impl Trajectory for StationKeeping {
        fn sc_to_inertial(&self, _date: Epoch) -> RigidTransform {
            RigidTransform::new(UnitQuaternion::identity(), Vector3::new(6_378_137.0 + self.altitude, 0.0, 0.0), Vector3::zeros(), Vector3::zeros())
        }
        fn inertial_to_body(&self, _date: Epoch) -> RigidTransform {
            RigidTransform::identity()
        }
        fn min_date(&self) -> Epoch {
            Epoch::from_gregorian(2024, 1, 1, 0, 0, 0, 0, TimeScale::UTC)
        }
        fn max_date(&self) -> Epoch {
            Epoch::from_gregorian(2024, 1, 2, 0, 0, 0, 0, TimeScale::UTC)
        }
        fn overshoot_tolerance(&self) -> Duration {
            Duration::from_seconds(1.0)
        }
    }

    #[test]
    fn direct_location_ray_hits_configured_elevation() {
        let ellipsoid = Ellipsoid::wgs84();
        let trajectory = StationKeeping { altitude: 700_000.0 };
        let mut geo = GeolocationBuilder::new(ellipsoid, trajectory, FlatDem { elevation: 123.0 })
            .overlapping_tiles(true)
            .light_time_correction(false)
            .aberration_of_light_correction(false)
            .build();

        let date = Epoch::from_gregorian(2024, 1, 1, 0, 0, 0, 0, TimeScale::UTC);
        let gp = geo.direct_location_ray(date, Vector3::zeros(), Vector3::new(-1.0, 0.0, 0.0)).unwrap();
        assert_abs_diff_eq!(gp.altitude, 123.0, epsilon = 1e-2);
    }

    #[test]
    fn unknown_sensor_is_reported() {
        let ellipsoid = Ellipsoid::wgs84();
        let trajectory = StationKeeping { altitude: 700_000.0 };
        let mut geo = GeolocationBuilder::new(ellipsoid, trajectory, FlatDem { elevation: 0.0 }).overlapping_tiles(true).build();
        let result = geo.inverse_location("missing", 0.0, 0.0, 0.0, 10.0);
        assert!(matches!(result, Err(Error::UnknownSensor(_))));
    }

    #[test]
    fn interpolator_dump_header_rejects_mismatched_frame() {
        let ellipsoid = Ellipsoid::wgs84();
        let header = InterpolatorDumpHeader::new("some-other-frame");
        assert!(matches!(header.check_frame(&ellipsoid), Err(Error::FramesMismatchWithInterpolatorDump { .. })));
        let matching = InterpolatorDumpHeader::new(ellipsoid.frame.clone());
        assert!(matching.check_frame(&ellipsoid).is_ok());
    }
}
