//! The DEM tile raster: geometry, bilinear interpolation, and per-cell ray intersection.

use nalgebra::Vector3;

use crate::ellipsoid::Ellipsoid;
use crate::error::{Error, Result};

/// Tolerance, in cell units, for bilinear extrapolation and cell-boundary membership.
pub const CELL_TOLERANCE: f64 = 1.0 / 8.0;

/// Where a point falls with respect to a tile's interpolation grid.
///
/// `HasInterpolationNeighbors` is the only location from which elevation queries
/// or cell intersections may be performed; the eight edge/corner variants name
/// which side(s) of the tile the point has stepped beyond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Sw,
    W,
    Nw,
    N,
    Ne,
    E,
    Se,
    S,
    HasInterpolationNeighbors,
}

impl Location {
    pub fn is_interior(self) -> bool {
        matches!(self, Location::HasInterpolationNeighbors)
    }
}

/// A rectangular lat/lon raster of elevations.
///
/// `(min_lat, min_lon)` is the center of the south-west cell; the grid spans
/// `n_lat_rows` rows northward and `n_lon_cols` columns eastward at `lat_step`
/// / `lon_step` spacing. Tiles are built through `set_geometry` followed by one
/// `set_elevation` call per cell and a closing `tile_update_completed`, after
/// which they are immutable.
#[derive(Debug, Clone)]
pub struct Tile {
    min_lat: f64,
    min_lon: f64,
    lat_step: f64,
    lon_step: f64,
    n_lat_rows: usize,
    n_lon_cols: usize,
    elevations: Vec<f64>,
    set_mask: Vec<bool>,
    min_elevation: f64,
    max_elevation: f64,
    min_elevation_index: (usize, usize),
    max_elevation_index: (usize, usize),
    geometry_set: bool,
    completed: bool,
}

impl Tile {
    pub fn new() -> Self {
        Tile {
            min_lat: 0.0,
            min_lon: 0.0,
            lat_step: 0.0,
            lon_step: 0.0,
            n_lat_rows: 0,
            n_lon_cols: 0,
            elevations: Vec::new(),
            set_mask: Vec::new(),
            min_elevation: f64::INFINITY,
            max_elevation: f64::NEG_INFINITY,
            min_elevation_index: (0, 0),
            max_elevation_index: (0, 0),
            geometry_set: false,
            completed: false,
        }
    }

    pub fn set_geometry(&mut self, min_lat: f64, min_lon: f64, lat_step: f64, lon_step: f64, n_lat_rows: usize, n_lon_cols: usize) -> Result<()> {
        if self.geometry_set {
            return Err(Error::Internal("setGeometry called more than once on the same tile".into()));
        }
        if lat_step <= 0.0 || lon_step <= 0.0 || n_lat_rows == 0 || n_lon_cols == 0 {
            return Err(Error::EmptyTile {
                rows: n_lat_rows,
                cols: n_lon_cols,
            });
        }
        self.min_lat = min_lat;
        self.min_lon = min_lon;
        self.lat_step = lat_step;
        self.lon_step = lon_step;
        self.n_lat_rows = n_lat_rows;
        self.n_lon_cols = n_lon_cols;
        self.elevations = vec![0.0; n_lat_rows * n_lon_cols];
        self.set_mask = vec![false; n_lat_rows * n_lon_cols];
        self.geometry_set = true;
        Ok(())
    }

    pub fn set_elevation(&mut self, i: usize, j: usize, elevation: f64) -> Result<()> {
        if !self.geometry_set {
            return Err(Error::Internal("setElevation called before setGeometry".into()));
        }
        let idx = self.index(i, j)?;
        if self.set_mask[idx] {
            return Err(Error::Internal(format!("elevation at ({i}, {j}) set more than once")));
        }
        self.elevations[idx] = elevation;
        self.set_mask[idx] = true;
        Ok(())
    }

    pub fn tile_update_completed(&mut self) -> Result<()> {
        if !self.geometry_set {
            return Err(Error::EmptyTile { rows: 0, cols: 0 });
        }
        if let Some(pos) = self.set_mask.iter().position(|&set| !set) {
            let i = pos / self.n_lon_cols;
            let j = pos % self.n_lon_cols;
            return Err(Error::Internal(format!("elevation at ({i}, {j}) was never set")));
        }
        let mut min_elevation = f64::INFINITY;
        let mut max_elevation = f64::NEG_INFINITY;
        let mut min_index = (0, 0);
        let mut max_index = (0, 0);
        for i in 0..self.n_lat_rows {
            for j in 0..self.n_lon_cols {
                let h = self.elevations[i * self.n_lon_cols + j];
                if h < min_elevation {
                    min_elevation = h;
                    min_index = (i, j);
                }
                if h > max_elevation {
                    max_elevation = h;
                    max_index = (i, j);
                }
            }
        }
        self.min_elevation = min_elevation;
        self.max_elevation = max_elevation;
        self.min_elevation_index = min_index;
        self.max_elevation_index = max_index;
        self.completed = true;
        Ok(())
    }

    fn index(&self, i: usize, j: usize) -> Result<usize> {
        if i >= self.n_lat_rows || j >= self.n_lon_cols {
            return Err(Error::OutOfTileIndices { i: i as i64, j: j as i64 });
        }
        Ok(i * self.n_lon_cols + j)
    }

    pub fn elevation(&self, i: usize, j: usize) -> f64 {
        self.elevations[i * self.n_lon_cols + j]
    }

    pub fn min_lat(&self) -> f64 {
        self.min_lat
    }
    pub fn min_lon(&self) -> f64 {
        self.min_lon
    }
    pub fn lat_step(&self) -> f64 {
        self.lat_step
    }
    pub fn lon_step(&self) -> f64 {
        self.lon_step
    }
    pub fn n_lat_rows(&self) -> usize {
        self.n_lat_rows
    }
    pub fn n_lon_cols(&self) -> usize {
        self.n_lon_cols
    }
    pub fn min_elevation(&self) -> f64 {
        self.min_elevation
    }
    pub fn max_elevation(&self) -> f64 {
        self.max_elevation
    }
    pub fn min_elevation_index(&self) -> (usize, usize) {
        self.min_elevation_index
    }
    pub fn max_elevation_index(&self) -> (usize, usize) {
        self.max_elevation_index
    }
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Upper-left (south edge) latitude of row `i`.
    pub fn latitude_at_row(&self, i: usize) -> f64 {
        self.min_lat + i as f64 * self.lat_step
    }

    pub fn longitude_at_col(&self, j: usize) -> f64 {
        self.min_lon + j as f64 * self.lon_step
    }

    /// Signed floor row/column indices for `(phi, lambda)`, not clamped to the grid.
    pub fn floor_indices(&self, phi: f64, lambda: f64) -> (i64, i64) {
        let i = ((phi - self.min_lat) / self.lat_step).floor() as i64;
        let j = ((lambda - self.min_lon) / self.lon_step).floor() as i64;
        (i, j)
    }

    pub fn location(&self, phi: f64, lambda: f64) -> Location {
        let (i, j) = self.floor_indices(phi, lambda);
        let row_below = i < 0;
        let row_above = i > self.n_lat_rows as i64 - 2;
        let col_before = j < 0;
        let col_after = j > self.n_lon_cols as i64 - 2;

        match (row_below, row_above, col_before, col_after) {
            (false, false, false, false) => Location::HasInterpolationNeighbors,
            (true, false, true, false) => Location::Sw,
            (true, false, false, false) => Location::S,
            (true, false, false, true) => Location::Se,
            (false, false, true, false) => Location::W,
            (false, false, false, true) => Location::E,
            (false, true, true, false) => Location::Nw,
            (false, true, false, false) => Location::N,
            (false, true, false, true) => Location::Ne,
            // row_below and row_above can never both hold (n_lat_rows >= 1 guarantees
            // the ranges don't cross when n_lat_rows == 1, see debug_assert below).
            _ => unreachable!("row_below and row_above are mutually exclusive for a valid tile"),
        }
    }

    /// Bilinear elevation at `(phi, lambda)`, extrapolating up to 1/8 cell outside the grid.
    pub fn interpolate_elevation(&self, phi: f64, lambda: f64) -> Result<f64> {
        let row_f = (phi - self.min_lat) / self.lat_step;
        let col_f = (lambda - self.min_lon) / self.lon_step;
        let max_row = self.n_lat_rows as f64 - 1.0;
        let max_col = self.n_lon_cols as f64 - 1.0;

        if row_f < -CELL_TOLERANCE || row_f > max_row + CELL_TOLERANCE || col_f < -CELL_TOLERANCE || col_f > max_col + CELL_TOLERANCE {
            return Err(Error::OutOfTileAngles { lat: phi, lon: lambda });
        }

        let i = (row_f.floor() as i64).clamp(0, self.n_lat_rows as i64 - 2) as usize;
        let j = (col_f.floor() as i64).clamp(0, self.n_lon_cols as i64 - 2) as usize;
        let v = row_f - i as f64;
        let u = col_f - j as f64;

        let e_sw = self.elevation(i, j);
        let e_se = self.elevation(i, j + 1);
        let e_nw = self.elevation(i + 1, j);
        let e_ne = self.elevation(i + 1, j + 1);

        Ok(e_sw * (1.0 - u) * (1.0 - v) + e_se * u * (1.0 - v) + e_nw * (1.0 - u) * v + e_ne * u * v)
    }

    /// Intersects the ray `p(t) = p_start + t*los` (cartesian, body frame) with cell `(i, j)`.
    ///
    /// Returns `Ok(None)` when the ray's locally-linearized geodetic track does not
    /// cross the cell's bilinear elevation surface within the parameter's cell-boundary
    /// tolerance; `Ok(Some(point))` at the smallest positive-`t` crossing otherwise.
    pub fn cell_intersection(&self, ellipsoid: &Ellipsoid, p_start: Vector3<f64>, los: Vector3<f64>, i: usize, j: usize) -> Result<Option<Vector3<f64>>> {
        if i + 1 >= self.n_lat_rows || j + 1 >= self.n_lon_cols {
            return Err(Error::OutOfTileIndices { i: i as i64, j: j as i64 });
        }

        // Local linearization of geodetic latitude/longitude/altitude along the ray,
        // sampled over a 1-meter step: cells are small enough relative to the body's
        // radius of curvature that the track is effectively linear at this scale.
        const H: f64 = 1.0;
        let gp0 = ellipsoid.transform_to_geodetic(p_start);
        let gp1 = ellipsoid.transform_to_geodetic(p_start + los * H);

        let mut dlon = gp1.longitude - gp0.longitude;
        if dlon > std::f64::consts::PI {
            dlon -= 2.0 * std::f64::consts::PI;
        } else if dlon < -std::f64::consts::PI {
            dlon += 2.0 * std::f64::consts::PI;
        }
        let dlat = gp1.latitude - gp0.latitude;
        let dalt = gp1.altitude - gp0.altitude;

        let lon0 = self.longitude_at_col(j);
        let lat0 = self.latitude_at_row(i);

        let u0 = (gp0.longitude - lon0) / self.lon_step;
        let v0 = (gp0.latitude - lat0) / self.lat_step;
        let du = dlon / self.lon_step;
        let dv = dlat / self.lat_step;

        let e_sw = self.elevation(i, j);
        let e_se = self.elevation(i, j + 1);
        let e_nw = self.elevation(i + 1, j);
        let e_ne = self.elevation(i + 1, j + 1);

        let a_lin = e_se - e_sw;
        let b_lin = e_nw - e_sw;
        let c_twist = e_sw - e_se - e_nw + e_ne;

        let a = c_twist * du * dv;
        let b = a_lin * du + b_lin * dv + c_twist * (u0 * dv + v0 * du) - dalt;
        let c = e_sw + a_lin * u0 + b_lin * v0 + c_twist * u0 * v0 - gp0.altitude;

        let t = if a.abs() <= 1e-9 * c.abs().max(1.0) {
            if b.abs() < 1e-300 {
                0.0
            } else {
                -c / b
            }
        } else {
            let discriminant = b * b - 4.0 * a * c;
            if discriminant < 0.0 {
                return Ok(None);
            }
            let sqrt_d = discriminant.sqrt();
            let t1 = (-b - sqrt_d) / (2.0 * a);
            let t2 = (-b + sqrt_d) / (2.0 * a);

            let candidate = [t1, t2]
                .into_iter()
                .filter(|&t| t >= 0.0)
                .filter(|&t| {
                    let u = u0 + t * du;
                    let v = v0 + t * dv;
                    (-CELL_TOLERANCE..=1.0 + CELL_TOLERANCE).contains(&u) && (-CELL_TOLERANCE..=1.0 + CELL_TOLERANCE).contains(&v)
                })
                .min_by(|x, y| x.partial_cmp(y).unwrap());

            match candidate {
                Some(t) => t,
                None => return Ok(None),
            }
        };

        if t < 0.0 {
            return Ok(None);
        }
        let u = u0 + t * du;
        let v = v0 + t * dv;
        if !((-CELL_TOLERANCE..=1.0 + CELL_TOLERANCE).contains(&u) && (-CELL_TOLERANCE..=1.0 + CELL_TOLERANCE).contains(&v)) {
            return Ok(None);
        }

        Ok(Some(p_start + los * t))
    }
}

impl Default for Tile {
    fn default() -> Self {
        Tile::new()
    }
}
