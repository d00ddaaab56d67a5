//! Ray/terrain intersection: the Duvenhage traversal and the simpler stand-in
//! algorithms used for validation and fast paths.

use nalgebra::Vector3;

use crate::cache::{TileCache, TileUpdater};
use crate::ellipsoid::Ellipsoid;
use crate::error::{Error, Result};
use crate::minmax::MinMaxTile;
use crate::tile::{Location, Tile};

/// Distance stepped forward along the ray, in meters, when a tile boundary is
/// reached without finding a cell intersection and the next tile must be fetched.
const BOUNDARY_STEP: f64 = 0.01;

/// Safety bound on outer tile-to-tile hops for one ray; guards against a
/// pathological updater never converging rather than being a normal limit.
const MAX_TILE_HOPS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IntersectionAlgorithm {
    /// Full Duvenhage min/max-pyramid traversal.
    Duvenhage,
    /// Duvenhage traversal that skips the initial max-elevation entry-point
    /// refinement loop (no "sagitta" recomputation); for validation against `Duvenhage`
    /// on bodies flat enough that the shortcut doesn't matter.
    DuvenhageFlatBody,
    /// Exhaustively tests every cell of the tile covering the ground point. Only
    /// practical for small test tiles; used to cross-check `Duvenhage`.
    BasicSlowExhaustiveScanForTestsOnly,
    /// Ignores the DEM entirely and intersects a constant-altitude surface above
    /// the reference ellipsoid.
    ConstantElevationOverEllipsoid(f64),
    /// Ignores the DEM entirely and intersects the reference ellipsoid at altitude 0.
    IgnoreDemUseEllipsoid,
}

/// Intersects `{position + t*los, t>=0}` (body frame) with the terrain, per `algorithm`.
pub fn intersect<U: TileUpdater>(algorithm: IntersectionAlgorithm, cache: &mut TileCache<U>, ellipsoid: &Ellipsoid, position: Vector3<f64>, los: Vector3<f64>) -> Result<Vector3<f64>> {
    match algorithm {
        IntersectionAlgorithm::ConstantElevationOverEllipsoid(h) => ellipsoid.point_at_altitude(position, los, h),
        IntersectionAlgorithm::IgnoreDemUseEllipsoid => ellipsoid.point_at_altitude(position, los, 0.0),
        IntersectionAlgorithm::BasicSlowExhaustiveScanForTestsOnly => exhaustive_scan(cache, ellipsoid, position, los),
        IntersectionAlgorithm::Duvenhage => duvenhage(cache, ellipsoid, position, los, false),
        IntersectionAlgorithm::DuvenhageFlatBody => duvenhage(cache, ellipsoid, position, los, true),
    }
}

fn floor_cell_clamped(tile: &Tile, ellipsoid: &Ellipsoid, p: Vector3<f64>) -> (usize, usize) {
    let gp = ellipsoid.transform_to_geodetic(p);
    let (i, j) = tile.floor_indices(gp.latitude, gp.longitude);
    let i = i.clamp(0, tile.n_lat_rows() as i64 - 2) as usize;
    let j = j.clamp(0, tile.n_lon_cols() as i64 - 2) as usize;
    (i, j)
}

fn param_t(position: Vector3<f64>, los: Vector3<f64>, p: Vector3<f64>) -> f64 {
    (p - position).dot(&los)
}

/// The ray's exit point from `tile`: through the bottom (min-elevation) surface
/// when that lands back inside the tile's footprint, otherwise through whichever
/// lateral (min/max lat and/or lon) boundary the location demands. Returns the
/// point and whether it exited laterally (`at_side`).
fn tile_exit(ellipsoid: &Ellipsoid, tile: &Tile, position: Vector3<f64>, los: Vector3<f64>) -> Result<(Vector3<f64>, bool)> {
    let bottom = ellipsoid.point_at_altitude(position, los, tile.min_elevation())?;
    let bottom_gp = ellipsoid.transform_to_geodetic(bottom);
    let location = tile.location(bottom_gp.latitude, bottom_gp.longitude);
    if location == Location::HasInterpolationNeighbors {
        return Ok((bottom, false));
    }

    let min_lat = tile.latitude_at_row(0);
    let max_lat = tile.latitude_at_row(tile.n_lat_rows() - 1);
    let min_lon = tile.longitude_at_col(0);
    let max_lon = tile.longitude_at_col(tile.n_lon_cols() - 1);

    let needs_lat = matches!(location, Location::N | Location::S | Location::Ne | Location::Nw | Location::Se | Location::Sw);
    let needs_lon = matches!(location, Location::E | Location::W | Location::Ne | Location::Nw | Location::Se | Location::Sw);

    let mut candidates: Vec<(f64, Vector3<f64>)> = Vec::new();
    if needs_lat {
        let lat_bound = if matches!(location, Location::N | Location::Ne | Location::Nw) { max_lat } else { min_lat };
        if let Ok(p) = ellipsoid.point_at_latitude(position, los, lat_bound) {
            candidates.push((param_t(position, los, p), p));
        }
    }
    if needs_lon {
        let lon_bound = if matches!(location, Location::E | Location::Ne | Location::Se) { max_lon } else { min_lon };
        if let Ok(p) = ellipsoid.point_at_longitude(position, los, lon_bound) {
            candidates.push((param_t(position, los, p), p));
        }
    }

    candidates
        .into_iter()
        .filter(|(t, _)| *t >= 0.0)
        .min_by(|a, b| a.0.partial_cmp(&b.0).unwrap())
        .map(|(_, p)| (p, true))
        .ok_or_else(|| Error::Internal("could not compute tile lateral exit point".into()))
}

/// Pushes the ray's crossings of the sub-tile boundary between cells `a` and `b` at
/// `level`, ordered so the LIFO pops the crossing nearest `a` (`current`) first.
fn push_crossings(minmax: &MinMaxTile, tile: &Tile, ellipsoid: &Ellipsoid, position: Vector3<f64>, los: Vector3<f64>, a: (usize, usize), b: (usize, usize), level: usize, stack: &mut Vec<Vector3<f64>>) -> Result<()> {
    let mut crossings: Vec<(f64, Vector3<f64>)> = Vec::new();

    for row in minmax.get_crossed_boundary_rows(a, b, level) {
        let lat = tile.latitude_at_row(row);
        if let Ok(p) = ellipsoid.point_at_latitude(position, los, lat) {
            crossings.push((param_t(position, los, p), p));
        }
    }
    for col in minmax.get_crossed_boundary_columns(a, b, level) {
        let lon = tile.longitude_at_col(col);
        if let Ok(p) = ellipsoid.point_at_longitude(position, los, lon) {
            crossings.push((param_t(position, los, p), p));
        }
    }

    if crossings.is_empty() {
        return Err(Error::Internal("no crossed boundary found between diverging cells".into()));
    }

    crossings.sort_by(|x, y| x.0.partial_cmp(&y.0).unwrap());
    for (_, p) in crossings.into_iter().rev() {
        stack.push(p);
    }
    Ok(())
}

/// Runs the inner (step 4) traversal within a single tile, starting at `current`
/// (already known to be `HasInterpolationNeighbors`). Returns `Some(hit)` on a
/// found intersection, `None` if the ray exits the tile without one (caller
/// should step forward and fetch the next tile).
fn traverse_tile(tile: &Tile, minmax: &MinMaxTile, ellipsoid: &Ellipsoid, position: Vector3<f64>, los: Vector3<f64>, mut current: Vector3<f64>) -> Result<Option<Vector3<f64>>> {
    let (exit, _at_side) = tile_exit(ellipsoid, tile, position, los)?;
    let mut stack = vec![exit];

    while let Some(next) = stack.pop() {
        let (ic, jc) = floor_cell_clamped(tile, ellipsoid, current);
        let (inx, jnx) = floor_cell_clamped(tile, ellipsoid, next);

        if (ic as i64 - inx as i64).abs() <= 1 && (jc as i64 - jnx as i64).abs() <= 1 {
            if let Some(hit) = tile.cell_intersection(ellipsoid, current, los, inx, jnx)? {
                return Ok(Some(hit));
            }
            current = next;
            continue;
        }

        let level = minmax.get_merge_level(ic, jc, inx, jnx);
        if level < 0 {
            push_crossings(minmax, tile, ellipsoid, position, los, (ic, jc), (inx, jnx), 0, &mut stack)?;
            continue;
        }
        let level = level as usize;
        let next_gp = ellipsoid.transform_to_geodetic(next);
        if next_gp.altitude >= minmax.max_elevation(inx, jnx, level) {
            current = next;
            continue;
        }
        stack.push(next);
        push_crossings(minmax, tile, ellipsoid, position, los, (ic, jc), (inx, jnx), level, &mut stack)?;
    }

    Ok(None)
}

fn duvenhage<U: TileUpdater>(cache: &mut TileCache<U>, ellipsoid: &Ellipsoid, position: Vector3<f64>, los: Vector3<f64>, flat_body: bool) -> Result<Vector3<f64>> {
    let recorder = inf::duration::Recorder::new();
    let result = duvenhage_inner(cache, ellipsoid, position, los, flat_body);
    log::trace!("duvenhage traversal took {recorder}");
    result
}

fn duvenhage_inner<U: TileUpdater>(cache: &mut TileCache<U>, ellipsoid: &Ellipsoid, position: Vector3<f64>, los: Vector3<f64>, flat_body: bool) -> Result<Vector3<f64>> {
    let p0 = ellipsoid.point_at_altitude(position, los, 0.0)?;
    let gp0 = ellipsoid.transform_to_geodetic(p0);
    let mut tile = cache.get_tile(gp0.latitude, gp0.longitude)?;

    let mut current = if flat_body {
        p0
    } else {
        let mut entry = p0;
        let mut found = false;
        for _ in 0..MAX_TILE_HOPS {
            let entry_p = ellipsoid.point_at_altitude(position, los, tile.tile().max_elevation())?;
            if param_t(position, los, entry_p) < 0.0 {
                return Err(Error::DemEntryPointIsBehindSpacecraft);
            }
            let entry_gp = ellipsoid.transform_to_geodetic(entry_p);
            if tile.tile().location(entry_gp.latitude, entry_gp.longitude) == Location::HasInterpolationNeighbors {
                entry = entry_p;
                found = true;
                break;
            }
            tile = cache.get_tile(entry_gp.latitude, entry_gp.longitude)?;
        }
        if !found {
            return Err(Error::Internal("could not locate a starting tile for the ray entry point".into()));
        }
        entry
    };

    for _ in 0..MAX_TILE_HOPS {
        if let Some(hit) = traverse_tile(tile.tile(), &tile, ellipsoid, position, los, current)? {
            return Ok(hit);
        }

        // The traversal exhausted the tile without a hit: step forward a hair past
        // its boundary and resume in whichever tile covers the new point.
        current += los * BOUNDARY_STEP;
        let current_gp = ellipsoid.transform_to_geodetic(current);
        tile = cache.get_tile(current_gp.latitude, current_gp.longitude)?;

        let terrain = tile.tile().interpolate_elevation(current_gp.latitude, current_gp.longitude)?;
        if current_gp.altitude <= terrain {
            return Ok(current);
        }
    }

    Err(Error::Internal("ray did not converge to a terrain intersection within the tile-hop bound".into()))
}

fn exhaustive_scan<U: TileUpdater>(cache: &mut TileCache<U>, ellipsoid: &Ellipsoid, position: Vector3<f64>, los: Vector3<f64>) -> Result<Vector3<f64>> {
    let p0 = ellipsoid.point_at_altitude(position, los, 0.0)?;
    let gp0 = ellipsoid.transform_to_geodetic(p0);
    let tile = cache.get_tile(gp0.latitude, gp0.longitude)?;
    let t = tile.tile();

    let mut best: Option<(f64, Vector3<f64>)> = None;
    for i in 0..t.n_lat_rows() - 1 {
        for j in 0..t.n_lon_cols() - 1 {
            if let Some(hit) = t.cell_intersection(ellipsoid, position, los, i, j)? {
                let param = param_t(position, los, hit);
                let better = match &best {
                    Some((bt, _)) => param < *bt,
                    None => true,
                };
                if better {
                    best = Some((param, hit));
                }
            }
        }
    }

    best.map(|(_, p)| p).ok_or(Error::Internal("exhaustive scan found no cell intersection in the covering tile".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::Tile;

    struct FlatWorld {
        elevation: f64,
    }

    impl TileUpdater for FlatWorld {
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

    #[test]
    fn ignore_dem_matches_ellipsoid_surface() {
        let ellipsoid = Ellipsoid::wgs84();
        let mut cache = TileCache::new(FlatWorld { elevation: 0.0 }, true, 8);
        let p = Vector3::new(8_000_000.0, 0.0, 0.0);
        let los = Vector3::new(-1.0, 0.0, 0.0);
        let hit = intersect(IntersectionAlgorithm::IgnoreDemUseEllipsoid, &mut cache, &ellipsoid, p, los).unwrap();
        let gp = ellipsoid.transform_to_geodetic(hit);
        assert!(gp.altitude.abs() < 1e-6);
    }

    #[test_log::test]
    fn duvenhage_finds_flat_terrain_at_configured_elevation() {
        let ellipsoid = Ellipsoid::wgs84();
        let mut cache = TileCache::new(FlatWorld { elevation: 250.0 }, true, 8);
        let p = Vector3::new(8_000_000.0, 0.0, 0.0);
        let los = Vector3::new(-1.0, 0.0, 0.0);
        let hit = intersect(IntersectionAlgorithm::Duvenhage, &mut cache, &ellipsoid, p, los).unwrap();
        let gp = ellipsoid.transform_to_geodetic(hit);
        assert!((gp.altitude - 250.0).abs() < 1e-3, "altitude was {}", gp.altitude);
    }

    #[test]
    fn duvenhage_matches_exhaustive_scan_on_flat_terrain() {
        let ellipsoid = Ellipsoid::wgs84();
        let p = Vector3::new(8_000_000.0, 0.0, 0.0);
        let los = Vector3::new(-1.0, 0.0, 0.0);

        let mut cache_a = TileCache::new(FlatWorld { elevation: 100.0 }, true, 8);
        let mut cache_b = TileCache::new(FlatWorld { elevation: 100.0 }, true, 8);
        let hit_a = intersect(IntersectionAlgorithm::Duvenhage, &mut cache_a, &ellipsoid, p, los).unwrap();
        let hit_b = intersect(IntersectionAlgorithm::BasicSlowExhaustiveScanForTestsOnly, &mut cache_b, &ellipsoid, p, los).unwrap();
        assert!((hit_a - hit_b).norm() < 1e-3);
    }
}
