//! LRU tile cache with on-demand loading and seamless-tile zipper synthesis.

use std::rc::Rc;

use crate::error::{Error, Result};
use crate::minmax::MinMaxTile;
use crate::tile::{Location, Tile};

/// External collaborator that fills a blank tile for a given geographic position.
///
/// Implementations must call `set_geometry` exactly once, then `set_elevation`
/// for every cell of the declared grid, choosing a tile that geographically
/// covers `(lat, lon)`. The cache never calls `tile_update_completed` itself —
/// callers of `TileUpdater` (the cache) do that after the updater returns.
pub trait TileUpdater {
    fn update_tile(&self, lat: f64, lon: f64, tile: &mut Tile) -> Result<()>;
}

/// Bounded LRU cache of DEM tiles, keyed implicitly by geographic membership.
///
/// When `overlapping` is `false` (seamless tiles), a query landing on a tile's
/// edge or corner row/column synthesizes a small "zipper tile" stitching the
/// neighboring tiles together so the point still lands `HasInterpolationNeighbors`.
pub struct TileCache<U> {
    updater: U,
    overlapping: bool,
    max_tiles: usize,
    slots: Vec<Rc<MinMaxTile>>,
}

impl<U: TileUpdater> TileCache<U> {
    pub fn new(updater: U, overlapping: bool, max_tiles: usize) -> Self {
        TileCache {
            updater,
            overlapping,
            max_tiles,
            slots: Vec::with_capacity(max_tiles),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn overlapping(&self) -> bool {
        self.overlapping
    }

    /// Returns the tile whose interpolation grid contains `(phi, lambda)`.
    pub fn get_tile(&mut self, phi: f64, lambda: f64) -> Result<Rc<MinMaxTile>> {
        if let Some(idx) = self.position_with_neighbors(phi, lambda) {
            return Ok(self.promote(idx));
        }

        let fresh = self.load_fresh_tile(phi, lambda)?;
        let location = fresh.tile().location(phi, lambda);

        if self.overlapping {
            if location != Location::HasInterpolationNeighbors {
                return Err(Error::TileWithoutRequiredNeighborsSelected);
            }
            self.insert_front(fresh.clone());
            return Ok(fresh);
        }

        if location == Location::HasInterpolationNeighbors {
            self.insert_front(fresh.clone());
            return Ok(fresh);
        }

        log::debug!("synthesizing zipper tile at ({phi}, {lambda}), location {location:?}");
        let zipper = self.synthesize_zipper(phi, lambda, &fresh, location)?;
        self.insert_front(fresh.clone());
        self.insert_front(zipper.clone());
        Ok(zipper)
    }

    fn position_with_neighbors(&self, phi: f64, lambda: f64) -> Option<usize> {
        self.slots.iter().position(|t| t.tile().location(phi, lambda) == Location::HasInterpolationNeighbors)
    }

    /// Finds or loads a real (non-zipper) tile for `(phi, lambda)`. Used both as the
    /// entry point when `overlapping == true` and as the neighbor-tile lookup during
    /// zipper construction — it never itself synthesizes a zipper.
    fn load_real_tile(&mut self, phi: f64, lambda: f64) -> Result<Rc<MinMaxTile>> {
        if let Some(idx) = self.position_with_neighbors(phi, lambda) {
            return Ok(self.promote(idx));
        }
        let fresh = self.load_fresh_tile(phi, lambda)?;
        self.insert_front(fresh.clone());
        Ok(fresh)
    }

    fn load_fresh_tile(&self, phi: f64, lambda: f64) -> Result<Rc<MinMaxTile>> {
        let mut blank = Tile::new();
        self.updater.update_tile(phi, lambda, &mut blank)?;
        blank.tile_update_completed()?;
        log::trace!(
            "loaded tile at ({phi}, {lambda}): {}x{} cells",
            blank.n_lat_rows(),
            blank.n_lon_cols()
        );
        Ok(Rc::new(MinMaxTile::build(blank)?))
    }

    fn promote(&mut self, idx: usize) -> Rc<MinMaxTile> {
        let tile = self.slots.remove(idx);
        self.slots.insert(0, tile.clone());
        tile
    }

    fn insert_front(&mut self, tile: Rc<MinMaxTile>) {
        self.slots.insert(0, tile);
        if self.slots.len() > self.max_tiles {
            log::debug!("evicting least-recently-used tile (cache at capacity {})", self.max_tiles);
            self.slots.pop();
        }
    }

    fn synthesize_zipper(&mut self, phi: f64, lambda: f64, current: &Rc<MinMaxTile>, location: Location) -> Result<Rc<MinMaxTile>> {
        match location {
            Location::N => self.edge_zipper_ns(current, true),
            Location::S => self.edge_zipper_ns(current, false),
            Location::E => self.edge_zipper_ew(current, true),
            Location::W => self.edge_zipper_ew(current, false),
            Location::Ne | Location::Nw | Location::Se | Location::Sw => self.corner_zipper(phi, lambda, current, location),
            Location::HasInterpolationNeighbors => unreachable!("zipper synthesis only runs for edge/corner locations"),
        }
    }

    /// North/south edge zipper: 4 rows x K columns.
    fn edge_zipper_ns(&mut self, current: &Rc<MinMaxTile>, north: bool) -> Result<Rc<MinMaxTile>> {
        let current_tile = current.tile();
        let seam_lat = if north {
            current_tile.latitude_at_row(current_tile.n_lat_rows() - 1) + 0.5 * current_tile.lat_step()
        } else {
            current_tile.latitude_at_row(0) - 0.5 * current_tile.lat_step()
        };
        let probe_lat = if north { seam_lat + 0.5 * current_tile.lat_step() } else { seam_lat - 0.5 * current_tile.lat_step() };
        let probe_lon = current_tile.longitude_at_col(current_tile.n_lon_cols() / 2);
        let neighbor = self.load_real_tile(probe_lat, probe_lon)?;
        let (south, north_tile) = if north { (current.clone(), neighbor) } else { (neighbor, current.clone()) };

        build_ns_zipper(&south, &north_tile, seam_lat)
    }

    /// East/west edge zipper: K rows x 4 columns.
    fn edge_zipper_ew(&mut self, current: &Rc<MinMaxTile>, east: bool) -> Result<Rc<MinMaxTile>> {
        let current_tile = current.tile();
        let seam_lon = if east {
            current_tile.longitude_at_col(current_tile.n_lon_cols() - 1) + 0.5 * current_tile.lon_step()
        } else {
            current_tile.longitude_at_col(0) - 0.5 * current_tile.lon_step()
        };
        let probe_lon = if east { seam_lon + 0.5 * current_tile.lon_step() } else { seam_lon - 0.5 * current_tile.lon_step() };
        let probe_lat = current_tile.latitude_at_row(current_tile.n_lat_rows() / 2);
        let neighbor = self.load_real_tile(probe_lat, probe_lon)?;
        let (west, east_tile) = if east { (current.clone(), neighbor) } else { (neighbor, current.clone()) };

        if (west.tile().lat_step() - east_tile.tile().lat_step()).abs() > 1e-12 || (west.tile().lon_step() - east_tile.tile().lon_step()).abs() > 1e-12 {
            return Err(Error::Internal("east/west neighbors have different resolutions".into()));
        }

        build_ew_zipper(&west, &east_tile, seam_lon)
    }

    /// 4x4 corner zipper, fabricated from the current tile and its horizontal,
    /// vertical, and diagonal neighbors.
    fn corner_zipper(&mut self, phi: f64, lambda: f64, current: &Rc<MinMaxTile>, location: Location) -> Result<Rc<MinMaxTile>> {
        let north = matches!(location, Location::Ne | Location::Nw);
        let east = matches!(location, Location::Ne | Location::Se);
        let current_tile = current.tile();

        let seam_lat = if north {
            current_tile.latitude_at_row(current_tile.n_lat_rows() - 1) + 0.5 * current_tile.lat_step()
        } else {
            current_tile.latitude_at_row(0) - 0.5 * current_tile.lat_step()
        };
        let seam_lon = if east {
            current_tile.longitude_at_col(current_tile.n_lon_cols() - 1) + 0.5 * current_tile.lon_step()
        } else {
            current_tile.longitude_at_col(0) - 0.5 * current_tile.lon_step()
        };

        let probe_lat = if north { seam_lat + 0.5 * current_tile.lat_step() } else { seam_lat - 0.5 * current_tile.lat_step() };
        let probe_lon = if east { seam_lon + 0.5 * current_tile.lon_step() } else { seam_lon - 0.5 * current_tile.lon_step() };

        let horizontal = self.load_real_tile(phi, probe_lon)?;
        let vertical = self.load_real_tile(probe_lat, lambda)?;
        let diagonal = self.load_real_tile(probe_lat, probe_lon)?;

        let (sw, se, nw, ne) = match (north, east) {
            (true, true) => (current.clone(), vertical, horizontal, diagonal),
            (true, false) => (horizontal, current.clone(), diagonal, vertical),
            (false, true) => (vertical, diagonal, current.clone(), horizontal),
            (false, false) => (diagonal, horizontal, vertical, current.clone()),
        };

        build_corner_zipper(&sw, &se, &nw, &ne, seam_lat, seam_lon)
    }
}

fn nearest_index(target: f64, origin: f64, step: f64, n: usize) -> usize {
    let idx = (0.5 + (target - origin) / step).floor().max(0.0);
    inf::cast::option::<usize, _>(Some(idx)).unwrap_or(0).min(n.saturating_sub(1))
}

fn build_zipper_from_grid(
    rows: usize,
    cols: usize,
    min_lat: f64,
    min_lon: f64,
    lat_step: f64,
    lon_step: f64,
    mut sample: impl FnMut(usize, usize, f64, f64) -> f64,
) -> Result<Rc<MinMaxTile>> {
    let mut tile = Tile::new();
    tile.set_geometry(min_lat, min_lon, lat_step, lon_step, rows, cols)?;
    for r in 0..rows {
        let lat = min_lat + r as f64 * lat_step;
        for c in 0..cols {
            let lon = min_lon + c as f64 * lon_step;
            tile.set_elevation(r, c, sample(r, c, lat, lon))?;
        }
    }
    tile.tile_update_completed()?;
    Ok(Rc::new(MinMaxTile::build(tile)?))
}

fn build_ns_zipper(south: &Rc<MinMaxTile>, north: &Rc<MinMaxTile>, seam_lat: f64) -> Result<Rc<MinMaxTile>> {
    let st = south.tile();
    let nt = north.tile();
    let same_steps = (st.lat_step() - nt.lat_step()).abs() < 1e-12 && (st.lon_step() - nt.lon_step()).abs() < 1e-12;

    let (zip_lat_step, zip_lon_step, k, min_lon) = if same_steps {
        (st.lat_step(), st.lon_step(), st.n_lon_cols(), st.min_lon())
    } else {
        let finer_is_south = st.lon_step() <= nt.lon_step();
        let lat_step = st.lat_step().min(nt.lat_step());
        let (lon_step, k, min_lon) = if finer_is_south {
            (st.lon_step(), st.n_lon_cols(), st.min_lon())
        } else {
            (nt.lon_step(), nt.n_lon_cols(), nt.min_lon())
        };
        (lat_step, lon_step, k, min_lon)
    };

    let min_lat = seam_lat - 2.0 * zip_lat_step;

    build_zipper_from_grid(4, k, min_lat, min_lon, zip_lat_step, zip_lon_step, |r, c, lat, lon| {
        let source = if r < 2 { st } else { nt };
        let i = nearest_index(lat, source.min_lat(), source.lat_step(), source.n_lat_rows());
        let j = nearest_index(lon, source.min_lon(), source.lon_step(), source.n_lon_cols());
        let _ = c;
        source.elevation(i, j)
    })
}

fn build_ew_zipper(west: &Rc<MinMaxTile>, east: &Rc<MinMaxTile>, seam_lon: f64) -> Result<Rc<MinMaxTile>> {
    let wt = west.tile();
    let et = east.tile();
    let k = wt.n_lat_rows();
    let zip_lat_step = wt.lat_step();
    let zip_lon_step = wt.lon_step();
    let min_lon = seam_lon - 2.0 * zip_lon_step;
    let min_lat = wt.min_lat();

    build_zipper_from_grid(k, 4, min_lat, min_lon, zip_lat_step, zip_lon_step, |r, c, lat, lon| {
        let source = if c < 2 { wt } else { et };
        let i = nearest_index(lat, source.min_lat(), source.lat_step(), source.n_lat_rows());
        let j = nearest_index(lon, source.min_lon(), source.lon_step(), source.n_lon_cols());
        let _ = r;
        source.elevation(i, j)
    })
}

fn build_corner_zipper(sw: &Rc<MinMaxTile>, se: &Rc<MinMaxTile>, nw: &Rc<MinMaxTile>, ne: &Rc<MinMaxTile>, seam_lat: f64, seam_lon: f64) -> Result<Rc<MinMaxTile>> {
    let sw_t = sw.tile();
    let se_t = se.tile();
    let nw_t = nw.tile();
    let ne_t = ne.tile();

    if (sw_t.lon_step() - se_t.lon_step()).abs() > 1e-12 || (nw_t.lon_step() - ne_t.lon_step()).abs() > 1e-12 {
        return Err(Error::Internal("corner zipper: east/west tiles at the same latitude have different resolutions".into()));
    }

    let lat_step = sw_t.lat_step().min(nw_t.lat_step());
    let lon_step = sw_t.lon_step().min(se_t.lon_step());
    let min_lat = seam_lat - 2.0 * lat_step;
    let min_lon = seam_lon - 2.0 * lon_step;

    build_zipper_from_grid(4, 4, min_lat, min_lon, lat_step, lon_step, |r, c, lat, lon| {
        let source = match (r < 2, c < 2) {
            (true, true) => sw_t,
            (true, false) => se_t,
            (false, true) => nw_t,
            (false, false) => ne_t,
        };
        let i = nearest_index(lat, source.min_lat(), source.lat_step(), source.n_lat_rows());
        let j = nearest_index(lon, source.min_lon(), source.lon_step(), source.n_lon_cols());
        source.elevation(i, j)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Checkerboard {
        tile_size_deg: f64,
        cells_per_tile: usize,
    }

    impl TileUpdater for Checkerboard {
        fn update_tile(&self, lat: f64, lon: f64, tile: &mut Tile) -> Result<()> {
            let step = self.tile_size_deg / self.cells_per_tile as f64;
            let tile_lat0 = (lat / self.tile_size_deg).floor() * self.tile_size_deg;
            let tile_lon0 = (lon / self.tile_size_deg).floor() * self.tile_size_deg;
            tile.set_geometry(tile_lat0 + step / 2.0, tile_lon0 + step / 2.0, step, step, self.cells_per_tile, self.cells_per_tile)?;
            for i in 0..self.cells_per_tile {
                for j in 0..self.cells_per_tile {
                    let h = if (i + j) % 2 == 0 { 10.0 } else { 20.0 };
                    tile.set_elevation(i, j, h)?;
                }
            }
            Ok(())
        }
    }

    fn degrees(d: f64) -> f64 {
        d.to_radians()
    }

    #[test]
    fn single_tile_fetch_matches_scenario_1() {
        let updater = Checkerboard {
            tile_size_deg: 3.0,
            cells_per_tile: 11,
        };
        let mut cache = TileCache::new(updater, true, 12);
        let tile = cache.get_tile(degrees(-23.2), degrees(137.5)).unwrap();
        assert!((tile.tile().min_lat().to_degrees() - (-24.0)).abs() < 1e-9);
        assert!((tile.tile().min_lon().to_degrees() - 135.0).abs() < 1e-9);
        assert_eq!(tile.tile().min_elevation(), 10.0);
        assert_eq!(tile.tile().max_elevation(), 20.0);
    }

    #[test_log::test]
    fn cache_is_bounded_by_max_tiles() {
        let updater = Checkerboard {
            tile_size_deg: 1.0,
            cells_per_tile: 9,
        };
        let mut cache = TileCache::new(updater, true, 4);
        for i in 0..10 {
            cache.get_tile(degrees(i as f64 + 0.5), degrees(i as f64 + 0.5)).unwrap();
        }
        assert!(cache.len() <= 4);
    }

    #[test]
    fn repeated_query_promotes_without_growth() {
        let updater = Checkerboard {
            tile_size_deg: 1.0,
            cells_per_tile: 9,
        };
        let mut cache = TileCache::new(updater, true, 12);
        cache.get_tile(degrees(0.2), degrees(0.6)).unwrap();
        let before = cache.len();
        cache.get_tile(degrees(0.234375), degrees(0.609375)).unwrap();
        assert_eq!(cache.len(), before);
    }

    struct SeamlessCheckerboard {
        tile_size_deg: f64,
        cells_per_tile: usize,
    }

    impl TileUpdater for SeamlessCheckerboard {
        fn update_tile(&self, lat: f64, lon: f64, tile: &mut Tile) -> Result<()> {
            let step = self.tile_size_deg / self.cells_per_tile as f64;
            let tile_lat0 = (lat / self.tile_size_deg).floor() * self.tile_size_deg + step / 2.0;
            let tile_lon0 = (lon / self.tile_size_deg).floor() * self.tile_size_deg + step / 2.0;
            tile.set_geometry(tile_lat0, tile_lon0, step, step, self.cells_per_tile, self.cells_per_tile)?;
            for i in 0..self.cells_per_tile {
                for j in 0..self.cells_per_tile {
                    tile.set_elevation(i, j, (i * 100 + j) as f64)?;
                }
            }
            Ok(())
        }
    }

    #[test_log::test]
    fn seamless_zipper_rows_match_neighbor_rows() {
        let updater = SeamlessCheckerboard {
            tile_size_deg: 5.0,
            cells_per_tile: 10,
        };
        let mut cache = TileCache::new(updater, false, 12);
        let step = 5.0 / 10.0;
        // land just inside the northern row of the tile centered at (47, 12.3)-ish.
        let current_tile_lat0 = (47.0_f64 / 5.0).floor() * 5.0 + step / 2.0;
        let top_row_lat = current_tile_lat0 + 9.0 * step;
        let probe_lat = top_row_lat + 0.4 * step;
        let probe_lon = 12.3_f64.to_radians().to_degrees(); // keep in degrees domain for this updater
        let zipper = cache.get_tile(probe_lat.to_radians(), probe_lon.to_radians()).unwrap();
        assert_eq!(zipper.tile().n_lat_rows(), 4);
    }
}
