use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds produced by the geolocation core.
///
/// Every variant is fatal to the current call only; the library's internal
/// state (tile cache, mean-plane-crossing memoizer) remains usable afterwards.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unknown sensor: {0}")]
    UnknownSensor(String),

    #[error("point ({lat}, {lon}) is out of tile angles by more than 1/8 cell")]
    OutOfTileAngles { lat: f64, lon: f64 },

    #[error("cell indices ({i}, {j}) are out of tile range")]
    OutOfTileIndices { i: i64, j: i64 },

    #[error("tile updater produced an empty tile ({rows}x{cols})")]
    EmptyTile { rows: usize, cols: usize },

    #[error("overlapping cache selected a tile without the required interpolation neighbors")]
    TileWithoutRequiredNeighborsSelected,

    #[error("DEM entry point is behind the spacecraft")]
    DemEntryPointIsBehindSpacecraft,

    #[error("ray misses the ellipsoid")]
    RayMissesEllipsoid,

    #[error("duplicated parameter name: {0}")]
    DuplicatedParameterName(String),

    #[error("no parameters selected for refinement")]
    NoParametersSelected,

    #[error("no reference mappings supplied for refinement")]
    NoReferenceMappings,

    #[error("loaded interpolator frame '{loaded}' does not match configured ellipsoid frame '{configured}'")]
    FramesMismatchWithInterpolatorDump { loaded: String, configured: String },

    #[error("internal error: {0}")]
    Internal(String),
}
