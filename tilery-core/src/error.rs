use std::path::PathBuf;

use tilery_tile_utils::TileCoord;

/// A convenience [`Result`] for the tilery core crate.
pub type CoreResult<T> = Result<T, CoreError>;

#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid filter expression: {0}")]
    FilterParse(String),

    #[error("Tile {0:#} is {1} bytes even at the lowest detail; try a lower maxzoom or --drop-densest-as-needed")]
    TileTooBig(TileCoord, usize),

    #[error("Tile {0:#} has {1} features, more than the limit of {2}; try a lower maxzoom or --force")]
    TooManyFeatures(TileCoord, usize, usize),

    #[error("Polygon cleaning failed in tile {0:#}; offending geometry dumped to {1}")]
    PolygonClean(TileCoord, PathBuf),

    #[error("Feature spans {0} tiles at maxzoom and clipping is disabled")]
    OversizeFeature(u64),

    #[error("Geometry stream is corrupt: {0}")]
    CorruptGeometry(String),

    #[error("Could not parse input: {0}")]
    Parse(String),

    #[error(transparent)]
    Mvt(#[from] tilery_tile_utils::mvt::MvtError),

    #[error("Tile store error: {0}")]
    Sink(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Process exit code for this error kind. Tiles that would not fit a
    /// zoom level exit with 1 so callers can distinguish "output exists
    /// but is truncated" from hard failures.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::TileTooBig(..) | Self::TooManyFeatures(..) => 1,
            Self::Io(_) => 2,
            Self::CorruptGeometry(_) | Self::Parse(_) | Self::Mvt(_) => 3,
            Self::FilterParse(_) => 4,
            Self::PolygonClean(..) | Self::OversizeFeature(_) | Self::Sink(_) | Self::Internal(_) => 5,
        }
    }
}
