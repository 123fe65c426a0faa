use std::path::PathBuf;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    JsonSerdeError(#[from] serde_json::Error),

    #[error(transparent)]
    MvtError(#[from] tilery_tile_utils::mvt::MvtError),

    #[error("Tile store filepath contains unsupported characters: {}", .0.display())]
    UnsupportedCharsInFilepath(PathBuf),

    #[error("The destination {} already exists and holds tiles", .0.display())]
    NonEmptyTarget(PathBuf),

    #[error("Not a tile path: {0}")]
    InvalidTilePath(String),

    #[error("Join table is malformed: {0}")]
    MalformedJoinTable(String),
}
