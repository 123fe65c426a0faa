//! Tile stores for the tilery tiler.
//!
//! Two layouts: an MBTiles SQLite database (flat `tiles` table,
//! TMS-flipped rows) and a `{z}/{x}/{y}.pbf` directory tree. Both carry
//! the same metadata rows, including the `json` row with `vector_layers`
//! and tilestats. Tile joining reuses the same MVT codec to merge layers
//! across stores and attach CSV attributes.

mod dirtiles;
mod errors;
mod join;
mod mbtiles;
mod metadata;

pub use dirtiles::DirTiles;
pub use errors::{StoreError, StoreResult};
pub use join::{CsvTable, merge_tile};
pub use mbtiles::{Mbtiles, MbtilesReader, MbtilesWriter};
pub use metadata::Metadata;
