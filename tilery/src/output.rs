//! Output store selection and the tile-sink bridge between the pipeline
//! and the store writers.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, bail};
use tilery_core::{CoreError, CoreResult, TileSink};
use tilery_tile_utils::TileCoord;
use tilestore::{DirTiles, Metadata, MbtilesWriter};

pub enum Output {
    Mbtiles(MbtilesWriter),
    Dir(DirTiles),
}

impl Output {
    pub fn create(
        output: Option<&Path>,
        output_dir: Option<&Path>,
        overwrite: bool,
    ) -> anyhow::Result<(Self, PathBuf)> {
        match (output, output_dir) {
            (Some(path), None) => {
                if overwrite && path.exists() {
                    std::fs::remove_file(path)
                        .with_context(|| format!("removing {}", path.display()))?;
                }
                Ok((
                    Self::Mbtiles(MbtilesWriter::create(path)?),
                    path.to_path_buf(),
                ))
            }
            (None, Some(dir)) => {
                if overwrite && dir.exists() {
                    std::fs::remove_dir_all(dir)
                        .with_context(|| format!("removing {}", dir.display()))?;
                }
                Ok((Self::Dir(DirTiles::create(dir)?), dir.to_path_buf()))
            }
            _ => bail!("exactly one of --output and --output-dir is required"),
        }
    }

    pub fn put(&mut self, coord: TileCoord, data: &[u8]) -> anyhow::Result<()> {
        match self {
            Self::Mbtiles(writer) => writer.put_tile(coord, data)?,
            Self::Dir(dir) => dir.put_tile(coord, data)?,
        }
        Ok(())
    }

    pub fn finish(self, metadata: &Metadata) -> anyhow::Result<()> {
        match self {
            Self::Mbtiles(writer) => writer.finish(metadata)?,
            Self::Dir(dir) => dir.write_metadata(metadata)?,
        }
        Ok(())
    }
}

impl TileSink for Output {
    fn put_tile(&mut self, coord: TileCoord, data: Vec<u8>) -> CoreResult<()> {
        self.put(coord, &data)
            .map_err(|e| CoreError::Sink(e.to_string()))
    }
}
