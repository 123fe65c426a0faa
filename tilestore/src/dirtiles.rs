//! The `{z}/{x}/{y}.pbf` directory layout, with `metadata.json` holding
//! the same rows as the MBTiles metadata table.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tilery_tile_utils::TileCoord;
use walkdir::WalkDir;

use crate::errors::{StoreError, StoreResult};
use crate::metadata::Metadata;

pub struct DirTiles {
    root: PathBuf,
}

impl DirTiles {
    pub fn create<P: AsRef<Path>>(root: P) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        if root.exists() {
            let has_tiles = WalkDir::new(&root)
                .into_iter()
                .filter_map(Result::ok)
                .any(|e| e.path().extension().is_some_and(|ext| ext == "pbf"));
            if has_tiles {
                return Err(StoreError::NonEmptyTarget(root));
            }
        } else {
            fs::create_dir_all(&root)?;
        }
        Ok(Self { root })
    }

    pub fn open<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn tile_path(&self, coord: TileCoord) -> PathBuf {
        self.root
            .join(coord.z.to_string())
            .join(coord.x.to_string())
            .join(format!("{}.pbf", coord.y))
    }

    pub fn put_tile(&self, coord: TileCoord, data: &[u8]) -> StoreResult<()> {
        let path = self.tile_path(coord);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }

    pub fn get_tile(&self, coord: TileCoord) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(self.tile_path(coord)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write_metadata(&self, metadata: &Metadata) -> StoreResult<()> {
        let mut obj = serde_json::Map::new();
        for (key, value) in metadata.rows() {
            obj.insert(key, Value::String(value));
        }
        fs::write(
            self.root.join("metadata.json"),
            serde_json::to_string_pretty(&Value::Object(obj))?,
        )?;
        Ok(())
    }

    pub fn read_metadata(&self) -> StoreResult<Option<Value>> {
        match fs::read_to_string(self.root.join("metadata.json")) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every tile in the store, in path order.
    pub fn list_tiles(&self) -> StoreResult<Vec<TileCoord>> {
        let mut coords = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file()
                || entry.path().extension().is_none_or(|ext| ext != "pbf")
            {
                continue;
            }
            coords.push(parse_tile_path(&self.root, entry.path())?);
        }
        Ok(coords)
    }
}

fn parse_tile_path(root: &Path, path: &Path) -> StoreResult<TileCoord> {
    let bad = || StoreError::InvalidTilePath(path.display().to_string());
    let rel = path.strip_prefix(root).map_err(|_| bad())?;
    let mut parts = rel.components().map(|c| c.as_os_str().to_string_lossy());
    let z = parts.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
    let x = parts.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
    let y = parts
        .next()
        .and_then(|s| s.strip_suffix(".pbf").map(ToString::to_string))
        .and_then(|s| s.parse().ok())
        .ok_or_else(bad)?;
    TileCoord::new_checked(z, x, y).ok_or_else(bad)
}
