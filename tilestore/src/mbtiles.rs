//! MBTiles access: the flat `tiles` table plus `metadata`, with the
//! usual TMS row flip.

use std::ffi::OsStr;
use std::fmt::{Display, Formatter};
use std::path::Path;

use log::debug;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection as _, Row as _, SqliteConnection, query};
use tilery_tile_utils::TileCoord;

use crate::errors::{StoreError, StoreResult};
use crate::metadata::Metadata;

#[derive(Clone, Debug)]
pub struct Mbtiles {
    filepath: String,
    filename: String,
}

impl Display for Mbtiles {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.filepath)
    }
}

fn flip_y(coord: TileCoord) -> i64 {
    i64::from((1_u32 << coord.z) - 1 - coord.y)
}

impl Mbtiles {
    pub fn new<P: AsRef<Path>>(filepath: P) -> StoreResult<Self> {
        let path = filepath.as_ref();
        Ok(Self {
            filepath: path
                .to_str()
                .ok_or_else(|| StoreError::UnsupportedCharsInFilepath(path.to_path_buf()))?
                .to_string(),
            filename: path
                .file_stem()
                .unwrap_or_else(|| OsStr::new("unknown"))
                .to_string_lossy()
                .to_string(),
        })
    }

    #[must_use]
    pub fn filepath(&self) -> &str {
        &self.filepath
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub async fn open_or_new(&self) -> StoreResult<SqliteConnection> {
        debug!("Opening or creating {self}");
        let opt = SqliteConnectOptions::new()
            .filename(self.filepath())
            .create_if_missing(true);
        Ok(SqliteConnection::connect_with(&opt).await?)
    }

    pub async fn open_readonly(&self) -> StoreResult<SqliteConnection> {
        debug!("Opening as readonly {self}");
        let opt = SqliteConnectOptions::new()
            .filename(self.filepath())
            .read_only(true);
        Ok(SqliteConnection::connect_with(&opt).await?)
    }

    /// Create the flat schema. Refuses a database that already has tiles.
    pub async fn init_schema(&self, conn: &mut SqliteConnection) -> StoreResult<()> {
        let has_tiles = query(
            "SELECT 1 FROM sqlite_schema WHERE type = 'table' AND name = 'tiles' LIMIT 1",
        )
        .fetch_optional(&mut *conn)
        .await?
        .is_some();
        if has_tiles {
            let existing = query("SELECT 1 FROM tiles LIMIT 1")
                .fetch_optional(&mut *conn)
                .await?;
            if existing.is_some() {
                return Err(StoreError::NonEmptyTarget(self.filepath.clone().into()));
            }
        }

        // Bulk-load settings: tiles are written once and the file is
        // useless if the process dies anyway.
        query("PRAGMA synchronous = OFF")
            .execute(&mut *conn)
            .await?;
        query("PRAGMA journal_mode = DELETE")
            .execute(&mut *conn)
            .await?;
        query("CREATE TABLE IF NOT EXISTS metadata (name TEXT, value TEXT)")
            .execute(&mut *conn)
            .await?;
        query(
            "CREATE TABLE IF NOT EXISTS tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB)",
        )
        .execute(&mut *conn)
        .await?;
        query("CREATE UNIQUE INDEX IF NOT EXISTS name ON metadata (name)")
            .execute(&mut *conn)
            .await?;
        query(
            "CREATE UNIQUE INDEX IF NOT EXISTS tile_index ON tiles (zoom_level, tile_column, tile_row)",
        )
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn put_tile(
        &self,
        conn: &mut SqliteConnection,
        coord: TileCoord,
        data: &[u8],
    ) -> StoreResult<()> {
        let y = flip_y(coord);
        query(
            "INSERT OR REPLACE INTO tiles (zoom_level, tile_column, tile_row, tile_data) VALUES (?, ?, ?, ?)",
        )
        .bind(i64::from(coord.z))
        .bind(i64::from(coord.x))
        .bind(y)
        .bind(data)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn get_tile(
        &self,
        conn: &mut SqliteConnection,
        coord: TileCoord,
    ) -> StoreResult<Option<Vec<u8>>> {
        let y = flip_y(coord);
        let row = query(
            "SELECT tile_data FROM tiles WHERE zoom_level = ? AND tile_column = ? AND tile_row = ?",
        )
        .bind(i64::from(coord.z))
        .bind(i64::from(coord.x))
        .bind(y)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(row.map(|r| r.get::<Vec<u8>, _>(0)))
    }

    /// All tile coordinates present, in zoom-major order.
    pub async fn list_tiles(&self, conn: &mut SqliteConnection) -> StoreResult<Vec<TileCoord>> {
        let rows = query(
            "SELECT zoom_level, tile_column, tile_row FROM tiles ORDER BY zoom_level, tile_column, tile_row",
        )
        .fetch_all(&mut *conn)
        .await?;
        let mut coords = Vec::with_capacity(rows.len());
        for row in rows {
            let z = row.get::<i64, _>(0) as u8;
            let x = row.get::<i64, _>(1) as u32;
            let flipped = row.get::<i64, _>(2) as u32;
            coords.push(TileCoord::new_unchecked(z, x, (1 << z) - 1 - flipped));
        }
        Ok(coords)
    }

    pub async fn set_metadata_value(
        &self,
        conn: &mut SqliteConnection,
        key: &str,
        value: &str,
    ) -> StoreResult<()> {
        query("INSERT OR REPLACE INTO metadata (name, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn get_metadata_value(
        &self,
        conn: &mut SqliteConnection,
        key: &str,
    ) -> StoreResult<Option<String>> {
        let row = query("SELECT value FROM metadata WHERE name = ?")
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    pub async fn insert_metadata(
        &self,
        conn: &mut SqliteConnection,
        metadata: &Metadata,
    ) -> StoreResult<()> {
        for (key, value) in metadata.rows() {
            self.set_metadata_value(conn, &key, &value).await?;
        }
        Ok(())
    }
}

/// Synchronous facade over [`Mbtiles`] for the OS-thread pipeline: owns a
/// single-threaded async runtime and one connection. Callers serialize
/// access with their own store lock.
pub struct MbtilesWriter {
    mbtiles: Mbtiles,
    rt: tokio::runtime::Runtime,
    conn: SqliteConnection,
}

impl MbtilesWriter {
    pub fn create<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let mbtiles = Mbtiles::new(path)?;
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let mut conn = rt.block_on(mbtiles.open_or_new())?;
        rt.block_on(mbtiles.init_schema(&mut conn))?;
        Ok(Self { mbtiles, rt, conn })
    }

    pub fn put_tile(&mut self, coord: TileCoord, data: &[u8]) -> StoreResult<()> {
        self.rt
            .block_on(self.mbtiles.put_tile(&mut self.conn, coord, data))
    }

    /// Write the metadata rows and close the store.
    pub fn finish(mut self, metadata: &Metadata) -> StoreResult<()> {
        self.rt
            .block_on(self.mbtiles.insert_metadata(&mut self.conn, metadata))?;
        self.rt.block_on(self.conn.close())?;
        Ok(())
    }
}

/// Synchronous read-side counterpart of [`MbtilesWriter`], for joining.
pub struct MbtilesReader {
    mbtiles: Mbtiles,
    rt: tokio::runtime::Runtime,
    conn: SqliteConnection,
}

impl MbtilesReader {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let mbtiles = Mbtiles::new(path)?;
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let conn = rt.block_on(mbtiles.open_readonly())?;
        Ok(Self { mbtiles, rt, conn })
    }

    pub fn list_tiles(&mut self) -> StoreResult<Vec<TileCoord>> {
        self.rt.block_on(self.mbtiles.list_tiles(&mut self.conn))
    }

    pub fn get_tile(&mut self, coord: TileCoord) -> StoreResult<Option<Vec<u8>>> {
        self.rt
            .block_on(self.mbtiles.get_tile(&mut self.conn, coord))
    }

    pub fn get_metadata_value(&mut self, key: &str) -> StoreResult<Option<String>> {
        self.rt
            .block_on(self.mbtiles.get_metadata_value(&mut self.conn, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_mbtiles() -> (tempfile::TempDir, Mbtiles) {
        let dir = tempfile::tempdir().unwrap();
        let mbt = Mbtiles::new(dir.path().join("out.mbtiles")).unwrap();
        (dir, mbt)
    }

    #[tokio::test]
    async fn test_create_write_read() {
        let (_dir, mbt) = temp_mbtiles();
        let mut conn = mbt.open_or_new().await.unwrap();
        mbt.init_schema(&mut conn).await.unwrap();

        let coord = TileCoord::new_unchecked(3, 1, 2);
        mbt.put_tile(&mut conn, coord, b"payload").await.unwrap();
        let back = mbt.get_tile(&mut conn, coord).await.unwrap();
        assert_eq!(back.as_deref(), Some(b"payload".as_slice()));
        assert_eq!(
            mbt.get_tile(&mut conn, TileCoord::new_unchecked(3, 1, 3))
                .await
                .unwrap(),
            None
        );
        assert_eq!(mbt.list_tiles(&mut conn).await.unwrap(), vec![coord]);
    }

    #[tokio::test]
    async fn test_tms_flip() {
        let (_dir, mbt) = temp_mbtiles();
        let mut conn = mbt.open_or_new().await.unwrap();
        mbt.init_schema(&mut conn).await.unwrap();
        mbt.put_tile(&mut conn, TileCoord::new_unchecked(1, 0, 0), b"north")
            .await
            .unwrap();

        let row = query("SELECT tile_row FROM tiles")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        // XYZ y=0 is the top row; TMS stores it as the highest row
        assert_eq!(row.get::<i64, _>(0), 1);
    }

    #[tokio::test]
    async fn test_metadata_roundtrip() {
        let (_dir, mbt) = temp_mbtiles();
        let mut conn = mbt.open_or_new().await.unwrap();
        mbt.init_schema(&mut conn).await.unwrap();
        mbt.set_metadata_value(&mut conn, "name", "hello")
            .await
            .unwrap();
        mbt.set_metadata_value(&mut conn, "name", "world")
            .await
            .unwrap();
        assert_eq!(
            mbt.get_metadata_value(&mut conn, "name").await.unwrap(),
            Some("world".to_string())
        );
        assert_eq!(mbt.get_metadata_value(&mut conn, "nope").await.unwrap(), None);
    }

    #[test]
    fn test_sync_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.mbtiles");
        let mut writer = MbtilesWriter::create(&path).unwrap();
        writer
            .put_tile(TileCoord::new_unchecked(0, 0, 0), b"root")
            .unwrap();
        let md = Metadata {
            name: "t".to_string(),
            description: String::new(),
            minzoom: 0,
            maxzoom: 0,
            bounds: None,
            center: None,
            generator: "tilery".to_string(),
            generator_options: String::new(),
            vector_layers: vec![],
            tilestats: None,
        };
        writer.finish(&md).unwrap();

        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let mbt = Mbtiles::new(&path).unwrap();
            let mut conn = mbt.open_readonly().await.unwrap();
            assert!(
                mbt.get_tile(&mut conn, TileCoord::new_unchecked(0, 0, 0))
                    .await
                    .unwrap()
                    .is_some()
            );
            assert_eq!(
                mbt.get_metadata_value(&mut conn, "format").await.unwrap(),
                Some("pbf".to_string())
            );
        });
    }

    #[tokio::test]
    async fn test_refuses_non_empty_target() {
        let (_dir, mbt) = temp_mbtiles();
        let mut conn = mbt.open_or_new().await.unwrap();
        mbt.init_schema(&mut conn).await.unwrap();
        mbt.put_tile(&mut conn, TileCoord::new_unchecked(0, 0, 0), b"x")
            .await
            .unwrap();
        assert!(matches!(
            mbt.init_schema(&mut conn).await,
            Err(StoreError::NonEmptyTarget(_))
        ));
    }
}
