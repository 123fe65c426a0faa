//! Tile and world coordinate utilities for the tilery tiler.
//!
//! The tiler works in a square integer "world plane" of `2^32 x 2^32`
//! units covering the Web-Mercator projection of the globe. A tile
//! `(z, x, y)` covers the half-open world range
//! `[x << (32 - z), (x + 1) << (32 - z))` on each axis.

use std::f64::consts::PI;
use std::fmt::{Display, Formatter, Result};

mod compression;
pub use compression::{decode_gzip, encode_gzip, is_gzipped};
pub mod mvt;

/// Number of bits along one axis of the world coordinate plane.
pub const WORLD_BITS: u8 = 32;

/// Extent of the world coordinate plane along one axis.
pub const WORLD_EXTENT: i64 = 1_i64 << WORLD_BITS;

/// Highest zoom the 64-bit curve keys can address.
pub const MAX_ZOOM: u8 = 24;

/// Web Mercator is singular at the poles; latitudes are clamped here.
pub const LAT_LIMIT: f64 = 89.9;

#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl Display for TileCoord {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        if f.alternate() {
            write!(f, "{}/{}/{}", self.z, self.x, self.y)
        } else {
            write!(f, "{},{},{}", self.z, self.x, self.y)
        }
    }
}

impl TileCoord {
    /// Checks provided coordinates for validity before constructing
    /// a [`TileCoord`] instance.
    #[must_use]
    pub fn new_checked(z: u8, x: u32, y: u32) -> Option<TileCoord> {
        Self::is_possible_on_zoom_level(z, x, y).then_some(Self { z, x, y })
    }

    /// Constructs a [`TileCoord`] without checking that the tile can exist.
    #[must_use]
    pub fn new_unchecked(z: u8, x: u32, y: u32) -> TileCoord {
        Self { z, x, y }
    }

    /// Checks that zoom `z` is plausibly small and `x`/`y` is possible on said zoom level
    #[must_use]
    pub fn is_possible_on_zoom_level(z: u8, x: u32, y: u32) -> bool {
        if z > MAX_ZOOM {
            return false;
        }
        let side_len = 1_u32 << z;
        x < side_len && y < side_len
    }

    /// The tile one zoom level up that contains this tile.
    #[must_use]
    pub fn parent(&self) -> Option<TileCoord> {
        (self.z > 0).then(|| Self {
            z: self.z - 1,
            x: self.x >> 1,
            y: self.y >> 1,
        })
    }

    /// World-plane range covered by this tile as `[min_x, min_y, max_x, max_y]`.
    /// The maxima are exclusive.
    #[must_use]
    pub fn world_bounds(&self) -> [i64; 4] {
        let size = world_per_tile(self.z);
        let min_x = i64::from(self.x) * size;
        let min_y = i64::from(self.y) * size;
        [min_x, min_y, min_x + size, min_y + size]
    }
}

pub type TileData = Vec<u8>;

/// World units along one tile edge at zoom `z`.
///
/// # Panics
/// Panics if `z` is greater than [`WORLD_BITS`].
#[must_use]
pub fn world_per_tile(z: u8) -> i64 {
    assert!(z <= WORLD_BITS, "zoom {z} must be <= {WORLD_BITS}");
    1_i64 << (WORLD_BITS - z)
}

/// Tile containing a world coordinate at zoom `z`. Coordinates outside the
/// plane (buffer overhang) are clamped to the edge tiles.
#[must_use]
pub fn world_to_tile(wx: i64, wy: i64, z: u8) -> (u32, u32) {
    let last = i64::from((1_u32 << z) - 1);
    let size = world_per_tile(z);
    let tx = (wx / size).clamp(0, last);
    let ty = (wy / size).clamp(0, last);
    (tx as u32, ty as u32)
}

/// Project longitude/latitude onto the integer world plane.
///
/// Latitudes beyond [`LAT_LIMIT`] are clamped; the caller is responsible
/// for warning about out-of-range inputs.
#[must_use]
pub fn lonlat_to_world(lon: f64, lat: f64) -> (i64, i64) {
    let lat = lat.clamp(-LAT_LIMIT, LAT_LIMIT);
    let n = WORLD_EXTENT as f64;
    let x = (lon + 180.0) / 360.0 * n;
    let lat_rad = lat.to_radians();
    let y = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n;
    (x.floor() as i64, y.floor() as i64)
}

/// Inverse of [`lonlat_to_world`].
#[must_use]
pub fn world_to_lonlat(wx: i64, wy: i64) -> (f64, f64) {
    let n = WORLD_EXTENT as f64;
    let lon = wx as f64 / n * 360.0 - 180.0;
    let merc = PI * (1.0 - 2.0 * (wy as f64) / n);
    let lat = merc.sinh().atan().to_degrees();
    (lon, lat)
}

/// Lon/lat bounding box `[west, south, east, north]` of a world-plane bbox.
#[must_use]
pub fn world_bbox_to_lonlat(bbox: [i64; 4]) -> [f64; 4] {
    let (west, north) = world_to_lonlat(bbox[0], bbox[1]);
    let (east, south) = world_to_lonlat(bbox[2], bbox[3]);
    [west, south, east, north]
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0.0, 0.0, (WORLD_EXTENT / 2, WORLD_EXTENT / 2))]
    #[case(-180.0, 0.0, (0, WORLD_EXTENT / 2))]
    #[case(180.0, 0.0, (WORLD_EXTENT, WORLD_EXTENT / 2))]
    fn test_lonlat_to_world(#[case] lon: f64, #[case] lat: f64, #[case] expected: (i64, i64)) {
        assert_eq!(lonlat_to_world(lon, lat), expected);
    }

    #[test]
    fn test_lat_is_clamped() {
        let (_, y_pole) = lonlat_to_world(0.0, 90.0);
        let (_, y_limit) = lonlat_to_world(0.0, LAT_LIMIT);
        assert_eq!(y_pole, y_limit);
        // the clamp latitude is past the top of the tiled plane; such
        // points exist in coordinate space but fall outside every tile
        assert!(y_limit < 0);
        let (_, y_edge) = lonlat_to_world(0.0, 85.0511);
        assert!((0..WORLD_EXTENT).contains(&y_edge));
    }

    #[rstest]
    #[case(12.4924, 41.8902)] // Colosseum
    #[case(-71.0589, 42.3601)]
    #[case(151.2093, -33.8688)]
    #[case(0.0, 0.0)]
    fn test_projection_roundtrip(#[case] lon: f64, #[case] lat: f64) {
        let (wx, wy) = lonlat_to_world(lon, lat);
        let (lon2, lat2) = world_to_lonlat(wx, wy);
        // one world unit is ~9mm at the equator
        assert_relative_eq!(lon, lon2, epsilon = 1e-6);
        assert_relative_eq!(lat, lat2, epsilon = 1e-6);
    }

    #[rstest]
    #[case(0, 0, 0, (0, 0))]
    #[case(2, WORLD_EXTENT - 1, WORLD_EXTENT - 1, (3, 3))]
    #[case(2, WORLD_EXTENT / 2, WORLD_EXTENT / 2, (2, 2))]
    #[case(2, -5, 7, (0, 0))] // buffer overhang clamps
    fn test_world_to_tile(
        #[case] z: u8,
        #[case] wx: i64,
        #[case] wy: i64,
        #[case] expected: (u32, u32),
    ) {
        assert_eq!(world_to_tile(wx, wy, z), expected);
    }

    #[test]
    fn test_world_bounds() {
        let t = TileCoord::new_unchecked(1, 1, 0);
        assert_eq!(
            t.world_bounds(),
            [WORLD_EXTENT / 2, 0, WORLD_EXTENT, WORLD_EXTENT / 2]
        );
    }

    #[test]
    fn test_tile_coord_zoom_range() {
        for z in 0..=MAX_ZOOM {
            assert!(TileCoord::is_possible_on_zoom_level(z, 0, 0));
        }
        assert!(!TileCoord::is_possible_on_zoom_level(MAX_ZOOM + 1, 0, 0));
        assert_eq!(TileCoord::new_checked(5, 31, 32), None);
        assert_eq!(
            TileCoord::new_checked(5, 31, 31),
            Some(TileCoord { z: 5, x: 31, y: 31 })
        );
    }

    #[test]
    fn test_parent() {
        let t = TileCoord::new_unchecked(3, 5, 6);
        assert_eq!(t.parent(), Some(TileCoord::new_unchecked(2, 2, 3)));
        assert_eq!(TileCoord::new_unchecked(0, 0, 0).parent(), None);
    }

    #[test]
    fn xyz_format() {
        let xyz = TileCoord { z: 1, x: 2, y: 3 };
        assert_eq!(format!("{xyz}"), "1,2,3");
        assert_eq!(format!("{xyz:#}"), "1/2/3");
    }
}
