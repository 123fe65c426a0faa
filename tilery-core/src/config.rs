//! Pipeline configuration.
//!
//! Every stage receives an immutable `&Config`; nothing in the pipeline
//! reads process globals. The CLI populates this from its argument surface.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::filter::FilterSet;

/// Uncompressed-tile byte budget before the renderer starts retrying.
pub const DEFAULT_MAX_TILE_BYTES: usize = 500_000;

/// Feature-count budget per tile.
pub const DEFAULT_MAX_TILE_FEATURES: usize = 200_000;

/// Feature-count ceiling per tile used when guessing a basezoom.
pub const BASEZOOM_GUESS_LIMIT: f64 = 50_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSimplifier {
    DouglasPeucker,
    Visvalingam,
}

#[derive(Debug)]
pub struct Config {
    /// Lowest zoom written to the tile store. Zooms below it are still
    /// traversed to seed their children.
    pub minzoom: u8,
    pub maxzoom: u8,

    /// log2 of the tile coordinate extent at maxzoom (12 => 4096x4096).
    pub full_detail: u8,
    /// Detail floor for the oversize-tile retry loop.
    pub min_detail: u8,
    /// Tile buffer in tile-local pixels at full detail.
    pub buffer: i64,

    /// Multiplier on the simplification tolerance; 1.0 keeps roughly
    /// pixel-accurate geometry.
    pub simplification: f64,
    pub simplifier: LineSimplifier,
    /// Unify shared polygon borders before simplifying so adjacent
    /// features cannot crack apart.
    pub detect_shared_borders: bool,
    /// Replace sub-pixel polygons with accumulated single-pixel squares.
    pub tiny_polygon_reduction: bool,

    /// Zoom at which every feature (subject to gamma and filters) is kept.
    /// `None` asks the preflight scan to choose one.
    pub basezoom: Option<u8>,
    /// Decimation factor between zooms below basezoom. `None` guesses.
    pub droprate: Option<f64>,
    /// Minimum curve-distance exponent between retained points; 0 disables.
    pub gamma: f64,
    /// Apply the basezoom/droprate model to lines / polygons too.
    pub drop_lines: bool,
    pub drop_polygons: bool,
    /// Instead of failing oversize tiles, drop a fraction of features and
    /// retry.
    pub drop_densest_as_needed: bool,

    pub coalesce: bool,
    /// Sort layer contents by (type, attributes, index) before coalescing.
    pub reorder: bool,
    pub preserve_input_order: bool,

    /// Attribute allow-list; `None` keeps everything not excluded.
    pub include: Option<HashSet<String>>,
    pub exclude: HashSet<String>,
    /// Drop all attributes (`include`/`exclude` are ignored).
    pub exclude_all: bool,
    pub filter: Option<FilterSet>,

    /// Never clip features to tile bounds. Guarded by an oversize check.
    pub prevent_clipping: bool,
    /// Emit each feature into exactly one tile, never duplicated into
    /// neighbors via the buffer.
    pub prevent_duplication: bool,
    /// Join anti-meridian crossings into one continuous copy.
    pub detect_wraparound: bool,

    pub max_tile_bytes: usize,
    pub max_tile_features: usize,
    /// Keep going when a tile exceeds the feature budget.
    pub force: bool,

    /// Right-shift applied to world coordinates in the serial format.
    pub geometry_scale: u32,
    /// Marker width in pixels assumed by the basezoom guesser.
    pub marker_width: f64,

    pub cpus: usize,
    /// File-descriptor budget for temporary files.
    pub file_limit: usize,
    /// In-memory sort budget in bytes per sort chunk.
    pub memory_budget: usize,
    /// Cumulative temp-file byte budget; exceeding 90% of it warns once.
    pub temp_budget: Option<u64>,
    pub tmp_dir: PathBuf,

    /// Layer name for features whose source does not assign one.
    pub default_layer: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            minzoom: 0,
            maxzoom: 14,
            full_detail: 12,
            min_detail: 7,
            buffer: 5,
            simplification: 1.0,
            simplifier: LineSimplifier::DouglasPeucker,
            detect_shared_borders: false,
            tiny_polygon_reduction: true,
            basezoom: None,
            droprate: None,
            gamma: 0.0,
            drop_lines: false,
            drop_polygons: false,
            drop_densest_as_needed: false,
            coalesce: false,
            reorder: false,
            preserve_input_order: false,
            include: None,
            exclude: HashSet::new(),
            exclude_all: false,
            filter: None,
            prevent_clipping: false,
            prevent_duplication: false,
            detect_wraparound: false,
            max_tile_bytes: DEFAULT_MAX_TILE_BYTES,
            max_tile_features: DEFAULT_MAX_TILE_FEATURES,
            force: false,
            geometry_scale: 0,
            marker_width: 1.0,
            cpus: default_cpus(),
            file_limit: 256,
            memory_budget: 256 << 20,
            temp_budget: None,
            tmp_dir: std::env::temp_dir(),
            default_layer: "features".to_string(),
        }
    }
}

impl Config {
    /// Curve distance covered by one tile-pixel at zoom `z` (used by the
    /// gamma spacing rule and the minzoom calculus).
    #[must_use]
    pub fn curve_scale(z: u8) -> f64 {
        (2_f64).powi(64 - 2 * (i32::from(z) + 8))
    }

    /// Tile detail used at zoom `z`.
    #[must_use]
    pub fn detail_at(&self, z: u8) -> u8 {
        // Detail cannot exceed the world resolution left above this zoom
        self.full_detail.min(32 - z.min(31))
    }

    /// Byte ceiling that makes a feature's attributes inline rather than
    /// referenced: anything spanning more than ~one tile at maxzoom.
    #[must_use]
    pub fn inline_attr_span(&self) -> i64 {
        2 * (1_i64 << (32 - u32::from(self.maxzoom)))
    }
}

/// Worker count: a power of two no larger than the core count, capped so
/// segment ids fit the 15 bits reserved in sort records.
#[must_use]
pub fn default_cpus() -> usize {
    let cores = num_cpus::get().clamp(1, 32_767);
    let mut cpus = 1;
    while cpus * 2 <= cores {
        cpus *= 2;
    }
    cpus
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cpus_power_of_two() {
        let cpus = default_cpus();
        assert!(cpus >= 1);
        assert_eq!(cpus & (cpus - 1), 0);
    }

    #[test]
    fn test_curve_scale() {
        // At z=0 a tile pixel (detail 8 frame of reference) covers
        // 2^48 curve units
        assert_eq!(Config::curve_scale(0), (2_f64).powi(48));
        assert!(Config::curve_scale(10) < Config::curve_scale(9));
    }

    #[test]
    fn test_inline_attr_span() {
        let config = Config {
            maxzoom: 14,
            ..Config::default()
        };
        assert_eq!(config.inline_attr_span(), 2 << 18);
    }
}
