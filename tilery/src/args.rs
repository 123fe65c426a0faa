use std::collections::HashSet;
use std::path::PathBuf;

use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use clap::{Parser, Subcommand};
use tilery_core::{Config, CoreError, CoreResult, FilterSet, LineSimplifier};

/// Defines the styles used for the CLI help output.
const HELP_STYLES: Styles = Styles::styled()
    .header(AnsiColor::Blue.on_default().bold())
    .usage(AnsiColor::Blue.on_default().bold())
    .literal(AnsiColor::White.on_default())
    .placeholder(AnsiColor::Green.on_default());

#[derive(Parser, Debug)]
#[command(
    version,
    name = "tilery",
    about = "Builds pyramids of vector tiles from large feature collections",
    after_help = "Use RUST_LOG environment variable to control logging level, e.g. RUST_LOG=debug or RUST_LOG=tilery=debug.",
    styles = HELP_STYLES
)]
pub struct Args {
    /// Suppress progress indicators
    #[arg(short, long)]
    pub quiet: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
#[allow(clippy::large_enum_variant)]
pub enum Commands {
    /// Read features and build a tile pyramid
    #[command(name = "build")]
    Build(BuildArgs),
    /// Merge existing tile stores, optionally joining CSV attributes
    #[command(name = "join")]
    Join(JoinArgs),
}

#[derive(clap::Args, Debug)]
pub struct BuildArgs {
    /// GeoJSON inputs (FeatureCollections); use '-' for standard input
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Write an MBTiles file here
    #[arg(short, long, conflicts_with = "output_dir", required_unless_present = "output_dir")]
    pub output: Option<PathBuf>,
    /// Write a {z}/{x}/{y}.pbf directory here instead
    #[arg(short = 'e', long)]
    pub output_dir: Option<PathBuf>,
    /// Delete an existing output first
    #[arg(short = 'F', long)]
    pub overwrite: bool,

    /// Tileset name for the metadata (defaults to the output name)
    #[arg(short, long)]
    pub name: Option<String>,
    /// Tileset description for the metadata
    #[arg(short = 'D', long, default_value = "")]
    pub description: String,
    /// Put all features in this layer instead of one layer per input
    #[arg(short, long)]
    pub layer: Option<String>,

    /// Highest zoom level to build
    #[arg(short = 'z', long, default_value_t = 14)]
    pub maxzoom: u8,
    /// Lowest zoom level to emit
    #[arg(short = 'Z', long, default_value_t = 0)]
    pub minzoom: u8,
    /// Zoom at which every feature is retained; chosen automatically if
    /// not set
    #[arg(short = 'B', long)]
    pub basezoom: Option<u8>,
    /// Decimation factor between zooms below the basezoom
    #[arg(short = 'r', long)]
    pub droprate: Option<f64>,
    /// Minimum curve-distance exponent between retained points (0 = off)
    #[arg(short = 'g', long, default_value_t = 0.0)]
    pub gamma: f64,

    /// Tile resolution as log2 of the coordinate extent
    #[arg(short = 'd', long, default_value_t = 12)]
    pub full_detail: u8,
    /// Lowest detail the oversize-tile retry may fall to
    #[arg(short = 'm', long, default_value_t = 7)]
    pub low_detail: u8,
    /// Tile buffer, in screen pixels
    #[arg(short = 'b', long, default_value_t = 5)]
    pub buffer: i64,
    /// Simplification tolerance multiplier
    #[arg(short = 'S', long, default_value_t = 1.0)]
    pub simplification: f64,
    /// Simplify with Visvalingam effective areas instead of Douglas-Peucker
    #[arg(long)]
    pub visvalingam: bool,
    /// Keep polygons that share borders sharing them after simplification
    #[arg(long)]
    pub detect_shared_borders: bool,
    /// Keep sub-pixel polygons instead of accumulating them into squares
    #[arg(long)]
    pub no_tiny_polygon_reduction: bool,

    /// Apply the basezoom/droprate decimation to lines
    #[arg(long)]
    pub drop_lines: bool,
    /// Apply the basezoom/droprate decimation to polygons
    #[arg(long)]
    pub drop_polygons: bool,
    /// Retry oversize tiles by dropping a fraction of their features
    #[arg(long)]
    pub drop_densest_as_needed: bool,

    /// Merge adjacent features with identical attributes
    #[arg(short = 'c', long)]
    pub coalesce: bool,
    /// Sort layer contents by attributes so coalescing finds more pairs
    #[arg(long)]
    pub reorder: bool,
    /// Emit features in their original input order
    #[arg(long)]
    pub preserve_input_order: bool,

    /// Keep only these attributes
    #[arg(short = 'y', long = "include", value_name = "ATTR")]
    pub include: Vec<String>,
    /// Drop these attributes
    #[arg(short = 'x', long = "exclude", value_name = "ATTR")]
    pub exclude: Vec<String>,
    /// Drop all attributes
    #[arg(short = 'X', long)]
    pub exclude_all: bool,
    /// Feature filter expression (JSON, keyed by layer or '*')
    #[arg(short = 'j', long)]
    pub filter: Option<String>,
    /// Read the feature filter expression from a file
    #[arg(short = 'J', long, conflicts_with = "filter")]
    pub filter_file: Option<PathBuf>,

    /// Never clip geometry to tile boundaries
    #[arg(long)]
    pub no_clipping: bool,
    /// Emit each feature in exactly one tile instead of duplicating into
    /// buffers
    #[arg(long)]
    pub no_duplication: bool,
    /// Join anti-meridian crossings into a continuous copy
    #[arg(long)]
    pub detect_longitude_wraparound: bool,

    /// Compressed tile size budget in bytes
    #[arg(short = 'M', long, default_value_t = 500_000)]
    pub max_tile_bytes: usize,
    /// Feature count budget per tile
    #[arg(short = 'O', long, default_value_t = 200_000)]
    pub max_tile_features: usize,
    /// Keep going when a tile exceeds the feature budget
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Right-shift applied to world coordinates in temporary files
    #[arg(long, default_value_t = 0)]
    pub geometry_scale: u32,
    /// Directory for temporary files
    #[arg(short = 't', long)]
    pub temp_dir: Option<PathBuf>,
    /// Warn when temporary files exceed 90% of this many bytes
    #[arg(long)]
    pub temp_budget: Option<u64>,
}

#[derive(clap::Args, Debug)]
pub struct JoinArgs {
    /// Tile stores to merge: .mbtiles files or tile directories
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,

    /// Write an MBTiles file here
    #[arg(short, long, conflicts_with = "output_dir", required_unless_present = "output_dir")]
    pub output: Option<PathBuf>,
    /// Write a {z}/{x}/{y}.pbf directory here instead
    #[arg(short = 'e', long)]
    pub output_dir: Option<PathBuf>,
    /// Delete an existing output first
    #[arg(short = 'F', long)]
    pub overwrite: bool,

    /// Tileset name for the metadata
    #[arg(short, long)]
    pub name: Option<String>,
    /// Join attributes from this CSV file, keyed on its first column
    #[arg(short = 'c', long)]
    pub csv: Option<PathBuf>,
    /// Drop these attributes while joining
    #[arg(short = 'x', long = "exclude", value_name = "ATTR")]
    pub exclude: Vec<String>,
}

impl BuildArgs {
    /// Turn the argument surface into the pipeline configuration.
    pub fn to_config(&self) -> CoreResult<Config> {
        if self.maxzoom > tilery_tile_utils::MAX_ZOOM {
            return Err(CoreError::Parse(format!(
                "maxzoom {} is above the limit of {}",
                self.maxzoom,
                tilery_tile_utils::MAX_ZOOM
            )));
        }
        if self.minzoom > self.maxzoom {
            return Err(CoreError::Parse(format!(
                "minzoom {} is above maxzoom {}",
                self.minzoom, self.maxzoom
            )));
        }
        let filter = match (&self.filter, &self.filter_file) {
            (Some(text), _) => Some(FilterSet::parse_str(text)?),
            (None, Some(path)) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| CoreError::Parse(format!("{}: {e}", path.display())))?;
                Some(FilterSet::parse_str(&text)?)
            }
            (None, None) => None,
        };
        Ok(Config {
            minzoom: self.minzoom,
            maxzoom: self.maxzoom,
            full_detail: self.full_detail,
            min_detail: self.low_detail,
            buffer: self.buffer,
            simplification: self.simplification,
            simplifier: if self.visvalingam {
                LineSimplifier::Visvalingam
            } else {
                LineSimplifier::DouglasPeucker
            },
            detect_shared_borders: self.detect_shared_borders,
            tiny_polygon_reduction: !self.no_tiny_polygon_reduction,
            basezoom: self.basezoom,
            droprate: self.droprate,
            gamma: self.gamma,
            drop_lines: self.drop_lines,
            drop_polygons: self.drop_polygons,
            drop_densest_as_needed: self.drop_densest_as_needed,
            coalesce: self.coalesce,
            reorder: self.reorder,
            preserve_input_order: self.preserve_input_order,
            include: (!self.include.is_empty())
                .then(|| self.include.iter().cloned().collect::<HashSet<_>>()),
            exclude: self.exclude.iter().cloned().collect(),
            exclude_all: self.exclude_all,
            filter,
            prevent_clipping: self.no_clipping,
            prevent_duplication: self.no_duplication,
            detect_wraparound: self.detect_longitude_wraparound,
            max_tile_bytes: self.max_tile_bytes,
            max_tile_features: self.max_tile_features,
            force: self.force,
            geometry_scale: self.geometry_scale,
            tmp_dir: self
                .temp_dir
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            temp_budget: self.temp_budget,
            ..Config::default()
        })
    }

    /// The options string recorded in the tileset metadata.
    #[must_use]
    pub fn generator_options(&self) -> String {
        let mut parts = vec![format!("--maxzoom {}", self.maxzoom)];
        if self.minzoom > 0 {
            parts.push(format!("--minzoom {}", self.minzoom));
        }
        if let Some(b) = self.basezoom {
            parts.push(format!("--basezoom {b}"));
        }
        if let Some(r) = self.droprate {
            parts.push(format!("--droprate {r}"));
        }
        if self.gamma > 0.0 {
            parts.push(format!("--gamma {}", self.gamma));
        }
        if self.coalesce {
            parts.push("--coalesce".to_string());
        }
        if self.drop_densest_as_needed {
            parts.push("--drop-densest-as-needed".to_string());
        }
        if self.detect_shared_borders {
            parts.push("--detect-shared-borders".to_string());
        }
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse(line: &[&str]) -> Args {
        Args::try_parse_from(line).unwrap()
    }

    #[test]
    fn test_build_defaults() {
        let args = parse(&["tilery", "build", "-o", "out.mbtiles", "in.geojson"]);
        let Commands::Build(build) = args.command else {
            panic!("expected build");
        };
        assert_eq!(build.maxzoom, 14);
        assert_eq!(build.minzoom, 0);
        let config = build.to_config().unwrap();
        assert_eq!(config.maxzoom, 14);
        assert_eq!(config.buffer, 5);
        assert!(config.include.is_none());
        assert!(!config.force);
    }

    #[test]
    fn test_requires_some_output() {
        assert!(Args::try_parse_from(["tilery", "build", "in.geojson"]).is_err());
        assert!(Args::try_parse_from([
            "tilery", "build", "-o", "a.mbtiles", "-e", "dir", "in.geojson"
        ])
        .is_err());
    }

    #[test]
    fn test_filter_parses() {
        let args = parse(&[
            "tilery",
            "build",
            "-o",
            "out.mbtiles",
            "-j",
            r#"{"*": ["has", "name"]}"#,
            "in.geojson",
        ]);
        let Commands::Build(build) = args.command else {
            panic!("expected build");
        };
        assert!(build.to_config().unwrap().filter.is_some());

        let bad = BuildArgs {
            filter: Some("nonsense".to_string()),
            ..match parse(&["tilery", "build", "-o", "o.mbtiles", "i.geojson"]).command {
                Commands::Build(b) => b,
                Commands::Join(_) => unreachable!(),
            }
        };
        assert!(bad.to_config().is_err());
    }

    #[test]
    fn test_zoom_validation() {
        let args = parse(&["tilery", "build", "-o", "o.mbtiles", "-z", "30", "i.geojson"]);
        let Commands::Build(build) = args.command else {
            panic!("expected build");
        };
        assert!(build.to_config().is_err());

        let args = parse(&[
            "tilery", "build", "-o", "o.mbtiles", "-z", "4", "-Z", "9", "i.geojson",
        ]);
        let Commands::Build(build) = args.command else {
            panic!("expected build");
        };
        assert!(build.to_config().is_err());
    }

    #[test]
    fn test_join_args() {
        let args = parse(&[
            "tilery", "join", "-o", "out.mbtiles", "--csv", "t.csv", "a.mbtiles", "b.mbtiles",
        ]);
        let Commands::Join(join) = args.command else {
            panic!("expected join");
        };
        assert_eq!(join.inputs.len(), 2);
        assert!(join.csv.is_some());
    }
}
