use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use anyhow::Context as _;
use clap::Parser as _;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use tilery_core::{CoreError, Pipeline};
use tilery_tile_utils::{TileCoord, world_to_lonlat};
use tilestore::{CsvTable, DirTiles, MbtilesReader, Metadata, StoreResult, merge_tile};

use crate::args::{Args, BuildArgs, Commands, JoinArgs};
use crate::geojson::open_source;
use crate::output::Output;

mod args;
mod geojson;
mod output;
mod stats;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let result = match args.command {
        Commands::Build(build_args) => build(&build_args, args.quiet),
        Commands::Join(join_args) => join(&join_args),
    };
    if let Err(e) = result {
        error!("{e:#}");
        let code = e
            .downcast_ref::<CoreError>()
            .map_or(1, CoreError::exit_code);
        std::process::exit(code);
    }
}

fn progress_bar(quiet: bool, len: u64, message: &'static str) -> Option<ProgressBar> {
    if quiet {
        return None;
    }
    let bar = ProgressBar::new(len).with_message(message);
    bar.set_style(
        ProgressStyle::with_template("{msg:12} [{bar:40}] {percent:>3}%")
            .expect("static template")
            .progress_chars("=> "),
    );
    Some(bar)
}

fn build(args: &BuildArgs, quiet: bool) -> anyhow::Result<()> {
    let config = args.to_config()?;
    let maxzoom = config.maxzoom;
    let minzoom = config.minzoom;

    let (mut output, output_path) =
        Output::create(args.output.as_deref(), args.output_dir.as_deref(), args.overwrite)?;

    let sources: Vec<_> = args
        .inputs
        .iter()
        .map(|path| open_source(path, args.layer.as_deref()))
        .collect();

    let mut pipeline = Pipeline::new(config);
    let read = pipeline.ingest(sources)?;
    if read == 0 {
        anyhow::bail!("no features were read from the input");
    }

    let sort_bar = progress_bar(quiet, 1000, "sorting");
    pipeline.sort(&mut |fraction| {
        if let Some(bar) = &sort_bar {
            bar.set_position((fraction * 1000.0) as u64);
        }
    })?;
    if let Some(bar) = sort_bar {
        bar.finish();
    }

    let params = pipeline.assign_minzooms()?;
    info!(
        "Tiling with basezoom {} and droprate {:.2}",
        params.basezoom, params.droprate
    );

    let zoom_bar = progress_bar(quiet, u64::from(maxzoom) + 1, "tiling");
    let summary = pipeline.run_zooms(&mut output, &mut |z, tiles| {
        if let Some(bar) = &zoom_bar {
            bar.set_position(u64::from(z) + 1);
        }
        info!("zoom {z}: {tiles} tiles");
    })?;
    if let Some(bar) = zoom_bar {
        bar.finish();
    }

    let layers = pipeline.layers();
    let bounds = pipeline.bounds();
    let center = summary
        .densest_tile
        .map(|(coord, _)| {
            let b = coord.world_bounds();
            let (lon, lat) = world_to_lonlat((b[0] + b[2]) / 2, (b[1] + b[3]) / 2);
            (lon, lat, maxzoom)
        })
        .or_else(|| {
            bounds.map(|b| ((b[0] + b[2]) / 2.0, (b[1] + b[3]) / 2.0, maxzoom))
        });

    let name = args.name.clone().unwrap_or_else(|| store_name(&output_path));
    let metadata = Metadata {
        name,
        description: args.description.clone(),
        minzoom,
        maxzoom,
        bounds,
        center,
        generator: format!("tilery v{VERSION}"),
        generator_options: args.generator_options(),
        vector_layers: stats::vector_layers(&layers, minzoom, maxzoom),
        tilestats: Some(stats::tilestats(&layers)),
    };
    output.finish(&metadata)?;

    info!(
        "Wrote {} tiles over {} features to {}",
        summary.tiles_written,
        pipeline.feature_count(),
        output_path.display()
    );
    Ok(())
}

enum JoinSource {
    Mbtiles(MbtilesReader),
    Dir(DirTiles),
}

impl JoinSource {
    fn open(path: &Path) -> anyhow::Result<Self> {
        if path.is_dir() {
            Ok(Self::Dir(DirTiles::open(path)))
        } else {
            Ok(Self::Mbtiles(MbtilesReader::open(path)?))
        }
    }

    fn list_tiles(&mut self) -> StoreResult<Vec<TileCoord>> {
        match self {
            Self::Mbtiles(reader) => reader.list_tiles(),
            Self::Dir(dir) => dir.list_tiles(),
        }
    }

    fn get_tile(&mut self, coord: TileCoord) -> StoreResult<Option<Vec<u8>>> {
        match self {
            Self::Mbtiles(reader) => reader.get_tile(coord),
            Self::Dir(dir) => dir.get_tile(coord),
        }
    }

    fn json_metadata(&mut self) -> Option<String> {
        match self {
            Self::Mbtiles(reader) => reader.get_metadata_value("json").ok().flatten(),
            Self::Dir(dir) => dir
                .read_metadata()
                .ok()
                .flatten()
                .and_then(|v| v.get("json").and_then(|j| j.as_str().map(ToString::to_string))),
        }
    }
}

fn join(args: &JoinArgs) -> anyhow::Result<()> {
    let csv = args
        .csv
        .as_ref()
        .map(|path| {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            anyhow::Ok(CsvTable::parse(&text)?)
        })
        .transpose()?;
    let exclude: HashSet<String> = args.exclude.iter().cloned().collect();

    let mut sources = args
        .inputs
        .iter()
        .map(|path| JoinSource::open(path))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut coords = BTreeSet::new();
    for source in &mut sources {
        coords.extend(source.list_tiles()?);
    }
    if coords.is_empty() {
        anyhow::bail!("no tiles found in the inputs");
    }

    let (mut output, output_path) =
        Output::create(args.output.as_deref(), args.output_dir.as_deref(), args.overwrite)?;

    let (mut minzoom, mut maxzoom) = (u8::MAX, 0);
    for &coord in &coords {
        let mut copies = Vec::new();
        for source in &mut sources {
            if let Some(data) = source.get_tile(coord)? {
                copies.push(data);
            }
        }
        let merged = merge_tile(&copies, csv.as_ref(), &exclude)?;
        output.put(coord, &merged)?;
        minzoom = minzoom.min(coord.z);
        maxzoom = maxzoom.max(coord.z);
    }

    // carry the layer schema over from the first source that has one
    let vector_layers = sources
        .iter_mut()
        .find_map(JoinSource::json_metadata)
        .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok())
        .and_then(|v| serde_json::from_value(v["vector_layers"].clone()).ok())
        .unwrap_or_default();

    let metadata = Metadata {
        name: args.name.clone().unwrap_or_else(|| store_name(&output_path)),
        description: String::new(),
        minzoom,
        maxzoom,
        bounds: None,
        center: None,
        generator: format!("tilery v{VERSION}"),
        generator_options: "join".to_string(),
        vector_layers,
        tilestats: None,
    };
    output.finish(&metadata)?;
    info!("Joined {} tiles into {}", coords.len(), output_path.display());
    Ok(())
}

fn store_name(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| "tiles".to_string(), |s| s.to_string_lossy().to_string())
}
