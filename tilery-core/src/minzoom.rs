//! Feature-minzoom assignment.
//!
//! Walks the sorted index once and gives every feature the lowest zoom at
//! which it first appears, per the basezoom/droprate model: at each zoom
//! below basezoom a per-tile counter earns one credit per feature and an
//! inclusion costs `droprate^(basezoom - z)` credits, so on average one
//! out of that many features survives. A feature's minzoom is the bottom
//! of the contiguous run of zooms that included it, which keeps retention
//! monotonic across zooms.
//!
//! The same pass rewrites each record's minzoom byte and emits the
//! zoom-0 traversal stream, so the sorted geometry is read exactly once.

use std::io::{BufReader, BufWriter, Read as _, Seek as _};

use log::info;
use tilery_tile_utils::TileCoord;

use crate::config::{BASEZOOM_GUESS_LIMIT, Config};
use crate::curve;
use crate::error::CoreResult;
use crate::feature::FeatureType;
use crate::serial::{INDEX_RECORD_SIZE, IndexRecord, read_serial_feature};
use crate::sort::SortOutput;
use crate::traverse::{TileStream, TileStreamWriter};
use crate::varint::VarintReader;

/// Default decimation factor between zooms when none is given or guessed.
pub const DEFAULT_DROPRATE: f64 = 2.5;

#[derive(Debug, Clone, Copy)]
pub struct DropParams {
    pub basezoom: u8,
    pub droprate: f64,
}

/// Choose basezoom/droprate from the sorted index when unset: the lowest
/// zoom at which no tile holds more than the per-tile ceiling, and a
/// droprate that decays the densest zoom-0 tile down to that ceiling.
pub fn guess_drop_params(sorted: &SortOutput, config: &Config) -> CoreResult<DropParams> {
    if let (Some(basezoom), Some(droprate)) = (config.basezoom, config.droprate) {
        return Ok(DropParams { basezoom, droprate });
    }

    let limit = BASEZOOM_GUESS_LIMIT / (config.marker_width * config.marker_width);
    let zooms = usize::from(config.maxzoom) + 1;
    let mut current: Vec<(u32, u32)> = vec![(0, 0); zooms];
    let mut count: Vec<u64> = vec![0; zooms];
    let mut max_count: Vec<u64> = vec![0; zooms];

    let mut index_file = sorted.index.try_clone()?;
    index_file.rewind()?;
    let mut index = BufReader::new(index_file);
    let mut buf = [0_u8; INDEX_RECORD_SIZE];
    loop {
        match index.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let rec = IndexRecord::from_bytes(&buf)?;
        for z in 0..zooms {
            let tile = curve::key_to_tile(rec.index, z as u8);
            if tile != current[z] {
                current[z] = tile;
                count[z] = 0;
            }
            count[z] += 1;
            max_count[z] = max_count[z].max(count[z]);
        }
    }

    let basezoom = config.basezoom.unwrap_or_else(|| {
        let guessed = (0..zooms)
            .find(|&z| (max_count[z] as f64) < limit)
            .map_or(config.maxzoom, |z| z as u8);
        info!("Choosing a base zoom of {guessed} to keep {limit} features per tile");
        guessed
    });
    let droprate = config.droprate.unwrap_or_else(|| {
        let densest = max_count[0] as f64;
        let guessed = if basezoom > 0 && densest > limit {
            ((densest / limit).powf(1.0 / f64::from(basezoom))).max(DEFAULT_DROPRATE)
        } else {
            DEFAULT_DROPRATE
        };
        info!("Choosing a drop rate of {guessed:.4} between zoom levels");
        guessed
    });
    Ok(DropParams { basezoom, droprate })
}

struct DropState {
    interval: f64,
    seq: f64,
    tile: (u32, u32),
    included: bool,
}

/// Walk the sorted features, stamp their minzoom byte and write the
/// zoom-0 traversal stream. Returns the number of features written.
pub fn assign_feature_minzooms(
    sorted: &SortOutput,
    params: DropParams,
    origins: &[(i64, i64)],
    config: &Config,
) -> CoreResult<(TileStream, u64)> {
    let mut ds: Vec<DropState> = (0..=config.maxzoom)
        .map(|z| DropState {
            interval: if z < params.basezoom {
                params.droprate.powi(i32::from(params.basezoom - z))
            } else {
                0.0
            },
            seq: 0.0,
            tile: (0, 0),
            included: false,
        })
        .collect();

    let mut geom_file = sorted.geom.try_clone()?;
    geom_file.rewind()?;
    let mut geom = VarintReader::new(BufReader::new(geom_file));
    let mut index_file = sorted.index.try_clone()?;
    index_file.rewind()?;
    let mut index = BufReader::new(index_file);
    let mut out = TileStreamWriter::new(BufWriter::new(tempfile::tempfile_in(&config.tmp_dir)?));
    out.begin_tile(TileCoord::new_unchecked(0, 0, 0))?;

    let mut buf = [0_u8; INDEX_RECORD_SIZE];
    let mut written = 0_u64;
    loop {
        match index.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        }
        let rec = IndexRecord::from_bytes(&buf)?;
        let origin = origins.get(usize::from(rec.segment)).copied().unwrap_or((0, 0));
        let mut sf = read_serial_feature(&mut geom, rec.segment, origin, config.geometry_scale)?;
        sf.feature_minzoom = feature_minzoom(&mut ds, &rec, config);
        out.feature(&sf)?;
        written += 1;
    }

    Ok((out.finish()?, written))
}

fn feature_minzoom(ds: &mut [DropState], rec: &IndexRecord, config: &Config) -> u8 {
    let droppable = match rec.geom_type {
        FeatureType::Point => true,
        FeatureType::Line => config.drop_lines,
        FeatureType::Polygon => config.drop_polygons,
    };
    if !droppable {
        return 0;
    }

    for z in (0..ds.len()).rev() {
        let tile = curve::key_to_tile(rec.index, z as u8);
        if ds[z].tile != tile {
            ds[z].tile = tile;
            ds[z].seq = 0.0;
        }
        ds[z].seq += 1.0;
        if ds[z].seq >= 1.0 {
            ds[z].seq -= ds[z].interval.max(1.0);
            ds[z].included = true;
        } else {
            ds[z].included = false;
        }
    }

    // lowest zoom of the contiguous included run ending at maxzoom
    let mut minzoom = ds.len() as u8 - 1;
    for z in (0..ds.len()).rev() {
        if ds[z].included {
            minzoom = z as u8;
        } else {
            break;
        }
    }
    minzoom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(interval: f64) -> DropState {
        DropState {
            interval,
            seq: 0.0,
            tile: (0, 0),
            included: false,
        }
    }

    #[test]
    fn test_interval_zero_keeps_everything() {
        let config = Config::default();
        let mut ds = vec![state(0.0)];
        let rec = IndexRecord {
            start: 0,
            end: 0,
            index: 0,
            segment: 0,
            geom_type: FeatureType::Point,
            seq: 0,
        };
        for _ in 0..10 {
            assert_eq!(feature_minzoom(&mut ds, &rec, &config), 0);
        }
    }

    #[test]
    fn test_droprate_keeps_a_fraction() {
        let config = Config::default();
        // one zoom with interval 4: about a quarter of features get
        // minzoom 0, the rest fall to the top zoom
        let mut ds = vec![state(4.0), state(0.0)];
        let rec = IndexRecord {
            start: 0,
            end: 0,
            index: 0,
            segment: 0,
            geom_type: FeatureType::Point,
            seq: 0,
        };
        let minzooms: Vec<u8> = (0..16)
            .map(|_| feature_minzoom(&mut ds, &rec, &config))
            .collect();
        let kept_low = minzooms.iter().filter(|&&m| m == 0).count();
        assert_eq!(kept_low, 4, "{minzooms:?}");
        assert!(minzooms.iter().all(|&m| m <= 1));
        assert_eq!(minzooms[0], 0);
    }

    #[test]
    fn test_lines_default_to_zoom_zero() {
        let config = Config::default();
        let mut ds = vec![state(1000.0)];
        let rec = IndexRecord {
            start: 0,
            end: 0,
            index: 0,
            segment: 0,
            geom_type: FeatureType::Line,
            seq: 0,
        };
        for _ in 0..5 {
            assert_eq!(feature_minzoom(&mut ds, &rec, &config), 0);
        }
    }

    #[test]
    fn test_tile_change_resets_counters() {
        let config = Config::default();
        // z1 decimates hard; moving to a fresh z1 tile resets its counter
        // so the first feature of each tile is eligible again
        let mut ds = vec![state(0.0), state(1000.0)];
        let rec_a = IndexRecord {
            start: 0,
            end: 0,
            index: curve::encode(0, 0),
            segment: 0,
            geom_type: FeatureType::Point,
            seq: 0,
        };
        let rec_b = IndexRecord {
            index: curve::encode(u32::MAX, u32::MAX),
            ..rec_a
        };
        assert_eq!(feature_minzoom(&mut ds, &rec_a, &config), 0);
        assert_eq!(feature_minzoom(&mut ds, &rec_a, &config), 1);
        assert_eq!(feature_minzoom(&mut ds, &rec_b, &config), 0);
        assert_eq!(feature_minzoom(&mut ds, &rec_b, &config), 1);
        assert_eq!(feature_minzoom(&mut ds, &rec_a, &config), 0);
    }
}
