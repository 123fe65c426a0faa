//! Zoom traversal: streams of tile-grouped serial features, and the
//! dispatcher that walks them from zoom 0 to maxzoom.
//!
//! A traversal stream is a tag-framed sequence of tile headers and
//! feature records. Tiles are contiguous within a stream, and every tile
//! lives in exactly one stream, because a tile's features can only come
//! from its single parent. While rendering a tile, the renderer re-emits
//! each feature into the quadrant streams of the tile's four children;
//! those files become the next zoom's input.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::sync::Mutex;

use log::debug;
use tilery_tile_utils::TileCoord;

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::render::{RenderContext, TileOutcome, render_tile};
use crate::serial::{SerialFeature, read_serial_feature, write_serial_feature};
use crate::varint::{VarintReader, VarintWriter};

const TAG_END: u8 = 0;
const TAG_TILE: u8 = 1;
const TAG_FEATURE: u8 = 2;

/// Where finished tiles go. Writes are serialized by the dispatcher's
/// store lock; implementations do not need their own.
pub trait TileSink: Send {
    fn put_tile(&mut self, coord: TileCoord, data: Vec<u8>) -> CoreResult<()>;
}

/// A finished traversal input file, rewound and ready for reading.
pub struct TileStream {
    pub file: File,
    pub bytes: u64,
}

pub struct TileStreamWriter {
    w: VarintWriter<BufWriter<File>>,
}

impl TileStreamWriter {
    pub fn new(inner: BufWriter<File>) -> Self {
        Self {
            w: VarintWriter::new(inner),
        }
    }

    pub fn create_in(dir: &std::path::Path) -> CoreResult<Self> {
        Ok(Self::new(BufWriter::new(tempfile::tempfile_in(dir)?)))
    }

    pub fn begin_tile(&mut self, coord: TileCoord) -> CoreResult<()> {
        self.w.write_byte(TAG_TILE)?;
        self.w.write_varint(u64::from(coord.z))?;
        self.w.write_varint(u64::from(coord.x))?;
        self.w.write_varint(u64::from(coord.y))?;
        Ok(())
    }

    pub fn feature(&mut self, sf: &SerialFeature) -> CoreResult<()> {
        self.w.write_byte(TAG_FEATURE)?;
        self.w.write_varint(u64::from(sf.segment))?;
        write_serial_feature(&mut self.w, sf, (0, 0), 0)?;
        Ok(())
    }

    pub fn finish(mut self) -> CoreResult<TileStream> {
        use std::io::Seek as _;
        self.w.write_byte(TAG_END)?;
        let bytes = self.w.position();
        self.w.flush()?;
        let mut file = self
            .w
            .into_inner()
            .into_inner()
            .map_err(|e| CoreError::Io(e.into_error()))?;
        file.rewind()?;
        Ok(TileStream { file, bytes })
    }
}

pub enum StreamItem {
    Tile(TileCoord),
    Feature(SerialFeature),
}

pub struct TileStreamReader<R: Read> {
    r: VarintReader<R>,
}

impl<R: Read> TileStreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            r: VarintReader::new(inner),
        }
    }

    pub fn next_item(&mut self) -> CoreResult<Option<StreamItem>> {
        match self.r.read_byte_opt()? {
            None | Some(TAG_END) => Ok(None),
            Some(TAG_TILE) => {
                let z = self.r.read_varint()? as u8;
                let x = self.r.read_varint()? as u32;
                let y = self.r.read_varint()? as u32;
                Ok(Some(StreamItem::Tile(TileCoord::new_unchecked(z, x, y))))
            }
            Some(TAG_FEATURE) => {
                let segment = self.r.read_varint()? as u16;
                let sf = read_serial_feature(&mut self.r, segment, (0, 0), 0)?;
                Ok(Some(StreamItem::Feature(sf)))
            }
            Some(tag) => Err(CoreError::CorruptGeometry(format!(
                "unknown tag {tag} in traversal stream"
            ))),
        }
    }
}

/// The four quadrant output streams a worker feeds while rendering one
/// zoom. Each child tile of a parent lands in a distinct quadrant, so
/// headers only need to be written when the child changes.
pub struct ChildWriters {
    writers: Vec<(TileStreamWriter, Option<TileCoord>)>,
}

impl ChildWriters {
    pub fn create_in(dir: &std::path::Path) -> CoreResult<Self> {
        let mut writers = Vec::with_capacity(4);
        for _ in 0..4 {
            writers.push((TileStreamWriter::create_in(dir)?, None));
        }
        Ok(Self { writers })
    }

    pub fn emit(&mut self, child: TileCoord, sf: &SerialFeature) -> CoreResult<()> {
        let idx = (((child.x & 1) << 1) | (child.y & 1)) as usize;
        let (writer, within) = &mut self.writers[idx];
        if *within != Some(child) {
            writer.begin_tile(child)?;
            *within = Some(child);
        }
        writer.feature(sf)
    }

    pub fn finish(self) -> CoreResult<Vec<TileStream>> {
        self.writers
            .into_iter()
            .map(|(w, _)| w.finish())
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct TraversalSummary {
    pub tiles_written: u64,
    /// Tiles written per zoom level.
    pub tile_counts: Vec<u64>,
    /// Densest tile seen at the deepest zoom and its feature count.
    pub densest_tile: Option<(TileCoord, u64)>,
}

struct WorkerOutput {
    children: Vec<TileStream>,
    tiles_written: u64,
    densest: Option<(TileCoord, u64)>,
}

fn balance_streams(mut streams: Vec<TileStream>, workers: usize) -> Vec<Vec<TileStream>> {
    let mut buckets: Vec<(u64, Vec<TileStream>)> = (0..workers).map(|_| (0, Vec::new())).collect();
    streams.sort_by_key(|s| std::cmp::Reverse(s.bytes));
    for stream in streams {
        let bucket = buckets
            .iter_mut()
            .min_by_key(|(bytes, _)| *bytes)
            .expect("at least one bucket");
        bucket.0 += stream.bytes;
        bucket.1.push(stream);
    }
    buckets.into_iter().map(|(_, streams)| streams).collect()
}

fn run_worker(
    ctx: &RenderContext<'_>,
    z: u8,
    streams: Vec<TileStream>,
    sink: &Mutex<&mut dyn TileSink>,
) -> CoreResult<WorkerOutput> {
    let config = ctx.config;
    let mut children = if z < config.maxzoom {
        Some(ChildWriters::create_in(&config.tmp_dir)?)
    } else {
        None
    };
    let mut tiles_written = 0_u64;
    let mut densest: Option<(TileCoord, u64)> = None;

    let mut flush = |coord: Option<TileCoord>,
                     batch: &mut Vec<SerialFeature>,
                     children: Option<&mut ChildWriters>,
                     densest: &mut Option<(TileCoord, u64)>|
     -> CoreResult<u64> {
        let Some(coord) = coord else {
            return Ok(0);
        };
        let count = batch.len() as u64;
        if densest.as_ref().is_none_or(|&(_, n)| count > n) {
            *densest = Some((coord, count));
        }
        let written = match render_tile(ctx, coord, batch, children, sink)? {
            TileOutcome::Written { .. } => 1,
            TileOutcome::Empty => 0,
        };
        batch.clear();
        Ok(written)
    };

    for stream in streams {
        let mut reader = TileStreamReader::new(BufReader::new(stream.file));
        let mut current: Option<TileCoord> = None;
        let mut batch: Vec<SerialFeature> = Vec::new();
        loop {
            match reader.next_item()? {
                Some(StreamItem::Feature(sf)) => batch.push(sf),
                Some(StreamItem::Tile(coord)) => {
                    tiles_written +=
                        flush(current.take(), &mut batch, children.as_mut(), &mut densest)?;
                    current = Some(coord);
                }
                None => {
                    tiles_written +=
                        flush(current.take(), &mut batch, children.as_mut(), &mut densest)?;
                    break;
                }
            }
        }
    }

    Ok(WorkerOutput {
        children: children.map_or_else(|| Ok(Vec::new()), ChildWriters::finish)?,
        tiles_written,
        densest,
    })
}

/// Walk every zoom from 0 through maxzoom, feeding rendered tiles to the
/// sink and each zoom's re-emitted features to the next.
pub fn traverse_zooms(
    config: &Config,
    ctx: &RenderContext<'_>,
    z0: TileStream,
    sink: &mut dyn TileSink,
    progress: &mut dyn FnMut(u8, u64),
) -> CoreResult<TraversalSummary> {
    let sink = Mutex::new(sink);
    let mut inputs = vec![z0];
    let mut summary = TraversalSummary::default();

    for z in 0..=config.maxzoom {
        let workers = config.cpus.min(inputs.len()).max(1);
        let assignments = balance_streams(std::mem::take(&mut inputs), workers);
        debug!("zoom {z}: {workers} workers");

        let mut outputs: Vec<CoreResult<WorkerOutput>> = Vec::new();
        std::thread::scope(|scope| {
            let mut handles = Vec::new();
            for streams in assignments {
                let sink = &sink;
                handles.push(scope.spawn(move || run_worker(ctx, z, streams, sink)));
            }
            for handle in handles {
                outputs.push(handle.join().unwrap_or_else(|_| {
                    Err(CoreError::Internal("tile worker panicked".to_string()))
                }));
            }
        });

        let mut zoom_tiles = 0;
        for output in outputs {
            let output = output?;
            inputs.extend(output.children);
            zoom_tiles += output.tiles_written;
            if z == config.maxzoom {
                if let Some((coord, count)) = output.densest {
                    if summary
                        .densest_tile
                        .as_ref()
                        .is_none_or(|&(_, n)| count > n)
                    {
                        summary.densest_tile = Some((coord, count));
                    }
                }
            }
        }
        summary.tiles_written += zoom_tiles;
        summary.tile_counts.push(zoom_tiles);
        progress(z, zoom_tiles);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::FeatureType;
    use crate::geometry::{Draw, DrawOp};
    use crate::serial::SerialAttrs;

    fn feature(seq: u64) -> SerialFeature {
        SerialFeature {
            feature_minzoom: 0,
            geom_type: FeatureType::Point,
            layer: 0,
            seq,
            segment: 0,
            id: None,
            minzoom: None,
            maxzoom: None,
            index: 0,
            extent: 0,
            bbox: [5, 5, 5, 5],
            geometry: vec![Draw::new(DrawOp::MoveTo, 5, 5)],
            attrs: SerialAttrs::Inline(vec![]),
        }
    }

    #[test]
    fn test_stream_roundtrip() {
        let dir = std::env::temp_dir();
        let mut w = TileStreamWriter::create_in(&dir).unwrap();
        w.begin_tile(TileCoord::new_unchecked(3, 1, 2)).unwrap();
        w.feature(&feature(0)).unwrap();
        w.feature(&feature(1)).unwrap();
        w.begin_tile(TileCoord::new_unchecked(3, 1, 3)).unwrap();
        w.feature(&feature(2)).unwrap();
        let stream = w.finish().unwrap();
        assert!(stream.bytes > 0);

        let mut r = TileStreamReader::new(BufReader::new(stream.file));
        let mut tiles = Vec::new();
        let mut feats = Vec::new();
        while let Some(item) = r.next_item().unwrap() {
            match item {
                StreamItem::Tile(c) => tiles.push(c),
                StreamItem::Feature(f) => feats.push(f.seq),
            }
        }
        assert_eq!(
            tiles,
            vec![
                TileCoord::new_unchecked(3, 1, 2),
                TileCoord::new_unchecked(3, 1, 3)
            ]
        );
        assert_eq!(feats, vec![0, 1, 2]);
    }

    #[test]
    fn test_child_writers_group_by_tile() {
        let dir = std::env::temp_dir();
        let mut cw = ChildWriters::create_in(&dir).unwrap();
        let a = TileCoord::new_unchecked(4, 2, 2);
        let b = TileCoord::new_unchecked(4, 3, 2);
        cw.emit(a, &feature(0)).unwrap();
        cw.emit(b, &feature(1)).unwrap();
        cw.emit(a, &feature(2)).unwrap();
        let streams = cw.finish().unwrap();
        assert_eq!(streams.len(), 4);

        // quadrant (0,0) holds tile a with both its features grouped
        let mut r = TileStreamReader::new(BufReader::new(
            streams.into_iter().next().unwrap().file,
        ));
        let mut log = Vec::new();
        while let Some(item) = r.next_item().unwrap() {
            match item {
                StreamItem::Tile(c) => log.push(format!("tile {c:#}")),
                StreamItem::Feature(f) => log.push(format!("feat {}", f.seq)),
            }
        }
        assert_eq!(log, vec!["tile 4/2/2", "feat 0", "feat 2"]);
    }

    #[test]
    fn test_balance_streams() {
        let dir = std::env::temp_dir();
        let mk = |bytes: u64| {
            let mut w = TileStreamWriter::create_in(&dir).unwrap();
            w.begin_tile(TileCoord::new_unchecked(0, 0, 0)).unwrap();
            let mut s = w.finish().unwrap();
            s.bytes = bytes;
            s
        };
        let buckets = balance_streams(vec![mk(100), mk(60), mk(50), mk(10)], 2);
        let sums: Vec<u64> = buckets
            .iter()
            .map(|b| b.iter().map(|s| s.bytes).sum())
            .collect();
        assert_eq!(sums.iter().sum::<u64>(), 220);
        assert!(sums.iter().all(|&s| s <= 120));
    }
}
