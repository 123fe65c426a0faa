//! The staged pipeline driver.
//!
//! Callers run the stages in order: `ingest` (once per set of sources),
//! `sort`, `assign_minzooms`, `run_zooms`. Splitting the stages keeps
//! progress reporting in the caller's hands; the library only reports
//! numbers through the callbacks.

use std::sync::atomic::{AtomicBool, AtomicU64};

use log::info;
use tilery_tile_utils::world_bbox_to_lonlat;

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::feature::{LayerMap, ParsedFeature, merge_layer_maps};
use crate::ingest::{IngestWorker, SegmentOutput};
use crate::minzoom::{DropParams, assign_feature_minzooms, guess_drop_params};
use crate::render::RenderContext;
use crate::sort::{SortInput, SortOutput, external_sort};
use crate::traverse::{TileSink, TileStream, TraversalSummary, traverse_zooms};

pub struct Pipeline {
    config: Config,
    segments: Vec<SegmentOutput>,
    sorted: Option<SortOutput>,
    z0: Option<TileStream>,
    drop_params: Option<DropParams>,
    feature_count: u64,
}

impl Pipeline {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            segments: Vec::new(),
            sorted: None,
            z0: None,
            drop_params: None,
            feature_count: 0,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one ingest worker per source, each owning its own temp files.
    pub fn ingest<I>(&mut self, sources: Vec<I>) -> CoreResult<u64>
    where
        I: Iterator<Item = CoreResult<ParsedFeature>> + Send,
    {
        let config = &self.config;
        let total = sources.len();
        let disk_used = AtomicU64::new(0);
        let disk_warned = AtomicBool::new(false);

        let mut results: Vec<CoreResult<SegmentOutput>> = Vec::with_capacity(total);
        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(total);
            for (segment, source) in sources.into_iter().enumerate() {
                let disk_used = &disk_used;
                let disk_warned = &disk_warned;
                handles.push(scope.spawn(move || {
                    let mut worker =
                        IngestWorker::new(config, segment as u16, total, disk_used, disk_warned)?;
                    for feature in source {
                        worker.serialize_feature(&feature?)?;
                    }
                    worker.finish()
                }));
            }
            for handle in handles {
                results.push(handle.join().unwrap_or_else(|_| {
                    Err(CoreError::Internal("ingest worker panicked".to_string()))
                }));
            }
        });

        for result in results {
            let segment = result?;
            self.feature_count += segment.feature_count;
            self.segments.push(segment);
        }
        info!("Read {} features into {} segments", self.feature_count, self.segments.len());
        Ok(self.feature_count)
    }

    /// Externally sort everything by curve key.
    pub fn sort(&mut self, progress: &mut dyn FnMut(f64)) -> CoreResult<()> {
        let mut inputs = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            inputs.push(SortInput {
                geom: segment.geom.try_clone()?,
                index: segment.index.try_clone()?,
            });
        }
        self.sorted = Some(external_sort(inputs, &self.config, progress)?);
        Ok(())
    }

    /// Choose basezoom/droprate if needed and stamp every feature's
    /// minzoom, producing the zoom-0 traversal input.
    pub fn assign_minzooms(&mut self) -> CoreResult<DropParams> {
        let sorted = self
            .sorted
            .as_ref()
            .ok_or_else(|| CoreError::Internal("assign_minzooms before sort".to_string()))?;
        let params = guess_drop_params(sorted, &self.config)?;
        let origins: Vec<(i64, i64)> = self.segments.iter().map(|s| s.origin).collect();
        let (z0, written) = assign_feature_minzooms(sorted, params, &origins, &self.config)?;
        info!(
            "Assigned minzooms with basezoom {} and droprate {:.2} over {written} features",
            params.basezoom, params.droprate
        );
        self.z0 = Some(z0);
        self.drop_params = Some(params);
        Ok(params)
    }

    /// Traverse all zooms, rendering every tile into the sink.
    pub fn run_zooms(
        &mut self,
        sink: &mut dyn TileSink,
        progress: &mut dyn FnMut(u8, u64),
    ) -> CoreResult<TraversalSummary> {
        let z0 = self
            .z0
            .take()
            .ok_or_else(|| CoreError::Internal("run_zooms before assign_minzooms".to_string()))?;
        let ctx = RenderContext {
            config: &self.config,
            segments: &self.segments,
        };
        traverse_zooms(&self.config, &ctx, z0, sink, progress)
    }

    /// Merged layer catalogue across all segments.
    #[must_use]
    pub fn layers(&self) -> LayerMap {
        let maps: Vec<_> = self.segments.iter().map(|s| s.layer_map.clone()).collect();
        merge_layer_maps(&maps)
    }

    /// Overall bounds in lon/lat, if anything was ingested.
    #[must_use]
    pub fn bounds(&self) -> Option<[f64; 4]> {
        let mut bbox = [i64::MAX, i64::MAX, i64::MIN, i64::MIN];
        for segment in &self.segments {
            bbox[0] = bbox[0].min(segment.bbox[0]);
            bbox[1] = bbox[1].min(segment.bbox[1]);
            bbox[2] = bbox[2].max(segment.bbox[2]);
            bbox[3] = bbox[3].max(segment.bbox[3]);
        }
        (bbox[0] <= bbox[2]).then(|| world_bbox_to_lonlat(bbox))
    }

    #[must_use]
    pub fn feature_count(&self) -> u64 {
        self.feature_count
    }

    #[must_use]
    pub fn drop_params(&self) -> Option<DropParams> {
        self.drop_params
    }
}
