//! External radix sort over the curve-key index.
//!
//! Most-significant-bits-first: each level partitions records into
//! power-of-two shard files by the next few key bits, so numeric key
//! order equals concatenated shard order. A shard small enough for the
//! memory budget is sorted in RAM (rayon, keyed by `(index, seq)` for
//! stability) and streamed out; bigger shards recurse on more bits.
//! Once 64 bits are consumed, any remaining records share one key and
//! are copied through in arrival order.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read as _, Seek as _, Write as _};

use rayon::prelude::*;

use crate::config::Config;
use crate::error::CoreResult;
use crate::serial::{INDEX_RECORD_SIZE, IndexRecord};

pub struct SortInput {
    pub geom: File,
    pub index: File,
}

pub struct SortOutput {
    pub geom: File,
    pub index: File,
    pub geom_len: u64,
    pub record_count: u64,
}

/// Progress callback; receives the overall fraction of bytes moved,
/// weighting the partition copy 25% and the sorted write-out 75%.
pub type SortProgress<'a> = &'a mut dyn FnMut(f64);

struct SortContext<'a, 'b> {
    config: &'a Config,
    total_bytes: f64,
    partition_bytes: u64,
    output_bytes: u64,
    progress: SortProgress<'b>,
}

impl SortContext<'_, '_> {
    fn report(&mut self) {
        if self.total_bytes > 0.0 {
            let f = 0.25 * (self.partition_bytes as f64 / self.total_bytes)
                + 0.75 * (self.output_bytes as f64 / self.total_bytes);
            (self.progress)(f.min(1.0));
        }
    }
}

fn input_len(input: &SortInput) -> CoreResult<u64> {
    Ok(input.geom.metadata()?.len() + input.index.metadata()?.len())
}

/// Shard fan-out honoring the file-descriptor budget: each recursion
/// level holds `2 * shard_count` temp files open.
fn shard_count(config: &Config) -> usize {
    let by_fds = (config.file_limit.saturating_sub(10) / 4).max(2);
    let mut n = 2;
    while n * 2 <= by_fds && n < 256 {
        n *= 2;
    }
    n
}

/// Sort all ingest outputs into one (geometry, index) pair.
pub fn external_sort(
    inputs: Vec<SortInput>,
    config: &Config,
    progress: SortProgress<'_>,
) -> CoreResult<SortOutput> {
    let mut total = 0;
    for input in &inputs {
        total += input_len(input)?;
    }
    let mut ctx = SortContext {
        config,
        total_bytes: total as f64,
        partition_bytes: 0,
        output_bytes: 0,
        progress,
    };

    let mut out_geom = BufWriter::new(tempfile::tempfile_in(&config.tmp_dir)?);
    let mut out_index = BufWriter::new(tempfile::tempfile_in(&config.tmp_dir)?);
    let mut geom_pos = 0_u64;
    let mut record_count = 0_u64;

    radix(
        inputs,
        0,
        &mut ctx,
        &mut out_geom,
        &mut out_index,
        &mut geom_pos,
        &mut record_count,
    )?;

    let mut geom = out_geom.into_inner().map_err(std::io::IntoInnerError::into_error)?;
    let mut index = out_index.into_inner().map_err(std::io::IntoInnerError::into_error)?;
    geom.flush()?;
    index.flush()?;
    geom.rewind()?;
    index.rewind()?;
    Ok(SortOutput {
        geom,
        index,
        geom_len: geom_pos,
        record_count,
    })
}

fn radix(
    inputs: Vec<SortInput>,
    prefix_bits: u32,
    ctx: &mut SortContext<'_, '_>,
    out_geom: &mut BufWriter<File>,
    out_index: &mut BufWriter<File>,
    geom_pos: &mut u64,
    record_count: &mut u64,
) -> CoreResult<()> {
    let mut level_len = 0;
    for input in &inputs {
        level_len += input_len(input)?;
    }

    if level_len as usize <= ctx.config.memory_budget || prefix_bits >= 64 {
        return sort_in_memory(
            inputs,
            prefix_bits >= 64,
            ctx,
            out_geom,
            out_index,
            geom_pos,
            record_count,
        );
    }

    // partition into children by the next key bits
    let shards = shard_count(ctx.config);
    let bits = shards.trailing_zeros();
    let mut children = Vec::with_capacity(shards);
    for _ in 0..shards {
        children.push((
            BufWriter::new(tempfile::tempfile_in(&ctx.config.tmp_dir)?),
            BufWriter::new(tempfile::tempfile_in(&ctx.config.tmp_dir)?),
            0_u64, // geometry bytes written to this child
        ));
    }

    for input in inputs {
        let mut index = BufReader::new(input.index);
        let mut geom = BufReader::new(input.geom);
        let mut buf = [0_u8; INDEX_RECORD_SIZE];
        let mut record_buf = Vec::new();
        loop {
            match index.read_exact(&mut buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let mut rec = IndexRecord::from_bytes(&buf)?;
            let len = (rec.end - rec.start) as usize;
            record_buf.resize(len, 0);
            geom.read_exact(&mut record_buf)?;

            let shard = if prefix_bits >= 64 {
                0
            } else {
                ((rec.index << prefix_bits) >> (64 - bits)) as usize % shards
            };
            let child = &mut children[shard];
            rec.start = child.2;
            rec.end = child.2 + len as u64;
            child.2 = rec.end;
            child.0.write_all(&record_buf)?;
            child.1.write_all(&rec.to_bytes())?;

            ctx.partition_bytes += len as u64 + INDEX_RECORD_SIZE as u64;
        }
        ctx.report();
    }

    for (geom_w, index_w, _) in children {
        let mut geom = geom_w.into_inner().map_err(std::io::IntoInnerError::into_error)?;
        let mut index = index_w.into_inner().map_err(std::io::IntoInnerError::into_error)?;
        geom.flush()?;
        index.flush()?;
        geom.rewind()?;
        index.rewind()?;
        radix(
            vec![SortInput { geom, index }],
            prefix_bits + bits,
            ctx,
            out_geom,
            out_index,
            geom_pos,
            record_count,
        )?;
    }
    Ok(())
}

fn sort_in_memory(
    inputs: Vec<SortInput>,
    keys_exhausted: bool,
    ctx: &mut SortContext<'_, '_>,
    out_geom: &mut BufWriter<File>,
    out_index: &mut BufWriter<File>,
    geom_pos: &mut u64,
    record_count: &mut u64,
) -> CoreResult<()> {
    let mut geom_bytes = Vec::new();
    let mut records: Vec<IndexRecord> = Vec::new();

    for input in inputs {
        let base = geom_bytes.len() as u64;
        let mut geom = BufReader::new(input.geom);
        geom.read_to_end(&mut geom_bytes)?;

        let mut index = BufReader::new(input.index);
        let mut buf = [0_u8; INDEX_RECORD_SIZE];
        loop {
            match index.read_exact(&mut buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let mut rec = IndexRecord::from_bytes(&buf)?;
            rec.start += base;
            rec.end += base;
            records.push(rec);
        }
    }

    if !keys_exhausted {
        records.par_sort_unstable_by_key(|r| (r.index, r.seq));
    }

    for rec in &mut records {
        let bytes = &geom_bytes[rec.start as usize..rec.end as usize];
        out_geom.write_all(bytes)?;
        rec.start = *geom_pos;
        *geom_pos += bytes.len() as u64;
        rec.end = *geom_pos;
        out_index.write_all(&rec.to_bytes())?;
        *record_count += 1;

        ctx.output_bytes += bytes.len() as u64 + INDEX_RECORD_SIZE as u64;
    }
    ctx.report();
    Ok(())
}
