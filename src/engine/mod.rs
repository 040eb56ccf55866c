//! The worker that turns remapped voxel blocks into a compressed,
//! multi-resolution, histogrammed output. See spec.md §4.3
//! "MultiResolutionEngine".
//!
//! Job granularity here is one (channel, timepoint) volume rather than one
//! (level, block_index) pair: a reader delivers an entire channel/timepoint
//! before moving to the next, so buffering per channel/timepoint lets the
//! engine build every pyramid level for that volume in one worker-pool job,
//! downsampling level `L` straight into level `L+1` without re-deriving from
//! level 0 (spec.md §4.3). [`crate::engine::fingerprint::Fingerprint`]'s
//! `level` field is always `0` at this granularity; `block_index` carries
//! `(channel, timepoint)` in its C/T slots and zero elsewhere. See
//! DESIGN.md for why this trades block-level streaming for a simpler,
//! still-concurrent pipeline.

pub mod arena;
pub mod cancel;
pub mod compression;
pub mod fingerprint;

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use flume::{Receiver, Sender};
use threadpool::ThreadPool;

use crate::color::ColorInfo;
use crate::descriptor::SourceDescriptor;
use crate::dimension::{Dimension, Index5D};
use crate::error::{Error, Result};
use crate::extent::Extent;
use crate::grid::{PyramidInput, PyramidLevel, PyramidStrategy, WriterBlockGrid};
use crate::histogram::{self, Histogram};
use crate::math::round_half_to_even;
use crate::parameters::ParameterSections;
use crate::remapper::{BlockRegion, RemapSink};
use crate::throughput::{Direction, ThroughputMonitor};
use crate::time_info::TimeInfo;
use crate::writer::{Thumbnail, Writer};

use arena::BlockPool;
use cancel::CancelToken;
use compression::Compression;
use fingerprint::{Fingerprint, FingerprintRegistry, Role};

/// Knobs governing one conversion run, independent of the source or writer.
pub struct EngineConfig {
    pub block_size: Index5D,
    pub pyramid_strategy: Box<dyn PyramidStrategy>,
    pub compression: Compression,
    pub worker_threads: usize,
    pub app_name: String,
    pub app_version: String,
    /// Whether to recompute each channel's display range from its level-0
    /// histogram at finalize time (spec.md §4.3 "Finalize").
    pub auto_adjust_range: bool,
    /// Shared throughput monitor to feed on each successful `write_data_block`
    /// (spec.md §4.4: sampling happens "on each successful block read or
    /// write"); `None` disables write-side throughput tracking. Paired with
    /// `monitor_started_at` so read and write samples share one time origin.
    pub monitor: Option<Arc<ThroughputMonitor>>,
    pub monitor_started_at: Option<Instant>,
}

struct PendingVolume {
    values: Vec<f64>,
    received: u64,
}

struct LevelEntry {
    grid: WriterBlockGrid,
    factor: (u32, u32, u32),
    histograms: Vec<Arc<Mutex<Histogram>>>,
}

/// Tracks in-flight compression jobs the way the teacher's
/// `ParallelBlocksCompressor` tracks in-flight chunk compressions: a job is
/// submitted to the thread pool, and the caller blocks on the result channel
/// whenever too many jobs are outstanding, rather than letting the queue grow
/// unbounded.
struct Backpressure {
    max_in_flight: usize,
    in_flight: Mutex<usize>,
    condvar: Condvar,
}

impl Backpressure {
    fn new(max_in_flight: usize) -> Self {
        Self { max_in_flight: max_in_flight.max(1), in_flight: Mutex::new(0), condvar: Condvar::new() }
    }

    fn acquire(&self) {
        let mut in_flight = self.in_flight.lock().expect("backpressure lock poisoned");
        while *in_flight >= self.max_in_flight {
            in_flight = self.condvar.wait(in_flight).expect("backpressure lock poisoned");
        }
        *in_flight += 1;
    }

    fn release(&self) {
        let mut in_flight = self.in_flight.lock().expect("backpressure lock poisoned");
        *in_flight -= 1;
        self.condvar.notify_one();
    }
}

/// Builds a compressed, multi-resolution, histogrammed dataset out of
/// remapped voxel blocks. One engine handles exactly one source's worth of
/// conversion; construct a new one per source.
pub struct MultiResolutionEngine {
    descriptor: SourceDescriptor,
    levels: Vec<LevelEntry>,
    pending: Mutex<HashMap<(u32, u32), PendingVolume>>,
    pool: BlockPool,
    thread_pool: Mutex<ThreadPool>,
    backpressure: Arc<Backpressure>,
    fingerprints: FingerprintRegistry,
    cancel: CancelToken,
    writer: Arc<Mutex<Box<dyn Writer>>>,
    compression: Compression,
    app_name: String,
    app_version: String,
    auto_adjust_range: bool,
    monitor: Option<Arc<ThroughputMonitor>>,
    monitor_started_at: Option<Instant>,
    result_tx: Sender<Result<()>>,
    result_rx: Receiver<Result<()>>,
    errors: Mutex<Vec<Error>>,
}

impl MultiResolutionEngine {
    /// Validates the descriptor and config, builds the resolution pyramid,
    /// and allocates per-(level, channel) histograms.
    ///
    /// Returns `Error::Config` if the descriptor fails
    /// [`SourceDescriptor::validate`] or if `config.block_size` has a
    /// channel or time extent other than 1 — every writer block holds
    /// exactly one channel of one timepoint (spec.md §3 "WriterBlockGrid";
    /// inferred from `Writer::write_data_block`'s separate `channel`/`time`
    /// parameters, recorded as an Open Question resolution in DESIGN.md).
    pub fn construct(
        descriptor: SourceDescriptor,
        config: EngineConfig,
        writer: Box<dyn Writer>,
        cancel: CancelToken,
    ) -> Result<Self> {
        descriptor.validate()?;

        if config.block_size.c() != 1 || config.block_size.t() != 1 {
            return Err(Error::config("writer block size must be exactly 1 on the channel and time axes"));
        }

        let voxel_pitch = (1.0, 1.0, 1.0); // spec.md §4.3: physical pitch comes from Extent, defaulted isotropic absent one.
        let pyramid_input = PyramidInput { size: descriptor.size, block_size: config.block_size, voxel_pitch };
        let pyramid: Vec<PyramidLevel> = config.pyramid_strategy.build_levels(pyramid_input);

        let channel_count = descriptor.size.c() as usize;
        let levels = pyramid
            .into_iter()
            .map(|level| LevelEntry {
                grid: level.grid,
                factor: level.factor,
                histograms: (0..channel_count)
                    .map(|_| Arc::new(Mutex::new(Histogram::new(descriptor.data_type))))
                    .collect(),
            })
            .collect();

        let worker_threads = config.worker_threads.max(1);
        let block_bytes = config.block_size.product() as usize * descriptor.data_type.byte_size();
        let (result_tx, result_rx) = flume::unbounded();

        Ok(Self {
            pool: BlockPool::new(worker_threads, block_bytes.max(1)),
            thread_pool: Mutex::new(ThreadPool::new(worker_threads)),
            backpressure: Arc::new(Backpressure::new(worker_threads + 2)),
            fingerprints: FingerprintRegistry::new(),
            cancel,
            writer: Arc::new(Mutex::new(writer)),
            compression: config.compression,
            app_name: config.app_name,
            app_version: config.app_version,
            auto_adjust_range: config.auto_adjust_range,
            monitor: config.monitor,
            monitor_started_at: config.monitor_started_at,
            descriptor,
            levels,
            pending: Mutex::new(HashMap::new()),
            result_tx,
            result_rx,
            errors: Mutex::new(Vec::new()),
        })
    }

    fn level0_grid(&self) -> &WriterBlockGrid {
        &self.levels[0].grid
    }

    /// Drains completed-job results without blocking, recording any error
    /// so [`Self::finish`] can surface it instead of silently dropping it.
    fn drain_results(&self) {
        while let Ok(result) = self.result_rx.try_recv() {
            if let Err(error) = result {
                self.errors.lock().expect("engine error log poisoned").push(error);
            }
        }
    }

    /// Flushes every pending job, writes accumulated histograms, metadata
    /// and (if supplied) a thumbnail, and returns the first error observed
    /// by any worker, if any.
    pub fn finish(self, thumbnail: Option<Thumbnail>) -> Result<()> {
        {
            let pool = self.thread_pool.lock().expect("thread pool lock poisoned");
            pool.join();
        }
        self.drain_results();

        {
            let mut errors = self.errors.lock().expect("engine error log poisoned");
            if let Some(error) = errors.drain(..).next() {
                return Err(error);
            }
        }

        let mut color_info = self.descriptor.channel_colors.clone();
        if self.auto_adjust_range {
            for (channel, color) in color_info.iter_mut().enumerate() {
                let histogram = self.levels[0].histograms[channel].lock().expect("histogram lock poisoned");
                let auto_range = histogram::auto_adjust_range(&histogram);
                *color = histogram::apply_auto_range(color, auto_range);
            }
        }

        let mut writer = self.writer.lock().expect("writer lock poisoned");

        for (level_index, level) in self.levels.iter().enumerate() {
            for (channel, histogram) in level.histograms.iter().enumerate() {
                let histogram = histogram.lock().expect("histogram lock poisoned");
                writer.write_histogram(&histogram, 0, channel as u32, level_index as u32)?;
            }
        }

        let extent = Extent::new(
            crate::extent::AxisExtent::new(0.0, self.descriptor.size.x() as f32),
            crate::extent::AxisExtent::new(0.0, self.descriptor.size.y() as f32),
            crate::extent::AxisExtent::new(0.0, self.descriptor.size.z() as f32),
        );
        writer.write_metadata(
            &self.app_name,
            &self.app_version,
            &extent,
            &self.descriptor.parameters,
            &self.descriptor.time_points,
            &color_info,
        )?;

        if let Some(thumbnail) = &thumbnail {
            writer.write_thumbnail(thumbnail)?;
        }

        Ok(())
    }

    /// Submits one complete (channel, timepoint) volume to the thread pool:
    /// builds every pyramid level, merges histograms and writes compressed
    /// blocks. Fingerprint-deduplicated so a volume is never built twice
    /// even if `copy_block` somehow observes completion from two threads.
    fn submit_volume(&self, time: u32, channel: u32, values: Vec<f64>) {
        let fingerprint = Fingerprint { level: 0, block_index: Index5D::new(0, 0, 0, channel as u64, time as u64) };

        match self.fingerprints.begin(fingerprint) {
            Role::Follower(outcome) => {
                if let Err(message) = outcome {
                    self.errors.lock().expect("engine error log poisoned").push(Error::writer(message));
                }
            }
            Role::Leader(guard) => {
                self.backpressure.acquire();

                let levels_meta: Vec<(Index5D, Index5D, (u32, u32, u32))> =
                    self.levels.iter().map(|level| (level.grid.size, level.grid.block_size, level.factor)).collect();
                let shared_histograms: Vec<Arc<Mutex<Histogram>>> =
                    self.levels.iter().map(|level| Arc::clone(&level.histograms[channel as usize])).collect();

                let writer = Arc::clone(&self.writer);
                let compression = self.compression;
                let backpressure = Arc::clone(&self.backpressure);
                let cancel = self.cancel.clone();
                let tx = self.result_tx.clone();
                let pool = self.pool.clone();
                let data_type = self.descriptor.data_type;
                let monitor = self.monitor.clone();
                let monitor_started_at = self.monitor_started_at;

                let thread_pool = self.thread_pool.lock().expect("thread pool lock poisoned");
                thread_pool.execute(move || {
                    let outcome = build_and_write_volume(
                        time,
                        channel,
                        values,
                        data_type,
                        &levels_meta,
                        compression,
                        &writer,
                        &pool,
                        &cancel,
                        monitor.as_deref(),
                        monitor_started_at,
                    );

                    match &outcome {
                        Ok(per_level_histograms) => {
                            for (level_index, local) in per_level_histograms.iter().enumerate() {
                                let shared = Arc::clone(&shared_histograms[level_index]);
                                let mut shared = shared.lock().expect("histogram lock poisoned");
                                shared.merge(local);
                            }
                            guard.finish(Ok(()));
                            let _ = tx.send(Ok(()));
                        }
                        Err(error) => {
                            let message = error.to_string();
                            guard.finish(Err(message.clone()));
                            let _ = tx.send(Err(Error::writer(message)));
                        }
                    }

                    backpressure.release();
                });
            }
        }
    }
}

/// Builds every pyramid level for one (channel, timepoint) volume and writes
/// each level's blocks, returning the per-level histograms this volume
/// contributed so the caller can merge them into the engine's shared state.
#[allow(clippy::too_many_arguments)]
fn build_and_write_volume(
    time: u32,
    channel: u32,
    level0_values: Vec<f64>,
    data_type: crate::datatype::DataType,
    levels: &[(Index5D, Index5D, (u32, u32, u32))],
    compression: Compression,
    writer: &Arc<Mutex<Box<dyn Writer>>>,
    pool: &BlockPool,
    cancel: &CancelToken,
    monitor: Option<&ThroughputMonitor>,
    monitor_started_at: Option<Instant>,
) -> Result<Vec<Histogram>> {
    let mut histograms = Vec::with_capacity(levels.len());
    let mut current_values = level0_values;
    let mut current_size = levels[0].0;
    let mut current_factor = (1u32, 1u32, 1u32);

    for (level_index, &(level_size, block_size, level_factor)) in levels.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(Error::writer("conversion cancelled"));
        }

        if level_index > 0 {
            let scale_x = (level_factor.0 / current_factor.0).max(1) as u64;
            let scale_y = (level_factor.1 / current_factor.1).max(1) as u64;
            let scale_z = (level_factor.2 / current_factor.2).max(1) as u64;
            current_values = downsample(&current_values, current_size, level_size, (scale_x, scale_y, scale_z), data_type);
            current_size = level_size;
            current_factor = level_factor;
        }

        let mut histogram = Histogram::new(data_type);
        for &value in &current_values {
            histogram.add_sample(value);
        }
        histograms.push(histogram);

        let grid = WriterBlockGrid::new(current_size, block_size);
        for block_flat in 0..grid.total_block_count() {
            let block_index = unflatten_spatial(block_flat, grid.block_counts);
            let extent = grid.block_extent(block_index);
            let mut buffer = pool.checkout();
            let byte_len = extent.product() as usize * data_type.byte_size();
            buffer.resize(byte_len, 0);

            let offset = grid.block_offset(block_index);
            let mut dest_index = 0usize;
            for z in 0..extent.z() {
                for y in 0..extent.y() {
                    for x in 0..extent.x() {
                        let source_index = ((offset.x() + x)
                            + (offset.y() + y) * current_size.x()
                            + (offset.z() + z) * current_size.x() * current_size.y())
                            as usize;
                        data_type.write_sample(&mut buffer, dest_index, current_values[source_index]);
                        dest_index += 1;
                    }
                }
            }

            let compressed = compression.compress(&buffer)?;
            let compressed_len = compressed.len() as u64;
            {
                let mut writer = writer.lock().expect("writer lock poisoned");
                writer.write_data_block(&compressed, block_index, time, channel, level_index as u32)?;
            }
            if let (Some(monitor), Some(started_at)) = (monitor, monitor_started_at) {
                monitor.record(Direction::Write, compressed_len, started_at.elapsed().as_secs_f64());
            }
        }
    }

    Ok(histograms)
}

fn unflatten_spatial(flat: u64, counts: Index5D) -> Index5D {
    let mut remaining = flat;
    let x = remaining % counts.x().max(1);
    remaining /= counts.x().max(1);
    let y = remaining % counts.y().max(1);
    remaining /= counts.y().max(1);
    let z = remaining % counts.z().max(1);
    Index5D::new(x, y, z, 0, 0)
}

/// Integer-factor box downsample (spec.md §4.3): each destination voxel
/// averages the (up to) `scale_x * scale_y * scale_z` source voxels in its
/// window, clamped at the high edge when the source size is not an exact
/// multiple of the scale. Integer data types round the average half-to-even;
/// `F32` keeps the pure mean, since there is no "nearest representable
/// integer" to round to (spec.md §4.3: "for integer types, round-half-to-even;
/// for floats, pure mean").
fn downsample(
    source: &[f64],
    source_size: Index5D,
    dest_size: Index5D,
    scale: (u64, u64, u64),
    data_type: crate::datatype::DataType,
) -> Vec<f64> {
    let mut dest = vec![0.0; (dest_size.x() * dest_size.y() * dest_size.z()) as usize];

    for dz in 0..dest_size.z() {
        for dy in 0..dest_size.y() {
            for dx in 0..dest_size.x() {
                let x0 = dx * scale.0;
                let y0 = dy * scale.1;
                let z0 = dz * scale.2;
                let x1 = (x0 + scale.0).min(source_size.x());
                let y1 = (y0 + scale.1).min(source_size.y());
                let z1 = (z0 + scale.2).min(source_size.z());

                let mut sum = 0.0;
                let mut count = 0u64;
                for z in z0..z1 {
                    for y in y0..y1 {
                        for x in x0..x1 {
                            let index = (x + y * source_size.x() + z * source_size.x() * source_size.y()) as usize;
                            sum += source[index];
                            count += 1;
                        }
                    }
                }

                let average = if count > 0 { sum / count as f64 } else { 0.0 };
                let dest_index = (dx + dy * dest_size.x() + dz * dest_size.x() * dest_size.y()) as usize;
                dest[dest_index] = match data_type {
                    crate::datatype::DataType::F32 => average,
                    _ => round_half_to_even(average),
                };
            }
        }
    }

    dest
}

impl RemapSink for MultiResolutionEngine {
    fn need_copy_block(&self, block_index: Index5D) -> bool {
        self.level0_grid().is_valid_index(block_index)
    }

    fn copy_block(&self, region: BlockRegion, data_type: crate::datatype::DataType, bytes: &[u8]) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::writer("conversion cancelled"));
        }

        let channel = region.block_index.c() as u32;
        let time = region.block_index.t() as u32;
        let grid = self.level0_grid();
        let spatial_block = Index5D::new(region.block_index.x(), region.block_index.y(), region.block_index.z(), 0, 0);
        let block_offset = grid.block_offset(spatial_block);
        let size = self.descriptor.size;
        let total_voxels = size.x() * size.y() * size.z();

        let (values, completed) = {
            let mut pending = self.pending.lock().expect("pending-volume lock poisoned");
            let entry = pending
                .entry((time, channel))
                .or_insert_with(|| PendingVolume { values: vec![0.0; total_voxels as usize], received: 0 });

            let mut source_index = 0usize;
            for z in 0..region.shape.z() {
                for y in 0..region.shape.y() {
                    for x in 0..region.shape.x() {
                        let value = data_type.read_sample(bytes, source_index);
                        source_index += 1;

                        let ax = block_offset.x() + region.local_offset.x() + x;
                        let ay = block_offset.y() + region.local_offset.y() + y;
                        let az = block_offset.z() + region.local_offset.z() + z;
                        let dest_index = (ax + ay * size.x() + az * size.x() * size.y()) as usize;
                        entry.values[dest_index] = value;
                    }
                }
            }

            entry.received += region.shape.x() * region.shape.y() * region.shape.z();

            if entry.received >= total_voxels {
                let completed = pending.remove(&(time, channel)).expect("just inserted");
                (Some(completed.values), true)
            } else {
                (None, false)
            }
        };

        if completed {
            self.submit_volume(time, channel, values.expect("completed volume carries its values"));
        }

        self.drain_results();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::color::Color;
    use crate::dimension::DimensionSequence;
    use crate::extent::FlippedAxes;
    use crate::grid::DefaultPyramidStrategy;
    use crate::remapper::{BlockRemapper, RemapConfig};
    use crate::time_info::TimeInfo;
    use crate::writer::test_support::RecordingWriter;
    use crate::reader::test_support::InMemoryReader;

    fn test_descriptor(size: Index5D) -> SourceDescriptor {
        SourceDescriptor {
            data_type: crate::datatype::DataType::U8,
            size,
            native_block_size: size,
            native_dimension_sequence: DimensionSequence::WRITER_NATIVE,
            flipped_axes: FlippedAxes::default(),
            resolution_count: 1,
            channel_colors: (0..size.c()).map(|_| ColorInfo::base_color(Color::WHITE, (0.0, 255.0))).collect(),
            time_points: (0..size.t()).map(|_| TimeInfo::default()).collect(),
            parameters: ParameterSections::new(),
        }
    }

    #[test]
    fn rejects_block_size_spanning_multiple_channels() {
        let descriptor = test_descriptor(Index5D::new(4, 4, 1, 2, 1));
        let config = EngineConfig {
            block_size: Index5D::new(4, 4, 1, 2, 1),
            pyramid_strategy: Box::new(DefaultPyramidStrategy::default()),
            compression: Compression::Uncompressed,
            worker_threads: 1,
            app_name: "test".into(),
            app_version: "0".into(),
            auto_adjust_range: false,
            monitor: None,
            monitor_started_at: None,
        };
        let writer = Box::new(RecordingWriter::default());
        let result = MultiResolutionEngine::construct(descriptor, config, writer, CancelToken::new());
        assert!(result.is_err());
    }

    #[test]
    fn full_pipeline_writes_blocks_and_histogram_for_constant_volume() {
        let size = Index5D::new(8, 8, 1, 1, 1);
        let voxels = vec![100u8; 64];
        let descriptor = test_descriptor(size);
        let reader = InMemoryReader::new_u8(size, size, DimensionSequence::WRITER_NATIVE, voxels);

        let config = EngineConfig {
            block_size: Index5D::new(4, 4, 1, 1, 1),
            pyramid_strategy: Box::new(DefaultPyramidStrategy { size_floor: 4, max_levels: 2 }),
            compression: Compression::Uncompressed,
            worker_threads: 2,
            app_name: "test".into(),
            app_version: "0".into(),
            auto_adjust_range: false,
            monitor: None,
            monitor_started_at: None,
        };

        let writer = Box::new(RecordingWriter::default());
        let engine =
            MultiResolutionEngine::construct(descriptor.clone(), config, writer, CancelToken::new()).unwrap();

        let grid = WriterBlockGrid::new(size, Index5D::new(4, 4, 1, 1, 1));
        let remap_config = RemapConfig::identity(size);
        let mut remapper = BlockRemapper::new(reader, descriptor, grid, remap_config);
        remapper.process_all(&engine).unwrap();

        engine.finish(None).unwrap();
    }
}
