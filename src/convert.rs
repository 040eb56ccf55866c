//! Top-level orchestration wiring a reader, the remapper, and the
//! multi-resolution engine into one conversion run. See spec.md §1
//! "OVERVIEW" and §4's module list.
//!
//! Grounded on `bpImageConvertNew.cxx`'s `cImpl::ConvertT`: probe the
//! source's data type and extent, derive the flip flags from extent min/max
//! ordering, pick an image converter (full pyramid vs. thumbnail-only), run
//! the read/copy loop to completion, then finalize with metadata. This
//! module keeps that same shape but drives it through
//! [`crate::remapper::BlockRemapper`] and [`crate::engine::MultiResolutionEngine`]
//! instead of a single monolithic loop, since those already encapsulate the
//! block-fan-out and compression/pyramid work respectively.

use std::sync::Arc;
use std::time::Instant;

use crate::datatype::DataType;
use crate::descriptor::SourceDescriptor;
use crate::dimension::{Dimension, Index5D};
use crate::engine::cancel::CancelToken;
use crate::engine::compression::Compression;
use crate::engine::{EngineConfig, MultiResolutionEngine};
use crate::error::Result;
use crate::grid::{PyramidInput, PyramidStrategy, WriterBlockGrid};
use crate::reader::BlockReaderAdapter;
use crate::remapper::{BlockRegion, BlockRemapper, RemapConfig, RemapSink};
use crate::thumbnail::{self, ThumbnailOptions};
use crate::throughput::{Direction, ThroughputMonitor};
use crate::writer::{Thumbnail, Writer, WriterFactory};

/// Everything needed to run one conversion, mirroring the parameters
/// `ConvertT` receives from the CLI layer (spec.md §6 "CLI surface"), minus
/// everything this crate explicitly leaves external (argument parsing, the
/// container format itself).
pub struct ConversionRequest {
    pub block_size: Index5D,
    pub pyramid_strategy: Box<dyn PyramidStrategy>,
    pub compression: Compression,
    pub worker_threads: usize,
    pub app_name: String,
    pub app_version: String,
    pub auto_adjust_range: bool,
    /// Crop/subsample/flip; `None` means "derive flip from the descriptor's
    /// extent, no crop, no subsample" — the common case per spec.md §4.2.
    pub remap: Option<RemapConfig>,
    pub thumbnail: Option<ThumbnailOptions>,
    pub throughput_repeat_ms: Option<u64>,
    pub cancel: CancelToken,
}

/// What a completed conversion produced, beyond what's already on disk via
/// the writer — useful for a calling CLI's summary line.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConversionReport {
    pub blocks_written: u64,
    pub levels_written: u32,
}

/// Runs one full conversion: reads `reader` to completion through
/// `writer_factory`'s writer, building every pyramid level, histogram and
/// (optionally) a thumbnail. Returns once finalization (metadata + histogram
/// writes) has completed.
///
/// Mirrors `ConvertT`'s shape: probe → configure → copy loop → finish.
pub fn run_conversion(
    mut reader: impl BlockReaderAdapter,
    writer_factory: &dyn WriterFactory,
    request: ConversionRequest,
) -> Result<ConversionReport> {
    let descriptor = reader.describe()?;
    descriptor.validate()?;

    let remap_config = request.remap.unwrap_or_else(|| default_remap_config(&descriptor));
    let output_size = remap_config.output_size();

    let monitor = request
        .throughput_repeat_ms
        .map(|repeat_ms| Arc::new(ThroughputMonitor::start(repeat_ms, 2.0, 1000, |_estimate| {})));
    let monitor_started_at = Instant::now();

    let writer = writer_factory.create(descriptor.data_type, output_size)?;

    let pyramid_input = PyramidInput {
        size: output_size,
        block_size: request.block_size,
        voxel_pitch: (1.0, 1.0, 1.0),
    };
    let level0_grid = WriterBlockGrid::new(output_size, request.block_size);
    let levels_written = request.pyramid_strategy.build_levels(pyramid_input).len() as u32;

    let engine_config = EngineConfig {
        block_size: request.block_size,
        pyramid_strategy: request.pyramid_strategy,
        compression: request.compression,
        worker_threads: request.worker_threads,
        app_name: request.app_name,
        app_version: request.app_version,
        auto_adjust_range: request.auto_adjust_range,
        monitor: monitor.clone(),
        monitor_started_at: monitor.as_ref().map(|_| monitor_started_at),
    };

    let engine = MultiResolutionEngine::construct(descriptor.clone(), engine_config, writer, request.cancel.clone())?;

    let mut remapper = BlockRemapper::new(
        reader_with_monitor(&mut reader, monitor.clone(), monitor_started_at),
        descriptor.clone(),
        level0_grid,
        remap_config,
    );
    remapper.process_all(&engine)?;

    let thumbnail = match &request.thumbnail {
        Some(options) => Some(build_thumbnail(&mut reader, &descriptor, options, remap_config)?),
        None => None,
    };

    engine.finish(thumbnail)?;

    Ok(ConversionReport { blocks_written: level0_grid.total_block_count(), levels_written })
}

/// Derives the default [`RemapConfig`]: no crop or subsample, flip flags
/// taken from whether each axis's extent runs max-to-min, per
/// `ConvertT`'s `aWriteOptions.mFlipDimensionXYZ[...] = extent.min > extent.max`.
fn default_remap_config(descriptor: &SourceDescriptor) -> RemapConfig {
    let mut config = RemapConfig::identity(descriptor.size);
    config.flip_x = descriptor.flipped_axes.x;
    config.flip_y = descriptor.flipped_axes.y;
    config.flip_z = descriptor.flipped_axes.z;
    config
}

/// Wraps reads in a throughput-recording shim when a monitor is active; a
/// no-op pass-through otherwise. Kept as a thin function rather than a
/// struct so the common (no monitor) path has no indirection cost.
///
/// `started_at` is shared with whatever timestamps the engine's write side
/// records through the same `monitor`, so read and write samples land on one
/// common time origin (spec.md §4.4 samples are "(bytes, monotonic seconds)"
/// pairs compared against each other within one direction's buffer, but a
/// shared origin keeps read/write estimates mutually comparable too).
fn reader_with_monitor<R: BlockReaderAdapter>(
    reader: &mut R,
    monitor: Option<Arc<ThroughputMonitor>>,
    started_at: Instant,
) -> MonitoredReader<'_, R> {
    MonitoredReader { reader, monitor, started_at }
}

struct MonitoredReader<'a, R> {
    reader: &'a mut R,
    monitor: Option<Arc<ThroughputMonitor>>,
    started_at: Instant,
}

impl<R: BlockReaderAdapter> BlockReaderAdapter for MonitoredReader<'_, R> {
    fn describe(&self) -> Result<SourceDescriptor> {
        self.reader.describe()
    }

    fn set_resolution(&mut self, level: u32) -> Result<()> {
        self.reader.set_resolution(level)
    }

    fn number_of_blocks(&self) -> u64 {
        self.reader.number_of_blocks()
    }

    fn go_to_block(&mut self, index: u64) -> Result<()> {
        self.reader.go_to_block(index)
    }

    fn next_block(&mut self) -> Result<()> {
        self.reader.next_block()
    }

    fn read_block(&mut self, buffer: &mut [u8]) -> crate::reader::BlockReadOutcome {
        let outcome = self.reader.read_block(buffer);
        if let Some(monitor) = &self.monitor {
            if !outcome.is_error() {
                monitor.record(Direction::Read, buffer.len() as u64, self.started_at.elapsed().as_secs_f64());
            }
        }
        outcome
    }
}

/// Accumulates a cropped, subsampled volume into memory for the
/// thumbnail-only degenerate pipeline, per spec.md §1: "writes a single
/// small RGB image from a loaded middle slice instead of a full pyramid".
/// Grounded on `bpThumbnailImageConverter::CopyFileBlockToImage`, which
/// drives the same block-remapping as a full conversion but into a
/// `bpMultiresolutionImsImage` sized for a thumbnail instead of the real
/// pyramid — here, into an in-memory buffer instead of a second writer.
struct ThumbnailAccumulator {
    size: Index5D,
    channel_volumes: Vec<Mutex<Vec<f64>>>,
}

use std::sync::Mutex;

impl ThumbnailAccumulator {
    fn new(size: Index5D) -> Self {
        let channel_count = size.c() as usize;
        let voxels_per_channel = (size.x() * size.y() * size.z()) as usize;
        Self {
            size,
            channel_volumes: (0..channel_count).map(|_| Mutex::new(vec![0.0; voxels_per_channel])).collect(),
        }
    }
}

impl RemapSink for ThumbnailAccumulator {
    fn need_copy_block(&self, block_index: Index5D) -> bool {
        (block_index.c() as usize) < self.channel_volumes.len()
    }

    fn copy_block(&self, region: BlockRegion, data_type: DataType, bytes: &[u8]) -> Result<()> {
        let channel = region.block_index.c() as usize;
        let mut volume = self.channel_volumes[channel].lock().expect("thumbnail volume lock poisoned");

        let mut source_index = 0usize;
        for z in 0..region.shape.z() {
            for y in 0..region.shape.y() {
                for x in 0..region.shape.x() {
                    let value = data_type.read_sample(bytes, source_index);
                    source_index += 1;

                    let ax = region.local_offset.x() + x;
                    let ay = region.local_offset.y() + y;
                    let az = region.local_offset.z() + z;
                    let dest_index = (ax + ay * self.size.x() + az * self.size.x() * self.size.y()) as usize;
                    if dest_index < volume.len() {
                        volume[dest_index] = value;
                    }
                }
            }
        }

        Ok(())
    }
}

/// Builds one thumbnail from the source, driving a dedicated second
/// `BlockRemapper` pass restricted to one timepoint with one writer block
/// per channel, then projecting each channel's volume to a plane, mapping it
/// through that channel's color, and compositing the channels together
/// before the final letterbox/flip (spec.md §6). Grounded on
/// `bpThumbnailImageConverter::CopyFileBlockToImage` driving its own
/// independent copy pass, and on `AdjustColorRange`/`GetFilteredBins`'s
/// per-channel color application before the composite is displayed.
fn build_thumbnail<R: BlockReaderAdapter>(
    reader: &mut R,
    descriptor: &SourceDescriptor,
    options: &ThumbnailOptions,
    base_remap: RemapConfig,
) -> Result<Thumbnail> {
    thumbnail::validate_request(options, descriptor.size, descriptor.data_type)?;

    let crop_min = Index5D::from_fn(|d| if d == Dimension::T { options.timepoint } else { base_remap.crop_min[d] });
    let crop_max = Index5D::from_fn(|d| if d == Dimension::T { options.timepoint + 1 } else { base_remap.crop_max[d] });

    // Downsample X/Y enough to fit `max_size`; Z keeps the base sampling so
    // Z-projection modes still see every plane.
    let max_size = options.max_size.max(1) as u64;
    let sample_for = |span: u64| span.div_ceil(max_size).max(1);
    let sample = Index5D::from_fn(|d| match d {
        Dimension::X => sample_for(crop_max.x() - crop_min.x()),
        Dimension::Y => sample_for(crop_max.y() - crop_min.y()),
        _ => base_remap.sample[d],
    });

    let thumbnail_config = RemapConfig { crop_min, crop_max, sample, ..base_remap };
    let output_size = thumbnail_config.output_size();
    let accumulator = ThumbnailAccumulator::new(output_size);

    let block_size = Index5D::new(output_size.x(), output_size.y(), output_size.z(), 1, 1);
    let grid = WriterBlockGrid::new(output_size, block_size);

    let wrapped = reader_with_monitor(reader, None, Instant::now());
    let mut remapper = BlockRemapper::new(wrapped, descriptor.clone(), grid, thumbnail_config);
    remapper.process_all(&accumulator)?;

    let (size_x, size_y, size_z) = (output_size.x(), output_size.y(), output_size.z());
    let plane_voxels = (size_x * size_y) as usize;
    let mut composite = vec![crate::color::Color::BLACK; plane_voxels];

    for channel in 0..output_size.c() as usize {
        let volume = accumulator.channel_volumes[channel].lock().expect("thumbnail volume lock poisoned");

        let planes: Vec<thumbnail::Plane> = (0..size_z)
            .map(|z| {
                let plane_start = (z * size_x * size_y) as usize;
                let samples = volume[plane_start..plane_start + plane_voxels]
                    .iter()
                    .map(|&value| thumbnail::sample_from_f64(value, descriptor.data_type))
                    .collect();
                thumbnail::Plane { size_x, size_y, samples }
            })
            .collect();

        let projected = thumbnail::project_plane(options.mode, options.z_slice, &planes);
        let color = &descriptor.channel_colors[channel];
        let contribution = thumbnail::map_plane_to_rgb(&projected, color);
        thumbnail::accumulate_rgb(&mut composite, &contribution);
    }

    Ok(thumbnail::letterbox_and_flip(size_x, size_y, &composite, options.background, options.background_alpha))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::color::{Color, ColorInfo};
    use crate::dimension::DimensionSequence;
    use crate::extent::FlippedAxes;
    use crate::grid::DefaultPyramidStrategy;
    use crate::parameters::ParameterSections;
    use crate::reader::test_support::InMemoryReader;
    use crate::time_info::TimeInfo;
    use crate::writer::test_support::RecordingWriter;

    struct RecordingWriterFactory;

    impl WriterFactory for RecordingWriterFactory {
        fn create(&self, _data_type: DataType, _size: Index5D) -> Result<Box<dyn Writer>> {
            Ok(Box::new(RecordingWriter::default()))
        }
    }

    fn descriptor(size: Index5D) -> SourceDescriptor {
        SourceDescriptor {
            data_type: DataType::U8,
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
    fn full_conversion_runs_end_to_end_without_a_thumbnail() {
        let size = Index5D::new(8, 8, 1, 1, 1);
        let voxels = vec![42u8; 64];
        let reader = InMemoryReader::new_u8(size, size, DimensionSequence::WRITER_NATIVE, voxels);

        let request = ConversionRequest {
            block_size: Index5D::new(4, 4, 1, 1, 1),
            pyramid_strategy: Box::new(DefaultPyramidStrategy { size_floor: 4, max_levels: 2 }),
            compression: Compression::Uncompressed,
            worker_threads: 2,
            app_name: "test".into(),
            app_version: "0".into(),
            auto_adjust_range: false,
            remap: None,
            thumbnail: None,
            throughput_repeat_ms: None,
            cancel: CancelToken::new(),
        };

        let factory = RecordingWriterFactory;
        let report = run_conversion(reader, &factory, request).unwrap();
        assert_eq!(report.levels_written, 2);
        assert!(report.blocks_written > 0);
    }

    #[test]
    fn full_conversion_with_a_thumbnail_produces_a_square_rgba_image() {
        let size = Index5D::new(4, 4, 1, 1, 1);
        let voxels = vec![200u8; 16];
        let reader = InMemoryReader::new_u8(size, size, DimensionSequence::WRITER_NATIVE, voxels);

        let request = ConversionRequest {
            block_size: Index5D::new(4, 4, 1, 1, 1),
            pyramid_strategy: Box::new(DefaultPyramidStrategy { size_floor: 4, max_levels: 1 }),
            compression: Compression::Uncompressed,
            worker_threads: 1,
            app_name: "test".into(),
            app_version: "0".into(),
            auto_adjust_range: false,
            remap: None,
            thumbnail: Some(crate::thumbnail::ThumbnailOptions::default()),
            throughput_repeat_ms: None,
            cancel: CancelToken::new(),
        };

        let factory = RecordingWriterFactory;
        let report = run_conversion(reader, &factory, request).unwrap();
        assert!(report.blocks_written > 0);
    }

    #[test]
    fn default_remap_config_carries_extent_derived_flips() {
        let descriptor = descriptor(Index5D::new(4, 4, 1, 1, 1));
        let mut descriptor = descriptor;
        descriptor.flipped_axes = FlippedAxes { x: true, y: false, z: false };
        let config = default_remap_config(&descriptor);
        assert!(config.flip_x);
        assert!(!config.flip_y);
    }
}
