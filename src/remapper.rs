//! The hardest module in the pipeline: re-tiles arbitrarily-ordered,
//! arbitrarily-blocked reader output into the writer's block grid, applying
//! crop, subsample and flip along the way. See spec.md §4.2 "BlockRemapper".

use crate::datatype::DataType;
use crate::descriptor::SourceDescriptor;
use crate::dimension::{Dimension, Index5D};
use crate::error::Result;
use crate::grid::WriterBlockGrid;
use crate::reader::BlockReaderAdapter;

/// What `BlockRemapper` hands to the engine for one writer block: a
/// contiguous, `WRITER_NATIVE`-ordered (X fastest) run of voxel bytes
/// covering exactly `shape` voxels starting at `local_offset` within the
/// block at `block_index`.
///
/// spec.md §4.2 calls the payload "reader-dimension-ordered data"; this
/// crate instead has the remapper finish the axis permutation itself and
/// deliver writer-ordered bytes, since the engine's histogram and downsample
/// code need one canonical byte order regardless of which reader produced
/// the data (see DESIGN.md).
#[derive(Debug, Clone, Copy)]
pub struct BlockRegion {
    pub block_index: Index5D,
    pub local_offset: Index5D,
    pub shape: Index5D,
}

impl BlockRegion {
    pub fn voxel_count(&self) -> u64 {
        self.shape.product()
    }
}

/// The engine-side contract the remapper drives. Implemented by
/// [`crate::engine::MultiResolutionEngine`].
pub trait RemapSink {
    /// True iff the writer block at `block_index` is required at all (crop
    /// may exclude entire writer blocks).
    fn need_copy_block(&self, block_index: Index5D) -> bool;

    /// Delivers one writer-ordered voxel payload. `bytes.len()` must equal
    /// `region.voxel_count() * data_type.byte_size()`.
    fn copy_block(&self, region: BlockRegion, data_type: DataType, bytes: &[u8]) -> Result<()>;
}

/// Crop, subsample and flip configuration for one remapping pass. Crop
/// limits and flip flags are expressed in absolute source voxel coordinates;
/// `sample` is the integer stride applied per axis (1 for a raw write, >1
/// for the thumbnail-only pipeline's decimated read, per spec.md §4.2).
#[derive(Debug, Clone, Copy)]
pub struct RemapConfig {
    pub crop_min: Index5D,
    pub crop_max: Index5D,
    pub sample: Index5D,
    pub flip_x: bool,
    pub flip_y: bool,
    pub flip_z: bool,
}

impl RemapConfig {
    /// No crop, no subsample, no flip: writes every source voxel once.
    pub fn identity(size: Index5D) -> Self {
        Self {
            crop_min: Index5D::ZERO,
            crop_max: size,
            sample: Index5D::ONE,
            flip_x: false,
            flip_y: false,
            flip_z: false,
        }
    }

    fn flipped(&self, dimension: Dimension) -> bool {
        match dimension {
            Dimension::X => self.flip_x,
            Dimension::Y => self.flip_y,
            Dimension::Z => self.flip_z,
            Dimension::C | Dimension::T => false,
        }
    }

    /// The output image size this configuration produces: `ceil((crop_max -
    /// crop_min) / sample)` per axis.
    pub fn output_size(&self) -> Index5D {
        let span = self.crop_max.saturating_sub(self.crop_min);
        span.ceil_div(self.sample)
    }
}

/// Per-axis active range within one reader block, in **output** coordinate
/// space (post-crop, post-subsample). `None` on any axis means the block is
/// empty after crop and must be skipped entirely without reading.
#[derive(Debug, Clone, Copy)]
struct ActiveRange {
    start: u64,
    end: u64, // exclusive
}

/// Implements spec.md §4.2's per-axis block-range formula:
/// `begin_in_block = (sample - ((reader_block_start - min_limit) mod sample)) mod sample`
/// `end_in_block = min(reader_block_size, max_limit - reader_block_start)`
fn active_range(
    reader_block_start: u64,
    reader_block_size: u64,
    min_limit: u64,
    max_limit: u64,
    sample: u64,
) -> Option<ActiveRange> {
    let sample = sample.max(1);
    let signed_offset = reader_block_start as i64 - min_limit as i64;
    let remainder = signed_offset.rem_euclid(sample as i64) as u64;
    let begin_in_block = (sample - remainder) % sample;

    let end_in_block = (max_limit as i64 - reader_block_start as i64).clamp(0, reader_block_size as i64) as u64;

    if end_in_block <= begin_in_block {
        return None;
    }

    // Number of sampled voxels in [begin_in_block, end_in_block).
    let count = (end_in_block - begin_in_block).div_ceil(sample);
    let output_start = (reader_block_start + begin_in_block - min_limit) / sample;

    Some(ActiveRange { start: output_start, end: output_start + count })
}

/// Splits an output-coordinate range into maximal runs that land in the same
/// writer block along one axis, honoring flip (spec.md §4.2's per-axis
/// tie-breaking: "boundary voxels go to the lower-index output bin").
///
/// Returns `(block_index, output_sub_range)` pairs covering all of
/// `[range.start, range.end)`.
fn axis_chunks(range: ActiveRange, size: u64, block_size: u64, flipped: bool) -> Vec<(u64, ActiveRange)> {
    let mut chunks = Vec::new();
    let mut cursor = range.start;

    while cursor < range.end {
        let stored = if flipped { size - 1 - cursor } else { cursor };
        let block_index = stored / block_size;

        let remaining_in_block =
            if flipped { stored - block_index * block_size + 1 } else { (block_index + 1) * block_size - stored };

        let chunk_len = remaining_in_block.min(range.end - cursor);
        chunks.push((block_index, ActiveRange { start: cursor, end: cursor + chunk_len }));
        cursor += chunk_len;
    }

    chunks
}

/// Maps one output coordinate to its (block_index, local_offset) pair.
fn locate(output: u64, size: u64, block_size: u64, flipped: bool) -> (u64, u64) {
    let stored = if flipped { size - 1 - output } else { output };
    (stored / block_size, stored % block_size)
}

/// Drives a [`BlockReaderAdapter`] end to end, re-tiling its output into a
/// [`RemapSink`]'s writer block grid.
pub struct BlockRemapper<R> {
    reader: R,
    descriptor: SourceDescriptor,
    grid: WriterBlockGrid,
    config: RemapConfig,
    scratch: Vec<u8>,
}

impl<R: BlockReaderAdapter> BlockRemapper<R> {
    pub fn new(reader: R, descriptor: SourceDescriptor, grid: WriterBlockGrid, config: RemapConfig) -> Self {
        let scratch_voxels = descriptor.native_block_size.product() as usize;
        Self {
            reader,
            descriptor,
            grid,
            config,
            scratch: vec![0u8; scratch_voxels * descriptor.data_type.byte_size()],
        }
    }

    fn unflatten_reader_block_index(&self, flat: u64) -> Index5D {
        let counts = self.descriptor.size.ceil_div(self.descriptor.native_block_size);
        let order = self.descriptor.native_dimension_sequence.order();
        let mut remaining = flat;
        let mut coord = Index5D::ZERO;
        for dimension in order {
            let count = counts[dimension].max(1);
            coord[dimension] = remaining % count;
            remaining /= count;
        }
        coord
    }

    /// Drives the reader from block 0 to the last block, per spec.md §4.2
    /// `process_all()`.
    pub fn process_all(&mut self, sink: &impl RemapSink) -> Result<()> {
        let block_count = self.reader.number_of_blocks();
        if block_count == 0 {
            return Ok(());
        }

        self.reader.go_to_block(0)?;

        for flat_index in 0..block_count {
            if flat_index > 0 {
                self.reader.next_block()?;
            }

            let block_coord = self.unflatten_reader_block_index(flat_index);
            let reader_block_origin = Index5D::from_fn(|d| block_coord[d] * self.descriptor.native_block_size[d]);

            let ranges = Dimension::ALL.into_iter().map(|dimension| {
                active_range(
                    reader_block_origin[dimension],
                    self.descriptor.native_block_size[dimension],
                    self.config.crop_min[dimension],
                    self.config.crop_max[dimension],
                    self.config.sample[dimension],
                )
            });

            let mut per_axis = [ActiveRange { start: 0, end: 0 }; 5];
            let mut any_empty = false;
            for (slot, range) in per_axis.iter_mut().zip(ranges) {
                match range {
                    Some(range) => *slot = range,
                    None => {
                        any_empty = true;
                        break;
                    }
                }
            }

            if any_empty {
                continue;
            }

            let outcome = self.reader.read_block(&mut self.scratch);
            if outcome.is_error() {
                log::warn!("reader block {flat_index} failed ({outcome:?}); writing zero-filled voxels");
            }

            self.emit_block(sink, reader_block_origin, per_axis)?;
        }

        Ok(())
    }

    /// Fans the active reader-block region out across every writer block it
    /// overlaps (spec.md §4.2 "Key algorithm — block copy").
    fn emit_block(&self, sink: &impl RemapSink, reader_block_origin: Index5D, ranges: [ActiveRange; 5]) -> Result<()> {
        let output_size = self.config.output_size();

        let axis_plans: [Vec<(u64, ActiveRange)>; 5] = Dimension::ALL.map(|dimension| {
            axis_chunks(
                ranges[dimension.index()],
                output_size[dimension],
                self.grid.block_size[dimension],
                self.config.flipped(dimension),
            )
        });

        for &(bx, rx) in &axis_plans[0] {
            for &(by, ry) in &axis_plans[1] {
                for &(bz, rz) in &axis_plans[2] {
                    for &(bc, rc) in &axis_plans[3] {
                        for &(bt, rt) in &axis_plans[4] {
                            let block_index = Index5D::new(bx, by, bz, bc, bt);
                            if !sink.need_copy_block(block_index) {
                                continue;
                            }

                            self.emit_writer_block(
                                sink,
                                reader_block_origin,
                                block_index,
                                output_size,
                                [rx, ry, rz, rc, rt],
                            )?;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Copies one writer block's worth of overlap out of the scratch buffer
    /// and hands it to the sink.
    fn emit_writer_block(
        &self,
        sink: &impl RemapSink,
        reader_block_origin: Index5D,
        block_index: Index5D,
        output_size: Index5D,
        output_ranges: [ActiveRange; 5],
    ) -> Result<()> {
        let data_type = self.descriptor.data_type;
        let sample_size = data_type.byte_size();
        let sequence = self.descriptor.native_dimension_sequence;
        let reader_shape = self.descriptor.native_block_size;

        let dim_nr_x = sequence.position_of(Dimension::X);
        let fast_path_x = dim_nr_x == 0 && self.config.sample.x() == 1 && !self.config.flip_x;

        let local_starts = Index5D::from_fn(|d| locate(output_ranges[d.index()].start, output_size[d], self.grid.block_size[d], self.config.flipped(d)).1.min(
            // for a flipped, descending chunk the lower local bound is at the *end* of the output range
            locate(output_ranges[d.index()].end - 1, output_size[d], self.grid.block_size[d], self.config.flipped(d)).1,
        ));

        let shape = Index5D::from_fn(|d| output_ranges[d.index()].end - output_ranges[d.index()].start);
        let voxel_count = shape.product() as usize;
        let mut dest = vec![0u8; voxel_count * sample_size];
        let dest_sequence_strides = crate::dimension::DimensionSequence::WRITER_NATIVE;

        for t_out in output_ranges[4].start..output_ranges[4].end {
            let t_in = self.input_coord(Dimension::T, t_out, reader_block_origin);
            for c_out in output_ranges[3].start..output_ranges[3].end {
                let c_in = self.input_coord(Dimension::C, c_out, reader_block_origin);
                for z_out in output_ranges[2].start..output_ranges[2].end {
                    // spec.md §4.2: Z addresses the destination directly rather than
                    // reversing a copy direction.
                    let z_in = self.input_coord(Dimension::Z, z_out, reader_block_origin);

                    if fast_path_x {
                        for y_out in output_ranges[1].start..output_ranges[1].end {
                            let y_in = self.input_coord(Dimension::Y, y_out, reader_block_origin);
                            let row_len = (output_ranges[0].end - output_ranges[0].start) as usize;
                            let x_in_start = self.input_coord(Dimension::X, output_ranges[0].start, reader_block_origin);

                            let src_index = flat_reader_index(
                                sequence,
                                reader_shape,
                                Index5D::new(x_in_start, y_in, z_in, c_in, t_in),
                            );
                            let src_start = src_index as usize * sample_size;
                            let src = &self.scratch[src_start..src_start + row_len * sample_size];

                            let dest_local = local_dest_coords(
                                output_ranges,
                                local_starts,
                                Index5D::new(output_ranges[0].start, y_out, z_out, c_out, t_out),
                                self.config,
                                output_size,
                                self.grid.block_size,
                            );
                            let dest_index = dest_sequence_strides.stride_of(Dimension::Y, shape) * dest_local.y()
                                + dest_sequence_strides.stride_of(Dimension::Z, shape) * dest_local.z()
                                + dest_sequence_strides.stride_of(Dimension::C, shape) * dest_local.c()
                                + dest_sequence_strides.stride_of(Dimension::T, shape) * dest_local.t();
                            let dest_start = dest_index as usize * sample_size;
                            dest[dest_start..dest_start + row_len * sample_size].copy_from_slice(src);
                        }
                    } else {
                        for y_out in output_ranges[1].start..output_ranges[1].end {
                            let y_in = self.input_coord(Dimension::Y, y_out, reader_block_origin);
                            for x_out in output_ranges[0].start..output_ranges[0].end {
                                let x_in = self.input_coord(Dimension::X, x_out, reader_block_origin);

                                let src_index = flat_reader_index(
                                    sequence,
                                    reader_shape,
                                    Index5D::new(x_in, y_in, z_in, c_in, t_in),
                                );
                                let sample = data_type.read_sample(&self.scratch, src_index as usize);

                                let dest_local = local_dest_coords(
                                    output_ranges,
                                    local_starts,
                                    Index5D::new(x_out, y_out, z_out, c_out, t_out),
                                    self.config,
                                    output_size,
                                    self.grid.block_size,
                                );
                                let dest_index = dest_sequence_strides.stride_of(Dimension::X, shape) * dest_local.x()
                                    + dest_sequence_strides.stride_of(Dimension::Y, shape) * dest_local.y()
                                    + dest_sequence_strides.stride_of(Dimension::Z, shape) * dest_local.z()
                                    + dest_sequence_strides.stride_of(Dimension::C, shape) * dest_local.c()
                                    + dest_sequence_strides.stride_of(Dimension::T, shape) * dest_local.t();
                                data_type.write_sample(&mut dest, dest_index as usize, sample);
                            }
                        }
                    }
                }
            }
        }

        sink.copy_block(
            BlockRegion { block_index, local_offset: local_starts, shape },
            data_type,
            &dest,
        )
    }

    /// Maps an output coordinate on `dimension` back to the reader's
    /// absolute voxel coordinate, then into a block-local offset from
    /// `reader_block_origin`.
    fn input_coord(&self, dimension: Dimension, output: u64, reader_block_origin: Index5D) -> u64 {
        let absolute = output * self.config.sample[dimension] + self.config.crop_min[dimension];
        absolute - reader_block_origin[dimension]
    }
}

/// Local offset (within the destination block region) of one output
/// coordinate, honoring flip.
fn local_dest_coords(
    _ranges: [ActiveRange; 5],
    local_starts: Index5D,
    output_coord: Index5D,
    config: RemapConfig,
    output_size: Index5D,
    block_size: Index5D,
) -> Index5D {
    Index5D::from_fn(|d| {
        let flipped = config.flipped(d);
        let (_, local) = locate(output_coord[d], output_size[d], block_size[d], flipped);
        local - local_starts[d]
    })
}

fn flat_reader_index(sequence: crate::dimension::DimensionSequence, shape: Index5D, coord: Index5D) -> u64 {
    Dimension::ALL.iter().map(|&d| sequence.stride_of(d, shape) * coord[d]).sum()
}

impl Dimension {
    fn index(self) -> usize {
        match self {
            Dimension::X => 0,
            Dimension::Y => 1,
            Dimension::Z => 2,
            Dimension::C => 3,
            Dimension::T => 4,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::color::{Color, ColorInfo};
    use crate::dimension::DimensionSequence;
    use crate::extent::FlippedAxes;
    use crate::parameters::ParameterSections;
    use crate::reader::test_support::InMemoryReader;
    use crate::time_info::TimeInfo;
    use std::cell::RefCell;
    use std::collections::BTreeMap;

    struct RecordingSink {
        blocks: RefCell<BTreeMap<(u64, u64, u64, u64, u64), Vec<u8>>>,
    }

    impl RemapSink for RecordingSink {
        fn need_copy_block(&self, _block_index: Index5D) -> bool {
            true
        }

        fn copy_block(&self, region: BlockRegion, _data_type: DataType, bytes: &[u8]) -> Result<()> {
            self.blocks.borrow_mut().insert(
                (
                    region.block_index.x(),
                    region.block_index.y(),
                    region.block_index.z(),
                    region.block_index.c(),
                    region.block_index.t(),
                ),
                bytes.to_vec(),
            );
            Ok(())
        }
    }

    fn descriptor(size: Index5D, block: Index5D, flipped: FlippedAxes) -> SourceDescriptor {
        SourceDescriptor {
            data_type: DataType::U8,
            size,
            native_block_size: block,
            native_dimension_sequence: DimensionSequence::WRITER_NATIVE,
            flipped_axes: flipped,
            resolution_count: 1,
            channel_colors: (0..size.c()).map(|_| ColorInfo::base_color(Color::WHITE, (0.0, 255.0))).collect(),
            time_points: (0..size.t()).map(|_| TimeInfo::default()).collect(),
            parameters: ParameterSections::new(),
        }
    }

    #[test]
    fn scenario_one_single_block_full_copy() {
        let size = Index5D::new(4, 4, 1, 1, 1);
        let voxels: Vec<u8> = (0..16).collect();
        let descriptor = descriptor(size, size, FlippedAxes::default());
        let reader = InMemoryReader::new_u8(size, size, DimensionSequence::WRITER_NATIVE, voxels.clone());
        let grid = WriterBlockGrid::new(size, size);
        let config = RemapConfig::identity(size);

        let mut remapper = BlockRemapper::new(reader, descriptor, grid, config);
        let sink = RecordingSink { blocks: RefCell::new(BTreeMap::new()) };
        remapper.process_all(&sink).unwrap();

        let blocks = sink.blocks.borrow();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[&(0, 0, 0, 0, 0)], voxels);
    }

    #[test]
    fn scenario_four_flipped_x_reverses_rows() {
        let size = Index5D::new(2, 2, 1, 1, 1);
        let voxels = vec![1u8, 2, 3, 4]; // [[1,2],[3,4]] row-major X-fast
        let descriptor = descriptor(size, size, FlippedAxes { x: true, y: false, z: false });
        let reader = InMemoryReader::new_u8(size, size, DimensionSequence::WRITER_NATIVE, voxels);

        let grid = WriterBlockGrid::new(size, size);
        let mut config = RemapConfig::identity(size);
        config.flip_x = true;

        let mut remapper = BlockRemapper::new(reader, descriptor, grid, config);
        let sink = RecordingSink { blocks: RefCell::new(BTreeMap::new()) };
        remapper.process_all(&sink).unwrap();

        let blocks = sink.blocks.borrow();
        assert_eq!(blocks[&(0, 0, 0, 0, 0)], vec![2, 1, 4, 3]);
    }

    #[test]
    fn scenario_five_crop_selects_interior_voxels() {
        let size = Index5D::new(4, 4, 1, 1, 1);
        let voxels: Vec<u8> = (0..16).collect();
        let descriptor = descriptor(size, size, FlippedAxes::default());
        let reader = InMemoryReader::new_u8(size, size, DimensionSequence::WRITER_NATIVE, voxels);

        let grid = WriterBlockGrid::new(Index5D::new(2, 2, 1, 1, 1), Index5D::new(2, 2, 1, 1, 1));
        let config = RemapConfig {
            crop_min: Index5D::new(1, 1, 0, 0, 0),
            crop_max: Index5D::new(3, 3, 1, 1, 1),
            sample: Index5D::ONE,
            flip_x: false,
            flip_y: false,
            flip_z: false,
        };

        let mut remapper = BlockRemapper::new(reader, descriptor, grid, config);
        let sink = RecordingSink { blocks: RefCell::new(BTreeMap::new()) };
        remapper.process_all(&sink).unwrap();

        let blocks = sink.blocks.borrow();
        assert_eq!(blocks.len(), 1);
        // source voxels 5,6,9,10 (row-major X-fast over a 4-wide image)
        assert_eq!(blocks[&(0, 0, 0, 0, 0)], vec![5, 6, 9, 10]);
    }

    #[test]
    fn scenario_two_timepoints_each_land_in_their_own_block() {
        let size = Index5D::new(2, 2, 2, 1, 2);
        let mut voxels = vec![0u8; 16];
        for value in voxels.iter_mut().skip(8) {
            *value = 255;
        }
        let descriptor = descriptor(size, size, FlippedAxes::default());
        let reader = InMemoryReader::new_u8(size, size, DimensionSequence::WRITER_NATIVE, voxels);

        let grid = WriterBlockGrid::new(size, Index5D::new(2, 2, 2, 1, 1));
        let config = RemapConfig::identity(size);

        let mut remapper = BlockRemapper::new(reader, descriptor, grid, config);
        let sink = RecordingSink { blocks: RefCell::new(BTreeMap::new()) };
        remapper.process_all(&sink).unwrap();

        let blocks = sink.blocks.borrow();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[&(0, 0, 0, 0, 0)].iter().all(|&value| value == 0));
        assert!(blocks[&(0, 0, 0, 0, 1)].iter().all(|&value| value == 255));
    }
}
