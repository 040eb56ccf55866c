//! The reader contract. See spec.md §4.1 "BlockReaderAdapter" and §6
//! "Reader contract".

use crate::descriptor::SourceDescriptor;
use crate::error::Result;

/// Outcome of reading one block, distinguishing the two recoverable
/// per-block failure kinds from a clean read.
///
/// Per spec.md §7: `ReaderIoError` ("truncated reads or decode errors") and
/// `ReaderFormatError` ("recoverable structural anomalies") receive the same
/// treatment — the caller zero-fills the block and continues — so both are
/// represented here rather than as a fatal [`crate::error::Error`].
#[derive(Debug)]
pub enum BlockReadOutcome {
    Ok,
    IoError(String),
    FormatError(String),
}

impl BlockReadOutcome {
    pub fn is_error(&self) -> bool {
        !matches!(self, BlockReadOutcome::Ok)
    }
}

/// Presents any vendor source as a uniform cursor over 5D blocks, per
/// spec.md §4.1.
///
/// Readers may be implemented natively or as adapters over a managed
/// runtime (spec.md §9: "Abstract as a separate adapter process or an
/// out-of-process protocol"); this crate only ever talks to this trait.
pub trait BlockReaderAdapter: Send {
    /// Immutable metadata for the whole dataset. May be called multiple
    /// times; must return the same value every time.
    fn describe(&self) -> Result<SourceDescriptor>;

    /// Selects which resolution level subsequent block reads expose, for
    /// sources with a native pyramid. Levels are numbered 0 (finest)
    /// upward.
    fn set_resolution(&mut self, level: u32) -> Result<()>;

    /// Number of blocks in the reader's native grid at the currently
    /// selected resolution: `product(ceil(size_d / block_size_d))` over all
    /// five axes.
    fn number_of_blocks(&self) -> u64;

    /// Positions the cursor at block `index`. `go_to_block(0)` is always the
    /// first block a subsequent `next_block()` would also reach.
    fn go_to_block(&mut self, index: u64) -> Result<()>;

    /// Advances the cursor by one block. Two consecutive calls
    /// (`go_to_block(i)` then `next_block()`) must land on indices `i` and
    /// `i+1`.
    fn next_block(&mut self) -> Result<()>;

    /// Fills `buffer` with exactly one block's worth of typed elements, in
    /// the reader's own dimension order. `buffer.len()` on entry is the
    /// number of bytes the caller expects; implementations must write
    /// exactly that many bytes or return an error outcome.
    fn read_block(&mut self, buffer: &mut [u8]) -> BlockReadOutcome;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    //! A minimal in-memory reader used by remapper/engine tests, grounded
    //! on the concrete scenarios in spec.md §8.

    use super::*;
    use crate::color::{Color, ColorInfo};
    use crate::dimension::{DimensionSequence, Index5D};
    use crate::extent::FlippedAxes;
    use crate::parameters::ParameterSections;
    use crate::time_info::TimeInfo;
    use crate::datatype::DataType;

    pub struct InMemoryReader {
        pub descriptor: SourceDescriptor,
        pub voxels: Vec<u8>, // one byte per voxel, reader dimension order, data_type == U8
        pub cursor: u64,
    }

    impl InMemoryReader {
        pub fn new_u8(size: Index5D, block_size: Index5D, sequence: DimensionSequence, voxels: Vec<u8>) -> Self {
            let descriptor = SourceDescriptor {
                data_type: DataType::U8,
                size,
                native_block_size: block_size,
                native_dimension_sequence: sequence,
                flipped_axes: FlippedAxes::default(),
                resolution_count: 1,
                channel_colors: (0..size.c())
                    .map(|_| ColorInfo::base_color(Color::WHITE, (0.0, 255.0)))
                    .collect(),
                time_points: (0..size.t()).map(|_| TimeInfo::default()).collect(),
                parameters: ParameterSections::new(),
            };
            Self { descriptor, voxels, cursor: 0 }
        }
    }

    impl BlockReaderAdapter for InMemoryReader {
        fn describe(&self) -> Result<SourceDescriptor> {
            Ok(self.descriptor.clone())
        }

        fn set_resolution(&mut self, _level: u32) -> Result<()> {
            Ok(())
        }

        fn number_of_blocks(&self) -> u64 {
            self.descriptor.size.ceil_div(self.descriptor.native_block_size).product()
        }

        fn go_to_block(&mut self, index: u64) -> Result<()> {
            self.cursor = index;
            Ok(())
        }

        fn next_block(&mut self) -> Result<()> {
            self.cursor += 1;
            Ok(())
        }

        fn read_block(&mut self, buffer: &mut [u8]) -> BlockReadOutcome {
            let block_voxel_count = self.descriptor.native_block_size.product() as usize;
            let start = self.cursor as usize * block_voxel_count;
            if start + buffer.len() > self.voxels.len() {
                return BlockReadOutcome::IoError("truncated in-memory source".into());
            }
            buffer.copy_from_slice(&self.voxels[start..start + buffer.len()]);
            BlockReadOutcome::Ok
        }
    }
}
