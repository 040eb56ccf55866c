//! The immutable per-dataset description a reader publishes once and the
//! engine consumes for the rest of the conversion. See spec.md §3
//! "SourceDescriptor" and §4.1 `describe()`.

use crate::color::ColorInfo;
use crate::datatype::DataType;
use crate::dimension::{DimensionSequence, Index5D};
use crate::error::{Error, Result};
use crate::extent::FlippedAxes;
use crate::parameters::ParameterSections;
use crate::time_info::TimeInfo;

/// Immutable per-dataset metadata, as returned by
/// [`crate::reader::BlockReaderAdapter::describe`].
///
/// Constructed once per dataset and never mutated afterwards (spec.md §3
/// "Lifecycles").
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub data_type: DataType,
    pub size: Index5D,
    pub native_block_size: Index5D,
    pub native_dimension_sequence: DimensionSequence,
    pub flipped_axes: FlippedAxes,
    pub resolution_count: u32,
    pub channel_colors: Vec<ColorInfo>,
    pub time_points: Vec<TimeInfo>,
    pub parameters: ParameterSections,
}

impl SourceDescriptor {
    /// Validates the invariants spec.md §4.1 assigns to `describe()`:
    /// sizes strictly positive except Z (still >=1, never 0), and the
    /// dimension sequence a true permutation (already enforced by
    /// `DimensionSequence::new`, but we re-check axis count here defensively
    /// since callers may construct the struct directly).
    pub fn validate(&self) -> Result<()> {
        if !self.size.is_valid_source_size() {
            return Err(Error::config(format!(
                "source size must be strictly positive on every axis (X,Y,Z,C,T), got {:?}",
                self.size
            )));
        }

        if !self.native_block_size.is_valid_source_size() {
            return Err(Error::config("native block size must be strictly positive on every axis"));
        }

        if self.channel_colors.len() as u64 != self.size.c() {
            return Err(Error::config(format!(
                "expected {} channel color entries, got {}",
                self.size.c(),
                self.channel_colors.len()
            )));
        }

        if self.time_points.len() as u64 != self.size.t() {
            return Err(Error::config(format!(
                "expected {} time points, got {}",
                self.size.t(),
                self.time_points.len()
            )));
        }

        if self.resolution_count == 0 {
            return Err(Error::config("resolution_count must be at least 1"));
        }

        Ok(())
    }

    /// Total number of blocks the reader's native grid contains, per
    /// spec.md §4.1 `number_of_blocks()`.
    pub fn native_block_count(&self) -> u64 {
        self.size.ceil_div(self.native_block_size).product()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::color::Color;
    use crate::extent::FlippedAxes;

    fn descriptor(size: Index5D) -> SourceDescriptor {
        SourceDescriptor {
            data_type: DataType::U8,
            size,
            native_block_size: Index5D::new(4, 4, 1, 1, 1),
            native_dimension_sequence: DimensionSequence::WRITER_NATIVE,
            flipped_axes: FlippedAxes::default(),
            resolution_count: 1,
            channel_colors: (0..size.c()).map(|_| ColorInfo::base_color(Color::WHITE, (0.0, 255.0))).collect(),
            time_points: (0..size.t()).map(|_| TimeInfo::default()).collect(),
            parameters: ParameterSections::new(),
        }
    }

    #[test]
    fn rejects_zero_sized_axis() {
        let descriptor = descriptor(Index5D::new(0, 4, 1, 1, 1));
        assert!(descriptor.validate().is_err());
    }

    #[test]
    fn accepts_single_slice_z() {
        let descriptor = descriptor(Index5D::new(4, 4, 1, 1, 1));
        assert!(descriptor.validate().is_ok());
    }

    #[test]
    fn native_block_count_matches_ceil_division() {
        let descriptor = descriptor(Index5D::new(10, 10, 1, 1, 1));
        // ceil(10/4) * ceil(10/4) * 1 * 1 * 1 = 3 * 3 = 9
        assert_eq!(descriptor.native_block_count(), 9);
    }
}
