//! The writer's block grid and resolution pyramid. See spec.md §3
//! "WriterBlockGrid" / "PyramidLevel" and §4.3 "Pyramid construction
//! (OptimalLayout)".

use crate::dimension::{Dimension, Index5D};

/// The block grid at a single resolution level: the writer-chosen block
/// size for that level and the number of blocks along every axis
/// (`ceil(size/blocksize)`). Blocks on the high edge of each axis may be
/// partial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterBlockGrid {
    pub size: Index5D,
    pub block_size: Index5D,
    pub block_counts: Index5D,
}

impl WriterBlockGrid {
    pub fn new(size: Index5D, block_size: Index5D) -> Self {
        Self { size, block_size, block_counts: size.ceil_div(block_size) }
    }

    pub fn total_block_count(&self) -> u64 {
        self.block_counts.product()
    }

    /// The voxel-space offset of block `index` along every axis.
    pub fn block_offset(&self, index: Index5D) -> Index5D {
        Index5D::from_fn(|d| index[d] * self.block_size[d])
    }

    /// The actual voxel extent of block `index` along every axis, clipped to
    /// `size` for blocks on the high edge (a "partial block").
    pub fn block_extent(&self, index: Index5D) -> Index5D {
        let offset = self.block_offset(index);
        Index5D::from_fn(|d| {
            let remaining = self.size[d].saturating_sub(offset[d]);
            remaining.min(self.block_size[d])
        })
    }

    pub fn is_valid_index(&self, index: Index5D) -> bool {
        Dimension::ALL.iter().all(|&d| index[d] < self.block_counts[d])
    }
}

/// One resolution level of the pyramid. Level 0 is full resolution; each
/// higher level is produced by integer downsampling of the immediately
/// finer level (spec.md §4.3: "Higher levels are generated from the
/// immediately finer level, never re-derived from level 0").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyramidLevel {
    pub index: u32,
    /// Downsample factor relative to level 0, per spatial axis.
    pub factor: (u32, u32, u32),
    pub grid: WriterBlockGrid,
}

/// Full-resolution size plus the physical voxel pitch used to steer
/// near-cubic downsampling.
#[derive(Debug, Clone, Copy)]
pub struct PyramidInput {
    pub size: Index5D,
    pub block_size: Index5D,
    pub voxel_pitch: (f32, f32, f32),
}

/// Strategy object choosing the downsample factor per level, kept separate
/// from `MultiResolutionEngine` per spec.md §9's Open Question: "treat the
/// axis-by-axis factors as a tunable strategy object".
pub trait PyramidStrategy: Send + Sync {
    fn build_levels(&self, input: PyramidInput) -> Vec<PyramidLevel>;
}

/// Default strategy: integer-power-of-two factors, halving whichever
/// spatial axes currently have the smallest physical voxel pitch (i.e. are
/// "ahead" in resolution) so the pyramid trends toward cubic physical
/// voxels, per spec.md §4.3. Stops when no eligible axis remains above the
/// size floor or the level cap is hit.
#[derive(Debug, Clone, Copy)]
pub struct DefaultPyramidStrategy {
    /// Minimum voxel extent on any axis before that axis stops halving.
    pub size_floor: u64,
    /// Hard cap on the number of levels, regardless of size floor.
    pub max_levels: u32,
}

impl Default for DefaultPyramidStrategy {
    fn default() -> Self {
        Self { size_floor: 16, max_levels: 6 }
    }
}

impl PyramidStrategy for DefaultPyramidStrategy {
    fn build_levels(&self, input: PyramidInput) -> Vec<PyramidLevel> {
        let mut levels = Vec::new();
        let mut size = input.size;
        let mut factor = (1u32, 1u32, 1u32);
        let mut pitch = input.voxel_pitch;

        loop {
            levels.push(PyramidLevel {
                index: levels.len() as u32,
                factor,
                grid: WriterBlockGrid::new(size, input.block_size),
            });

            if levels.len() as u32 >= self.max_levels {
                break;
            }

            let eligible_x = size.x() >= self.size_floor * 2;
            let eligible_y = size.y() >= self.size_floor * 2;
            let eligible_z = size.z() >= self.size_floor * 2;

            if !eligible_x && !eligible_y && !eligible_z {
                break;
            }

            let min_pitch = [
                eligible_x.then_some(pitch.0),
                eligible_y.then_some(pitch.1),
                eligible_z.then_some(pitch.2),
            ]
            .into_iter()
            .flatten()
            .fold(f32::INFINITY, f32::min);

            // Halve every eligible axis whose pitch is (near-)tied for
            // smallest, so anisotropic volumes catch up toward cubic voxels
            // instead of only ever halving a single axis per level.
            let halve_x = eligible_x && pitch.0 <= min_pitch * 1.2;
            let halve_y = eligible_y && pitch.1 <= min_pitch * 1.2;
            let halve_z = eligible_z && pitch.2 <= min_pitch * 1.2;

            if halve_x {
                size[Dimension::X] /= 2;
                factor.0 *= 2;
                pitch.0 *= 2.0;
            }
            if halve_y {
                size[Dimension::Y] /= 2;
                factor.1 *= 2;
                pitch.1 *= 2.0;
            }
            if halve_z {
                size[Dimension::Z] /= 2;
                factor.2 *= 2;
                pitch.2 *= 2.0;
            }
        }

        levels
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn single_slice_never_downsamples_z() {
        let strategy = DefaultPyramidStrategy::default();
        let input = PyramidInput {
            size: Index5D::new(512, 512, 1, 1, 1),
            block_size: Index5D::new(64, 64, 1, 1, 1),
            voxel_pitch: (1.0, 1.0, 1.0),
        };
        let levels = strategy.build_levels(input);
        assert!(levels.iter().all(|level| level.factor.2 == 1));
        assert!(levels.iter().all(|level| level.grid.size.z() == 1));
    }

    #[test]
    fn stops_at_size_floor() {
        let strategy = DefaultPyramidStrategy { size_floor: 16, max_levels: 100 };
        let input = PyramidInput {
            size: Index5D::new(64, 64, 64, 1, 1),
            block_size: Index5D::new(32, 32, 32, 1, 1),
            voxel_pitch: (1.0, 1.0, 1.0),
        };
        let levels = strategy.build_levels(input);
        let last = levels.last().unwrap();
        assert!(last.grid.size.x() >= 16 && last.grid.size.x() < 32);
    }

    #[test]
    fn anisotropic_volume_catches_up_toward_cubic_voxels() {
        let strategy = DefaultPyramidStrategy { size_floor: 4, max_levels: 3 };
        // Z is physically 4x coarser per voxel than X/Y — only X/Y should
        // downsample in early levels.
        let input = PyramidInput {
            size: Index5D::new(256, 256, 64, 1, 1),
            block_size: Index5D::new(64, 64, 16, 1, 1),
            voxel_pitch: (1.0, 1.0, 4.0),
        };
        let levels = strategy.build_levels(input);
        assert_eq!(levels[1].factor, (2, 2, 1));
    }

    #[test]
    fn block_extent_clips_partial_edge_blocks() {
        let grid = WriterBlockGrid::new(Index5D::new(10, 10, 1, 1, 1), Index5D::new(4, 4, 1, 1, 1));
        assert_eq!(grid.block_counts, Index5D::new(3, 3, 1, 1, 1));
        let edge_block = grid.block_extent(Index5D::new(2, 2, 0, 0, 0));
        assert_eq!(edge_block, Index5D::new(2, 2, 1, 1, 1));
        let full_block = grid.block_extent(Index5D::new(0, 0, 0, 0, 0));
        assert_eq!(full_block, Index5D::new(4, 4, 1, 1, 1));
    }
}
