//! The five named axes and the index/size types built on them.
//!
//! see spec.md §3 "Dimensions" / "Index5D / Size5D".

use std::fmt;
use std::ops::{Index, IndexMut};

/// One of the five axes every array in this crate is indexed by.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Dimension {
    X,
    Y,
    Z,
    C,
    T,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::X,
        Dimension::Y,
        Dimension::Z,
        Dimension::C,
        Dimension::T,
    ];

    fn slot(self) -> usize {
        match self {
            Dimension::X => 0,
            Dimension::Y => 1,
            Dimension::Z => 2,
            Dimension::C => 3,
            Dimension::T => 4,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Dimension::X => "X",
            Dimension::Y => "Y",
            Dimension::Z => "Z",
            Dimension::C => "C",
            Dimension::T => "T",
        };
        f.write_str(letter)
    }
}

/// A component-wise {X,Y,Z,C,T} -> u64 mapping.
///
/// Used both as a size (voxel counts, block counts) and as an index (block
/// coordinates, per-axis offsets) — the operations are the same either way,
/// matching how the original source reuses one vector type for both.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
pub struct Index5D {
    values: [u64; 5],
}

pub type Size5D = Index5D;

impl Index5D {
    pub const ZERO: Index5D = Index5D { values: [0; 5] };
    pub const ONE: Index5D = Index5D { values: [1; 5] };

    pub fn new(x: u64, y: u64, z: u64, c: u64, t: u64) -> Self {
        Self { values: [x, y, z, c, t] }
    }

    pub fn splat(value: u64) -> Self {
        Self { values: [value; 5] }
    }

    pub fn from_fn(mut f: impl FnMut(Dimension) -> u64) -> Self {
        let mut values = [0; 5];
        for dimension in Dimension::ALL {
            values[dimension.slot()] = f(dimension);
        }
        Self { values }
    }

    pub fn x(&self) -> u64 { self[Dimension::X] }
    pub fn y(&self) -> u64 { self[Dimension::Y] }
    pub fn z(&self) -> u64 { self[Dimension::Z] }
    pub fn c(&self) -> u64 { self[Dimension::C] }
    pub fn t(&self) -> u64 { self[Dimension::T] }

    /// Total number of elements described by this size (product of all axes).
    pub fn product(&self) -> u64 {
        self.values.iter().product()
    }

    pub fn component_wise(self, other: Self, mut f: impl FnMut(u64, u64) -> u64) -> Self {
        Self::from_fn(|d| f(self[d], other[d]))
    }

    /// `ceil(self / block_size)` per axis — the block-count formula used by
    /// both the reader's `number_of_blocks()` and the writer's
    /// `WriterBlockGrid`.
    pub fn ceil_div(self, block_size: Self) -> Self {
        self.component_wise(block_size, |size, block| {
            if block == 0 { 0 } else { size.div_ceil(block) }
        })
    }

    pub fn min(self, other: Self) -> Self {
        self.component_wise(other, u64::min)
    }

    pub fn max(self, other: Self) -> Self {
        self.component_wise(other, u64::max)
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        self.component_wise(other, u64::saturating_sub)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Dimension, u64)> + '_ {
        Dimension::ALL.into_iter().map(move |d| (d, self[d]))
    }

    /// True if every axis is strictly positive, except Z which may be 1 but
    /// must still be positive (spec.md §4.1: "sizes strictly positive except
    /// Z (>=1)" — Z=0 is never valid either, only Z=1 is the floor).
    pub fn is_valid_source_size(&self) -> bool {
        self.values.iter().all(|&value| value > 0)
    }
}

impl Index<Dimension> for Index5D {
    type Output = u64;
    fn index(&self, dimension: Dimension) -> &u64 {
        &self.values[dimension.slot()]
    }
}

impl IndexMut<Dimension> for Index5D {
    fn index_mut(&mut self, dimension: Dimension) -> &mut u64 {
        &mut self.values[dimension.slot()]
    }
}

/// A permutation of the five axes describing how a flat block buffer's
/// indices increment — the first entry varies fastest.
///
/// spec.md §3: "X and Y always exist before C in the writer's order;
/// interleaved sources may place C first in the reader order."
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct DimensionSequence {
    order: [Dimension; 5],
}

impl DimensionSequence {
    /// The writer's canonical order: X, Y, Z, C, T (X fastest).
    pub const WRITER_NATIVE: DimensionSequence = DimensionSequence {
        order: [Dimension::X, Dimension::Y, Dimension::Z, Dimension::C, Dimension::T],
    };

    /// A common interleaved-reader order: C varies fastest (pixel-interleaved
    /// RGB), then X, Y, Z, T.
    pub const CHANNEL_INTERLEAVED: DimensionSequence = DimensionSequence {
        order: [Dimension::C, Dimension::X, Dimension::Y, Dimension::Z, Dimension::T],
    };

    /// Validates that `order` is a permutation of all five axes and builds a
    /// sequence from it. Used by reader adapters reporting their native
    /// order; rejects anything but a true permutation.
    pub fn new(order: [Dimension; 5]) -> Option<Self> {
        let mut seen = [false; 5];
        for dimension in order {
            let slot = Dimension::ALL.iter().position(|d| *d == dimension).unwrap();
            if seen[slot] {
                return None;
            }
            seen[slot] = true;
        }
        Some(Self { order })
    }

    /// The dimension that varies fastest (position 0, "dim_nr" 0 in
    /// spec.md §4.2's block-copy algorithm).
    pub fn fastest(&self) -> Dimension { self.order[0] }

    /// 0-based position of `dimension` within this sequence (its "dim_nr").
    pub fn position_of(&self, dimension: Dimension) -> usize {
        self.order.iter().position(|d| *d == dimension).unwrap()
    }

    pub fn order(&self) -> [Dimension; 5] { self.order }

    /// The flat-buffer stride (in elements) of `dimension`, given the sizes
    /// of all five axes in this sequence's own order — i.e. the product of
    /// the sizes of every dimension that varies faster.
    pub fn stride_of(&self, dimension: Dimension, sizes: Index5D) -> u64 {
        let position = self.position_of(dimension);
        self.order[..position].iter().map(|d| sizes[*d]).product()
    }
}

impl Default for DimensionSequence {
    fn default() -> Self { Self::WRITER_NATIVE }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ceil_div_rounds_up_partial_blocks() {
        let size = Index5D::new(10, 10, 1, 1, 1);
        let block = Index5D::new(4, 4, 1, 1, 1);
        assert_eq!(size.ceil_div(block), Index5D::new(3, 3, 1, 1, 1));
    }

    #[test]
    fn product_multiplies_all_axes() {
        assert_eq!(Index5D::new(2, 3, 4, 1, 1).product(), 24);
    }

    #[test]
    fn rejects_non_permutation() {
        use Dimension::*;
        assert!(DimensionSequence::new([X, X, Y, Z, C]).is_none());
        assert!(DimensionSequence::new([X, Y, Z, C, T]).is_some());
    }

    #[test]
    fn stride_reflects_fastest_first() {
        let sequence = DimensionSequence::WRITER_NATIVE;
        let sizes = Index5D::new(4, 5, 6, 1, 1);
        assert_eq!(sequence.stride_of(Dimension::X, sizes), 1);
        assert_eq!(sequence.stride_of(Dimension::Y, sizes), 4);
        assert_eq!(sequence.stride_of(Dimension::Z, sizes), 20);
    }

    #[test]
    fn channel_interleaved_places_c_first() {
        assert_eq!(DimensionSequence::CHANNEL_INTERLEAVED.fastest(), Dimension::C);
        assert_eq!(DimensionSequence::CHANNEL_INTERLEAVED.position_of(Dimension::X), 1);
    }
}
