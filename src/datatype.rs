//! Voxel data types. See spec.md §3 "DataType".

use crate::error::{Error, Result};

/// The four voxel data types the pipeline operates on internally.
///
/// spec.md §3: "Signed integer sources map to u8/u16 with negatives clamped
/// to 0; 32-bit integer sources widen to f32. Other types are an error."
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum DataType {
    U8,
    U16,
    U32,
    F32,
}

impl DataType {
    /// Size in bytes of one voxel sample of this type.
    pub fn byte_size(self) -> usize {
        match self {
            DataType::U8 => 1,
            DataType::U16 => 2,
            DataType::U32 => 4,
            DataType::F32 => 4,
        }
    }

    /// Reads the element at `index` out of a raw byte buffer of this data
    /// type, widened to `f64` for histogram/downsample arithmetic. Bytes are
    /// native-endian — the on-disk byte order is the writer contract's
    /// concern, out of scope here (spec.md §1).
    pub fn read_sample(self, bytes: &[u8], index: usize) -> f64 {
        let size = self.byte_size();
        let start = index * size;
        let slice = &bytes[start..start + size];
        match self {
            DataType::U8 => slice[0] as f64,
            DataType::U16 => u16::from_ne_bytes(slice.try_into().unwrap()) as f64,
            DataType::U32 => u32::from_ne_bytes(slice.try_into().unwrap()) as f64,
            DataType::F32 => f32::from_ne_bytes(slice.try_into().unwrap()) as f64,
        }
    }

    /// Inverse of [`DataType::read_sample`].
    pub fn write_sample(self, bytes: &mut [u8], index: usize, value: f64) {
        let size = self.byte_size();
        let start = index * size;
        let slice = &mut bytes[start..start + size];
        match self {
            DataType::U8 => slice[0] = value.round().clamp(0.0, u8::MAX as f64) as u8,
            DataType::U16 => slice.copy_from_slice(&(value.round().clamp(0.0, u16::MAX as f64) as u16).to_ne_bytes()),
            DataType::U32 => slice.copy_from_slice(&(value.round().clamp(0.0, u32::MAX as f64) as u32).to_ne_bytes()),
            DataType::F32 => slice.copy_from_slice(&(value as f32).to_ne_bytes()),
        }
    }

    /// Number of histogram bins this data type uses: 256 for u8, 4096 for
    /// everything else, per spec.md §3 "Histogram".
    pub fn histogram_bin_count(self) -> usize {
        match self {
            DataType::U8 => 256,
            DataType::U16 | DataType::U32 | DataType::F32 => 4096,
        }
    }
}

/// A source's native sample representation, as reported by a reader before
/// any widening. Maps onto a [`DataType`] via [`SourceSampleKind::widen`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum SourceSampleKind {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
}

impl SourceSampleKind {
    /// Widens a native reader sample kind into one of the four types this
    /// pipeline stores voxels as.
    ///
    /// Signed 8/16-bit integers map onto their unsigned counterpart (with
    /// negative values clamped to zero at copy time, not here); 32-bit
    /// integers (signed or not) widen to f32 because no integer histogram
    /// path covers the full u32 domain economically. Anything else
    /// (e.g. a reader claiming 64-bit or complex samples) is rejected with
    /// `UnsupportedDataType`, matching spec.md §3's "other types are an
    /// error".
    pub fn widen(self) -> Result<DataType> {
        match self {
            SourceSampleKind::U8 | SourceSampleKind::I8 => Ok(DataType::U8),
            SourceSampleKind::U16 | SourceSampleKind::I16 => Ok(DataType::U16),
            SourceSampleKind::U32 | SourceSampleKind::I32 => Ok(DataType::F32),
            SourceSampleKind::F32 => Ok(DataType::F32),
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, SourceSampleKind::I8 | SourceSampleKind::I16 | SourceSampleKind::I32)
    }
}

/// A single voxel value, tagged with its runtime [`DataType`].
///
/// Kept as an enum (rather than a generic `T`) so the remapper and engine can
/// store heterogeneous per-channel buffers without monomorphizing the whole
/// pipeline per data type, matching the teacher's preference for small
/// closed enums over generics at module boundaries (e.g. `SampleType` in
/// `exr::meta::attribute`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    U8(u8),
    U16(u16),
    U32(u32),
    F32(f32),
}

impl Sample {
    pub fn data_type(&self) -> DataType {
        match self {
            Sample::U8(_) => DataType::U8,
            Sample::U16(_) => DataType::U16,
            Sample::U32(_) => DataType::U32,
            Sample::F32(_) => DataType::F32,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Sample::U8(value) => value as f64,
            Sample::U16(value) => value as f64,
            Sample::U32(value) => value as f64,
            Sample::F32(value) => value as f64,
        }
    }

    /// Converts a widened native value, clamping signed negatives to zero
    /// for integer widenings (spec.md §3).
    pub fn from_i64(value: i64, data_type: DataType) -> Result<Self> {
        match data_type {
            DataType::U8 => Ok(Sample::U8(value.max(0).min(u8::MAX as i64) as u8)),
            DataType::U16 => Ok(Sample::U16(value.max(0).min(u16::MAX as i64) as u16)),
            DataType::U32 => Ok(Sample::U32(value.max(0) as u32)),
            DataType::F32 => Err(Error::config("integer sample cannot populate an f32 channel directly")),
        }
    }
}
