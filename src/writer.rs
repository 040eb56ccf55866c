//! The writer contract. See spec.md §6 "Writer contract" — the on-disk
//! container format itself is out of scope; only the operations the engine
//! invokes on the writer are specified here.

use crate::color::ColorInfo;
use crate::datatype::DataType;
use crate::dimension::Index5D;
use crate::error::Result;
use crate::extent::Extent;
use crate::histogram::Histogram;
use crate::parameters::ParameterSections;
use crate::time_info::TimeInfo;

/// A single centered, square thumbnail bitmap with black letterbox, per
/// spec.md §6 "File formats". Pixel encoding to PNG/JPEG is an external
/// collaborator's job; this crate only produces the RGBA buffer.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub side: u32,
    /// Row-major RGBA bytes, 4 bytes per pixel, `side * side` pixels.
    /// Stored already flipped for bottom-up output, per spec.md §6:
    /// "Pixel rows are flipped vertically on write".
    pub rgba: Vec<u8>,
}

impl Thumbnail {
    pub fn letterbox_side(width: u32, height: u32) -> u32 {
        width.max(height)
    }
}

/// Everything a storage backend must implement to receive output from the
/// engine. Calls may arrive from any worker thread; the engine serializes
/// them by holding a writer mutex during each call (spec.md §6), so
/// implementations need not be internally thread-safe themselves.
pub trait Writer: Send {
    /// Writes one compressed (or raw, at the implementation's discretion)
    /// block's bytes at `block_index` (X,Y,Z only — channel and time are
    /// passed separately since the writer's on-disk layout may group them
    /// differently).
    fn write_data_block(
        &mut self,
        bytes: &[u8],
        block_index_xyz: Index5D,
        time: u32,
        channel: u32,
        resolution: u32,
    ) -> Result<()>;

    fn write_histogram(&mut self, histogram: &Histogram, time: u32, channel: u32, resolution: u32) -> Result<()>;

    fn write_thumbnail(&mut self, thumbnail: &Thumbnail) -> Result<()>;

    fn write_metadata(
        &mut self,
        app_name: &str,
        app_version: &str,
        extent: &Extent,
        parameters: &ParameterSections,
        time_info: &[TimeInfo],
        color_info: &[ColorInfo],
    ) -> Result<()>;
}

/// Factory keyed on a format name, returning owned writers — per spec.md §9
/// "Replace [deep inheritance] with capability sets ... implementations are
/// chosen by a factory keyed on format name, returned as owned objects
/// behind those capability sets."
pub trait WriterFactory {
    fn create(&self, data_type: DataType, size: Index5D) -> Result<Box<dyn Writer>>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use std::collections::BTreeMap;

    /// Records every call made to it, for assertions in remapper/engine
    /// tests (round-trip and idempotence properties in spec.md §8).
    #[derive(Debug, Default)]
    pub struct RecordingWriter {
        pub blocks: BTreeMap<(u32, u32, u32, u32, u32, u32), Vec<u8>>,
        pub histograms: Vec<(u32, u32, u32)>,
        pub thumbnails: usize,
        pub metadata_calls: usize,
    }

    impl Writer for RecordingWriter {
        fn write_data_block(
            &mut self,
            bytes: &[u8],
            block_index_xyz: Index5D,
            time: u32,
            channel: u32,
            resolution: u32,
        ) -> Result<()> {
            self.blocks.insert(
                (
                    resolution,
                    block_index_xyz.x() as u32,
                    block_index_xyz.y() as u32,
                    block_index_xyz.z() as u32,
                    channel,
                    time,
                ),
                bytes.to_vec(),
            );
            Ok(())
        }

        fn write_histogram(&mut self, _histogram: &Histogram, time: u32, channel: u32, resolution: u32) -> Result<()> {
            self.histograms.push((time, channel, resolution));
            Ok(())
        }

        fn write_thumbnail(&mut self, _thumbnail: &Thumbnail) -> Result<()> {
            self.thumbnails += 1;
            Ok(())
        }

        fn write_metadata(
            &mut self,
            _app_name: &str,
            _app_version: &str,
            _extent: &Extent,
            _parameters: &ParameterSections,
            _time_info: &[TimeInfo],
            _color_info: &[ColorInfo],
        ) -> Result<()> {
            self.metadata_calls += 1;
            Ok(())
        }
    }
}
