#![warn(
    rust_2018_idioms,
    future_incompatible,
    unused_extern_crates,
    unused,

    missing_copy_implementations,
    missing_debug_implementations,

    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
)]

#![deny(
    unused_variables,
    unused_assignments,
    dead_code,
    unused_must_use,
    trivial_numeric_casts,
    redundant_semicolon
)]

#![forbid(unsafe_code)]

//! Converts scientific 3D/time-lapse microscopy volumes into a
//! multi-resolution, tiled, compressed voxel stream.
//!
//! This crate covers the 5D block-remapping and multi-resolution write
//! pipeline: reading arbitrarily-blocked source volumes
//! ([`reader::BlockReaderAdapter`]), re-tiling them into a writer's own
//! block grid with crop/subsample/flip ([`remapper::BlockRemapper`]),
//! building a resolution pyramid and per-channel histograms
//! ([`engine::MultiResolutionEngine`]), and estimating rolling read/write
//! throughput ([`throughput::ThroughputMonitor`]). Everything downstream of
//! "bytes ready to hand to a writer" — the on-disk container format, vendor
//! source readers, command-line argument parsing, and thumbnail image
//! encoding to an external picture format — is out of scope; see
//! [`writer::Writer`] for the contract a concrete container format
//! implements.

pub mod color;
pub mod convert;
pub mod datatype;
pub mod descriptor;
pub mod dimension;
pub mod engine;
pub mod error;
pub mod extent;
pub mod grid;
pub mod histogram;
pub mod math;
pub mod parameters;
pub mod reader;
pub mod remapper;
pub mod throughput;
pub mod thumbnail;
pub mod time_info;
pub mod writer;

/// Re-exports of the types most callers need to drive one conversion.
pub mod prelude {
    pub use crate::color::{Color, ColorInfo, ColorMode};
    pub use crate::convert::{run_conversion, ConversionReport, ConversionRequest};
    pub use crate::datatype::{DataType, Sample, SourceSampleKind};
    pub use crate::descriptor::SourceDescriptor;
    pub use crate::dimension::{Dimension, DimensionSequence, Index5D, Size5D};
    pub use crate::engine::cancel::CancelToken;
    pub use crate::engine::compression::{Compression, CompressionLevel};
    pub use crate::error::{Error, ExitCode, Result};
    pub use crate::extent::{AxisExtent, Extent, FlippedAxes};
    pub use crate::grid::{DefaultPyramidStrategy, PyramidInput, PyramidLevel, PyramidStrategy, WriterBlockGrid};
    pub use crate::reader::{BlockReadOutcome, BlockReaderAdapter};
    pub use crate::remapper::{BlockRegion, BlockRemapper, RemapConfig, RemapSink};
    pub use crate::throughput::{Direction, ThroughputEstimate, ThroughputMonitor};
    pub use crate::thumbnail::{ThumbnailMode, ThumbnailOptions};
    pub use crate::writer::{Thumbnail, Writer, WriterFactory};
}
