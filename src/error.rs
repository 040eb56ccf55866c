//! Error and result types shared by every module in the pipeline.
//!
//! Mirrors the propagation policy of spec.md §7: per-block reader failures
//! are recovered from (zero-fill, warn, continue) and never reach this type;
//! everything that reaches `Error` is fatal to the whole conversion.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;
pub type UnitResult = Result<()>;

pub use std::io::Error as IoError;

/// Fatal error kinds. Per-block `ReaderIoError` / `ReaderFormatError`
/// conditions are represented as [`crate::reader::BlockReadOutcome`], not
/// as values of this type, since they do not abort the conversion.
#[derive(Debug)]
pub enum Error {
    /// The source reports a data type the pipeline cannot widen into
    /// u8/u16/u32/f32. Fatal; finalization is skipped.
    UnsupportedDataType(String),

    /// A crop, block size, or voxel size combination was invalid, or a
    /// mandatory parameter was missing. Detected by the up-front validation
    /// pass before any worker is spawned.
    Config(String),

    /// The writer contract returned a failure from any of its calls. Workers
    /// are drained; whatever was already written is left on disk.
    Writer(String),

    /// A reader block could not be decoded at all (not a format anomaly) and
    /// surfaced outside the normal per-block recovery path, e.g. during
    /// `describe()` or `set_resolution()`.
    ReaderIo(String),

    /// A reader reported a recoverable structural anomaly outside the
    /// per-block recovery path.
    ReaderFormat(String),

    /// Wraps a lower-level I/O failure (e.g. while the writer contract is
    /// backed by a real file).
    Io(IoError),
}

impl Error {
    pub fn unsupported_data_type(message: impl Into<String>) -> Self {
        Error::UnsupportedDataType(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    pub fn writer(message: impl Into<String>) -> Self {
        Error::Writer(message.into())
    }
}

/// Required by spec.md §7: "a single human-readable error line per fatal
/// failure". The top-level `execute()` analogue prints this and chooses the
/// matching exit code.
impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnsupportedDataType(message) => write!(f, "unsupported data type: {message}"),
            Error::Config(message) => write!(f, "invalid configuration: {message}"),
            Error::Writer(message) => write!(f, "writer error: {message}"),
            Error::ReaderIo(message) => write!(f, "reader I/O error: {message}"),
            Error::ReaderFormat(message) => write!(f, "reader format error: {message}"),
            Error::Io(error) => write!(f, "I/O error: {error}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<IoError> for Error {
    fn from(error: IoError) -> Self {
        Error::Io(error)
    }
}

/// Exit codes as specified in spec.md §6, kept here so both a would-be CLI
/// front-end and tests agree on the mapping.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    InvalidArguments = 2,
    UnknownFileType = 3,
    AbnormalTermination = 4,
    Timeout = 99,
}

impl Error {
    /// The exit code a top-level caller should use for this fatal error.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Error::Config(_) => ExitCode::InvalidArguments,
            Error::UnsupportedDataType(_) => ExitCode::UnknownFileType,
            _ => ExitCode::AbnormalTermination,
        }
    }
}
