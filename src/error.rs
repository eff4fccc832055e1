//! Typed errors for the engine's public API surface.

use std::fmt;
use std::io;

/// Error codes returned by the engine's operational API.
///
/// There is no `Ok` variant: success is plain `Result::Ok(T)`.
#[derive(Debug)]
pub enum EngineError {
    /// `init` called on an already-initialized engine.
    AlreadyInited,
    /// An operation requiring `init` was called before it.
    NotInited,
    /// Allocation failed (sample store, buffers).
    NoMemory,
    /// No free sample or channel handle was available.
    NoHandles,
    /// The audio device could not be opened.
    OpenDevice,
    /// Querying device capabilities failed.
    OpenCaps,
    /// None of the preferred formats were accepted by the device.
    OpenFormat,
    /// The periodic timer could not be started.
    NoTimer,
    /// A caller-supplied parameter was out of range.
    BadParam,
    /// A MOD file could not be opened.
    OpenFile(io::Error),
    /// A MOD file could not be fully read.
    ReadFile(io::Error),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::AlreadyInited => write!(f, "engine is already initialized"),
            EngineError::NotInited => write!(f, "engine is not initialized"),
            EngineError::NoMemory => write!(f, "allocation failed"),
            EngineError::NoHandles => write!(f, "no free handle available"),
            EngineError::OpenDevice => write!(f, "failed to open audio device"),
            EngineError::OpenCaps => write!(f, "failed to query device capabilities"),
            EngineError::OpenFormat => write!(f, "no acceptable audio format was accepted"),
            EngineError::NoTimer => write!(f, "failed to start timer"),
            EngineError::BadParam => write!(f, "invalid parameter"),
            EngineError::OpenFile(e) => write!(f, "failed to open file: {}", e),
            EngineError::ReadFile(e) => write!(f, "failed to read file: {}", e),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::OpenFile(e) | EngineError::ReadFile(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for EngineError {
    /// Mid-read failures map to `ReadFile`; `OpenFile` is constructed
    /// explicitly at the `File::open` call site, since that is the only
    /// place an open (rather than a read) can fail.
    fn from(e: io::Error) -> Self {
        EngineError::ReadFile(e)
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
