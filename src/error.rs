use std::time::Duration;

use thiserror::Error;

use crate::types::{CaptureState, Guid};

/// Failure reported by an external collaborator (device directory, pipeline
/// builder, engine or media runtime).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PlatformError {
    #[error("{0}")]
    Message(String),
    #[error("device not found")]
    NotFound,
    #[error("no compatible connection path")]
    NoConnectionPath,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PlatformError {
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }
}

/// Failure to turn a frame into a bitmap file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EncodeError {
    #[error("frame holds no complete pixel")]
    EmptyFrame,
    #[error("{width}x{height} needs {required} bytes, frame has {available}")]
    DimensionMismatch {
        width: u32,
        height: u32,
        required: u64,
        available: usize,
    },
    #[error("{width}x{height} exceeds the bitmap size limit")]
    TooLarge {
        width: u32,
        height: u32,
    },
    #[error("cannot write image: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level crate error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("media subsystem unavailable: {0}")]
    Init(#[source] PlatformError),
    #[error("session not initialized")]
    NotInitialized,
    #[error("device enumeration failed: {0}")]
    Enumeration(#[source] PlatformError),
    #[error("no such device: {0}")]
    DeviceNotFound(String),
    #[error("no capture device selected")]
    NoDeviceSelected,
    #[error("unsupported format")]
    UnsupportedFormat,
    #[error("graph build failed: {0}")]
    GraphBuild(#[source] PlatformError),
    #[error("failed to start capture: {0}")]
    Start(#[source] PlatformError),
    #[error("failed to stop capture: {0}")]
    Stop(#[source] PlatformError),
    #[error("engine error: {0}")]
    Engine(#[source] PlatformError),
    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: CaptureState,
    },
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("interface {0} not supported")]
    NotSupported(Guid),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
    #[error("cannot read configuration: {0}")]
    ConfigIo(#[source] std::io::Error),
}
