//! Webcam frame capture with per-frame analysis and first-frame snapshots.
//!
//! A [`CaptureSession`] binds a camera from a [`DeviceDirectory`], connects it
//! through a [`FrameCallback`] into a null terminal and runs the resulting
//! [`Engine`]. The callback counts frames, measures brightness, contrast and
//! motion, and can save the first frame of each run as a BMP file.

pub mod analysis;
pub mod bmp;
pub mod callback;
pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod platform;
pub mod session;
pub mod stream;
pub mod subsystem;
pub mod types;

// Re-exports
pub use analysis::FrameStats;
pub use bmp::{CapturedImage, DimensionSource};
pub use callback::{CallbackOptions, FrameAction, FrameCallback, FrameStatistics};
pub use config::{ReportCadence, SessionConfig};
pub use device::*;
pub use error::*;
pub use frame::*;
pub use session::CaptureSession;
pub use stream::*;
pub use subsystem::{MediaRuntime, NoopRuntime, Subsystem, SubsystemHandle};
pub use types::*;
