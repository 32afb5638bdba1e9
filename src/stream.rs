use crate::callback::FrameCallback;
use crate::device::DeviceDirectory;
use crate::error::PlatformError;
use crate::types::{EngineState, StreamConfig};

/// Stage that consumes samples after the callback has seen them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Terminal {
    /// Discard samples without rendering.
    #[default]
    Null,
}

/// Wires a device, the frame callback and a terminal into a runnable graph.
pub trait PipelineBuilder: DeviceDirectory {
    type Engine: Engine;

    /// Connect `device` → `callback` → `terminal`.
    ///
    /// The returned engine keeps its own counted reference to `callback`
    /// for as long as it may deliver frames. A graph with no way to link
    /// the stages fails with [`PlatformError::NoConnectionPath`].
    fn connect(
        &mut self,
        device: &Self::Device,
        format: Option<&StreamConfig>,
        callback: FrameCallback,
        terminal: Terminal,
    ) -> Result<Self::Engine, PlatformError>;
}

/// Run control of a connected graph.
///
/// Frames are delivered on an engine-owned thread between `run` and `stop`.
/// Each call may block until the engine settles, bounded by the engine's own
/// timeout.
pub trait Engine {
    fn run(&mut self) -> Result<(), PlatformError>;
    fn stop(&mut self) -> Result<(), PlatformError>;
    fn pause(&mut self) -> Result<(), PlatformError>;
    fn state(&self) -> Result<EngineState, PlatformError>;
}
