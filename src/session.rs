//! Capture session lifecycle.
//!
//! A [`CaptureSession`] owns the device binding, the connected graph and the
//! session's reference to the frame callback. Its public state moves
//! `Idle → Built → Running ⇄ Stopped`, and [`teardown`](CaptureSession::teardown)
//! returns it to `Idle` from anywhere.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::callback::{CallbackOptions, FrameCallback};
use crate::config::SessionConfig;
use crate::device::{CaptureDevice, DeviceInfo};
use crate::error::{Error, PlatformError};
use crate::stream::{Engine, PipelineBuilder, Terminal};
use crate::subsystem::{Subsystem, SubsystemHandle};
use crate::types::{CaptureState, EngineState, FormatDescriptor, StreamConfig};

pub struct CaptureSession<B: PipelineBuilder> {
    backend: B,
    subsystem: Arc<Subsystem>,
    handle: Option<SubsystemHandle>,
    config: SessionConfig,
    state: CaptureState,
    device: Option<B::Device>,
    device_info: Option<DeviceInfo>,
    format: Option<StreamConfig>,
    callback: Option<FrameCallback>,
    engine: Option<B::Engine>,
}

impl<B: PipelineBuilder> CaptureSession<B> {
    pub fn new(backend: B, subsystem: Arc<Subsystem>, config: SessionConfig) -> Self {
        let format = config.format.clone();
        CaptureSession {
            backend,
            subsystem,
            handle: None,
            config,
            state: CaptureState::Idle,
            device: None,
            device_info: None,
            format,
            callback: None,
            engine: None,
        }
    }

    /// Acquire the media subsystem. Calling it again is a no-op.
    pub fn initialize(&mut self) -> Result<(), Error> {
        if self.handle.is_some() {
            return Ok(());
        }
        let handle = self.subsystem.acquire().map_err(|e| {
            error!(error = %e, "media subsystem startup failed");
            Error::Init(e)
        })?;
        self.handle = Some(handle);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_capturing(&self) -> bool {
        self.state == CaptureState::Running
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Enumerate attached cameras.
    ///
    /// No cameras is not an error: the list is empty and a warning is logged.
    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>, Error> {
        self.require_initialized()?;
        let devices = self.backend.list_devices().map_err(|e| {
            error!(error = %e, "device enumeration failed");
            Error::Enumeration(e)
        })?;
        if devices.is_empty() {
            warn!("no capture devices found");
        }
        for device in &devices {
            debug!(index = device.index, name = %device.name, "capture device");
        }
        Ok(devices)
    }

    /// Bind the camera at `index` in the current enumeration order.
    pub fn select_device(&mut self, index: usize) -> Result<&DeviceInfo, Error> {
        self.require_state("select a device", CaptureState::Idle)?;
        let info = self
            .list_devices()?
            .into_iter()
            .find(|d| d.index == index)
            .ok_or_else(|| Error::DeviceNotFound(format!("#{index}")))?;
        self.bind(info)
    }

    /// Bind the first camera whose friendly name equals `name`.
    pub fn select_device_by_name(&mut self, name: &str) -> Result<&DeviceInfo, Error> {
        self.require_state("select a device", CaptureState::Idle)?;
        let info = self
            .list_devices()?
            .into_iter()
            .find(|d| d.name == name)
            .ok_or_else(|| Error::DeviceNotFound(name.to_owned()))?;
        self.bind(info)
    }

    fn bind(&mut self, info: DeviceInfo) -> Result<&DeviceInfo, Error> {
        let device = self.backend.bind_device(&info.id).map_err(|e| match e {
            PlatformError::NotFound => Error::DeviceNotFound(info.name.clone()),
            other => Error::Enumeration(other),
        })?;
        info!(index = info.index, name = %info.name, "capture device selected");
        self.device = Some(device);
        Ok(&*self.device_info.insert(info))
    }

    pub fn selected_device(&self) -> Option<&DeviceInfo> {
        self.device_info.as_ref()
    }

    /// Formats the selected camera can deliver.
    pub fn capabilities(&self) -> Result<Vec<FormatDescriptor>, Error> {
        let device = self.device.as_ref().ok_or(Error::NoDeviceSelected)?;
        device.supported_formats().map_err(Error::Enumeration)
    }

    /// Request `format` for the next graph build.
    pub fn set_format(&mut self, format: StreamConfig) -> Result<(), Error> {
        self.require_state("change the format", CaptureState::Idle)?;
        if !self.capabilities()?.iter().any(|d| d.supports(&format)) {
            return Err(Error::UnsupportedFormat);
        }
        debug!(
            pixel_format = %format.pixel_format,
            size = %format.size,
            fps = format.frame_rate.as_f64(),
            "capture format set"
        );
        self.format = Some(format);
        Ok(())
    }

    pub fn current_format(&self) -> Option<&StreamConfig> {
        self.format.as_ref()
    }

    /// Install the callback the next graph will deliver frames to.
    pub fn set_callback(&mut self, callback: FrameCallback) -> Result<(), Error> {
        self.require_state("replace the callback", CaptureState::Idle)?;
        if let Some(previous) = self.callback.replace(callback) {
            previous.release();
        }
        Ok(())
    }

    pub fn callback(&self) -> Option<&FrameCallback> {
        self.callback.as_ref()
    }

    /// Connect the selected device through the frame callback into a null
    /// terminal.
    pub fn build_graph(&mut self) -> Result<(), Error> {
        self.require_initialized()?;
        self.require_state("build the graph", CaptureState::Idle)?;

        if self.device.is_none() {
            if !self.config.auto_select_device {
                return Err(Error::NoDeviceSelected);
            }
            self.select_device(0).map_err(|e| match e {
                Error::DeviceNotFound(_) => Error::NoDeviceSelected,
                other => other,
            })?;
        }
        let Some(device) = self.device.as_ref() else {
            return Err(Error::NoDeviceSelected);
        };

        let config = &self.config;
        let callback = self.callback.get_or_insert_with(|| {
            FrameCallback::with_options(config.frame_action(), CallbackOptions::from(config))
        });
        // Frames are only accepted once the graph is running.
        callback.end_run();

        let engine = self
            .backend
            .connect(device, self.format.as_ref(), callback.add_ref(), Terminal::Null)
            .map_err(|e| {
                error!(error = %e, "graph build failed");
                Error::GraphBuild(e)
            })?;

        self.engine = Some(engine);
        self.state = CaptureState::Built;
        info!(device = ?self.device_info.as_ref().map(|d| &d.name), "capture graph built");
        Ok(())
    }

    /// Run the graph. Statistics restart with each run.
    pub fn start_capture(&mut self) -> Result<(), Error> {
        match self.state {
            CaptureState::Running => return Ok(()),
            CaptureState::Idle => {
                return Err(Error::InvalidState {
                    operation: "start capture",
                    state: self.state,
                });
            }
            CaptureState::Built | CaptureState::Stopped => {}
        }
        let (Some(engine), Some(callback)) = (self.engine.as_mut(), self.callback.as_ref()) else {
            return Err(Error::InvalidState {
                operation: "start capture",
                state: self.state,
            });
        };

        engine.run().map_err(|e| {
            error!(error = %e, "failed to start capture");
            Error::Start(e)
        })?;
        callback.begin_run();
        self.state = CaptureState::Running;
        info!("capture started");
        Ok(())
    }

    /// Stop delivering frames.
    ///
    /// The session ends up `Stopped` even when the engine reports a failure;
    /// the failure is still returned.
    pub fn stop_capture(&mut self) -> Result<(), Error> {
        match self.state {
            CaptureState::Running => {}
            CaptureState::Built | CaptureState::Stopped => return Ok(()),
            CaptureState::Idle => {
                return Err(Error::InvalidState {
                    operation: "stop capture",
                    state: self.state,
                });
            }
        }
        if let Some(callback) = &self.callback {
            callback.end_run();
        }
        let result = match self.engine.as_mut() {
            Some(engine) => engine.stop(),
            None => Ok(()),
        };
        self.state = CaptureState::Stopped;
        match result {
            Ok(()) => {
                info!(frames = self.frame_count(), "capture stopped");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "engine failed to stop; session marked stopped");
                Err(Error::Stop(e))
            }
        }
    }

    /// Pause the engine. Frames stop arriving but the session stays
    /// `Running`, so [`start_capture`](Self::start_capture) alone is a no-op.
    /// Resuming takes [`stop_capture`](Self::stop_capture) followed by
    /// `start_capture`, which restarts the statistics.
    pub fn pause_capture(&mut self) -> Result<(), Error> {
        let engine = self.engine.as_mut().ok_or(Error::InvalidState {
            operation: "pause capture",
            state: self.state,
        })?;
        engine.pause().map_err(Error::Engine)
    }

    /// State the engine itself reports.
    pub fn engine_state(&self) -> Result<EngineState, Error> {
        match &self.engine {
            Some(engine) => engine.state().map_err(Error::Engine),
            None => Ok(EngineState::Stopped),
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.callback.as_ref().map_or(0, FrameCallback::frame_count)
    }

    pub fn average_fps(&self) -> f64 {
        self.callback.as_ref().map_or(0.0, FrameCallback::average_fps)
    }

    /// Release everything the session holds and return to `Idle`.
    ///
    /// Safe from any state and safe to repeat.
    pub fn teardown(&mut self) {
        if self.state == CaptureState::Running {
            if let Err(e) = self.stop_capture() {
                warn!(error = %e, "stop during teardown failed");
            }
        }
        // Dropping the engine releases its hold on the callback.
        self.engine = None;
        if let Some(callback) = self.callback.take() {
            let remaining = callback.release();
            debug!(remaining, "session callback released");
        }
        self.device = None;
        self.device_info = None;
        self.handle = None;
        if self.state != CaptureState::Idle {
            info!("capture session torn down");
        }
        self.state = CaptureState::Idle;
    }

    fn require_initialized(&self) -> Result<(), Error> {
        if self.handle.is_some() {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    fn require_state(&self, operation: &'static str, expected: CaptureState) -> Result<(), Error> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidState {
                operation,
                state: self.state,
            })
        }
    }
}

impl<B: PipelineBuilder> Drop for CaptureSession<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}
