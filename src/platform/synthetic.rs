//! In-process capture backend that renders a moving test pattern.
//!
//! Each connected graph owns a producer thread that calls the frame callback
//! at the negotiated rate with a 24-bit BGR frame, the same layout a webcam
//! delivers through a sample grabber.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::callback::FrameCallback;
use crate::device::{CaptureDevice, DeviceDirectory, DeviceInfo};
use crate::error::PlatformError;
use crate::frame::{BYTES_PER_PIXEL, PixelBuffer};
use crate::stream::{Engine, PipelineBuilder, Terminal};
use crate::types::{
    EngineState, FormatDescriptor, FrameRateRange, PixelFormat, Ratio, Size, StreamConfig,
};

const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// A device listed by [`SyntheticBackend`].
#[derive(Debug, Clone)]
pub struct SyntheticDevice {
    id: String,
    name: String,
    formats: Vec<FormatDescriptor>,
}

impl CaptureDevice for SyntheticDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supported_formats(&self) -> Result<Vec<FormatDescriptor>, PlatformError> {
        Ok(self.formats.clone())
    }
}

/// Directory and pipeline builder for synthetic cameras.
#[derive(Debug, Clone)]
pub struct SyntheticBackend {
    devices: Vec<(String, String)>,
    size: Size,
    frame_rate: Ratio,
    stop_timeout: Duration,
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticBackend {
    /// One 320x240 RGB24 camera at 30 fps.
    pub fn new() -> Self {
        SyntheticBackend {
            devices: vec![("synthetic:0".into(), "Synthetic Camera".into())],
            size: Size::new(320, 240),
            frame_rate: Ratio::from_f64(30.0),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// A backend that lists no cameras.
    pub fn empty() -> Self {
        SyntheticBackend {
            devices: Vec::new(),
            ..Self::new()
        }
    }

    pub fn with_device(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.devices.push((id.into(), name.into()));
        self
    }

    pub fn with_size(mut self, size: Size) -> Self {
        self.size = size;
        self
    }

    pub fn with_frame_rate(mut self, frame_rate: Ratio) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    /// Format used when the session does not request one.
    pub fn default_format(&self) -> StreamConfig {
        StreamConfig {
            pixel_format: PixelFormat::Rgb24,
            size: self.size,
            frame_rate: self.frame_rate,
        }
    }

    fn formats(&self) -> Vec<FormatDescriptor> {
        let range = FrameRateRange {
            min: Ratio::from_f64(1.0),
            max: self.frame_rate,
        };
        [PixelFormat::Rgb24, PixelFormat::Yuy2]
            .into_iter()
            .flat_map(|pf| FormatDescriptor::from_ranges(pf, self.size, [range]))
            .collect()
    }
}

impl DeviceDirectory for SyntheticBackend {
    type Device = SyntheticDevice;

    fn list_devices(&self) -> Result<Vec<DeviceInfo>, PlatformError> {
        Ok(self
            .devices
            .iter()
            .enumerate()
            .map(|(index, (id, name))| DeviceInfo {
                index,
                id: id.clone(),
                name: name.clone(),
            })
            .collect())
    }

    fn bind_device(&self, id: &str) -> Result<SyntheticDevice, PlatformError> {
        let (id, name) = self
            .devices
            .iter()
            .find(|(candidate, _)| candidate == id)
            .ok_or(PlatformError::NotFound)?;
        Ok(SyntheticDevice {
            id: id.clone(),
            name: name.clone(),
            formats: self.formats(),
        })
    }
}

impl PipelineBuilder for SyntheticBackend {
    type Engine = SyntheticEngine;

    fn connect(
        &mut self,
        device: &SyntheticDevice,
        format: Option<&StreamConfig>,
        callback: FrameCallback,
        terminal: Terminal,
    ) -> Result<SyntheticEngine, PlatformError> {
        let format = format.cloned().unwrap_or_else(|| self.default_format());
        // The grabber stage only accepts 24-bit RGB samples.
        if format.pixel_format != PixelFormat::Rgb24
            || format.size.pixel_count() == 0
            || !device.formats.iter().any(|f| f.supports(&format))
        {
            return Err(PlatformError::NoConnectionPath);
        }
        debug!(
            device = %device.name,
            size = %format.size,
            fps = format.frame_rate.as_f64(),
            ?terminal,
            "synthetic graph connected"
        );
        Ok(SyntheticEngine {
            callback,
            format,
            worker: None,
            state: EngineState::Stopped,
            stop_timeout: self.stop_timeout,
            delivered: Arc::new(AtomicU64::new(0)),
        })
    }
}

struct Worker {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Run control of a synthetic graph.
pub struct SyntheticEngine {
    callback: FrameCallback,
    format: StreamConfig,
    worker: Option<Worker>,
    state: EngineState,
    stop_timeout: Duration,
    delivered: Arc<AtomicU64>,
}

impl SyntheticEngine {
    /// Frames handed to the callback since the graph was connected.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn format(&self) -> &StreamConfig {
        &self.format
    }

    fn spawn(&mut self) -> Result<(), PlatformError> {
        let running = Arc::new(AtomicBool::new(true));
        let producer = Producer {
            callback: self.callback.add_ref(),
            size: self.format.size,
            interval: frame_interval(self.format.frame_rate),
            running: running.clone(),
            delivered: self.delivered.clone(),
        };
        let handle = thread::Builder::new()
            .name("synthetic-capture".into())
            .spawn(move || producer.run())?;
        self.worker = Some(Worker { running, handle });
        Ok(())
    }

    /// Stop the producer thread, waiting up to the stop timeout.
    fn halt(&mut self) -> Result<(), PlatformError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        worker.running.store(false, Ordering::Release);
        let deadline = Instant::now() + self.stop_timeout;
        while !worker.handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("synthetic producer did not stop in time; detaching");
                return Err(PlatformError::Timeout(self.stop_timeout));
            }
            thread::sleep(Duration::from_millis(1));
        }
        if worker.handle.join().is_err() {
            return Err(PlatformError::message("synthetic producer panicked"));
        }
        Ok(())
    }
}

impl Engine for SyntheticEngine {
    fn run(&mut self) -> Result<(), PlatformError> {
        if self.state == EngineState::Running {
            return Ok(());
        }
        self.spawn()?;
        self.state = EngineState::Running;
        info!(size = %self.format.size, "synthetic engine running");
        Ok(())
    }

    fn stop(&mut self) -> Result<(), PlatformError> {
        let result = self.halt();
        self.state = EngineState::Stopped;
        result
    }

    fn pause(&mut self) -> Result<(), PlatformError> {
        let result = self.halt();
        self.state = EngineState::Paused;
        result
    }

    fn state(&self) -> Result<EngineState, PlatformError> {
        Ok(self.state)
    }
}

impl Drop for SyntheticEngine {
    fn drop(&mut self) {
        if let Err(e) = self.halt() {
            warn!(error = %e, "synthetic engine teardown");
        }
    }
}

fn frame_interval(rate: Ratio) -> Duration {
    let fps = rate.as_f64();
    if fps > 0.0 {
        Duration::from_secs_f64(1.0 / fps)
    } else {
        Duration::from_millis(33)
    }
}

struct Producer {
    callback: FrameCallback,
    size: Size,
    interval: Duration,
    running: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
}

impl Producer {
    fn run(self) {
        let (w, h) = (self.size.width as usize, self.size.height as usize);
        let mut data = vec![0u8; w * h * BYTES_PER_PIXEL];
        let started = Instant::now();
        let mut next = started;
        let mut tick = 0u64;

        while self.running.load(Ordering::Acquire) {
            render_pattern(&mut data, w, h, tick);
            let buffer = PixelBuffer::from_sample_time(&data, started.elapsed().as_secs_f64())
                .with_size(self.size);
            self.callback.on_buffer(&buffer);
            self.delivered.fetch_add(1, Ordering::Relaxed);
            tick += 1;

            next += self.interval;
            let now = Instant::now();
            if next > now {
                thread::sleep(next - now);
            } else {
                next = now;
            }
        }
    }
}

/// Diagonal bands drifting by four pixels per tick, stored as BGR.
fn render_pattern(data: &mut [u8], w: usize, h: usize, tick: u64) {
    if w == 0 || h == 0 {
        return;
    }
    let shift = (tick.wrapping_mul(4) % 256) as usize;
    for (y, row) in data.chunks_exact_mut(w * BYTES_PER_PIXEL).take(h).enumerate() {
        let green = (y * 255 / h) as u8;
        for (x, px) in row.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
            px[0] = ((x + y + shift) % 256) as u8;
            px[1] = green;
            px[2] = (x * 255 / w) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_and_binds_devices() {
        let backend = SyntheticBackend::new().with_device("synthetic:1", "Second Camera");
        let devices = backend.list_devices().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[1].index, 1);
        assert_eq!(devices[1].name, "Second Camera");

        let device = backend.bind_device("synthetic:1").unwrap();
        assert_eq!(device.name(), "Second Camera");
        assert!(matches!(
            backend.bind_device("nope"),
            Err(PlatformError::NotFound)
        ));
    }

    #[test]
    fn rejects_formats_without_connection_path() {
        let mut backend = SyntheticBackend::new();
        let device = backend.bind_device("synthetic:0").unwrap();
        let mut format = backend.default_format();
        format.pixel_format = PixelFormat::Yuy2;

        let result =
            backend.connect(&device, Some(&format), FrameCallback::default(), Terminal::Null);
        assert!(matches!(result, Err(PlatformError::NoConnectionPath)));
    }

    #[test]
    fn zero_sized_frames_are_rejected() {
        let mut backend = SyntheticBackend::new().with_size(Size::new(0, 240));
        let device = backend.bind_device("synthetic:0").unwrap();
        let result = backend.connect(&device, None, FrameCallback::default(), Terminal::Null);
        assert!(matches!(result, Err(PlatformError::NoConnectionPath)));

        let mut empty = Vec::new();
        render_pattern(&mut empty, 0, 4, 0);
        render_pattern(&mut empty, 4, 0, 7);
        assert!(empty.is_empty());
    }

    #[test]
    fn pattern_moves_between_ticks() {
        let (w, h) = (8, 6);
        let mut a = vec![0u8; w * h * 3];
        let mut b = a.clone();
        render_pattern(&mut a, w, h, 0);
        render_pattern(&mut b, w, h, 1);
        assert_ne!(a, b);
        assert_eq!(a[0], 0);
        assert_eq!(b[0], 4);
    }

    #[test]
    fn engine_delivers_frames_until_stopped() {
        let mut backend = SyntheticBackend::new()
            .with_size(Size::new(16, 12))
            .with_frame_rate(Ratio::from_f64(200.0));
        let device = backend.bind_device("synthetic:0").unwrap();
        let callback = FrameCallback::default();
        let mut engine = backend
            .connect(&device, None, callback.add_ref(), Terminal::Null)
            .unwrap();

        engine.run().unwrap();
        assert_eq!(engine.state().unwrap(), EngineState::Running);
        // Engine holds one reference, its producer another.
        assert_eq!(callback.ref_count(), 3);

        let deadline = Instant::now() + Duration::from_secs(5);
        while callback.frame_count() < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        engine.stop().unwrap();
        assert_eq!(engine.state().unwrap(), EngineState::Stopped);

        let delivered = engine.delivered();
        assert!(delivered >= 5);
        assert_eq!(callback.frame_count(), delivered);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(engine.delivered(), delivered);

        drop(engine);
        assert_eq!(callback.ref_count(), 1);
    }
}
