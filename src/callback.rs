//! The object an engine calls once per delivered frame.
//!
//! A [`FrameCallback`] is a counted handle: the session holds one reference and
//! the engine holds another while it is attached. The shared state behind the
//! handle is destroyed when the last reference goes away, which can only
//! happen after every in-flight [`on_buffer`](FrameCallback::on_buffer) call
//! has returned because each call borrows a live handle.
//!
//! Frame count, timestamps, the run gate, the one-shot snapshot flag and the
//! previous-frame copy used for motion detection all sit behind a single
//! mutex. Delivery takes it twice per frame (before and after the per-frame
//! work) and never while analyzing, encoding or running a custom action.

use core::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::analysis::{self, FrameStats};
use crate::bmp::{self, CapturedImage};
use crate::config::{ReportCadence, SessionConfig};
use crate::error::Error;
use crate::frame::PixelBuffer;
use crate::types::{Guid, Orientation};

pub const IID_UNKNOWN: Guid = Guid(0x00000000_0000_0000_C000_000000000046);
pub const IID_SAMPLE_GRABBER_CB: Guid = Guid(0x0579154A_2B53_4994_B0D0_E773148EFF85);

type CustomAction = Box<dyn FnMut(&PixelBuffer<'_>, &FrameStats) + Send + 'static>;

/// What a callback does with each frame beyond counting and analyzing it.
#[derive(Default)]
pub enum FrameAction {
    /// Analyze only.
    #[default]
    Analyze,
    /// Analyze, and write the first frame of every run to `path`.
    SaveFirstFrame {
        path: PathBuf,
        orientation: Orientation,
    },
    /// Analyze, then hand the raw buffer and its measurements to a closure.
    /// Runs on the engine's delivery thread.
    Custom(CustomAction),
}

impl FrameAction {
    pub fn custom(f: impl FnMut(&PixelBuffer<'_>, &FrameStats) + Send + 'static) -> Self {
        Self::Custom(Box::new(f))
    }
}

impl fmt::Debug for FrameAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analyze => f.write_str("Analyze"),
            Self::SaveFirstFrame { path, orientation } => f
                .debug_struct("SaveFirstFrame")
                .field("path", path)
                .field("orientation", orientation)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Per-callback tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackOptions {
    pub motion_threshold: Option<u8>,
    pub report: ReportCadence,
}

impl Default for CallbackOptions {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for CallbackOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            motion_threshold: config.motion_threshold,
            report: config.report,
        }
    }
}

/// Point-in-time copy of a callback's running counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStatistics {
    pub frame_count: u64,
    pub started: Instant,
    pub last_frame: Option<Instant>,
    pub last_timestamp: Duration,
    pub average_fps: f64,
}

struct SnapshotTarget {
    path: PathBuf,
    orientation: Orientation,
}

struct RunState {
    accepting: bool,
    /// Bumped on every reset so a frame straddling one cannot write into
    /// the new run.
    generation: u64,
    frame_count: u64,
    analyzed: u64,
    started: Instant,
    last_frame: Option<Instant>,
    last_timestamp: Duration,
    snapshot_taken: bool,
    snapshot: Option<CapturedImage>,
    previous: Option<Vec<u8>>,
    last_stats: Option<FrameStats>,
}

impl RunState {
    fn new() -> Self {
        RunState {
            accepting: true,
            generation: 0,
            frame_count: 0,
            analyzed: 0,
            started: Instant::now(),
            last_frame: None,
            last_timestamp: Duration::ZERO,
            snapshot_taken: false,
            snapshot: None,
            previous: None,
            last_stats: None,
        }
    }

    fn reset(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.frame_count = 0;
        self.analyzed = 0;
        self.started = Instant::now();
        self.last_frame = None;
        self.last_timestamp = Duration::ZERO;
        self.snapshot_taken = false;
        self.previous = None;
        self.last_stats = None;
    }

    fn average_fps(&self) -> f64 {
        let elapsed_ms = self.started.elapsed().as_millis();
        if elapsed_ms > 0 {
            self.frame_count as f64 * 1000.0 / elapsed_ms as f64
        } else {
            0.0
        }
    }
}

struct Shared {
    state: Mutex<RunState>,
    snapshot_target: Option<SnapshotTarget>,
    custom: Option<Mutex<CustomAction>>,
    options: CallbackOptions,
}

impl Drop for Shared {
    fn drop(&mut self) {
        debug!("frame callback destroyed");
    }
}

/// Counted handle to a frame callback.
///
/// Cloning is `AddRef`; dropping is `Release`.
pub struct FrameCallback {
    shared: Arc<Shared>,
}

impl FrameCallback {
    pub fn new(action: FrameAction) -> Self {
        Self::with_options(action, CallbackOptions::default())
    }

    pub fn with_options(action: FrameAction, options: CallbackOptions) -> Self {
        let (snapshot_target, custom) = match action {
            FrameAction::Analyze => (None, None),
            FrameAction::SaveFirstFrame { path, orientation } => {
                (Some(SnapshotTarget { path, orientation }), None)
            }
            FrameAction::Custom(f) => (None, Some(Mutex::new(f))),
        };
        FrameCallback {
            shared: Arc::new(Shared {
                state: Mutex::new(RunState::new()),
                snapshot_target,
                custom,
                options,
            }),
        }
    }

    /// Take another counted reference.
    pub fn add_ref(&self) -> FrameCallback {
        let handle = self.clone();
        trace!(refs = handle.ref_count(), "frame callback add_ref");
        handle
    }

    /// Give up this reference and return how many remain.
    ///
    /// Exactly one caller destroys the callback, and that caller gets 0.
    /// With other threads releasing at the same time the count seen by a
    /// non-destroying caller is only a snapshot and may already read 0.
    pub fn release(self) -> usize {
        let weak = Arc::downgrade(&self.shared);
        match Arc::into_inner(self.shared) {
            Some(shared) => {
                drop(shared);
                0
            }
            None => weak.strong_count(),
        }
    }

    /// Number of live references.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.shared)
    }

    /// Whether both handles refer to the same callback.
    pub fn ptr_eq(&self, other: &FrameCallback) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Ask for one of the interfaces this callback implements. Success
    /// returns a new counted reference.
    pub fn query_interface(&self, iid: Guid) -> Result<FrameCallback, Error> {
        if iid == IID_UNKNOWN || iid == IID_SAMPLE_GRABBER_CB {
            Ok(self.add_ref())
        } else {
            Err(Error::NotSupported(iid))
        }
    }

    pub fn options(&self) -> CallbackOptions {
        self.shared.options
    }

    /// Handle one delivered frame.
    ///
    /// Called by the engine on its delivery thread. Nothing that goes wrong
    /// while processing the frame escapes: encode failures and panics in a
    /// custom action are logged and the frame is dropped, since engines treat
    /// a failing callback as a broken pipeline.
    pub fn on_buffer(&self, buffer: &PixelBuffer<'_>) {
        let shared = &*self.shared;
        let options = shared.options;

        let (frame, generation, claim_snapshot, previous) = {
            let mut state = shared.state.lock();
            if !state.accepting {
                trace!(bytes = buffer.len(), "frame outside a run dropped");
                return;
            }
            state.frame_count += 1;
            state.last_frame = Some(Instant::now());
            state.last_timestamp = buffer.timestamp();
            // An empty sample leaves the snapshot armed for the next frame.
            let claim =
                shared.snapshot_target.is_some() && !state.snapshot_taken && !buffer.is_empty();
            if claim {
                state.snapshot_taken = true;
            }
            (state.frame_count, state.generation, claim, state.previous.take())
        };

        if options.report.every_frames > 0 && frame % options.report.every_frames == 0 {
            info!(frame, bytes = buffer.len(), "frame received");
        }

        let stats = analysis::analyze(buffer, previous.as_deref(), options.motion_threshold);

        let saved = match (&shared.snapshot_target, claim_snapshot) {
            (Some(target), true) => self.save_snapshot(target, buffer),
            _ => None,
        };

        if let Some(custom) = &shared.custom {
            let mut action = custom.lock();
            let f: &mut CustomAction = &mut action;
            if panic::catch_unwind(AssertUnwindSafe(|| f(buffer, &stats))).is_err() {
                error!(frame, "frame action panicked; frame dropped");
            }
        }

        let report = {
            let mut state = shared.state.lock();
            if saved.is_some() {
                state.snapshot = saved;
            }
            if state.generation != generation {
                // Statistics were reset while this frame was in flight.
                return;
            }
            state.last_stats = Some(stats);
            if options.motion_threshold.is_some() {
                let mut copy = previous.unwrap_or_default();
                copy.clear();
                copy.extend_from_slice(buffer.data());
                state.previous = Some(copy);
            }
            if buffer.is_empty() {
                None
            } else {
                state.analyzed += 1;
                let every = options.report.every_analyzed;
                (every > 0 && state.analyzed % every == 0)
                    .then(|| (state.frame_count, state.average_fps()))
            }
        };

        if let Some((frame, fps)) = report {
            info!(
                frame,
                brightness = format_args!("{:.1}", stats.avg_brightness),
                fps = format_args!("{:.1}", fps),
                motion = stats.motion_detected,
                "frame analysis"
            );
        }
    }

    fn save_snapshot(
        &self,
        target: &SnapshotTarget,
        buffer: &PixelBuffer<'_>,
    ) -> Option<CapturedImage> {
        let (width, height) = buffer
            .size()
            .map(|s| (s.width, s.height))
            .unwrap_or((0, 0));
        match bmp::save_as_image(buffer, width, height, target.orientation, &target.path) {
            Ok(image) => {
                info!(
                    path = %image.path.display(),
                    width = image.width,
                    height = image.height,
                    estimated = image.dimensions == bmp::DimensionSource::Estimated,
                    "saved first frame"
                );
                Some(image)
            }
            Err(e) => {
                warn!(path = %target.path.display(), error = %e, "failed to save first frame");
                None
            }
        }
    }

    /// Zero the frame count and restart the clock.
    ///
    /// Also re-arms the first-frame snapshot and forgets the previous frame.
    pub fn reset_statistics(&self) {
        self.shared.state.lock().reset();
    }

    /// Reset statistics and start accepting frames, as one step.
    pub fn begin_run(&self) {
        let mut state = self.shared.state.lock();
        state.reset();
        state.accepting = true;
    }

    /// Stop accepting frames. Calls already past the gate still complete.
    pub fn end_run(&self) {
        self.shared.state.lock().accepting = false;
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.state.lock().accepting
    }

    pub fn frame_count(&self) -> u64 {
        self.shared.state.lock().frame_count
    }

    /// Frames per second since the last reset, computed on demand.
    pub fn average_fps(&self) -> f64 {
        self.shared.state.lock().average_fps()
    }

    pub fn statistics(&self) -> FrameStatistics {
        let state = self.shared.state.lock();
        FrameStatistics {
            frame_count: state.frame_count,
            started: state.started,
            last_frame: state.last_frame,
            last_timestamp: state.last_timestamp,
            average_fps: state.average_fps(),
        }
    }

    /// Measurements of the most recent frame of the current run.
    pub fn last_stats(&self) -> Option<FrameStats> {
        self.shared.state.lock().last_stats
    }

    /// The most recently saved first-frame image.
    pub fn snapshot(&self) -> Option<CapturedImage> {
        self.shared.state.lock().snapshot.clone()
    }
}

impl Clone for FrameCallback {
    fn clone(&self) -> Self {
        FrameCallback {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for FrameCallback {
    fn default() -> Self {
        Self::new(FrameAction::Analyze)
    }
}

impl fmt::Debug for FrameCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCallback")
            .field("refs", &self.ref_count())
            .field("options", &self.shared.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Size;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn frame(data: &[u8]) -> PixelBuffer<'_> {
        PixelBuffer::new(data, Duration::from_millis(33))
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn watched_callback() -> (FrameCallback, Arc<AtomicBool>) {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(dropped.clone());
        let cb = FrameCallback::new(FrameAction::custom(move |_, _| {
            let _ = &flag;
        }));
        (cb, dropped)
    }

    #[test]
    fn counts_frames_and_resets() {
        let cb = FrameCallback::default();
        let data = [1u8; 12];
        for _ in 0..5 {
            cb.on_buffer(&frame(&data));
        }
        assert_eq!(cb.frame_count(), 5);
        assert_eq!(cb.statistics().last_timestamp, Duration::from_millis(33));

        cb.reset_statistics();
        assert_eq!(cb.frame_count(), 0);
        assert!(cb.last_stats().is_none());
    }

    #[test]
    fn fps_is_zero_right_after_reset() {
        let cb = FrameCallback::default();
        cb.reset_statistics();
        let fps = cb.average_fps();
        assert_eq!(fps, 0.0);
        assert!(fps.is_finite());
    }

    #[test]
    fn fps_reflects_elapsed_time() {
        let cb = FrameCallback::default();
        cb.reset_statistics();
        for _ in 0..10 {
            cb.on_buffer(&frame(&[0u8; 3]));
        }
        std::thread::sleep(Duration::from_millis(20));
        let fps = cb.average_fps();
        assert!(fps > 0.0 && fps <= 500.0, "fps = {fps}");
    }

    #[test]
    fn add_ref_and_release_track_count() {
        let (cb, dropped) = watched_callback();
        assert_eq!(cb.ref_count(), 1);

        let extra = cb.add_ref();
        assert_eq!(cb.ref_count(), 2);
        assert_eq!(extra.release(), 1);
        assert!(!dropped.load(Ordering::SeqCst));

        assert_eq!(cb.release(), 0);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn concurrent_releases_destroy_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let counter = drops.clone();
        struct CountDrop(Arc<AtomicUsize>);
        impl Drop for CountDrop {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let token = CountDrop(counter);
        let cb = FrameCallback::new(FrameAction::custom(move |_, _| {
            let _ = &token;
        }));

        let handles: Vec<_> = (0..8).map(|_| cb.add_ref()).collect();
        assert_eq!(cb.ref_count(), 9);
        let workers: Vec<_> = handles
            .into_iter()
            .map(|h| std::thread::spawn(move || h.release()))
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(cb.ref_count(), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        assert_eq!(cb.release(), 0);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn query_interface_supports_callback_interfaces_only() {
        let cb = FrameCallback::default();
        let unknown = cb.query_interface(IID_UNKNOWN).unwrap();
        let grabber = cb.query_interface(IID_SAMPLE_GRABBER_CB).unwrap();
        assert!(unknown.ptr_eq(&cb));
        assert_eq!(cb.ref_count(), 3);
        drop((unknown, grabber));

        let other = Guid(0x6B652FFF_11FE_4FCE_92AD_0266B5D7C78F);
        let err = cb.query_interface(other).unwrap_err();
        assert!(matches!(err, Error::NotSupported(iid) if iid == other));
        assert_eq!(cb.ref_count(), 1);
    }

    #[test]
    fn closed_gate_drops_frames() {
        let cb = FrameCallback::default();
        cb.end_run();
        cb.on_buffer(&frame(&[0u8; 6]));
        assert_eq!(cb.frame_count(), 0);

        cb.begin_run();
        cb.on_buffer(&frame(&[0u8; 6]));
        assert_eq!(cb.frame_count(), 1);
    }

    #[test]
    fn saves_only_first_frame_of_each_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("first.bmp");
        let cb = FrameCallback::new(FrameAction::SaveFirstFrame {
            path: path.clone(),
            orientation: Orientation::BottomUp,
        });

        let first = [10, 20, 30, 40, 50, 60];
        let second = [1, 2, 3, 4, 5, 6];
        cb.on_buffer(&frame(&first).with_size(Size::new(2, 1)));
        cb.on_buffer(&frame(&second).with_size(Size::new(2, 1)));

        let image = cb.snapshot().expect("first frame saved");
        assert_eq!((image.width, image.height), (2, 1));
        assert_eq!(std::fs::read(&path).unwrap()[54..], [30, 20, 10, 60, 50, 40]);

        cb.reset_statistics();
        cb.on_buffer(&frame(&second).with_size(Size::new(2, 1)));
        assert_eq!(std::fs::read(&path).unwrap()[54..], [3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn empty_frame_leaves_snapshot_armed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("first.bmp");
        let cb = FrameCallback::new(FrameAction::SaveFirstFrame {
            path: path.clone(),
            orientation: Orientation::BottomUp,
        });

        cb.on_buffer(&frame(&[]));
        assert!(cb.snapshot().is_none());
        assert!(!path.exists());

        cb.on_buffer(&frame(&[10, 20, 30, 40, 50, 60]).with_size(Size::new(2, 1)));
        assert_eq!(cb.frame_count(), 2);
        let image = cb.snapshot().expect("first non-empty frame saved");
        assert_eq!((image.width, image.height), (2, 1));
        assert_eq!(std::fs::read(&path).unwrap()[54..], [30, 20, 10, 60, 50, 40]);
    }

    #[test]
    fn failed_save_does_not_disturb_counting() {
        let dir = tempfile::tempdir().unwrap();
        let cb = FrameCallback::new(FrameAction::SaveFirstFrame {
            path: dir.path().join("missing").join("first.bmp"),
            orientation: Orientation::TopDown,
        });
        cb.on_buffer(&frame(&[0u8; 9]));
        cb.on_buffer(&frame(&[0u8; 9]));
        assert_eq!(cb.frame_count(), 2);
        assert!(cb.snapshot().is_none());
    }

    #[test]
    fn custom_action_sees_raw_buffer_and_stats() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb = FrameCallback::new(FrameAction::custom(move |buffer, stats| {
            sink.lock().push((buffer.data().to_vec(), stats.avg_brightness));
        }));

        cb.on_buffer(&frame(&[255, 255, 255]));
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], (vec![255, 255, 255], 255.0));
    }

    #[test]
    fn panicking_action_is_contained() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let cb = FrameCallback::new(FrameAction::custom(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("bad frame");
            }
        }));

        cb.on_buffer(&frame(&[0u8; 3]));
        cb.on_buffer(&frame(&[0u8; 3]));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cb.frame_count(), 2);
    }

    #[test]
    fn detects_motion_between_frames() {
        let cb = FrameCallback::default();
        cb.on_buffer(&frame(&[0u8; 6]));
        assert!(!cb.last_stats().unwrap().motion_detected);

        cb.on_buffer(&frame(&[200u8; 6]));
        assert!(cb.last_stats().unwrap().motion_detected);

        cb.on_buffer(&frame(&[200u8; 6]));
        assert!(!cb.last_stats().unwrap().motion_detected);
    }

    #[test]
    fn reset_forgets_previous_frame() {
        let cb = FrameCallback::default();
        cb.on_buffer(&frame(&[0u8; 6]));
        cb.reset_statistics();
        cb.on_buffer(&frame(&[255u8; 6]));
        assert!(!cb.last_stats().unwrap().motion_detected);
    }

    #[test]
    fn delivery_races_with_reset() {
        let cb = FrameCallback::default();
        let producer = {
            let cb = cb.add_ref();
            std::thread::spawn(move || {
                let data = vec![128u8; 3 * 64];
                for _ in 0..2000 {
                    cb.on_buffer(&frame(&data));
                }
            })
        };
        for _ in 0..200 {
            cb.reset_statistics();
        }
        producer.join().unwrap();

        assert!(cb.frame_count() <= 2000);
        assert_eq!(cb.ref_count(), 1);
        cb.reset_statistics();
        assert_eq!(cb.frame_count(), 0);
    }
}
