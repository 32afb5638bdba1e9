use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::callback::FrameAction;
use crate::error::Error;
use crate::types::{Orientation, StreamConfig};

/// How often the frame callback logs progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportCadence {
    /// Log a receipt line every this many frames; 0 disables it.
    #[serde(alias = "everyFrames")]
    pub every_frames: u64,
    /// Log brightness and FPS every this many analyzed frames; 0 disables it.
    #[serde(alias = "everyAnalyzed")]
    pub every_analyzed: u64,
}

impl Default for ReportCadence {
    fn default() -> Self {
        Self {
            every_frames: 30,
            every_analyzed: 60,
        }
    }
}

/// Tunables of a capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Save the first frame of every run here when set.
    #[serde(alias = "snapshotPath")]
    pub snapshot_path: Option<PathBuf>,
    pub orientation: Orientation,
    /// Per-byte difference above which a frame counts as moving; `None`
    /// disables motion detection and the previous-frame copy it needs.
    #[serde(alias = "motionThreshold")]
    pub motion_threshold: Option<u8>,
    pub report: ReportCadence,
    /// Pick the first listed device when none was selected before building.
    #[serde(alias = "autoSelectDevice")]
    pub auto_select_device: bool,
    /// Format to request from the device; the engine default otherwise.
    pub format: Option<StreamConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            orientation: Orientation::BottomUp,
            motion_threshold: Some(30),
            report: ReportCadence::default(),
            auto_select_device: false,
            format: None,
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let json = std::fs::read_to_string(path).map_err(Error::ConfigIo)?;
        Self::from_json(&json)
    }

    /// The per-frame action this configuration asks for.
    pub fn frame_action(&self) -> FrameAction {
        match &self.snapshot_path {
            Some(path) => FrameAction::SaveFirstFrame {
                path: path.clone(),
                orientation: self.orientation,
            },
            None => FrameAction::Analyze,
        }
    }
}
