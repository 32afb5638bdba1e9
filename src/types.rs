use core::fmt;

use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};

/// Maximum number of frame rate ranges per format descriptor.
const MAX_FRAME_RATE_RANGES: usize = 8;

/// Pixel formats a capture device may report.
///
/// Only [`PixelFormat::Rgb24`] frames are analyzed and encoded; the others are
/// listed so capability reports stay faithful to what the device offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum PixelFormat {
    Rgb24,
    Rgb32,
    Yuy2,
    Nv12,
    Mjpg,
}

impl PixelFormat {
    /// Display name used by capture frameworks for this subtype.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Rgb24 => "RGB24",
            Self::Rgb32 => "RGB32",
            Self::Yuy2 => "YUY2",
            Self::Nv12 => "NV12",
            Self::Mjpg => "MJPG",
        }
    }

    /// Bits per pixel, or `None` for compressed formats.
    pub fn bits_per_pixel(&self) -> Option<u16> {
        match self {
            Self::Rgb24 => Some(24),
            Self::Rgb32 => Some(32),
            Self::Yuy2 => Some(16),
            Self::Nv12 => Some(12),
            Self::Mjpg => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pixel dimensions of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A rational number (numerator / denominator).
///
/// Used to represent frame rates (e.g. 30000/1000 = 30 fps) and
/// frame durations (e.g. 1000/30000 ≈ 0.033 s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ratio {
    pub numerator: u32,
    pub denominator: u32,
}

impl Ratio {
    pub fn as_f64(&self) -> f64 {
        if self.denominator == 0 {
            return 0.0;
        }
        self.numerator as f64 / self.denominator as f64
    }

    /// Express a floating point rate with a 1000-based denominator.
    pub fn from_f64(rate: f64) -> Self {
        let denominator = 1000u32;
        Ratio {
            numerator: (rate * denominator as f64).round() as u32,
            denominator,
        }
    }
}

/// Range of supported frame rates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRateRange {
    pub min: Ratio,
    pub max: Ratio,
}

/// Describes a supported camera format.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatDescriptor {
    pub pixel_format: PixelFormat,
    pub size: Size,
    frame_rate_ranges: ArrayVec<FrameRateRange, MAX_FRAME_RATE_RANGES>,
}

impl FormatDescriptor {
    /// Create descriptors for a given format, splitting across multiple
    /// [`FormatDescriptor`] values if the number of frame rate ranges exceeds
    /// the inline capacity.
    pub fn from_ranges(
        pixel_format: PixelFormat,
        size: Size,
        frame_rate_ranges: impl IntoIterator<Item = FrameRateRange>,
    ) -> impl Iterator<Item = Self> {
        let mut iter = frame_rate_ranges.into_iter();
        core::iter::from_fn(move || {
            let mut chunk = ArrayVec::new();
            for range in iter.by_ref() {
                chunk.push(range);
                if chunk.is_full() {
                    break;
                }
            }
            if chunk.is_empty() {
                None
            } else {
                Some(FormatDescriptor {
                    pixel_format,
                    size,
                    frame_rate_ranges: chunk,
                })
            }
        })
    }

    /// The frame rate ranges supported by this format.
    pub fn frame_rate_ranges(&self) -> &[FrameRateRange] {
        &self.frame_rate_ranges
    }

    /// Whether `config` can be satisfied by this descriptor.
    pub fn supports(&self, config: &StreamConfig) -> bool {
        if self.pixel_format != config.pixel_format || self.size != config.size {
            return false;
        }
        let rate = config.frame_rate.as_f64();
        self.frame_rate_ranges
            .iter()
            .any(|r| rate >= r.min.as_f64() && rate <= r.max.as_f64())
    }

    /// The fastest configuration this descriptor offers.
    pub fn max_rate_config(&self) -> Option<StreamConfig> {
        let max = self
            .frame_rate_ranges
            .iter()
            .map(|r| r.max)
            .max_by(|a, b| a.as_f64().total_cmp(&b.as_f64()))?;
        Some(StreamConfig {
            pixel_format: self.pixel_format,
            size: self.size,
            frame_rate: max,
        })
    }
}

/// Negotiated (or requested) format of a capture stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(alias = "pixelFormat")]
    pub pixel_format: PixelFormat,
    pub size: Size,
    #[serde(alias = "frameRate")]
    pub frame_rate: Ratio,
}

/// Row storage convention of an encoded bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Orientation {
    /// First row in the buffer is the bottom of the image (positive height).
    #[default]
    BottomUp,
    /// First row in the buffer is the top of the image (negative height).
    TopDown,
}

/// Byte order of the three color channels of a pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

impl ChannelOrder {
    pub fn swapped(self) -> Self {
        match self {
            Self::Rgb => Self::Bgr,
            Self::Bgr => Self::Rgb,
        }
    }
}

/// Public lifecycle state of a [`CaptureSession`](crate::session::CaptureSession).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureState {
    Idle,
    Built,
    Running,
    Stopped,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Built => "built",
            Self::Running => "running",
            Self::Stopped => "stopped",
        })
    }
}

/// State reported by the underlying engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    Stopped,
    Paused,
    Running,
}

/// 128-bit interface identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid(pub u128);

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{{{:08X}-{:04X}-{:04X}-{:04X}-{:012X}}}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xFFFF_FFFF_FFFF,
        )
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({self})")
    }
}
