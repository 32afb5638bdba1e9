use core::time::Duration;

use crate::types::Size;

/// Bytes per pixel of the interleaved 24-bit layout the pipeline analyzes.
pub const BYTES_PER_PIXEL: usize = 3;

/// A borrowed view over one frame's raw samples. Lifetime tied to callback
/// scope (zero-copy); anything that must outlive the callback has to copy.
#[derive(Debug, Clone, Copy)]
pub struct PixelBuffer<'a> {
    data: &'a [u8],
    size: Option<Size>,
    timestamp: Duration,
}

impl<'a> PixelBuffer<'a> {
    pub fn new(data: &'a [u8], timestamp: Duration) -> Self {
        PixelBuffer {
            data,
            size: None,
            timestamp,
        }
    }

    /// Attach the nominal dimensions reported by the engine.
    pub fn with_size(mut self, size: Size) -> Self {
        self.size = Some(size);
        self
    }

    /// Build a buffer from a sample time in seconds, clamping negative or
    /// non-finite values to zero.
    pub fn from_sample_time(data: &'a [u8], sample_time: f64) -> Self {
        let timestamp = if sample_time.is_finite() && sample_time > 0.0 {
            Duration::from_secs_f64(sample_time)
        } else {
            Duration::ZERO
        };
        Self::new(data, timestamp)
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Nominal dimensions, if the engine reported them.
    pub fn size(&self) -> Option<Size> {
        self.size
    }

    /// Presentation time of the sample relative to the stream start.
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Number of complete pixels in the buffer.
    pub fn pixel_count(&self) -> usize {
        self.data.len() / BYTES_PER_PIXEL
    }
}
