//! Stateless per-frame measurements over 24-bit interleaved pixels.
//!
//! Channel order does not matter here: every measurement treats the three
//! channels of a pixel symmetrically. An empty frame is a benign transient in
//! live capture, so every function returns a neutral value (0 / `false`)
//! instead of failing.

use core::time::Duration;

use crate::frame::{BYTES_PER_PIXEL, PixelBuffer};

/// Measurements taken from one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub avg_brightness: f64,
    pub avg_contrast: f64,
    pub motion_detected: bool,
    pub timestamp: Duration,
}

/// Integer mean of a pixel's three channels.
fn pixel_brightness(px: &[u8]) -> u32 {
    (px[0] as u32 + px[1] as u32 + px[2] as u32) / 3
}

/// Average of the per-pixel channel means.
///
/// A trailing partial pixel is ignored.
pub fn average_brightness(data: &[u8]) -> f64 {
    let pixels = data.len() / BYTES_PER_PIXEL;
    if pixels == 0 {
        return 0.0;
    }
    let total: u64 = data
        .chunks_exact(BYTES_PER_PIXEL)
        .map(|px| pixel_brightness(px) as u64)
        .sum();
    total as f64 / pixels as f64
}

/// Population standard deviation of per-pixel brightness.
pub fn contrast(data: &[u8]) -> f64 {
    let pixels = data.len() / BYTES_PER_PIXEL;
    if pixels == 0 {
        return 0.0;
    }
    let mean = average_brightness(data);
    let variance = data
        .chunks_exact(BYTES_PER_PIXEL)
        .map(|px| {
            let d = pixel_brightness(px) as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / pixels as f64;
    variance.sqrt()
}

/// Whether any byte differs from the previous frame by more than `threshold`.
///
/// The first frame of a run (no previous frame) never shows motion, and
/// frames of different lengths are not compared.
pub fn detect_motion(current: &[u8], previous: Option<&[u8]>, threshold: u8) -> bool {
    let Some(previous) = previous else {
        return false;
    };
    if current.len() != previous.len() {
        return false;
    }
    current
        .iter()
        .zip(previous)
        .any(|(&a, &b)| a.abs_diff(b) > threshold)
}

/// Run every measurement over `buffer`.
///
/// Motion is only evaluated when a `threshold` is given.
pub fn analyze(
    buffer: &PixelBuffer<'_>,
    previous: Option<&[u8]>,
    threshold: Option<u8>,
) -> FrameStats {
    let data = buffer.data();
    FrameStats {
        avg_brightness: average_brightness(data),
        avg_contrast: contrast(data),
        motion_detected: threshold.is_some_and(|t| detect_motion(data, previous, t)),
        timestamp: buffer.timestamp(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brightness_of_uniform_frames() {
        assert_eq!(average_brightness(&[255u8; 300]), 255.0);
        assert_eq!(average_brightness(&[0u8; 300]), 0.0);
    }

    #[test]
    fn brightness_of_empty_frame_is_zero() {
        assert_eq!(average_brightness(&[]), 0.0);
        assert_eq!(average_brightness(&[200, 200]), 0.0);
    }

    #[test]
    fn brightness_ignores_trailing_partial_pixel() {
        // Two full pixels (means 10 and 40) plus a dangling byte.
        let data = [0, 10, 20, 30, 40, 50, 255];
        assert_eq!(average_brightness(&data), 25.0);
    }

    #[test]
    fn brightness_truncates_per_pixel_mean() {
        // (1 + 1 + 2) / 3 == 1 in integer arithmetic.
        assert_eq!(average_brightness(&[1, 1, 2]), 1.0);
    }

    #[test]
    fn contrast_is_zero_for_flat_frames() {
        assert_eq!(contrast(&[128u8; 30]), 0.0);
        assert_eq!(contrast(&[]), 0.0);
    }

    #[test]
    fn contrast_of_black_and_white_pixels() {
        let data = [0, 0, 0, 255, 255, 255];
        assert_eq!(contrast(&data), 127.5);
    }

    #[test]
    fn identical_frames_show_no_motion() {
        let frame = [7u8, 99, 180, 3, 4, 5];
        for threshold in [0, 1, 30, 255] {
            assert!(!detect_motion(&frame, Some(&frame), threshold));
        }
    }

    #[test]
    fn first_frame_shows_no_motion() {
        assert!(!detect_motion(&[255u8; 9], None, 0));
    }

    #[test]
    fn motion_needs_difference_above_threshold() {
        let previous = [100u8; 6];
        let mut current = previous;
        current[4] = 130;
        assert!(!detect_motion(&current, Some(&previous), 30));
        assert!(detect_motion(&current, Some(&previous), 29));
    }

    #[test]
    fn mismatched_lengths_show_no_motion() {
        assert!(!detect_motion(&[0u8; 6], Some(&[255u8; 9]), 0));
    }

    #[test]
    fn analyze_combines_measurements() {
        let previous = [0u8; 6];
        let data = [255u8, 255, 255, 0, 0, 0];
        let buffer = PixelBuffer::new(&data, Duration::from_millis(40));

        let stats = analyze(&buffer, Some(&previous), Some(30));
        assert_eq!(stats.avg_brightness, 127.5);
        assert_eq!(stats.avg_contrast, 127.5);
        assert!(stats.motion_detected);
        assert_eq!(stats.timestamp, Duration::from_millis(40));

        let stats = analyze(&buffer, Some(&previous), None);
        assert!(!stats.motion_detected);
    }
}
