//! Uncompressed 24-bit bitmap snapshots of captured frames.
//!
//! The capture source stores each pixel with its first and third channel
//! reversed relative to what the bitmap format expects, so every pixel gets
//! bytes 0 and 2 swapped on the way out. Rows are written back to back without
//! the 4-byte row padding of the canonical format; widths whose row length is
//! not a multiple of four produce files that strict readers reject.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::EncodeError;
use crate::frame::{BYTES_PER_PIXEL, PixelBuffer};
use crate::types::{ChannelOrder, Orientation, Size};

const FILE_HEADER_LEN: u32 = 14;
const INFO_HEADER_LEN: u32 = 40;
/// Offset of the pixel data from the start of the file.
pub const DATA_OFFSET: u32 = FILE_HEADER_LEN + INFO_HEADER_LEN;

/// Channel order of frames as delivered by the capture source.
pub const SOURCE_CHANNEL_ORDER: ChannelOrder = ChannelOrder::Bgr;

/// Where the dimensions of an encoded image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionSource {
    /// Supplied by the caller or the engine.
    Measured,
    /// Derived from the buffer length with the 4:3 fallback.
    Estimated,
}

/// A bitmap written to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedImage {
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u8,
    pub channel_order: ChannelOrder,
    pub orientation: Orientation,
    pub dimensions: DimensionSource,
    pub file_size: u32,
    pub path: PathBuf,
}

/// Guess frame dimensions from a byte length, assuming a 4:3 aspect ratio.
///
/// `width = floor(sqrt(pixels * 4 / 3))`, `height = pixels / width`. Returns
/// `None` when the buffer holds no complete pixel.
pub fn estimate_dimensions(len: usize) -> Option<Size> {
    let pixels = (len / BYTES_PER_PIXEL) as u64;
    let width = (pixels as f64 * 4.0 / 3.0).sqrt() as u64;
    if width == 0 {
        return None;
    }
    let height = pixels / width;
    Some(Size {
        width: u32::try_from(width).ok()?,
        height: u32::try_from(height).ok()?,
    })
}

/// Validated geometry of an encode request.
struct Layout {
    size: Size,
    dimensions: DimensionSource,
    image_len: u32,
}

fn layout(len: usize, width: u32, height: u32) -> Result<Layout, EncodeError> {
    let (size, dimensions) = if width == 0 || height == 0 {
        let size = estimate_dimensions(len).ok_or(EncodeError::EmptyFrame)?;
        (size, DimensionSource::Estimated)
    } else {
        (Size { width, height }, DimensionSource::Measured)
    };

    let required = size.pixel_count() * BYTES_PER_PIXEL as u64;
    if required > len as u64 {
        return Err(EncodeError::DimensionMismatch {
            width: size.width,
            height: size.height,
            required,
            available: len,
        });
    }
    let image_len = u32::try_from(required)
        .ok()
        .filter(|n| n.checked_add(DATA_OFFSET).is_some())
        .ok_or(EncodeError::TooLarge {
            width: size.width,
            height: size.height,
        })?;

    Ok(Layout {
        size,
        dimensions,
        image_len,
    })
}

fn write_headers<W: Write>(
    out: &mut W,
    size: Size,
    image_len: u32,
    orientation: Orientation,
) -> std::io::Result<()> {
    let height = size.height as i32;
    let height = match orientation {
        Orientation::BottomUp => height,
        Orientation::TopDown => -height,
    };

    // File header
    out.write_all(b"BM")?;
    out.write_all(&(DATA_OFFSET + image_len).to_le_bytes())?;
    out.write_all(&0u16.to_le_bytes())?;
    out.write_all(&0u16.to_le_bytes())?;
    out.write_all(&DATA_OFFSET.to_le_bytes())?;

    // Info header
    out.write_all(&INFO_HEADER_LEN.to_le_bytes())?;
    out.write_all(&(size.width as i32).to_le_bytes())?;
    out.write_all(&height.to_le_bytes())?;
    out.write_all(&1u16.to_le_bytes())?; // planes
    out.write_all(&24u16.to_le_bytes())?; // bits per pixel
    out.write_all(&0u32.to_le_bytes())?; // uncompressed
    out.write_all(&image_len.to_le_bytes())?;
    out.write_all(&0i32.to_le_bytes())?; // x pixels per metre
    out.write_all(&0i32.to_le_bytes())?; // y pixels per metre
    out.write_all(&0u32.to_le_bytes())?; // palette colors
    out.write_all(&0u32.to_le_bytes())?; // important colors
    Ok(())
}

fn write_pixels<W: Write>(out: &mut W, pixels: &[u8]) -> std::io::Result<()> {
    const CHUNK: usize = 64 * 1024 / BYTES_PER_PIXEL * BYTES_PER_PIXEL;
    let mut swapped = Vec::with_capacity(pixels.len().min(CHUNK));
    for chunk in pixels.chunks(CHUNK) {
        swapped.clear();
        for px in chunk.chunks_exact(BYTES_PER_PIXEL) {
            swapped.extend_from_slice(&[px[2], px[1], px[0]]);
        }
        out.write_all(&swapped)?;
    }
    Ok(())
}

/// Encode a frame into bitmap bytes held in memory.
pub fn encode_bmp(
    data: &[u8],
    width: u32,
    height: u32,
    orientation: Orientation,
) -> Result<Vec<u8>, EncodeError> {
    let layout = layout(data.len(), width, height)?;
    let mut out = Vec::with_capacity((DATA_OFFSET + layout.image_len) as usize);
    write_headers(&mut out, layout.size, layout.image_len, orientation)?;
    write_pixels(&mut out, &data[..layout.image_len as usize])?;
    Ok(out)
}

/// Write `buffer` to `path` as a 24-bit bitmap.
///
/// Zero `width` or `height` falls back to [`estimate_dimensions`]; prefer
/// passing the dimensions the engine negotiated. The destination is
/// created or truncated; failures are not retried.
pub fn save_as_image(
    buffer: &PixelBuffer<'_>,
    width: u32,
    height: u32,
    orientation: Orientation,
    path: impl AsRef<Path>,
) -> Result<CapturedImage, EncodeError> {
    let path = path.as_ref();
    let layout = layout(buffer.len(), width, height)?;

    let mut out = BufWriter::new(File::create(path)?);
    write_headers(&mut out, layout.size, layout.image_len, orientation)?;
    write_pixels(&mut out, &buffer.data()[..layout.image_len as usize])?;
    out.flush()?;

    let file_size = DATA_OFFSET + layout.image_len;
    debug!(
        path = %path.display(),
        size = %layout.size,
        estimated = layout.dimensions == DimensionSource::Estimated,
        "wrote bitmap snapshot"
    );

    Ok(CapturedImage {
        width: layout.size.width,
        height: layout.size.height,
        bytes_per_pixel: BYTES_PER_PIXEL as u8,
        channel_order: SOURCE_CHANNEL_ORDER.swapped(),
        orientation,
        dimensions: layout.dimensions,
        file_size,
        path: path.to_path_buf(),
    })
}
