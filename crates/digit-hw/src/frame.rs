//! Frame type and pixel conversions — MJPG/YUYV decode, orientation, difference.

use std::path::Path;

/// A captured RGB frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Packed RGB8 pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Wrap already-decoded RGB8 data, checking its length.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let expected = rgb_len(width, height);
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    /// Average channel value (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// RGB value at (x, y). Caller keeps coordinates in range.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = ((y * self.width + x) * 3) as usize;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// Rotate 90° counter-clockwise (transpose, then flip vertically).
    ///
    /// The image sensor is mounted sideways; this yields the upright view
    /// of the gel. A `w x h` frame becomes `h x w`.
    pub fn rotated(&self) -> Frame {
        let (w, h) = (self.width as usize, self.height as usize);
        let mut out = vec![0u8; self.data.len()];
        // Output is h wide, w tall: out(x = r, y = w - 1 - c) = in(c, r).
        for r in 0..h {
            for c in 0..w {
                let src = (r * w + c) * 3;
                let dst = ((w - 1 - c) * h + r) * 3;
                out[dst..dst + 3].copy_from_slice(&self.data[src..src + 3]);
            }
        }
        Frame {
            data: out,
            width: self.height,
            height: self.width,
            timestamp: self.timestamp,
            sequence: self.sequence,
        }
    }

    /// Per-byte wrapping difference `self - reference`.
    pub fn diff(&self, reference: &Frame) -> Result<Frame, FrameError> {
        if self.width != reference.width || self.height != reference.height {
            return Err(FrameError::SizeMismatch {
                expected: (reference.width, reference.height),
                actual: (self.width, self.height),
            });
        }
        let data = self
            .data
            .iter()
            .zip(reference.data.iter())
            .map(|(a, b)| a.wrapping_sub(*b))
            .collect();
        Ok(Frame {
            data,
            width: self.width,
            height: self.height,
            timestamp: self.timestamp,
            sequence: self.sequence,
        })
    }

    /// Write the frame to disk; the format follows the file extension.
    pub fn save(&self, path: &Path) -> Result<(), FrameError> {
        image::save_buffer(
            path,
            &self.data,
            self.width,
            self.height,
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| FrameError::Encode(format!("{}: {e}", path.display())))
    }
}

fn rgb_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

/// Convert packed YUYV (4:2:2) to RGB8 using BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    if yuyv.len() != expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(rgb_len(width, height));
    for chunk in yuyv.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v));
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| (x >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 409 * e + 128),
        clamp(298 * c - 100 * d - 208 * e + 128),
        clamp(298 * c + 516 * d + 128),
    ]
}

/// Decode one motion-JPEG buffer into RGB8, returning `(data, width, height)`.
pub fn decode_mjpeg(buf: &[u8]) -> Result<(Vec<u8>, u32, u32), FrameError> {
    let img = image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
        .map_err(|e| FrameError::Decode(e.to_string()))?
        .to_rgb8();
    let (width, height) = img.dimensions();
    Ok((img.into_raw(), width, height))
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("frame size {actual:?} does not match reference {expected:?}")]
    SizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("MJPG decode failed: {0}")]
    Decode(String),
    #[error("failed to write frame: {0}")]
    Encode(String),
}
