//! Capture backend seam and the V4L2 implementation via the `v4l` crate.

use crate::error::{DigitError, Result};
use crate::frame::{self, Frame};
use crate::profile::StreamFormat;
use std::io;
use std::path::Path;
use v4l::buffer::Type as BufType;
use v4l::control::{Control, Value};
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::FourCC;

/// `V4L2_CID_ZOOM_ABSOLUTE`. The sensor firmware repurposes it as the
/// packed RGB LED intensity control.
pub const LED_CONTROL_ID: u32 = 0x009a_090d;

/// Opens capture handles on device paths.
pub trait CaptureBackend {
    type Handle: CaptureHandle;

    /// Open `path` and configure it for `format` at `fps`.
    fn open(&self, path: &str, format: &StreamFormat, fps: u32) -> Result<Self::Handle>;
}

/// An open video stream. Dropping the handle releases the device.
pub trait CaptureHandle {
    /// Re-negotiate resolution and frame rate. May interrupt the stream.
    fn configure(&mut self, format: &StreamFormat, fps: u32) -> Result<()>;

    /// Block until the next frame arrives and return it as RGB8 in sensor orientation.
    fn read_frame(&mut self) -> Result<Frame>;

    /// Write an integer device control.
    fn set_control(&mut self, id: u32, value: i64) -> Result<()>;

    /// Device node this handle was opened on.
    fn path(&self) -> &str;
}

/// Negotiated pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Motion JPEG, decoded per frame.
    Mjpg,
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
}

impl PixelFormat {
    fn fourcc(self) -> FourCC {
        match self {
            PixelFormat::Mjpg => FourCC::new(b"MJPG"),
            PixelFormat::Yuyv => FourCC::new(b"YUYV"),
        }
    }
}

/// Default backend: V4L2 memory-mapped streaming.
#[derive(Debug, Clone)]
pub struct V4lBackend {
    buffer_count: u32,
}

impl V4lBackend {
    /// Use `buffer_count` mmap buffers per stream (minimum 1).
    pub fn with_buffers(buffer_count: u32) -> Self {
        Self {
            buffer_count: buffer_count.max(1),
        }
    }
}

impl Default for V4lBackend {
    fn default() -> Self {
        Self::with_buffers(4)
    }
}

impl CaptureBackend for V4lBackend {
    type Handle = V4lHandle;

    fn open(&self, path: &str, format: &StreamFormat, fps: u32) -> Result<V4lHandle> {
        V4lHandle::open(path, format, fps, self.buffer_count)
    }
}

/// V4L2 capture handle. The mmap stream starts lazily on the first read
/// and is torn down whenever the format changes.
pub struct V4lHandle {
    stream: Option<MmapStream<'static>>,
    device: Device,
    path: String,
    width: u32,
    height: u32,
    fps: u32,
    pixel_format: PixelFormat,
    buffer_count: u32,
}

impl V4lHandle {
    fn open(path: &str, format: &StreamFormat, fps: u32, buffer_count: u32) -> Result<Self> {
        if !Path::new(path).exists() {
            return Err(busy(path, "no such device node"));
        }

        let device = Device::with_path(path).map_err(|e| busy(path, &e.to_string()))?;

        let caps = device
            .query_caps()
            .map_err(|e| busy(path, &format!("failed to query capabilities: {e}")))?;
        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(busy(path, "not a video capture node"));
        }

        tracing::info!(
            device = path,
            driver = %caps.driver,
            card = %caps.card,
            "opened capture device"
        );

        // Prefer MJPG (full frame rate over USB 2.0), fall back to YUYV.
        let offered: Vec<FourCC> = device
            .enum_formats()
            .map_err(|e| DigitError::Capture(format!("failed to enumerate formats: {e}")))?
            .into_iter()
            .map(|d| d.fourcc)
            .collect();
        let pixel_format = [PixelFormat::Mjpg, PixelFormat::Yuyv]
            .into_iter()
            .find(|p| offered.contains(&p.fourcc()))
            .ok_or_else(|| {
                DigitError::Capture(format!(
                    "unsupported pixel formats {offered:?} (need MJPG or YUYV)"
                ))
            })?;

        let mut handle = Self {
            stream: None,
            device,
            path: path.to_string(),
            width: 0,
            height: 0,
            fps: 0,
            pixel_format,
            buffer_count,
        };
        handle.configure(format, fps)?;
        Ok(handle)
    }

    fn start_stream(&self) -> Result<MmapStream<'static>> {
        MmapStream::with_buffers(&self.device, BufType::VideoCapture, self.buffer_count)
            .map_err(|e| DigitError::Capture(format!("failed to create mmap stream: {e}")))
    }
}

impl CaptureHandle for V4lHandle {
    fn configure(&mut self, format: &StreamFormat, fps: u32) -> Result<()> {
        // The driver refuses S_FMT while buffers are queued.
        self.stream = None;

        let mut fmt = self
            .device
            .format()
            .map_err(|e| DigitError::Capture(format!("failed to get format: {e}")))?;
        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = self.pixel_format.fourcc();

        let negotiated = self.device.set_format(&fmt).map_err(|e| {
            if is_busy(&e) {
                busy(&self.path, "streaming in another process")
            } else {
                DigitError::Capture(format!("failed to set format: {e}"))
            }
        })?;
        // The driver now delivers this size even if a later step fails.
        self.width = negotiated.width;
        self.height = negotiated.height;

        if negotiated.width != format.width || negotiated.height != format.height {
            return Err(DigitError::Capture(format!(
                "driver negotiated {}x{} instead of {}x{}",
                negotiated.width, negotiated.height, format.width, format.height
            )));
        }

        self.device
            .set_params(&Parameters::with_fps(fps))
            .map_err(|e| DigitError::Capture(format!("failed to set {fps} fps: {e}")))?;
        self.fps = fps;

        tracing::debug!(
            device = %self.path,
            width = self.width,
            height = self.height,
            fps,
            fourcc = ?negotiated.fourcc,
            "stream configured"
        );
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame> {
        if self.stream.is_none() {
            self.stream = Some(self.start_stream()?);
        }
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| DigitError::Capture("stream not started".into()))?;

        let (buf, meta) = stream
            .next()
            .map_err(|e| DigitError::Capture(format!("failed to dequeue buffer: {e}")))?;
        let used = meta.bytesused as usize;
        let payload = if used > 0 && used <= buf.len() { &buf[..used] } else { buf };

        decode(self.pixel_format, payload, self.width, self.height, meta.sequence)
    }

    fn set_control(&mut self, id: u32, value: i64) -> Result<()> {
        self.device
            .set_control(Control {
                id,
                value: Value::Integer(value),
            })
            .map_err(|e| DigitError::Capture(format!("failed to set control {id:#x}: {e}")))
    }

    fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for V4lHandle {
    fn drop(&mut self) {
        tracing::debug!(device = %self.path, "releasing capture device");
    }
}

/// Convert one dequeued buffer into an RGB frame.
fn decode(pixel_format: PixelFormat, buf: &[u8], width: u32, height: u32, sequence: u32) -> Result<Frame> {
    let rgb = match pixel_format {
        PixelFormat::Mjpg => {
            let (rgb, w, h) = frame::decode_mjpeg(buf)
                .map_err(|e| DigitError::Capture(e.to_string()))?;
            if (w, h) != (width, height) {
                return Err(DigitError::Capture(format!(
                    "MJPG frame is {w}x{h}, stream is {width}x{height}"
                )));
            }
            rgb
        }
        PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height)
            .map_err(|e| DigitError::Capture(format!("YUYV conversion failed: {e}")))?,
    };
    Frame::from_rgb(rgb, width, height, sequence).map_err(|e| DigitError::Capture(e.to_string()))
}

fn busy(path: &str, reason: &str) -> DigitError {
    DigitError::DeviceBusy {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}

fn is_busy(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EBUSY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_node_is_busy() {
        let profile = crate::SensorProfile::builtin().unwrap();
        let format = profile.default_stream().unwrap();
        let err = V4lBackend::default()
            .open("/dev/video-does-not-exist", format, 30)
            .err()
            .unwrap();
        assert!(matches!(err, DigitError::DeviceBusy { .. }));
    }

    #[test]
    fn test_decode_yuyv() {
        let buf = vec![16, 128, 235, 128];
        let frame = decode(PixelFormat::Yuyv, &buf, 2, 1, 7).unwrap();
        assert_eq!(frame.data, vec![0, 0, 0, 255, 255, 255]);
        assert_eq!(frame.sequence, 7);
    }

    #[test]
    fn test_decode_short_buffer_is_capture_error() {
        let err = decode(PixelFormat::Yuyv, &[0; 2], 2, 1, 0).unwrap_err();
        assert!(matches!(err, DigitError::Capture(_)));
    }

    #[test]
    fn test_decode_oversized_yuyv_is_capture_error() {
        // A 2x2 payload read against a stale 2x1 size must not be cropped.
        let buf = vec![16, 128, 235, 128, 16, 128, 235, 128];
        let err = decode(PixelFormat::Yuyv, &buf, 2, 1, 0).unwrap_err();
        assert!(matches!(err, DigitError::Capture(_)));
    }

    #[test]
    fn test_decode_bad_mjpeg_is_capture_error() {
        let err = decode(PixelFormat::Mjpg, &[0xff, 0xd8, 0x00], 2, 1, 0).unwrap_err();
        assert!(matches!(err, DigitError::Capture(_)));
    }

    #[test]
    fn test_buffer_count_floor() {
        assert_eq!(V4lBackend::with_buffers(0).buffer_count, 1);
        assert_eq!(V4lBackend::default().buffer_count, 4);
    }
}
