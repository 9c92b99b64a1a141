//! Sensor session — one exclusively owned capture handle per serial number.
//!
//! A session moves between two states only. Everything that exists while
//! connected (the capture handle, the active stream format, frame rate and
//! LED level) lives in a single `Option`, so the handle cannot outlive the
//! connection and the state cannot disagree with it.

use crate::capture::{CaptureBackend, CaptureHandle, V4lBackend, LED_CONTROL_ID};
use crate::error::{DigitError, Result};
use crate::frame::Frame;
use crate::profile::{Resolution, StreamFormat};
use crate::registry::{DeviceDescriptor, Registry};
use serde::Serialize;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => f.write_str("disconnected"),
            ConnectionState::Connected => f.write_str("connected"),
        }
    }
}

/// Returned by a [`FrameView`] after each rendered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewControl {
    Continue,
    Stop,
}

/// Destination for [`Session::show_view`].
pub trait FrameView {
    fn render(&mut self, frame: &Frame) -> std::io::Result<ViewControl>;
}

struct Connection<H> {
    handle: H,
    format: StreamFormat,
    fps: u32,
    intensity: u16,
}

/// An open (or openable) connection to one sensor.
pub struct Session<B: CaptureBackend = V4lBackend> {
    serial: String,
    name: Option<String>,
    registry: Registry,
    backend: B,
    /// Last descriptor resolved by `connect`.
    descriptor: Option<DeviceDescriptor>,
    connection: Option<Connection<B::Handle>>,
}

impl Session<V4lBackend> {
    /// Session on the V4L2 backend. Does not touch the device.
    pub fn new(serial: impl Into<String>, registry: Registry) -> Self {
        Self::with_backend(serial, registry, V4lBackend::default())
    }
}

impl<B: CaptureBackend> Session<B> {
    pub fn with_backend(serial: impl Into<String>, registry: Registry, backend: B) -> Self {
        let serial = serial.into();
        tracing::debug!(serial = %serial, "session created");
        Self {
            serial,
            name: None,
            registry,
            backend,
            descriptor: None,
            connection: None,
        }
    }

    /// Attach a human-friendly name, e.g. "Left Gripper".
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        if self.connection.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    pub fn descriptor(&self) -> Option<&DeviceDescriptor> {
        self.descriptor.as_ref()
    }

    /// Active stream format, while connected.
    pub fn stream(&self) -> Option<&StreamFormat> {
        self.connection.as_ref().map(|c| &c.format)
    }

    pub fn fps(&self) -> Option<u32> {
        self.connection.as_ref().map(|c| c.fps)
    }

    /// Packed LED value last written, while connected.
    pub fn intensity(&self) -> Option<u16> {
        self.connection.as_ref().map(|c| c.intensity)
    }

    /// Resolve the serial number and open the default stream with LEDs at
    /// the profile's default level.
    pub fn connect(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Err(DigitError::InvalidState {
                operation: "connect",
                state: ConnectionState::Connected,
            });
        }
        tracing::info!(serial = %self.serial, "connecting");

        let descriptor = self.registry.find_device(&self.serial)?;
        let profile = self.registry.profile();
        let format = profile.default_stream()?.clone();
        let fps = format.default_fps();
        let default_intensity = profile.defaults.intensity;

        let handle = self.backend.open(&descriptor.path, &format, fps)?;
        tracing::info!(
            serial = %self.serial,
            device = %descriptor.path,
            resolution = %format.label,
            fps,
            "connected"
        );

        self.descriptor = Some(descriptor);
        self.connection = Some(Connection {
            handle,
            format,
            fps,
            intensity: 0,
        });

        if let Err(e) = self.set_intensity(default_intensity) {
            self.connection = None;
            return Err(e);
        }
        Ok(())
    }

    /// Release the capture handle. Safe to call when already disconnected.
    pub fn disconnect(&mut self) {
        match self.connection.take() {
            Some(connection) => {
                let device = connection.handle.path().to_string();
                drop(connection);
                tracing::info!(serial = %self.serial, device = %device, "disconnected");
            }
            None => tracing::debug!(serial = %self.serial, "already disconnected"),
        }
    }

    /// Read one frame, rotated to the upright view of the gel.
    pub fn get_frame(&mut self) -> Result<Frame> {
        Ok(self.read("get_frame")?.rotated())
    }

    /// Read one frame exactly as the image sensor delivers it (width x height swapped
    /// relative to [`get_frame`](Self::get_frame)).
    pub fn get_frame_raw(&mut self) -> Result<Frame> {
        self.read("get_frame_raw")
    }

    fn read(&mut self, operation: &'static str) -> Result<Frame> {
        let connection = require(&mut self.connection, operation)?;
        connection.handle.read_frame().map_err(|e| {
            tracing::warn!(serial = %self.serial, error = %e, "frame read failed; reconnect required");
            e
        })
    }

    /// Difference between a fresh frame and `reference`.
    pub fn get_diff(&mut self, reference: &Frame) -> Result<Frame> {
        let frame = self.get_frame()?;
        frame
            .diff(reference)
            .map_err(|e| DigitError::InvalidArgument(e.to_string()))
    }

    /// Grab one frame and write it to `path`; the image format follows the extension.
    pub fn save_frame(&mut self, path: impl AsRef<Path>) -> Result<Frame> {
        let frame = self.get_frame()?;
        tracing::debug!(path = %path.as_ref().display(), "saving frame");
        frame.save(path.as_ref())?;
        Ok(frame)
    }

    /// Switch resolution; the frame rate resets to that resolution's default.
    pub fn set_resolution(&mut self, label: Resolution) -> Result<()> {
        let connection = require(&mut self.connection, "set_resolution")?;
        let format = self.registry.stream_table().get(label)?.clone();
        let fps = format.default_fps();

        connection.handle.configure(&format, fps)?;
        tracing::debug!(
            serial = %self.serial,
            width = format.width,
            height = format.height,
            fps,
            "resolution set"
        );
        connection.format = format;
        connection.fps = fps;
        Ok(())
    }

    /// Switch frame rate within the current resolution.
    pub fn set_fps(&mut self, fps: u32) -> Result<()> {
        let connection = require(&mut self.connection, "set_fps")?;
        let label = connection.format.label;
        if !self.registry.stream_table().supports(label, fps) {
            return Err(DigitError::InvalidArgument(format!(
                "{fps} fps is not supported at {label} (supported: {:?})",
                connection.format.fps_options()
            )));
        }

        connection.handle.configure(&connection.format, fps)?;
        connection.fps = fps;
        tracing::debug!(serial = %self.serial, fps, "frame rate set");
        Ok(())
    }

    /// Set all LEDs to one level.
    ///
    /// Firmware older than the profile's RGB revision takes a single
    /// 0-255 level which is scaled down before being applied.
    pub fn set_intensity(&mut self, level: u8) -> Result<u16> {
        require(&mut self.connection, "set_intensity")?;
        let led = &self.registry.profile().led;
        let revision = self.descriptor.as_ref().map_or(0, |d| d.revision);

        let level = if revision < led.rgb_revision {
            tracing::warn!(
                serial = %self.serial,
                revision,
                "firmware lacks independent RGB control; update the sensor firmware"
            );
            level / led.legacy_scaler
        } else {
            level
        };
        self.set_intensity_rgb(level, level, level)
    }

    /// Set each LED channel (0 = off, profile max = full brightness).
    /// Returns the packed control value `(r << 8) | (g << 4) | b`.
    pub fn set_intensity_rgb(&mut self, r: u8, g: u8, b: u8) -> Result<u16> {
        let connection = require(&mut self.connection, "set_intensity_rgb")?;
        let max = self.registry.profile().led.max;
        if [r, g, b].iter().any(|&c| c > max) {
            return Err(DigitError::InvalidArgument(format!(
                "RGB values must be between 0 and {max}, got ({r}, {g}, {b})"
            )));
        }

        let packed = (u16::from(r) << 8) | (u16::from(g) << 4) | u16::from(b);
        connection
            .handle
            .set_control(LED_CONTROL_ID, i64::from(packed))?;
        connection.intensity = packed;
        tracing::debug!(serial = %self.serial, r, g, b, packed, "LED intensity set");
        Ok(packed)
    }

    /// Feed frames to `view` until it asks to stop. With a `reference`,
    /// each frame is shown as its difference from it.
    pub fn show_view<V: FrameView>(&mut self, view: &mut V, reference: Option<&Frame>) -> Result<()> {
        require(&mut self.connection, "show_view")?;
        tracing::info!(serial = %self.serial, diff = reference.is_some(), "live view started");

        let mut shown = 0u64;
        loop {
            let frame = match reference {
                Some(reference) => self.get_diff(reference)?,
                None => self.get_frame()?,
            };
            shown += 1;
            if view.render(&frame)? == ViewControl::Stop {
                break;
            }
        }

        tracing::info!(serial = %self.serial, frames = shown, "live view stopped");
        Ok(())
    }

    /// Snapshot of identity and, while connected, stream settings.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            name: self.name.clone(),
            serial: self.serial.clone(),
            path: self.descriptor.as_ref().map(|d| d.path.clone()),
            model: self.descriptor.as_ref().map(|d| d.model.clone()),
            revision: self.descriptor.as_ref().map(|d| d.revision),
            state: self.state(),
            stream: self.connection.as_ref().map(|c| StreamInfo {
                resolution: c.format.label,
                width: c.format.width,
                height: c.format.height,
                fps: c.fps,
                intensity: c.intensity,
            }),
        }
    }
}

impl<B: CaptureBackend> Drop for Session<B> {
    fn drop(&mut self) {
        if self.connection.is_some() {
            self.disconnect();
        }
    }
}

impl<B: CaptureBackend> fmt::Debug for Session<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("serial", &self.serial)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

fn require<'a, H>(
    connection: &'a mut Option<Connection<H>>,
    operation: &'static str,
) -> Result<&'a mut Connection<H>> {
    connection.as_mut().ok_or(DigitError::InvalidState {
        operation,
        state: ConnectionState::Disconnected,
    })
}

/// Result of [`Session::info`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub name: Option<String>,
    pub serial: String,
    pub path: Option<String>,
    pub model: Option<String>,
    pub revision: Option<u16>,
    pub state: ConnectionState,
    pub stream: Option<StreamInfo>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub resolution: Resolution,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub intensity: u16,
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dash = || "-".to_string();
        writeln!(
            f,
            "Name: {} {}",
            self.name.as_deref().unwrap_or(&self.serial),
            self.path.clone().unwrap_or_else(dash)
        )?;
        writeln!(f, "\t- Serial: {}", self.serial)?;
        writeln!(f, "\t- Model: {}", self.model.clone().unwrap_or_else(dash))?;
        writeln!(
            f,
            "\t- Revision: {}",
            self.revision.map_or_else(dash, |r| r.to_string())
        )?;
        write!(f, "\t- Connected?: {}", self.state == ConnectionState::Connected)?;
        if let Some(stream) = &self.stream {
            write!(
                f,
                "\nStream Info:\n\t- Resolution: {} ({} x {})\n\t- FPS: {}\n\t- LED Intensity: {}",
                stream.resolution, stream.width, stream.height, stream.fps, stream.intensity
            )?;
        }
        Ok(())
    }
}
