//! digit-hw — Host interface for the DIGIT tactile sensor.
//!
//! Discovers attached sensors through sysfs, opens V4L2 capture streams at
//! the resolutions and frame rates the sensor supports, and drives its LED
//! illumination.

pub mod capture;
pub mod error;
pub mod frame;
pub mod profile;
pub mod registry;
pub mod session;

pub use capture::{CaptureBackend, CaptureHandle, V4lBackend};
pub use error::{DigitError, Result};
pub use frame::Frame;
pub use profile::{Resolution, SensorProfile, StreamFormat, StreamTable};
pub use registry::{DeviceDescriptor, Registry};
pub use session::{ConnectionState, FrameView, Session, SessionInfo, ViewControl};
