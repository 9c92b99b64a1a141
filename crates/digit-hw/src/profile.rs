//! Sensor profile and stream table.
//!
//! Describes the USB identity, LED limits and supported (resolution, fps)
//! combinations of the sensor. The DIGIT profile is embedded at compile
//! time from `contrib/digit.toml` and parsed once by the caller that owns
//! the [`Registry`](crate::Registry); nothing here is global or mutable.

use crate::error::{DigitError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Compile-time embedded profile for the DIGIT sensor.
const DIGIT_PROFILE: &str = include_str!("../../../contrib/digit.toml");

/// Named stream resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Resolution {
    /// 320x240.
    Qvga,
    /// 640x480.
    Vga,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Qvga => "QVGA",
            Resolution::Vga => "VGA",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = DigitError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "QVGA" => Ok(Resolution::Qvga),
            "VGA" => Ok(Resolution::Vga),
            _ => Err(DigitError::InvalidArgument(format!(
                "unknown resolution {s:?} (expected QVGA or VGA)"
            ))),
        }
    }
}

/// One entry of the stream table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    pub label: Resolution,
    pub width: u32,
    pub height: u32,
    /// Supported frame rates; the first entry is the default.
    fps: Vec<u32>,
}

impl StreamFormat {
    pub fn fps_options(&self) -> &[u32] {
        &self.fps
    }

    /// Frame rate applied when this resolution is selected.
    pub fn default_fps(&self) -> u32 {
        // Non-empty: enforced by SensorProfile::from_toml.
        self.fps[0]
    }

    pub fn supports_fps(&self, fps: u32) -> bool {
        self.fps.contains(&fps)
    }
}

/// Immutable lookup from [`Resolution`] to [`StreamFormat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTable {
    formats: Vec<StreamFormat>,
}

impl StreamTable {
    /// Look up a stream by exact label.
    pub fn get(&self, label: Resolution) -> Result<&StreamFormat> {
        self.formats
            .iter()
            .find(|f| f.label == label)
            .ok_or_else(|| {
                DigitError::InvalidArgument(format!("resolution {label} is not supported"))
            })
    }

    /// Whether the (resolution, fps) pair is present in the table.
    pub fn supports(&self, label: Resolution, fps: u32) -> bool {
        self.get(label).is_ok_and(|f| f.supports_fps(fps))
    }

    pub fn iter(&self) -> impl Iterator<Item = &StreamFormat> {
        self.formats.iter()
    }
}

/// USB identity used to recognise the sensor during enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub model: String,
}

/// Settings applied on connect.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Defaults {
    pub resolution: Resolution,
    pub intensity: u8,
}

/// LED illumination limits from the `[led]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LedLimits {
    /// Highest per-channel level.
    pub max: u8,
    /// First firmware revision with independent RGB control.
    pub rgb_revision: u16,
    /// Divisor mapping a 0-255 level onto older firmware.
    pub legacy_scaler: u8,
}

#[derive(Deserialize)]
struct ProfileFile {
    device: DeviceIdentity,
    defaults: Defaults,
    led: LedLimits,
    streams: Vec<StreamFormat>,
}

/// Everything the host needs to know about a sensor model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorProfile {
    pub device: DeviceIdentity,
    pub defaults: Defaults,
    pub led: LedLimits,
    streams: StreamTable,
}

impl SensorProfile {
    /// Parse the embedded DIGIT profile.
    pub fn builtin() -> Result<Self> {
        Self::from_toml(DIGIT_PROFILE)
    }

    /// Parse and validate a profile from TOML source.
    pub fn from_toml(src: &str) -> Result<Self> {
        let file: ProfileFile =
            toml::from_str(src).map_err(|e| DigitError::Profile(e.to_string()))?;

        if file.streams.is_empty() {
            return Err(DigitError::Profile("no streams defined".into()));
        }
        for (i, stream) in file.streams.iter().enumerate() {
            if stream.width == 0 || stream.height == 0 {
                return Err(DigitError::Profile(format!(
                    "{}: zero-sized resolution",
                    stream.label
                )));
            }
            if stream.fps.is_empty() || stream.fps.contains(&0) {
                return Err(DigitError::Profile(format!(
                    "{}: fps list must be non-empty and non-zero",
                    stream.label
                )));
            }
            if file.streams[..i].iter().any(|s| s.label == stream.label) {
                return Err(DigitError::Profile(format!(
                    "{}: duplicate stream label",
                    stream.label
                )));
            }
        }
        if !file.streams.iter().any(|s| s.label == file.defaults.resolution) {
            return Err(DigitError::Profile(format!(
                "default resolution {} has no stream entry",
                file.defaults.resolution
            )));
        }
        // Three 4-bit channels share one control value.
        if file.led.max > 15 {
            return Err(DigitError::Profile(format!(
                "led.max {} does not fit a 4-bit channel",
                file.led.max
            )));
        }
        if file.led.legacy_scaler == 0 {
            return Err(DigitError::Profile("led.legacy_scaler must be non-zero".into()));
        }
        if file.defaults.intensity > file.led.max {
            return Err(DigitError::Profile(format!(
                "default intensity {} exceeds led.max {}",
                file.defaults.intensity, file.led.max
            )));
        }

        Ok(Self {
            device: file.device,
            defaults: file.defaults,
            led: file.led,
            streams: StreamTable {
                formats: file.streams,
            },
        })
    }

    pub fn streams(&self) -> &StreamTable {
        &self.streams
    }

    /// Stream format opened on connect.
    pub fn default_stream(&self) -> Result<&StreamFormat> {
        self.streams.get(self.defaults.resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VGA_ONLY: &str = r#"
        [device]
        vendor_id = 0x1234
        product_id = 0x0001
        model = "TEST"

        [defaults]
        resolution = "VGA"
        intensity = 15

        [led]
        max = 15
        rgb_revision = 200
        legacy_scaler = 17

        [[streams]]
        label = "VGA"
        width = 640
        height = 480
        fps = [30]
    "#;

    #[test]
    fn test_builtin_profile_parses() {
        let profile = SensorProfile::builtin().unwrap();
        assert_eq!(profile.device.vendor_id, 0x2833);
        assert_eq!(profile.device.product_id, 0x0209);
        assert_eq!(profile.device.model, "DIGIT");
        assert_eq!(profile.defaults.intensity, 15);
    }

    #[test]
    fn test_builtin_stream_table() {
        let profile = SensorProfile::builtin().unwrap();
        let table = profile.streams();

        let vga = table.get(Resolution::Vga).unwrap();
        assert_eq!((vga.width, vga.height), (640, 480));
        assert_eq!(vga.fps_options(), &[30, 15]);
        assert_eq!(vga.default_fps(), 30);

        let qvga = table.get(Resolution::Qvga).unwrap();
        assert_eq!((qvga.width, qvga.height), (320, 240));
        assert_eq!(qvga.fps_options(), &[60, 30]);
        assert_eq!(qvga.default_fps(), 60);
    }

    #[test]
    fn test_default_stream_is_vga() {
        let profile = SensorProfile::builtin().unwrap();
        let stream = profile.default_stream().unwrap();
        assert_eq!(stream.label, Resolution::Vga);
        assert_eq!(stream.default_fps(), 30);
    }

    #[test]
    fn test_supports_only_listed_pairs() {
        let profile = SensorProfile::builtin().unwrap();
        let table = profile.streams();
        assert!(table.supports(Resolution::Vga, 15));
        assert!(table.supports(Resolution::Qvga, 60));
        assert!(!table.supports(Resolution::Vga, 60));
        assert!(!table.supports(Resolution::Qvga, 15));
        assert!(!table.supports(Resolution::Qvga, 1000));
    }

    #[test]
    fn test_missing_label_is_invalid_argument() {
        let profile = SensorProfile::from_toml(VGA_ONLY).unwrap();
        let err = profile.streams().get(Resolution::Qvga).unwrap_err();
        assert!(matches!(err, DigitError::InvalidArgument(_)));
    }

    #[test]
    fn test_resolution_from_str() {
        assert_eq!("QVGA".parse::<Resolution>().unwrap(), Resolution::Qvga);
        assert_eq!("vga".parse::<Resolution>().unwrap(), Resolution::Vga);
        assert!(matches!(
            "XGA".parse::<Resolution>(),
            Err(DigitError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_rejects_duplicate_labels() {
        let src = format!(
            "{VGA_ONLY}\n[[streams]]\nlabel = \"VGA\"\nwidth = 640\nheight = 480\nfps = [15]\n"
        );
        assert!(matches!(
            SensorProfile::from_toml(&src),
            Err(DigitError::Profile(_))
        ));
    }

    #[test]
    fn test_rejects_empty_fps() {
        let src = VGA_ONLY.replace("fps = [30]", "fps = []");
        assert!(matches!(
            SensorProfile::from_toml(&src),
            Err(DigitError::Profile(_))
        ));
    }

    #[test]
    fn test_rejects_default_without_stream() {
        let src = VGA_ONLY.replace("resolution = \"VGA\"", "resolution = \"QVGA\"");
        assert!(matches!(
            SensorProfile::from_toml(&src),
            Err(DigitError::Profile(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        assert!(matches!(
            SensorProfile::from_toml("[device"),
            Err(DigitError::Profile(_))
        ));
    }
}
