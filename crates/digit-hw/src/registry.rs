//! Device registry — finds attached sensors through sysfs.
//!
//! Each `/sys/class/video4linux/videoN/device` link points at the USB
//! interface directory; its parent is the USB device directory carrying
//! `idVendor`, `idProduct`, `serial`, `manufacturer`, `product` and
//! `bcdDevice`. Only the primary capture node (`index` 0) of a matching
//! device is reported.

use crate::error::{DigitError, Result};
use crate::profile::{SensorProfile, StreamFormat, StreamTable};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Snapshot of one attached sensor, taken at enumeration time.
///
/// The device path may change across replugs; the serial does not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    pub serial: String,
    /// Device node, e.g. `/dev/video0`.
    pub path: String,
    pub manufacturer: String,
    pub model: String,
    /// Firmware revision, `bcdDevice` read as decimal digits ("0200" → 200).
    pub revision: u16,
    pub streams: Vec<StreamFormat>,
}

/// Enumerates sensors matching a [`SensorProfile`].
#[derive(Debug, Clone)]
pub struct Registry {
    profile: Arc<SensorProfile>,
    sysfs_root: PathBuf,
    dev_root: PathBuf,
}

impl Registry {
    /// Registry for the built-in DIGIT profile on the live system.
    pub fn new() -> Result<Self> {
        Ok(Self::with_roots(SensorProfile::builtin()?, "/sys", "/dev"))
    }

    /// Registry reading from an alternative sysfs mount and device directory.
    pub fn with_roots(
        profile: SensorProfile,
        sysfs_root: impl Into<PathBuf>,
        dev_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            profile: Arc::new(profile),
            sysfs_root: sysfs_root.into(),
            dev_root: dev_root.into(),
        }
    }

    pub fn profile(&self) -> &SensorProfile {
        &self.profile
    }

    pub fn stream_table(&self) -> &StreamTable {
        self.profile.streams()
    }

    /// List attached sensors, ordered by video node number.
    ///
    /// Returns an empty list when sysfs is unavailable.
    pub fn list_devices(&self) -> Vec<DeviceDescriptor> {
        let class_dir = self.sysfs_root.join("class/video4linux");
        let entries = match fs::read_dir(&class_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(dir = %class_dir.display(), error = %e, "cannot read video4linux class");
                return Vec::new();
            }
        };

        let mut devices: Vec<DeviceDescriptor> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                if !name.starts_with("video") {
                    return None;
                }
                self.inspect_node(&entry.path(), &name)
            })
            .collect();
        devices.sort_by(|a, b| {
            node_number(&a.path)
                .cmp(&node_number(&b.path))
                .then_with(|| a.path.cmp(&b.path))
        });

        if devices.is_empty() {
            tracing::debug!(
                vendor_id = %format!("{:04x}", self.profile.device.vendor_id),
                product_id = %format!("{:04x}", self.profile.device.product_id),
                "no matching devices found"
            );
        }
        devices
    }

    /// Find an attached sensor by serial number.
    pub fn find_device(&self, serial: &str) -> Result<DeviceDescriptor> {
        tracing::debug!(serial, "searching for device");
        self.list_devices()
            .into_iter()
            .find(|d| d.serial == serial)
            .ok_or_else(|| DigitError::NotFound(serial.to_string()))
    }

    /// Inspect one `video4linux` class entry.
    fn inspect_node(&self, node: &Path, name: &str) -> Option<DeviceDescriptor> {
        // Metadata nodes of the same UVC interface have index 1.
        if let Some(index) = read_attr(&node.join("index")) {
            if index != "0" {
                return None;
            }
        }

        let interface_dir = fs::canonicalize(node.join("device")).ok()?;
        let usb_dir = interface_dir.parent()?;

        let vid = u16::from_str_radix(&read_attr(&usb_dir.join("idVendor"))?, 16).ok()?;
        let pid = u16::from_str_radix(&read_attr(&usb_dir.join("idProduct"))?, 16).ok()?;
        let identity = &self.profile.device;
        if vid != identity.vendor_id || pid != identity.product_id {
            return None;
        }

        let Some(serial) = read_attr(&usb_dir.join("serial")) else {
            tracing::debug!(node = name, "matching device has no serial number; skipping");
            return None;
        };

        let descriptor = DeviceDescriptor {
            serial,
            path: self.dev_root.join(name).to_string_lossy().into_owned(),
            manufacturer: read_attr(&usb_dir.join("manufacturer")).unwrap_or_default(),
            model: read_attr(&usb_dir.join("product"))
                .unwrap_or_else(|| identity.model.clone()),
            revision: read_attr(&usb_dir.join("bcdDevice"))
                .and_then(|r| r.parse().ok())
                .unwrap_or(0),
            streams: self.profile.streams().iter().cloned().collect(),
        };
        tracing::debug!(
            serial = %descriptor.serial,
            device = %descriptor.path,
            revision = descriptor.revision,
            "found device"
        );
        Some(descriptor)
    }
}

fn read_attr(path: &Path) -> Option<String> {
    let value = fs::read_to_string(path).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Numeric suffix of a `/dev/videoN` path; unnumbered paths sort last.
fn node_number(path: &str) -> u32 {
    path.rsplit('/')
        .next()
        .and_then(|name| name.strip_prefix("video"))
        .and_then(|n| n.parse().ok())
        .unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    struct FakeSysfs {
        dir: TempDir,
    }

    impl FakeSysfs {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::create_dir_all(dir.path().join("class/video4linux")).unwrap();
            Self { dir }
        }

        /// Add `/sys/class/video4linux/<node>` backed by USB device `usb_id`.
        fn add(&self, node: &str, usb_id: &str, attrs: &[(&str, &str)], index: Option<&str>) {
            let usb_dir = self.dir.path().join("devices/usb1").join(usb_id);
            let interface_dir = usb_dir.join(format!("{usb_id}:1.0"));
            fs::create_dir_all(&interface_dir).unwrap();
            for (key, value) in attrs {
                fs::write(usb_dir.join(key), format!("{value}\n")).unwrap();
            }

            let node_dir = self.dir.path().join("class/video4linux").join(node);
            fs::create_dir_all(&node_dir).unwrap();
            if let Some(index) = index {
                fs::write(node_dir.join("index"), format!("{index}\n")).unwrap();
            }
            symlink(&interface_dir, node_dir.join("device")).unwrap();
        }

        fn digit(&self, node: &str, usb_id: &str, serial: &str) {
            self.add(
                node,
                usb_id,
                &[
                    ("idVendor", "2833"),
                    ("idProduct", "0209"),
                    ("serial", serial),
                    ("manufacturer", "Facebook"),
                    ("product", "DIGIT"),
                    ("bcdDevice", "0200"),
                ],
                Some("0"),
            );
        }

        fn registry(&self) -> Registry {
            Registry::with_roots(SensorProfile::builtin().unwrap(), self.dir.path(), "/dev")
        }
    }

    #[test]
    fn test_lists_matching_devices() {
        let sys = FakeSysfs::new();
        sys.digit("video2", "1-2", "D20001");
        sys.digit("video0", "1-1", "D12345");

        let devices = sys.registry().list_devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial, "D12345");
        assert_eq!(devices[0].path, "/dev/video0");
        assert_eq!(devices[0].manufacturer, "Facebook");
        assert_eq!(devices[0].model, "DIGIT");
        assert_eq!(devices[0].revision, 200);
        assert_eq!(devices[0].streams.len(), 2);
        assert_eq!(devices[1].serial, "D20001");
    }

    #[test]
    fn test_orders_by_node_number() {
        let sys = FakeSysfs::new();
        sys.digit("video10", "1-3", "D10010");
        sys.digit("video2", "1-2", "D10002");

        let paths: Vec<String> = sys.registry().list_devices().into_iter().map(|d| d.path).collect();
        assert_eq!(paths, vec!["/dev/video2", "/dev/video10"]);
        assert!(node_number("/dev/video2") < node_number("/dev/video10"));
        assert_eq!(node_number("/dev/digit-D10002"), u32::MAX);
    }

    #[test]
    fn test_skips_other_vendors() {
        let sys = FakeSysfs::new();
        sys.add(
            "video0",
            "1-1",
            &[("idVendor", "046d"), ("idProduct", "0825"), ("serial", "WEBCAM")],
            Some("0"),
        );
        sys.digit("video4", "1-4", "D00004");

        let devices = sys.registry().list_devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].serial, "D00004");
    }

    #[test]
    fn test_skips_metadata_nodes() {
        let sys = FakeSysfs::new();
        sys.digit("video0", "1-1", "D12345");
        sys.add(
            "video1",
            "1-1",
            &[("idVendor", "2833"), ("idProduct", "0209"), ("serial", "D12345")],
            Some("1"),
        );

        let devices = sys.registry().list_devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].path, "/dev/video0");
    }

    #[test]
    fn test_skips_device_without_serial() {
        let sys = FakeSysfs::new();
        sys.add(
            "video0",
            "1-1",
            &[("idVendor", "2833"), ("idProduct", "0209")],
            None,
        );
        assert!(sys.registry().list_devices().is_empty());
    }

    #[test]
    fn test_missing_sysfs_is_empty() {
        let registry = Registry::with_roots(
            SensorProfile::builtin().unwrap(),
            "/nonexistent/sysfs/root",
            "/dev",
        );
        assert!(registry.list_devices().is_empty());
    }

    #[test]
    fn test_find_device_by_serial() {
        let sys = FakeSysfs::new();
        let serials = ["D00001", "D00002", "D00003"];
        for (i, serial) in serials.iter().enumerate() {
            sys.digit(&format!("video{}", i * 2), &format!("1-{i}"), serial);
        }

        let registry = sys.registry();
        for serial in serials {
            assert_eq!(registry.find_device(serial).unwrap().serial, serial);
        }
    }

    #[test]
    fn test_find_unknown_serial() {
        let sys = FakeSysfs::new();
        sys.digit("video0", "1-1", "D12345");

        let err = sys.registry().find_device("D99999").unwrap_err();
        assert!(matches!(err, DigitError::NotFound(s) if s == "D99999"));
    }

    #[test]
    fn test_descriptor_serializes() {
        let sys = FakeSysfs::new();
        sys.digit("video0", "1-1", "D12345");

        let device = sys.registry().find_device("D12345").unwrap();
        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["serial"], "D12345");
        assert_eq!(json["streams"][0]["label"], "VGA");
        assert_eq!(json["streams"][0]["fps"][0], 30);
    }
}
