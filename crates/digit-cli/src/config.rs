use digit_hw::{Registry, SensorProfile, V4lBackend};
use std::path::PathBuf;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// sysfs mount point used for device discovery (default: /sys).
    pub sysfs_root: PathBuf,
    /// Directory holding the video device nodes (default: /dev).
    pub dev_root: PathBuf,
    /// Number of mmap buffers per capture stream.
    pub buffer_count: u32,
    /// Frames discarded after connecting, while auto-exposure settles.
    pub warmup_frames: usize,
}

impl Config {
    /// Load configuration from `DIGIT_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            sysfs_root: std::env::var("DIGIT_SYSFS_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/sys")),
            dev_root: std::env::var("DIGIT_DEV_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/dev")),
            buffer_count: env_u32("DIGIT_BUFFER_COUNT", 4),
            warmup_frames: env_usize("DIGIT_WARMUP_FRAMES", 0),
        }
    }

    pub fn registry(&self) -> digit_hw::Result<Registry> {
        Ok(Registry::with_roots(
            SensorProfile::builtin()?,
            &self.sysfs_root,
            &self.dev_root,
        ))
    }

    pub fn backend(&self) -> V4lBackend {
        V4lBackend::with_buffers(self.buffer_count)
    }
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_fallbacks() {
        std::env::set_var("DIGIT_TEST_BUFFERS_GARBAGE", "many");
        assert_eq!(env_u32("DIGIT_TEST_BUFFERS_GARBAGE", 4), 4);
        assert_eq!(env_usize("DIGIT_TEST_UNSET_VARIABLE", 7), 7);

        std::env::set_var("DIGIT_TEST_BUFFERS_SET", "8");
        assert_eq!(env_u32("DIGIT_TEST_BUFFERS_SET", 4), 8);
    }
}
