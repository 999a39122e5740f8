//! GPU-related constants

/// PCI vendor ID for AMD GPUs
pub const AMD_VENDOR_ID: &str = "0x1002";

/// PCI vendor ID for NVIDIA GPUs
pub const NVIDIA_VENDOR_ID: &str = "0x10de";

/// Path to DRM (Direct Rendering Manager) devices
pub const DRM_PATH: &str = "/sys/class/drm";

/// amdgpu reports power caps in microwatts
pub const MICROWATTS_PER_WATT: u64 = 1_000_000;

/// NVIDIA clock offsets are applied to this performance level
pub const NVIDIA_PERF_LEVEL: u32 = 3;

/// PWM constants
pub mod pwm {
    /// Full-scale hwmon PWM duty value
    pub const MAX_VALUE: u8 = 255;

    /// Convert percentage (0-100) to PWM value (0-255), truncating
    #[inline]
    pub fn from_percent(percent: u32) -> u8 {
        (percent.min(100) * MAX_VALUE as u32 / 100) as u8
    }

    /// Convert PWM value (0-255) to percentage (0-100), truncating
    #[inline]
    pub fn to_percent(value: u8) -> u32 {
        value as u32 * 100 / MAX_VALUE as u32
    }
}
