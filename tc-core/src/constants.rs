//! Constants and configuration defaults for tunectl
//!
//! Paths, limits and timings live here so the rest of the crate never
//! carries magic numbers.

use std::time::Duration;

/// System paths
pub mod paths {
    use std::path::PathBuf;

    /// Base path for hwmon devices
    pub const HWMON_BASE: &str = "/sys/class/hwmon";

    /// Primary thermal zone, usually the CPU package
    pub const THERMAL_ZONE0: &str = "/sys/class/thermal/thermal_zone0/temp";

    /// System-wide configuration file for the daemon
    pub const CONFIG_FILE: &str = "/etc/tunectl/config.json";

    /// Default IPC socket
    pub const SOCKET_PATH: &str = "/run/tunectl.sock";

    /// Marker that systemd-journald is running
    pub const JOURNALD_SOCKET: &str = "/run/systemd/journal/socket";

    /// Default directory for saved tuning profiles
    pub fn default_profiles_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("tunectl")
            .join("profiles")
    }
}

/// Profile storage
pub mod profile {
    /// Reserved name of the last-applied settings snapshot
    pub const CURRENT_SNAPSHOT: &str = "_current";

    pub const FILE_EXTENSION: &str = "json";

    pub const MAX_NAME_LEN: usize = 64;
}

/// Overclock field ranges (inclusive)
pub mod limits {
    pub const CORE_CLOCK_OFFSET_MHZ: (i32, i32) = (-500, 500);
    pub const MEMORY_CLOCK_OFFSET_MHZ: (i32, i32) = (-1000, 1000);
    pub const POWER_LIMIT_PERCENT: (i32, i32) = (50, 150);
    pub const TEMPERATURE_LIMIT_CELSIUS: (i32, i32) = (60, 95);
    pub const FAN_SPEED_PERCENT: (i32, i32) = (0, 100);
    pub const VOLTAGE_OFFSET_MV: (f64, f64) = (-100.0, 100.0);
}

/// Fan curve constants
pub mod curve {
    pub const MIN_POINTS: usize = 2;
    pub const MIN_VALUE: i32 = 0;
    pub const MAX_VALUE: i32 = 100;

    /// Returned when a curve somehow has no points
    pub const FALLBACK_FAN_PERCENT: i32 = 100;
}

/// Temperature probing
pub mod temperature {
    /// Raw readings above this are millidegrees
    pub const MILLIDEGREE_THRESHOLD: f64 = 1000.0;

    /// Readings outside this open interval are treated as bogus
    pub const PLAUSIBLE_MIN_CELSIUS: f64 = 0.0;
    pub const PLAUSIBLE_MAX_CELSIUS: f64 = 120.0;
}

/// hwmon pwmN_enable values
pub mod pwm_enable {
    pub const MANUAL: &str = "1";
    pub const AUTOMATIC: &str = "2";
}

/// Timing constants
pub mod timing {
    use super::Duration;

    /// Curve sampling period
    pub const DEFAULT_CURVE_INTERVAL_MS: u64 = 2000;
    pub const MIN_CURVE_INTERVAL_MS: u64 = 100;

    pub const DEFAULT_CURVE_INTERVAL: Duration = Duration::from_millis(DEFAULT_CURVE_INTERVAL_MS);

    /// Log the first failure and then every Nth consecutive one
    pub const ERROR_LOG_EVERY: u32 = 10;
}
