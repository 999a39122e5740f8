//! AMD GPU overclock control
//!
//! Everything goes through amdgpu sysfs under `/sys/class/drm/card*/device`.
//! Writes need root; a permission failure is reported as a warning so the
//! rest of the batch can still proceed.

use crate::{
    classify_io_error, gpu_const, OverclockField, OverclockSettings, OverclockSink, Result,
    SinkResponse,
};
use std::fs;
use std::path::{Path, PathBuf};
use tc_error::TunectlError;
use tracing::{debug, info};

/// Find the hwmon directory belonging to an amdgpu device
pub fn find_hwmon(device_path: &Path) -> Option<PathBuf> {
    let hwmon_dir = device_path.join("hwmon");
    let mut dirs: Vec<PathBuf> = fs::read_dir(&hwmon_dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with("hwmon"))
                .unwrap_or(false)
        })
        .collect();
    dirs.sort();
    dirs.into_iter().next()
}

/// Index of the highest DPM state in a `pp_dpm_*` listing
fn highest_dpm_state(listing: &str) -> Option<u32> {
    listing
        .lines()
        .filter_map(|line| line.split(':').next()?.trim().parse::<u32>().ok())
        .max()
}

fn read_u64(path: &Path) -> Option<u64> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Sink driving one amdgpu device
pub struct AmdSink {
    device_path: PathBuf,
    hwmon_path: Option<PathBuf>,
}

impl AmdSink {
    pub fn new(device_path: impl Into<PathBuf>) -> Self {
        let device_path = device_path.into();
        let hwmon_path = find_hwmon(&device_path);
        debug!(device = %device_path.display(), hwmon = ?hwmon_path, "Created AMD sink");
        Self {
            device_path,
            hwmon_path,
        }
    }

    fn write(&self, path: &Path, value: &str) -> std::result::Result<(), SinkResponse> {
        fs::write(path, value).map_err(|e| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            classify_io_error(&name, &e)
        })
    }

    /// Pin the clock domain to its highest DPM state
    fn force_top_state(&self, dpm_file: &str) -> SinkResponse {
        let dpm_path = self.device_path.join(dpm_file);
        let listing = match fs::read_to_string(&dpm_path) {
            Ok(s) => s,
            Err(e) => return classify_io_error(dpm_file, &e),
        };
        let Some(top) = highest_dpm_state(&listing) else {
            return SinkResponse::Error(format!("{} lists no DPM states", dpm_file));
        };

        if let Err(failure) = self.write(
            &self.device_path.join("power_dpm_force_performance_level"),
            "manual",
        ) {
            return failure;
        }
        match self.write(&dpm_path, &top.to_string()) {
            Ok(()) => SinkResponse::Ok(Some(format!("forced DPM state {}", top))),
            Err(failure) => failure,
        }
    }

    fn set_power_limit(&self, percent: i32) -> SinkResponse {
        let Some(hwmon) = &self.hwmon_path else {
            return SinkResponse::Warning("power limit control not exposed (no hwmon)".into());
        };
        let Some(default_uw) = read_u64(&hwmon.join("power1_cap_default")) else {
            return SinkResponse::Warning("power limit control not exposed by amdgpu".into());
        };
        let cap_uw = default_uw * percent.max(0) as u64 / 100;
        match self.write(&hwmon.join("power1_cap"), &cap_uw.to_string()) {
            Ok(()) => SinkResponse::Ok(Some(format!(
                "{} W",
                cap_uw / gpu_const::MICROWATTS_PER_WATT
            ))),
            Err(failure) => failure,
        }
    }

    fn set_fan_speed(&self, percent: i32) -> SinkResponse {
        let Some(hwmon) = &self.hwmon_path else {
            return SinkResponse::Warning("fan control not exposed (no hwmon)".into());
        };
        if let Err(failure) = self.write(&hwmon.join("pwm1_enable"), "1") {
            return failure;
        }
        let pwm = gpu_const::pwm::from_percent(percent.clamp(0, 100) as u32);
        match self.write(&hwmon.join("pwm1"), &pwm.to_string()) {
            Ok(()) => SinkResponse::ok(),
            Err(failure) => failure,
        }
    }

    fn set_voltage_offset(&self, millivolts: f64) -> SinkResponse {
        let od_path = self.device_path.join("pp_od_clk_voltage");
        if !od_path.exists() {
            return SinkResponse::Warning("voltage offset not exposed (overdrive disabled)".into());
        }
        let command = format!("vo {}\n", millivolts.round() as i64);
        if let Err(failure) = self.write(&od_path, &command) {
            return failure;
        }
        match self.write(&od_path, "c\n") {
            Ok(()) => SinkResponse::ok(),
            Err(failure) => failure,
        }
    }
}

impl OverclockSink for AmdSink {
    fn apply(&self, field: &OverclockField) -> SinkResponse {
        debug!(device = %self.device_path.display(), field = field.name(), "Applying AMD setting");
        let response = match *field {
            OverclockField::CoreClockOffset(_) => self.force_top_state("pp_dpm_sclk"),
            OverclockField::MemoryClockOffset(_) => self.force_top_state("pp_dpm_mclk"),
            OverclockField::PowerLimit(v) => self.set_power_limit(v),
            OverclockField::TemperatureLimit(_) => SinkResponse::Warning(
                "temperature limit is not adjustable through amdgpu".to_string(),
            ),
            OverclockField::FanSpeed(v) => self.set_fan_speed(v),
            OverclockField::VoltageOffset(v) => self.set_voltage_offset(v),
        };
        if let SinkResponse::Ok(_) = response {
            info!(device = %self.device_path.display(), "{}", field.describe());
        }
        response
    }

    fn read_settings(&self) -> Result<OverclockSettings> {
        if !self.device_path.exists() {
            return Err(TunectlError::not_found(format!(
                "AMD GPU at {}",
                self.device_path.display()
            )));
        }

        let mut settings = OverclockSettings::default();
        if let Some(hwmon) = &self.hwmon_path {
            if let (Some(cap), Some(default)) = (
                read_u64(&hwmon.join("power1_cap")),
                read_u64(&hwmon.join("power1_cap_default")),
            ) {
                if default > 0 {
                    settings.power_limit = (cap * 100 / default) as i32;
                }
            }
            if read_u64(&hwmon.join("pwm1_enable")) == Some(1) {
                if let Some(pwm) = read_u64(&hwmon.join("pwm1")) {
                    settings.fan_speed = gpu_const::pwm::to_percent(pwm.min(255) as u8) as i32;
                }
            }
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_card() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let device = dir.path().join("card0/device");
        let hwmon = device.join("hwmon/hwmon3");
        fs::create_dir_all(&hwmon).unwrap();
        fs::write(device.join("vendor"), "0x1002\n").unwrap();
        fs::write(device.join("power_dpm_force_performance_level"), "auto\n").unwrap();
        fs::write(device.join("pp_dpm_sclk"), "0: 500Mhz\n1: 1200Mhz *\n2: 2100Mhz\n").unwrap();
        fs::write(hwmon.join("power1_cap_default"), "200000000\n").unwrap();
        fs::write(hwmon.join("power1_cap"), "200000000\n").unwrap();
        fs::write(hwmon.join("pwm1_enable"), "2\n").unwrap();
        fs::write(hwmon.join("pwm1"), "80\n").unwrap();
        (dir, device)
    }

    #[test]
    fn test_highest_dpm_state() {
        assert_eq!(highest_dpm_state("0: 500Mhz\n1: 800Mhz *\n2: 1200Mhz\n"), Some(2));
        assert_eq!(highest_dpm_state(""), None);
    }

    #[test]
    fn test_core_offset_forces_top_state() {
        let (_dir, device) = fake_card();
        let sink = AmdSink::new(&device);

        let response = sink.apply(&OverclockField::CoreClockOffset(100));
        assert_eq!(response, SinkResponse::Ok(Some("forced DPM state 2".into())));
        assert_eq!(
            fs::read_to_string(device.join("power_dpm_force_performance_level")).unwrap(),
            "manual"
        );
        assert_eq!(fs::read_to_string(device.join("pp_dpm_sclk")).unwrap(), "2");
    }

    #[test]
    fn test_power_limit_scales_default_cap() {
        let (_dir, device) = fake_card();
        let sink = AmdSink::new(&device);

        assert!(matches!(sink.apply(&OverclockField::PowerLimit(110)), SinkResponse::Ok(_)));
        assert_eq!(
            fs::read_to_string(device.join("hwmon/hwmon3/power1_cap")).unwrap(),
            "220000000"
        );
        assert_eq!(sink.read_settings().unwrap().power_limit, 110);
    }

    #[test]
    fn test_fan_speed_enables_manual_pwm() {
        let (_dir, device) = fake_card();
        let sink = AmdSink::new(&device);

        assert!(matches!(sink.apply(&OverclockField::FanSpeed(50)), SinkResponse::Ok(_)));
        let hwmon = device.join("hwmon/hwmon3");
        assert_eq!(fs::read_to_string(hwmon.join("pwm1_enable")).unwrap(), "1");
        assert_eq!(fs::read_to_string(hwmon.join("pwm1")).unwrap(), "127");
        assert_eq!(sink.read_settings().unwrap().fan_speed, 49);
    }

    #[test]
    fn test_missing_controls_are_warnings() {
        let (_dir, device) = fake_card();
        let sink = AmdSink::new(&device);

        assert!(matches!(
            sink.apply(&OverclockField::MemoryClockOffset(200)),
            SinkResponse::Warning(_)
        ));
        assert!(matches!(
            sink.apply(&OverclockField::VoltageOffset(-20.0)),
            SinkResponse::Warning(_)
        ));
        assert!(matches!(
            sink.apply(&OverclockField::TemperatureLimit(80)),
            SinkResponse::Warning(_)
        ));
    }
}
