//! Fan control through Linux hwmon PWM files
//!
//! # PWM Values
//!
//! hwmon PWM duty runs from 0 to 255. Percentages are converted with
//! integer truncation: `pwm = percent * 255 / 100`.
//!
//! # Enable Modes
//!
//! `pwmN_enable` selects who drives the fan:
//! - 1 = manual (software control)
//! - 2 = automatic (firmware/chip thermal control)

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use tc_error::TunectlError;
use tc_gpu::gpu_const::pwm;
use tracing::{debug, info, warn};

use crate::constants::pwm_enable;
use crate::engine::FanActuator;
use crate::Result;

/// One `pwmN` control file and its siblings
#[derive(Debug, Clone)]
pub struct HwmonFan {
    name: String,
    pwm_path: PathBuf,
    enable_path: PathBuf,
    rpm_path: Option<PathBuf>,
}

impl HwmonFan {
    /// Describe the fan controlled by `pwm_path`; `id` only feeds the name
    pub fn new(id: usize, pwm_path: impl Into<PathBuf>) -> Self {
        let pwm_path = pwm_path.into();
        let file_name = pwm_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let channel = file_name.trim_start_matches("pwm").to_string();
        let enable_path = pwm_path.with_file_name(format!("{}_enable", file_name));
        let rpm_path = pwm_path
            .parent()
            .map(|dir| dir.join(format!("fan{}_input", channel)))
            .filter(|p| p.exists());

        Self {
            name: format!("{} (ID:{})", file_name, id),
            pwm_path,
            enable_path,
            rpm_path,
        }
    }

    pub fn pwm_path(&self) -> &Path {
        &self.pwm_path
    }

    fn write_file(&self, path: &Path, value: &str) -> Result<()> {
        fs::write(path, value).map_err(|e| {
            if e.kind() == io::ErrorKind::PermissionDenied {
                TunectlError::PermissionDenied(format!(
                    "cannot write {} (run tunectld as root)",
                    path.display()
                ))
            } else {
                TunectlError::PwmWrite {
                    path: path.to_path_buf(),
                    reason: format!("Failed to write '{}': {}", value, e),
                }
            }
        })
    }

    fn read_pwm(&self) -> Result<u8> {
        let content = fs::read_to_string(&self.pwm_path).map_err(|e| TunectlError::PwmRead {
            path: self.pwm_path.clone(),
            reason: format!("Failed to read: {}", e),
        })?;
        content.trim().parse::<u8>().map_err(|e| TunectlError::PwmRead {
            path: self.pwm_path.clone(),
            reason: format!("Failed to parse '{}': {}", content.trim(), e),
        })
    }
}

impl FanActuator for HwmonFan {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn enable_manual(&self) -> Result<()> {
        self.write_file(&self.enable_path, pwm_enable::MANUAL)
    }

    fn write_speed(&self, percent: i32) -> Result<()> {
        let value = pwm::from_percent(percent.clamp(0, 100) as u32);
        self.write_file(&self.pwm_path, &value.to_string())
    }

    fn release_manual(&self) -> Result<()> {
        self.write_file(&self.enable_path, pwm_enable::AUTOMATIC)
    }

    fn read_manual_speed(&self) -> Result<Option<i32>> {
        let enable = fs::read_to_string(&self.enable_path).map_err(|e| TunectlError::PwmRead {
            path: self.enable_path.clone(),
            reason: format!("Failed to read: {}", e),
        })?;
        if enable.trim() != pwm_enable::MANUAL {
            return Ok(None);
        }
        Ok(Some(pwm::to_percent(self.read_pwm()?) as i32))
    }

    fn read_speed(&self) -> Option<i32> {
        self.read_pwm().ok().map(|v| pwm::to_percent(v) as i32)
    }

    fn read_rpm(&self) -> Option<u32> {
        let path = self.rpm_path.as_ref()?;
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }
}

/// Sort key for `hwmonN` directory names
fn hwmon_index(path: &Path) -> u32 {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix("hwmon"))
        .and_then(|n| n.parse().ok())
        .unwrap_or(u32::MAX)
}

/// Find every controllable fan under an hwmon root.
///
/// Only bare `pwmN` files count; `pwmN_enable`, `pwmN_mode` and the
/// auto-point tables are siblings, not fans. Fan ids are positions in the
/// returned list.
pub fn discover_fans(hwmon_base: &Path) -> Vec<HwmonFan> {
    if !cfg!(target_os = "linux") {
        debug!("hwmon fan control is only available on Linux");
        return Vec::new();
    }

    let entries = match fs::read_dir(hwmon_base) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot read {}: {}", hwmon_base.display(), e);
            return Vec::new();
        }
    };

    let mut chips: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    chips.sort_by_key(|p| hwmon_index(p));

    let pwm_file = match Regex::new(r"^pwm(\d+)$") {
        Ok(re) => re,
        Err(e) => {
            warn!("Invalid PWM pattern: {}", e);
            return Vec::new();
        }
    };

    let mut pwm_paths = Vec::new();
    for chip in chips {
        let Ok(files) = fs::read_dir(&chip) else {
            continue;
        };
        let mut channels: Vec<(u32, PathBuf)> = files
            .flatten()
            .filter_map(|f| {
                let name = f.file_name().to_string_lossy().into_owned();
                let channel = pwm_file.captures(&name)?.get(1)?.as_str().parse().ok()?;
                Some((channel, f.path()))
            })
            .collect();
        channels.sort_by_key(|(n, _)| *n);
        pwm_paths.extend(channels.into_iter().map(|(_, p)| p));
    }

    let fans: Vec<HwmonFan> = pwm_paths
        .into_iter()
        .enumerate()
        .map(|(id, path)| HwmonFan::new(id, path))
        .collect();

    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    if !fans.is_empty() && euid != 0 {
        warn!("Not running as root; fan control writes will likely be refused");
    }
    info!("Discovered {} controllable fan(s)", fans.len());
    fans
}
