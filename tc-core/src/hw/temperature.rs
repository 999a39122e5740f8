//! Representative system temperature for curve mode
//!
//! Probes a fixed list of well-known sensor files first, then every
//! `temp*_input` under hwmon, and finally the output of `sensors`. The first
//! plausible reading wins. When nothing plausible turns up the answer is
//! "unknown", never a guess.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use regex::Regex;
use tracing::{debug, trace};

use crate::constants::{paths, temperature};
use crate::engine::TemperatureSource;

/// Convert a raw sensor value to whole °C.
///
/// Values above 1000 are millidegrees. Readings outside (0, 120) °C are
/// treated as bogus.
pub fn parse_celsius(raw: &str) -> Option<i32> {
    let value: f64 = raw.trim().parse().ok()?;
    let celsius = if value > temperature::MILLIDEGREE_THRESHOLD {
        value / 1000.0
    } else {
        value
    };
    if celsius > temperature::PLAUSIBLE_MIN_CELSIUS && celsius < temperature::PLAUSIBLE_MAX_CELSIUS
    {
        Some(celsius as i32)
    } else {
        None
    }
}

/// Pull a CPU temperature out of `sensors` output
pub fn parse_sensors_output(output: &str) -> Option<i32> {
    let line_re =
        Regex::new(r"^\s*(Core 0|CPU|Tctl|Package id 0)[^:]*:\s*\+?(-?\d+(?:\.\d+)?)\s*°C").ok()?;
    output.lines().find_map(|line| {
        let caps = line_re.captures(line)?;
        parse_celsius(caps.get(2)?.as_str())
    })
}

fn read_sensor(path: &Path) -> Option<i32> {
    let raw = fs::read_to_string(path).ok()?;
    let celsius = parse_celsius(&raw);
    trace!(path = %path.display(), ?celsius, "Temperature probe");
    celsius
}

/// Temperature source backed by sysfs, with an optional `sensors` fallback
#[derive(Debug, Clone)]
pub struct SystemTemperature {
    preferred: Vec<PathBuf>,
    hwmon_base: PathBuf,
    use_sensors: bool,
}

impl SystemTemperature {
    pub fn new() -> Self {
        let hwmon_base = PathBuf::from(paths::HWMON_BASE);
        Self {
            preferred: vec![
                PathBuf::from(paths::THERMAL_ZONE0),
                hwmon_base.join("hwmon0/temp1_input"),
                hwmon_base.join("hwmon1/temp1_input"),
            ],
            hwmon_base,
            use_sensors: true,
        }
    }

    /// Probe only under `hwmon_base`, without the `sensors` fallback
    pub fn with_hwmon_base(hwmon_base: impl Into<PathBuf>) -> Self {
        let hwmon_base = hwmon_base.into();
        Self {
            preferred: vec![
                hwmon_base.join("hwmon0/temp1_input"),
                hwmon_base.join("hwmon1/temp1_input"),
            ],
            hwmon_base,
            use_sensors: false,
        }
    }

    fn discovered_inputs(&self) -> Vec<PathBuf> {
        let Ok(chips) = fs::read_dir(&self.hwmon_base) else {
            return Vec::new();
        };
        let mut inputs: Vec<PathBuf> = chips
            .flatten()
            .filter_map(|chip| fs::read_dir(chip.path()).ok())
            .flat_map(|files| files.flatten().map(|f| f.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("temp") && n.ends_with("_input"))
                    .unwrap_or(false)
            })
            .collect();
        inputs.sort();
        inputs
    }

    fn read_from_sensors(&self) -> Option<i32> {
        let output = Command::new("sensors").output().ok()?;
        if !output.status.success() {
            return None;
        }
        parse_sensors_output(&String::from_utf8_lossy(&output.stdout))
    }
}

impl Default for SystemTemperature {
    fn default() -> Self {
        Self::new()
    }
}

impl TemperatureSource for SystemTemperature {
    fn read(&self) -> Option<i32> {
        if let Some(t) = self.preferred.iter().find_map(|p| read_sensor(p)) {
            return Some(t);
        }
        if let Some(t) = self.discovered_inputs().iter().find_map(|p| read_sensor(p)) {
            return Some(t);
        }
        if self.use_sensors {
            if let Some(t) = self.read_from_sensors() {
                return Some(t);
            }
        }
        debug!("No usable temperature sensor");
        None
    }
}
