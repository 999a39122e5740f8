//! NVIDIA GPU overclock control
//!
//! Power and temperature limits via `nvidia-smi`, clock offsets and fan
//! override via `nvidia-settings` (requires X11 and Coolbits).

use crate::constants::NVIDIA_PERF_LEVEL;
use crate::{
    classify_failure, run_tool, OverclockField, OverclockSettings, OverclockSink, Result,
    SinkResponse,
};
use tc_error::TunectlError;
use tracing::{debug, info};

/// Check whether `nvidia-smi` knows about this device index
pub fn is_present(device_id: u32) -> bool {
    let index = device_id.to_string();
    match run_tool(
        "nvidia-smi",
        &["--query-gpu=name", "--format=csv,noheader", "-i", &index],
    ) {
        Ok(out) => !out.trim().is_empty(),
        Err(_) => false,
    }
}

/// Sink driving one NVIDIA GPU through the vendor tools
pub struct NvidiaSink {
    index: u32,
}

impl NvidiaSink {
    pub fn new(index: u32) -> Self {
        Self { index }
    }

    fn smi(&self, args: &[&str]) -> std::result::Result<String, SinkResponse> {
        let index = self.index.to_string();
        let mut full = vec!["-i", index.as_str()];
        full.extend_from_slice(args);
        run_tool("nvidia-smi", &full)
    }

    fn assign(&self, attribute: &str, value: i32) -> SinkResponse {
        if !cfg!(target_os = "linux") {
            return SinkResponse::Warning(format!(
                "{} requires an external tuning tool on this platform",
                attribute
            ));
        }
        let assignment = format!("[gpu:{}]/{}={}", self.index, attribute, value);
        match run_tool("nvidia-settings", &["-a", &assignment]) {
            Ok(out) if out.contains("ERROR") => classify_failure(out),
            Ok(_) => SinkResponse::ok(),
            Err(failure) => failure,
        }
    }

    fn query_attribute(&self, attribute: &str) -> Option<i32> {
        let query = format!("[gpu:{}]/{}", self.index, attribute);
        run_tool("nvidia-settings", &["-q", &query, "-t"])
            .ok()
            .and_then(|out| parse_terse_int(&out))
    }

    fn query_power(&self) -> Option<(f64, f64)> {
        self.smi(&[
            "--query-gpu=power.limit,power.default_limit",
            "--format=csv,noheader,nounits",
        ])
        .ok()
        .and_then(|out| parse_power_pair(&out))
    }

    fn set_power_limit(&self, percent: i32) -> SinkResponse {
        let default_watts = match self.smi(&[
            "--query-gpu=power.default_limit",
            "--format=csv,noheader,nounits",
        ]) {
            Ok(out) => match out.trim().parse::<f64>() {
                Ok(w) => w,
                Err(_) => {
                    return SinkResponse::Error(format!(
                        "could not parse default power limit '{}'",
                        out.trim()
                    ))
                }
            },
            Err(failure) => return failure,
        };

        let watts = power_limit_watts(default_watts, percent);
        let watts_arg = watts.to_string();
        match self.smi(&["-pl", &watts_arg]) {
            Ok(_) => SinkResponse::Ok(Some(format!("{} W", watts))),
            Err(failure) => failure,
        }
    }

    fn set_temperature_limit(&self, celsius: i32) -> SinkResponse {
        let arg = celsius.to_string();
        match self.smi(&["-gtt", &arg]) {
            Ok(_) => SinkResponse::ok(),
            Err(failure) => failure,
        }
    }

    fn set_fan_speed(&self, percent: i32) -> SinkResponse {
        match self.assign("GPUFanControlState", 1) {
            SinkResponse::Ok(_) => {}
            other => return other,
        }
        if !cfg!(target_os = "linux") {
            return SinkResponse::Warning("fan control requires an external tuning tool".into());
        }
        let assignment = format!("[fan:{}]/GPUTargetFanSpeed={}", self.index, percent);
        match run_tool("nvidia-settings", &["-a", &assignment]) {
            Ok(out) if out.contains("ERROR") => classify_failure(out),
            Ok(_) => SinkResponse::ok(),
            Err(failure) => failure,
        }
    }
}

impl OverclockSink for NvidiaSink {
    fn apply(&self, field: &OverclockField) -> SinkResponse {
        debug!(gpu = self.index, field = field.name(), "Applying NVIDIA setting");
        let response = match *field {
            OverclockField::CoreClockOffset(v) => {
                self.assign(&format!("GPUGraphicsClockOffset[{}]", NVIDIA_PERF_LEVEL), v)
            }
            OverclockField::MemoryClockOffset(v) => {
                self.assign(&format!("GPUMemoryTransferRateOffset[{}]", NVIDIA_PERF_LEVEL), v)
            }
            OverclockField::PowerLimit(v) => self.set_power_limit(v),
            OverclockField::TemperatureLimit(v) => self.set_temperature_limit(v),
            OverclockField::FanSpeed(v) => self.set_fan_speed(v),
            OverclockField::VoltageOffset(_) => SinkResponse::Warning(
                "voltage offset is not supported by the NVIDIA driver".to_string(),
            ),
        };
        if let SinkResponse::Ok(_) = response {
            info!(gpu = self.index, "{}", field.describe());
        }
        response
    }

    fn read_settings(&self) -> Result<OverclockSettings> {
        if !is_present(self.index) {
            return Err(TunectlError::not_found(format!("NVIDIA GPU {}", self.index)));
        }

        let mut settings = OverclockSettings::default();
        if cfg!(target_os = "linux") {
            if let Some(v) =
                self.query_attribute(&format!("GPUGraphicsClockOffset[{}]", NVIDIA_PERF_LEVEL))
            {
                settings.core_clock_offset = v;
            }
            if let Some(v) =
                self.query_attribute(&format!("GPUMemoryTransferRateOffset[{}]", NVIDIA_PERF_LEVEL))
            {
                settings.memory_clock_offset = v;
            }
        }
        if let Some((limit, default)) = self.query_power() {
            settings.power_limit = power_limit_percent(limit, default);
        }
        Ok(settings)
    }
}

/// Watts to request for `percent` of the board default, rounded
pub fn power_limit_watts(default_watts: f64, percent: i32) -> u32 {
    (default_watts * percent as f64 / 100.0).round().max(0.0) as u32
}

/// Current limit as percent of default; 0 when the default is unknown
pub fn power_limit_percent(limit_watts: f64, default_watts: f64) -> i32 {
    if default_watts <= 0.0 {
        return 0;
    }
    (limit_watts / default_watts * 100.0).round() as i32
}

/// Parse `nvidia-settings -t` output, which is a single integer line
fn parse_terse_int(output: &str) -> Option<i32> {
    output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .and_then(|l| l.parse().ok())
}

/// Parse a `limit, default` CSV line from nvidia-smi
fn parse_power_pair(output: &str) -> Option<(f64, f64)> {
    let line = output.lines().find(|l| !l.trim().is_empty())?;
    let mut parts = line.split(',').map(str::trim);
    let limit = parts.next()?.parse().ok()?;
    let default = parts.next()?.parse().ok()?;
    Some((limit, default))
}
