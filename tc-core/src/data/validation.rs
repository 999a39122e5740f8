//! Input validation for caller-supplied data
//!
//! Every check returns a `Validation` error naming the field and the
//! violated constraint. Nothing here touches hardware.

use tc_error::TunectlError;
use tc_gpu::OverclockSettings;

use super::types::CurvePoint;
use crate::constants::{curve, limits, profile};
use crate::Result;

/// Validates a fixed fan speed percentage
pub fn validate_fan_speed(speed: i32) -> Result<()> {
    let (min, max) = limits::FAN_SPEED_PERCENT;
    if !(min..=max).contains(&speed) {
        return Err(TunectlError::validation(
            "speed",
            format!("must be between {} and {}, got {}", min, max, speed),
        ));
    }
    Ok(())
}

/// Validates curve points: at least two, every value within [0, 100]
pub fn validate_curve_points(points: &[CurvePoint]) -> Result<()> {
    if points.len() < curve::MIN_POINTS {
        return Err(TunectlError::validation(
            "curve",
            format!("must have at least {} points", curve::MIN_POINTS),
        ));
    }

    let range = curve::MIN_VALUE..=curve::MAX_VALUE;
    for (i, point) in points.iter().enumerate() {
        if !range.contains(&point.temperature) {
            return Err(TunectlError::validation(
                "curve",
                format!(
                    "point {} temperature {} is outside {}-{}",
                    i,
                    point.temperature,
                    curve::MIN_VALUE,
                    curve::MAX_VALUE
                ),
            ));
        }
        if !range.contains(&point.speed) {
            return Err(TunectlError::validation(
                "curve",
                format!(
                    "point {} speed {} is outside {}-{}",
                    i,
                    point.speed,
                    curve::MIN_VALUE,
                    curve::MAX_VALUE
                ),
            ));
        }
    }
    Ok(())
}

fn check_range(field: &str, value: i32, (min, max): (i32, i32), unit: &str) -> Result<()> {
    // zero is the "leave unchanged" sentinel
    if value != 0 && !(min..=max).contains(&value) {
        return Err(TunectlError::validation(
            field,
            format!("must be between {}{unit} and {}{unit}, got {}", min, max, value),
        ));
    }
    Ok(())
}

/// Validates every configured field of an overclock request
pub fn validate_overclock_settings(settings: &OverclockSettings) -> Result<()> {
    check_range(
        "core_clock_offset",
        settings.core_clock_offset,
        limits::CORE_CLOCK_OFFSET_MHZ,
        " MHz",
    )?;
    check_range(
        "memory_clock_offset",
        settings.memory_clock_offset,
        limits::MEMORY_CLOCK_OFFSET_MHZ,
        " MHz",
    )?;
    check_range("power_limit", settings.power_limit, limits::POWER_LIMIT_PERCENT, "%")?;
    check_range(
        "temperature_limit",
        settings.temperature_limit,
        limits::TEMPERATURE_LIMIT_CELSIUS,
        "°C",
    )?;
    check_range("fan_speed", settings.fan_speed, limits::FAN_SPEED_PERCENT, "%")?;

    let voltage = settings.voltage_offset;
    let (min, max) = limits::VOLTAGE_OFFSET_MV;
    if !voltage.is_finite() || (voltage != 0.0 && !(min..=max).contains(&voltage)) {
        return Err(TunectlError::validation(
            "voltage_offset",
            format!("must be between {} mV and {} mV, got {}", min, max, voltage),
        ));
    }
    Ok(())
}

/// Validates a user-supplied profile name.
///
/// Names become file names, so separators and leading dots are refused.
pub fn validate_profile_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(TunectlError::validation("name", "profile name cannot be empty"));
    }
    if name == profile::CURRENT_SNAPSHOT {
        return Err(TunectlError::validation(
            "name",
            format!("'{}' is reserved", profile::CURRENT_SNAPSHOT),
        ));
    }
    if name.len() > profile::MAX_NAME_LEN {
        return Err(TunectlError::validation(
            "name",
            format!("must be at most {} bytes", profile::MAX_NAME_LEN),
        ));
    }
    if name.starts_with('.') || name.contains(['/', '\\', '\0']) {
        return Err(TunectlError::validation(
            "name",
            "must not contain path separators or start with '.'",
        ));
    }
    Ok(())
}
