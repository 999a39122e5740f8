//! GPU data types shared by the vendor sinks and the settings applier

use serde::{Deserialize, Serialize};

/// GPU vendor enumeration
///
/// Resolved once per apply/read call and used to pick the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Unknown,
}

impl std::fmt::Display for GpuVendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuVendor::Nvidia => write!(f, "NVIDIA"),
            GpuVendor::Amd => write!(f, "AMD"),
            GpuVendor::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Requested overclock parameters for one GPU.
///
/// Zero in any field means "leave unchanged", not "set to zero".
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverclockSettings {
    /// Core clock offset in MHz
    pub core_clock_offset: i32,
    /// Memory clock offset in MHz
    pub memory_clock_offset: i32,
    /// Power limit as percent of the board default
    pub power_limit: i32,
    /// Temperature limit in °C
    pub temperature_limit: i32,
    /// Fan speed percent, 0 leaves the fan unmanaged
    pub fan_speed: i32,
    /// Voltage offset in mV
    pub voltage_offset: f64,
}

impl OverclockSettings {
    /// Fields that differ from their no-change sentinel, in application order
    pub fn configured_fields(&self) -> Vec<OverclockField> {
        let mut fields = Vec::new();
        if self.core_clock_offset != 0 {
            fields.push(OverclockField::CoreClockOffset(self.core_clock_offset));
        }
        if self.memory_clock_offset != 0 {
            fields.push(OverclockField::MemoryClockOffset(self.memory_clock_offset));
        }
        if self.power_limit != 0 {
            fields.push(OverclockField::PowerLimit(self.power_limit));
        }
        if self.temperature_limit != 0 {
            fields.push(OverclockField::TemperatureLimit(self.temperature_limit));
        }
        if self.fan_speed != 0 {
            fields.push(OverclockField::FanSpeed(self.fan_speed));
        }
        if self.voltage_offset != 0.0 {
            fields.push(OverclockField::VoltageOffset(self.voltage_offset));
        }
        fields
    }

    pub fn is_empty(&self) -> bool {
        self.configured_fields().is_empty()
    }
}

/// A single overclock parameter together with its requested value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OverclockField {
    CoreClockOffset(i32),
    MemoryClockOffset(i32),
    PowerLimit(i32),
    TemperatureLimit(i32),
    FanSpeed(i32),
    VoltageOffset(f64),
}

impl OverclockField {
    /// Wire name of the field
    pub fn name(&self) -> &'static str {
        match self {
            OverclockField::CoreClockOffset(_) => "core_clock_offset",
            OverclockField::MemoryClockOffset(_) => "memory_clock_offset",
            OverclockField::PowerLimit(_) => "power_limit",
            OverclockField::TemperatureLimit(_) => "temperature_limit",
            OverclockField::FanSpeed(_) => "fan_speed",
            OverclockField::VoltageOffset(_) => "voltage_offset",
        }
    }

    /// Human-readable description used in `applied` entries
    pub fn describe(&self) -> String {
        match *self {
            OverclockField::CoreClockOffset(v) => format!("core clock offset: {:+} MHz", v),
            OverclockField::MemoryClockOffset(v) => format!("memory clock offset: {:+} MHz", v),
            OverclockField::PowerLimit(v) => format!("power limit: {}%", v),
            OverclockField::TemperatureLimit(v) => format!("temperature limit: {}°C", v),
            OverclockField::FanSpeed(v) => format!("fan speed: {}%", v),
            OverclockField::VoltageOffset(v) => format!("voltage offset: {:+} mV", v),
        }
    }
}

/// What a sink reports back for one field
#[derive(Debug, Clone, PartialEq)]
pub enum SinkResponse {
    /// Field took effect; optional detail appended to the description
    Ok(Option<String>),
    /// Non-fatal failure (missing privilege, tool not installed)
    Warning(String),
    /// Fatal failure for this field
    Error(String),
}

impl SinkResponse {
    pub fn ok() -> Self {
        SinkResponse::Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_fields_are_not_configured() {
        let settings = OverclockSettings {
            core_clock_offset: 100,
            power_limit: 110,
            ..Default::default()
        };
        assert_eq!(
            settings.configured_fields(),
            vec![
                OverclockField::CoreClockOffset(100),
                OverclockField::PowerLimit(110)
            ]
        );
        assert!(OverclockSettings::default().is_empty());
    }

    #[test]
    fn test_field_descriptions() {
        assert_eq!(
            OverclockField::CoreClockOffset(100).describe(),
            "core clock offset: +100 MHz"
        );
        assert_eq!(
            OverclockField::MemoryClockOffset(-200).describe(),
            "memory clock offset: -200 MHz"
        );
        assert_eq!(OverclockField::FanSpeed(70).describe(), "fan speed: 70%");
    }

    #[test]
    fn test_settings_deserialize_with_missing_fields() {
        let settings: OverclockSettings =
            serde_json::from_str(r#"{"core_clock_offset": 50}"#).unwrap();
        assert_eq!(settings.core_clock_offset, 50);
        assert_eq!(settings.voltage_offset, 0.0);
    }
}
