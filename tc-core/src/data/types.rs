//! Core data types

use serde::{Deserialize, Serialize};
use tc_gpu::OverclockSettings;

use super::validation::validate_curve_points;
use crate::Result;

/// A single curve point: temperature (°C) -> fan speed (%)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub temperature: i32,
    pub speed: i32,
}

impl CurvePoint {
    pub const fn new(temperature: i32, speed: i32) -> Self {
        Self { temperature, speed }
    }
}

impl From<(i32, i32)> for CurvePoint {
    fn from((temperature, speed): (i32, i32)) -> Self {
        Self { temperature, speed }
    }
}

/// A validated fan curve, sorted ascending by temperature.
///
/// Immutable once built; replacing a fan's curve means building a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Curve {
    points: Vec<CurvePoint>,
}

impl Curve {
    /// Validate and sort the points.
    ///
    /// The sort is stable, so among duplicate temperatures the input order
    /// decides which point comes first.
    pub fn new(mut points: Vec<CurvePoint>) -> Result<Self> {
        validate_curve_points(&points)?;
        points.sort_by_key(|p| p.temperature);
        Ok(Self { points })
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }
}

/// Requested or reported fan mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum FanMode {
    /// Firmware/driver controls the fan
    Auto,
    /// Manual control at a fixed percentage
    Fixed { speed: i32 },
    /// Manual control driven by a temperature curve
    Curve { points: Vec<CurvePoint> },
}

impl FanMode {
    pub fn label(&self) -> &'static str {
        match self {
            FanMode::Auto => "auto",
            FanMode::Fixed { .. } => "fixed",
            FanMode::Curve { .. } => "curve",
        }
    }
}

/// Named bundle of overclock settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    /// GPU the profile targets; the daemon default is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<u32>,
    #[serde(default)]
    pub settings: OverclockSettings,
}

impl Profile {
    pub fn new(name: impl Into<String>, settings: OverclockSettings) -> Self {
        Self {
            name: name.into(),
            device_id: None,
            settings,
        }
    }
}

/// Snapshot of one controllable fan for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanInfo {
    pub id: usize,
    pub name: String,
    /// Current duty in percent, when readable
    pub speed: Option<i32>,
    pub rpm: Option<u32>,
    #[serde(flatten)]
    pub mode: FanMode,
}
