//! tunectl core library
//!
//! The hardware actuation control plane: per-fan mode state machine with
//! curve sampling loops, and GPU overclock application with per-field
//! outcome aggregation.
//!
//! # Module Structure
//!
//! - `data/` - Data types, validation, profile persistence
//! - `engine/` - Interpolator, mode controller, settings applier
//! - `hw/` - hwmon fans and temperature probes
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tc_core::{discover_fans, FanMode, ModeController, SystemTemperature};
//!
//! # async fn run() -> tc_core::Result<()> {
//! let fans = discover_fans(std::path::Path::new("/sys/class/hwmon"))
//!     .into_iter()
//!     .map(|f| Arc::new(f) as Arc<dyn tc_core::FanActuator>)
//!     .collect();
//! let controller = ModeController::new(fans, Arc::new(SystemTemperature::new()));
//! controller.set_mode(0, FanMode::Fixed { speed: 40 }).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod data;
pub mod engine;
pub mod hw;

pub use config::DaemonConfig;
pub use data::{
    validate_curve_points, validate_fan_speed, validate_overclock_settings, validate_profile_name,
    Curve, CurvePoint, FanInfo, FanMode, GpuVendor, JsonProfileStore, OverclockField,
    OverclockSettings, Profile, ProfileStore,
};
pub use engine::{
    interpolate, ApplyOutcome, FanActuator, FieldOutcome, ModeController, OverclockResult,
    SettingsApplier, TemperatureSource, TuningService,
};
pub use hw::{discover_fans, HwmonFan, SystemTemperature};

pub use tc_error::{ErrorKind, TunectlError};

/// Result type alias using TunectlError
pub type Result<T> = std::result::Result<T, TunectlError>;
