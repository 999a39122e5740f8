//! tunectl - fan curve and GPU overclock control plane
//!
//! Facade over the workspace crates:
//!
//! - [`tc_error`] - unified error type
//! - [`tc_gpu`] - GPU vendor detection and per-field actuation sinks
//! - [`tc_core`] - fan modes, curve loops, overclock application, profiles
//! - [`tc_protocol`] - IPC messages spoken by `tunectld`

pub use tc_core;
pub use tc_error;
pub use tc_gpu;
pub use tc_protocol;

pub use tc_core::{
    interpolate, validate_curve_points, validate_fan_speed, validate_overclock_settings,
    validate_profile_name, ApplyOutcome, Curve, CurvePoint, DaemonConfig, FanActuator, FanInfo,
    FanMode, FieldOutcome, JsonProfileStore, ModeController, OverclockResult, OverclockSettings,
    Profile, ProfileStore, Result, SettingsApplier, TemperatureSource, TuningService,
};
pub use tc_error::{ErrorKind, TunectlError};
pub use tc_gpu::{GpuBackend, GpuVendor, OverclockField, OverclockSink, SinkResponse};
