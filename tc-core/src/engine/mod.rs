//! Control engine: interpolation, fan modes, and GPU tuning

mod curve;
mod mode;
mod overclock;
mod tuning;

pub use curve::interpolate;
pub use mode::{FanActuator, ModeController, TemperatureSource};
pub use overclock::{ApplyOutcome, FieldOutcome, OverclockResult, SettingsApplier};
pub use tuning::TuningService;
