//! Data types, validation, and profile persistence

mod persistence;
mod types;
mod validation;

pub use persistence::{JsonProfileStore, ProfileStore};
pub use types::{Curve, CurvePoint, FanInfo, FanMode, Profile};
pub use validation::{
    validate_curve_points, validate_fan_speed, validate_overclock_settings, validate_profile_name,
};

// Re-export GPU types from tc-gpu crate
pub use tc_gpu::{GpuVendor, OverclockField, OverclockSettings};
