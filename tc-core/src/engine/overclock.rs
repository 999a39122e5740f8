//! Overclock settings application with per-field outcome aggregation
//!
//! A request is validated as a whole, then every configured field is sent
//! to the vendor sink independently. Each field yields one [`FieldOutcome`]
//! and [`OverclockResult::from_outcomes`] is the only place that turns those
//! into the caller-visible lists.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tc_error::TunectlError;
use tc_gpu::{GpuBackend, GpuVendor, OverclockField, OverclockSettings, SinkResponse};
use tracing::{debug, info, warn};

use crate::data::validate_overclock_settings;
use crate::Result;

/// How a single field went
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOutcome {
    Applied(String),
    Warning(String),
    Error(String),
}

impl FieldOutcome {
    pub fn from_response(field: &OverclockField, response: SinkResponse) -> Self {
        match response {
            SinkResponse::Ok(None) => FieldOutcome::Applied(field.describe()),
            SinkResponse::Ok(Some(detail)) => {
                FieldOutcome::Applied(format!("{} ({})", field.describe(), detail))
            }
            SinkResponse::Warning(reason) => {
                FieldOutcome::Warning(format!("{}: {}", field.name(), reason))
            }
            SinkResponse::Error(reason) => {
                FieldOutcome::Error(format!("{}: {}", field.name(), reason))
            }
        }
    }
}

/// Three-valued summary of an apply call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyOutcome {
    /// Everything requested took effect
    Full,
    /// Applied with caveats: warnings, no errors
    Partial,
    /// At least one field failed
    Failed,
}

/// Aggregate result of applying one settings record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverclockResult {
    pub success: bool,
    pub applied: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl OverclockResult {
    /// Fold per-field outcomes, preserving their order
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = FieldOutcome>) -> Self {
        let mut result = OverclockResult::default();
        for outcome in outcomes {
            match outcome {
                FieldOutcome::Applied(msg) => result.applied.push(msg),
                FieldOutcome::Warning(msg) => result.warnings.push(msg),
                FieldOutcome::Error(msg) => result.errors.push(msg),
            }
        }
        result.success = result.errors.is_empty();
        result
    }

    pub fn outcome(&self) -> ApplyOutcome {
        if !self.errors.is_empty() {
            ApplyOutcome::Failed
        } else if !self.warnings.is_empty() {
            ApplyOutcome::Partial
        } else {
            ApplyOutcome::Full
        }
    }
}

/// Applies and reads GPU settings through the vendor-specific sinks
pub struct SettingsApplier {
    backend: Arc<dyn GpuBackend>,
}

impl SettingsApplier {
    pub fn new(backend: Arc<dyn GpuBackend>) -> Self {
        Self { backend }
    }

    fn resolve_vendor(&self, device_id: u32) -> Result<GpuVendor> {
        let vendor = self.backend.detect_vendor(device_id)?;
        if vendor == GpuVendor::Unknown {
            return Err(TunectlError::unsupported(format!(
                "GPU {} is from an unsupported vendor",
                device_id
            )));
        }
        Ok(vendor)
    }

    /// Validate, then apply every configured field.
    ///
    /// A validation failure or an unsupported vendor returns `Err` before
    /// any hardware write; per-field failures end up in the result.
    pub fn apply(&self, device_id: u32, settings: &OverclockSettings) -> Result<OverclockResult> {
        validate_overclock_settings(settings)?;
        let vendor = self.resolve_vendor(device_id)?;
        let sink = self.backend.sink(device_id, vendor)?;

        let fields = settings.configured_fields();
        debug!(gpu = device_id, %vendor, fields = fields.len(), "Applying overclock settings");

        let result = OverclockResult::from_outcomes(
            fields
                .iter()
                .map(|field| FieldOutcome::from_response(field, sink.apply(field))),
        );

        for warning in &result.warnings {
            warn!(gpu = device_id, "{}", warning);
        }
        for error in &result.errors {
            warn!(gpu = device_id, "Overclock field failed: {}", error);
        }
        info!(
            gpu = device_id,
            applied = result.applied.len(),
            warnings = result.warnings.len(),
            errors = result.errors.len(),
            "Overclock settings processed"
        );
        Ok(result)
    }

    /// Read current settings back from the device
    pub fn get_settings(&self, device_id: u32) -> Result<OverclockSettings> {
        let vendor = self.resolve_vendor(device_id)?;
        self.backend.sink(device_id, vendor)?.read_settings()
    }
}
