//! GPU vendor detection and overclock actuation for tunectl
//!
//! Provides the per-field actuation sinks used by the settings applier:
//! - NVIDIA GPUs (via nvidia-smi and nvidia-settings)
//! - AMD GPUs (via amdgpu sysfs)
//!
//! Vendor is resolved once per call into a [`GpuVendor`] tag and the
//! matching [`OverclockSink`] is built from it.

pub mod amd;
pub mod nvidia;

pub mod constants;
mod types;

pub use constants as gpu_const;
pub use types::*;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tc_error::TunectlError;
use tracing::{debug, trace};

pub type Result<T> = tc_error::Result<T>;

/// Per-field hardware writer for a single GPU
pub trait OverclockSink: Send + Sync {
    /// Apply one field and report how it went
    fn apply(&self, field: &OverclockField) -> SinkResponse;

    /// Read back current settings; fields the driver cannot report stay at 0
    fn read_settings(&self) -> Result<OverclockSettings>;
}

/// Vendor detection plus sink construction
pub trait GpuBackend: Send + Sync {
    fn detect_vendor(&self, device_id: u32) -> Result<GpuVendor>;

    fn sink(&self, device_id: u32, vendor: GpuVendor) -> Result<Box<dyn OverclockSink>>;
}

/// Markers in tool output that indicate a privilege problem rather than a
/// hardware rejection
const PERMISSION_MARKERS: &[&str] = &[
    "permission denied",
    "insufficient permissions",
    "operation not permitted",
    "requires root",
];

/// Classify a textual failure reported by a driver or vendor tool
pub fn classify_failure(reason: impl Into<String>) -> SinkResponse {
    let reason = reason.into();
    let lower = reason.to_lowercase();
    if PERMISSION_MARKERS.iter().any(|m| lower.contains(m)) {
        SinkResponse::Warning(format!("{} (may need root)", reason.trim()))
    } else {
        SinkResponse::Error(reason.trim().to_string())
    }
}

/// Classify an I/O failure against a control file or tool binary
pub fn classify_io_error(context: &str, err: &io::Error) -> SinkResponse {
    match err.kind() {
        io::ErrorKind::PermissionDenied => {
            SinkResponse::Warning(format!("{}: permission denied (may need root)", context))
        }
        io::ErrorKind::NotFound => SinkResponse::Warning(format!("{}: not available", context)),
        _ => classify_failure(format!("{}: {}", context, err)),
    }
}

/// Run a vendor tool and return its stdout, or the classified failure
pub(crate) fn run_tool(program: &str, args: &[&str]) -> std::result::Result<String, SinkResponse> {
    trace!(program, ?args, "Running vendor tool");
    let output = Command::new(program).args(args).output().map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            SinkResponse::Warning(format!("{} is not installed", program))
        } else {
            classify_io_error(program, &e)
        }
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = if stderr.trim().is_empty() { stdout } else { stderr };
        return Err(classify_failure(format!("{} failed: {}", program, detail.trim())));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// List `cardN` directories under a DRM root, ordered by card number
pub fn list_drm_cards(drm_path: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(drm_path) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Cannot read {}: {}", drm_path.display(), e);
            return Vec::new();
        }
    };

    let mut cards: Vec<(u32, PathBuf)> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let number = name.strip_prefix("card")?.parse::<u32>().ok()?;
            Some((number, entry.path()))
        })
        .collect();
    cards.sort_by_key(|(n, _)| *n);
    cards.into_iter().map(|(_, p)| p).collect()
}

/// Detection and sinks backed by the running system
pub struct SystemGpus {
    drm_path: PathBuf,
}

impl SystemGpus {
    pub fn new() -> Self {
        Self::with_drm_path(constants::DRM_PATH)
    }

    pub fn with_drm_path(drm_path: impl Into<PathBuf>) -> Self {
        Self {
            drm_path: drm_path.into(),
        }
    }

    fn card_device_dir(&self, device_id: u32) -> Option<PathBuf> {
        list_drm_cards(&self.drm_path)
            .into_iter()
            .nth(device_id as usize)
            .map(|card| card.join("device"))
    }
}

impl Default for SystemGpus {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for SystemGpus {
    fn detect_vendor(&self, device_id: u32) -> Result<GpuVendor> {
        if nvidia::is_present(device_id) {
            debug!(device = device_id, "Detected NVIDIA GPU via nvidia-smi");
            return Ok(GpuVendor::Nvidia);
        }

        let device_dir = self
            .card_device_dir(device_id)
            .ok_or_else(|| TunectlError::not_found(format!("GPU device {}", device_id)))?;
        let vendor = fs::read_to_string(device_dir.join("vendor")).map_err(|e| {
            TunectlError::FileRead {
                path: device_dir.join("vendor"),
                source: e,
            }
        })?;

        let vendor = match vendor.trim() {
            constants::AMD_VENDOR_ID => GpuVendor::Amd,
            constants::NVIDIA_VENDOR_ID => GpuVendor::Nvidia,
            other => {
                debug!(device = device_id, vendor = other, "Unrecognized GPU vendor");
                GpuVendor::Unknown
            }
        };
        debug!(device = device_id, %vendor, "Detected GPU vendor via sysfs");
        Ok(vendor)
    }

    fn sink(&self, device_id: u32, vendor: GpuVendor) -> Result<Box<dyn OverclockSink>> {
        match vendor {
            GpuVendor::Nvidia => Ok(Box::new(nvidia::NvidiaSink::new(device_id))),
            GpuVendor::Amd => {
                let device_dir = self
                    .card_device_dir(device_id)
                    .ok_or_else(|| TunectlError::not_found(format!("GPU device {}", device_id)))?;
                Ok(Box::new(amd::AmdSink::new(device_dir)))
            }
            GpuVendor::Unknown => Err(TunectlError::unsupported(format!(
                "overclocking GPU {} (unknown vendor)",
                device_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_classify_permission_failures_as_warnings() {
        assert!(matches!(
            classify_failure("nvidia-smi failed: Insufficient Permissions"),
            SinkResponse::Warning(_)
        ));
        assert!(matches!(
            classify_failure("Operation not permitted"),
            SinkResponse::Warning(_)
        ));
        assert!(matches!(
            classify_failure("value out of range for this board"),
            SinkResponse::Error(_)
        ));
    }

    #[test]
    fn test_classify_io_errors() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(matches!(classify_io_error("pwm1", &denied), SinkResponse::Warning(_)));

        let missing = io::Error::from(io::ErrorKind::NotFound);
        assert!(matches!(classify_io_error("power1_cap", &missing), SinkResponse::Warning(_)));

        let other = io::Error::new(io::ErrorKind::InvalidInput, "bad value");
        assert!(matches!(classify_io_error("pwm1", &other), SinkResponse::Error(_)));
    }

    #[test]
    fn test_list_drm_cards_skips_connectors_and_sorts() {
        let dir = TempDir::new().unwrap();
        for name in ["card10", "card1", "card1-DP-1", "renderD128", "card0"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        let cards: Vec<String> = list_drm_cards(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(cards, vec!["card0", "card1", "card10"]);
    }

    #[test]
    fn test_unknown_vendor_has_no_sink() {
        let dir = TempDir::new().unwrap();
        let gpus = SystemGpus::with_drm_path(dir.path());
        let err = gpus.sink(0, GpuVendor::Unknown).err().unwrap();
        assert_eq!(err.kind(), tc_error::ErrorKind::Unsupported);
    }
}
