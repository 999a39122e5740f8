//! Profile-aware front end for the settings applier
//!
//! Loading a profile is just an apply with the stored settings. Every apply
//! without errors refreshes the `_current` snapshot.

use std::sync::Arc;

use tc_gpu::OverclockSettings;
use tracing::{info, warn};

use super::overclock::{OverclockResult, SettingsApplier};
use crate::data::{validate_overclock_settings, Profile, ProfileStore};
use crate::Result;

pub struct TuningService {
    applier: SettingsApplier,
    store: Arc<dyn ProfileStore>,
    default_device_id: u32,
}

impl TuningService {
    pub fn new(applier: SettingsApplier, store: Arc<dyn ProfileStore>) -> Self {
        Self {
            applier,
            store,
            default_device_id: 0,
        }
    }

    /// GPU used for profiles that do not name one
    pub fn with_default_device(mut self, device_id: u32) -> Self {
        self.default_device_id = device_id;
        self
    }

    pub fn apply_settings(
        &self,
        device_id: u32,
        settings: &OverclockSettings,
    ) -> Result<OverclockResult> {
        let result = self.applier.apply(device_id, settings)?;
        if result.errors.is_empty() {
            if let Err(e) = self.store.save_snapshot(device_id, settings) {
                warn!(gpu = device_id, "Failed to save current settings snapshot: {}", e);
            }
        }
        Ok(result)
    }

    pub fn get_settings(&self, device_id: u32) -> Result<OverclockSettings> {
        self.applier.get_settings(device_id)
    }

    pub fn save_profile(&self, profile: &Profile) -> Result<()> {
        validate_overclock_settings(&profile.settings)?;
        self.store.save(profile)
    }

    /// Load a stored profile and apply it
    pub fn load_profile(&self, name: &str) -> Result<OverclockResult> {
        let profile = self.store.load(name)?;
        let device_id = profile.device_id.unwrap_or(self.default_device_id);
        info!(gpu = device_id, "Loading profile '{}'", profile.name);
        self.apply_settings(device_id, &profile.settings)
    }

    pub fn list_profiles(&self) -> Result<Vec<Profile>> {
        self.store.list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::JsonProfileStore;
    use crate::engine::overclock::tests::{backend_with, MockBackend, MockSink};
    use tc_gpu::{GpuVendor, OverclockField, SinkResponse};
    use tempfile::TempDir;

    fn untouched_backend() -> Arc<MockBackend> {
        let mut backend = MockBackend::new();
        backend.expect_detect_vendor().times(0);
        backend.expect_sink().times(0);
        Arc::new(backend)
    }

    #[test]
    fn test_reserved_profile_name_rejected() {
        let dir = TempDir::new().unwrap();
        let service = TuningService::new(
            SettingsApplier::new(untouched_backend()),
            Arc::new(JsonProfileStore::new(dir.path())),
        );

        let err = service
            .save_profile(&Profile::new("_current", OverclockSettings::default()))
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_out_of_range_profile_rejected() {
        let dir = TempDir::new().unwrap();
        let service = TuningService::new(
            SettingsApplier::new(untouched_backend()),
            Arc::new(JsonProfileStore::new(dir.path())),
        );

        let profile = Profile::new(
            "wild",
            OverclockSettings {
                memory_clock_offset: 5000,
                ..Default::default()
            },
        );
        assert!(service.save_profile(&profile).unwrap_err().is_validation());
        assert!(service.list_profiles().unwrap().is_empty());
    }

    #[test]
    fn test_missing_profile_issues_no_writes() {
        let dir = TempDir::new().unwrap();
        let service = TuningService::new(
            SettingsApplier::new(untouched_backend()),
            Arc::new(JsonProfileStore::new(dir.path())),
        );

        assert!(service.load_profile("ghost").unwrap_err().is_not_found());
    }

    #[test]
    fn test_load_profile_applies_and_snapshots() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonProfileStore::new(dir.path()));
        let settings = OverclockSettings {
            core_clock_offset: 75,
            fan_speed: 60,
            ..Default::default()
        };
        store.save(&Profile::new("quiet", settings)).unwrap();

        let mut sink = MockSink::new();
        sink.expect_apply().times(2).returning(|_| SinkResponse::ok());
        let service = TuningService::new(
            SettingsApplier::new(backend_with(GpuVendor::Nvidia, sink)),
            store.clone(),
        );

        let result = service.load_profile("quiet").unwrap();
        assert!(result.success);
        assert_eq!(result.applied.len(), 2);

        let snapshot = store.load("_current").unwrap();
        assert_eq!(snapshot.settings, settings);
        let listed: Vec<String> = service
            .list_profiles()
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(listed, vec!["quiet"]);
    }

    #[test]
    fn test_failed_apply_keeps_previous_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JsonProfileStore::new(dir.path()));

        let mut sink = MockSink::new();
        sink.expect_apply()
            .withf(|f| matches!(f, OverclockField::PowerLimit(_)))
            .returning(|_| SinkResponse::Error("power limit rejected".into()));
        let service = TuningService::new(
            SettingsApplier::new(backend_with(GpuVendor::Amd, sink)),
            store.clone(),
        );

        let result = service
            .apply_settings(
                0,
                &OverclockSettings {
                    power_limit: 140,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!result.success);
        assert!(store.load("_current").unwrap_err().is_not_found());
    }
}
