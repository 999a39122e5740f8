//! JSON persistence for tuning profiles
//!
//! One file per profile (`<name>.json`) in the profiles directory. The
//! reserved `_current` snapshot lives alongside them but is never listed.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tc_error::TunectlError;
use tc_gpu::OverclockSettings;
use tracing::{debug, info, warn};

use super::types::Profile;
use super::validation::validate_profile_name;
use crate::constants::profile;
use crate::Result;

/// Keyed storage of named settings bundles
pub trait ProfileStore: Send + Sync {
    /// Save a user profile; empty and reserved names are rejected
    fn save(&self, profile: &Profile) -> Result<()>;

    /// Load a profile by name, including the `_current` snapshot
    fn load(&self, name: &str) -> Result<Profile>;

    /// All user profiles, sorted by name, without the snapshot
    fn list(&self) -> Result<Vec<Profile>>;

    /// Overwrite the `_current` snapshot
    fn save_snapshot(&self, device_id: u32, settings: &OverclockSettings) -> Result<()>;
}

/// Profile store backed by a directory of JSON files
#[derive(Debug, Clone)]
pub struct JsonProfileStore {
    dir: PathBuf,
}

impl JsonProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, profile::FILE_EXTENSION))
    }

    fn write_profile(&self, profile: &Profile) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| TunectlError::FileWrite {
            path: self.dir.clone(),
            source: e,
        })?;

        let path = self.path_for(&profile.name);
        let json = serde_json::to_string_pretty(profile)?;

        // Atomic write - temp file, fsync, rename
        let temp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&temp_path).map_err(|e| TunectlError::FileWrite {
            path: temp_path.clone(),
            source: e,
        })?;
        file.write_all(json.as_bytes()).map_err(|e| TunectlError::FileWrite {
            path: temp_path.clone(),
            source: e,
        })?;
        file.sync_all().map_err(|e| TunectlError::FileWrite {
            path: temp_path.clone(),
            source: e,
        })?;
        drop(file);

        fs::rename(&temp_path, &path).map_err(|e| TunectlError::FileWrite {
            path: path.clone(),
            source: e,
        })?;

        debug!("Saved profile '{}' to {:?}", profile.name, path);
        Ok(())
    }
}

impl ProfileStore for JsonProfileStore {
    fn save(&self, profile: &Profile) -> Result<()> {
        validate_profile_name(&profile.name)?;
        self.write_profile(profile)?;
        info!("Saved profile '{}'", profile.name);
        Ok(())
    }

    fn load(&self, name: &str) -> Result<Profile> {
        // Anything that could escape the directory simply does not exist
        if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\', '\0']) {
            return Err(TunectlError::not_found(format!("profile '{}'", name)));
        }

        let path = self.path_for(name);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TunectlError::not_found(format!("profile '{}'", name)));
            }
            Err(e) => return Err(TunectlError::FileRead { path, source: e }),
        };

        let mut loaded: Profile = serde_json::from_str(&contents)?;
        // The file name is authoritative
        loaded.name = name.to_string();
        Ok(loaded)
    }

    fn list(&self) -> Result<Vec<Profile>> {
        if !self.dir.exists() {
            debug!("No profiles directory at {:?}", self.dir);
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir).map_err(|e| TunectlError::FileRead {
            path: self.dir.clone(),
            source: e,
        })?;

        let mut profiles = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(profile::FILE_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if name == profile::CURRENT_SNAPSHOT {
                continue;
            }
            match self.load(name) {
                Ok(p) => profiles.push(p),
                Err(e) => warn!("Skipping unreadable profile {:?}: {}", path, e),
            }
        }

        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(profiles)
    }

    fn save_snapshot(&self, device_id: u32, settings: &OverclockSettings) -> Result<()> {
        let snapshot = Profile {
            name: profile::CURRENT_SNAPSHOT.to_string(),
            device_id: Some(device_id),
            settings: *settings,
        };
        self.write_profile(&snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(name: &str) -> Profile {
        Profile::new(
            name,
            OverclockSettings {
                core_clock_offset: 100,
                power_limit: 110,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = JsonProfileStore::new(dir.path());

        store.save(&sample("gaming")).unwrap();
        let loaded = store.load("gaming").unwrap();
        assert_eq!(loaded, sample("gaming"));
        assert!(!dir.path().join("gaming.json.tmp").exists());
    }

    #[test]
    fn test_reserved_and_empty_names_rejected() {
        let dir = TempDir::new().unwrap();
        let store = JsonProfileStore::new(dir.path());

        assert!(store.save(&sample("_current")).unwrap_err().is_validation());
        assert!(store.save(&sample("")).unwrap_err().is_validation());
        assert!(!dir.path().join("_current.json").exists());
    }

    #[test]
    fn test_missing_profile_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = JsonProfileStore::new(dir.path());

        assert!(store.load("nope").unwrap_err().is_not_found());
        assert!(store.load("../secret").unwrap_err().is_not_found());
    }

    #[test]
    fn test_list_hides_snapshot_and_sorts() {
        let dir = TempDir::new().unwrap();
        let store = JsonProfileStore::new(dir.path());

        store.save(&sample("silent")).unwrap();
        store.save(&sample("benchmark")).unwrap();
        store
            .save_snapshot(0, &OverclockSettings { fan_speed: 60, ..Default::default() })
            .unwrap();
        fs::write(dir.path().join("notes.txt"), "not a profile").unwrap();
        fs::write(dir.path().join("broken.json"), "{").unwrap();

        let names: Vec<String> = store.list().unwrap().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["benchmark", "silent"]);

        let snapshot = store.load("_current").unwrap();
        assert_eq!(snapshot.settings.fan_speed, 60);
        assert_eq!(snapshot.device_id, Some(0));
    }

    #[test]
    fn test_list_without_directory() {
        let dir = TempDir::new().unwrap();
        let store = JsonProfileStore::new(dir.path().join("missing"));
        assert!(store.list().unwrap().is_empty());
    }
}
