//! File-backed credential store.
//!
//! The paired identity lives next to the config as `identity.toml`.  It holds
//! the client's private key, so on unix the file is created with mode `0600`.
//! Saves go through a freshly created staging file and a rename, so a crash
//! mid-write leaves the previous identity intact.  A failed save removes its
//! staging file.

use std::io::Write;
use std::path::{Path, PathBuf};

use netward_core::PairedIdentity;
use tracing::{debug, info, warn};

use crate::application::pairing::{CredentialStore, StoreError};

/// File name of the stored identity inside the config directory.
pub const IDENTITY_FILE_NAME: &str = "identity.toml";

/// Stores the paired identity as TOML at a fixed path.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<PairedIdentity>, StoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                let identity: PairedIdentity =
                    toml::from_str(&content).map_err(|e| StoreError::Corrupt(e.to_string()))?;
                debug!(sensor_id = %identity.sensor_id, "loaded paired identity");
                Ok(Some(identity))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn save(&self, identity: &PairedIdentity) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let content =
            toml::to_string_pretty(identity).map_err(|e| StoreError::Encode(e.to_string()))?;

        let staging = self.path.with_extension("toml.tmp");
        let staging_error = |source| StoreError::Io {
            path: staging.clone(),
            source,
        };
        // A leftover from an interrupted save keeps whatever mode it had.
        remove_if_present(&staging).map_err(staging_error)?;

        let saved = write_private(&staging, content.as_bytes())
            .map_err(staging_error)
            .and_then(|()| std::fs::rename(&staging, &self.path).map_err(|e| self.io_error(e)));
        if let Err(e) = saved {
            if let Err(cleanup) = remove_if_present(&staging) {
                warn!(path = %staging.display(), error = %cleanup, "could not remove staging file");
            }
            return Err(e);
        }

        info!(sensor_id = %identity.sensor_id, path = %self.path.display(), "paired identity saved");
        Ok(())
    }

    fn delete(&self) -> Result<bool, StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "paired identity removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Creates `path` (which must not exist) and writes `bytes` durably.
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = open_private(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::MockSensor;

    #[test]
    fn test_load_without_file_is_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCredentialStore::new(dir.path().join(IDENTITY_FILE_NAME));
        assert!(store.load().expect("load").is_none());
    }

    #[test]
    fn test_saved_identity_loads_back() {
        // Arrange
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCredentialStore::new(dir.path().join("sub").join(IDENTITY_FILE_NAME));
        let identity = MockSensor::paired_identity();

        // Act
        store.save(&identity).expect("save");
        let loaded = store.load().expect("load");

        // Assert
        assert_eq!(loaded, Some(identity));
    }

    #[test]
    fn test_save_replaces_previous_identity() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCredentialStore::new(dir.path().join(IDENTITY_FILE_NAME));
        let mut identity = MockSensor::paired_identity();
        store.save(&identity).expect("first save");
        identity.sensor_name = "Renamed".to_string();
        store.save(&identity).expect("second save");
        assert_eq!(store.load().expect("load").map(|i| i.sensor_name), Some("Renamed".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_identity_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCredentialStore::new(dir.path().join(IDENTITY_FILE_NAME));
        store.save(&MockSensor::paired_identity()).expect("save");

        let mode = std::fs::metadata(store.path()).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_delete_reports_whether_identity_existed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCredentialStore::new(dir.path().join(IDENTITY_FILE_NAME));
        store.save(&MockSensor::paired_identity()).expect("save");
        assert!(store.delete().expect("delete"));
        assert!(!store.delete().expect("second delete"));
        assert!(store.load().expect("load").is_none());
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(IDENTITY_FILE_NAME);
        std::fs::write(&path, "sensor_id = 5").expect("write");
        let store = FileCredentialStore::new(path);
        assert!(matches!(store.load(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_failed_save_removes_staging_file() {
        // Arrange – a directory squats on the identity path, so the rename fails
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(IDENTITY_FILE_NAME);
        std::fs::create_dir(&path).expect("mkdir");
        std::fs::write(path.join("keep"), "x").expect("write");
        let store = FileCredentialStore::new(&path);

        // Act
        let result = store.save(&MockSensor::paired_identity());

        // Assert
        assert!(matches!(result, Err(StoreError::Io { .. })));
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_stale_staging_file_does_not_leak_its_mode() {
        use std::os::unix::fs::PermissionsExt;

        // Arrange – an interrupted save left a world-readable staging file
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCredentialStore::new(dir.path().join(IDENTITY_FILE_NAME));
        let staging = store.path().with_extension("toml.tmp");
        std::fs::write(&staging, "stale").expect("write");
        std::fs::set_permissions(&staging, std::fs::Permissions::from_mode(0o644)).expect("chmod");

        // Act
        store.save(&MockSensor::paired_identity()).expect("save");

        // Assert
        let mode = std::fs::metadata(store.path()).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!staging.exists());
    }
}
