//! Durable key/value storage
//!
//! Both the token store and the response cache persist through the
//! `Storage` trait. Two backends exist: `MemoryStorage` (process-local, with
//! an optional byte quota so a full medium can be reproduced) and
//! `FileStorage` (one file per key under a directory, written atomically).
//!
//! Callers own the policy for failed writes; the backends only report them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};

/// String key/value storage medium.
pub trait Storage: Send + Sync {
    /// Read a value. Unreadable records are reported as absent.
    fn get(&self, key: &str) -> Option<String>;

    /// Write a value, replacing any previous one.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value. Deleting a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// All keys currently stored.
    fn keys(&self) -> Vec<String>;
}

/// In-process storage backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that rejects writes once keys plus values exceed `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            quota_bytes: Some(bytes),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.lock();
        if let Some(quota) = self.quota_bytes {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            if used + key.len() + value.len() > quota {
                return Err(Error::StorageFull(format!(
                    "quota of {quota} bytes exceeded writing {key}"
                )));
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }
}

/// On-disk record: the original key is kept so `keys()` can be answered
/// from file contents, since file names are hashes.
#[derive(Serialize, Deserialize)]
struct FileRecord {
    key: String,
    value: String,
}

/// Directory-backed storage, one JSON file per key.
///
/// File names are the URL-safe base64 SHA-256 of the key, so arbitrary keys
/// (endpoints with query strings) map to valid names. Writes go to a temp
/// file and are renamed into place with 0600 permissions.
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Open (creating if needed) a storage directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir
            .join(format!("{}.json", URL_SAFE_NO_PAD.encode(digest)))
    }

    fn read_record(path: &Path) -> Option<FileRecord> {
        let contents = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&contents).ok()
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> Option<String> {
        Self::read_record(&self.path_for(key))
            .filter(|record| record.key == key)
            .map(|record| record.value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let record = FileRecord {
            key: key.to_string(),
            value: value.to_string(),
        };
        let json = serde_json::to_string(&record)?;
        write_atomic(&self.path_for(key), json.as_bytes())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| Self::read_record(&path))
            .map(|record| record.key)
            .collect()
    }
}

/// Write a file atomically (temp file in the same directory, then rename).
///
/// The temp name carries the PID and a counter so concurrent writers never
/// share a temp file.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let dir = path
        .parent()
        .ok_or_else(|| Error::Config("storage path has no parent directory".into()))?;
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_path = dir.join(format!(".storage.tmp.{}.{seq}", std::process::id()));

    std::fs::write(&tmp_path, bytes)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    debug!(path = %path.display(), "persisted storage record");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_set_get_remove() {
        let storage = MemoryStorage::new();
        assert!(storage.get("k").is_none());
        storage.set("k", "v1").unwrap();
        storage.set("k", "v2").unwrap();
        assert_eq!(storage.get("k").as_deref(), Some("v2"));
        storage.remove("k").unwrap();
        assert!(storage.get("k").is_none());
        storage.remove("k").unwrap();
    }

    #[test]
    fn memory_quota_rejects_oversized_writes() {
        let storage = MemoryStorage::with_quota(10);
        storage.set("a", "12345").unwrap();
        let err = storage.set("b", "123456789").unwrap_err();
        assert!(matches!(err, Error::StorageFull(_)));
        assert!(storage.get("b").is_none());

        // Overwriting an existing key only counts the new value
        storage.set("a", "123456789").unwrap();
    }

    #[test]
    fn file_storage_roundtrip_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        storage.set("/news_{\"page\":\"2\"}", "payload").unwrap();

        let reopened = FileStorage::open(dir.path()).unwrap();
        assert_eq!(
            reopened.get("/news_{\"page\":\"2\"}").as_deref(),
            Some("payload")
        );
        assert_eq!(reopened.keys(), vec!["/news_{\"page\":\"2\"}".to_string()]);
    }

    #[test]
    fn file_storage_remove_missing_key_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        storage.remove("never-written").unwrap();
    }

    #[test]
    fn file_storage_ignores_corrupt_records() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        storage.set("good", "1").unwrap();
        std::fs::write(dir.path().join("garbage.json"), "{{{").unwrap();

        assert_eq!(storage.keys(), vec!["good".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        storage.set("access_token", "at_1").unwrap();

        let mode = std::fs::metadata(storage.path_for("access_token"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600, "storage file must be 0600, got {mode:o}");
    }
}
