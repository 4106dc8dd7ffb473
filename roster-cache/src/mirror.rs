//! Durable key/value mirror behind the in-memory cache.
//!
//! A mirror only has to store strings by key under a byte ceiling. Writes that
//! would exceed the ceiling return [`CacheError::QuotaExceeded`]; the cache
//! store logs those and keeps going.
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use tracing::{debug, warn};

use crate::CacheError;

pub trait CacheMirror: Send + Sync + std::fmt::Debug {
    /// Every stored key/value pair.
    fn load_all(&self) -> Result<Vec<(String, String)>, CacheError>;

    fn store(&self, key: &str, value: &str) -> Result<(), CacheError>;

    fn remove(&self, key: &str) -> Result<(), CacheError>;

    fn clear(&self) -> Result<(), CacheError>;
}

fn used_bytes(map: &HashMap<String, String>) -> usize {
    map.iter().map(|(k, v)| k.len() + v.len()).sum()
}

/// Bytes the map would hold after replacing `key` with `value`.
fn bytes_after_store(map: &HashMap<String, String>, key: &str, value: &str) -> usize {
    let existing = map.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
    used_bytes(map) - existing + key.len() + value.len()
}

/// Process-local mirror, mostly useful in tests and for ephemeral sessions.
#[derive(Debug)]
pub struct MemoryMirror {
    max_bytes: usize,
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryMirror {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, CacheError> {
        self.entries.lock().map_err(|_| CacheError::Poisoned)
    }

    pub fn used_bytes(&self) -> usize {
        self.lock().map(|map| used_bytes(&map)).unwrap_or(0)
    }
}

impl CacheMirror for MemoryMirror {
    fn load_all(&self) -> Result<Vec<(String, String)>, CacheError> {
        let map = self.lock()?;
        Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn store(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut map = self.lock()?;
        let needed = bytes_after_store(&map, key, value);
        if needed > self.max_bytes {
            return Err(CacheError::QuotaExceeded {
                needed,
                limit: self.max_bytes,
            });
        }
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.lock()?.clear();
        Ok(())
    }
}

/// Mirror persisted as a single JSON object file.
///
/// The whole map is rewritten on every change through a temporary file and a
/// rename, so a crash leaves either the old or the new snapshot.
#[derive(Debug)]
pub struct FileMirror {
    path: PathBuf,
    max_bytes: usize,
    entries: Mutex<HashMap<String, String>>,
}

impl FileMirror {
    /// Open (or create on first write) the mirror at `path`. An unreadable
    /// or corrupt file starts an empty mirror.
    pub fn open(path: impl AsRef<Path>, max_bytes: usize) -> Self {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(map) => map,
                Err(err) => {
                    warn!(path = %path.display(), "cache mirror is corrupt, starting empty: {err}");
                    HashMap::new()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => {
                warn!(path = %path.display(), "cache mirror unreadable, starting empty: {err}");
                HashMap::new()
            }
        };
        debug!(path = %path.display(), entries = entries.len(), "cache mirror opened");

        Self {
            path,
            max_bytes,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, CacheError> {
        self.entries.lock().map_err(|_| CacheError::Poisoned)
    }

    fn flush(&self, map: &HashMap<String, String>) -> Result<(), CacheError> {
        let content = serde_json::to_string(map)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CacheMirror for FileMirror {
    fn load_all(&self) -> Result<Vec<(String, String)>, CacheError> {
        let map = self.lock()?;
        Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn store(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut map = self.lock()?;
        let needed = bytes_after_store(&map, key, value);
        if needed > self.max_bytes {
            return Err(CacheError::QuotaExceeded {
                needed,
                limit: self.max_bytes,
            });
        }
        map.insert(key.to_string(), value.to_string());
        self.flush(&map)
    }

    fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut map = self.lock()?;
        if map.remove(key).is_some() {
            self.flush(&map)?;
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        let mut map = self.lock()?;
        map.clear();
        self.flush(&map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_mirror_quota() {
        let mirror = MemoryMirror::new(16);
        mirror.store("emp:1", "{\"a\":1}").unwrap();
        assert_eq!(mirror.used_bytes(), 12);

        let err = mirror.store("emp:2", "{\"a\":2}").unwrap_err();
        assert!(matches!(
            err,
            CacheError::QuotaExceeded {
                needed: 24,
                limit: 16
            }
        ));

        // replacing an existing key only counts the difference
        mirror.store("emp:1", "{\"b\":22}").unwrap();
        assert_eq!(mirror.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_memory_mirror_remove_and_clear() {
        let mirror = MemoryMirror::new(1024);
        mirror.store("a", "1").unwrap();
        mirror.store("b", "2").unwrap();
        mirror.remove("a").unwrap();
        assert_eq!(mirror.load_all().unwrap(), vec![("b".into(), "2".into())]);
        mirror.clear().unwrap();
        assert!(mirror.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_file_mirror_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("mirror.json");

        let mirror = FileMirror::open(&path, 1024);
        mirror.store("emp:1", "{\"id\":\"1\"}").unwrap();
        mirror.store("doc:7", "{\"id\":\"7\"}").unwrap();
        mirror.remove("doc:7").unwrap();
        drop(mirror);

        let reopened = FileMirror::open(&path, 1024);
        let entries = reopened.load_all().unwrap();
        assert_eq!(entries, vec![("emp:1".into(), "{\"id\":\"1\"}".into())]);
    }

    #[test]
    fn test_file_mirror_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror.json");
        fs::write(&path, "not json").unwrap();

        let mirror = FileMirror::open(&path, 1024);
        assert!(mirror.load_all().unwrap().is_empty());
        mirror.store("k", "v").unwrap();
        assert_eq!(FileMirror::open(&path, 1024).load_all().unwrap().len(), 1);
    }
}
