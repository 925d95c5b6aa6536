use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use twox_hash::xxh3;

use crate::error::PersistenceError;
use crate::types::PersistedRecord;

/// Number of key-scoped stripe locks (spec §4.3): writers to the same key
/// serialize, writers to different keys run in parallel.
const STRIPES: usize = 32;

/// Durable, file-per-entry mirror of the memory engine's non-interned
/// entries (C3). One directory; each live entry is one file named
/// `<hash(key)>-<hash(value)>` so that updating a value's bytes produces a
/// new filename and the stale file is removed in the same call.
pub struct DiskPersister {
    dir: PathBuf,
    stripes: Vec<RwLock<()>>,
}

impl DiskPersister {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let stripes = (0..STRIPES).map(|_| RwLock::new(())).collect();
        Ok(DiskPersister { dir, stripes })
    }

    fn hash(bytes: &[u8]) -> u64 {
        xxh3::hash64(bytes)
    }

    fn stripe_for(key: &str) -> usize {
        (Self::hash(key.as_bytes()) % STRIPES as u64) as usize
    }

    fn key_prefix(key: &str) -> String {
        format!("{:016x}", Self::hash(key.as_bytes()))
    }

    fn file_name(key: &str, value: &[u8]) -> String {
        format!("{}-{:016x}", Self::key_prefix(key), Self::hash(value))
    }

    fn path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Finds every file on disk whose name starts with `key`'s hash prefix;
    /// collisions between distinct keys are possible and are resolved by
    /// the caller comparing the deserialized key string.
    fn candidates(&self, key: &str) -> Result<Vec<PathBuf>, PersistenceError> {
        let prefix = Self::key_prefix(key);
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&prefix) {
                found.push(entry.path());
            }
        }
        Ok(found)
    }

    /// Each file is `[u32 LE length][bincode payload]` so a truncated write
    /// (crash mid-write, before the rename lands) is detectable rather than
    /// silently misread (spec §4.3's resolved serialization format).
    fn read_record(path: &Path) -> Result<PersistedRecord, PersistenceError> {
        let bytes = fs::read(path)?;
        let corrupt = || PersistenceError::Corrupt {
            path: path.to_path_buf(),
            reason: "truncated record".to_string(),
        };
        if bytes.len() < 4 {
            return Err(corrupt());
        }
        let len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let payload = bytes.get(4..4 + len).ok_or_else(corrupt)?;
        bincode::deserialize(payload).map_err(|e| PersistenceError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Writes `record` atomically, and removes any stale file left behind
    /// under the same key-hash prefix by a prior value.
    pub fn persist(&self, record: &PersistedRecord) -> Result<(), PersistenceError> {
        let stripe = &self.stripes[Self::stripe_for(&record.key)];
        let _guard = stripe.write();

        let file_name = Self::file_name(&record.key, &record.value);
        let final_path = self.path(&file_name);

        let tmp_path = self.dir.join(format!("{file_name}.tmp"));
        let payload = bincode::serialize(record)?;
        let mut bytes = Vec::with_capacity(4 + payload.len());
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
        fs::write(&tmp_path, bytes)?;
        fs::rename(&tmp_path, &final_path)?;

        for stale in self.candidates_unlocked(&record.key)? {
            if stale != final_path {
                let _ = fs::remove_file(stale);
            }
        }

        Ok(())
    }

    fn candidates_unlocked(&self, key: &str) -> Result<Vec<PathBuf>, PersistenceError> {
        self.candidates(key)
    }

    pub fn try_load(&self, key: &str) -> Result<Option<PersistedRecord>, PersistenceError> {
        let stripe = &self.stripes[Self::stripe_for(key)];
        let _guard = stripe.read();

        for path in self.candidates(key)? {
            let record = Self::read_record(&path)?;
            if record.key == key {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    pub fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        let stripe = &self.stripes[Self::stripe_for(key)];
        let _guard = stripe.write();

        for path in self.candidates(key)? {
            if let Ok(record) = Self::read_record(&path) {
                if record.key == key {
                    fs::remove_file(&path)?;
                }
            }
        }
        Ok(())
    }

    /// Deserializes every file in the directory, in parallel (spec §4.3:
    /// "iterate all files in parallel" on restart). Enumerating names is
    /// cheap and stays sequential; each file's read-and-deserialize is
    /// blocking I/O, so it's fanned out across `spawn_blocking` tasks and
    /// joined before returning, the same way `persist`/`remove` already
    /// treat disk access as blocking work from the async engine. The caller
    /// drives the per-record `add` back into the engine (spec §6: "restores
    /// every record via a plain add").
    pub async fn load_all(&self) -> Result<Vec<PersistedRecord>, PersistenceError> {
        let paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| path.extension().and_then(|e| e.to_str()) != Some("tmp"))
            .collect();

        let tasks: Vec<_> =
            paths.into_iter().map(|path| tokio::task::spawn_blocking(move || Self::read_record(&path))).collect();

        let mut out = Vec::with_capacity(tasks.len());
        for task in tasks {
            out.push(task.await.expect("read_record task panicked")?);
        }
        Ok(out)
    }

    /// Deletes every file in the directory. Used by `clear()` (spec §4.6).
    pub fn clear_all(&self) -> Result<(), PersistenceError> {
        for stripe in &self.stripes {
            let _guard = stripe.write();
        }
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let _ = fs::remove_file(entry.path());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persists_and_loads_a_record() {
        let dir = tempfile::tempdir().unwrap();
        let persister = DiskPersister::new(dir.path()).unwrap();
        let record = PersistedRecord {
            key: "k".into(),
            value: b"v1".to_vec(),
            interned: false,
            tag: None,
        };
        persister.persist(&record).unwrap();
        assert_eq!(persister.try_load("k").unwrap(), Some(record));
    }

    #[test]
    fn updating_value_removes_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let persister = DiskPersister::new(dir.path()).unwrap();
        persister
            .persist(&PersistedRecord { key: "k".into(), value: b"v1".to_vec(), interned: false, tag: None })
            .unwrap();
        persister
            .persist(&PersistedRecord { key: "k".into(), value: b"v2".to_vec(), interned: false, tag: None })
            .unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(persister.try_load("k").unwrap().unwrap().value, b"v2".to_vec());
    }

    #[test]
    fn remove_deletes_matching_file() {
        let dir = tempfile::tempdir().unwrap();
        let persister = DiskPersister::new(dir.path()).unwrap();
        persister
            .persist(&PersistedRecord { key: "k".into(), value: b"v1".to_vec(), interned: false, tag: None })
            .unwrap();
        persister.remove("k").unwrap();
        assert_eq!(persister.try_load("k").unwrap(), None);
    }

    #[tokio::test]
    async fn load_all_returns_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let persister = DiskPersister::new(dir.path()).unwrap();
        for i in 0..5 {
            persister
                .persist(&PersistedRecord {
                    key: format!("k{i}"),
                    value: format!("v{i}").into_bytes(),
                    interned: false,
                    tag: None,
                })
                .unwrap();
        }
        assert_eq!(persister.load_all().await.unwrap().len(), 5);
    }
}
