//! File-backed checkpoint store.
//!
//! Layout:
//!
//! ```text
//! <dir>/index.json          session id -> CheckpointMeta of its latest checkpoint
//! <dir>/<checkpoint_id>.ckpt JSON-encoded Cursor
//! ```

use crate::error::StorageError;
use crate::store::{checksum, CheckpointMeta, CheckpointStore};
use parking_lot::RwLock;
use rstchart_core::Cursor;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub struct FileCheckpointStore {
    dir: PathBuf,
    /// Session id -> latest checkpoint.
    index: RwLock<HashMap<String, CheckpointMeta>>,
}

impl FileCheckpointStore {
    /// Opens or creates a store at the given directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let store = Self {
            dir,
            index: RwLock::new(HashMap::new()),
        };
        store.load_index()?;

        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn load_index(&self) -> Result<(), StorageError> {
        let index_path = self.dir.join("index.json");
        if !index_path.exists() {
            return Ok(());
        }

        let file = File::open(&index_path)?;
        let reader = BufReader::new(file);
        let index: HashMap<String, CheckpointMeta> = serde_json::from_reader(reader)?;
        *self.index.write() = index;

        Ok(())
    }

    /// Writes the index through a temporary file so a crash never leaves a
    /// truncated index behind.
    fn save_index(&self) -> Result<(), StorageError> {
        let index_path = self.dir.join("index.json");
        let tmp_path = self.dir.join("index.json.tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, &*self.index.read())?;
            writer.flush()?;
        }
        fs::rename(&tmp_path, &index_path)?;
        Ok(())
    }

    fn checkpoint_path(&self, checkpoint_id: &str) -> PathBuf {
        self.dir.join(format!("{}.ckpt", checkpoint_id))
    }

    fn read_checkpoint(&self, meta: Option<&CheckpointMeta>, id: &str) -> Result<Cursor, StorageError> {
        let path = self.checkpoint_path(id);
        if !path.exists() {
            return Err(StorageError::CheckpointNotFound(id.to_string()));
        }

        let mut file = File::open(&path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        if let Some(meta) = meta {
            let actual = checksum(&data);
            if actual != meta.checksum {
                return Err(StorageError::Corruption(format!(
                    "checkpoint {} checksum mismatch (expected {}, got {})",
                    id, meta.checksum, actual
                )));
            }
        }

        Ok(serde_json::from_slice(&data)?)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, session_id: &str, cursor: &Cursor) -> Result<CheckpointMeta, StorageError> {
        let data = serde_json::to_vec_pretty(cursor)?;
        let meta = CheckpointMeta::new(session_id, cursor, &data);

        let mut file = File::create(self.checkpoint_path(&meta.checkpoint_id))?;
        file.write_all(&data)?;
        file.sync_all()?;

        let previous = self
            .index
            .write()
            .insert(session_id.to_string(), meta.clone());
        self.save_index()?;

        if let Some(previous) = previous {
            let stale = self.checkpoint_path(&previous.checkpoint_id);
            if let Err(e) = fs::remove_file(&stale) {
                tracing::warn!(
                    "Failed to remove stale checkpoint {}: {}",
                    previous.checkpoint_id,
                    e
                );
            }
        }

        tracing::debug!(
            "Saved checkpoint {} for session {} at macrostep {}",
            meta.checkpoint_id,
            session_id,
            meta.macrostep
        );

        Ok(meta)
    }

    fn load(&self, checkpoint_id: &str) -> Result<Cursor, StorageError> {
        let meta = self
            .index
            .read()
            .values()
            .find(|m| m.checkpoint_id == checkpoint_id)
            .cloned();
        self.read_checkpoint(meta.as_ref(), checkpoint_id)
    }

    fn latest(&self, session_id: &str) -> Result<Option<Cursor>, StorageError> {
        let meta = self.index.read().get(session_id).cloned();
        match meta {
            Some(meta) => Ok(Some(
                self.read_checkpoint(Some(&meta), &meta.checkpoint_id)?,
            )),
            None => Ok(None),
        }
    }

    fn delete(&self, checkpoint_id: &str) -> Result<(), StorageError> {
        let path = self.checkpoint_path(checkpoint_id);
        if path.exists() {
            fs::remove_file(&path)?;
        }

        self.index
            .write()
            .retain(|_, meta| meta.checkpoint_id != checkpoint_id);
        self.save_index()?;

        Ok(())
    }

    fn list(&self) -> Vec<CheckpointMeta> {
        let mut all: Vec<CheckpointMeta> = self.index.read().values().cloned().collect();
        all.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn cursor(session: &str, macrostep: u64) -> Cursor {
        Cursor {
            session_id: session.to_string(),
            chart: "order".to_string(),
            checksum: "0badf00d".to_string(),
            configuration: vec!["paid".to_string()],
            history: Default::default(),
            internal_queue: Vec::new(),
            external_queue: Vec::new(),
            pending_timers: Vec::new(),
            datamodel: json!({"amount": 100}),
            invokes: Vec::new(),
            late_bound: Vec::new(),
            invoke_seq: 0,
            macrostep,
            created_at: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::open(dir.path()).unwrap();

        let meta = store.save("s-1", &cursor("s-1", 5)).unwrap();
        assert_eq!(meta.session_id, "s-1");
        assert_eq!(meta.macrostep, 5);

        let loaded = store.load(&meta.checkpoint_id).unwrap();
        assert_eq!(loaded, cursor("s-1", 5));
    }

    #[test]
    fn test_latest_replaces_previous() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::open(dir.path()).unwrap();

        let first = store.save("s-1", &cursor("s-1", 1)).unwrap();
        store.save("s-1", &cursor("s-1", 2)).unwrap();
        let third = store.save("s-1", &cursor("s-1", 3)).unwrap();

        let latest = store.latest("s-1").unwrap().unwrap();
        assert_eq!(latest.macrostep, 3);
        assert_eq!(store.list(), vec![third]);
        assert!(matches!(
            store.load(&first.checkpoint_id),
            Err(StorageError::CheckpointNotFound(_))
        ));
        assert!(store.latest("s-2").unwrap().is_none());
    }

    #[test]
    fn test_index_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = FileCheckpointStore::open(dir.path()).unwrap();
            store.save("s-1", &cursor("s-1", 1)).unwrap();
            store.save("s-2", &cursor("s-2", 4)).unwrap();
        }

        let store = FileCheckpointStore::open(dir.path()).unwrap();
        assert_eq!(store.list().len(), 2);
        assert_eq!(store.latest("s-2").unwrap().unwrap().macrostep, 4);
    }

    #[test]
    fn test_corruption_detected() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::open(dir.path()).unwrap();
        let meta = store.save("s-1", &cursor("s-1", 1)).unwrap();

        let path = dir.path().join(format!("{}.ckpt", meta.checkpoint_id));
        let mut data = fs::read(&path).unwrap();
        let last = data.len() - 3;
        data[last] ^= 0x01;
        fs::write(&path, data).unwrap();

        assert!(matches!(
            store.latest("s-1"),
            Err(StorageError::Corruption(_))
        ));
    }

    #[test]
    fn test_delete() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::open(dir.path()).unwrap();
        let meta = store.save("s-1", &cursor("s-1", 1)).unwrap();

        store.delete(&meta.checkpoint_id).unwrap();
        assert!(store.latest("s-1").unwrap().is_none());
        assert!(store.list().is_empty());
        // deleting twice is fine
        store.delete(&meta.checkpoint_id).unwrap();
    }
}
