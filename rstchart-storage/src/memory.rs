//! In-memory checkpoint store.

use crate::error::StorageError;
use crate::store::{CheckpointMeta, CheckpointStore};
use dashmap::DashMap;
use rstchart_core::Cursor;

/// Keeps encoded cursors in memory. Cursors are stored as JSON so a load
/// returns an independent copy, exactly like the file store.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: DashMap<String, (CheckpointMeta, Vec<u8>)>,
    /// Session id -> latest checkpoint id.
    latest: DashMap<String, String>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, session_id: &str, cursor: &Cursor) -> Result<CheckpointMeta, StorageError> {
        let data = serde_json::to_vec(cursor)?;
        let meta = CheckpointMeta::new(session_id, cursor, &data);
        self.checkpoints
            .insert(meta.checkpoint_id.clone(), (meta.clone(), data));
        if let Some(previous) = self
            .latest
            .insert(session_id.to_string(), meta.checkpoint_id.clone())
        {
            self.checkpoints.remove(&previous);
        }
        Ok(meta)
    }

    fn load(&self, checkpoint_id: &str) -> Result<Cursor, StorageError> {
        let entry = self
            .checkpoints
            .get(checkpoint_id)
            .ok_or_else(|| StorageError::CheckpointNotFound(checkpoint_id.to_string()))?;
        Ok(serde_json::from_slice(&entry.1)?)
    }

    fn latest(&self, session_id: &str) -> Result<Option<Cursor>, StorageError> {
        let id = match self.latest.get(session_id) {
            Some(id) => id.clone(),
            None => return Ok(None),
        };
        self.load(&id).map(Some)
    }

    fn delete(&self, checkpoint_id: &str) -> Result<(), StorageError> {
        if let Some((_, (meta, _))) = self.checkpoints.remove(checkpoint_id) {
            self.latest
                .remove_if(&meta.session_id, |_, id| id == checkpoint_id);
        }
        Ok(())
    }

    fn list(&self) -> Vec<CheckpointMeta> {
        let mut all: Vec<CheckpointMeta> = self
            .checkpoints
            .iter()
            .map(|entry| entry.value().0.clone())
            .collect();
        all.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cursor(session: &str, macrostep: u64) -> Cursor {
        Cursor {
            session_id: session.to_string(),
            chart: "door".to_string(),
            checksum: "00000001".to_string(),
            configuration: vec!["closed".to_string()],
            history: Default::default(),
            internal_queue: Vec::new(),
            external_queue: Vec::new(),
            pending_timers: Vec::new(),
            datamodel: json!({"opens": macrostep}),
            invokes: Vec::new(),
            late_bound: Vec::new(),
            invoke_seq: 0,
            macrostep,
            created_at: 0,
        }
    }

    #[test]
    fn test_save_and_latest() {
        let store = MemoryCheckpointStore::new();
        store.save("a", &cursor("a", 1)).unwrap();
        store.save("a", &cursor("a", 2)).unwrap();
        store.save("b", &cursor("b", 7)).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.latest("a").unwrap().unwrap().macrostep, 2);
        assert_eq!(store.latest("b").unwrap().unwrap().datamodel, json!({"opens": 7}));
        assert!(store.latest("c").unwrap().is_none());
    }

    #[test]
    fn test_delete_clears_latest() {
        let store = MemoryCheckpointStore::new();
        let meta = store.save("a", &cursor("a", 1)).unwrap();
        store.delete(&meta.checkpoint_id).unwrap();
        assert!(store.is_empty());
        assert!(store.latest("a").unwrap().is_none());
        assert!(matches!(
            store.load(&meta.checkpoint_id),
            Err(StorageError::CheckpointNotFound(_))
        ));
    }
}
