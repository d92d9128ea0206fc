//! Checkpoint store contract.

use crate::error::StorageError;
use rstchart_core::Cursor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// When a session writes checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointPolicy {
    /// Never checkpoint automatically.
    Never,
    /// Checkpoint after every macro-step.
    #[default]
    EveryMacrostep,
    /// Checkpoint after every N macro-steps.
    EveryN(u32),
}

impl CheckpointPolicy {
    /// Returns true if a checkpoint is due after `macrostep` steps.
    pub fn is_due(&self, macrostep: u64) -> bool {
        match self {
            CheckpointPolicy::Never => false,
            CheckpointPolicy::EveryMacrostep => true,
            CheckpointPolicy::EveryN(0) => false,
            CheckpointPolicy::EveryN(n) => macrostep % u64::from(*n) == 0,
        }
    }
}

impl FromStr for CheckpointPolicy {
    type Err = String;

    /// Parses `never`, `every_macrostep` or `every_n:<n>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "never" => Ok(CheckpointPolicy::Never),
            "every_macrostep" | "everymacrostep" => Ok(CheckpointPolicy::EveryMacrostep),
            s if s.starts_with("every_n:") => s[8..]
                .parse()
                .map(CheckpointPolicy::EveryN)
                .map_err(|e| format!("invalid checkpoint interval '{}': {}", &s[8..], e)),
            other => Err(format!("unknown checkpoint policy '{}'", other)),
        }
    }
}

impl fmt::Display for CheckpointPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointPolicy::Never => write!(f, "never"),
            CheckpointPolicy::EveryMacrostep => write!(f, "every_macrostep"),
            CheckpointPolicy::EveryN(n) => write!(f, "every_n:{}", n),
        }
    }
}

/// Metadata kept for the latest checkpoint of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub checkpoint_id: String,
    pub session_id: String,
    pub chart: String,
    pub macrostep: u64,
    pub created_at: u64,
    pub size_bytes: u64,
    pub checksum: String,
}

impl CheckpointMeta {
    pub(crate) fn new(session_id: &str, cursor: &Cursor, data: &[u8]) -> Self {
        Self {
            checkpoint_id: format!("ckpt-{}", uuid::Uuid::new_v4()),
            session_id: session_id.to_string(),
            chart: cursor.chart.clone(),
            macrostep: cursor.macrostep,
            created_at: cursor.created_at,
            size_bytes: data.len() as u64,
            checksum: checksum(data),
        }
    }
}

pub(crate) fn checksum(data: &[u8]) -> String {
    format!("{:08x}", crc32c::crc32c(data))
}

/// Persists session cursors.
///
/// Only the latest checkpoint of a session is kept; saving a new one
/// replaces the previous one.
pub trait CheckpointStore: Send + Sync {
    /// Stores a cursor and returns its metadata. `checkpoint_id` is the token
    /// for [`CheckpointStore::load`].
    fn save(&self, session_id: &str, cursor: &Cursor) -> Result<CheckpointMeta, StorageError>;

    fn load(&self, checkpoint_id: &str) -> Result<Cursor, StorageError>;

    /// Latest cursor of a session, if any.
    fn latest(&self, session_id: &str) -> Result<Option<Cursor>, StorageError>;

    fn delete(&self, checkpoint_id: &str) -> Result<(), StorageError>;

    fn list(&self) -> Vec<CheckpointMeta>;
}
