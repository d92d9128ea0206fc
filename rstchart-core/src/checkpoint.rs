//! Checkpoint cursor.
//!
//! A [`Cursor`] is taken at a macro-step boundary and holds everything needed
//! to resume a session with identical future behaviour. States are recorded by
//! name so a cursor stays readable and survives recompiling the same chart.

use crate::event::Event;
use crate::platform::PendingSend;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// An invoke that was running when the checkpoint was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeRecord {
    pub invoke_id: String,
    pub state: String,
    /// Position of the invoke among the state's invokes.
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub session_id: String,
    pub chart: String,
    pub checksum: String,
    /// Active states in document order.
    pub configuration: Vec<String>,
    /// History state name to recorded states.
    #[serde(default)]
    pub history: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub internal_queue: Vec<Event>,
    /// Filled in by the host, which owns the external queue.
    #[serde(default)]
    pub external_queue: Vec<Event>,
    #[serde(default)]
    pub pending_timers: Vec<PendingSend>,
    pub datamodel: Value,
    #[serde(default)]
    pub invokes: Vec<InvokeRecord>,
    /// States whose data has been initialised under late binding.
    #[serde(default)]
    pub late_bound: Vec<String>,
    pub invoke_seq: u64,
    pub macrostep: u64,
    /// Unix timestamp in milliseconds.
    pub created_at: u64,
}

impl Cursor {
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
