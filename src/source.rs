//! Sources: descriptors of where a prompt came from

use serde::Serialize;
use serde_json::Value;

use crate::notes::NoteTable;
use crate::Result;

/// Source row as stored.
///
/// `source` is an arbitrary descriptor, e.g.
/// `{"dataset": "maestro", "filename": "...", "start": 12}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    pub source_id: i64,
    pub source: Value,
    pub notes: Value,
}

impl Source {
    /// Decode the stored notes
    pub fn note_table(&self) -> Result<NoteTable> {
        NoteTable::from_json(&self.notes)
    }
}

/// Canonical descriptor serialization used for identity comparison
pub fn canonical_source(source: &Value) -> serde_json::Result<String> {
    serde_json::to_string(source)
}
