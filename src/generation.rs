//! Generations: outputs tying a model, a generator and a source together

use serde::Serialize;
use serde_json::Value;

use crate::generator::{Generator, MidiGenerator};
use crate::model::Checkpoint;
use crate::notes::NoteTable;
use crate::Result;

/// Generation row as stored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Generation {
    pub generation_id: i64,
    pub generator_id: i64,
    pub model_id: i64,
    pub source_id: i64,
    pub prompt_notes: Value,
    pub generated_notes: Value,
}

impl Generation {
    pub fn prompt_note_table(&self) -> Result<NoteTable> {
        NoteTable::from_json(&self.prompt_notes)
    }

    pub fn generated_note_table(&self) -> Result<NoteTable> {
        NoteTable::from_json(&self.generated_notes)
    }
}

/// Everything needed to record one generation
pub struct GenerationRequest<'a> {
    pub checkpoint: &'a Checkpoint,
    pub model_name: &'a str,
    pub generator: &'a dyn MidiGenerator,
    pub generated_notes: &'a NoteTable,
    pub prompt_notes: &'a NoteTable,
    pub source_notes: &'a NoteTable,
    pub source: &'a Value,
}

/// A generation joined with its source descriptor and generator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub generation: Generation,
    pub model_name: String,
    pub source: Value,
    pub generator: Generator,
}

/// Exact-match filters for [`crate::SqliteStore::get_model_predictions`].
///
/// Keys are column names of the respective table.
#[derive(Debug, Clone, Default)]
pub struct PredictionFilters {
    pub model: Vec<(String, Value)>,
    pub source: Vec<(String, Value)>,
    pub generator: Vec<(String, Value)>,
}

impl PredictionFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.model.push((column.to_string(), value.into()));
        self
    }

    pub fn source(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.source.push((column.to_string(), value.into()));
        self
    }

    pub fn generator(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.generator.push((column.to_string(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.model.is_empty() && self.source.is_empty() && self.generator.is_empty()
    }
}
