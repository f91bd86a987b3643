//! # pianodb - Piano generation metadata store
//!
//! Data-access layer for the relational store behind the piano generation
//! experiments.
//!
//! pianodb provides:
//! - Schema definitions for models, generators, sources and generations
//! - Idempotent get-or-create registration for models, generators and sources
//! - A generation recorder resolving the foreign entities of each output
//! - Read-only lookups and reports for dashboards and analysis
//! - SQLite-backed storage

pub mod model;
pub mod generator;
pub mod source;
pub mod generation;
pub mod notes;
pub mod storage;
pub mod output;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use model::{Checkpoint, Model, ModelRegistration};
pub use generator::{Generator, GeneratorSpec, MidiGenerator};
pub use source::Source;
pub use generation::{Generation, GenerationRequest, Prediction, PredictionFilters};
pub use notes::{Note, NoteTable};
pub use storage::SqliteStore;

/// Result type alias for pianodb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for pianodb operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Model name does not follow the naming convention: {0}")]
    ModelName(String),

    #[error("Malformed checkpoint: {0}")]
    Checkpoint(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown column {column} in table {table}")]
    UnknownColumn { table: String, column: String },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}
