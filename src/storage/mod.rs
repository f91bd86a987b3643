//! Storage Layer - SQLite-backed persistence
//!
//! System of record is SQLite with tables:
//! - models(model_id, base_model_id, name, metrics..., configs, created_at)
//! - generators(generator_id, generator_name, generator_parameters, task)
//! - sources(source_id, source, notes)
//! - generations(generation_id, generator_id, model_id, source_id, prompt_notes, generated_notes)

pub mod schema;
pub mod sqlite;
mod registry;
mod recorder;
mod reports;
mod maintenance;

pub use sqlite::{SqliteStore, DbStats, InsertMode, Record};
pub use reports::VALIDATION_SAMPLE_SIZE;
pub use maintenance::PurgeStats;
