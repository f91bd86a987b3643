//! Get-or-create registration of models, generators and sources
//!
//! Each registrar runs its lookup and insert inside one immediate
//! transaction, and the identity columns carry unique indexes, so two
//! callers registering the same entity always end up with one row.

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, OptionalExtension, Transaction, TransactionBehavior};
use serde_json::{json, Value};

use super::schema::{TableSchema, GENERATORS, MODELS, SOURCES, TIMESTAMP_FORMAT};
use super::sqlite::{insert_records_in, into_record, InsertMode, Record, SqliteStore};
use crate::generator::{GeneratorSpec, MidiGenerator};
use crate::model::{Checkpoint, ModelRegistration};
use crate::notes::NoteTable;
use crate::source::canonical_source;
use crate::Result;

const FIND_MODEL: &str = "SELECT model_id FROM models \
     WHERE name = ?1 AND total_tokens IS ?2 \
     ORDER BY model_id LIMIT 1";

const FIND_GENERATOR: &str = "SELECT generator_id FROM generators \
     WHERE generator_name = ?1 AND generator_parameters = ?2 AND task = ?3 \
     ORDER BY generator_id LIMIT 1";

const FIND_SOURCE: &str =
    "SELECT source_id FROM sources WHERE source = ?1 ORDER BY source_id LIMIT 1";

impl SqliteStore {
    // ========== Models ==========

    /// Register the model a checkpoint belongs to.
    ///
    /// The base model is resolved by name from `config.init_from` unless the
    /// model was trained from scratch. Returns the registration that was used
    /// together with the model identifier.
    pub fn register_model_from_checkpoint(
        &self,
        checkpoint: &Checkpoint,
        model_name: &str,
    ) -> Result<(ModelRegistration, i64)> {
        let mut registration = ModelRegistration::from_checkpoint(checkpoint, model_name)?;

        if let Some(base_name) = checkpoint.config.base_model_name() {
            registration.base_model_id = self.get_model_id(base_name)?;
            if registration.base_model_id.is_none() {
                tracing::warn!("Base model {} of {} is not registered", base_name, model_name);
            }
        }

        let model_id = self.register_model(&registration)?;
        Ok((registration, model_id))
    }

    /// Get or create a model identified by (name, total_tokens)
    pub fn register_model(&self, registration: &ModelRegistration) -> Result<i64> {
        let lookup = [
            SqlValue::Text(registration.name.clone()),
            registration.total_tokens.map_or(SqlValue::Null, SqlValue::Integer),
        ];

        self.get_or_create(&MODELS, FIND_MODEL, &lookup, || {
            let created_at = registration.resolved_created_at().unwrap_or_else(|| {
                tracing::warn!("No date in model name {}, using current time", registration.name);
                chrono::Local::now().naive_local()
            });

            Ok(into_record(json!({
                "name": registration.name,
                "base_model_id": registration.base_model_id,
                "milion_parameters": registration.milion_parameters,
                "best_val_loss": registration.best_val_loss,
                "train_loss": registration.train_loss,
                "iter_num": registration.iter_num,
                "total_tokens": registration.total_tokens,
                "configs": registration.configs,
                "training_task": registration.training_task,
                "wandb_link": registration.wandb_link,
                "created_at": created_at.format(TIMESTAMP_FORMAT).to_string(),
            })))
        })
    }

    // ========== Generators ==========

    /// Get or create a generator for a generator object
    pub fn register_generator_object(&self, generator: &dyn MidiGenerator) -> Result<i64> {
        self.register_generator(&GeneratorSpec::describe(generator))
    }

    /// Get or create a generator identified by (name, parameters, task)
    pub fn register_generator(&self, generator: &GeneratorSpec) -> Result<i64> {
        let lookup = [
            SqlValue::Text(generator.generator_name.clone()),
            SqlValue::Text(generator.canonical_parameters()?),
            SqlValue::Text(generator.task.clone()),
        ];

        self.get_or_create(&GENERATORS, FIND_GENERATOR, &lookup, || {
            Ok(into_record(json!({
                "generator_name": generator.generator_name,
                "generator_parameters": generator.generator_parameters,
                "task": generator.task,
            })))
        })
    }

    // ========== Sources ==========

    /// Get or create a source identified by its descriptor.
    ///
    /// Notes are stored with a new source only; an existing source keeps the
    /// notes it was first registered with.
    pub fn insert_source(&self, source: &Value, notes: &NoteTable) -> Result<i64> {
        let lookup = [SqlValue::Text(canonical_source(source)?)];

        self.get_or_create(&SOURCES, FIND_SOURCE, &lookup, || {
            Ok(into_record(json!({
                "source": source,
                "notes": notes.to_json(),
            })))
        })
    }

    /// Look up `find`; insert the record built by `build` when nothing matches
    fn get_or_create<F>(
        &self,
        table: &TableSchema,
        find: &str,
        lookup: &[SqlValue],
        build: F,
    ) -> Result<i64>
    where
        F: FnOnce() -> Result<Record>,
    {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;

        let existing: Option<i64> = tx
            .query_row(find, params_from_iter(lookup.iter()), |row| row.get(0))
            .optional()?;
        if let Some(id) = existing {
            tracing::debug!("Found existing {} row {}", table.name, id);
            tx.commit()?;
            return Ok(id);
        }

        insert_records_in(&tx, table, &[build()?], InsertMode::SkipExisting)?;
        let id: i64 = tx.query_row(find, params_from_iter(lookup.iter()), |row| row.get(0))?;
        tx.commit()?;

        tracing::info!("Registered new {} row {}", table.name, id);
        Ok(id)
    }
}
