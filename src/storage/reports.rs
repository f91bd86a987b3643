//! Read-only lookups and reports

use std::collections::HashMap;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde_json::Value;

use super::schema::{self, ColumnType, TableSchema, GENERATORS, MODELS, SOURCES};
use super::sqlite::{
    json_column, json_column_or_null, opt_json_column, opt_timestamp_column, SqliteStore,
};
use crate::generation::{Generation, Prediction, PredictionFilters};
use crate::generator::Generator;
use crate::model::Model;
use crate::source::Source;
use crate::Result;

/// Number of sources in the validation set
pub const VALIDATION_SAMPLE_SIZE: usize = 16;

const MODEL_COLUMNS: &str =
    "model_id, base_model_id, name, milion_parameters, best_val_loss, train_loss, \
     iter_num, total_tokens, configs, training_task, wandb_link, created_at";

const GENERATION_COLUMNS: &str =
    "generation_id, generator_id, model_id, source_id, prompt_notes, generated_notes";

impl SqliteStore {
    // ========== Generators ==========

    /// Get a generator by identifier
    pub fn get_generator(&self, generator_id: i64) -> Result<Option<Generator>> {
        self.conn
            .query_row(
                "SELECT generator_id, generator_name, generator_parameters, task
                 FROM generators WHERE generator_id = ?1",
                [generator_id],
                row_to_generator,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Get every generator
    pub fn get_all_generators(&self) -> Result<Vec<Generator>> {
        let mut stmt = self.conn.prepare(
            "SELECT generator_id, generator_name, generator_parameters, task
             FROM generators ORDER BY generator_id",
        )?;
        let generators = stmt.query_map([], row_to_generator)?.collect::<rusqlite::Result<_>>()?;
        Ok(generators)
    }

    // ========== Sources ==========

    /// Get a source by identifier
    pub fn get_source(&self, source_id: i64) -> Result<Option<Source>> {
        self.conn
            .query_row(
                "SELECT source_id, source, notes FROM sources WHERE source_id = ?1",
                [source_id],
                row_to_source,
            )
            .optional()
            .map_err(Into::into)
    }

    /// The validation set: the first sources ever registered.
    ///
    /// Stable as long as sources are only ever appended.
    pub fn get_validation_sources(&self) -> Result<Vec<Source>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_id, source, notes FROM sources ORDER BY source_id ASC LIMIT ?1",
        )?;
        let sources = stmt
            .query_map([VALIDATION_SAMPLE_SIZE as i64], row_to_source)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(sources)
    }

    /// Get every source
    pub fn get_all_sources(&self) -> Result<Vec<Source>> {
        let mut stmt =
            self.conn.prepare("SELECT source_id, source, notes FROM sources ORDER BY source_id")?;
        let sources = stmt.query_map([], row_to_source)?.collect::<rusqlite::Result<_>>()?;
        Ok(sources)
    }

    // ========== Models ==========

    /// Get every model
    pub fn get_all_models(&self) -> Result<Vec<Model>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {} FROM models ORDER BY model_id", MODEL_COLUMNS))?;
        let models = stmt.query_map([], row_to_model)?.collect::<rusqlite::Result<_>>()?;
        Ok(models)
    }

    /// Get every model registered under a name
    pub fn get_models(&self, model_name: &str) -> Result<Vec<Model>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM models WHERE name = ?1 ORDER BY model_id",
            MODEL_COLUMNS
        ))?;
        let models = stmt.query_map([model_name], row_to_model)?.collect::<rusqlite::Result<_>>()?;
        Ok(models)
    }

    /// Identifier of a model by name.
    ///
    /// When several models share the name (different token counts), the
    /// most recently registered one wins.
    pub fn get_model_id(&self, model_name: &str) -> Result<Option<i64>> {
        let mut stmt =
            self.conn.prepare("SELECT model_id FROM models WHERE name = ?1 ORDER BY model_id")?;
        let ids: Vec<i64> = stmt
            .query_map([model_name], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(ids.last().copied())
    }

    /// Distinct generator names used in a model's generations, alphabetically
    pub fn get_model_generator_names(&self, model_id: i64) -> Result<Vec<String>> {
        self.distinct_generator_column(model_id, "generator_name")
    }

    /// Distinct generator tasks used in a model's generations, alphabetically
    pub fn get_model_tasks(&self, model_id: i64) -> Result<Vec<String>> {
        self.distinct_generator_column(model_id, "task")
    }

    fn distinct_generator_column(&self, model_id: i64, column: &str) -> Result<Vec<String>> {
        GENERATORS.check_column(column)?;
        let sql = format!(
            "SELECT DISTINCT g.{col}
             FROM generations gn
             JOIN generators g ON gn.generator_id = g.generator_id
             WHERE gn.model_id = ?1
             ORDER BY g.{col}",
            col = column
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let values = stmt
            .query_map(params![model_id], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(values)
    }

    /// Models with at least one generation, ordered by identifier.
    ///
    /// The configuration blobs are read by a second query and merged in by
    /// identifier.
    pub fn select_models_with_generations(&self) -> Result<Vec<Model>> {
        let scalar_columns = MODEL_COLUMNS.replace("configs", "NULL AS configs");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM models
             WHERE model_id IN (SELECT DISTINCT model_id FROM generations)
             ORDER BY model_id",
            scalar_columns
        ))?;
        let mut models: Vec<Model> =
            stmt.query_map([], row_to_model)?.collect::<rusqlite::Result<_>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT model_id, configs FROM models
             WHERE model_id IN (SELECT DISTINCT model_id FROM generations)",
        )?;
        let configs: HashMap<i64, Option<Value>> = stmt
            .query_map([], |row| Ok((row.get(0)?, opt_json_column(row, 1)?)))?
            .collect::<rusqlite::Result<_>>()?;

        for model in &mut models {
            model.configs = configs.get(&model.model_id).cloned().flatten();
        }
        Ok(models)
    }

    // ========== Generations ==========

    /// Get every generation
    pub fn get_all_generations(&self) -> Result<Vec<Generation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM generations ORDER BY generation_id",
            GENERATION_COLUMNS
        ))?;
        let generations = stmt
            .query_map([], |row| row_to_generation(row, 0))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(generations)
    }

    /// Generations joined with their model, generator and source, filtered by
    /// exact matches on columns of those tables.
    ///
    /// Filter keys must be columns of the respective table; values are bound
    /// as parameters.
    pub fn get_model_predictions(&self, filters: &PredictionFilters) -> Result<Vec<Prediction>> {
        let mut sql = String::from(
            "SELECT gn.generation_id, gn.generator_id, gn.model_id, gn.source_id,
                    gn.prompt_notes, gn.generated_notes,
                    m.name, st.source, g.generator_name, g.generator_parameters, g.task
             FROM generations gn
             JOIN models m ON gn.model_id = m.model_id
             JOIN generators g ON gn.generator_id = g.generator_id
             JOIN sources st ON gn.source_id = st.source_id
             WHERE 1=1",
        );
        let mut params = Vec::new();

        for (alias, table, conditions) in [
            ("m", &MODELS, &filters.model),
            ("st", &SOURCES, &filters.source),
            ("g", &GENERATORS, &filters.generator),
        ] {
            push_conditions(&mut sql, &mut params, alias, table, conditions)?;
        }
        sql.push_str(" ORDER BY gn.generation_id");

        let mut stmt = self.conn.prepare(&sql)?;
        let predictions = stmt
            .query_map(params_from_iter(params.iter()), |row| {
                let generation = row_to_generation(row, 0)?;
                Ok(Prediction {
                    model_name: row.get(6)?,
                    source: json_column(row, 7)?,
                    generator: Generator {
                        generator_id: generation.generator_id,
                        generator_name: row.get(8)?,
                        generator_parameters: json_column(row, 9)?,
                        task: row.get(10)?,
                    },
                    generation,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        Ok(predictions)
    }

    // ========== Generic ==========

    /// Distinct non-null values of a column, ordered.
    ///
    /// Both identifiers are checked against the schema. JSON columns come
    /// back decoded.
    pub fn get_unique_values(&self, column: &str, table: &str) -> Result<Vec<Value>> {
        let schema = schema::table(table)?;
        let ty = schema.check_column(column)?;

        let sql = format!(
            "SELECT DISTINCT {col} FROM {table} WHERE {col} IS NOT NULL ORDER BY {col}",
            col = column,
            table = schema.name
        );
        let rows = self.read_rows(&sql, &[])?;

        rows.into_iter()
            .filter_map(|mut row| row.remove(column))
            .map(|value| -> Result<Value> {
                match (ty, value) {
                    (ColumnType::Json, Value::String(text)) => Ok(serde_json::from_str(&text)?),
                    (_, value) => Ok(value),
                }
            })
            .collect()
    }
}

fn push_conditions(
    sql: &mut String,
    params: &mut Vec<SqlValue>,
    alias: &str,
    table: &TableSchema,
    conditions: &[(String, Value)],
) -> Result<()> {
    for (column, value) in conditions {
        let ty = table.check_column(column)?;
        params.push(filter_value(ty, value)?);
        sql.push_str(&format!(" AND {}.{} IS ?{}", alias, column, params.len()));
    }
    Ok(())
}

/// Bind value of an exact-match filter
fn filter_value(ty: ColumnType, value: &Value) -> Result<SqlValue> {
    let bound = match (ty, value) {
        (ColumnType::Json, value) => SqlValue::Text(serde_json::to_string(value)?),
        (_, Value::Null) => SqlValue::Null,
        (_, Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        (_, Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        (_, Value::String(s)) => SqlValue::Text(s.clone()),
        (_, other) => SqlValue::Text(other.to_string()),
    };
    Ok(bound)
}

// ========== Row Mapping ==========

fn row_to_generator(row: &rusqlite::Row) -> rusqlite::Result<Generator> {
    Ok(Generator {
        generator_id: row.get(0)?,
        generator_name: row.get(1)?,
        generator_parameters: json_column(row, 2)?,
        task: row.get(3)?,
    })
}

fn row_to_source(row: &rusqlite::Row) -> rusqlite::Result<Source> {
    Ok(Source {
        source_id: row.get(0)?,
        source: json_column(row, 1)?,
        notes: json_column_or_null(row, 2)?,
    })
}

fn row_to_model(row: &rusqlite::Row) -> rusqlite::Result<Model> {
    Ok(Model {
        model_id: row.get(0)?,
        base_model_id: row.get(1)?,
        name: row.get(2)?,
        milion_parameters: row.get(3)?,
        best_val_loss: row.get(4)?,
        train_loss: row.get(5)?,
        iter_num: row.get(6)?,
        total_tokens: row.get(7)?,
        configs: opt_json_column(row, 8)?,
        training_task: row.get(9)?,
        wandb_link: row.get(10)?,
        created_at: opt_timestamp_column(row, 11)?,
    })
}

fn row_to_generation(row: &rusqlite::Row, offset: usize) -> rusqlite::Result<Generation> {
    Ok(Generation {
        generation_id: row.get(offset)?,
        generator_id: row.get(offset + 1)?,
        model_id: row.get(offset + 2)?,
        source_id: row.get(offset + 3)?,
        prompt_notes: json_column_or_null(row, offset + 4)?,
        generated_notes: json_column_or_null(row, offset + 5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::NoteTable;
    use crate::storage::fixtures;
    use serde_json::json;

    #[test]
    fn test_lookups_miss_without_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get_generator(1).unwrap().is_none());
        assert!(store.get_source(1).unwrap().is_none());
        assert!(store.get_model_id("nobody").unwrap().is_none());
        assert!(store.get_models("nobody").unwrap().is_empty());
    }

    #[test]
    fn test_validation_sources_are_first_sixteen() {
        let store = SqliteStore::open_in_memory().unwrap();
        for i in 0..20 {
            let source = json!({ "filename": format!("{i}.mid") });
            store.insert_source(&source, &NoteTable::default()).unwrap();
        }

        let sources = store.get_validation_sources().unwrap();
        assert_eq!(sources.len(), VALIDATION_SAMPLE_SIZE);
        assert!(sources.windows(2).all(|w| w[0].source_id < w[1].source_id));
        assert_eq!(sources[0].source["filename"], "0.mid");
        assert_eq!(store.get_all_sources().unwrap().len(), 20);
    }

    #[test]
    fn test_validation_sources_with_few_sources() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_source(&json!({ "filename": "only.mid" }), &NoteTable::default()).unwrap();
        assert_eq!(store.get_validation_sources().unwrap().len(), 1);
    }

    #[test]
    fn test_get_model_id_returns_last_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut checkpoint = fixtures::checkpoint();
        let (_, first) =
            store.register_model_from_checkpoint(&checkpoint, "midi-gpt2-302M-a").unwrap();
        checkpoint.total_tokens = Some(2000);
        let (_, second) =
            store.register_model_from_checkpoint(&checkpoint, "midi-gpt2-302M-a").unwrap();

        assert_ne!(first, second);
        assert_eq!(store.get_model_id("midi-gpt2-302M-a").unwrap(), Some(second));
        assert_eq!(store.get_models("midi-gpt2-302M-a").unwrap().len(), 2);
    }

    #[test]
    fn test_model_generator_names_and_tasks() {
        let store = SqliteStore::open_in_memory().unwrap();
        fixtures::record_generation(&store, "midi-gpt2-302M-a", "a.mid", "Zeta");
        fixtures::record_generation(&store, "midi-gpt2-302M-a", "b.mid", "Alpha");
        fixtures::record_generation(&store, "midi-gpt2-302M-a", "c.mid", "Alpha");
        fixtures::record_generation(&store, "midi-gpt2-302M-b", "a.mid", "Other");

        let model_id = store.get_model_id("midi-gpt2-302M-a").unwrap().unwrap();
        assert_eq!(store.get_model_generator_names(model_id).unwrap(), vec!["Alpha", "Zeta"]);
        assert_eq!(store.get_model_tasks(model_id).unwrap(), vec!["next_token_prediction"]);
    }

    #[test]
    fn test_select_models_with_generations_merges_configs() {
        let store = SqliteStore::open_in_memory().unwrap();
        fixtures::record_generation(&store, "midi-gpt2-302M-used", "a.mid", "Alpha");
        store
            .register_model_from_checkpoint(&fixtures::checkpoint(), "midi-gpt2-302M-unused")
            .unwrap();

        let models = store.select_models_with_generations().unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "midi-gpt2-302M-used");
        assert_eq!(models[0].configs.as_ref().unwrap()["task"], "next_token_prediction");
        assert_eq!(models[0].milion_parameters, Some(302));
    }

    #[test]
    fn test_model_predictions_filter_by_model_name() {
        let store = SqliteStore::open_in_memory().unwrap();
        fixtures::record_generation(&store, "midi-gpt2-302M-m1", "a.mid", "Alpha");
        fixtures::record_generation(&store, "midi-gpt2-302M-m1", "b.mid", "Beta");
        fixtures::record_generation(&store, "midi-gpt2-302M-m2", "a.mid", "Alpha");

        let all = store.get_model_predictions(&PredictionFilters::new()).unwrap();
        assert_eq!(all.len(), 3);

        let filtered = store
            .get_model_predictions(&PredictionFilters::new().model("name", "midi-gpt2-302M-m1"))
            .unwrap();
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|p| p.model_name == "midi-gpt2-302M-m1"));
    }

    #[test]
    fn test_model_predictions_combined_filters() {
        let store = SqliteStore::open_in_memory().unwrap();
        fixtures::record_generation(&store, "midi-gpt2-302M-m1", "a.mid", "Alpha");
        fixtures::record_generation(&store, "midi-gpt2-302M-m1", "b.mid", "Beta");

        let filters = PredictionFilters::new()
            .model("name", "midi-gpt2-302M-m1")
            .generator("generator_name", "Beta")
            .model("total_tokens", 1000);
        let predictions = store.get_model_predictions(&filters).unwrap();

        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].generator.generator_name, "Beta");
        assert_eq!(predictions[0].source["filename"], "b.mid");
    }

    #[test]
    fn test_model_predictions_filter_by_source_descriptor() {
        let store = SqliteStore::open_in_memory().unwrap();
        fixtures::record_generation(&store, "midi-gpt2-302M-m1", "a.mid", "Alpha");
        fixtures::record_generation(&store, "midi-gpt2-302M-m1", "b.mid", "Alpha");

        let source = json!({ "dataset": "maestro", "filename": "a.mid" });
        let predictions = store
            .get_model_predictions(&PredictionFilters::new().source("source", source))
            .unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].source["filename"], "a.mid");
    }

    #[test]
    fn test_model_predictions_reject_unknown_column() {
        let store = SqliteStore::open_in_memory().unwrap();
        let filters = PredictionFilters::new().model("name' OR '1'='1", "x");
        let result = store.get_model_predictions(&filters);
        assert!(matches!(result, Err(crate::Error::UnknownColumn { .. })));
    }

    #[test]
    fn test_unique_values() {
        let store = SqliteStore::open_in_memory().unwrap();
        fixtures::record_generation(&store, "midi-gpt2-302M-b", "a.mid", "Beta");
        fixtures::record_generation(&store, "midi-gpt2-302M-a", "a.mid", "Alpha");
        fixtures::record_generation(&store, "midi-gpt2-302M-a", "b.mid", "Alpha");

        let names = store.get_unique_values("name", "models").unwrap();
        assert_eq!(names, vec![json!("midi-gpt2-302M-a"), json!("midi-gpt2-302M-b")]);

        let params = store.get_unique_values("generator_parameters", "generators").unwrap();
        assert_eq!(params, vec![json!({ "temperature": 1.0 })]);

        assert!(store.get_unique_values("name", "users").is_err());
        assert!(store.get_unique_values("password", "models").is_err());
    }
}
