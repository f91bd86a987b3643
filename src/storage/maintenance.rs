//! Deletion of models and their generations

use super::sqlite::SqliteStore;
use crate::Result;

/// Rows removed by [`SqliteStore::purge_model`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct PurgeStats {
    pub generations: usize,
    pub models: usize,
}

impl SqliteStore {
    /// Delete every model with this name together with its generations.
    ///
    /// Generations go first so no generation is ever left pointing at a
    /// missing model.
    pub fn purge_model(&self, model_name: &str) -> Result<PurgeStats> {
        let tx = self.conn.unchecked_transaction()?;
        let generations = tx.execute(
            "DELETE FROM generations
             WHERE model_id IN (SELECT model_id FROM models WHERE name = ?1)",
            [model_name],
        )?;
        let models = tx.execute("DELETE FROM models WHERE name = ?1", [model_name])?;
        tx.commit()?;

        tracing::info!(
            "Purged model {}: {} model rows, {} generations",
            model_name,
            models,
            generations
        );
        Ok(PurgeStats { generations, models })
    }

    /// Delete every model no generation refers to. Returns the number of
    /// models removed.
    pub fn remove_models_without_generations(&self) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM models
             WHERE model_id NOT IN (SELECT DISTINCT model_id FROM generations)",
            [],
        )?;

        tracing::info!("Removed {} models without generations", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fixtures;
    use crate::storage::schema::{GENERATIONS, MODELS};
    use crate::storage::sqlite::{into_record, InsertMode, Record};

    fn register(store: &SqliteStore, name: &str) -> i64 {
        store.register_model_from_checkpoint(&fixtures::checkpoint(), name).unwrap().1
    }

    #[test]
    fn test_remove_models_without_any_generations() {
        let store = SqliteStore::open_in_memory().unwrap();
        register(&store, "midi-gpt2-302M-a");
        register(&store, "midi-gpt2-302M-b");

        assert_eq!(store.remove_models_without_generations().unwrap(), 2);
        assert_eq!(store.count_rows(&MODELS).unwrap(), 0);
    }

    #[test]
    fn test_remove_models_keeps_referenced_model() {
        let store = SqliteStore::open_in_memory().unwrap();
        register(&store, "midi-gpt2-302M-a");
        fixtures::record_generation(&store, "midi-gpt2-302M-x", "a.mid", "Alpha");
        register(&store, "midi-gpt2-302M-b");

        assert_eq!(store.remove_models_without_generations().unwrap(), 2);
        let remaining = store.get_all_models().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "midi-gpt2-302M-x");
    }

    #[test]
    fn test_remove_models_clears_base_reference() {
        let store = SqliteStore::open_in_memory().unwrap();
        register(&store, "midi-gpt2-302M-base");

        let mut checkpoint = fixtures::checkpoint();
        checkpoint.config.init_from = "midi-gpt2-302M-base".to_string();
        let (registration, _) = store
            .register_model_from_checkpoint(&checkpoint, "midi-gpt2-302M-tuned")
            .unwrap();
        assert!(registration.base_model_id.is_some());

        // Give the fine-tuned model a generation so only the base is orphaned
        let generator = fixtures::generator("Alpha");
        let notes = fixtures::notes();
        let source = serde_json::json!({ "filename": "a.mid" });
        store
            .insert_generation(&crate::GenerationRequest {
                checkpoint: &checkpoint,
                model_name: "midi-gpt2-302M-tuned",
                generator: &generator,
                generated_notes: &notes,
                prompt_notes: &notes,
                source_notes: &notes,
                source: &source,
            })
            .unwrap();

        assert_eq!(store.remove_models_without_generations().unwrap(), 1);
        let tuned = store.get_models("midi-gpt2-302M-tuned").unwrap().pop().unwrap();
        assert!(tuned.base_model_id.is_none());
    }

    #[test]
    fn test_purge_model() {
        let store = SqliteStore::open_in_memory().unwrap();
        fixtures::record_generation(&store, "midi-gpt2-302M-foo", "a.mid", "Alpha");
        fixtures::record_generation(&store, "midi-gpt2-302M-foo", "b.mid", "Alpha");
        fixtures::record_generation(&store, "midi-gpt2-302M-bar", "a.mid", "Alpha");

        let stats = store.purge_model("midi-gpt2-302M-foo").unwrap();
        assert_eq!(stats, PurgeStats { generations: 2, models: 1 });

        assert!(store.get_model_id("midi-gpt2-302M-foo").unwrap().is_none());
        assert_eq!(store.count_rows(&GENERATIONS).unwrap(), 1);
        assert_eq!(store.count_rows(&MODELS).unwrap(), 1);
    }

    #[test]
    fn test_purge_unknown_model_is_a_no_op() {
        let store = SqliteStore::open_in_memory().unwrap();
        fixtures::record_generation(&store, "midi-gpt2-302M-bar", "a.mid", "Alpha");

        assert_eq!(store.purge_model("midi-gpt2-302M-foo").unwrap(), PurgeStats::default());
        assert_eq!(store.count_rows(&GENERATIONS).unwrap(), 1);
    }

    #[test]
    fn test_remove_models_with_many_referenced_models() {
        let store = SqliteStore::open_in_memory().unwrap();
        let generator_id = store.register_generator(&fixtures::generator("Alpha")).unwrap();
        let source_id = store
            .insert_source(&serde_json::json!({ "filename": "a.mid" }), &fixtures::notes())
            .unwrap();

        // More referenced models than SQLite accepts bound parameters
        let count = 33_000;
        let models: Vec<Record> = (0..=count)
            .map(|i| into_record(serde_json::json!({ "name": format!("midi-gpt2-1M-{}", i) })))
            .collect();
        let model_ids = store.insert_records(&MODELS, &models, InsertMode::Append).unwrap();

        let generations: Vec<Record> = model_ids[..count]
            .iter()
            .map(|model_id| {
                into_record(serde_json::json!({
                    "generator_id": generator_id,
                    "model_id": model_id,
                    "source_id": source_id,
                }))
            })
            .collect();
        store.insert_records(&GENERATIONS, &generations, InsertMode::Append).unwrap();

        assert_eq!(store.remove_models_without_generations().unwrap(), 1);
        assert_eq!(store.count_rows(&MODELS).unwrap(), count);
        assert!(store.get_model_id(&format!("midi-gpt2-1M-{}", count)).unwrap().is_none());
    }
}
