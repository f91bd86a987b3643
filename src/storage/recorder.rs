//! Generation recorder

use serde_json::json;

use super::schema::GENERATIONS;
use super::sqlite::{into_record, InsertMode, SqliteStore};
use crate::generation::GenerationRequest;
use crate::Result;

impl SqliteStore {
    /// Record one generation.
    ///
    /// Resolves (or creates) the generator, the model and the source, then
    /// appends the generation row. A failure in any step aborts the call;
    /// entities registered by earlier steps are kept, since registering them
    /// again is a no-op.
    pub fn insert_generation(&self, request: &GenerationRequest<'_>) -> Result<()> {
        let generator_id = self.register_generator_object(request.generator)?;
        let (_, model_id) =
            self.register_model_from_checkpoint(request.checkpoint, request.model_name)?;
        let source_id = self.insert_source(request.source, request.source_notes)?;

        let record = into_record(json!({
            "generator_id": generator_id,
            "model_id": model_id,
            "source_id": source_id,
            "prompt_notes": request.prompt_notes.to_json(),
            "generated_notes": request.generated_notes.to_json(),
        }));
        let ids = self.insert_records(&GENERATIONS, &[record], InsertMode::Append)?;

        tracing::info!(
            "Recorded generation {:?} (model {}, generator {}, source {})",
            ids.first(),
            model_id,
            generator_id,
            source_id
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fixtures;
    use crate::storage::schema::{GENERATORS, MODELS, SOURCES};

    #[test]
    fn test_insert_generation_creates_foreign_rows_once() {
        let store = SqliteStore::open_in_memory().unwrap();

        fixtures::record_generation(&store, "midi-gpt2-302M-a", "chopin.mid", "NextTokenGenerator");
        fixtures::record_generation(&store, "midi-gpt2-302M-a", "chopin.mid", "NextTokenGenerator");

        let stats = store.stats().unwrap();
        assert_eq!(stats.generations, 2);
        assert_eq!(stats.models, 1);
        assert_eq!(stats.generators, 1);
        assert_eq!(stats.sources, 1);
    }

    #[test]
    fn test_insert_generation_links_foreign_keys() {
        let store = SqliteStore::open_in_memory().unwrap();
        fixtures::record_generation(&store, "midi-gpt2-302M-a", "chopin.mid", "NextTokenGenerator");

        let generation = store.get_all_generations().unwrap().pop().unwrap();
        assert_eq!(Some(generation.model_id), store.get_model_id("midi-gpt2-302M-a").unwrap());
        assert_eq!(
            store.get_generator(generation.generator_id).unwrap().unwrap().generator_name,
            "NextTokenGenerator"
        );
        assert_eq!(
            store.get_source(generation.source_id).unwrap().unwrap().source["filename"],
            "chopin.mid"
        );
        assert_eq!(generation.generated_note_table().unwrap().len(), 2);
    }

    #[test]
    fn test_failed_model_step_keeps_generator() {
        let store = SqliteStore::open_in_memory().unwrap();
        let checkpoint = fixtures::checkpoint();
        let generator = fixtures::generator("NextTokenGenerator");
        let notes = fixtures::notes();
        let source = serde_json::json!({ "filename": "chopin.mid" });

        let request = GenerationRequest {
            checkpoint: &checkpoint,
            model_name: "baseline",
            generator: &generator,
            generated_notes: &notes,
            prompt_notes: &notes,
            source_notes: &notes,
            source: &source,
        };
        assert!(store.insert_generation(&request).is_err());

        assert_eq!(store.count_rows(&GENERATORS).unwrap(), 1);
        assert_eq!(store.count_rows(&MODELS).unwrap(), 0);
        assert_eq!(store.count_rows(&SOURCES).unwrap(), 0);
        assert_eq!(store.count_rows(&GENERATIONS).unwrap(), 0);
    }
}
