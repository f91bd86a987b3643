use std::path::Path;

use anyhow::Context;
use owo_colors::OwoColorize;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{emit_success, OutputMode};
use pianodb::config::{self, PianodbConfig};
use pianodb::storage::{schema, InsertMode, Record, VALIDATION_SAMPLE_SIZE};
use pianodb::ui::{self, Icons};
use pianodb::{
    Checkpoint, GenerationRequest, GeneratorSpec, NoteTable, PredictionFilters, SqliteStore,
};

/// A generation as written by the sampling scripts
#[derive(Debug, Deserialize)]
pub struct RecordDocument {
    pub checkpoint: Checkpoint,
    pub model_name: String,
    pub generator: GeneratorSpec,
    pub source: Value,
    pub source_notes: NoteTable,
    pub prompt_notes: NoteTable,
    pub generated_notes: NoteTable,
}

fn read_json(path: &Path) -> anyhow::Result<Value> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
}

fn print_table(table: String, empty: &str) {
    if table.is_empty() {
        println!("{}", ui::muted(empty));
    } else {
        println!("{}", table);
    }
}

pub fn run_init(
    output_mode: OutputMode,
    config_path: &Path,
    db_path: &Path,
    force: bool,
) -> anyhow::Result<()> {
    let config = PianodbConfig {
        database: Some(db_path.display().to_string()),
    };
    config::write_config(config_path, &config, force)?;
    config::ensure_db_dir(db_path)?;
    let store = SqliteStore::open(db_path)?;
    let stats = store.stats()?;

    if output_mode.is_human() {
        ui::header("pianodb initialized");
        ui::status(Icons::FILE, "Config", &config_path.display().to_string());
        ui::status(Icons::DATABASE, "Database", &db_path.display().to_string());
        if !pianodb::output::is_quiet() {
            println!();
            let hint = "Next: pianodb register-model --checkpoint ckpt.json --name <model>";
            println!("  {}", ui::dim(hint));
        }
    } else {
        emit_success(
            output_mode,
            "init",
            json!({
                "config": config_path.display().to_string(),
                "database": db_path.display().to_string(),
                "stats": stats,
            }),
        )?;
    }
    Ok(())
}

pub fn run_stats(
    output_mode: OutputMode,
    store: &SqliteStore,
    db_path: &Path,
) -> anyhow::Result<()> {
    let stats = store.stats()?;
    if output_mode.is_human() {
        ui::status(Icons::STATS, "Statistics", &db_path.display().to_string());
        let rows = [
            ("Models", stats.models.to_string()),
            ("Generators", stats.generators.to_string()),
            ("Sources", stats.sources.to_string()),
            ("Generations", stats.generations.to_string()),
        ];
        let rows: Vec<(&str, &str)> = rows.iter().map(|(l, v)| (*l, v.as_str())).collect();
        println!("{}", ui::stats_table(&rows));
    } else {
        emit_success(output_mode, "stats", serde_json::to_value(stats)?)?;
    }
    Ok(())
}

pub fn run_models(
    output_mode: OutputMode,
    store: &SqliteStore,
    with_generations: bool,
    name: Option<&str>,
) -> anyhow::Result<()> {
    let models = match (name, with_generations) {
        (Some(name), false) => store.get_models(name)?,
        (Some(name), true) => store
            .select_models_with_generations()?
            .into_iter()
            .filter(|m| m.name == name)
            .collect(),
        (None, true) => store.select_models_with_generations()?,
        (None, false) => store.get_all_models()?,
    };

    if output_mode.is_human() {
        print_table(ui::models_table(&models), "No models found.");
    } else {
        emit_success(output_mode, "models", serde_json::to_value(&models)?)?;
    }
    Ok(())
}

pub fn run_generators(output_mode: OutputMode, store: &SqliteStore) -> anyhow::Result<()> {
    let generators = store.get_all_generators()?;
    if output_mode.is_human() {
        print_table(ui::generators_table(&generators), "No generators registered.");
    } else {
        emit_success(output_mode, "generators", serde_json::to_value(&generators)?)?;
    }
    Ok(())
}

pub fn run_sources(
    output_mode: OutputMode,
    store: &SqliteStore,
    validation: bool,
) -> anyhow::Result<()> {
    let sources = if validation {
        store.get_validation_sources()?
    } else {
        store.get_all_sources()?
    };

    if output_mode.is_human() {
        if validation {
            ui::info("Validation sample", &format!("first {} sources", VALIDATION_SAMPLE_SIZE));
        }
        print_table(ui::sources_table(&sources), "No sources recorded.");
    } else {
        emit_success(output_mode, "sources", serde_json::to_value(&sources)?)?;
    }
    Ok(())
}

pub fn run_model_id(
    output_mode: OutputMode,
    store: &SqliteStore,
    name: &str,
) -> anyhow::Result<()> {
    let model_id = store.get_model_id(name)?;
    if output_mode.is_human() {
        match model_id {
            Some(id) => ui::info(name, &id.to_string()),
            None => ui::warn(&format!("No model named {}", name)),
        }
    } else {
        emit_success(output_mode, "model-id", json!({ "name": name, "model_id": model_id }))?;
    }
    Ok(())
}

pub fn run_model_info(
    output_mode: OutputMode,
    store: &SqliteStore,
    model_id: i64,
) -> anyhow::Result<()> {
    let generators = store.get_model_generator_names(model_id)?;
    let tasks = store.get_model_tasks(model_id)?;

    if output_mode.is_human() {
        ui::status(Icons::BRAIN, "Model", &model_id.to_string());
        ui::section("Generators");
        for name in &generators {
            println!("  {}", name);
        }
        ui::section("Tasks");
        for task in &tasks {
            println!("  {}", task);
        }
        if generators.is_empty() {
            println!("{}", ui::muted("No generations recorded for this model."));
        }
    } else {
        emit_success(
            output_mode,
            "model-info",
            json!({ "model_id": model_id, "generators": generators, "tasks": tasks }),
        )?;
    }
    Ok(())
}

pub fn run_unique(
    output_mode: OutputMode,
    store: &SqliteStore,
    table: &str,
    column: &str,
) -> anyhow::Result<()> {
    let values = store.get_unique_values(column, table)?;
    if output_mode.is_human() {
        ui::status(
            Icons::MAG,
            &format!("{}.{}", table, column),
            &format!("{} distinct", values.len()),
        );
        for value in &values {
            match value {
                Value::String(s) => println!("  {}", s),
                other => println!("  {}", other),
            }
        }
    } else {
        emit_success(output_mode, "unique", Value::Array(values))?;
    }
    Ok(())
}

/// Parse `column=value`; the value is read as JSON when it parses, else as a string
pub fn parse_filter(raw: &str) -> anyhow::Result<(String, Value)> {
    let (column, value) = raw
        .split_once('=')
        .with_context(|| format!("filter {:?} is not of the form column=value", raw))?;
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((column.trim().to_string(), value))
}

pub fn run_predictions(
    output_mode: OutputMode,
    store: &SqliteStore,
    model: &[String],
    generator: &[String],
    source: &[String],
) -> anyhow::Result<()> {
    let mut filters = PredictionFilters::new();
    for raw in model {
        let (column, value) = parse_filter(raw)?;
        filters = filters.model(&column, value);
    }
    for raw in generator {
        let (column, value) = parse_filter(raw)?;
        filters = filters.generator(&column, value);
    }
    for raw in source {
        let (column, value) = parse_filter(raw)?;
        filters = filters.source(&column, value);
    }

    let predictions = store.get_model_predictions(&filters)?;
    if output_mode.is_human() {
        print_table(ui::predictions_table(&predictions), "No predictions match.");
    } else {
        emit_success(output_mode, "predictions", serde_json::to_value(&predictions)?)?;
    }
    Ok(())
}

pub fn run_register_model(
    output_mode: OutputMode,
    store: &SqliteStore,
    checkpoint_path: &Path,
    name: &str,
) -> anyhow::Result<()> {
    let checkpoint = Checkpoint::from_path(checkpoint_path)?;
    let (registration, model_id) = store.register_model_from_checkpoint(&checkpoint, name)?;

    if output_mode.is_human() {
        ui::record_new("model", model_id);
        ui::summary_row("Name", &registration.name);
        if let Some(params) = registration.milion_parameters {
            ui::summary_row("Parameters", &format!("{}M", params));
        }
        if let Some(base) = registration.base_model_id {
            ui::summary_row("Base model", &base.to_string());
        }
        ui::summary_row("Task", &registration.training_task);
    } else {
        emit_success(
            output_mode,
            "register-model",
            json!({ "model_id": model_id, "registration": registration }),
        )?;
    }
    Ok(())
}

pub fn run_record(output_mode: OutputMode, store: &SqliteStore, file: &Path) -> anyhow::Result<()> {
    let document: RecordDocument = serde_json::from_value(read_json(file)?)
        .with_context(|| format!("{} is not a generation document", file.display()))?;

    store.insert_generation(&GenerationRequest {
        checkpoint: &document.checkpoint,
        model_name: &document.model_name,
        generator: &document.generator,
        generated_notes: &document.generated_notes,
        prompt_notes: &document.prompt_notes,
        source_notes: &document.source_notes,
        source: &document.source,
    })?;

    if output_mode.is_human() {
        ui::success(&format!(
            "Recorded {} notes from {} for {}",
            document.generated_notes.len(),
            document.generator.generator_name,
            document.model_name.bold()
        ));
    } else {
        emit_success(
            output_mode,
            "record",
            json!({
                "model_name": document.model_name,
                "generator": document.generator.generator_name,
                "generated_notes": document.generated_notes.len(),
            }),
        )?;
    }
    Ok(())
}

pub fn run_import(
    output_mode: OutputMode,
    store: &SqliteStore,
    table: &str,
    file: &Path,
    replace: bool,
) -> anyhow::Result<()> {
    let schema = schema::table(table)?;
    let records: Vec<Record> = match read_json(file)? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => Ok(map),
                other => anyhow::bail!("expected an object per record, got {}", other),
            })
            .collect::<anyhow::Result<_>>()?,
        _ => anyhow::bail!("{} must hold a JSON array of records", file.display()),
    };

    let mode = if replace { InsertMode::Replace } else { InsertMode::Append };
    let ids = store.insert_records(schema, &records, mode)?;

    if output_mode.is_human() {
        ui::success(&format!("Imported {} rows into {}", ids.len(), table));
    } else {
        emit_success(
            output_mode,
            "import",
            json!({ "table": table, "ids": ids, "replace": replace }),
        )?;
    }
    Ok(())
}

pub fn run_purge(output_mode: OutputMode, store: &SqliteStore, name: &str) -> anyhow::Result<()> {
    let stats = store.purge_model(name)?;
    if output_mode.is_human() {
        if stats.models == 0 {
            ui::warn(&format!("No model named {}", name));
        } else {
            ui::record_deleted("models", stats.models);
            ui::record_deleted("generations", stats.generations);
        }
    } else {
        emit_success(output_mode, "purge", serde_json::to_value(stats)?)?;
    }
    Ok(())
}

pub fn run_prune(output_mode: OutputMode, store: &SqliteStore) -> anyhow::Result<()> {
    let removed = store.remove_models_without_generations()?;
    if output_mode.is_human() {
        ui::record_deleted("models without generations", removed);
    } else {
        emit_success(output_mode, "prune", json!({ "removed": removed }))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filter_reads_json_values() {
        assert_eq!(
            parse_filter("total_tokens=1000").unwrap(),
            ("total_tokens".to_string(), json!(1000))
        );
        assert_eq!(parse_filter("name=m1").unwrap(), ("name".to_string(), json!("m1")));
        assert_eq!(parse_filter("wandb_link=null").unwrap().1, Value::Null);
        assert_eq!(parse_filter("name=a=b").unwrap().1, json!("a=b"));
        assert!(parse_filter("name").is_err());
    }

    #[test]
    fn test_record_document_deserializes() {
        let document: RecordDocument = serde_json::from_value(json!({
            "checkpoint": {
                "config": { "init_from": "scratch", "task": "next_token_prediction" },
                "best_val_loss": 1.2,
                "iter_num": 10,
            },
            "model_name": "midi-gpt2-302M-2024-01-02-10-30",
            "generator": {
                "generator_name": "NextTokenGenerator",
                "task": "next_token_prediction",
            },
            "source": { "filename": "chopin.mid" },
            "source_notes": [{ "pitch": 60, "velocity": 80, "start": 0.0, "end": 0.5 }],
            "prompt_notes": [],
            "generated_notes": {
                "pitch": { "0": 62 },
                "velocity": { "0": 70 },
                "start": { "0": 0.5 },
                "end": { "0": 1.0 },
            },
        }))
        .unwrap();

        assert_eq!(document.generator.generator_parameters, json!({}));
        assert_eq!(document.source_notes.len(), 1);
        assert!(document.prompt_notes.is_empty());
        assert_eq!(document.generated_notes.notes()[0].pitch, 62);
    }
}
