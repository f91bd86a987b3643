use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use crate::{Generator, Model, Prediction, Source};

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        render(&self.rows)
    }
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn stats_table(stats: &[(&str, &str)]) -> String {
    let mut builder = TableBuilder::new();
    for (label, value) in stats {
        builder.add_row(label, value);
    }
    builder.build()
}

fn render<T: Tabled>(rows: &[T]) -> String {
    if rows.is_empty() {
        return String::new();
    }
    Table::new(rows).with(Style::rounded()).to_string()
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn note_count(table: crate::Result<crate::NoteTable>) -> String {
    table.map(|t| t.len().to_string()).unwrap_or_else(|_| "?".to_string())
}

/// Compact single-line JSON, cut to `max` characters
fn compact_json(value: &Value, max: usize) -> String {
    let text = value.to_string();
    if text.chars().count() <= max {
        return text;
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

#[derive(Tabled)]
struct ModelRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Base")]
    base: String,
    #[tabled(rename = "Params (M)")]
    params: String,
    #[tabled(rename = "Val loss")]
    val_loss: String,
    #[tabled(rename = "Tokens")]
    tokens: String,
    #[tabled(rename = "Task")]
    task: String,
    #[tabled(rename = "Created")]
    created: String,
}

pub fn models_table(models: &[Model]) -> String {
    let rows: Vec<ModelRow> = models
        .iter()
        .map(|m| ModelRow {
            id: m.model_id,
            name: m.name.clone(),
            base: or_dash(m.base_model_id),
            params: or_dash(m.milion_parameters),
            val_loss: or_dash(m.best_val_loss.map(|l| format!("{:.4}", l))),
            tokens: or_dash(m.total_tokens),
            task: or_dash(m.training_task.as_deref()),
            created: or_dash(m.created_at),
        })
        .collect();
    render(&rows)
}

#[derive(Tabled)]
struct GeneratorRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Task")]
    task: String,
    #[tabled(rename = "Parameters")]
    parameters: String,
}

pub fn generators_table(generators: &[Generator]) -> String {
    let rows: Vec<GeneratorRow> = generators
        .iter()
        .map(|g| GeneratorRow {
            id: g.generator_id,
            name: g.generator_name.clone(),
            task: g.task.clone(),
            parameters: compact_json(&g.generator_parameters, 60),
        })
        .collect();
    render(&rows)
}

#[derive(Tabled)]
struct SourceRow {
    #[tabled(rename = "ID")]
    id: i64,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Notes")]
    notes: String,
}

pub fn sources_table(sources: &[Source]) -> String {
    let rows: Vec<SourceRow> = sources
        .iter()
        .map(|s| SourceRow {
            id: s.source_id,
            source: compact_json(&s.source, 60),
            notes: note_count(s.note_table()),
        })
        .collect();
    render(&rows)
}

#[derive(Tabled)]
struct PredictionRow {
    #[tabled(rename = "Generation")]
    id: i64,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Generator")]
    generator: String,
    #[tabled(rename = "Source")]
    source: String,
    #[tabled(rename = "Prompt notes")]
    prompt_notes: String,
    #[tabled(rename = "Generated notes")]
    generated_notes: String,
}

pub fn predictions_table(predictions: &[Prediction]) -> String {
    let rows: Vec<PredictionRow> = predictions
        .iter()
        .map(|p| PredictionRow {
            id: p.generation.generation_id,
            model: p.model_name.clone(),
            generator: p.generator.generator_name.clone(),
            source: compact_json(&p.source, 48),
            prompt_notes: note_count(p.generation.prompt_note_table()),
            generated_notes: note_count(p.generation.generated_note_table()),
        })
        .collect();
    render(&rows)
}
