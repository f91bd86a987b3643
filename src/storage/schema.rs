//! Database schema definitions

use crate::{Error, Result};

/// Storage format of timestamp columns
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const MODELS_TABLE: &str = "models";
pub const GENERATORS_TABLE: &str = "generators";
pub const SOURCES_TABLE: &str = "sources";
pub const GENERATIONS_TABLE: &str = "generations";

/// Semantic type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    /// Bounded string
    String(usize),
    Float,
    /// Structured value, stored as serialized JSON text
    Json,
    Text,
    Timestamp,
}

/// Column-name to semantic-type mapping of one table
#[derive(Debug)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [(&'static str, ColumnType)],
}

impl TableSchema {
    pub fn column_type(&self, column: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, ty)| *ty)
    }

    /// Check a dynamic column identifier against this table
    pub fn check_column(&self, column: &str) -> Result<ColumnType> {
        self.column_type(column).ok_or_else(|| Error::UnknownColumn {
            table: self.name.to_string(),
            column: column.to_string(),
        })
    }
}

pub static MODELS: TableSchema = TableSchema {
    name: MODELS_TABLE,
    columns: &[
        ("model_id", ColumnType::Integer),
        ("base_model_id", ColumnType::Integer),
        ("name", ColumnType::String(255)),
        ("milion_parameters", ColumnType::Integer),
        ("best_val_loss", ColumnType::Float),
        ("train_loss", ColumnType::Float),
        ("iter_num", ColumnType::Integer),
        ("total_tokens", ColumnType::Integer),
        ("configs", ColumnType::Json),
        ("training_task", ColumnType::String(255)),
        ("wandb_link", ColumnType::Text),
        ("created_at", ColumnType::Timestamp),
    ],
};

pub static GENERATORS: TableSchema = TableSchema {
    name: GENERATORS_TABLE,
    columns: &[
        ("generator_id", ColumnType::Integer),
        ("generator_name", ColumnType::String(255)),
        ("generator_parameters", ColumnType::Json),
        ("task", ColumnType::String(255)),
    ],
};

pub static SOURCES: TableSchema = TableSchema {
    name: SOURCES_TABLE,
    columns: &[
        ("source_id", ColumnType::Integer),
        ("source", ColumnType::Json),
        ("notes", ColumnType::Json),
    ],
};

pub static GENERATIONS: TableSchema = TableSchema {
    name: GENERATIONS_TABLE,
    columns: &[
        ("generation_id", ColumnType::Integer),
        ("generator_id", ColumnType::Integer),
        ("model_id", ColumnType::Integer),
        ("source_id", ColumnType::Integer),
        ("prompt_notes", ColumnType::Json),
        ("generated_notes", ColumnType::Json),
    ],
};

pub static ALL_TABLES: [&TableSchema; 4] = [&MODELS, &GENERATORS, &SOURCES, &GENERATIONS];

/// Look up a table by name
pub fn table(name: &str) -> Result<&'static TableSchema> {
    ALL_TABLES
        .iter()
        .copied()
        .find(|t| t.name == name)
        .ok_or_else(|| Error::UnknownTable(name.to_string()))
}

/// SQL to create the models table
pub const CREATE_MODELS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS models (
    model_id INTEGER PRIMARY KEY AUTOINCREMENT,
    base_model_id INTEGER REFERENCES models(model_id) ON DELETE SET NULL,
    name VARCHAR(255) NOT NULL,
    milion_parameters INTEGER,
    best_val_loss REAL,
    train_loss REAL,
    iter_num INTEGER,
    total_tokens INTEGER,
    configs TEXT,
    training_task VARCHAR(255),
    wandb_link TEXT,
    created_at TEXT
)
"#;

/// SQL to create the generators table
pub const CREATE_GENERATORS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS generators (
    generator_id INTEGER PRIMARY KEY AUTOINCREMENT,
    generator_name VARCHAR(255) NOT NULL,
    generator_parameters TEXT NOT NULL,
    task VARCHAR(255) NOT NULL,
    UNIQUE(generator_name, generator_parameters, task)
)
"#;

/// SQL to create the sources table
pub const CREATE_SOURCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sources (
    source_id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL UNIQUE,
    notes TEXT
)
"#;

/// SQL to create the generations table
pub const CREATE_GENERATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS generations (
    generation_id INTEGER PRIMARY KEY AUTOINCREMENT,
    generator_id INTEGER NOT NULL REFERENCES generators(generator_id),
    model_id INTEGER NOT NULL REFERENCES models(model_id),
    source_id INTEGER NOT NULL REFERENCES sources(source_id),
    prompt_notes TEXT,
    generated_notes TEXT
)
"#;

/// SQL to create indexes
///
/// Model identity is (name, total_tokens), with NULL tokens as a value of
/// its own. A plain UNIQUE never sees two NULLs collide, hence one partial
/// index per case.
pub const CREATE_INDEXES: &[&str] = &[
    "DROP INDEX IF EXISTS idx_models_identity",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_models_identity_tokens
        ON models(name, total_tokens) WHERE total_tokens IS NOT NULL",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_models_identity_no_tokens
        ON models(name) WHERE total_tokens IS NULL",
    "CREATE INDEX IF NOT EXISTS idx_models_name ON models(name)",
    "CREATE INDEX IF NOT EXISTS idx_generations_model ON generations(model_id)",
    "CREATE INDEX IF NOT EXISTS idx_generations_generator ON generations(generator_id)",
    "CREATE INDEX IF NOT EXISTS idx_generations_source ON generations(source_id)",
];

/// All schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![
        CREATE_MODELS_TABLE,
        CREATE_GENERATORS_TABLE,
        CREATE_SOURCES_TABLE,
        CREATE_GENERATIONS_TABLE,
    ];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}
