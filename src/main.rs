//! pianodb CLI - inspect and maintain the piano generation metadata store

mod commands;

use clap::{Parser, Subcommand};
use pianodb::config;
use pianodb::storage::SqliteStore;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pianodb")]
#[command(version)]
#[command(about = "Metadata store for piano generation experiments")]
#[command(long_about = r#"
pianodb keeps track of trained models, generators, source pieces and the
generations produced from them.

Example usage:
  pianodb init
  pianodb register-model --checkpoint ckpt.json --name midi-gpt2-302M-2024-01-02-10-30
  pianodb record --file generation.json
  pianodb predictions --model total_tokens=2000000 --generator task=next_token_prediction
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Path to the config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the database file (overrides the config file)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the config file and create the database
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Show row counts per table
    Stats,

    /// List models
    Models {
        /// Only models that have at least one generation
        #[arg(long)]
        with_generations: bool,

        /// Only models with this name
        #[arg(long)]
        name: Option<String>,
    },

    /// List generators
    Generators,

    /// List sources
    Sources {
        /// Only the validation sample
        #[arg(long)]
        validation: bool,
    },

    /// Print the identifier of a model
    ModelId {
        name: String,
    },

    /// Generators and tasks used by a model's generations
    ModelInfo {
        model_id: i64,
    },

    /// Distinct values of a column
    Unique {
        table: String,
        column: String,
    },

    /// Generations joined with their model, generator and source
    Predictions {
        /// Model filter, column=value (repeatable)
        #[arg(long)]
        model: Vec<String>,

        /// Generator filter, column=value (repeatable)
        #[arg(long)]
        generator: Vec<String>,

        /// Source filter, column=value (repeatable)
        #[arg(long)]
        source: Vec<String>,
    },

    /// Register a model from a checkpoint metadata file
    RegisterModel {
        /// Checkpoint metadata (JSON)
        #[arg(long)]
        checkpoint: PathBuf,

        /// Model name
        #[arg(long)]
        name: String,
    },

    /// Record a generation from a JSON document
    Record {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Bulk insert a JSON array of records into a table
    Import {
        #[arg(short, long)]
        table: String,

        #[arg(short, long)]
        file: PathBuf,

        /// Delete the existing rows first
        #[arg(long)]
        replace: bool,
    },

    /// Delete a model and all its generations
    Purge {
        name: String,
    },

    /// Delete models without generations
    Prune,
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Init { .. } => "init",
            Commands::Stats => "stats",
            Commands::Models { .. } => "models",
            Commands::Generators => "generators",
            Commands::Sources { .. } => "sources",
            Commands::ModelId { .. } => "model-id",
            Commands::ModelInfo { .. } => "model-info",
            Commands::Unique { .. } => "unique",
            Commands::Predictions { .. } => "predictions",
            Commands::RegisterModel { .. } => "register-model",
            Commands::Record { .. } => "record",
            Commands::Import { .. } => "import",
            Commands::Purge { .. } => "purge",
            Commands::Prune => "prune",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    pub fn is_human(self) -> bool {
        self == OutputMode::Human
    }
}

pub fn emit_success(
    output_mode: OutputMode,
    command: &str,
    data: serde_json::Value,
) -> anyhow::Result<()> {
    if output_mode == OutputMode::Json {
        let envelope = serde_json::json!({ "ok": true, "command": command, "data": data });
        println!("{}", serde_json::to_string_pretty(&envelope)?);
    }
    Ok(())
}

fn emit_error(output_mode: OutputMode, command: &str, err: &anyhow::Error) {
    match output_mode {
        OutputMode::Json => {
            let envelope = serde_json::json!({
                "ok": false,
                "command": command,
                "error": format!("{:#}", err),
            });
            println!("{}", envelope);
        }
        OutputMode::Human => pianodb::ui::error(&format!("{:#}", err)),
    }
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for command output
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let output_mode = if cli.json { OutputMode::Json } else { OutputMode::Human };
    let command = cli.command.name();

    if let Err(err) = run(cli, output_mode) {
        emit_error(output_mode, command, &err);
        std::process::exit(1);
    }
}

fn run(cli: Cli, output_mode: OutputMode) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
    let loaded = config::load_config(Some(&config_path))?;
    let cwd = std::env::current_dir()?;
    let db_path = config::resolve_database_path(cli.database.as_deref(), loaded.as_ref(), &cwd);
    tracing::debug!("Using database {}", db_path.display());

    let store = match cli.command {
        Commands::Init { force } => {
            return commands::run_init(output_mode, &config_path, &db_path, force);
        }
        _ => open_store(&db_path)?,
    };

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Stats => commands::run_stats(output_mode, &store, &db_path),
        Commands::Models { with_generations, name } => {
            commands::run_models(output_mode, &store, with_generations, name.as_deref())
        }
        Commands::Generators => commands::run_generators(output_mode, &store),
        Commands::Sources { validation } => commands::run_sources(output_mode, &store, validation),
        Commands::ModelId { name } => commands::run_model_id(output_mode, &store, &name),
        Commands::ModelInfo { model_id } => commands::run_model_info(output_mode, &store, model_id),
        Commands::Unique { table, column } => {
            commands::run_unique(output_mode, &store, &table, &column)
        }
        Commands::Predictions { model, generator, source } => {
            commands::run_predictions(output_mode, &store, &model, &generator, &source)
        }
        Commands::RegisterModel { checkpoint, name } => {
            commands::run_register_model(output_mode, &store, &checkpoint, &name)
        }
        Commands::Record { file } => commands::run_record(output_mode, &store, &file),
        Commands::Import { table, file, replace } => {
            commands::run_import(output_mode, &store, &table, &file, replace)
        }
        Commands::Purge { name } => commands::run_purge(output_mode, &store, &name),
        Commands::Prune => commands::run_prune(output_mode, &store),
    }
}

fn open_store(db_path: &Path) -> anyhow::Result<SqliteStore> {
    config::ensure_db_dir(db_path)?;
    Ok(SqliteStore::open(db_path)?)
}
