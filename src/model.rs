//! Models: trained checkpoints with their metrics and configuration

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// `init_from` value of a model trained from scratch
pub const SCRATCH: &str = "scratch";

/// Training configuration embedded in a checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub init_from: String,
    pub task: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl CheckpointConfig {
    /// Name of the model this one was fine-tuned from, if any
    pub fn base_model_name(&self) -> Option<&str> {
        if self.init_from == SCRATCH {
            None
        } else {
            Some(&self.init_from)
        }
    }
}

/// Checkpoint metadata as written by the training loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub config: CheckpointConfig,
    pub best_val_loss: f64,
    pub iter_num: i64,
    pub wandb: Option<String>,
    pub total_tokens: Option<i64>,
    pub train_loss: Option<f64>,
}

impl Checkpoint {
    pub fn from_json(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| Error::Checkpoint(e.to_string()))
    }

    /// Read checkpoint metadata saved as JSON next to the weights
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&contents)
            .map_err(|e| Error::Checkpoint(format!("{}: {}", path.display(), e)))?;
        Self::from_json(value)
    }
}

/// Input of the model registrar
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelRegistration {
    pub name: String,
    pub base_model_id: Option<i64>,
    pub milion_parameters: Option<i64>,
    pub best_val_loss: f64,
    pub train_loss: Option<f64>,
    pub iter_num: i64,
    pub total_tokens: Option<i64>,
    pub configs: Value,
    pub training_task: String,
    pub wandb_link: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

impl ModelRegistration {
    /// Build a registration from checkpoint metadata.
    ///
    /// The parameter count comes from the legacy model name convention, so a
    /// name that does not follow it is rejected. `base_model_id` is left
    /// unset; the registrar resolves it.
    pub fn from_checkpoint(checkpoint: &Checkpoint, model_name: &str) -> Result<Self> {
        Ok(Self {
            name: model_name.to_string(),
            base_model_id: None,
            milion_parameters: Some(parse_milion_parameters(model_name)?),
            best_val_loss: checkpoint.best_val_loss,
            train_loss: checkpoint.train_loss,
            iter_num: checkpoint.iter_num,
            total_tokens: checkpoint.total_tokens,
            configs: serde_json::to_value(&checkpoint.config)?,
            training_task: checkpoint.config.task.clone(),
            wandb_link: checkpoint.wandb.clone(),
            created_at: None,
        })
    }

    /// Creation time: explicit value, then the date embedded in the name
    pub fn resolved_created_at(&self) -> Option<NaiveDateTime> {
        self.created_at.or_else(|| parse_name_timestamp(&self.name))
    }
}

/// Model row as stored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Model {
    pub model_id: i64,
    pub base_model_id: Option<i64>,
    pub name: String,
    pub milion_parameters: Option<i64>,
    pub best_val_loss: Option<f64>,
    pub train_loss: Option<f64>,
    pub iter_num: Option<i64>,
    pub total_tokens: Option<i64>,
    pub configs: Option<Value>,
    pub training_task: Option<String>,
    pub wandb_link: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

// ========== Legacy name parsing ==========
//
// Older runs only carry their size and start time in the model name, e.g.
// `midi-gpt2-302M-pretraining-2024-04-20-14-30`. Best effort only.

/// Parameter count in millions, from the third `-` delimited name segment
pub fn parse_milion_parameters(model_name: &str) -> Result<i64> {
    let segment = model_name
        .split('-')
        .nth(2)
        .ok_or_else(|| Error::ModelName(model_name.to_string()))?;

    // Drop the unit suffix ("302M" -> "302")
    let mut chars = segment.chars();
    chars.next_back();

    chars
        .as_str()
        .parse()
        .map_err(|_| Error::ModelName(model_name.to_string()))
}

/// Start time embedded in the name as `YYYY-MM-DD-HH-MM`
pub fn parse_name_timestamp(model_name: &str) -> Option<NaiveDateTime> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"(\d{4}-\d{2}-\d{2}-\d{2}-\d{2})").expect("timestamp pattern is valid")
    });

    let matched = pattern.captures(model_name)?.get(1)?;
    NaiveDateTime::parse_from_str(matched.as_str(), "%Y-%m-%d-%H-%M").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use serde_json::json;

    fn checkpoint_json() -> Value {
        json!({
            "config": {
                "init_from": "scratch",
                "task": "next_token_prediction",
                "n_layer": 12,
                "batch_size": 32,
            },
            "best_val_loss": 1.25,
            "iter_num": 30000,
            "total_tokens": 1_000_000,
        })
    }

    #[test]
    fn test_parse_milion_parameters() {
        let name = "midi-gpt2-302M-pretraining-2024-04-20-14-30";
        assert_eq!(parse_milion_parameters(name).unwrap(), 302);
        assert_eq!(parse_milion_parameters("piano-gpt-10M").unwrap(), 10);
    }

    #[test]
    fn test_parse_milion_parameters_rejects_other_names() {
        assert!(parse_milion_parameters("baseline").is_err());
        assert!(parse_milion_parameters("midi-gpt2-large-run").is_err());
    }

    #[test]
    fn test_parse_name_timestamp() {
        let ts = parse_name_timestamp("midi-gpt2-302M-pretraining-2024-04-20-14-30").unwrap();
        assert_eq!((ts.year(), ts.month(), ts.day()), (2024, 4, 20));
        assert_eq!((ts.hour(), ts.minute()), (14, 30));

        assert!(parse_name_timestamp("midi-gpt2-302M").is_none());
    }

    #[test]
    fn test_checkpoint_optional_fields() {
        let checkpoint = Checkpoint::from_json(checkpoint_json()).unwrap();
        assert_eq!(checkpoint.total_tokens, Some(1_000_000));
        assert!(checkpoint.wandb.is_none());
        assert!(checkpoint.train_loss.is_none());
        assert!(checkpoint.config.base_model_name().is_none());
    }

    #[test]
    fn test_checkpoint_missing_config_is_an_error() {
        let result = Checkpoint::from_json(json!({ "best_val_loss": 1.0, "iter_num": 1 }));
        assert!(matches!(result, Err(Error::Checkpoint(_))));
    }

    #[test]
    fn test_registration_keeps_full_config() {
        let checkpoint = Checkpoint::from_json(checkpoint_json()).unwrap();
        let registration =
            ModelRegistration::from_checkpoint(&checkpoint, "midi-gpt2-302M-run").unwrap();

        assert_eq!(registration.milion_parameters, Some(302));
        assert_eq!(registration.training_task, "next_token_prediction");
        assert_eq!(registration.configs["n_layer"], json!(12));
        assert_eq!(registration.configs["init_from"], json!("scratch"));
    }

    #[test]
    fn test_explicit_created_at_wins_over_name() {
        let checkpoint = Checkpoint::from_json(checkpoint_json()).unwrap();
        let name = "midi-gpt2-302M-2024-04-20-14-30";
        let mut registration = ModelRegistration::from_checkpoint(&checkpoint, name).unwrap();
        let explicit =
            NaiveDateTime::parse_from_str("2023-01-02 03:04:05", "%Y-%m-%d %H:%M:%S").unwrap();
        registration.created_at = Some(explicit);

        assert_eq!(registration.resolved_created_at(), Some(explicit));
    }

    #[test]
    fn test_checkpoint_from_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ckpt.json");
        std::fs::write(&path, checkpoint_json().to_string()).unwrap();
        assert_eq!(Checkpoint::from_path(&path).unwrap().iter_num, 30000);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(Checkpoint::from_path(&path), Err(Error::Checkpoint(_))));
        assert!(matches!(
            Checkpoint::from_path(&dir.path().join("missing.json")),
            Err(Error::Io(_))
        ));
    }
}
