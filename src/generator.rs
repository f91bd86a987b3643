//! Generators: named generation strategies with parameters and a task label

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Capability exposed by anything that generates MIDI from a prompt.
///
/// The registry identifies a generator by its name, its task and the
/// canonical serialization of its parameters.
pub trait MidiGenerator {
    /// Identifying label of the implementation (usually its type name)
    fn name(&self) -> &str;

    /// Task this generator performs, e.g. `next_token_prediction`
    fn task(&self) -> &str;

    /// Parameter mapping
    fn parameters(&self) -> Value;
}

/// Plain generator descriptor, used when the generator object itself is not
/// available (imports, CLI).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorSpec {
    pub generator_name: String,
    pub task: String,
    #[serde(default = "empty_parameters")]
    pub generator_parameters: Value,
}

fn empty_parameters() -> Value {
    Value::Object(Default::default())
}

impl GeneratorSpec {
    pub fn new(name: impl Into<String>, task: impl Into<String>, parameters: Value) -> Self {
        Self {
            generator_name: name.into(),
            task: task.into(),
            generator_parameters: parameters,
        }
    }

    /// Describe a generator object
    pub fn describe(generator: &dyn MidiGenerator) -> Self {
        Self::new(generator.name(), generator.task(), generator.parameters())
    }

    /// Canonical parameter serialization used for identity comparison
    pub fn canonical_parameters(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.generator_parameters)
    }
}

impl MidiGenerator for GeneratorSpec {
    fn name(&self) -> &str {
        &self.generator_name
    }

    fn task(&self) -> &str {
        &self.task
    }

    fn parameters(&self) -> Value {
        self.generator_parameters.clone()
    }
}

/// Generator row as stored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Generator {
    pub generator_id: i64,
    pub generator_name: String,
    pub generator_parameters: Value,
    pub task: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct NextTokenGenerator {
        temperature: f64,
    }

    impl MidiGenerator for NextTokenGenerator {
        fn name(&self) -> &str {
            "NextTokenGenerator"
        }

        fn task(&self) -> &str {
            "next_token_prediction"
        }

        fn parameters(&self) -> Value {
            json!({ "temperature": self.temperature, "max_new_tokens": 2048 })
        }
    }

    #[test]
    fn test_describe_generator_object() {
        let spec = GeneratorSpec::describe(&NextTokenGenerator { temperature: 1.0 });
        assert_eq!(spec.generator_name, "NextTokenGenerator");
        assert_eq!(spec.task, "next_token_prediction");
        assert_eq!(spec.generator_parameters["max_new_tokens"], json!(2048));
    }

    #[test]
    fn test_canonical_parameters_ignore_key_order() {
        let a = GeneratorSpec::new("G", "t", serde_json::from_str(r#"{"b": 1, "a": 2}"#).unwrap());
        let b = GeneratorSpec::new("G", "t", serde_json::from_str(r#"{"a": 2, "b": 1}"#).unwrap());
        assert_eq!(a.canonical_parameters().unwrap(), b.canonical_parameters().unwrap());
    }
}
