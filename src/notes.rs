//! Note tables
//!
//! A note table is the tabular form of a MIDI fragment: one row per note with
//! pitch, velocity and start/end times in seconds. It is stored column-oriented,
//! keyed by row index:
//!
//! ```json
//! {"pitch": {"0": 60, "1": 64}, "velocity": {"0": 80, "1": 72},
//!  "start": {"0": 0.0, "1": 0.5}, "end": {"0": 0.5, "1": 1.0}}
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::{Error, Result};

const COLUMNS: [&str; 4] = ["pitch", "velocity", "start", "end"];

/// A single MIDI note
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub pitch: u8,
    pub velocity: u8,
    pub start: f64,
    pub end: f64,
}

impl Note {
    pub fn new(pitch: u8, velocity: u8, start: f64, end: f64) -> Self {
        Self { pitch, velocity, start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Ordered collection of notes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteTable {
    notes: Vec<Note>,
}

impl NoteTable {
    pub fn new(notes: Vec<Note>) -> Self {
        Self { notes }
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Encode as the column-oriented JSON document stored in the database
    pub fn to_json(&self) -> Value {
        let mut columns = Map::new();
        for column in COLUMNS {
            let mut cells = Map::new();
            for (idx, note) in self.notes.iter().enumerate() {
                let cell = match column {
                    "pitch" => Value::from(note.pitch),
                    "velocity" => Value::from(note.velocity),
                    "start" => Value::from(note.start),
                    _ => Value::from(note.end),
                };
                cells.insert(idx.to_string(), cell);
            }
            columns.insert(column.to_string(), Value::Object(cells));
        }
        Value::Object(columns)
    }

    /// Decode a stored note table.
    ///
    /// Accepts the column-oriented form as well as a plain array of note
    /// records. Extra columns are ignored.
    pub fn from_json(value: &Value) -> Result<Self> {
        if let Value::Array(_) = value {
            let notes: Vec<Note> = serde_json::from_value(value.clone())?;
            return Ok(Self::new(notes));
        }

        let columns = value
            .as_object()
            .ok_or_else(|| Error::InvalidRecord("note table must be a JSON object".into()))?;

        let mut decoded: Vec<Vec<(usize, Value)>> = Vec::with_capacity(COLUMNS.len());
        for column in COLUMNS {
            let cells = columns
                .get(column)
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    Error::InvalidRecord(format!("note table is missing column {column}"))
                })?;

            let mut indexed = Vec::with_capacity(cells.len());
            for (key, cell) in cells {
                let idx: usize = key.parse().map_err(|_| {
                    let message = format!("non-numeric row index {key:?} in column {column}");
                    Error::InvalidRecord(message)
                })?;
                indexed.push((idx, cell.clone()));
            }
            // Keys come back in lexicographic order ("10" < "2")
            indexed.sort_by_key(|(idx, _)| *idx);
            decoded.push(indexed);
        }

        let rows = decoded[0].len();
        if decoded.iter().any(|column| column.len() != rows) {
            return Err(Error::InvalidRecord("note table columns have different lengths".into()));
        }

        let mut notes = Vec::with_capacity(rows);
        for row in 0..rows {
            let mut record = Map::new();
            for (column, cells) in COLUMNS.iter().zip(&decoded) {
                let (idx, cell) = &cells[row];
                if *idx != decoded[0][row].0 {
                    return Err(Error::InvalidRecord(format!(
                        "row index {idx} is not present in every column"
                    )));
                }
                record.insert(column.to_string(), cell.clone());
            }
            notes.push(serde_json::from_value(Value::Object(record))?);
        }

        Ok(Self::new(notes))
    }
}

impl Serialize for NoteTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NoteTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_table() -> NoteTable {
        NoteTable::new(vec![
            Note::new(60, 80, 0.0, 0.5),
            Note::new(64, 72, 0.5, 1.0),
        ])
    }

    #[test]
    fn test_column_oriented_layout() {
        let encoded = sample_table().to_json();
        assert_eq!(encoded["pitch"]["0"], json!(60));
        assert_eq!(encoded["pitch"]["1"], json!(64));
        assert_eq!(encoded["end"]["1"], json!(1.0));
    }

    #[test]
    fn test_decode_orders_rows_numerically() {
        let notes: Vec<Note> = (0..12)
            .map(|i| Note::new(40 + i, 90, i as f64, i as f64 + 1.0))
            .collect();
        let table = NoteTable::new(notes);

        let decoded = NoteTable::from_json(&table.to_json()).unwrap();
        assert_eq!(decoded.len(), 12);
        assert_eq!(decoded.notes()[2].pitch, 42);
        assert_eq!(decoded.notes()[10].pitch, 50);
    }

    #[test]
    fn test_decode_record_array() {
        let value = json!([{"pitch": 21, "velocity": 10, "start": 0.0, "end": 0.25}]);
        let decoded = NoteTable::from_json(&value).unwrap();
        assert_eq!(decoded.notes()[0].duration(), 0.25);
    }

    #[test]
    fn test_decode_rejects_ragged_columns() {
        let value = json!({
            "pitch": {"0": 60, "1": 62},
            "velocity": {"0": 80},
            "start": {"0": 0.0, "1": 1.0},
            "end": {"0": 1.0, "1": 2.0},
        });
        assert!(NoteTable::from_json(&value).is_err());
    }

    #[test]
    fn test_empty_table() {
        let empty = NoteTable::default();
        let decoded = NoteTable::from_json(&empty.to_json()).unwrap();
        assert!(decoded.is_empty());
    }
}
