//! SQLite storage implementation

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDateTime;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{Map, Number, Value};

use super::schema::{self, ColumnType, TableSchema, TIMESTAMP_FORMAT};
use crate::{Error, Result};

/// How long a statement waits for another connection's write lock
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// One row of a table, keyed by column name
pub type Record = Map<String, Value>;

/// What to do with the existing rows of a table on bulk insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    /// Keep existing rows
    Append,
    /// Remove every existing row first
    Replace,
    /// Keep existing rows and skip records that collide with a unique key
    SkipExisting,
}

/// SQLite-backed store for models, generators, sources and generations
pub struct SqliteStore {
    pub(super) conn: Connection,
}

impl SqliteStore {
    /// Open a database file (creates if doesn't exist)
    ///
    /// Writers on other connections are waited for up to [`BUSY_TIMEOUT`].
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize the database schema
    fn initialize_schema(&self) -> Result<()> {
        self.conn.pragma_update(None, "foreign_keys", true)?;
        for stmt in schema::all_schema_statements() {
            self.conn.execute(stmt, [])?;
        }
        Ok(())
    }

    // ========== Gateway Operations ==========

    /// Run a read query and return every row keyed by column name
    pub fn read_rows(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>> {
        read_rows_in(&self.conn, sql, params)
    }

    /// Run a write or DDL statement, returning the number of affected rows
    pub fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<usize> {
        Ok(self.conn.execute(sql, params_from_iter(params.iter()))?)
    }

    /// Insert a batch of records into a table in one transaction.
    ///
    /// Values are converted according to the table's declared column types;
    /// keys that are not columns of the table are rejected. Returns the
    /// identifiers of the inserted rows (records skipped in
    /// [`InsertMode::SkipExisting`] yield none).
    pub fn insert_records(
        &self,
        table: &TableSchema,
        records: &[Record],
        mode: InsertMode,
    ) -> Result<Vec<i64>> {
        let tx = self.conn.unchecked_transaction()?;
        if mode == InsertMode::Replace {
            let removed = tx.execute(&format!("DELETE FROM {}", table.name), [])?;
            tracing::info!("Cleared {} rows from {} before insert", removed, table.name);
        }
        let ids = insert_records_in(&tx, table, records, mode)?;
        tx.commit()?;
        Ok(ids)
    }

    // ========== Statistics ==========

    /// Count rows of a table
    pub fn count_rows(&self, table: &TableSchema) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table.name), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        Ok(DbStats {
            models: self.count_rows(&schema::MODELS)?,
            generators: self.count_rows(&schema::GENERATORS)?,
            sources: self.count_rows(&schema::SOURCES)?,
            generations: self.count_rows(&schema::GENERATIONS)?,
        })
    }
}

pub(super) fn read_rows_in(
    conn: &Connection,
    sql: &str,
    params: &[SqlValue],
) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Record::new();
        for (idx, column) in columns.iter().enumerate() {
            record.insert(column.clone(), value_ref_to_json(row.get_ref(idx)?));
        }
        records.push(record);
    }
    Ok(records)
}

pub(super) fn insert_records_in(
    conn: &Connection,
    table: &TableSchema,
    records: &[Record],
    mode: InsertMode,
) -> Result<Vec<i64>> {
    let on_conflict = match mode {
        InsertMode::SkipExisting => " ON CONFLICT DO NOTHING",
        InsertMode::Append | InsertMode::Replace => "",
    };

    let mut ids = Vec::with_capacity(records.len());
    for record in records {
        if let Some(unknown) = record.keys().find(|k| table.column_type(k).is_none()) {
            return Err(Error::UnknownColumn {
                table: table.name.to_string(),
                column: unknown.clone(),
            });
        }

        let mut columns = Vec::with_capacity(record.len());
        let mut values = Vec::with_capacity(record.len());
        // Schema order keeps the generated statement stable
        for (column, ty) in table.columns {
            if let Some(value) = record.get(*column) {
                columns.push(*column);
                values.push(json_to_sql(table, column, *ty, value)?);
            }
        }

        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", table.name)
        } else {
            let placeholders: Vec<String> =
                (1..=columns.len()).map(|i| format!("?{}", i)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({}){}",
                table.name,
                columns.join(", "),
                placeholders.join(", "),
                on_conflict
            )
        };

        let inserted = conn.execute(&sql, params_from_iter(values.iter()))?;
        if inserted > 0 {
            ids.push(conn.last_insert_rowid());
        }
    }

    tracing::debug!("Inserted {} of {} records into {}", ids.len(), records.len(), table.name);
    Ok(ids)
}

/// Convert a JSON value to the SQL value of a declared column type.
///
/// `null` is SQL NULL except in JSON columns, where it is the document `null`.
fn json_to_sql(
    table: &TableSchema,
    column: &str,
    ty: ColumnType,
    value: &Value,
) -> Result<SqlValue> {
    let mismatch = || {
        Error::InvalidRecord(format!(
            "{}.{} expects {:?}, got {}",
            table.name, column, ty, value
        ))
    };

    if value.is_null() && ty != ColumnType::Json {
        return Ok(SqlValue::Null);
    }

    let converted = match ty {
        ColumnType::Integer => match value {
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 => SqlValue::Integer(f as i64),
                    _ => return Err(mismatch()),
                },
            },
            _ => return Err(mismatch()),
        },
        ColumnType::Float => SqlValue::Real(value.as_f64().ok_or_else(mismatch)?),
        ColumnType::String(max_len) => {
            let s = value.as_str().ok_or_else(mismatch)?;
            if s.chars().count() > max_len {
                return Err(Error::InvalidRecord(format!(
                    "{}.{} is limited to {} characters",
                    table.name, column, max_len
                )));
            }
            SqlValue::Text(s.to_string())
        }
        ColumnType::Text => SqlValue::Text(value.as_str().ok_or_else(mismatch)?.to_string()),
        ColumnType::Timestamp => {
            let s = value.as_str().ok_or_else(mismatch)?;
            NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).map_err(|_| mismatch())?;
            SqlValue::Text(s.to_string())
        }
        ColumnType::Json => SqlValue::Text(serde_json::to_string(value)?),
    };
    Ok(converted)
}

fn value_ref_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
    }
}

// ========== Row Helpers ==========

/// Unwrap a `json!` object literal into a record
pub(super) fn into_record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        _ => Record::new(),
    }
}

/// Read a JSON text column
pub(super) fn json_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Value> {
    let text: String = row.get(idx)?;
    parse_json(idx, &text)
}

/// Read a nullable JSON text column
pub(super) fn opt_json_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<Value>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| parse_json(idx, &t)).transpose()
}

/// Read a nullable JSON text column, mapping NULL to `Value::Null`
pub(super) fn json_column_or_null(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Value> {
    Ok(opt_json_column(row, idx)?.unwrap_or(Value::Null))
}

fn parse_json(idx: usize, text: &str) -> rusqlite::Result<Value> {
    serde_json::from_str(text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

/// Read a nullable timestamp column
pub(super) fn opt_timestamp_column(
    row: &rusqlite::Row,
    idx: usize,
) -> rusqlite::Result<Option<NaiveDateTime>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        NaiveDateTime::parse_from_str(&t, TIMESTAMP_FORMAT).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    })
    .transpose()
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub models: usize,
    pub generators: usize,
    pub sources: usize,
    pub generations: usize,
}

impl std::fmt::Display for DbStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Database Statistics:")?;
        writeln!(f, "  Models: {}", self.models)?;
        writeln!(f, "  Generators: {}", self.generators)?;
        writeln!(f, "  Sources: {}", self.sources)?;
        writeln!(f, "  Generations: {}", self.generations)
    }
}
