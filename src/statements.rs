use chrono::NaiveDateTime;
use indexmap::IndexMap;
use rusqlite::types::{ToSqlOutput, Value as RusqliteValue};
use rusqlite::ToSql;

use crate::error::{ReckonError, Result};
use crate::value::Value;

/// A parameter scalar in its native form, ready for a prepared statement.
/// NA values become NULL.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    DateTime(NaiveDateTime),
}

impl From<&Value> for SqlValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Int(i) => SqlValue::Int(*i),
            Value::Float(f) => {
                if f.is_nan() {
                    SqlValue::Null
                } else {
                    SqlValue::Float(*f)
                }
            }
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Date(d) => SqlValue::DateTime(*d),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let out = match self {
            SqlValue::Null => RusqliteValue::Null,
            SqlValue::Int(i) => RusqliteValue::Integer(*i),
            SqlValue::Float(f) => RusqliteValue::Real(*f),
            SqlValue::Bool(b) => RusqliteValue::Integer(*b as i64),
            SqlValue::Text(s) => RusqliteValue::Text(s.clone()),
            SqlValue::DateTime(d) => {
                RusqliteValue::Text(d.format("%Y-%m-%d %H:%M:%S").to_string())
            }
        };
        Ok(ToSqlOutput::Owned(out))
    }
}

/// Accumulated transaction statements: one parameter-tuple batch per SQL
/// template, in first-seen order. Duplicate tuples for the same template
/// are dropped. The whole set is meant to be executed as a single atomic
/// write.
#[derive(Debug, Clone, Default)]
pub struct StatementSet {
    statements: IndexMap<String, Vec<Vec<SqlValue>>>,
}

impl StatementSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter tuple to the template's batch, skipping exact
    /// duplicates.
    pub fn push(&mut self, sql: String, params: Vec<SqlValue>) {
        let batch = self.statements.entry(sql).or_default();
        if !batch.contains(&params) {
            batch.push(params);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Number of distinct SQL templates.
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Total number of parameter tuples across all templates.
    pub fn param_count(&self) -> usize {
        self.statements.values().map(|v| v.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Vec<SqlValue>])> {
        self.statements
            .iter()
            .map(|(sql, params)| (sql.as_str(), params.as_slice()))
    }

    pub fn get(&self, sql: &str) -> Option<&[Vec<SqlValue>]> {
        self.statements.get(sql).map(|v| v.as_slice())
    }

    /// Merge another statement set into this one, preserving dedup.
    pub fn merge(&mut self, other: StatementSet) {
        for (sql, batch) in other.statements {
            for params in batch {
                self.push(sql.clone(), params);
            }
        }
    }
}

fn check_shape(columns: &[String], values: &[Vec<SqlValue>], verb: &str) -> Result<()> {
    for row in values {
        if row.len() != columns.len() {
            return Err(ReckonError::Statement(format!(
                "failed to generate {verb} statement - the number of columns ({}) does not \
                 match the number of parameters ({}) for the transaction",
                columns.len(),
                row.len()
            )));
        }
    }
    Ok(())
}

/// Add batched INSERT statements for the given rows.
pub fn prepare_insert(
    table: &str,
    columns: &[String],
    values: Vec<Vec<SqlValue>>,
    statements: &mut StatementSet,
) -> Result<()> {
    if columns.is_empty() {
        return Err(ReckonError::Statement(
            "failed to generate insert statement - no columns provided".to_string(),
        ));
    }
    check_shape(columns, &values, "insert")?;

    let markers = vec!["?"; columns.len()].join(",");
    let sql = format!(
        "INSERT INTO {table} ({cols}) VALUES ({markers});",
        cols = columns.join(",")
    );
    log::debug!("insert statement is \"{sql}\" with {} parameter tuples", values.len());

    for row in values {
        statements.push(sql.clone(), row);
    }
    Ok(())
}

/// Add batched UPDATE statements. Each row of `values` is paired with the
/// filter tuple at the same position; filter parameters are appended after
/// the SET parameters.
pub fn prepare_update(
    table: &str,
    columns: &[String],
    values: Vec<Vec<SqlValue>>,
    filter_clause: &str,
    filter_values: Vec<Vec<SqlValue>>,
    statements: &mut StatementSet,
) -> Result<()> {
    if columns.is_empty() {
        return Err(ReckonError::Statement(
            "failed to generate update statement - no columns provided".to_string(),
        ));
    }
    check_shape(columns, &values, "update")?;
    if values.len() != filter_values.len() {
        return Err(ReckonError::Statement(format!(
            "failed to generate update statement - the number of transactions requested ({}) \
             does not match the number of filters provided ({})",
            values.len(),
            filter_values.len()
        )));
    }

    let pairs: Vec<String> = columns.iter().map(|c| format!("{c}=?")).collect();
    let sql = format!(
        "UPDATE {table} SET {pairs} WHERE {filter_clause};",
        pairs = pairs.join(",")
    );
    log::debug!("update statement is \"{sql}\" with {} parameter tuples", values.len());

    for (row, filter) in values.into_iter().zip(filter_values) {
        let mut params = row;
        params.extend(filter);
        statements.push(sql.clone(), params);
    }
    Ok(())
}

/// Add batched upsert statements keyed on `key_columns`: inserts the row,
/// updating the non-key columns when the key already exists.
pub fn prepare_upsert(
    table: &str,
    columns: &[String],
    key_columns: &[String],
    values: Vec<Vec<SqlValue>>,
    statements: &mut StatementSet,
) -> Result<()> {
    if columns.is_empty() {
        return Err(ReckonError::Statement(
            "failed to generate upsert statement - no columns provided".to_string(),
        ));
    }
    for key in key_columns {
        if !columns.contains(key) {
            return Err(ReckonError::Statement(format!(
                "failed to generate upsert statement - key column {key} is not among the \
                 insert columns"
            )));
        }
    }
    check_shape(columns, &values, "upsert")?;

    let markers = vec!["?"; columns.len()].join(",");
    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !key_columns.contains(c))
        .map(|c| format!("{c}=excluded.{c}"))
        .collect();
    let sql = format!(
        "INSERT INTO {table} ({cols}) VALUES ({markers}) ON CONFLICT({keys}) DO UPDATE SET {updates};",
        cols = columns.join(","),
        keys = key_columns.join(","),
        updates = updates.join(",")
    );
    log::debug!("upsert statement is \"{sql}\" with {} parameter tuples", values.len());

    for row in values {
        statements.push(sql.clone(), row);
    }
    Ok(())
}

/// Add batched DELETE statements matching rows on the given columns.
pub fn prepare_delete(
    table: &str,
    columns: &[String],
    values: Vec<Vec<SqlValue>>,
    statements: &mut StatementSet,
) -> Result<()> {
    if columns.is_empty() {
        return Err(ReckonError::Statement(
            "failed to generate delete statement - no columns provided".to_string(),
        ));
    }
    check_shape(columns, &values, "delete")?;

    let clauses: Vec<String> = columns.iter().map(|c| format!("{c} = ?")).collect();
    let sql = format!(
        "DELETE FROM {table} WHERE {clauses};",
        clauses = clauses.join(" AND ")
    );
    log::debug!("delete statement is \"{sql}\" with {} parameter tuples", values.len());

    for row in values {
        statements.push(sql.clone(), row);
    }
    Ok(())
}
