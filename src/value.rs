use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;

use crate::error::{ReckonError, Result};

/// Column data types supported by collections and record entries.
///
/// Resolved once at configuration-load time; everything downstream
/// dispatches on this enum rather than on type-name strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Int,
    Float,
    Money,
    Bool,
    Date,
    Category,
}

impl DataType {
    pub fn is_numeric(self) -> bool {
        matches!(self, DataType::Int | DataType::Float | DataType::Money)
    }
}

/// A typed cell value. `Null` stands in for NA.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Date(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDateTime> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Coerce the value to the given column type. Unparseable values
    /// collapse to `Null` rather than erroring, matching the NA-coercion
    /// behavior collections rely on when conforming appended data.
    pub fn coerce(&self, dtype: DataType) -> Value {
        match (self, dtype) {
            (Value::Null, _) => Value::Null,
            (v, DataType::String) | (v, DataType::Category) => Value::String(v.to_display_string()),
            (Value::Int(i), DataType::Int) => Value::Int(*i),
            (Value::Float(f), DataType::Int) => {
                if f.is_nan() {
                    Value::Null
                } else {
                    Value::Int(*f as i64)
                }
            }
            (Value::Bool(b), DataType::Int) => Value::Int(*b as i64),
            (Value::String(s), DataType::Int) => match s.trim().parse::<i64>() {
                Ok(i) => Value::Int(i),
                Err(_) => match s.trim().parse::<f64>() {
                    Ok(f) if !f.is_nan() => Value::Int(f as i64),
                    _ => Value::Null,
                },
            },
            (Value::Float(f), DataType::Float) | (Value::Float(f), DataType::Money) => {
                if f.is_nan() {
                    Value::Null
                } else {
                    Value::Float(*f)
                }
            }
            (Value::Int(i), DataType::Float) | (Value::Int(i), DataType::Money) => {
                Value::Float(*i as f64)
            }
            (Value::String(s), DataType::Float) | (Value::String(s), DataType::Money) => {
                match s.trim().replace(',', "").parse::<f64>() {
                    Ok(f) => Value::Float(f),
                    Err(_) => Value::Null,
                }
            }
            (Value::Bool(b), DataType::Bool) => Value::Bool(*b),
            (Value::Int(i), DataType::Bool) => Value::Bool(*i != 0),
            (Value::String(s), DataType::Bool) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Value::Bool(true),
                "false" | "0" | "no" => Value::Bool(false),
                _ => Value::Null,
            },
            (Value::Date(d), DataType::Date) => Value::Date(*d),
            (Value::String(s), DataType::Date) => match parse_date(s) {
                Some(d) => Value::Date(d),
                None => Value::Null,
            },
            _ => Value::Null,
        }
    }

    /// Plain string rendering, without display decoration.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        }
    }

    /// Format a value for tabular display according to its column type.
    pub fn format_display(&self, dtype: DataType) -> String {
        match (self, dtype) {
            (Value::Null, _) => String::new(),
            (Value::Float(f), DataType::Money) => money(*f),
            (Value::Int(i), DataType::Money) => money(*i as f64),
            (Value::Bool(b), _) => {
                if *b {
                    "\u{2713}".to_string()
                } else {
                    String::new()
                }
            }
            (Value::Date(d), _) => d.format("%Y-%m-%d").to_string(),
            (v, _) => v.to_display_string(),
        }
    }

    /// Parse a raw string into a value of the given column type.
    pub fn parse(raw: &str, dtype: DataType) -> Result<Value> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Value::Null);
        }
        let coerced = Value::String(trimmed.to_string()).coerce(dtype);
        if coerced.is_null() {
            return Err(ReckonError::Other(format!(
                "unable to parse \"{trimmed}\" as {dtype:?}"
            )));
        }
        Ok(coerced)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(d: NaiveDateTime) -> Self {
        Value::Date(d)
    }
}

fn parse_date(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%m/%d/%Y") {
        return d.and_hms_opt(0, 0, 0);
    }
    None
}

/// Format a float as a money amount with thousands separators: 1,234.56
pub fn money(val: f64) -> String {
    let negative = val < 0.0;
    let abs = val.abs();
    let cents = format!("{:.2}", abs);
    let parts: Vec<&str> = cents.split('.').collect();
    let int_part = parts[0];
    let dec_part = parts[1];

    let mut with_commas = String::new();
    for (i, c) in int_part.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            with_commas.push(',');
        }
        with_commas.push(c);
    }
    let with_commas: String = with_commas.chars().rev().collect();

    if negative {
        format!("-{with_commas}.{dec_part}")
    } else {
        format!("{with_commas}.{dec_part}")
    }
}
