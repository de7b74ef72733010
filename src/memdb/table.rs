//! Table module for the in-memory database
//!
//! This module provides the in-memory table representation:
//!
//! - Typed cell values with SQL comparison rules
//! - Declared column types that incoming values are coerced to
//! - Row storage with case-insensitive column lookup

use std::cmp::Ordering;
use std::fmt;

use crate::error::{SqidemError, SqidemResult};
use crate::result_set::{ColumnMeta, JdbcType};

/// Represents a value in a table cell
///
/// Integer and Float compare with each other; other type combinations are
/// not equal, following SQL comparison rules.
#[derive(Debug, Clone)]
pub enum Value {
    /// Represents a NULL or missing value
    Null,
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit floating point number
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Boolean value (true/false)
    Boolean(bool),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Render a value as a result set field; NULL becomes `None`
    pub fn to_field(&self) -> Option<String> {
        match self {
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// The JDBC type a value of this kind reports
    pub fn jdbc_type(&self) -> JdbcType {
        match self {
            Value::Null => JdbcType::Null,
            Value::Integer(_) => JdbcType::Integer,
            Value::Float(_) => JdbcType::Double,
            Value::String(_) => JdbcType::Varchar,
            Value::Boolean(_) => JdbcType::Boolean,
        }
    }

    /// Numeric view used by arithmetic and aggregates
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// SQL comparison; `None` when either side is NULL
    pub fn compare(&self, other: &Value) -> SqidemResult<Option<Ordering>> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => Ok(None),
            (Value::Integer(a), Value::Integer(b)) => Ok(Some(a.cmp(b))),
            (Value::String(a), Value::String(b)) => Ok(Some(a.cmp(b))),
            (Value::Boolean(a), Value::Boolean(b)) => Ok(Some(a.cmp(b))),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Ok(x.partial_cmp(&y)),
                _ => Err(SqidemError::TypeError(format!(
                    "Cannot compare {} with {}",
                    a.jdbc_type(),
                    b.jdbc_type()
                ))),
            },
        }
    }

    /// Total order for sorting: NULL sorts last, then Boolean < Number < String
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        fn rank(value: &Value) -> u8 {
            match value {
                Value::Boolean(_) => 0,
                Value::Integer(_) | Value::Float(_) => 1,
                Value::String(_) => 2,
                Value::Null => 3,
            }
        }
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => rank(a).cmp(&rank(b)),
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Float(b)) => *a as f64 == *b,
            (Value::Float(a), Value::Integer(b)) => *a == *b as f64,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            // Whole doubles keep a fractional digit so they read as DOUBLE
            Value::Float(x) if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e15 => {
                write!(f, "{:.1}", x)
            }
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::Boolean(b) => write!(f, "{}", b),
        }
    }
}

/// Infer a value from CSV text
///
/// Tries integer, then float, then boolean; empty text is NULL and anything
/// else is a string.
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        if s.is_empty() {
            return Value::Null;
        }
        if let Ok(i) = s.parse::<i64>() {
            return Value::Integer(i);
        }
        if let Ok(fl) = s.parse::<f64>() {
            return Value::Float(fl);
        }
        match s.to_lowercase().as_str() {
            "true" => Value::Boolean(true),
            "false" => Value::Boolean(false),
            _ => Value::String(s.to_string()),
        }
    }
}

/// A declared column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub jdbc_type: JdbcType,
    /// Declared length or precision; 0 when unspecified
    pub precision: u32,
    pub nullable: bool,
}

impl Column {
    pub fn new(name: &str, jdbc_type: JdbcType) -> Self {
        Column {
            name: name.to_string(),
            jdbc_type,
            precision: 0,
            nullable: true,
        }
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn meta(&self) -> ColumnMeta {
        ColumnMeta::new(&self.name, self.jdbc_type)
            .with_precision(self.precision)
            .with_nullable(self.nullable)
    }

    /// Convert a value to this column's type
    ///
    /// # Returns
    /// * `Ok(Value)` - The stored form of the value
    /// * `Err` - If the value is NULL for a NOT NULL column, does not fit the
    ///   type, or is longer than the declared length
    pub fn coerce(&self, value: Value) -> SqidemResult<Value> {
        if value.is_null() {
            return if self.nullable {
                Ok(Value::Null)
            } else {
                Err(SqidemError::InvalidSqlQuery(format!(
                    "Column '{}' cannot be NULL",
                    self.name
                )))
            };
        }
        let mismatch = |value: &Value| {
            SqidemError::TypeError(format!(
                "Cannot assign {} value '{}' to {} column '{}'",
                value.jdbc_type(),
                value,
                self.jdbc_type,
                self.name
            ))
        };
        let coerced = match self.jdbc_type {
            JdbcType::Integer | JdbcType::BigInt | JdbcType::SmallInt | JdbcType::TinyInt => {
                match value {
                    Value::Integer(_) => value,
                    Value::Float(f) if f.fract() == 0.0 => Value::Integer(f as i64),
                    other => return Err(mismatch(&other)),
                }
            }
            JdbcType::Double
            | JdbcType::Float
            | JdbcType::Real
            | JdbcType::Decimal
            | JdbcType::Numeric => match value {
                Value::Integer(i) => Value::Float(i as f64),
                Value::Float(_) => value,
                other => return Err(mismatch(&other)),
            },
            JdbcType::Boolean | JdbcType::Bit => match value {
                Value::Boolean(_) => value,
                other => return Err(mismatch(&other)),
            },
            _ => Value::String(value.to_string()),
        };
        if let Value::String(s) = &coerced {
            if self.precision > 0 && s.chars().count() > self.precision as usize {
                return Err(SqidemError::TypeError(format!(
                    "Value '{}' is too long for column '{}' of length {}",
                    s, self.name, self.precision
                )));
            }
        }
        Ok(coerced)
    }
}

/// Represents a row of values in a table
pub type Row = Vec<Value>;

/// Represents an in-memory table of data
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    columns: Vec<Column>,
    rows: Vec<Row>,
}

impl Table {
    /// Create a new empty table with the given columns
    pub fn new(name: &str, columns: Vec<Column>) -> Self {
        Table {
            name: name.to_string(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Find a column by name, ignoring case
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Add a row after coercing each value to its column type
    ///
    /// # Returns
    /// * `Ok(())` if the row was added
    /// * `Err` if the row width is wrong or a value does not fit its column
    pub fn add_row(&mut self, row: Row) -> SqidemResult<()> {
        if row.len() != self.columns.len() {
            return Err(SqidemError::InvalidSqlQuery(format!(
                "Table '{}' has {} columns but {} values were supplied",
                self.name,
                self.columns.len(),
                row.len()
            )));
        }
        let row = self
            .columns
            .iter()
            .zip(row)
            .map(|(column, value)| column.coerce(value))
            .collect::<SqidemResult<Row>>()?;
        self.rows.push(row);
        Ok(())
    }

    /// Replace every row; used by UPDATE and DELETE after they compute the new contents
    pub fn replace_rows(&mut self, rows: Vec<Row>) {
        self.rows = rows;
    }
}
