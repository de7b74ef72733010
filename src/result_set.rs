//! Result set module for sqidem
//!
//! This module provides the tabular result returned by a connection:
//! column metadata carrying JDBC type names, and rows of nullable strings.
//! Values are kept in their rendered string form because everything downstream
//! (formatting, reconciliation, fixtures) compares text; typed access is
//! offered through [`Cursor`].

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;

use crate::error::{SqidemError, SqidemResult};

/// JDBC type category of a column
///
/// The names match `java.sql.Types` so that fixture files stay readable to
/// anyone used to JDBC metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JdbcType {
    Bit,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Real,
    Double,
    Numeric,
    Decimal,
    Char,
    Varchar,
    LongVarchar,
    Date,
    Time,
    Timestamp,
    Boolean,
    Null,
    Other,
}

const ALL_TYPES: [JdbcType; 19] = [
    JdbcType::Bit,
    JdbcType::TinyInt,
    JdbcType::SmallInt,
    JdbcType::Integer,
    JdbcType::BigInt,
    JdbcType::Float,
    JdbcType::Real,
    JdbcType::Double,
    JdbcType::Numeric,
    JdbcType::Decimal,
    JdbcType::Char,
    JdbcType::Varchar,
    JdbcType::LongVarchar,
    JdbcType::Date,
    JdbcType::Time,
    JdbcType::Timestamp,
    JdbcType::Boolean,
    JdbcType::Null,
    JdbcType::Other,
];

impl JdbcType {
    /// The JDBC type name, as written in fixture headers
    pub fn name(&self) -> &'static str {
        match self {
            JdbcType::Bit => "BIT",
            JdbcType::TinyInt => "TINYINT",
            JdbcType::SmallInt => "SMALLINT",
            JdbcType::Integer => "INTEGER",
            JdbcType::BigInt => "BIGINT",
            JdbcType::Float => "FLOAT",
            JdbcType::Real => "REAL",
            JdbcType::Double => "DOUBLE",
            JdbcType::Numeric => "NUMERIC",
            JdbcType::Decimal => "DECIMAL",
            JdbcType::Char => "CHAR",
            JdbcType::Varchar => "VARCHAR",
            JdbcType::LongVarchar => "LONGVARCHAR",
            JdbcType::Date => "DATE",
            JdbcType::Time => "TIME",
            JdbcType::Timestamp => "TIMESTAMP",
            JdbcType::Boolean => "BOOLEAN",
            JdbcType::Null => "NULL",
            JdbcType::Other => "OTHER",
        }
    }

    /// Look up a type by its JDBC name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        ALL_TYPES
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Whether values of this type are numbers
    ///
    /// Numeric columns are right-justified by the tabular output formats.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            JdbcType::TinyInt
                | JdbcType::SmallInt
                | JdbcType::Integer
                | JdbcType::BigInt
                | JdbcType::Float
                | JdbcType::Real
                | JdbcType::Double
                | JdbcType::Numeric
                | JdbcType::Decimal
        )
    }
}

impl fmt::Display for JdbcType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Metadata of one result column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    /// Column label as shown in output headers
    pub label: String,
    /// JDBC type category
    pub jdbc_type: JdbcType,
    /// Declared precision, 0 when unknown
    pub precision: u32,
    /// Whether the column may hold NULL
    pub nullable: bool,
}

impl ColumnMeta {
    /// Create nullable column metadata with unknown precision
    pub fn new(label: &str, jdbc_type: JdbcType) -> Self {
        ColumnMeta {
            label: label.to_string(),
            jdbc_type,
            precision: 0,
            nullable: true,
        }
    }

    /// Set the declared precision
    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = precision;
        self
    }

    /// Set whether the column accepts NULL
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

/// One row of a result; `None` is SQL NULL
pub type ResultRow = Vec<Option<String>>;

/// A fully materialized query result
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResultSet {
    columns: Vec<ColumnMeta>,
    rows: Vec<ResultRow>,
}

impl ResultSet {
    /// Create an empty result with the given columns
    pub fn new(columns: Vec<ColumnMeta>) -> Self {
        ResultSet {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row, checking that it has one value per column
    pub fn push_row(&mut self, row: ResultRow) -> SqidemResult<()> {
        if row.len() != self.columns.len() {
            return Err(SqidemError::IllegalState(format!(
                "Row has {} values, but result has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Open a forward-only cursor positioned before the first row
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor {
            result: self,
            position: None,
        }
    }
}

/// Forward-only, read-only cursor over a [`ResultSet`]
///
/// Mirrors the JDBC `ResultSet` reading discipline: call [`Cursor::next`] to
/// advance, then read columns of the current row by zero-based index.
pub struct Cursor<'a> {
    result: &'a ResultSet,
    position: Option<usize>,
}

impl<'a> Cursor<'a> {
    /// Advance to the next row; returns false once the rows are exhausted
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> bool {
        let next = self.position.map_or(0, |p| p + 1);
        if next < self.result.rows.len() {
            self.position = Some(next);
            true
        } else {
            self.position = Some(self.result.rows.len());
            false
        }
    }

    pub fn columns(&self) -> &'a [ColumnMeta] {
        &self.result.columns
    }

    fn cell(&self, column: usize) -> SqidemResult<Option<&'a str>> {
        let row = self
            .position
            .and_then(|p| self.result.rows.get(p))
            .ok_or_else(|| SqidemError::IllegalState("Cursor is not on a row".to_string()))?;
        let value = row.get(column).ok_or_else(|| {
            SqidemError::IllegalState(format!(
                "Column index {} out of bounds (result has {} columns)",
                column,
                row.len()
            ))
        })?;
        Ok(value.as_deref())
    }

    /// The value of a column as text, `None` for NULL
    pub fn get_string(&self, column: usize) -> SqidemResult<Option<&'a str>> {
        self.cell(column)
    }

    pub fn get_i64(&self, column: usize) -> SqidemResult<Option<i64>> {
        self.parse_cell(column, "BIGINT", |s| s.parse::<i64>().ok())
    }

    pub fn get_f64(&self, column: usize) -> SqidemResult<Option<f64>> {
        self.parse_cell(column, "DOUBLE", |s| s.parse::<f64>().ok())
    }

    pub fn get_bool(&self, column: usize) -> SqidemResult<Option<bool>> {
        self.parse_cell(column, "BOOLEAN", |s| match s.to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        })
    }

    pub fn get_decimal(&self, column: usize) -> SqidemResult<Option<Decimal>> {
        self.parse_cell(column, "DECIMAL", |s| Decimal::from_str(s).ok())
    }

    /// Whether the column of the current row is NULL
    pub fn is_null(&self, column: usize) -> SqidemResult<bool> {
        Ok(self.cell(column)?.is_none())
    }

    fn parse_cell<T>(
        &self,
        column: usize,
        type_name: &str,
        parse: impl Fn(&str) -> Option<T>,
    ) -> SqidemResult<Option<T>> {
        match self.cell(column)? {
            None => Ok(None),
            Some(text) => parse(text.trim()).map(Some).ok_or_else(|| {
                SqidemError::TypeError(format!("Cannot read '{}' as {}", text, type_name))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ResultSet {
        let mut rs = ResultSet::new(vec![
            ColumnMeta::new("ID", JdbcType::Integer),
            ColumnMeta::new("NAME", JdbcType::Varchar),
        ]);
        rs.push_row(vec![Some("1".to_string()), Some("Alice".to_string())])
            .unwrap();
        rs.push_row(vec![Some("2".to_string()), None]).unwrap();
        rs
    }

    #[test]
    fn test_type_names_round_trip() {
        for t in ALL_TYPES {
            assert_eq!(JdbcType::from_name(t.name()), Some(t));
        }
        assert_eq!(JdbcType::from_name("varchar"), Some(JdbcType::Varchar));
        assert_eq!(JdbcType::from_name("NOPE"), None);
    }

    #[test]
    fn test_numeric_categories() {
        assert!(JdbcType::Decimal.is_numeric());
        assert!(JdbcType::BigInt.is_numeric());
        assert!(!JdbcType::Varchar.is_numeric());
        assert!(!JdbcType::Boolean.is_numeric());
    }

    #[test]
    fn test_push_row_checks_arity() {
        let mut rs = sample();
        assert!(rs.push_row(vec![None]).is_err());
        assert_eq!(rs.row_count(), 2);
    }

    #[test]
    fn test_cursor_typed_access() {
        let rs = sample();
        let mut cursor = rs.cursor();
        assert!(cursor.get_string(0).is_err());
        assert!(cursor.next());
        assert_eq!(cursor.get_i64(0).unwrap(), Some(1));
        assert_eq!(cursor.get_string(1).unwrap(), Some("Alice"));
        assert!(cursor.get_i64(1).is_err());
        assert!(cursor.next());
        assert!(cursor.is_null(1).unwrap());
        assert_eq!(cursor.get_decimal(0).unwrap(), Some(Decimal::from(2)));
        assert!(!cursor.next());
        assert!(!cursor.next());
    }

    #[test]
    fn test_cursor_floats_and_booleans() {
        let mut rs = ResultSet::new(vec![
            ColumnMeta::new("X", JdbcType::Double),
            ColumnMeta::new("B", JdbcType::Boolean),
        ]);
        rs.push_row(vec![Some("2.5".to_string()), Some("TRUE".to_string())])
            .unwrap();
        rs.push_row(vec![None, Some("maybe".to_string())]).unwrap();

        let mut cursor = rs.cursor();
        assert!(cursor.next());
        assert_eq!(cursor.get_f64(0).unwrap(), Some(2.5));
        assert_eq!(cursor.get_bool(1).unwrap(), Some(true));
        assert!(cursor.get_bool(0).is_err());
        assert!(cursor.next());
        assert_eq!(cursor.get_f64(0).unwrap(), None);
        assert!(cursor.get_bool(1).is_err());
    }
}
