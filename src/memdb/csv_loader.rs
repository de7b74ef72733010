//! CSV loading for the in-memory database
//!
//! Loads CSV files with a header row into tables. File specifications take
//! the form `[table_name=]file_path.csv`; without an explicit name the table
//! is named after the file stem.
//!
//! Column types are inferred from the data: a column is INTEGER when every
//! non-empty field parses as an integer, DOUBLE when every one parses as a
//! number, BOOLEAN for `true`/`false` and VARCHAR otherwise. Empty fields
//! load as NULL.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;

use tracing::debug;

use crate::error::{SqidemError, SqidemResult};
use crate::memdb::database::Database;
use crate::memdb::table::{Column, Table, Value};
use crate::result_set::JdbcType;

/// Load a CSV file into a new table of `database`
///
/// # Arguments
/// * `database` - Database that receives the table
/// * `file_spec` - `[table_name=]file_path.csv`
///
/// # Returns
/// * `Ok(String)` - Name of the table created
/// * `Err` - If the spec is invalid, the file cannot be read, or the table exists
pub fn load_csv(database: &mut Database, file_spec: &str) -> SqidemResult<String> {
    let (table_name, file_path) = parse_file_spec(file_spec)?;
    let file = File::open(&file_path)?;
    let table = read_table(&table_name, BufReader::new(file))?;
    debug!(
        "Loaded {} rows into table '{}' from {}",
        table.row_count(),
        table_name,
        file_path.display()
    );
    database.add_table(table)?;
    Ok(table_name)
}

/// Build a table from CSV text with a header row
pub fn read_table<R: Read>(table_name: &str, reader: R) -> SqidemResult<Table> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);

    let headers = csv_reader
        .headers()?
        .iter()
        .map(|s| s.trim().to_string())
        .collect::<Vec<_>>();

    let mut records = Vec::new();
    for result in csv_reader.records() {
        records.push(result?);
    }
    let values: Vec<Vec<Value>> = records
        .iter()
        .map(|record| record.iter().map(Value::from).collect())
        .collect();

    let columns: Vec<Column> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| Column::new(name, infer_type(values.iter().map(|r| &r[i]))))
        .collect();

    let mut table = Table::new(table_name, columns.clone());
    for (record, row) in records.iter().zip(values) {
        // text columns keep the field as written
        let row = row
            .into_iter()
            .zip(record.iter())
            .zip(&columns)
            .map(|((value, field), column)| match value {
                Value::Null => Value::Null,
                _ if column.jdbc_type == JdbcType::Varchar => Value::String(field.to_string()),
                value => value,
            })
            .collect();
        table.add_row(row)?;
    }
    Ok(table)
}

/// Narrowest column type that holds every value
fn infer_type<'a>(values: impl Iterator<Item = &'a Value>) -> JdbcType {
    let mut inferred: Option<JdbcType> = None;
    for value in values {
        let next = match (inferred, value) {
            (_, Value::Null) => continue,
            (None, v) => v.jdbc_type(),
            (Some(JdbcType::Integer), Value::Float(_))
            | (Some(JdbcType::Double), Value::Integer(_)) => JdbcType::Double,
            (Some(current), v) if current == v.jdbc_type() => current,
            _ => return JdbcType::Varchar,
        };
        inferred = Some(next);
    }
    inferred.unwrap_or(JdbcType::Varchar)
}

/// Parse a file specification into table name and file path
///
/// Handles two formats:
/// 1. `table_name=file_path.csv` - Explicit table name and file path
/// 2. `file_path.csv` - Table name derived from file name
pub fn parse_file_spec(file_spec: &str) -> SqidemResult<(String, PathBuf)> {
    if let Some((table_name, file_path)) = file_spec.split_once('=') {
        if table_name.is_empty() || file_path.is_empty() {
            return Err(SqidemError::InvalidFileSpec(file_spec.to_string()));
        }
        Ok((table_name.to_string(), PathBuf::from(file_path)))
    } else {
        let path = PathBuf::from(file_spec);
        let stem = path
            .file_stem()
            .ok_or_else(|| SqidemError::InvalidFileSpec(file_spec.to_string()))?;
        Ok((stem.to_string_lossy().to_string(), path))
    }
}
