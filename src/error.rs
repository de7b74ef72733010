//! Error handling for sqidem
//!
//! This module defines the error type shared by the parser, the execution
//! engine, the recorder and the built-in in-memory database.
//!
//! Errors fall into three groups that drive how a script run reacts:
//!
//! - **Parse-fatal**: malformed scripts. The run is aborted before anything
//!   executes.
//! - **Execution-fatal**: the output stream failed. The error is reported
//!   where possible and the run is aborted.
//! - **Execution-recoverable**: everything raised while a single command talks
//!   to a database. The failure is written into the output next to the command
//!   and the run carries on with the next command.

use thiserror::Error;

/// SqidemError represents all possible errors that can occur in sqidem
#[derive(Error, Debug)]
pub enum SqidemError {
    /// Error while reading files such as CSV tables or fixtures
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error while reading a CSV file into an in-memory table
    #[error("File parsing error: {0}")]
    CsvError(#[from] csv::Error),

    /// Error during SQL parsing in the in-memory database
    #[error("SQL parsing error: {0}")]
    SqlParseError(#[from] sqlparser::parser::ParserError),

    /// Malformed script text
    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// A SQL statement was not terminated with ';'
    #[error("Parse error at line {line}: end of SQL statement reached before ';'")]
    UnterminatedStatement { line: usize },

    /// A directive that neither the core grammar nor any handler recognizes
    #[error("Parse error at line {line}: unknown command: {text}")]
    UnknownCommand { line: usize, text: String },

    /// A property value that cannot be parsed for its property
    #[error("Parse error at line {line}: invalid value '{value}' for property '{name}'")]
    InvalidPropertyValue {
        line: usize,
        name: String,
        value: String,
    },

    /// No connection factory knows the requested database
    #[error("Unknown database: {0}")]
    UnknownDatabase(String),

    /// A command needs a connection but no `!use` has run yet
    #[error("No connection; use '!use <database>' before running SQL")]
    NoConnection,

    /// `!verify` was used but the current database has no reference connection
    #[error("Reference connection for database '{0}' is not available")]
    NoReferenceConnection(String),

    /// A semantic check failed (for example reference output differs)
    #[error("Check failed: {0}")]
    CheckFailed(String),

    /// Error when a referenced table doesn't exist
    #[error("Table '{0}' not found")]
    TableNotFound(String),

    /// Error when creating a table that already exists
    #[error("Table '{0}' already exists")]
    TableAlreadyExists(String),

    /// Error when a referenced column doesn't exist in a table
    #[error("Column '{0}' not found")]
    ColumnNotFound(String),

    /// Error for invalid table=file specifications
    #[error("Invalid file specification: {0}")]
    InvalidFileSpec(String),

    /// Error for SQL features the in-memory database does not implement
    #[error("Unsupported SQL feature: {0}")]
    UnsupportedSqlFeature(String),

    /// Error for type mismatches or conversion failures
    #[error("Type error: {0}")]
    TypeError(String),

    /// Error for semantically invalid SQL statements
    #[error("Invalid SQL query: {0}")]
    InvalidSqlQuery(String),

    /// Error for division by zero in arithmetic operations
    #[error("Division by zero")]
    DivideByZero,

    /// A fixture file is malformed
    #[error("Fixture error at line {line}: {message}")]
    Fixture { line: usize, message: String },

    /// Playback was asked for a query that the fixture does not contain
    #[error("No fixture recorded for database '{db}' and SQL: {sql}")]
    FixtureNotFound { db: String, sql: String },

    /// A command panicked while it ran
    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    /// An object was used in a state that does not allow the operation
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Writing the rewritten script failed
    #[error("Output error: {0}")]
    Output(#[source] std::io::Error),
}

impl SqidemError {
    /// Whether the error must abort the whole script run
    ///
    /// Parse errors and output failures abort; database and check failures are
    /// reported in place and the run continues.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SqidemError::Output(_)
                | SqidemError::Parse { .. }
                | SqidemError::UnterminatedStatement { .. }
                | SqidemError::UnknownCommand { .. }
                | SqidemError::InvalidPropertyValue { .. }
        )
    }
}

/// Result type alias for operations that can produce a SqidemError
pub type SqidemResult<T> = std::result::Result<T, SqidemError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(SqidemError::UnterminatedStatement { line: 3 }.is_fatal());
        let broken = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed");
        assert!(SqidemError::Output(broken).is_fatal());
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        assert!(!SqidemError::from(missing).is_fatal());
        assert!(!SqidemError::TableNotFound("t".to_string()).is_fatal());
        assert!(!SqidemError::CheckFailed("differs".to_string()).is_fatal());
        assert!(!SqidemError::NoConnection.is_fatal());
    }

    #[test]
    fn test_messages_name_the_subject() {
        let err = SqidemError::FixtureNotFound {
            db: "scott".to_string(),
            sql: "select 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "No fixture recorded for database 'scott' and SQL: select 1"
        );
        let err = SqidemError::UnknownCommand {
            line: 7,
            text: "okay".to_string(),
        };
        assert_eq!(err.to_string(), "Parse error at line 7: unknown command: okay");
    }
}
