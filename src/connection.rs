//! Connection interfaces for sqidem
//!
//! The engine and the recorder never talk to a database directly. They go
//! through [`Connection`], obtained by name from a [`ConnectionFactory`].
//! Factories compose as a chain of responsibility: the first factory that
//! knows a name wins, and [`UnsupportedConnectionFactory`] terminates the chain.

use tracing::debug;

use crate::error::{SqidemError, SqidemResult};
use crate::result_set::{ColumnMeta, ResultSet};

/// Outcome of running one SQL statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementResult {
    /// The statement produced rows
    Rows(ResultSet),
    /// The statement modified this many rows (0 for DDL)
    Count(u64),
}

/// A live database connection
///
/// Implementations only provide [`Connection::execute`], [`Connection::explain`]
/// and [`Connection::describe`]; query and update flavors are derived.
pub trait Connection {
    /// Name the connection was opened under
    fn name(&self) -> &str;

    /// Run a statement of any kind
    fn execute(&mut self, sql: &str) -> SqidemResult<StatementResult>;

    /// Produce the plan of a query, one plan line per row in the first column
    fn explain(&mut self, sql: &str) -> SqidemResult<ResultSet>;

    /// Produce column metadata of a query without running it
    fn describe(&mut self, sql: &str) -> SqidemResult<Vec<ColumnMeta>>;

    /// Release the connection
    fn close(&mut self) -> SqidemResult<()> {
        Ok(())
    }

    /// Run a statement that must return rows
    fn query(&mut self, sql: &str) -> SqidemResult<ResultSet> {
        match self.execute(sql)? {
            StatementResult::Rows(rows) => Ok(rows),
            StatementResult::Count(_) => Err(SqidemError::InvalidSqlQuery(
                "Statement did not return a result set".to_string(),
            )),
        }
    }

    /// Run a statement that must not return rows; returns the modified row count
    fn execute_update(&mut self, sql: &str) -> SqidemResult<u64> {
        match self.execute(sql)? {
            StatementResult::Count(count) => Ok(count),
            StatementResult::Rows(_) => Err(SqidemError::InvalidSqlQuery(
                "Statement returned a result set; expected an update count".to_string(),
            )),
        }
    }
}

/// Source of named connections
pub trait ConnectionFactory {
    /// Open a connection to the database called `name`
    ///
    /// When `reference` is true the caller wants the reference database used by
    /// `!verify`. Returns `Ok(None)` when this factory does not know the name.
    fn connect(&self, name: &str, reference: bool) -> SqidemResult<Option<Box<dyn Connection>>>;
}

/// Tries several factories in order; the first to return a connection wins
pub struct ChainingConnectionFactory {
    factories: Vec<Box<dyn ConnectionFactory>>,
}

impl ChainingConnectionFactory {
    pub fn new(factories: Vec<Box<dyn ConnectionFactory>>) -> Self {
        ChainingConnectionFactory { factories }
    }
}

impl ConnectionFactory for ChainingConnectionFactory {
    fn connect(&self, name: &str, reference: bool) -> SqidemResult<Option<Box<dyn Connection>>> {
        for factory in &self.factories {
            if let Some(connection) = factory.connect(name, reference)? {
                return Ok(Some(connection));
            }
        }
        Ok(None)
    }
}

/// Terminal factory that knows no databases
///
/// An unknown primary database is an error; an unknown reference database is
/// not, because most databases simply have no reference.
pub struct UnsupportedConnectionFactory;

impl ConnectionFactory for UnsupportedConnectionFactory {
    fn connect(&self, name: &str, reference: bool) -> SqidemResult<Option<Box<dyn Connection>>> {
        if reference {
            debug!("No reference connection for database '{}'", name);
            Ok(None)
        } else {
            Err(SqidemError::UnknownDatabase(name.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result_set::JdbcType;

    struct FixedConnection {
        name: String,
    }

    impl Connection for FixedConnection {
        fn name(&self) -> &str {
            &self.name
        }

        fn execute(&mut self, sql: &str) -> SqidemResult<StatementResult> {
            if sql.starts_with("select") {
                let mut rs = ResultSet::new(vec![ColumnMeta::new("X", JdbcType::Integer)]);
                rs.push_row(vec![Some("1".to_string())])?;
                Ok(StatementResult::Rows(rs))
            } else {
                Ok(StatementResult::Count(3))
            }
        }

        fn explain(&mut self, _sql: &str) -> SqidemResult<ResultSet> {
            Ok(ResultSet::default())
        }

        fn describe(&mut self, _sql: &str) -> SqidemResult<Vec<ColumnMeta>> {
            Ok(Vec::new())
        }
    }

    struct NamedFactory(&'static str);

    impl ConnectionFactory for NamedFactory {
        fn connect(&self, name: &str, _reference: bool) -> SqidemResult<Option<Box<dyn Connection>>> {
            if name == self.0 {
                Ok(Some(Box::new(FixedConnection {
                    name: format!("{}@{}", name, self.0),
                })))
            } else {
                Ok(None)
            }
        }
    }

    #[test]
    fn test_query_and_update_flavors() {
        let mut conn = FixedConnection {
            name: "t".to_string(),
        };
        assert_eq!(conn.query("select 1").unwrap().row_count(), 1);
        assert!(conn.query("delete from t").is_err());
        assert_eq!(conn.execute_update("delete from t").unwrap(), 3);
        assert!(conn.execute_update("select 1").is_err());
    }

    #[test]
    fn test_chain_first_match_wins() {
        let chain = ChainingConnectionFactory::new(vec![
            Box::new(NamedFactory("a")),
            Box::new(NamedFactory("b")),
        ]);
        let conn = chain.connect("b", false).unwrap().unwrap();
        assert_eq!(conn.name(), "b@b");
        assert!(chain.connect("c", false).unwrap().is_none());
    }

    #[test]
    fn test_terminal_factory() {
        let terminal = UnsupportedConnectionFactory;
        assert!(matches!(
            terminal.connect("nope", false),
            Err(SqidemError::UnknownDatabase(name)) if name == "nope"
        ));
        assert!(terminal.connect("nope", true).unwrap().is_none());
    }
}
