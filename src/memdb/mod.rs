//! Built-in in-memory SQL database
//!
//! Serves named databases to the engine and the recorder through
//! [`MemoryConnectionFactory`]. Each database is described by a
//! [`DatabaseSpec`]: its name, the CSV files that populate it and whether it
//! also serves a reference connection for `!verify`.
//!
//! Population is lazy. The first connect to a database loads its CSV files
//! while holding that database's population lock; the lock guard covers only
//! the check-and-load step and is released on every path. A failed load is
//! reported to the caller that triggered it and is not retried.
//!
//! Connections to the same database share its data, so changes made through
//! one are visible through the next. The reference database is a separate
//! instance loaded from the same files.

pub mod aggregate;
pub mod csv_loader;
pub mod database;
pub mod executor;
pub mod table;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use crate::connection::{Connection, ConnectionFactory, StatementResult};
use crate::error::{SqidemError, SqidemResult};
use crate::result_set::{ColumnMeta, JdbcType, ResultSet};

use self::database::Database;
use self::executor::SqlExecutor;

/// Label of the single column of `explain` results
pub const PLAN_COLUMN: &str = "PLAN";

/// Declaration of one named in-memory database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSpec {
    name: String,
    /// `[table=]file.csv` specifications loaded on first connect
    tables: Vec<String>,
    reference: bool,
}

impl DatabaseSpec {
    pub fn new(name: &str) -> Self {
        DatabaseSpec {
            name: name.to_string(),
            tables: Vec::new(),
            reference: false,
        }
    }

    /// Add a CSV file to load, as `[table=]file.csv`
    pub fn add_table(&mut self, file_spec: &str) {
        self.tables.push(file_spec.to_string());
    }

    pub fn with_table(mut self, file_spec: &str) -> Self {
        self.add_table(file_spec);
        self
    }

    /// Also serve a reference connection
    pub fn with_reference(mut self, reference: bool) -> Self {
        self.reference = reference;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub fn reference(&self) -> bool {
        self.reference
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> SqidemResult<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| SqidemError::IllegalState(format!("{} lock poisoned", what)))
}

/// One populated-on-demand copy of a database
struct Instance {
    /// Whether population has been attempted
    attempted: Mutex<bool>,
    data: Arc<Mutex<Database>>,
}

impl Instance {
    fn new() -> Self {
        Instance {
            attempted: Mutex::new(false),
            data: Arc::new(Mutex::new(Database::new())),
        }
    }

    fn ensure_populated(&self, spec: &DatabaseSpec) -> SqidemResult<()> {
        let mut attempted = lock(&self.attempted, "population")?;
        if *attempted {
            return Ok(());
        }
        *attempted = true;
        let mut data = lock(&self.data, "database")?;
        for file_spec in &spec.tables {
            csv_loader::load_csv(&mut data, file_spec)?;
        }
        info!(
            "Populated database '{}' with {} tables",
            spec.name,
            data.table_names().len()
        );
        Ok(())
    }
}

struct Entry {
    spec: DatabaseSpec,
    primary: Instance,
    reference: Instance,
}

/// Connection factory for the built-in database
#[derive(Default)]
pub struct MemoryConnectionFactory {
    databases: HashMap<String, Entry>,
}

impl MemoryConnectionFactory {
    pub fn new() -> Self {
        MemoryConnectionFactory::default()
    }

    /// Register a database; a later spec with the same name replaces it
    pub fn add_database(&mut self, spec: DatabaseSpec) {
        let entry = Entry {
            spec: spec.clone(),
            primary: Instance::new(),
            reference: Instance::new(),
        };
        self.databases.insert(spec.name, entry);
    }

    pub fn with_database(mut self, spec: DatabaseSpec) -> Self {
        self.add_database(spec);
        self
    }
}

impl ConnectionFactory for MemoryConnectionFactory {
    fn connect(&self, name: &str, reference: bool) -> SqidemResult<Option<Box<dyn Connection>>> {
        let entry = match self.databases.get(name) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        if reference && !entry.spec.reference {
            return Ok(None);
        }
        let instance = if reference {
            &entry.reference
        } else {
            &entry.primary
        };
        instance.ensure_populated(&entry.spec)?;
        debug!(
            "Opened {} connection to in-memory database '{}'",
            if reference { "reference" } else { "primary" },
            name
        );
        Ok(Some(Box::new(MemoryConnection {
            name: name.to_string(),
            data: Arc::clone(&instance.data),
        })))
    }
}

/// Connection to an in-memory database
pub struct MemoryConnection {
    name: String,
    data: Arc<Mutex<Database>>,
}

impl MemoryConnection {
    /// Connection to a private, initially empty database
    pub fn standalone(name: &str) -> Self {
        MemoryConnection {
            name: name.to_string(),
            data: Arc::new(Mutex::new(Database::new())),
        }
    }
}

impl Connection for MemoryConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self, sql: &str) -> SqidemResult<StatementResult> {
        let mut data = lock(&self.data, "database")?;
        SqlExecutor::new(&mut data).execute(sql)
    }

    fn query(&mut self, sql: &str) -> SqidemResult<ResultSet> {
        let mut data = lock(&self.data, "database")?;
        SqlExecutor::new(&mut data).query(sql)
    }

    fn explain(&mut self, sql: &str) -> SqidemResult<ResultSet> {
        let mut data = lock(&self.data, "database")?;
        let lines = SqlExecutor::new(&mut data).explain(sql)?;
        let mut result = ResultSet::new(vec![ColumnMeta::new(PLAN_COLUMN, JdbcType::Varchar)
            .with_nullable(false)]);
        for line in lines {
            result.push_row(vec![Some(line)])?;
        }
        Ok(result)
    }

    fn describe(&mut self, sql: &str) -> SqidemResult<Vec<ColumnMeta>> {
        let mut data = lock(&self.data, "database")?;
        SqlExecutor::new(&mut data).describe(sql)
    }
}
