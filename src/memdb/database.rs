//! Database module for the in-memory database
//!
//! A database owns its tables. Table names are case-insensitive, as SQL
//! identifiers are.

use std::collections::BTreeMap;

use crate::error::{SqidemError, SqidemResult};
use crate::memdb::table::Table;

/// Central container for all tables of one named database
#[derive(Debug, Clone, Default)]
pub struct Database {
    /// Tables keyed by lowercase name
    tables: BTreeMap<String, Table>,
}

impl Database {
    pub fn new() -> Self {
        Database::default()
    }

    /// Add a table to the database
    ///
    /// # Returns
    /// * `Ok(())` if the table was added
    /// * `Err(SqidemError::TableAlreadyExists)` if the name is taken
    pub fn add_table(&mut self, table: Table) -> SqidemResult<()> {
        let key = table.name().to_lowercase();
        if self.tables.contains_key(&key) {
            return Err(SqidemError::TableAlreadyExists(table.name().to_string()));
        }
        self.tables.insert(key, table);
        Ok(())
    }

    pub fn get_table(&self, name: &str) -> SqidemResult<&Table> {
        self.tables
            .get(&name.to_lowercase())
            .ok_or_else(|| SqidemError::TableNotFound(name.to_string()))
    }

    pub fn get_table_mut(&mut self, name: &str) -> SqidemResult<&mut Table> {
        self.tables
            .get_mut(&name.to_lowercase())
            .ok_or_else(|| SqidemError::TableNotFound(name.to_string()))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(&name.to_lowercase())
    }

    /// Remove a table from the database
    pub fn remove_table(&mut self, name: &str) -> SqidemResult<Table> {
        self.tables
            .remove(&name.to_lowercase())
            .ok_or_else(|| SqidemError::TableNotFound(name.to_string()))
    }

    /// Names of all tables, sorted
    pub fn table_names(&self) -> Vec<String> {
        self.tables.values().map(|t| t.name().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memdb::table::Column;
    use crate::result_set::JdbcType;

    #[test]
    fn test_names_are_case_insensitive() {
        let mut db = Database::new();
        db.add_table(Table::new("Emp", vec![Column::new("id", JdbcType::Integer)]))
            .unwrap();
        assert!(db.has_table("EMP"));
        assert_eq!(db.get_table("emp").unwrap().name(), "Emp");
        assert!(matches!(
            db.add_table(Table::new("EMP", Vec::new())),
            Err(SqidemError::TableAlreadyExists(_))
        ));
        db.remove_table("emp").unwrap();
        assert!(matches!(
            db.get_table("emp"),
            Err(SqidemError::TableNotFound(name)) if name == "emp"
        ));
        assert!(db.table_names().is_empty());
    }
}
