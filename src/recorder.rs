//! Query recorder
//!
//! Records query results to a fixture file and plays them back without a
//! database. The mode is chosen when the recorder is built and never changes:
//!
//! - [`RecorderMode::Record`] runs queries live and, on close, writes every
//!   recorded section to the file, sorted by name.
//! - [`RecorderMode::Play`] loads the file up front and answers queries from
//!   it; a query that was never recorded is an error.
//! - [`RecorderMode::PassThrough`] runs queries live and records nothing.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::connection::ConnectionFactory;
use crate::error::{SqidemError, SqidemResult};
use crate::fixture::{FixtureFile, FixtureSection};
use crate::result_set::ResultSet;

/// How a recorder answers queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderMode {
    Record,
    Play,
    PassThrough,
}

impl RecorderMode {
    fn needs_file(&self) -> bool {
        matches!(self, RecorderMode::Record | RecorderMode::Play)
    }

    fn needs_factory(&self) -> bool {
        matches!(self, RecorderMode::Record | RecorderMode::PassThrough)
    }
}

impl fmt::Display for RecorderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecorderMode::Record => "record",
            RecorderMode::Play => "play",
            RecorderMode::PassThrough => "pass-through",
        };
        f.write_str(name)
    }
}

/// Builder for [`Recorder`]
pub struct RecorderBuilder {
    mode: RecorderMode,
    file: Option<PathBuf>,
    factory: Option<Box<dyn ConnectionFactory>>,
}

impl RecorderBuilder {
    pub fn mode(mut self, mode: RecorderMode) -> Self {
        self.mode = mode;
        self
    }

    /// Fixture file to write (record) or read (play)
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Source of live connections for record and pass-through modes
    pub fn factory(mut self, factory: Box<dyn ConnectionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Validate the settings for the chosen mode and create the recorder
    ///
    /// # Returns
    /// * `Ok(Recorder)` - Ready to answer queries; in play mode the fixture
    ///   file has been read
    /// * `Err(SqidemError::IllegalState)` - If the mode lacks a file or factory
    /// * `Err` - If the fixture file cannot be read or parsed
    pub fn build(self) -> SqidemResult<Recorder> {
        if self.mode.needs_file() && self.file.is_none() {
            return Err(SqidemError::IllegalState(format!(
                "{} mode requires a fixture file",
                self.mode
            )));
        }
        if self.mode.needs_factory() && self.factory.is_none() {
            return Err(SqidemError::IllegalState(format!(
                "{} mode requires a connection factory",
                self.mode
            )));
        }

        let fixtures = match (&self.mode, &self.file) {
            (RecorderMode::Play, Some(path)) => {
                let fixtures = FixtureFile::load(path)?;
                info!(
                    "Loaded {} fixtures from {}",
                    fixtures.len(),
                    path.display()
                );
                fixtures
            }
            _ => FixtureFile::new(),
        };

        debug!("Recorder created in {} mode", self.mode);
        Ok(Recorder {
            mode: self.mode,
            file: self.file,
            factory: self.factory,
            fixtures,
            closed: false,
        })
    }
}

/// Records and replays query results
pub struct Recorder {
    mode: RecorderMode,
    file: Option<PathBuf>,
    factory: Option<Box<dyn ConnectionFactory>>,
    /// Sections recorded so far (record) or loaded from the file (play)
    fixtures: FixtureFile,
    closed: bool,
}

impl Recorder {
    /// Start building a recorder; the mode defaults to pass-through
    pub fn builder() -> RecorderBuilder {
        RecorderBuilder {
            mode: RecorderMode::PassThrough,
            file: None,
            factory: None,
        }
    }

    pub fn mode(&self) -> RecorderMode {
        self.mode
    }

    /// Sections recorded or loaded so far
    pub fn fixtures(&self) -> &FixtureFile {
        &self.fixtures
    }

    /// Run a query, or replay it in play mode
    ///
    /// # Arguments
    /// * `database` - Name of the database to run against
    /// * `name` - Fixture name the result is recorded under
    /// * `sql` - The query
    ///
    /// # Returns
    /// * `Ok(ResultSet)` - The live or replayed result
    /// * `Err(SqidemError::FixtureNotFound)` - In play mode, when the
    ///   database and SQL were never recorded
    pub fn execute_query(&mut self, database: &str, name: &str, sql: &str) -> SqidemResult<ResultSet> {
        if self.closed {
            return Err(SqidemError::IllegalState("recorder is closed".to_string()));
        }
        match self.mode {
            RecorderMode::Play => {
                let section = self.fixtures.find(database, sql).ok_or_else(|| {
                    SqidemError::FixtureNotFound {
                        db: database.to_string(),
                        sql: sql.to_string(),
                    }
                })?;
                debug!("Replaying fixture '{}'", section.name);
                section.to_result_set()
            }
            RecorderMode::Record => {
                let result = self.run_live(database, sql)?;
                self.fixtures
                    .insert(FixtureSection::from_result(name, database, sql, &result));
                debug!("Recorded fixture '{}' ({} rows)", name, result.row_count());
                Ok(result)
            }
            RecorderMode::PassThrough => self.run_live(database, sql),
        }
    }

    fn run_live(&self, database: &str, sql: &str) -> SqidemResult<ResultSet> {
        let factory = self.factory.as_ref().ok_or_else(|| {
            SqidemError::IllegalState(format!("{} mode has no connection factory", self.mode))
        })?;
        let mut connection = factory
            .connect(database, false)?
            .ok_or_else(|| SqidemError::UnknownDatabase(database.to_string()))?;
        let result = connection.query(sql);
        if let Err(e) = connection.close() {
            warn!("Error closing connection to '{}': {}", database, e);
        }
        result
    }

    /// Finish; in record mode this writes the fixture file
    ///
    /// Closing twice is allowed and does nothing the second time.
    pub fn close(&mut self) -> SqidemResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.mode == RecorderMode::Record {
            if let Some(path) = &self.file {
                self.fixtures.save(path)?;
                info!(
                    "Wrote {} fixtures to {}",
                    self.fixtures.len(),
                    path.display()
                );
            }
        }
        Ok(())
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error closing recorder: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memdb::{DatabaseSpec, MemoryConnectionFactory};
    use tempfile::TempDir;

    fn factory() -> Box<dyn ConnectionFactory> {
        Box::new(MemoryConnectionFactory::new().with_database(DatabaseSpec::new("db")))
    }

    #[test]
    fn test_modes_check_their_requirements() {
        let err = Recorder::builder()
            .mode(RecorderMode::Play)
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, SqidemError::IllegalState(_)));
        assert!(Recorder::builder()
            .mode(RecorderMode::Record)
            .factory(factory())
            .build()
            .is_err());
        assert!(Recorder::builder()
            .mode(RecorderMode::Record)
            .file("unused.txt")
            .build()
            .is_err());
        assert!(Recorder::builder().build().is_err());
        assert!(Recorder::builder().factory(factory()).build().is_ok());
    }

    #[test]
    fn test_pass_through_records_nothing() {
        let mut recorder = Recorder::builder().factory(factory()).build().unwrap();
        let result = recorder.execute_query("db", "one", "select 1").unwrap();
        assert_eq!(result.rows(), &[vec![Some("1".to_string())]]);
        assert!(recorder.fixtures().is_empty());
        assert!(matches!(
            recorder.execute_query("other", "x", "select 1"),
            Err(SqidemError::UnknownDatabase(_))
        ));
    }

    #[test]
    fn test_closed_recorder_rejects_queries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.txt");
        let mut recorder = Recorder::builder()
            .mode(RecorderMode::Record)
            .file(&path)
            .factory(factory())
            .build()
            .unwrap();
        recorder.close().unwrap();
        recorder.close().unwrap();
        assert!(path.exists());
        assert!(matches!(
            recorder.execute_query("db", "x", "select 1"),
            Err(SqidemError::IllegalState(_))
        ));
    }
}
