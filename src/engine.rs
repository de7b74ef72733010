//! Script execution engine for sqidem
//!
//! The [`Engine`] parses a whole script, then walks the command tree with a
//! [`Context`] that carries the output stream and the per-run
//! [`EngineState`]. Result directives compare live output against the
//! expected output written in the script and write a reconciled version, so a
//! script that still passes comes out unchanged.
//!
//! # Program Flow
//!
//! 1. Parse the script into a [`Command`] tree (parse errors abort the run)
//! 2. Execute the tree; recoverable failures are reported inline
//! 3. Close every connection that was opened, whatever the outcome

use std::error::Error as StdError;
use std::io::{BufRead, Write};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::command::{Command, SqlCommand};
use crate::config::RunConfig;
use crate::connection::{Connection, ConnectionFactory, UnsupportedConnectionFactory};
use crate::env::Env;
use crate::error::{SqidemError, SqidemResult};
use crate::format::{FormattedResult, OutputFormat};
use crate::handlers::{CommandHandler, HandlerChain};
use crate::parser::Parser;
use crate::property::{PropertyStacks, PropertyValue, OUTPUT_FORMAT};

/// Mutable state of one script run
pub struct EngineState {
    /// Connection used by result directives
    pub connection: Option<Box<dyn Connection>>,
    /// Connection used by `!verify`
    pub reference: Option<Box<dyn Connection>>,
    /// Name passed to the last successful `!use`
    pub database: Option<String>,
    /// The statement result directives refer to
    pub statement: Option<SqlCommand>,
    /// Cleared by `!skip`
    pub execute: bool,
    /// Set by `!skip`; once set, conditions are no longer evaluated
    pub skip: bool,
    pub properties: PropertyStacks,
    /// Output format in effect
    pub format: OutputFormat,
}

impl EngineState {
    fn new(format: OutputFormat) -> Self {
        EngineState {
            connection: None,
            reference: None,
            database: None,
            statement: None,
            execute: true,
            skip: false,
            properties: PropertyStacks::new(),
            format,
        }
    }
}

/// Everything a command needs while it executes
pub struct Context<'a> {
    out: &'a mut dyn Write,
    config: &'a RunConfig,
    factory: &'a dyn ConnectionFactory,
    env: &'a Env,
    state: EngineState,
}

impl<'a> Context<'a> {
    pub fn new(
        out: &'a mut dyn Write,
        config: &'a RunConfig,
        factory: &'a dyn ConnectionFactory,
        env: &'a Env,
    ) -> Self {
        let mut context = Context {
            out,
            config,
            factory,
            env,
            state: EngineState::new(config.default_format()),
        };
        context.property_changed(OUTPUT_FORMAT);
        context
    }

    pub fn config(&self) -> &RunConfig {
        self.config
    }

    pub fn env(&self) -> &Env {
        self.env
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut EngineState {
        &mut self.state
    }

    pub fn format(&self) -> OutputFormat {
        self.state.format
    }

    pub fn write_line(&mut self, line: &str) -> SqidemResult<()> {
        writeln!(self.out, "{}", line).map_err(SqidemError::Output)
    }

    pub fn write_lines<S: AsRef<str>>(&mut self, lines: &[S]) -> SqidemResult<()> {
        for line in lines {
            self.write_line(line.as_ref())?;
        }
        Ok(())
    }

    /// Write the report of a failed command
    pub fn write_error_report(&mut self, description: &str, err: &SqidemError) -> SqidemResult<()> {
        let mut lines = vec![format!("> Error while executing command {}", description)];
        lines.extend(
            render_trace(err, self.config.stack_limit())
                .into_iter()
                .map(|line| format!("> {}", line)),
        );
        self.write_lines(&lines)
    }

    pub fn flush(&mut self) -> SqidemResult<()> {
        self.out.flush().map_err(SqidemError::Output)
    }

    /// The statement result directives refer to
    pub fn statement(&self) -> SqidemResult<&SqlCommand> {
        self.state
            .statement
            .as_ref()
            .ok_or_else(|| SqidemError::IllegalState("No current SQL statement".to_string()))
    }

    pub fn set_statement(&mut self, statement: SqlCommand) {
        self.state.statement = Some(statement);
    }

    /// The primary connection
    pub fn connection(&mut self) -> SqidemResult<&mut Box<dyn Connection>> {
        self.state.connection.as_mut().ok_or(SqidemError::NoConnection)
    }

    /// The reference connection of the current database
    pub fn reference_connection(&mut self) -> SqidemResult<&mut Box<dyn Connection>> {
        let database = self.state.database.clone().unwrap_or_default();
        self.state
            .reference
            .as_mut()
            .ok_or(SqidemError::NoReferenceConnection(database))
    }

    /// Switch to another database, closing the current connections first
    pub fn use_database(&mut self, name: &str) -> SqidemResult<()> {
        self.close_connections();
        info!("Using database '{}'", name);

        let connection = self
            .factory
            .connect(name, false)?
            .ok_or_else(|| SqidemError::UnknownDatabase(name.to_string()))?;
        let reference = self.factory.connect(name, true)?;
        if reference.is_some() {
            debug!("Reference connection available for '{}'", name);
        }

        self.state.connection = Some(connection);
        self.state.reference = reference;
        self.state.database = Some(name.to_string());
        Ok(())
    }

    /// Close all open connections; failures are logged and otherwise ignored
    pub fn close_connections(&mut self) {
        for connection in [self.state.connection.take(), self.state.reference.take()]
            .into_iter()
            .flatten()
        {
            let mut connection = connection;
            if let Err(err) = connection.close() {
                warn!("Error closing connection '{}': {}", connection.name(), err);
            }
        }
        self.state.database = None;
    }

    pub fn properties_mut(&mut self) -> &mut PropertyStacks {
        &mut self.state.properties
    }

    /// Effective value of a property
    ///
    /// An unset `outputformat` reports the configured default format.
    pub fn property(&self, name: &str) -> PropertyValue {
        match self.state.properties.current(name, self.env) {
            PropertyValue::Null if name == OUTPUT_FORMAT => {
                PropertyValue::Format(self.config.default_format())
            }
            value => value,
        }
    }

    /// React to a property whose effective value may have changed
    pub fn property_changed(&mut self, name: &str) {
        let value = self.property(name);
        debug!("Property '{}' is now {}", name, value);
        if name == OUTPUT_FORMAT {
            self.state.format = match value {
                PropertyValue::Format(format) => format,
                _ => self.config.default_format(),
            };
        }
    }
}

/// Runs scripts
///
/// An engine is configured once and may run any number of scripts; each run
/// gets fresh [`EngineState`].
pub struct Engine {
    config: RunConfig,
    factory: Box<dyn ConnectionFactory>,
    handlers: HandlerChain,
    env: Env,
}

impl Engine {
    /// Create an engine that knows no databases
    pub fn new(config: RunConfig) -> Self {
        Engine {
            config,
            factory: Box::new(UnsupportedConnectionFactory),
            handlers: HandlerChain::new(),
            env: Env::new(),
        }
    }

    pub fn with_connection_factory(mut self, factory: Box<dyn ConnectionFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Add a handler for extension directives; handlers are tried in order
    pub fn with_handler(mut self, handler: Box<dyn CommandHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn with_env(mut self, env: Env) -> Self {
        self.env = env;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Parse a script into its command tree without executing it
    pub fn parse<R: BufRead>(&self, input: R) -> SqidemResult<Command> {
        Parser::new(input, &self.handlers).parse()
    }

    /// Run a script, writing the rewritten script to `output`
    ///
    /// # Returns
    /// * `Ok(())` when the run completed, even if some commands failed
    /// * `Err` for parse errors and fatal execution errors
    pub fn execute<R: BufRead, W: Write>(&self, input: R, mut output: W) -> SqidemResult<()> {
        let script = self.parse(input)?;
        info!("Executing script");

        let mut context = Context::new(&mut output, &self.config, self.factory.as_ref(), &self.env);
        let result = script.execute(&mut context, true);
        context.close_connections();
        let flushed = context.flush();

        match result {
            Ok(()) => {
                flushed?;
                info!("Script complete");
                Ok(())
            }
            Err(err) => {
                warn!("Script aborted: {}", err);
                Err(err)
            }
        }
    }

    /// Run a script held in memory and return the rewritten text
    pub fn execute_str(&self, script: &str) -> SqidemResult<String> {
        let mut output = Vec::new();
        self.execute(script.as_bytes(), &mut output)?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }
}

fn same_line(a: &str, b: &str) -> bool {
    a.trim_end_matches('\r') == b.trim_end_matches('\r')
}

/// Merge actual output into the expected output of a result directive
///
/// The expected lines lose as many leading lines as the actual header has and
/// as many trailing lines as the actual footer has; what is left is matched
/// against the actual body. With `sort` set a matching line may come from
/// anywhere in the actual body, so rows keep the order the script already has;
/// without it only the next actual line can match. Unmatched actual lines
/// follow in their own order, then the actual footer.
pub fn reconcile(expected: &[String], actual: &FormattedResult, sort: bool) -> Vec<String> {
    let header = actual.header.len().min(expected.len());
    let footer = actual.footer.len().min(expected.len() - header);
    let expected_body = &expected[header..expected.len() - footer];

    let mut pool: Vec<&String> = actual.body.iter().collect();
    let mut out = actual.header.clone();
    for line in expected_body {
        let found = if sort {
            pool.iter().position(|candidate| same_line(candidate, line))
        } else {
            pool.first()
                .filter(|candidate| same_line(candidate, line))
                .map(|_| 0)
        };
        if let Some(index) = found {
            out.push(pool.remove(index).clone());
        }
    }
    out.extend(pool.into_iter().cloned());
    out.extend(actual.footer.iter().cloned());
    out
}

fn order_by_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\border\s+by\b").expect("valid ORDER BY regex"))
}

/// Guess whether a statement returns rows in a defined order
///
/// True when the statement has an `ORDER BY` whose last occurrence is not
/// followed by more `)` than `(`; a surplus of closing parentheses means the
/// clause sits inside a subquery or window. This is textual, not SQL-aware.
pub fn is_probably_deterministic(sql: &str) -> bool {
    match order_by_regex().find_iter(sql).last() {
        None => false,
        Some(found) => {
            let tail = &sql[found.end()..];
            let closes = tail.matches(')').count();
            let opens = tail.matches('(').count();
            closes <= opens
        }
    }
}

/// Render an error and its causes as report lines
///
/// Causes whose message is already part of the text are left out. Text over
/// `limit` characters is cut and followed by a `...` line.
pub fn render_trace(err: &dyn StdError, limit: usize) -> Vec<String> {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let message = cause.to_string();
        if !text.contains(&message) {
            text.push_str("\nCaused by: ");
            text.push_str(&message);
        }
        source = cause.source();
    }

    if text.chars().count() <= limit {
        return text.lines().map(str::to_string).collect();
    }
    let cut: String = text.chars().take(limit).collect();
    let mut lines: Vec<String> = cut.lines().map(str::to_string).collect();
    lines.push("...".to_string());
    lines
}
