//! Command model for sqidem
//!
//! A parsed script is a tree of [`Command`] values. Each variant holds only
//! the literal data the parser found plus the exact source lines it was built
//! from, so that a command executed with execution disabled writes its input
//! back unchanged.
//!
//! Execution state lives in the [`Context`] passed to
//! [`Command::execute`]; commands themselves are immutable.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::engine::{reconcile, render_trace, Context};
use crate::error::{SqidemError, SqidemResult};
use crate::format::{format_result, FormattedResult};
use crate::property::PropertyValue;

/// Blank lines and `#` lines, echoed as-is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentCommand {
    pub lines: Vec<String>,
}

/// `!use <database>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseCommand {
    pub line: String,
    pub name: String,
}

/// A SQL statement, the implicit subject of the result directives that follow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlCommand {
    /// Source lines including the terminating `;`
    pub lines: Vec<String>,
    /// Statement text without the terminator
    pub sql: String,
    /// Row order is not guaranteed, so rows may be matched in any order
    pub sort: bool,
}

/// How a [`CheckCommand`] judges the current statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMode {
    /// `!ok`: run the query and substitute its output
    Ok,
    /// `!verify`: compare against the reference database
    Verify,
    /// `!error`: the statement must fail
    Error,
    /// `!update`: run as DML and report the modified row count
    Update,
}

impl CheckMode {
    pub fn keyword(&self) -> &'static str {
        match self {
            CheckMode::Ok => "ok",
            CheckMode::Verify => "verify",
            CheckMode::Error => "error",
            CheckMode::Update => "update",
        }
    }
}

/// A result directive with the expected output written above it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckCommand {
    pub content: Vec<String>,
    pub line: String,
    pub mode: CheckMode,
}

/// `!plan`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplainCommand {
    pub content: Vec<String>,
    pub line: String,
}

/// `!type`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeCommand {
    pub content: Vec<String>,
    pub line: String,
}

/// `!set`, `!push` or `!pop`; `value` is `None` for pop
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyCommand {
    pub line: String,
    pub name: String,
    pub value: Option<PropertyValue>,
}

/// `!show <name>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShowCommand {
    pub content: Vec<String>,
    pub line: String,
    pub name: String,
}

/// `!if (path) {` ... `!}`
#[derive(Debug)]
pub struct IfCommand {
    pub line: String,
    pub path: String,
    pub body: Vec<Command>,
    pub close: String,
}

/// `!skip`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipCommand {
    pub line: String,
}

/// A command contributed by a [`crate::handlers::CommandHandler`]
pub trait CustomCommand: fmt::Debug {
    /// Short label used in error reports
    fn describe(&self) -> String;

    /// The source lines the command was parsed from, in order
    fn source_lines(&self) -> Vec<String>;

    /// Run the command, or only echo its source when `enabled` is false
    fn execute(&self, context: &mut Context<'_>, enabled: bool) -> SqidemResult<()>;
}

/// One node of a parsed script
#[derive(Debug)]
pub enum Command {
    Comment(CommentCommand),
    Use(UseCommand),
    Sql(SqlCommand),
    Check(CheckCommand),
    Explain(ExplainCommand),
    Type(TypeCommand),
    Set(PropertyCommand),
    Push(PropertyCommand),
    Pop(PropertyCommand),
    Show(ShowCommand),
    If(IfCommand),
    Skip(SkipCommand),
    Composite(Vec<Command>),
    Custom(Box<dyn CustomCommand>),
}

impl Command {
    /// Label for error banners, naming the statement the command works on
    pub fn describe(&self, context: &Context<'_>) -> String {
        let sql = context
            .statement()
            .map(|s| s.sql.clone())
            .unwrap_or_default();
        match self {
            Command::Comment(_) => "comment".to_string(),
            Command::Use(c) => format!("use [database: {}]", c.name),
            Command::Sql(c) => format!("sql [sql: {}]", c.sql),
            Command::Check(c) => format!("{} [sql: {}]", c.mode.keyword(), sql),
            Command::Explain(_) => format!("plan [sql: {}]", sql),
            Command::Type(_) => format!("type [sql: {}]", sql),
            Command::Set(c) => format!("set [property: {}]", c.name),
            Command::Push(c) => format!("push [property: {}]", c.name),
            Command::Pop(c) => format!("pop [property: {}]", c.name),
            Command::Show(c) => format!("show [property: {}]", c.name),
            Command::If(c) => format!("if [path: {}]", c.path),
            Command::Skip(_) => "skip".to_string(),
            Command::Composite(children) => format!("composite [{} commands]", children.len()),
            Command::Custom(c) => c.describe(),
        }
    }

    /// Whether the command contains other commands
    pub fn is_block(&self) -> bool {
        matches!(self, Command::If(_) | Command::Composite(_))
    }

    /// The exact source text of the command, block bodies included
    pub fn source_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        self.collect_source(&mut lines);
        lines
    }

    fn collect_source(&self, out: &mut Vec<String>) {
        match self {
            Command::Comment(c) => out.extend(c.lines.iter().cloned()),
            Command::Use(c) => out.push(c.line.clone()),
            Command::Sql(c) => out.extend(c.lines.iter().cloned()),
            Command::Check(c) => {
                out.extend(c.content.iter().cloned());
                out.push(c.line.clone());
            }
            Command::Explain(c) => {
                out.extend(c.content.iter().cloned());
                out.push(c.line.clone());
            }
            Command::Type(c) => {
                out.extend(c.content.iter().cloned());
                out.push(c.line.clone());
            }
            Command::Set(c) | Command::Push(c) | Command::Pop(c) => out.push(c.line.clone()),
            Command::Show(c) => {
                out.extend(c.content.iter().cloned());
                out.push(c.line.clone());
            }
            Command::If(c) => {
                out.push(c.line.clone());
                for child in &c.body {
                    child.collect_source(out);
                }
                out.push(c.close.clone());
            }
            Command::Skip(c) => out.push(c.line.clone()),
            Command::Composite(children) => {
                for child in children {
                    child.collect_source(out);
                }
            }
            Command::Custom(c) => out.extend(c.source_lines()),
        }
    }

    /// Run the command against the context
    ///
    /// With `enabled` false the command only echoes its source lines; the
    /// exceptions are [`Command::Sql`], which always becomes the current
    /// statement, and blocks, which pass the flag on to their children.
    pub fn execute(&self, context: &mut Context<'_>, enabled: bool) -> SqidemResult<()> {
        match self {
            Command::Comment(c) => context.write_lines(&c.lines),
            Command::Use(c) => {
                if enabled {
                    context.use_database(&c.name)?;
                }
                context.write_line(&c.line)
            }
            Command::Sql(c) => {
                context.set_statement(c.clone());
                context.write_lines(&c.lines)
            }
            Command::Check(c) => execute_check(c, context, enabled),
            Command::Explain(c) => {
                if !enabled {
                    return echo(context, &c.content, &c.line);
                }
                let sql = context.statement()?.sql.clone();
                let plan = context.connection()?.explain(&sql)?;
                let lines: Vec<String> = plan
                    .rows()
                    .iter()
                    .filter_map(|row| row.first().cloned().flatten())
                    .flat_map(|text| text.lines().map(str::to_string).collect::<Vec<_>>())
                    .collect();
                echo(context, &lines, &c.line)
            }
            Command::Type(c) => {
                if !enabled {
                    return echo(context, &c.content, &c.line);
                }
                let sql = context.statement()?.sql.clone();
                let columns = context.connection()?.describe(&sql)?;
                let lines: Vec<String> = columns
                    .iter()
                    .map(|column| {
                        let mut text = format!("{} {}", column.label, column.jdbc_type);
                        if column.precision > 0 {
                            text.push_str(&format!("({})", column.precision));
                        }
                        if !column.nullable {
                            text.push_str(" NOT NULL");
                        }
                        text
                    })
                    .collect();
                echo(context, &lines, &c.line)
            }
            Command::Set(c) => {
                if enabled {
                    let value = c.value.clone().unwrap_or(PropertyValue::Null);
                    context.properties_mut().set(&c.name, value);
                    context.property_changed(&c.name);
                }
                context.write_line(&c.line)
            }
            Command::Push(c) => {
                if enabled {
                    let value = c.value.clone().unwrap_or(PropertyValue::Null);
                    context.properties_mut().push(&c.name, value);
                    context.property_changed(&c.name);
                }
                context.write_line(&c.line)
            }
            Command::Pop(c) => {
                context.write_line(&c.line)?;
                if !enabled {
                    return Ok(());
                }
                match context.properties_mut().pop(&c.name) {
                    Some(_) => {
                        context.property_changed(&c.name);
                        Ok(())
                    }
                    None => {
                        warn!("Cannot pop property '{}': stack is empty", c.name);
                        context.write_line(&format!(
                            "> Error: cannot pop property '{}': stack is empty",
                            c.name
                        ))
                    }
                }
            }
            Command::Show(c) => {
                if !enabled {
                    return echo(context, &c.content, &c.line);
                }
                let value = context.property(&c.name);
                echo(context, &[format!("{} {}", c.name, value)], &c.line)
            }
            Command::If(c) => {
                context.write_line(&c.line)?;
                let body_enabled = if context.state().skip {
                    enabled
                } else {
                    enabled && context.env().resolve(&c.path)
                };
                debug!("if ({}) evaluates to {}", c.path, body_enabled);
                execute_block(&c.body, context, body_enabled)?;
                context.write_line(&c.close)
            }
            Command::Skip(c) => {
                if enabled {
                    debug!("Skipping the rest of the script");
                    let state = context.state_mut();
                    state.skip = true;
                    state.execute = false;
                }
                context.write_line(&c.line)
            }
            Command::Composite(children) => execute_block(children, context, enabled),
            Command::Custom(c) => c.execute(context, enabled),
        }
    }
}

/// Run commands in order, isolating recoverable failures
///
/// Each child runs with `enabled && state.execute`. When a child fails with a
/// recoverable error it is run again with execution disabled, so its source
/// is echoed, and an error report follows it. A panic inside a child counts
/// as a recoverable failure. Fatal errors are reported and returned; blocks
/// leave the report to the failing leaf.
pub fn execute_block(
    children: &[Command],
    context: &mut Context<'_>,
    enabled: bool,
) -> SqidemResult<()> {
    for child in children {
        let child_enabled = enabled && context.state().execute;
        let err = match run_isolated(child, context, child_enabled) {
            Ok(()) => continue,
            Err(err) => err,
        };

        let description = child.describe(context);
        if err.is_fatal() {
            if !child.is_block() {
                if let Err(write_err) = context.write_error_report(&description, &err) {
                    warn!("Failed to report fatal error: {}", write_err);
                }
            }
            return Err(err);
        }

        warn!("Error while executing command {}: {}", description, err);
        run_isolated(child, context, false)?;
        context.write_error_report(&description, &err)?;
    }
    Ok(())
}

fn run_isolated(child: &Command, context: &mut Context<'_>, enabled: bool) -> SqidemResult<()> {
    match panic::catch_unwind(AssertUnwindSafe(|| child.execute(context, enabled))) {
        Ok(result) => result,
        Err(payload) => Err(SqidemError::AssertionFailed(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "command panicked".to_string())
}

fn echo(context: &mut Context<'_>, content: &[String], line: &str) -> SqidemResult<()> {
    context.write_lines(content)?;
    context.write_line(line)
}

fn execute_check(
    command: &CheckCommand,
    context: &mut Context<'_>,
    enabled: bool,
) -> SqidemResult<()> {
    if !enabled {
        return echo(context, &command.content, &command.line);
    }
    let statement = context.statement()?.clone();
    let lines = match command.mode {
        CheckMode::Ok => {
            let format = context.format();
            let result = context.connection()?.query(&statement.sql)?;
            let actual = format_result(&result, format, statement.sort);
            reconcile(&command.content, &actual, statement.sort)
        }
        CheckMode::Update => {
            let count = context.connection()?.execute_update(&statement.sql)?;
            let actual = FormattedResult {
                header: Vec::new(),
                body: vec![modified_phrase(count)],
                footer: vec![String::new()],
            };
            reconcile(&command.content, &actual, statement.sort)
        }
        CheckMode::Verify => {
            verify(context, &statement.sql, statement.sort)?;
            command.content.clone()
        }
        CheckMode::Error => check_error(context, &command.content, &statement.sql)?,
    };
    echo(context, &lines, &command.line)
}

fn modified_phrase(count: u64) -> String {
    if count == 1 {
        "(1 row modified)".to_string()
    } else {
        format!("({} rows modified)", count)
    }
}

fn verify(context: &mut Context<'_>, sql: &str, sort: bool) -> SqidemResult<()> {
    let format = context.format();
    let actual = context.connection()?.query(sql)?;
    let expected = context.reference_connection()?.query(sql)?;
    let actual = format_result(&actual, format, sort).lines();
    let expected = format_result(&expected, format, sort).lines();
    if actual != expected {
        return Err(SqidemError::CheckFailed(format!(
            "Reference query returned different results.\nexpected:\n{}\nactual:\n{}",
            expected.join("\n"),
            actual.join("\n")
        )));
    }
    Ok(())
}

fn check_error(
    context: &mut Context<'_>,
    content: &[String],
    sql: &str,
) -> SqidemResult<Vec<String>> {
    let err = match context.connection()?.execute(sql) {
        Ok(_) => return Ok(vec!["Expected error, but none occurred".to_string()]),
        Err(err) => err,
    };
    debug!("Statement failed as expected: {}", err);

    let trace = render_trace(&err, context.config().stack_limit());
    let expected = normalize_error_text(&content.join("\n"));
    let actual = normalize_error_text(&trace.join("\n"));
    if !expected.is_empty() && actual.contains(&expected) {
        return Ok(content.to_vec());
    }
    Ok(trace
        .into_iter()
        .map(|line| {
            if line.starts_with('!') {
                format!(" {}", line)
            } else {
                line
            }
        })
        .collect())
}

/// Normalize error text for containment checks
///
/// Line endings become `\n`, every line is trimmed with inner whitespace runs
/// collapsed to one space, and blank lines are dropped.
pub fn normalize_error_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_error_text() {
        assert_eq!(
            normalize_error_text("  Table 'x'\r\n\r\n   not   found  \n"),
            "Table 'x'\nnot found"
        );
        assert_eq!(normalize_error_text(" \n\t\n"), "");
    }

    #[test]
    fn test_error_matching_ignores_layout() {
        let actual = normalize_error_text(
            "java.sql.SQLException: user\r\n   lacks privilege\r\n  at Foo.bar(Foo.java:10)",
        );
        assert!(actual.contains(&normalize_error_text("lacks privilege")));
        assert!(actual.contains(&normalize_error_text("  user\nlacks   privilege ")));
    }

    #[test]
    fn test_modified_phrase() {
        assert_eq!(modified_phrase(0), "(0 rows modified)");
        assert_eq!(modified_phrase(1), "(1 row modified)");
        assert_eq!(modified_phrase(5), "(5 rows modified)");
    }

    #[test]
    fn test_source_lines_of_if_block() {
        let command = Command::If(IfCommand {
            line: "!if (false) {".to_string(),
            path: "false".to_string(),
            body: vec![Command::Comment(CommentCommand {
                lines: vec!["# inside".to_string()],
            })],
            close: "!}".to_string(),
        });
        assert_eq!(
            command.source_lines(),
            vec!["!if (false) {", "# inside", "!}"]
        );
        assert!(command.is_block());
    }
}
