//! Script parser for sqidem
//!
//! Turns script lines into a [`Command`] tree. The grammar is line oriented:
//!
//! - blank lines and lines starting with `#` are comments;
//! - lines starting with `!` are directives (`!ok`, `!use scott`, ...);
//! - anything else starts a SQL statement, which runs until a line ending in `;`.
//!
//! The lines between a statement and the next directive are the expected
//! output of that directive. Expected output also appears without a statement
//! right above it, as in a `!plan` that follows an `!ok`; a run of plain lines
//! that ends at a directive taking content, rather than at a `;`, is content.
//!
//! Lines starting with `>` are error reports written by an earlier run. They
//! are dropped here and written again if the error persists.
//!
//! One [`Parser`] handles the whole script; `!if` blocks are parsed by
//! recursion on the same parser.

use std::io::BufRead;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::command::{
    CheckCommand, CheckMode, Command, CommentCommand, ExplainCommand, IfCommand, PropertyCommand,
    ShowCommand, SkipCommand, SqlCommand, TypeCommand, UseCommand,
};
use crate::engine::is_probably_deterministic;
use crate::error::{SqidemError, SqidemResult};
use crate::handlers::{CommandHandler, HandlerChain};
use crate::property::PropertyValue;
use crate::reader::{logical, LineReader};

/// Outcome of asking the parser for the next command
#[derive(Debug)]
pub enum Parsed {
    Command(Command),
    /// A `!}` line closing the enclosing `!if` block
    EndOfBlock(String),
    EndOfInput,
}

/// Recursive-descent parser over a [`LineReader`]
pub struct Parser<'h, R: BufRead> {
    reader: LineReader<R>,
    handlers: &'h HandlerChain,
    /// Source lines of the most recent SQL statement
    statement: Option<Vec<String>>,
    /// The previous command was a SQL statement, so content comes next
    after_statement: bool,
}

impl<'h, R: BufRead> Parser<'h, R> {
    pub fn new(input: R, handlers: &'h HandlerChain) -> Self {
        Parser {
            reader: LineReader::new(input),
            handlers,
            statement: None,
            after_statement: false,
        }
    }

    /// Line number of the last line consumed
    pub fn line_number(&self) -> usize {
        self.reader.line_number()
    }

    /// Parse the whole script into one composite command
    pub fn parse(mut self) -> SqidemResult<Command> {
        let mut commands = Vec::new();
        loop {
            match self.next_command()? {
                Parsed::Command(command) => commands.push(command),
                Parsed::EndOfInput => return Ok(Command::Composite(commands)),
                Parsed::EndOfBlock(_) => {
                    return Err(SqidemError::Parse {
                        line: self.line_number(),
                        message: "'!}' without a matching '!if'".to_string(),
                    })
                }
            }
        }
    }

    /// Parse the next command at the current nesting level
    pub fn next_command(&mut self) -> SqidemResult<Parsed> {
        if std::mem::take(&mut self.after_statement) {
            return self.parse_content();
        }

        loop {
            let line = match self.reader.next_line()? {
                Some(line) => line,
                None => return Ok(Parsed::EndOfInput),
            };
            let text = logical(&line);

            if text.starts_with('>') {
                debug!("Dropping error report at line {}", self.line_number());
                continue;
            }
            if is_comment(text) {
                return self.parse_comment(line);
            }
            if directive_body(text).is_some() {
                return self.parse_directive(line, Vec::new());
            }
            return self.parse_fresh(line);
        }
    }

    /// Parse the body of an `!if` block up to and including its `!}`
    fn parse_block(&mut self, open_line: usize) -> SqidemResult<(Vec<Command>, String)> {
        let mut commands = Vec::new();
        loop {
            match self.next_command()? {
                Parsed::Command(command) => commands.push(command),
                Parsed::EndOfBlock(close) => return Ok((commands, close)),
                Parsed::EndOfInput => {
                    return Err(SqidemError::Parse {
                        line: open_line,
                        message: "'!if' block is not closed with '!}'".to_string(),
                    })
                }
            }
        }
    }

    fn parse_comment(&mut self, first: String) -> SqidemResult<Parsed> {
        let mut lines = vec![first];
        while let Some(line) = self.reader.next_line()? {
            if is_comment(logical(&line)) {
                lines.push(line);
            } else {
                self.reader.push_back(line);
                break;
            }
        }
        Ok(Parsed::Command(Command::Comment(CommentCommand { lines })))
    }

    /// Lines after a SQL statement, up to the next directive
    fn parse_content(&mut self) -> SqidemResult<Parsed> {
        let mut content = Vec::new();
        while let Some(line) = self.reader.next_line()? {
            if let Some(body) = directive_body(logical(&line)) {
                if accepts_content(body) {
                    return self.parse_directive(line, content);
                }
                self.reader.push_back(line);
                break;
            }
            content.push(line);
        }

        if content.is_empty() {
            return self.next_command();
        }
        // nothing claims the lines, so they are kept as they are
        Ok(Parsed::Command(Command::Comment(CommentCommand {
            lines: content,
        })))
    }

    /// A plain line outside of content: a SQL statement, or content for a directive
    fn parse_fresh(&mut self, first: String) -> SqidemResult<Parsed> {
        let start = self.line_number();
        let mut lines = vec![first];
        loop {
            if is_terminated(lines.last().map(String::as_str).unwrap_or_default()) {
                return Ok(Parsed::Command(self.finish_statement(lines)));
            }

            let line = match self.reader.next_line()? {
                Some(line) => line,
                None => return Err(SqidemError::UnterminatedStatement { line: start }),
            };
            let text = logical(&line);
            if text.starts_with('#') {
                self.reader.push_back(line);
                return Err(SqidemError::UnterminatedStatement { line: start });
            }
            if let Some(body) = directive_body(text) {
                if accepts_content(body) {
                    return self.parse_directive(line, lines);
                }
                self.reader.push_back(line);
                return Err(SqidemError::UnterminatedStatement { line: start });
            }
            lines.push(line);
        }
    }

    fn finish_statement(&mut self, lines: Vec<String>) -> Command {
        let joined = lines
            .iter()
            .map(|line| logical(line))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = joined.trim_end();
        let sql = trimmed.strip_suffix(';').unwrap_or(trimmed).to_string();
        let sort = !is_probably_deterministic(&sql);

        self.statement = Some(lines.clone());
        self.after_statement = true;
        Command::Sql(SqlCommand { lines, sql, sort })
    }

    fn parse_directive(&mut self, line: String, content: Vec<String>) -> SqidemResult<Parsed> {
        let line_number = self.line_number();
        let text = logical(&line).to_string();
        let body = directive_body(&text).unwrap_or_default();
        let (keyword, args) = split_keyword(body);

        let command = match keyword {
            "use" => {
                let name = required_arg(args, "!use <database>", line_number)?;
                Command::Use(UseCommand {
                    line,
                    name: name.to_string(),
                })
            }
            "ok" => self.check(line, content, CheckMode::Ok, line_number)?,
            "verify" => self.check(line, content, CheckMode::Verify, line_number)?,
            "update" => self.check(line, content, CheckMode::Update, line_number)?,
            "error" => self.check(line, content, CheckMode::Error, line_number)?,
            "plan" => {
                self.require_statement("plan", line_number)?;
                Command::Explain(ExplainCommand { content, line })
            }
            "type" => {
                self.require_statement("type", line_number)?;
                Command::Type(TypeCommand { content, line })
            }
            "skip" => Command::Skip(SkipCommand { line }),
            "set" | "push" => {
                let (name, value) = split_keyword(args);
                if name.is_empty() || value.is_empty() {
                    return Err(SqidemError::Parse {
                        line: line_number,
                        message: format!("expected '!{} <name> <value>'", keyword),
                    });
                }
                let command = PropertyCommand {
                    name: name.to_string(),
                    value: Some(PropertyValue::parse(name, value, line_number)?),
                    line,
                };
                if keyword == "set" {
                    Command::Set(command)
                } else {
                    Command::Push(command)
                }
            }
            "pop" => {
                let name = required_arg(args, "!pop <name>", line_number)?;
                Command::Pop(PropertyCommand {
                    name: name.to_string(),
                    value: None,
                    line,
                })
            }
            "show" => {
                let name = required_arg(args, "!show <name>", line_number)?;
                Command::Show(ShowCommand {
                    content,
                    name: name.to_string(),
                    line,
                })
            }
            "}" => return Ok(Parsed::EndOfBlock(line)),
            _ => match if_regex().captures(body) {
                Some(captures) => {
                    let path = captures[1].trim().to_string();
                    if path.is_empty() {
                        return Err(SqidemError::Parse {
                            line: line_number,
                            message: "empty condition in '!if'".to_string(),
                        });
                    }
                    let (body, close) = self.parse_block(line_number)?;
                    Command::If(IfCommand {
                        line,
                        path,
                        body,
                        close,
                    })
                }
                None => {
                    let preceding = self.statement.as_deref().unwrap_or_default();
                    match self.handlers.parse_command(preceding, &content, &line) {
                        Some(custom) => Command::Custom(custom),
                        None => {
                            return Err(SqidemError::UnknownCommand {
                                line: line_number,
                                text: body.to_string(),
                            })
                        }
                    }
                }
            },
        };
        Ok(Parsed::Command(command))
    }

    fn check(
        &self,
        line: String,
        content: Vec<String>,
        mode: CheckMode,
        line_number: usize,
    ) -> SqidemResult<Command> {
        self.require_statement(mode.keyword(), line_number)?;
        Ok(Command::Check(CheckCommand {
            content,
            line,
            mode,
        }))
    }

    fn require_statement(&self, keyword: &str, line_number: usize) -> SqidemResult<()> {
        if self.statement.is_none() {
            return Err(SqidemError::Parse {
                line: line_number,
                message: format!("'!{}' must follow a SQL statement", keyword),
            });
        }
        Ok(())
    }
}

fn if_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^if\s*\((.*)\)\s*\{\s*$").expect("valid if regex"))
}

fn is_comment(text: &str) -> bool {
    text.trim().is_empty() || text.starts_with('#')
}

fn is_terminated(line: &str) -> bool {
    logical(line).trim_end().ends_with(';')
}

/// Directive text after the `!` marker and leading spaces
fn directive_body(text: &str) -> Option<&str> {
    text.strip_prefix('!').map(str::trim_start)
}

/// Split off the first whitespace-delimited word
fn split_keyword(text: &str) -> (&str, &str) {
    match text.find(char::is_whitespace) {
        Some(index) => (&text[..index], text[index..].trim()),
        None => (text, ""),
    }
}

fn required_arg<'a>(args: &'a str, usage: &str, line: usize) -> SqidemResult<&'a str> {
    let (arg, rest) = split_keyword(args);
    if arg.is_empty() || !rest.is_empty() {
        return Err(SqidemError::Parse {
            line,
            message: format!("expected '{}'", usage),
        });
    }
    Ok(arg)
}

/// Whether a directive takes the expected output written above it
fn accepts_content(body: &str) -> bool {
    let (keyword, _) = split_keyword(body);
    !matches!(keyword, "use" | "set" | "push" | "pop" | "skip" | "}") && !if_regex().is_match(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(script: &str) -> SqidemResult<Vec<Command>> {
        let handlers = HandlerChain::new();
        match Parser::new(script.as_bytes(), &handlers).parse()? {
            Command::Composite(commands) => Ok(commands),
            other => panic!("expected composite, got {:?}", other),
        }
    }

    #[test]
    fn test_statement_and_check() {
        let commands = parse("!use scott\nselect 1\nfrom t;\nX\n1\n!ok\n").unwrap();
        assert_eq!(commands.len(), 3);
        match &commands[1] {
            Command::Sql(sql) => {
                assert_eq!(sql.sql, "select 1\nfrom t");
                assert!(sql.sort);
                assert_eq!(sql.lines, vec!["select 1", "from t;"]);
            }
            other => panic!("unexpected {:?}", other),
        }
        match &commands[2] {
            Command::Check(check) => {
                assert_eq!(check.mode, CheckMode::Ok);
                assert_eq!(check.content, vec!["X", "1"]);
                assert_eq!(check.line, "!ok");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_comments_are_grouped() {
        let commands = parse("# a\n\n# b\n!use x\n").unwrap();
        assert_eq!(commands.len(), 2);
        assert!(matches!(&commands[0], Command::Comment(c) if c.lines.len() == 3));
    }

    #[test]
    fn test_content_after_check_goes_to_next_directive() {
        let commands = parse("select 1 order by 1;\nX\n!ok\nPlanLine\n!plan\n").unwrap();
        assert_eq!(commands.len(), 3);
        assert!(matches!(&commands[0], Command::Sql(s) if !s.sort));
        assert!(matches!(&commands[2], Command::Explain(e) if e.content == vec!["PlanLine"]));
    }

    #[test]
    fn test_content_before_non_content_directive_is_comment() {
        let commands = parse("select 1;\nstray\n!set foo 1\n").unwrap();
        assert_eq!(commands.len(), 3);
        assert!(matches!(&commands[1], Command::Comment(c) if c.lines == vec!["stray"]));
        assert!(matches!(&commands[2], Command::Set(_)));
    }

    #[test]
    fn test_unterminated_statement() {
        let err = parse("select 1\n!use x\n").unwrap_err();
        assert!(matches!(err, SqidemError::UnterminatedStatement { line: 1 }));
        let err = parse("!use x\nselect 1\n").unwrap_err();
        assert!(matches!(err, SqidemError::UnterminatedStatement { line: 2 }));
        let err = parse("select 1\n# comment\n").unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_result_directive_needs_statement() {
        let err = parse("!ok\n").unwrap_err();
        assert!(matches!(err, SqidemError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_keywords_match_exactly() {
        let err = parse("select 1;\n!okay\n").unwrap_err();
        assert!(matches!(err, SqidemError::UnknownCommand { line: 2, ref text } if text == "okay"));
    }

    #[test]
    fn test_nested_if_blocks() {
        let commands = parse("!if (a.b) {\n!if (true) {\n!skip\n!}\n!}\n").unwrap();
        assert_eq!(commands.len(), 1);
        match &commands[0] {
            Command::If(outer) => {
                assert_eq!(outer.path, "a.b");
                assert_eq!(outer.body.len(), 1);
                assert!(matches!(&outer.body[0], Command::If(inner) if inner.body.len() == 1));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unbalanced_blocks() {
        assert!(matches!(
            parse("!if (x) {\n!skip\n").unwrap_err(),
            SqidemError::Parse { line: 1, .. }
        ));
        assert!(matches!(
            parse("!skip\n!}\n").unwrap_err(),
            SqidemError::Parse { line: 2, .. }
        ));
    }

    #[test]
    fn test_property_directives() {
        let commands = parse("!set outputformat mysql\n!push foo true\n!pop foo\n").unwrap();
        assert!(matches!(&commands[0], Command::Set(p) if p.name == "outputformat"));
        assert!(matches!(&commands[1], Command::Push(p) if p.value == Some(PropertyValue::Bool(true))));
        assert!(matches!(&commands[2], Command::Pop(p) if p.value.is_none()));

        let err = parse("!set outputformat excel\n").unwrap_err();
        assert!(matches!(err, SqidemError::InvalidPropertyValue { line: 1, .. }));
    }

    #[test]
    fn test_error_reports_are_dropped() {
        let commands =
            parse("!use x\n> Error while executing command use\n> Unknown database: x\n# c\n")
                .unwrap();
        assert_eq!(commands.len(), 2);
        assert!(matches!(&commands[1], Command::Comment(c) if c.lines == vec!["# c"]));
    }

    #[test]
    fn test_crlf_lines_keep_their_text() {
        let commands = parse("select 1;\r\nX\r\n!ok\r\n").unwrap();
        match (&commands[0], &commands[1]) {
            (Command::Sql(sql), Command::Check(check)) => {
                assert_eq!(sql.sql, "select 1");
                assert_eq!(sql.lines, vec!["select 1;\r"]);
                assert_eq!(check.line, "!ok\r");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_source_lines_round_trip() {
        let script = "# header\n!use scott\nselect *\nfrom emp;\nA\nB\n!ok\n\n!if (false) {\nselect 2;\n!ok\n!}\n";
        let handlers = HandlerChain::new();
        let command = Parser::new(script.as_bytes(), &handlers).parse().unwrap();
        let mut text = command.source_lines().join("\n");
        text.push('\n');
        assert_eq!(text, script);
    }
}
