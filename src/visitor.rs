//! Event-driven traversal of scripts
//!
//! For tools that want to inspect or rewrite a script without executing it.
//! [`visit_script`] parses one top-level command at a time and reports it to
//! a [`ScriptVisitor`]; `!if` blocks may hand their body to a different
//! visitor.

use std::collections::BTreeMap;
use std::io::{BufRead, Write};

use crate::command::{
    CheckCommand, Command, CommentCommand, CustomCommand, ExplainCommand, IfCommand,
    PropertyCommand, ShowCommand, SkipCommand, SqlCommand, TypeCommand, UseCommand,
};
use crate::error::{SqidemError, SqidemResult};
use crate::handlers::HandlerChain;
use crate::parser::{Parsed, Parser};

/// Callbacks for each kind of command; all default to doing nothing
#[allow(unused_variables)]
pub trait ScriptVisitor {
    fn visit_comment(&mut self, command: &CommentCommand) -> SqidemResult<()> {
        Ok(())
    }

    fn visit_use(&mut self, command: &UseCommand) -> SqidemResult<()> {
        Ok(())
    }

    fn visit_sql(&mut self, command: &SqlCommand) -> SqidemResult<()> {
        Ok(())
    }

    fn visit_check(&mut self, command: &CheckCommand) -> SqidemResult<()> {
        Ok(())
    }

    fn visit_explain(&mut self, command: &ExplainCommand) -> SqidemResult<()> {
        Ok(())
    }

    fn visit_type(&mut self, command: &TypeCommand) -> SqidemResult<()> {
        Ok(())
    }

    fn visit_set(&mut self, command: &PropertyCommand) -> SqidemResult<()> {
        Ok(())
    }

    fn visit_push(&mut self, command: &PropertyCommand) -> SqidemResult<()> {
        Ok(())
    }

    fn visit_pop(&mut self, command: &PropertyCommand) -> SqidemResult<()> {
        Ok(())
    }

    fn visit_show(&mut self, command: &ShowCommand) -> SqidemResult<()> {
        Ok(())
    }

    fn visit_skip(&mut self, command: &SkipCommand) -> SqidemResult<()> {
        Ok(())
    }

    fn visit_custom(&mut self, command: &dyn CustomCommand) -> SqidemResult<()> {
        Ok(())
    }

    /// Called before the body of an `!if` block
    ///
    /// Return a visitor to receive the body, or `None` to keep this one.
    fn enter_if(&mut self, command: &IfCommand) -> SqidemResult<Option<Box<dyn ScriptVisitor + '_>>> {
        Ok(None)
    }

    /// Called after the body of an `!if` block
    fn exit_if(&mut self, command: &IfCommand) -> SqidemResult<()> {
        Ok(())
    }
}

/// Report a command, and the commands inside it, to a visitor
pub fn walk<'v>(visitor: &mut (dyn ScriptVisitor + 'v), command: &Command) -> SqidemResult<()> {
    match command {
        Command::Comment(c) => visitor.visit_comment(c),
        Command::Use(c) => visitor.visit_use(c),
        Command::Sql(c) => visitor.visit_sql(c),
        Command::Check(c) => visitor.visit_check(c),
        Command::Explain(c) => visitor.visit_explain(c),
        Command::Type(c) => visitor.visit_type(c),
        Command::Set(c) => visitor.visit_set(c),
        Command::Push(c) => visitor.visit_push(c),
        Command::Pop(c) => visitor.visit_pop(c),
        Command::Show(c) => visitor.visit_show(c),
        Command::Skip(c) => visitor.visit_skip(c),
        Command::Custom(c) => visitor.visit_custom(c.as_ref()),
        Command::Composite(children) => {
            for child in children {
                walk(visitor, child)?;
            }
            Ok(())
        }
        Command::If(c) => {
            let delegated = {
                match visitor.enter_if(c)? {
                    Some(mut scoped) => {
                        for child in &c.body {
                            walk(scoped.as_mut(), child)?;
                        }
                        true
                    }
                    None => false,
                }
            };
            if !delegated {
                for child in &c.body {
                    walk(visitor, child)?;
                }
            }
            visitor.exit_if(c)
        }
    }
}

/// Parse a script and report its top-level commands as they are parsed
pub fn visit_script<R: BufRead>(
    input: R,
    handlers: &HandlerChain,
    visitor: &mut dyn ScriptVisitor,
) -> SqidemResult<()> {
    let mut parser = Parser::new(input, handlers);
    loop {
        match parser.next_command()? {
            Parsed::Command(command) => walk(visitor, &command)?,
            Parsed::EndOfInput => return Ok(()),
            Parsed::EndOfBlock(_) => {
                return Err(SqidemError::Parse {
                    line: parser.line_number(),
                    message: "'!}' without a matching '!if'".to_string(),
                })
            }
        }
    }
}

/// Writes every command back out unchanged
pub struct EchoVisitor<W: Write> {
    out: W,
}

impl<W: Write> EchoVisitor<W> {
    pub fn new(out: W) -> Self {
        EchoVisitor { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(&mut self, lines: &[String], line: Option<&str>) -> SqidemResult<()> {
        for l in lines.iter().map(String::as_str).chain(line) {
            writeln!(self.out, "{}", l).map_err(SqidemError::Output)?;
        }
        Ok(())
    }
}

impl<W: Write> ScriptVisitor for EchoVisitor<W> {
    fn visit_comment(&mut self, command: &CommentCommand) -> SqidemResult<()> {
        self.write(&command.lines, None)
    }

    fn visit_use(&mut self, command: &UseCommand) -> SqidemResult<()> {
        self.write(&[], Some(&command.line))
    }

    fn visit_sql(&mut self, command: &SqlCommand) -> SqidemResult<()> {
        self.write(&command.lines, None)
    }

    fn visit_check(&mut self, command: &CheckCommand) -> SqidemResult<()> {
        self.write(&command.content, Some(&command.line))
    }

    fn visit_explain(&mut self, command: &ExplainCommand) -> SqidemResult<()> {
        self.write(&command.content, Some(&command.line))
    }

    fn visit_type(&mut self, command: &TypeCommand) -> SqidemResult<()> {
        self.write(&command.content, Some(&command.line))
    }

    fn visit_set(&mut self, command: &PropertyCommand) -> SqidemResult<()> {
        self.write(&[], Some(&command.line))
    }

    fn visit_push(&mut self, command: &PropertyCommand) -> SqidemResult<()> {
        self.write(&[], Some(&command.line))
    }

    fn visit_pop(&mut self, command: &PropertyCommand) -> SqidemResult<()> {
        self.write(&[], Some(&command.line))
    }

    fn visit_show(&mut self, command: &ShowCommand) -> SqidemResult<()> {
        self.write(&command.content, Some(&command.line))
    }

    fn visit_skip(&mut self, command: &SkipCommand) -> SqidemResult<()> {
        self.write(&[], Some(&command.line))
    }

    fn visit_custom(&mut self, command: &dyn CustomCommand) -> SqidemResult<()> {
        self.write(&command.source_lines(), None)
    }

    fn enter_if(&mut self, command: &IfCommand) -> SqidemResult<Option<Box<dyn ScriptVisitor + '_>>> {
        self.write(&[], Some(&command.line))?;
        Ok(None)
    }

    fn exit_if(&mut self, command: &IfCommand) -> SqidemResult<()> {
        self.write(&[], Some(&command.close))
    }
}

/// Tallies commands by kind
#[derive(Debug, Default)]
pub struct CommandCounter {
    counts: BTreeMap<&'static str, usize>,
}

impl CommandCounter {
    pub fn new() -> Self {
        CommandCounter::default()
    }

    /// Number of commands of a kind (`sql`, `ok`, `if`, ...)
    pub fn count(&self, kind: &str) -> usize {
        self.counts.get(kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    fn bump(&mut self, kind: &'static str) -> SqidemResult<()> {
        *self.counts.entry(kind).or_insert(0) += 1;
        Ok(())
    }
}

impl ScriptVisitor for CommandCounter {
    fn visit_comment(&mut self, _command: &CommentCommand) -> SqidemResult<()> {
        self.bump("comment")
    }

    fn visit_use(&mut self, _command: &UseCommand) -> SqidemResult<()> {
        self.bump("use")
    }

    fn visit_sql(&mut self, _command: &SqlCommand) -> SqidemResult<()> {
        self.bump("sql")
    }

    fn visit_check(&mut self, command: &CheckCommand) -> SqidemResult<()> {
        self.bump(command.mode.keyword())
    }

    fn visit_explain(&mut self, _command: &ExplainCommand) -> SqidemResult<()> {
        self.bump("plan")
    }

    fn visit_type(&mut self, _command: &TypeCommand) -> SqidemResult<()> {
        self.bump("type")
    }

    fn visit_set(&mut self, _command: &PropertyCommand) -> SqidemResult<()> {
        self.bump("set")
    }

    fn visit_push(&mut self, _command: &PropertyCommand) -> SqidemResult<()> {
        self.bump("push")
    }

    fn visit_pop(&mut self, _command: &PropertyCommand) -> SqidemResult<()> {
        self.bump("pop")
    }

    fn visit_show(&mut self, _command: &ShowCommand) -> SqidemResult<()> {
        self.bump("show")
    }

    fn visit_skip(&mut self, _command: &SkipCommand) -> SqidemResult<()> {
        self.bump("skip")
    }

    fn visit_custom(&mut self, _command: &dyn CustomCommand) -> SqidemResult<()> {
        self.bump("custom")
    }

    fn enter_if(&mut self, _command: &IfCommand) -> SqidemResult<Option<Box<dyn ScriptVisitor + '_>>> {
        self.bump("if")?;
        Ok(None)
    }
}
