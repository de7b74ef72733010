//! Extension directives for sqidem
//!
//! Directives the core grammar does not know are offered to a chain of
//! [`CommandHandler`]s. The first handler that returns a command wins; if none
//! does, the script fails to parse.

use std::fmt;

use crate::command::CustomCommand;
use crate::engine::Context;
use crate::error::SqidemResult;

/// Turns an unknown directive into a command
pub trait CommandHandler {
    /// Try to parse a directive
    ///
    /// # Arguments
    /// * `preceding` - Source lines of the most recent SQL statement, if any
    /// * `content` - Lines between that statement and the directive
    /// * `line` - The directive line itself
    ///
    /// # Returns
    /// * `Some(command)` if this handler understands the directive
    /// * `None` to let the next handler try
    fn parse_command(
        &self,
        preceding: &[String],
        content: &[String],
        line: &str,
    ) -> Option<Box<dyn CustomCommand>>;
}

/// Ordered list of handlers
#[derive(Default)]
pub struct HandlerChain {
    handlers: Vec<Box<dyn CommandHandler>>,
}

impl HandlerChain {
    pub fn new() -> Self {
        HandlerChain::default()
    }

    pub fn push(&mut self, handler: Box<dyn CommandHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl CommandHandler for HandlerChain {
    fn parse_command(
        &self,
        preceding: &[String],
        content: &[String],
        line: &str,
    ) -> Option<Box<dyn CustomCommand>> {
        self.handlers
            .iter()
            .find_map(|handler| handler.parse_command(preceding, content, line))
    }
}

/// Provides `!count`, which prints the number of rows the current statement returns
pub struct CountCommandHandler;

impl CommandHandler for CountCommandHandler {
    fn parse_command(
        &self,
        _preceding: &[String],
        content: &[String],
        line: &str,
    ) -> Option<Box<dyn CustomCommand>> {
        let directive = line.trim_end_matches('\r').strip_prefix('!')?.trim();
        if directive != "count" {
            return None;
        }
        Some(Box::new(CountCommand {
            content: content.to_vec(),
            line: line.to_string(),
        }))
    }
}

/// `!count`
pub struct CountCommand {
    content: Vec<String>,
    line: String,
}

impl fmt::Debug for CountCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountCommand")
            .field("line", &self.line)
            .finish()
    }
}

impl CustomCommand for CountCommand {
    fn describe(&self) -> String {
        "count".to_string()
    }

    fn source_lines(&self) -> Vec<String> {
        let mut lines = self.content.clone();
        lines.push(self.line.clone());
        lines
    }

    fn execute(&self, context: &mut Context<'_>, enabled: bool) -> SqidemResult<()> {
        if !enabled {
            context.write_lines(&self.content)?;
            return context.write_line(&self.line);
        }
        let sql = context.statement()?.sql.clone();
        let count = context.connection()?.query(&sql)?.row_count();
        let phrase = if count == 1 {
            "1 row".to_string()
        } else {
            format!("{} rows", count)
        };
        context.write_line(&phrase)?;
        context.write_line(&self.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_handler_claims_only_count() {
        let handler = CountCommandHandler;
        assert!(handler.parse_command(&[], &[], "!count").is_some());
        assert!(handler.parse_command(&[], &[], "!  count\r").is_some());
        assert!(handler.parse_command(&[], &[], "!counter").is_none());
        assert!(handler.parse_command(&[], &[], "!ok").is_none());
    }

    #[test]
    fn test_chain_keeps_source_lines() {
        let mut chain = HandlerChain::new();
        assert!(chain.parse_command(&[], &[], "!count").is_none());
        chain.push(Box::new(CountCommandHandler));
        let content = vec!["3 rows".to_string()];
        let command = chain.parse_command(&[], &content, "!count").unwrap();
        assert_eq!(command.source_lines(), vec!["3 rows", "!count"]);
        assert_eq!(chain.len(), 1);
    }
}
