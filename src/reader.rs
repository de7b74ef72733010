//! Line reader module for sqidem
//!
//! Pulls script lines from any buffered input with one line of lookahead.
//! Lines are returned without their `\n`; a trailing `\r` from CRLF input is
//! kept so that echoing reproduces the input exactly. Code that matches on a
//! line should go through [`logical`].

use std::io::BufRead;

use crate::error::SqidemResult;

/// Line source with single-line push back
pub struct LineReader<R: BufRead> {
    input: R,
    pushed: Option<String>,
    line_number: usize,
    has_read: bool,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(input: R) -> Self {
        LineReader {
            input,
            pushed: None,
            line_number: 0,
            has_read: false,
        }
    }

    /// Read the next line, or `None` at end of input
    pub fn next_line(&mut self) -> SqidemResult<Option<String>> {
        if let Some(line) = self.pushed.take() {
            self.line_number += 1;
            return Ok(Some(line));
        }

        let mut buf = String::new();
        if self.input.read_line(&mut buf)? == 0 {
            return Ok(None);
        }
        if buf.ends_with('\n') {
            buf.pop();
        }
        self.line_number += 1;
        self.has_read = true;
        Ok(Some(buf))
    }

    /// Return a line to the reader so the next call to [`LineReader::next_line`] yields it
    ///
    /// # Panics
    /// Panics if a line is already pushed back, or if no line has been read yet.
    /// Either case is a bug in the caller.
    pub fn push_back(&mut self, line: String) {
        assert!(self.has_read, "push_back called before any line was read");
        assert!(
            self.pushed.is_none(),
            "push_back called with a line already pushed back"
        );
        self.line_number -= 1;
        self.pushed = Some(line);
    }

    /// Number of the line most recently returned (1-based, 0 before the first)
    pub fn line_number(&self) -> usize {
        self.line_number
    }
}

/// The text of a line used for matching: without a trailing `\r`
pub fn logical(line: &str) -> &str {
    line.strip_suffix('\r').unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_reads_lines_and_tracks_numbers() {
        let mut reader = LineReader::new(Cursor::new("a\nb\r\nc"));
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("a"));
        assert_eq!(reader.line_number(), 1);
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("b\r"));
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("c"));
        assert_eq!(reader.line_number(), 3);
        assert_eq!(reader.next_line().unwrap(), None);
    }

    #[test]
    fn test_push_back_is_returned_next() {
        let mut reader = LineReader::new(Cursor::new("a\nb\n"));
        let first = reader.next_line().unwrap().unwrap();
        reader.push_back(first);
        assert_eq!(reader.line_number(), 0);
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("a"));
        assert_eq!(reader.next_line().unwrap().as_deref(), Some("b"));
    }

    #[test]
    #[should_panic(expected = "already pushed back")]
    fn test_double_push_back_panics() {
        let mut reader = LineReader::new(Cursor::new("a\nb\n"));
        let _ = reader.next_line().unwrap();
        reader.push_back("a".to_string());
        reader.push_back("b".to_string());
    }

    #[test]
    #[should_panic(expected = "before any line")]
    fn test_push_back_before_read_panics() {
        let mut reader = LineReader::new(Cursor::new("a\n"));
        reader.push_back("x".to_string());
    }

    #[test]
    fn test_logical_strips_carriage_return() {
        assert_eq!(logical("select 1;\r"), "select 1;");
        assert_eq!(logical("plain"), "plain");
    }
}
