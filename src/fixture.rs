//! Fixture file format
//!
//! A fixture file holds recorded query results, one section per fixture:
//!
//! ```text
//! # StartTest: emp_names
//! !use scott
//! select ename, comm
//! from emp;
//! ENAME:VARCHAR,COMM:INTEGER
//! SMITH,
//! "",0
//! !ok
//! # EndTest: emp_names
//! ```
//!
//! Fields are comma separated. NULL is written as nothing and the empty
//! string as `""`. A field is quoted when it contains a comma, quote,
//! backslash or line break, or starts with `!` or `#`; inside quotes `""`,
//! `\\`, `\n` and `\r` stand for a quote, a backslash, LF and CR.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{SqidemError, SqidemResult};
use crate::reader::{logical, LineReader};
use crate::result_set::{ColumnMeta, JdbcType, ResultRow, ResultSet};

const START_MARKER: &str = "# StartTest: ";
const END_MARKER: &str = "# EndTest: ";

/// Normalized lookup key for a SQL text: trimmed, without the trailing `;`
pub fn sql_key(sql: &str) -> String {
    let trimmed = sql.trim();
    trimmed
        .strip_suffix(';')
        .unwrap_or(trimmed)
        .trim_end()
        .to_string()
}

fn needs_quotes(text: &str) -> bool {
    text.is_empty()
        || text.starts_with('!')
        || text.starts_with('#')
        || text.contains(|c| matches!(c, ',' | '"' | '\\' | '\n' | '\r'))
}

/// Encode one field; `None` is NULL
pub fn encode_field(field: Option<&str>) -> String {
    let text = match field {
        None => return String::new(),
        Some(text) => text,
    };
    if !needs_quotes(text) {
        return text.to_string();
    }
    let mut encoded = String::with_capacity(text.len() + 2);
    encoded.push('"');
    for c in text.chars() {
        match c {
            '"' => encoded.push_str("\"\""),
            '\\' => encoded.push_str("\\\\"),
            '\n' => encoded.push_str("\\n"),
            '\r' => encoded.push_str("\\r"),
            c => encoded.push(c),
        }
    }
    encoded.push('"');
    encoded
}

/// Encode a row as one line
pub fn encode_row(row: &[Option<String>]) -> String {
    row.iter()
        .map(|field| encode_field(field.as_deref()))
        .collect::<Vec<_>>()
        .join(",")
}

/// Decode one line into fields
///
/// # Arguments
/// * `line` - The encoded row
/// * `line_number` - Position in the file, for error messages
pub fn decode_row(line: &str, line_number: usize) -> SqidemResult<ResultRow> {
    let error = |message: &str| SqidemError::Fixture {
        line: line_number,
        message: message.to_string(),
    };

    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut text = String::new();
            loop {
                match chars.next() {
                    None => return Err(error("unterminated quoted field")),
                    Some('"') if chars.peek() == Some(&'"') => {
                        chars.next();
                        text.push('"');
                    }
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some('\\') => text.push('\\'),
                        Some('n') => text.push('\n'),
                        Some('r') => text.push('\r'),
                        _ => return Err(error("invalid escape in quoted field")),
                    },
                    Some(c) => text.push(c),
                }
            }
            fields.push(Some(text));
            match chars.next() {
                None => break,
                Some(',') => continue,
                Some(_) => return Err(error("unexpected text after quoted field")),
            }
        } else {
            let mut text = String::new();
            let mut more = false;
            for c in chars.by_ref() {
                if c == ',' {
                    more = true;
                    break;
                }
                text.push(c);
            }
            fields.push(if text.is_empty() { None } else { Some(text) });
            if !more {
                break;
            }
        }
    }
    Ok(fields)
}

/// One recorded query and its result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureSection {
    pub name: String,
    pub database: String,
    /// SQL text without the terminating `;`
    pub sql: String,
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<ResultRow>,
}

impl FixtureSection {
    /// Capture a live result
    pub fn from_result(name: &str, database: &str, sql: &str, result: &ResultSet) -> Self {
        FixtureSection {
            name: name.to_string(),
            database: database.to_string(),
            sql: sql_key(sql),
            columns: result.columns().to_vec(),
            rows: result.rows().to_vec(),
        }
    }

    /// Rebuild the recorded result
    pub fn to_result_set(&self) -> SqidemResult<ResultSet> {
        let mut result = ResultSet::new(self.columns.clone());
        for row in &self.rows {
            result.push_row(row.clone())?;
        }
        Ok(result)
    }

    /// Header line of `label:TYPE` pairs
    pub fn header(&self) -> String {
        self.columns
            .iter()
            .map(|c| encode_field(Some(&format!("{}:{}", c.label, c.jdbc_type))))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// The section as file lines
    pub fn lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("{}{}", START_MARKER, self.name),
            format!("!use {}", self.database),
        ];
        lines.extend(format!("{};", self.sql).lines().map(str::to_string));
        lines.push(self.header());
        lines.extend(self.rows.iter().map(|row| encode_row(row)));
        lines.push("!ok".to_string());
        lines.push(format!("{}{}", END_MARKER, self.name));
        lines
    }
}

fn parse_header(line: &str, line_number: usize) -> SqidemResult<Vec<ColumnMeta>> {
    decode_row(line, line_number)?
        .into_iter()
        .map(|field| {
            let field = field.unwrap_or_default();
            let (label, type_name) = field.rsplit_once(':').ok_or_else(|| SqidemError::Fixture {
                line: line_number,
                message: format!("column '{}' has no type", field),
            })?;
            let jdbc_type = JdbcType::from_name(type_name).ok_or_else(|| SqidemError::Fixture {
                line: line_number,
                message: format!("unknown column type '{}'", type_name),
            })?;
            Ok(ColumnMeta::new(label, jdbc_type))
        })
        .collect()
}

/// All sections of a fixture file, ordered by name
#[derive(Debug, Clone, Default)]
pub struct FixtureFile {
    sections: BTreeMap<String, FixtureSection>,
    /// (database, sql key) to section name
    by_query: BTreeMap<(String, String), String>,
}

impl FixtureFile {
    pub fn new() -> Self {
        FixtureFile::default()
    }

    /// Read a fixture file from disk
    pub fn load(path: &Path) -> SqidemResult<Self> {
        let file = File::open(path)?;
        FixtureFile::parse(BufReader::new(file))
    }

    /// Parse fixture text
    ///
    /// Blank lines and comments between sections are ignored.
    ///
    /// # Returns
    /// * `Ok(FixtureFile)` - All sections, indexed by name and by query
    /// * `Err(SqidemError::Fixture)` - On malformed or duplicate sections
    pub fn parse<R: BufRead>(input: R) -> SqidemResult<Self> {
        let mut reader = LineReader::new(input);
        let mut fixtures = FixtureFile::new();
        while let Some(line) = reader.next_line()? {
            let text = logical(&line);
            let name = match text.strip_prefix(START_MARKER) {
                Some(name) => name.trim().to_string(),
                None if text.trim().is_empty() || text.starts_with('#') => continue,
                None => {
                    return Err(SqidemError::Fixture {
                        line: reader.line_number(),
                        message: format!("expected '{}<name>'", START_MARKER),
                    })
                }
            };
            let section = Self::parse_section(&mut reader, name)?;
            if fixtures.get(&section.name).is_some() {
                return Err(SqidemError::Fixture {
                    line: reader.line_number(),
                    message: format!("duplicate section '{}'", section.name),
                });
            }
            fixtures.insert(section);
        }
        Ok(fixtures)
    }

    fn parse_section<R: BufRead>(
        reader: &mut LineReader<R>,
        name: String,
    ) -> SqidemResult<FixtureSection> {
        let next = |reader: &mut LineReader<R>, what: &str| -> SqidemResult<String> {
            match reader.next_line()? {
                Some(line) => Ok(logical(&line).to_string()),
                None => Err(SqidemError::Fixture {
                    line: reader.line_number(),
                    message: format!("end of file while reading {} of section '{}'", what, name),
                }),
            }
        };

        let use_line = next(reader, "'!use'")?;
        let database = match use_line.strip_prefix("!use ") {
            Some(db) if !db.trim().is_empty() => db.trim().to_string(),
            _ => {
                return Err(SqidemError::Fixture {
                    line: reader.line_number(),
                    message: format!("expected '!use <database>', got '{}'", use_line),
                })
            }
        };

        let mut sql_lines = Vec::new();
        loop {
            let line = next(reader, "SQL")?;
            match line.strip_suffix(';') {
                Some(last) => {
                    sql_lines.push(last.to_string());
                    break;
                }
                None => sql_lines.push(line),
            }
        }

        let header = next(reader, "the header")?;
        let columns = parse_header(&header, reader.line_number())?;

        let mut rows = Vec::new();
        loop {
            let line = next(reader, "rows")?;
            if line == "!ok" {
                break;
            }
            let row = decode_row(&line, reader.line_number())?;
            if row.len() != columns.len() {
                return Err(SqidemError::Fixture {
                    line: reader.line_number(),
                    message: format!("expected {} fields, found {}", columns.len(), row.len()),
                });
            }
            rows.push(row);
        }

        let end = next(reader, "the end marker")?;
        if end.strip_prefix(END_MARKER).map(str::trim) != Some(name.as_str()) {
            return Err(SqidemError::Fixture {
                line: reader.line_number(),
                message: format!("expected '{}{}', got '{}'", END_MARKER, name, end),
            });
        }

        Ok(FixtureSection {
            name,
            database,
            sql: sql_key(&sql_lines.join("\n")),
            columns,
            rows,
        })
    }

    /// Add or replace a section
    pub fn insert(&mut self, section: FixtureSection) {
        if let Some(old) = self.sections.get(&section.name) {
            self.by_query
                .remove(&(old.database.clone(), sql_key(&old.sql)));
        }
        self.by_query.insert(
            (section.database.clone(), sql_key(&section.sql)),
            section.name.clone(),
        );
        self.sections.insert(section.name.clone(), section);
    }

    pub fn get(&self, name: &str) -> Option<&FixtureSection> {
        self.sections.get(name)
    }

    /// Find the section recorded for a query on a database
    pub fn find(&self, database: &str, sql: &str) -> Option<&FixtureSection> {
        self.by_query
            .get(&(database.to_string(), sql_key(sql)))
            .and_then(|name| self.sections.get(name))
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Write every section, sorted by name
    pub fn write<W: Write>(&self, out: &mut W) -> SqidemResult<()> {
        for section in self.sections.values() {
            for line in section.lines() {
                writeln!(out, "{}", line)?;
            }
        }
        Ok(())
    }

    /// Write the file to disk, replacing it
    pub fn save(&self, path: &Path) -> SqidemResult<()> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write(&mut out)?;
        out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> Option<String> {
        Some(text.to_string())
    }

    #[test]
    fn test_null_and_empty_string_differ() {
        assert_eq!(encode_row(&[None, s(""), s("x")]), ",\"\",x");
        assert_eq!(decode_row(",\"\",x", 1).unwrap(), vec![None, s(""), s("x")]);
        assert_eq!(decode_row("", 1).unwrap(), vec![None]);
    }

    #[test]
    fn test_awkward_fields_are_quoted() {
        let row = vec![s("a,b"), s("say \"hi\""), s("line1\nline2\r"), s("c:\\tmp"), s("!ok")];
        let line = encode_row(&row);
        assert_eq!(
            line,
            r#""a,b","say ""hi""","line1\nline2\r","c:\\tmp","!ok""#
        );
        assert_eq!(decode_row(&line, 1).unwrap(), row);
    }

    #[test]
    fn test_decode_errors() {
        assert!(decode_row("\"open", 4).is_err());
        assert!(decode_row("\"a\"b", 4).is_err());
        assert!(matches!(
            decode_row("\"\\x\"", 9),
            Err(SqidemError::Fixture { line: 9, .. })
        ));
    }

    #[test]
    fn test_sql_key() {
        assert_eq!(sql_key("  select 1;  "), "select 1");
        assert_eq!(sql_key("select 1 ;"), "select 1");
        assert_eq!(sql_key("select 1"), "select 1");
    }

    const FILE: &str = "\
# StartTest: b
!use scott
select ename, comm
from emp;
ENAME:VARCHAR,COMM:INTEGER
SMITH,
\"\",0
!ok
# EndTest: b

# StartTest: a
!use hr
select 1;
EXPR$0:INTEGER
1
!ok
# EndTest: a
";

    #[test]
    fn test_parse_and_index() {
        let fixtures = FixtureFile::parse(FILE.as_bytes()).unwrap();
        assert_eq!(fixtures.len(), 2);
        let b = fixtures.find("scott", "select ename, comm\nfrom emp;").unwrap();
        assert_eq!(b.name, "b");
        assert_eq!(b.columns[1], ColumnMeta::new("COMM", JdbcType::Integer));
        assert_eq!(b.rows, vec![vec![s("SMITH"), None], vec![s(""), s("0")]]);
        assert!(fixtures.find("hr", "select ename, comm\nfrom emp").is_none());
        assert_eq!(fixtures.get("a").unwrap().database, "hr");
    }

    #[test]
    fn test_write_sorts_by_name() {
        let fixtures = FixtureFile::parse(FILE.as_bytes()).unwrap();
        let mut out = Vec::new();
        fixtures.write(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("# StartTest: a\n!use hr\nselect 1;\n"));
        let again = FixtureFile::parse(text.as_bytes()).unwrap();
        assert_eq!(again.get("b"), fixtures.get("b"));
    }

    #[test]
    fn test_malformed_sections() {
        let missing_end = "# StartTest: x\n!use db\nselect 1;\nA:INTEGER\n1\n!ok\n";
        assert!(FixtureFile::parse(missing_end.as_bytes()).is_err());

        let wrong_width = "# StartTest: x\n!use db\nselect 1;\nA:INTEGER\n1,2\n!ok\n# EndTest: x\n";
        assert!(matches!(
            FixtureFile::parse(wrong_width.as_bytes()),
            Err(SqidemError::Fixture { line: 5, .. })
        ));

        let bad_type = "# StartTest: x\n!use db\nselect 1;\nA:WIDGET\n!ok\n# EndTest: x\n";
        assert!(FixtureFile::parse(bad_type.as_bytes()).is_err());

        let stray = "select 1;\n";
        assert!(FixtureFile::parse(stray.as_bytes()).is_err());

        let duplicate = format!("{}{}", FILE, "# StartTest: a\n!use hr\nselect 2;\nX:INTEGER\n!ok\n# EndTest: a\n");
        assert!(FixtureFile::parse(duplicate.as_bytes()).is_err());
    }
}
