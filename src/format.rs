//! Output formatting module for sqidem
//!
//! Renders a [`ResultSet`] as text lines in one of four tabular styles. The
//! result is split into header, body and footer lines, because reconciliation
//! against expected output only reorders body lines.
//!
//! All styles share one preparation pass ([`prepare_rows`]) that optionally
//! sorts the rows, renders NULLs and computes column widths and alignment.

use std::cmp::Ordering;
use std::fmt;

use crate::result_set::ResultSet;

/// Tabular output style, selected with `!set outputformat <name>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Csv,
    Mysql,
    Psql,
    Oracle,
}

impl OutputFormat {
    pub fn name(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Mysql => "mysql",
            OutputFormat::Psql => "psql",
            OutputFormat::Oracle => "oracle",
        }
    }

    /// Parse a format name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "csv" => Some(OutputFormat::Csv),
            "mysql" => Some(OutputFormat::Mysql),
            "psql" => Some(OutputFormat::Psql),
            "oracle" => Some(OutputFormat::Oracle),
            _ => None,
        }
    }

    /// The formatter implementing this style
    pub fn formatter(&self) -> &'static dyn RowFormatter {
        match self {
            OutputFormat::Csv => &CsvFormatter,
            OutputFormat::Mysql => &MysqlFormatter,
            OutputFormat::Psql => &PsqlFormatter,
            OutputFormat::Oracle => &OracleFormatter,
        }
    }

    fn null_text(&self) -> &'static str {
        match self {
            OutputFormat::Csv | OutputFormat::Mysql => "null",
            OutputFormat::Psql | OutputFormat::Oracle => "",
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Csv
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A rendered result, split for reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormattedResult {
    pub header: Vec<String>,
    pub body: Vec<String>,
    pub footer: Vec<String>,
}

impl FormattedResult {
    /// All lines in output order
    pub fn lines(&self) -> Vec<String> {
        self.header
            .iter()
            .chain(self.body.iter())
            .chain(self.footer.iter())
            .cloned()
            .collect()
    }
}

/// Rows rendered to text, with the layout facts every style needs
#[derive(Debug, Clone)]
pub struct PreparedRows {
    pub labels: Vec<String>,
    /// Per column: right-justify (numeric JDBC category)
    pub numeric: Vec<bool>,
    pub rows: Vec<Vec<String>>,
    /// Per column: display width of the widest label or value
    pub widths: Vec<usize>,
}

/// One tabular output style
pub trait RowFormatter {
    fn format(&self, rows: &PreparedRows) -> FormattedResult;
}

/// Sort, render and measure the rows of a result
///
/// When `sort` is set, rows are ordered by comparing their fields as strings
/// in column order, with NULL after every value.
pub fn prepare_rows(result: &ResultSet, sort: bool, null_text: &str) -> PreparedRows {
    let mut raw: Vec<&Vec<Option<String>>> = result.rows().iter().collect();
    if sort {
        raw.sort_by(|a, b| compare_rows(a, b));
    }

    let labels: Vec<String> = result.columns().iter().map(|c| c.label.clone()).collect();
    let numeric = result
        .columns()
        .iter()
        .map(|c| c.jdbc_type.is_numeric())
        .collect();
    let rows: Vec<Vec<String>> = raw
        .into_iter()
        .map(|row| {
            row.iter()
                .map(|v| v.clone().unwrap_or_else(|| null_text.to_string()))
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> = labels.iter().map(|l| display_width(l)).collect();
    for row in &rows {
        for (i, value) in row.iter().enumerate() {
            if let Some(width) = widths.get_mut(i) {
                *width = (*width).max(display_width(value));
            }
        }
    }

    PreparedRows {
        labels,
        numeric,
        rows,
        widths,
    }
}

/// Render a result set in the given style
pub fn format_result(result: &ResultSet, format: OutputFormat, sort: bool) -> FormattedResult {
    let prepared = prepare_rows(result, sort, format.null_text());
    format.formatter().format(&prepared)
}

fn compare_rows(a: &[Option<String>], b: &[Option<String>]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ordering = match (x, y) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => x.cmp(y),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.len().cmp(&b.len())
}

fn display_width(s: &str) -> usize {
    s.chars().count()
}

fn pad_right(s: &str, width: usize) -> String {
    let mut out = s.to_string();
    out.extend(std::iter::repeat(' ').take(width.saturating_sub(display_width(s))));
    out
}

fn pad_left(s: &str, width: usize) -> String {
    let mut out: String = std::iter::repeat(' ')
        .take(width.saturating_sub(display_width(s)))
        .collect();
    out.push_str(s);
    out
}

fn center(s: &str, width: usize) -> String {
    let total = width.saturating_sub(display_width(s));
    let left = total / 2;
    let mut out: String = std::iter::repeat(' ').take(left).collect();
    out.push_str(s);
    out.extend(std::iter::repeat(' ').take(total - left));
    out
}

fn justify(s: &str, width: usize, numeric: bool) -> String {
    if numeric {
        pad_left(s, width)
    } else {
        pad_right(s, width)
    }
}

fn row_count_phrase(count: usize) -> String {
    if count == 1 {
        "(1 row)".to_string()
    } else {
        format!("({} rows)", count)
    }
}

/// `a, b` lines with a label header and no footer
pub struct CsvFormatter;

impl RowFormatter for CsvFormatter {
    fn format(&self, rows: &PreparedRows) -> FormattedResult {
        FormattedResult {
            header: vec![rows.labels.join(", ")],
            body: rows.rows.iter().map(|r| r.join(", ")).collect(),
            footer: Vec::new(),
        }
    }
}

/// Boxed table in the style of the `mysql` command-line client
pub struct MysqlFormatter;

impl RowFormatter for MysqlFormatter {
    fn format(&self, rows: &PreparedRows) -> FormattedResult {
        let border = format!(
            "+{}+",
            rows.widths
                .iter()
                .map(|w| "-".repeat(w + 2))
                .collect::<Vec<_>>()
                .join("+")
        );
        let render = |cells: Vec<String>| format!("| {} |", cells.join(" | "));

        let labels = rows
            .labels
            .iter()
            .zip(&rows.widths)
            .map(|(l, w)| pad_right(l, *w))
            .collect();
        let body = rows
            .rows
            .iter()
            .map(|row| {
                render(
                    row.iter()
                        .enumerate()
                        .map(|(i, v)| justify(v, rows.widths[i], rows.numeric[i]))
                        .collect(),
                )
            })
            .collect();

        FormattedResult {
            header: vec![border.clone(), render(labels), border.clone()],
            body,
            footer: vec![border, row_count_phrase(rows.rows.len()), String::new()],
        }
    }
}

/// Borderless table in the style of PostgreSQL's `psql`
pub struct PsqlFormatter;

impl RowFormatter for PsqlFormatter {
    fn format(&self, rows: &PreparedRows) -> FormattedResult {
        let render = |cells: Vec<String>| format!(" {}", cells.join(" | ")).trim_end().to_string();

        let labels = rows
            .labels
            .iter()
            .zip(&rows.widths)
            .map(|(l, w)| center(l, *w))
            .collect();
        let separator = rows
            .widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .collect::<Vec<_>>()
            .join("+");
        let body = rows
            .rows
            .iter()
            .map(|row| {
                render(
                    row.iter()
                        .enumerate()
                        .map(|(i, v)| justify(v, rows.widths[i], rows.numeric[i]))
                        .collect(),
                )
            })
            .collect();

        FormattedResult {
            header: vec![render(labels), separator],
            body,
            footer: vec![row_count_phrase(rows.rows.len()), String::new()],
        }
    }
}

/// Underlined table in the style of SQL*Plus
pub struct OracleFormatter;

/// SQL*Plus prints "N rows selected." only from this many rows on
const ORACLE_FEEDBACK_THRESHOLD: usize = 6;

impl RowFormatter for OracleFormatter {
    fn format(&self, rows: &PreparedRows) -> FormattedResult {
        if rows.rows.is_empty() {
            return FormattedResult {
                header: vec![
                    String::new(),
                    "no rows selected".to_string(),
                    String::new(),
                ],
                body: Vec::new(),
                footer: Vec::new(),
            };
        }

        let render = |cells: Vec<String>| cells.join(" ").trim_end().to_string();
        let labels = rows
            .labels
            .iter()
            .enumerate()
            .map(|(i, l)| justify(l, rows.widths[i], rows.numeric[i]))
            .collect();
        let underline = rows.widths.iter().map(|w| "-".repeat(*w)).collect();
        let body = rows
            .rows
            .iter()
            .map(|row| {
                render(
                    row.iter()
                        .enumerate()
                        .map(|(i, v)| justify(v, rows.widths[i], rows.numeric[i]))
                        .collect(),
                )
            })
            .collect();

        let count = rows.rows.len();
        let footer = if count >= ORACLE_FEEDBACK_THRESHOLD {
            vec![
                String::new(),
                format!("{} rows selected.", count),
                String::new(),
            ]
        } else {
            vec![String::new()]
        };

        FormattedResult {
            header: vec![String::new(), render(labels), render(underline)],
            body,
            footer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result_set::{ColumnMeta, JdbcType};

    fn emp(rows: &[(&str, Option<&str>)]) -> ResultSet {
        let mut rs = ResultSet::new(vec![
            ColumnMeta::new("EMPNO", JdbcType::Integer),
            ColumnMeta::new("ENAME", JdbcType::Varchar),
        ]);
        for (no, name) in rows {
            rs.push_row(vec![Some(no.to_string()), name.map(|n| n.to_string())])
                .unwrap();
        }
        rs
    }

    #[test]
    fn test_csv() {
        let out = format_result(&emp(&[("10", Some("Sales")), ("7", None)]), OutputFormat::Csv, false);
        assert_eq!(out.header, vec!["EMPNO, ENAME"]);
        assert_eq!(out.body, vec!["10, Sales", "7, null"]);
        assert!(out.footer.is_empty());
    }

    #[test]
    fn test_sort_puts_nulls_last() {
        let rs = emp(&[("2", None), ("1", Some("b")), ("1", Some("a"))]);
        let out = format_result(&rs, OutputFormat::Csv, true);
        assert_eq!(out.body, vec!["1, a", "1, b", "2, null"]);

        let mut rs = ResultSet::new(vec![ColumnMeta::new("X", JdbcType::Varchar)]);
        rs.push_row(vec![None]).unwrap();
        rs.push_row(vec![Some("z".to_string())]).unwrap();
        let out = format_result(&rs, OutputFormat::Csv, true);
        assert_eq!(out.body, vec!["z", "null"]);
    }

    #[test]
    fn test_mysql() {
        let out = format_result(&emp(&[("7369", Some("SMITH")), ("12", Some("Al"))]), OutputFormat::Mysql, false);
        assert_eq!(
            out.lines(),
            vec![
                "+-------+-------+",
                "| EMPNO | ENAME |",
                "+-------+-------+",
                "|  7369 | SMITH |",
                "|    12 | Al    |",
                "+-------+-------+",
                "(2 rows)",
                "",
            ]
        );
    }

    #[test]
    fn test_psql_has_no_trailing_spaces() {
        let out = format_result(&emp(&[("10", Some("Sales")), ("7", Some("HR"))]), OutputFormat::Psql, false);
        assert_eq!(
            out.lines(),
            vec![
                " EMPNO | ENAME",
                "-------+-------",
                "    10 | Sales",
                "     7 | HR",
                "(2 rows)",
                "",
            ]
        );
        let one = format_result(&emp(&[("1", Some("x"))]), OutputFormat::Psql, false);
        assert_eq!(one.footer[0], "(1 row)");
    }

    #[test]
    fn test_oracle_zero_rows() {
        let out = format_result(&emp(&[]), OutputFormat::Oracle, false);
        assert_eq!(out.lines(), vec!["", "no rows selected", ""]);
    }

    #[test]
    fn test_oracle_feedback_threshold() {
        let five: Vec<(String, Option<&str>)> =
            (1..=5).map(|i| (i.to_string(), Some("x"))).collect();
        let five: Vec<(&str, Option<&str>)> = five.iter().map(|(a, b)| (a.as_str(), *b)).collect();
        let out = format_result(&emp(&five), OutputFormat::Oracle, false);
        assert_eq!(out.header, vec!["", "EMPNO ENAME", "----- -----"]);
        assert_eq!(out.body[0], "    1 x");
        assert_eq!(out.footer, vec![""]);

        let six: Vec<(String, Option<&str>)> =
            (1..=6).map(|i| (i.to_string(), Some("x"))).collect();
        let six: Vec<(&str, Option<&str>)> = six.iter().map(|(a, b)| (a.as_str(), *b)).collect();
        let out = format_result(&emp(&six), OutputFormat::Oracle, false);
        assert_eq!(out.footer, vec!["", "6 rows selected.", ""]);
    }

    #[test]
    fn test_format_names() {
        assert_eq!(OutputFormat::from_name("MySQL"), Some(OutputFormat::Mysql));
        assert_eq!(OutputFormat::from_name("excel"), None);
        assert_eq!(OutputFormat::Oracle.to_string(), "oracle");
    }
}
