//! SQL execution for the in-memory database
//!
//! Statements are parsed with `sqlparser` using the generic dialect and run
//! against a [`Database`]. Supported are `CREATE TABLE`, `DROP TABLE`,
//! `INSERT ... VALUES`, `UPDATE`, `DELETE` and single-table `SELECT` with
//! projection, aliases, arithmetic, boolean predicates, `IS [NOT] NULL`,
//! `ORDER BY` by label, position or expression, `LIMIT` and the aggregates
//! `COUNT`, `SUM`, `AVG`, `MIN` and `MAX`.
//!
//! A `SELECT` is first turned into a [`QueryPlan`], which serves execution,
//! `explain` (an indented operator tree) and `describe` (column metadata
//! without running the query).

use std::cmp::Ordering;

use sqlparser::ast::{
    Assignment, BinaryOperator, ColumnDef, ColumnOption, DataType, Expr, Function, FunctionArg,
    FunctionArgExpr, Ident, ObjectName, ObjectType, OrderByExpr, Query, SelectItem, SetExpr,
    Statement, TableFactor, TableWithJoins, UnaryOperator, Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use tracing::debug;

use crate::connection::StatementResult;
use crate::error::{SqidemError, SqidemResult};
use crate::memdb::aggregate::AggregateFunction;
use crate::memdb::database::Database;
use crate::memdb::table::{Column, Row, Table, Value};
use crate::result_set::{ColumnMeta, JdbcType, ResultSet};

/// Parse text that must hold exactly one SQL statement
pub fn parse_statement(sql: &str) -> SqidemResult<Statement> {
    let dialect = GenericDialect {};
    let mut statements = Parser::parse_sql(&dialect, sql)?;
    match statements.len() {
        1 => Ok(statements.remove(0)),
        0 => Err(SqidemError::InvalidSqlQuery(
            "No SQL statements found".to_string(),
        )),
        n => Err(SqidemError::InvalidSqlQuery(format!(
            "Expected a single SQL statement, found {}",
            n
        ))),
    }
}

/// SQL executor over one database
pub struct SqlExecutor<'a> {
    database: &'a mut Database,
}

impl<'a> SqlExecutor<'a> {
    pub fn new(database: &'a mut Database) -> Self {
        SqlExecutor { database }
    }

    /// Execute an SQL statement
    ///
    /// # Returns
    /// * `StatementResult::Rows` for queries
    /// * `StatementResult::Count` with the number of rows touched otherwise
    ///   (0 for DDL)
    pub fn execute(&mut self, sql: &str) -> SqidemResult<StatementResult> {
        let statement = parse_statement(sql)?;
        self.execute_statement(&statement)
    }

    /// Run a query; any other kind of statement is rejected before it runs
    pub fn query(&self, sql: &str) -> SqidemResult<ResultSet> {
        let statement = parse_statement(sql)?;
        let query = require_query(&statement)?;
        QueryPlan::build(query, self.database)?.execute()
    }

    /// Operator tree of a query, one line per operator
    pub fn explain(&self, sql: &str) -> SqidemResult<Vec<String>> {
        let statement = parse_statement(sql)?;
        let query = require_query(&statement)?;
        Ok(QueryPlan::build(query, self.database)?.explain())
    }

    /// Column metadata of a query, without running it
    pub fn describe(&self, sql: &str) -> SqidemResult<Vec<ColumnMeta>> {
        let statement = parse_statement(sql)?;
        let query = require_query(&statement)?;
        Ok(QueryPlan::build(query, self.database)?.columns())
    }

    fn execute_statement(&mut self, statement: &Statement) -> SqidemResult<StatementResult> {
        match statement {
            Statement::Query(query) => {
                let rows = QueryPlan::build(query, self.database)?.execute()?;
                Ok(StatementResult::Rows(rows))
            }
            Statement::CreateTable {
                name,
                columns,
                if_not_exists,
                query,
                ..
            } => {
                if query.is_some() {
                    return Err(SqidemError::UnsupportedSqlFeature(
                        "CREATE TABLE ... AS SELECT".to_string(),
                    ));
                }
                self.execute_create(name, columns, *if_not_exists)
            }
            Statement::Drop {
                object_type,
                if_exists,
                names,
                ..
            } => self.execute_drop(object_type, *if_exists, names),
            Statement::Insert {
                table_name,
                columns,
                source,
                ..
            } => self.execute_insert(table_name, columns, source),
            Statement::Update {
                table,
                assignments,
                from,
                selection,
                ..
            } => {
                if from.is_some() {
                    return Err(SqidemError::UnsupportedSqlFeature(
                        "UPDATE ... FROM".to_string(),
                    ));
                }
                self.execute_update(table, assignments, selection.as_ref())
            }
            Statement::Delete {
                from, selection, ..
            } => {
                if from.len() != 1 {
                    return Err(SqidemError::UnsupportedSqlFeature(
                        "DELETE with multiple tables is not supported".to_string(),
                    ));
                }
                self.execute_delete(&from[0], selection.as_ref())
            }
            other => Err(SqidemError::UnsupportedSqlFeature(format!(
                "Unsupported SQL statement: {}",
                other
            ))),
        }
    }

    fn execute_create(
        &mut self,
        name: &ObjectName,
        columns: &[ColumnDef],
        if_not_exists: bool,
    ) -> SqidemResult<StatementResult> {
        let table_name = object_name(name)?;
        if if_not_exists && self.database.has_table(&table_name) {
            return Ok(StatementResult::Count(0));
        }
        if columns.is_empty() {
            return Err(SqidemError::InvalidSqlQuery(format!(
                "Table '{}' must have at least one column",
                table_name
            )));
        }

        let mut defs: Vec<Column> = Vec::with_capacity(columns.len());
        for def in columns {
            if defs.iter().any(|c| c.name.eq_ignore_ascii_case(&def.name.value)) {
                return Err(SqidemError::InvalidSqlQuery(format!(
                    "Duplicate column name '{}'",
                    def.name.value
                )));
            }
            let (jdbc_type, precision) = map_data_type(&def.data_type)?;
            let mut column = Column::new(&def.name.value, jdbc_type).with_precision(precision);
            let not_null = def.options.iter().any(|o| {
                matches!(
                    o.option,
                    ColumnOption::NotNull | ColumnOption::Unique { is_primary: true, .. }
                )
            });
            if not_null {
                column = column.not_null();
            }
            defs.push(column);
        }

        self.database.add_table(Table::new(&table_name, defs))?;
        debug!("Created table '{}'", table_name);
        Ok(StatementResult::Count(0))
    }

    fn execute_drop(
        &mut self,
        object_type: &ObjectType,
        if_exists: bool,
        names: &[ObjectName],
    ) -> SqidemResult<StatementResult> {
        if *object_type != ObjectType::Table {
            return Err(SqidemError::UnsupportedSqlFeature(format!(
                "DROP {}",
                object_type
            )));
        }
        for name in names {
            let table_name = object_name(name)?;
            match self.database.remove_table(&table_name) {
                Ok(_) => debug!("Dropped table '{}'", table_name),
                Err(SqidemError::TableNotFound(_)) if if_exists => {}
                Err(e) => return Err(e),
            }
        }
        Ok(StatementResult::Count(0))
    }

    fn execute_insert(
        &mut self,
        table_name: &ObjectName,
        columns: &[Ident],
        source: &Query,
    ) -> SqidemResult<StatementResult> {
        let table_name = object_name(table_name)?;
        let table = self.database.get_table(&table_name)?;

        let values = match source.body.as_ref() {
            SetExpr::Values(values) => values,
            _ => {
                return Err(SqidemError::UnsupportedSqlFeature(
                    "Only INSERT ... VALUES is supported".to_string(),
                ))
            }
        };

        // Target column indices, in the order values are supplied
        let targets = if columns.is_empty() {
            (0..table.columns().len()).collect::<Vec<_>>()
        } else {
            columns
                .iter()
                .map(|ident| {
                    table
                        .column_index(&ident.value)
                        .ok_or_else(|| SqidemError::ColumnNotFound(ident.value.clone()))
                })
                .collect::<SqidemResult<Vec<_>>>()?
        };

        // Build and coerce every row before touching the table, so a bad row
        // leaves the table unchanged
        let scope = Scope::empty();
        let mut new_rows: Vec<Row> = Vec::with_capacity(values.rows.len());
        for exprs in &values.rows {
            if exprs.len() != targets.len() {
                return Err(SqidemError::InvalidSqlQuery(format!(
                    "INSERT has {} target columns but {} values",
                    targets.len(),
                    exprs.len()
                )));
            }
            let mut row = vec![Value::Null; table.columns().len()];
            for (target, expr) in targets.iter().zip(exprs) {
                row[*target] = scope.eval(expr, &[])?;
            }
            let row = table
                .columns()
                .iter()
                .zip(row)
                .map(|(column, value)| column.coerce(value))
                .collect::<SqidemResult<Row>>()?;
            new_rows.push(row);
        }

        let count = new_rows.len() as u64;
        let table = self.database.get_table_mut(&table_name)?;
        for row in new_rows {
            table.add_row(row)?;
        }
        debug!("Inserted {} rows into '{}'", count, table_name);
        Ok(StatementResult::Count(count))
    }

    fn execute_update(
        &mut self,
        table: &TableWithJoins,
        assignments: &[Assignment],
        selection: Option<&Expr>,
    ) -> SqidemResult<StatementResult> {
        let table_name = table_name(table)?;
        let current = self.database.get_table(&table_name)?;
        let scope = Scope::of(current);

        let mut column_assignments = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let name = assignment
                .id
                .last()
                .map(|ident| ident.value.as_str())
                .unwrap_or_default();
            let index = current
                .column_index(name)
                .ok_or_else(|| SqidemError::ColumnNotFound(name.to_string()))?;
            column_assignments.push((index, &assignment.value));
        }

        let mut updated = 0u64;
        let mut rows = Vec::with_capacity(current.row_count());
        for row in current.rows() {
            if !scope.matches(selection, row)? {
                rows.push(row.clone());
                continue;
            }
            let mut new_row = row.clone();
            // Right-hand sides see the row as it was before the update
            for (index, expr) in &column_assignments {
                let value = scope.eval(expr, row)?;
                new_row[*index] = current.columns()[*index].coerce(value)?;
            }
            rows.push(new_row);
            updated += 1;
        }

        self.database.get_table_mut(&table_name)?.replace_rows(rows);
        debug!("Updated {} rows in '{}'", updated, table_name);
        Ok(StatementResult::Count(updated))
    }

    fn execute_delete(
        &mut self,
        table: &TableWithJoins,
        selection: Option<&Expr>,
    ) -> SqidemResult<StatementResult> {
        let table_name = table_name(table)?;
        let current = self.database.get_table(&table_name)?;
        let scope = Scope::of(current);

        let mut kept = Vec::with_capacity(current.row_count());
        for row in current.rows() {
            if !scope.matches(selection, row)? {
                kept.push(row.clone());
            }
        }
        let deleted = (current.row_count() - kept.len()) as u64;

        self.database.get_table_mut(&table_name)?.replace_rows(kept);
        debug!("Deleted {} rows from '{}'", deleted, table_name);
        Ok(StatementResult::Count(deleted))
    }
}

fn require_query(statement: &Statement) -> SqidemResult<&Query> {
    match statement {
        Statement::Query(query) => Ok(query),
        _ => Err(SqidemError::InvalidSqlQuery(
            "Statement is not a query".to_string(),
        )),
    }
}

fn object_name(name: &ObjectName) -> SqidemResult<String> {
    name.0
        .last()
        .map(|ident| ident.value.clone())
        .ok_or_else(|| SqidemError::InvalidSqlQuery("Empty object name".to_string()))
}

fn table_name(table: &TableWithJoins) -> SqidemResult<String> {
    if !table.joins.is_empty() {
        return Err(SqidemError::UnsupportedSqlFeature("JOIN".to_string()));
    }
    match &table.relation {
        TableFactor::Table { name, .. } => object_name(name),
        other => Err(SqidemError::UnsupportedSqlFeature(format!(
            "Table expression: {}",
            other
        ))),
    }
}

/// Map a declared SQL type to a JDBC type and its length or precision
fn map_data_type(data_type: &DataType) -> SqidemResult<(JdbcType, u32)> {
    let text = data_type.to_string().to_uppercase();
    let (base, args) = match text.split_once('(') {
        Some((base, rest)) => (base.trim(), Some(rest)),
        None => (text.trim(), None),
    };
    let precision = args
        .and_then(|rest| rest.split(|c| c == ',' || c == ')').next())
        .and_then(|p| p.trim().parse::<u32>().ok())
        .unwrap_or(0);
    let jdbc_type = match base {
        "INT" | "INTEGER" => JdbcType::Integer,
        "SMALLINT" => JdbcType::SmallInt,
        "TINYINT" => JdbcType::TinyInt,
        "BIGINT" => JdbcType::BigInt,
        "DOUBLE" | "DOUBLE PRECISION" => JdbcType::Double,
        "FLOAT" => JdbcType::Float,
        "REAL" => JdbcType::Real,
        "DECIMAL" | "DEC" => JdbcType::Decimal,
        "NUMERIC" => JdbcType::Numeric,
        "BOOLEAN" | "BOOL" => JdbcType::Boolean,
        "CHAR" | "CHARACTER" => JdbcType::Char,
        "VARCHAR" | "CHARACTER VARYING" | "TEXT" | "STRING" => JdbcType::Varchar,
        "DATE" => JdbcType::Date,
        "TIME" => JdbcType::Time,
        "TIMESTAMP" => JdbcType::Timestamp,
        _ => {
            return Err(SqidemError::UnsupportedSqlFeature(format!(
                "Data type {}",
                text
            )))
        }
    };
    Ok((jdbc_type, precision))
}

fn is_float_type(jdbc_type: JdbcType) -> bool {
    matches!(
        jdbc_type,
        JdbcType::Float | JdbcType::Real | JdbcType::Double | JdbcType::Decimal | JdbcType::Numeric
    )
}

/// Column resolution and expression evaluation against an optional table
#[derive(Clone, Copy)]
struct Scope<'a> {
    table: Option<&'a Table>,
}

impl<'a> Scope<'a> {
    fn empty() -> Self {
        Scope { table: None }
    }

    fn of(table: &'a Table) -> Self {
        Scope { table: Some(table) }
    }

    fn column(&self, name: &str) -> SqidemResult<usize> {
        self.table
            .and_then(|t| t.column_index(name))
            .ok_or_else(|| SqidemError::ColumnNotFound(name.to_string()))
    }

    /// Column index when the expression is a plain column reference
    fn column_ref(&self, expr: &Expr) -> Option<SqidemResult<usize>> {
        match expr {
            Expr::Identifier(ident) => Some(self.column(&ident.value)),
            Expr::CompoundIdentifier(parts) => {
                parts.last().map(|ident| self.column(&ident.value))
            }
            _ => None,
        }
    }

    fn column_def(&self, index: usize) -> SqidemResult<&'a Column> {
        self.table
            .and_then(|t| t.columns().get(index))
            .ok_or_else(|| SqidemError::ColumnNotFound(format!("#{}", index + 1)))
    }

    /// Static type and nullability of an expression
    fn expr_type(&self, expr: &Expr) -> SqidemResult<(JdbcType, bool)> {
        if let Some(index) = self.column_ref(expr) {
            let column = self.column_def(index?)?;
            return Ok((column.jdbc_type, column.nullable));
        }
        match expr {
            Expr::Value(value) => {
                let value = literal(value)?;
                Ok((value.jdbc_type(), value.is_null()))
            }
            Expr::Nested(inner) => self.expr_type(inner),
            Expr::IsNull(inner) | Expr::IsNotNull(inner) => {
                self.expr_type(inner)?;
                Ok((JdbcType::Boolean, false))
            }
            Expr::UnaryOp { op, expr } => {
                let (inner, nullable) = self.expr_type(expr)?;
                match op {
                    UnaryOperator::Not => Ok((JdbcType::Boolean, nullable)),
                    _ => Ok((inner, nullable)),
                }
            }
            Expr::BinaryOp { left, op, right } => {
                let (l, l_null) = self.expr_type(left)?;
                let (r, r_null) = self.expr_type(right)?;
                let nullable = l_null || r_null;
                let jdbc_type = match op {
                    BinaryOperator::Plus
                    | BinaryOperator::Minus
                    | BinaryOperator::Multiply
                    | BinaryOperator::Divide
                    | BinaryOperator::Modulo => {
                        if is_float_type(l) || is_float_type(r) {
                            JdbcType::Double
                        } else if l == JdbcType::Null {
                            r
                        } else {
                            l
                        }
                    }
                    BinaryOperator::StringConcat => JdbcType::Varchar,
                    _ => JdbcType::Boolean,
                };
                Ok((jdbc_type, nullable))
            }
            Expr::Function(function) => Err(SqidemError::UnsupportedSqlFeature(format!(
                "Function {} is not allowed here",
                function.name
            ))),
            other => Err(SqidemError::UnsupportedSqlFeature(format!(
                "Expression: {}",
                other
            ))),
        }
    }

    /// Evaluate an expression against a row of the scope's table
    fn eval(&self, expr: &Expr, row: &[Value]) -> SqidemResult<Value> {
        if let Some(index) = self.column_ref(expr) {
            let index = index?;
            return row
                .get(index)
                .cloned()
                .ok_or_else(|| SqidemError::ColumnNotFound(format!("#{}", index + 1)));
        }
        match expr {
            Expr::Value(value) => literal(value),
            Expr::Nested(inner) => self.eval(inner, row),
            Expr::IsNull(inner) => Ok(Value::Boolean(self.eval(inner, row)?.is_null())),
            Expr::IsNotNull(inner) => Ok(Value::Boolean(!self.eval(inner, row)?.is_null())),
            Expr::UnaryOp { op, expr } => unary(op, self.eval(expr, row)?),
            Expr::BinaryOp { left, op, right } => {
                let l = self.eval(left, row)?;
                let r = self.eval(right, row)?;
                binary(op, l, r)
            }
            Expr::Function(function) => Err(SqidemError::UnsupportedSqlFeature(format!(
                "Function {} is not allowed here",
                function.name
            ))),
            other => Err(SqidemError::UnsupportedSqlFeature(format!(
                "Expression: {}",
                other
            ))),
        }
    }

    /// Whether a row satisfies an optional WHERE predicate; unknown is false
    fn matches(&self, predicate: Option<&Expr>, row: &[Value]) -> SqidemResult<bool> {
        match predicate {
            None => Ok(true),
            Some(expr) => Ok(truth(self.eval(expr, row)?)?.unwrap_or(false)),
        }
    }
}

fn literal(value: &SqlValue) -> SqidemResult<Value> {
    match value {
        SqlValue::Number(text, _) => {
            if let Ok(i) = text.parse::<i64>() {
                Ok(Value::Integer(i))
            } else {
                text.parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| SqidemError::TypeError(format!("Invalid number: {}", text)))
            }
        }
        SqlValue::SingleQuotedString(s) | SqlValue::DoubleQuotedString(s) => {
            Ok(Value::String(s.clone()))
        }
        SqlValue::Boolean(b) => Ok(Value::Boolean(*b)),
        SqlValue::Null => Ok(Value::Null),
        other => Err(SqidemError::UnsupportedSqlFeature(format!(
            "Literal: {}",
            other
        ))),
    }
}

/// Boolean view of a value; NULL is unknown
fn truth(value: Value) -> SqidemResult<Option<bool>> {
    match value {
        Value::Null => Ok(None),
        Value::Boolean(b) => Ok(Some(b)),
        other => Err(SqidemError::TypeError(format!(
            "Expected a boolean, got {} value '{}'",
            other.jdbc_type(),
            other
        ))),
    }
}

fn unary(op: &UnaryOperator, value: Value) -> SqidemResult<Value> {
    match (op, value) {
        (_, Value::Null) => Ok(Value::Null),
        (UnaryOperator::Not, v) => Ok(Value::Boolean(!truth(v)?.unwrap_or(false))),
        (UnaryOperator::Plus, v @ (Value::Integer(_) | Value::Float(_))) => Ok(v),
        (UnaryOperator::Minus, Value::Integer(i)) => i
            .checked_neg()
            .map(Value::Integer)
            .ok_or_else(|| SqidemError::TypeError("Integer overflow".to_string())),
        (UnaryOperator::Minus, Value::Float(f)) => Ok(Value::Float(-f)),
        (op, v) => Err(SqidemError::TypeError(format!(
            "Cannot apply {} to {} value '{}'",
            op,
            v.jdbc_type(),
            v
        ))),
    }
}

fn binary(op: &BinaryOperator, l: Value, r: Value) -> SqidemResult<Value> {
    match op {
        BinaryOperator::And => {
            let (l, r) = (truth(l)?, truth(r)?);
            Ok(match (l, r) {
                (Some(false), _) | (_, Some(false)) => Value::Boolean(false),
                (Some(true), Some(true)) => Value::Boolean(true),
                _ => Value::Null,
            })
        }
        BinaryOperator::Or => {
            let (l, r) = (truth(l)?, truth(r)?);
            Ok(match (l, r) {
                (Some(true), _) | (_, Some(true)) => Value::Boolean(true),
                (Some(false), Some(false)) => Value::Boolean(false),
                _ => Value::Null,
            })
        }
        BinaryOperator::Eq
        | BinaryOperator::NotEq
        | BinaryOperator::Lt
        | BinaryOperator::LtEq
        | BinaryOperator::Gt
        | BinaryOperator::GtEq => {
            let ordering = match l.compare(&r)? {
                Some(ordering) => ordering,
                None => return Ok(Value::Null),
            };
            let result = match op {
                BinaryOperator::Eq => ordering == Ordering::Equal,
                BinaryOperator::NotEq => ordering != Ordering::Equal,
                BinaryOperator::Lt => ordering == Ordering::Less,
                BinaryOperator::LtEq => ordering != Ordering::Greater,
                BinaryOperator::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Value::Boolean(result))
        }
        BinaryOperator::StringConcat => {
            if l.is_null() || r.is_null() {
                Ok(Value::Null)
            } else {
                Ok(Value::String(format!("{}{}", l, r)))
            }
        }
        BinaryOperator::Plus
        | BinaryOperator::Minus
        | BinaryOperator::Multiply
        | BinaryOperator::Divide
        | BinaryOperator::Modulo => arithmetic(op, l, r),
        other => Err(SqidemError::UnsupportedSqlFeature(format!(
            "Operator {}",
            other
        ))),
    }
}

fn arithmetic(op: &BinaryOperator, l: Value, r: Value) -> SqidemResult<Value> {
    match (&l, &r) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Integer(a), Value::Integer(b)) => {
            let (a, b) = (*a, *b);
            if b == 0 && matches!(op, BinaryOperator::Divide | BinaryOperator::Modulo) {
                return Err(SqidemError::DivideByZero);
            }
            let result = match op {
                BinaryOperator::Plus => a.checked_add(b),
                BinaryOperator::Minus => a.checked_sub(b),
                BinaryOperator::Multiply => a.checked_mul(b),
                BinaryOperator::Divide => a.checked_div(b),
                _ => a.checked_rem(b),
            };
            result
                .map(Value::Integer)
                .ok_or_else(|| SqidemError::TypeError("Integer overflow".to_string()))
        }
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => {
                if b == 0.0 && matches!(op, BinaryOperator::Divide | BinaryOperator::Modulo) {
                    return Err(SqidemError::DivideByZero);
                }
                Ok(Value::Float(match op {
                    BinaryOperator::Plus => a + b,
                    BinaryOperator::Minus => a - b,
                    BinaryOperator::Multiply => a * b,
                    BinaryOperator::Divide => a / b,
                    _ => a % b,
                }))
            }
            _ => Err(SqidemError::TypeError(format!(
                "Cannot apply {} to {} and {}",
                op,
                l.jdbc_type(),
                r.jdbc_type()
            ))),
        },
    }
}

enum OutputKind<'a> {
    Column(usize),
    Expr(&'a Expr),
    Aggregate {
        function: AggregateFunction,
        /// `None` for `COUNT(*)`
        argument: Option<&'a Expr>,
    },
}

/// One column of a query's output
struct Output<'a> {
    kind: OutputKind<'a>,
    meta: ColumnMeta,
    /// Source text shown by `explain`
    source: String,
}

enum SortTarget<'a> {
    Output(usize),
    Expr(&'a Expr),
}

struct SortKey<'a> {
    target: SortTarget<'a>,
    descending: bool,
    nulls_first: bool,
}

/// A validated single-table SELECT
pub struct QueryPlan<'a> {
    scope: Scope<'a>,
    filter: Option<&'a Expr>,
    outputs: Vec<Output<'a>>,
    aggregate: bool,
    order_by: &'a [OrderByExpr],
    sort_keys: Vec<SortKey<'a>>,
    limit: Option<usize>,
}

impl<'a> QueryPlan<'a> {
    /// Resolve tables, columns and types of a query
    pub fn build(query: &'a Query, database: &'a Database) -> SqidemResult<Self> {
        if query.with.is_some() {
            return Err(SqidemError::UnsupportedSqlFeature("WITH".to_string()));
        }
        if query.offset.is_some() {
            return Err(SqidemError::UnsupportedSqlFeature("OFFSET".to_string()));
        }
        let select = match query.body.as_ref() {
            SetExpr::Select(select) => select,
            other => {
                return Err(SqidemError::UnsupportedSqlFeature(format!(
                    "Query body: {}",
                    other
                )))
            }
        };
        if !select.group_by.is_empty() {
            return Err(SqidemError::UnsupportedSqlFeature("GROUP BY".to_string()));
        }
        if select.having.is_some() {
            return Err(SqidemError::UnsupportedSqlFeature("HAVING".to_string()));
        }

        let scope = match select.from.as_slice() {
            [] => Scope::empty(),
            [from] => Scope::of(database.get_table(&table_name(from)?)?),
            _ => {
                return Err(SqidemError::UnsupportedSqlFeature(
                    "Queries over more than one table".to_string(),
                ))
            }
        };

        if let Some(filter) = &select.selection {
            scope.expr_type(filter)?;
        }

        let mut outputs = Vec::new();
        for item in &select.projection {
            match item {
                SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                    let table = scope.table.ok_or_else(|| {
                        SqidemError::InvalidSqlQuery("SELECT * requires a FROM clause".to_string())
                    })?;
                    for (index, column) in table.columns().iter().enumerate() {
                        outputs.push(Output {
                            kind: OutputKind::Column(index),
                            meta: column.meta(),
                            source: column.name.clone(),
                        });
                    }
                }
                SelectItem::UnnamedExpr(expr) => {
                    let position = outputs.len();
                    outputs.push(Self::output(scope, expr, None, position)?);
                }
                SelectItem::ExprWithAlias { expr, alias } => {
                    let position = outputs.len();
                    outputs.push(Self::output(scope, expr, Some(&alias.value), position)?);
                }
            }
        }

        let aggregate = outputs
            .iter()
            .any(|o| matches!(o.kind, OutputKind::Aggregate { .. }));
        if aggregate {
            if let Some(plain) = outputs
                .iter()
                .find(|o| !matches!(o.kind, OutputKind::Aggregate { .. }))
            {
                return Err(SqidemError::InvalidSqlQuery(format!(
                    "Expression '{}' is not being aggregated",
                    plain.source
                )));
            }
        }

        let mut sort_keys = Vec::with_capacity(query.order_by.len());
        for order in &query.order_by {
            let target = Self::sort_target(scope, &outputs, &order.expr, aggregate)?;
            let descending = order.asc == Some(false);
            sort_keys.push(SortKey {
                target,
                descending,
                nulls_first: order.nulls_first.unwrap_or(descending),
            });
        }

        let limit = match &query.limit {
            None => None,
            Some(Expr::Value(SqlValue::Number(text, _))) => {
                Some(text.parse::<usize>().map_err(|_| {
                    SqidemError::InvalidSqlQuery(format!("Invalid LIMIT: {}", text))
                })?)
            }
            Some(other) => {
                return Err(SqidemError::InvalidSqlQuery(format!(
                    "Invalid LIMIT: {}",
                    other
                )))
            }
        };

        Ok(QueryPlan {
            scope,
            filter: select.selection.as_ref(),
            outputs,
            aggregate,
            order_by: &query.order_by,
            sort_keys,
            limit,
        })
    }

    fn output(
        scope: Scope<'a>,
        expr: &'a Expr,
        alias: Option<&str>,
        position: usize,
    ) -> SqidemResult<Output<'a>> {
        if let Expr::Function(function) = expr {
            return Self::aggregate_output(scope, function, alias, position);
        }
        if let Some(index) = scope.column_ref(expr) {
            let index = index?;
            let column = scope.column_def(index)?;
            let mut meta = column.meta();
            if let Some(alias) = alias {
                meta.label = alias.to_string();
            }
            return Ok(Output {
                kind: OutputKind::Column(index),
                meta,
                source: column.name.clone(),
            });
        }
        let (jdbc_type, nullable) = scope.expr_type(expr)?;
        let label = alias
            .map(str::to_string)
            .unwrap_or_else(|| format!("EXPR${}", position));
        Ok(Output {
            kind: OutputKind::Expr(expr),
            meta: ColumnMeta::new(&label, jdbc_type).with_nullable(nullable),
            source: expr.to_string(),
        })
    }

    fn aggregate_output(
        scope: Scope<'a>,
        function: &'a Function,
        alias: Option<&str>,
        position: usize,
    ) -> SqidemResult<Output<'a>> {
        let name = object_name(&function.name)?;
        let aggregate = AggregateFunction::from_name(&name).ok_or_else(|| {
            SqidemError::UnsupportedSqlFeature(format!("Unsupported function: {}", name))
        })?;
        if function.distinct {
            return Err(SqidemError::UnsupportedSqlFeature(format!(
                "{}(DISTINCT ...)",
                aggregate
            )));
        }
        let argument = match function.args.as_slice() {
            [FunctionArg::Unnamed(FunctionArgExpr::Wildcard)]
                if aggregate == AggregateFunction::Count =>
            {
                None
            }
            [FunctionArg::Unnamed(FunctionArgExpr::Expr(expr))] => Some(expr),
            _ => {
                return Err(SqidemError::InvalidSqlQuery(format!(
                    "{} function requires exactly one argument",
                    aggregate
                )))
            }
        };
        let argument_type = match argument {
            Some(expr) => scope.expr_type(expr)?.0,
            None => JdbcType::BigInt,
        };
        let label = alias
            .map(str::to_string)
            .unwrap_or_else(|| format!("EXPR${}", position));
        let meta = ColumnMeta::new(&label, aggregate.result_type(argument_type))
            .with_nullable(aggregate != AggregateFunction::Count);
        Ok(Output {
            kind: OutputKind::Aggregate {
                function: aggregate,
                argument,
            },
            meta,
            source: function.to_string().to_uppercase(),
        })
    }

    fn sort_target(
        scope: Scope<'a>,
        outputs: &[Output<'a>],
        expr: &'a Expr,
        aggregate: bool,
    ) -> SqidemResult<SortTarget<'a>> {
        match expr {
            Expr::Value(SqlValue::Number(text, _)) => {
                let position = text.parse::<usize>().unwrap_or(0);
                if position == 0 || position > outputs.len() {
                    return Err(SqidemError::InvalidSqlQuery(format!(
                        "ORDER BY position {} is not in the select list",
                        text
                    )));
                }
                Ok(SortTarget::Output(position - 1))
            }
            Expr::Identifier(ident) => {
                if let Some(index) = outputs
                    .iter()
                    .position(|o| o.meta.label.eq_ignore_ascii_case(&ident.value))
                {
                    return Ok(SortTarget::Output(index));
                }
                Self::sort_expr(scope, expr, aggregate)
            }
            _ => Self::sort_expr(scope, expr, aggregate),
        }
    }

    fn sort_expr(scope: Scope<'a>, expr: &'a Expr, aggregate: bool) -> SqidemResult<SortTarget<'a>> {
        if aggregate {
            return Err(SqidemError::InvalidSqlQuery(format!(
                "ORDER BY expression '{}' must appear in the select list",
                expr
            )));
        }
        scope.expr_type(expr)?;
        Ok(SortTarget::Expr(expr))
    }

    /// Output column metadata
    pub fn columns(&self) -> Vec<ColumnMeta> {
        self.outputs.iter().map(|o| o.meta.clone()).collect()
    }

    /// Run the query
    pub fn execute(&self) -> SqidemResult<ResultSet> {
        let empty: &[Value] = &[];
        let source: Vec<&[Value]> = match self.scope.table {
            Some(table) => table.rows().iter().map(Vec::as_slice).collect(),
            None => vec![empty],
        };

        let mut filtered = Vec::with_capacity(source.len());
        for row in source {
            if self.scope.matches(self.filter, row)? {
                filtered.push(row);
            }
        }

        // Each entry is (sort keys, output row)
        let mut produced: Vec<(Vec<Value>, Vec<Value>)> = Vec::new();
        if self.aggregate {
            let mut out = Vec::with_capacity(self.outputs.len());
            for output in &self.outputs {
                out.push(self.aggregate_value(output, &filtered)?);
            }
            let keys = self.sort_values(&out, empty)?;
            produced.push((keys, out));
        } else {
            for row in filtered {
                let mut out = Vec::with_capacity(self.outputs.len());
                for output in &self.outputs {
                    out.push(match output.kind {
                        OutputKind::Column(index) => row[index].clone(),
                        OutputKind::Expr(expr) => self.scope.eval(expr, row)?,
                        OutputKind::Aggregate { .. } => {
                            return Err(SqidemError::InvalidSqlQuery(
                                "Aggregate in a non-aggregate query".to_string(),
                            ))
                        }
                    });
                }
                let keys = self.sort_values(&out, row)?;
                produced.push((keys, out));
            }
        }

        if !self.sort_keys.is_empty() {
            produced.sort_by(|(a, _), (b, _)| self.compare_keys(a, b));
        }
        if let Some(limit) = self.limit {
            produced.truncate(limit);
        }

        let mut result = ResultSet::new(self.columns());
        for (_, row) in produced {
            result.push_row(row.iter().map(Value::to_field).collect())?;
        }
        Ok(result)
    }

    fn aggregate_value(&self, output: &Output<'a>, rows: &[&[Value]]) -> SqidemResult<Value> {
        match output.kind {
            OutputKind::Aggregate { function, argument } => {
                let values = rows
                    .iter()
                    .map(|row| match argument {
                        Some(expr) => self.scope.eval(expr, row),
                        None => Ok(Value::Integer(1)),
                    })
                    .collect::<SqidemResult<Vec<_>>>()?;
                function.execute(&values)
            }
            _ => Err(SqidemError::InvalidSqlQuery(format!(
                "Expression '{}' is not being aggregated",
                output.source
            ))),
        }
    }

    fn sort_values(&self, out: &[Value], row: &[Value]) -> SqidemResult<Vec<Value>> {
        self.sort_keys
            .iter()
            .map(|key| match key.target {
                SortTarget::Output(index) => Ok(out[index].clone()),
                SortTarget::Expr(expr) => self.scope.eval(expr, row),
            })
            .collect()
    }

    fn compare_keys(&self, a: &[Value], b: &[Value]) -> Ordering {
        for (key, (x, y)) in self.sort_keys.iter().zip(a.iter().zip(b)) {
            let ordering = match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) if key.nulls_first => Ordering::Less,
                (true, false) => Ordering::Greater,
                (false, true) if key.nulls_first => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) if key.descending => y.sort_cmp(x),
                (false, false) => x.sort_cmp(y),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }

    /// Operator tree, outermost operator first, children indented
    pub fn explain(&self) -> Vec<String> {
        let mut operators = Vec::new();
        if let Some(limit) = self.limit {
            operators.push(format!("Limit(fetch=[{}])", limit));
        }
        if !self.order_by.is_empty() {
            let keys = self
                .order_by
                .iter()
                .map(|o| o.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            operators.push(format!("Sort(keys=[{}])", keys));
        }
        let columns = self
            .outputs
            .iter()
            .map(|o| format!("{}=[{}]", o.meta.label, o.source))
            .collect::<Vec<_>>()
            .join(", ");
        if self.aggregate {
            operators.push(format!("Aggregate({})", columns));
        } else {
            operators.push(format!("Project({})", columns));
        }
        if let Some(filter) = self.filter {
            operators.push(format!("Filter(condition=[{}])", filter));
        }
        match self.scope.table {
            Some(table) => operators.push(format!("Scan(table=[{}])", table.name())),
            None => operators.push("Values(rows=[1])".to_string()),
        }
        operators
            .into_iter()
            .enumerate()
            .map(|(depth, op)| format!("{}{}", "  ".repeat(depth), op))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Database {
        let mut db = Database::new();
        let mut exec = SqlExecutor::new(&mut db);
        exec.execute("CREATE TABLE emp (empno INTEGER NOT NULL, ename VARCHAR(10), deptno INTEGER, sal DOUBLE)")
            .unwrap();
        exec.execute(
            "INSERT INTO emp VALUES (1, 'SMITH', 20, 800), (2, 'ALLEN', 30, 1600), \
             (3, 'WARD', 30, 1250), (4, 'KING', 10, 5000), (5, 'NOBODY', NULL, NULL)",
        )
        .unwrap();
        db
    }

    fn rows(db: &mut Database, sql: &str) -> Vec<Vec<Option<String>>> {
        match SqlExecutor::new(db).execute(sql).unwrap() {
            StatementResult::Rows(rs) => rs.rows().to_vec(),
            StatementResult::Count(n) => panic!("expected rows, got count {}", n),
        }
    }

    fn s(text: &str) -> Option<String> {
        Some(text.to_string())
    }

    #[test]
    fn test_select_with_filter_and_order() {
        let mut db = sample();
        let result = rows(
            &mut db,
            "select ename, sal * 2 as dbl from emp where deptno = 30 order by dbl desc",
        );
        assert_eq!(
            result,
            vec![vec![s("ALLEN"), s("3200.0")], vec![s("WARD"), s("2500.0")]]
        );
    }

    #[test]
    fn test_order_by_position_and_limit() {
        let mut db = sample();
        let result = rows(&mut db, "select empno, deptno from emp order by 2, 1 limit 3");
        assert_eq!(
            result,
            vec![
                vec![s("4"), s("10")],
                vec![s("1"), s("20")],
                vec![s("2"), s("30")]
            ]
        );
    }

    #[test]
    fn test_nulls_sort_last_ascending() {
        let mut db = sample();
        let result = rows(&mut db, "select deptno from emp order by deptno");
        assert_eq!(result.last().unwrap(), &vec![None]);
        let result = rows(&mut db, "select deptno from emp order by deptno desc");
        assert_eq!(result.first().unwrap(), &vec![None]);
    }

    #[test]
    fn test_is_null_and_three_valued_logic() {
        let mut db = sample();
        assert_eq!(
            rows(&mut db, "select empno from emp where deptno is null"),
            vec![vec![s("5")]]
        );
        // NULL = NULL is unknown, so no rows
        assert!(rows(&mut db, "select empno from emp where deptno = null").is_empty());
        assert_eq!(
            rows(&mut db, "select count(*) from emp where not (deptno = 30)").len(),
            1
        );
    }

    #[test]
    fn test_aggregates() {
        let mut db = sample();
        let result = rows(
            &mut db,
            "select count(*) as c, count(deptno), sum(empno), avg(empno), min(ename), max(sal) from emp",
        );
        assert_eq!(
            result,
            vec![vec![
                s("5"),
                s("4"),
                s("15"),
                s("3.0"),
                s("ALLEN"),
                s("5000.0")
            ]]
        );
    }

    #[test]
    fn test_aggregate_rejects_plain_column() {
        let mut db = sample();
        let err = SqlExecutor::new(&mut db)
            .execute("select ename, count(*) from emp")
            .unwrap_err();
        assert!(err.to_string().contains("not being aggregated"));
    }

    #[test]
    fn test_select_without_from() {
        let mut db = Database::new();
        assert_eq!(
            rows(&mut db, "select 1 + 2, 'a' || 'b', 7 / 2"),
            vec![vec![s("3"), s("ab"), s("3")]]
        );
        let err = SqlExecutor::new(&mut db).execute("select 1 / 0").unwrap_err();
        assert!(matches!(err, SqidemError::DivideByZero));
    }

    #[test]
    fn test_update_and_delete_counts() {
        let mut db = sample();
        let mut exec = SqlExecutor::new(&mut db);
        let updated = exec
            .execute("update emp set sal = sal + 100 where deptno = 30")
            .unwrap();
        assert_eq!(updated, StatementResult::Count(2));
        let deleted = exec.execute("delete from emp where sal > 1000").unwrap();
        assert_eq!(deleted, StatementResult::Count(3));
        assert_eq!(rows(&mut db, "select empno from emp").len(), 2);
    }

    #[test]
    fn test_insert_is_atomic() {
        let mut db = sample();
        let err = SqlExecutor::new(&mut db)
            .execute("insert into emp (empno, ename) values (6, 'OK'), (NULL, 'BAD')")
            .unwrap_err();
        assert!(err.to_string().contains("cannot be NULL"));
        assert_eq!(rows(&mut db, "select * from emp").len(), 5);
    }

    #[test]
    fn test_create_and_drop() {
        let mut db = Database::new();
        let mut exec = SqlExecutor::new(&mut db);
        exec.execute("create table t (a int)").unwrap();
        assert!(matches!(
            exec.execute("create table T (b int)"),
            Err(SqidemError::TableAlreadyExists(_))
        ));
        assert_eq!(
            exec.execute("create table if not exists t (b int)").unwrap(),
            StatementResult::Count(0)
        );
        exec.execute("drop table t").unwrap();
        assert!(matches!(
            exec.execute("drop table t"),
            Err(SqidemError::TableNotFound(_))
        ));
        exec.execute("drop table if exists t").unwrap();
    }

    #[test]
    fn test_unknown_column_and_table() {
        let mut db = sample();
        let exec = SqlExecutor::new(&mut db);
        assert!(matches!(
            exec.query("select bogus from emp"),
            Err(SqidemError::ColumnNotFound(_))
        ));
        assert!(matches!(
            exec.query("select * from nope"),
            Err(SqidemError::TableNotFound(_))
        ));
    }

    #[test]
    fn test_query_rejects_dml_without_running_it() {
        let mut db = sample();
        let exec = SqlExecutor::new(&mut db);
        assert!(exec.query("delete from emp").is_err());
        assert_eq!(exec.query("select * from emp").unwrap().row_count(), 5);
    }

    #[test]
    fn test_describe() {
        let mut db = sample();
        let exec = SqlExecutor::new(&mut db);
        let columns = exec
            .describe("select empno, ename as name, sal + 1, count(*) from emp where 1 = 0")
            .unwrap_err();
        assert!(columns.to_string().contains("not being aggregated"));

        let columns = exec.describe("select empno, ename as name, sal + 1 from emp").unwrap();
        assert_eq!(columns[0], ColumnMeta::new("empno", JdbcType::Integer).with_nullable(false));
        assert_eq!(
            columns[1],
            ColumnMeta::new("name", JdbcType::Varchar).with_precision(10)
        );
        assert_eq!(columns[2].label, "EXPR$2");
        assert_eq!(columns[2].jdbc_type, JdbcType::Double);
    }

    #[test]
    fn test_explain() {
        let mut db = sample();
        let exec = SqlExecutor::new(&mut db);
        let plan = exec
            .explain("select ename from emp where deptno = 10 order by ename limit 2")
            .unwrap();
        assert_eq!(
            plan,
            vec![
                "Limit(fetch=[2])",
                "  Sort(keys=[ename])",
                "    Project(ename=[ename])",
                "      Filter(condition=[deptno = 10])",
                "        Scan(table=[emp])",
            ]
        );
        let plan = exec.explain("select count(*) as c from emp").unwrap();
        assert_eq!(plan, vec!["Aggregate(c=[COUNT(*)])", "  Scan(table=[emp])"]);
        let plan = exec.explain("select 1").unwrap();
        assert_eq!(plan, vec!["Project(EXPR$0=[1])", "  Values(rows=[1])"]);
    }

    #[test]
    fn test_map_data_type() {
        let (t, p) = map_data_type(&DataType::Varchar(None)).unwrap();
        assert_eq!((t, p), (JdbcType::Varchar, 0));
        let (t, _) = map_data_type(&DataType::Boolean).unwrap();
        assert_eq!(t, JdbcType::Boolean);
    }
}
