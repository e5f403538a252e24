use std::str::FromStr;

use chrono::Datelike;
use rust_decimal::Decimal;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;
use crate::payload::parse_day;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertItem {
        id: Ulid,
        owner: String,
        price_per_day: Decimal,
        window: Option<AvailabilityWindow>,
    },
    UpdateItem {
        id: Ulid,
        patch: ItemPatch,
    },
    DeleteItem {
        id: Ulid,
    },
    InsertBooking {
        id: Ulid,
        item_id: Ulid,
        renter: String,
        start: Option<Day>,
        end: Option<Day>,
    },
    UpdateBookingStatus {
        id: Ulid,
        status: ReservationStatus,
    },
    SelectItems {
        id: Option<Ulid>,
        owner: Option<String>,
    },
    SelectBookings {
        filter: BookingFilter,
    },
    SelectQuote {
        item_id: Ulid,
        start: Option<Day>,
        end: Option<Day>,
    },
    SelectCalendar {
        item_id: Ulid,
        year: i32,
        month: u32,
        today: Option<Day>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BookingFilter {
    Id(Ulid),
    Item(Ulid),
    Renter(String),
    Owner(String),
}

const ITEM_COLUMNS: &[&str] = &["id", "owner", "price_per_day", "availability_start", "availability_end"];
const BOOKING_COLUMNS: &[&str] = &["id", "item_id", "username", "start_date", "end_date"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let defaults = match table.as_str() {
        "items" => ITEM_COLUMNS,
        "bookings" => BOOKING_COLUMNS,
        _ => return Err(SqlError::UnknownTable(table)),
    };
    let row = Row::from_insert(insert, defaults)?;

    match table.as_str() {
        "items" => Ok(Command::InsertItem {
            id: parse_ulid_expr(row.require("id")?)?,
            owner: parse_text_expr(row.require("owner")?)?,
            price_per_day: parse_decimal_expr(row.require("price_per_day")?)?,
            window: parse_window(row.get("availability_start"), row.get("availability_end"))?.flatten(),
        }),
        _ => Ok(Command::InsertBooking {
            id: parse_ulid_expr(row.require("id")?)?,
            item_id: parse_ulid_expr(row.require("item_id")?)?,
            renter: parse_text_expr(row.require("username")?)?,
            start: row.get("start_date").map(parse_day_or_null).transpose()?.flatten(),
            end: row.get("end_date").map(parse_day_or_null).transpose()?.flatten(),
        }),
    }
}

/// Column name → value for a single-row INSERT. Without a column list the
/// table's default column order applies.
struct Row {
    fields: Vec<(String, Expr)>,
}

impl Row {
    fn from_insert(insert: &ast::Insert, defaults: &[&str]) -> Result<Self, SqlError> {
        let rows = extract_insert_rows(insert)?;
        if rows.len() != 1 {
            return Err(SqlError::Unsupported("multi-row INSERT".into()));
        }
        let values = &rows[0];
        let names: Vec<String> = if insert.columns.is_empty() {
            defaults.iter().map(|c| c.to_string()).collect()
        } else {
            insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
        };
        if values.len() > names.len() || (!insert.columns.is_empty() && values.len() != names.len()) {
            return Err(SqlError::WrongArity("INSERT", names.len(), values.len()));
        }
        Ok(Self {
            fields: names.into_iter().zip(values.iter().cloned()).collect(),
        })
    }

    fn get(&self, column: &str) -> Option<&Expr> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, expr)| expr)
    }

    fn require(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(column))
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    relation: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;
    let mut set = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => {
                object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))?
            }
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        set.push((column, &a.value));
    }
    let lookup = |column: &str| set.iter().find(|(c, _)| c == column).map(|(_, v)| *v);

    match table.as_str() {
        "items" => {
            if let Some((column, _)) = set
                .iter()
                .find(|(c, _)| !matches!(c.as_str(), "price_per_day" | "availability_start" | "availability_end"))
            {
                return Err(SqlError::Unsupported(format!("cannot update items.{column}")));
            }
            let price_per_day = lookup("price_per_day").map(parse_decimal_expr).transpose()?;
            let window = parse_window(lookup("availability_start"), lookup("availability_end"))?;
            Ok(Command::UpdateItem {
                id,
                patch: ItemPatch { price_per_day, window },
            })
        }
        "bookings" => {
            if set.len() != 1 {
                return Err(SqlError::Unsupported("bookings: only status can be updated".into()));
            }
            let value = lookup("status").ok_or(SqlError::MissingColumn("status"))?;
            let status = ReservationStatus::from_str(&parse_text_expr(value)?)
                .map_err(|e| SqlError::Parse(e.to_string()))?;
            Ok(Command::UpdateBookingStatus { id, status })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Both bounds or neither. `Some(None)` means the window was explicitly
/// cleared with NULLs; `None` means it was not mentioned.
fn parse_window(
    start: Option<&Expr>,
    end: Option<&Expr>,
) -> Result<Option<Option<AvailabilityWindow>>, SqlError> {
    match (start, end) {
        (None, None) => Ok(None),
        (Some(s), Some(e)) => match (parse_day_or_null(s)?, parse_day_or_null(e)?) {
            (None, None) => Ok(Some(None)),
            (Some(s), Some(e)) => DateRange::try_new(s, e)
                .map(|w| Some(Some(w)))
                .ok_or_else(|| SqlError::Parse(format!("availability window starts after it ends: {s} > {e}"))),
            _ => Err(SqlError::Parse("availability_start and availability_end go together".into())),
        },
        _ => Err(SqlError::Parse("availability_start and availability_end go together".into())),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "items" => Ok(Command::DeleteItem { id }),
        "bookings" => Err(SqlError::Unsupported(
            "bookings are never deleted; decline them instead".into(),
        )),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }
    let filter = |column: &str| filters.iter().find(|(c, _)| c == column).map(|(_, v)| *v);
    let required = |column: &'static str| filter(column).ok_or(SqlError::MissingFilter(column));

    match table.as_str() {
        "items" => Ok(Command::SelectItems {
            id: filter("id").map(parse_ulid_expr).transpose()?,
            owner: filter("owner").map(parse_text_expr).transpose()?,
        }),
        "bookings" => {
            let filter = if let Some(v) = filter("id") {
                BookingFilter::Id(parse_ulid_expr(v)?)
            } else if let Some(v) = filter("item_id") {
                BookingFilter::Item(parse_ulid_expr(v)?)
            } else if let Some(v) = filter("username") {
                BookingFilter::Renter(parse_text_expr(v)?)
            } else if let Some(v) = filter("owner") {
                BookingFilter::Owner(parse_text_expr(v)?)
            } else {
                return Err(SqlError::MissingFilter("id, item_id, username or owner"));
            };
            Ok(Command::SelectBookings { filter })
        }
        "quote" => Ok(Command::SelectQuote {
            item_id: parse_ulid_expr(required("item_id")?)?,
            start: filter("start_date").map(parse_day_or_null).transpose()?.flatten(),
            end: filter("end_date").map(parse_day_or_null).transpose()?.flatten(),
        }),
        "calendar" => {
            let month_start = parse_day_expr(required("month_start")?)?;
            Ok(Command::SelectCalendar {
                item_id: parse_ulid_expr(required("item_id")?)?,
                year: month_start.year(),
                month: month_start.month(),
                today: filter("today").map(parse_day_expr).transpose()?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = x AND b = y AND ...` into `(column, value)` pairs.
fn collect_eq_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out)?;
                collect_eq_filters(right, out)
            }
            ast::BinaryOperator::Eq => {
                let column = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((column, right.as_ref()));
                Ok(())
            }
            _ => Err(SqlError::Unsupported(format!("operator {op}"))),
        },
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if values.rows.is_empty() => Err(SqlError::Parse("empty VALUES".into())),
        SetExpr::Values(values) => Ok(values.rows.as_slice()),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_decimal_expr(expr: &Expr) -> Result<Decimal, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return Ok(-parse_decimal_expr(expr)?);
    }
    match extract_value(expr) {
        Some(Value::Number(s, _)) | Some(Value::SingleQuotedString(s)) => {
            Decimal::from_str(s.trim()).map_err(|e| SqlError::Parse(format!("bad decimal {s:?}: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected number, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_day_expr(expr: &Expr) -> Result<Day, SqlError> {
    parse_day_or_null(expr)?.ok_or_else(|| SqlError::Parse("date must not be NULL".into()))
}

fn parse_day_or_null(expr: &Expr) -> Result<Option<Day>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => parse_day(s)
            .map(Some)
            .map_err(|e| SqlError::Parse(e.to_string())),
        Some(value) => Err(SqlError::Parse(format!("expected date string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
