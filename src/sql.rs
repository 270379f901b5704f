use std::collections::HashMap;

use chrono::{DateTime, NaiveDate};
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::engine::{Clock, SystemClock};
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom(NewRoom),
    UpdateRoom {
        id: Ulid,
        patch: RoomPatch,
    },
    DeleteRoom {
        id: Ulid,
    },
    SelectRooms {
        id: Option<Ulid>,
        filter: RoomFilter,
        page: PageRequest,
    },
    InsertGuest(NewGuest),
    UpdateGuest {
        id: Ulid,
        patch: GuestPatch,
    },
    DeleteGuest {
        id: Ulid,
    },
    SelectGuests {
        id: Option<Ulid>,
        page: PageRequest,
    },
    InsertBooking(NewBooking),
    UpdateBooking {
        id: Ulid,
        patch: BookingPatch,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectBookings {
        id: Option<Ulid>,
        filter: BookingFilter,
        page: PageRequest,
    },
    SelectRoomBookings {
        room_id: Ulid,
    },
    SelectGuestBookings {
        guest_id: Ulid,
    },
    SelectAvailability {
        room_id: Ulid,
        check_in: Ms,
        check_out: Ms,
    },
    SelectAvailableRooms {
        check_in: Ms,
        check_out: Ms,
        room_type: Option<RoomType>,
    },
    SelectFreeWindows {
        room_id: Ulid,
        from: Ms,
        to: Ms,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let stmts = parse_statements(sql)?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };
    statement_command(stmt)
}

/// Every statement of a `;`-separated script, in order.
pub fn parse_script(sql: &str) -> Result<Vec<Command>, SqlError> {
    let stmts = parse_statements(sql)?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    stmts.iter().map(statement_command).collect()
}

fn parse_statements(sql: &str) -> Result<Vec<Statement>, SqlError> {
    let dialect = PostgreSqlDialect {};
    Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))
}

fn statement_command(stmt: &Statement) -> Result<Command, SqlError> {
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── Literals ──────────────────────────────────────────────────

/// A SQL constant with the parser's span and quoting stripped away.
#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Null,
    Bool(bool),
    Number(String),
    Text(String),
}

impl Literal {
    fn from_expr(expr: &Expr) -> Result<Self, SqlError> {
        match expr {
            Expr::Value(ValueWithSpan { value, .. }) => match value {
                Value::Null => Ok(Literal::Null),
                Value::Boolean(b) => Ok(Literal::Bool(*b)),
                Value::Number(n, _) => Ok(Literal::Number(n.clone())),
                Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => {
                    Ok(Literal::Text(s.clone()))
                }
                other => Err(SqlError::Parse(format!("unsupported value: {other}"))),
            },
            Expr::UnaryOp {
                op: ast::UnaryOperator::Minus,
                expr,
            } => match Literal::from_expr(expr)? {
                Literal::Number(n) => Ok(Literal::Number(format!("-{n}"))),
                other => Err(SqlError::Parse(format!("cannot negate {other:?}"))),
            },
            _ => current_date_offset(expr)
                .map(|ms| Literal::Number(ms.to_string()))
                .ok_or_else(|| SqlError::Parse(format!("expected a constant, got {expr}"))),
        }
    }

    fn is_null(&self) -> bool {
        matches!(self, Literal::Null)
    }

    fn text(&self, column: &str) -> Result<&str, SqlError> {
        match self {
            Literal::Text(s) | Literal::Number(s) => Ok(s),
            _ => Err(SqlError::BadValue {
                column: column.to_string(),
                message: "expected text".into(),
            }),
        }
    }
}

/// `CURRENT_DATE [± n]`: the server's local midnight moved by whole days.
fn current_date_offset(expr: &Expr) -> Option<Ms> {
    match expr {
        Expr::Function(f)
            if matches!(f.args, ast::FunctionArguments::None)
                && object_name_last(&f.name).as_deref() == Some("current_date") =>
        {
            Some(SystemClock.start_of_today())
        }
        Expr::Nested(inner) => current_date_offset(inner),
        Expr::BinaryOp { left, op, right } => {
            let sign = match op {
                ast::BinaryOperator::Plus => 1,
                ast::BinaryOperator::Minus => -1,
                _ => return None,
            };
            let days: i64 = match Literal::from_expr(right).ok()? {
                Literal::Number(n) => n.parse().ok()?,
                _ => return None,
            };
            Some(current_date_offset(left)? + sign * days * DAY_MS)
        }
        _ => None,
    }
}

fn bad_value(column: &str, message: impl Into<String>) -> SqlError {
    SqlError::BadValue {
        column: column.to_string(),
        message: message.into(),
    }
}

fn ulid_value(column: &str, lit: &Literal) -> Result<Ulid, SqlError> {
    Ulid::from_string(lit.text(column)?.trim()).map_err(|e| bad_value(column, format!("bad ULID: {e}")))
}

fn string_value(column: &str, lit: &Literal) -> Result<String, SqlError> {
    lit.text(column).map(str::to_string)
}

fn optional_string(column: &str, lit: &Literal) -> Result<Option<String>, SqlError> {
    if lit.is_null() {
        return Ok(None);
    }
    string_value(column, lit).map(Some)
}

fn i64_value(column: &str, lit: &Literal) -> Result<i64, SqlError> {
    lit.text(column)?
        .trim()
        .parse()
        .map_err(|e| bad_value(column, format!("bad integer: {e}")))
}

fn u32_value(column: &str, lit: &Literal) -> Result<u32, SqlError> {
    let v = i64_value(column, lit)?;
    u32::try_from(v).map_err(|_| bad_value(column, format!("{v} out of range")))
}

fn usize_value(column: &str, lit: &Literal) -> Result<usize, SqlError> {
    let v = i64_value(column, lit)?;
    usize::try_from(v).map_err(|_| bad_value(column, format!("{v} out of range")))
}

fn f64_value(column: &str, lit: &Literal) -> Result<f64, SqlError> {
    lit.text(column)?
        .trim()
        .parse()
        .map_err(|e| bad_value(column, format!("bad number: {e}")))
}

fn enum_value<T>(column: &str, lit: &Literal) -> Result<T, SqlError>
where
    T: std::str::FromStr<Err = UnknownVariant>,
{
    lit.text(column)?
        .parse()
        .map_err(|e: UnknownVariant| bad_value(column, e.to_string()))
}

/// Unix milliseconds, `YYYY-MM-DD` (UTC midnight) or RFC 3339.
pub fn parse_instant(s: &str) -> Option<Ms> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<i64>() {
        return Some(ms);
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis());
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.timestamp_millis())
}

fn instant_value(column: &str, lit: &Literal) -> Result<Ms, SqlError> {
    parse_instant(lit.text(column)?)
        .ok_or_else(|| bad_value(column, "expected milliseconds, YYYY-MM-DD or RFC 3339"))
}

/// A JSON array of strings, or a comma-separated list.
pub fn parse_amenities(s: &str) -> Result<Vec<String>, String> {
    let s = s.trim();
    if s.starts_with('[') {
        return serde_json::from_str(s).map_err(|e| e.to_string());
    }
    Ok(s.split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .map(str::to_string)
        .collect())
}

fn amenities_value(column: &str, lit: &Literal) -> Result<Vec<String>, SqlError> {
    if lit.is_null() {
        return Ok(Vec::new());
    }
    parse_amenities(lit.text(column)?).map_err(|e| bad_value(column, e))
}

// ── Column maps ───────────────────────────────────────────────

/// `column → value` for one INSERT row or one UPDATE SET list.
struct Row {
    table: &'static str,
    values: HashMap<String, Literal>,
}

impl Row {
    fn new(table: &'static str, pairs: Vec<(String, Literal)>, allowed: &[&str]) -> Result<Self, SqlError> {
        let mut values = HashMap::with_capacity(pairs.len());
        for (column, lit) in pairs {
            if !allowed.contains(&column.as_str()) {
                return Err(SqlError::UnknownColumn { table, column });
            }
            if values.insert(column.clone(), lit).is_some() {
                return Err(SqlError::Parse(format!("column {column} given twice")));
            }
        }
        Ok(Self { table, values })
    }

    fn get(&self, column: &str) -> Option<&Literal> {
        self.values.get(column)
    }

    fn require(&self, column: &'static str) -> Result<&Literal, SqlError> {
        match self.values.get(column) {
            Some(lit) if !lit.is_null() => Ok(lit),
            _ => Err(SqlError::MissingColumn {
                table: self.table,
                column,
            }),
        }
    }

    /// `Some(parsed)` if present and non-null.
    fn opt<T>(
        &self,
        column: &str,
        parse: impl Fn(&str, &Literal) -> Result<T, SqlError>,
    ) -> Result<Option<T>, SqlError> {
        match self.values.get(column) {
            Some(lit) if !lit.is_null() => parse(column, lit).map(Some),
            _ => Ok(None),
        }
    }

    /// For clearable fields: absent → `None`, NULL → `Some(None)`.
    fn clearable(&self, column: &str) -> Result<Option<Option<String>>, SqlError> {
        self.values
            .get(column)
            .map(|lit| optional_string(column, lit))
            .transpose()
    }
}

const ROOM_COLUMNS: &[&str] = &["id", "number", "room_type", "price", "status", "capacity", "amenities"];
const GUEST_COLUMNS: &[&str] = &["id", "name", "email", "phone", "address", "id_number"];
const BOOKING_COLUMNS: &[&str] = &["id", "guest_id", "room_id", "check_in", "check_out", "notes", "status"];

fn table_columns(table: &str) -> Result<(&'static str, &'static [&'static str]), SqlError> {
    match table {
        "rooms" => Ok(("rooms", ROOM_COLUMNS)),
        "guests" => Ok(("guests", GUEST_COLUMNS)),
        "bookings" => Ok(("bookings", BOOKING_COLUMNS)),
        _ => Err(SqlError::UnknownTable(table.to_string())),
    }
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let (table, allowed) = table_columns(&table)?;
    let values = extract_insert_values(insert)?;
    if insert.columns.is_empty() {
        return Err(SqlError::Parse(format!(
            "INSERT INTO {table} needs an explicit column list"
        )));
    }
    if insert.columns.len() != values.len() {
        return Err(SqlError::WrongArity(table, insert.columns.len(), values.len()));
    }
    let pairs = insert
        .columns
        .iter()
        .zip(values.iter())
        .map(|(col, expr)| Ok((col.value.to_lowercase(), Literal::from_expr(expr)?)))
        .collect::<Result<Vec<_>, SqlError>>()?;
    let row = Row::new(table, pairs, allowed)?;

    match table {
        "rooms" => Ok(Command::InsertRoom(NewRoom {
            id: ulid_value("id", row.require("id")?)?,
            number: string_value("number", row.require("number")?)?,
            room_type: enum_value("room_type", row.require("room_type")?)?,
            price: f64_value("price", row.require("price")?)?,
            status: row.opt("status", enum_value)?,
            capacity: row.opt("capacity", u32_value)?,
            amenities: row.opt("amenities", amenities_value)?.unwrap_or_default(),
        })),
        "guests" => Ok(Command::InsertGuest(NewGuest {
            id: ulid_value("id", row.require("id")?)?,
            name: string_value("name", row.require("name")?)?,
            email: string_value("email", row.require("email")?)?,
            phone: string_value("phone", row.require("phone")?)?,
            address: row.opt("address", string_value)?,
            id_number: row.opt("id_number", string_value)?,
        })),
        _ => Ok(Command::InsertBooking(NewBooking {
            id: ulid_value("id", row.require("id")?)?,
            guest_id: ulid_value("guest_id", row.require("guest_id")?)?,
            room_id: ulid_value("room_id", row.require("room_id")?)?,
            check_in: instant_value("check_in", row.require("check_in")?)?,
            check_out: instant_value("check_out", row.require("check_out")?)?,
            notes: row.opt("notes", string_value)?,
            status: row.opt("status", enum_value)?,
        })),
    }
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let name = table_factor_name(&table.relation)?;
    let (table, allowed) = table_columns(&name)?;
    let id = extract_where_id(selection)?;

    let mut pairs = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        if column == "id" {
            return Err(SqlError::Unsupported("changing id".into()));
        }
        pairs.push((column, Literal::from_expr(&assignment.value)?));
    }
    let row = Row::new(table, pairs, allowed)?;

    match table {
        "rooms" => Ok(Command::UpdateRoom {
            id,
            patch: RoomPatch {
                number: row.opt("number", string_value)?,
                room_type: row.opt("room_type", enum_value)?,
                price: row.opt("price", f64_value)?,
                status: row.opt("status", enum_value)?,
                capacity: row.opt("capacity", u32_value)?,
                amenities: match row.get("amenities") {
                    Some(lit) => Some(amenities_value("amenities", lit)?),
                    None => None,
                },
            },
        }),
        "guests" => Ok(Command::UpdateGuest {
            id,
            patch: GuestPatch {
                name: row.opt("name", string_value)?,
                email: row.opt("email", string_value)?,
                phone: row.opt("phone", string_value)?,
                address: row.clearable("address")?,
                id_number: row.clearable("id_number")?,
            },
        }),
        _ => {
            for fixed in ["guest_id", "room_id"] {
                if row.get(fixed).is_some() {
                    return Err(SqlError::Unsupported(format!("changing {fixed}")));
                }
            }
            Ok(Command::UpdateBooking {
                id,
                patch: BookingPatch {
                    check_in: row.opt("check_in", instant_value)?,
                    check_out: row.opt("check_out", instant_value)?,
                    notes: row.clearable("notes")?,
                    status: row.opt("status", enum_value)?,
                },
            })
        }
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "rooms" => Ok(Command::DeleteRoom { id }),
        "guests" => Ok(Command::DeleteGuest { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cmp {
    Eq,
    GtEq,
    LtEq,
}

/// Conjunction of `column <op> constant` terms from a WHERE clause.
#[derive(Debug, Default)]
struct Conditions {
    terms: Vec<(String, Cmp, Literal)>,
}

impl Conditions {
    fn from_selection(selection: &Option<Expr>) -> Result<Self, SqlError> {
        let mut conds = Self::default();
        if let Some(expr) = selection {
            conds.collect(expr)?;
        }
        Ok(conds)
    }

    fn collect(&mut self, expr: &Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.collect(inner),
            Expr::BinaryOp { left, op, right } => {
                let cmp = match op {
                    ast::BinaryOperator::And => {
                        self.collect(left)?;
                        return self.collect(right);
                    }
                    ast::BinaryOperator::Eq => Cmp::Eq,
                    ast::BinaryOperator::GtEq => Cmp::GtEq,
                    ast::BinaryOperator::LtEq => Cmp::LtEq,
                    other => {
                        return Err(SqlError::Unsupported(format!("operator {other} in WHERE")));
                    }
                };
                let column = expr_column_name(left)
                    .ok_or_else(|| SqlError::Parse(format!("expected a column, got {left}")))?;
                self.terms.push((column, cmp, Literal::from_expr(right)?));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
        }
    }

    fn check_columns(&self, table: &'static str, allowed: &[&str]) -> Result<(), SqlError> {
        for (column, _, _) in &self.terms {
            if !allowed.contains(&column.as_str()) {
                return Err(SqlError::UnknownColumn {
                    table,
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }

    fn find(&self, column: &str, ops: &[Cmp]) -> Option<&Literal> {
        self.terms
            .iter()
            .find(|(c, op, _)| c == column && ops.contains(op))
            .map(|(_, _, lit)| lit)
    }

    fn eq<T>(
        &self,
        column: &str,
        parse: impl Fn(&str, &Literal) -> Result<T, SqlError>,
    ) -> Result<Option<T>, SqlError> {
        self.find(column, &[Cmp::Eq])
            .map(|lit| parse(column, lit))
            .transpose()
    }

    /// Lower bound of a window: `column >= x` or `column = x`.
    fn lower(&self, column: &'static str) -> Result<Ms, SqlError> {
        let lit = self
            .find(column, &[Cmp::GtEq, Cmp::Eq])
            .ok_or(SqlError::MissingFilter(column))?;
        instant_value(column, lit)
    }

    /// Upper bound of a window: `column <= x` or `column = x`.
    fn upper(&self, column: &'static str) -> Result<Ms, SqlError> {
        let lit = self
            .find(column, &[Cmp::LtEq, Cmp::Eq])
            .ok_or(SqlError::MissingFilter(column))?;
        instant_value(column, lit)
    }

    fn page(&self) -> Result<PageRequest, SqlError> {
        let defaults = PageRequest::default();
        Ok(PageRequest {
            page: self.eq("page", usize_value)?.unwrap_or(defaults.page),
            page_size: self.eq("page_size", usize_value)?.unwrap_or(defaults.page_size),
        })
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let conds = Conditions::from_selection(&select.selection)?;

    match table.as_str() {
        "rooms" => {
            conds.check_columns("rooms", &["id", "status", "room_type", "page", "page_size"])?;
            Ok(Command::SelectRooms {
                id: conds.eq("id", ulid_value)?,
                filter: RoomFilter {
                    status: conds.eq("status", enum_value)?,
                    room_type: conds.eq("room_type", enum_value)?,
                },
                page: conds.page()?,
            })
        }
        "guests" => {
            conds.check_columns("guests", &["id", "page", "page_size"])?;
            Ok(Command::SelectGuests {
                id: conds.eq("id", ulid_value)?,
                page: conds.page()?,
            })
        }
        "bookings" => {
            conds.check_columns(
                "bookings",
                &["id", "status", "room_id", "guest_id", "page", "page_size"],
            )?;
            Ok(Command::SelectBookings {
                id: conds.eq("id", ulid_value)?,
                filter: BookingFilter {
                    status: conds.eq("status", enum_value)?,
                    room_id: conds.eq("room_id", ulid_value)?,
                    guest_id: conds.eq("guest_id", ulid_value)?,
                },
                page: conds.page()?,
            })
        }
        "room_bookings" => {
            conds.check_columns("room_bookings", &["room_id"])?;
            Ok(Command::SelectRoomBookings {
                room_id: conds
                    .eq("room_id", ulid_value)?
                    .ok_or(SqlError::MissingFilter("room_id"))?,
            })
        }
        "guest_bookings" => {
            conds.check_columns("guest_bookings", &["guest_id"])?;
            Ok(Command::SelectGuestBookings {
                guest_id: conds
                    .eq("guest_id", ulid_value)?
                    .ok_or(SqlError::MissingFilter("guest_id"))?,
            })
        }
        "availability" => {
            conds.check_columns("availability", &["room_id", "check_in", "check_out"])?;
            Ok(Command::SelectAvailability {
                room_id: conds
                    .eq("room_id", ulid_value)?
                    .ok_or(SqlError::MissingFilter("room_id"))?,
                check_in: conds.lower("check_in")?,
                check_out: conds.upper("check_out")?,
            })
        }
        "available_rooms" => {
            conds.check_columns("available_rooms", &["check_in", "check_out", "room_type"])?;
            Ok(Command::SelectAvailableRooms {
                check_in: conds.lower("check_in")?,
                check_out: conds.upper("check_out")?,
                room_type: conds.eq("room_type", enum_value)?,
            })
        }
        "free_windows" => {
            conds.check_columns("free_windows", &["room_id", "check_in", "check_out"])?;
            Ok(Command::SelectFreeWindows {
                room_id: conds
                    .eq("room_id", ulid_value)?
                    .ok_or(SqlError::MissingFilter("room_id"))?,
                from: conds.lower("check_in")?,
                to: conds.upper("check_out")?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
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
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let conds = Conditions::from_selection(selection)?;
    if conds.terms.len() != 1 {
        return Err(SqlError::MissingFilter("id"));
    }
    conds
        .eq("id", ulid_value)?
        .ok_or(SqlError::MissingFilter("id"))
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{table}: unknown column {column}")]
    UnknownColumn { table: &'static str, column: String },
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("{table}: missing column {column}")]
    MissingColumn {
        table: &'static str,
        column: &'static str,
    },
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("invalid value for {column}: {message}")]
    BadValue { column: String, message: String },
}
