use sqlparser::ast::{
    self, Assignment, AssignmentTarget, Expr, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertRoom {
        id: Option<Ulid>,
        name: String,
        description: Option<String>,
    },
    /// `None` leaves a column unchanged; `description: Some(None)` sets it to NULL.
    UpdateRoom {
        id: Ulid,
        name: Option<String>,
        description: Option<Option<String>>,
    },
    SelectRooms {
        id: Option<Ulid>,
    },
    InsertTimeSlot {
        id: Option<Ulid>,
        room_id: Ulid,
        start: Ms,
        end: Ms,
    },
    BatchInsertTimeSlots {
        room_id: Ulid,
        slots: Vec<(Option<Ulid>, Ms, Ms)>, // (id, start, end)
    },
    SelectTimeSlots {
        filter: SlotFilter,
    },
    SelectAvailableSlots {
        room_id: Ulid,
    },
    InsertReservation {
        id: Option<Ulid>,
        time_slot_id: Ulid,
    },
    UpdateReservationStatus {
        id: Ulid,
        status: ReservationStatus,
    },
    SelectReservation {
        id: Ulid,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotFilter {
    Id(Ulid),
    Room(Ulid),
}

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
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row, addressed by column name.
struct Row<'a> {
    columns: &'a [String],
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn get(&self, col: &str) -> Option<&'a Expr> {
        self.columns
            .iter()
            .position(|c| c == col)
            .and_then(|i| self.values.get(i))
    }

    fn required(&self, col: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingColumn(col))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_all_insert_rows(insert)?;

    let columns = match table.as_str() {
        "rooms" => insert_columns(insert, &["id", "name", "description"])?,
        "time_slots" => insert_columns(insert, &["id", "room_id", "start", "end"])?,
        "reservations" => insert_columns(insert, &["id", "time_slot_id"])?,
        _ => return Err(SqlError::UnknownTable(table)),
    };
    for row in &rows {
        if row.len() != columns.len() {
            return Err(SqlError::WrongArity(columns.len(), row.len()));
        }
    }

    match table.as_str() {
        "rooms" => {
            let row = single_row(&rows, "rooms", &columns)?;
            Ok(Command::InsertRoom {
                id: optional(row.get("id"), parse_ulid_or_null)?,
                name: parse_string(row.required("name")?)?,
                description: optional(row.get("description"), parse_string_or_null)?,
            })
        }
        "reservations" => {
            let row = single_row(&rows, "reservations", &columns)?;
            Ok(Command::InsertReservation {
                id: optional(row.get("id"), parse_ulid_or_null)?,
                time_slot_id: parse_ulid(row.required("time_slot_id")?)?,
            })
        }
        _ => parse_insert_time_slots(&rows, &columns),
    }
}

fn parse_insert_time_slots(rows: &[Vec<Expr>], columns: &[String]) -> Result<Command, SqlError> {
    let mut room_id = None;
    let mut slots = Vec::with_capacity(rows.len());
    for (i, values) in rows.iter().enumerate() {
        let row = Row { columns, values };
        let at_row = |e: SqlError| SqlError::Parse(format!("row {i}: {e}"));
        let rid = parse_ulid(row.required("room_id")?).map_err(at_row)?;
        match room_id {
            None => room_id = Some(rid),
            Some(first) if first != rid => return Err(SqlError::MixedRooms),
            Some(_) => {}
        }
        slots.push((
            optional(row.get("id"), parse_ulid_or_null).map_err(at_row)?,
            parse_i64(row.required("start")?).map_err(at_row)?,
            parse_i64(row.required("end")?).map_err(at_row)?,
        ));
    }
    let room_id = room_id.ok_or_else(|| SqlError::Parse("empty VALUES".into()))?;

    if slots.len() == 1 {
        let (id, start, end) = slots[0];
        Ok(Command::InsertTimeSlot {
            id,
            room_id,
            start,
            end,
        })
    } else {
        Ok(Command::BatchInsertTimeSlots { room_id, slots })
    }
}

fn single_row<'a>(
    rows: &'a [Vec<Expr>],
    table: &'static str,
    columns: &'a [String],
) -> Result<Row<'a>, SqlError> {
    match rows {
        [values] => Ok(Row { columns, values }),
        _ => Err(SqlError::MultiRow(table)),
    }
}

/// Explicit column list, or the table's default column order.
fn insert_columns(insert: &ast::Insert, defaults: &[&str]) -> Result<Vec<String>, SqlError> {
    if insert.columns.is_empty() {
        return Ok(defaults.iter().map(|c| c.to_string()).collect());
    }
    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
    if let Some(unknown) = columns.iter().find(|c| !defaults.contains(&c.as_str())) {
        return Err(SqlError::UnknownColumn(unknown.clone()));
    }
    Ok(columns)
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &TableFactor,
    assignments: &[Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(table)?;
    let id = extract_where_id(selection)?;

    match table.as_str() {
        "rooms" => {
            let (mut name, mut description) = (None, None);
            for a in assignments {
                match assignment_column(a)?.as_str() {
                    "name" => name = Some(parse_string(&a.value)?),
                    "description" => description = Some(parse_string_or_null(&a.value)?),
                    other => return Err(SqlError::UnknownColumn(other.to_string())),
                }
            }
            if name.is_none() && description.is_none() {
                return Err(SqlError::Parse("UPDATE without SET".into()));
            }
            Ok(Command::UpdateRoom {
                id,
                name,
                description,
            })
        }
        "reservations" => {
            let mut status = None;
            for a in assignments {
                match assignment_column(a)?.as_str() {
                    "status" => {
                        let raw = parse_string(&a.value)?;
                        status = Some(raw.parse().map_err(SqlError::Parse)?);
                    }
                    other => return Err(SqlError::UnknownColumn(other.to_string())),
                }
            }
            Ok(Command::UpdateReservationStatus {
                id,
                status: status.ok_or(SqlError::MissingColumn("status"))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn assignment_column(a: &Assignment) -> Result<String, SqlError> {
    match &a.target {
        AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        AssignmentTarget::Tuple(_) => Err(SqlError::Unsupported("tuple assignment".into())),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        extract_eq_filters(selection, &mut filters)?;
    }
    let ulid_filter = |col: &str| -> Result<Option<Ulid>, SqlError> {
        filters
            .iter()
            .find(|(c, _)| c == col)
            .map(|(_, e)| parse_ulid(e))
            .transpose()
    };

    match table.as_str() {
        "rooms" => Ok(Command::SelectRooms {
            id: ulid_filter("id")?,
        }),
        "time_slots" => {
            let filter = if let Some(id) = ulid_filter("id")? {
                SlotFilter::Id(id)
            } else if let Some(room_id) = ulid_filter("room_id")? {
                SlotFilter::Room(room_id)
            } else {
                return Err(SqlError::MissingFilter("room_id"));
            };
            Ok(Command::SelectTimeSlots { filter })
        }
        "available_slots" => Ok(Command::SelectAvailableSlots {
            room_id: ulid_filter("room_id")?.ok_or(SqlError::MissingFilter("room_id"))?,
        }),
        "reservations" => Ok(Command::SelectReservation {
            id: ulid_filter("id")?.ok_or(SqlError::MissingFilter("id"))?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Collect `column = value` terms joined by AND.
fn extract_eq_filters(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            extract_eq_filters(left, out)?;
            extract_eq_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((col, right.as_ref().clone()));
            Ok(())
        }
        Expr::Nested(inner) => extract_eq_filters(inner, out),
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

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
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
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
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

fn optional<T>(
    expr: Option<&Expr>,
    parse: impl Fn(&Expr) -> Result<Option<T>, SqlError>,
) -> Result<Option<T>, SqlError> {
    match expr {
        Some(e) => parse(e),
        None => Ok(None),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    parse_ulid_or_null(expr)?.ok_or_else(|| SqlError::Parse("expected ULID, got NULL".into()))
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ulid::from_string(s)
            .map(Some)
            .map_err(|e| SqlError::Parse(format!("bad ULID: {e}"))),
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    parse_string_or_null(expr)?.ok_or_else(|| SqlError::Parse("expected string, got NULL".into()))
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
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
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("expected {0} values, got {1}")]
    WrongArity(usize, usize),
    #[error("{0}: one row per INSERT")]
    MultiRow(&'static str),
    #[error("all time slots in one INSERT must belong to the same room")]
    MixedRooms,
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOM: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const OTHER: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn parse_insert_room() {
        let sql = format!("INSERT INTO rooms (id, name, description) VALUES ('{ROOM}', 'Attic', 'top floor')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertRoom {
                id: Some(ulid(ROOM)),
                name: "Attic".into(),
                description: Some("top floor".into()),
            }
        );
    }

    #[test]
    fn parse_insert_room_without_id() {
        let cmd = parse_sql("INSERT INTO rooms (name) VALUES ('Attic')").unwrap();
        assert_eq!(
            cmd,
            Command::InsertRoom {
                id: None,
                name: "Attic".into(),
                description: None,
            }
        );
    }

    #[test]
    fn parse_insert_room_requires_name() {
        let err = parse_sql("INSERT INTO rooms (description) VALUES ('x')").unwrap_err();
        assert!(matches!(err, SqlError::MissingColumn("name")));
        let err = parse_sql("INSERT INTO rooms (name) VALUES (NULL)").unwrap_err();
        assert!(matches!(err, SqlError::Parse(_)));
    }

    #[test]
    fn parse_update_room_partial() {
        let sql = format!("UPDATE rooms SET description = NULL WHERE id = '{ROOM}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateRoom {
                id: ulid(ROOM),
                name: None,
                description: Some(None),
            }
        );
        let sql = format!("UPDATE rooms SET name = 'Loft' WHERE id = '{ROOM}'");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::UpdateRoom { name: Some(ref n), description: None, .. } if n == "Loft"
        ));
    }

    #[test]
    fn parse_update_without_where_errors() {
        let err = parse_sql("UPDATE rooms SET name = 'Loft'").unwrap_err();
        assert!(matches!(err, SqlError::MissingFilter("id")));
    }

    #[test]
    fn parse_select_rooms() {
        assert_eq!(parse_sql("SELECT * FROM rooms").unwrap(), Command::SelectRooms { id: None });
        let sql = format!("SELECT * FROM rooms WHERE id = '{ROOM}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectRooms { id: Some(ulid(ROOM)) }
        );
    }

    #[test]
    fn parse_insert_single_time_slot() {
        let sql = format!(r#"INSERT INTO time_slots (room_id, start, "end") VALUES ('{ROOM}', 1000, 2000)"#);
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertTimeSlot {
                id: None,
                room_id: ulid(ROOM),
                start: 1000,
                end: 2000,
            }
        );
    }

    #[test]
    fn parse_batch_insert_time_slots() {
        let sql = format!(
            r#"INSERT INTO time_slots (id, room_id, start, "end") VALUES ('{OTHER}', '{ROOM}', 1000, 2000), (NULL, '{ROOM}', 3000, 4000)"#
        );
        match parse_sql(&sql).unwrap() {
            Command::BatchInsertTimeSlots { room_id, slots } => {
                assert_eq!(room_id, ulid(ROOM));
                assert_eq!(slots, vec![(Some(ulid(OTHER)), 1000, 2000), (None, 3000, 4000)]);
            }
            other => panic!("expected BatchInsertTimeSlots, got {other:?}"),
        }
    }

    #[test]
    fn parse_batch_insert_time_slots_mixed_rooms_errors() {
        let sql = format!(
            r#"INSERT INTO time_slots (room_id, start, "end") VALUES ('{ROOM}', 1000, 2000), ('{OTHER}', 3000, 4000)"#
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::MixedRooms)));
    }

    #[test]
    fn parse_insert_default_column_order() {
        let sql = format!("INSERT INTO time_slots VALUES (NULL, '{ROOM}', 1000, 2000)");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::InsertTimeSlot { .. }));
        let sql = format!("INSERT INTO time_slots VALUES ('{ROOM}', 1000, 2000)");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity(4, 3))));
    }

    #[test]
    fn parse_select_time_slots() {
        let sql = format!("SELECT * FROM time_slots WHERE room_id = '{ROOM}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectTimeSlots {
                filter: SlotFilter::Room(ulid(ROOM))
            }
        );
        let sql = format!("SELECT * FROM time_slots WHERE id = '{OTHER}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectTimeSlots {
                filter: SlotFilter::Id(ulid(OTHER))
            }
        );
        assert!(matches!(
            parse_sql("SELECT * FROM time_slots"),
            Err(SqlError::MissingFilter("room_id"))
        ));
    }

    #[test]
    fn parse_select_available_slots() {
        let sql = format!("SELECT * FROM available_slots WHERE room_id = '{ROOM}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectAvailableSlots { room_id: ulid(ROOM) }
        );
    }

    #[test]
    fn parse_insert_reservation() {
        let sql = format!("INSERT INTO reservations (time_slot_id) VALUES ('{ROOM}')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertReservation {
                id: None,
                time_slot_id: ulid(ROOM),
            }
        );
        let sql = format!("INSERT INTO reservations (time_slot_id, user_id) VALUES ('{ROOM}', 'mallory')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn(c)) if c == "user_id"));
    }

    #[test]
    fn parse_update_reservation_status() {
        let sql = format!("UPDATE reservations SET status = 'confirmed' WHERE id = '{ROOM}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::UpdateReservationStatus {
                id: ulid(ROOM),
                status: ReservationStatus::Confirmed,
            }
        );
        let sql = format!("UPDATE reservations SET status = 'CANCELLED' WHERE id = '{ROOM}'");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::UpdateReservationStatus {
                status: ReservationStatus::Canceled,
                ..
            }
        ));
        let sql = format!("UPDATE reservations SET status = 'PENDING' WHERE id = '{ROOM}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_select_reservation() {
        let sql = format!("SELECT * FROM reservations WHERE id = '{ROOM}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::SelectReservation { id: ulid(ROOM) });
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ROOM}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_bad_ulid_errors() {
        let sql = "SELECT * FROM reservations WHERE id = 'not-a-ulid'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
