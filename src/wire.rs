use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::RoomholdAuthSource;
use crate::model::*;
use crate::observability;
use crate::service::{BookingError, ErrorKind, Reserved, Services};
use crate::sql::{self, Command, SlotFilter};

pub struct RoomholdHandler {
    services: Services,
    query_parser: Arc<RoomholdQueryParser>,
}

impl RoomholdHandler {
    pub fn new(services: Services) -> Self {
        Self {
            services,
            query_parser: Arc::new(RoomholdQueryParser),
        }
    }

    /// The connection's login user is the acting principal.
    fn resolve_user<C: ClientInfo>(&self, client: &C) -> PgWireResult<UserId> {
        client
            .metadata()
            .get("user")
            .and_then(|u| UserId::parse(u))
            .ok_or_else(|| booking_err(BookingError::InvalidUser))
    }

    async fn run<C: ClientInfo>(&self, client: &C, sql: &str) -> PgWireResult<Response> {
        let user = self.resolve_user(client)?;
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = observability::command_label(&cmd);

        let started = Instant::now();
        let result = self.execute_command(&user, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());

        let status = match &result {
            Ok(_) => "ok",
            Err(e) => match e.kind() {
                ErrorKind::NotFound => "not_found",
                ErrorKind::Conflict => "conflict",
                ErrorKind::BadRequest => "bad_request",
                ErrorKind::Internal => "internal",
            },
        };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);

        result.map_err(booking_err)
    }

    async fn execute_command(&self, user: &UserId, cmd: Command) -> Result<Response, BookingError> {
        let svc = &self.services;
        match cmd {
            Command::InsertRoom {
                id,
                name,
                description,
            } => {
                let room = svc.rooms.create_room(id, name, description).await?;
                Ok(room_response(vec![room]))
            }
            Command::UpdateRoom {
                id,
                name,
                description,
            } => {
                let room = svc.rooms.update_room(id, name, description).await?;
                Ok(room_response(vec![room]))
            }
            Command::SelectRooms { id: Some(id) } => {
                let room = svc.rooms.get_room(id).await?;
                Ok(room_response(vec![room]))
            }
            Command::SelectRooms { id: None } => Ok(room_response(svc.rooms.list_rooms().await)),
            Command::InsertTimeSlot {
                id,
                room_id,
                start,
                end,
            } => {
                let slot = svc
                    .time_slots
                    .create_time_slot(room_id, id, Span::new(start, end))
                    .await?;
                Ok(slot_response(vec![slot]))
            }
            Command::BatchInsertTimeSlots { room_id, slots } => {
                let batch = slots
                    .into_iter()
                    .map(|(id, start, end)| (id, Span::new(start, end)))
                    .collect();
                let created = svc.time_slots.create_time_slots(room_id, batch).await?;
                Ok(slot_response(created))
            }
            Command::SelectTimeSlots {
                filter: SlotFilter::Id(id),
            } => {
                let slot = svc.time_slots.get_time_slot(id).await?;
                Ok(slot_response(vec![slot]))
            }
            Command::SelectTimeSlots {
                filter: SlotFilter::Room(room_id),
            } => Ok(slot_response(svc.time_slots.list_time_slots(room_id).await?)),
            Command::SelectAvailableSlots { room_id } => Ok(slot_response(
                svc.time_slots.list_available_time_slots(room_id).await?,
            )),
            Command::InsertReservation { id, time_slot_id } => {
                let reserved = svc.reservations.reserve(user, time_slot_id, id).await?;
                Ok(reserved_response(reserved))
            }
            Command::UpdateReservationStatus { id, status } => {
                let reservation = svc.reservations.change_status_to(user, id, status).await?;
                Ok(reservation_response(vec![reservation]))
            }
            Command::SelectReservation { id } => {
                let reservation = svc.reservations.get_reservation(user, id).await?;
                Ok(reservation_response(vec![reservation]))
            }
        }
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn room_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("name", Type::VARCHAR),
        text_field("description", Type::VARCHAR),
        text_field("created_at", Type::INT8),
        text_field("updated_at", Type::INT8),
    ]
}

fn slot_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("room_id", Type::VARCHAR),
        text_field("start", Type::INT8),
        text_field("end", Type::INT8),
        text_field("created_at", Type::INT8),
        text_field("updated_at", Type::INT8),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("user_id", Type::VARCHAR),
        text_field("time_slot_id", Type::VARCHAR),
        text_field("status", Type::VARCHAR),
        text_field("created_at", Type::INT8),
        text_field("updated_at", Type::INT8),
    ]
}

/// Reservation columns plus whether this INSERT created the row.
fn reserved_schema() -> Vec<FieldInfo> {
    let mut schema = reservation_schema();
    schema.push(text_field("created", Type::BOOL));
    schema
}

fn query_response<T>(
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn room_response(rooms: Vec<Room>) -> Response {
    query_response(room_schema(), rooms, |enc, room| {
        enc.encode_field(&room.id.to_string())?;
        enc.encode_field(&room.name)?;
        enc.encode_field(&room.description)?;
        enc.encode_field(&room.created_at)?;
        enc.encode_field(&room.updated_at)
    })
}

fn slot_response(slots: Vec<TimeSlot>) -> Response {
    query_response(slot_schema(), slots, |enc, slot| {
        enc.encode_field(&slot.id.to_string())?;
        enc.encode_field(&slot.room_id.to_string())?;
        enc.encode_field(&slot.span.start)?;
        enc.encode_field(&slot.span.end)?;
        enc.encode_field(&slot.created_at)?;
        enc.encode_field(&slot.updated_at)
    })
}

fn encode_reservation(enc: &mut DataRowEncoder, r: &Reservation) -> PgWireResult<()> {
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.user_id.to_string())?;
    enc.encode_field(&r.time_slot_id.to_string())?;
    enc.encode_field(&r.status.to_string())?;
    enc.encode_field(&r.created_at)?;
    enc.encode_field(&r.updated_at)
}

fn reservation_response(reservations: Vec<Reservation>) -> Response {
    query_response(reservation_schema(), reservations, encode_reservation)
}

fn reserved_response(reserved: Reserved) -> Response {
    query_response(reserved_schema(), vec![reserved], |enc, r| {
        encode_reservation(enc, &r.reservation)?;
        enc.encode_field(&r.created)
    })
}

/// Columns a statement will return, judged from its verb and target table.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let Some((verb, table)) = statement_target(sql) else {
        return vec![];
    };
    match table.as_str() {
        "rooms" => room_schema(),
        "time_slots" | "available_slots" => slot_schema(),
        "reservations" if verb == "insert" => reserved_schema(),
        "reservations" => reservation_schema(),
        _ => vec![],
    }
}

/// `(verb, table)` of an INSERT INTO / UPDATE / SELECT .. FROM statement, lowercased.
fn statement_target(sql: &str) -> Option<(String, String)> {
    let tokens: Vec<String> = sql
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .filter(|t| !t.is_empty())
        .map(|t| t.trim_matches('"').to_lowercase())
        .collect();
    let verb = tokens.first()?.clone();
    let table = match verb.as_str() {
        "update" => tokens.get(1),
        "insert" => tokens.iter().skip_while(|t| *t != "into").nth(1),
        "select" => tokens.iter().skip_while(|t| *t != "from").nth(1),
        _ => None,
    }?;
    Some((verb, table.clone()))
}

#[async_trait]
impl SimpleQueryHandler for RoomholdHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(vec![self.run(client, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct RoomholdQueryParser;

#[async_trait]
impl QueryParser for RoomholdQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for RoomholdHandler {
    type Statement = String;
    type QueryParser = RoomholdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = bind_params(&portal.statement.statement, &portal.parameters);
        self.run(client, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// A `$N` placeholder outside any quoted literal or identifier: byte range and index.
fn placeholders(sql: &str) -> Vec<(usize, usize, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            // A doubled quote inside a literal closes and reopens it, which nets out.
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'\'' || b == b'"' => quote = Some(b),
            None if b == b'$' => {
                let start = i;
                let mut end = i + 1;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if let Ok(n) = sql[start + 1..end].parse::<usize>() {
                    found.push((start, end, n));
                    i = end;
                    continue;
                }
            }
            None => {}
        }
        i += 1;
    }
    found
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    placeholders(sql).iter().map(|&(_, _, n)| n).max().unwrap_or(0)
}

/// Splice bound text-format parameters into the statement in one left-to-right pass.
/// Bound values are quoted literals and are never scanned for placeholders themselves.
fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (start, end, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        out.push_str(&sql[copied..start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        copied = end;
    }
    out.push_str(&sql[copied..]);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct RoomholdFactory {
    handler: Arc<RoomholdHandler>,
    auth_handler: Arc<
        CleartextPasswordAuthStartupHandler<RoomholdAuthSource, DefaultServerParameterProvider>,
    >,
    noop: Arc<NoopHandler>,
}

impl RoomholdFactory {
    pub fn new(services: Services, password: String) -> Self {
        let auth_source = RoomholdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(RoomholdHandler::new(services)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for RoomholdFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    services: Services,
    password: String,
    tls: Option<TlsAcceptor>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let factory = Arc::new(RoomholdFactory::new(services, password));
    pgwire::tokio::process_socket(socket, tls, factory).await?;
    Ok(())
}

// ── Errors ───────────────────────────────────────────────────────

fn sqlstate(e: &BookingError) -> &'static str {
    match e.kind() {
        ErrorKind::NotFound => "P0002",
        ErrorKind::Conflict => match e {
            BookingError::TimeSlotOverlap(_) | BookingError::SlotsOverlap => "23P01",
            _ => "23505",
        },
        ErrorKind::BadRequest => "22023",
        ErrorKind::Internal => "XX000",
    }
}

fn booking_err(e: BookingError) -> PgWireError {
    if e.kind() == ErrorKind::Internal {
        tracing::error!(error = ?e, "request failed");
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
