use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::StartupHandler;
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::engine::{Engine, EngineError, Outcome};
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, Command, SqlError};

pub struct HotelHandler {
    engine: Arc<Engine>,
    query_parser: Arc<HotelQueryParser>,
}

impl HotelHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(HotelQueryParser),
        }
    }

    /// Parse, execute and record metrics for one statement.
    async fn run(&self, sql: &str) -> PgWireResult<Response> {
        let cmd = parsed(sql::parse_sql(sql))?;
        self.run_command(cmd).await
    }

    /// Run a simple-query script statement by statement, stopping at the
    /// first error.
    async fn run_script(&self, sql: &str) -> PgWireResult<Vec<Response>> {
        let cmds = parsed(sql::parse_script(sql))?;
        let mut responses = Vec::with_capacity(cmds.len());
        for cmd in cmds {
            responses.push(self.run_command(cmd).await?);
        }
        Ok(responses)
    }

    async fn run_command(&self, cmd: Command) -> PgWireResult<Response> {
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            // ── Rooms ────────────────────────────────────────────
            Command::InsertRoom(input) => {
                engine.create_room(input).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateRoom { id, patch } => {
                let status_only = patch.status.is_some()
                    && RoomPatch {
                        status: None,
                        ..patch.clone()
                    } == RoomPatch::default();
                match patch.status {
                    Some(status) if status_only => {
                        engine.set_room_status(id, status).await.map_err(engine_err)?;
                    }
                    _ => {
                        engine.update_room(id, patch).await.map_err(engine_err)?;
                    }
                }
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteRoom { id } => {
                engine.delete_room(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectRooms { id, filter, page } => {
                let rooms = match id {
                    Some(id) => vec![engine.get_room(id).await.map_err(engine_err)?],
                    None => engine.list_rooms(filter, page).await.map_err(engine_err)?.items,
                };
                query_response(room_schema(), rooms, encode_room)
            }

            // ── Guests ───────────────────────────────────────────
            Command::InsertGuest(input) => {
                engine.create_guest(input).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateGuest { id, patch } => {
                engine.update_guest(id, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteGuest { id } => {
                engine.delete_guest(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectGuests { id, page } => {
                let guests = match id {
                    Some(id) => vec![engine.get_guest(id).map_err(engine_err)?],
                    None => engine.list_guests(page).map_err(engine_err)?.items,
                };
                query_response(guest_schema(), guests, encode_guest)
            }

            // ── Bookings ─────────────────────────────────────────
            Command::InsertBooking(input) => {
                let outcome = engine.create_booking(input).await.map_err(engine_err)?;
                outcome_response(outcome)
            }
            Command::UpdateBooking { id, patch } => {
                let status_only = !patch.touches_dates() && patch.notes.is_none();
                let outcome = match patch.status {
                    Some(BookingStatus::Cancelled) if status_only => engine.cancel_booking(id).await,
                    Some(status) if status_only => engine.transition_booking_status(id, status).await,
                    _ => engine.update_booking(id, patch).await,
                }
                .map_err(engine_err)?;
                outcome_response(outcome)
            }
            Command::DeleteBooking { id } => {
                let outcome = engine.delete_booking(id).await.map_err(engine_err)?;
                if let Some(e) = outcome.room_status_error {
                    warn!("booking {id} deleted but room {} kept its status: {e}", outcome.value.room_id);
                }
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectBookings { id, filter, page } => {
                let views = match id {
                    Some(id) => vec![engine.get_booking(id).await.map_err(engine_err)?],
                    None => engine.list_bookings(filter, page).await.map_err(engine_err)?.items,
                };
                query_response(booking_schema(), views, encode_booking)
            }
            Command::SelectRoomBookings { room_id } => {
                let views = engine.room_bookings(room_id).await.map_err(engine_err)?;
                query_response(booking_schema(), views, encode_booking)
            }
            Command::SelectGuestBookings { guest_id } => {
                let views = engine.guest_bookings(guest_id).await.map_err(engine_err)?;
                query_response(booking_schema(), views, encode_booking)
            }

            // ── Availability ─────────────────────────────────────
            Command::SelectAvailability {
                room_id,
                check_in,
                check_out,
            } => {
                let answer = engine
                    .check_availability(room_id, check_in, check_out)
                    .await
                    .map_err(engine_err)?;
                query_response(availability_schema(), vec![answer], |encoder, a| {
                    encoder.encode_field(&a.room_id.to_string())?;
                    encoder.encode_field(&a.available)?;
                    encoder.encode_field(&a.conflict.map(|c| c.booking_id.to_string()))?;
                    encoder.encode_field(&a.conflict.map(|c| c.stay.start))?;
                    encoder.encode_field(&a.conflict.map(|c| c.stay.end))
                })
            }
            Command::SelectAvailableRooms {
                check_in,
                check_out,
                room_type,
            } => {
                let rooms = engine
                    .list_available_rooms(check_in, check_out, room_type)
                    .await
                    .map_err(engine_err)?;
                query_response(room_schema(), rooms, encode_room)
            }
            Command::SelectFreeWindows { room_id, from, to } => {
                let windows = engine.free_windows(room_id, from, to).await.map_err(engine_err)?;
                let rid = room_id.to_string();
                query_response(free_window_schema(), windows, |encoder, w| {
                    encoder.encode_field(&rid)?;
                    encoder.encode_field(&w.start)?;
                    encoder.encode_field(&w.end)
                })
            }
        }
    }
}

fn parsed<T>(result: Result<T, SqlError>) -> PgWireResult<T> {
    result.map_err(|e| {
        metrics::counter!(QUERIES_TOTAL, "command" => "unparsed", "status" => "error").increment(1);
        debug!("rejected statement: {e}");
        sql_err(e)
    })
}

// ── Result rows ──────────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn room_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("number", Type::VARCHAR),
        field("room_type", Type::VARCHAR),
        field("price", Type::FLOAT8),
        field("status", Type::VARCHAR),
        field("capacity", Type::INT8),
        field("amenities", Type::VARCHAR),
        field("created_at", Type::INT8),
        field("updated_at", Type::INT8),
    ]
}

fn guest_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("email", Type::VARCHAR),
        field("phone", Type::VARCHAR),
        field("address", Type::VARCHAR),
        field("id_number", Type::VARCHAR),
        field("created_at", Type::INT8),
        field("updated_at", Type::INT8),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("guest_id", Type::VARCHAR),
        field("guest_name", Type::VARCHAR),
        field("guest_email", Type::VARCHAR),
        field("room_id", Type::VARCHAR),
        field("room_number", Type::VARCHAR),
        field("room_type", Type::VARCHAR),
        field("check_in", Type::INT8),
        field("check_out", Type::INT8),
        field("nights", Type::INT8),
        field("status", Type::VARCHAR),
        field("total_price", Type::FLOAT8),
        field("notes", Type::VARCHAR),
        field("created_at", Type::INT8),
        field("updated_at", Type::INT8),
    ]
}

/// Booking columns plus `warning`, set when the room status could not follow.
fn booking_outcome_schema() -> Vec<FieldInfo> {
    let mut schema = booking_schema();
    schema.push(field("warning", Type::VARCHAR));
    schema
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("room_id", Type::VARCHAR),
        field("available", Type::BOOL),
        field("conflict_booking_id", Type::VARCHAR),
        field("conflict_check_in", Type::INT8),
        field("conflict_check_out", Type::INT8),
    ]
}

fn free_window_schema() -> Vec<FieldInfo> {
    vec![
        field("room_id", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
    ]
}

fn query_response<T>(
    schema: Vec<FieldInfo>,
    items: Vec<T>,
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> PgWireResult<Response> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn outcome_response(outcome: Outcome<BookingView>) -> PgWireResult<Response> {
    let warning = outcome.room_status_error.map(|e| e.to_string());
    if let Some(w) = &warning {
        warn!("booking {}: {w}", outcome.value.booking.id);
    }
    query_response(booking_outcome_schema(), vec![outcome.value], |encoder, view| {
        encode_booking(encoder, view)?;
        encoder.encode_field(&warning)
    })
}

fn encode_room(encoder: &mut DataRowEncoder, room: &Room) -> PgWireResult<()> {
    let amenities = serde_json::to_string(&room.amenities)
        .map_err(|e| PgWireError::ApiError(Box::new(e)))?;
    encoder.encode_field(&room.id.to_string())?;
    encoder.encode_field(&room.number)?;
    encoder.encode_field(&room.room_type.as_str())?;
    encoder.encode_field(&room.price)?;
    encoder.encode_field(&room.status.as_str())?;
    encoder.encode_field(&i64::from(room.capacity))?;
    encoder.encode_field(&amenities)?;
    encoder.encode_field(&room.created_at)?;
    encoder.encode_field(&room.updated_at)
}

fn encode_guest(encoder: &mut DataRowEncoder, guest: &Guest) -> PgWireResult<()> {
    encoder.encode_field(&guest.id.to_string())?;
    encoder.encode_field(&guest.name)?;
    encoder.encode_field(&guest.email)?;
    encoder.encode_field(&guest.phone)?;
    encoder.encode_field(&guest.address)?;
    encoder.encode_field(&guest.id_number)?;
    encoder.encode_field(&guest.created_at)?;
    encoder.encode_field(&guest.updated_at)
}

fn encode_booking(encoder: &mut DataRowEncoder, view: &BookingView) -> PgWireResult<()> {
    let b = &view.booking;
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.guest_id.to_string())?;
    encoder.encode_field(&view.guest_name)?;
    encoder.encode_field(&view.guest_email)?;
    encoder.encode_field(&b.room_id.to_string())?;
    encoder.encode_field(&view.room_number)?;
    encoder.encode_field(&view.room_type.as_str())?;
    encoder.encode_field(&b.stay.start)?;
    encoder.encode_field(&b.stay.end)?;
    encoder.encode_field(&view.nights())?;
    encoder.encode_field(&b.status.as_str())?;
    encoder.encode_field(&b.total_price)?;
    encoder.encode_field(&b.notes)?;
    encoder.encode_field(&b.created_at)?;
    encoder.encode_field(&b.updated_at)
}

/// Columns a statement will return, judged from its text alone so that
/// Describe works before parameters are bound.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    let words: Vec<&str> = upper
        .split(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | ',' | ';'))
        .filter(|w| !w.is_empty())
        .collect();
    let table_after = |keyword: &str| {
        words
            .iter()
            .position(|w| *w == keyword)
            .and_then(|i| words.get(i + 1))
            .and_then(|t| t.rsplit('.').next())
    };

    match words.first().copied() {
        Some("SELECT") => match table_after("FROM") {
            Some("ROOMS") | Some("AVAILABLE_ROOMS") => room_schema(),
            Some("GUESTS") => guest_schema(),
            Some("BOOKINGS") | Some("ROOM_BOOKINGS") | Some("GUEST_BOOKINGS") => booking_schema(),
            Some("AVAILABILITY") => availability_schema(),
            Some("FREE_WINDOWS") => free_window_schema(),
            _ => vec![],
        },
        Some("INSERT") if table_after("INTO") == Some("BOOKINGS") => booking_outcome_schema(),
        Some("UPDATE") if table_after("UPDATE") == Some("BOOKINGS") => booking_outcome_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for HotelHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run_script(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct HotelQueryParser;

#[async_trait]
impl QueryParser for HotelQueryParser {
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
impl ExtendedQueryHandler for HotelHandler {
    type Statement = String;
    type QueryParser = HotelQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
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
        self.run(&sql).await
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

/// Tokenize `sql` as written: quoted text keeps its escapes so the tokens
/// print back to the same statement.
fn raw_tokens(sql: &str) -> Option<Vec<Token>> {
    Tokenizer::new(&PostgreSqlDialect {}, sql)
        .with_unescape(false)
        .tokenize()
        .ok()
}

/// 1-based index of a `$N` placeholder token.
fn placeholder_index(token: &Token) -> Option<usize> {
    match token {
        Token::Placeholder(p) => p.strip_prefix('$')?.parse().ok(),
        _ => None,
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    raw_tokens(sql)
        .map(|tokens| tokens.iter().filter_map(placeholder_index).max().unwrap_or(0))
        .unwrap_or(0)
}

/// Bind text-format parameters into the statement in one pass. Only real
/// placeholder tokens are replaced; `$N` inside literals, and inside the
/// bound values themselves, is left alone.
fn bind_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let Some(tokens) = raw_tokens(sql) else {
        return sql.to_string();
    };
    let mut bound = String::with_capacity(sql.len());
    for token in &tokens {
        let param = placeholder_index(token)
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match param {
            Some(Some(bytes)) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                bound.push('\'');
                bound.push_str(&text.replace('\'', "''"));
                bound.push('\'');
            }
            Some(None) => bound.push_str("NULL"),
            None => bound.push_str(&token.to_string()),
        }
    }
    bound
}

// ── Factory ──────────────────────────────────────────────────────

/// Wire handlers for one engine. Startup accepts every client without a
/// password exchange.
pub struct HotelFactory {
    handler: Arc<HotelHandler>,
    noop: Arc<NoopHandler>,
}

impl HotelFactory {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            handler: Arc::new(HotelHandler::new(engine)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for HotelFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.noop.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    factory: Arc<HotelFactory>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE for each engine error kind.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound { .. } => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::InvalidRange(_) => "22023",
        EngineError::InvalidState(_) | EngineError::InvalidTransition { .. } => "55000",
        EngineError::Conflict { .. } => "23P01",
        EngineError::Validation { .. } => "23514",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
