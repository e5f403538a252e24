use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Datelike;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
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
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::BitswapAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, BookingFilter, Command};

pub struct BitswapHandler {
    engine: Arc<Engine>,
    query_parser: Arc<BitswapQueryParser>,
}

impl BitswapHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(BitswapQueryParser),
        }
    }

    /// Run one command, recording its label, outcome and latency.
    async fn run(&self, cmd: Command) -> PgWireResult<Response> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::InsertItem {
                id,
                owner,
                price_per_day,
                window,
            } => {
                engine
                    .list_item(id, owner, price_per_day, window)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateItem { id, patch } => {
                engine.update_item(id, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteItem { id } => {
                engine.delist_item(id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::InsertBooking {
                id,
                item_id,
                renter,
                start,
                end,
            } => {
                engine
                    .request_booking(id, item_id, renter, start, end)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateBookingStatus { id, status } => {
                engine
                    .set_booking_status(id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::SelectItems { id, owner } => {
                let items = match id {
                    Some(id) => engine.get_item(&id).await.into_iter().collect(),
                    None => engine.list_items().await,
                };
                let schema = Arc::new(items_schema());
                let rows: Vec<_> = items
                    .iter()
                    .filter(|i| owner.as_deref().is_none_or(|o| i.owner == o))
                    .map(|i| encode_item(&schema, i))
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectBookings { filter } => {
                let bookings = match filter {
                    BookingFilter::Id(id) => engine.get_booking(&id).await.into_iter().collect(),
                    BookingFilter::Item(item_id) => engine
                        .reservations_for_item(&item_id)
                        .await
                        .map_err(engine_err)?,
                    BookingFilter::Renter(renter) => engine.bookings_by_renter(&renter).await,
                    BookingFilter::Owner(owner) => engine.bookings_by_owner(&owner).await,
                };
                let schema = Arc::new(bookings_schema());
                let rows: Vec<_> = bookings.iter().map(|b| encode_booking(&schema, b)).collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
            Command::SelectQuote { item_id, start, end } => {
                let (result, window) = engine.quote(&item_id, start, end).await.map_err(engine_err)?;
                let schema = Arc::new(quote_schema());
                let row = encode_quote(&schema, &result, window.as_ref());
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(vec![row]))))
            }
            Command::SelectCalendar {
                item_id,
                year,
                month,
                today,
            } => {
                let today = today.unwrap_or_else(crate::engine::today);
                let cal = engine
                    .calendar(&item_id, year, month, today)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(calendar_schema());
                let rows: Vec<_> = cal
                    .days()
                    .map(|(date, state, is_today)| encode_day(&schema, date, state, is_today))
                    .collect();
                Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
            }
        }
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn items_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("owner"),
        text("price_per_day"),
        text("availability_start"),
        text("availability_end"),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("item_id"),
        text("username"),
        text("start_date"),
        text("end_date"),
        text("status"),
        text("total_price"),
    ]
}

fn quote_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("valid".into(), None, None, Type::BOOL, FieldFormat::Text),
        text("reason"),
        text("message"),
        FieldInfo::new("day_count".into(), None, None, Type::INT8, FieldFormat::Text),
        text("daily_rate"),
        text("total_price"),
    ]
}

fn calendar_schema() -> Vec<FieldInfo> {
    vec![
        text("date"),
        FieldInfo::new("weekday".into(), None, None, Type::INT8, FieldFormat::Text),
        text("state"),
        FieldInfo::new("today".into(), None, None, Type::BOOL, FieldFormat::Text),
    ]
}

/// Result columns for a statement, from the table it selects from.
fn schema_for(sql: &str) -> Vec<FieldInfo> {
    match select_table(sql).as_deref() {
        Some("items") => items_schema(),
        Some("bookings") => bookings_schema(),
        Some("quote") => quote_schema(),
        Some("calendar") => calendar_schema(),
        _ => vec![],
    }
}

/// Table named after FROM in a SELECT, lowercased. `None` for anything else.
fn select_table(sql: &str) -> Option<String> {
    let lower = sql.to_lowercase();
    let mut words = lower.split_whitespace();
    if words.next()? != "select" {
        return None;
    }
    words.find(|w| *w == "from")?;
    words
        .next()
        .map(|t| t.trim_matches(|c| c == ';' || c == '"').to_string())
}

// ── Row encoding ─────────────────────────────────────────────────

fn encode_item(schema: &Arc<Vec<FieldInfo>>, item: &ItemInfo) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&item.id.to_string())?;
    encoder.encode_field(&item.owner)?;
    encoder.encode_field(&item.price_per_day.to_string())?;
    encoder.encode_field(&item.window.map(|w| w.start.to_string()))?;
    encoder.encode_field(&item.window.map(|w| w.end.to_string()))?;
    Ok(encoder.take_row())
}

fn encode_booking(schema: &Arc<Vec<FieldInfo>>, b: &BookingInfo) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&b.id.to_string())?;
    encoder.encode_field(&b.item_id.to_string())?;
    encoder.encode_field(&b.renter)?;
    encoder.encode_field(&b.start.to_string())?;
    encoder.encode_field(&b.end.to_string())?;
    encoder.encode_field(&b.status.as_str().to_string())?;
    encoder.encode_field(&b.total_price.to_string())?;
    Ok(encoder.take_row())
}

fn encode_quote(
    schema: &Arc<Vec<FieldInfo>>,
    result: &ValidationResult,
    window: Option<&AvailabilityWindow>,
) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&result.is_valid())?;
    encoder.encode_field(&result.reason().map(|r| r.code().to_string()))?;
    encoder.encode_field(&result.reason().map(|r| r.message(window)))?;
    let quote = result.quote();
    encoder.encode_field(&quote.map(|q| i64::from(q.day_count)))?;
    encoder.encode_field(&quote.map(|q| q.daily_rate.to_string()))?;
    encoder.encode_field(&quote.map(|q| q.total.to_string()))?;
    Ok(encoder.take_row())
}

fn encode_day(
    schema: &Arc<Vec<FieldInfo>>,
    date: Day,
    state: DayState,
    today: bool,
) -> PgWireResult<DataRow> {
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&date.to_string())?;
    encoder.encode_field(&i64::from(date.weekday().num_days_from_sunday()))?;
    encoder.encode_field(&state.as_str().to_string())?;
    encoder.encode_field(&today)?;
    Ok(encoder.take_row())
}

// ── Simple Query Protocol ────────────────────────────────────────

#[async_trait]
impl SimpleQueryHandler for BitswapHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        Ok(vec![self.run(cmd).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct BitswapQueryParser;

#[async_trait]
impl QueryParser for BitswapQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for BitswapHandler {
    type Statement = String;
    type QueryParser = BitswapQueryParser;

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
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.run(cmd).await
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
        Ok(DescribeStatementResponse::new(param_types, schema_for(&target.statement)))
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
        Ok(DescribePortalResponse::new(schema_for(&target.statement.statement)))
    }
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound parameters as quoted text literals. Highest index first so
/// `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct BitswapFactory {
    handler: Arc<BitswapHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<BitswapAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl BitswapFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = BitswapAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(BitswapHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for BitswapFactory {
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

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = BitswapFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::NotFound(_) => "P0002",
        _ => "P0001",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest_index() {
        assert_eq!(count_params("SELECT * FROM items"), 0);
        assert_eq!(count_params("SELECT * FROM quote WHERE item_id = $1 AND start_date = $2"), 2);
        assert_eq!(count_params("SELECT $3, $1, $12"), 12);
        assert_eq!(count_params("SELECT '$'"), 0);
    }

    #[test]
    fn select_table_detects_result_shape() {
        assert_eq!(select_table("SELECT * FROM items").as_deref(), Some("items"));
        assert_eq!(select_table("select * from Calendar where item_id = $1").as_deref(), Some("calendar"));
        assert_eq!(select_table("SELECT * FROM quote;").as_deref(), Some("quote"));
        assert_eq!(select_table("INSERT INTO items VALUES ($1)"), None);
        assert_eq!(schema_for("SELECT * FROM bookings WHERE id = $1").len(), 7);
        assert!(schema_for("UPDATE items SET price_per_day = $1 WHERE id = $2").is_empty());
    }
}
