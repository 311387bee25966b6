//! Warn+ events persisted to a small SQLite file, so problems on a
//! device (dropped frames, failed syncs, write errors) can be read back
//! with `alertsync logs`.

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Rows kept when the sink is opened; older ones are dropped.
pub const DEFAULT_RETAINED: u32 = 5_000;

#[derive(Clone, Debug, Serialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub account_id: Option<String>,
    pub message_id: Option<String>,
    /// Remaining event fields as a JSON object.
    pub fields: Option<String>,
}

pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn open(db_path: &Path, retained: u32) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        Self::prepare(Connection::open(db_path)?, retained)
    }

    pub fn in_memory() -> Result<Self, rusqlite::Error> {
        Self::prepare(Connection::open_in_memory()?, DEFAULT_RETAINED)
    }

    fn prepare(conn: Connection, retained: u32) -> Result<Self, rusqlite::Error> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             CREATE TABLE IF NOT EXISTS warnings (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 level TEXT NOT NULL,
                 target TEXT NOT NULL,
                 message TEXT NOT NULL,
                 account_id TEXT,
                 message_id TEXT,
                 fields TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_warnings_account ON warnings(account_id);",
        )?;
        let sink = Self {
            conn: Mutex::new(conn),
        };
        sink.prune(retained)?;
        Ok(sink)
    }

    /// Keep only the newest `retained` rows. Returns how many were removed.
    pub fn prune(&self, retained: u32) -> Result<usize, rusqlite::Error> {
        self.conn.lock().execute(
            "DELETE FROM warnings WHERE id NOT IN
                 (SELECT id FROM warnings ORDER BY id DESC LIMIT ?1)",
            [retained],
        )
    }

    /// Newest first, optionally for one account only.
    pub fn recent(
        &self,
        account_id: Option<&str>,
        limit: u32,
    ) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, level, target, message, account_id, message_id, fields
             FROM warnings
             WHERE ?1 IS NULL OR account_id = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![account_id, limit], |row| {
            Ok(LogRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                target: row.get(3)?,
                message: row.get(4)?,
                account_id: row.get(5)?,
                message_id: row.get(6)?,
                fields: row.get(7)?,
            })
        })?;
        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        self.conn
            .lock()
            .query_row("SELECT COUNT(*) FROM warnings", [], |row| row.get(0))
    }

    fn record(&self, level: &tracing::Level, target: &str, event: EventFields) {
        let fields = (!event.rest.is_empty())
            .then(|| serde_json::to_string(&event.rest).ok())
            .flatten();
        let _ = self.conn.lock().execute(
            "INSERT INTO warnings (timestamp, level, target, message, account_id, message_id, fields)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                Utc::now().to_rfc3339(),
                level.as_str(),
                target,
                event.message.unwrap_or_default(),
                event.account_id,
                event.message_id,
                fields,
            ],
        );
    }
}

/// `tracing` layer feeding WARN and ERROR events into a [`SqliteLogSink`].
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

#[derive(Default)]
struct EventFields {
    message: Option<String>,
    account_id: Option<String>,
    message_id: Option<String>,
    rest: Map<String, Value>,
}

impl EventFields {
    fn put(&mut self, name: &str, value: Value) {
        let slot = match name {
            "message" => &mut self.message,
            "account_id" => &mut self.account_id,
            "message_id" => &mut self.message_id,
            _ => {
                self.rest.insert(name.to_owned(), value);
                return;
            }
        };
        *slot = Some(match value {
            Value::String(s) => s,
            other => other.to_string(),
        });
    }
}

impl Visit for EventFields {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field.name(), Value::String(format!("{value:?}")));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field.name(), Value::String(value.to_owned()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field.name(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field.name(), value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field.name(), value.into());
    }
}

/// Account recorded on an enclosing span (`#[instrument(fields(account_id))]`).
struct SpanAccount(String);

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut fields = EventFields::default();
        attrs.record(&mut fields);
        if let (Some(account), Some(span)) = (fields.account_id, ctx.span(id)) {
            span.extensions_mut().insert(SpanAccount(account));
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > tracing::Level::WARN {
            return;
        }

        let mut fields = EventFields::default();
        event.record(&mut fields);
        if fields.account_id.is_none() {
            fields.account_id = ctx.event_scope(event).and_then(|scope| {
                scope
                    .into_iter()
                    .find_map(|span| span.extensions().get::<SpanAccount>().map(|a| a.0.clone()))
            });
        }
        self.sink.record(metadata.level(), metadata.target(), fields);
    }
}
