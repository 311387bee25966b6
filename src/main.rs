//! # alertsync
//!
//! Command-line client for the alert backend: keeps a local message store
//! in sync, applies role and preference rules, and raises alerts for live
//! messages.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use alertsync_client::settings::parse_bool;
use alertsync_client::{
    load_settings, load_settings_from_path, ClientSettings, HttpBackend, MultiTransport,
    PushSender, PushTransport, ReliableFetcher, WebSocketTransport,
};
use alertsync_core::{Category, CategoryToggles, DurableStore, Identity, Message, Role};
use alertsync_engine::read_model::group_by_day;
use alertsync_engine::{EngineEvent, Feed, SessionIdentity, SyncEngine, SyncOutcome};
use alertsync_store::{Database, SqliteKvStore};
use alertsync_telemetry::init_telemetry;

const PUSH_CAPACITY: usize = 256;

/// Alert synchronization client.
#[derive(Parser, Debug)]
#[command(name = "alertsync", about = "Alert message sync and notification client")]
struct Cli {
    /// Settings file (defaults to `~/.alertsync/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    account: AccountArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct AccountArgs {
    /// Signed-in account (email).
    #[arg(long, global = true, env = "ALERTSYNC_ACCOUNT")]
    account: Option<String>,

    /// Account role: normal, vip or admin.
    #[arg(long, global = true, default_value = "normal", env = "ALERTSYNC_ROLE")]
    role: String,

    /// Subscription expiry (RFC 3339). Required for non-admin roles.
    #[arg(long, global = true, env = "ALERTSYNC_SUBSCRIPTION_EXPIRY")]
    expires: Option<DateTime<Utc>>,
}

impl AccountArgs {
    fn identity(&self) -> Option<Identity> {
        let account = self.account.as_ref()?;
        Some(Identity::new(account, Role::parse(&self.role), self.expires))
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync, then stay connected and report incoming alerts until Ctrl-C.
    Run,
    /// Print the message feed.
    Messages {
        /// Case-insensitive text filter.
        #[arg(long, default_value = "")]
        search: String,
        /// Fetch the next older page before printing.
        #[arg(long)]
        more: bool,
        /// Group by local calendar day.
        #[arg(long)]
        by_day: bool,
        /// Skip the network refresh and print the cache only.
        #[arg(long)]
        offline: bool,
    },
    /// Show or change notification preferences.
    Prefs {
        /// `category=on|off`, e.g. `prioritaire=on`.
        #[arg(long)]
        set: Vec<String>,
    },
    /// Show or change display filters.
    Filters {
        /// `category=on|off`, e.g. `debug=off`.
        #[arg(long)]
        set: Vec<String>,
    },
    /// Clear the local message store.
    Logout,
    /// Show recent warnings and errors recorded on this device.
    Logs {
        #[arg(long, default_value_t = 20)]
        limit: u32,
        /// Only entries for the signed-in account.
        #[arg(long)]
        mine: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("failed to load settings")?;

    let telemetry = init_telemetry(settings.telemetry_config());

    if let Command::Logs { limit, mine } = cli.command {
        let Some(sink) = telemetry.logs() else {
            bail!("warning log is disabled (telemetry.logToSqlite)");
        };
        let account = if mine { cli.account.account.as_deref() } else { None };
        let records = sink.recent(account, limit).context("failed to read warning log")?;
        if records.is_empty() {
            println!("no warnings recorded");
        }
        for record in records.iter().rev() {
            println!(
                "{} {:<5} {} {}{}",
                record.timestamp,
                record.level,
                record.target,
                record.message,
                record.fields.as_deref().map(|f| format!(" {f}")).unwrap_or_default()
            );
        }
        return Ok(());
    }

    let session = Arc::new(match cli.account.identity() {
        Some(identity) => SessionIdentity::signed_in(identity),
        None => SessionIdentity::new(),
    });
    let engine = build_engine(&settings, Arc::clone(&session))?;
    engine.start().await;

    match cli.command {
        Command::Run => run(&settings, engine).await,
        Command::Messages {
            search,
            more,
            by_day,
            offline,
        } => {
            if !offline {
                report_sync(engine.refresh().await?);
                if more {
                    report_sync(engine.load_more().await?);
                }
            }
            print_feed(&engine.messages(&search)?, by_day);
            engine.store().flush().await;
            Ok(())
        }
        Command::Prefs { set } => {
            let mut current = engine.preferences().await?;
            for assignment in &set {
                let (category, value) = parse_assignment(assignment)?;
                current = engine.toggle_preference(category, value).await?;
            }
            print_toggles("notifications", &current);
            Ok(())
        }
        Command::Filters { set } => {
            let mut current = engine.filters()?;
            for assignment in &set {
                let (category, value) = parse_assignment(assignment)?;
                current = engine.toggle_filter(category, value)?;
            }
            print_toggles("filters", &current);
            Ok(())
        }
        Command::Logout => {
            engine.logout().await;
            session.sign_out();
            println!("local messages cleared");
            Ok(())
        }
        Command::Logs { .. } => Ok(()),
    }
}

fn build_engine(
    settings: &ClientSettings,
    session: Arc<SessionIdentity>,
) -> Result<Arc<SyncEngine>> {
    let db_path = settings.database_path();
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    let durable: Arc<dyn DurableStore> = Arc::new(SqliteKvStore::new(db));

    let http = settings.http_config()?;
    let fetcher = ReliableFetcher::new(HttpBackend::new(http.clone())?, settings.retry_config());
    let sink = HttpBackend::new(http)?;

    let engine = SyncEngine::new(settings.sync_config(), durable, Arc::new(fetcher), session)
        .with_preference_sink(Arc::new(sink));
    Ok(Arc::new(engine))
}

async fn run(settings: &ClientSettings, engine: Arc<SyncEngine>) -> Result<()> {
    let mut transport = MultiTransport::new();
    if let Some(config) = settings.websocket_config() {
        transport.push(Box::new(WebSocketTransport::connect(config)));
    }
    if settings.live.push {
        let (sender, push) = PushTransport::channel(PUSH_CAPACITY);
        transport.push(Box::new(push));
        tokio::spawn(feed_push_from_stdin(sender));
    }
    if transport.is_empty() {
        bail!("no live transport enabled (set live.websocket or live.push)");
    }

    report_sync(engine.refresh().await?);

    let cancel = CancellationToken::new();
    let mut events = engine.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(EngineEvent::MessageArrived { message, alert }) => {
                    if alert {
                        println!(
                            "ALERT [{}] {} {}",
                            message.category,
                            message.occurred_at.with_timezone(&Local).format("%H:%M:%S"),
                            message.body
                        );
                    }
                }
                Ok(EngineEvent::ConnectivityChanged { online }) => {
                    println!("{}", if online { "back online" } else { "offline" });
                }
                Ok(EngineEvent::Synced { added, .. }) if added > 0 => {
                    println!("{added} new message(s)");
                }
                Ok(EngineEvent::ReauthRequired) => {
                    eprintln!("backend rejected the API key; sign in again");
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "event printer lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let runner = {
        let engine = Arc::clone(&engine);
        let cancel = cancel.clone();
        tokio::spawn(async move { engine.run(&mut transport, cancel).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down");
    cancel.cancel();
    runner.await.context("engine task failed")?;
    engine.store().flush().await;
    printer.abort();
    Ok(())
}

/// Push payloads arrive one JSON document per line on stdin.
async fn feed_push_from_stdin(sender: PushSender) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => {
                if sender.deliver_raw(line).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "stopped reading push payloads");
                return;
            }
        }
    }
}

fn parse_assignment(raw: &str) -> Result<(Category, bool)> {
    let Some((name, value)) = raw.split_once('=') else {
        bail!("expected category=on|off, got {raw:?}");
    };
    let category = Category::parse(name);
    if !category.is_known() {
        bail!("unknown category {name:?} (expected debug, info or prioritaire)");
    }
    let Some(value) = parse_bool(value) else {
        bail!("expected on or off for {name}, got {value:?}");
    };
    Ok((category, value))
}

fn report_sync(outcome: SyncOutcome) {
    match outcome {
        SyncOutcome::Synced { added, fetched } => {
            tracing::info!(added, fetched, "synced");
        }
        SyncOutcome::Unavailable { error } => {
            eprintln!("backend unavailable ({error}); showing cached messages");
        }
        SyncOutcome::Unauthorized { error } => {
            eprintln!("backend rejected the API key: {error}");
        }
    }
}

fn print_feed(feed: &Feed, by_day: bool) {
    let page = match feed {
        Feed::SignedOut => {
            println!("not signed in (pass --account)");
            return;
        }
        Feed::Gated => {
            println!("subscription expired: renew to see messages");
            return;
        }
        Feed::Messages(page) => page,
    };

    if !page.online {
        println!("(offline)");
    }
    if page.items.is_empty() {
        println!("no messages");
        return;
    }

    let print_line = |message: &Message, fresh: bool| {
        let tag = format!("[{}]", message.category);
        println!(
            "{} {:<11} {}{}",
            message.occurred_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            tag,
            message.body,
            if fresh { "  (new)" } else { "" }
        );
    };

    if by_day {
        let messages: Vec<_> = page.items.iter().map(|i| i.message.clone()).collect();
        for section in group_by_day(&messages, &Local) {
            println!("== {} ==", section.date.format("%A %d %B %Y"));
            for message in &section.messages {
                let fresh = page
                    .items
                    .iter()
                    .any(|i| i.message.id == message.id && i.recently_arrived);
                print_line(message, fresh);
            }
        }
    } else {
        for item in &page.items {
            print_line(&item.message, item.recently_arrived);
        }
    }
}

fn print_toggles(label: &str, toggles: &CategoryToggles) {
    let state = |on: bool| if on { "on" } else { "off" };
    println!("{label}:");
    println!("  debug        {}", state(toggles.debug));
    println!("  info         {}", state(toggles.info));
    println!("  prioritaire  {}", state(toggles.priority));
}
