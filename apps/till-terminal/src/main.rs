//! # Till Terminal Entry Point
//!
//! Runs one POS session against the store backend with an operator
//! console on stdin.
//!
//! ## Startup Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Terminal Startup                                  │
//! │                                                                         │
//! │  1. Initialize Logging ───────────────────────────────────────────────► │
//! │     • tracing-subscriber with env filter                                │
//! │     • Default: info,till=debug,sqlx=warn; override with RUST_LOG        │
//! │                                                                         │
//! │  2. Load Configuration ───────────────────────────────────────────────► │
//! │     • till.toml from the platform config dir, then TILL_* variables     │
//! │                                                                         │
//! │  3. Open Database ────────────────────────────────────────────────────► │
//! │     • platform data dir, TILL_DB_PATH overrides                         │
//! │     • WAL mode, pending migrations applied                              │
//! │                                                                         │
//! │  4. Wire Session ─────────────────────────────────────────────────────► │
//! │     • HttpBackend as stock service, sale service and health probe       │
//! │     • start connectivity monitor and sync engine                        │
//! │                                                                         │
//! │  5. Console Loop until `quit`, EOF or Ctrl-C                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use till_core::SaleEvent;
use till_db::{Database, DbConfig};
use till_sync::{EventSink, HttpBackend, PipelineConfig, PosSession, SaleOutcome, SyncEvent};

use crate::commands::{Command, HELP};

/// Logs completed sales; stands in for a receipt printer or dashboard.
struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, event: SaleEvent) {
        info!(
            sale_id = %event.client_sale_id,
            server_sale_id = %event.server_sale_id,
            total_cents = event.total_cents,
            was_offline = event.was_offline,
            "Sale completed"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    info!("Starting Till terminal");

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(PipelineConfig::default_config_path);
    let config = PipelineConfig::load(config_path.clone()).context("loading configuration")?;

    // First run: persist the generated terminal id.
    if let Some(path) = config_path.filter(|p| !p.exists()) {
        if let Err(e) = config.save(Some(path)) {
            warn!(error = %e, "Could not write default config");
        }
    }
    info!(
        terminal_id = %config.terminal_id(),
        backend = %config.backend.base_url,
        "Configuration loaded"
    );

    let db_path = PipelineConfig::default_database_path().unwrap_or_else(|| PathBuf::from("till.db"));
    if let Some(dir) = db_path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let db = Database::new(DbConfig::new(db_path).with_env_override())
        .await
        .context("opening local database")?;
    let db = Arc::new(db);

    let backend = Arc::new(HttpBackend::from_config(&config)?);
    let session = PosSession::builder(config)
        .with_database(db.clone())
        .with_stock_service(backend.clone())
        .with_sale_service(backend.clone())
        .with_probe(backend)
        .with_event_sink(Arc::new(LogSink))
        .build()?;

    session.start().await?;
    spawn_sync_log(&session);

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match Command::parse(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => {
                        if let Err(e) = run(&session, command).await {
                            println!("error: {e}");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("{e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.shutdown().await;
    db.close().await;
    Ok(())
}

/// Initializes the tracing subscriber for structured logging.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,till=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

fn spawn_sync_log(session: &PosSession) {
    let mut events = session.subscribe_sync();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SyncEvent::SyncFailed { exhausted } => {
                    warn!(sales = ?exhausted, "Sync gave up on some sales, see 'offline'");
                }
                SyncEvent::SyncCompleted { synced, remaining } if synced > 0 => {
                    info!(synced, remaining, "Offline sales synced");
                }
                _ => {}
            }
        }
    });
}

async fn run(session: &PosSession, command: Command) -> Result<()> {
    match command {
        Command::Add(line) => session.add_item(line)?,
        Command::Quantity {
            product_id,
            quantity,
        } => session.update_quantity(&product_id, quantity)?,
        Command::Remove(product_id) => session.remove_item(&product_id)?,
        Command::Clear => session.clear_cart()?,
        Command::Cart => print_cart(session),
        Command::Check => {
            let result = session.validate_cart_stock().await;
            if result.is_valid {
                println!("stock ok ({:?})", result.source);
            } else {
                println!("{}", result.error_message.unwrap_or_default());
                for item in result.insufficient_items {
                    println!(
                        "  {} needs {}, {} available ({} missing)",
                        item.product_name, item.required, item.available, item.missing
                    );
                }
            }
        }
        Command::Checkout => println!("step: {}", session.open_checkout()?),
        Command::Next => println!("step: {}", session.advance().await?),
        Command::Back => println!("step: {}", session.back()?),
        Command::Cancel => session.cancel()?,
        Command::Details { customer_id, note } => session.set_details(customer_id, note)?,
        Command::Pay { customer_id, note } => match session.process_sale(customer_id, note).await? {
            SaleOutcome::Confirmed { server_sale_id, .. } => println!("sale {server_sale_id} confirmed"),
            SaleOutcome::Queued { client_sale_id } => {
                println!("offline: sale {client_sale_id} saved and queued for sync")
            }
        },
        Command::Sync => {
            let report = session.force_sync().await?;
            println!(
                "synced {}, gave up on {}{}",
                report.synced,
                report.exhausted.len(),
                report
                    .deferred
                    .map(|reason| format!(", stopped: {reason}"))
                    .unwrap_or_default()
            );
        }
        Command::Status => {
            let status = session.sync_status().await?;
            println!(
                "online: {} ({:?})  queued: {}  needs attention: {}  last sync: {}",
                status.online,
                status.quality,
                status.queue_size,
                status.needs_attention,
                status
                    .last_sync_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".into())
            );
            if let Some(error) = status.last_error {
                println!("last error: {error}");
            }
        }
        Command::Offline => {
            for record in session.offline_sales().await? {
                println!(
                    "{}  {}  {}  retries {}{}",
                    record.id,
                    record.status,
                    record.total(),
                    record.retry_count,
                    if record.needs_attention { "  NEEDS ATTENTION" } else { "" }
                );
            }
        }
        Command::Retry(id) => {
            let record = session.retry_failed_sale(&id).await?;
            println!("sale {} is {} again", record.id, record.status);
        }
        Command::Purge(id) => session.purge_offline_sale(&id).await?,
        Command::Notes => {
            for note in session.notifications() {
                println!("[{}] {:?}: {}", note.id, note.kind, note.message);
            }
        }
        Command::Dismiss(id) => {
            if !session.dismiss_notification(id) {
                println!("no notification {id}");
            }
        }
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
    Ok(())
}

fn print_cart(session: &PosSession) {
    let cart = session.cart();
    for line in cart.lines() {
        let flag = if line.exceeds_available() { "  (exceeds stock)" } else { "" };
        println!(
            "{:>4} x {:<24} {:>10}{flag}",
            line.quantity,
            line.product_name,
            line.line_total().to_string()
        );
    }
    let summary = session.summary();
    println!(
        "{} items, total {}",
        summary.item_count,
        till_core::Money::from_cents(summary.total_amount_cents)
    );
}
