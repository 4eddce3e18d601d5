//! Process entry point.
//!
//! Wires the ledger, exchange adapter, event bus, and supervisor together,
//! optionally seeds and starts one strategy from a template, then runs until
//! Ctrl+C. The HTTP command layer is an external collaborator; this binary
//! is the standalone way to run the supervisor.
//!
//! ```bash
//! # Testnet, seed a martingale strategy and run it
//! BINANCE_ENVIRONMENT=testnet futures-supervisor --template martingale --name mart-btc
//!
//! # Just recover state and idle, serving an embedded supervisor
//! futures-supervisor --db sqlite://trader.db
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};

use common::VenueEnvironment;
use event_bus::{EventBus, Topic};
use exchange::{ApiCredentials, BinanceFuturesAdapter};
use ledger::Ledger;
use supervisor::{Supervisor, SupervisorSettings};

fn print_usage() {
    eprintln!("Usage: futures-supervisor [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --testnet            Use the futures testnet");
    eprintln!("  --db <url>           Ledger database (default sqlite://supervisor.db)");
    eprintln!("  --template <id>      Seed a strategy from a template and start it");
    eprintln!("  --name <name>        Name for the seeded strategy");
    eprintln!("  --help               Show this help");
    eprintln!();
    eprintln!("Environment variables:");
    eprintln!("  BINANCE_API_KEY       Venue API key");
    eprintln!("  BINANCE_SECRET_KEY    Venue secret key");
    eprintln!("  BINANCE_ENVIRONMENT   'production' (default) or 'testnet'");
    eprintln!("  LLM_API_KEY           Key for the LLM signal kernel (optional)");
}

struct Args {
    testnet: bool,
    db_url: String,
    template: Option<String>,
    name: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        testnet: false,
        db_url: "sqlite://supervisor.db".to_string(),
        template: None,
        name: None,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--testnet" | "-t" => args.testnet = true,
            "--db" => args.db_url = iter.next().context("--db needs a value")?,
            "--template" => args.template = Some(iter.next().context("--template needs a value")?),
            "--name" => args.name = Some(iter.next().context("--name needs a value")?),
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown option: {}", other);
                print_usage();
                std::process::exit(1);
            }
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<()> {
    match dotenvy::dotenv() {
        Ok(path) => eprintln!("Loaded environment from {}", path.display()),
        Err(dotenvy::Error::Io(_)) => {}
        Err(e) => eprintln!("Warning: failed to load .env: {}", e),
    }
    common::init_logging();

    let args = parse_args()?;
    let environment = if args.testnet {
        VenueEnvironment::Testnet
    } else {
        VenueEnvironment::from_env()
    };
    if environment.is_production() {
        warn!("running against PRODUCTION endpoints with real funds");
    }

    let credentials = ApiCredentials::from_env().context("venue credentials required")?;
    info!(api_key = credentials.api_key(), environment = %environment, "credentials loaded");

    let ledger = Ledger::connect(&args.db_url)
        .await
        .with_context(|| format!("opening ledger at {}", args.db_url))?;
    let adapter = Arc::new(BinanceFuturesAdapter::new(credentials, environment)?);
    let bus = Arc::new(EventBus::default());

    let supervisor = Arc::new(Supervisor::new(
        ledger,
        adapter,
        Arc::clone(&bus),
        SupervisorSettings::default(),
    ));
    let recovered = supervisor.recover().await?;
    if recovered > 0 {
        info!(recovered, "reset strategies from a previous process");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let snapshot_task = supervisor.spawn_snapshot_task(shutdown_rx.clone());

    // Mirror trade and error events into the log.
    let mut trade_sub = bus.subscribe(Topic::Trade);
    let mut error_sub = bus.subscribe(Topic::Error);
    let mut event_shutdown = shutdown_rx.clone();
    let event_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = trade_sub.recv() => info!(?event, "trade event"),
                Some(event) = error_sub.recv() => warn!(?event, "error event"),
                _ = event_shutdown.changed() => {
                    if *event_shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });

    if let Some(template_id) = &args.template {
        let name = args.name.clone().unwrap_or_else(|| template_id.clone());
        let strategy = supervisor
            .create_from_template(template_id, &name)
            .await
            .context("seeding strategy from template")?;
        info!(strategy_id = strategy.id, name = %strategy.name, "strategy seeded");
        if let Err(e) = supervisor.start(strategy.id).await {
            error!(strategy_id = strategy.id, error = %e, "seeded strategy failed to start");
        }
    }

    info!("supervisor running; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await.context("ctrl-c handler")?;
    info!("shutdown requested");

    supervisor.stop_all(true).await;
    let _ = shutdown_tx.send(true);
    let _ = snapshot_task.await;
    let _ = event_task.await;

    info!("shutdown complete");
    Ok(())
}
