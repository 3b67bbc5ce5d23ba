//! FitMarket command-line tools.
//!
//! `fitmarket watch` opens a live subscription on an in-process change feed
//! and replays JSON-lines change events through it, printing every event the
//! subscription dispatches.

mod args;
mod output;
mod replay;

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufRead, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fitmarket_live::{start_ingestor, InMemoryChangeFeed, LiveSubscriptions};
use fitmarket_session::SessionContext;

use args::{Cli, Command, WatchArgs};
use output::EventPrinter;

#[tokio::main]
async fn main() {
    // Logs go to stderr; stdout carries the events.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fitmarket_cli=info,fitmarket_live=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Watch(args) => run_watch(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_watch(args: WatchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.live_config();
    tracing::info!(
        collection = %args.collection,
        event = %args.event,
        filter = ?args.filter,
        default_namespace = %config.default_namespace,
        "configuration loaded"
    );

    let feed = InMemoryChangeFeed::new();
    let live = LiveSubscriptions::with_config(Arc::new(feed.clone()), config);

    let session = args.role.map(|role| {
        tracing::info!(
            role = %role,
            dashboard = role.dashboard().path(),
            can_bid = role.can_bid(),
            can_moderate = role.can_moderate(),
            "running inside session"
        );
        SessionContext::start(role).with_live(&live)
    });

    let printer = Arc::new(EventPrinter::new(std::io::stdout()));
    let owner = session.as_ref().and_then(|s| s.live()).unwrap_or(&live);
    let subscription = owner.open(args.request(printer.clone()))?;

    let (handle, ingestor) = start_ingestor(feed.clone(), args.buffer.max(1));
    let tx = handle.sender().clone();
    drop(handle);

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &args.file {
        Some(path) => Box::new(BufReader::new(tokio::fs::File::open(path).await?)),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };
    let replay = replay::forward_lines(reader, tx).await?;
    let ingest = ingestor.await?;

    tracing::info!(
        channel_id = %subscription.channel_id(),
        state = %subscription.state(),
        received = ingest.received,
        malformed = replay.malformed,
        delivered = subscription.events_delivered(),
        printed = printer.printed(),
        faults = subscription.handler_faults(),
        connection_errors = printer.connection_errors(),
        age_ms = subscription.age().as_millis() as u64,
        "watch finished"
    );

    subscription.close();
    if let Some(session) = session {
        session.end();
    }

    Ok(())
}
