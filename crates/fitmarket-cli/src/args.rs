//! Command-line arguments.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use fitmarket_live::proto::EventKind;
use fitmarket_live::{ChangeHandler, LiveConfig, SubscriptionRequest, DEFAULT_CHANNEL_TOKEN_LEN};
use fitmarket_session::Role;

/// Default capacity of the ingest channel.
pub const DEFAULT_INGEST_BUFFER: usize = 1024;

/// FitMarket live change tools
#[derive(Parser, Debug)]
#[command(name = "fitmarket")]
#[command(version, about = "FitMarket live change tools", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay change events (JSON lines) through a live subscription.
    Watch(WatchArgs),
}

#[derive(clap::Args, Debug)]
pub struct WatchArgs {
    /// Collection to watch.
    #[arg(short, long)]
    pub collection: String,

    /// Namespace of the collection (defaults to the configured namespace).
    #[arg(short, long)]
    pub namespace: Option<String>,

    /// Event kind: insert, update, delete or * for all.
    #[arg(short, long, default_value = "*")]
    pub event: EventKind,

    /// Row predicate, e.g. `status=eq.open` or `price=lt.50`.
    #[arg(long)]
    pub filter: Option<String>,

    /// Fixed channel identifier instead of a generated one.
    #[arg(long)]
    pub channel_id: Option<String>,

    /// Read events from a file instead of stdin.
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Run inside a session with this role (client, trainer or admin).
    #[arg(long)]
    pub role: Option<Role>,

    /// Namespace used when --namespace is not given.
    #[arg(long, default_value = fitmarket_live::proto::DEFAULT_NAMESPACE)]
    pub default_namespace: String,

    /// Length of the random suffix of generated channel identifiers.
    #[arg(long, default_value_t = DEFAULT_CHANNEL_TOKEN_LEN)]
    pub token_len: usize,

    /// Let handler panics propagate instead of isolating them.
    #[arg(long)]
    pub no_isolation: bool,

    /// Capacity of the ingest channel.
    #[arg(long, default_value_t = DEFAULT_INGEST_BUFFER)]
    pub buffer: usize,
}

impl WatchArgs {
    /// Convert command-line arguments to the subscription configuration.
    pub fn live_config(&self) -> LiveConfig {
        LiveConfig::new()
            .with_default_namespace(self.default_namespace.as_str())
            .with_channel_token_len(self.token_len)
            .with_fault_isolation(!self.no_isolation)
    }

    /// Build the subscription request for the watched collection.
    pub fn request(&self, handler: Arc<dyn ChangeHandler>) -> SubscriptionRequest {
        let mut request = SubscriptionRequest::with_shared_handler(self.collection.as_str(), handler)
            .with_event(self.event);

        if let Some(namespace) = &self.namespace {
            request = request.with_namespace(namespace.as_str());
        }
        if let Some(filter) = &self.filter {
            request = request.with_predicate(filter.as_str());
        }
        if let Some(channel_id) = &self.channel_id {
            request = request.with_channel_id(channel_id.as_str());
        }

        request
    }
}
