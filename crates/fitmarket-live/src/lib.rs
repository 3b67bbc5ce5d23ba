//! FitMarket Live - Live change subscriptions for marketplace dashboards.
//!
//! This crate opens filtered subscriptions on a remote change feed, routes
//! the events to handlers, and tears channels down when their consumer goes
//! away.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use fitmarket_live::{
//!     InMemoryChangeFeed, LiveSubscriptions, SubscriptionRequest, SubscriptionState,
//! };
//! use fitmarket_live::proto::{ChangeEvent, EventKind};
//!
//! let feed = InMemoryChangeFeed::new();
//! let live = LiveSubscriptions::new(Arc::new(feed.clone()));
//!
//! // Watch status changes on the requests a client posted
//! let subscription = live.open(
//!     SubscriptionRequest::new("training_requests", |event: ChangeEvent| {
//!         println!("request changed: {:?}", event.record());
//!     })
//!     .with_event(EventKind::Update)
//!     .with_predicate("client_id=eq.7f3a"),
//! )?;
//!
//! // Deliver the subscribe acknowledgement
//! feed.flush();
//! assert_eq!(subscription.state(), SubscriptionState::Active);
//!
//! subscription.close();
//! ```

pub mod binding;
pub mod client;
pub mod config;
mod dispatch;
pub mod error;
pub mod feed;
pub mod manager;
pub mod subscription;

pub use binding::LiveQuery;
pub use client::{ChangeFeedClient, ChannelStatus, EventSink, FeedChannel, StatusSink};
pub use config::{
    LiveConfig, DEFAULT_CHANNEL_TOKEN_LEN, MAX_CHANNEL_ID_ATTEMPTS, MIN_CHANNEL_TOKEN_LEN,
};
pub use error::Error;
pub use feed::{start_ingestor, FeedIngestor, InMemoryChangeFeed, IngestHandle, IngestSummary};
pub use manager::LiveSubscriptions;
pub use subscription::{
    generate_channel_id, ActiveSubscription, ChangeHandler, SubscriptionKey, SubscriptionRequest,
    SubscriptionState,
};

/// Re-export protocol types.
pub use fitmarket_proto as proto;
