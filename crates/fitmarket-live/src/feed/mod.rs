//! In-process change feed.
//!
//! [`InMemoryChangeFeed`] implements the [`ChangeFeedClient`](crate::ChangeFeedClient)
//! surface without a network connection, for development and tests.
//! [`FeedIngestor`] drives it from an async channel of change events.

mod ingest;
mod memory;

pub use ingest::{channel, start_ingestor, FeedIngestor, IngestHandle, IngestReceiver, IngestSender, IngestSummary};
pub use memory::{InMemoryChangeFeed, MemoryChannel};
