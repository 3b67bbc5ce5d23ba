//! Background ingestion of change events into an [`InMemoryChangeFeed`].

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use fitmarket_proto::ChangeEvent;

use super::memory::InMemoryChangeFeed;

/// Totals reported when an ingestor stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Events read from the channel.
    pub received: u64,
    /// Deliveries queued across all matching bindings.
    pub matched: u64,
}

/// Reads change events from a channel and publishes them to the feed.
///
/// Each event is published and flushed before the next one is read, so
/// handlers see events in the order they were sent.
pub struct FeedIngestor {
    rx: mpsc::Receiver<ChangeEvent>,
    feed: InMemoryChangeFeed,
    summary: IngestSummary,
}

impl FeedIngestor {
    pub fn new(rx: mpsc::Receiver<ChangeEvent>, feed: InMemoryChangeFeed) -> Self {
        Self {
            rx,
            feed,
            summary: IngestSummary::default(),
        }
    }

    /// Run until every sender is dropped.
    pub async fn run(mut self) -> IngestSummary {
        info!("feed ingestor started");

        // Acks queued before the first event.
        self.feed.flush();

        while let Some(event) = self.rx.recv().await {
            self.process(event);
        }

        info!(
            received = self.summary.received,
            matched = self.summary.matched,
            "feed ingestor stopped (channel closed)"
        );
        self.summary
    }

    fn process(&mut self, event: ChangeEvent) {
        debug!(
            schema = %event.schema,
            table = %event.table,
            change_type = %event.change_type,
            "ingesting change event"
        );

        let matched = self.feed.publish(event);
        self.feed.flush();

        self.summary.received += 1;
        self.summary.matched += matched as u64;
    }
}

/// Sender half of an ingest channel.
pub type IngestSender = mpsc::Sender<ChangeEvent>;

/// Receiver half of an ingest channel.
pub type IngestReceiver = mpsc::Receiver<ChangeEvent>;

/// Create an ingest channel with the given buffer size.
pub fn channel(buffer_size: usize) -> (IngestSender, IngestReceiver) {
    mpsc::channel(buffer_size)
}

/// Handle for a running [`FeedIngestor`].
#[derive(Debug, Clone)]
pub struct IngestHandle {
    tx: IngestSender,
}

impl IngestHandle {
    pub fn new(tx: IngestSender) -> Self {
        Self { tx }
    }

    /// Submit an event without waiting. Fails if the buffer is full.
    pub fn try_send(&self, event: ChangeEvent) -> Result<(), mpsc::error::TrySendError<ChangeEvent>> {
        self.tx.try_send(event)
    }

    /// Submit an event, waiting for buffer space.
    pub async fn send(&self, event: ChangeEvent) -> Result<(), mpsc::error::SendError<ChangeEvent>> {
        self.tx.send(event).await
    }

    pub fn sender(&self) -> &IngestSender {
        &self.tx
    }
}

/// Spawn a [`FeedIngestor`] on the current runtime.
///
/// The task stops once every clone of the returned handle is dropped; its
/// [`IngestSummary`] is available through the returned join handle.
pub fn start_ingestor(
    feed: InMemoryChangeFeed,
    buffer_size: usize,
) -> (IngestHandle, JoinHandle<IngestSummary>) {
    let (tx, rx) = channel(buffer_size);
    let task = tokio::spawn(FeedIngestor::new(rx, feed).run());

    (IngestHandle::new(tx), task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ChangeFeedClient, FeedChannel};
    use fitmarket_proto::{record, FilterDescriptor};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    fn order(id: i64) -> ChangeEvent {
        ChangeEvent::insert("orders", record(json!({ "id": id })))
    }

    #[tokio::test]
    async fn test_ingestor_publishes_in_order() {
        let feed = InMemoryChangeFeed::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let channel = feed.channel("orders-test");
        let sink = seen.clone();
        channel.on(
            FilterDescriptor::new("public", "orders"),
            Arc::new(move |e: ChangeEvent| sink.lock().push(e.new["id"].as_i64().unwrap())),
        );
        channel.subscribe(Arc::new(|_: crate::client::ChannelStatus| {}));

        let (tx, rx) = super::channel(16);
        let ingestor = FeedIngestor::new(rx, feed.clone());
        let task = tokio::spawn(ingestor.run());

        for id in 0..5 {
            tx.send(order(id)).await.unwrap();
        }
        tx.send(ChangeEvent::insert("bids", record(json!({})))).await.unwrap();
        drop(tx);

        let summary = task.await.unwrap();
        assert_eq!(summary.received, 6);
        assert_eq!(summary.matched, 5);
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(feed.pending(), 0);
    }

    #[tokio::test]
    async fn test_handle_try_send_and_clone() {
        let feed = InMemoryChangeFeed::new();
        let (handle, task) = start_ingestor(feed, 4);
        let other = handle.clone();

        assert!(handle.try_send(order(1)).is_ok());
        assert!(other.try_send(order(2)).is_ok());
        assert!(other.send(order(3)).await.is_ok());

        drop(handle);
        drop(other);
        assert_eq!(task.await.unwrap().received, 3);
    }

    #[tokio::test]
    async fn test_started_ingestor_reports_summary() {
        let feed = InMemoryChangeFeed::new();
        let channel = feed.channel("orders-summary");
        channel.on(
            FilterDescriptor::new("public", "orders"),
            Arc::new(|_: ChangeEvent| {}),
        );
        channel.subscribe(Arc::new(|_: crate::client::ChannelStatus| {}));

        let (handle, task) = start_ingestor(feed.clone(), 8);
        for id in 0..3 {
            handle.send(order(id)).await.unwrap();
        }
        handle
            .send(ChangeEvent::insert("bids", record(json!({}))))
            .await
            .unwrap();
        drop(handle);

        let summary = task.await.unwrap();
        assert_eq!(
            summary,
            IngestSummary {
                received: 4,
                matched: 3
            }
        );
        assert_eq!(feed.pending(), 0);
    }
}
