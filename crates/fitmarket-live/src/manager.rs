//! Live subscription manager for opening and closing change-feed channels.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::client::{ChangeFeedClient, EventSink, FeedChannel, StatusSink};
use crate::config::{LiveConfig, MAX_CHANNEL_ID_ATTEMPTS};
use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::subscription::{
    generate_channel_id, ActiveSubscription, SubscriptionCell, SubscriptionRequest,
};

/// An open channel tracked by the manager.
pub(crate) struct Registration {
    cell: Arc<SubscriptionCell>,
    channel: Arc<dyn FeedChannel>,
}

/// State shared between the manager and the subscriptions it hands out.
pub(crate) struct Shared {
    client: Arc<dyn ChangeFeedClient>,
    /// Open subscriptions keyed by internal subscription ID.
    registry: DashMap<u64, Registration>,
    next_subscription_id: AtomicU64,
    config: LiveConfig,
}

impl Shared {
    /// Close a subscription and remove its channel from the feed.
    ///
    /// Returns false if it was already closed.
    pub(crate) fn release(&self, cell: &SubscriptionCell, channel: &Arc<dyn FeedChannel>) -> bool {
        if !cell.mark_closed() {
            return false;
        }

        self.registry.remove(&cell.id);
        self.client.remove_channel(channel);

        tracing::debug!(
            subscription_id = cell.id,
            channel_id = %cell.channel_id,
            events_delivered = cell.events_delivered(),
            "subscription closed"
        );
        true
    }

    fn is_channel_open(&self, channel_id: &str) -> bool {
        self.registry
            .iter()
            .any(|entry| entry.cell.channel_id == channel_id)
    }

    fn resolve_channel_id(&self, request: &SubscriptionRequest) -> Result<String, Error> {
        let token_len = self.config.effective_token_len();
        self.resolve_channel_id_with(request, || {
            generate_channel_id(request.collection(), token_len)
        })
    }

    fn resolve_channel_id_with(
        &self,
        request: &SubscriptionRequest,
        mut generate: impl FnMut() -> String,
    ) -> Result<String, Error> {
        if let Some(channel_id) = request.channel_id() {
            if self.is_channel_open(channel_id) {
                tracing::warn!(
                    channel_id,
                    "channel id supplied by caller is already open; events may be multiplexed"
                );
            }
            return Ok(channel_id.to_string());
        }

        for _ in 0..MAX_CHANNEL_ID_ATTEMPTS {
            let channel_id = generate();
            if !self.is_channel_open(&channel_id) {
                return Ok(channel_id);
            }
        }

        Err(Error::InvalidRequest(format!(
            "no free channel id for '{}' after {} attempts",
            request.collection(),
            MAX_CHANNEL_ID_ATTEMPTS
        )))
    }
}

/// Manager for live change subscriptions.
///
/// Cloning is cheap; clones share the same client and registry.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use fitmarket_live::{InMemoryChangeFeed, LiveSubscriptions, SubscriptionRequest};
/// use fitmarket_proto::{ChangeEvent, EventKind};
///
/// let feed = InMemoryChangeFeed::new();
/// let live = LiveSubscriptions::new(Arc::new(feed.clone()));
///
/// let subscription = live.open(
///     SubscriptionRequest::new("bids", |event: ChangeEvent| println!("{:?}", event))
///         .with_event(EventKind::Insert)
///         .with_predicate("request_id=eq.42"),
/// )?;
///
/// // ... later, when the consumer goes away
/// subscription.close();
/// ```
#[derive(Clone)]
pub struct LiveSubscriptions {
    shared: Arc<Shared>,
}

impl LiveSubscriptions {
    /// Create a manager with the default configuration.
    pub fn new(client: Arc<dyn ChangeFeedClient>) -> Self {
        Self::with_config(client, LiveConfig::default())
    }

    /// Create a manager with an explicit configuration.
    pub fn with_config(client: Arc<dyn ChangeFeedClient>, config: LiveConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                client,
                registry: DashMap::new(),
                next_subscription_id: AtomicU64::new(1),
                config,
            }),
        }
    }

    /// Create a manager on the same client and configuration with its own,
    /// empty registry.
    ///
    /// `close_all` on either manager leaves the other's subscriptions open.
    /// Channel-id collision checks only see the manager's own registry.
    pub fn fork(&self) -> Self {
        Self::with_config(self.shared.client.clone(), self.shared.config.clone())
    }

    /// Open a subscription.
    ///
    /// Returns as soon as the subscribe call is issued; the subscription is
    /// `Opening` until the feed acknowledges it. Invalid requests fail before
    /// any channel is opened.
    pub fn open(&self, request: SubscriptionRequest) -> Result<ActiveSubscription, Error> {
        let shared = &self.shared;
        let filter = request.filter_descriptor(&shared.config.default_namespace)?;
        let channel_id = shared.resolve_channel_id(&request)?;

        let subscription_id = shared.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        let cell = Arc::new(SubscriptionCell::new(subscription_id, channel_id));
        let dispatcher = Arc::new(Dispatcher::new(
            cell.clone(),
            request.handler(),
            shared.config.isolate_handler_faults,
        ));

        let channel = shared.client.channel(&cell.channel_id);

        let events = dispatcher.clone();
        let sink: EventSink = Arc::new(move |event| events.deliver(event));
        channel.on(filter.clone(), sink);

        shared.registry.insert(
            subscription_id,
            Registration {
                cell: cell.clone(),
                channel: channel.clone(),
            },
        );

        let status: StatusSink = Arc::new(move |status| dispatcher.on_status(status));
        channel.subscribe(status);

        tracing::debug!(
            subscription_id,
            channel_id = %cell.channel_id,
            filter = %filter,
            "subscription opened"
        );

        Ok(ActiveSubscription {
            shared: self.shared.clone(),
            cell,
            channel,
            filter,
        })
    }

    /// Close a subscription. Closing twice is a no-op.
    pub fn close(&self, subscription: &ActiveSubscription) {
        subscription.close();
    }

    /// Close every open subscription. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let open: Vec<(Arc<SubscriptionCell>, Arc<dyn FeedChannel>)> = self
            .shared
            .registry
            .iter()
            .map(|entry| (entry.cell.clone(), entry.channel.clone()))
            .collect();

        let closed = open
            .iter()
            .filter(|(cell, channel)| self.shared.release(cell, channel))
            .count();

        if closed > 0 {
            tracing::debug!(closed, "closed all subscriptions");
        }
        closed
    }

    /// Get the number of open subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Get the channel identifiers of all open subscriptions.
    pub fn channel_ids(&self) -> Vec<String> {
        self.shared
            .registry
            .iter()
            .map(|entry| entry.cell.channel_id.clone())
            .collect()
    }

    /// Check whether a channel identifier belongs to an open subscription.
    pub fn is_open(&self, channel_id: &str) -> bool {
        self.shared.is_channel_open(channel_id)
    }

    /// Get the configuration.
    pub fn config(&self) -> &LiveConfig {
        &self.shared.config
    }
}

impl fmt::Debug for LiveSubscriptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveSubscriptions")
            .field("open", &self.subscription_count())
            .field("config", &self.shared.config)
            .finish()
    }
}
