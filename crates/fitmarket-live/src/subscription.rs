//! Subscription requests, handlers and live subscription handles.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;

use fitmarket_proto::{ChangeEvent, EventKind, FilterDescriptor, Predicate};

use crate::client::FeedChannel;
use crate::error::Error;
use crate::manager::Shared;

const TOKEN_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Receives the events of one subscription.
///
/// Any `Fn(ChangeEvent)` closure is a handler. Implement the trait directly
/// to also observe connection errors.
pub trait ChangeHandler: Send + Sync {
    /// Called once per matching change event, in delivery order.
    fn on_change(&self, event: ChangeEvent);

    /// Called when the channel fails. Errors are dropped by default.
    fn on_error(&self, error: &Error) {
        let _ = error;
    }
}

impl<F> ChangeHandler for F
where
    F: Fn(ChangeEvent) + Send + Sync,
{
    fn on_change(&self, event: ChangeEvent) {
        self(event)
    }
}

/// A declarative request to watch a collection.
#[derive(Clone)]
pub struct SubscriptionRequest {
    collection: String,
    namespace: Option<String>,
    event: EventKind,
    predicate: Option<String>,
    channel_id: Option<String>,
    handler: Arc<dyn ChangeHandler>,
}

impl SubscriptionRequest {
    /// Watch every change on `collection`.
    pub fn new(collection: impl Into<String>, handler: impl ChangeHandler + 'static) -> Self {
        Self::with_shared_handler(collection, Arc::new(handler))
    }

    /// Like [`SubscriptionRequest::new`], reusing an already shared handler.
    pub fn with_shared_handler(
        collection: impl Into<String>,
        handler: Arc<dyn ChangeHandler>,
    ) -> Self {
        Self {
            collection: collection.into(),
            namespace: None,
            event: EventKind::Any,
            predicate: None,
            channel_id: None,
            handler,
        }
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Restrict to one event kind.
    pub fn with_event(mut self, event: EventKind) -> Self {
        self.event = event;
        self
    }

    /// Restrict to rows matching a server-side predicate.
    pub fn with_predicate(mut self, predicate: impl Into<String>) -> Self {
        self.predicate = Some(predicate.into());
        self
    }

    /// Use a fixed channel identifier instead of a generated one.
    ///
    /// The caller must not open the same identifier twice concurrently.
    pub fn with_channel_id(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    /// The collection being watched.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The caller-supplied channel identifier, if any.
    pub fn channel_id(&self) -> Option<&str> {
        self.channel_id.as_deref()
    }

    /// Parameters that identify this subscription; a change in any of them
    /// requires a new channel.
    ///
    /// The key holds the resolved filter, so spellings that select the same
    /// changes (an omitted namespace and the default one, `status=active`
    /// and `status=eq.active`) produce equal keys.
    pub fn key(&self, default_namespace: &str) -> Result<SubscriptionKey, Error> {
        Ok(SubscriptionKey {
            filter: self.filter_descriptor(default_namespace)?,
            channel_id: self.channel_id.clone(),
        })
    }

    pub(crate) fn handler(&self) -> Arc<dyn ChangeHandler> {
        self.handler.clone()
    }

    /// Validate the request and build its filter descriptor.
    pub(crate) fn filter_descriptor(&self, default_namespace: &str) -> Result<FilterDescriptor, Error> {
        if self.collection.trim().is_empty() {
            return Err(Error::InvalidRequest("collection name is empty".to_string()));
        }
        if matches!(&self.namespace, Some(ns) if ns.trim().is_empty()) {
            return Err(Error::InvalidRequest("namespace is empty".to_string()));
        }
        if matches!(&self.channel_id, Some(id) if id.trim().is_empty()) {
            return Err(Error::InvalidRequest("channel id is empty".to_string()));
        }

        let namespace = self.namespace.as_deref().unwrap_or(default_namespace);
        let mut descriptor =
            FilterDescriptor::new(namespace, self.collection.as_str()).with_event(self.event);

        if let Some(predicate) = &self.predicate {
            let predicate = Predicate::parse(predicate)
                .map_err(|e| Error::InvalidRequest(e.to_string()))?;
            descriptor = descriptor.with_predicate(predicate);
        }

        Ok(descriptor)
    }
}

impl fmt::Debug for SubscriptionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRequest")
            .field("collection", &self.collection)
            .field("namespace", &self.namespace)
            .field("event", &self.event)
            .field("predicate", &self.predicate)
            .field("channel_id", &self.channel_id)
            .finish_non_exhaustive()
    }
}

/// The filter-relevant parameters of a [`SubscriptionRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub filter: FilterDescriptor,
    pub channel_id: Option<String>,
}

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Channel opened, remote acknowledgement pending.
    Opening,
    /// Remote side acknowledged; events flow.
    Active,
    /// Closed by the owner.
    Closed,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionState::Opening => write!(f, "opening"),
            SubscriptionState::Active => write!(f, "active"),
            SubscriptionState::Closed => write!(f, "closed"),
        }
    }
}

/// State shared between a subscription handle and its dispatcher.
#[derive(Debug)]
pub(crate) struct SubscriptionCell {
    pub(crate) id: u64,
    pub(crate) channel_id: String,
    state: Mutex<SubscriptionState>,
    events_delivered: AtomicU64,
    handler_faults: AtomicU64,
    created_at: Instant,
}

impl SubscriptionCell {
    pub(crate) fn new(id: u64, channel_id: String) -> Self {
        Self {
            id,
            channel_id,
            state: Mutex::new(SubscriptionState::Opening),
            events_delivered: AtomicU64::new(0),
            handler_faults: AtomicU64::new(0),
            created_at: Instant::now(),
        }
    }

    pub(crate) fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state() == SubscriptionState::Closed
    }

    /// Opening -> Active. Returns false if the subscription was not opening.
    pub(crate) fn mark_active(&self) -> bool {
        let mut state = self.state.lock();
        if *state == SubscriptionState::Opening {
            *state = SubscriptionState::Active;
            true
        } else {
            false
        }
    }

    /// Any -> Closed. Returns false if already closed.
    pub(crate) fn mark_closed(&self) -> bool {
        let mut state = self.state.lock();
        if *state == SubscriptionState::Closed {
            false
        } else {
            *state = SubscriptionState::Closed;
            true
        }
    }

    pub(crate) fn record_event(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fault(&self) {
        self.handler_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn events_delivered(&self) -> u64 {
        self.events_delivered.load(Ordering::Relaxed)
    }

    pub(crate) fn handler_faults(&self) -> u64 {
        self.handler_faults.load(Ordering::Relaxed)
    }

    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// A live subscription.
///
/// Owns its channel exclusively. Closing is idempotent, and dropping the
/// handle closes it.
pub struct ActiveSubscription {
    pub(crate) shared: Arc<Shared>,
    pub(crate) cell: Arc<SubscriptionCell>,
    pub(crate) channel: Arc<dyn FeedChannel>,
    pub(crate) filter: FilterDescriptor,
}

impl ActiveSubscription {
    /// The channel identifier.
    pub fn channel_id(&self) -> &str {
        &self.cell.channel_id
    }

    /// The current lifecycle state.
    pub fn state(&self) -> SubscriptionState {
        self.cell.state()
    }

    /// Check if the subscription has been closed.
    pub fn is_closed(&self) -> bool {
        self.cell.is_closed()
    }

    /// The filter this subscription was opened with.
    pub fn filter(&self) -> &FilterDescriptor {
        &self.filter
    }

    /// Number of events the handler processed.
    pub fn events_delivered(&self) -> u64 {
        self.cell.events_delivered()
    }

    /// Number of handler panics that were isolated.
    pub fn handler_faults(&self) -> u64 {
        self.cell.handler_faults()
    }

    /// Time since the subscription was opened.
    pub fn age(&self) -> Duration {
        self.cell.age()
    }

    /// Close the subscription and release its channel.
    ///
    /// Calling this on a closed subscription does nothing.
    pub fn close(&self) {
        self.shared.release(&self.cell, &self.channel);
    }
}

impl Drop for ActiveSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ActiveSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSubscription")
            .field("channel_id", &self.cell.channel_id)
            .field("state", &self.state())
            .field("filter", &self.filter)
            .field("events_delivered", &self.events_delivered())
            .finish()
    }
}

/// Generate a channel identifier of the form `<collection>-<token>`.
///
/// The token is drawn uniformly from lowercase base-36 characters.
pub fn generate_channel_id(collection: &str, token_len: usize) -> String {
    let mut rng = rand::thread_rng();
    let token: String = (0..token_len)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect();

    format!("{}-{}", collection, token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn noop(_: ChangeEvent) {}

    #[test]
    fn test_request_defaults() {
        let request = SubscriptionRequest::new("orders", noop);
        let descriptor = request.filter_descriptor("public").unwrap();

        assert_eq!(descriptor.schema, "public");
        assert_eq!(descriptor.table, "orders");
        assert_eq!(descriptor.event, EventKind::Any);
        assert!(descriptor.filter.is_none());
        assert!(request.channel_id().is_none());
    }

    #[test]
    fn test_request_builder() {
        let request = SubscriptionRequest::new("bids", noop)
            .with_namespace("market")
            .with_event(EventKind::Insert)
            .with_predicate("request_id=eq.42")
            .with_channel_id("bids-for-42");

        let descriptor = request.filter_descriptor("public").unwrap();
        assert_eq!(descriptor.schema, "market");
        assert_eq!(descriptor.event, EventKind::Insert);
        assert_eq!(descriptor.filter.unwrap().to_string(), "request_id=eq.42");
        assert_eq!(request.channel_id(), Some("bids-for-42"));
    }

    #[test]
    fn test_request_validation() {
        let cases = [
            SubscriptionRequest::new("", noop),
            SubscriptionRequest::new("   ", noop),
            SubscriptionRequest::new("orders", noop).with_namespace(""),
            SubscriptionRequest::new("orders", noop).with_channel_id(""),
            SubscriptionRequest::new("orders", noop).with_predicate("status"),
        ];

        for request in cases {
            assert!(
                matches!(request.filter_descriptor("public"), Err(Error::InvalidRequest(_))),
                "expected {request:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_key_tracks_filter_parameters() {
        let a = SubscriptionRequest::new("orders", noop);
        let b = SubscriptionRequest::new("orders", |_: ChangeEvent| {});
        let c = SubscriptionRequest::new("orders", noop).with_event(EventKind::Delete);

        assert_eq!(a.key("public").unwrap(), b.key("public").unwrap());
        assert_ne!(a.key("public").unwrap(), c.key("public").unwrap());
    }

    #[test]
    fn test_key_compares_resolved_filter() {
        let implicit = SubscriptionRequest::new("orders", noop).with_predicate("status=active");
        let explicit = SubscriptionRequest::new("orders", noop)
            .with_namespace("public")
            .with_predicate("status=eq.active");
        let other_schema = SubscriptionRequest::new("orders", noop).with_namespace("billing");

        let key = implicit.key("public").unwrap();
        assert_eq!(key, explicit.key("public").unwrap());
        assert_eq!(key.filter.schema, "public");
        assert_ne!(implicit.key("billing").unwrap(), key);
        assert_eq!(
            other_schema.key("billing").unwrap(),
            SubscriptionRequest::new("orders", noop).key("billing").unwrap()
        );
        assert!(matches!(
            SubscriptionRequest::new("orders", noop)
                .with_predicate("broken")
                .key("public"),
            Err(Error::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_cell_transitions() {
        let cell = SubscriptionCell::new(1, "orders-abc".to_string());
        assert_eq!(cell.state(), SubscriptionState::Opening);

        assert!(cell.mark_active());
        assert!(!cell.mark_active());
        assert_eq!(cell.state(), SubscriptionState::Active);

        assert!(cell.mark_closed());
        assert!(!cell.mark_closed());
        assert!(!cell.mark_active());
        assert!(cell.is_closed());
    }

    #[test]
    fn test_generated_channel_id_shape() {
        let id = generate_channel_id("orders", 10);
        let token = id.strip_prefix("orders-").unwrap();

        assert_eq!(token.len(), 10);
        assert!(token
            .bytes()
            .all(|b| b.is_ascii_digit() || b.is_ascii_lowercase()));
    }

    #[test]
    fn test_generated_channel_ids_do_not_collide() {
        let ids: HashSet<String> = (0..10_000)
            .map(|_| generate_channel_id("orders", crate::config::DEFAULT_CHANNEL_TOKEN_LEN))
            .collect();
        assert_eq!(ids.len(), 10_000);
    }
}
