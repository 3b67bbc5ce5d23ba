//! Binding a subscription to the lifetime of a consuming unit.
//!
//! A consumer (a dashboard panel, a notification badge) calls
//! [`LiveQuery::bind`] every time it renders. The binding keeps the current
//! channel while the filter parameters are unchanged and swaps it for a new
//! one when any of them change. Dropping the binding closes the channel.

use crate::error::Error;
use crate::manager::LiveSubscriptions;
use crate::subscription::{ActiveSubscription, SubscriptionKey, SubscriptionRequest};

/// A subscription slot owned by one consuming unit.
#[derive(Debug)]
pub struct LiveQuery {
    manager: LiveSubscriptions,
    current: Option<(SubscriptionKey, ActiveSubscription)>,
}

impl LiveQuery {
    /// Create an unbound slot.
    pub fn new(manager: LiveSubscriptions) -> Self {
        Self {
            manager,
            current: None,
        }
    }

    /// Bind the slot to a request.
    ///
    /// If the request resolves to the same filter as the current
    /// subscription, the existing channel is kept and the request's handler
    /// is ignored. Otherwise the current subscription is closed and a new one
    /// is opened. If the request is invalid or opening fails the slot is left
    /// unbound.
    pub fn bind(&mut self, request: SubscriptionRequest) -> Result<&ActiveSubscription, Error> {
        let key = match request.key(&self.manager.config().default_namespace) {
            Ok(key) => key,
            Err(e) => {
                self.unbind();
                return Err(e);
            }
        };

        let unchanged = matches!(
            &self.current,
            Some((current, subscription)) if *current == key && !subscription.is_closed()
        );

        if !unchanged {
            if let Some((_, previous)) = self.current.take() {
                tracing::debug!(
                    channel_id = %previous.channel_id(),
                    "subscription parameters changed, rebinding"
                );
                previous.close();
            }

            let subscription = self.manager.open(request)?;
            self.current = Some((key, subscription));
        }

        match &self.current {
            Some((_, subscription)) => Ok(subscription),
            None => Err(Error::InvalidRequest("subscription slot is unbound".to_string())),
        }
    }

    /// Close the current subscription, if any.
    pub fn unbind(&mut self) {
        if let Some((_, subscription)) = self.current.take() {
            subscription.close();
        }
    }

    /// The current subscription.
    pub fn subscription(&self) -> Option<&ActiveSubscription> {
        self.current.as_ref().map(|(_, subscription)| subscription)
    }

    /// Check if the slot holds an open subscription.
    pub fn is_bound(&self) -> bool {
        self.subscription().is_some_and(|s| !s.is_closed())
    }
}

impl Drop for LiveQuery {
    fn drop(&mut self) {
        self.unbind();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::InMemoryChangeFeed;
    use crate::subscription::SubscriptionState;
    use fitmarket_proto::{ChangeEvent, EventKind};
    use std::sync::Arc;

    fn noop(_: ChangeEvent) {}

    fn setup() -> (InMemoryChangeFeed, LiveSubscriptions) {
        let feed = InMemoryChangeFeed::new();
        let live = LiveSubscriptions::new(Arc::new(feed.clone()));
        (feed, live)
    }

    #[test]
    fn test_rebind_same_parameters_keeps_channel() {
        let (feed, live) = setup();
        let mut query = LiveQuery::new(live.clone());

        let first = query
            .bind(SubscriptionRequest::new("orders", noop))
            .unwrap()
            .channel_id()
            .to_string();
        let second = query
            .bind(SubscriptionRequest::new("orders", noop))
            .unwrap()
            .channel_id()
            .to_string();

        assert_eq!(first, second);
        assert_eq!(live.subscription_count(), 1);
        assert_eq!(feed.channel_count(), 1);
    }

    #[test]
    fn test_rebind_changed_parameters_swaps_channel() {
        let (feed, live) = setup();
        let mut query = LiveQuery::new(live.clone());

        let first = query
            .bind(SubscriptionRequest::new("orders", noop))
            .unwrap()
            .channel_id()
            .to_string();
        let second = query
            .bind(SubscriptionRequest::new("orders", noop).with_event(EventKind::Delete))
            .unwrap()
            .channel_id()
            .to_string();

        assert_ne!(first, second);
        assert!(!live.is_open(&first));
        assert!(live.is_open(&second));
        assert_eq!(feed.channel_count(), 1);
    }

    #[test]
    fn test_equivalent_spellings_keep_channel() {
        let (feed, live) = setup();
        let mut query = LiveQuery::new(live.clone());

        let first = query
            .bind(SubscriptionRequest::new("orders", noop).with_predicate("status=active"))
            .unwrap()
            .channel_id()
            .to_string();
        let second = query
            .bind(
                SubscriptionRequest::new("orders", noop)
                    .with_namespace("public")
                    .with_predicate("status=eq.active"),
            )
            .unwrap()
            .channel_id()
            .to_string();

        assert_eq!(first, second);
        assert!(live.is_open(&first));
        assert_eq!(feed.channel_count(), 1);
    }

    #[test]
    fn test_failed_bind_leaves_slot_unbound() {
        let (_, live) = setup();
        let mut query = LiveQuery::new(live.clone());
        query.bind(SubscriptionRequest::new("orders", noop)).unwrap();

        let result = query.bind(SubscriptionRequest::new("", noop));

        assert!(matches!(result, Err(Error::InvalidRequest(_))));
        assert!(!query.is_bound());
        assert_eq!(live.subscription_count(), 0);
    }

    #[test]
    fn test_rebind_after_external_close_reopens() {
        let (_, live) = setup();
        let mut query = LiveQuery::new(live.clone());
        query.bind(SubscriptionRequest::new("orders", noop)).unwrap();

        live.close_all();
        let sub = query.bind(SubscriptionRequest::new("orders", noop)).unwrap();

        assert_eq!(sub.state(), SubscriptionState::Opening);
        assert_eq!(live.subscription_count(), 1);
    }

    #[test]
    fn test_drop_unbinds() {
        let (feed, live) = setup();
        {
            let mut query = LiveQuery::new(live.clone());
            query.bind(SubscriptionRequest::new("orders", noop)).unwrap();
            assert!(query.is_bound());
        }

        assert_eq!(live.subscription_count(), 0);
        assert_eq!(feed.channel_count(), 0);
    }
}
