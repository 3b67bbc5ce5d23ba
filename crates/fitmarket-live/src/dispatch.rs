//! Routing of feed callbacks to subscription handlers.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use fitmarket_proto::ChangeEvent;

use crate::client::ChannelStatus;
use crate::error::Error;
use crate::subscription::{ChangeHandler, SubscriptionCell};

/// Delivers events and status changes for one subscription.
pub(crate) struct Dispatcher {
    cell: Arc<SubscriptionCell>,
    handler: Arc<dyn ChangeHandler>,
    isolate_faults: bool,
}

impl Dispatcher {
    pub(crate) fn new(
        cell: Arc<SubscriptionCell>,
        handler: Arc<dyn ChangeHandler>,
        isolate_faults: bool,
    ) -> Self {
        Self {
            cell,
            handler,
            isolate_faults,
        }
    }

    /// Hand one event to the handler.
    ///
    /// Events arriving after close are dropped.
    pub(crate) fn deliver(&self, event: ChangeEvent) {
        if self.cell.is_closed() {
            trace!(
                channel_id = %self.cell.channel_id,
                "dropping event for closed subscription"
            );
            return;
        }

        trace!(
            channel_id = %self.cell.channel_id,
            table = %event.table,
            change_type = %event.change_type,
            "dispatching change event"
        );

        let handler = &self.handler;
        match self.guarded(|| handler.on_change(event)) {
            Ok(()) => self.cell.record_event(),
            Err(fault) => {
                self.cell.record_fault();
                warn!(error = %fault, "handler fault isolated");
            }
        }
    }

    /// React to a channel status report from the feed.
    pub(crate) fn on_status(&self, status: ChannelStatus) {
        match status {
            ChannelStatus::Subscribed => {
                if self.cell.mark_active() {
                    debug!(channel_id = %self.cell.channel_id, "subscription active");
                }
            }
            ChannelStatus::ChannelError(reason) => self.connection_failed(reason),
            ChannelStatus::TimedOut => self.connection_failed("subscribe timed out".to_string()),
            ChannelStatus::Closed => {
                trace!(channel_id = %self.cell.channel_id, "channel closed by feed");
            }
        }
    }

    fn connection_failed(&self, reason: String) {
        if self.cell.is_closed() {
            return;
        }

        let error = Error::Connection {
            channel_id: self.cell.channel_id.clone(),
            reason,
        };
        warn!(error = %error, "channel failed, not retrying");

        let handler = &self.handler;
        if let Err(fault) = self.guarded(|| handler.on_error(&error)) {
            self.cell.record_fault();
            warn!(error = %fault, "handler fault isolated");
        }
    }

    /// Run a handler callback, catching panics when isolation is enabled.
    fn guarded<F: FnOnce()>(&self, f: F) -> Result<(), Error> {
        if !self.isolate_faults {
            f();
            return Ok(());
        }

        panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| Error::HandlerFault {
            channel_id: self.cell.channel_id.clone(),
            message: panic_message(payload.as_ref()),
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::SubscriptionState;
    use fitmarket_proto::{record, Record};
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<ChangeEvent>>,
        errors: Mutex<Vec<String>>,
    }

    impl ChangeHandler for Recorder {
        fn on_change(&self, event: ChangeEvent) {
            if event.new.get("explode").is_some() {
                panic!("bad row");
            }
            self.events.lock().push(event);
        }

        fn on_error(&self, error: &Error) {
            self.errors.lock().push(error.to_string());
        }
    }

    fn setup(isolate: bool) -> (Arc<SubscriptionCell>, Arc<Recorder>, Dispatcher) {
        let cell = Arc::new(SubscriptionCell::new(1, "orders-test".to_string()));
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(cell.clone(), recorder.clone(), isolate);
        (cell, recorder, dispatcher)
    }

    fn insert(id: i64) -> ChangeEvent {
        ChangeEvent::insert("orders", record(json!({ "id": id })))
    }

    #[test]
    fn test_subscribed_activates() {
        let (cell, _, dispatcher) = setup(true);
        dispatcher.on_status(ChannelStatus::Subscribed);
        assert_eq!(cell.state(), SubscriptionState::Active);
    }

    #[test]
    fn test_events_counted_and_forwarded() {
        let (cell, recorder, dispatcher) = setup(true);
        dispatcher.deliver(insert(1));
        dispatcher.deliver(insert(2));

        assert_eq!(recorder.events.lock().len(), 2);
        assert_eq!(cell.events_delivered(), 2);
    }

    #[test]
    fn test_panicking_handler_is_isolated() {
        let (cell, recorder, dispatcher) = setup(true);
        let mut bad = Record::new();
        bad.insert("explode".into(), json!(true));

        dispatcher.deliver(insert(1));
        dispatcher.deliver(ChangeEvent::insert("orders", bad));
        dispatcher.deliver(insert(3));

        let ids: Vec<i64> = recorder
            .events
            .lock()
            .iter()
            .map(|e| e.new["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(cell.handler_faults(), 1);
    }

    #[test]
    fn test_panic_propagates_without_isolation() {
        let (cell, recorder, dispatcher) = setup(false);
        let mut bad = Record::new();
        bad.insert("explode".into(), json!(true));

        dispatcher.deliver(insert(1));
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            dispatcher.deliver(ChangeEvent::insert("orders", bad))
        }));

        assert!(result.is_err());
        assert_eq!(cell.handler_faults(), 0);
        assert_eq!(cell.events_delivered(), 1);
        assert_eq!(recorder.events.lock().len(), 1);
    }

    #[test]
    fn test_connection_error_reaches_handler() {
        let (cell, recorder, dispatcher) = setup(true);
        dispatcher.on_status(ChannelStatus::ChannelError("refused".to_string()));
        dispatcher.on_status(ChannelStatus::TimedOut);

        let errors = recorder.errors.lock();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("refused"));
        assert!(errors[1].contains("timed out"));
        assert_eq!(cell.state(), SubscriptionState::Opening);
    }

    #[test]
    fn test_closed_subscription_drops_events_and_errors() {
        let (cell, recorder, dispatcher) = setup(true);
        cell.mark_closed();

        dispatcher.deliver(insert(1));
        dispatcher.on_status(ChannelStatus::ChannelError("late".to_string()));
        dispatcher.on_status(ChannelStatus::Subscribed);

        assert!(recorder.events.lock().is_empty());
        assert!(recorder.errors.lock().is_empty());
        assert_eq!(cell.state(), SubscriptionState::Closed);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned boom"));
        assert_eq!(panic_message(payload.as_ref()), "owned boom");

        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
