//! A change feed that lives in the current process.
//!
//! Publishing queues deliveries; [`InMemoryChangeFeed::flush`] hands them to
//! the channel sinks in FIFO order, the way a remote feed's callbacks would
//! arrive on one event loop.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use fitmarket_proto::{ChangeEvent, FilterDescriptor};

use crate::client::{ChangeFeedClient, ChannelStatus, EventSink, FeedChannel, StatusSink};

const UNREACHABLE_REASON: &str = "change feed unreachable";

struct Binding {
    filter: FilterDescriptor,
    sink: EventSink,
}

struct ChannelSlot {
    topic: String,
    bindings: Vec<Binding>,
    status: Option<StatusSink>,
    subscribed: bool,
}

enum Delivery {
    Status {
        channel: u64,
        status: ChannelStatus,
    },
    Event {
        channel: u64,
        binding: usize,
        event: ChangeEvent,
    },
}

enum Ready {
    Status(StatusSink, ChannelStatus),
    Event(EventSink, ChangeEvent),
}

struct FeedState {
    /// Channels keyed by internal channel ID.
    channels: HashMap<u64, ChannelSlot>,
    /// Index of channels by (namespace, collection).
    index: HashMap<(String, String), Vec<u64>>,
    /// Deliveries waiting for the next flush.
    queue: VecDeque<Delivery>,
    reachable: bool,
}

impl FeedState {
    fn new() -> Self {
        Self {
            channels: HashMap::new(),
            index: HashMap::new(),
            queue: VecDeque::new(),
            reachable: true,
        }
    }

    /// Look up the sink for a queued delivery. Deliveries for removed
    /// channels resolve to `None`.
    fn resolve(&self, delivery: Delivery) -> Option<Ready> {
        match delivery {
            Delivery::Status { channel, status } => {
                let slot = self.channels.get(&channel)?;
                let sink = slot.status.clone()?;
                Some(Ready::Status(sink, status))
            }
            Delivery::Event {
                channel,
                binding,
                event,
            } => {
                let slot = self.channels.get(&channel)?;
                let sink = slot.bindings.get(binding)?.sink.clone();
                Some(Ready::Event(sink, event))
            }
        }
    }

    fn remove_channel(&mut self, id: u64) -> Option<ChannelSlot> {
        let slot = self.channels.remove(&id)?;

        for binding in &slot.bindings {
            let key = (binding.filter.schema.clone(), binding.filter.table.clone());
            if let Some(ids) = self.index.get_mut(&key) {
                ids.retain(|&channel| channel != id);
                if ids.is_empty() {
                    self.index.remove(&key);
                }
            }
        }

        Some(slot)
    }
}

struct FeedShared {
    state: Mutex<FeedState>,
    next_channel_id: AtomicU64,
}

/// An in-process change feed.
///
/// Cloning is cheap; clones share the same channels and queue. Channels are
/// keyed by an internal ID, so two channels opened under the same name stay
/// independent.
#[derive(Clone)]
pub struct InMemoryChangeFeed {
    shared: Arc<FeedShared>,
}

impl InMemoryChangeFeed {
    /// Create an empty, reachable feed.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(FeedShared {
                state: Mutex::new(FeedState::new()),
                next_channel_id: AtomicU64::new(1),
            }),
        }
    }

    /// Queue an event for every subscribed binding whose filter matches.
    ///
    /// Returns the number of deliveries queued.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let mut state = self.shared.state.lock();

        let key = (event.schema.clone(), event.table.clone());
        let Some(ids) = state.index.get(&key) else {
            trace!(table = %event.table, "no channels for collection");
            return 0;
        };

        let mut deliveries = Vec::new();
        for &channel in ids {
            let Some(slot) = state.channels.get(&channel) else {
                continue;
            };
            if !slot.subscribed {
                continue;
            }
            for (binding, b) in slot.bindings.iter().enumerate() {
                if b.filter.matches(&event) {
                    deliveries.push(Delivery::Event {
                        channel,
                        binding,
                        event: event.clone(),
                    });
                }
            }
        }

        let queued = deliveries.len();
        state.queue.extend(deliveries);

        trace!(
            table = %event.table,
            change_type = %event.change_type,
            queued,
            "published change event"
        );
        queued
    }

    /// Deliver everything queued, in order. Returns the number delivered.
    ///
    /// Sinks run without the feed lock held, so handlers may publish, open
    /// or close channels. Anything they queue is delivered in the same flush.
    pub fn flush(&self) -> usize {
        let mut delivered = 0;

        loop {
            let ready = {
                let mut state = self.shared.state.lock();
                let Some(delivery) = state.queue.pop_front() else {
                    break;
                };
                state.resolve(delivery)
            };

            match ready {
                Some(Ready::Status(sink, status)) => {
                    sink(status);
                    delivered += 1;
                }
                Some(Ready::Event(sink, event)) => {
                    sink(event);
                    delivered += 1;
                }
                None => trace!("dropping delivery for removed channel"),
            }
        }

        delivered
    }

    /// Number of deliveries waiting for a flush.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Number of open channels.
    pub fn channel_count(&self) -> usize {
        self.shared.state.lock().channels.len()
    }

    /// Simulate losing (or regaining) the connection to the remote service.
    ///
    /// Only affects later subscribe calls.
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.state.lock().reachable = reachable;
        debug!(reachable, "change feed reachability changed");
    }

    /// Check if subscribe calls currently succeed.
    pub fn is_reachable(&self) -> bool {
        self.shared.state.lock().reachable
    }
}

impl Default for InMemoryChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryChangeFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("InMemoryChangeFeed")
            .field("channels", &state.channels.len())
            .field("pending", &state.queue.len())
            .field("reachable", &state.reachable)
            .finish()
    }
}

impl ChangeFeedClient for InMemoryChangeFeed {
    fn channel(&self, name: &str) -> Arc<dyn FeedChannel> {
        let id = self.shared.next_channel_id.fetch_add(1, Ordering::SeqCst);

        self.shared.state.lock().channels.insert(
            id,
            ChannelSlot {
                topic: name.to_string(),
                bindings: Vec::new(),
                status: None,
                subscribed: false,
            },
        );

        trace!(channel = id, topic = name, "channel created");

        Arc::new(MemoryChannel {
            id,
            topic: name.to_string(),
            feed: self.shared.clone(),
        })
    }
}

/// A channel on an [`InMemoryChangeFeed`].
pub struct MemoryChannel {
    id: u64,
    topic: String,
    feed: Arc<FeedShared>,
}

impl FeedChannel for MemoryChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn on(&self, filter: FilterDescriptor, sink: EventSink) {
        let mut state = self.feed.state.lock();
        let state = &mut *state;

        let Some(slot) = state.channels.get_mut(&self.id) else {
            trace!(topic = %self.topic, "ignoring binding on removed channel");
            return;
        };

        let ids = state
            .index
            .entry((filter.schema.clone(), filter.table.clone()))
            .or_default();
        if !ids.contains(&self.id) {
            ids.push(self.id);
        }

        slot.bindings.push(Binding { filter, sink });
    }

    fn subscribe(&self, on_status: StatusSink) {
        let mut state = self.feed.state.lock();
        let reachable = state.reachable;

        let Some(slot) = state.channels.get_mut(&self.id) else {
            return;
        };
        slot.status = Some(on_status);
        slot.subscribed = reachable;

        let status = if reachable {
            ChannelStatus::Subscribed
        } else {
            ChannelStatus::ChannelError(UNREACHABLE_REASON.to_string())
        };
        state.queue.push_back(Delivery::Status {
            channel: self.id,
            status,
        });
    }

    fn unsubscribe(&self) {
        let removed = self.feed.state.lock().remove_channel(self.id);

        if let Some(slot) = removed {
            trace!(channel = self.id, topic = %slot.topic, "channel removed");
            if let Some(sink) = slot.status {
                sink(ChannelStatus::Closed);
            }
        }
    }
}

impl fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}
