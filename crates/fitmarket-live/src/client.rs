//! The change-feed surface consumed by live subscriptions.
//!
//! A change feed multiplexes many named channels over one connection. The
//! subscription layer only needs four operations: open a channel, bind a
//! filter and event sink to it, subscribe, and remove it again.

use std::fmt;
use std::sync::Arc;

use fitmarket_proto::{ChangeEvent, FilterDescriptor};

/// Callback receiving change events for one channel binding.
pub type EventSink = Arc<dyn Fn(ChangeEvent) + Send + Sync>;

/// Callback receiving channel status transitions.
pub type StatusSink = Arc<dyn Fn(ChannelStatus) + Send + Sync>;

/// Status reported by the change feed for a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    /// The remote side acknowledged the subscription.
    Subscribed,
    /// The channel could not be established or was dropped.
    ChannelError(String),
    /// The subscribe call was not acknowledged in time.
    TimedOut,
    /// The channel was removed.
    Closed,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelStatus::Subscribed => write!(f, "SUBSCRIBED"),
            ChannelStatus::ChannelError(reason) => write!(f, "CHANNEL_ERROR: {}", reason),
            ChannelStatus::TimedOut => write!(f, "TIMED_OUT"),
            ChannelStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

/// A named channel on the change feed.
pub trait FeedChannel: Send + Sync {
    /// The name the channel was opened under.
    fn topic(&self) -> &str;

    /// Attach a filter and the sink that receives matching events.
    fn on(&self, filter: FilterDescriptor, sink: EventSink);

    /// Ask the remote side to start delivering events.
    ///
    /// Returns immediately; the outcome arrives later through `on_status`.
    fn subscribe(&self, on_status: StatusSink);

    /// Stop delivery and release the channel's resources.
    fn unsubscribe(&self);
}

/// A connection to a remote change feed.
pub trait ChangeFeedClient: Send + Sync {
    /// Open a channel under the given name.
    fn channel(&self, name: &str) -> Arc<dyn FeedChannel>;

    /// Remove a channel from the connection.
    fn remove_channel(&self, channel: &Arc<dyn FeedChannel>) {
        channel.unsubscribe();
    }
}
