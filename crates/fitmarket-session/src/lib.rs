//! FitMarket Session - Explicit session context for marketplace dashboards.
//!
//! The active role lives in a [`SessionContext`] created at startup and
//! passed to each consumer. Consumers watch it for changes instead of
//! reading ambient global state, and ending the session closes the live
//! subscriptions it owns.
//!
//! ```ignore
//! use std::sync::Arc;
//! use fitmarket_live::{InMemoryChangeFeed, LiveSubscriptions};
//! use fitmarket_session::{Role, SessionContext};
//!
//! let feed = InMemoryChangeFeed::new();
//! let live = LiveSubscriptions::new(Arc::new(feed));
//! let session = SessionContext::start(Role::Client).with_live(&live);
//!
//! let mut watcher = session.watch();
//! session.switch_role(Role::Trainer)?;
//! assert!(watcher.has_changed()?);
//! assert!(session.role().can_bid());
//! ```

pub mod context;
pub mod error;
pub mod role;

pub use context::{SessionContext, SessionState};
pub use error::Error;
pub use role::{Dashboard, Role};
