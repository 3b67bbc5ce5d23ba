//! fitmarket protocol types for live change subscriptions.
//!
//! This crate defines the payloads exchanged with a remote change-feed
//! service, using serde for JSON serialization.
//!
//! # Modules
//!
//! - [`event`] - Change events and the event kinds a subscription can watch
//! - [`filter`] - Filter descriptors and the server-side predicate language
//! - [`error`] - Protocol error types
//!
//! # Serialization
//!
//! ```ignore
//! use fitmarket_proto::ChangeEvent;
//!
//! let line = r#"{"schema":"public","table":"orders","eventType":"INSERT","new":{"id":1}}"#;
//! let event = ChangeEvent::from_json(line)?;
//! assert_eq!(event.table, "orders");
//! ```

pub mod error;
pub mod event;
pub mod filter;

pub use error::Error;

// Re-export commonly used types at crate root
pub use event::{record, ChangeEvent, ChangeType, EventKind, Record};
pub use filter::{FilterDescriptor, Predicate, PredicateOp};

/// Namespace used when a subscription does not name one.
pub const DEFAULT_NAMESPACE: &str = "public";
