//! Printing dispatched events.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{error, warn};

use fitmarket_live::proto::ChangeEvent;
use fitmarket_live::{ChangeHandler, Error};

/// Writes each event it receives as one JSON line.
pub struct EventPrinter<W> {
    out: Mutex<W>,
    printed: AtomicU64,
    connection_errors: AtomicU64,
}

impl<W: Write + Send> EventPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            printed: AtomicU64::new(0),
            connection_errors: AtomicU64::new(0),
        }
    }

    /// Number of events written.
    pub fn printed(&self) -> u64 {
        self.printed.load(Ordering::Relaxed)
    }

    /// Number of connection errors reported.
    pub fn connection_errors(&self) -> u64 {
        self.connection_errors.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> ChangeHandler for EventPrinter<W> {
    fn on_change(&self, event: ChangeEvent) {
        let mut out = self.out.lock();
        let written = serde_json::to_writer(&mut *out, &event)
            .map_err(std::io::Error::from)
            .and_then(|()| writeln!(out));

        match written {
            Ok(()) => {
                self.printed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(error = %e, table = %event.table, "failed to write event"),
        }
    }

    fn on_error(&self, error: &Error) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
        error!(error = %error, "subscription failed");
    }
}
