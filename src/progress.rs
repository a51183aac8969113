//! Channel-based progress stream.
//!
//! A build pushes zero-or-more human-readable status lines while it runs.
//! The stream is a plain mpsc channel rather than a callback so the consumer
//! can disconnect (drop the receiver) at any time without the producer
//! blocking or failing; sends into a closed channel are silently dropped.

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;

/// Sending half of a build's progress stream.
///
/// Cheap to clone; every supervised step holds one. An optional observer is
/// invoked on each send so the caller can piggyback slot-activity bookkeeping
/// onto progress events.
#[derive(Clone)]
pub struct ProgressSender {
    tx: mpsc::Sender<String>,
    observer: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl ProgressSender {
    /// Push one status line. Never blocks, never fails.
    pub fn send(&self, line: impl Into<String>) {
        if let Some(observer) = &self.observer {
            observer();
        }
        // Receiver may be gone; progress is purely informational.
        let _ = self.tx.send(line.into());
    }

    /// Attach an observer called on every send (e.g. a governor activity
    /// bump keyed to this build's slot).
    pub fn observed(self, f: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            tx: self.tx,
            observer: Some(Arc::new(f)),
        }
    }
}

impl std::fmt::Debug for ProgressSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSender")
            .field("observed", &self.observer.is_some())
            .finish()
    }
}

/// Create a connected progress stream.
pub fn channel() -> (ProgressSender, Receiver<String>) {
    let (tx, rx) = mpsc::channel();
    (
        ProgressSender { tx, observer: None },
        rx,
    )
}

/// A sender whose receiver is already gone, for callers that ignore progress.
pub fn sink() -> ProgressSender {
    let (tx, _rx) = channel();
    tx
}
