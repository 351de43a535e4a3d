//! Event feeds for observing store and job state.
//!
//! An [`EventFeed`] fans events out to any number of subscribers over
//! `std::sync::mpsc` channels. A feed may keep a bounded history that is
//! replayed to late subscribers, so a listener that subscribes after a job
//! has finished still sees every status transition in order.
//!
//! ```rust
//! use mapvault_core::EventFeed;
//!
//! let feed = EventFeed::with_history(16);
//! feed.emit("queued");
//! feed.emit("running");
//!
//! let late = feed.subscribe();
//! feed.emit("succeeded");
//! let seen: Vec<_> = late.try_iter().collect();
//! assert_eq!(seen, vec!["queued", "running", "succeeded"]);
//! ```

use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};

/// Events emitted by a [`crate::LocalStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A transaction started or ended.
    TransactionStatusChanged {
        /// Whether a transaction is now active.
        in_transaction: bool,
    },
    /// A synchronization was applied.
    Synced {
        /// Server generation the dataset is now current with.
        server_generation: u64,
        /// Remote changes applied.
        applied: usize,
    },
}

struct FeedState<T> {
    subscribers: Vec<Sender<T>>,
    history: Vec<T>,
}

/// Distributes events to subscribers in emission order.
pub struct EventFeed<T> {
    state: Mutex<FeedState<T>>,
    max_history: usize,
}

impl<T: Clone> EventFeed<T> {
    /// Creates a feed that keeps no history.
    #[must_use]
    pub fn new() -> Self {
        Self::with_history(0)
    }

    /// Creates a feed that replays up to `max_history` past events to new
    /// subscribers.
    #[must_use]
    pub fn with_history(max_history: usize) -> Self {
        Self {
            state: Mutex::new(FeedState {
                subscribers: Vec::new(),
                history: Vec::new(),
            }),
            max_history,
        }
    }

    /// Subscribes to the feed.
    ///
    /// The receiver first yields the retained history, then every event
    /// emitted afterwards.
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = mpsc::channel();
        let mut state = self.state.lock();
        for event in &state.history {
            // Receiver is alive: we hold it.
            let _ = tx.send(event.clone());
        }
        state.subscribers.push(tx);
        rx
    }

    /// Emits an event to all live subscribers.
    pub fn emit(&self, event: T) {
        let mut state = self.state.lock();
        if self.max_history > 0 {
            state.history.push(event.clone());
            if state.history.len() > self.max_history {
                let excess = state.history.len() - self.max_history;
                state.history.drain(..excess);
            }
        }
        state.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the retained history.
    #[must_use]
    pub fn history(&self) -> Vec<T> {
        self.state.lock().history.clone()
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }
}

impl<T: Clone> Default for EventFeed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for EventFeed<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventFeed")
            .field("max_history", &self.max_history)
            .finish_non_exhaustive()
    }
}
