//! Context window management: append-and-trim event logs per context key.

/// Summaries of context windows for LLM prompts
pub mod summarizer;

pub use summarizer::ContextSummarizer;

use chrono::{DateTime, Utc};

use crate::event::Event;
use crate::store::{ContextStore, StoreResult};

/// High-level interface over the context store.
///
/// Appends are serialized at the store; readers always see whole entries in
/// ascending timestamp order. Events arriving out of order land in their
/// timestamp position.
#[derive(Clone)]
pub struct ContextWindowManager {
    store: ContextStore,
}

impl ContextWindowManager {
    /// Wrap a context store.
    pub fn new(store: ContextStore) -> Self {
        Self { store }
    }

    /// Append an event to its context window.
    pub async fn append(&self, event: &Event, now: DateTime<Utc>) -> StoreResult<()> {
        self.store.add_event(event, now).await
    }

    /// Read a window in ascending timestamp order.
    pub async fn read(&self, context_key: &str, now: DateTime<Utc>) -> StoreResult<Vec<Event>> {
        self.store.events(context_key, now).await
    }

    /// Number of events currently in a window.
    pub async fn size(&self, context_key: &str, now: DateTime<Utc>) -> StoreResult<usize> {
        self.store.count(context_key, now).await
    }

    /// Drop a window entirely.
    pub async fn clear(&self, context_key: &str) -> StoreResult<()> {
        self.store.clear(context_key).await
    }
}
