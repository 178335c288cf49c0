//! Bounded, newest-first display feeds (recent burns, recent payouts).
//! Decoupled from the settlement transaction boundary: a lost feed entry
//! never affects round correctness.

use std::collections::VecDeque;
use tokio::sync::RwLock;

pub struct Feed<T> {
    entries: RwLock<VecDeque<T>>,
    cap: usize,
}

impl<T: Clone> Feed<T> {
    /// `initial` must be newest first, as loaded from the store.
    pub fn new(cap: usize, initial: Vec<T>) -> Self {
        let mut entries: VecDeque<T> = initial.into_iter().collect();
        entries.truncate(cap);
        Self {
            entries: RwLock::new(entries),
            cap,
        }
    }

    pub async fn append(&self, item: T) {
        let mut entries = self.entries.write().await;
        entries.push_front(item);
        entries.truncate(self.cap);
    }

    pub async fn recent(&self, limit: usize) -> Vec<T> {
        let entries = self.entries.read().await;
        entries.iter().take(limit.min(self.cap)).cloned().collect()
    }
}
