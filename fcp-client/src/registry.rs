//! Identifier → record map. Owned exclusively by the engine thread; all
//! structural mutation happens there.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::request::Request;

#[derive(Default)]
pub(crate) struct Registry {
    entries: HashMap<String, Arc<Request>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    /// Idempotent: the first writer wins, so a retry re-enqueuing the same
    /// identifier is a no-op. Returns false when the entry already existed.
    pub fn register(&mut self, record: Arc<Request>) -> bool {
        match self.entries.entry(record.identifier().to_string()) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    pub fn lookup(&self, identifier: &str) -> Option<Arc<Request>> {
        self.entries.get(identifier).cloned()
    }

    pub fn remove(&mut self, identifier: &str) -> Option<Arc<Request>> {
        self.entries.remove(identifier)
    }

    /// Remove and return records whose deadline has passed without a
    /// terminal response, for timeout synthesis.
    pub fn drain_expired(&mut self, now: Instant) -> Vec<Arc<Request>> {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, record)| {
                record.deadline().is_some_and(|d| d <= now) && !record.is_terminal()
            })
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .collect()
    }

    /// Remove everything; used when the engine drains.
    pub fn drain_all(&mut self) -> Vec<Arc<Request>> {
        self.entries.drain().map(|(_, record)| record).collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
