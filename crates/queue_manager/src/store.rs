//! DispatchStore - the persistence contract behind the Queue Manager.

use chrono::{DateTime, Utc};
use contracts::{Dispatch, ProcessorId};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::QueueError;

/// A persisted dispatch and the time it was queued
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedDispatch {
    pub dispatch: Dispatch,
    pub inserted_at: DateTime<Utc>,
}

/// Per-destination FIFO storage.
///
/// Calls are made from the single processing context, so implementations
/// only need `Send`. Every method works on one destination at a time except
/// [`DispatchStore::destinations`] and [`DispatchStore::purge_expired`].
pub trait DispatchStore: Send {
    /// Insert `dispatch` for `destination`. Returns `false` if the id was
    /// already queued there.
    fn insert(
        &mut self,
        destination: &ProcessorId,
        dispatch: &Dispatch,
        inserted_at: DateTime<Utc>,
    ) -> Result<bool, QueueError>;

    /// Oldest-first entries inserted at or after `not_before`, skipping `excluding`
    fn query(
        &self,
        destination: &str,
        limit: Option<usize>,
        excluding: &HashSet<String>,
        not_before: DateTime<Utc>,
    ) -> Result<Vec<QueuedDispatch>, QueueError>;

    /// Remove `ids`; returns the ids that were present
    fn delete(&mut self, destination: &str, ids: &[String]) -> Result<Vec<String>, QueueError>;

    /// Remove every entry; returns the removed ids
    fn delete_all(&mut self, destination: &str) -> Result<Vec<String>, QueueError>;

    /// Number of persisted entries
    fn count(&self, destination: &str) -> Result<usize, QueueError>;

    /// Destinations with at least one entry
    fn destinations(&self) -> Result<Vec<ProcessorId>, QueueError>;

    /// Drop the oldest entries until at most `max_size` remain; returns the evicted ids
    fn evict(&mut self, destination: &str, max_size: usize) -> Result<Vec<String>, QueueError>;

    /// Drop entries inserted before `not_before`, across all destinations
    fn purge_expired(
        &mut self,
        not_before: DateTime<Utc>,
    ) -> Result<Vec<(ProcessorId, String)>, QueueError>;
}

#[derive(Debug, Default)]
struct DestinationQueue {
    entries: VecDeque<QueuedDispatch>,
    ids: HashSet<String>,
}

impl DestinationQueue {
    fn remove_where(&mut self, mut predicate: impl FnMut(&QueuedDispatch) -> bool) -> Vec<String> {
        let mut removed = Vec::new();
        self.entries.retain(|entry| {
            if predicate(entry) {
                removed.push(entry.dispatch.id.clone());
                false
            } else {
                true
            }
        });
        for id in &removed {
            self.ids.remove(id);
        }
        removed
    }
}

/// Reference store kept in memory
#[derive(Debug, Default)]
pub struct InMemoryDispatchStore {
    queues: HashMap<ProcessorId, DestinationQueue>,
}

impl InMemoryDispatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue_mut(&mut self, destination: &str) -> Option<&mut DestinationQueue> {
        self.queues.get_mut(destination)
    }
}

impl DispatchStore for InMemoryDispatchStore {
    fn insert(
        &mut self,
        destination: &ProcessorId,
        dispatch: &Dispatch,
        inserted_at: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let queue = self.queues.entry(destination.clone()).or_default();
        if !queue.ids.insert(dispatch.id.clone()) {
            return Ok(false);
        }
        queue.entries.push_back(QueuedDispatch {
            dispatch: dispatch.clone(),
            inserted_at,
        });
        Ok(true)
    }

    fn query(
        &self,
        destination: &str,
        limit: Option<usize>,
        excluding: &HashSet<String>,
        not_before: DateTime<Utc>,
    ) -> Result<Vec<QueuedDispatch>, QueueError> {
        let Some(queue) = self.queues.get(destination) else {
            return Ok(Vec::new());
        };
        Ok(queue
            .entries
            .iter()
            .filter(|entry| entry.inserted_at >= not_before)
            .filter(|entry| !excluding.contains(&entry.dispatch.id))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn delete(&mut self, destination: &str, ids: &[String]) -> Result<Vec<String>, QueueError> {
        let Some(queue) = self.queue_mut(destination) else {
            return Ok(Vec::new());
        };
        let targets: HashSet<&str> = ids.iter().map(String::as_str).collect();
        Ok(queue.remove_where(|entry| targets.contains(entry.dispatch.id.as_str())))
    }

    fn delete_all(&mut self, destination: &str) -> Result<Vec<String>, QueueError> {
        Ok(self
            .queues
            .remove(destination)
            .map(|queue| {
                queue
                    .entries
                    .into_iter()
                    .map(|entry| entry.dispatch.id)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn count(&self, destination: &str) -> Result<usize, QueueError> {
        Ok(self
            .queues
            .get(destination)
            .map_or(0, |queue| queue.entries.len()))
    }

    fn destinations(&self) -> Result<Vec<ProcessorId>, QueueError> {
        Ok(self
            .queues
            .iter()
            .filter(|(_, queue)| !queue.entries.is_empty())
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn evict(&mut self, destination: &str, max_size: usize) -> Result<Vec<String>, QueueError> {
        let Some(queue) = self.queue_mut(destination) else {
            return Ok(Vec::new());
        };
        let excess = queue.entries.len().saturating_sub(max_size);
        let mut evicted = Vec::with_capacity(excess);
        for entry in queue.entries.drain(..excess) {
            queue.ids.remove(&entry.dispatch.id);
            evicted.push(entry.dispatch.id);
        }
        Ok(evicted)
    }

    fn purge_expired(
        &mut self,
        not_before: DateTime<Utc>,
    ) -> Result<Vec<(ProcessorId, String)>, QueueError> {
        let mut purged = Vec::new();
        for (destination, queue) in &mut self.queues {
            for id in queue.remove_where(|entry| entry.inserted_at < not_before) {
                purged.push((destination.clone(), id));
            }
        }
        Ok(purged)
    }
}
