//! Lifecycle coordinator - the single write authority for prediction state.
//!
//! Both the poll path and the webhook path feed their observations through
//! `apply_update`, which enforces the monotonic status ordering
//! queued < processing < {succeeded, failed}. Duplicate and out-of-order
//! notifications become no-ops; disagreeing terminal statuses are surfaced
//! as a conflict and never auto-resolved.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use tokio::sync::Notify;

use crate::prediction::PredictionRequest;

/// Outcome of merging one candidate update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeResult {
    /// The candidate carried a strictly later status (or was the first
    /// record for its id) and was stored.
    Applied,
    /// Same status as stored - a redelivery, no side effects.
    IgnoredDuplicate,
    /// Older status than stored - out-of-order delivery, discarded.
    IgnoredStale,
    /// Two disagreeing terminal statuses. The stored record is left at its
    /// last valid state pending manual resolution.
    Conflict,
}

impl MergeResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::IgnoredDuplicate => "ignored_duplicate",
            Self::IgnoredStale => "ignored_stale",
            Self::Conflict => "conflict",
        }
    }
}

/// Which path an update arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    Poll,
    Webhook { verified: bool },
}

impl UpdateSource {
    fn is_verified_webhook(&self) -> bool {
        matches!(self, Self::Webhook { verified: true })
    }
}

struct PredictionEntry {
    record: PredictionRequest,
    completion: Arc<Notify>,
}

/// Tracks one consistent `PredictionRequest` per id.
///
/// The DashMap entry guard holds the shard lock while a merge runs, so
/// updates for the same id are serialized; updates for different ids
/// proceed independently.
pub struct LifecycleCoordinator {
    predictions: DashMap<String, PredictionEntry>,
}

impl LifecycleCoordinator {
    pub fn new() -> Self {
        Self {
            predictions: DashMap::new(),
        }
    }

    /// Merge a candidate observation into the stored state for its id.
    pub fn apply_update(&self, candidate: PredictionRequest, source: UpdateSource) -> MergeResult {
        match self.predictions.entry(candidate.id.clone()) {
            MapEntry::Vacant(slot) => {
                let mut record = candidate;
                record.webhook_verified = source.is_verified_webhook();
                tracing::debug!(
                    id = %record.id,
                    status = record.status.as_str(),
                    "prediction registered"
                );
                let completion = Arc::new(Notify::new());
                if record.status.is_terminal() {
                    completion.notify_waiters();
                }
                slot.insert(PredictionEntry { record, completion });
                MergeResult::Applied
            }
            MapEntry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                let stored = entry.record.status;
                let incoming = candidate.status;

                if incoming.rank() < stored.rank() {
                    tracing::debug!(
                        id = %candidate.id,
                        stored = stored.as_str(),
                        incoming = incoming.as_str(),
                        "discarding stale update"
                    );
                    return MergeResult::IgnoredStale;
                }

                if incoming.rank() == stored.rank() {
                    if incoming != stored {
                        // Both terminal, disagreeing. Upstream inconsistency -
                        // keep the stored record and make noise.
                        tracing::error!(
                            id = %candidate.id,
                            stored = stored.as_str(),
                            incoming = incoming.as_str(),
                            "conflicting terminal statuses, keeping stored state"
                        );
                        return MergeResult::Conflict;
                    }
                    return MergeResult::IgnoredDuplicate;
                }

                entry.record.status = incoming;
                if !candidate.output.is_empty() {
                    entry.record.output = candidate.output;
                }
                entry.record.error = candidate.error;
                entry.record.updated_at = candidate.updated_at;
                entry.record.webhook_verified = source.is_verified_webhook();
                if !candidate.prompt.is_empty() && entry.record.prompt.is_empty() {
                    entry.record.prompt = candidate.prompt;
                }

                tracing::debug!(
                    id = %entry.record.id,
                    status = incoming.as_str(),
                    "prediction transitioned"
                );

                if incoming.is_terminal() {
                    entry.completion.notify_waiters();
                }
                MergeResult::Applied
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<PredictionRequest> {
        self.predictions.get(id).map(|e| e.record.clone())
    }

    pub fn exists(&self, id: &str) -> bool {
        self.predictions.contains_key(id)
    }

    /// Wait until the prediction reaches a terminal status. Returns
    /// immediately if it already has, or None if the id is unknown.
    pub async fn wait_terminal(&self, id: &str) -> Option<PredictionRequest> {
        loop {
            let completion = {
                let entry = self.predictions.get(id)?;
                if entry.record.status.is_terminal() {
                    return Some(entry.record.clone());
                }
                Arc::clone(&entry.completion)
            };
            // Re-check after subscribing: the transition may have landed
            // between dropping the guard and awaiting.
            tokio::select! {
                _ = completion.notified() => {}
                _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {}
            }
        }
    }

    /// Drop a record. Retention policy belongs to the caller.
    pub fn remove(&self, id: &str) {
        self.predictions.remove(id);
    }
}

impl Default for LifecycleCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
