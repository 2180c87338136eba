//! Registry of per-participant dispatch state.
//!
//! All reads and writes go through one mutex; it is held only for queue bookkeeping and never
//! across a processing step, so unrelated participants are not serialized by it.

use crate::conversation::ParticipantId;
use crate::dispatch::QueueEntry;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

/// Queue and ownership flag for one participant.
#[derive(Default)]
struct DispatchState {
    queue: VecDeque<QueueEntry>,
    /// Set when a drain task owns the participant; cleared only by removing the state.
    busy: bool,
}

/// Point-in-time view of a participant's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    pub queued: usize,
    pub busy: bool,
}

/// Participant id → dispatch state. Create one per dispatcher; registries are independent.
#[derive(Default)]
pub struct DispatchRegistry {
    inner: Mutex<HashMap<ParticipantId, DispatchState>>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `entry` to its participant's queue, creating the state if absent.
    /// Returns true when the participant was idle: the caller now owns it and must start a drain.
    pub async fn push(&self, entry: QueueEntry) -> bool {
        let mut g = self.inner.lock().await;
        let state = g.entry(entry.participant.clone()).or_default();
        state.queue.push_back(entry);
        if state.busy {
            false
        } else {
            state.busy = true;
            true
        }
    }

    /// Take the next entry for a draining participant. When the queue is empty the state is
    /// removed in the same critical section, so a concurrent `push` either lands before
    /// (and is returned here) or after (and creates fresh state with a new drain).
    /// Returns None as well when the state was already removed by [`terminate`](Self::terminate).
    pub async fn next(&self, participant: &str) -> Option<QueueEntry> {
        let mut g = self.inner.lock().await;
        let state = g.get_mut(participant)?;
        match state.queue.pop_front() {
            Some(entry) => Some(entry),
            None => {
                g.remove(participant);
                None
            }
        }
    }

    /// Remove the participant's state outright; returns how many queued entries were dropped.
    pub async fn terminate(&self, participant: &str) -> usize {
        let mut g = self.inner.lock().await;
        g.remove(participant).map(|s| s.queue.len()).unwrap_or(0)
    }

    pub async fn snapshot(&self, participant: &str) -> Option<StateSnapshot> {
        let g = self.inner.lock().await;
        g.get(participant).map(|s| StateSnapshot {
            queued: s.queue.len(),
            busy: s.busy,
        })
    }

    /// Number of participants with live state.
    pub async fn active(&self) -> usize {
        self.inner.lock().await.len()
    }
}
