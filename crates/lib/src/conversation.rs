//! Per-participant conversation state for the assistant.
//!
//! Each participant is bound to one assistant thread; the thread id is created lazily on
//! the first message and reused afterwards. State is kept in memory only.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Participant identifier (WhatsApp `wa_id`, i.e. the sender's phone number).
pub type ParticipantId = String;

/// State kept for one participant.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    pub thread_id: Option<String>,
}

/// In-memory store of conversations keyed by participant.
pub struct ConversationStore {
    inner: Arc<RwLock<HashMap<ParticipantId, Conversation>>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Handle scoped to one participant; cheap to clone and safe to move into a queue entry.
    pub fn handle(self: &Arc<Self>, participant: impl Into<ParticipantId>) -> ConversationHandle {
        ConversationHandle {
            store: Arc::clone(self),
            participant: participant.into(),
        }
    }

    /// Return a clone of the conversation if it exists.
    pub async fn get(&self, participant: &str) -> Option<Conversation> {
        self.inner.read().await.get(participant).cloned()
    }

    pub async fn set_thread_id(&self, participant: &str, thread_id: impl Into<String>) {
        let mut g = self.inner.write().await;
        g.entry(participant.to_string()).or_default().thread_id = Some(thread_id.into());
    }

    /// Remove the conversation; returns true if it existed.
    pub async fn remove(&self, participant: &str) -> bool {
        self.inner.write().await.remove(participant).is_some()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

/// Read/write access to a single participant's conversation.
#[derive(Clone)]
pub struct ConversationHandle {
    store: Arc<ConversationStore>,
    participant: ParticipantId,
}

impl ConversationHandle {
    pub fn participant(&self) -> &str {
        &self.participant
    }

    pub async fn thread_id(&self) -> Option<String> {
        self.store
            .get(&self.participant)
            .await
            .and_then(|c| c.thread_id)
    }

    pub async fn set_thread_id(&self, thread_id: impl Into<String>) {
        self.store.set_thread_id(&self.participant, thread_id).await;
    }

    /// Forget the thread so the next message starts a new one.
    pub async fn clear(&self) {
        self.store.remove(&self.participant).await;
    }
}

impl std::fmt::Debug for ConversationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationHandle")
            .field("participant", &self.participant)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handles_share_the_store() {
        let store = Arc::new(ConversationStore::new());
        let a = store.handle("5215550001");
        let b = store.handle("5215550002");
        assert_eq!(a.thread_id().await, None);

        a.set_thread_id("thread_a").await;
        assert_eq!(a.thread_id().await.as_deref(), Some("thread_a"));
        assert_eq!(b.thread_id().await, None);
        assert_eq!(store.handle("5215550001").thread_id().await.as_deref(), Some("thread_a"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn clear_forgets_thread() {
        let store = Arc::new(ConversationStore::new());
        let h = store.handle("p");
        h.set_thread_id("t1").await;
        h.clear().await;
        assert_eq!(h.thread_id().await, None);
        assert_eq!(store.len().await, 0);
    }
}
