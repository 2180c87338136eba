//! Fakes shared by dispatch tests.

use crate::channels::ChannelHandle;
use crate::conversation::ConversationStore;
use crate::dispatch::QueueEntry;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Channel that records what was sent and can be told to fail.
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<(String, String)>>,
    pub presence_calls: AtomicUsize,
    pub fail_presence: bool,
    /// Fail every send once this many chunks went out.
    pub fail_after: Option<usize>,
}

impl RecordingChannel {
    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }
}

#[async_trait]
impl ChannelHandle for RecordingChannel {
    fn id(&self) -> &str {
        "test"
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), String> {
        let mut sent = self.sent.lock().unwrap();
        if self.fail_after.is_some_and(|n| sent.len() >= n) {
            return Err("channel down".to_string());
        }
        sent.push((conversation_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn signal_presence(
        &self,
        _conversation_id: &str,
        _message_id: Option<&str>,
    ) -> Result<(), String> {
        self.presence_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_presence {
            Err("presence unavailable".to_string())
        } else {
            Ok(())
        }
    }
}

/// Entry on a throwaway channel and conversation store.
pub fn entry(participant: &str, text: &str) -> QueueEntry {
    entry_on(Arc::new(RecordingChannel::default()), participant, text)
}

pub fn entry_on(channel: Arc<RecordingChannel>, participant: &str, text: &str) -> QueueEntry {
    let store = Arc::new(ConversationStore::new());
    QueueEntry::new(participant, text, channel, store.handle(participant))
}
