//! Per-participant serialized dispatch.
//!
//! Every participant gets a FIFO queue in a [`DispatchRegistry`]. The first message for an idle
//! participant starts a drain task that processes queued entries one at a time, in arrival
//! order; other participants drain concurrently in their own tasks. The registry entry is
//! removed once the queue is empty or the participant is handed off.

mod dispatcher;
mod registry;
mod reply;

use crate::assistant::ResponderError;
use crate::channels::{ChannelHandle, InboundMessage};
use crate::conversation::{ConversationHandle, ParticipantId};
use async_trait::async_trait;
use std::sync::Arc;

pub use dispatcher::Dispatcher;
pub use registry::{DispatchRegistry, StateSnapshot};
pub use reply::ReplyProcessor;

/// One inbound message plus the handles needed to answer it.
#[derive(Clone)]
pub struct QueueEntry {
    /// Local id used to correlate log lines.
    pub id: uuid::Uuid,
    pub participant: ParticipantId,
    /// Channel-side message id, if the channel provides one.
    pub message_id: Option<String>,
    pub text: String,
    pub channel: Arc<dyn ChannelHandle>,
    pub conversation: ConversationHandle,
}

impl QueueEntry {
    pub fn new(
        participant: impl Into<ParticipantId>,
        text: impl Into<String>,
        channel: Arc<dyn ChannelHandle>,
        conversation: ConversationHandle,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            participant: participant.into(),
            message_id: None,
            text: text.into(),
            channel,
            conversation,
        }
    }

    /// Build an entry from a channel message; the sender is the participant.
    pub fn from_inbound(
        msg: InboundMessage,
        channel: Arc<dyn ChannelHandle>,
        conversation: ConversationHandle,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            participant: msg.conversation_id,
            message_id: msg.message_id,
            text: msg.text,
            channel,
            conversation,
        }
    }
}

impl std::fmt::Debug for QueueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueEntry")
            .field("id", &self.id)
            .field("participant", &self.participant)
            .field("message_id", &self.message_id)
            .field("channel", &self.channel.id())
            .finish()
    }
}

/// How a processed entry ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The reply (possibly empty) was delivered.
    Replied,
    /// The participant was handed off; its queue must be torn down.
    HandedOff,
}

/// Non-fatal failure of a single entry. The drain logs it and moves on to the next entry.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Responder(#[from] ResponderError),
    #[error("delivery failed after {sent} chunk(s): {reason}")]
    Delivery { sent: usize, reason: String },
    #[error("processing step panicked: {0}")]
    Panicked(String),
}

/// Processing step run by a drain for each dequeued entry.
#[async_trait]
pub trait EntryProcessor: Send + Sync + 'static {
    async fn process(&self, entry: QueueEntry) -> Result<StepOutcome, ProcessError>;
}

#[cfg(test)]
pub(crate) mod test_support;
