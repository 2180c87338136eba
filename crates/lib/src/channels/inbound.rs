//! Inbound message from a channel: delivered to the dispatcher for per-participant handling.

/// A message from a channel to be answered by the assistant.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_id: String,
    /// Sender identity on the channel; used as the participant id.
    pub conversation_id: String,
    /// Channel-side message id, used for read receipts / typing indicators.
    pub message_id: Option<String>,
    pub text: String,
}
