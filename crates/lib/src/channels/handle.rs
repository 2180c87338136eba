//! Outbound side of a channel, as seen by the dispatcher.

use async_trait::async_trait;

/// Handle to a channel connector (send message, presence).
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    /// Channel id (e.g. "whatsapp").
    fn id(&self) -> &str;

    /// Send a text message to a conversation (e.g. a WhatsApp phone number).
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), String>;

    /// Show a transient "typing" state for the conversation. Best-effort; default is a no-op.
    async fn signal_presence(
        &self,
        _conversation_id: &str,
        _message_id: Option<&str>,
    ) -> Result<(), String> {
        Ok(())
    }
}
