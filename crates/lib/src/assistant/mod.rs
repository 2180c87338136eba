//! Conversational responder: turns a participant message into a reply.
//!
//! The dispatcher only sees the [`Responder`] trait; [`OpenAiAssistant`] implements it against
//! the OpenAI Assistants API, keeping one thread per participant.

mod openai;

use crate::conversation::ConversationHandle;
use async_trait::async_trait;

pub use openai::{OpenAiAssistant, ResponderError};

/// Produces a reply for one participant message.
#[async_trait]
pub trait Responder: Send + Sync {
    /// Ask `assistant_id` to answer `text`, using and updating the participant's conversation state.
    async fn ask(
        &self,
        assistant_id: &str,
        text: &str,
        conversation: &ConversationHandle,
    ) -> Result<String, ResponderError>;
}
