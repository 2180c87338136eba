//! Decide what to do with an assistant reply: deliver it, or hand the participant off to a human.

/// Outcome of evaluating a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Deliver the reply to the participant.
    Continue,
    /// Suppress the reply, run the CRM handoff and stop serving the participant's queue.
    Handoff,
}

/// Handoff is signaled by a fixed phrase the assistant is instructed to emit.
#[derive(Debug, Clone)]
pub struct ResponsePolicy {
    handoff_phrase: String,
}

impl ResponsePolicy {
    pub fn new(handoff_phrase: impl Into<String>) -> Self {
        Self {
            handoff_phrase: handoff_phrase.into(),
        }
    }

    /// An empty phrase never matches.
    pub fn evaluate(&self, reply: &str) -> PolicyDecision {
        if !self.handoff_phrase.is_empty() && reply.contains(&self.handoff_phrase) {
            PolicyDecision::Handoff
        } else {
            PolicyDecision::Continue
        }
    }
}

impl Default for ResponsePolicy {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_HANDOFF_PHRASE)
    }
}
