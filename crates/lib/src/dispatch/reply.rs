//! Processing step: ask the assistant, then either deliver the reply or hand the participant off.

use crate::assistant::Responder;
use crate::config::HandoffParams;
use crate::crm::SideEffectService;
use crate::dispatch::{EntryProcessor, ProcessError, QueueEntry, StepOutcome};
use crate::policy::{PolicyDecision, ResponsePolicy};
use crate::split::split_message;
use async_trait::async_trait;
use std::sync::Arc;

/// CRM workflow and its static parameters.
struct HandoffTarget {
    service: Arc<dyn SideEffectService>,
    params: HandoffParams,
}

/// Answers each entry with the configured assistant.
pub struct ReplyProcessor {
    assistant_id: String,
    responder: Arc<dyn Responder>,
    policy: ResponsePolicy,
    handoff: Option<HandoffTarget>,
}

impl ReplyProcessor {
    pub fn new(assistant_id: impl Into<String>, responder: Arc<dyn Responder>, policy: ResponsePolicy) -> Self {
        Self {
            assistant_id: assistant_id.into(),
            responder,
            policy,
            handoff: None,
        }
    }

    /// Run `service` with `params` when a reply signals handoff. Without it, a handoff only
    /// suppresses the reply and tears down the participant's queue.
    pub fn with_handoff(mut self, service: Arc<dyn SideEffectService>, params: HandoffParams) -> Self {
        self.handoff = Some(HandoffTarget { service, params });
        self
    }

    async fn run_handoff(&self, participant: &str) {
        let Some(target) = &self.handoff else {
            log::warn!("reply: handoff for {} requested but no CRM is configured", participant);
            return;
        };
        match target.service.process_handoff(participant, &target.params).await {
            Ok(true) => log::info!("reply: handoff for {} updated the CRM", participant),
            Ok(false) => log::info!("reply: handoff for {} found nothing to update", participant),
            Err(e) => log::warn!("reply: handoff for {} failed: {}", participant, e),
        }
    }
}

#[async_trait]
impl EntryProcessor for ReplyProcessor {
    async fn process(&self, entry: QueueEntry) -> Result<StepOutcome, ProcessError> {
        if let Err(e) = entry
            .channel
            .signal_presence(&entry.participant, entry.message_id.as_deref())
            .await
        {
            log::debug!("reply: presence for {} failed: {}", entry.participant, e);
        }

        let reply = self
            .responder
            .ask(&self.assistant_id, &entry.text, &entry.conversation)
            .await?;
        log::debug!("reply: assistant answered {} ({} bytes)", entry.participant, reply.len());

        match self.policy.evaluate(&reply) {
            PolicyDecision::Handoff => {
                self.run_handoff(&entry.participant).await;
                log::info!("reply: {} handed off, no further replies will be sent", entry.participant);
                Ok(StepOutcome::HandedOff)
            }
            PolicyDecision::Continue => {
                let mut sent = 0;
                for chunk in split_message(&reply) {
                    entry
                        .channel
                        .send_message(&entry.participant, &chunk)
                        .await
                        .map_err(|reason| ProcessError::Delivery { sent, reason })?;
                    sent += 1;
                }
                log::debug!("reply: sent {} chunk(s) to {}", sent, entry.participant);
                Ok(StepOutcome::Replied)
            }
        }
    }
}
