//! Dispatcher: enqueue entries and run one drain task per active participant.

use crate::dispatch::registry::DispatchRegistry;
use crate::dispatch::{EntryProcessor, ProcessError, QueueEntry, StepOutcome};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Serializes processing per participant while running participants in parallel.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<DispatchRegistry>,
    processor: Arc<dyn EntryProcessor>,
}

impl Dispatcher {
    pub fn new(processor: Arc<dyn EntryProcessor>) -> Self {
        Self::with_registry(Arc::new(DispatchRegistry::new()), processor)
    }

    pub fn with_registry(registry: Arc<DispatchRegistry>, processor: Arc<dyn EntryProcessor>) -> Self {
        Self {
            registry,
            processor,
        }
    }

    pub fn registry(&self) -> &Arc<DispatchRegistry> {
        &self.registry
    }

    /// Queue an entry for its participant. Does not wait for processing.
    /// Returns the drain task handle when this entry woke an idle participant.
    pub async fn enqueue(&self, entry: QueueEntry) -> Option<JoinHandle<()>> {
        let participant = entry.participant.clone();
        log::debug!("dispatch: queued {} for {}", entry.id, participant);
        if !self.registry.push(entry).await {
            return None;
        }
        let registry = Arc::clone(&self.registry);
        let processor = Arc::clone(&self.processor);
        Some(tokio::spawn(drain(registry, processor, participant)))
    }
}

/// Process the participant's queue until it is empty or the participant is handed off.
/// Each step runs in its own task so a panic is reported as a failed entry instead of
/// leaving the participant owned by a dead drain.
async fn drain(registry: Arc<DispatchRegistry>, processor: Arc<dyn EntryProcessor>, participant: String) {
    while let Some(entry) = registry.next(&participant).await {
        let entry_id = entry.id;
        let step = {
            let processor = Arc::clone(&processor);
            tokio::spawn(async move { processor.process(entry).await })
        };
        let result = match step.await {
            Ok(result) => result,
            Err(e) => Err(ProcessError::Panicked(e.to_string())),
        };
        match result {
            Ok(StepOutcome::Replied) => {}
            Ok(StepOutcome::HandedOff) => {
                let dropped = registry.terminate(&participant).await;
                log::info!(
                    "dispatch: {} handed off, dropped {} queued message(s)",
                    participant,
                    dropped
                );
                return;
            }
            Err(e) => {
                log::warn!("dispatch: message {} from {} failed: {}", entry_id, participant, e);
            }
        }
    }
    log::debug!("dispatch: queue for {} drained", participant);
}
