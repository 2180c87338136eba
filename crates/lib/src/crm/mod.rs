//! CRM side effects triggered by a handoff.
//!
//! The dispatcher calls [`SideEffectService::process_handoff`] as one opaque operation;
//! [`KommoClient`] performs lookup → filter → update → follow-up task against Kommo.

mod kommo;

use crate::config::HandoffParams;
use async_trait::async_trait;

pub use kommo::{Contact, CrmError, KommoClient, Lead};

/// Remote workflow run when a participant is handed off to a human.
#[async_trait]
pub trait SideEffectService: Send + Sync {
    /// Returns Ok(true) when a record was updated, Ok(false) when nothing matched.
    async fn process_handoff(
        &self,
        participant: &str,
        params: &HandoffParams,
    ) -> Result<bool, CrmError>;
}
