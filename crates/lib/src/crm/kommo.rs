//! Kommo REST client (API v4, long-lived bearer token).
//! Finds the participant's leads by phone, moves the first matching lead, and schedules a follow-up task.

use crate::config::{self, Config, HandoffParams, TaskConfig};
use crate::crm::SideEffectService;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Client for the Kommo API of one account.
#[derive(Clone)]
pub struct KommoClient {
    base_url: String,
    api_key: String,
    task: TaskConfig,
    client: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
pub enum CrmError {
    #[error("kommo request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("kommo api error: {0}")]
    Api(String),
}

/// Contact with the leads linked to it.
#[derive(Debug, Clone)]
pub struct Contact {
    pub id: u64,
    pub name: String,
    pub leads: Vec<Lead>,
}

/// Lead as returned by GET /leads/{id}. Embedded lead references only carry the id.
#[derive(Debug, Clone, Deserialize)]
pub struct Lead {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status_id: Option<u64>,
    #[serde(default)]
    pub pipeline_id: Option<u64>,
}

impl Lead {
    fn matches(&self, params: &HandoffParams) -> bool {
        self.status_id == Some(params.target_status_id)
            && self.pipeline_id == Some(params.target_pipeline_id)
    }
}

#[derive(Debug, Deserialize)]
struct ContactsResponse {
    #[serde(rename = "_embedded", default)]
    embedded: Option<EmbeddedContacts>,
}

#[derive(Debug, Deserialize)]
struct EmbeddedContacts {
    #[serde(default)]
    contacts: Vec<RawContact>,
}

#[derive(Debug, Deserialize)]
struct RawContact {
    id: u64,
    #[serde(default)]
    name: String,
    #[serde(rename = "_embedded", default)]
    embedded: Option<EmbeddedLeads>,
}

#[derive(Debug, Deserialize)]
struct EmbeddedLeads {
    #[serde(default)]
    leads: Vec<Lead>,
}

#[derive(Debug, Serialize)]
struct LeadUpdate {
    status_id: u64,
    responsible_user_id: u64,
}

#[derive(Debug, Serialize)]
struct NewTask<'a> {
    task_type_id: u64,
    text: &'a str,
    complete_till: i64,
    entity_id: u64,
    entity_type: &'static str,
    request_id: String,
}

impl KommoClient {
    /// `base_url` is the account origin, e.g. `https://acme.kommo.com`.
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            task: TaskConfig::default(),
            client: reqwest::Client::new(),
        }
    }

    /// Client for the configured Kommo account, or None when the token or origin is missing.
    pub fn from_config(config: &Config) -> Option<Self> {
        let api_key = config::resolve_kommo_api_key(config)?;
        let base_url = config::resolve_kommo_base_url(config)?;
        Some(Self::new(api_key, base_url).with_task(config.crm.task.clone()))
    }

    /// Follow-up task text, due offset and type.
    pub fn with_task(mut self, task: TaskConfig) -> Self {
        self.task = task;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v4{}", self.base_url, path)
    }

    /// GET /contacts?with=leads&query=...: contacts matching a phone number, with their leads.
    /// Kommo answers 204 No Content when nothing matches.
    pub async fn search_contacts(&self, phone: &str) -> Result<Vec<Contact>, CrmError> {
        let res = self
            .client
            .get(self.url("/contacts"))
            .bearer_auth(&self.api_key)
            .query(&[("with", "leads"), ("query", phone)])
            .send()
            .await?;
        if res.status() == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        let data: ContactsResponse = check(res).await?.json().await?;
        Ok(data
            .embedded
            .map(|e| e.contacts)
            .unwrap_or_default()
            .into_iter()
            .map(|c| Contact {
                id: c.id,
                name: c.name,
                leads: c.embedded.map(|e| e.leads).unwrap_or_default(),
            })
            .collect())
    }

    /// GET /leads/{id}
    pub async fn get_lead(&self, lead_id: u64) -> Result<Lead, CrmError> {
        let res = self
            .client
            .get(self.url(&format!("/leads/{}", lead_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        Ok(check(res).await?.json().await?)
    }

    /// PATCH /leads/{id}: move the lead to a new status and owner.
    pub async fn update_lead(
        &self,
        lead_id: u64,
        status_id: u64,
        responsible_user_id: u64,
    ) -> Result<(), CrmError> {
        let body = LeadUpdate {
            status_id,
            responsible_user_id,
        };
        let res = self
            .client
            .patch(self.url(&format!("/leads/{}", lead_id)))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        check(res).await?;
        Ok(())
    }

    /// POST /tasks: follow-up task on the lead, due `task.due_in_secs` from now.
    pub async fn create_task(&self, lead_id: u64) -> Result<(), CrmError> {
        let task = NewTask {
            task_type_id: self.task.task_type_id,
            text: &self.task.text,
            complete_till: chrono::Utc::now().timestamp() + self.task.due_in_secs,
            entity_id: lead_id,
            entity_type: "leads",
            request_id: format!("task_{}", lead_id),
        };
        let res = self
            .client
            .post(self.url("/tasks"))
            .bearer_auth(&self.api_key)
            .json(&[task])
            .send()
            .await?;
        check(res).await?;
        Ok(())
    }
}

#[async_trait]
impl SideEffectService for KommoClient {
    async fn process_handoff(
        &self,
        participant: &str,
        params: &HandoffParams,
    ) -> Result<bool, CrmError> {
        let contacts = self.search_contacts(participant).await?;
        if contacts.is_empty() {
            log::info!("kommo: no contact found for {}", participant);
            return Ok(false);
        }
        for contact in &contacts {
            for lead_ref in &contact.leads {
                let lead = match self.get_lead(lead_ref.id).await {
                    Ok(lead) => lead,
                    Err(e) => {
                        log::warn!("kommo: fetching lead {} failed: {}", lead_ref.id, e);
                        continue;
                    }
                };
                if !lead.matches(params) {
                    continue;
                }
                match self
                    .update_lead(lead.id, params.new_status_id, params.new_responsible_user_id)
                    .await
                {
                    Ok(()) => {
                        if let Err(e) = self.create_task(lead.id).await {
                            log::warn!("kommo: creating task for lead {} failed: {}", lead.id, e);
                        }
                        log::info!(
                            "kommo: lead {} of contact {} ({}) moved to status {}",
                            lead.id,
                            contact.id,
                            contact.name,
                            params.new_status_id
                        );
                        return Ok(true);
                    }
                    Err(e) => {
                        log::warn!("kommo: updating lead {} failed: {}", lead.id, e);
                    }
                }
            }
        }
        log::info!("kommo: no lead of {} matched the handoff criteria", participant);
        Ok(false)
    }
}

async fn check(res: reqwest::Response) -> Result<reqwest::Response, CrmError> {
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        return Err(CrmError::Api(format!("{} {}", status, body)));
    }
    Ok(res)
}
