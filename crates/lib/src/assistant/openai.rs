//! OpenAI Assistants API client (https://api.openai.com/v1 by default, Assistants v2).
//! One thread per participant: create on first use, then add a message, run, poll, and read the reply.

use crate::assistant::Responder;
use crate::conversation::ConversationHandle;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::time::Instant;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const ASSISTANTS_BETA_HEADER: (&str, &str) = ("OpenAI-Beta", "assistants=v2");

/// Client for the OpenAI Assistants HTTP API.
#[derive(Clone)]
pub struct OpenAiAssistant {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    poll_interval: Duration,
    run_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ResponderError {
    #[error("assistant request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("assistant api error: {0}")]
    Api(String),
    #[error("assistant run {run_id} ended with status {status}")]
    RunFailed { run_id: String, status: String },
    #[error("assistant run {0} did not complete in time")]
    Timeout(String),
    #[error("malformed assistant response: {0}")]
    Malformed(String),
}

impl OpenAiAssistant {
    pub fn new(api_key: impl Into<String>, base_url: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            api_key: api_key.into(),
            client: reqwest::Client::new(),
            poll_interval: Duration::from_millis(500),
            run_timeout: Duration::from_secs(120),
        }
    }

    /// Override run polling cadence and the overall run deadline.
    pub fn with_polling(mut self, poll_interval: Duration, run_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.run_timeout = run_timeout;
        self
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header(ASSISTANTS_BETA_HEADER.0, ASSISTANTS_BETA_HEADER.1)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header(ASSISTANTS_BETA_HEADER.0, ASSISTANTS_BETA_HEADER.1)
    }

    /// POST /threads: start an empty thread; returns its id.
    pub async fn create_thread(&self) -> Result<String, ResponderError> {
        let res = self.post("/threads").json(&serde_json::json!({})).send().await?;
        let thread: IdObject = check(res).await?.json().await?;
        Ok(thread.id)
    }

    /// POST /threads/{thread_id}/messages: append a user message.
    pub async fn add_user_message(&self, thread_id: &str, text: &str) -> Result<(), ResponderError> {
        let body = serde_json::json!({ "role": "user", "content": text });
        let res = self
            .post(&format!("/threads/{}/messages", thread_id))
            .json(&body)
            .send()
            .await?;
        check(res).await?;
        Ok(())
    }

    /// POST /threads/{thread_id}/runs: start the assistant on the thread.
    pub async fn create_run(&self, thread_id: &str, assistant_id: &str) -> Result<Run, ResponderError> {
        let body = serde_json::json!({ "assistant_id": assistant_id });
        let res = self
            .post(&format!("/threads/{}/runs", thread_id))
            .json(&body)
            .send()
            .await?;
        Ok(check(res).await?.json().await?)
    }

    /// GET /threads/{thread_id}/runs/{run_id}
    pub async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run, ResponderError> {
        let res = self
            .get(&format!("/threads/{}/runs/{}", thread_id, run_id))
            .send()
            .await?;
        Ok(check(res).await?.json().await?)
    }

    /// Poll until the run completes. Terminal non-success statuses and the deadline are errors.
    async fn wait_for_run(&self, thread_id: &str, mut run: Run) -> Result<(), ResponderError> {
        let deadline = Instant::now() + self.run_timeout;
        loop {
            if run.status == "completed" {
                return Ok(());
            }
            if !matches!(run.status.as_str(), "queued" | "in_progress" | "cancelling") {
                return Err(ResponderError::RunFailed {
                    run_id: run.id,
                    status: run.status,
                });
            }
            if Instant::now() >= deadline {
                return Err(ResponderError::Timeout(run.id));
            }
            tokio::time::sleep(self.poll_interval).await;
            run = self.get_run(thread_id, &run.id).await?;
        }
    }

    /// GET /threads/{thread_id}/messages?run_id=...: newest assistant message text produced by the run.
    async fn run_reply(&self, thread_id: &str, run_id: &str) -> Result<String, ResponderError> {
        let res = self
            .get(&format!("/threads/{}/messages", thread_id))
            .query(&[("run_id", run_id), ("order", "desc")])
            .send()
            .await?;
        let list: MessageList = check(res).await?.json().await?;
        let message = list
            .data
            .into_iter()
            .find(|m| m.role == "assistant")
            .ok_or_else(|| ResponderError::Malformed(format!("run {} produced no assistant message", run_id)))?;
        let parts: Vec<String> = message
            .content
            .into_iter()
            .filter_map(|c| c.text.map(|t| t.value))
            .collect();
        if parts.is_empty() {
            return Err(ResponderError::Malformed(format!(
                "assistant message {} has no text content",
                message.id
            )));
        }
        Ok(parts.join("\n\n"))
    }
}

#[async_trait]
impl Responder for OpenAiAssistant {
    async fn ask(
        &self,
        assistant_id: &str,
        text: &str,
        conversation: &ConversationHandle,
    ) -> Result<String, ResponderError> {
        let thread_id = match conversation.thread_id().await {
            Some(id) => id,
            None => {
                let id = self.create_thread().await?;
                log::debug!(
                    "assistant: created thread {} for {}",
                    id,
                    conversation.participant()
                );
                conversation.set_thread_id(id.clone()).await;
                id
            }
        };
        self.add_user_message(&thread_id, text).await?;
        let run = self.create_run(&thread_id, assistant_id).await?;
        let run_id = run.id.clone();
        self.wait_for_run(&thread_id, run).await?;
        self.run_reply(&thread_id, &run_id).await
    }
}

/// Map non-success HTTP status to an api error carrying the body.
async fn check(res: reqwest::Response) -> Result<reqwest::Response, ResponderError> {
    if !res.status().is_success() {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        return Err(ResponderError::Api(format!("{} {}", status, body)));
    }
    Ok(res)
}

#[derive(Debug, Deserialize)]
struct IdObject {
    id: String,
}

/// Assistant run (only the fields the client needs).
#[derive(Debug, Clone, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    #[serde(default)]
    data: Vec<ThreadMessage>,
}

#[derive(Debug, Deserialize)]
struct ThreadMessage {
    id: String,
    role: String,
    #[serde(default)]
    content: Vec<MessageContent>,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    #[serde(default)]
    text: Option<TextContent>,
}

#[derive(Debug, Deserialize)]
struct TextContent {
    value: String,
}
