//! WhatsApp channel: Cloud API webhook parsing and sendMessage / typing indicator via the Graph API.

use crate::channels::handle::ChannelHandle;
use crate::channels::inbound::InboundMessage;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v21.0";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum WhatsAppError {
    #[error("whatsapp request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("whatsapp api error: {0}")]
    Api(String),
    #[error("whatsapp channel not configured: {0}")]
    NotConfigured(&'static str),
}

/// Webhook POST body (`object: whatsapp_business_account`).
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookChange {
    #[serde(default)]
    pub field: String,
    pub value: ChangeValue,
}

#[derive(Debug, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub metadata: Option<ChangeMetadata>,
    #[serde(default)]
    pub messages: Vec<WhatsAppMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeMetadata {
    pub phone_number_id: String,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppMessage {
    /// Sender wa_id (phone number without "+").
    pub from: String,
    pub id: String,
    #[serde(rename = "type", default)]
    pub typ: String,
    #[serde(default)]
    pub text: Option<WhatsAppText>,
}

#[derive(Debug, Deserialize)]
pub struct WhatsAppText {
    pub body: String,
}

/// Extract text messages from a webhook payload, in payload order.
/// Non-message changes, non-text messages and changes addressed to another phone number id are skipped.
pub fn inbound_messages(payload: WebhookPayload, phone_number_id: Option<&str>) -> Vec<InboundMessage> {
    let mut out = Vec::new();
    for entry in payload.entry {
        for change in entry.changes {
            if change.field != "messages" {
                log::debug!("whatsapp: ignoring webhook field {}", change.field);
                continue;
            }
            if let (Some(expected), Some(meta)) = (phone_number_id, change.value.metadata.as_ref()) {
                if meta.phone_number_id != expected {
                    log::warn!(
                        "whatsapp: phone number id mismatch (expected {}, received {})",
                        expected,
                        meta.phone_number_id
                    );
                    continue;
                }
            }
            for msg in change.value.messages {
                let text = match (msg.typ.as_str(), msg.text) {
                    ("text", Some(t)) if !t.body.trim().is_empty() => t.body,
                    _ => {
                        log::debug!("whatsapp: ignoring non-text message of type {}", msg.typ);
                        continue;
                    }
                };
                out.push(InboundMessage {
                    channel_id: "whatsapp".to_string(),
                    conversation_id: msg.from,
                    message_id: Some(msg.id),
                    text,
                });
            }
        }
    }
    out
}

/// Verify the `X-Hub-Signature-256` header (`sha256=<hex>`) against the raw body.
pub fn verify_signature(body: &[u8], signature_header: &str, app_secret: &str) -> bool {
    let Some(expected) = signature_header.strip_prefix("sha256=") else {
        log::warn!("whatsapp: signature header missing sha256= prefix");
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&computed, expected)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Webhook subscription check (GET with hub.mode, hub.verify_token, hub.challenge).
/// Returns the challenge to echo when the token matches.
pub fn verify_subscription(
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&str>,
    verify_token: Option<&str>,
) -> Option<String> {
    let expected = verify_token.filter(|t| !t.is_empty())?;
    if mode? == "subscribe" && token? == expected {
        challenge.map(str::to_string)
    } else {
        None
    }
}

/// WhatsApp Cloud API connector for outbound messages.
pub struct WhatsAppChannel {
    id: String,
    token: Option<String>,
    phone_number_id: Option<String>,
    api_base: String,
    client: reqwest::Client,
}

impl WhatsAppChannel {
    pub fn new(token: Option<String>, phone_number_id: Option<String>, api_base: Option<String>) -> Self {
        Self {
            id: "whatsapp".to_string(),
            token,
            phone_number_id,
            api_base: api_base
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or_else(|| GRAPH_API_BASE.to_string()),
            client: reqwest::Client::new(),
        }
    }

    /// Business phone number id this channel sends from.
    pub fn phone_number_id(&self) -> Option<&str> {
        self.phone_number_id.as_deref()
    }

    /// POST /{phone_number_id}/messages with the given body.
    async fn post_messages(&self, body: serde_json::Value) -> Result<(), WhatsAppError> {
        let token = self
            .token
            .as_ref()
            .ok_or(WhatsAppError::NotConfigured("access token"))?;
        let phone_number_id = self
            .phone_number_id
            .as_ref()
            .ok_or(WhatsAppError::NotConfigured("phone number id"))?;
        let url = format!("{}/{}/messages", self.api_base, phone_number_id);
        let res = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(WhatsAppError::Api(format!("{} {}", status, body)));
        }
        Ok(())
    }

    /// Send a text message to a phone number.
    pub async fn send_text(&self, to: &str, text: &str) -> Result<(), WhatsAppError> {
        self.post_messages(serde_json::json!({
            "messaging_product": "whatsapp",
            "recipient_type": "individual",
            "to": to,
            "type": "text",
            "text": { "preview_url": false, "body": text }
        }))
        .await
    }

    /// Mark the inbound message as read and show the typing indicator.
    pub async fn typing(&self, message_id: &str) -> Result<(), WhatsAppError> {
        self.post_messages(serde_json::json!({
            "messaging_product": "whatsapp",
            "status": "read",
            "message_id": message_id,
            "typing_indicator": { "type": "text" }
        }))
        .await
    }
}

#[async_trait]
impl ChannelHandle for WhatsAppChannel {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), String> {
        self.send_text(conversation_id, text)
            .await
            .map_err(|e| e.to_string())
    }

    async fn signal_presence(
        &self,
        _conversation_id: &str,
        message_id: Option<&str>,
    ) -> Result<(), String> {
        match message_id {
            Some(id) => self.typing(id).await.map_err(|e| e.to_string()),
            None => Ok(()),
        }
    }
}
