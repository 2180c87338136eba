//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.parley/config.json`) and environment.
//! Secrets and account ids may come from the environment so the file can stay out of deployments.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Phrase the assistant is instructed to emit when a human advisor should take over.
pub const DEFAULT_HANDOFF_PHRASE: &str =
    "¡Por supuesto! En un momento un asesor especializado se comunicará contigo para ayudarte.";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Channel settings (WhatsApp Cloud API).
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// OpenAI assistant used to answer participants.
    #[serde(default)]
    pub assistant: AssistantConfig,

    /// Kommo CRM account and handoff parameters.
    #[serde(default)]
    pub crm: CrmConfig,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for the webhook and health endpoints (default 3008). Overridden by PORT env.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    3008
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Per-channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub whatsapp: WhatsAppChannelConfig,
}

/// WhatsApp Cloud API config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhatsAppChannelConfig {
    /// Permanent or system-user access token. Overridden by WHATSAPP_ACCESS_TOKEN env.
    pub access_token: Option<String>,
    /// Business phone number id that sends replies and receives webhooks.
    pub phone_number_id: Option<String>,
    /// Token echoed back during webhook subscription (hub.verify_token).
    pub verify_token: Option<String>,
    /// App secret used to verify X-Hub-Signature-256. Overridden by WHATSAPP_APP_SECRET env.
    pub app_secret: Option<String>,
    /// Graph API base (default https://graph.facebook.com/v21.0).
    pub api_base: Option<String>,
}

/// OpenAI assistant config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantConfig {
    /// API key. Overridden by OPENAI_API_KEY env.
    pub api_key: Option<String>,
    /// Assistant id (asst_...). Overridden by ASSISTANT_ID env.
    pub assistant_id: Option<String>,
    /// API base (default https://api.openai.com/v1).
    pub base_url: Option<String>,
    /// Delay between run status polls.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Give up on a run after this many seconds.
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    /// When a reply contains this phrase the participant is handed off to a human.
    #[serde(default = "default_handoff_phrase")]
    pub handoff_phrase: String,
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_run_timeout_secs() -> u64 {
    120
}

fn default_handoff_phrase() -> String {
    DEFAULT_HANDOFF_PHRASE.to_string()
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            assistant_id: None,
            base_url: None,
            poll_interval_ms: default_poll_interval_ms(),
            run_timeout_secs: default_run_timeout_secs(),
            handoff_phrase: default_handoff_phrase(),
        }
    }
}

/// Kommo CRM config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmConfig {
    /// Long-lived token. Overridden by KOMMO_API_KEY env.
    pub api_key: Option<String>,
    /// Account subdomain (<subdomain>.kommo.com). Overridden by KOMMO_SUBDOMAIN env.
    pub subdomain: Option<String>,
    /// Full API origin; takes precedence over subdomain (used for tests and proxies).
    pub base_url: Option<String>,
    /// Which leads to move on handoff, and where to move them.
    #[serde(default)]
    pub handoff: HandoffConfig,
    /// Follow-up task created on a moved lead.
    #[serde(default)]
    pub task: TaskConfig,
}

/// Lead filter and update targets for a handoff. All four ids are required to run a handoff.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffConfig {
    pub target_status_id: Option<u64>,
    pub target_pipeline_id: Option<u64>,
    pub new_status_id: Option<u64>,
    pub new_responsible_user_id: Option<u64>,
}

/// Follow-up task settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    #[serde(default = "default_task_text")]
    pub text: String,
    #[serde(default = "default_task_due_in_secs")]
    pub due_in_secs: i64,
    #[serde(default = "default_task_type_id")]
    pub task_type_id: u64,
}

fn default_task_text() -> String {
    "Atender a nuevo usuario".to_string()
}

fn default_task_due_in_secs() -> i64 {
    86_400
}

fn default_task_type_id() -> u64 {
    1
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            text: default_task_text(),
            due_in_secs: default_task_due_in_secs(),
            task_type_id: default_task_type_id(),
        }
    }
}

/// Static handoff parameters passed through to the CRM; never interpreted by dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandoffParams {
    pub target_status_id: u64,
    pub target_pipeline_id: u64,
    pub new_status_id: u64,
    pub new_responsible_user_id: u64,
}

/// Resolve handoff parameters; errors list every missing id.
pub fn resolve_handoff_params(config: &Config) -> Result<HandoffParams> {
    let h = &config.crm.handoff;
    let mut missing = Vec::new();
    if h.target_status_id.is_none() {
        missing.push("crm.handoff.targetStatusId");
    }
    if h.target_pipeline_id.is_none() {
        missing.push("crm.handoff.targetPipelineId");
    }
    if h.new_status_id.is_none() {
        missing.push("crm.handoff.newStatusId");
    }
    if h.new_responsible_user_id.is_none() {
        missing.push("crm.handoff.newResponsibleUserId");
    }
    match (
        h.target_status_id,
        h.target_pipeline_id,
        h.new_status_id,
        h.new_responsible_user_id,
    ) {
        (Some(target_status_id), Some(target_pipeline_id), Some(new_status_id), Some(new_responsible_user_id)) => {
            Ok(HandoffParams {
                target_status_id,
                target_pipeline_id,
                new_status_id,
                new_responsible_user_id,
            })
        }
        _ => anyhow::bail!("handoff not configured; missing {}", missing.join(", ")),
    }
}

/// Env var value if set and non-empty (trimmed).
fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Config value if set and non-empty (trimmed).
fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the OpenAI API key: env OPENAI_API_KEY overrides config.
pub fn resolve_openai_api_key(config: &Config) -> Option<String> {
    env_override("OPENAI_API_KEY").or_else(|| non_empty(config.assistant.api_key.as_ref()))
}

/// Resolve the assistant id: env ASSISTANT_ID overrides config.
pub fn resolve_assistant_id(config: &Config) -> Option<String> {
    env_override("ASSISTANT_ID").or_else(|| non_empty(config.assistant.assistant_id.as_ref()))
}

/// Resolve the Kommo token: env KOMMO_API_KEY overrides config.
pub fn resolve_kommo_api_key(config: &Config) -> Option<String> {
    env_override("KOMMO_API_KEY").or_else(|| non_empty(config.crm.api_key.as_ref()))
}

/// Resolve the Kommo API origin: crm.baseUrl, else https://<subdomain>.kommo.com (KOMMO_SUBDOMAIN env overrides config).
pub fn resolve_kommo_base_url(config: &Config) -> Option<String> {
    if let Some(url) = non_empty(config.crm.base_url.as_ref()) {
        return Some(url);
    }
    env_override("KOMMO_SUBDOMAIN")
        .or_else(|| non_empty(config.crm.subdomain.as_ref()))
        .map(|sub| format!("https://{}.kommo.com", sub))
}

/// Resolve the WhatsApp access token: env WHATSAPP_ACCESS_TOKEN overrides config.
pub fn resolve_whatsapp_token(config: &Config) -> Option<String> {
    env_override("WHATSAPP_ACCESS_TOKEN")
        .or_else(|| non_empty(config.channels.whatsapp.access_token.as_ref()))
}

/// Resolve the WhatsApp app secret: env WHATSAPP_APP_SECRET overrides config.
pub fn resolve_whatsapp_app_secret(config: &Config) -> Option<String> {
    env_override("WHATSAPP_APP_SECRET")
        .or_else(|| non_empty(config.channels.whatsapp.app_secret.as_ref()))
}

/// Apply env PORT over the configured gateway port when it parses.
pub fn apply_port_override(config: &mut Config) {
    if let Some(port) = env_override("PORT").and_then(|p| p.parse::<u16>().ok()) {
        config.gateway.port = port;
    }
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("PARLEY_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".parley").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    apply_port_override(&mut config);
    Ok((config, path))
}
