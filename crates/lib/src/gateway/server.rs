//! Gateway HTTP server (single port): health probe and the WhatsApp webhook.

use crate::assistant::OpenAiAssistant;
use crate::channels::{
    self, ChannelHandle, InboundMessage, WebhookPayload, WhatsAppChannel,
};
use crate::config::{self, Config};
use crate::conversation::ConversationStore;
use crate::crm::{KommoClient, SideEffectService};
use crate::dispatch::{Dispatcher, QueueEntry, ReplyProcessor};
use crate::policy::ResponsePolicy;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Inbound buffer between the webhook handler and the dispatcher loop.
const INBOUND_BUFFER: usize = 256;

/// Shared state for the gateway (config, dispatcher, channel).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub dispatcher: Dispatcher,
    pub conversations: Arc<ConversationStore>,
    pub whatsapp: Arc<WhatsAppChannel>,
    /// Sender for inbound webhook messages. The processor task receives and enqueues them.
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    /// When Some, webhook POSTs must carry a valid X-Hub-Signature-256.
    pub app_secret: Option<String>,
}

/// Build the reply dispatcher from config: OpenAI responder, response policy and (when fully
/// configured) the Kommo handoff workflow.
pub fn build_dispatcher(config: &Config) -> Result<Dispatcher> {
    let api_key = config::resolve_openai_api_key(config)
        .context("assistant API key not configured (set assistant.apiKey or OPENAI_API_KEY)")?;
    let assistant_id = config::resolve_assistant_id(config)
        .context("assistant id not configured (set assistant.assistantId or ASSISTANT_ID)")?;
    let responder = OpenAiAssistant::new(api_key, config.assistant.base_url.clone()).with_polling(
        Duration::from_millis(config.assistant.poll_interval_ms),
        Duration::from_secs(config.assistant.run_timeout_secs),
    );
    let policy = ResponsePolicy::new(config.assistant.handoff_phrase.clone());
    let mut processor = ReplyProcessor::new(assistant_id, Arc::new(responder), policy);

    match (KommoClient::from_config(config), config::resolve_handoff_params(config)) {
        (Some(kommo), Ok(params)) => {
            log::info!("crm handoff enabled (kommo)");
            processor = processor.with_handoff(Arc::new(kommo) as Arc<dyn SideEffectService>, params);
        }
        (None, _) => log::warn!("crm not configured; handoffs will only stop replies"),
        (Some(_), Err(e)) => log::warn!("{}; handoffs will only stop replies", e),
    }

    Ok(Dispatcher::new(Arc::new(processor)))
}

/// Enqueue one inbound channel message for its participant.
async fn process_inbound_message(state: &GatewayState, msg: InboundMessage) -> Option<JoinHandle<()>> {
    log::debug!(
        "inbound message on {} from {} ({} bytes)",
        msg.channel_id,
        msg.conversation_id,
        msg.text.len()
    );
    let conversation = state.conversations.handle(msg.conversation_id.clone());
    let channel: Arc<dyn ChannelHandle> = state.whatsapp.clone();
    let entry = QueueEntry::from_inbound(msg, channel, conversation);
    state.dispatcher.enqueue(entry).await
}

/// Run the gateway until SIGINT/SIGTERM.
pub async fn run_gateway(config: Config) -> Result<()> {
    let bind = config.gateway.bind.trim().to_string();
    let app_secret = config::resolve_whatsapp_app_secret(&config);
    if !config::is_loopback_bind(&bind) && app_secret.is_none() {
        anyhow::bail!(
            "refusing to bind gateway to {} without webhook signature checks (set channels.whatsapp.appSecret or WHATSAPP_APP_SECRET)",
            bind
        );
    }

    let dispatcher = build_dispatcher(&config)?;
    let wa = &config.channels.whatsapp;
    let whatsapp = Arc::new(WhatsAppChannel::new(
        config::resolve_whatsapp_token(&config),
        wa.phone_number_id.clone(),
        wa.api_base.clone(),
    ));
    if whatsapp.phone_number_id().is_none() {
        log::warn!("whatsapp phone number id not configured; replies will fail to send");
    }
    if wa.verify_token.as_deref().map_or(true, str::is_empty) {
        log::warn!("whatsapp verify token not configured; webhook subscription checks will be refused");
    }

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(INBOUND_BUFFER);
    let state = GatewayState {
        config: Arc::new(config),
        dispatcher,
        conversations: Arc::new(ConversationStore::new()),
        whatsapp,
        inbound_tx,
        app_secret,
    };

    {
        let state_inbound = state.clone();
        tokio::spawn(async move {
            while let Some(msg) = inbound_rx.recv().await {
                process_inbound_message(&state_inbound, msg).await;
            }
        });
    }

    let port = state.config.gateway.port;
    let app = router(state);

    let bind_addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route(
            "/whatsapp/webhook",
            get(whatsapp_subscribe).post(whatsapp_webhook),
        )
        .with_state(state)
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// In-flight drains are not awaited; queued messages are lost on exit.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, draining connections");
}

/// GET /whatsapp/webhook: subscription check; echoes hub.challenge when hub.verify_token matches.
async fn whatsapp_subscribe(
    State(state): State<GatewayState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let challenge = channels::verify_subscription(
        params.get("hub.mode").map(String::as_str),
        params.get("hub.verify_token").map(String::as_str),
        params.get("hub.challenge").map(String::as_str),
        state.config.channels.whatsapp.verify_token.as_deref(),
    );
    match challenge {
        Some(c) => {
            log::info!("whatsapp webhook subscription verified");
            (StatusCode::OK, c)
        }
        None => (StatusCode::FORBIDDEN, String::new()),
    }
}

/// POST /whatsapp/webhook: verifies the optional signature, forwards text messages to the dispatcher.
async fn whatsapp_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(ref secret) = state.app_secret {
        let provided = headers
            .get("X-Hub-Signature-256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !channels::verify_signature(&body, provided, secret) {
            return StatusCode::FORBIDDEN;
        }
    }
    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            log::debug!("whatsapp webhook: bad payload: {}", e);
            return StatusCode::BAD_REQUEST;
        }
    };
    for msg in channels::inbound_messages(payload, state.whatsapp.phone_number_id()) {
        if state.inbound_tx.send(msg).await.is_err() {
            return StatusCode::SERVICE_UNAVAILABLE;
        }
    }
    StatusCode::OK
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
        "activeParticipants": state.dispatcher.registry().active().await,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> Config {
        let mut config = Config::default();
        config.assistant.api_key = Some("sk-test".to_string());
        config.assistant.assistant_id = Some("asst_test".to_string());
        config
    }

    #[test]
    fn build_dispatcher_requires_assistant_id() {
        let mut config = configured();
        config.assistant.assistant_id = None;
        if std::env::var("ASSISTANT_ID").is_err() {
            assert!(build_dispatcher(&config).is_err());
        }
        assert!(build_dispatcher(&configured()).is_ok());
    }

    #[tokio::test]
    async fn refuses_public_bind_without_app_secret() {
        if std::env::var("WHATSAPP_APP_SECRET").is_ok() {
            return;
        }
        let mut config = configured();
        config.gateway.bind = "0.0.0.0".to_string();
        let err = run_gateway(config).await.unwrap_err();
        assert!(err.to_string().contains("refusing to bind"));
    }
}
