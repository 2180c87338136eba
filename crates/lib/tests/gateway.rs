//! Integration tests: start the gateway on a free port and drive it over HTTP.
//! OpenAI, WhatsApp and Kommo are all served by one mockito server. The server task is left
//! running when each test ends.

use lib::config::{Config, DEFAULT_HANDOFF_PHRASE};
use lib::gateway;
use mockito::Matcher;
use std::time::Duration;

const PARTICIPANT: &str = "5215550001";

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

fn config_for(server: &mockito::Server) -> Config {
    let mut config = Config::default();
    config.gateway.port = free_port();
    config.gateway.bind = "127.0.0.1".to_string();
    config.assistant.api_key = Some("sk-test".to_string());
    config.assistant.assistant_id = Some("asst_test".to_string());
    config.assistant.base_url = Some(server.url());
    config.assistant.poll_interval_ms = 10;
    config.channels.whatsapp.access_token = Some("wa-token".to_string());
    config.channels.whatsapp.phone_number_id = Some("100".to_string());
    config.channels.whatsapp.verify_token = Some("verify-me".to_string());
    config.channels.whatsapp.api_base = Some(server.url());
    config
}

/// Spawn the gateway and wait until GET / answers; returns the base URL.
async fn start(config: Config) -> String {
    let base = format!("http://127.0.0.1:{}", config.gateway.port);
    tokio::spawn(async move {
        if let Err(e) = gateway::run_gateway(config).await {
            eprintln!("gateway exited: {:#}", e);
        }
    });
    let client = reqwest::Client::new();
    for _ in 0..100 {
        if let Ok(resp) = client.get(format!("{}/", base)).send().await {
            if resp.status().is_success() {
                return base;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("gateway at {} did not come up within 5s", base);
}

async fn wait_matched(mock: &mockito::Mock) -> bool {
    for _ in 0..100 {
        if mock.matched_async().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

fn webhook_body(text: &str) -> serde_json::Value {
    serde_json::json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "waba",
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "metadata": { "phone_number_id": "100" },
                    "messages": [{
                        "from": PARTICIPANT,
                        "id": "wamid.in1",
                        "type": "text",
                        "text": { "body": text }
                    }]
                }
            }]
        }]
    })
}

/// Thread, message, run and reply mocks for one assistant answer.
async fn mock_assistant(server: &mut mockito::Server, reply: &str) -> Vec<mockito::Mock> {
    let mut mocks = Vec::new();
    mocks.push(
        server
            .mock("POST", "/threads")
            .with_status(200)
            .with_body(r#"{"id":"thread_1"}"#)
            .create_async()
            .await,
    );
    mocks.push(
        server
            .mock("POST", "/threads/thread_1/messages")
            .with_status(200)
            .with_body(r#"{"id":"msg_user"}"#)
            .create_async()
            .await,
    );
    mocks.push(
        server
            .mock("POST", "/threads/thread_1/runs")
            .with_status(200)
            .with_body(r#"{"id":"run_1","status":"completed"}"#)
            .create_async()
            .await,
    );
    let body = serde_json::json!({
        "data": [{
            "id": "msg_1",
            "role": "assistant",
            "content": [{ "type": "text", "text": { "value": reply, "annotations": [] } }]
        }]
    });
    mocks.push(
        server
            .mock("GET", Matcher::Regex("^/threads/thread_1/messages".to_string()))
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(body.to_string())
            .create_async()
            .await,
    );
    mocks.push(
        server
            .mock("POST", "/100/messages")
            .match_body(Matcher::PartialJson(serde_json::json!({ "status": "read" })))
            .with_status(200)
            .with_body(r#"{"success":true}"#)
            .create_async()
            .await,
    );
    mocks
}

async fn mock_send(server: &mut mockito::Server, text: &str) -> mockito::Mock {
    server
        .mock("POST", "/100/messages")
        .match_header("authorization", "Bearer wa-token")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "to": PARTICIPANT,
            "type": "text",
            "text": { "body": text }
        })))
        .with_status(200)
        .with_body(r#"{"messages":[{"id":"wamid.out"}]}"#)
        .create_async()
        .await
}

#[tokio::test]
async fn health_http_responds_with_running() {
    let server = mockito::Server::new_async().await;
    let config = config_for(&server);
    let port = config.gateway.port;
    let base = start(config).await;

    let json: serde_json::Value = reqwest::get(format!("{}/", base))
        .await
        .expect("GET /")
        .json()
        .await
        .expect("parse JSON");
    assert_eq!(json.get("runtime").and_then(|v| v.as_str()), Some("running"));
    assert_eq!(json.get("port").and_then(|v| v.as_u64()), Some(port as u64));
    assert_eq!(json.get("activeParticipants").and_then(|v| v.as_u64()), Some(0));
}

#[tokio::test]
async fn subscription_echoes_challenge_only_for_matching_token() {
    let server = mockito::Server::new_async().await;
    let base = start(config_for(&server)).await;
    let client = reqwest::Client::new();

    let ok = client
        .get(format!("{}/whatsapp/webhook", base))
        .query(&[("hub.mode", "subscribe"), ("hub.verify_token", "verify-me"), ("hub.challenge", "4242")])
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), reqwest::StatusCode::OK);
    assert_eq!(ok.text().await.unwrap(), "4242");

    let denied = client
        .get(format!("{}/whatsapp/webhook", base))
        .query(&[("hub.mode", "subscribe"), ("hub.verify_token", "wrong"), ("hub.challenge", "4242")])
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), reqwest::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn message_is_answered_in_chunks() {
    let mut server = mockito::Server::new_async().await;
    let _assistant = mock_assistant(&mut server, "Hola.\n\n【4:0†fuente】 ¿En qué te ayudo?").await;
    let first = mock_send(&mut server, "Hola.").await;
    let second = mock_send(&mut server, "¿En qué te ayudo?").await;
    let base = start(config_for(&server)).await;

    let res = reqwest::Client::new()
        .post(format!("{}/whatsapp/webhook", base))
        .json(&webhook_body("hola"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::OK);

    assert!(wait_matched(&first).await, "first chunk was not sent");
    assert!(wait_matched(&second).await, "second chunk was not sent");
}

#[tokio::test]
async fn handoff_updates_crm_and_sends_nothing() {
    let mut server = mockito::Server::new_async().await;
    let _assistant = mock_assistant(&mut server, DEFAULT_HANDOFF_PHRASE).await;
    let no_send = server
        .mock("POST", "/100/messages")
        .match_body(Matcher::PartialJson(serde_json::json!({ "type": "text" })))
        .expect(0)
        .create_async()
        .await;
    let _contacts = server
        .mock("GET", "/api/v4/contacts")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            serde_json::json!({
                "_embedded": { "contacts": [{
                    "id": 1, "name": "Ana",
                    "_embedded": { "leads": [{ "id": 7 }] }
                }] }
            })
            .to_string(),
        )
        .create_async()
        .await;
    let _lead = server
        .mock("GET", "/api/v4/leads/7")
        .with_status(200)
        .with_body(r#"{"id":7,"status_id":70,"pipeline_id":80}"#)
        .create_async()
        .await;
    let update = server
        .mock("PATCH", "/api/v4/leads/7")
        .match_body(Matcher::PartialJson(serde_json::json!({
            "status_id": 71,
            "responsible_user_id": 900
        })))
        .with_status(200)
        .with_body(r#"{"id":7}"#)
        .create_async()
        .await;
    let task = server
        .mock("POST", "/api/v4/tasks")
        .with_status(200)
        .with_body(r#"{"_embedded":{"tasks":[{"id":1}]}}"#)
        .create_async()
        .await;

    let mut config = config_for(&server);
    config.crm.api_key = Some("kommo-token".to_string());
    config.crm.base_url = Some(server.url());
    config.crm.handoff.target_status_id = Some(70);
    config.crm.handoff.target_pipeline_id = Some(80);
    config.crm.handoff.new_status_id = Some(71);
    config.crm.handoff.new_responsible_user_id = Some(900);
    let base = start(config).await;

    reqwest::Client::new()
        .post(format!("{}/whatsapp/webhook", base))
        .json(&webhook_body("quiero hablar con un asesor"))
        .send()
        .await
        .unwrap();

    assert!(wait_matched(&task).await, "follow-up task was not created");
    update.assert_async().await;
    no_send.assert_async().await;
}

#[tokio::test]
async fn unsigned_webhook_is_rejected_when_app_secret_is_set() {
    let server = mockito::Server::new_async().await;
    let mut config = config_for(&server);
    config.channels.whatsapp.app_secret = Some("app-secret".to_string());
    let base = start(config).await;

    let res = reqwest::Client::new()
        .post(format!("{}/whatsapp/webhook", base))
        .header("X-Hub-Signature-256", "sha256=00")
        .json(&webhook_body("hola"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), reqwest::StatusCode::FORBIDDEN);
}
