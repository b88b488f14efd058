#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Form, Path as UrlPath, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use kbrelay::{AppConfig, RotationConfig};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Exactly 46 characters, like a real bot token.
pub const BOT_TOKEN: &str = "123456789:AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";
pub const API_KEY: &str = "sk-test-key";

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// One request seen by the mock completion endpoint.
#[derive(Debug, Clone)]
pub struct SeenCompletion {
    pub authorization: Option<String>,
    pub body: serde_json::Value,
}

#[derive(Clone)]
struct CompletionMock {
    seen: Arc<Mutex<Vec<SeenCompletion>>>,
    status: StatusCode,
    reply: serde_json::Value,
    delay: Duration,
}

pub struct MockCompletions {
    pub url: String,
    pub seen: Arc<Mutex<Vec<SeenCompletion>>>,
    pub handle: JoinHandle<()>,
}

impl MockCompletions {
    pub fn requests(&self) -> Vec<SeenCompletion> {
        self.seen.lock().unwrap().clone()
    }
}

pub fn completion_reply(content: &str) -> serde_json::Value {
    serde_json::json!({
        "id": "gen-1",
        "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
    })
}

/// Spin up a mock completion endpoint answering every call with `reply`.
pub async fn start_completions(
    status: StatusCode,
    reply: serde_json::Value,
    delay: Duration,
) -> MockCompletions {
    async fn complete(
        State(mock): State<CompletionMock>,
        headers: HeaderMap,
        Json(body): Json<serde_json::Value>,
    ) -> (StatusCode, Json<serde_json::Value>) {
        mock.seen.lock().unwrap().push(SeenCompletion {
            authorization: headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            body,
        });
        tokio::time::sleep(mock.delay).await;
        (mock.status, Json(mock.reply.clone()))
    }
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mock = CompletionMock {
        seen: seen.clone(),
        status,
        reply,
        delay,
    };
    let app = Router::new()
        .route("/chat/completions", post(complete))
        .with_state(mock);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    MockCompletions {
        url: format!("http://{}/chat/completions", addr),
        seen,
        handle,
    }
}

/// One message seen by the mock chat platform.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub bot_segment: String,
    pub form: HashMap<String, String>,
}

#[derive(Clone)]
struct PlatformMock {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    status: StatusCode,
}

pub struct MockPlatform {
    pub base: String,
    pub sent: Arc<Mutex<Vec<SentMessage>>>,
    pub handle: JoinHandle<()>,
}

impl MockPlatform {
    pub fn messages(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }
}

/// Spin up a mock chat platform recording sendMessage calls.
pub async fn start_platform(status: StatusCode) -> MockPlatform {
    async fn send_message(
        State(mock): State<PlatformMock>,
        UrlPath(bot_segment): UrlPath<String>,
        Form(form): Form<HashMap<String, String>>,
    ) -> (StatusCode, Json<serde_json::Value>) {
        mock.sent
            .lock()
            .unwrap()
            .push(SentMessage { bot_segment, form });
        let ok = mock.status.is_success();
        (mock.status, Json(serde_json::json!({ "ok": ok })))
    }
    let sent = Arc::new(Mutex::new(Vec::new()));
    let mock = PlatformMock {
        sent: sent.clone(),
        status,
    };
    let app = Router::new()
        .route("/:bot/sendMessage", post(send_message))
        .with_state(mock);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    MockPlatform {
        base: format!("http://{}", addr),
        sent,
        handle,
    }
}

pub fn write_knowledge(dir: &Path) {
    let doc = serde_json::json!({
        "name": "David",
        "job": "software engineer",
        "city": "Cluj-Napoca"
    });
    std::fs::write(dir.join("knowledge.json"), doc.to_string()).unwrap();
}

/// Configuration pointing every file into `dir` and both outbound calls at
/// the given mocks.
pub fn test_config(dir: &Path, completions_url: &str, platform_base: &str, ranges: &str) -> AppConfig {
    AppConfig {
        bot_token: BOT_TOKEN.to_string(),
        api_key: API_KEY.to_string(),
        allowed_ranges: ranges
            .split(',')
            .map(|r| r.trim().parse().unwrap())
            .collect(),
        knowledge_file: dir.join("knowledge.json").display().to_string(),
        question_log_file: dir.join("logs.json").display().to_string(),
        security_log_file: dir.join("security_log.txt").display().to_string(),
        max_text_chars: 500,
        completions_url: completions_url.to_string(),
        model: "test/model".to_string(),
        max_tokens: 500,
        upstream_timeout_ms: 2_000,
        telegram_api: platform_base.to_string(),
        webhook_path: "/webhook".to_string(),
        max_request_bytes: None,
        rotation: RotationConfig::default(),
    }
}

pub fn update_body(chat_id: i64, text: &str) -> String {
    serde_json::json!({
        "update_id": 10001,
        "message": {
            "message_id": 42,
            "from": {"id": chat_id, "is_bot": false, "first_name": "Ana"},
            "chat": {"id": chat_id, "type": "private"},
            "date": 1700000000,
            "text": text
        }
    })
    .to_string()
}

/// Serve the relay on loopback with real peer addresses.
pub async fn spawn_relay(state: kbrelay::AppState) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = kbrelay::app(state);
    let handle = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    (format!("http://{}", addr), handle)
}
