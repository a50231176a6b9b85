//! Integration tests for the Telegram channel and the full bot loop.
//!
//! A single Axum server plays both the Bot API (getUpdates, sendMessage,
//! answerCallbackQuery, getMe) and the GigaChat endpoints, so the last test
//! can walk a user from /start to a finished plan over real HTTP.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use plan_assist::bot::Bot;
use plan_assist::channels::{Affordance, Channel, Command, EventKind, TelegramChannel};
use plan_assist::config::GigaChatConfig;
use plan_assist::dialog::engine::{ASK_ENVIRONMENT, ASK_TASK, GREETING, OFFER_NEW_TASK, PLAN_LABEL};
use plan_assist::dialog::{DialogDeps, DialogEngine, SessionStore, TracingErrorObserver};
use plan_assist::error::ChannelError;
use plan_assist::llm::create_provider;
use plan_assist::planner::{GeneratorConfig, PlanGenerator};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

const BOT_TOKEN: &str = "123456-TESTTOKEN";

const CANDLE_PLAN: &str = "1. Подойти к столу\n2. Зажечь свечу";

#[derive(Default)]
struct StubState {
    /// Batches handed out by successive getUpdates calls.
    batches: Mutex<VecDeque<Vec<Value>>>,
    /// Status for getUpdates; anything but 200 answers with an `ok: false` body.
    poll_status: Mutex<StatusCode>,
    offsets: Mutex<Vec<i64>>,
    sent: Mutex<Vec<Value>>,
    answered: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
}

async fn get_updates(State(state): State<Arc<StubState>>, Json(body): Json<Value>) -> Response {
    if let Some(offset) = body["offset"].as_i64() {
        state.offsets.lock().unwrap().push(offset);
    }
    let status = *state.poll_status.lock().unwrap();
    if status != StatusCode::OK {
        return (
            status,
            Json(json!({
                "ok": false,
                "error_code": status.as_u16(),
                "description": "Conflict: terminated by other getUpdates request"
            })),
        )
            .into_response();
    }
    let batch = state.batches.lock().unwrap().pop_front();
    let result = match batch {
        Some(batch) => batch,
        None => {
            // Stand in for the long poll so the client doesn't spin.
            tokio::time::sleep(Duration::from_millis(50)).await;
            Vec::new()
        }
    };
    Json(json!({"ok": true, "result": result})).into_response()
}

async fn send_message(State(state): State<Arc<StubState>>, Json(body): Json<Value>) -> Response {
    if body["chat_id"] == "0" {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"ok": false, "description": "Bad Request: chat not found"})),
        )
            .into_response();
    }
    state.sent.lock().unwrap().push(body);
    Json(json!({"ok": true, "result": {}})).into_response()
}

async fn answer_callback(State(state): State<Arc<StubState>>, Json(body): Json<Value>) -> Response {
    let id = body["callback_query_id"].as_str().unwrap_or_default().to_string();
    state.answered.lock().unwrap().push(id);
    Json(json!({"ok": true, "result": true})).into_response()
}

async fn get_me() -> Response {
    Json(json!({"ok": true, "result": {"id": 1, "is_bot": true, "username": "plan_bot"}}))
        .into_response()
}

async fn oauth() -> Response {
    let expires_at = chrono::Utc::now().timestamp_millis() + 30 * 60 * 1000;
    Json(json!({"access_token": "tok", "expires_at": expires_at})).into_response()
}

async fn chat(State(state): State<Arc<StubState>>, Json(body): Json<Value>) -> Response {
    let prompt = body["messages"][0]["content"].as_str().unwrap_or_default().to_string();
    state.prompts.lock().unwrap().push(prompt);
    Json(json!({
        "choices": [{"message": {"role": "assistant", "content": CANDLE_PLAN}, "finish_reason": "stop"}]
    }))
    .into_response()
}

/// Start the stub server, return (base url, shared state).
async fn start_server() -> (String, Arc<StubState>) {
    let state = Arc::new(StubState::default());
    let bot = format!("/bot{BOT_TOKEN}");
    let app = Router::new()
        .route(&format!("{bot}/getUpdates"), post(get_updates))
        .route(&format!("{bot}/sendMessage"), post(send_message))
        .route(&format!("{bot}/answerCallbackQuery"), post(answer_callback))
        .route(&format!("{bot}/getMe"), get(get_me))
        .route("/api/v2/oauth", post(oauth))
        .route("/api/v1/chat/completions", post(chat))
        .with_state(Arc::clone(&state));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://127.0.0.1:{port}"), state)
}

fn channel(base: &str, allowed: &[&str]) -> TelegramChannel {
    TelegramChannel::new(
        SecretString::from(BOT_TOKEN.to_string()),
        allowed.iter().map(|s| s.to_string()).collect(),
    )
    .with_api_base(base)
}

fn message(update_id: i64, user_id: i64, username: &str, text: &str) -> Value {
    json!({
        "update_id": update_id,
        "message": {
            "message_id": update_id,
            "from": {"id": user_id, "is_bot": false, "first_name": "T", "username": username},
            "chat": {"id": user_id, "type": "private"},
            "date": 0,
            "text": text
        }
    })
}

fn button_press(update_id: i64, user_id: i64, callback_id: &str, data: &str) -> Value {
    json!({
        "update_id": update_id,
        "callback_query": {
            "id": callback_id,
            "from": {"id": user_id, "is_bot": false, "first_name": "T"},
            "message": {"message_id": 1, "chat": {"id": user_id, "type": "private"}, "date": 0},
            "data": data
        }
    })
}

/// Poll `check` until it holds; the surrounding TEST_TIMEOUT bounds the wait.
async fn wait_until(check: impl Fn() -> bool) {
    while !check() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn start_yields_allowed_updates_in_order() {
    timeout(TEST_TIMEOUT, async {
        let (base, state) = start_server().await;
        state.batches.lock().unwrap().push_back(vec![
            message(10, 42, "alice", "/start"),
            button_press(11, 42, "cb-1", "new_task"),
            message(12, 99, "mallory", "let me in"),
            message(13, 42, "alice", "Комната со столом"),
        ]);

        let channel = channel(&base, &["42"]);
        let mut events = channel.start().await.unwrap();

        let first = events.next().await.unwrap();
        assert_eq!(first.user_id.as_str(), "42");
        assert_eq!(first.chat_id, "42");
        assert_eq!(first.kind, EventKind::Command(Command::Start));

        let second = events.next().await.unwrap();
        assert_eq!(second.kind, EventKind::Trigger("new_task".to_string()));

        // The update from user 99 is dropped by the allowlist.
        let third = events.next().await.unwrap();
        assert_eq!(third.user_id.as_str(), "42");
        assert_eq!(third.kind, EventKind::Text("Комната со столом".to_string()));

        assert_eq!(*state.answered.lock().unwrap(), vec!["cb-1".to_string()]);

        // The next poll acknowledges everything up to update 13.
        wait_until(|| state.offsets.lock().unwrap().contains(&14)).await;
        assert_eq!(state.offsets.lock().unwrap()[0], 0);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rejected_poll_backs_off_then_recovers() {
    timeout(TEST_TIMEOUT, async {
        let (base, state) = start_server().await;
        *state.poll_status.lock().unwrap() = StatusCode::CONFLICT;

        let channel = channel(&base, &["*"]);
        let mut events = channel.start().await.unwrap();

        // Nothing arrives while the Bot API keeps refusing, and the poller
        // waits between attempts instead of hammering it.
        let quiet = timeout(Duration::from_secs(1), events.next()).await;
        assert!(quiet.is_err());
        let attempts = state.offsets.lock().unwrap().len();
        assert!((1..=2).contains(&attempts), "getUpdates called {attempts} times");

        *state.poll_status.lock().unwrap() = StatusCode::OK;
        state
            .batches
            .lock()
            .unwrap()
            .push_back(vec![message(5, 42, "alice", "снова работаем")]);

        let event = events.next().await.unwrap();
        assert_eq!(event.kind, EventKind::Text("снова работаем".to_string()));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn allowlist_matches_username() {
    timeout(TEST_TIMEOUT, async {
        let (base, state) = start_server().await;
        state.batches.lock().unwrap().push_back(vec![
            message(1, 7, "bob", "hello"),
            message(2, 8, "alice", "hi there"),
        ]);

        let channel = channel(&base, &["alice"]);
        let mut events = channel.start().await.unwrap();

        let event = events.next().await.unwrap();
        assert_eq!(event.user_id.as_str(), "8");
        assert_eq!(event.kind, EventKind::Text("hi there".to_string()));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn send_text_attaches_keyboard_only_when_asked() {
    timeout(TEST_TIMEOUT, async {
        let (base, state) = start_server().await;
        let channel = channel(&base, &["*"]);

        channel.send_text("42", "plain", &[]).await.unwrap();
        channel
            .send_text("42", "with button", &[Affordance::new_task()])
            .await
            .unwrap();

        let sent = state.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["chat_id"], "42");
        assert_eq!(sent[0]["text"], "plain");
        assert!(sent[0].get("reply_markup").is_none());

        let button = &sent[1]["reply_markup"]["inline_keyboard"][0][0];
        assert_eq!(button["text"], "Новая задача");
        assert_eq!(button["callback_data"], "new_task");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn long_reply_is_split_with_buttons_on_last_chunk() {
    timeout(TEST_TIMEOUT, async {
        let (base, state) = start_server().await;
        let channel = channel(&base, &["*"]);

        let text = "шаг ".repeat(1500);
        channel
            .send_text("42", &text, &[Affordance::new_task()])
            .await
            .unwrap();

        let sent = state.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].get("reply_markup").is_none());
        assert!(sent[1].get("reply_markup").is_some());
        let total: usize = sent
            .iter()
            .map(|b| b["text"].as_str().unwrap().chars().count())
            .sum();
        assert!(total <= text.chars().count());
        assert!(sent.iter().all(|b| b["text"].as_str().unwrap().chars().count() <= 4096));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rejected_send_is_send_failed() {
    timeout(TEST_TIMEOUT, async {
        let (base, _state) = start_server().await;
        let channel = channel(&base, &["*"]);

        let err = channel.send_text("0", "hello", &[]).await.unwrap_err();
        assert!(matches!(err, ChannelError::SendFailed { .. }));

        let err = channel.send_text("", "hello", &[]).await.unwrap_err();
        assert!(matches!(err, ChannelError::SendFailed { .. }));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn health_check_calls_get_me() {
    timeout(TEST_TIMEOUT, async {
        let (base, _state) = start_server().await;
        channel(&base, &["*"]).health_check().await.unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let err = channel(&format!("http://127.0.0.1:{port}"), &["*"])
            .health_check()
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::StartupFailed { .. }));
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn full_dialog_produces_a_plan() {
    timeout(TEST_TIMEOUT, async {
        let (base, state) = start_server().await;
        state.batches.lock().unwrap().extend([
            vec![message(1, 42, "alice", "/start")],
            vec![button_press(2, 42, "cb-1", "new_task")],
            vec![message(3, 42, "alice", "Вы в комнате, на столе свеча и спички.")],
            vec![message(4, 42, "alice", "Зажги свечу")],
        ]);

        let gigachat = GigaChatConfig {
            credentials: SecretString::from("a2V5".to_string()),
            scope: "GIGACHAT_API_PERS".to_string(),
            model: "GigaChat:latest".to_string(),
            verify_ssl_certs: false,
            auth_url: format!("{base}/api/v2/oauth"),
            api_url: format!("{base}/api/v1"),
        };
        let generator = Arc::new(PlanGenerator::new(
            create_provider(&gigachat).unwrap(),
            GeneratorConfig::default(),
        ));

        let telegram: Arc<dyn Channel> = Arc::new(channel(&base, &["*"]));
        let store = Arc::new(SessionStore::new());
        let engine = Arc::new(DialogEngine::new(DialogDeps {
            store: Arc::clone(&store),
            generator,
            outbox: Arc::clone(&telegram),
            observer: Arc::new(TracingErrorObserver),
        }));

        let bot = tokio::spawn(Bot::new(telegram, Arc::clone(&engine)).run());

        wait_until(|| state.sent.lock().unwrap().len() >= 6).await;
        // The session is cleared right after the last reply goes out.
        while !engine.session(&"42".into()).await.is_idle() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        bot.abort();

        let texts: Vec<String> = state
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|b| b["text"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(
            texts,
            vec![
                GREETING.to_string(),
                ASK_ENVIRONMENT.to_string(),
                ASK_TASK.to_string(),
                PLAN_LABEL.to_string(),
                CANDLE_PLAN.to_string(),
                OFFER_NEW_TASK.to_string(),
            ]
        );

        let prompts = state.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Вы в комнате, на столе свеча и спички.\nЗадание: Зажги свечу"));
        assert_eq!(store.len().await, 1);
    })
    .await
    .expect("test timed out");
}
