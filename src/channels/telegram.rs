//! Telegram channel — long-polls the Bot API for updates.
//!
//! Native Rust Telegram Bot API implementation: plain-text `sendMessage`,
//! inline keyboards for affordances, and callback queries for button presses.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::channels::{Affordance, Channel, EventKind, EventStream, InboundEvent};
use crate::error::ChannelError;

/// Maximum message length for Telegram's sendMessage API.
const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Long-poll timeout passed to getUpdates, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Pause before polling again after a failed getUpdates.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Telegram channel — connects to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: SecretString,
    allowed_users: Vec<String>,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: SecretString, allowed_users: Vec<String>) -> Self {
        Self {
            bot_token,
            allowed_users,
            api_base: TELEGRAM_API_BASE.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the channel at a different Bot API server (local Bot API, tests).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn api_url(&self, method: &str) -> String {
        bot_api_url(&self.api_base, &self.bot_token, method)
    }

    /// Send a text message, splitting anything over Telegram's 4096 char
    /// limit. Buttons go on the last chunk.
    async fn send_message(
        &self,
        chat_id: &str,
        text: &str,
        affordances: &[Affordance],
    ) -> Result<(), ChannelError> {
        let chunks = split_message(text, TELEGRAM_MAX_MESSAGE_LENGTH);
        let last = chunks.len().saturating_sub(1);

        for (i, chunk) in chunks.iter().enumerate() {
            let buttons = if i == last { affordances } else { &[] };
            self.send_message_chunk(chat_id, chunk, buttons).await?;
        }
        Ok(())
    }

    /// Send a single message chunk (≤4096 chars) as plain text.
    async fn send_message_chunk(
        &self,
        chat_id: &str,
        text: &str,
        affordances: &[Affordance],
    ) -> Result<(), ChannelError> {
        let body = send_message_body(chat_id, text, affordances);

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: format!("sendMessage returned {status}: {err}"),
            });
        }

        Ok(())
    }
}

// ── Channel trait implementation ────────────────────────────────────

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<EventStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let api_base = self.api_base.clone();
        let bot_token = self.bot_token.clone();
        let allowed_users = self.allowed_users.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            let url = bot_api_url(&api_base, &bot_token, "getUpdates");

            tracing::info!("Telegram channel listening for messages...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message", "callback_query"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                let status = resp.status();
                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!(%status, "Telegram parse error: {e}");
                        tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                        continue;
                    }
                };

                let Some(results) = poll_results(status, &data) else {
                    tracing::warn!(
                        %status,
                        description = data
                            .get("description")
                            .and_then(serde_json::Value::as_str)
                            .unwrap_or("none"),
                        "Telegram getUpdates rejected"
                    );
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    continue;
                };

                for update in results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(parsed) = parse_update(update) else {
                        continue;
                    };

                    if let Some(ref callback_id) = parsed.callback_query_id {
                        let ack = client
                            .post(bot_api_url(&api_base, &bot_token, "answerCallbackQuery"))
                            .json(&serde_json::json!({ "callback_query_id": callback_id }))
                            .send()
                            .await;
                        if let Err(e) = ack {
                            tracing::warn!("Telegram answerCallbackQuery failed: {e}");
                        }
                    }

                    let identities = parsed.identities();
                    if !check_user_allowed(&allowed_users, identities.iter().copied()) {
                        tracing::warn!(
                            "Telegram: ignoring update from unauthorized user: \
                             username={}, user_id={}",
                            parsed.username.as_deref().unwrap_or("unknown"),
                            parsed.event.user_id
                        );
                        continue;
                    }

                    if tx.send(parsed.event).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn send_text(
        &self,
        chat_id: &str,
        text: &str,
        affordances: &[Affordance],
    ) -> Result<(), ChannelError> {
        if chat_id.is_empty() {
            return Err(ChannelError::SendFailed {
                name: "telegram".into(),
                reason: "No chat_id for outbound message".into(),
            });
        }
        self.send_message(chat_id, text, affordances).await
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: "telegram".into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }

    async fn shutdown(&self) -> Result<(), ChannelError> {
        tracing::info!("Telegram channel shutting down");
        Ok(())
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn bot_api_url(api_base: &str, bot_token: &SecretString, method: &str) -> String {
    format!("{api_base}/bot{}/{method}", bot_token.expose_secret())
}

/// The update list of a successful getUpdates reply, or `None` when the
/// Bot API refused the call (`ok: false`, non-2xx, or no `result`).
fn poll_results(status: reqwest::StatusCode, data: &Value) -> Option<&Vec<Value>> {
    if !status.is_success() || data.get("ok").and_then(Value::as_bool) != Some(true) {
        return None;
    }
    data.get("result").and_then(Value::as_array)
}

/// An update turned into an event, plus what the poller needs around it.
#[derive(Debug)]
struct ParsedUpdate {
    event: InboundEvent,
    username: Option<String>,
    /// Set for button presses; the query must be acknowledged.
    callback_query_id: Option<String>,
}

impl ParsedUpdate {
    fn identities(&self) -> Vec<&str> {
        let mut ids = vec![self.event.user_id.as_str()];
        if let Some(ref name) = self.username {
            ids.push(name.as_str());
        }
        ids
    }
}

/// Turn one getUpdates entry into an event. Updates that carry neither text
/// nor callback data are skipped.
fn parse_update(update: &Value) -> Option<ParsedUpdate> {
    if let Some(query) = update.get("callback_query") {
        let callback_id = query.get("id").and_then(Value::as_str)?;
        let from = query.get("from")?;
        let user_id = from.get("id").and_then(Value::as_i64)?;
        let data = query.get("data").and_then(Value::as_str)?;
        // Fall back to the user's private chat if the button message is gone.
        let chat_id = query
            .get("message")
            .and_then(|m| m.get("chat"))
            .and_then(|c| c.get("id"))
            .and_then(Value::as_i64)
            .unwrap_or(user_id);

        return Some(ParsedUpdate {
            event: InboundEvent::new(
                user_id.to_string(),
                chat_id.to_string(),
                EventKind::Trigger(data.to_string()),
            ),
            username: username_of(from),
            callback_query_id: Some(callback_id.to_string()),
        });
    }

    let message = update.get("message")?;
    let text = message.get("text").and_then(Value::as_str)?;
    let from = message.get("from")?;
    let user_id = from.get("id").and_then(Value::as_i64)?;
    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)?;

    Some(ParsedUpdate {
        event: InboundEvent::new(
            user_id.to_string(),
            chat_id.to_string(),
            EventKind::from_text(text),
        ),
        username: username_of(from),
        callback_query_id: None,
    })
}

fn username_of(from: &Value) -> Option<String> {
    from.get("username")
        .and_then(Value::as_str)
        .map(String::from)
}

/// Build a sendMessage body. Affordances become an inline keyboard with one
/// button per row.
fn send_message_body(chat_id: &str, text: &str, affordances: &[Affordance]) -> Value {
    let mut body = serde_json::json!({
        "chat_id": chat_id,
        "text": text,
    });

    if !affordances.is_empty() {
        let rows: Vec<Value> = affordances
            .iter()
            .map(|a| {
                serde_json::json!([{
                    "text": a.label,
                    "callback_data": a.trigger,
                }])
            })
            .collect();
        body["reply_markup"] = serde_json::json!({ "inline_keyboard": rows });
    }

    body
}

/// Check if any identity in the iterator matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

/// Split a message into chunks of at most `max_chars` characters.
/// Tries to split on newlines, then spaces, then hard-cuts.
fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        // Byte offset just past the first `max_chars` characters.
        let Some((limit, _)) = remaining.char_indices().nth(max_chars) else {
            chunks.push(remaining.to_string());
            break;
        };

        let window = &remaining[..limit];
        let split_at = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .unwrap_or(limit);

        // Don't split at position 0 (infinite loop guard)
        let split_at = if split_at == 0 { limit } else { split_at };

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}

// ── Tests ───────────────────────────────────────────────────────────
