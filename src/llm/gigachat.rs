//! GigaChat provider — OAuth token exchange plus chat completions over REST.
//!
//! The provider issues short-lived access tokens in exchange for a long-lived
//! authorization key. Tokens are cached and refreshed shortly before expiry.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::GigaChatConfig;
use crate::error::LlmError;
use crate::llm::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider,
};

pub const DEFAULT_AUTH_URL: &str = "https://ngw.devices.sberbank.ru:9443/api/v2/oauth";
pub const DEFAULT_API_URL: &str = "https://gigachat.devices.sberbank.ru/api/v1";
pub const DEFAULT_SCOPE: &str = "GIGACHAT_API_PERS";
pub const DEFAULT_MODEL: &str = "GigaChat:latest";

const PROVIDER: &str = "gigachat";

/// Refresh the token this long before the provider says it expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Transport-level timeout for a single HTTP request.
const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Unix time in milliseconds.
    expires_at: i64,
}

#[derive(Debug, Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    profanity_check: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponseBody {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// A cached access token.
struct AccessToken {
    value: SecretString,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let margin = chrono::Duration::from_std(TOKEN_REFRESH_MARGIN)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        now + margin < self.expires_at
    }
}

/// GigaChat REST client.
pub struct GigaChatClient {
    client: reqwest::Client,
    credentials: SecretString,
    scope: String,
    model: String,
    auth_url: String,
    api_url: String,
    token: Mutex<Option<AccessToken>>,
}

impl GigaChatClient {
    /// Build a client. Certificate verification follows `config.verify_ssl_certs`.
    pub fn new(config: &GigaChatConfig) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .danger_accept_invalid_certs(!config.verify_ssl_certs)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            credentials: config.credentials.clone(),
            scope: config.scope.clone(),
            model: config.model.clone(),
            auth_url: config.auth_url.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token: Mutex::new(None),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_url)
    }

    /// Return a valid bearer token, exchanging credentials if needed.
    async fn access_token(&self) -> Result<String, LlmError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.value.expose_secret().to_string());
            }
        }

        let fresh = self.request_token().await?;
        let value = fresh.value.expose_secret().to_string();
        *cached = Some(fresh);
        Ok(value)
    }

    async fn request_token(&self) -> Result<AccessToken, LlmError> {
        tracing::debug!(url = %self.auth_url, "Requesting GigaChat access token");

        let resp = self
            .client
            .post(&self.auth_url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Basic {}", self.credentials.expose_secret()),
            )
            .header("RqUID", Uuid::new_v4().to_string())
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[("scope", self.scope.as_str())])
            .send()
            .await
            .map_err(request_failed)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, resp.text().await.unwrap_or_default()));
        }

        let body = resp.text().await.map_err(request_failed)?;
        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: format!("token response: {e}"),
            })?;

        let expires_at = Utc
            .timestamp_millis_opt(parsed.expires_at)
            .single()
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: format!("token expiry out of range: {}", parsed.expires_at),
            })?;

        Ok(AccessToken {
            value: SecretString::from(parsed.access_token),
            expires_at,
        })
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }
}

#[async_trait]
impl LlmProvider for GigaChatClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let token = self.access_token().await?;

        let body = ChatRequestBody {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            top_p: request.top_p,
            profanity_check: false,
        };

        let resp = self
            .client
            .post(self.completions_url())
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(request_failed)?;

        let status = resp.status();
        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                self.invalidate_token().await;
            }
            return Err(status_error(status, resp.text().await.unwrap_or_default()));
        }

        let raw = resp.text().await.map_err(request_failed)?;
        let parsed: ChatResponseBody =
            serde_json::from_str(&raw).map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        let usage = parsed.usage;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: "response has no choices".to_string(),
            })?;

        Ok(CompletionResponse {
            content: choice.message.content,
            input_tokens: usage.as_ref().map_or(0, |u| u.prompt_tokens),
            output_tokens: usage.as_ref().map_or(0, |u| u.completion_tokens),
            finish_reason: FinishReason::from_api(choice.finish_reason.as_deref()),
        })
    }
}

fn request_failed(e: reqwest::Error) -> LlmError {
    LlmError::RequestFailed {
        provider: PROVIDER.to_string(),
        reason: e.to_string(),
    }
}

fn status_error(status: StatusCode, body: String) -> LlmError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => LlmError::AuthFailed {
            provider: PROVIDER.to_string(),
        },
        StatusCode::TOO_MANY_REQUESTS => LlmError::RateLimited {
            provider: PROVIDER.to_string(),
        },
        _ => LlmError::RequestFailed {
            provider: PROVIDER.to_string(),
            reason: format!("HTTP {status}: {body}"),
        },
    }
}
