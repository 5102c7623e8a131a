use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::{BackendConfig, BackendError, ConfigError, Role, RoleClient};

const REFERER: &str = "https://github.com/silvabyte/remedy";
const TITLE: &str = "remedy";

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

/// Role client backed by an OpenAI-compatible chat-completions endpoint
/// (OpenRouter by default)
pub struct OpenRouterClient {
    client: reqwest::Client,
    config: BackendConfig,
}

impl OpenRouterClient {
    pub fn new(config: BackendConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| ConfigError::Invalid("API key contains invalid characters".into()))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("HTTP-Referer", HeaderValue::from_static(REFERER));
        headers.insert("X-Title", HeaderValue::from_static(TITLE));

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }

    fn map_send_error(&self, e: reqwest::Error) -> BackendError {
        if e.is_timeout() {
            BackendError::Timeout(self.config.timeout)
        } else {
            BackendError::Network(e.to_string())
        }
    }

    fn extract_content(body: &serde_json::Value) -> Result<String, BackendError> {
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                BackendError::MalformedResponse("missing choices[0].message.content".to_string())
            })
    }

    fn error_message(body: &str) -> String {
        serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
            .unwrap_or_else(|| body.chars().take(500).collect())
    }
}

#[async_trait]
impl RoleClient for OpenRouterClient {
    async fn invoke(&self, role: Role, prompt: &str) -> Result<String, BackendError> {
        let model = self.config.model_for(role);
        let request = ChatRequest {
            model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: role.system_instruction(),
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        debug!(role = %role, model, prompt_len = prompt.len(), "Invoking backend");
        let start = Instant::now();

        let response = self
            .client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_retry_after(v, Utc::now()));
            return Err(BackendError::RateLimited { retry_after });
        }

        let text = response.text().await.map_err(|e| self.map_send_error(e))?;

        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                message: Self::error_message(&text),
            });
        }

        let body: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| BackendError::MalformedResponse(format!("invalid JSON body: {}", e)))?;
        let content = Self::extract_content(&body)?;

        debug!(
            role = %role,
            response_len = content.len(),
            duration_ms = start.elapsed().as_millis(),
            "Backend responded"
        );

        Ok(content)
    }

    fn model_for(&self, role: Role) -> &str {
        self.config.model_for(role)
    }
}

/// `Retry-After` is either delay-seconds or an HTTP-date; a date in the past means retry now
fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
