//! LLM transport for consolidation calls.
//!
//! Speaks the OpenAI-compatible `/chat/completions` shape so any
//! drop-in-compatible endpoint works via `provider.base_url`.

use crate::config::ProviderConfig;
use crate::{MulchError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

/// Request timeout for a single completion call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Attempts per call, counting the first
const MAX_ATTEMPTS: u32 = 3;

/// Base delay between retries, multiplied by the attempt number
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// A chat completion endpoint.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send one system+user exchange, return the assistant text.
    async fn chat(&self, system: &str, user: &str) -> Result<String>;
}

/// OpenAI-compatible HTTP provider.
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiProvider {
    /// Build a provider from config. The API key comes from the environment
    /// variable named in `config.api_key_env`.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            MulchError::Provider(format!(
                "environment variable {} is not set",
                config.api_key_env
            ))
        })?;

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MulchError::Provider(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn is_retryable_status(status: reqwest::StatusCode) -> bool {
        status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    fn extract_content(body: &Value) -> Result<String> {
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                MulchError::Provider(format!(
                    "unexpected response shape: {}",
                    serde_json::to_string(body).unwrap_or_default()
                ))
            })
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let mut last_error = None;
        for attempt in 1..=MAX_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(RETRY_BASE_DELAY * attempt).await;
            }

            let response = match self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!("LLM request failed (attempt {}/{}): {}", attempt, MAX_ATTEMPTS, e);
                    last_error = Some(MulchError::Provider(e.to_string()));
                    continue;
                }
            };

            let status = response.status();
            if Self::is_retryable_status(status) {
                warn!(
                    "LLM endpoint returned {} (attempt {}/{})",
                    status, attempt, MAX_ATTEMPTS
                );
                last_error = Some(MulchError::Provider(format!("HTTP {}", status)));
                continue;
            }
            if !status.is_success() {
                let detail = response.text().await.unwrap_or_default();
                return Err(MulchError::Provider(format!("HTTP {}: {}", status, detail)));
            }

            let completion: Value = response
                .json()
                .await
                .map_err(|e| MulchError::Provider(e.to_string()))?;
            return Self::extract_content(&completion);
        }

        Err(last_error
            .unwrap_or_else(|| MulchError::Provider("request retries exhausted".into())))
    }
}
