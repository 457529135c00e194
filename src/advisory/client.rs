use super::credentials::{Credential, CredentialPool};
use crate::{AdvisorError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MIN_TIMEOUT_SECS: u64 = 30;
pub const MAX_TIMEOUT_SECS: u64 = 120;
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Outcome of one advisory call
#[derive(Debug, Clone, PartialEq)]
pub enum RawResult {
    /// Message text returned by the model
    Success(String),
    /// HTTP 429 for this credential
    RateLimited,
    Failure(String),
}

/// Transport to the advisory endpoint, one call per credential
#[async_trait]
pub trait AdvisoryTransport: Send + Sync {
    async fn request(&self, prompt: &str, credential: &Credential) -> RawResult;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    content: Option<String>,
}

/// OpenAI-compatible chat completions client (OpenRouter by default)
#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    api_url: String,
    model: String,
}

impl OpenRouterClient {
    /// Build a client; `timeout_secs` is clamped to 30..=120
    pub fn new(api_url: impl Into<String>, model: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let timeout = timeout_secs.clamp(MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS);
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            model: model.into(),
        })
    }

    async fn send(&self, prompt: &str, credential: &Credential) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(credential.expose())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AdvisorError::RateLimited);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AdvisorError::Api {
                status: status.as_u16(),
                body: text.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AdvisorError::MalformedResponse("response has no message content".into()))
    }
}

#[async_trait]
impl AdvisoryTransport for OpenRouterClient {
    async fn request(&self, prompt: &str, credential: &Credential) -> RawResult {
        match self.send(prompt, credential).await {
            Ok(text) => RawResult::Success(text),
            Err(AdvisorError::RateLimited) => RawResult::RateLimited,
            Err(e) => RawResult::Failure(e.to_string()),
        }
    }
}

/// Result of walking the credential pool
#[derive(Debug)]
pub struct FailoverOutcome {
    pub result: Result<String>,
    /// Number of credentials actually called
    pub attempts: usize,
    pub rate_limited: usize,
}

/// Call the endpoint with each enabled credential, starting at the pool cursor
///
/// Stops at the first success. The cursor is left on the slot after the last
/// credential tried, so the next refresh continues the round-robin.
pub async fn request_with_failover(
    transport: &dyn AdvisoryTransport,
    pool: &mut CredentialPool,
    prompt: &str,
) -> FailoverOutcome {
    let rotation = pool.rotation();
    if rotation.is_empty() {
        return FailoverOutcome {
            result: Err(AdvisorError::NoCredentials),
            attempts: 0,
            rate_limited: 0,
        };
    }

    let mut attempts = 0;
    let mut rate_limited = 0;
    let mut last_error = String::new();

    for (index, credential) in rotation {
        attempts += 1;
        let outcome = transport.request(prompt, &credential).await;
        pool.advance_past(index);

        match outcome {
            RawResult::Success(text) => {
                tracing::info!(credential = index, attempts, "Advisory request succeeded");
                return FailoverOutcome {
                    result: Ok(text),
                    attempts,
                    rate_limited,
                };
            }
            RawResult::RateLimited => {
                rate_limited += 1;
                last_error = format!("credential {} rate limited", index);
                tracing::warn!(credential = index, "Advisory credential rate limited, trying next");
            }
            RawResult::Failure(reason) => {
                tracing::warn!(credential = index, "Advisory request failed: {}", reason);
                last_error = reason;
            }
        }
    }

    let result = if rate_limited == attempts {
        Err(AdvisorError::RateLimited)
    } else {
        Err(AdvisorError::CredentialsExhausted {
            attempts,
            last_error,
        })
    };

    FailoverOutcome {
        result,
        attempts,
        rate_limited,
    }
}
