use super::models::{ChatMessage, Model, Usage};
use crate::config::Config;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// OpenRouter direct API URL (BYOK mode)
const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Rate limit retry configuration. These retries live below the `complete`
/// contract; pipeline steps still treat any error as "no answer".
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_SECS: u64 = 2;
const BACKOFF_MULTIPLIER: u64 = 2;

/// Completion endpoint the pipeline talks to.
///
/// One call, one answer string. Implementations must observe the
/// cancellation token at their await points.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        model: Model,
        messages: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> anyhow::Result<String>;
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[allow(dead_code)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    content: String,
}

/// Production client speaking the OpenRouter chat-completions API.
pub struct OpenRouterClient {
    api_key: String,
    http: reqwest::Client,
}

impl OpenRouterClient {
    pub fn new(api_key: String) -> Self {
        Self { api_key, http: reqwest::Client::new() }
    }

    /// Build a client from the on-disk config, if a key is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        config.get_api_key().map(Self::new)
    }
}

/// Extract a retry-after hint from a rate-limit response body, if present.
fn parse_retry_after(text: &str) -> Option<u64> {
    let text_lower = text.to_lowercase();
    if let Some(pos) = text_lower.find("retry") {
        let after_retry = &text_lower[pos..];
        for word in after_retry.split_whitespace().skip(1).take(5) {
            if let Ok(secs) = word.trim_matches(|c: char| !c.is_numeric()).parse::<u64>() {
                if secs > 0 && secs < 300 {
                    return Some(secs);
                }
            }
        }
    }
    None
}

#[async_trait]
impl CompletionClient for OpenRouterClient {
    async fn complete(
        &self,
        model: Model,
        messages: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> anyhow::Result<String> {
        let request = ChatRequest {
            model: model.id().to_string(),
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens: model.max_tokens(),
            stream: false,
        };

        let mut retry_count = 0;

        loop {
            if cancel.is_cancelled() {
                anyhow::bail!("completion request cancelled");
            }

            let send = self
                .http
                .post(OPENROUTER_URL)
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&request)
                .send();

            let response = tokio::select! {
                _ = cancel.cancelled() => anyhow::bail!("completion request cancelled"),
                resp = send => resp?,
            };

            let status = response.status();
            let text = tokio::select! {
                _ = cancel.cancelled() => anyhow::bail!("completion request cancelled"),
                body = response.text() => body?,
            };

            if status.is_success() {
                let parsed: ChatResponse = serde_json::from_str(&text).map_err(|e| {
                    anyhow::anyhow!("Failed to parse completion response: {}\n{}", e, text)
                })?;

                return Ok(parsed
                    .choices
                    .first()
                    .map(|c| c.message.content.clone())
                    .unwrap_or_default());
            }

            if status.as_u16() == 429 && retry_count < MAX_RETRIES {
                retry_count += 1;
                let retry_after = parse_retry_after(&text)
                    .unwrap_or_else(|| INITIAL_BACKOFF_SECS * BACKOFF_MULTIPLIER.pow(retry_count - 1));
                tracing::warn!(
                    "rate limited, retrying in {retry_after}s (attempt {retry_count}/{MAX_RETRIES})"
                );
                tokio::select! {
                    _ = cancel.cancelled() => anyhow::bail!("completion request cancelled"),
                    _ = tokio::time::sleep(tokio::time::Duration::from_secs(retry_after)) => {}
                }
                continue;
            }

            let error_msg = match status.as_u16() {
                401 => "Invalid API key. Run 'scriptsmith --setup' to update it.".to_string(),
                429 => format!("Rate limited after {} retries. Try again in a few minutes.", retry_count),
                500..=599 => format!(
                    "Completion server error ({}). The service may be temporarily unavailable.",
                    status
                ),
                _ => format!("API error {}: {}", status, truncate_str(&text, 200)),
            };
            anyhow::bail!("{}", error_msg);
        }
    }
}

/// Truncate a string for display (Unicode-safe)
pub(crate) fn truncate_str(s: &str, max_chars: usize) -> &str {
    if s.chars().count() <= max_chars {
        s
    } else {
        let byte_idx = s
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        &s[..byte_idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after_extracts_seconds() {
        assert_eq!(parse_retry_after("please retry after 30 seconds"), Some(30));
        assert_eq!(parse_retry_after("no hint in this body"), None);
    }

    #[test]
    fn test_parse_retry_after_ignores_out_of_range() {
        assert_eq!(parse_retry_after("retry after 100000 seconds"), None);
    }

    #[test]
    fn test_truncate_str_unicode_safe() {
        assert_eq!(truncate_str("héllo wörld", 5), "héllo");
        assert_eq!(truncate_str("short", 100), "short");
    }
}
