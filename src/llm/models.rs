use serde::Deserialize;

/// Model tiers used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Model {
    /// Speed tier - fast, cheap model for classification and fix rounds
    Speed,
    /// Smart tier - best reasoning for task breakdown and code synthesis
    Smart,
}

/// Maximum completion tokens for all tiers
const MODEL_MAX_TOKENS: u32 = 16384;

impl Model {
    pub fn id(&self) -> &'static str {
        match self {
            Model::Speed => "openai/gpt-oss-120b:nitro",
            Model::Smart => "anthropic/claude-sonnet-4.5:nitro",
        }
    }

    pub fn max_tokens(&self) -> u32 {
        MODEL_MAX_TOKENS
    }

    /// Prompt-side context budget. Assembled messages are trimmed from the
    /// tail until they fit under this limit.
    pub fn context_limit(&self) -> usize {
        match self {
            Model::Speed => 16_000,
            Model::Smart => 120_000,
        }
    }
}

/// Role tag on one chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One ordered, role-tagged message in a completion request.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// API usage information reported by the completion endpoint
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_ids() {
        assert!(Model::Speed.id().contains("gpt"));
        assert!(Model::Smart.id().contains("claude"));
    }

    #[test]
    fn test_context_limits_ordered_by_tier() {
        assert!(Model::Speed.context_limit() < Model::Smart.context_limit());
    }

    #[test]
    fn test_role_strings() {
        assert_eq!(Role::System.as_str(), "system");
        assert_eq!(Role::User.as_str(), "user");
        assert_eq!(Role::Assistant.as_str(), "assistant");
    }
}
