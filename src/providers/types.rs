use thiserror::Error;

use crate::models::{Citation, InlineData, Role};

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Quota exhausted (HTTP 429): retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Response blocked by safety filters")]
    SafetyBlock,

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    InlineData(InlineData),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl ChatMessage {
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text(t) => Some(t.as_str()),
                ContentPart::InlineData(_) => None,
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct ChatRequest {
    pub api_key: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
    pub use_search: bool,
}

impl std::fmt::Debug for ChatRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRequest")
            .field("api_key", &"***")
            .field("model", &self.model)
            .field("messages", &format!("[{} messages]", self.messages.len()))
            .field("base_url", &self.base_url)
            .field("temperature", &self.temperature)
            .field("system_prompt", &self.system_prompt)
            .field("use_search", &self.use_search)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// One partial response: its text delta and any grounding sources it carried.
    Delta {
        text: String,
        citations: Vec<Citation>,
    },
    Done {
        finish_reason: Option<String>,
    },
    Error(ProviderError),
}
