use anyhow::{bail, Result};

pub const SESSIONS_KEY: &str = "chatpro_sessions";
pub const ACTIVE_ID_KEY: &str = "chatpro_active_id";
pub const USER_KEY: &str = "chatpro_user";

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const SYSTEM_INSTRUCTION: &str = "You are a helpful, precise assistant. \
Answer in Markdown. Put code in fenced code blocks tagged with their language. \
When web search results are available, ground your answer in them.";

/// Sent in place of an empty prompt when the turn carries a voice recording.
pub const TRANSCRIBE_PROMPT: &str = "Please transcribe and respond to this voice message.";

/// Shown in place of a turn whose stream failed.
pub const APOLOGY_MESSAGE: &str = "Error: I'm having trouble processing your request right now.";

pub const FLASH_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Conversation titles are cut to this many characters of the first prompt.
pub const TITLE_MAX_CHARS: usize = 40;

pub fn enhance_prompt(prompt: &str) -> String {
    format!("Refine and improve this prompt for better AI output, then answer it: \"{prompt}\"")
}

/// Sampling temperature for a model id: flash models run cooler.
pub fn temperature_for(model: &str) -> f32 {
    if model.contains("flash") {
        FLASH_TEMPERATURE
    } else {
        DEFAULT_TEMPERATURE
    }
}

#[derive(Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: Option<String>,
}

impl ProviderConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("GEMINI_API_KEY")
            .or_else(|| lookup("API_KEY"))
            .filter(|k| !k.trim().is_empty());

        let Some(api_key) = api_key else {
            bail!("No API key configured: set GEMINI_API_KEY or API_KEY");
        };

        Ok(Self {
            api_key,
            base_url: lookup("GEMINI_BASE_URL").filter(|u| !u.trim().is_empty()),
        })
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &"***")
            .field("base_url", &self.base_url)
            .finish()
    }
}
