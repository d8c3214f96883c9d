use anyhow::{anyhow, bail, Result};

use super::markdown::{first_code_block, CodeSnippet};
use super::stream::TurnInput;
use crate::config::TITLE_MAX_CHARS;
use crate::models::{Conversation, Message, Role};

/// What a regeneration re-sends: the user turn before the regenerated one,
/// and the history that preceded that user turn.
#[derive(Debug, Clone)]
pub struct RegenerationPlan {
    pub truncate_to: usize,
    pub input: TurnInput,
    pub history: Vec<Message>,
}

/// Title for a conversation started by `input`.
pub fn derive_title(input: &TurnInput) -> String {
    let prompt = input.prompt.trim();
    if !prompt.is_empty() {
        truncate_title(prompt)
    } else if input.audio.is_some() {
        "Voice Message".to_string()
    } else {
        "New Discussion".to_string()
    }
}

/// Cut text to at most `TITLE_MAX_CHARS` characters.
pub fn truncate_title(text: &str) -> String {
    text.chars().take(TITLE_MAX_CHARS).collect()
}

pub fn matches_query(conversation: &Conversation, query: &str) -> bool {
    conversation
        .title
        .to_lowercase()
        .contains(&query.to_lowercase())
}

/// First code block of the latest finished assistant turn.
pub fn code_preview(conversation: &Conversation) -> Option<CodeSnippet> {
    conversation
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant && !m.is_streaming)
        .and_then(|m| first_code_block(&m.content))
}

/// Work out how to regenerate `message_id`.
///
/// The turn immediately before it must be a user turn; that turn's content
/// becomes the prompt again.
pub fn plan_regeneration(conversation: &Conversation, message_id: &str) -> Result<RegenerationPlan> {
    let index = conversation
        .message_index(message_id)
        .ok_or_else(|| anyhow!("Message not found"))?;

    let Some(user_index) = index.checked_sub(1) else {
        bail!("No preceding user message found");
    };
    let user_msg = &conversation.messages[user_index];
    if user_msg.role != Role::User {
        bail!("No preceding user message found");
    }

    Ok(RegenerationPlan {
        truncate_to: index,
        input: TurnInput {
            prompt: user_msg.content.clone(),
            images: user_msg.images.clone(),
            audio: user_msg.audio.clone(),
        },
        history: conversation.messages[..user_index].to_vec(),
    })
}
