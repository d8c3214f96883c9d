use thiserror::Error;

use super::conversation::{code_preview, matches_query};
use super::markdown::CodeSnippet;
use crate::models::{Citation, Conversation, Message};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Conversation {0} already has a streaming turn")]
    StreamInProgress(String),

    #[error("Message {0} is not streaming")]
    NotStreaming(String),

    #[error("Cannot truncate {len} messages to {to}")]
    TruncateOutOfRange { len: usize, to: usize },
}

/// All conversations plus the active selection, newest conversation first.
///
/// Every mutation goes through one of the methods below; each keeps turn
/// order, the one-streaming-turn rule and suffix-only truncation intact.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatStore {
    conversations: Vec<Conversation>,
    active_id: Option<String>,
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted state. An active id that names no
    /// conversation is dropped.
    pub fn from_parts(conversations: Vec<Conversation>, active_id: Option<String>) -> Self {
        let active_id = active_id.filter(|id| conversations.iter().any(|c| &c.id == id));
        Self {
            conversations,
            active_id,
        }
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn conversation(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    fn conversation_mut(&mut self, id: &str) -> Result<&mut Conversation, StoreError> {
        self.conversations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StoreError::ConversationNotFound(id.to_string()))
    }

    fn message_mut(
        &mut self,
        conversation_id: &str,
        message_id: &str,
    ) -> Result<&mut Message, StoreError> {
        self.conversation_mut(conversation_id)?
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| StoreError::MessageNotFound(message_id.to_string()))
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn active(&self) -> Option<&Conversation> {
        self.active_id.as_deref().and_then(|id| self.conversation(id))
    }

    /// Add a conversation at the top of the list and make it active.
    pub fn create_conversation(
        &mut self,
        title: impl Into<String>,
        model: impl Into<String>,
        use_search: bool,
    ) -> String {
        let conversation = Conversation::new(title, model, use_search);
        let id = conversation.id.clone();
        self.conversations.insert(0, conversation);
        self.active_id = Some(id.clone());
        id
    }

    pub fn set_active(&mut self, id: &str) -> Result<(), StoreError> {
        if self.conversation(id).is_none() {
            return Err(StoreError::ConversationNotFound(id.to_string()));
        }
        self.active_id = Some(id.to_string());
        Ok(())
    }

    pub fn clear_active(&mut self) {
        self.active_id = None;
    }

    pub fn set_title(&mut self, id: &str, title: impl Into<String>) -> Result<(), StoreError> {
        self.conversation_mut(id)?.title = title.into();
        Ok(())
    }

    pub fn append_turn(&mut self, conversation_id: &str, message: Message) -> Result<(), StoreError> {
        let conversation = self.conversation_mut(conversation_id)?;
        if message.is_streaming && conversation.streaming_message().is_some() {
            return Err(StoreError::StreamInProgress(conversation_id.to_string()));
        }
        conversation.messages.push(message);
        Ok(())
    }

    /// Keep the first `len` turns, returning the removed suffix.
    pub fn truncate(&mut self, conversation_id: &str, len: usize) -> Result<Vec<Message>, StoreError> {
        let conversation = self.conversation_mut(conversation_id)?;
        let current = conversation.messages.len();
        if len > current {
            return Err(StoreError::TruncateOutOfRange { len: current, to: len });
        }
        Ok(conversation.messages.split_off(len))
    }

    pub fn set_streaming(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        streaming: bool,
    ) -> Result<(), StoreError> {
        if streaming {
            let conversation = self
                .conversation(conversation_id)
                .ok_or_else(|| StoreError::ConversationNotFound(conversation_id.to_string()))?;
            if conversation
                .streaming_message()
                .is_some_and(|m| m.id != message_id)
            {
                return Err(StoreError::StreamInProgress(conversation_id.to_string()));
            }
        }
        self.message_mut(conversation_id, message_id)?.is_streaming = streaming;
        Ok(())
    }

    /// Replace the content and citations of a turn that is still streaming.
    pub fn update_streaming_content(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        content: String,
        citations: Vec<Citation>,
    ) -> Result<(), StoreError> {
        let message = self.message_mut(conversation_id, message_id)?;
        if !message.is_streaming {
            return Err(StoreError::NotStreaming(message_id.to_string()));
        }
        message.content = content;
        message.citations = citations;
        Ok(())
    }

    /// Flip the pin flag, returning the new state.
    pub fn toggle_pin(&mut self, conversation_id: &str, message_id: &str) -> Result<bool, StoreError> {
        let message = self.message_mut(conversation_id, message_id)?;
        message.is_pinned = !message.is_pinned;
        Ok(message.is_pinned)
    }

    pub fn delete_conversation(&mut self, id: &str) -> Result<(), StoreError> {
        let before = self.conversations.len();
        self.conversations.retain(|c| c.id != id);
        if self.conversations.len() == before {
            return Err(StoreError::ConversationNotFound(id.to_string()));
        }
        if self.active_id.as_deref() == Some(id) {
            self.active_id = None;
        }
        Ok(())
    }

    pub fn clear_all(&mut self) {
        self.conversations.clear();
        self.active_id = None;
    }

    /// Conversations whose title contains `query`, ignoring case.
    pub fn search(&self, query: &str) -> Vec<&Conversation> {
        self.conversations
            .iter()
            .filter(|c| matches_query(c, query))
            .collect()
    }

    pub fn pinned(&self, conversation_id: &str) -> Vec<&Message> {
        self.conversation(conversation_id)
            .map(|c| c.messages.iter().filter(|m| m.is_pinned).collect())
            .unwrap_or_default()
    }

    pub fn code_preview(&self, conversation_id: &str) -> Option<CodeSnippet> {
        self.conversation(conversation_id).and_then(code_preview)
    }
}
