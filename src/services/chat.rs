use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::conversation::{derive_title, plan_regeneration};
use super::persistence::{self, Storage};
use super::store::{ChatStore, StoreError};
use super::stream::{StreamErrorKind, StreamOptions, StreamOrchestrator, TurnInput};
use crate::config::APOLOGY_MESSAGE;
use crate::models::{Conversation, Message, User};

/// How a streamed turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Cancelled,
    Failed(StreamErrorKind),
}

/// Drives conversations: owns the store, starts streams, writes chunks back.
pub struct ChatController {
    store: ChatStore,
    orchestrator: StreamOrchestrator,
    storage: Option<Arc<dyn Storage>>,
    user: Option<User>,
}

impl ChatController {
    pub fn new(orchestrator: StreamOrchestrator, store: ChatStore) -> Self {
        Self {
            store,
            orchestrator,
            storage: None,
            user: None,
        }
    }

    /// Load saved state from `storage` and write every change back to it.
    pub fn restore(orchestrator: StreamOrchestrator, storage: Arc<dyn Storage>) -> Self {
        let state = persistence::load_state(storage.as_ref());
        tracing::info!(
            "Restored {} conversations (signed in: {})",
            state.conversations.len(),
            state.user.is_some()
        );
        Self {
            store: ChatStore::from_parts(state.conversations, state.active_id),
            orchestrator,
            storage: Some(storage),
            user: state.user,
        }
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn sign_in(&mut self, user: User) -> Result<()> {
        if let Some(storage) = &self.storage {
            persistence::save_user(storage.as_ref(), &user)?;
        }
        self.user = Some(user);
        Ok(())
    }

    pub fn sign_out(&mut self) -> Result<()> {
        if let Some(storage) = &self.storage {
            persistence::clear_user(storage.as_ref())?;
        }
        self.user = None;
        Ok(())
    }

    /// Deselect the current conversation; the next message starts a new one.
    pub fn new_chat(&mut self) {
        self.store.clear_active();
        self.persist();
    }

    pub fn select(&mut self, conversation_id: &str) -> Result<()> {
        self.store.set_active(conversation_id)?;
        self.persist();
        Ok(())
    }

    pub fn delete(&mut self, conversation_id: &str) -> Result<()> {
        self.store.delete_conversation(conversation_id)?;
        self.persist();
        Ok(())
    }

    pub fn delete_all(&mut self) {
        self.store.clear_all();
        self.persist();
    }

    pub fn toggle_pin(&mut self, conversation_id: &str, message_id: &str) -> Result<bool> {
        let pinned = self.store.toggle_pin(conversation_id, message_id)?;
        self.persist();
        Ok(pinned)
    }

    pub fn search(&self, query: &str) -> Vec<&Conversation> {
        self.store.search(query)
    }

    /// Send `input` in the active conversation, starting one if none is
    /// active, and stream the reply into a new assistant turn.
    ///
    /// `on_update` sees the assistant turn after every chunk.
    pub async fn send_message<F>(
        &mut self,
        input: TurnInput,
        options: StreamOptions,
        cancel: CancellationToken,
        on_update: F,
    ) -> Result<TurnOutcome>
    where
        F: FnMut(&Message),
    {
        if input.is_empty() {
            bail!("Nothing to send");
        }

        let conversation_id = match self.store.active() {
            Some(conversation) => {
                if conversation.streaming_message().is_some() {
                    bail!(StoreError::StreamInProgress(conversation.id.clone()));
                }
                conversation.id.clone()
            }
            None => self.store.create_conversation(
                derive_title(&input),
                options.model.clone(),
                options.use_search,
            ),
        };

        let history = self
            .store
            .conversation(&conversation_id)
            .map(|c| c.messages.clone())
            .unwrap_or_default();
        if history.is_empty() {
            self.store.set_title(&conversation_id, derive_title(&input))?;
        }

        let user_msg = Message::user(input.prompt.clone(), input.images.clone(), input.audio.clone());
        self.store.append_turn(&conversation_id, user_msg)?;

        self.run_turn(&conversation_id, &history, &input, &options, cancel, on_update)
            .await
    }

    /// Replace the assistant turn `message_id` and everything after it with
    /// a fresh reply to the user turn before it.
    pub async fn regenerate<F>(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        options: StreamOptions,
        cancel: CancellationToken,
        on_update: F,
    ) -> Result<TurnOutcome>
    where
        F: FnMut(&Message),
    {
        let conversation = self
            .store
            .conversation(conversation_id)
            .ok_or_else(|| anyhow!("Conversation not found: {}", conversation_id))?;
        if conversation.streaming_message().is_some() {
            bail!(StoreError::StreamInProgress(conversation_id.to_string()));
        }

        let plan = plan_regeneration(conversation, message_id)
            .with_context(|| format!("Cannot regenerate message {}", message_id))?;
        self.store.truncate(conversation_id, plan.truncate_to)?;

        tracing::info!(
            "Regenerating reply in {} from {} prior turns",
            conversation_id,
            plan.history.len()
        );
        self.run_turn(conversation_id, &plan.history, &plan.input, &options, cancel, on_update)
            .await
    }

    async fn run_turn<F>(
        &mut self,
        conversation_id: &str,
        history: &[Message],
        input: &TurnInput,
        options: &StreamOptions,
        cancel: CancellationToken,
        on_update: F,
    ) -> Result<TurnOutcome>
    where
        F: FnMut(&Message),
    {
        let placeholder = Message::streaming_placeholder();
        let message_id = placeholder.id.clone();
        self.store.append_turn(conversation_id, placeholder)?;
        self.persist();

        let result = self
            .consume_stream(conversation_id, &message_id, history, input, options, cancel, on_update)
            .await;

        // The flag comes off whatever happened above.
        self.store.set_streaming(conversation_id, &message_id, false)?;
        self.persist();

        let outcome = result?;
        tracing::info!("Turn {} finished: {:?}", message_id, outcome);
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    async fn consume_stream<F>(
        &mut self,
        conversation_id: &str,
        message_id: &str,
        history: &[Message],
        input: &TurnInput,
        options: &StreamOptions,
        cancel: CancellationToken,
        mut on_update: F,
    ) -> Result<TurnOutcome, StoreError>
    where
        F: FnMut(&Message),
    {
        let mut stream = self.orchestrator.begin_stream(history, input, options, cancel);
        let mut outcome = TurnOutcome::Completed;

        while let Some(item) = stream.next().await {
            let (content, citations) = match item {
                Ok(chunk) => (chunk.full_text, chunk.citations),
                Err(err) => {
                    tracing::error!("Response failed ({}): {}", err.kind, err.message);
                    outcome = TurnOutcome::Failed(err.kind);
                    (APOLOGY_MESSAGE.to_string(), Vec::new())
                }
            };
            self.store
                .update_streaming_content(conversation_id, message_id, content, citations)?;
            if let Some(message) = self.message(conversation_id, message_id) {
                on_update(message);
            }
        }

        if outcome == TurnOutcome::Completed && stream.is_cancelled() {
            outcome = TurnOutcome::Cancelled;
        }
        Ok(outcome)
    }

    fn message(&self, conversation_id: &str, message_id: &str) -> Option<&Message> {
        self.store
            .conversation(conversation_id)?
            .messages
            .iter()
            .find(|m| m.id == message_id)
    }

    fn persist(&self) {
        let Some(storage) = &self.storage else {
            return;
        };
        if let Err(e) = persistence::save_state(
            storage.as_ref(),
            self.store.conversations(),
            self.store.active_id(),
        ) {
            tracing::warn!("Failed to save conversations: {:#}", e);
        }
    }
}
