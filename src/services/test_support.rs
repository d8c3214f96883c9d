use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::stream::StreamOrchestrator;
use crate::config::ProviderConfig;
use crate::models::Citation;
use crate::providers::{AiProvider, ChatRequest, ProviderError, StreamEvent};

pub const PNG_URI: &str = "data:image/png;base64,aGVsbG8=";
pub const WAV_URI: &str = "data:audio/wav;base64,d29ybGQ=";

/// Replays a fixed list of events, or fails the request outright.
pub struct ScriptedProvider {
    events: Vec<StreamEvent>,
    fail_with: Option<ProviderError>,
    hang: bool,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new(events: Vec<StreamEvent>) -> Self {
        Self {
            events,
            fail_with: None,
            hang: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(err: ProviderError) -> Self {
        Self {
            fail_with: Some(err),
            ..Self::new(Vec::new())
        }
    }

    /// Replays `events`, then never finishes.
    pub fn hanging(events: Vec<StreamEvent>) -> Self {
        Self {
            hang: true,
            ..Self::new(events)
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn stream_message(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        self.requests.lock().unwrap().push(request);

        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }

        for event in &self.events {
            if tx.send(event.clone()).await.is_err() {
                return Ok(());
            }
        }

        if self.hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

pub fn delta(text: &str) -> StreamEvent {
    delta_with(text, &[])
}

pub fn delta_with(text: &str, uris: &[&str]) -> StreamEvent {
    StreamEvent::Delta {
        text: text.to_string(),
        citations: uris
            .iter()
            .map(|uri| Citation {
                title: format!("Source {uri}"),
                uri: uri.to_string(),
            })
            .collect(),
    }
}

pub fn done() -> StreamEvent {
    StreamEvent::Done {
        finish_reason: Some("STOP".to_string()),
    }
}

pub fn orchestrator(provider: Arc<ScriptedProvider>) -> StreamOrchestrator {
    StreamOrchestrator::new(
        provider,
        ProviderConfig {
            api_key: "test-key".to_string(),
            base_url: None,
        },
    )
}
