use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{self, ProviderConfig, SYSTEM_INSTRUCTION, TRANSCRIBE_PROMPT};
use crate::models::{
    decode_data_uri, merge_citations, AttachmentKind, Citation, GeminiModel, Message, Role,
};
use crate::providers::{AiProvider, ChatMessage, ChatRequest, ContentPart, ProviderError, StreamEvent};

/// Per-request switches chosen in the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOptions {
    pub model: String,
    pub use_search: bool,
    pub prompt_enhancement: bool,
}

impl StreamOptions {
    pub fn new(model: GeminiModel) -> Self {
        Self {
            model: model.as_str().to_string(),
            use_search: false,
            prompt_enhancement: false,
        }
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self::new(GeminiModel::default())
    }
}

/// What the user is sending: prompt text plus data-URI attachments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnInput {
    pub prompt: String,
    pub images: Vec<String>,
    pub audio: Option<String>,
}

impl TurnInput {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.prompt.trim().is_empty() && self.images.is_empty() && self.audio.is_none()
    }
}

/// One step of a live response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub delta: String,
    pub full_text: String,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamErrorKind {
    QuotaExhausted,
    SafetyBlock,
    NetworkError,
    InvalidKey,
    Unknown,
}

impl StreamErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamErrorKind::QuotaExhausted => "QUOTA_EXHAUSTED",
            StreamErrorKind::SafetyBlock => "SAFETY_BLOCK",
            StreamErrorKind::NetworkError => "NETWORK_ERROR",
            StreamErrorKind::InvalidKey => "INVALID_KEY",
            StreamErrorKind::Unknown => "UNKNOWN",
        }
    }

    /// Classify a failure message. Checked in order: safety, quota,
    /// invalid key, network.
    pub fn classify(message: &str) -> Self {
        let msg = message.to_lowercase();
        if msg.contains("safety") {
            StreamErrorKind::SafetyBlock
        } else if msg.contains("429") || msg.contains("quota") {
            StreamErrorKind::QuotaExhausted
        } else if msg.contains("entity was not found") || msg.contains("api key") {
            StreamErrorKind::InvalidKey
        } else if msg.contains("fetch") || msg.contains("network") {
            StreamErrorKind::NetworkError
        } else {
            StreamErrorKind::Unknown
        }
    }
}

impl fmt::Display for StreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct StreamError {
    pub kind: StreamErrorKind,
    pub message: String,
}

impl From<ProviderError> for StreamError {
    fn from(err: ProviderError) -> Self {
        let message = err.to_string();
        let kind = match err {
            ProviderError::SafetyBlock => StreamErrorKind::SafetyBlock,
            _ => StreamErrorKind::classify(&message),
        };
        Self { kind, message }
    }
}

pub struct StreamOrchestrator {
    provider: Arc<dyn AiProvider>,
    config: ProviderConfig,
}

impl StreamOrchestrator {
    pub fn new(provider: Arc<dyn AiProvider>, config: ProviderConfig) -> Self {
        Self { provider, config }
    }

    pub fn build_request(
        &self,
        history: &[Message],
        input: &TurnInput,
        options: &StreamOptions,
    ) -> ChatRequest {
        ChatRequest {
            api_key: self.config.api_key.clone(),
            model: options.model.clone(),
            messages: build_messages(history, input, options.prompt_enhancement),
            base_url: self.config.base_url.clone(),
            temperature: Some(config::temperature_for(&options.model)),
            system_prompt: Some(SYSTEM_INSTRUCTION.to_string()),
            use_search: options.use_search,
        }
    }

    /// Start streaming a response to `input` with `history` as context.
    ///
    /// Must be called from within a tokio runtime. Cancelling `cancel` stops
    /// the sequence before its next element and drops the connection.
    pub fn begin_stream(
        &self,
        history: &[Message],
        input: &TurnInput,
        options: &StreamOptions,
        cancel: CancellationToken,
    ) -> ChatStream {
        let request = self.build_request(history, input, options);
        let (tx, rx) = mpsc::channel::<StreamEvent>(64);

        tracing::info!(
            "Starting {} stream: model={}, history={}, search={}",
            self.provider.name(),
            request.model,
            history.len(),
            request.use_search
        );

        let provider = Arc::clone(&self.provider);
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = task_cancel.cancelled() => {
                    tracing::debug!("Stream cancelled, discarding remaining response");
                }
                result = provider.stream_message(request, tx.clone()) => {
                    if let Err(e) = result {
                        let _ = tx.send(StreamEvent::Error(e)).await;
                    }
                }
            }
        });

        ChatStream {
            rx,
            cancel,
            task,
            full_text: String::new(),
            citations: Vec::new(),
            finished: false,
        }
    }
}

/// Map prior turns and the new input to provider messages.
///
/// Attachments go ahead of their turn's text; malformed data URIs are dropped.
pub fn build_messages(history: &[Message], input: &TurnInput, enhance: bool) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = history
        .iter()
        .map(|m| ChatMessage {
            role: m.role,
            parts: turn_parts(&m.images, m.audio.as_deref(), m.content.clone()),
        })
        .collect();

    messages.push(ChatMessage {
        role: Role::User,
        parts: turn_parts(&input.images, input.audio.as_deref(), resolve_prompt(input, enhance)),
    });

    messages
}

/// The prompt text actually sent for `input`.
pub fn resolve_prompt(input: &TurnInput, enhance: bool) -> String {
    if input.audio.is_some() {
        if input.prompt.trim().is_empty() {
            TRANSCRIBE_PROMPT.to_string()
        } else {
            input.prompt.clone()
        }
    } else if enhance {
        config::enhance_prompt(&input.prompt)
    } else {
        input.prompt.clone()
    }
}

fn turn_parts(images: &[String], audio: Option<&str>, text: String) -> Vec<ContentPart> {
    let mut parts: Vec<ContentPart> = images
        .iter()
        .filter_map(|uri| decode_data_uri(uri, AttachmentKind::Image))
        .map(ContentPart::InlineData)
        .collect();

    if let Some(data) = audio.and_then(|uri| decode_data_uri(uri, AttachmentKind::Audio)) {
        parts.push(ContentPart::InlineData(data));
    }

    parts.push(ContentPart::Text(text));
    parts
}

/// A live response: yields `StreamChunk`s until the provider finishes, fails,
/// or the cancellation token fires.
pub struct ChatStream {
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    full_text: String,
    citations: Vec<Citation>,
    finished: bool,
}

impl ChatStream {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    pub fn citations(&self) -> &[Citation] {
        &self.citations
    }

    fn finish(&mut self) {
        self.finished = true;
        self.task.abort();
        self.rx.close();
    }
}

impl Stream for ChatStream {
    type Item = Result<StreamChunk, StreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.finished {
            return Poll::Ready(None);
        }

        if this.cancel.is_cancelled() {
            tracing::info!("Stream cancelled after {} chars", this.full_text.len());
            this.finish();
            return Poll::Ready(None);
        }

        match this.rx.poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Some(StreamEvent::Delta { text, citations })) => {
                this.full_text.push_str(&text);
                merge_citations(&mut this.citations, citations);
                Poll::Ready(Some(Ok(StreamChunk {
                    delta: text,
                    full_text: this.full_text.clone(),
                    citations: this.citations.clone(),
                })))
            }
            Poll::Ready(Some(StreamEvent::Done { finish_reason })) => {
                tracing::debug!("Stream finished: {:?}", finish_reason);
                this.finish();
                Poll::Ready(None)
            }
            Poll::Ready(Some(StreamEvent::Error(err))) => {
                let err = StreamError::from(err);
                tracing::warn!("Stream failed: {}", err);
                this.finish();
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                if this.cancel.is_cancelled() {
                    tracing::info!("Stream cancelled after {} chars", this.full_text.len());
                }
                this.finish();
                Poll::Ready(None)
            }
        }
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;

    use super::*;
    use crate::services::test_support::*;

    fn options() -> StreamOptions {
        StreamOptions::default()
    }

    #[test]
    fn test_classify_priority() {
        assert_eq!(
            StreamErrorKind::classify("Blocked for SAFETY after quota check"),
            StreamErrorKind::SafetyBlock
        );
        assert_eq!(
            StreamErrorKind::classify("HTTP 429: Resource exhausted"),
            StreamErrorKind::QuotaExhausted
        );
        assert_eq!(
            StreamErrorKind::classify("Requested entity was not found."),
            StreamErrorKind::InvalidKey
        );
        assert_eq!(
            StreamErrorKind::classify("Failed to fetch"),
            StreamErrorKind::NetworkError
        );
        assert_eq!(StreamErrorKind::classify("boom"), StreamErrorKind::Unknown);
    }

    #[test]
    fn test_provider_errors_classify() {
        let kind = |e: ProviderError| StreamError::from(e).kind;
        assert_eq!(kind(ProviderError::SafetyBlock), StreamErrorKind::SafetyBlock);
        assert_eq!(
            kind(ProviderError::RateLimited {
                retry_after_secs: None
            }),
            StreamErrorKind::QuotaExhausted
        );
        assert_eq!(
            kind(ProviderError::AuthError("Invalid API key".to_string())),
            StreamErrorKind::InvalidKey
        );
        assert_eq!(
            kind(ProviderError::NetworkError("connection refused".to_string())),
            StreamErrorKind::NetworkError
        );
        assert_eq!(
            kind(ProviderError::RequestFailed("Internal error encountered.".to_string())),
            StreamErrorKind::Unknown
        );
    }

    #[test]
    fn test_build_messages_orders_attachments_before_text() {
        let mut earlier = Message::user("look", vec![PNG_URI.to_string(), "garbage".to_string()], None);
        earlier.audio = Some(WAV_URI.to_string());
        let reply = Message::assistant("a dot");

        let input = TurnInput {
            prompt: "and this?".to_string(),
            images: vec![PNG_URI.to_string()],
            audio: None,
        };
        let messages = build_messages(&[earlier, reply], &input, false);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].parts.len(), 3);
        assert!(matches!(&messages[0].parts[0], ContentPart::InlineData(d) if d.mime_type == "image/png"));
        assert!(matches!(&messages[0].parts[1], ContentPart::InlineData(d) if d.mime_type == "audio/wav"));
        assert_eq!(messages[0].parts[2], ContentPart::Text("look".to_string()));
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[2].text(), "and this?");
        assert_eq!(messages[2].parts.len(), 2);
    }

    #[test]
    fn test_resolve_prompt() {
        let audio_only = TurnInput {
            audio: Some(WAV_URI.to_string()),
            ..TurnInput::default()
        };
        assert_eq!(resolve_prompt(&audio_only, true), TRANSCRIBE_PROMPT);

        let enhanced = resolve_prompt(&TurnInput::text("Write a haiku"), true);
        assert!(enhanced.starts_with("Refine and improve this prompt"));
        assert!(enhanced.contains("\"Write a haiku\""));

        assert_eq!(resolve_prompt(&TurnInput::text("Write a haiku"), false), "Write a haiku");
    }

    #[test]
    fn test_build_request_uses_model_settings() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let orchestrator = orchestrator(provider);
        let mut opts = options();
        opts.use_search = true;

        let request = orchestrator.build_request(&[], &TurnInput::text("hi"), &opts);
        assert_eq!(request.temperature, Some(config::FLASH_TEMPERATURE));
        assert!(request.use_search);
        assert_eq!(request.system_prompt.as_deref(), Some(SYSTEM_INSTRUCTION));

        opts = StreamOptions::new(GeminiModel::Pro);
        let request = orchestrator.build_request(&[], &TurnInput::text("hi"), &opts);
        assert_eq!(request.temperature, Some(config::DEFAULT_TEMPERATURE));
    }

    #[tokio::test]
    async fn test_chunks_accumulate_and_citations_dedup() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            delta_with("Hello", &["https://a.example"]),
            delta_with(", world", &["https://a.example", "https://b.example"]),
            done(),
        ]));
        let orchestrator = orchestrator(provider);
        let mut stream = orchestrator.begin_stream(
            &[],
            &TurnInput::text("hi"),
            &options(),
            CancellationToken::new(),
        );

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.delta, "Hello");
        assert_eq!(first.full_text, "Hello");
        assert_eq!(first.citations.len(), 1);

        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.delta, ", world");
        assert_eq!(second.full_text, "Hello, world");
        let uris: Vec<&str> = second.citations.iter().map(|c| c.uri.as_str()).collect();
        assert_eq!(uris, vec!["https://a.example", "https://b.example"]);

        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_after_n_chunks() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            delta("a"),
            delta("b"),
            delta("c"),
            delta("d"),
            done(),
        ]));
        let orchestrator = orchestrator(provider);
        let cancel = CancellationToken::new();
        let mut stream =
            orchestrator.begin_stream(&[], &TurnInput::text("hi"), &options(), cancel.clone());

        let mut received = Vec::new();
        while let Some(chunk) = stream.next().await {
            received.push(chunk.unwrap());
            if received.len() == 2 {
                cancel.cancel();
            }
        }

        assert_eq!(received.len(), 2);
        assert_eq!(stream.full_text(), "ab");
    }

    #[tokio::test]
    async fn test_cancel_while_waiting_for_provider() {
        let provider = Arc::new(ScriptedProvider::hanging(vec![delta("partial")]));
        let orchestrator = orchestrator(provider);
        let cancel = CancellationToken::new();
        let mut stream =
            orchestrator.begin_stream(&[], &TurnInput::text("hi"), &options(), cancel.clone());

        assert!(stream.next().await.unwrap().is_ok());

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let next = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("cancellation should end the stream");
        assert!(next.is_none());
        assert_eq!(stream.full_text(), "partial");
    }

    #[tokio::test]
    async fn test_failure_after_partial_text() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            delta("partial"),
            StreamEvent::Error(ProviderError::SafetyBlock),
        ]));
        let orchestrator = orchestrator(provider);
        let mut stream = orchestrator.begin_stream(
            &[],
            &TurnInput::text("hi"),
            &options(),
            CancellationToken::new(),
        );

        assert_eq!(stream.next().await.unwrap().unwrap().full_text, "partial");
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind, StreamErrorKind::SafetyBlock);
        assert!(stream.next().await.is_none());
        assert_eq!(stream.full_text(), "partial");
    }

    #[tokio::test]
    async fn test_request_rejected_before_streaming() {
        let provider = Arc::new(ScriptedProvider::failing(ProviderError::RateLimited {
            retry_after_secs: None,
        }));
        let orchestrator = orchestrator(provider);
        let mut stream = orchestrator.begin_stream(
            &[],
            &TurnInput::text("hi"),
            &options(),
            CancellationToken::new(),
        );

        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.kind, StreamErrorKind::QuotaExhausted);
        assert!(stream.next().await.is_none());
    }
}
