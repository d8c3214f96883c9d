use std::ops::ControlFlow;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use super::models::GeminiResponse;
use crate::models::Citation;
use crate::providers::types::{ProviderError, StreamEvent};

const SAFETY_FINISH_REASON: &str = "SAFETY";

pub async fn parse_sse_stream<S, E>(stream: S, tx: mpsc::Sender<StreamEvent>)
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut byte_buf: Vec<u8> = Vec::new();
    let mut buffer = String::new();
    let mut finish_reason: Option<String> = None;

    while let Some(chunk_result) = stream.next().await {
        let bytes = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error(ProviderError::NetworkError(format!(
                        "Stream error: {}",
                        e
                    ))))
                    .await;
                return;
            }
        };

        byte_buf.extend_from_slice(&bytes);

        // Decode as much valid UTF-8 as possible from the byte buffer
        let decoded = match std::str::from_utf8(&byte_buf) {
            Ok(s) => {
                let decoded = s.to_string();
                byte_buf.clear();
                decoded
            }
            Err(e) => {
                let valid_up_to = e.valid_up_to();
                if valid_up_to == 0 {
                    // No valid UTF-8 yet, wait for more data
                    continue;
                }
                let decoded = String::from_utf8_lossy(&byte_buf[..valid_up_to]).into_owned();
                byte_buf.drain(..valid_up_to);
                decoded
            }
        };

        buffer.push_str(&decoded);
        // Gemini uses \r\n; a trailing \r stays until its \n arrives.
        if buffer.contains("\r\n") {
            buffer = buffer.replace("\r\n", "\n");
        }

        while let Some(event_end) = buffer.find("\n\n") {
            let event_text = buffer[..event_end].to_string();
            buffer.drain(..event_end + 2);

            if handle_event(&event_text, &tx, &mut finish_reason).await.is_break() {
                return;
            }
        }
    }

    // Last event may arrive without its blank line.
    let rest = buffer.trim();
    if !rest.is_empty() && handle_event(rest, &tx, &mut finish_reason).await.is_break() {
        return;
    }

    let _ = tx.send(StreamEvent::Done { finish_reason }).await;
}

/// Parse one SSE event and forward what it carries. Breaks when the stream
/// must end: provider error, safety block, or a dropped receiver.
async fn handle_event(
    event_text: &str,
    tx: &mpsc::Sender<StreamEvent>,
    finish_reason: &mut Option<String>,
) -> ControlFlow<()> {
    let data = extract_data(event_text);
    if data.is_empty() {
        return ControlFlow::Continue(());
    }

    let response = match serde_json::from_str::<GeminiResponse>(&data) {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("Failed to parse SSE data: {}", e);
            return ControlFlow::Continue(());
        }
    };

    if let Some(error) = response.error {
        let msg = error
            .message
            .unwrap_or_else(|| "Unknown error".to_string());
        let _ = tx
            .send(StreamEvent::Error(ProviderError::RequestFailed(msg)))
            .await;
        return ControlFlow::Break(());
    }

    let Some(candidate) = response.candidates.and_then(|c| c.into_iter().next()) else {
        return ControlFlow::Continue(());
    };

    if candidate.finish_reason.as_deref() == Some(SAFETY_FINISH_REASON) {
        let _ = tx.send(StreamEvent::Error(ProviderError::SafetyBlock)).await;
        return ControlFlow::Break(());
    }
    if candidate.finish_reason.is_some() {
        *finish_reason = candidate.finish_reason;
    }

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    let citations: Vec<Citation> = candidate
        .grounding_metadata
        .map(|g| {
            g.grounding_chunks
                .into_iter()
                .filter_map(|chunk| chunk.web)
                .filter_map(|web| Citation::from_parts(web.title.as_deref(), web.uri.as_deref()))
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() && citations.is_empty() {
        return ControlFlow::Continue(());
    }

    if tx.send(StreamEvent::Delta { text, citations }).await.is_err() {
        // receiver dropped
        return ControlFlow::Break(());
    }
    ControlFlow::Continue(())
}

/// Concatenate the `data:` lines of one SSE event.
fn extract_data(event_text: &str) -> String {
    let mut data = String::new();
    for line in event_text.lines() {
        if let Some(payload) = line.strip_prefix("data: ") {
            data.push_str(payload);
        } else if let Some(payload) = line.strip_prefix("data:") {
            data.push_str(payload);
        }
    }
    data
}
