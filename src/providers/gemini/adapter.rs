use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use tokio::sync::mpsc;

use super::models::*;
use crate::config::DEFAULT_BASE_URL;
use crate::models::Role;
use crate::providers::traits::AiProvider;
use crate::providers::types::*;

pub struct GeminiProvider {
    client: Client,
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GeminiProvider {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn base_url(custom: Option<&str>) -> &str {
        custom.unwrap_or(DEFAULT_BASE_URL)
    }

    /// Parse an API error response body into a user-friendly message.
    fn parse_error_message(status: reqwest::StatusCode, body: &str) -> String {
        // Try to extract a message from Gemini's JSON error format
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(body) {
            if let Some(msg) = parsed["error"]["message"].as_str() {
                return format!("HTTP {}: {}", status.as_u16(), msg);
            }
        }
        format!("HTTP {}: Request failed", status.as_u16())
    }

    fn translate_role(role: &Role) -> &'static str {
        match role {
            Role::User => "user",
            Role::Assistant | Role::System => "model",
        }
    }

    fn build_contents(messages: &[ChatMessage]) -> Vec<GeminiContent> {
        messages
            .iter()
            .map(|msg| {
                let parts = msg
                    .parts
                    .iter()
                    .map(|part| match part {
                        ContentPart::Text(text) => GeminiPart {
                            text: Some(text.clone()),
                            inline_data: None,
                        },
                        ContentPart::InlineData(inline) => GeminiPart {
                            text: None,
                            inline_data: Some(GeminiInlineData {
                                mime_type: inline.mime_type.clone(),
                                data: base64::engine::general_purpose::STANDARD
                                    .encode(&inline.data),
                            }),
                        },
                    })
                    .collect();

                GeminiContent {
                    role: Some(Self::translate_role(&msg.role).to_string()),
                    parts,
                }
            })
            .collect()
    }

    fn build_request(request: &ChatRequest) -> GeminiRequest {
        let system_instruction = request.system_prompt.as_ref().map(|prompt| GeminiContent {
            role: None,
            parts: vec![GeminiPart {
                text: Some(prompt.clone()),
                inline_data: None,
            }],
        });

        let generation_config = Some(GeminiGenerationConfig {
            temperature: request.temperature,
            thinking_config: Some(GeminiThinkingConfig { thinking_budget: 0 }),
        });

        let tools = request.use_search.then(|| {
            vec![GeminiTool {
                google_search: GoogleSearch::default(),
            }]
        });

        GeminiRequest {
            contents: Self::build_contents(&request.messages),
            system_instruction,
            generation_config,
            tools,
        }
    }
}

#[async_trait]
impl AiProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn stream_message(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        use super::stream::parse_sse_stream;

        let base = Self::base_url(request.base_url.as_deref());
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            base, request.model
        );

        let gemini_request = Self::build_request(&request);

        tracing::debug!(
            "Streaming {} with {} contents (search: {})",
            request.model,
            gemini_request.contents.len(),
            request.use_search
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &request.api_key)
            .json(&gemini_request)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(ProviderError::AuthError("Invalid API key".to_string()));
        }

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::RateLimited {
                retry_after_secs: None,
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::RequestFailed(Self::parse_error_message(
                status, &body,
            )));
        }

        parse_sse_stream(response.bytes_stream(), tx).await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InlineData;

    fn request(use_search: bool) -> ChatRequest {
        ChatRequest {
            api_key: "key".to_string(),
            model: "gemini-3-flash-preview".to_string(),
            messages: vec![
                ChatMessage {
                    role: Role::User,
                    parts: vec![
                        ContentPart::InlineData(InlineData {
                            mime_type: "image/png".to_string(),
                            data: b"hello".to_vec(),
                        }),
                        ContentPart::Text("What is this?".to_string()),
                    ],
                },
                ChatMessage {
                    role: Role::Assistant,
                    parts: vec![ContentPart::Text("A greeting.".to_string())],
                },
            ],
            base_url: None,
            temperature: Some(0.2),
            system_prompt: Some("Be brief.".to_string()),
            use_search,
        }
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(GeminiProvider::build_request(&request(true))).unwrap();

        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["inlineData"]["mimeType"], "image/png");
        assert_eq!(body["contents"][0]["parts"][0]["inlineData"]["data"], "aGVsbG8=");
        assert_eq!(body["contents"][0]["parts"][1]["text"], "What is this?");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert!(body["systemInstruction"].get("role").is_none());
        assert_eq!(body["generationConfig"]["thinkingConfig"]["thinkingBudget"], 0);
        assert_eq!(body["tools"][0]["googleSearch"], serde_json::json!({}));
    }

    #[test]
    fn test_search_disabled_omits_tools() {
        let body = serde_json::to_value(GeminiProvider::build_request(&request(false))).unwrap();
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_parse_error_message() {
        let msg = GeminiProvider::parse_error_message(
            reqwest::StatusCode::NOT_FOUND,
            r#"{"error":{"message":"Requested entity was not found."}}"#,
        );
        assert_eq!(msg, "HTTP 404: Requested entity was not found.");

        let msg = GeminiProvider::parse_error_message(reqwest::StatusCode::BAD_GATEWAY, "oops");
        assert_eq!(msg, "HTTP 502: Request failed");
    }
}
