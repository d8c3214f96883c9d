use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{ChatRequest, ProviderError, StreamEvent};

#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Stream one response into `tx`.
    ///
    /// Failures after the request was accepted are sent as
    /// `StreamEvent::Error`; failures before it return `Err`. The provider
    /// stops as soon as the receiver is dropped.
    async fn stream_message(
        &self,
        request: ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError>;
}
