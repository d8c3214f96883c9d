pub mod gemini;
pub mod traits;
pub mod types;

pub use gemini::GeminiProvider;
pub use traits::AiProvider;
pub use types::{ChatMessage, ChatRequest, ContentPart, ProviderError, StreamEvent};
