pub mod chat;
pub mod conversation;
pub mod highlight;
pub mod language;
pub mod markdown;
pub mod persistence;
pub mod store;
pub mod stream;

#[cfg(test)]
mod test_support;

pub use chat::{ChatController, TurnOutcome};
pub use language::{detect_language, DetectedLanguage};
pub use markdown::{render_markdown, CodeSnippet};
pub use persistence::{FileStorage, MemoryStorage, PersistedState, Storage};
pub use store::{ChatStore, StoreError};
pub use stream::{
    ChatStream, StreamChunk, StreamError, StreamErrorKind, StreamOptions, StreamOrchestrator,
    TurnInput,
};
