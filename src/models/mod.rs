pub mod attachment;
pub mod citation;
pub mod conversation;
pub mod message;
pub mod model;
pub mod user;

pub use attachment::{decode_data_uri, AttachmentKind, InlineData};
pub use citation::{merge_citations, Citation};
pub use conversation::Conversation;
pub use message::{Message, Role};
pub use model::GeminiModel;
pub use user::User;
