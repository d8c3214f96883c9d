use std::sync::LazyLock;

use base64::Engine;
use regex::Regex;

static DATA_URI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data:((image|audio)/[\w.+-]+)(?:;[^;,]+)*;base64,(.+)$")
        .expect("data URI pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentKind {
    Image,
    Audio,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::Image => "image",
            AttachmentKind::Audio => "audio",
        }
    }
}

/// Raw attachment bytes plus their MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineData {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Decode a `data:<mime>;base64,<payload>` string.
///
/// Anything that is not a base64 data URI of the requested kind yields `None`;
/// callers drop such attachments rather than failing the message.
pub fn decode_data_uri(uri: &str, kind: AttachmentKind) -> Option<InlineData> {
    let Some(caps) = DATA_URI.captures(uri.trim()) else {
        tracing::debug!("Dropping attachment that is not a data URI");
        return None;
    };

    if &caps[2] != kind.as_str() {
        tracing::debug!(
            "Dropping {} attachment where {} was expected",
            &caps[2],
            kind.as_str()
        );
        return None;
    }

    match base64::engine::general_purpose::STANDARD.decode(&caps[3]) {
        Ok(data) => Some(InlineData {
            mime_type: caps[1].to_string(),
            data,
        }),
        Err(e) => {
            tracing::debug!("Dropping attachment with invalid base64 payload: {}", e);
            None
        }
    }
}
