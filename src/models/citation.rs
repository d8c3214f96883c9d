use serde::{Deserialize, Serialize};

/// A grounding source attached to an assistant turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub title: String,
    pub uri: String,
}

impl Citation {
    /// Build from grounding metadata. A missing title falls back to the URI;
    /// a missing or empty URI yields nothing.
    pub fn from_parts(title: Option<&str>, uri: Option<&str>) -> Option<Self> {
        let uri = uri.filter(|u| !u.is_empty())?;
        let title = title.filter(|t| !t.is_empty()).unwrap_or(uri);
        Some(Self {
            title: title.to_string(),
            uri: uri.to_string(),
        })
    }
}

/// Append citations whose URI is not yet present, keeping first-seen order.
pub fn merge_citations<I>(into: &mut Vec<Citation>, incoming: I)
where
    I: IntoIterator<Item = Citation>,
{
    for citation in incoming {
        if !into.iter().any(|c| c.uri == citation.uri) {
            into.push(citation);
        }
    }
}
