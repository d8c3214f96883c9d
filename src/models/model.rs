use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GeminiModel {
    #[default]
    Flash,
    Pro,
}

impl GeminiModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeminiModel::Flash => "gemini-3-flash-preview",
            GeminiModel::Pro => "gemini-3-pro-preview",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            GeminiModel::Flash => "Gemini 3 Flash",
            GeminiModel::Pro => "Gemini 3 Pro",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "gemini-3-flash-preview" => Some(GeminiModel::Flash),
            "gemini-3-pro-preview" => Some(GeminiModel::Pro),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_ids() {
        assert_eq!(GeminiModel::default(), GeminiModel::Flash);
        for model in [GeminiModel::Flash, GeminiModel::Pro] {
            assert_eq!(GeminiModel::from_str(model.as_str()), Some(model));
        }
        assert_eq!(GeminiModel::Pro.display_name(), "Gemini 3 Pro");
        assert_eq!(GeminiModel::from_str("gpt-4"), None);
    }
}
