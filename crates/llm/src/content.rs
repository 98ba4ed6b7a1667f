use serde::{Deserialize, Serialize};

/// Speaker of one provider-facing conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentRole {
    User,
    Model,
}

/// Binary attachment carried inline as base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

/// One part of a conversation entry, serialized with the Gemini wire names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineData,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn inline_data(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::InlineData {
            inline_data: InlineData {
                mime_type: mime_type.into(),
                data: data.into(),
            },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::InlineData { .. } => None,
        }
    }
}

/// Conversation log entry in the shape the remote model expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub role: ContentRole,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn new(role: ContentRole, parts: Vec<Part>) -> Self {
        Self { role, parts }
    }

    pub fn user(parts: Vec<Part>) -> Self {
        Self::new(ContentRole::User, parts)
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self::new(ContentRole::Model, vec![Part::text(text)])
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(Part::as_text).collect()
    }

    /// Overwrites the text of the last part. Returns false when the last part is not text.
    pub fn set_last_text(&mut self, text: impl Into<String>) -> bool {
        match self.parts.last_mut() {
            Some(Part::Text { text: current }) => {
                *current = text.into();
                true
            }
            Some(Part::InlineData { .. }) | None => false,
        }
    }

    /// True when no part carries data worth sending upstream.
    pub fn is_blank(&self) -> bool {
        self.parts.iter().all(|part| match part {
            Part::Text { text } => text.trim().is_empty(),
            Part::InlineData { inline_data } => inline_data.data.is_empty(),
        })
    }
}
