//! Outbound messages handed to channel adapters.

use serde::{Deserialize, Serialize};

/// One message sent to the user. Rendering is up to the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Plain text with optional quick replies
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        replies: Vec<String>,
    },
    /// Media attachment such as an image
    Attachment { kind: String, url: String },
}

impl Response {
    /// Create a text response.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            replies: Vec::new(),
        }
    }

    /// Create an image attachment.
    pub fn image(url: impl Into<String>) -> Self {
        Self::Attachment {
            kind: "image".to_string(),
            url: url.into(),
        }
    }

    /// Attach quick replies. No-op on attachments.
    pub fn with_replies<I, S>(mut self, new_replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Self::Text { replies, .. } = &mut self {
            replies.extend(new_replies.into_iter().map(Into::into));
        }
        self
    }

    /// Text of a text response.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            Self::Attachment { .. } => None,
        }
    }
}

impl From<&str> for Response {
    fn from(text: &str) -> Self {
        Self::text(text)
    }
}

impl From<String> for Response {
    fn from(text: String) -> Self {
        Self::text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_replies_only_on_text() {
        let text = Response::text("Pick one").with_replies(["Yes", "No"]);
        assert_eq!(
            text,
            Response::Text {
                text: "Pick one".into(),
                replies: vec!["Yes".into(), "No".into()],
            }
        );

        let image = Response::image("http://x/cat.png").with_replies(["Yes"]);
        assert_eq!(image.as_text(), None);
    }

    #[test]
    fn test_serialized_shape() {
        let value = serde_json::to_value(Response::from("Hi")).unwrap();
        assert_eq!(value, json!({"type": "text", "text": "Hi"}));

        let value = serde_json::to_value(Response::image("u")).unwrap();
        assert_eq!(value, json!({"type": "attachment", "kind": "image", "url": "u"}));
    }
}
