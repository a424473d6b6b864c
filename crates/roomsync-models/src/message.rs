use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, GroupId, MessageId, SenderId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Bold,
    Italic,
    Underline,
    Strike,
    Spoiler,
    Code,
    Pre,
    Blockquote,
    TextUrl,
    Mention,
    Url,
}

/// One rich-text formatting span. Offsets and lengths are counted in the
/// platform's text units, never re-derived locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattingSpan {
    pub kind: SpanKind,
    pub offset: u32,
    pub length: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Document,
    WebPage,
    Other,
}

/// Opaque reference to media already hosted by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub kind: MediaKind,
    pub reference: String,
}

impl Media {
    pub fn new(kind: MediaKind, reference: impl Into<String>) -> Self {
        Self {
            kind,
            reference: reference.into(),
        }
    }

    /// Media kinds mirrored on the primary path.
    pub fn is_transferable(&self) -> bool {
        matches!(
            self.kind,
            MediaKind::Photo | MediaKind::Document | MediaKind::WebPage
        )
    }

    /// Media kinds that can be attached to an edit.
    pub fn is_editable(&self) -> bool {
        matches!(self.kind, MediaKind::Photo | MediaKind::Document)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: Option<SenderId>,
    pub text: String,
    #[serde(default)]
    pub entities: Vec<FormattingSpan>,
    #[serde(default)]
    pub media: Option<Media>,
    #[serde(default)]
    pub group_id: Option<GroupId>,
}

impl Message {
    pub fn text(id: MessageId, chat_id: ChatId, sender_id: SenderId, text: impl Into<String>) -> Self {
        Self {
            id,
            chat_id,
            sender_id: Some(sender_id),
            text: text.into(),
            entities: Vec::new(),
            media: None,
            group_id: None,
        }
    }

    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }

    pub fn contains_link(&self) -> bool {
        self.text.contains("http://") || self.text.contains("https://")
    }

    /// Same content re-addressed to another message, e.g. the copy posted
    /// into a main room that later fans out to sub-rooms.
    pub fn readdressed(&self, chat_id: ChatId, id: MessageId) -> Self {
        Self {
            id,
            chat_id,
            group_id: None,
            ..self.clone()
        }
    }

    /// Caption to attach when sending this message as media. Formatting is
    /// only meaningful when there is text to format.
    pub fn caption(&self) -> Option<&str> {
        if self.text.is_empty() {
            None
        } else {
            Some(self.text.as_str())
        }
    }
}

/// One message created by a send call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub chat_id: ChatId,
    pub id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderProfile {
    pub id: SenderId,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl SenderProfile {
    /// Name shown for allow/deny lists: "last first", falling back to the
    /// username, then to an empty string.
    pub fn display_name(&self) -> String {
        let last = self.last_name.as_deref().unwrap_or("");
        let first = self.first_name.as_deref().unwrap_or("");
        let full = format!("{last} {first}").trim().to_string();
        if !full.is_empty() {
            return full;
        }
        self.username.clone().unwrap_or_default()
    }

    /// Name used in human-facing notifications: "first last".
    pub fn notification_name(&self) -> String {
        let first = self.first_name.as_deref().unwrap_or("");
        let last = self.last_name.as_deref().unwrap_or("");
        let full = format!("{first} {last}").trim().to_string();
        if !full.is_empty() {
            return full;
        }
        self.username.clone().unwrap_or_else(|| "Unknown".to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    BasicGroup,
    Supergroup,
    Channel,
    Private,
}

/// A conversation visible to an account, as returned by the dialog list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ChatId,
    pub title: String,
}

/// Who an account is logged in as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: SenderId,
    pub phone: String,
}
