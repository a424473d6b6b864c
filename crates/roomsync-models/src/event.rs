use serde::{Deserialize, Serialize};

use crate::ids::{ChatId, MessageId, SenderId};
use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    NewMessage,
    MessageEdited,
    MessageDeleted,
}

/// Update delivered by the platform to a subscribed account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlatformEvent {
    NewMessage(Message),
    MessageEdited(Message),
    MessageDeleted {
        chat_id: Option<ChatId>,
        sender_id: Option<SenderId>,
        message_ids: Vec<MessageId>,
    },
}

impl PlatformEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PlatformEvent::NewMessage(_) => EventKind::NewMessage,
            PlatformEvent::MessageEdited(_) => EventKind::MessageEdited,
            PlatformEvent::MessageDeleted { .. } => EventKind::MessageDeleted,
        }
    }

    pub fn chat_id(&self) -> Option<ChatId> {
        match self {
            PlatformEvent::NewMessage(m) | PlatformEvent::MessageEdited(m) => Some(m.chat_id),
            PlatformEvent::MessageDeleted { chat_id, .. } => *chat_id,
        }
    }

    pub fn sender_id(&self) -> Option<SenderId> {
        match self {
            PlatformEvent::NewMessage(m) | PlatformEvent::MessageEdited(m) => m.sender_id,
            PlatformEvent::MessageDeleted { sender_id, .. } => *sender_id,
        }
    }
}
