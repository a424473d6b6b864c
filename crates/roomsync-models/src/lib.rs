pub mod account;
pub mod event;
pub mod ids;
pub mod message;
pub mod permissions;
pub mod settings;

pub use account::AccountConfig;
pub use event::{EventKind, PlatformEvent};
pub use ids::{AccountId, ChatId, GroupId, MessageId, SenderId};
pub use message::{
    Conversation, FormattingSpan, Identity, Media, MediaKind, Message, RoomKind, SenderProfile,
    SentMessage, SpanKind,
};
pub use permissions::{Capabilities, GroupPermissions, PermissionProfile, PermissionShape};
