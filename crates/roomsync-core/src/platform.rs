use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use roomsync_models::{
    AccountConfig, ChatId, Conversation, EventKind, FormattingSpan, GroupPermissions, Identity,
    Media, Message, MessageId, PlatformEvent, SenderId, SenderProfile, SentMessage,
};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    #[error("disconnected")]
    Disconnected,
    #[error("unauthorized")]
    Unauthorized,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("network error: {0}")]
    Network(String),
}

/// Identifies one registration made through [`PlatformClient::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Which events of a kind a subscription wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    All,
    Chats(Vec<ChatId>),
}

impl EventFilter {
    pub fn matches(&self, event: &PlatformEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Chats(chats) => event.chat_id().is_some_and(|c| chats.contains(&c)),
        }
    }
}

/// A live registration: matching events arrive on `events` until the
/// subscription is removed or the connection closes.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub kind: EventKind,
    pub events: mpsc::UnboundedReceiver<PlatformEvent>,
}

/// Where a join command should take an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinTarget {
    /// Publicly addressable room, e.g. `https://t.me/somechannel`.
    Public(String),
    /// Private invite, e.g. `https://t.me/+AbCd` or `.../joinchat/AbCd`.
    Invite(String),
}

impl JoinTarget {
    pub fn parse(link: &str) -> Option<Self> {
        let trimmed = link.trim().trim_end_matches('/');
        let tail = trimmed.rsplit('/').next()?.trim();
        if tail.is_empty() {
            return None;
        }
        if trimmed.contains("/joinchat/") {
            return Some(JoinTarget::Invite(tail.to_string()));
        }
        if let Some(hash) = tail.strip_prefix('+') {
            if hash.is_empty() {
                return None;
            }
            return Some(JoinTarget::Invite(hash.to_string()));
        }
        Some(JoinTarget::Public(tail.trim_start_matches('@').to_string()))
    }
}

impl fmt::Display for JoinTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinTarget::Public(name) => write!(f, "@{name}"),
            JoinTarget::Invite(hash) => write!(f, "invite:{hash}"),
        }
    }
}

/// Capabilities the engine needs from one logged-in messaging account.
///
/// Implementations own protocol details: entity resolution, raw RPCs, and
/// update delivery. Messages sent through a client are not echoed back to
/// that same client's subscriptions.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn connect(&self) -> Result<(), PlatformError>;
    async fn disconnect(&self);
    async fn is_authorized(&self) -> Result<bool, PlatformError>;
    async fn get_self(&self) -> Result<Identity, PlatformError>;

    /// Resolves once the connection drops, returning why.
    async fn wait_disconnected(&self) -> PlatformError;

    async fn send_text(
        &self,
        room: ChatId,
        text: &str,
        entities: &[FormattingSpan],
    ) -> Result<SentMessage, PlatformError>;

    /// Sends one or more media items. Several items go out as one album and
    /// yield one sent message per item; the caption attaches to the first.
    async fn send_media(
        &self,
        room: ChatId,
        media: &[Media],
        caption: Option<&str>,
        entities: &[FormattingSpan],
    ) -> Result<Vec<SentMessage>, PlatformError>;

    async fn edit_message(
        &self,
        room: ChatId,
        message: MessageId,
        text: &str,
        entities: &[FormattingSpan],
        media: Option<&Media>,
    ) -> Result<(), PlatformError>;

    async fn delete_messages(&self, room: ChatId, messages: &[MessageId]) -> Result<(), PlatformError>;

    /// Most recent messages authored by this account in `room`, newest first.
    async fn recent_own_messages(&self, room: ChatId, limit: usize) -> Result<Vec<Message>, PlatformError>;

    async fn list_conversations(&self) -> Result<Vec<Conversation>, PlatformError>;
    async fn resolve_entity(&self, room: ChatId) -> Result<Conversation, PlatformError>;
    async fn resolve_sender(&self, sender: SenderId) -> Result<SenderProfile, PlatformError>;

    fn subscribe(&self, kind: EventKind, filter: EventFilter) -> Subscription;
    fn unsubscribe(&self, id: SubscriptionId);

    async fn apply_group_permissions(
        &self,
        room: &Conversation,
        permissions: GroupPermissions,
    ) -> Result<(), PlatformError>;

    async fn join_chat(&self, target: &JoinTarget) -> Result<(), PlatformError>;
    async fn leave_chat(&self, target: &JoinTarget) -> Result<(), PlatformError>;
}

/// Builds the platform client for an account. Session establishment and
/// login happen behind this seam.
pub trait Connector: Send + Sync {
    fn client_for(&self, account: &AccountConfig) -> Arc<dyn PlatformClient>;
}
