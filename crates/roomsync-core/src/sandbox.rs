//! In-process messaging platform. Every account connected through
//! [`SandboxNetwork::connector`] shares one simulated world, so engine
//! behaviour can be exercised end to end without a network.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use roomsync_models::{
    AccountConfig, AccountId, Capabilities, ChatId, Conversation, EventKind, FormattingSpan,
    GroupId, GroupPermissions, Identity, Media, Message, MessageId, PermissionShape,
    PlatformEvent, RoomKind, SenderId, SenderProfile, SentMessage,
};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use crate::platform::{
    Connector, EventFilter, JoinTarget, PlatformClient, PlatformError, Subscription,
    SubscriptionId,
};

/// One platform call made by a sandbox client, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxCall {
    SendText {
        account: AccountId,
        room: ChatId,
        text: String,
        at: Instant,
    },
    SendMedia {
        account: AccountId,
        room: ChatId,
        items: usize,
        caption: Option<String>,
        at: Instant,
    },
    Edit {
        account: AccountId,
        room: ChatId,
        message: MessageId,
        text: String,
    },
    Delete {
        account: AccountId,
        room: ChatId,
        messages: Vec<MessageId>,
    },
    Permissions {
        account: AccountId,
        room: ChatId,
        shape: PermissionShape,
        banned: Capabilities,
        accepted: bool,
    },
    Join {
        account: AccountId,
        target: JoinTarget,
    },
    Leave {
        account: AccountId,
        target: JoinTarget,
    },
}

impl SandboxCall {
    pub fn account(&self) -> &AccountId {
        match self {
            SandboxCall::SendText { account, .. }
            | SandboxCall::SendMedia { account, .. }
            | SandboxCall::Edit { account, .. }
            | SandboxCall::Delete { account, .. }
            | SandboxCall::Permissions { account, .. }
            | SandboxCall::Join { account, .. }
            | SandboxCall::Leave { account, .. } => account,
        }
    }

    /// Target room of a send, edit or delete.
    pub fn room(&self) -> Option<ChatId> {
        match self {
            SandboxCall::SendText { room, .. }
            | SandboxCall::SendMedia { room, .. }
            | SandboxCall::Edit { room, .. }
            | SandboxCall::Delete { room, .. }
            | SandboxCall::Permissions { room, .. } => Some(*room),
            SandboxCall::Join { .. } | SandboxCall::Leave { .. } => None,
        }
    }

    pub fn is_send(&self) -> bool {
        matches!(self, SandboxCall::SendText { .. } | SandboxCall::SendMedia { .. })
    }

    pub fn sent_at(&self) -> Option<Instant> {
        match self {
            SandboxCall::SendText { at, .. } | SandboxCall::SendMedia { at, .. } => Some(*at),
            _ => None,
        }
    }
}

struct Room {
    kind: RoomKind,
    title: String,
    /// Oldest first.
    messages: Vec<Message>,
}

struct AccountEntry {
    identity: Identity,
    authorized: bool,
    connected: bool,
    connects: u32,
    failing_connects: u32,
    dropped: Arc<Notify>,
}

struct Subscriber {
    account: AccountId,
    id: SubscriptionId,
    kind: EventKind,
    filter: EventFilter,
    tx: mpsc::UnboundedSender<PlatformEvent>,
}

#[derive(Default)]
struct World {
    rooms: HashMap<ChatId, Room>,
    users: HashMap<SenderId, SenderProfile>,
    accounts: HashMap<AccountId, AccountEntry>,
    subscribers: Vec<Subscriber>,
    calls: Vec<SandboxCall>,
    failing_rooms: HashSet<ChatId>,
    next_message: i64,
    next_subscription: u64,
}

impl World {
    fn next_message_id(&mut self) -> MessageId {
        self.next_message += 1;
        MessageId(self.next_message)
    }

    /// Deliver `event` to matching subscribers, skipping `origin`'s own.
    fn emit(&mut self, event: PlatformEvent, origin: Option<&AccountId>) {
        let kind = event.kind();
        let connected: HashSet<AccountId> = self
            .accounts
            .iter()
            .filter(|(_, a)| a.connected)
            .map(|(id, _)| id.clone())
            .collect();
        self.subscribers.retain(|s| !s.tx.is_closed());
        for subscriber in &self.subscribers {
            if Some(&subscriber.account) == origin
                || subscriber.kind != kind
                || !connected.contains(&subscriber.account)
                || !subscriber.filter.matches(&event)
            {
                continue;
            }
            let _ = subscriber.tx.send(event.clone());
        }
    }

    fn connected_entry(&self, account: &AccountId) -> Result<&AccountEntry, PlatformError> {
        match self.accounts.get(account) {
            Some(entry) if entry.connected => Ok(entry),
            Some(_) => Err(PlatformError::Disconnected),
            None => Err(PlatformError::Unauthorized),
        }
    }

    fn writable_room(&mut self, room: ChatId) -> Result<&mut Room, PlatformError> {
        if self.failing_rooms.contains(&room) {
            return Err(PlatformError::Rejected(format!("writes to {room} are failing")));
        }
        self.rooms
            .get_mut(&room)
            .ok_or_else(|| PlatformError::NotFound(format!("room {room}")))
    }
}

/// Handle to a shared simulated platform. Clones share the same world.
#[derive(Clone, Default)]
pub struct SandboxNetwork {
    world: Arc<Mutex<World>>,
}

impl SandboxNetwork {
    pub fn new() -> Self {
        let network = Self::default();
        network.world.lock().next_message = 1000;
        network
    }

    pub fn add_room(&self, id: ChatId, title: impl Into<String>, kind: RoomKind) {
        self.world.lock().rooms.insert(
            id,
            Room {
                kind,
                title: title.into(),
                messages: Vec::new(),
            },
        );
    }

    /// Register a platform user that is not a managed account.
    pub fn add_user(&self, profile: SenderProfile) {
        self.world.lock().users.insert(profile.id, profile);
    }

    /// Register a logged-in account with the given platform user id.
    pub fn add_account(&self, phone: &str, user: SenderId) -> Identity {
        self.insert_account(phone, user, true)
    }

    /// Register an account that never completed login.
    pub fn add_unauthorized_account(&self, phone: &str, user: SenderId) -> Identity {
        self.insert_account(phone, user, false)
    }

    fn insert_account(&self, phone: &str, user: SenderId, authorized: bool) -> Identity {
        let account = AccountId::new(phone);
        let identity = Identity {
            id: user,
            phone: account.to_string(),
        };
        let mut world = self.world.lock();
        world.users.entry(user).or_insert_with(|| SenderProfile {
            id: user,
            first_name: Some(account.to_string()),
            last_name: None,
            username: None,
        });
        world.accounts.insert(
            account,
            AccountEntry {
                identity: identity.clone(),
                authorized,
                connected: false,
                connects: 0,
                failing_connects: 0,
                dropped: Arc::new(Notify::new()),
            },
        );
        identity
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    pub fn client(&self, account: &AccountId) -> SandboxClient {
        SandboxClient {
            world: self.world.clone(),
            account: account.clone(),
        }
    }

    // ── Fault injection ────────────────────────────────────────────────

    /// Make every send, edit and delete into `room` fail.
    pub fn fail_room(&self, room: ChatId) {
        self.world.lock().failing_rooms.insert(room);
    }

    pub fn heal_room(&self, room: ChatId) {
        self.world.lock().failing_rooms.remove(&room);
    }

    pub fn fail_next_connects(&self, account: &AccountId, count: u32) {
        if let Some(entry) = self.world.lock().accounts.get_mut(account) {
            entry.failing_connects = count;
        }
    }

    /// Sever `account`'s connection, as a network drop would.
    pub fn drop_connection(&self, account: &AccountId) {
        let mut world = self.world.lock();
        let Some(entry) = world.accounts.get_mut(account) else {
            return;
        };
        if !entry.connected {
            return;
        }
        entry.connected = false;
        entry.dropped.notify_one();
        world.subscribers.retain(|s| &s.account != account);
    }

    // ── Activity from outside the engine ───────────────────────────────

    /// Post a text message as `author`, e.g. from a user's phone. Every
    /// subscribed account sees it, including the author's own account.
    pub fn post_text(&self, room: ChatId, author: SenderId, text: &str) -> Message {
        self.post(room, author, text, Vec::new(), None, None)
    }

    pub fn post_media(
        &self,
        room: ChatId,
        author: SenderId,
        media: Media,
        caption: &str,
        group: Option<GroupId>,
    ) -> Message {
        self.post(room, author, caption, Vec::new(), Some(media), group)
    }

    pub fn post(
        &self,
        room: ChatId,
        author: SenderId,
        text: &str,
        entities: Vec<FormattingSpan>,
        media: Option<Media>,
        group: Option<GroupId>,
    ) -> Message {
        let mut world = self.world.lock();
        let id = world.next_message_id();
        let message = Message {
            id,
            chat_id: room,
            sender_id: Some(author),
            text: text.to_string(),
            entities,
            media,
            group_id: group,
        };
        if let Some(room) = world.rooms.get_mut(&room) {
            room.messages.push(message.clone());
        }
        world.emit(PlatformEvent::NewMessage(message.clone()), None);
        message
    }

    /// Edit a stored message in place and announce the edit.
    pub fn edit_post(&self, room: ChatId, message: MessageId, text: &str) -> Option<Message> {
        let mut world = self.world.lock();
        let stored = world
            .rooms
            .get_mut(&room)?
            .messages
            .iter_mut()
            .find(|m| m.id == message)?;
        stored.text = text.to_string();
        let edited = stored.clone();
        world.emit(PlatformEvent::MessageEdited(edited.clone()), None);
        Some(edited)
    }

    /// Delete stored messages and announce the delete.
    pub fn delete_post(&self, room: ChatId, messages: &[MessageId]) {
        let mut world = self.world.lock();
        let mut sender = None;
        if let Some(stored) = world.rooms.get_mut(&room) {
            stored.messages.retain(|m| {
                if messages.contains(&m.id) {
                    sender = sender.or(m.sender_id);
                    false
                } else {
                    true
                }
            });
        }
        world.emit(
            PlatformEvent::MessageDeleted {
                chat_id: Some(room),
                sender_id: sender,
                message_ids: messages.to_vec(),
            },
            None,
        );
    }

    // ── Inspection ─────────────────────────────────────────────────────

    /// Messages currently in `room`, oldest first.
    pub fn messages(&self, room: ChatId) -> Vec<Message> {
        self.world
            .lock()
            .rooms
            .get(&room)
            .map(|r| r.messages.clone())
            .unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<SandboxCall> {
        self.world.lock().calls.clone()
    }

    /// Sends into `room`, in call order.
    pub fn sends_to(&self, room: ChatId) -> Vec<SandboxCall> {
        self.world
            .lock()
            .calls
            .iter()
            .filter(|c| c.is_send() && c.room() == Some(room))
            .cloned()
            .collect()
    }

    pub fn connects(&self, account: &AccountId) -> u32 {
        self.world
            .lock()
            .accounts
            .get(account)
            .map_or(0, |a| a.connects)
    }

    pub fn is_connected(&self, account: &AccountId) -> bool {
        self.world
            .lock()
            .accounts
            .get(account)
            .is_some_and(|a| a.connected)
    }

    /// Live subscriptions held by `account`.
    pub fn subscriber_count(&self, account: &AccountId) -> usize {
        self.world
            .lock()
            .subscribers
            .iter()
            .filter(|s| &s.account == account && !s.tx.is_closed())
            .count()
    }
}

impl Connector for SandboxNetwork {
    fn client_for(&self, account: &AccountConfig) -> Arc<dyn PlatformClient> {
        Arc::new(self.client(&account.phone))
    }
}

/// One account's view of the [`SandboxNetwork`].
pub struct SandboxClient {
    world: Arc<Mutex<World>>,
    account: AccountId,
}

impl SandboxClient {
    /// Store a message authored by this account and announce it to the
    /// other accounts.
    fn author(
        &self,
        room: ChatId,
        text: &str,
        entities: &[FormattingSpan],
        media: Option<Media>,
        group: Option<GroupId>,
    ) -> Result<SentMessage, PlatformError> {
        let mut world = self.world.lock();
        let user = world.connected_entry(&self.account)?.identity.id;
        world.writable_room(room)?;
        let id = world.next_message_id();
        let message = Message {
            id,
            chat_id: room,
            sender_id: Some(user),
            text: text.to_string(),
            entities: entities.to_vec(),
            media,
            group_id: group,
        };
        world.writable_room(room)?.messages.push(message.clone());
        world.emit(PlatformEvent::NewMessage(message), Some(&self.account));
        Ok(SentMessage { chat_id: room, id })
    }
}

#[async_trait]
impl PlatformClient for SandboxClient {
    async fn connect(&self) -> Result<(), PlatformError> {
        let mut world = self.world.lock();
        let Some(entry) = world.accounts.get_mut(&self.account) else {
            return Err(PlatformError::Network(format!("unknown account {}", self.account)));
        };
        if entry.failing_connects > 0 {
            entry.failing_connects -= 1;
            return Err(PlatformError::Network("connection refused".into()));
        }
        entry.connected = true;
        entry.connects += 1;
        Ok(())
    }

    async fn disconnect(&self) {
        let mut world = self.world.lock();
        if let Some(entry) = world.accounts.get_mut(&self.account) {
            entry.connected = false;
        }
        world.subscribers.retain(|s| s.account != self.account);
    }

    async fn is_authorized(&self) -> Result<bool, PlatformError> {
        let world = self.world.lock();
        Ok(world.connected_entry(&self.account)?.authorized)
    }

    async fn get_self(&self) -> Result<Identity, PlatformError> {
        let world = self.world.lock();
        Ok(world.connected_entry(&self.account)?.identity.clone())
    }

    async fn wait_disconnected(&self) -> PlatformError {
        let dropped = self
            .world
            .lock()
            .accounts
            .get(&self.account)
            .map(|a| a.dropped.clone());
        match dropped {
            Some(dropped) => {
                dropped.notified().await;
                PlatformError::Network("connection dropped".into())
            }
            None => std::future::pending().await,
        }
    }

    async fn send_text(
        &self,
        room: ChatId,
        text: &str,
        entities: &[FormattingSpan],
    ) -> Result<SentMessage, PlatformError> {
        let sent = self.author(room, text, entities, None, None)?;
        self.world.lock().calls.push(SandboxCall::SendText {
            account: self.account.clone(),
            room,
            text: text.to_string(),
            at: Instant::now(),
        });
        Ok(sent)
    }

    async fn send_media(
        &self,
        room: ChatId,
        media: &[Media],
        caption: Option<&str>,
        entities: &[FormattingSpan],
    ) -> Result<Vec<SentMessage>, PlatformError> {
        if media.is_empty() {
            return Err(PlatformError::Rejected("no media to send".into()));
        }
        let group = if media.len() > 1 {
            let mut world = self.world.lock();
            Some(GroupId(world.next_message_id().0))
        } else {
            None
        };
        let mut sent = Vec::with_capacity(media.len());
        for (index, item) in media.iter().enumerate() {
            let (text, spans) = match (index, caption) {
                (0, Some(caption)) => (caption, entities),
                _ => ("", &[][..]),
            };
            sent.push(self.author(room, text, spans, Some(item.clone()), group)?);
        }
        self.world.lock().calls.push(SandboxCall::SendMedia {
            account: self.account.clone(),
            room,
            items: media.len(),
            caption: caption.map(str::to_string),
            at: Instant::now(),
        });
        Ok(sent)
    }

    async fn edit_message(
        &self,
        room: ChatId,
        message: MessageId,
        text: &str,
        entities: &[FormattingSpan],
        media: Option<&Media>,
    ) -> Result<(), PlatformError> {
        let mut world = self.world.lock();
        world.connected_entry(&self.account)?;
        let stored = world
            .writable_room(room)?
            .messages
            .iter_mut()
            .find(|m| m.id == message)
            .ok_or_else(|| PlatformError::NotFound(format!("message {message}")))?;
        stored.text = text.to_string();
        stored.entities = entities.to_vec();
        if let Some(media) = media {
            stored.media = Some(media.clone());
        }
        let edited = stored.clone();
        world.calls.push(SandboxCall::Edit {
            account: self.account.clone(),
            room,
            message,
            text: text.to_string(),
        });
        world.emit(PlatformEvent::MessageEdited(edited), Some(&self.account));
        Ok(())
    }

    async fn delete_messages(&self, room: ChatId, messages: &[MessageId]) -> Result<(), PlatformError> {
        let mut world = self.world.lock();
        let user = world.connected_entry(&self.account)?.identity.id;
        world
            .writable_room(room)?
            .messages
            .retain(|m| !messages.contains(&m.id));
        world.calls.push(SandboxCall::Delete {
            account: self.account.clone(),
            room,
            messages: messages.to_vec(),
        });
        world.emit(
            PlatformEvent::MessageDeleted {
                chat_id: Some(room),
                sender_id: Some(user),
                message_ids: messages.to_vec(),
            },
            Some(&self.account),
        );
        Ok(())
    }

    async fn recent_own_messages(&self, room: ChatId, limit: usize) -> Result<Vec<Message>, PlatformError> {
        let world = self.world.lock();
        let user = world.connected_entry(&self.account)?.identity.id;
        let stored = world
            .rooms
            .get(&room)
            .ok_or_else(|| PlatformError::NotFound(format!("room {room}")))?;
        Ok(stored
            .messages
            .iter()
            .rev()
            .filter(|m| m.sender_id == Some(user))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_conversations(&self) -> Result<Vec<Conversation>, PlatformError> {
        let world = self.world.lock();
        world.connected_entry(&self.account)?;
        let mut conversations: Vec<Conversation> = world
            .rooms
            .iter()
            .map(|(id, room)| Conversation {
                id: *id,
                title: room.title.clone(),
            })
            .collect();
        conversations.sort_by_key(|c| c.id);
        Ok(conversations)
    }

    async fn resolve_entity(&self, room: ChatId) -> Result<Conversation, PlatformError> {
        let world = self.world.lock();
        world.connected_entry(&self.account)?;
        world
            .rooms
            .get(&room)
            .map(|r| Conversation {
                id: room,
                title: r.title.clone(),
            })
            .ok_or_else(|| PlatformError::NotFound(format!("room {room}")))
    }

    async fn resolve_sender(&self, sender: SenderId) -> Result<SenderProfile, PlatformError> {
        let world = self.world.lock();
        world.connected_entry(&self.account)?;
        world
            .users
            .get(&sender)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("user {sender}")))
    }

    fn subscribe(&self, kind: EventKind, filter: EventFilter) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut world = self.world.lock();
        world.next_subscription += 1;
        let id = SubscriptionId(world.next_subscription);
        world.subscribers.push(Subscriber {
            account: self.account.clone(),
            id,
            kind,
            filter,
            tx,
        });
        Subscription {
            id,
            kind,
            events: rx,
        }
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.world.lock().subscribers.retain(|s| s.id != id);
    }

    async fn apply_group_permissions(
        &self,
        room: &Conversation,
        permissions: GroupPermissions,
    ) -> Result<(), PlatformError> {
        let mut world = self.world.lock();
        world.connected_entry(&self.account)?;
        let kind = world
            .rooms
            .get(&room.id)
            .map(|r| r.kind)
            .ok_or_else(|| PlatformError::NotFound(format!("room {}", room.id)))?;
        let accepted = matches!(
            (kind, permissions.shape),
            (RoomKind::BasicGroup, PermissionShape::BasicGroup)
                | (RoomKind::Supergroup | RoomKind::Channel, PermissionShape::Broadcast)
        );
        world.calls.push(SandboxCall::Permissions {
            account: self.account.clone(),
            room: room.id,
            shape: permissions.shape,
            banned: permissions.banned,
            accepted,
        });
        if accepted {
            Ok(())
        } else {
            Err(PlatformError::Rejected(format!(
                "{:?} permissions do not apply to {:?}",
                permissions.shape, kind
            )))
        }
    }

    async fn join_chat(&self, target: &JoinTarget) -> Result<(), PlatformError> {
        let mut world = self.world.lock();
        world.connected_entry(&self.account)?;
        world.calls.push(SandboxCall::Join {
            account: self.account.clone(),
            target: target.clone(),
        });
        Ok(())
    }

    async fn leave_chat(&self, target: &JoinTarget) -> Result<(), PlatformError> {
        let mut world = self.world.lock();
        world.connected_entry(&self.account)?;
        world.calls.push(SandboxCall::Leave {
            account: self.account.clone(),
            target: target.clone(),
        });
        match target {
            JoinTarget::Invite(_) => Err(PlatformError::Rejected(
                "basic groups joined by invite cannot be left by link".into(),
            )),
            JoinTarget::Public(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network() -> (SandboxNetwork, SandboxClient, SandboxClient) {
        let network = SandboxNetwork::new();
        network.add_room(ChatId(-1001), "main", RoomKind::Supergroup);
        network.add_account("+100", SenderId(1));
        network.add_account("+200", SenderId(2));
        let a = network.client(&AccountId::new("+100"));
        let b = network.client(&AccountId::new("+200"));
        (network, a, b)
    }

    #[tokio::test]
    async fn own_sends_are_not_echoed() {
        let (_network, a, b) = network();
        a.connect().await.unwrap();
        b.connect().await.unwrap();
        let mut mine = a.subscribe(EventKind::NewMessage, EventFilter::All);
        let mut theirs = b.subscribe(EventKind::NewMessage, EventFilter::All);

        a.send_text(ChatId(-1001), "hi", &[]).await.unwrap();

        assert!(mine.events.try_recv().is_err());
        let event = theirs.events.try_recv().unwrap();
        assert_eq!(event.sender_id(), Some(SenderId(1)));
    }

    #[tokio::test]
    async fn failing_room_rejects_sends() {
        let (network, a, _b) = network();
        a.connect().await.unwrap();
        network.fail_room(ChatId(-1001));
        let err = a.send_text(ChatId(-1001), "hi", &[]).await.unwrap_err();
        assert!(matches!(err, PlatformError::Rejected(_)));
        assert!(network.messages(ChatId(-1001)).is_empty());
    }

    #[tokio::test]
    async fn dropped_connection_wakes_waiter() {
        let (network, a, _b) = network();
        a.connect().await.unwrap();
        network.drop_connection(&AccountId::new("+100"));
        let reason = a.wait_disconnected().await;
        assert!(matches!(reason, PlatformError::Network(_)));
        assert!(!network.is_connected(&AccountId::new("+100")));
    }

    #[tokio::test]
    async fn album_send_yields_one_message_per_item() {
        let (network, a, _b) = network();
        a.connect().await.unwrap();
        let media = vec![
            Media::new(roomsync_models::MediaKind::Photo, "p1"),
            Media::new(roomsync_models::MediaKind::Photo, "p2"),
        ];
        let sent = a
            .send_media(ChatId(-1001), &media, Some("pics"), &[])
            .await
            .unwrap();
        assert_eq!(sent.len(), 2);
        let stored = network.messages(ChatId(-1001));
        assert_eq!(stored[0].text, "pics");
        assert_eq!(stored[1].text, "");
        assert_eq!(network.sends_to(ChatId(-1001)).len(), 1);
    }
}
