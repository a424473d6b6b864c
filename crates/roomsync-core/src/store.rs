use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;
use roomsync_models::{AccountId, ChatId, GroupId, Message, MessageId, SenderId};
use serde::Serialize;
use tokio::time::Instant;

/// Separates the mapping tables of modes that must not see each other's
/// records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Namespace {
    /// Main-room mirroring, including the sub-room fan-out of room-swap copies.
    Primary,
    /// Name-filtered copy mode.
    Expert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ForwardKey {
    pub namespace: Namespace,
    pub account: AccountKey,
    pub chat: ChatId,
    pub message: MessageId,
}

/// Account ids are strings; records key on an interned index instead so
/// [`ForwardKey`] stays `Copy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AccountKey(u32);

impl ForwardKey {
    pub fn with_message(self, message: MessageId) -> Self {
        Self { message, ..self }
    }
}

/// One destination copy of a source message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Replica {
    pub chat: ChatId,
    pub message: MessageId,
}

/// Copy of a room-swap message posted into the assigned account's main room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SenderCopy {
    pub account: AccountId,
    pub main_room: ChatId,
    pub message: MessageId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GroupKey {
    namespace: Namespace,
    account: AccountKey,
    group: GroupId,
}

/// Album members collected during the coalescing window.
#[derive(Debug)]
pub struct MediaGroupBuffer {
    pub key: ForwardKey,
    pub messages: Vec<Message>,
    pub destinations: Vec<ChatId>,
    pub deadline: Instant,
}

/// Diagnostic sizes of every table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub forward_records: usize,
    pub replicas: usize,
    pub sender_assignments: usize,
    pub sender_copies: usize,
    pub pending_media_groups: usize,
}

/// All forward-tracking state shared across account workers. Each table
/// sits behind its own lock; no method holds two locks at once.
#[derive(Default)]
pub struct MappingStore {
    accounts: Mutex<Vec<AccountId>>,
    forwards: Mutex<HashMap<ForwardKey, Vec<Replica>>>,
    assignments: Mutex<HashMap<SenderId, AccountId>>,
    sender_copies: Mutex<HashMap<(SenderId, MessageId), SenderCopy>>,
    media_groups: Mutex<HashMap<GroupKey, MediaGroupBuffer>>,
    last_text: Mutex<HashMap<AccountId, String>>,
}

impl MappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn account_key(&self, account: &AccountId) -> AccountKey {
        let mut accounts = self.accounts.lock();
        if let Some(pos) = accounts.iter().position(|a| a == account) {
            return AccountKey(pos as u32);
        }
        accounts.push(account.clone());
        AccountKey((accounts.len() - 1) as u32)
    }

    pub fn key(
        &self,
        namespace: Namespace,
        account: &AccountId,
        chat: ChatId,
        message: MessageId,
    ) -> ForwardKey {
        ForwardKey {
            namespace,
            account: self.account_key(account),
            chat,
            message,
        }
    }

    // ── Forward records ─────────────────────────────────────────────────────

    /// Append destination copies to the record for `key`, creating it on
    /// first use.
    pub fn record(&self, key: ForwardKey, chat: ChatId, messages: &[MessageId]) {
        if messages.is_empty() {
            return;
        }
        let mut forwards = self.forwards.lock();
        let replicas = forwards.entry(key).or_default();
        replicas.extend(messages.iter().map(|&message| Replica { chat, message }));
    }

    pub fn replicas(&self, key: &ForwardKey) -> Option<Vec<Replica>> {
        self.forwards.lock().get(key).cloned()
    }

    /// Remove and return the record; a second call for the same key yields
    /// `None`.
    pub fn take_replicas(&self, key: &ForwardKey) -> Option<Vec<Replica>> {
        self.forwards.lock().remove(key)
    }

    pub fn snapshot_forward_records(&self) -> Vec<(ForwardKey, Vec<Replica>)> {
        self.forwards
            .lock()
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }

    // ── Sender assignments ──────────────────────────────────────────────────

    pub fn assignment(&self, sender: SenderId) -> Option<AccountId> {
        self.assignments.lock().get(&sender).cloned()
    }

    pub fn drop_assignment(&self, sender: SenderId) -> Option<AccountId> {
        self.assignments.lock().remove(&sender)
    }

    /// Return the sender's account, assigning one if needed. An existing
    /// assignment to an account outside `eligible` is discarded first. New
    /// assignments prefer accounts no sender is assigned to yet.
    pub fn assign_sender(&self, sender: SenderId, eligible: &[AccountId]) -> Option<AccountId> {
        self.assign_sender_with(sender, eligible, &mut rand::thread_rng())
    }

    pub fn assign_sender_with<R: Rng + ?Sized>(
        &self,
        sender: SenderId,
        eligible: &[AccountId],
        rng: &mut R,
    ) -> Option<AccountId> {
        if eligible.is_empty() {
            return None;
        }
        let mut assignments = self.assignments.lock();
        if let Some(current) = assignments.get(&sender) {
            if eligible.contains(current) {
                return Some(current.clone());
            }
            tracing::debug!(sender = %sender, account = %current, "discarding stale sender assignment");
            assignments.remove(&sender);
        }

        let taken: HashSet<&AccountId> = assignments.values().collect();
        let free: Vec<&AccountId> = eligible.iter().filter(|a| !taken.contains(a)).collect();
        let chosen = match free.choose(rng) {
            Some(account) => (*account).clone(),
            None => eligible.choose(rng)?.clone(),
        };
        assignments.insert(sender, chosen.clone());
        Some(chosen)
    }

    /// Current (sender, account) pairs.
    pub fn assignments(&self) -> Vec<(SenderId, AccountId)> {
        self.assignments
            .lock()
            .iter()
            .map(|(s, a)| (*s, a.clone()))
            .collect()
    }

    /// Forget every sender assigned to `account`.
    pub fn drop_assignments_to(&self, account: &AccountId) -> usize {
        let mut assignments = self.assignments.lock();
        let before = assignments.len();
        assignments.retain(|_, a| a != account);
        before - assignments.len()
    }

    // ── Room-swap main-room copies ──────────────────────────────────────────

    pub fn record_sender_copy(&self, sender: SenderId, source: MessageId, copy: SenderCopy) {
        self.sender_copies.lock().insert((sender, source), copy);
    }

    pub fn sender_copy(&self, sender: SenderId, source: MessageId) -> Option<SenderCopy> {
        self.sender_copies.lock().get(&(sender, source)).cloned()
    }

    pub fn take_sender_copy(&self, sender: SenderId, source: MessageId) -> Option<SenderCopy> {
        self.sender_copies.lock().remove(&(sender, source))
    }

    /// Senders with a copy of `source` on record; used when a delete
    /// notification does not say who wrote the message.
    pub fn senders_of(&self, source: MessageId) -> Vec<SenderId> {
        self.sender_copies
            .lock()
            .keys()
            .filter(|(_, m)| *m == source)
            .map(|(s, _)| *s)
            .collect()
    }

    // ── Media groups ────────────────────────────────────────────────────────

    /// Buffer one album member. Returns `true` for the first member, whose
    /// caller is responsible for flushing once `deadline` passes.
    pub fn buffer_group_member(
        &self,
        key: ForwardKey,
        group: GroupId,
        message: Message,
        destinations: &[ChatId],
        deadline: Instant,
    ) -> bool {
        let group_key = GroupKey {
            namespace: key.namespace,
            account: key.account,
            group,
        };
        let mut groups = self.media_groups.lock();
        match groups.get_mut(&group_key) {
            Some(buffer) => {
                buffer.messages.push(message);
                false
            }
            None => {
                groups.insert(
                    group_key,
                    MediaGroupBuffer {
                        key,
                        messages: vec![message],
                        destinations: destinations.to_vec(),
                        deadline,
                    },
                );
                true
            }
        }
    }

    pub fn take_group(&self, key: &ForwardKey, group: GroupId) -> Option<MediaGroupBuffer> {
        let group_key = GroupKey {
            namespace: key.namespace,
            account: key.account,
            group,
        };
        self.media_groups.lock().remove(&group_key)
    }

    // ── Caption de-duplication ──────────────────────────────────────────────

    pub fn set_last_text(&self, account: &AccountId, text: &str) {
        self.last_text.lock().insert(account.clone(), text.to_string());
    }

    pub fn last_text_matches(&self, account: &AccountId, text: &str) -> bool {
        self.last_text
            .lock()
            .get(account)
            .is_some_and(|last| !last.is_empty() && last == text)
    }

    pub fn stats(&self) -> StoreStats {
        let (forward_records, replicas) = {
            let forwards = self.forwards.lock();
            (forwards.len(), forwards.values().map(Vec::len).sum())
        };
        StoreStats {
            forward_records,
            replicas,
            sender_assignments: self.assignments.lock().len(),
            sender_copies: self.sender_copies.lock().len(),
            pending_media_groups: self.media_groups.lock().len(),
        }
    }
}
