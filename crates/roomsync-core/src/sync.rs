use std::sync::Arc;

use roomsync_models::{ChatId, Message, MessageId};

use crate::pacer::Pacer;
use crate::platform::PlatformClient;
use crate::store::{ForwardKey, MappingStore, Replica};

/// How many recent own messages the positional fallback scans.
pub const DEFAULT_SCAN_LIMIT: usize = 20;

/// Per-copy tally of one replayed edit or delete.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub applied: usize,
    pub failed: usize,
}

/// Replays source edits and deletes onto recorded destination copies.
pub struct Synchronizer {
    store: Arc<MappingStore>,
    pacer: Arc<Pacer>,
    scan_limit: usize,
}

impl Synchronizer {
    pub fn new(store: Arc<MappingStore>, pacer: Arc<Pacer>, scan_limit: usize) -> Self {
        Self {
            store,
            pacer,
            scan_limit,
        }
    }

    /// Apply `edited` to every copy recorded under `key`. Returns `None`
    /// when nothing was recorded for the message.
    pub async fn replay_edit(
        &self,
        client: &dyn PlatformClient,
        key: &ForwardKey,
        edited: &Message,
    ) -> Option<SyncReport> {
        let replicas = self.store.replicas(key)?;
        Some(edit_replicas(client, &replicas, edited).await)
    }

    /// Delete every copy recorded under `key` and drop the record. The
    /// record is removed before any delete call, so replaying the same
    /// notification finds nothing. Returns `None` when nothing was recorded.
    pub async fn replay_delete(
        &self,
        client: &dyn PlatformClient,
        key: &ForwardKey,
    ) -> Option<SyncReport> {
        let replicas = self.store.take_replicas(key)?;
        Some(delete_replicas(client, &replicas).await)
    }

    /// Fallback for edits with no recorded copies: locate the edited
    /// message's position among this account's recent messages in
    /// `source_room` and edit the message at the same position in each
    /// destination, when it differs from the source.
    ///
    /// This is an approximation. It assumes every destination received the
    /// same sequence of copies and that nothing was deleted out of order
    /// within the scanned window.
    pub async fn positional_edit(
        &self,
        client: &dyn PlatformClient,
        source_room: ChatId,
        edited: &Message,
        destinations: &[ChatId],
    ) -> SyncReport {
        let mut report = SyncReport::default();
        let recent = match client.recent_own_messages(source_room, self.scan_limit).await {
            Ok(recent) => recent,
            Err(e) => {
                tracing::warn!(room = %source_room, error = %e, "failed to scan source room");
                return report;
            }
        };
        let Some(position) = recent.iter().position(|m| m.id == edited.id) else {
            tracing::debug!(message = %edited.id, "edited message outside scan window");
            return report;
        };

        let media = edited.media.as_ref().filter(|m| m.is_editable());
        for &room in destinations {
            let copies = match client.recent_own_messages(room, self.scan_limit).await {
                Ok(copies) => copies,
                Err(e) => {
                    tracing::warn!(room = %room, error = %e, "failed to scan destination room");
                    report.failed += 1;
                    continue;
                }
            };
            let Some(target) = copies.get(position) else {
                continue;
            };
            let differs =
                target.text != edited.text || target.entities != edited.entities || media.is_some();
            if !differs {
                continue;
            }
            match client
                .edit_message(room, target.id, &edited.text, &edited.entities, media)
                .await
            {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    tracing::warn!(room = %room, message = %target.id, error = %e, "failed to edit copy");
                    report.failed += 1;
                }
            }
        }
        self.pacer.pause().await;
        report
    }
}

/// Apply the edited content to each copy, continuing past failures.
pub async fn edit_replicas(
    client: &dyn PlatformClient,
    replicas: &[Replica],
    edited: &Message,
) -> SyncReport {
    let media = edited.media.as_ref().filter(|m| m.is_editable());
    let mut report = SyncReport::default();
    for replica in replicas {
        match client
            .edit_message(replica.chat, replica.message, &edited.text, &edited.entities, media)
            .await
        {
            Ok(()) => report.applied += 1,
            Err(e) => {
                tracing::warn!(room = %replica.chat, message = %replica.message, error = %e, "failed to edit copy");
                report.failed += 1;
            }
        }
    }
    report
}

/// Delete each copy, one call per room, continuing past failures.
pub async fn delete_replicas(client: &dyn PlatformClient, replicas: &[Replica]) -> SyncReport {
    let mut by_room: Vec<(ChatId, Vec<MessageId>)> = Vec::new();
    for replica in replicas {
        match by_room.iter_mut().find(|(room, _)| *room == replica.chat) {
            Some((_, ids)) => ids.push(replica.message),
            None => by_room.push((replica.chat, vec![replica.message])),
        }
    }

    let mut report = SyncReport::default();
    for (room, ids) in by_room {
        match client.delete_messages(room, &ids).await {
            Ok(()) => report.applied += ids.len(),
            Err(e) => {
                tracing::warn!(room = %room, count = ids.len(), error = %e, "failed to delete copies");
                report.failed += ids.len();
            }
        }
    }
    report
}
