use std::sync::Arc;
use std::time::Duration;

use roomsync_models::{ChatId, GroupId, Media, Message, MessageId, SentMessage};
use tokio::time::Instant;

use crate::pacer::Pacer;
use crate::platform::{PlatformClient, PlatformError};
use crate::store::{ForwardKey, MappingStore, MediaGroupBuffer};

/// Default coalescing window for album members.
pub const DEFAULT_GROUP_WINDOW: Duration = Duration::from_secs(2);

/// Result of sending one source message to one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub destination: ChatId,
    pub result: Result<Vec<MessageId>, PlatformError>,
}

impl DeliveryOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Replicates source messages to destination rooms and records every copy
/// in the [`MappingStore`].
pub struct Forwarder {
    store: Arc<MappingStore>,
    pacer: Arc<Pacer>,
    group_window: Duration,
}

impl Forwarder {
    pub fn new(store: Arc<MappingStore>, pacer: Arc<Pacer>, group_window: Duration) -> Self {
        Self {
            store,
            pacer,
            group_window,
        }
    }

    /// Replicate `message` to every destination, recording copies under
    /// `key`. Album members are buffered and sent together once the
    /// coalescing window closes; only the first member's call performs the
    /// send and returns outcomes.
    pub async fn replicate(
        &self,
        client: &dyn PlatformClient,
        key: ForwardKey,
        message: &Message,
        destinations: &[ChatId],
    ) -> Vec<DeliveryOutcome> {
        if !message.has_media() && message.text.is_empty() {
            tracing::debug!(message = %message.id, "nothing to replicate");
            return Vec::new();
        }
        match message.group_id {
            Some(group) => self.coalesce(client, key, group, message, destinations).await,
            None => self.fan_out(client, key, message, destinations).await,
        }
    }

    /// Send `message` to each destination in order, pausing between sends.
    /// A failed destination is logged and skipped.
    pub async fn fan_out(
        &self,
        client: &dyn PlatformClient,
        key: ForwardKey,
        message: &Message,
        destinations: &[ChatId],
    ) -> Vec<DeliveryOutcome> {
        let mut outcomes = Vec::with_capacity(destinations.len());
        for &room in destinations {
            let result = send_copy(client, room, message)
                .await
                .map(|sent| sent.iter().map(|s| s.id).collect::<Vec<_>>());
            match &result {
                Ok(ids) => self.store.record(key, room, ids),
                Err(e) => {
                    tracing::warn!(room = %room, source = %message.id, error = %e, "failed to replicate message")
                }
            }
            outcomes.push(DeliveryOutcome {
                destination: room,
                result,
            });
            self.pacer.pause().await;
        }
        outcomes
    }

    async fn coalesce(
        &self,
        client: &dyn PlatformClient,
        key: ForwardKey,
        group: GroupId,
        message: &Message,
        destinations: &[ChatId],
    ) -> Vec<DeliveryOutcome> {
        let deadline = Instant::now() + self.group_window;
        let owner =
            self.store
                .buffer_group_member(key, group, message.clone(), destinations, deadline);
        if !owner {
            return Vec::new();
        }
        tokio::time::sleep_until(deadline).await;
        match self.store.take_group(&key, group) {
            Some(buffer) => self.flush_group(client, buffer).await,
            None => Vec::new(),
        }
    }

    /// Send a buffered album as one multi-item send per destination and
    /// record each member's copy under its own key.
    pub async fn flush_group(
        &self,
        client: &dyn PlatformClient,
        buffer: MediaGroupBuffer,
    ) -> Vec<DeliveryOutcome> {
        let mut members: Vec<&Message> = buffer.messages.iter().filter(|m| m.has_media()).collect();
        members.sort_by_key(|m| m.id);
        let Some(first) = members.first() else {
            return Vec::new();
        };
        let media: Vec<Media> = members.iter().filter_map(|m| m.media.clone()).collect();
        let caption = first.caption();
        let entities = if caption.is_some() {
            first.entities.as_slice()
        } else {
            &[][..]
        };

        let mut outcomes = Vec::with_capacity(buffer.destinations.len());
        for &room in &buffer.destinations {
            let result = client.send_media(room, &media, caption, entities).await;
            let result = match result {
                Ok(sent) => {
                    for (member, copy) in members.iter().zip(sent.iter()) {
                        self.store
                            .record(buffer.key.with_message(member.id), room, &[copy.id]);
                    }
                    Ok(sent.iter().map(|s| s.id).collect())
                }
                Err(e) => {
                    tracing::warn!(room = %room, items = media.len(), error = %e, "failed to replicate media group");
                    Err(e)
                }
            };
            outcomes.push(DeliveryOutcome {
                destination: room,
                result,
            });
            self.pacer.pause().await;
        }
        outcomes
    }
}

/// Send one copy of `message` into `room`: formatted text, or the media
/// with the original caption.
pub async fn send_copy(
    client: &dyn PlatformClient,
    room: ChatId,
    message: &Message,
) -> Result<Vec<SentMessage>, PlatformError> {
    match &message.media {
        None => client
            .send_text(room, &message.text, &message.entities)
            .await
            .map(|sent| vec![sent]),
        Some(media) => {
            let caption = message.caption();
            let entities = if caption.is_some() {
                message.entities.as_slice()
            } else {
                &[][..]
            };
            client
                .send_media(room, std::slice::from_ref(media), caption, entities)
                .await
        }
    }
}
