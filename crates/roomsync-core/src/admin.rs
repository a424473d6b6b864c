use std::collections::{HashMap, HashSet};

use roomsync_models::{
    AccountId, ChatId, Conversation, GroupPermissions, PermissionProfile, PermissionShape,
};
use serde::Serialize;

use crate::error::CoreError;
use crate::platform::{PlatformClient, PlatformError};
use crate::Engine;

/// Result of pushing a permission profile to one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum PushStatus {
    /// Accepted with the given shape, which also reveals the room's kind.
    Applied(PermissionShape),
    /// Not attempted, e.g. the room is not visible to the admin account.
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomOutcome {
    pub room: ChatId,
    pub status: PushStatus,
}

/// The first configured admin account that is currently connected.
pub fn designated_admin(engine: &Engine) -> Option<AccountId> {
    engine
        .settings()
        .accounts
        .iter()
        .filter(|a| a.is_admin)
        .map(|a| a.phone.clone())
        .find(|phone| engine.is_live(phone))
}

/// Push `profile` to every room in `rooms` through the designated admin
/// account. Each room gets an outcome; nothing is retried.
pub async fn push_permissions(
    engine: &Engine,
    profile: &PermissionProfile,
    rooms: &[ChatId],
) -> Result<Vec<RoomOutcome>, CoreError> {
    let unknown = profile.unknown_names();
    if !unknown.is_empty() {
        tracing::warn!(names = ?unknown, "ignoring unknown capability names");
    }
    let admin = designated_admin(engine)
        .ok_or_else(|| CoreError::Configuration("no connected admin account".into()))?;

    let wanted = rooms.to_vec();
    let cache = engine
        .submit_to(&admin, move |ctx| async move {
            cache_rooms(&*ctx.client, &wanted).await
        })
        .await??;

    let mut outcomes = Vec::with_capacity(rooms.len());
    for &room in rooms {
        let Some(conversation) = cache.get(&room).cloned() else {
            tracing::warn!(account = %admin, room = %room, "room not in admin's conversation list, skipping");
            outcomes.push(RoomOutcome {
                room,
                status: PushStatus::Skipped("room not visible to admin account".into()),
            });
            continue;
        };
        let profile = profile.clone();
        let status = match engine
            .submit_to(&admin, move |ctx| async move {
                apply_to_room(&*ctx.client, &conversation, &profile).await
            })
            .await
        {
            Ok(status) => status,
            Err(e) => PushStatus::Failed(e.to_string()),
        };
        match &status {
            PushStatus::Applied(shape) => {
                tracing::info!(room = %room, shape = ?shape, "permissions applied")
            }
            PushStatus::Failed(reason) => {
                tracing::warn!(room = %room, reason = %reason, "failed to apply permissions")
            }
            PushStatus::Skipped(_) => {}
        }
        outcomes.push(RoomOutcome { room, status });
    }
    Ok(outcomes)
}

/// Look up every wanted room in one scan of the account's conversations.
pub async fn cache_rooms(
    client: &dyn PlatformClient,
    rooms: &[ChatId],
) -> Result<HashMap<ChatId, Conversation>, PlatformError> {
    let wanted: HashSet<ChatId> = rooms.iter().copied().collect();
    let conversations = client.list_conversations().await?;
    Ok(conversations
        .into_iter()
        .filter(|c| wanted.contains(&c.id))
        .map(|c| (c.id, c))
        .collect())
}

/// Try both permission shapes; the room's kind is not known up front. Only
/// the broadcast-shape failure is reported when both fail.
pub async fn apply_to_room(
    client: &dyn PlatformClient,
    room: &Conversation,
    profile: &PermissionProfile,
) -> PushStatus {
    let basic = client
        .apply_group_permissions(room, GroupPermissions::new(PermissionShape::BasicGroup, profile))
        .await;
    let broadcast = client
        .apply_group_permissions(room, GroupPermissions::new(PermissionShape::Broadcast, profile))
        .await;
    match (basic, broadcast) {
        (_, Ok(())) => PushStatus::Applied(PermissionShape::Broadcast),
        (Ok(()), Err(e)) => {
            tracing::debug!(room = %room.id, error = %e, "broadcast shape rejected");
            PushStatus::Applied(PermissionShape::BasicGroup)
        }
        (Err(basic), Err(e)) => {
            tracing::debug!(room = %room.id, error = %basic, "basic-group shape rejected");
            PushStatus::Failed(e.to_string())
        }
    }
}
