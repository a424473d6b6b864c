//! Main-room mirroring: each account copies its main room into its sub-rooms
//! and keeps the copies in step with later edits and deletes.

use std::sync::Arc;

use async_trait::async_trait;
use roomsync_models::{AccountConfig, ChatId, EventKind, Message, MessageId, PlatformEvent};

use crate::platform::EventFilter;
use crate::store::Namespace;
use crate::subscriptions::{EventHandler, Mode, SubscriptionTable};
use crate::worker::AccountContext;
use crate::RuntimeSettings;

pub(crate) fn register(ctx: &AccountContext, settings: &RuntimeSettings, table: &mut SubscriptionTable) {
    let Some(main_room) = settings.account(&ctx.account).and_then(|a| a.main_room) else {
        return;
    };
    let handler: Arc<dyn EventHandler> = Arc::new(MirrorHandler);
    for kind in [EventKind::NewMessage, EventKind::MessageEdited, EventKind::MessageDeleted] {
        table.register(
            ctx,
            Mode::Mirror,
            kind,
            EventFilter::Chats(vec![main_room]),
            handler.clone(),
        );
    }
}

struct MirrorHandler;

#[async_trait]
impl EventHandler for MirrorHandler {
    async fn handle(&self, ctx: &AccountContext, event: PlatformEvent) {
        let Some(account) = ctx.config() else {
            return;
        };
        if !account.active {
            return;
        }
        match event {
            PlatformEvent::NewMessage(message) => on_new(ctx, &account, message).await,
            PlatformEvent::MessageEdited(message) => on_edit(ctx, &account, &message).await,
            PlatformEvent::MessageDeleted {
                chat_id,
                message_ids,
                ..
            } => {
                let room = chat_id.or(account.main_room);
                if let Some(room) = room {
                    on_delete(ctx, room, &message_ids).await;
                }
            }
        }
    }
}

/// Only the account's own posts and posts carrying a link are mirrored.
pub fn should_mirror(message: &Message, own: bool) -> bool {
    own || message.contains_link()
}

async fn on_new(ctx: &AccountContext, account: &AccountConfig, mut message: Message) {
    let engine = &ctx.engine;
    if !engine.forwarding_enabled() {
        return;
    }
    let own = message.sender_id == Some(ctx.identity.id);
    if !should_mirror(&message, own) {
        return;
    }

    if let Some(media) = &message.media {
        if !media.is_transferable() {
            tracing::debug!(account = %ctx.account, message = %message.id, kind = ?media.kind, "media kind not mirrored");
            return;
        }
        // A caption identical to the text just mirrored is dropped.
        if message.group_id.is_none() && engine.store.last_text_matches(&ctx.account, &message.text) {
            message.text.clear();
            message.entities.clear();
        }
    }

    let key = engine
        .store
        .key(Namespace::Primary, &ctx.account, message.chat_id, message.id);
    let outcomes = engine
        .forwarder
        .replicate(&*ctx.client, key, &message, &account.sub_rooms)
        .await;

    if message.group_id.is_none() {
        let last = if message.has_media() { "" } else { message.text.as_str() };
        engine.store.set_last_text(&ctx.account, last);
    }
    if !outcomes.is_empty() {
        let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
        tracing::info!(
            account = %ctx.account,
            message = %message.id,
            destinations = outcomes.len(),
            failed,
            "mirrored message"
        );
    }
}

async fn on_edit(ctx: &AccountContext, account: &AccountConfig, edited: &Message) {
    if edited.sender_id != Some(ctx.identity.id) {
        return;
    }
    let engine = &ctx.engine;
    let key = engine
        .store
        .key(Namespace::Primary, &ctx.account, edited.chat_id, edited.id);
    let report = match engine.synchronizer.replay_edit(&*ctx.client, &key, edited).await {
        Some(report) => report,
        None => {
            engine
                .synchronizer
                .positional_edit(&*ctx.client, edited.chat_id, edited, &account.sub_rooms)
                .await
        }
    };
    tracing::debug!(account = %ctx.account, message = %edited.id, applied = report.applied, failed = report.failed, "edit synchronized");
}

async fn on_delete(ctx: &AccountContext, room: ChatId, messages: &[MessageId]) {
    let engine = &ctx.engine;
    for &id in messages {
        let key = engine.store.key(Namespace::Primary, &ctx.account, room, id);
        if let Some(report) = engine.synchronizer.replay_delete(&*ctx.client, &key).await {
            tracing::debug!(account = %ctx.account, message = %id, deleted = report.applied, failed = report.failed, "delete synchronized");
        }
    }
}
