//! Expert mode: copy messages from allow-listed senders into the operating
//! account's main room and sub-rooms. Mappings live in their own namespace
//! so they never collide with main-room mirroring.

use std::sync::Arc;

use async_trait::async_trait;
use roomsync_models::{ChatId, EventKind, Message, MessageId, PlatformEvent};

use crate::error::CoreError;
use crate::forward::send_copy;
use crate::platform::EventFilter;
use crate::store::Namespace;
use crate::subscriptions::{EventHandler, Mode, SubscriptionTable};
use crate::worker::AccountContext;
use crate::RuntimeSettings;

pub(crate) fn register(ctx: &AccountContext, settings: &RuntimeSettings, table: &mut SubscriptionTable) {
    let expert = &settings.expert;
    if !expert.enabled || !expert.accounts.contains(&ctx.account) {
        return;
    }
    let filter = if expert.rooms.is_empty() {
        EventFilter::All
    } else {
        EventFilter::Chats(expert.rooms.clone())
    };
    let handler: Arc<dyn EventHandler> = Arc::new(ExpertHandler);
    for kind in [EventKind::NewMessage, EventKind::MessageEdited, EventKind::MessageDeleted] {
        table.register(ctx, Mode::Expert, kind, filter.clone(), handler.clone());
    }
}

struct ExpertHandler;

#[async_trait]
impl EventHandler for ExpertHandler {
    async fn handle(&self, ctx: &AccountContext, event: PlatformEvent) {
        match event {
            PlatformEvent::NewMessage(message) => {
                if let Err(e) = on_new(ctx, &message).await {
                    tracing::warn!(account = %ctx.account, source = %message.id, error = %e, "expert copy failed");
                }
            }
            PlatformEvent::MessageEdited(message) => on_edit(ctx, &message).await,
            PlatformEvent::MessageDeleted {
                chat_id: Some(chat_id),
                message_ids,
                ..
            } => on_delete(ctx, chat_id, &message_ids).await,
            PlatformEvent::MessageDeleted { chat_id: None, .. } => {}
        }
    }
}

async fn on_new(ctx: &AccountContext, message: &Message) -> Result<(), CoreError> {
    let engine = &ctx.engine;
    let settings = engine.expert_settings();
    if !settings.enabled || settings.names.is_empty() {
        return Ok(());
    }
    let Some(sender) = message.sender_id else {
        return Ok(());
    };
    let Some(account) = ctx.config() else {
        return Ok(());
    };
    let Some(main_room) = account.main_room else {
        return Ok(());
    };
    // The account's own tree is never a source.
    if message.chat_id == main_room || account.sub_rooms.contains(&message.chat_id) {
        return Ok(());
    }

    let profile = ctx.client.resolve_sender(sender).await?;
    let name = profile.display_name();
    if !settings.names.contains(&name) {
        return Ok(());
    }

    let key = engine
        .store
        .key(Namespace::Expert, &ctx.account, message.chat_id, message.id);
    let sent = send_copy(&*ctx.client, main_room, message).await?;
    let ids: Vec<MessageId> = sent.iter().map(|s| s.id).collect();
    engine.store.record(key, main_room, &ids);
    engine.pacer.pause().await;

    let Some(&first) = ids.first() else {
        return Ok(());
    };
    let copy = message.readdressed(main_room, first);
    let outcomes = engine
        .forwarder
        .fan_out(&*ctx.client, key, &copy, &account.sub_rooms)
        .await;
    tracing::info!(
        account = %ctx.account,
        sender = %name,
        source = %message.id,
        destinations = outcomes.len() + 1,
        "expert message copied"
    );
    Ok(())
}

async fn on_edit(ctx: &AccountContext, edited: &Message) {
    let engine = &ctx.engine;
    let key = engine
        .store
        .key(Namespace::Expert, &ctx.account, edited.chat_id, edited.id);
    if let Some(report) = engine.synchronizer.replay_edit(&*ctx.client, &key, edited).await {
        tracing::debug!(account = %ctx.account, source = %edited.id, applied = report.applied, failed = report.failed, "expert edit synchronized");
    }
}

async fn on_delete(ctx: &AccountContext, chat: ChatId, messages: &[MessageId]) {
    let engine = &ctx.engine;
    for &id in messages {
        let key = engine.store.key(Namespace::Expert, &ctx.account, chat, id);
        if let Some(report) = engine.synchronizer.replay_delete(&*ctx.client, &key).await {
            tracing::debug!(account = %ctx.account, source = %id, deleted = report.applied, failed = report.failed, "expert delete synchronized");
        }
    }
}
