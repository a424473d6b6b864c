//! Sender load balancer. Messages from monitored source rooms are copied into
//! the main room of one account per sender, then fanned out to that
//! account's sub-rooms. A sender keeps the same account while it stays
//! eligible.

use std::sync::Arc;

use async_trait::async_trait;
use roomsync_models::{AccountId, EventKind, Message, MessageId, PlatformEvent, SenderId};

use crate::error::CoreError;
use crate::forward::{send_copy, DeliveryOutcome};
use crate::platform::EventFilter;
use crate::store::{Namespace, SenderCopy};
use crate::subscriptions::{EventHandler, Mode, SubscriptionTable};
use crate::sync::SyncReport;
use crate::worker::AccountContext;
use crate::{Engine, RuntimeSettings};

pub(crate) fn register(ctx: &AccountContext, settings: &RuntimeSettings, table: &mut SubscriptionTable) {
    let room_swap = &settings.room_swap;
    if !room_swap.enabled || room_swap.source_rooms.is_empty() {
        return;
    }
    // Accounts operating expert mode do not observe room-swap sources.
    if is_expert_account(settings, &ctx.account) {
        return;
    }
    let handler: Arc<dyn EventHandler> = Arc::new(RoomSwapHandler);
    for kind in [EventKind::NewMessage, EventKind::MessageEdited, EventKind::MessageDeleted] {
        table.register(
            ctx,
            Mode::RoomSwap,
            kind,
            EventFilter::Chats(room_swap.source_rooms.clone()),
            handler.clone(),
        );
    }
}

/// Accounts that may receive a sender: configured, active, with a main room,
/// not excluded, not operating expert mode, and currently connected.
pub fn eligible_accounts(engine: &Engine) -> Vec<AccountId> {
    let settings = engine.settings();
    settings
        .accounts
        .iter()
        .filter(|a| a.active && a.main_room.is_some())
        .filter(|a| !settings.room_swap.exclude_accounts.contains(&a.phone))
        .filter(|a| !is_expert_account(&settings, &a.phone))
        .filter(|a| engine.is_live(&a.phone))
        .map(|a| a.phone.clone())
        .collect()
}

fn is_expert_account(settings: &RuntimeSettings, account: &AccountId) -> bool {
    settings.expert.enabled && settings.expert.accounts.contains(account)
}

struct RoomSwapHandler;

#[async_trait]
impl EventHandler for RoomSwapHandler {
    async fn handle(&self, ctx: &AccountContext, event: PlatformEvent) {
        match event {
            PlatformEvent::NewMessage(message) => on_new(ctx, message).await,
            PlatformEvent::MessageEdited(message) => on_edit(ctx, message).await,
            PlatformEvent::MessageDeleted {
                sender_id,
                message_ids,
                ..
            } => on_delete(ctx, sender_id, &message_ids).await,
        }
    }
}

async fn on_new(ctx: &AccountContext, message: Message) {
    let Some(sender) = message.sender_id else {
        return;
    };
    let engine = &ctx.engine;
    let settings = engine.room_swap_settings();
    if !settings.enabled {
        return;
    }

    let profile = match ctx.client.resolve_sender(sender).await {
        Ok(profile) => profile,
        Err(e) => {
            tracing::warn!(account = %ctx.account, sender = %sender, error = %e, "failed to resolve sender");
            return;
        }
    };
    let name = profile.display_name();
    if settings.exclude_senders.contains(&name) {
        if engine.store.drop_assignment(sender).is_some() {
            tracing::info!(sender = %sender, name = %name, "excluded sender unassigned");
        }
        return;
    }

    let eligible = eligible_accounts(engine);
    let Some(target) = engine.store.assign_sender(sender, &eligible) else {
        tracing::debug!(sender = %sender, "no eligible account for sender");
        return;
    };
    // Every observing account sees the message; only the assigned one acts.
    if target != ctx.account {
        return;
    }

    let source = message.id;
    let result = engine
        .submit_to(&target, move |tctx| async move {
            copy_into_tree(&tctx, sender, &message).await
        })
        .await;
    match result {
        Ok(Ok(outcomes)) => {
            tracing::info!(account = %target, sender = %sender, source = %source, destinations = outcomes.len(), "sender message copied");
        }
        Ok(Err(e)) | Err(e) => {
            tracing::warn!(account = %target, sender = %sender, source = %source, error = %e, "failed to copy sender message");
        }
    }
}

/// Post `message` into the account's main room, remember the copy, then
/// forward the copy to the account's sub-rooms.
async fn copy_into_tree(
    ctx: &AccountContext,
    sender: SenderId,
    message: &Message,
) -> Result<Vec<DeliveryOutcome>, CoreError> {
    let account = ctx.config().ok_or(CoreError::NotFound)?;
    let main_room = account
        .main_room
        .ok_or_else(|| CoreError::Configuration(format!("account {} has no main room", ctx.account)))?;
    let engine = &ctx.engine;

    let sent = send_copy(&*ctx.client, main_room, message).await?;
    let first = sent
        .first()
        .ok_or_else(|| CoreError::Internal("send returned no message".into()))?;
    engine.store.record_sender_copy(
        sender,
        message.id,
        SenderCopy {
            account: ctx.account.clone(),
            main_room,
            message: first.id,
        },
    );
    engine.pacer.pause().await;

    let copy = message.readdressed(main_room, first.id);
    let key = engine
        .store
        .key(Namespace::Primary, &ctx.account, main_room, first.id);
    Ok(engine
        .forwarder
        .fan_out(&*ctx.client, key, &copy, &account.sub_rooms)
        .await)
}

async fn on_edit(ctx: &AccountContext, edited: Message) {
    let Some(sender) = edited.sender_id else {
        return;
    };
    let engine = &ctx.engine;
    let Some(copy) = engine.store.sender_copy(sender, edited.id) else {
        return;
    };
    if copy.account != ctx.account {
        return;
    }
    let owner = copy.account.clone();
    let result = engine
        .submit_to(&owner, move |tctx| async move { edit_tree(&tctx, &copy, &edited).await })
        .await;
    if let Err(e) = result {
        tracing::warn!(account = %owner, sender = %sender, error = %e, "failed to synchronize sender edit");
    }
}

async fn edit_tree(ctx: &AccountContext, copy: &SenderCopy, edited: &Message) -> SyncReport {
    let engine = &ctx.engine;
    let mut report = SyncReport::default();
    let media = edited.media.as_ref().filter(|m| m.is_editable());
    match ctx
        .client
        .edit_message(copy.main_room, copy.message, &edited.text, &edited.entities, media)
        .await
    {
        Ok(()) => report.applied += 1,
        Err(e) => {
            tracing::warn!(room = %copy.main_room, message = %copy.message, error = %e, "failed to edit main-room copy");
            report.failed += 1;
        }
    }
    let key = engine
        .store
        .key(Namespace::Primary, &ctx.account, copy.main_room, copy.message);
    if let Some(sub) = engine.synchronizer.replay_edit(&*ctx.client, &key, edited).await {
        report.applied += sub.applied;
        report.failed += sub.failed;
    }
    report
}

async fn on_delete(ctx: &AccountContext, sender: Option<SenderId>, messages: &[MessageId]) {
    let engine = &ctx.engine;
    for &id in messages {
        let senders = match sender {
            Some(sender) => vec![sender],
            None => engine.store.senders_of(id),
        };
        for sender in senders {
            match engine.store.sender_copy(sender, id) {
                Some(copy) if copy.account == ctx.account => {}
                _ => continue,
            }
            let Some(copy) = engine.store.take_sender_copy(sender, id) else {
                continue;
            };
            let owner = copy.account.clone();
            let result = engine
                .submit_to(&owner, move |tctx| async move { delete_tree(&tctx, &copy).await })
                .await;
            if let Err(e) = result {
                tracing::warn!(account = %owner, sender = %sender, error = %e, "failed to synchronize sender delete");
            }
        }
    }
}

async fn delete_tree(ctx: &AccountContext, copy: &SenderCopy) -> SyncReport {
    let engine = &ctx.engine;
    let mut report = SyncReport::default();
    match ctx
        .client
        .delete_messages(copy.main_room, &[copy.message])
        .await
    {
        Ok(()) => report.applied += 1,
        Err(e) => {
            tracing::warn!(room = %copy.main_room, message = %copy.message, error = %e, "failed to delete main-room copy");
            report.failed += 1;
        }
    }
    let key = engine
        .store
        .key(Namespace::Primary, &ctx.account, copy.main_room, copy.message);
    if let Some(sub) = engine.synchronizer.replay_delete(&*ctx.client, &key).await {
        report.applied += sub.applied;
        report.failed += sub.failed;
    }
    report
}
