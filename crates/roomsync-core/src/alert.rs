//! Alert relay: messages from outside senders in monitored rooms are
//! announced in a notification room.

use std::sync::Arc;

use async_trait::async_trait;
use roomsync_models::{ChatId, EventKind, Message, PlatformEvent};

use crate::platform::EventFilter;
use crate::subscriptions::{EventHandler, Mode, SubscriptionTable};
use crate::worker::AccountContext;
use crate::RuntimeSettings;

const UNKNOWN: &str = "Unknown";

pub(crate) fn register(ctx: &AccountContext, settings: &RuntimeSettings, table: &mut SubscriptionTable) {
    if !settings.alert.enabled {
        return;
    }
    let Some(account) = settings.account(&ctx.account) else {
        return;
    };
    if !account.alert_monitor {
        return;
    }
    let filter = if account.alert_rooms.is_empty() {
        EventFilter::All
    } else {
        EventFilter::Chats(account.alert_rooms.clone())
    };
    table.register(
        ctx,
        Mode::Alert,
        EventKind::NewMessage,
        filter,
        Arc::new(AlertHandler),
    );
}

/// Text of one alert notification.
pub fn format_alert(room_name: &str, room: ChatId, sender_name: &str, text: &str) -> String {
    format!("room: {room_name} / room id: {room} / sender: {sender_name} / text: {text}")
}

struct AlertHandler;

#[async_trait]
impl EventHandler for AlertHandler {
    async fn handle(&self, ctx: &AccountContext, event: PlatformEvent) {
        if let PlatformEvent::NewMessage(message) = event {
            relay(ctx, &message).await;
        }
    }
}

async fn relay(ctx: &AccountContext, message: &Message) {
    let Some(notify_room) = ctx.engine.alert_settings().notify_room else {
        return;
    };
    if message.chat_id == notify_room {
        return;
    }
    let Some(sender) = message.sender_id else {
        return;
    };
    if sender == ctx.identity.id || ctx.engine.managed_senders().contains(&sender) {
        return;
    }

    let room_name = match ctx.client.resolve_entity(message.chat_id).await {
        Ok(room) => room.title,
        Err(_) => UNKNOWN.to_string(),
    };
    let sender_name = match ctx.client.resolve_sender(sender).await {
        Ok(profile) => profile.notification_name(),
        Err(_) => UNKNOWN.to_string(),
    };
    let text = format_alert(&room_name, message.chat_id, &sender_name, &message.text);
    match ctx.client.send_text(notify_room, &text, &[]).await {
        Ok(_) => {
            tracing::info!(account = %ctx.account, room = %message.chat_id, sender = %sender, "alert relayed");
        }
        Err(e) => {
            tracing::warn!(account = %ctx.account, room = %message.chat_id, error = %e, "failed to relay alert");
        }
    }
}
