use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use roomsync_models::{EventKind, PlatformEvent};
use tokio::task::{JoinHandle, JoinSet};

use crate::platform::{EventFilter, PlatformClient, Subscription, SubscriptionId};
use crate::worker::AccountContext;

/// Independent event consumers that can be switched on and off per account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Main room to sub-rooms.
    Mirror,
    RoomSwap,
    Expert,
    Alert,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Mirror, Mode::RoomSwap, Mode::Expert, Mode::Alert];
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, ctx: &AccountContext, event: PlatformEvent);
}

struct Registration {
    id: SubscriptionId,
    pump: JoinHandle<()>,
}

/// Live subscriptions of one account, grouped by mode.
#[derive(Default)]
pub struct SubscriptionTable {
    by_mode: HashMap<Mode, Vec<Registration>>,
}

impl SubscriptionTable {
    pub fn register(
        &mut self,
        ctx: &AccountContext,
        mode: Mode,
        kind: EventKind,
        filter: EventFilter,
        handler: Arc<dyn EventHandler>,
    ) {
        let subscription = ctx.client.subscribe(kind, filter);
        let id = subscription.id;
        let pump = tokio::spawn(pump(subscription, handler, ctx.clone()));
        self.by_mode
            .entry(mode)
            .or_default()
            .push(Registration { id, pump });
    }

    /// Remove every subscription of `mode`. When this returns, no handler of
    /// the mode is running or will be started for this account.
    pub async fn clear(&mut self, client: &dyn PlatformClient, mode: Mode) -> usize {
        let Some(registrations) = self.by_mode.remove(&mode) else {
            return 0;
        };
        let count = registrations.len();
        for registration in registrations {
            client.unsubscribe(registration.id);
            registration.pump.abort();
            let _ = registration.pump.await;
        }
        count
    }

    pub async fn clear_all(&mut self, client: &dyn PlatformClient) {
        for mode in Mode::ALL {
            self.clear(client, mode).await;
        }
    }

    pub fn count(&self, mode: Mode) -> usize {
        self.by_mode.get(&mode).map_or(0, Vec::len)
    }
}

/// Dispatch each event to the handler on its own task so a slow event (an
/// album waiting for its siblings) does not hold back the next one. Dropping
/// the pump aborts every dispatch still in flight.
async fn pump(mut subscription: Subscription, handler: Arc<dyn EventHandler>, ctx: AccountContext) {
    let mut inflight = JoinSet::new();
    loop {
        tokio::select! {
            event = subscription.events.recv() => match event {
                Some(event) => {
                    let handler = handler.clone();
                    let ctx = ctx.clone();
                    inflight.spawn(async move { handler.handle(&ctx, event).await });
                }
                None => break,
            },
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        tracing::error!(account = %ctx.account, kind = ?subscription.kind, "event handler panicked");
                    }
                }
            }
        }
    }
    while inflight.join_next().await.is_some() {}
}
