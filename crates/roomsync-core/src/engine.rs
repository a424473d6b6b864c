use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use roomsync_models::settings::{AdminSettings, AlertSettings, ExpertSettings, RoomSwapSettings};
use roomsync_models::{AccountConfig, AccountId, ChatId, Identity, PermissionProfile, SenderId};

use crate::admin::{self, RoomOutcome};
use crate::commands::{self, CommandOutcome};
use crate::error::CoreError;
use crate::forward::Forwarder;
use crate::pacer::Pacer;
use crate::platform::Connector;
use crate::store::{ForwardKey, MappingStore, Replica, StoreStats};
use crate::subscriptions::{Mode, SubscriptionTable};
use crate::sync::Synchronizer;
use crate::worker::{self, AccountContext, Session, SessionSlot, WorkerHandle};
use crate::{alert, expert, mirror, room_swap, EngineConfig, RuntimeSettings};

/// Shared engine state. Cloning is cheap; every clone sees the same
/// workers, mappings and settings.
#[derive(Clone)]
pub struct Engine {
    pub config: EngineConfig,
    pub store: Arc<MappingStore>,
    pub pacer: Arc<Pacer>,
    pub forwarder: Arc<Forwarder>,
    pub synchronizer: Arc<Synchronizer>,
    settings: Arc<RwLock<RuntimeSettings>>,
    connector: Arc<dyn Connector>,
    workers: Arc<DashMap<AccountId, WorkerHandle>>,
    live: Arc<DashSet<AccountId>>,
    identities: Arc<DashMap<AccountId, Identity>>,
    /// Serializes subscription changes: connects, disconnects and mode toggles.
    registration: Arc<tokio::sync::Mutex<()>>,
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub workers: usize,
    pub live_accounts: usize,
    pub store: StoreStats,
}

impl Engine {
    pub fn new(config: EngineConfig, settings: RuntimeSettings, connector: Arc<dyn Connector>) -> Self {
        let store = Arc::new(MappingStore::new());
        let pacer = Arc::new(Pacer::new(config.send_delay));
        let forwarder = Arc::new(Forwarder::new(
            store.clone(),
            pacer.clone(),
            config.media_group_window,
        ));
        let synchronizer = Arc::new(Synchronizer::new(
            store.clone(),
            pacer.clone(),
            config.edit_scan_limit,
        ));
        Self {
            config,
            store,
            pacer,
            forwarder,
            synchronizer,
            settings: Arc::new(RwLock::new(settings)),
            connector,
            workers: Arc::new(DashMap::new()),
            live: Arc::new(DashSet::new()),
            identities: Arc::new(DashMap::new()),
            registration: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub(crate) fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    /// Start a worker for every configured account.
    pub fn start(&self) {
        let accounts = self.settings.read().accounts.clone();
        for account in &accounts {
            self.spawn_worker(account);
        }
        tracing::info!(accounts = accounts.len(), "engine started");
    }

    fn spawn_worker(&self, account: &AccountConfig) {
        let handle = worker::spawn(self.clone(), account);
        let previous = self.workers.insert(account.phone.clone(), handle);
        if let Some(previous) = previous {
            tokio::spawn(async move { previous.stop().await });
        }
    }

    /// Restart one account's worker, e.g. after its login completed.
    pub async fn restart_worker(&self, account: &AccountId) -> Result<(), CoreError> {
        let config = self.account_config(account).ok_or(CoreError::NotFound)?;
        self.stop_worker(account).await;
        self.spawn_worker(&config);
        Ok(())
    }

    pub async fn stop_worker(&self, account: &AccountId) {
        let handle = self.workers.remove(account);
        if let Some((_, handle)) = handle {
            handle.stop().await;
        }
    }

    /// Stop every worker and wait for them to disconnect.
    pub async fn shutdown(&self) {
        let accounts: Vec<AccountId> = self.workers.iter().map(|e| e.key().clone()).collect();
        for account in accounts {
            let Some((_, handle)) = self.workers.remove(&account) else {
                continue;
            };
            handle.stop().await;
        }
        tracing::info!("engine stopped");
    }

    // ── Accounts ───────────────────────────────────────────────────────

    pub fn account_config(&self, account: &AccountId) -> Option<AccountConfig> {
        self.settings.read().account(account).cloned()
    }

    pub fn settings(&self) -> RuntimeSettings {
        self.settings.read().clone()
    }

    pub fn worker(&self, account: &AccountId) -> Option<WorkerHandle> {
        self.workers.get(account).map(|h| h.value().clone())
    }

    pub fn is_live(&self, account: &AccountId) -> bool {
        self.live.contains(account)
    }

    /// Connected accounts, in configuration order.
    pub fn live_accounts(&self) -> Vec<AccountId> {
        self.settings
            .read()
            .accounts
            .iter()
            .filter(|a| self.live.contains(&a.phone))
            .map(|a| a.phone.clone())
            .collect()
    }

    pub fn identity(&self, account: &AccountId) -> Option<Identity> {
        self.identities.get(account).map(|i| i.value().clone())
    }

    /// Platform user ids of every account that has ever connected.
    pub fn managed_senders(&self) -> HashSet<SenderId> {
        self.identities.iter().map(|i| i.value().id).collect()
    }

    /// Add or replace an account and (re)start its worker.
    pub async fn upsert_account(&self, account: AccountConfig) {
        {
            let mut settings = self.settings.write();
            match settings.accounts.iter_mut().find(|a| a.phone == account.phone) {
                Some(existing) => *existing = account.clone(),
                None => settings.accounts.push(account.clone()),
            }
        }
        self.stop_worker(&account.phone).await;
        self.spawn_worker(&account);
        tracing::info!(account = %account.phone, "account configured");
    }

    pub async fn remove_account(&self, account: &AccountId) -> Result<(), CoreError> {
        let removed = {
            let mut settings = self.settings.write();
            let before = settings.accounts.len();
            settings.accounts.retain(|a| &a.phone != account);
            before != settings.accounts.len()
        };
        if !removed {
            return Err(CoreError::NotFound);
        }
        self.stop_worker(account).await;
        self.store.drop_assignments_to(account);
        tracing::info!(account = %account, "account removed");
        Ok(())
    }

    /// Pause or resume mirroring for one account without disconnecting it.
    pub fn set_account_active(&self, account: &AccountId, active: bool) -> Result<(), CoreError> {
        let mut settings = self.settings.write();
        let config = settings
            .accounts
            .iter_mut()
            .find(|a| &a.phone == account)
            .ok_or(CoreError::NotFound)?;
        config.active = active;
        tracing::info!(account = %account, active, "account activity changed");
        Ok(())
    }

    /// Wait until `account` is connected and registered, polling.
    pub async fn wait_until_live(&self, account: &AccountId, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.is_live(account) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Run `job` on `account`'s worker with the configured timeout.
    pub async fn submit_to<F, Fut, T>(&self, account: &AccountId, job: F) -> Result<T, CoreError>
    where
        F: FnOnce(AccountContext) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self
            .worker(account)
            .ok_or_else(|| CoreError::WorkerUnavailable(account.clone()))?;
        handle.submit(self.config.submit_timeout, job).await
    }

    // ── Runtime settings ───────────────────────────────────────────────

    pub fn set_send_delay(&self, delay: Duration) {
        self.pacer.set_delay(delay);
    }

    pub fn forwarding_enabled(&self) -> bool {
        self.settings.read().forwarding_enabled
    }

    pub fn set_forwarding_enabled(&self, enabled: bool) {
        self.settings.write().forwarding_enabled = enabled;
        tracing::info!(enabled, "forwarding toggled");
    }

    pub fn room_swap_settings(&self) -> RoomSwapSettings {
        self.settings.read().room_swap.clone()
    }

    pub fn expert_settings(&self) -> ExpertSettings {
        self.settings.read().expert.clone()
    }

    pub fn alert_settings(&self) -> AlertSettings {
        self.settings.read().alert.clone()
    }

    pub async fn set_room_swap(&self, room_swap: RoomSwapSettings) {
        self.reconfigure(&[Mode::RoomSwap], |s| s.room_swap = room_swap)
            .await;
    }

    /// Expert accounts stop observing room-swap sources, so both modes are
    /// re-registered.
    pub async fn set_expert(&self, expert: ExpertSettings) {
        self.reconfigure(&[Mode::Expert, Mode::RoomSwap], |s| s.expert = expert)
            .await;
    }

    pub async fn set_alert(&self, alert: AlertSettings) {
        self.reconfigure(&[Mode::Alert], |s| s.alert = alert).await;
    }

    pub fn set_admin(&self, admin: AdminSettings) {
        self.settings.write().admin = admin;
    }

    pub fn set_join_exclude(&self, exclude: HashSet<AccountId>) {
        self.settings.write().join.exclude = exclude;
    }

    /// Tear down `modes` on every connected account, apply `update`, then
    /// register the modes again under the new settings. No handler built
    /// for the old settings runs after this returns.
    async fn reconfigure(&self, modes: &[Mode], update: impl FnOnce(&mut RuntimeSettings)) {
        let _guard = self.registration.lock().await;
        let handles: Vec<WorkerHandle> = self.workers.iter().map(|e| e.value().clone()).collect();

        for handle in &handles {
            let mut slot = handle.session().lock().await;
            if let Some(session) = slot.as_mut() {
                for &mode in modes {
                    session.subscriptions.clear(&*session.ctx.client, mode).await;
                }
            }
        }

        update(&mut self.settings.write());
        let settings = self.settings.read().clone();

        for handle in &handles {
            let mut slot = handle.session().lock().await;
            if let Some(session) = slot.as_mut() {
                let Session { ctx, subscriptions } = session;
                for &mode in modes {
                    register_mode(ctx, &settings, mode, subscriptions);
                }
            }
        }
        tracing::info!(modes = ?modes, "modes reconfigured");
    }

    // ── Commands ───────────────────────────────────────────────────────

    /// Push `profile` to `rooms` through the designated admin account.
    pub async fn apply_permissions(
        &self,
        profile: &PermissionProfile,
        rooms: &[ChatId],
    ) -> Result<Vec<RoomOutcome>, CoreError> {
        admin::push_permissions(self, profile, rooms).await
    }

    /// Push the configured admin profile to the configured admin rooms.
    pub async fn apply_admin_settings(&self) -> Result<Vec<RoomOutcome>, CoreError> {
        let admin = self.settings.read().admin.clone();
        admin::push_permissions(self, &admin.profile, &admin.rooms).await
    }

    pub async fn join_all(&self, link: &str) -> Result<Vec<CommandOutcome>, CoreError> {
        commands::join_all(self, link).await
    }

    pub async fn leave_all(&self, link: &str) -> Result<Vec<CommandOutcome>, CoreError> {
        commands::leave_all(self, link).await
    }

    // ── Connection bookkeeping ─────────────────────────────────────────

    /// Register every enabled mode for a freshly connected account and mark
    /// it live.
    pub(crate) async fn attach(&self, ctx: AccountContext, slot: &SessionSlot) {
        let _guard = self.registration.lock().await;
        self.identities
            .insert(ctx.account.clone(), ctx.identity.clone());

        let settings = self.settings.read().clone();
        let mut subscriptions = SubscriptionTable::default();
        for mode in Mode::ALL {
            register_mode(&ctx, &settings, mode, &mut subscriptions);
        }
        let account = ctx.account.clone();
        *slot.lock().await = Some(Session { ctx, subscriptions });
        self.live.insert(account);
    }

    /// Drop every subscription of a disconnecting account.
    pub(crate) async fn detach(&self, account: &AccountId, slot: &SessionSlot) {
        let _guard = self.registration.lock().await;
        self.live.remove(account);
        let session = slot.lock().await.take();
        if let Some(mut session) = session {
            session.subscriptions.clear_all(&*session.ctx.client).await;
        }
    }

    // ── Diagnostics ────────────────────────────────────────────────────

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            workers: self.workers.len(),
            live_accounts: self.live.len(),
            store: self.store.stats(),
        }
    }

    pub fn snapshot_forward_records(&self) -> Vec<(ForwardKey, Vec<Replica>)> {
        self.store.snapshot_forward_records()
    }

    /// Number of live subscriptions `account` holds for `mode`.
    pub async fn subscription_count(&self, account: &AccountId, mode: Mode) -> usize {
        let Some(handle) = self.worker(account) else {
            return 0;
        };
        let slot = handle.session().lock().await;
        slot.as_ref().map_or(0, |s| s.subscriptions.count(mode))
    }
}

fn register_mode(
    ctx: &AccountContext,
    settings: &RuntimeSettings,
    mode: Mode,
    subscriptions: &mut SubscriptionTable,
) {
    match mode {
        Mode::Mirror => mirror::register(ctx, settings, subscriptions),
        Mode::RoomSwap => room_swap::register(ctx, settings, subscriptions),
        Mode::Expert => expert::register(ctx, settings, subscriptions),
        Mode::Alert => alert::register(ctx, settings, subscriptions),
    }
}
