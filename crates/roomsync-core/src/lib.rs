pub mod admin;
pub mod alert;
pub mod commands;
pub mod engine;
pub mod error;
pub mod expert;
pub mod forward;
pub mod mirror;
pub mod pacer;
pub mod platform;
pub mod room_swap;
pub mod sandbox;
pub mod store;
pub mod subscriptions;
pub mod sync;
pub mod worker;

use std::time::Duration;

use roomsync_models::settings::{
    AdminSettings, AlertSettings, ExpertSettings, JoinSettings, RoomSwapSettings,
};
use roomsync_models::{AccountConfig, AccountId};

pub use engine::Engine;
pub use error::CoreError;
pub use platform::{Connector, PlatformClient, PlatformError};

/// Fixed engine parameters, set once at start-up.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Initial pacing delay; adjustable later through the engine.
    pub send_delay: Duration,
    pub media_group_window: Duration,
    /// Upper bound on any cross-worker hand-off.
    pub submit_timeout: Duration,
    pub reconnect_backoff: Duration,
    pub edit_scan_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            send_delay: Duration::from_millis(500),
            media_group_window: forward::DEFAULT_GROUP_WINDOW,
            submit_timeout: Duration::from_secs(10),
            reconnect_backoff: Duration::from_secs(5),
            edit_scan_limit: sync::DEFAULT_SCAN_LIMIT,
        }
    }
}

/// Settings that can be changed at runtime by the configuration surface.
#[derive(Clone, Debug)]
pub struct RuntimeSettings {
    /// Master switch for main-room mirroring.
    pub forwarding_enabled: bool,
    pub accounts: Vec<AccountConfig>,
    pub room_swap: RoomSwapSettings,
    pub expert: ExpertSettings,
    pub alert: AlertSettings,
    pub admin: AdminSettings,
    pub join: JoinSettings,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            forwarding_enabled: true,
            accounts: Vec::new(),
            room_swap: RoomSwapSettings::default(),
            expert: ExpertSettings::default(),
            alert: AlertSettings::default(),
            admin: AdminSettings::default(),
            join: JoinSettings::default(),
        }
    }
}

impl RuntimeSettings {
    pub fn account(&self, id: &AccountId) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| &a.phone == id)
    }
}
