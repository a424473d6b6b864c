use std::fs;
use std::time::Duration;

use anyhow::Result;
use roomsync_core::{EngineConfig, RuntimeSettings};
use roomsync_models::settings::{
    AdminSettings, AlertSettings, ExpertSettings, JoinSettings, RoomSwapSettings,
};
use roomsync_models::{AccountConfig, ChatId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub room_swap: RoomSwapSettings,
    #[serde(default)]
    pub expert: ExpertSettings,
    #[serde(default)]
    pub alert: AlertSettings,
    #[serde(default)]
    pub admin: AdminSettings,
    #[serde(default)]
    pub join: JoinSettings,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EngineSection {
    /// Delay between consecutive outbound sends.
    #[serde(default = "default_send_delay_ms")]
    pub send_delay_ms: u64,
    #[serde(default = "default_media_group_window_ms")]
    pub media_group_window_ms: u64,
    #[serde(default = "default_submit_timeout_secs")]
    pub submit_timeout_secs: u64,
    #[serde(default = "default_reconnect_backoff_secs")]
    pub reconnect_backoff_secs: u64,
    #[serde(default = "default_edit_scan_limit")]
    pub edit_scan_limit: usize,
    #[serde(default = "default_true")]
    pub forwarding_enabled: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            send_delay_ms: default_send_delay_ms(),
            media_group_window_ms: default_media_group_window_ms(),
            submit_timeout_secs: default_submit_timeout_secs(),
            reconnect_backoff_secs: default_reconnect_backoff_secs(),
            edit_scan_limit: default_edit_scan_limit(),
            forwarding_enabled: true,
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn default_send_delay_ms() -> u64 {
    500
}
fn default_media_group_window_ms() -> u64 {
    2_000
}
fn default_submit_timeout_secs() -> u64 {
    10
}
fn default_reconnect_backoff_secs() -> u64 {
    5
}
fn default_edit_scan_limit() -> usize {
    20
}
fn default_true() -> bool {
    true
}

fn generate_config_template(config: &Config) -> String {
    format!(
        r#"# roomsync configuration
# Generated automatically on first run. Edit as needed.

[engine]
# Delay between consecutive sends, in milliseconds.
send_delay_ms = {send_delay_ms}
# How long album members are collected before they are sent together.
media_group_window_ms = {media_group_window_ms}
submit_timeout_secs = {submit_timeout_secs}
reconnect_backoff_secs = {reconnect_backoff_secs}
# Recent messages scanned when an edit has no recorded copies.
edit_scan_limit = {edit_scan_limit}
forwarding_enabled = {forwarding_enabled}

# One block per managed account. Short group ids (-123) are accepted and
# rewritten to the -100 form.
# [[accounts]]
# phone = "+10000000000"
# main_room = -1001234567890
# sub_rooms = [-1001234567891, -1001234567892]
# alert_rooms = []
# is_admin = false
# alert_monitor = false
# active = true

[room_swap]
enabled = false
source_rooms = []
# Sender display names ("last first") that are never copied.
exclude_senders = []
# Accounts never chosen as copy targets.
exclude_accounts = []

[expert]
enabled = false
accounts = []
# Empty means every room the expert accounts can see.
rooms = []
names = []

[alert]
enabled = false
# notify_room = -1001234567899

[admin]
rooms = []

[admin.profile]
# Capability name = allowed. Unlisted capabilities stay allowed.
# send_message = true
# send_media_photo = true
# pin_message = false
# change_group_info = false

[join]
# Accounts that never take part in join/leave commands.
exclude = []
"#,
        send_delay_ms = config.engine.send_delay_ms,
        media_group_window_ms = config.engine.media_group_window_ms,
        submit_timeout_secs = config.engine.submit_timeout_secs,
        reconnect_backoff_secs = config.engine.reconnect_backoff_secs,
        edit_scan_limit = config.engine.edit_scan_limit,
        forwarding_enabled = config.engine.forwarding_enabled,
    )
}

// ── Config Loading ───────────────────────────────────────────────────────────

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!(
                "Config file not found at '{}', generating defaults...",
                path
            );
            let config = Config::default();

            if let Some(parent) = std::path::Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }

            let template = generate_config_template(&config);
            fs::write(path, &template)?;
            tracing::info!("Generated default config at '{}'", path);
            config
        };

        // Environment variable overrides
        if let Ok(value) = std::env::var("ROOMSYNC_SEND_DELAY_MS") {
            match value.trim().parse::<u64>() {
                Ok(parsed) => config.engine.send_delay_ms = parsed,
                Err(_) => tracing::warn!(
                    "Ignoring invalid ROOMSYNC_SEND_DELAY_MS value '{}'; expected milliseconds",
                    value
                ),
            }
        }
        if let Ok(value) = std::env::var("ROOMSYNC_FORWARDING_ENABLED") {
            match value.trim().parse::<bool>() {
                Ok(parsed) => config.engine.forwarding_enabled = parsed,
                Err(_) => tracing::warn!(
                    "Ignoring invalid ROOMSYNC_FORWARDING_ENABLED value '{}'; expected true or false",
                    value
                ),
            }
        }
        if let Ok(value) = std::env::var("ROOMSYNC_ALERT_NOTIFY_ROOM") {
            match value.trim().parse::<i64>() {
                Ok(parsed) => config.alert.notify_room = Some(ChatId(parsed).normalized()),
                Err(_) => tracing::warn!(
                    "Ignoring invalid ROOMSYNC_ALERT_NOTIFY_ROOM value '{}'; expected a chat id",
                    value
                ),
            }
        }

        Ok(config)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            send_delay: Duration::from_millis(self.engine.send_delay_ms),
            media_group_window: Duration::from_millis(self.engine.media_group_window_ms),
            submit_timeout: Duration::from_secs(self.engine.submit_timeout_secs),
            reconnect_backoff: Duration::from_secs(self.engine.reconnect_backoff_secs),
            edit_scan_limit: self.engine.edit_scan_limit,
        }
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings {
            forwarding_enabled: self.engine.forwarding_enabled,
            accounts: self.accounts.clone(),
            room_swap: self.room_swap.clone(),
            expert: self.expert.clone(),
            alert: self.alert.clone(),
            admin: self.admin.clone(),
            join: self.join.clone(),
        }
    }

    /// Every room id the configuration mentions, deduplicated.
    pub fn referenced_rooms(&self) -> Vec<ChatId> {
        let mut rooms: Vec<ChatId> = Vec::new();
        for account in &self.accounts {
            rooms.extend(account.main_room);
            rooms.extend(account.sub_rooms.iter().copied());
            rooms.extend(account.alert_rooms.iter().copied());
        }
        rooms.extend(self.room_swap.source_rooms.iter().copied());
        rooms.extend(self.expert.rooms.iter().copied());
        rooms.extend(self.alert.notify_room);
        rooms.extend(self.admin.rooms.iter().copied());
        rooms.sort();
        rooms.dedup();
        rooms
    }
}

#[cfg(test)]
mod tests {
    use super::Config;
    use roomsync_models::{AccountId, ChatId};
    use std::sync::Mutex;

    // Config::load reads process-wide environment variables.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn missing_file_writes_loadable_template() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("nested").join("roomsync.toml");
        let path = config_path.to_str().expect("config path utf8");

        let generated = Config::load(path).expect("generate config");
        assert!(config_path.exists());
        assert_eq!(generated.engine.send_delay_ms, 500);

        let reloaded = Config::load(path).expect("reload config");
        assert_eq!(reloaded.engine.media_group_window_ms, 2_000);
        assert_eq!(reloaded.engine.edit_scan_limit, 20);
        assert!(reloaded.engine.forwarding_enabled);
        assert!(reloaded.accounts.is_empty());
        assert!(!reloaded.room_swap.enabled);
    }

    #[test]
    fn parses_accounts_and_normalizes_room_ids() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("roomsync.toml");
        std::fs::write(
            &config_path,
            r#"
[engine]
send_delay_ms = 250

[[accounts]]
phone = "+100"
main_room = -2001
sub_rooms = [-2002, -1001234567890]
is_admin = true

[[accounts]]
phone = "200"
main_room = -2004
is_monitored = true
active = false

[room_swap]
enabled = true
source_rooms = [-2009]
exclude_senders = ["Doe Jane"]

[admin.profile]
pin_message = false
"#,
        )
        .expect("write config");

        let config = Config::load(config_path.to_str().expect("utf8")).expect("load config");
        assert_eq!(config.engine.send_delay_ms, 250);
        assert_eq!(config.engine.submit_timeout_secs, 10);
        assert_eq!(config.accounts.len(), 2);

        let first = &config.accounts[0];
        assert_eq!(first.phone, AccountId::new("100"));
        assert_eq!(first.main_room, Some(ChatId(-1002001)));
        // Ids already in broadcast form are left alone.
        assert_eq!(
            first.sub_rooms,
            vec![ChatId(-1002002), ChatId(-1001234567890)]
        );
        assert!(first.is_admin);
        assert!(first.active);

        let second = &config.accounts[1];
        assert!(second.alert_monitor);
        assert!(!second.active);

        assert_eq!(config.room_swap.source_rooms, vec![ChatId(-1002009)]);
        assert!(config.room_swap.exclude_senders.contains("Doe Jane"));
        assert!(!config.admin.profile.is_enabled("pin_message"));
        assert!(config.admin.profile.is_enabled("send_message"));

        let settings = config.runtime_settings();
        assert!(settings.account(&AccountId::new("+200")).is_some());
        assert_eq!(config.referenced_rooms().len(), 5);
    }

    #[test]
    fn env_override_applies_and_ignores_invalid_values() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let temp = tempfile::tempdir().expect("tempdir");
        let config_path = temp.path().join("roomsync-env.toml");
        std::env::set_var("ROOMSYNC_SEND_DELAY_MS", "0");
        std::env::set_var("ROOMSYNC_FORWARDING_ENABLED", "sometimes");
        std::env::set_var("ROOMSYNC_ALERT_NOTIFY_ROOM", "-777");
        let config =
            Config::load(config_path.to_str().expect("config path utf8")).expect("load config");
        std::env::remove_var("ROOMSYNC_SEND_DELAY_MS");
        std::env::remove_var("ROOMSYNC_FORWARDING_ENABLED");
        std::env::remove_var("ROOMSYNC_ALERT_NOTIFY_ROOM");

        assert_eq!(config.engine.send_delay_ms, 0);
        assert!(config.engine.forwarding_enabled);
        assert_eq!(config.alert.notify_room, Some(ChatId(-100777)));
    }
}
