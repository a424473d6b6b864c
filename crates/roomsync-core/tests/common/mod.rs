#![allow(dead_code)]

use std::time::Duration;

use anyhow::ensure;
use roomsync_core::sandbox::SandboxNetwork;
use roomsync_core::{Engine, EngineConfig, RuntimeSettings};
use roomsync_models::{AccountConfig, AccountId, ChatId, RoomKind, SenderId, SenderProfile};

pub const SEND_DELAY: Duration = Duration::from_millis(500);

pub struct TestContext {
    pub network: SandboxNetwork,
    pub engine: Engine,
}

impl TestContext {
    /// Start an engine over `network` and wait until every configured
    /// account is connected.
    pub async fn start(network: SandboxNetwork, settings: RuntimeSettings) -> anyhow::Result<Self> {
        let accounts: Vec<AccountConfig> = settings.accounts.clone();
        let engine = Engine::new(test_config(), settings, network.connector());
        engine.start();
        for account in &accounts {
            let live = engine
                .wait_until_live(&account.phone, Duration::from_secs(5))
                .await;
            ensure!(live, "account {} did not connect", account.phone);
        }
        Ok(Self { network, engine })
    }

    /// Let every pending handler, pacing delay and album window run out.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_secs(10)).await;
    }

    pub fn texts(&self, room: ChatId) -> Vec<String> {
        self.network
            .messages(room)
            .into_iter()
            .map(|m| m.text)
            .collect()
    }
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        send_delay: SEND_DELAY,
        ..EngineConfig::default()
    }
}

pub fn account(phone: &str, main_room: ChatId, sub_rooms: &[ChatId]) -> AccountConfig {
    AccountConfig::new(phone).with_rooms(main_room, sub_rooms.to_vec())
}

pub fn settings(accounts: Vec<AccountConfig>) -> RuntimeSettings {
    RuntimeSettings {
        accounts,
        ..RuntimeSettings::default()
    }
}

pub fn phone(phone: &str) -> AccountId {
    AccountId::new(phone)
}

pub fn network_with_rooms(rooms: &[ChatId]) -> SandboxNetwork {
    let network = SandboxNetwork::new();
    for room in rooms {
        network.add_room(*room, format!("room {room}"), RoomKind::Supergroup);
    }
    network
}

pub fn person(id: i64, first: &str, last: &str) -> SenderProfile {
    SenderProfile {
        id: SenderId(id),
        first_name: Some(first.to_string()),
        last_name: (!last.is_empty()).then(|| last.to_string()),
        username: None,
    }
}
