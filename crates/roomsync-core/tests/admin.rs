mod common;

use common::{phone, settings, TestContext};
use roomsync_core::admin::{designated_admin, PushStatus};
use roomsync_core::sandbox::{SandboxCall, SandboxNetwork};
use roomsync_core::CoreError;
use roomsync_models::{AccountConfig, Capabilities, ChatId, PermissionProfile, PermissionShape, RoomKind, SenderId};

const BASIC: ChatId = ChatId(-1005001);
const SUPER: ChatId = ChatId(-1005002);
const CHANNEL: ChatId = ChatId(-1005003);
const PRIVATE: ChatId = ChatId(-1005004);
const MISSING: ChatId = ChatId(-1005099);

fn admin(phone: &str) -> AccountConfig {
    let mut config = AccountConfig::new(phone);
    config.is_admin = true;
    config
}

async fn admin_context(accounts: Vec<AccountConfig>) -> anyhow::Result<TestContext> {
    let network = SandboxNetwork::new();
    network.add_room(BASIC, "basic", RoomKind::BasicGroup);
    network.add_room(SUPER, "super", RoomKind::Supergroup);
    network.add_room(CHANNEL, "channel", RoomKind::Channel);
    network.add_room(PRIVATE, "private", RoomKind::Private);
    for (index, account) in accounts.iter().enumerate() {
        network.add_account(account.phone.as_str(), SenderId(index as i64 + 1));
    }
    TestContext::start(network, settings(accounts)).await
}

fn no_pinning() -> PermissionProfile {
    let mut profile = PermissionProfile::new();
    profile.set("pin_message", false);
    profile
}

#[tokio::test(start_paused = true)]
async fn each_room_gets_the_shape_it_accepts() -> anyhow::Result<()> {
    let ctx = admin_context(vec![admin("+100")]).await?;

    let outcomes = ctx
        .engine
        .apply_permissions(&no_pinning(), &[BASIC, SUPER, CHANNEL, PRIVATE, MISSING])
        .await?;

    let statuses: Vec<(ChatId, PushStatus)> =
        outcomes.into_iter().map(|o| (o.room, o.status)).collect();
    assert_eq!(statuses[0], (BASIC, PushStatus::Applied(PermissionShape::BasicGroup)));
    assert_eq!(statuses[1], (SUPER, PushStatus::Applied(PermissionShape::Broadcast)));
    assert_eq!(statuses[2], (CHANNEL, PushStatus::Applied(PermissionShape::Broadcast)));
    assert!(matches!(statuses[3], (PRIVATE, PushStatus::Failed(_))));
    assert!(matches!(statuses[4], (MISSING, PushStatus::Skipped(_))));

    let pushes: Vec<SandboxCall> = ctx
        .network
        .calls()
        .into_iter()
        .filter(|c| matches!(c, SandboxCall::Permissions { .. }))
        .collect();
    // Both shapes are tried on every visible room.
    assert_eq!(pushes.len(), 8);
    for push in &pushes {
        assert!(matches!(
            push,
            SandboxCall::Permissions { banned, .. } if *banned == Capabilities::PIN_MESSAGES
        ));
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn push_needs_a_connected_admin() -> anyhow::Result<()> {
    let ctx = admin_context(vec![AccountConfig::new("+100")]).await?;

    let result = ctx.engine.apply_permissions(&no_pinning(), &[SUPER]).await;

    assert!(matches!(result, Err(CoreError::Configuration(_))));
    assert!(ctx.network.calls().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn first_connected_admin_is_designated() -> anyhow::Result<()> {
    let network = SandboxNetwork::new();
    network.add_room(SUPER, "super", RoomKind::Supergroup);
    network.add_unauthorized_account("+100", SenderId(1));
    network.add_account("+200", SenderId(2));
    network.add_account("+300", SenderId(3));
    let accounts = vec![admin("+100"), admin("+200"), admin("+300")];
    let engine = roomsync_core::Engine::new(
        common::test_config(),
        settings(accounts),
        network.connector(),
    );
    engine.start();
    assert!(
        engine
            .wait_until_live(&phone("+200"), std::time::Duration::from_secs(5))
            .await
    );
    assert!(
        engine
            .wait_until_live(&phone("+300"), std::time::Duration::from_secs(5))
            .await
    );

    assert_eq!(designated_admin(&engine), Some(phone("+200")));
    engine.apply_permissions(&PermissionProfile::new(), &[SUPER]).await?;
    assert!(network
        .calls()
        .iter()
        .all(|c| c.account() == &phone("+200")));
    engine.shutdown().await;
    Ok(())
}
