mod common;

use common::{network_with_rooms, person, phone, settings, TestContext};
use roomsync_core::alert::format_alert;
use roomsync_core::subscriptions::Mode;
use roomsync_models::settings::AlertSettings;
use roomsync_models::{AccountConfig, ChatId, RoomKind, SenderId};

const LOBBY: ChatId = ChatId(-1006000);
const QUIET: ChatId = ChatId(-1006001);
const NOTIFY: ChatId = ChatId(-1006002);
const ADA: SenderId = SenderId(950);

async fn alert_context() -> anyhow::Result<TestContext> {
    let network = network_with_rooms(&[QUIET, NOTIFY]);
    network.add_room(LOBBY, "Lobby", RoomKind::Supergroup);
    network.add_account("+100", SenderId(100));
    network.add_account("+200", SenderId(200));
    network.add_user(person(950, "Ada", "Lovelace"));

    let mut monitor = AccountConfig::new("+100");
    monitor.alert_monitor = true;
    monitor.alert_rooms = vec![LOBBY];
    let mut settings = settings(vec![monitor, AccountConfig::new("+200")]);
    settings.alert = AlertSettings {
        enabled: true,
        notify_room: Some(NOTIFY),
    };
    TestContext::start(network, settings).await
}

#[tokio::test(start_paused = true)]
async fn outside_message_is_announced() -> anyhow::Result<()> {
    let ctx = alert_context().await?;

    ctx.network.post_text(LOBBY, ADA, "anyone here?");
    ctx.network.post_text(QUIET, ADA, "not watched");
    ctx.settle().await;

    assert_eq!(
        ctx.texts(NOTIFY),
        vec![format_alert("Lobby", LOBBY, "Ada Lovelace", "anyone here?")]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn managed_accounts_do_not_trigger_alerts() -> anyhow::Result<()> {
    let ctx = alert_context().await?;

    ctx.network.post_text(LOBBY, SenderId(200), "from a sibling account");
    ctx.network.post_text(LOBBY, SenderId(100), "from the monitor itself");
    ctx.settle().await;

    assert!(ctx.texts(NOTIFY).is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn disabling_alerts_tears_down_the_relay() -> anyhow::Result<()> {
    let ctx = alert_context().await?;
    let monitor = phone("+100");
    assert_eq!(ctx.engine.subscription_count(&monitor, Mode::Alert).await, 1);
    assert_eq!(ctx.engine.subscription_count(&phone("+200"), Mode::Alert).await, 0);

    ctx.engine.set_alert(AlertSettings::default()).await;
    assert_eq!(ctx.engine.subscription_count(&monitor, Mode::Alert).await, 0);

    ctx.network.post_text(LOBBY, ADA, "hello?");
    ctx.settle().await;
    assert!(ctx.texts(NOTIFY).is_empty());
    Ok(())
}
