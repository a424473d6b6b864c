mod common;

use std::time::Duration;

use common::{account, network_with_rooms, phone, settings, test_config, TestContext};
use roomsync_core::{CoreError, Engine};
use roomsync_models::{ChatId, SenderId};

const MAIN: ChatId = ChatId(-1007001);
const SUB: ChatId = ChatId(-1007002);
const OWNER: SenderId = SenderId(100);

async fn single_account() -> anyhow::Result<TestContext> {
    let network = network_with_rooms(&[MAIN, SUB]);
    network.add_account("+100", OWNER);
    TestContext::start(network, settings(vec![account("+100", MAIN, &[SUB])])).await
}

#[tokio::test(start_paused = true)]
async fn dropped_connection_is_reestablished() -> anyhow::Result<()> {
    let ctx = single_account().await?;
    let id = phone("+100");

    ctx.network.drop_connection(&id);
    ctx.settle().await;

    assert!(ctx.engine.is_live(&id));
    assert_eq!(ctx.network.connects(&id), 2);
    ctx.network.post_text(MAIN, OWNER, "after reconnect");
    ctx.settle().await;
    assert_eq!(ctx.texts(SUB), vec!["after reconnect"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_connects_are_retried_after_backoff() -> anyhow::Result<()> {
    let network = network_with_rooms(&[MAIN, SUB]);
    network.add_account("+100", OWNER);
    let id = phone("+100");
    network.fail_next_connects(&id, 2);

    let engine = Engine::new(
        test_config(),
        settings(vec![account("+100", MAIN, &[SUB])]),
        network.connector(),
    );
    engine.start();
    assert!(!engine.wait_until_live(&id, Duration::from_secs(1)).await);
    assert!(engine.wait_until_live(&id, Duration::from_secs(30)).await);
    assert_eq!(network.connects(&id), 1);
    engine.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unauthorized_account_is_not_retried() -> anyhow::Result<()> {
    let network = network_with_rooms(&[MAIN]);
    network.add_unauthorized_account("+100", OWNER);
    let id = phone("+100");
    let engine = Engine::new(
        test_config(),
        settings(vec![account("+100", MAIN, &[])]),
        network.connector(),
    );
    engine.start();
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert!(!engine.is_live(&id));
    assert!(engine.worker(&id).is_some_and(|w| w.is_finished()));
    assert_eq!(network.connects(&id), 1);
    assert!(!network.is_connected(&id));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn submitted_job_runs_as_the_account() -> anyhow::Result<()> {
    let ctx = single_account().await?;

    let identity = ctx
        .engine
        .submit_to(&phone("+100"), |ctx| async move { ctx.identity.clone() })
        .await?;

    assert_eq!(identity.id, OWNER);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn slow_job_times_out() -> anyhow::Result<()> {
    let ctx = single_account().await?;
    let handle = ctx
        .engine
        .worker(&phone("+100"))
        .ok_or_else(|| anyhow::anyhow!("worker missing"))?;

    let result = handle
        .submit(Duration::from_millis(100), |_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;

    assert!(matches!(result, Err(CoreError::Timeout)));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn unknown_account_has_no_worker() -> anyhow::Result<()> {
    let ctx = single_account().await?;

    let result = ctx
        .engine
        .submit_to(&phone("+999"), |_| async {})
        .await;

    assert!(matches!(result, Err(CoreError::WorkerUnavailable(_))));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn shutdown_disconnects_and_unsubscribes() -> anyhow::Result<()> {
    let ctx = single_account().await?;
    let id = phone("+100");
    assert_eq!(ctx.network.subscriber_count(&id), 3);

    ctx.engine.shutdown().await;

    assert!(!ctx.network.is_connected(&id));
    assert_eq!(ctx.network.subscriber_count(&id), 0);
    assert!(!ctx.engine.is_live(&id));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn restarted_worker_reconnects_and_resumes() -> anyhow::Result<()> {
    let ctx = single_account().await?;
    let id = phone("+100");

    ctx.engine.restart_worker(&id).await?;
    assert!(ctx.engine.wait_until_live(&id, Duration::from_secs(5)).await);

    assert_eq!(ctx.network.connects(&id), 2);
    assert_eq!(ctx.network.subscriber_count(&id), 3);
    ctx.network.post_text(MAIN, OWNER, "after restart");
    ctx.settle().await;
    assert_eq!(ctx.texts(SUB), vec!["after restart"]);

    let missing = ctx.engine.restart_worker(&phone("+999")).await;
    assert!(matches!(missing, Err(CoreError::NotFound)));
    Ok(())
}
