mod common;

use std::collections::HashSet;

use common::{account, network_with_rooms, person, phone, settings, TestContext};
use roomsync_core::store::Namespace;
use roomsync_core::RuntimeSettings;
use roomsync_models::settings::{ExpertSettings, RoomSwapSettings};
use roomsync_models::{AccountId, ChatId, SenderId};

const SOURCE: ChatId = ChatId(-1003000);
const MAIN_A: ChatId = ChatId(-1003001);
const SUB_A: ChatId = ChatId(-1003002);
const MAIN_B: ChatId = ChatId(-1003011);
const SUB_B: ChatId = ChatId(-1003012);
const X: SenderId = SenderId(900);
const Y: SenderId = SenderId(901);

fn room_swap_settings(exclude_senders: &[&str], exclude_accounts: &[&str]) -> RuntimeSettings {
    let mut settings = settings(vec![
        account("+100", MAIN_A, &[SUB_A]),
        account("+200", MAIN_B, &[SUB_B]),
    ]);
    settings.room_swap = RoomSwapSettings {
        enabled: true,
        source_rooms: vec![SOURCE],
        exclude_senders: exclude_senders.iter().map(|s| s.to_string()).collect(),
        exclude_accounts: exclude_accounts.iter().map(|s| AccountId::new(s)).collect(),
    };
    settings
}

async fn room_swap_context(settings: RuntimeSettings) -> anyhow::Result<TestContext> {
    let network = network_with_rooms(&[SOURCE, MAIN_A, SUB_A, MAIN_B, SUB_B]);
    network.add_account("+100", SenderId(100));
    network.add_account("+200", SenderId(200));
    network.add_user(person(900, "X", ""));
    network.add_user(person(901, "Y", ""));
    network.add_user(person(902, "Jane", "Doe"));
    TestContext::start(network, settings).await
}

fn tree_of(account: &AccountId) -> (ChatId, ChatId) {
    if account == &phone("+100") {
        (MAIN_A, SUB_A)
    } else {
        (MAIN_B, SUB_B)
    }
}

#[tokio::test(start_paused = true)]
async fn sender_sticks_to_one_account() -> anyhow::Result<()> {
    let ctx = room_swap_context(room_swap_settings(&[], &[])).await?;

    ctx.network.post_text(SOURCE, X, "one");
    ctx.settle().await;
    let assigned = ctx.engine.store.assignment(X).expect("sender assigned");
    let (main, sub) = tree_of(&assigned);
    let (other_main, other_sub) = if main == MAIN_A { (MAIN_B, SUB_B) } else { (MAIN_A, SUB_A) };

    ctx.network.post_text(SOURCE, X, "two");
    ctx.settle().await;
    ctx.network.post_text(SOURCE, X, "three");
    ctx.settle().await;

    assert_eq!(ctx.engine.store.assignment(X), Some(assigned.clone()));
    assert_eq!(ctx.texts(main), vec!["one", "two", "three"]);
    assert_eq!(ctx.texts(sub), vec!["one", "two", "three"]);
    assert!(ctx.texts(other_main).is_empty());
    assert!(ctx.texts(other_sub).is_empty());

    // The main-room copy is tracked for the sub-room fan-out.
    let first_copy = ctx.network.messages(main)[0].id;
    let key = ctx
        .engine
        .store
        .key(Namespace::Primary, &assigned, main, first_copy);
    assert_eq!(ctx.engine.store.replicas(&key).map(|r| r.len()), Some(1));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn removed_account_hands_sender_over() -> anyhow::Result<()> {
    let ctx = room_swap_context(room_swap_settings(&[], &[])).await?;
    ctx.network.post_text(SOURCE, X, "before");
    ctx.settle().await;
    let first = ctx.engine.store.assignment(X).expect("sender assigned");

    ctx.engine.remove_account(&first).await?;
    ctx.network.post_text(SOURCE, X, "after");
    ctx.settle().await;

    let second = ctx.engine.store.assignment(X).expect("sender reassigned");
    assert_ne!(first, second);
    let (main, _) = tree_of(&second);
    assert_eq!(ctx.texts(main), vec!["after"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn new_senders_spread_across_accounts() -> anyhow::Result<()> {
    let ctx = room_swap_context(room_swap_settings(&[], &[])).await?;

    ctx.network.post_text(SOURCE, X, "from x");
    ctx.settle().await;
    ctx.network.post_text(SOURCE, Y, "from y");
    ctx.settle().await;

    let assigned: HashSet<AccountId> = [X, Y]
        .iter()
        .filter_map(|s| ctx.engine.store.assignment(*s))
        .collect();
    assert_eq!(assigned, HashSet::from([phone("+100"), phone("+200")]));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn excluded_sender_is_not_copied() -> anyhow::Result<()> {
    let ctx = room_swap_context(room_swap_settings(&["Doe Jane"], &[])).await?;

    ctx.network.post_text(SOURCE, SenderId(902), "spam");
    ctx.settle().await;

    assert_eq!(ctx.engine.store.assignment(SenderId(902)), None);
    for room in [MAIN_A, SUB_A, MAIN_B, SUB_B] {
        assert!(ctx.texts(room).is_empty());
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn excluded_account_is_never_chosen() -> anyhow::Result<()> {
    let ctx = room_swap_context(room_swap_settings(&[], &["+200"])).await?;

    ctx.network.post_text(SOURCE, X, "x");
    ctx.network.post_text(SOURCE, Y, "y");
    ctx.settle().await;

    assert_eq!(ctx.engine.store.assignment(X), Some(phone("+100")));
    assert_eq!(ctx.engine.store.assignment(Y), Some(phone("+100")));
    assert!(ctx.texts(MAIN_B).is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn edits_and_deletes_follow_the_copy() -> anyhow::Result<()> {
    let ctx = room_swap_context(room_swap_settings(&[], &[])).await?;
    let source = ctx.network.post_text(SOURCE, X, "draft");
    ctx.settle().await;
    let assigned = ctx.engine.store.assignment(X).expect("sender assigned");
    let (main, sub) = tree_of(&assigned);

    ctx.network.edit_post(SOURCE, source.id, "final");
    ctx.settle().await;
    assert_eq!(ctx.texts(main), vec!["final"]);
    assert_eq!(ctx.texts(sub), vec!["final"]);

    ctx.network.delete_post(SOURCE, &[source.id]);
    ctx.settle().await;
    assert!(ctx.texts(main).is_empty());
    assert!(ctx.texts(sub).is_empty());
    assert_eq!(ctx.engine.store.sender_copy(X, source.id), None);
    assert_eq!(ctx.engine.stats().store.forward_records, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn disabling_room_swap_unsubscribes() -> anyhow::Result<()> {
    let ctx = room_swap_context(room_swap_settings(&[], &[])).await?;
    assert_eq!(
        ctx.engine
            .subscription_count(&phone("+100"), roomsync_core::subscriptions::Mode::RoomSwap)
            .await,
        3
    );

    ctx.engine.set_room_swap(RoomSwapSettings::default()).await;
    assert_eq!(
        ctx.engine
            .subscription_count(&phone("+100"), roomsync_core::subscriptions::Mode::RoomSwap)
            .await,
        0
    );

    ctx.network.post_text(SOURCE, X, "ignored");
    ctx.settle().await;
    assert_eq!(ctx.engine.store.assignment(X), None);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn expert_accounts_do_not_take_senders() -> anyhow::Result<()> {
    let mut settings = room_swap_settings(&[], &[]);
    settings.expert = ExpertSettings {
        enabled: true,
        accounts: vec![phone("+100")],
        rooms: vec![ChatId(-1003999)],
        names: HashSet::from(["Nobody".to_string()]),
    };
    let ctx = room_swap_context(settings).await?;

    for _ in 0..3 {
        ctx.network.post_text(SOURCE, X, "from x");
        ctx.settle().await;
        ctx.network.post_text(SOURCE, Y, "from y");
        ctx.settle().await;
    }

    assert_eq!(ctx.engine.store.assignment(X), Some(phone("+200")));
    assert_eq!(ctx.engine.store.assignment(Y), Some(phone("+200")));
    assert_eq!(ctx.texts(MAIN_B).len(), 6);
    assert_eq!(ctx.texts(SUB_B).len(), 6);
    assert!(ctx.texts(MAIN_A).is_empty());
    Ok(())
}
