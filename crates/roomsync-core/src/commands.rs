use roomsync_models::AccountId;
use serde::Serialize;

use crate::error::CoreError;
use crate::platform::JoinTarget;
use crate::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Join,
    Leave,
}

/// Result of a join or leave command on one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    pub account: AccountId,
    pub result: Result<(), String>,
}

/// Live accounts that take part in join/leave commands.
pub fn participants(engine: &Engine) -> Vec<AccountId> {
    let exclude = engine.settings().join.exclude;
    engine
        .live_accounts()
        .into_iter()
        .filter(|a| !exclude.contains(a))
        .collect()
}

pub async fn join_all(engine: &Engine, link: &str) -> Result<Vec<CommandOutcome>, CoreError> {
    run(engine, link, Command::Join).await
}

pub async fn leave_all(engine: &Engine, link: &str) -> Result<Vec<CommandOutcome>, CoreError> {
    run(engine, link, Command::Leave).await
}

async fn run(engine: &Engine, link: &str, command: Command) -> Result<Vec<CommandOutcome>, CoreError> {
    let target = JoinTarget::parse(link)
        .ok_or_else(|| CoreError::Configuration(format!("unrecognised room link: {link}")))?;

    let mut outcomes = Vec::new();
    for account in participants(engine) {
        let job_target = target.clone();
        let result = engine
            .submit_to(&account, move |ctx| async move {
                match command {
                    Command::Join => ctx.client.join_chat(&job_target).await,
                    Command::Leave => ctx.client.leave_chat(&job_target).await,
                }
            })
            .await;
        let result = match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match &result {
            Ok(()) => tracing::info!(account = %account, target = %target, command = ?command, "room command done"),
            Err(e) => tracing::warn!(account = %account, target = %target, command = ?command, error = %e, "room command failed"),
        }
        outcomes.push(CommandOutcome { account, result });
    }
    Ok(outcomes)
}
