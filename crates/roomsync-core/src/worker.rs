use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use roomsync_models::{AccountConfig, AccountId, Identity};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};

use crate::engine::Engine;
use crate::error::CoreError;
use crate::platform::PlatformClient;
use crate::subscriptions::SubscriptionTable;

type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Job = Box<dyn FnOnce(AccountContext) -> JobFuture + Send>;

/// Everything a handler or submitted job needs to act as one account.
#[derive(Clone)]
pub struct AccountContext {
    pub account: AccountId,
    pub identity: Identity,
    pub client: Arc<dyn PlatformClient>,
    pub engine: Engine,
}

impl AccountContext {
    /// Current configuration of this account, if it is still configured.
    pub fn config(&self) -> Option<AccountConfig> {
        self.engine.account_config(&self.account)
    }
}

/// State that exists only while the account is connected.
pub(crate) struct Session {
    pub ctx: AccountContext,
    pub subscriptions: SubscriptionTable,
}

pub(crate) type SessionSlot = Arc<Mutex<Option<Session>>>;

/// Cheap handle to a running [`AccountWorker`].
#[derive(Clone)]
pub struct WorkerHandle {
    account: AccountId,
    jobs: mpsc::UnboundedSender<Job>,
    stop: Arc<watch::Sender<bool>>,
    session: SessionSlot,
    task: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl WorkerHandle {
    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// Run `job` inside this account's execution context and wait for its
    /// result. Fails with [`CoreError::Timeout`] when no result arrives in
    /// time, including when the account is currently reconnecting, and with
    /// [`CoreError::WorkerUnavailable`] when the worker has exited.
    pub async fn submit<F, Fut, T>(&self, timeout: Duration, job: F) -> Result<T, CoreError>
    where
        F: FnOnce(AccountContext) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let boxed: Job = Box::new(move |ctx| {
            Box::pin(async move {
                let _ = reply_tx.send(job(ctx).await);
            })
        });
        self.jobs
            .send(boxed)
            .map_err(|_| CoreError::WorkerUnavailable(self.account.clone()))?;
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(CoreError::WorkerUnavailable(self.account.clone())),
            Err(_) => {
                tracing::warn!(account = %self.account, timeout_ms = timeout.as_millis() as u64, "submitted job timed out");
                Err(CoreError::Timeout)
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.lock().as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Ask the worker to stop and wait until it has disconnected.
    pub async fn stop(&self) {
        let _ = self.stop.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    pub(crate) fn session(&self) -> &SessionSlot {
        &self.session
    }
}

/// Owns one account's connection: connects, registers the account's
/// subscriptions, runs submitted jobs, and reconnects after a drop.
pub(crate) struct AccountWorker {
    account: AccountId,
    client: Arc<dyn PlatformClient>,
    engine: Engine,
    jobs: mpsc::UnboundedReceiver<Job>,
    stop: watch::Receiver<bool>,
    session: SessionSlot,
}

pub(crate) fn spawn(engine: Engine, config: &AccountConfig) -> WorkerHandle {
    let client = engine.connector().client_for(config);
    let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
    let (stop_tx, stop_rx) = watch::channel(false);
    let session: SessionSlot = Arc::new(Mutex::new(None));
    let worker = AccountWorker {
        account: config.phone.clone(),
        client,
        engine,
        jobs: jobs_rx,
        stop: stop_rx,
        session: session.clone(),
    };
    let task = tokio::spawn(worker.run());
    WorkerHandle {
        account: config.phone.clone(),
        jobs: jobs_tx,
        stop: Arc::new(stop_tx),
        session,
        task: Arc::new(parking_lot::Mutex::new(Some(task))),
    }
}

impl AccountWorker {
    async fn run(mut self) {
        tracing::info!(account = %self.account, "account worker started");
        loop {
            if *self.stop.borrow() {
                break;
            }
            let outcome = self.run_session().await;
            self.engine.detach(&self.account, &self.session).await;
            self.client.disconnect().await;

            match outcome {
                Ok(()) => break,
                Err(CoreError::ConnectionLost(reason)) => {
                    tracing::warn!(account = %self.account, reason = %reason, "connection lost, reconnecting");
                }
                Err(CoreError::AuthorizationRequired(_)) => {
                    tracing::warn!(account = %self.account, "account is not logged in, not handling messages");
                    break;
                }
                Err(e) => {
                    tracing::warn!(account = %self.account, error = %e, "session failed, reconnecting");
                }
            }

            let backoff = self.engine.config.reconnect_backoff;
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.stop.changed() => break,
            }
        }
        tracing::info!(account = %self.account, "account worker stopped");
    }

    /// Returns `Ok` only when asked to stop.
    async fn run_session(&mut self) -> Result<(), CoreError> {
        self.client.connect().await?;
        if !self.client.is_authorized().await? {
            return Err(CoreError::AuthorizationRequired(self.account.clone()));
        }
        let identity = self.client.get_self().await?;
        let ctx = AccountContext {
            account: self.account.clone(),
            identity: identity.clone(),
            client: self.client.clone(),
            engine: self.engine.clone(),
        };
        self.engine.attach(ctx.clone(), &self.session).await;
        tracing::info!(account = %self.account, user = %identity.id, "account connected");

        let mut tasks = JoinSet::new();
        let end = loop {
            tokio::select! {
                changed = self.stop.changed() => {
                    if changed.is_err() || *self.stop.borrow() {
                        break Ok(());
                    }
                }
                reason = self.client.wait_disconnected() => {
                    break Err(CoreError::ConnectionLost(reason.to_string()));
                }
                Some(job) = self.jobs.recv() => {
                    tasks.spawn(job(ctx.clone()));
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            tracing::error!(account = %self.account, "submitted job panicked");
                        }
                    }
                }
            }
        };
        tasks.shutdown().await;
        end
    }
}
