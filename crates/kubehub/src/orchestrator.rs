//! Startup, synchronized initial sync and shutdown across all watched kinds.
//!
//! Starting -> Syncing -> Running -> ShuttingDown -> Stopped. Startup is
//! all-or-nothing: no informer is spawned until the client exists and every
//! configured resource has been resolved.

use std::sync::Arc;
use std::time::Duration;

use kube::api::{Api, DynamicObject};
use kwatch_core::{wait_for_sync, Config, EmitError, EventEmitter, ResourceIdentity, SyncFlag, WatchUnit, DEFAULT_POLL_INTERVAL};
use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::{create_client, resolve_api_resource, ClientError};
use crate::informer::Informer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Syncing,
    Running,
    ShuttingDown,
    Stopped,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("failed to sync cache")]
    SyncFailed,
    #[error("event emission failed for {identity}: {source}")]
    Emit {
        identity: ResourceIdentity,
        #[source]
        source: EmitError,
    },
    #[error("watch task failed: {0}")]
    Task(#[source] JoinError),
}

/// What a finished informer task reports back.
pub type UnitOutcome = (ResourceIdentity, Result<(), EmitError>);

#[derive(Debug)]
pub struct Orchestrator {
    phase: Phase,
    emitter: Arc<EventEmitter>,
    cancel: CancellationToken,
    poll_interval: Duration,
}

impl Orchestrator {
    pub fn new(emitter: Arc<EventEmitter>, cancel: CancellationToken) -> Self {
        Self { phase: Phase::Starting, emitter, cancel, poll_interval: DEFAULT_POLL_INTERVAL }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn transition(&mut self, next: Phase) {
        info!(from = ?self.phase, to = ?next, "phase transition");
        self.phase = next;
    }

    /// Start one informer per configured resource and supervise them until the
    /// cancellation token fires or a unit fails.
    pub async fn run(&mut self, config: &Config) -> Result<(), RunError> {
        let units: Vec<WatchUnit> = config
            .watched_resources()
            .into_iter()
            .map(|(identity, filter)| WatchUnit::new(identity, filter, Arc::clone(&self.emitter)))
            .collect();

        let informers = self.starting(Self::start(units, config.resync_period())).await?;

        let flags: Vec<SyncFlag> = informers.iter().map(Informer::synced).collect();
        let mut tasks = JoinSet::new();
        for informer in informers {
            let cancel = self.cancel.clone();
            tasks.spawn(async move {
                let identity = informer.unit().identity().clone();
                (identity, informer.run(cancel).await)
            });
        }
        self.supervise(tasks, flags).await
    }

    /// Await a startup step unless cancellation arrives first. Either failure stops
    /// the orchestrator before any unit is spawned.
    pub async fn starting<T, F>(&mut self, step: F) -> Result<T, RunError>
    where
        F: std::future::Future<Output = Result<T, RunError>>,
    {
        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RunError::SyncFailed),
            outcome = step => outcome,
        };
        if outcome.is_err() {
            self.transition(Phase::Stopped);
        }
        outcome
    }

    async fn start(units: Vec<WatchUnit>, resync: Option<Duration>) -> Result<Vec<Informer>, RunError> {
        let client = create_client().await?;
        let mut informers = Vec::with_capacity(units.len());
        for unit in units {
            let ar = resolve_api_resource(&client, unit.identity()).await?;
            let api: Api<DynamicObject> = Api::all_with(client.clone(), &ar);
            informers.push(Informer::new(unit, api, ar, resync));
        }
        info!(count = informers.len(), "informers ready");
        Ok(informers)
    }

    /// Drive already-spawned units through sync, steady state and shutdown.
    pub async fn supervise(&mut self, mut tasks: JoinSet<UnitOutcome>, flags: Vec<SyncFlag>) -> Result<(), RunError> {
        self.transition(Phase::Syncing);
        info!("Waiting for cache sync...");
        let synced = tokio::select! {
            biased;
            synced = wait_for_sync(&flags, &self.cancel, self.poll_interval) => Ok(synced),
            Some(failure) = next_failure(&mut tasks) => Err(failure),
        };
        let synced = match synced {
            Ok(synced) => synced,
            Err(failure) => return self.shutdown(tasks, Err(failure)).await,
        };
        if !synced {
            return self.shutdown(tasks, Err(RunError::SyncFailed)).await;
        }

        self.transition(Phase::Running);
        info!("Cache synced successfully");
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => Ok(()),
            Some(failure) = next_failure(&mut tasks) => Err(failure),
        };
        self.shutdown(tasks, outcome).await
    }

    async fn shutdown(&mut self, mut tasks: JoinSet<UnitOutcome>, outcome: Result<(), RunError>) -> Result<(), RunError> {
        self.transition(Phase::ShuttingDown);
        self.cancel.cancel();
        info!("Shutting down gracefully...");
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((identity, Err(e))) => warn!(gvr = %identity, error = %e, "unit failed during shutdown"),
                Err(e) => warn!(error = %e, "watch task aborted during shutdown"),
            }
        }
        self.transition(Phase::Stopped);
        outcome
    }
}

/// First unit that ended with an error; `None` once every task has finished cleanly.
async fn next_failure(tasks: &mut JoinSet<UnitOutcome>) -> Option<RunError> {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((_, Ok(()))) => continue,
            Ok((identity, Err(source))) => return Some(RunError::Emit { identity, source }),
            Err(e) => return Some(RunError::Task(e)),
        }
    }
    None
}
