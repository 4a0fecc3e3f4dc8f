use std::sync::Arc;
use std::time::Duration;

use runsync_client::{RunStatusError, RunStatusResult, RunStatusReport, RunStatusSource};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::config::SyncConfig;
use super::ids::RunId;
use super::reconcile::{ReconcileOutcome, reconcile};
use super::state::SharedState;

/// Host visibility as reported by the embedding environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

#[derive(Clone)]
pub(crate) struct PollContext {
    pub(crate) state: SharedState,
    pub(crate) source: Arc<dyn RunStatusSource>,
    pub(crate) poll_timeout: Duration,
    pub(crate) local_run_prefix: String,
}

/// Background task driving every active run once per tick.
///
/// Ticks keep firing while the host is hidden. The first tick fires at start,
/// and a hidden-to-visible transition forces an immediate extra tick.
pub struct PollScheduler {
    shutdown: CancellationToken,
    visibility_tx: watch::Sender<Visibility>,
    resync: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl PollScheduler {
    pub(crate) fn start(context: PollContext, config: &SyncConfig) -> Self {
        let shutdown = CancellationToken::new();
        let (visibility_tx, _) = watch::channel(Visibility::Visible);
        let resync = Arc::new(Notify::new());
        let task = tokio::spawn(run_poll_loop(
            context,
            config.poll_interval,
            shutdown.clone(),
            resync.clone(),
        ));

        Self {
            shutdown,
            visibility_tx,
            resync,
            task: Some(task),
        }
    }

    /// Records the host's visibility. Every hidden-to-visible edge leaves a
    /// resync permit, so an edge raised mid-tick is served right after it.
    pub fn set_visibility(&self, visibility: Visibility) {
        let previous = self.visibility_tx.send_replace(visibility);
        if previous == Visibility::Hidden && visibility == Visibility::Visible {
            self.resync.notify_one();
        }
    }

    pub fn visibility(&self) -> Visibility {
        *self.visibility_tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops ticking and waits for an in-flight tick to wind down.
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take()
            && let Err(error) = task.await
        {
            tracing::warn!(error = %error, "poll scheduler task ended abnormally");
        }
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_poll_loop(
    context: PollContext,
    period: Duration,
    shutdown: CancellationToken,
    resync: Arc<Notify>,
) {
    let mut interval = tokio::time::interval(period);
    // Backgrounded hosts may stall timers; never burst to catch up.
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(period_ms = period.as_millis() as u64, "poll scheduler started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
            _ = resync.notified() => {
                tracing::debug!("host became visible; polling immediately");
                interval.reset();
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = poll_active_runs(&context) => {}
        }
    }

    tracing::info!("poll scheduler stopped");
}

/// One tick: polls every active, non-local run in turn and reconciles each
/// result as it arrives.
pub(crate) async fn poll_active_runs(context: &PollContext) -> Vec<(RunId, ReconcileOutcome)> {
    let targets = {
        let state = context.state.lock().await;
        state
            .runs
            .active_runs()
            .into_iter()
            .map(|run| run.id)
            .filter(|run_id| !run_id.is_local_only(&context.local_run_prefix))
            .collect::<Vec<_>>()
    };

    let mut outcomes = Vec::with_capacity(targets.len());
    for run_id in targets {
        // The state lock is released while the request is in flight.
        let result = fetch_with_timeout(context, &run_id).await;
        let outcome = {
            let mut state = context.state.lock().await;
            reconcile(&mut state, &run_id, result)
        };
        tracing::debug!(run_id = %run_id, outcome = ?outcome, "reconciled run status");
        outcomes.push((run_id, outcome));
    }
    outcomes
}

async fn fetch_with_timeout(
    context: &PollContext,
    run_id: &RunId,
) -> RunStatusResult<RunStatusReport> {
    match tokio::time::timeout(
        context.poll_timeout,
        context.source.fetch_status(run_id.as_str()),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(RunStatusError::Timeout {
            stage: "poll-timeout",
            run_id: run_id.to_string(),
            timeout_ms: context.poll_timeout.as_millis() as u64,
        }),
    }
}
