use std::sync::Arc;

use runsync_client::RunStatusSource;
use runsync_storage::KeyValueStore;
use tokio::sync::{Mutex, broadcast};

use super::config::SyncConfig;
use super::events::{RunEvent, RunEvents};
use super::ids::{ConversationId, CorrelationId, MessageId, RunId};
use super::message::{Message, MessagePatch, MessageStatus};
use super::persistence::ActiveRunPersistence;
use super::reconcile::{ReconcileOutcome, assistant_message};
use super::registry::RunRegistry;
use super::run::{Run, RunPatch};
use super::scheduler::{PollContext, PollScheduler, Visibility, poll_active_runs};
use super::state::{SharedState, SyncState};

/// Owned state container for the synchronization engine.
///
/// Built once when the host mounts and handed to collaborators by reference;
/// [`SyncEngine::unmount`] is the teardown point.
pub struct SyncEngine {
    config: SyncConfig,
    state: SharedState,
    events: RunEvents,
    source: Arc<dyn RunStatusSource>,
    scheduler: Option<PollScheduler>,
    pending_visibility: Visibility,
    restored_run_ids: Vec<RunId>,
}

impl SyncEngine {
    /// Builds the engine without starting the scheduler.
    pub fn new(
        config: SyncConfig,
        source: Arc<dyn RunStatusSource>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let config = config.normalized();
        let events = RunEvents::new(config.event_capacity);
        let persistence = ActiveRunPersistence::new(store, config.active_runs_key.clone());

        // Read before the registry's first write overwrites the key.
        let restored_run_ids = persistence.load();
        if !restored_run_ids.is_empty() {
            tracing::info!(
                run_count = restored_run_ids.len(),
                "previous session left runs active; waiting for them to be re-attached"
            );
        }

        let registry = RunRegistry::new(persistence, events.clone());
        Self {
            config,
            state: Arc::new(Mutex::new(SyncState::new(registry))),
            events,
            source,
            scheduler: None,
            pending_visibility: Visibility::Visible,
            restored_run_ids,
        }
    }

    /// Builds the engine and starts polling. Must run inside a tokio runtime.
    pub fn mount(
        config: SyncConfig,
        source: Arc<dyn RunStatusSource>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let mut engine = Self::new(config, source, store);
        engine.start_polling();
        engine
    }

    pub fn start_polling(&mut self) {
        if self.scheduler.as_ref().is_some_and(PollScheduler::is_running) {
            return;
        }
        let scheduler = PollScheduler::start(self.poll_context(), &self.config);
        scheduler.set_visibility(self.pending_visibility);
        self.scheduler = Some(scheduler);
    }

    pub async fn stop_polling(&mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop().await;
        }
    }

    pub async fn unmount(mut self) {
        self.stop_polling().await;
        tracing::info!("sync engine unmounted");
    }

    pub fn is_polling(&self) -> bool {
        self.scheduler.as_ref().is_some_and(PollScheduler::is_running)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.events.subscribe()
    }

    /// Run ids the previous session persisted as active. Informational only:
    /// none of them is polled until a collaborator re-adds its run.
    pub fn restored_run_ids(&self) -> &[RunId] {
        &self.restored_run_ids
    }

    pub fn set_visibility(&mut self, visibility: Visibility) {
        self.pending_visibility = visibility;
        if let Some(scheduler) = &self.scheduler {
            scheduler.set_visibility(visibility);
        }
    }

    /// Runs one poll tick on the caller's task.
    pub async fn poll_now(&self) -> Vec<(RunId, ReconcileOutcome)> {
        poll_active_runs(&self.poll_context()).await
    }

    pub async fn add_message(&self, message: Message) -> bool {
        self.state.lock().await.messages.add_message(message)
    }

    pub async fn update_message(&self, id: &MessageId, patch: MessagePatch) -> bool {
        self.state.lock().await.messages.update_message(id, patch)
    }

    pub async fn message(&self, id: &MessageId) -> Option<Message> {
        self.state.lock().await.messages.get_message(id).cloned()
    }

    pub async fn conversation_messages(&self, conversation_id: &ConversationId) -> Vec<Message> {
        self.state
            .lock()
            .await
            .messages
            .conversation_messages(conversation_id)
    }

    pub async fn add_run(&self, run: Run) {
        self.state.lock().await.runs.add_run(run);
    }

    /// Registers `run` and makes sure its assistant message exists as a
    /// streaming placeholder.
    pub async fn start_run(&self, run: Run) {
        let mut state = self.state.lock().await;
        state
            .messages
            .add_message(assistant_message(&run, "", MessageStatus::Streaming));
        state.runs.add_run(run);
    }

    pub async fn update_run(&self, id: &RunId, patch: RunPatch) -> bool {
        self.state.lock().await.runs.update_run(id, patch)
    }

    pub async fn remove_run(&self, id: &RunId) -> bool {
        self.state.lock().await.runs.remove_run(id).is_some()
    }

    pub async fn run(&self, id: &RunId) -> Option<Run> {
        self.state.lock().await.runs.get_run(id).cloned()
    }

    pub async fn active_runs(&self) -> Vec<Run> {
        self.state.lock().await.runs.active_runs()
    }

    pub async fn run_by_correlation_id(&self, correlation_id: &CorrelationId) -> Option<Run> {
        self.state
            .lock()
            .await
            .runs
            .run_by_correlation_id(correlation_id)
            .cloned()
    }

    /// Moves the run started under `correlation_id` to the id the server issued.
    pub async fn confirm_run(&self, correlation_id: &CorrelationId, server_id: RunId) -> bool {
        let mut state = self.state.lock().await;
        let Some(current_id) = state
            .runs
            .run_by_correlation_id(correlation_id)
            .map(|run| run.id.clone())
        else {
            return false;
        };
        state.runs.update_run(&current_id, RunPatch::rename(server_id))
    }

    /// Aborts the generation request behind `id`, marks its message cancelled
    /// and removes the run.
    pub async fn cancel_run(&self, id: &RunId) -> bool {
        let mut state = self.state.lock().await;
        let Some(run) = state.runs.remove_run(id) else {
            return false;
        };
        run.cancel.cancel();
        state.messages.update_message(
            &run.message_id,
            MessagePatch::status(MessageStatus::Cancelled),
        );
        true
    }

    /// Finishes a run the scheduler never polls with text produced inline.
    pub async fn complete_local_run(&self, id: &RunId, content: impl Into<String>) -> bool {
        let content = content.into();
        let mut state = self.state.lock().await;
        let Some(run) = state.runs.get_run(id).cloned() else {
            return false;
        };

        let created = state.messages.add_message(assistant_message(
            &run,
            &content,
            MessageStatus::Completed,
        ));
        if !created {
            state.messages.update_message(
                &run.message_id,
                MessagePatch::content(content).with_status(MessageStatus::Completed),
            );
        }
        state.runs.remove_run(id);
        true
    }

    pub async fn is_generating(&self, conversation_id: &ConversationId) -> bool {
        self.state.lock().await.runs.has_running_run(conversation_id)
    }

    fn poll_context(&self) -> PollContext {
        PollContext {
            state: self.state.clone(),
            source: self.source.clone(),
            poll_timeout: self.config.poll_timeout,
            local_run_prefix: self.config.local_run_prefix.clone(),
        }
    }
}
