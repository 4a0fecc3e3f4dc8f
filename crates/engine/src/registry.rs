use std::collections::HashMap;

use super::events::{RunEvent, RunEvents};
use super::ids::{ConversationId, CorrelationId, MessageId, RunId};
use super::persistence::ActiveRunPersistence;
use super::run::{Run, RunPatch};

/// In-flight runs keyed by run id.
///
/// Mutations that change the set of running ids rewrite the persisted copy.
/// Every run that leaves the registry, whether removed, displaced or
/// overwritten by a rename, emits exactly one [`RunEvent::RunRemoved`].
#[derive(Debug)]
pub struct RunRegistry {
    runs: HashMap<RunId, Run>,
    persistence: ActiveRunPersistence,
    events: RunEvents,
    persisted_ids: Option<Vec<RunId>>,
}

impl RunRegistry {
    pub fn new(persistence: ActiveRunPersistence, events: RunEvents) -> Self {
        Self {
            runs: HashMap::new(),
            persistence,
            events,
            persisted_ids: None,
        }
    }

    /// Inserts `run` under its id and returns the runs it displaced.
    ///
    /// A different run already producing the same message is cancelled and
    /// removed first, so each message has at most one run. An entry already
    /// keyed by the same id but bound to another message is displaced the
    /// same way.
    pub fn add_run(&mut self, run: Run) -> Vec<Run> {
        let displaced_ids = self
            .runs
            .values()
            .filter(|existing| {
                let same_message = existing.message_id == run.message_id;
                let same_id = existing.id == run.id;
                same_message != same_id
            })
            .map(|existing| existing.id.clone())
            .collect::<Vec<_>>();

        let displaced = displaced_ids
            .iter()
            .filter_map(|id| {
                let displaced = self.take_run(id)?;
                tracing::info!(
                    run_id = %displaced.id,
                    message_id = %displaced.message_id,
                    replacement_run_id = %run.id,
                    replacement_message_id = %run.message_id,
                    "displacing run"
                );
                displaced.cancel.cancel();
                Some(displaced)
            })
            .collect::<Vec<_>>();

        tracing::info!(
            run_id = %run.id,
            conversation_id = %run.conversation_id,
            message_id = %run.message_id,
            "run added"
        );
        self.runs.insert(run.id.clone(), run);
        self.persist();
        displaced
    }

    /// Merges `patch` into the run keyed `id`. Returns `false` for unknown ids.
    ///
    /// When the patch renames the run, the old key is dropped and the merged
    /// run is inserted under the new key in the same step. A different run
    /// already holding the new key is cancelled and reported removed.
    pub fn update_run(&mut self, id: &RunId, patch: RunPatch) -> bool {
        let renamed_to = patch.id.clone().filter(|next| next != id);

        let Some(run) = self.runs.remove(id) else {
            return false;
        };

        match renamed_to {
            None => {
                self.runs.insert(id.clone(), run.merged(patch));
            }
            Some(next_id) => {
                if let Some(overwritten) = self.runs.remove(&next_id) {
                    tracing::warn!(
                        run_id = %next_id,
                        previous_run_id = %id,
                        overwritten_message_id = %overwritten.message_id,
                        "run rename collided with an existing key; keeping the renamed run"
                    );
                    overwritten.cancel.cancel();
                    self.emit_removed(&overwritten);
                }
                tracing::debug!(from = %id, to = %next_id, "run id migrated");
                self.runs.insert(next_id, run.merged(patch));
            }
        }

        self.persist();
        true
    }

    /// Removes the run keyed `id`. Unknown ids are a silent no-op.
    pub fn remove_run(&mut self, id: &RunId) -> Option<Run> {
        let run = self.take_run(id)?;
        tracing::info!(run_id = %run.id, conversation_id = %run.conversation_id, "run removed");
        Some(run)
    }

    pub fn get_run(&self, id: &RunId) -> Option<&Run> {
        self.runs.get(id)
    }

    /// Running runs, oldest first.
    pub fn active_runs(&self) -> Vec<Run> {
        let mut runs = self
            .runs
            .values()
            .filter(|run| run.is_running())
            .cloned()
            .collect::<Vec<_>>();
        runs.sort_by(|left, right| {
            left.started_at_unix_millis
                .cmp(&right.started_at_unix_millis)
                .then_with(|| left.id.cmp(&right.id))
        });
        runs
    }

    pub fn run_by_correlation_id(&self, correlation_id: &CorrelationId) -> Option<&Run> {
        self.runs
            .values()
            .find(|run| &run.correlation_id == correlation_id)
    }

    pub fn run_for_message(&self, message_id: &MessageId) -> Option<&Run> {
        self.runs.values().find(|run| &run.message_id == message_id)
    }

    pub fn has_running_run(&self, conversation_id: &ConversationId) -> bool {
        self.runs
            .values()
            .any(|run| run.is_running() && &run.conversation_id == conversation_id)
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    fn take_run(&mut self, id: &RunId) -> Option<Run> {
        let run = self.runs.remove(id)?;
        self.persist();
        self.emit_removed(&run);
        Some(run)
    }

    fn emit_removed(&self, run: &Run) {
        self.events.emit(RunEvent::RunRemoved {
            run_id: run.id.clone(),
            conversation_id: run.conversation_id.clone(),
        });
    }

    /// Writes the running ids unless they match the last write.
    fn persist(&mut self) {
        let run_ids = self
            .active_runs()
            .into_iter()
            .map(|run| run.id)
            .collect::<Vec<_>>();
        if self.persisted_ids.as_ref() == Some(&run_ids) {
            return;
        }
        // A failed write leaves the cache empty so the next mutation retries.
        self.persisted_ids = self.persistence.save(&run_ids).then_some(run_ids);
    }
}
