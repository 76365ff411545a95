// 🗑️ Batch Mutator - removes flagged members from the remote collection
// Every attempt is written to the mutation log; removed members move to the
// removed set. Interruption leaves a `delete` checkpoint to resume from.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::checkpoint::{Checkpoint, CheckpointStore, OperationKind};
use crate::db::MemberStore;
use crate::error::{ErrorKind, RemoteError, Result, SweepError};
use crate::model::{Collection, MutationLogEntry, RunStats};
use crate::rate_limit::RateLimiter;
use crate::remote::MemberDirectory;
use crate::rules::DeletionCandidate;

#[derive(Debug, Clone)]
pub struct MutatorOptions {
    pub batch_size: usize,
    pub checkpoint_interval: u64,
    /// Minimum spacing between removal calls.
    pub delete_delay: Duration,
    /// Pause after each batch.
    pub batch_pause: Duration,
    /// Ask the confirmation gate before touching anything.
    pub confirm: bool,
}

impl Default for MutatorOptions {
    fn default() -> Self {
        MutatorOptions {
            batch_size: 100,
            checkpoint_interval: 100,
            delete_delay: Duration::from_millis(100),
            batch_pause: Duration::from_millis(500),
            confirm: true,
        }
    }
}

/// Decides whether a destructive run may proceed.
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    async fn confirm(&self, collection: &Collection, candidates: &[DeletionCandidate]) -> bool;
}

/// Always says yes.
pub struct AutoConfirm;

#[async_trait]
impl ConfirmationGate for AutoConfirm {
    async fn confirm(&self, _collection: &Collection, _candidates: &[DeletionCandidate]) -> bool {
        true
    }
}

/// Always says no.
pub struct Decline;

#[async_trait]
impl ConfirmationGate for Decline {
    async fn confirm(&self, _collection: &Collection, _candidates: &[DeletionCandidate]) -> bool {
        false
    }
}

struct MutationState {
    run_id: Uuid,
    started: Instant,
    processed: u64,
    deleted: u64,
    errors: u64,
}

pub struct BatchMutator<'a, D: MemberDirectory + ?Sized> {
    directory: &'a D,
    store: &'a MemberStore,
    checkpoints: &'a CheckpointStore,
    gate: &'a dyn ConfirmationGate,
    limiter: RateLimiter,
    options: MutatorOptions,
    cancel: CancelSignal,
}

impl<'a, D: MemberDirectory + ?Sized> BatchMutator<'a, D> {
    pub fn new(
        directory: &'a D,
        store: &'a MemberStore,
        checkpoints: &'a CheckpointStore,
        gate: &'a dyn ConfirmationGate,
        options: MutatorOptions,
    ) -> Self {
        BatchMutator {
            directory,
            store,
            checkpoints,
            gate,
            limiter: RateLimiter::new(options.delete_delay),
            options,
            cancel: CancelSignal::never(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(
        &mut self,
        collection: &Collection,
        candidates: &[DeletionCandidate],
        resume: bool,
    ) -> Result<RunStats> {
        if candidates.is_empty() {
            tracing::info!(channel_id = collection.id, "no candidates, nothing to remove");
            return Ok(RunStats::empty(collection));
        }

        let directory = self.directory;
        let has_rights = self
            .cancel
            .guard(directory.check_admin_rights(collection))
            .await??;
        if !has_rights {
            return Err(SweepError::PermissionDenied(format!(
                "no rights to remove members from {}",
                collection.handle
            )));
        }

        if self.options.confirm && !self.gate.confirm(collection, candidates).await {
            tracing::info!(candidates = candidates.len(), "removal declined");
            let mut stats = RunStats::empty(collection);
            stats.total = candidates.len() as u64;
            stats.cancelled = true;
            return Ok(stats);
        }

        let mut state = MutationState {
            run_id: Uuid::new_v4(),
            started: Instant::now(),
            processed: 0,
            deleted: 0,
            errors: 0,
        };

        if resume {
            if let Some(checkpoint) = self.checkpoints.load_latest(OperationKind::Delete, collection.id) {
                state.processed = checkpoint.processed_items.min(candidates.len() as u64);
                state.deleted = checkpoint.metadata_u64("deleted_count").unwrap_or(0);
                state.errors = checkpoint.metadata_u64("error_count").unwrap_or(0);
                tracing::info!(
                    skipped = state.processed,
                    deleted = state.deleted,
                    "resuming removal from checkpoint"
                );
            }
        }

        tracing::info!(
            channel_id = collection.id,
            channel = %collection.handle,
            candidates = candidates.len(),
            run_id = %state.run_id,
            "starting member removal"
        );

        match self.remove_all(collection, candidates, &mut state).await {
            Ok(()) => {
                if state.deleted == candidates.len() as u64 {
                    self.checkpoints.delete(OperationKind::Delete, collection.id, None)?;
                }
                let stats = self.stats(collection, candidates, &state);
                tracing::info!(
                    deleted = stats.succeeded,
                    errors = stats.errors,
                    rate = stats.rate(),
                    "removal completed"
                );
                Ok(stats)
            }
            Err(e) => {
                tracing::warn!(error = %e, processed = state.processed, "removal interrupted");
                self.save_best_effort(collection, candidates, &state);
                Err(e)
            }
        }
    }

    async fn remove_all(
        &mut self,
        collection: &Collection,
        candidates: &[DeletionCandidate],
        state: &mut MutationState,
    ) -> Result<()> {
        let directory = self.directory;
        let interval = self.options.checkpoint_interval.max(1);
        let remaining = &candidates[state.processed as usize..];

        for batch in remaining.chunks(self.options.batch_size.max(1)) {
            for candidate in batch {
                self.limiter.wait_or_cancel(&mut self.cancel).await?;

                let result = self
                    .cancel
                    .guard(directory.remove_member(collection, candidate.user_id))
                    .await?;

                let name = candidate_name(candidate);
                match result {
                    Ok(()) => {
                        state.deleted += 1;
                        self.store.log_mutation(&MutationLogEntry::success(candidate.user_id, &name))?;
                        self.store.move_to_removed(&[candidate.user_id], candidate.reason.label())?;
                        tracing::debug!(user_id = candidate.user_id, "member removed");
                    }
                    Err(e) => {
                        self.store.log_mutation(&MutationLogEntry::failure(
                            candidate.user_id,
                            &name,
                            &e.to_string(),
                        ))?;
                        self.handle_failure(candidate, e, state)?;
                    }
                }

                state.processed += 1;
                if state.processed % interval == 0 {
                    self.save(collection, candidates, state)?;
                    tracing::info!(
                        processed = state.processed,
                        deleted = state.deleted,
                        "removal progress saved"
                    );
                }
            }

            self.cancel.sleep(self.options.batch_pause).await?;
        }

        Ok(())
    }

    fn handle_failure(
        &self,
        candidate: &DeletionCandidate,
        error: RemoteError,
        state: &mut MutationState,
    ) -> Result<()> {
        if error.kind() == ErrorKind::Fatal {
            state.errors += 1;
            tracing::error!(error = %error, "collection no longer accessible, aborting");
            return Err(error.into());
        }

        // Already-absent members count as deleted, never as errors.
        match &error {
            RemoteError::AlreadyAbsent(_) => {
                state.deleted += 1;
                self.store.move_to_removed(&[candidate.user_id], candidate.reason.label())?;
                tracing::debug!(user_id = candidate.user_id, "member already gone");
            }
            RemoteError::RightsMissing(_) => {
                state.errors += 1;
                tracing::warn!(user_id = candidate.user_id, "no rights over member, skipping");
            }
            _ => {
                state.errors += 1;
                tracing::warn!(user_id = candidate.user_id, error = %error, "removal failed");
            }
        }
        Ok(())
    }

    fn checkpoint_for(
        &self,
        collection: &Collection,
        candidates: &[DeletionCandidate],
        state: &MutationState,
    ) -> Checkpoint {
        Checkpoint::new(
            OperationKind::Delete,
            collection.id,
            &collection.handle,
            state.processed,
            candidates.len() as u64,
        )
        .with_last_id(
            state
                .processed
                .checked_sub(1)
                .and_then(|i| candidates.get(i as usize))
                .map(|c| c.user_id),
        )
        .with_metadata("deleted_count", serde_json::json!(state.deleted))
        .with_metadata("error_count", serde_json::json!(state.errors))
        .with_metadata("elapsed_time", serde_json::json!(state.started.elapsed().as_secs_f64()))
        .with_metadata("run_id", serde_json::json!(state.run_id.to_string()))
    }

    fn save(&self, collection: &Collection, candidates: &[DeletionCandidate], state: &MutationState) -> Result<()> {
        let mut checkpoint = self.checkpoint_for(collection, candidates, state);
        self.checkpoints.save(&mut checkpoint)?;
        Ok(())
    }

    fn save_best_effort(&self, collection: &Collection, candidates: &[DeletionCandidate], state: &MutationState) {
        if let Err(e) = self.save(collection, candidates, state) {
            tracing::error!(error = %e, "failed to save removal checkpoint");
        }
    }

    fn stats(&self, collection: &Collection, candidates: &[DeletionCandidate], state: &MutationState) -> RunStats {
        RunStats {
            channel_id: collection.id,
            channel_username: collection.handle.clone(),
            processed: state.processed,
            succeeded: state.deleted,
            errors: state.errors,
            total: candidates.len() as u64,
            elapsed: state.started.elapsed(),
            cancelled: false,
        }
    }
}

fn candidate_name(candidate: &DeletionCandidate) -> String {
    match &candidate.username {
        Some(username) if !username.is_empty() => username.clone(),
        _ => format!("user_{}", candidate.user_id),
    }
}
