// 📥 Paginated Fetcher - remote listing → members table
// Rate-limited page loop with periodic checkpoints and resume from the last
// persisted cursor. Interruptions leave a checkpoint behind; completion
// clears it.

use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::checkpoint::{Checkpoint, CheckpointStore, OperationKind};
use crate::db::MemberStore;
use crate::error::{ErrorKind, Result, SweepError};
use crate::model::{Collection, ProgressStatus, RunStats};
use crate::rate_limit::RateLimiter;
use crate::remote::{MemberDirectory, MAX_PAGE_SIZE};
use crate::translate::translate_page;

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Requested page size; capped at [`MAX_PAGE_SIZE`].
    pub page_size: usize,
    /// Persist a checkpoint every this many stored members.
    pub checkpoint_interval: u64,
    /// Minimum spacing between listing calls.
    pub request_delay: Duration,
    /// Pause before retrying a failed page when the server gives no hint.
    pub retry_pause: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            page_size: 2000,
            checkpoint_interval: 10_000,
            request_delay: Duration::from_millis(33),
            retry_pause: Duration::from_secs(1),
        }
    }
}

impl FetchOptions {
    pub fn effective_page_size(&self) -> usize {
        self.page_size.clamp(1, MAX_PAGE_SIZE)
    }
}

/// Mutable state of one fetch run.
struct FetchState {
    run_id: Uuid,
    started: Instant,
    processed: u64,
    errors: u64,
    /// Last id seen from the remote side; next page starts after it.
    cursor: Option<i64>,
    /// Ids at or below this were handled by an earlier run.
    resume_cursor: Option<i64>,
    next_checkpoint: u64,
}

impl FetchState {
    fn total(&self, collection: &Collection) -> u64 {
        collection.member_count.unwrap_or(0).max(self.processed)
    }
}

pub struct Fetcher<'a, D: MemberDirectory + ?Sized> {
    directory: &'a D,
    store: &'a MemberStore,
    checkpoints: &'a CheckpointStore,
    limiter: RateLimiter,
    options: FetchOptions,
    cancel: CancelSignal,
}

impl<'a, D: MemberDirectory + ?Sized> Fetcher<'a, D> {
    pub fn new(
        directory: &'a D,
        store: &'a MemberStore,
        checkpoints: &'a CheckpointStore,
        options: FetchOptions,
    ) -> Self {
        Fetcher {
            directory,
            store,
            checkpoints,
            limiter: RateLimiter::new(options.request_delay),
            options,
            cancel: CancelSignal::never(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Mirror every member of `collection` into the local store.
    pub async fn run(&mut self, collection: &Collection, resume: bool) -> Result<RunStats> {
        let (processed, resume_cursor) = self.resume_point(collection, resume)?;
        let interval = self.options.checkpoint_interval.max(1);

        let mut state = FetchState {
            run_id: Uuid::new_v4(),
            started: Instant::now(),
            processed,
            errors: 0,
            cursor: resume_cursor,
            resume_cursor,
            next_checkpoint: (processed / interval + 1) * interval,
        };

        tracing::info!(
            channel_id = collection.id,
            channel = %collection.handle,
            resume_from = ?resume_cursor,
            already_processed = processed,
            page_size = self.options.effective_page_size(),
            run_id = %state.run_id,
            "starting member export"
        );

        self.store.update_progress(
            collection,
            state.processed,
            state.total(collection),
            state.cursor,
            ProgressStatus::InProgress,
        )?;

        match self.fetch_pages(collection, &mut state).await {
            Ok(()) => {
                self.store.update_progress(
                    collection,
                    state.processed,
                    state.total(collection),
                    state.cursor,
                    ProgressStatus::Completed,
                )?;
                self.checkpoints.delete(OperationKind::Export, collection.id, None)?;

                let stats = self.stats(collection, &state);
                tracing::info!(
                    processed = stats.processed,
                    errors = stats.errors,
                    rate = stats.rate(),
                    "export completed"
                );
                Ok(stats)
            }
            Err(e) => {
                let status = match &e {
                    SweepError::Cancelled => ProgressStatus::Cancelled,
                    _ => ProgressStatus::Error,
                };
                tracing::warn!(error = %e, processed = state.processed, "export interrupted");
                self.persist_best_effort(collection, &state, status);
                Err(e)
            }
        }
    }

    /// Where a resumed run picks up: an in-progress Progress row first, then
    /// the `latest` export checkpoint (only present for unfinished runs).
    fn resume_point(&self, collection: &Collection, resume: bool) -> Result<(u64, Option<i64>)> {
        if !resume {
            return Ok((0, None));
        }

        if let Some(progress) = self.store.get_progress(collection.id)? {
            if progress.status == ProgressStatus::InProgress {
                tracing::info!(
                    processed = progress.processed_members,
                    cursor = ?progress.last_user_id,
                    "resuming from progress record"
                );
                return Ok((progress.processed_members.max(0) as u64, progress.last_user_id));
            }
        }

        if let Some(checkpoint) = self.checkpoints.load_latest(OperationKind::Export, collection.id) {
            tracing::info!(
                processed = checkpoint.processed_items,
                cursor = ?checkpoint.last_id,
                "resuming from checkpoint"
            );
            return Ok((checkpoint.processed_items, checkpoint.last_id));
        }

        tracing::info!("nothing to resume, starting from the beginning");
        Ok((0, None))
    }

    async fn fetch_pages(&mut self, collection: &Collection, state: &mut FetchState) -> Result<()> {
        let directory = self.directory;
        let page_size = self.options.effective_page_size();
        let interval = self.options.checkpoint_interval.max(1);

        loop {
            self.limiter.wait_or_cancel(&mut self.cancel).await?;

            let listed = self
                .cancel
                .guard(directory.list_members(collection, state.cursor, page_size))
                .await?;

            let page = match listed {
                Ok(page) => page,
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "collection no longer accessible");
                    return Err(e.into());
                }
                // Per-member errors on a listing call mean we lost access to the
                // collection; retrying would never succeed.
                Err(e) if e.kind() == ErrorKind::PerItem => {
                    tracing::error!(error = %e, "listing refused, aborting export");
                    return Err(e.into());
                }
                Err(e) => {
                    state.errors += 1;
                    let pause = e.retry_after().unwrap_or(self.options.retry_pause);
                    tracing::warn!(error = %e, errors = state.errors, ?pause, "page fetch failed, retrying");
                    self.cancel.sleep(pause).await?;
                    continue;
                }
            };

            let members = translate_page(&page, collection, state.resume_cursor);
            if members.is_empty() {
                break;
            }

            self.store.upsert_members(&members)?;
            state.processed += members.len() as u64;
            state.cursor = page.last().map(|m| m.id).or(state.cursor);

            tracing::debug!(stored = members.len(), processed = state.processed, "page stored");

            if state.processed >= state.next_checkpoint {
                self.persist(collection, state, ProgressStatus::InProgress)?;
                state.next_checkpoint = (state.processed / interval + 1) * interval;
                tracing::info!(processed = state.processed, cursor = ?state.cursor, "progress saved");
            }

            if page.len() < page_size {
                break;
            }
        }

        Ok(())
    }

    fn checkpoint_for(&self, collection: &Collection, state: &FetchState) -> Checkpoint {
        Checkpoint::new(
            OperationKind::Export,
            collection.id,
            &collection.handle,
            state.processed,
            state.total(collection),
        )
        .with_last_id(state.cursor)
        .with_metadata("error_count", serde_json::json!(state.errors))
        .with_metadata("elapsed_time", serde_json::json!(state.started.elapsed().as_secs_f64()))
        .with_metadata("run_id", serde_json::json!(state.run_id.to_string()))
    }

    fn persist(&self, collection: &Collection, state: &FetchState, status: ProgressStatus) -> Result<()> {
        let mut checkpoint = self.checkpoint_for(collection, state);
        self.checkpoints.save(&mut checkpoint)?;
        self.store.update_progress(
            collection,
            state.processed,
            state.total(collection),
            state.cursor,
            status,
        )?;
        Ok(())
    }

    fn persist_best_effort(&self, collection: &Collection, state: &FetchState, status: ProgressStatus) {
        if let Err(e) = self.persist(collection, state, status) {
            tracing::error!(error = %e, "failed to persist progress on interruption");
        }
    }

    fn stats(&self, collection: &Collection, state: &FetchState) -> RunStats {
        RunStats {
            channel_id: collection.id,
            channel_username: collection.handle.clone(),
            processed: state.processed,
            succeeded: state.processed,
            errors: state.errors,
            total: state.total(collection),
            elapsed: state.started.elapsed(),
            cancelled: false,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
