// 🔁 End-to-end: export → classify → remove against the in-memory directory

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

use channel_sweep::{
    AutoConfirm, BatchMutator, CancelSignal, CheckpointStore, Classifier, Collection,
    DeletionReason, FetchOptions, Fetcher, InMemoryDirectory, MemberDirectory, MemberStore,
    MutatorOptions, OperationKind, ProgressStatus, RawMember, RemoteError, SweepError,
};

fn fetch_options(page_size: usize, checkpoint_interval: u64) -> FetchOptions {
    FetchOptions {
        page_size,
        checkpoint_interval,
        request_delay: Duration::ZERO,
        retry_pause: Duration::ZERO,
    }
}

fn mutator_options() -> MutatorOptions {
    MutatorOptions {
        batch_size: 2,
        checkpoint_interval: 1,
        delete_delay: Duration::ZERO,
        batch_pause: Duration::ZERO,
        confirm: true,
    }
}

/// Five members; 3 and 4 are deleted accounts without a handle.
fn five_members() -> Vec<RawMember> {
    (1..=5)
        .map(|id| {
            if id == 3 || id == 4 {
                RawMember::new(id).named(Some("Deleted Account"), None)
            } else {
                RawMember::new(id)
                    .named(Some("Alive"), Some("Member"))
                    .with_username(&format!("alive_{}", id))
            }
        })
        .collect()
}

#[tokio::test]
async fn test_five_member_sweep() {
    let dir = TempDir::new().unwrap();
    let store = MemberStore::open(dir.path().join("sweep.db")).unwrap();
    let checkpoints = CheckpointStore::open(dir.path().join("checkpoints")).unwrap();
    let directory = InMemoryDirectory::new(five_members());
    let collection = Collection::new(1001, "@five").with_member_count(5);

    // 1. Export
    let export = Fetcher::new(&directory, &store, &checkpoints, fetch_options(2, 2))
        .run(&collection, false)
        .await
        .unwrap();
    assert_eq!(export.processed, 5);
    assert_eq!(store.count_members(Some(1001)).unwrap(), 5);
    assert_eq!(directory.list_calls(), 3);

    // 2. Classify
    let candidates = Classifier::new().scan(&store, 1001).unwrap();
    let ids: Vec<i64> = candidates.iter().map(|c| c.user_id).collect();
    assert_eq!(ids, vec![3, 4]);
    assert!(candidates.iter().all(|c| c.reason == DeletionReason::DeletedAccount));
    assert!(candidates.iter().all(|c| (c.confidence - 0.99).abs() < 1e-9));

    // 3. Remove
    let removal = BatchMutator::new(&directory, &store, &checkpoints, &AutoConfirm, mutator_options())
        .run(&collection, &candidates, false)
        .await
        .unwrap();
    assert_eq!(removal.succeeded, 2);
    assert_eq!(removal.errors, 0);

    assert_eq!(directory.member_count(), 3);
    assert_eq!(store.count_members(Some(1001)).unwrap(), 3);

    let mut removed: Vec<i64> = store
        .removed_members(Some(1001))
        .unwrap()
        .iter()
        .map(|r| r.member.id)
        .collect();
    removed.sort();
    assert_eq!(removed, vec![3, 4]);

    let audit = store.mutation_stats().unwrap();
    assert_eq!(audit.total, 2);
    assert_eq!(audit.successful, 2);

    assert_eq!(
        store.get_progress(1001).unwrap().unwrap().status,
        ProgressStatus::Completed
    );
    assert!(checkpoints.load_latest(OperationKind::Export, 1001).is_none());
    assert!(checkpoints.load_latest(OperationKind::Delete, 1001).is_none());
    println!("✅ Five member sweep PASSED");
}

/// Delegates to the in-memory directory and records every listing cursor.
struct RecordingDirectory {
    inner: InMemoryDirectory,
    cursors: Mutex<Vec<Option<i64>>>,
}

impl RecordingDirectory {
    fn take_cursors(&self) -> Vec<Option<i64>> {
        std::mem::take(&mut *self.cursors.lock().unwrap())
    }
}

#[async_trait]
impl MemberDirectory for RecordingDirectory {
    async fn list_members(
        &self,
        collection: &Collection,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RawMember>, RemoteError> {
        self.cursors.lock().unwrap().push(after);
        self.inner.list_members(collection, after, limit).await
    }

    async fn remove_member(&self, collection: &Collection, member_id: i64) -> Result<(), RemoteError> {
        self.inner.remove_member(collection, member_id).await
    }
}

#[tokio::test]
async fn test_resume_never_lists_below_checkpoint() {
    const N: i64 = 37;
    const PAGE: usize = 5;

    for stop_after in 1..=7 {
        let dir = TempDir::new().unwrap();
        let store = MemberStore::open_in_memory().unwrap();
        let checkpoints = CheckpointStore::open(dir.path()).unwrap();
        let directory = RecordingDirectory {
            inner: InMemoryDirectory::with_sequential_members(N),
            cursors: Mutex::new(Vec::new()),
        };
        let collection = Collection::new(77, "@resumable");

        let (handle, signal) = CancelSignal::new();
        directory.inner.cancel_after_list_calls(stop_after, handle.sender());

        let err = Fetcher::new(&directory, &store, &checkpoints, fetch_options(PAGE, 1000))
            .with_cancel(signal)
            .run(&collection, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SweepError::Cancelled));

        let checkpoint = checkpoints
            .load_latest(OperationKind::Export, 77)
            .expect("interrupted run leaves a checkpoint");
        let cursor = checkpoint.last_id.expect("cursor recorded");
        directory.take_cursors();

        let stats = Fetcher::new(&directory, &store, &checkpoints, fetch_options(PAGE, 1000))
            .run(&collection, true)
            .await
            .unwrap();

        assert_eq!(stats.processed, N as u64, "stop_after = {}", stop_after);
        assert_eq!(store.count_members(Some(77)).unwrap(), N);
        for after in directory.take_cursors() {
            assert!(after.unwrap_or(i64::MIN) >= cursor, "listed below cursor {}", cursor);
        }
    }
}
