// 🧪 In-memory MemberDirectory
// Deterministic stand-in for the remote service: scripted failures, admin
// toggle, and an optional cancellation trigger after N calls.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

use crate::error::RemoteError;
use crate::model::Collection;
use crate::remote::{MemberDirectory, RawMember};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct InMemoryDirectory {
    members: Mutex<Vec<RawMember>>,
    removed: Mutex<Vec<i64>>,
    is_admin: AtomicBool,
    list_calls: AtomicUsize,
    served_pages: AtomicUsize,
    remove_calls: AtomicUsize,
    /// Failure for the n-th list call (0-based); consumed when returned.
    list_failures: Mutex<HashMap<usize, RemoteError>>,
    /// Failure for every removal of a given member id.
    removal_failures: Mutex<HashMap<i64, RemoteError>>,
    cancel_after_lists: Mutex<Option<(usize, watch::Sender<bool>)>>,
    cancel_after_removals: Mutex<Option<(usize, watch::Sender<bool>)>>,
}

impl InMemoryDirectory {
    pub fn new(mut members: Vec<RawMember>) -> Self {
        members.sort_by_key(|m| m.id);
        InMemoryDirectory {
            members: Mutex::new(members),
            removed: Mutex::new(Vec::new()),
            is_admin: AtomicBool::new(true),
            list_calls: AtomicUsize::new(0),
            served_pages: AtomicUsize::new(0),
            remove_calls: AtomicUsize::new(0),
            list_failures: Mutex::new(HashMap::new()),
            removal_failures: Mutex::new(HashMap::new()),
            cancel_after_lists: Mutex::new(None),
            cancel_after_removals: Mutex::new(None),
        }
    }

    /// `count` plain members with ids 1..=count.
    pub fn with_sequential_members(count: i64) -> Self {
        Self::new(
            (1..=count)
                .map(|id| {
                    RawMember::new(id)
                        .named(Some("Member"), Some(&id.to_string()))
                        .with_username(&format!("member_{}", id))
                })
                .collect(),
        )
    }

    pub fn set_admin(&self, is_admin: bool) {
        self.is_admin.store(is_admin, Ordering::SeqCst);
    }

    pub fn fail_list_call(&self, call_index: usize, error: RemoteError) {
        lock(&self.list_failures).insert(call_index, error);
    }

    pub fn fail_removal(&self, member_id: i64, error: RemoteError) {
        lock(&self.removal_failures).insert(member_id, error);
    }

    pub fn clear_removal_failure(&self, member_id: i64) {
        lock(&self.removal_failures).remove(&member_id);
    }

    /// Flip `trigger` to true once `calls` successful list calls have returned.
    pub fn cancel_after_list_calls(&self, calls: usize, trigger: watch::Sender<bool>) {
        *lock(&self.cancel_after_lists) = Some((calls, trigger));
    }

    /// Flip `trigger` to true once `calls` removal calls have returned.
    pub fn cancel_after_removals(&self, calls: usize, trigger: watch::Sender<bool>) {
        *lock(&self.cancel_after_removals) = Some((calls, trigger));
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    pub fn member_count(&self) -> usize {
        lock(&self.members).len()
    }

    pub fn removed_ids(&self) -> Vec<i64> {
        lock(&self.removed).clone()
    }

    fn fire(slot: &Mutex<Option<(usize, watch::Sender<bool>)>>, completed: usize) {
        let guard = lock(slot);
        if let Some((after, trigger)) = guard.as_ref() {
            if completed >= *after {
                let _ = trigger.send(true);
            }
        }
    }
}

#[async_trait]
impl MemberDirectory for InMemoryDirectory {
    async fn list_members(
        &self,
        _collection: &Collection,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RawMember>, RemoteError> {
        let call = self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.list_failures).remove(&call) {
            return Err(error);
        }

        let page: Vec<RawMember> = lock(&self.members)
            .iter()
            .filter(|m| after.map_or(true, |cursor| m.id > cursor))
            .take(limit)
            .cloned()
            .collect();

        let served = self.served_pages.fetch_add(1, Ordering::SeqCst) + 1;
        Self::fire(&self.cancel_after_lists, served);
        Ok(page)
    }

    async fn remove_member(&self, _collection: &Collection, member_id: i64) -> Result<(), RemoteError> {
        let completed = self.remove_calls.fetch_add(1, Ordering::SeqCst) + 1;

        let result = if let Some(error) = lock(&self.removal_failures).get(&member_id).cloned() {
            Err(error)
        } else {
            let mut members = lock(&self.members);
            match members.iter().position(|m| m.id == member_id) {
                Some(pos) => {
                    members.remove(pos);
                    lock(&self.removed).push(member_id);
                    Ok(())
                }
                None => Err(RemoteError::AlreadyAbsent(format!(
                    "USER_NOT_PARTICIPANT: {}",
                    member_id
                ))),
            }
        };

        Self::fire(&self.cancel_after_removals, completed);
        result
    }

    async fn check_admin_rights(&self, _collection: &Collection) -> Result<bool, RemoteError> {
        Ok(self.is_admin.load(Ordering::SeqCst))
    }
}
