// 👥 Domain model - members, progress, audit rows, run statistics
// Value types only; persistence lives in db.rs, the remote schema in remote.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// COLLECTION
// ============================================================================

/// The remote membership list being synchronized (a channel).
///
/// `id` is the stable key for checkpoints and progress; `handle` is display
/// only and may change over the collection's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: i64,
    pub handle: String,
    /// Member count reported by the remote side, when the caller knows it.
    #[serde(default)]
    pub member_count: Option<u64>,
}

impl Collection {
    pub fn new(id: i64, handle: impl Into<String>) -> Self {
        Collection {
            id,
            handle: handle.into(),
            member_count: None,
        }
    }

    pub fn with_member_count(mut self, count: u64) -> Self {
        self.member_count = Some(count);
        self
    }
}

// ============================================================================
// PRESENCE STATUS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
    Recently,
    LastWeek,
    LastMonth,
    Unknown,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Offline => "offline",
            PresenceStatus::Recently => "recently",
            PresenceStatus::LastWeek => "last_week",
            PresenceStatus::LastMonth => "last_month",
            PresenceStatus::Unknown => "unknown",
        }
    }

    /// Unrecognized values map to `Unknown` rather than failing the row.
    pub fn parse(s: &str) -> Self {
        match s {
            "online" => PresenceStatus::Online,
            "offline" => PresenceStatus::Offline,
            "recently" => PresenceStatus::Recently,
            "last_week" => PresenceStatus::LastWeek,
            "last_month" => PresenceStatus::LastMonth,
            _ => PresenceStatus::Unknown,
        }
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// MEMBER
// ============================================================================

/// One member of a collection as mirrored locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    pub id: i64,
    pub access_hash: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub photo_id: Option<i64>,
    pub bot: bool,
    pub verified: bool,
    pub restricted: bool,
    pub premium: bool,
    pub status: PresenceStatus,
    pub last_online: Option<DateTime<Utc>>,
    pub added_at: DateTime<Utc>,
    pub channel_id: i64,
    pub channel_username: String,
}

impl Member {
    /// Display name, "first last", with missing parts dropped.
    pub fn display_name(&self) -> String {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.trim().is_empty())
            .collect();
        parts.join(" ")
    }
}

/// A member that was removed from its collection. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovedMember {
    pub member: Member,
    pub deletion_reason: String,
    pub found_at: DateTime<Utc>,
}

// ============================================================================
// PROGRESS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    InProgress,
    Completed,
    Cancelled,
    Error,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Cancelled => "cancelled",
            ProgressStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(ProgressStatus::InProgress),
            "completed" => Some(ProgressStatus::Completed),
            "cancelled" => Some(ProgressStatus::Cancelled),
            "error" => Some(ProgressStatus::Error),
            _ => None,
        }
    }
}

/// Per-collection fetch progress (query-friendly mirror of the export checkpoint).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub channel_id: i64,
    pub channel_username: String,
    pub total_members: i64,
    pub processed_members: i64,
    pub last_user_id: Option<i64>,
    pub status: ProgressStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// MUTATION LOG
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOutcome {
    Success,
    Error,
}

impl MutationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationOutcome::Success => "success",
            MutationOutcome::Error => "error",
        }
    }
}

/// Audit row for one removal attempt. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationLogEntry {
    pub user_id: i64,
    pub username: String,
    pub attempted_at: DateTime<Utc>,
    pub outcome: MutationOutcome,
    pub error_message: Option<String>,
}

impl MutationLogEntry {
    pub fn success(user_id: i64, username: &str) -> Self {
        MutationLogEntry {
            user_id,
            username: username.to_string(),
            attempted_at: Utc::now(),
            outcome: MutationOutcome::Success,
            error_message: None,
        }
    }

    pub fn failure(user_id: i64, username: &str, error: &str) -> Self {
        MutationLogEntry {
            user_id,
            username: username.to_string(),
            attempted_at: Utc::now(),
            outcome: MutationOutcome::Error,
            error_message: Some(error.to_string()),
        }
    }
}

/// Aggregates over the mutation log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MutationStats {
    pub total: i64,
    pub successful: i64,
    pub failed: i64,
    pub with_errors: i64,
}

// ============================================================================
// RUN STATISTICS
// ============================================================================

/// Summary returned by every fetch and mutation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStats {
    pub channel_id: i64,
    pub channel_username: String,
    /// Items handled in this logical operation (including a resumed prefix).
    pub processed: u64,
    /// Items that ended in the desired state (stored, or removed).
    pub succeeded: u64,
    pub errors: u64,
    pub total: u64,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    /// Set when the confirmation gate declined the run.
    pub cancelled: bool,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl RunStats {
    pub fn empty(collection: &Collection) -> Self {
        RunStats {
            channel_id: collection.id,
            channel_username: collection.handle.clone(),
            processed: 0,
            succeeded: 0,
            errors: 0,
            total: 0,
            elapsed: Duration::ZERO,
            cancelled: false,
        }
    }

    /// Items per second over the run's wall-clock time.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.succeeded as f64 / secs
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: processed {} / {}, succeeded {}, errors {}, {:.2}s ({:.2}/s)",
            self.channel_username,
            self.processed,
            self.total,
            self.succeeded,
            self.errors,
            self.elapsed.as_secs_f64(),
            self.rate()
        )
    }
}

// ============================================================================
// TESTS
// ============================================================================
