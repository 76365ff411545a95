// 🌐 Remote capability - what the pipeline needs from the messaging service
// The wire protocol and auth handshake live outside this crate; anything that
// can list and remove members implements MemberDirectory.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RemoteError;
use crate::model::Collection;

/// Largest page the remote listing call accepts.
pub const MAX_PAGE_SIZE: usize = 200;

// ============================================================================
// RAW SCHEMA (as returned by the remote side)
// ============================================================================

/// Member entry exactly as the remote listing returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMember {
    pub id: i64,
    #[serde(default)]
    pub access_hash: Option<i64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub photo: Option<RawPhoto>,
    #[serde(default)]
    pub bot: bool,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub restricted: bool,
    #[serde(default)]
    pub premium: bool,
    #[serde(default)]
    pub status: Option<RawStatus>,
}

impl RawMember {
    /// Bare entry with only an id; the builder methods fill in the rest.
    pub fn new(id: i64) -> Self {
        RawMember {
            id,
            access_hash: Some(id * 11),
            username: None,
            first_name: None,
            last_name: None,
            photo: None,
            bot: false,
            verified: false,
            restricted: false,
            premium: false,
            status: None,
        }
    }

    pub fn named(mut self, first: Option<&str>, last: Option<&str>) -> Self {
        self.first_name = first.map(str::to_string);
        self.last_name = last.map(str::to_string);
        self
    }

    pub fn with_username(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }

    pub fn with_status(mut self, status: RawStatus) -> Self {
        self.status = Some(status);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPhoto {
    pub photo_id: i64,
}

/// Presence variants the remote side reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawStatus {
    Online { expires: DateTime<Utc> },
    Offline { was_online: DateTime<Utc> },
    Recently,
    LastWeek,
    LastMonth,
    Empty,
}

// ============================================================================
// CAPABILITY
// ============================================================================

/// The two remote operations the pipeline consumes.
///
/// Real clients and the in-memory double are interchangeable behind this
/// trait. Implementations classify their failures into [`RemoteError`].
#[async_trait]
pub trait MemberDirectory: Send + Sync {
    /// Members of `collection` with id greater than `after`, ascending by id,
    /// at most `limit` entries. A page shorter than `limit` means the end.
    async fn list_members(
        &self,
        collection: &Collection,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<RawMember>, RemoteError>;

    /// Remove one member from `collection`.
    async fn remove_member(&self, collection: &Collection, member_id: i64) -> Result<(), RemoteError>;

    /// Whether the caller may remove members from `collection`.
    async fn check_admin_rights(&self, _collection: &Collection) -> Result<bool, RemoteError> {
        Ok(true)
    }
}
