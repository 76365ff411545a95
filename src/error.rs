// 🚨 Error taxonomy
// Remote failures are classified once, at the boundary, so call sites branch
// on ErrorKind instead of matching on message text.

use std::time::Duration;
use thiserror::Error;

// ============================================================================
// REMOTE ERRORS
// ============================================================================

/// How the pipeline reacts to a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Retry after a short pause; never aborts the run.
    Transient,
    /// Collection unreachable or caller evicted; abort after a best-effort checkpoint.
    Fatal,
    /// Resolved per item by the mutator (skip or count as done).
    PerItem,
}

/// Typed failure returned by a [`crate::remote::MemberDirectory`].
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RemoteError {
    /// The collection became private, was deleted, or we were removed from it.
    #[error("collection is no longer accessible: {0}")]
    TargetGone(String),

    /// We are not allowed to act on this particular member (e.g. another admin).
    #[error("insufficient rights over member: {0}")]
    RightsMissing(String),

    /// The member already left the collection.
    #[error("member is not a participant: {0}")]
    AlreadyAbsent(String),

    /// The server asked us to slow down.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Anything else (network hiccup, timeout, unknown RPC error).
    #[error("remote call failed: {0}")]
    Other(String),
}

impl RemoteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RemoteError::TargetGone(_) => ErrorKind::Fatal,
            RemoteError::RightsMissing(_) | RemoteError::AlreadyAbsent(_) => ErrorKind::PerItem,
            RemoteError::RateLimited { .. } | RemoteError::Other(_) => ErrorKind::Transient,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    /// Pause requested by the server, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Fallback classifier for clients that only surface raw RPC error text.
    ///
    /// Structured clients should construct the variants directly; this exists
    /// for transports where the error code is only available as a string.
    pub fn from_rpc_message(message: &str) -> Self {
        let upper = message.to_uppercase();

        if upper.contains("CHANNEL_PRIVATE") || upper.contains("CHANNEL_INVALID") {
            return RemoteError::TargetGone(message.to_string());
        }
        if upper.contains("USER_ADMIN_INVALID") || upper.contains("CHAT_ADMIN_REQUIRED") {
            return RemoteError::RightsMissing(message.to_string());
        }
        if upper.contains("USER_NOT_PARTICIPANT") {
            return RemoteError::AlreadyAbsent(message.to_string());
        }
        if let Some(pos) = upper.find("FLOOD_WAIT_") {
            let digits: String = upper[pos + "FLOOD_WAIT_".len()..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(secs) = digits.parse::<u64>() {
                return RemoteError::RateLimited {
                    retry_after: Duration::from_secs(secs),
                };
            }
        }

        RemoteError::Other(message.to_string())
    }
}

// ============================================================================
// PIPELINE ERRORS
// ============================================================================

/// Errors surfaced by fetch, classify and mutate operations.
#[derive(Debug, Error)]
pub enum SweepError {
    /// A fatal remote failure aborted the run.
    #[error("remote failure: {0}")]
    Remote(#[from] RemoteError),

    /// Local member store failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Checkpoint or report file I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// The run was interrupted; progress was checkpointed on a best-effort basis.
    #[error("operation cancelled")]
    Cancelled,

    /// Missing admin rights on the target collection.
    #[error("insufficient privileges on collection {0}")]
    PermissionDenied(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, SweepError>;

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(RemoteError::TargetGone("x".into()).kind(), ErrorKind::Fatal);
        assert_eq!(RemoteError::RightsMissing("x".into()).kind(), ErrorKind::PerItem);
        assert_eq!(RemoteError::AlreadyAbsent("x".into()).kind(), ErrorKind::PerItem);
        assert_eq!(RemoteError::Other("x".into()).kind(), ErrorKind::Transient);
        assert_eq!(
            RemoteError::RateLimited { retry_after: Duration::from_secs(1) }.kind(),
            ErrorKind::Transient
        );
    }

    #[test]
    fn test_from_rpc_message() {
        assert!(matches!(
            RemoteError::from_rpc_message("RPCError 400: CHANNEL_PRIVATE (caused by KickRequest)"),
            RemoteError::TargetGone(_)
        ));
        assert!(matches!(
            RemoteError::from_rpc_message("USER_ADMIN_INVALID"),
            RemoteError::RightsMissing(_)
        ));
        assert!(matches!(
            RemoteError::from_rpc_message("user_not_participant"),
            RemoteError::AlreadyAbsent(_)
        ));
        assert_eq!(
            RemoteError::from_rpc_message("FLOOD_WAIT_42"),
            RemoteError::RateLimited { retry_after: Duration::from_secs(42) }
        );
        assert!(matches!(
            RemoteError::from_rpc_message("connection reset"),
            RemoteError::Other(_)
        ));
    }

    #[test]
    fn test_retry_after_only_for_rate_limit() {
        let limited = RemoteError::RateLimited { retry_after: Duration::from_millis(250) };
        assert_eq!(limited.retry_after(), Some(Duration::from_millis(250)));
        assert_eq!(RemoteError::Other("boom".into()).retry_after(), None);
    }
}
