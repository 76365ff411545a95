// Channel Sweep - Core Library
// Mirrors a channel's member list into SQLite, flags dead accounts, and removes them

pub mod error;
pub mod model;
pub mod config;
pub mod logging;
pub mod cancel;
pub mod rate_limit;   // Request pacing
pub mod checkpoint;   // Resumable progress snapshots
pub mod remote;       // MemberDirectory boundary
pub mod translate;    // Remote record → Member
pub mod memory_remote;
pub mod db;
pub mod fetcher;      // Export: remote → members table
pub mod rules;        // Classification
pub mod mutator;      // Removal
pub mod report;

// Re-export commonly used types
pub use error::{ErrorKind, RemoteError, Result, SweepError};
pub use model::{
    Collection, Member, PresenceStatus, RemovedMember,
    Progress, ProgressStatus,
    MutationLogEntry, MutationOutcome, MutationStats, RunStats,
};
pub use config::SweepConfig;
pub use cancel::{CancelHandle, CancelSignal};
pub use rate_limit::RateLimiter;
pub use checkpoint::{Checkpoint, CheckpointStore, OperationKind};
pub use remote::{MemberDirectory, RawMember, RawPhoto, RawStatus, MAX_PAGE_SIZE};
pub use memory_remote::InMemoryDirectory;
pub use db::{setup_database, MemberStore};
pub use fetcher::{FetchOptions, Fetcher};
pub use rules::{
    AnalysisReport, Classifier, DeletionCandidate, DeletionReason,
    filter_by_confidence, group_by_reason,
};
pub use mutator::{AutoConfirm, BatchMutator, ConfirmationGate, Decline, MutatorOptions};
pub use report::{ReportFiles, ReportWriter};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
