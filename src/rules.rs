// 🏷️ Classification Rules - which members should be removed
// Ordered rule list, first match wins on the primary path; the batch path adds
// independent heuristics for suspicious handles and default profiles.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::db::MemberStore;
use crate::error::Result;
use crate::model::Member;

// ============================================================================
// PATTERNS
// ============================================================================

/// Matched against "first last", lower-cased.
const DELETED_NAME_PATTERNS: &[&str] = &[
    r"deleted\s+account",
    r"deleted\s+user",
    r"^deleted\s*$",
    r"account\s+deleted",
    r"user\s+deleted",
];

/// Matched against the lower-cased handle.
const SUSPICIOUS_HANDLE_PATTERNS: &[&str] = &[
    r"^user\d+",
    r"^\d{5,}$",
    r"^[a-z]{1,2}\d+$",
    r"^_\w+$",
    r"^\w+_$",
];

/// Handles that deleted accounts tend to be left with.
const RESERVED_HANDLES: &[&str] = &["deleted", "account", "user"];

/// Names the client fills in when the user never set one.
const DEFAULT_NAMES: &[&str] = &["user", "account", "profile", "anonymous", "telegram"];

const EMPTY_PROFILE_CONFIDENCE: f64 = 0.85;
const DELETED_NAME_CONFIDENCE: f64 = 0.95;
const DELETED_NAME_NO_HANDLE_CONFIDENCE: f64 = 0.99;
const DELETED_NAME_RESERVED_HANDLE_CONFIDENCE: f64 = 0.98;
const SUSPICIOUS_HANDLE_CONFIDENCE: f64 = 0.6;
const DEFAULT_FIRST_NAME_WEIGHT: f64 = 0.3;
const DEFAULT_LAST_NAME_WEIGHT: f64 = 0.2;
const DEFAULT_PROFILE_CAP: f64 = 0.8;
const DEFAULT_PROFILE_THRESHOLD: f64 = 0.5;
const HIGH_CONFIDENCE: f64 = 0.9;

// ============================================================================
// REASONS & CANDIDATES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeletionReason {
    DeletedAccount,
    DeletedUser,
    DefaultName,
    FakePattern,
    InactiveLong,
    BotSuspicious,
    EmptyProfile,
}

impl DeletionReason {
    /// Stable machine code, e.g. `DELETED_ACCOUNT`.
    pub fn code(&self) -> &'static str {
        match self {
            DeletionReason::DeletedAccount => "DELETED_ACCOUNT",
            DeletionReason::DeletedUser => "DELETED_USER",
            DeletionReason::DefaultName => "DEFAULT_NAME",
            DeletionReason::FakePattern => "FAKE_PATTERN",
            DeletionReason::InactiveLong => "INACTIVE_LONG",
            DeletionReason::BotSuspicious => "BOT_SUSPICIOUS",
            DeletionReason::EmptyProfile => "EMPTY_PROFILE",
        }
    }

    /// Human label used in exports and the removed-members table.
    pub fn label(&self) -> &'static str {
        match self {
            DeletionReason::DeletedAccount => "Deleted Account",
            DeletionReason::DeletedUser => "Deleted User",
            DeletionReason::DefaultName => "Default Name",
            DeletionReason::FakePattern => "Fake Pattern",
            DeletionReason::InactiveLong => "Inactive Long Time",
            DeletionReason::BotSuspicious => "Suspicious Bot",
            DeletionReason::EmptyProfile => "Empty Profile",
        }
    }
}

impl fmt::Display for DeletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A member flagged for removal, with the evidence behind the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletionCandidate {
    pub user_id: i64,
    pub access_hash: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub reason: DeletionReason,
    /// In [0, 1].
    pub confidence: f64,
    pub details: HashMap<String, serde_json::Value>,
}

impl DeletionCandidate {
    fn from_member(
        member: &Member,
        reason: DeletionReason,
        confidence: f64,
        details: HashMap<String, serde_json::Value>,
    ) -> Self {
        DeletionCandidate {
            user_id: member.id,
            access_hash: member.access_hash,
            username: member.username.clone(),
            first_name: member.first_name.clone(),
            last_name: member.last_name.clone(),
            reason,
            confidence,
            details,
        }
    }

    pub fn is_bot(&self) -> bool {
        self.details
            .get("bot")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

fn normalized(value: &Option<String>) -> String {
    value.as_deref().unwrap_or("").trim().to_lowercase()
}

// ============================================================================
// CLASSIFIER
// ============================================================================

pub struct Classifier {
    deleted_patterns: Vec<(&'static str, Regex)>,
    suspicious_handles: Vec<(&'static str, Regex)>,
}

fn compile(patterns: &[&'static str]) -> Vec<(&'static str, Regex)> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some((*p, re)),
            Err(e) => {
                tracing::error!(pattern = p, error = %e, "invalid classification pattern skipped");
                None
            }
        })
        .collect()
}

impl Classifier {
    pub fn new() -> Self {
        Classifier {
            deleted_patterns: compile(DELETED_NAME_PATTERNS),
            suspicious_handles: compile(SUSPICIOUS_HANDLE_PATTERNS),
        }
    }

    /// Primary path: empty profile, then deleted-name patterns. First match wins.
    pub fn evaluate(&self, member: &Member) -> Option<DeletionCandidate> {
        let first = normalized(&member.first_name);
        let last = normalized(&member.last_name);
        let handle = normalized(&member.username);

        // Rule 1: nothing at all left on the profile
        if first.is_empty() && last.is_empty() && handle.is_empty() {
            let details = HashMap::from([
                ("pattern_matched".to_string(), serde_json::json!("empty_profile_as_deleted")),
                ("has_username".to_string(), serde_json::json!(false)),
                ("bot".to_string(), serde_json::json!(member.bot)),
            ]);
            return Some(DeletionCandidate::from_member(
                member,
                DeletionReason::DeletedAccount,
                EMPTY_PROFILE_CONFIDENCE,
                details,
            ));
        }

        // Rule 2: the name reads like a deleted-account placeholder
        let full_name = format!("{} {}", first, last);
        for (pattern, re) in &self.deleted_patterns {
            if !re.is_match(&full_name) {
                continue;
            }

            let confidence = if handle.is_empty() {
                DELETED_NAME_NO_HANDLE_CONFIDENCE
            } else if RESERVED_HANDLES.contains(&handle.as_str()) {
                DELETED_NAME_RESERVED_HANDLE_CONFIDENCE
            } else {
                DELETED_NAME_CONFIDENCE
            };

            let details = HashMap::from([
                ("pattern_matched".to_string(), serde_json::json!(pattern)),
                ("has_username".to_string(), serde_json::json!(!handle.is_empty())),
                ("bot".to_string(), serde_json::json!(member.bot)),
            ]);
            return Some(DeletionCandidate::from_member(
                member,
                DeletionReason::DeletedAccount,
                confidence,
                details,
            ));
        }

        None
    }

    /// Batch path: the primary rules, then suspicious-handle and
    /// default-profile checks for members the primary rules did not flag.
    /// One member may yield several candidates here.
    pub fn evaluate_batch(&self, members: &[Member]) -> Vec<DeletionCandidate> {
        let mut candidates = Vec::new();

        for member in members {
            if let Some(candidate) = self.evaluate(member) {
                candidates.push(candidate);
                continue;
            }

            if let Some(candidate) = self.suspicious_handle(member) {
                candidates.push(candidate);
            }
            if let Some(candidate) = self.default_profile(member) {
                candidates.push(candidate);
            }
        }

        candidates
    }

    fn suspicious_handle(&self, member: &Member) -> Option<DeletionCandidate> {
        let handle = normalized(&member.username);
        if handle.is_empty() {
            return None;
        }

        let (pattern, _) = self
            .suspicious_handles
            .iter()
            .find(|(_, re)| re.is_match(&handle))?;

        let details = HashMap::from([
            ("suspicious_username".to_string(), serde_json::json!(true)),
            ("reason".to_string(), serde_json::json!(format!("Matches pattern: {}", pattern))),
        ]);
        Some(DeletionCandidate::from_member(
            member,
            DeletionReason::FakePattern,
            SUSPICIOUS_HANDLE_CONFIDENCE,
            details,
        ))
    }

    fn default_profile(&self, member: &Member) -> Option<DeletionCandidate> {
        let first = normalized(&member.first_name);
        let last = normalized(&member.last_name);

        let mut issues = Vec::new();
        let mut confidence: f64 = 0.0;

        if DEFAULT_NAMES.contains(&first.as_str()) {
            issues.push(format!("Default first name: {}", first));
            confidence += DEFAULT_FIRST_NAME_WEIGHT;
        }
        if !last.is_empty() && DEFAULT_NAMES.contains(&last.as_str()) {
            issues.push(format!("Default last name: {}", last));
            confidence += DEFAULT_LAST_NAME_WEIGHT;
        }

        let confidence = confidence.min(DEFAULT_PROFILE_CAP);
        // Small epsilon: 0.3 + 0.2 is not exactly 0.5 in binary floating point.
        if confidence + 1e-9 < DEFAULT_PROFILE_THRESHOLD {
            return None;
        }

        let details = HashMap::from([
            ("empty_profile".to_string(), serde_json::json!(true)),
            ("reason".to_string(), serde_json::json!(issues.join("; "))),
        ]);
        Some(DeletionCandidate::from_member(
            member,
            DeletionReason::EmptyProfile,
            confidence,
            details,
        ))
    }

    /// Run the primary path over every stored member of a collection.
    pub fn scan(&self, store: &MemberStore, channel_id: i64) -> Result<Vec<DeletionCandidate>> {
        let members = store.members_for(channel_id)?;
        let candidates: Vec<_> = members.iter().filter_map(|m| self.evaluate(m)).collect();

        tracing::info!(
            channel_id,
            scanned = members.len(),
            flagged = candidates.len(),
            "classification scan finished"
        );
        Ok(candidates)
    }

    /// Like [`scan`](Self::scan) but through the batch path.
    pub fn scan_batch(&self, store: &MemberStore, channel_id: i64) -> Result<Vec<DeletionCandidate>> {
        let members = store.members_for(channel_id)?;
        Ok(self.evaluate_batch(&members))
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// POST-PROCESSING
// ============================================================================

pub fn filter_by_confidence(candidates: &[DeletionCandidate], threshold: f64) -> Vec<DeletionCandidate> {
    candidates
        .iter()
        .filter(|c| c.confidence >= threshold)
        .cloned()
        .collect()
}

pub fn group_by_reason(
    candidates: &[DeletionCandidate],
) -> BTreeMap<DeletionReason, Vec<DeletionCandidate>> {
    let mut grouped: BTreeMap<DeletionReason, Vec<DeletionCandidate>> = BTreeMap::new();
    for candidate in candidates {
        grouped.entry(candidate.reason).or_default().push(candidate.clone());
    }
    grouped
}

/// Counts for one classification pass.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub timestamp: DateTime<Utc>,
    pub channel_id: Option<i64>,
    pub total_candidates: usize,
    pub by_reason: BTreeMap<String, usize>,
    pub high_confidence: usize,
}

impl AnalysisReport {
    pub fn build(channel_id: Option<i64>, candidates: &[DeletionCandidate]) -> Self {
        let by_reason = group_by_reason(candidates)
            .into_iter()
            .map(|(reason, group)| (reason.label().to_string(), group.len()))
            .collect();

        AnalysisReport {
            timestamp: Utc::now(),
            channel_id,
            total_candidates: candidates.len(),
            by_reason,
            high_confidence: candidates.iter().filter(|c| c.confidence >= HIGH_CONFIDENCE).count(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
