// 📄 Report Export - candidate lists and removal stats as CSV / JSON

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::model::MutationStats;
use crate::rules::{AnalysisReport, DeletionCandidate};

/// One CSV line per candidate.
#[derive(Debug, Serialize)]
struct CandidateRow<'a> {
    #[serde(rename = "ID")]
    id: i64,
    #[serde(rename = "Username")]
    username: Option<&'a str>,
    #[serde(rename = "First Name")]
    first_name: Option<&'a str>,
    #[serde(rename = "Last Name")]
    last_name: Option<&'a str>,
    #[serde(rename = "Reason")]
    reason: &'static str,
    #[serde(rename = "Confidence")]
    confidence: f64,
}

impl<'a> From<&'a DeletionCandidate> for CandidateRow<'a> {
    fn from(c: &'a DeletionCandidate) -> Self {
        CandidateRow {
            id: c.user_id,
            username: c.username.as_deref(),
            first_name: c.first_name.as_deref(),
            last_name: c.last_name.as_deref(),
            reason: c.reason.code(),
            confidence: c.confidence,
        }
    }
}

#[derive(Debug, Serialize)]
struct CandidateEntry<'a> {
    id: i64,
    access_hash: i64,
    username: Option<&'a str>,
    first_name: Option<&'a str>,
    last_name: Option<&'a str>,
    reason: &'static str,
    confidence: f64,
    is_bot: bool,
    evidence: &'a HashMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct CandidateMetadata<'a> {
    generated_at: DateTime<Utc>,
    channel_username: &'a str,
    total_candidates: usize,
    summary: &'a AnalysisReport,
}

#[derive(Debug, Serialize)]
struct CandidateDocument<'a> {
    metadata: CandidateMetadata<'a>,
    candidates: Vec<CandidateEntry<'a>>,
}

/// Paths of the files produced by one export.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportFiles {
    pub csv: PathBuf,
    pub json: PathBuf,
}

pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(ReportWriter { dir: dir.as_ref().to_path_buf() })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `deletion_candidates_<handle>_<stamp>.{csv,json}`.
    pub fn write_candidates(
        &self,
        channel_id: i64,
        channel_username: &str,
        candidates: &[DeletionCandidate],
    ) -> Result<ReportFiles> {
        let base = format!(
            "deletion_candidates_{}_{}",
            file_safe(channel_username),
            Utc::now().format("%Y%m%d_%H%M%S")
        );
        self.write_candidates_as(&base, channel_id, channel_username, candidates)
    }

    pub fn write_candidates_as(
        &self,
        base: &str,
        channel_id: i64,
        channel_username: &str,
        candidates: &[DeletionCandidate],
    ) -> Result<ReportFiles> {
        let csv_path = self.dir.join(format!("{}.csv", base));
        let mut writer = csv::Writer::from_path(&csv_path)?;
        for candidate in candidates {
            writer.serialize(CandidateRow::from(candidate))?;
        }
        writer.flush()?;

        let summary = AnalysisReport::build(Some(channel_id), candidates);
        let document = CandidateDocument {
            metadata: CandidateMetadata {
                generated_at: Utc::now(),
                channel_username,
                total_candidates: candidates.len(),
                summary: &summary,
            },
            candidates: candidates
                .iter()
                .map(|c| CandidateEntry {
                    id: c.user_id,
                    access_hash: c.access_hash,
                    username: c.username.as_deref(),
                    first_name: c.first_name.as_deref(),
                    last_name: c.last_name.as_deref(),
                    reason: c.reason.code(),
                    confidence: c.confidence,
                    is_bot: c.is_bot(),
                    evidence: &c.details,
                })
                .collect(),
        };

        let json_path = self.dir.join(format!("{}.json", base));
        fs::write(&json_path, serde_json::to_string_pretty(&document)?)?;

        tracing::info!(
            candidates = candidates.len(),
            csv = %csv_path.display(),
            json = %json_path.display(),
            "candidate report written"
        );
        Ok(ReportFiles { csv: csv_path, json: json_path })
    }

    /// Metric/Value table of the mutation log aggregates.
    pub fn write_mutation_stats(&self, base: &str, stats: &MutationStats) -> Result<PathBuf> {
        let path = self.dir.join(format!("{}_deletion_stats.csv", base));
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(["Metric", "Value"])?;
        for (metric, value) in [
            ("Total Attempts", stats.total),
            ("Successful", stats.successful),
            ("Failed", stats.failed),
            ("With Errors", stats.with_errors),
        ] {
            writer.write_record([metric, &value.to_string()])?;
        }
        writer.flush()?;
        Ok(path)
    }
}

fn file_safe(handle: &str) -> String {
    handle
        .trim_start_matches('@')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::DeletionReason;
    use tempfile::TempDir;

    fn candidate(id: i64, username: Option<&str>, confidence: f64) -> DeletionCandidate {
        DeletionCandidate {
            user_id: id,
            access_hash: id * 11,
            username: username.map(str::to_string),
            first_name: Some("Deleted Account".to_string()),
            last_name: None,
            reason: DeletionReason::DeletedAccount,
            confidence,
            details: HashMap::from([
                ("pattern_matched".to_string(), serde_json::json!("deleted\\s+account")),
                ("bot".to_string(), serde_json::json!(false)),
            ]),
        }
    }

    #[test]
    fn test_candidate_csv_layout() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::open(dir.path()).unwrap();

        let files = writer
            .write_candidates_as("out", 1, "@chan", &[candidate(3, None, 0.99), candidate(4, Some("user"), 0.98)])
            .unwrap();

        let mut reader = csv::Reader::from_path(&files.csv).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec!["ID", "Username", "First Name", "Last Name", "Reason", "Confidence"]
        );

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "3");
        assert_eq!(&rows[0][1], "");
        assert_eq!(&rows[0][4], "DELETED_ACCOUNT");
        assert_eq!(&rows[1][1], "user");
    }

    #[test]
    fn test_candidate_json_has_evidence_and_summary() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::open(dir.path()).unwrap();

        let files = writer
            .write_candidates_as("out", 1, "@chan", &[candidate(3, None, 0.99), candidate(4, None, 0.5)])
            .unwrap();

        let doc: serde_json::Value = serde_json::from_str(&fs::read_to_string(&files.json).unwrap()).unwrap();
        assert_eq!(doc["metadata"]["total_candidates"], 2);
        assert_eq!(doc["metadata"]["channel_username"], "@chan");
        assert_eq!(doc["metadata"]["summary"]["high_confidence"], 1);
        assert_eq!(doc["candidates"][0]["evidence"]["pattern_matched"], "deleted\\s+account");
        assert_eq!(doc["candidates"][0]["is_bot"], false);
    }

    #[test]
    fn test_generated_name_strips_handle_prefix() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::open(dir.path()).unwrap();

        let files = writer.write_candidates(1, "@my.chan", &[]).unwrap();
        let name = files.csv.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("deletion_candidates_my_chan_"));
        assert!(files.json.exists());
    }

    #[test]
    fn test_mutation_stats_table() {
        let dir = TempDir::new().unwrap();
        let writer = ReportWriter::open(dir.path()).unwrap();
        let stats = MutationStats { total: 5, successful: 3, failed: 2, with_errors: 2 };

        let path = writer.write_mutation_stats("run", &stats).unwrap();
        let content = fs::read_to_string(path).unwrap();
        assert!(content.starts_with("Metric,Value"));
        assert!(content.contains("Successful,3"));
        assert!(content.contains("With Errors,2"));
    }
}
