use crate::issue::{Issue, IssueCategory, Severity};
use crate::project::ProjectId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub const REPORT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    Unreadable,
    ParseFailure,
    InferenceFailure,
    FileAccess,
}

/// Non-fatal problem surfaced in report metadata instead of aborting the run.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RunWarning {
    pub kind: WarningKind,
    /// Files the warning applies to; every file of the chunk for chunk-level failures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
    pub detail: String,
}

impl RunWarning {
    pub fn new(kind: WarningKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            files: Vec::new(),
            chunk_index: None,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn for_file(mut self, file_path: impl Into<String>) -> Self {
        self.files.push(file_path.into());
        self
    }

    #[must_use]
    pub fn for_files<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files.extend(files.into_iter().map(Into::into));
        self
    }

    /// Parse and inference failures mean the listed files were not really analyzed.
    pub const fn blocks_reuse(&self) -> bool {
        matches!(
            self.kind,
            WarningKind::ParseFailure | WarningKind::InferenceFailure
        )
    }

    #[must_use]
    pub const fn for_chunk(mut self, chunk_index: usize) -> Self {
        self.chunk_index = Some(chunk_index);
        self
    }
}

/// Result of one analysis run. Immutable once persisted; later runs get a new `report_id`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnalysisReport {
    pub schema_version: u32,
    pub report_id: String,
    pub project_id: ProjectId,
    pub project_root: String,
    pub generated_at_unix_ms: u64,
    pub issues: Vec<Issue>,
    pub counts_by_category: BTreeMap<IssueCategory, usize>,
    pub counts_by_severity: BTreeMap<Severity, usize>,
    pub counts_by_file: BTreeMap<String, usize>,
    pub total_issues: usize,
    pub files_analyzed: usize,
    pub files_skipped: usize,
    #[serde(default)]
    pub warnings: Vec<RunWarning>,
    #[serde(default)]
    pub partial: bool,
}

impl AnalysisReport {
    /// Build a report from already ordered issues; summary counts are derived here.
    pub fn new(meta: ReportMeta, issues: Vec<Issue>, warnings: Vec<RunWarning>) -> Self {
        let mut report = Self {
            schema_version: REPORT_SCHEMA_VERSION,
            report_id: new_report_id(&meta.project_id, meta.generated_at_unix_ms),
            project_id: meta.project_id,
            project_root: meta.project_root,
            generated_at_unix_ms: meta.generated_at_unix_ms,
            issues,
            counts_by_category: BTreeMap::new(),
            counts_by_severity: BTreeMap::new(),
            counts_by_file: BTreeMap::new(),
            total_issues: 0,
            files_analyzed: meta.files_analyzed,
            files_skipped: meta.files_skipped,
            warnings,
            partial: meta.partial,
        };
        report.recount();
        report
    }

    pub fn recount(&mut self) {
        self.counts_by_category.clear();
        self.counts_by_severity.clear();
        self.counts_by_file.clear();
        for issue in &self.issues {
            *self.counts_by_category.entry(issue.category).or_default() += 1;
            *self.counts_by_severity.entry(issue.severity).or_default() += 1;
            *self
                .counts_by_file
                .entry(issue.file_path.clone())
                .or_default() += 1;
        }
        self.total_issues = self.issues.len();
    }

    pub fn issues_for_file<'a>(&'a self, file_path: &'a str) -> impl Iterator<Item = &'a Issue> {
        self.issues
            .iter()
            .filter(move |issue| issue.file_path == file_path)
    }

    pub fn find_issue(&self, id: &str) -> Option<&Issue> {
        self.issues.iter().find(|issue| issue.id == id)
    }

    pub fn to_ref(&self) -> ReportRef {
        ReportRef {
            report_id: self.report_id.clone(),
            generated_at_unix_ms: self.generated_at_unix_ms,
            total_issues: self.total_issues,
            files_analyzed: self.files_analyzed,
            partial: self.partial,
        }
    }
}

/// Run metadata handed to the aggregator when the report is finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportMeta {
    pub project_id: ProjectId,
    pub project_root: String,
    pub generated_at_unix_ms: u64,
    pub files_analyzed: usize,
    pub files_skipped: usize,
    pub partial: bool,
}

/// Pointer from a memory record to a persisted report.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ReportRef {
    pub report_id: String,
    pub generated_at_unix_ms: u64,
    pub total_issues: usize,
    pub files_analyzed: usize,
    #[serde(default)]
    pub partial: bool,
}

fn new_report_id(project_id: &ProjectId, generated_at_unix_ms: u64) -> String {
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);

    let mut hasher = Sha256::new();
    hasher.update(project_id.as_str().as_bytes());
    hasher.update(generated_at_unix_ms.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(seq.to_le_bytes());
    let digest = hasher.finalize();
    let suffix: String = digest[..4].iter().map(|b| format!("{b:02x}")).collect();
    format!("{generated_at_unix_ms}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::LineRange;
    use pretty_assertions::assert_eq;

    fn meta() -> ReportMeta {
        ReportMeta {
            project_id: ProjectId::from_raw("demo-0000000000000001"),
            project_root: "/tmp/demo".to_string(),
            generated_at_unix_ms: 1_700_000_000_000,
            files_analyzed: 2,
            files_skipped: 1,
            partial: false,
        }
    }

    #[test]
    fn counts_follow_issues() {
        let issues = vec![
            Issue::new(
                "a.py",
                Some(LineRange::single(1)),
                IssueCategory::Security,
                Severity::Critical,
                "hard-coded password",
            ),
            Issue::new("a.py", None, IssueCategory::Other, Severity::Low, "unused var"),
            Issue::new("b.js", None, IssueCategory::Other, Severity::Low, "console.log left"),
        ];
        let report = AnalysisReport::new(meta(), issues, Vec::new());
        assert_eq!(report.total_issues, 3);
        assert_eq!(report.counts_by_file.get("a.py"), Some(&2));
        assert_eq!(report.counts_by_category.get(&IssueCategory::Other), Some(&2));
        assert_eq!(report.counts_by_severity.get(&Severity::Critical), Some(&1));
        assert_eq!(report.issues_for_file("b.js").count(), 1);
    }

    #[test]
    fn report_ids_are_unique_within_a_process() {
        let a = AnalysisReport::new(meta(), Vec::new(), Vec::new());
        let b = AnalysisReport::new(meta(), Vec::new(), Vec::new());
        assert_ne!(a.report_id, b.report_id);
        assert!(a.report_id.starts_with("1700000000000-"));
    }

    #[test]
    fn json_round_trip_keeps_enum_keyed_counts() {
        let issues = vec![Issue::new(
            "a.py",
            None,
            IssueCategory::ErrorHandling,
            Severity::High,
            "bare except",
        )];
        let report = AnalysisReport::new(meta(), issues, Vec::new());
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"error-handling\":1"));
        let back: AnalysisReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
