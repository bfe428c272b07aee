use codemend_fingerprint::ProjectFingerprint;
use codemend_protocol::{unix_now_ms, AnalysisReport, FixResult, ProjectId, ReportRef};
use serde::{Deserialize, Serialize};

pub const RECORD_SCHEMA_VERSION: u32 = 1;

/// Reports kept per project, most recent first.
pub const HISTORY_LIMIT: usize = 10;

/// Everything remembered about one project between runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    pub schema_version: u32,
    pub project_id: ProjectId,
    pub project_root: String,
    pub created_at_unix_ms: u64,
    pub updated_at_unix_ms: u64,
    pub fingerprint: ProjectFingerprint,
    #[serde(default)]
    pub latest_report: Option<ReportRef>,
    #[serde(default)]
    pub history: Vec<ReportRef>,
    #[serde(default)]
    pub fix_attempts: Vec<FixResult>,
}

impl MemoryRecord {
    pub fn new(project_id: ProjectId, project_root: impl Into<String>) -> Self {
        let now = unix_now_ms();
        Self {
            schema_version: RECORD_SCHEMA_VERSION,
            project_id,
            project_root: project_root.into(),
            created_at_unix_ms: now,
            updated_at_unix_ms: now,
            fingerprint: ProjectFingerprint::default(),
            latest_report: None,
            history: Vec::new(),
            fix_attempts: Vec::new(),
        }
    }

    /// Replace the fingerprint and link `report` as the latest analysis.
    pub fn link_report(&mut self, report: &AnalysisReport, fingerprint: ProjectFingerprint) {
        let reference = report.to_ref();
        self.history.retain(|r| r.report_id != reference.report_id);
        self.history.insert(0, reference.clone());
        self.history.truncate(HISTORY_LIMIT);
        self.latest_report = Some(reference);
        self.fingerprint = fingerprint;
        self.project_root = report.project_root.clone();
        self.touch();
    }

    /// Append fix outcomes; earlier entries are never rewritten.
    pub fn record_fixes(&mut self, results: impl IntoIterator<Item = FixResult>) {
        self.fix_attempts.extend(results);
        self.touch();
    }

    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            project_id: self.project_id.clone(),
            project_root: self.project_root.clone(),
            updated_at_unix_ms: self.updated_at_unix_ms,
            latest_report_id: self.latest_report.as_ref().map(|r| r.report_id.clone()),
            total_issues: self.latest_report.as_ref().map_or(0, |r| r.total_issues),
            files_analyzed: self.latest_report.as_ref().map_or(0, |r| r.files_analyzed),
            analyses: self.history.len(),
            fix_attempts: self.fix_attempts.len(),
            fixes_applied: self.fix_attempts.iter().filter(|f| f.applied).count(),
        }
    }

    fn touch(&mut self) {
        // Keep updates strictly ordered even when two land in the same millisecond.
        self.updated_at_unix_ms = unix_now_ms().max(self.updated_at_unix_ms + 1);
    }
}

/// One line of `codemend list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordSummary {
    pub project_id: ProjectId,
    pub project_root: String,
    pub updated_at_unix_ms: u64,
    pub latest_report_id: Option<String>,
    pub total_issues: usize,
    pub files_analyzed: usize,
    pub analyses: usize,
    pub fix_attempts: usize,
    pub fixes_applied: usize,
}

/// Most recent first, ties broken by project id.
pub fn sort_summaries(summaries: &mut [RecordSummary]) {
    summaries.sort_by(|a, b| {
        b.updated_at_unix_ms
            .cmp(&a.updated_at_unix_ms)
            .then_with(|| a.project_id.cmp(&b.project_id))
    });
}
