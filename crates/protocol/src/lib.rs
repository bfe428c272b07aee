//! Shared data model for codemend: the issue taxonomy, analysis reports, fix results and
//! project identity. Every other crate in the workspace speaks these types.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod fix;
pub mod issue;
pub mod path_filters;
pub mod project;
pub mod report;

pub use fix::FixResult;
pub use issue::{
    issue_id, normalize_description, AnalysisType, Issue, IssueCategory, LineRange, Severity,
};
pub use path_filters::{normalize_rel_path, PathFilter, PatternError};
pub use project::ProjectId;
pub use report::{
    AnalysisReport, ReportMeta, ReportRef, RunWarning, WarningKind, REPORT_SCHEMA_VERSION,
};

/// A readable project file. `rel_path` uses forward slashes and is relative to the project root.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub rel_path: String,
    pub content: String,
}

impl SourceFile {
    pub fn new(rel_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            rel_path: normalize_rel_path(&rel_path.into()),
            content: content.into(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.content.lines().count()
    }
}

pub fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
