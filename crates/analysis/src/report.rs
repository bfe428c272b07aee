use crate::error::ReportParseError;
use chrono::{DateTime, Utc};
use codemend_protocol::{AnalysisReport, Issue, IssueCategory, Severity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const REPORT_MARKER: &str = "<!-- codemend:report ";
const ISSUE_MARKER: &str = "<!-- codemend:issue ";
const MARKER_END: &str = " -->";

/// Header embedded at the top of every rendered report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportHeader {
    pub report_id: String,
    pub project_id: String,
    pub project_root: String,
}

/// Issues recovered from a report document, in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportDocument {
    pub header: Option<ReportHeader>,
    pub issues: Vec<Issue>,
}

fn marker_json<T: Serialize>(value: &T) -> String {
    // `-->` inside a string would end the HTML comment early; `>` decodes back to `>`.
    serde_json::to_string(value)
        .unwrap_or_else(|_| "{}".to_string())
        .replace("-->", "--\\u003e")
}

fn format_timestamp(unix_ms: u64) -> String {
    i64::try_from(unix_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| unix_ms.to_string())
}

pub fn render_markdown(report: &AnalysisReport) -> String {
    let mut md = String::new();
    let header = ReportHeader {
        report_id: report.report_id.clone(),
        project_id: report.project_id.to_string(),
        project_root: report.project_root.clone(),
    };
    md.push_str(&format!("{REPORT_MARKER}{}{MARKER_END}\n", marker_json(&header)));
    md.push_str("# Code Analysis Report\n\n");
    md.push_str(&format!("- Project: `{}`\n", report.project_root));
    md.push_str(&format!("- Project id: `{}`\n", report.project_id));
    md.push_str(&format!("- Report: `{}`\n", report.report_id));
    md.push_str(&format!(
        "- Generated: {}\n",
        format_timestamp(report.generated_at_unix_ms)
    ));
    md.push_str(&format!("- Files analyzed: {}\n", report.files_analyzed));
    md.push_str(&format!("- Files skipped (unchanged): {}\n", report.files_skipped));
    md.push_str(&format!("- Total issues: {}\n\n", report.total_issues));

    if report.partial {
        md.push_str(
            "> **Partial coverage:** the run was cancelled before every chunk was analyzed.\n\n",
        );
    }

    md.push_str("## Summary\n\n");
    md.push_str("| Severity | Count |\n|---|---|\n");
    for severity in [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ] {
        let count = report.counts_by_severity.get(&severity).copied().unwrap_or(0);
        md.push_str(&format!("| {severity} | {count} |\n"));
    }
    md.push('\n');

    if !report.counts_by_category.is_empty() {
        md.push_str("| Category | Count |\n|---|---|\n");
        for category in IssueCategory::ALL {
            if let Some(count) = report.counts_by_category.get(&category) {
                md.push_str(&format!("| {category} | {count} |\n"));
            }
        }
        md.push('\n');
    }

    if !report.warnings.is_empty() {
        md.push_str("## Warnings\n\n");
        for warning in &report.warnings {
            let kind = serde_json::to_value(warning.kind)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            md.push_str(&format!("- `{kind}`"));
            if !warning.files.is_empty() {
                md.push_str(&format!(" {}", warning.files.join(", ")));
            }
            if let Some(chunk) = warning.chunk_index {
                md.push_str(&format!(" (chunk {chunk})"));
            }
            md.push_str(&format!(": {}\n", warning.detail));
        }
        md.push('\n');
    }

    md.push_str("## Issues\n\n");
    if report.issues.is_empty() {
        md.push_str("No issues found.\n");
        return md;
    }

    let mut by_file: BTreeMap<&str, Vec<&Issue>> = BTreeMap::new();
    for issue in &report.issues {
        by_file.entry(issue.file_path.as_str()).or_default().push(issue);
    }

    for (file, issues) in by_file {
        md.push_str(&format!("### File: {file}\n\n"));
        for (n, issue) in issues.iter().enumerate() {
            md.push_str(&format!("{ISSUE_MARKER}{}{MARKER_END}\n", marker_json(issue)));
            let lines = issue
                .line_range
                .map(|r| format!(" (lines {r})"))
                .unwrap_or_default();
            md.push_str(&format!(
                "#### {}. [{}] {}{lines}\n\n",
                n + 1,
                issue.severity.as_str().to_uppercase(),
                issue.category
            ));
            md.push_str(&format!("{}\n\n", issue.description));
            if issue.occurrences > 1 {
                md.push_str(&format!("_Reported {} times._\n\n", issue.occurrences));
            }
            if let Some(fix) = &issue.suggested_fix {
                md.push_str("**Suggested fix:**\n\n");
                md.push_str(&format!("{fix}\n\n"));
            }
            md.push_str(&format!("_Issue id: `{}`_\n\n", issue.id));
        }
    }

    md
}

/// Recover issues from a rendered Markdown report or a JSON [`AnalysisReport`].
pub fn parse_report_document(text: &str) -> Result<ReportDocument, ReportParseError> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') {
        let report: AnalysisReport = serde_json::from_str(trimmed)?;
        return Ok(ReportDocument {
            header: Some(ReportHeader {
                report_id: report.report_id,
                project_id: report.project_id.to_string(),
                project_root: report.project_root,
            }),
            issues: report.issues,
        });
    }

    let mut header = None;
    let mut issues = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if let Some(body) = marker_body(line, REPORT_MARKER) {
            header = Some(serde_json::from_str::<ReportHeader>(body).map_err(|err| {
                ReportParseError::InvalidMarker {
                    line: idx + 1,
                    message: err.to_string(),
                }
            })?);
        } else if let Some(body) = marker_body(line, ISSUE_MARKER) {
            let issue = serde_json::from_str::<Issue>(body).map_err(|err| {
                ReportParseError::InvalidMarker {
                    line: idx + 1,
                    message: err.to_string(),
                }
            })?;
            issues.push(issue);
        }
    }

    if header.is_none() && issues.is_empty() {
        return Err(ReportParseError::NotAReport);
    }
    Ok(ReportDocument { header, issues })
}

fn marker_body<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.strip_prefix(marker)?.strip_suffix(MARKER_END)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemend_protocol::{LineRange, ProjectId, ReportMeta, RunWarning, WarningKind};
    use pretty_assertions::assert_eq;

    fn report() -> AnalysisReport {
        let issues = vec![
            Issue::new(
                "src/app.py",
                Some(LineRange::new(2, 3)),
                IssueCategory::Security,
                Severity::Critical,
                "Hard-coded credential --> leaks in logs",
            )
            .with_suggested_fix("Read `PASSWORD` from the environment"),
            Issue::new("src/util.js", None, IssueCategory::Other, Severity::Low, "Unused helper"),
        ];
        AnalysisReport::new(
            ReportMeta {
                project_id: ProjectId::from_raw("demo-1"),
                project_root: "/work/demo".to_string(),
                generated_at_unix_ms: 1_700_000_000_000,
                files_analyzed: 2,
                files_skipped: 1,
                partial: true,
            },
            issues,
            vec![RunWarning::new(WarningKind::ParseFailure, "unreadable reply")
                .for_file("src/util.js")
                .for_chunk(1)],
        )
    }

    #[test]
    fn markdown_lists_files_and_summary() {
        let md = render_markdown(&report());
        assert!(md.contains("### File: src/app.py"));
        assert!(md.contains("### File: src/util.js"));
        assert!(md.contains("#### 1. [CRITICAL] security (lines 2-3)"));
        assert!(md.contains("| critical | 1 |"));
        assert!(md.contains("Partial coverage"));
        assert!(md.contains("- `parse_failure` src/util.js (chunk 1): unreadable reply"));
        assert!(md.contains("2023-11-14"));
    }

    #[test]
    fn markdown_round_trips_issues() {
        let report = report();
        let doc = parse_report_document(&render_markdown(&report)).unwrap();
        assert_eq!(doc.issues, report.issues);
        assert_eq!(
            doc.header.map(|h| h.report_id),
            Some(report.report_id.clone())
        );
    }

    #[test]
    fn json_report_is_accepted() {
        let report = report();
        let json = serde_json::to_string_pretty(&report).unwrap();
        let doc = parse_report_document(&json).unwrap();
        assert_eq!(doc.issues, report.issues);
    }

    #[test]
    fn unrelated_documents_are_rejected() {
        let err = parse_report_document("# Notes\n\nnothing here\n").unwrap_err();
        assert!(matches!(err, ReportParseError::NotAReport));

        let err = parse_report_document("<!-- codemend:issue {broken -->\n").unwrap_err();
        assert!(matches!(err, ReportParseError::InvalidMarker { line: 1, .. }));
    }
}
