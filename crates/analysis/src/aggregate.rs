use codemend_protocol::{AnalysisReport, Issue, ReportMeta, RunWarning};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

/// Threshold `1.0` keeps only exact normalized matches; lower values compare token sets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DedupConfig {
    pub similarity_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 1.0,
        }
    }
}

impl DedupConfig {
    fn similar(&self, a: &str, b: &str) -> bool {
        if a == b {
            return true;
        }
        if self.similarity_threshold >= 1.0 {
            return false;
        }
        jaccard(a, b) >= self.similarity_threshold
    }
}

fn tokens(text: &str) -> BTreeSet<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect()
}

fn jaccard(a: &str, b: &str) -> f64 {
    let a = tokens(a);
    let b = tokens(b);
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a.intersection(&b).count() as f64;
    let total = a.union(&b).count() as f64;
    shared / total
}

/// Collects issue sequences from every job. The caller is the only writer; ordering and
/// merging happen in [`IssueAggregator::finish`] so arrival order never shows in the report.
#[derive(Debug, Default)]
pub struct IssueAggregator {
    config: DedupConfig,
    collected: Vec<Issue>,
    warnings: Vec<RunWarning>,
}

impl IssueAggregator {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            collected: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn extend<I>(&mut self, issues: I)
    where
        I: IntoIterator<Item = Issue>,
    {
        self.collected.extend(issues);
    }

    pub fn push_warning(&mut self, warning: RunWarning) {
        self.warnings.push(warning);
    }

    pub fn finish(self, meta: ReportMeta) -> AnalysisReport {
        let Self {
            config,
            mut collected,
            mut warnings,
        } = self;

        collected.sort_by(merge_order);
        let mut merged: Vec<Issue> = Vec::with_capacity(collected.len());
        let mut normalized: Vec<String> = Vec::with_capacity(collected.len());
        for issue in collected {
            let key = issue.normalized_description();
            let existing = merged.iter().zip(&normalized).position(|(kept, kept_key)| {
                kept.file_path == issue.file_path
                    && kept.category == issue.category
                    && ranges_overlap(kept, &issue)
                    && config.similar(kept_key, &key)
            });
            match existing {
                Some(idx) => merge_into(&mut merged[idx], issue),
                None => {
                    merged.push(issue);
                    normalized.push(key);
                }
            }
        }

        merged.sort_by(report_order);
        dedupe_ids(&mut merged);

        warnings.sort_by(|a, b| {
            (a.chunk_index, &a.files, a.kind, &a.detail).cmp(&(
                b.chunk_index,
                &b.files,
                b.kind,
                &b.detail,
            ))
        });
        warnings.dedup();

        AnalysisReport::new(meta, merged, warnings)
    }
}

/// One-shot form of [`IssueAggregator`] for callers that already hold every sequence.
pub fn aggregate<S>(sequences: S, config: &DedupConfig, meta: ReportMeta) -> AnalysisReport
where
    S: IntoIterator<Item = Vec<Issue>>,
{
    let mut aggregator = IssueAggregator::new(*config);
    for sequence in sequences {
        aggregator.extend(sequence);
    }
    aggregator.finish(meta)
}

fn ranges_overlap(a: &Issue, b: &Issue) -> bool {
    match (a.line_range, b.line_range) {
        (Some(x), Some(y)) => x.overlaps(&y),
        (None, None) => true,
        _ => false,
    }
}

fn merge_into(kept: &mut Issue, other: Issue) {
    kept.severity = kept.severity.max(other.severity);
    kept.occurrences = kept.occurrences.saturating_add(other.occurrences);
    if let (Some(a), Some(b)) = (kept.line_range, other.line_range) {
        kept.line_range = Some(a.union(&b));
    }
    if let Some(fix) = other.suggested_fix {
        match &mut kept.suggested_fix {
            Some(existing) if existing.contains(fix.as_str()) => {}
            Some(existing) => {
                existing.push_str("\n\n");
                existing.push_str(&fix);
            }
            None => kept.suggested_fix = Some(fix),
        }
    }
}

/// Total order over every field, so the merge walk is the same for any input permutation.
fn merge_order(a: &Issue, b: &Issue) -> Ordering {
    a.file_path
        .cmp(&b.file_path)
        .then_with(|| a.line_range.cmp(&b.line_range))
        .then_with(|| a.category.cmp(&b.category))
        .then_with(|| a.normalized_description().cmp(&b.normalized_description()))
        .then_with(|| b.severity.cmp(&a.severity))
        .then_with(|| a.description.cmp(&b.description))
        .then_with(|| a.suggested_fix.cmp(&b.suggested_fix))
        .then_with(|| a.analysis_type.cmp(&b.analysis_type))
        .then_with(|| a.occurrences.cmp(&b.occurrences))
        .then_with(|| a.id.cmp(&b.id))
}

fn report_order(a: &Issue, b: &Issue) -> Ordering {
    b.severity
        .cmp(&a.severity)
        .then_with(|| a.file_path.cmp(&b.file_path))
        .then_with(|| a.start_line().cmp(&b.start_line()))
        .then_with(|| a.id.cmp(&b.id))
        .then_with(|| merge_order(a, b))
}

/// Distinct issues can share an id (same file, line and text but different category).
fn dedupe_ids(issues: &mut [Issue]) {
    let mut seen: HashMap<String, u32> = HashMap::new();
    for issue in issues.iter_mut() {
        let count = seen.entry(issue.id.clone()).or_insert(0);
        *count += 1;
        if *count > 1 {
            issue.id = format!("{}-{}", issue.id, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemend_protocol::{IssueCategory, LineRange, ProjectId, Severity};
    use pretty_assertions::assert_eq;

    fn meta() -> ReportMeta {
        ReportMeta {
            project_id: ProjectId::from_raw("demo-1"),
            project_root: "/work/demo".to_string(),
            generated_at_unix_ms: 1_000,
            files_analyzed: 2,
            files_skipped: 0,
            partial: false,
        }
    }

    fn issue(path: &str, lines: (u32, u32), category: IssueCategory, severity: Severity, text: &str) -> Issue {
        Issue::new(path, Some(LineRange::new(lines.0, lines.1)), category, severity, text)
    }

    #[test]
    fn duplicates_merge_and_distinct_issues_survive() {
        let sequences = vec![
            vec![
                issue("a.py", (10, 12), IssueCategory::Security, Severity::High, "Hard-coded password")
                    .with_suggested_fix("Read it from the environment"),
                issue("a.py", (40, 40), IssueCategory::Other, Severity::Low, "Unused variable tmp"),
            ],
            vec![
                issue("a.py", (11, 14), IssueCategory::Security, Severity::Critical, "hard-coded   password.")
                    .with_suggested_fix("Use a secrets manager"),
            ],
        ];

        let report = aggregate(sequences, &DedupConfig::default(), meta());
        assert_eq!(report.total_issues, 2);

        let merged = &report.issues[0];
        assert_eq!(merged.severity, Severity::Critical);
        assert_eq!(merged.occurrences, 2);
        assert_eq!(merged.line_range, Some(LineRange::new(10, 14)));
        let fix = merged.suggested_fix.as_deref().unwrap_or_default();
        assert!(fix.contains("environment") && fix.contains("secrets manager"));
        assert_eq!(report.issues[1].severity, Severity::Low);
    }

    #[test]
    fn different_category_or_disjoint_lines_do_not_merge() {
        let sequences = vec![vec![
            issue("a.py", (1, 2), IssueCategory::Security, Severity::High, "Input is not validated"),
            issue("a.py", (1, 2), IssueCategory::TypeSafety, Severity::High, "Input is not validated"),
            issue("a.py", (30, 31), IssueCategory::Security, Severity::High, "Input is not validated"),
        ]];
        let report = aggregate(sequences, &DedupConfig::default(), meta());
        assert_eq!(report.total_issues, 3);

        let ids: BTreeSet<&str> = report.issues.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids.len(), 3, "ids stay unique after merging");
    }

    #[test]
    fn lower_threshold_uses_token_similarity() {
        let sequences = vec![vec![
            issue("a.py", (5, 5), IssueCategory::ErrorHandling, Severity::Medium, "bare except swallows all errors"),
            issue("a.py", (5, 6), IssueCategory::ErrorHandling, Severity::Medium, "bare except swallows errors"),
        ]];
        let exact = aggregate(sequences.clone(), &DedupConfig::default(), meta());
        assert_eq!(exact.total_issues, 2);

        let loose = aggregate(
            sequences,
            &DedupConfig {
                similarity_threshold: 0.7,
            },
            meta(),
        );
        assert_eq!(loose.total_issues, 1);
    }

    #[test]
    fn arrival_order_does_not_change_the_report() {
        let a = issue("b.py", (3, 3), IssueCategory::Performance, Severity::Medium, "Quadratic loop over rows");
        let b = issue("a.py", (9, 9), IssueCategory::Security, Severity::High, "Shell command built from input");
        let c = issue("a.py", (9, 10), IssueCategory::Security, Severity::Medium, "shell command built from input")
            .with_suggested_fix("Pass arguments as a list");

        let forward = aggregate(vec![vec![a.clone(), b.clone(), c.clone()]], &DedupConfig::default(), meta());
        let backward = aggregate(vec![vec![c], vec![b], vec![a]], &DedupConfig::default(), meta());
        assert_eq!(forward.issues, backward.issues);
        assert_eq!(forward.issues[0].file_path, "a.py");
        assert_eq!(forward.issues[0].severity, Severity::High);
    }

    #[test]
    fn issues_without_lines_merge_only_with_each_other() {
        let sequences = vec![vec![
            Issue::new("a.py", None, IssueCategory::Testing, Severity::Low, "No tests for parser module"),
            Issue::new("a.py", None, IssueCategory::Testing, Severity::Medium, "No tests for parser module"),
            issue("a.py", (1, 1), IssueCategory::Testing, Severity::Low, "No tests for parser module"),
        ]];
        let report = aggregate(sequences, &DedupConfig::default(), meta());
        assert_eq!(report.total_issues, 2);
    }
}
