use codemend_chunker::{AnalysisChunk, ChunkItem, Language};
use codemend_protocol::{AnalysisType, Issue, LineRange};
use std::collections::HashMap;

/// Previous findings listed per file in a re-analysis prompt.
const MAX_PRIOR_FINDINGS: usize = 5;

/// JSON shape the analysis prompt asks for. The parser accepts far more than this.
pub const ISSUE_SCHEMA: &str = r#"{"issues": [{"file": "<path as given>", "line_start": 12, "line_end": 14, "category": "error-handling|type-safety|performance|security|duplication|testing|other", "severity": "critical|high|medium|low", "description": "<what is wrong>", "suggested_fix": "<concrete change>"}]}"#;

fn focus(analysis_type: AnalysisType) -> &'static str {
    match analysis_type {
        AnalysisType::Standard => {
            "Focus on:\n\
             1. Potential bugs and unhandled edge cases\n\
             2. Error handling and robustness\n\
             3. Type safety\n\
             4. Duplicated logic\n\
             5. Missing or weak tests\n"
        }
        AnalysisType::Security => {
            "Focus on SECURITY issues only:\n\
             1. Hard-coded secrets or credentials\n\
             2. Injection (SQL, shell, template)\n\
             3. Missing input validation or sanitization\n\
             4. Authentication and authorization gaps\n\
             5. Sensitive data exposure\n"
        }
        AnalysisType::Performance => {
            "Focus on PERFORMANCE issues only:\n\
             1. Inefficient algorithms or data structures\n\
             2. Repeated work inside loops\n\
             3. Excess memory, CPU or I/O usage\n\
             4. Missing caching or batching\n"
        }
        AnalysisType::Growth => {
            "Focus on GROWTH and SCALABILITY issues only:\n\
             1. Hard-coded limits and constants\n\
             2. Tight coupling between components\n\
             3. Missing extension points\n\
             4. Load handling\n"
        }
    }
}

fn fence_language(item: &ChunkItem) -> &str {
    item.language.as_deref().unwrap_or("")
}

fn push_numbered(prompt: &mut String, item: &ChunkItem) {
    let width = item.end_line.to_string().len();
    for (offset, line) in item.content.lines().enumerate() {
        let number = item.start_line + offset;
        prompt.push_str(&format!("{number:>width$} | {line}\n"));
    }
}

/// Findings of the previous report for files that changed since, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct PriorFindings {
    by_file: HashMap<String, Vec<Issue>>,
}

impl PriorFindings {
    pub fn from_issues(issues: impl IntoIterator<Item = Issue>) -> Self {
        let mut by_file: HashMap<String, Vec<Issue>> = HashMap::new();
        for issue in issues {
            by_file.entry(issue.file_path.clone()).or_default().push(issue);
        }
        Self { by_file }
    }

    pub fn is_empty(&self) -> bool {
        self.by_file.is_empty()
    }

    /// Findings on the lines of `item`. Issues without lines go with the first window.
    pub fn for_item(&self, item: &ChunkItem) -> Vec<&Issue> {
        let Some(issues) = self.by_file.get(&item.file_path) else {
            return Vec::new();
        };
        let window = LineRange::new(
            u32::try_from(item.start_line).unwrap_or(u32::MAX),
            u32::try_from(item.end_line).unwrap_or(u32::MAX),
        );
        issues
            .iter()
            .filter(|issue| match &issue.line_range {
                Some(range) => range.overlaps(&window),
                None => item.start_line == 1,
            })
            .take(MAX_PRIOR_FINDINGS)
            .collect()
    }
}

fn push_prior(prompt: &mut String, findings: &[&Issue]) {
    if findings.is_empty() {
        return;
    }
    prompt.push_str("Previous findings for this file (report them again only if they still apply):\n");
    for issue in findings {
        let lines = issue
            .line_range
            .map(|range| format!(" lines {range}:"))
            .unwrap_or_else(|| ":".to_string());
        prompt.push_str(&format!(
            "- [{} / {}]{lines} {}\n",
            issue.severity, issue.category, issue.description
        ));
    }
}

/// Analysis prompt for one chunk. Code lines carry their real file line numbers so that
/// reported lines can be matched back to the source.
///
/// Files that were analyzed before get a short list of their previous findings.
pub fn analysis_prompt(
    chunk: &AnalysisChunk,
    analysis_type: AnalysisType,
    min_issues: usize,
    prior: &PriorFindings,
) -> String {
    let mut prompt = String::new();
    prompt.push_str("You are an expert code reviewer. Review the code below and report concrete issues.\n\n");
    prompt.push_str(&format!("Analysis type: {analysis_type}\n"));
    prompt.push_str(focus(analysis_type));
    prompt.push('\n');

    prompt.push_str("Rules:\n");
    prompt.push_str("- Every issue names its file and line numbers exactly as shown in the listing.\n");
    prompt.push_str("- Every issue includes a specific, actionable suggested fix.\n");
    if min_issues > 0 {
        prompt.push_str(&format!(
            "- Report at least {min_issues} issues when the code has them. Do not invent problems.\n"
        ));
    }
    prompt.push_str("- Reply with JSON only, in this shape:\n");
    prompt.push_str(ISSUE_SCHEMA);
    prompt.push_str("\n- Reply {\"issues\": []} when nothing is wrong.\n\n");

    for item in &chunk.items {
        if item.is_whole_file() {
            prompt.push_str(&format!("### FILE: {}\n", item.file_path));
        } else {
            prompt.push_str(&format!(
                "### FILE: {} (lines {}-{} of {})\n",
                item.file_path, item.start_line, item.end_line, item.file_lines
            ));
        }
        push_prior(&mut prompt, &prior.for_item(item));
        prompt.push_str(&format!("```{}\n", fence_language(item)));
        push_numbered(&mut prompt, item);
        prompt.push_str("```\n\n");
    }

    prompt.push_str(&format!("Provide your {analysis_type} analysis as JSON:"));
    prompt
}

/// Fix prompt for a single issue against the current working content of its file.
pub fn fix_prompt(file_path: &str, content: &str, issue: &Issue) -> String {
    let language = match Language::from_path(file_path) {
        Language::Unknown => "",
        lang => lang.as_str(),
    };
    let lines = issue
        .line_range
        .map(|range| format!(" (lines {range})"))
        .unwrap_or_default();

    let mut prompt = String::new();
    prompt.push_str(&format!(
        "You are an expert developer fixing one issue in the file {file_path}.\n\n"
    ));
    prompt.push_str(&format!(
        "ISSUE{lines} [{} / {}]:\n{}\n\n",
        issue.severity, issue.category, issue.description
    ));
    if let Some(fix) = &issue.suggested_fix {
        prompt.push_str(&format!("SUGGESTED FIX:\n{fix}\n\n"));
    }
    prompt.push_str("Instructions:\n");
    prompt.push_str("1. Fix exactly this issue with the smallest change that works.\n");
    prompt.push_str("2. Keep all other behavior unchanged.\n");
    prompt.push_str("3. Return the ENTIRE fixed file in a single fenced code block, nothing else.\n\n");
    prompt.push_str(&format!("ORIGINAL CODE:\n```{language}\n{content}"));
    if !content.ends_with('\n') {
        prompt.push('\n');
    }
    prompt.push_str("```\n\nFIXED CODE:");
    prompt
}
