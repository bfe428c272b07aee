//! Turns untrusted completion text into issues.
//!
//! Replies are tried as JSON first (whole text, fenced ```json block, any fenced block, first
//! embedded JSON value). When no issue-shaped JSON is found the reply is read line by line,
//! segmented at issue headings, numbered items or bullets.

use codemend_chunker::AnalysisChunk;
use codemend_protocol::{normalize_rel_path, AnalysisType, Issue, IssueCategory, LineRange, Severity};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// Descriptions shorter than this are noise, not findings.
pub const MIN_DESCRIPTION_CHARS: usize = 10;
const EXCERPT_CHARS: usize = 300;

static HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:#{1,6}\s*)?(?:\*\*)?\s*(?:issue|problem|bug|error|warning|finding)\b(?:\s*#?\s*\d+)?\s*(?:\((?P<paren>[^)]*)\))?\s*(?:\*\*)?\s*(?:[:\-–]\s*(?:\*\*)?\s*(?P<rest>.*))?$",
    )
    .expect("valid header pattern")
});
static LINE_LEAD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:[-*•]\s*)?(?:\*\*)?lines?\s+(?P<start>\d+)(?:\s*(?:-|–|to)\s*(?P<end>\d+))?(?:\*\*)?\s*:\s*(?P<rest>.+)$")
        .expect("valid line-lead pattern")
});
static NUMBERED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:#{1,6}\s*)?(?:\*\*)?\d+[.)]\s+(?P<rest>.+)$").expect("valid numbered pattern")
});
static BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[-*•]\s+(?P<rest>.+)$").expect("valid bullet pattern"));
static FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^\s*(?:[-*•]\s*)?(?:#{1,6}\s*)?(?:\*\*)?\s*(?P<key>severity|priority|category|type|file|lines?|location|description|recommended fix|recommendation|suggested fix|suggestion|solution|fix)\s*(?:\*\*)?\s*[:=]\s*(?:\*\*)?\s*(?P<value>.*)$",
    )
    .expect("valid field pattern")
});
static LINE_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\blines?\s*:?\s*#?(?P<start>\d+)(?:\s*(?:-|–|to)\s*(?P<end>\d+))?")
        .expect("valid line reference pattern")
});
static LINE_SPEC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?P<start>\d+)(?:\s*(?:-|–|to|\.\.)\s*(?P<end>\d+))?").expect("valid line spec pattern")
});
static SEVERITY_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:\[\s*(?P<a>critical|high|medium|low)\s*\]|\(\s*(?P<b>critical|high|medium|low)\s*\)|\b(?P<c>critical|high|medium|low)[- ]severity\b)",
    )
    .expect("valid severity tag pattern")
});
static NO_ISSUES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bno\s+(?:significant\s+|major\s+|obvious\s+|notable\s+)?(?:issues|problems|bugs|findings)\b")
        .expect("valid no-issues pattern")
});

/// What the reply is expected to describe: the chunk that was sent and the analysis pass.
#[derive(Debug, Clone, Copy)]
pub struct ExpectedSchema<'a> {
    pub chunk: &'a AnalysisChunk,
    pub analysis_type: AnalysisType,
}

impl<'a> ExpectedSchema<'a> {
    pub const fn new(chunk: &'a AnalysisChunk, analysis_type: AnalysisType) -> Self {
        Self {
            chunk,
            analysis_type,
        }
    }

    /// Reported file matched against the chunk, then the item holding `line`, then the first item.
    fn resolve_file(&self, reported: Option<&str>, line: Option<u32>) -> String {
        if let Some(reported) = reported {
            let reported = normalize_rel_path(reported.trim().trim_matches('`'));
            let mut paths = self.chunk.file_paths();
            if let Some(found) = paths.find(|p| *p == reported) {
                return found.to_string();
            }
            if let Some(found) = self
                .chunk
                .file_paths()
                .find(|p| p.ends_with(reported.as_str()) || reported.ends_with(p))
            {
                return found.to_string();
            }
        }
        if let Some(line) = line {
            if let Some(item) = self
                .chunk
                .items
                .iter()
                .find(|item| item.contains_line(line as usize))
            {
                return item.file_path.clone();
            }
        }
        self.chunk
            .items
            .first()
            .map(|item| item.file_path.clone())
            .or_else(|| reported.map(normalize_rel_path))
            .unwrap_or_default()
    }

    fn mentioned_file(&self, text: &str) -> Option<&'a str> {
        self.chunk.file_paths().find(|path| text.contains(path))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    Structured,
    LineOriented,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure {
    pub reason: String,
    pub raw_excerpt: String,
}

#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub issues: Vec<Issue>,
    pub strategy: ParseStrategy,
    pub failure: Option<ParseFailure>,
}

impl ParseOutcome {
    fn empty(failure: Option<ParseFailure>) -> Self {
        Self {
            issues: Vec::new(),
            strategy: ParseStrategy::Empty,
            failure,
        }
    }
}

/// Extract issues from a raw completion. Never fails: an unusable reply yields an empty outcome
/// carrying a [`ParseFailure`].
pub fn parse(raw: &str, expected: &ExpectedSchema<'_>) -> ParseOutcome {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return ParseOutcome::empty(Some(ParseFailure {
            reason: "empty response".to_string(),
            raw_excerpt: String::new(),
        }));
    }

    if let Some(items) = structured_items(trimmed) {
        let issues = items
            .iter()
            .filter_map(|item| issue_from_json(item, expected))
            .collect();
        return ParseOutcome {
            issues,
            strategy: ParseStrategy::Structured,
            failure: None,
        };
    }

    let issues: Vec<Issue> = segments(trimmed)
        .iter()
        .filter_map(|segment| issue_from_segment(segment, expected))
        .collect();
    if !issues.is_empty() {
        return ParseOutcome {
            issues,
            strategy: ParseStrategy::LineOriented,
            failure: None,
        };
    }

    if NO_ISSUES.is_match(trimmed) {
        return ParseOutcome::empty(None);
    }
    log::debug!("No issues could be extracted from a {}-byte reply", raw.len());
    ParseOutcome::empty(Some(ParseFailure {
        reason: "no issue-shaped JSON and no recognizable issue markers".to_string(),
        raw_excerpt: excerpt(trimmed),
    }))
}

fn excerpt(text: &str) -> String {
    let mut out: String = text.chars().take(EXCERPT_CHARS).collect();
    if text.chars().count() > EXCERPT_CHARS {
        out.push('…');
    }
    out
}

// ---------------------------------------------------------------------------
// Structured tier
// ---------------------------------------------------------------------------

fn structured_items(content: &str) -> Option<Vec<Value>> {
    let candidates = [
        Some(content.to_string()),
        extract_fenced_block(content, Some("json")),
        extract_fenced_block(content, None),
    ];
    for candidate in candidates.into_iter().flatten() {
        if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
            if let Some(items) = issue_items(value) {
                return Some(items);
            }
        }
    }
    first_issue_value(content)
}

/// First embedded JSON value with an issue shape. Uses `serde_json`'s streaming deserializer to
/// find where a valid prefix ends.
fn first_issue_value(content: &str) -> Option<Vec<Value>> {
    let mut skip_until = 0usize;
    for (idx, ch) in content.char_indices() {
        if idx < skip_until || (ch != '{' && ch != '[') {
            continue;
        }
        let candidate = &content[idx..];
        let mut stream = serde_json::Deserializer::from_str(candidate).into_iter::<Value>();
        if let Some(Ok(value)) = stream.next() {
            let end = stream.byte_offset();
            if let Some(items) = issue_items(value) {
                return Some(items);
            }
            skip_until = idx + end;
        }
    }
    None
}

fn extract_fenced_block(content: &str, language: Option<&str>) -> Option<String> {
    let fence = "```";
    let mut search = content;
    loop {
        let start = search.find(fence)?;
        let after_start = &search[start + fence.len()..];
        let line_end = after_start.find('\n')?;
        let tag = after_start[..line_end].trim();
        let rest = &after_start[line_end + 1..];
        let end = rest.find(fence)?;
        let wanted = match language {
            Some(expected) => tag.eq_ignore_ascii_case(expected),
            None => true,
        };
        if wanted {
            return Some(rest[..end].trim().to_string());
        }
        search = &rest[end + fence.len()..];
    }
}

fn issue_items(value: Value) -> Option<Vec<Value>> {
    match value {
        Value::Object(mut obj) => {
            for key in ["issues", "findings", "problems"] {
                if let Some(Value::Array(items)) = obj.remove(key) {
                    return Some(items);
                }
            }
            if obj.contains_key("description") || obj.contains_key("issue") {
                return Some(vec![Value::Object(obj)]);
            }
            None
        }
        Value::Array(items) if items.iter().all(Value::is_object) => Some(items),
        _ => None,
    }
}

fn text_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match obj.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

fn line_number(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().filter(|n| *n > 0).and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok().filter(|n| *n > 0),
        _ => None,
    }
}

fn range_from_value(value: &Value) -> Option<LineRange> {
    match value {
        Value::Number(_) => line_number(value).map(LineRange::single),
        Value::String(s) => parse_line_spec(s),
        Value::Array(items) => {
            let start = items.first().and_then(line_number)?;
            let end = items.get(1).and_then(line_number).unwrap_or(start);
            Some(LineRange::new(start, end))
        }
        Value::Object(obj) => {
            let start = obj.get("start").and_then(line_number)?;
            let end = obj.get("end").and_then(line_number).unwrap_or(start);
            Some(LineRange::new(start, end))
        }
        _ => None,
    }
}

fn json_line_range(obj: &Map<String, Value>) -> Option<LineRange> {
    let start = [
        "line_start",
        "start_line",
        "line",
        "lines",
        "line_number",
        "line_range",
    ]
    .iter()
    .find_map(|key| obj.get(*key).and_then(range_from_value));
    let end = ["line_end", "end_line"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(line_number));
    match (start, end) {
        (Some(range), Some(end)) if end >= range.start => Some(LineRange::new(range.start, end)),
        (Some(range), _) => Some(range),
        (None, Some(end)) => Some(LineRange::single(end)),
        (None, None) => None,
    }
}

fn parse_line_spec(text: &str) -> Option<LineRange> {
    let caps = LINE_SPEC.captures(text)?;
    let start = caps.name("start")?.as_str().parse::<u32>().ok().filter(|n| *n > 0)?;
    let end = caps
        .name("end")
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(start);
    Some(LineRange::new(start, end))
}

fn issue_from_json(item: &Value, expected: &ExpectedSchema<'_>) -> Option<Issue> {
    let obj = item.as_object()?;
    let description = text_field(
        obj,
        &["description", "issue", "message", "problem", "title", "summary"],
    )?;
    if description.chars().count() < MIN_DESCRIPTION_CHARS {
        return None;
    }
    let line_range = json_line_range(obj);
    let file = text_field(obj, &["file", "file_path", "path", "filename"]);
    let category = match text_field(obj, &["category", "type", "kind"]) {
        Some(label) => IssueCategory::from_label(&label),
        None => IssueCategory::detect_in_text(&description)
            .unwrap_or_else(|| expected.analysis_type.default_category()),
    };
    let severity = text_field(obj, &["severity", "priority", "level"])
        .and_then(|label| Severity::from_label(&label))
        .unwrap_or_default();
    let fix = text_field(
        obj,
        &[
            "suggested_fix",
            "fix",
            "recommendation",
            "suggestion",
            "solution",
            "remediation",
        ],
    );

    let file_path = expected.resolve_file(file.as_deref(), line_range.map(|r| r.start));
    let mut issue = Issue::new(file_path, line_range, category, severity, description)
        .with_analysis_type(expected.analysis_type);
    if let Some(fix) = fix {
        issue = issue.with_suggested_fix(fix);
    }
    Some(issue)
}

// ---------------------------------------------------------------------------
// Line-oriented tier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentMode {
    Header,
    LineLead,
    Numbered,
    Bullet,
}

const MODES: [SegmentMode; 4] = [
    SegmentMode::Header,
    SegmentMode::LineLead,
    SegmentMode::Numbered,
    SegmentMode::Bullet,
];

#[derive(Debug)]
struct Segment<'t> {
    line_hint: Option<LineRange>,
    headline: String,
    body: Vec<&'t str>,
}

fn segment_start(line: &str, mode: SegmentMode) -> Option<(Option<LineRange>, String)> {
    if FIELD.is_match(line) {
        return None;
    }
    match mode {
        SegmentMode::Header => HEADER.captures(line).map(|caps| {
            let hint = caps.name("paren").and_then(|m| line_ref(m.as_str()));
            let rest = caps.name("rest").map(|m| m.as_str()).unwrap_or_default();
            (hint, rest.to_string())
        }),
        SegmentMode::LineLead => LINE_LEAD.captures(line).and_then(|caps| {
            let start = caps.name("start")?.as_str().parse::<u32>().ok()?;
            let end = caps
                .name("end")
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(start);
            let rest = caps.name("rest").map(|m| m.as_str()).unwrap_or_default();
            Some((Some(LineRange::new(start, end)), rest.to_string()))
        }),
        SegmentMode::Numbered => NUMBERED
            .captures(line)
            .map(|caps| (None, caps["rest"].to_string())),
        SegmentMode::Bullet => BULLET
            .captures(line)
            .map(|caps| (None, caps["rest"].to_string())),
    }
}

fn fence_flags(lines: &[&str]) -> Vec<bool> {
    let mut inside = false;
    lines
        .iter()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                inside = !inside;
                true
            } else {
                inside
            }
        })
        .collect()
}

fn segments(text: &str) -> Vec<Segment<'_>> {
    let lines: Vec<&str> = text.lines().collect();
    let fenced = fence_flags(&lines);

    for mode in MODES {
        let starts: Vec<(usize, Option<LineRange>, String)> = lines
            .iter()
            .enumerate()
            .filter(|(idx, _)| !fenced[*idx])
            .filter_map(|(idx, line)| {
                segment_start(line, mode).map(|(hint, headline)| (idx, hint, headline))
            })
            .collect();
        if starts.is_empty() {
            continue;
        }

        let mut out = Vec::with_capacity(starts.len());
        for (n, (idx, hint, headline)) in starts.iter().enumerate() {
            let body_end = starts.get(n + 1).map_or(lines.len(), |next| next.0);
            out.push(Segment {
                line_hint: *hint,
                headline: headline.clone(),
                body: lines[idx + 1..body_end].to_vec(),
            });
        }
        return out;
    }
    Vec::new()
}

fn line_ref(text: &str) -> Option<LineRange> {
    let caps = LINE_REF.captures(text)?;
    let start = caps.name("start")?.as_str().parse::<u32>().ok().filter(|n| *n > 0)?;
    let end = caps
        .name("end")
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .unwrap_or(start);
    Some(LineRange::new(start, end))
}

fn severity_tag(text: &str) -> Option<Severity> {
    let caps = SEVERITY_TAG.captures(text)?;
    let label = caps
        .name("a")
        .or_else(|| caps.name("b"))
        .or_else(|| caps.name("c"))?;
    Severity::from_label(label.as_str())
}

fn clean_inline(text: &str) -> String {
    let stripped = text.replace("**", "").replace("__", "");
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == ':' || c == '-' || c.is_whitespace())
        .to_string()
}

fn issue_from_segment(segment: &Segment<'_>, expected: &ExpectedSchema<'_>) -> Option<Issue> {
    let mut description_parts: Vec<String> = Vec::new();
    let mut fix_lines: Vec<&str> = Vec::new();
    let mut severity = None;
    let mut category = None;
    let mut file: Option<String> = None;
    let mut lines = segment.line_hint;
    let mut in_fix = false;

    let headline = clean_inline(&segment.headline);
    if !headline.is_empty() {
        description_parts.push(headline);
    }

    let fenced = fence_flags(&segment.body);
    for (line, in_fence) in segment.body.iter().zip(fenced) {
        if !in_fence {
            if let Some(caps) = FIELD.captures(line) {
                let key = caps["key"].to_lowercase();
                let value = clean_inline(&caps["value"]);
                in_fix = false;
                match key.as_str() {
                    "severity" | "priority" => {
                        severity = value
                            .split(|c: char| !c.is_alphanumeric())
                            .find(|word| !word.is_empty())
                            .and_then(Severity::from_label);
                    }
                    "category" | "type" => category = Some(IssueCategory::from_label(&value)),
                    "file" => file = Some(value.trim_matches('`').to_string()),
                    "line" | "lines" | "location" => {
                        if lines.is_none() {
                            lines = parse_line_spec(&value);
                        }
                        if file.is_none() {
                            file = expected.mentioned_file(&value).map(str::to_string);
                        }
                    }
                    "description" => {
                        if !value.is_empty() {
                            description_parts.push(value);
                        }
                    }
                    _ => {
                        in_fix = true;
                        if !value.is_empty() {
                            fix_lines.push(caps.name("value").map_or("", |m| m.as_str()));
                        }
                    }
                }
                continue;
            }
        }
        if in_fix {
            fix_lines.push(line);
        } else if !in_fence {
            let text = clean_inline(line);
            if !text.is_empty() {
                description_parts.push(text);
            }
        }
    }

    let description = description_parts.join(" ");
    if description.chars().count() < MIN_DESCRIPTION_CHARS {
        return None;
    }

    let context = format!("{} {}", segment.headline, description);
    let lines = lines.or_else(|| line_ref(&context));
    let severity = severity.or_else(|| severity_tag(&context)).unwrap_or_default();
    let category = category
        .or_else(|| IssueCategory::detect_in_text(&description))
        .unwrap_or_else(|| expected.analysis_type.default_category());
    let reported = file.or_else(|| expected.mentioned_file(&context).map(str::to_string));
    let file_path = expected.resolve_file(reported.as_deref(), lines.map(|r| r.start));

    let fix = fix_lines.join("\n");
    let mut issue = Issue::new(file_path, lines, category, severity, description)
        .with_analysis_type(expected.analysis_type);
    if !fix.trim().is_empty() {
        issue = issue.with_suggested_fix(fix);
    }
    Some(issue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemend_chunker::ChunkItem;
    use pretty_assertions::assert_eq;

    fn item(path: &str, start: usize, end: usize) -> ChunkItem {
        ChunkItem {
            file_path: path.to_string(),
            language: Some("python".to_string()),
            start_line: start,
            end_line: end,
            context_lines: 0,
            file_lines: end,
            oversized: false,
            content: "x\n".repeat(end - start + 1),
        }
    }

    fn chunk() -> AnalysisChunk {
        AnalysisChunk {
            index: 0,
            items: vec![item("src/app.py", 1, 40), item("src/db.py", 1, 80)],
        }
    }

    #[test]
    fn parses_plain_json() {
        let chunk = chunk();
        let expected = ExpectedSchema::new(&chunk, AnalysisType::Standard);
        let raw = r#"{"issues": [{"file": "src/db.py", "line": "25-28", "category": "security", "severity": "critical", "description": "SQL built by string concatenation", "suggested_fix": "Use bound parameters"}]}"#;

        let outcome = parse(raw, &expected);
        assert_eq!(outcome.strategy, ParseStrategy::Structured);
        assert!(outcome.failure.is_none());
        assert_eq!(outcome.issues.len(), 1);
        let issue = &outcome.issues[0];
        assert_eq!(issue.file_path, "src/db.py");
        assert_eq!(issue.line_range, Some(LineRange::new(25, 28)));
        assert_eq!(issue.category, IssueCategory::Security);
        assert_eq!(issue.severity, Severity::Critical);
        assert_eq!(issue.suggested_fix.as_deref(), Some("Use bound parameters"));
    }

    #[test]
    fn parses_fenced_json_inside_prose() {
        let chunk = chunk();
        let expected = ExpectedSchema::new(&chunk, AnalysisType::Security);
        let raw = "Sure! Here is what I found:\n```json\n[{\"line_start\": 3, \"line_end\": 4, \"description\": \"Hard-coded password in config\", \"severity\": \"high\"}]\n```\nHope this helps.";

        let outcome = parse(raw, &expected);
        assert_eq!(outcome.strategy, ParseStrategy::Structured);
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].file_path, "src/app.py");
        assert_eq!(outcome.issues[0].line_range, Some(LineRange::new(3, 4)));
        assert_eq!(outcome.issues[0].category, IssueCategory::Security);
        assert_eq!(outcome.issues[0].analysis_type, AnalysisType::Security);
    }

    #[test]
    fn finds_embedded_json_after_other_brackets() {
        let chunk = chunk();
        let expected = ExpectedSchema::new(&chunk, AnalysisType::Standard);
        let raw = "Checked [1, 2] first. {\"issues\": [{\"line\": 70, \"description\": \"Connection is never closed on error\"}]} done";

        let outcome = parse(raw, &expected);
        assert_eq!(outcome.issues.len(), 1);
        // line 70 only exists in db.py
        assert_eq!(outcome.issues[0].file_path, "src/db.py");
    }

    #[test]
    fn empty_issue_list_is_not_a_failure() {
        let chunk = chunk();
        let expected = ExpectedSchema::new(&chunk, AnalysisType::Standard);
        let outcome = parse("{\"issues\": []}", &expected);
        assert!(outcome.issues.is_empty());
        assert!(outcome.failure.is_none());

        let outcome = parse("I found no significant issues in this code.", &expected);
        assert!(outcome.issues.is_empty());
        assert!(outcome.failure.is_none());
    }

    #[test]
    fn markdown_issue_headings_with_recommendations() {
        let chunk = chunk();
        let expected = ExpectedSchema::new(&chunk, AnalysisType::Standard);
        let raw = "\
Here is my review.

### Issue #1 (Lines 25-28):
The error handling is insufficient. The except block silently ignores errors.

### Recommendation:
Log the exception and re-raise it.

### Issue #2 (Line 5):
Severity: low
Variable `tmp` is assigned but never used.
";
        let outcome = parse(raw, &expected);
        assert_eq!(outcome.strategy, ParseStrategy::LineOriented);
        assert_eq!(outcome.issues.len(), 2);

        let first = &outcome.issues[0];
        assert_eq!(first.line_range, Some(LineRange::new(25, 28)));
        assert_eq!(first.category, IssueCategory::ErrorHandling);
        assert_eq!(first.severity, Severity::Medium);
        assert_eq!(
            first.suggested_fix.as_deref(),
            Some("Log the exception and re-raise it.")
        );
        assert!(first.description.starts_with("The error handling is insufficient"));

        let second = &outcome.issues[1];
        assert_eq!(second.line_range, Some(LineRange::single(5)));
        assert_eq!(second.severity, Severity::Low);
        assert!(second.suggested_fix.is_none());
    }

    #[test]
    fn numbered_items_with_field_bullets() {
        let chunk = chunk();
        let expected = ExpectedSchema::new(&chunk, AnalysisType::Performance);
        let raw = "\
1. Query executed inside a loop in src/db.py, line 42
   - Severity: High
   - Fix: batch the ids into one query
2. List is sorted on every call (lines 10-12)
   - Category: performance
";
        let outcome = parse(raw, &expected);
        assert_eq!(outcome.issues.len(), 2);
        assert_eq!(outcome.issues[0].file_path, "src/db.py");
        assert_eq!(outcome.issues[0].line_range, Some(LineRange::single(42)));
        assert_eq!(outcome.issues[0].severity, Severity::High);
        assert_eq!(
            outcome.issues[0].suggested_fix.as_deref(),
            Some("batch the ids into one query")
        );
        assert_eq!(outcome.issues[1].line_range, Some(LineRange::new(10, 12)));
        assert_eq!(outcome.issues[1].category, IssueCategory::Performance);
    }

    #[test]
    fn fenced_code_in_a_reply_does_not_start_issues() {
        let chunk = chunk();
        let expected = ExpectedSchema::new(&chunk, AnalysisType::Standard);
        let raw = "\
- Division by zero is possible when `count` is 0 (line 7)
  Fix:
  ```python
  1. if count == 0:
  - return 0
  ```
";
        let outcome = parse(raw, &expected);
        assert_eq!(outcome.issues.len(), 1);
        let fix = outcome.issues[0].suggested_fix.clone().unwrap_or_default();
        assert!(fix.contains("if count == 0:"));
    }

    #[test]
    fn garbled_reply_reports_failure_with_excerpt() {
        let chunk = chunk();
        let expected = ExpectedSchema::new(&chunk, AnalysisType::Standard);
        let raw = "{\"issues\": [{\"descr ~~~ ### ??? \u{fffd}\u{fffd} ))) [[[";

        let outcome = parse(raw, &expected);
        assert!(outcome.issues.is_empty());
        assert_eq!(outcome.strategy, ParseStrategy::Empty);
        let failure = outcome.failure.expect("failure recorded");
        assert!(failure.raw_excerpt.starts_with("{\"issues\""));
    }

    #[test]
    fn short_descriptions_are_dropped() {
        let chunk = chunk();
        let expected = ExpectedSchema::new(&chunk, AnalysisType::Standard);
        let outcome = parse(
            r#"[{"description": "bad"}, {"description": "Mutable default argument in helper"}]"#,
            &expected,
        );
        assert_eq!(outcome.issues.len(), 1);
    }

    #[test]
    fn empty_reply_is_a_failure() {
        let chunk = chunk();
        let expected = ExpectedSchema::new(&chunk, AnalysisType::Standard);
        let outcome = parse("   \n", &expected);
        assert_eq!(
            outcome.failure.map(|f| f.reason),
            Some("empty response".to_string())
        );
    }
}
