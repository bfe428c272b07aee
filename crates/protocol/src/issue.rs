use crate::path_filters::normalize_rel_path;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Closed issue taxonomy. `Unrecognized` is the explicit fallback for model labels that map
/// to nothing known.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum IssueCategory {
    ErrorHandling,
    TypeSafety,
    Performance,
    Security,
    Duplication,
    Testing,
    Other,
    Unrecognized,
}

impl IssueCategory {
    pub const ALL: [IssueCategory; 8] = [
        IssueCategory::ErrorHandling,
        IssueCategory::TypeSafety,
        IssueCategory::Performance,
        IssueCategory::Security,
        IssueCategory::Duplication,
        IssueCategory::Testing,
        IssueCategory::Other,
        IssueCategory::Unrecognized,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ErrorHandling => "error-handling",
            Self::TypeSafety => "type-safety",
            Self::Performance => "performance",
            Self::Security => "security",
            Self::Duplication => "duplication",
            Self::Testing => "testing",
            Self::Other => "other",
            Self::Unrecognized => "unrecognized",
        }
    }

    /// Map a free-form label emitted by a model onto the taxonomy.
    pub fn from_label(label: &str) -> Self {
        let lowered = label.trim().to_lowercase().replace(['_', ' '], "-");
        match lowered.as_str() {
            "error-handling" | "errors" | "error" | "exception" | "exceptions"
            | "exception-handling" | "robustness" => Self::ErrorHandling,
            "type-safety" | "types" | "type" | "typing" | "type-error" | "null-safety" => {
                Self::TypeSafety
            }
            "performance" | "perf" | "efficiency" | "optimization" | "complexity" => {
                Self::Performance
            }
            "security" | "vulnerability" | "injection" | "secrets" | "credentials" => {
                Self::Security
            }
            "duplication" | "duplicate" | "duplicated-code" | "dry" | "code-duplication" => {
                Self::Duplication
            }
            "testing" | "tests" | "test" | "test-coverage" | "coverage" | "testability" => {
                Self::Testing
            }
            "other" | "general" | "misc" | "miscellaneous" | "style" | "maintainability"
            | "readability" | "bug" | "logic" | "growth" => Self::Other,
            _ => Self::Unrecognized,
        }
    }

    /// Keyword search used by the tolerant parser when no explicit category marker exists.
    pub fn detect_in_text(text: &str) -> Option<Self> {
        let lowered = text.to_lowercase();
        const KEYWORDS: &[(&str, IssueCategory)] = &[
            ("sql injection", IssueCategory::Security),
            ("injection", IssueCategory::Security),
            ("credential", IssueCategory::Security),
            ("password", IssueCategory::Security),
            ("secret", IssueCategory::Security),
            ("api key", IssueCategory::Security),
            ("xss", IssueCategory::Security),
            ("security", IssueCategory::Security),
            ("exception", IssueCategory::ErrorHandling),
            ("error handling", IssueCategory::ErrorHandling),
            ("unhandled", IssueCategory::ErrorHandling),
            ("try/catch", IssueCategory::ErrorHandling),
            ("type check", IssueCategory::TypeSafety),
            ("type safety", IssueCategory::TypeSafety),
            ("null", IssueCategory::TypeSafety),
            ("undefined", IssueCategory::TypeSafety),
            ("performance", IssueCategory::Performance),
            ("inefficient", IssueCategory::Performance),
            ("o(n", IssueCategory::Performance),
            ("duplicat", IssueCategory::Duplication),
            ("repeated code", IssueCategory::Duplication),
            ("test", IssueCategory::Testing),
        ];
        KEYWORDS
            .iter()
            .find(|(needle, _)| lowered.contains(needle))
            .map(|(_, category)| *category)
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered so that `Critical > High > Medium > Low`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "critical" | "blocker" | "severe" | "urgent" => Some(Self::Critical),
            "high" | "major" | "important" | "error" => Some(Self::High),
            "medium" | "moderate" | "normal" | "warning" => Some(Self::Medium),
            "low" | "minor" | "info" | "trivial" | "suggestion" | "note" => Some(Self::Low),
            _ => None,
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Analysis pass that produced an issue. Passes other than `Standard` only run on
/// chunks with enough lines to be worth the extra request.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisType {
    Standard,
    Security,
    Performance,
    Growth,
}

impl Default for AnalysisType {
    fn default() -> Self {
        Self::Standard
    }
}

impl AnalysisType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Security => "security",
            Self::Performance => "performance",
            Self::Growth => "growth",
        }
    }

    pub const fn min_lines(self) -> usize {
        match self {
            Self::Standard => 0,
            Self::Security => 20,
            Self::Performance | Self::Growth => 50,
        }
    }

    /// Category assumed when a reply for this pass does not label its issues.
    pub const fn default_category(self) -> IssueCategory {
        match self {
            Self::Standard | Self::Growth => IssueCategory::Other,
            Self::Security => IssueCategory::Security,
            Self::Performance => IssueCategory::Performance,
        }
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AnalysisType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "security" => Ok(Self::Security),
            "performance" => Ok(Self::Performance),
            "growth" => Ok(Self::Growth),
            other => Err(format!("unknown analysis type `{other}`")),
        }
    }
}

/// Inclusive 1-indexed line span.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    #[must_use]
    pub fn new(start: u32, end: u32) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    #[must_use]
    pub const fn single(line: u32) -> Self {
        Self {
            start: line,
            end: line,
        }
    }

    #[must_use]
    pub const fn overlaps(&self, other: &LineRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    #[must_use]
    pub fn union(&self, other: &LineRange) -> LineRange {
        LineRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    #[must_use]
    pub const fn contains(&self, line: u32) -> bool {
        line >= self.start && line <= self.end
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Issue {
    pub id: String,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_range: Option<LineRange>,
    pub category: IssueCategory,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
    #[serde(default = "default_occurrences")]
    pub occurrences: u32,
    #[serde(default)]
    pub analysis_type: AnalysisType,
}

const fn default_occurrences() -> u32 {
    1
}

impl Issue {
    #[must_use]
    pub fn new(
        file_path: impl Into<String>,
        line_range: Option<LineRange>,
        category: IssueCategory,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        let file_path = normalize_rel_path(&file_path.into());
        let description = description.into().trim().to_string();
        let id = issue_id(&file_path, line_range.map(|r| r.start), &description);
        Self {
            id,
            file_path,
            line_range,
            category,
            severity,
            description,
            suggested_fix: None,
            occurrences: 1,
            analysis_type: AnalysisType::Standard,
        }
    }

    #[must_use]
    pub fn with_suggested_fix(mut self, fix: impl Into<String>) -> Self {
        let fix = fix.into();
        let trimmed = fix.trim();
        self.suggested_fix = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    #[must_use]
    pub const fn with_analysis_type(mut self, analysis_type: AnalysisType) -> Self {
        self.analysis_type = analysis_type;
        self
    }

    pub fn start_line(&self) -> Option<u32> {
        self.line_range.map(|r| r.start)
    }

    pub fn normalized_description(&self) -> String {
        normalize_description(&self.description)
    }
}

/// Lowercase, whitespace collapsed, trailing punctuation dropped.
pub fn normalize_description(raw: &str) -> String {
    let collapsed = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(|c: char| matches!(c, '.' | ':' | ';' | ',' | '!'))
        .to_string()
}

/// Stable issue identifier: sha256 over the normalized path, start line and description.
pub fn issue_id(file_path: &str, line_start: Option<u32>, description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_rel_path(file_path).as_bytes());
    hasher.update([0]);
    hasher.update(line_start.unwrap_or(0).to_string().as_bytes());
    hasher.update([0]);
    hasher.update(normalize_description(description).as_bytes());
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}
