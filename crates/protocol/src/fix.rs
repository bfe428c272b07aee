use serde::{Deserialize, Serialize};

/// Outcome of one fix attempt. Append-only: a later correction is a new entry.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct FixResult {
    pub issue_id: String,
    pub file_path: String,
    /// sha256 of the file content the fix was computed against.
    pub original_sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposed_content: Option<String>,
    pub applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at_unix_ms: u64,
}

impl FixResult {
    pub fn applied(
        issue_id: impl Into<String>,
        file_path: impl Into<String>,
        original_sha256: impl Into<String>,
        output_path: impl Into<String>,
        proposed_content: String,
    ) -> Self {
        Self {
            issue_id: issue_id.into(),
            file_path: file_path.into(),
            original_sha256: original_sha256.into(),
            output_path: Some(output_path.into()),
            proposed_content: Some(proposed_content),
            applied: true,
            error: None,
            created_at_unix_ms: crate::unix_now_ms(),
        }
    }

    pub fn rejected(
        issue_id: impl Into<String>,
        file_path: impl Into<String>,
        original_sha256: impl Into<String>,
        proposed_content: Option<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            issue_id: issue_id.into(),
            file_path: file_path.into(),
            original_sha256: original_sha256.into(),
            output_path: None,
            proposed_content,
            applied: false,
            error: Some(error.into()),
            created_at_unix_ms: crate::unix_now_ms(),
        }
    }
}
