use serde::{Deserialize, Serialize};

/// A contiguous line window of one file inside an analysis chunk
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkItem {
    /// Project-relative file path
    pub file_path: String,

    /// Detected language name, if known
    pub language: Option<String>,

    /// Start line (1-indexed)
    pub start_line: usize,

    /// End line (1-indexed, inclusive)
    pub end_line: usize,

    /// Leading lines repeated from the previous window of the same file
    pub context_lines: usize,

    /// Total number of lines in the file this window was cut from
    pub file_lines: usize,

    /// A single line that alone exceeds the unit budget
    pub oversized: bool,

    /// Exact file text for `start_line..=end_line`
    pub content: String,
}

impl ChunkItem {
    /// Get the number of lines in this item
    #[must_use]
    pub const fn line_count(&self) -> usize {
        self.end_line.saturating_sub(self.start_line) + 1
    }

    /// Whether the item covers its whole file
    #[must_use]
    pub const fn is_whole_file(&self) -> bool {
        self.start_line == 1 && self.end_line >= self.file_lines
    }

    /// Check if item contains a specific line
    #[must_use]
    pub const fn contains_line(&self, line: usize) -> bool {
        line >= self.start_line && line <= self.end_line
    }

    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }
}

/// One request-sized unit of work sent to the inference service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisChunk {
    /// Position in the plan (0-based)
    pub index: usize,

    pub items: Vec<ChunkItem>,
}

impl AnalysisChunk {
    pub fn line_count(&self) -> usize {
        self.items.iter().map(ChunkItem::line_count).sum()
    }

    pub fn char_count(&self) -> usize {
        self.items.iter().map(ChunkItem::char_count).sum()
    }

    pub fn estimated_tokens(&self) -> usize {
        self.items
            .iter()
            .map(|item| estimate_tokens(&item.content))
            .sum()
    }

    pub fn file_paths(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.file_path.as_str())
    }

    /// Item of `file_path` containing `line`, falling back to any item of that file.
    pub fn item_for(&self, file_path: &str, line: Option<usize>) -> Option<&ChunkItem> {
        let mut candidates = self.items.iter().filter(|i| i.file_path == file_path);
        match line {
            Some(line) => {
                let all: Vec<&ChunkItem> = candidates.collect();
                all.iter()
                    .find(|i| i.contains_line(line))
                    .or_else(|| all.first())
                    .copied()
            }
            None => candidates.next(),
        }
    }
}

/// Rough token estimate (~4 characters per token).
pub fn estimate_tokens(content: &str) -> usize {
    let chars = content.chars().count();
    chars.div_ceil(4)
}
