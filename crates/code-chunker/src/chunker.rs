use crate::config::ChunkerConfig;
use crate::error::Result;
use crate::language::language_for_path;
use crate::types::{AnalysisChunk, ChunkItem};
use codemend_protocol::{PathFilter, SourceFile};
use std::collections::VecDeque;

/// Splits project files into analysis units bounded by a character budget
pub struct Chunker {
    config: ChunkerConfig,
    filter: PathFilter,
}

impl Chunker {
    /// Create a new chunker; the configuration is validated up front
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        let filter = PathFilter::new(&config.exclude)?;
        Ok(Self { config, filter })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Lazy plan over `files`. Nothing is computed until the plan is iterated.
    pub fn plan<'a>(&'a self, files: &'a [SourceFile]) -> ChunkPlan<'a> {
        ChunkPlan {
            chunker: self,
            files,
        }
    }

    /// Cut one file into line windows, each within the budget unless a single line exceeds it.
    pub fn segment_file(&self, file: &SourceFile) -> Vec<ChunkItem> {
        let budget = self.config.max_unit_chars;
        let language = language_for_path(&file.rel_path).map(str::to_string);
        let lines: Vec<&str> = file.content.split_inclusive('\n').collect();
        let n = lines.len();
        if n == 0 {
            return Vec::new();
        }

        let mut prefix = Vec::with_capacity(n + 1);
        prefix.push(0usize);
        for line in &lines {
            let last = prefix[prefix.len() - 1];
            prefix.push(last + line.chars().count());
        }
        let chars = |from: usize, to: usize| prefix[to] - prefix[from];

        let item = |start: usize, end: usize, context_lines: usize, oversized: bool| ChunkItem {
            file_path: file.rel_path.clone(),
            language: language.clone(),
            start_line: start + 1,
            end_line: end,
            context_lines,
            file_lines: n,
            oversized,
            content: lines[start..end].concat(),
        };

        if chars(0, n) <= budget {
            return vec![item(0, n, 0, false)];
        }

        let overlap = self.config.overlap_lines;
        let mut items = Vec::new();
        let mut start = 0usize;
        let mut prev_end = 0usize;

        while start < n {
            let mut end = start;
            while end < n && chars(start, end + 1) <= budget {
                end += 1;
            }
            let oversized = end == start;
            if oversized {
                end = start + 1;
            }

            items.push(item(start, end, prev_end.saturating_sub(start), oversized));
            if end >= n {
                break;
            }
            prev_end = end;

            // Back off by the overlap, but keep the next window able to reach line `end`.
            let mut next = end.saturating_sub(overlap).max(start + 1);
            while next < end && chars(next, end + 1) > budget {
                next += 1;
            }
            start = next;
        }

        items
    }
}

/// Restartable chunk plan: every call to [`ChunkPlan::iter`] starts over from the file list.
pub struct ChunkPlan<'a> {
    chunker: &'a Chunker,
    files: &'a [SourceFile],
}

impl<'a> ChunkPlan<'a> {
    pub fn iter(&self) -> ChunkIter<'a> {
        ChunkIter {
            chunker: self.chunker,
            files: self.files.iter(),
            pending: VecDeque::new(),
            next_index: 0,
        }
    }

    pub fn files(&self) -> &'a [SourceFile] {
        self.files
    }
}

impl<'a> IntoIterator for &ChunkPlan<'a> {
    type Item = AnalysisChunk;
    type IntoIter = ChunkIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct ChunkIter<'a> {
    chunker: &'a Chunker,
    files: std::slice::Iter<'a, SourceFile>,
    pending: VecDeque<ChunkItem>,
    next_index: usize,
}

impl ChunkIter<'_> {
    fn refill(&mut self) -> bool {
        for file in self.files.by_ref() {
            if self.chunker.filter.is_excluded(&file.rel_path) {
                log::debug!("Chunker skipping excluded {}", file.rel_path);
                continue;
            }
            if file.content.trim().is_empty() {
                log::debug!("Chunker skipping empty {}", file.rel_path);
                continue;
            }
            self.pending.extend(self.chunker.segment_file(file));
            if !self.pending.is_empty() {
                return true;
            }
        }
        false
    }
}

impl Iterator for ChunkIter<'_> {
    type Item = AnalysisChunk;

    fn next(&mut self) -> Option<Self::Item> {
        let budget = self.chunker.config.max_unit_chars;
        let mut items: Vec<ChunkItem> = Vec::new();
        let mut used = 0usize;

        loop {
            if self.pending.is_empty() && !self.refill() {
                break;
            }
            let Some(front) = self.pending.front() else {
                break;
            };
            let size = front.char_count();
            if !items.is_empty() && used + size > budget {
                break;
            }
            used += size;
            if let Some(item) = self.pending.pop_front() {
                items.push(item);
            }
        }

        if items.is_empty() {
            return None;
        }
        let chunk = AnalysisChunk {
            index: self.next_index,
            items,
        };
        self.next_index += 1;
        Some(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chunker(max_unit_chars: usize, overlap_lines: usize) -> Chunker {
        Chunker::new(ChunkerConfig {
            max_unit_chars,
            overlap_lines,
            exclude: Vec::new(),
        })
        .unwrap()
    }

    fn numbered_file(path: &str, lines: usize) -> SourceFile {
        let content: String = (0..lines).map(|i| format!("line {i:02}\n")).collect();
        SourceFile::new(path, content)
    }

    #[test]
    fn small_files_are_packed_together() {
        let files = vec![
            SourceFile::new("a.py", "x = 1\n"),
            SourceFile::new("b.py", "y = 2\n"),
            SourceFile::new("c.py", "z = 3\n"),
        ];
        let c = chunker(1_000, 5);
        let chunks: Vec<_> = c.plan(&files).iter().collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].file_paths().collect::<Vec<_>>(), vec!["a.py", "b.py", "c.py"]);
    }

    #[test]
    fn packing_respects_budget() {
        let files = vec![
            SourceFile::new("a.py", "a".repeat(60)),
            SourceFile::new("b.py", "b".repeat(60)),
        ];
        let c = chunker(100, 0);
        let chunks: Vec<_> = c.plan(&files).iter().collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].index, 1);
    }

    #[test]
    fn large_file_is_split_on_line_boundaries_with_overlap() {
        let file = numbered_file("big.rs", 100);
        let c = chunker(200, 5);
        let items = c.segment_file(&file);

        assert_eq!(items[0].start_line, 1);
        assert_eq!(items[0].end_line, 25);
        assert_eq!(items[1].start_line, 21);
        assert_eq!(items[1].context_lines, 5);
        for item in &items {
            assert!(item.char_count() <= 200);
            assert!(item.content.ends_with('\n'));
            assert!(!item.oversized);
        }
        for pair in items.windows(2) {
            assert!(pair[1].start_line > pair[0].start_line);
            assert!(pair[1].start_line <= pair[0].end_line + 1);
        }
        assert_eq!(items.last().map(|i| i.end_line), Some(100));
    }

    #[test]
    fn over_long_line_becomes_its_own_unit() {
        let content = format!("short\n{}\nshort again\n", "x".repeat(120));
        let file = SourceFile::new("min.js", content);
        let c = chunker(50, 2);
        let items = c.segment_file(&file);

        let oversized: Vec<_> = items.iter().filter(|i| i.oversized).collect();
        assert_eq!(oversized.len(), 1);
        assert_eq!(oversized[0].start_line, 2);
        assert_eq!(oversized[0].line_count(), 1);
        assert_eq!(items.last().map(|i| i.end_line), Some(3));
    }

    #[test]
    fn plan_is_restartable() {
        let files = vec![numbered_file("a.rs", 40), numbered_file("b.rs", 3)];
        let c = chunker(120, 3);
        let plan = c.plan(&files);
        let first: Vec<_> = plan.iter().collect();
        let second: Vec<_> = plan.iter().collect();
        assert_eq!(first, second);
        assert!(first.len() > 1);
    }

    #[test]
    fn exclude_patterns_apply_during_iteration() {
        let files = vec![
            SourceFile::new("src/app.py", "x = 1\n"),
            SourceFile::new("src/gen/out.py", "y = 2\n"),
        ];
        let c = Chunker::new(ChunkerConfig {
            exclude: vec!["src/gen".to_string()],
            ..ChunkerConfig::default()
        })
        .unwrap();
        let chunks: Vec<_> = c.plan(&files).iter().collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].file_paths().collect::<Vec<_>>(), vec!["src/app.py"]);
    }

    #[test]
    fn zero_budget_is_rejected() {
        let err = Chunker::new(ChunkerConfig {
            max_unit_chars: 0,
            ..ChunkerConfig::default()
        });
        assert!(err.is_err());
    }
}
