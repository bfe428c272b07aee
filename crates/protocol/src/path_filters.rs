use globset::{Glob, GlobSet, GlobSetBuilder};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid exclude pattern `{pattern}`: {message}")]
pub struct PatternError {
    pub pattern: String,
    pub message: String,
}

/// Compiled exclude list. Entries containing glob metacharacters are matched as globs
/// (`**/node_modules/**`); plain entries are directory/file prefixes (`vendor`, `src/gen`).
#[derive(Debug, Clone)]
pub struct PathFilter {
    prefixes: Vec<String>,
    globs: GlobSet,
    is_empty: bool,
}

impl Default for PathFilter {
    fn default() -> Self {
        Self {
            prefixes: Vec::new(),
            globs: GlobSet::empty(),
            is_empty: true,
        }
    }
}

impl PathFilter {
    pub fn new(patterns: &[String]) -> Result<Self, PatternError> {
        let mut prefixes = Vec::new();
        let mut builder = GlobSetBuilder::new();
        let mut glob_count = 0usize;

        for raw in patterns {
            let trimmed = raw.trim();
            if is_glob(trimmed) {
                let glob = Glob::new(&trimmed.replace('\\', "/")).map_err(|err| PatternError {
                    pattern: trimmed.to_string(),
                    message: err.to_string(),
                })?;
                builder.add(glob);
                glob_count += 1;
                continue;
            }

            let normalized = normalize_filter_path(trimmed);
            if !normalized.is_empty() {
                prefixes.push(normalized);
            }
        }

        let globs = builder.build().map_err(|err| PatternError {
            pattern: patterns.join(","),
            message: err.to_string(),
        })?;

        Ok(Self {
            is_empty: prefixes.is_empty() && glob_count == 0,
            prefixes,
            globs,
        })
    }

    pub fn is_active(&self) -> bool {
        !self.is_empty
    }

    /// `true` when `rel_path` is matched by any exclude entry.
    pub fn is_excluded(&self, rel_path: &str) -> bool {
        if self.is_empty {
            return false;
        }
        let rel_path = normalize_rel_path(rel_path);

        if self
            .prefixes
            .iter()
            .any(|prefix| path_prefix_matches_normalized(prefix, &rel_path))
        {
            return true;
        }

        // `**/dir/**` must also match entries directly under the root (`dir/x`).
        self.globs.is_match(&rel_path) || self.globs.is_match(format!("/{rel_path}"))
    }

    pub fn path_allowed(&self, rel_path: &str) -> bool {
        !self.is_excluded(rel_path)
    }
}

/// Forward slashes, no leading `./`.
pub fn normalize_rel_path(raw: &str) -> String {
    let mut value = raw.trim().replace('\\', "/");
    while let Some(stripped) = value.strip_prefix("./") {
        value = stripped.to_string();
    }
    value
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?') || pattern.contains('[')
}

fn normalize_filter_path(raw: &str) -> String {
    let value = normalize_rel_path(raw);
    let value = value.trim_matches('/');
    if value == "." {
        return String::new();
    }
    value.to_string()
}

fn path_prefix_matches_normalized(prefix: &str, path: &str) -> bool {
    if path == prefix {
        return true;
    }

    if !path.starts_with(prefix) {
        return false;
    }

    path.as_bytes().get(prefix.len()) == Some(&b'/')
}
