use crate::Result;
use codemend_protocol::{normalize_rel_path, PathFilter};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_FILE_BYTES: u64 = 1_048_576; // 1 MB

pub const DEFAULT_EXTENSIONS: &[&str] = &[
    "py", "js", "jsx", "ts", "tsx", "html", "css", "java", "c", "h", "cpp", "hpp", "cs", "go",
    "rb", "php", "swift", "rs", "kt", "sh", "bash", "json", "yaml", "yml", "toml", "xml", "md",
];

pub const DEFAULT_EXCLUDE: &[&str] = &[
    "**/node_modules/**",
    "**/.git/**",
    "**/venv/**",
    "**/__pycache__/**",
    "**/.DS_Store",
    "**/dist/**",
    "**/build/**",
    "**/*.min.js",
    "**/*.min.css",
];

/// What the scanner considers part of a project.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Lowercase extensions without the dot. Empty means every file.
    pub extensions: Vec<String>,
    pub exclude: Vec<String>,
    pub max_file_bytes: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            exclude: DEFAULT_EXCLUDE.iter().map(|e| e.to_string()).collect(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

/// Scanner for finding analyzable files in a project
pub struct FileScanner {
    root: PathBuf,
    extensions: Vec<String>,
    filter: PathFilter,
    max_file_bytes: u64,
}

impl FileScanner {
    pub fn new(root: impl AsRef<Path>, options: &ScanOptions) -> Result<Self> {
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            extensions: options
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            filter: PathFilter::new(&options.exclude)?,
            max_file_bytes: options.max_file_bytes,
        })
    }

    /// Scan directory for analyzable files (.gitignore aware), sorted by path.
    pub fn scan(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();

        let root = self.root.clone();
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true);
        builder.filter_entry(move |entry| !FileScanner::is_ignored_scope(entry.path(), &root));

        for result in builder.build() {
            match result {
                Ok(entry) => {
                    let Some(file_type) = entry.file_type() else {
                        continue;
                    };
                    if !file_type.is_file() {
                        continue;
                    }

                    let path = entry.path();
                    if let Ok(meta) = entry.metadata() {
                        if meta.len() > self.max_file_bytes {
                            log::debug!(
                                "Skipping large file {} ({} bytes > {})",
                                path.display(),
                                meta.len(),
                                self.max_file_bytes
                            );
                            continue;
                        }
                    }

                    if !self.is_analyzable(path) {
                        continue;
                    }

                    let rel = self.relative(path);
                    if self.filter.is_excluded(&rel) {
                        log::debug!("Skipping excluded file {rel}");
                        continue;
                    }

                    files.push(path.to_path_buf());
                }
                Err(e) => log::warn!("Failed to read entry: {e}"),
            }
        }

        files.sort();
        log::info!("Found {} source files", files.len());
        files
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Project-relative path with forward slashes.
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        normalize_rel_path(&rel.to_string_lossy())
    }

    fn is_analyzable(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|candidate| candidate == &ext))
    }

    fn is_ignored_scope(path: &Path, root: &Path) -> bool {
        if let Ok(relative) = path.strip_prefix(root) {
            for component in relative.components() {
                if let std::path::Component::Normal(name) = component {
                    let lowered = name.to_string_lossy().to_lowercase();
                    if IGNORED_SCOPES.iter().any(|ignored| ignored == &lowered) {
                        return true;
                    }
                }
            }
        }
        false
    }
}

const IGNORED_SCOPES: &[&str] = &[
    // VCS / tooling
    ".git",
    ".hg",
    ".svn",
    ".idea",
    ".vscode",
    ".codemend",
    // caches / builds
    ".cache",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    "target",
];
