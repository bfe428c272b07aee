//! Content fingerprints for project trees.
//!
//! A scan walks the project (`.gitignore` aware), hashes every analyzable file with SHA-256
//! and keeps the decoded content so later stages never re-read the disk. Comparing two
//! fingerprints tells the pipeline which files can reuse a previous analysis.

mod error;
mod fingerprint;
mod scanner;

pub use error::{FingerprintError, Result};
pub use fingerprint::{
    compute_fingerprint, diff, fingerprint_file, hash_bytes, FileEntry, FingerprintDiff,
    FingerprintScan, ProjectFingerprint,
};
pub use scanner::{
    FileScanner, ScanOptions, DEFAULT_EXCLUDE, DEFAULT_EXTENSIONS, DEFAULT_MAX_FILE_BYTES,
};
