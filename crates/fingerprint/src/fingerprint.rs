use crate::scanner::{FileScanner, ScanOptions};
use crate::{FingerprintError, Result};
use codemend_protocol::SourceFile;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::UNIX_EPOCH;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FileEntry {
    Hashed {
        sha256: String,
        size: u64,
        mtime_ms: u64,
    },
    Unreadable {
        reason: String,
    },
}

impl FileEntry {
    pub fn digest(&self) -> Option<&str> {
        match self {
            Self::Hashed { sha256, .. } => Some(sha256),
            Self::Unreadable { .. } => None,
        }
    }
}

/// Content hashes for every scanned file, keyed by project-relative path.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectFingerprint {
    pub files: BTreeMap<String, FileEntry>,
}

impl ProjectFingerprint {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn digest(&self, rel_path: &str) -> Option<&str> {
        self.files.get(rel_path).and_then(FileEntry::digest)
    }

    /// Both snapshots hashed the file and the digests agree. Unreadable entries never count
    /// as unchanged.
    pub fn is_unchanged(&self, rel_path: &str, previous: &ProjectFingerprint) -> bool {
        match (self.digest(rel_path), previous.digest(rel_path)) {
            (Some(now), Some(before)) => now == before,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerprintDiff {
    pub changed: BTreeSet<String>,
    pub added: BTreeSet<String>,
    pub removed: BTreeSet<String>,
}

impl FingerprintDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }

    /// Paths whose content must be (re)analyzed.
    pub fn dirty(&self) -> impl Iterator<Item = &String> {
        self.changed.iter().chain(self.added.iter())
    }
}

pub fn diff(old: &ProjectFingerprint, new: &ProjectFingerprint) -> FingerprintDiff {
    let mut out = FingerprintDiff::default();
    for path in new.files.keys() {
        if !old.files.contains_key(path) {
            out.added.insert(path.clone());
        } else if !new.is_unchanged(path, old) {
            out.changed.insert(path.clone());
        }
    }
    for path in old.files.keys() {
        if !new.files.contains_key(path) {
            out.removed.insert(path.clone());
        }
    }
    out
}

/// Fingerprint plus the decoded content of every readable file. Content comes from the same
/// bytes that were hashed, so a file cannot change between hashing and analysis.
#[derive(Debug, Clone, Default)]
pub struct FingerprintScan {
    pub fingerprint: ProjectFingerprint,
    pub sources: Vec<SourceFile>,
    /// `(path, reason)` for files that could not be read.
    pub unreadable: Vec<(String, String)>,
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Hash a single file. Read failures are captured in the entry rather than returned.
pub fn fingerprint_file(path: &Path) -> (FileEntry, Option<Vec<u8>>) {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            return (
                FileEntry::Unreadable {
                    reason: err.to_string(),
                },
                None,
            )
        }
    };
    let mtime_ms = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    let entry = FileEntry::Hashed {
        sha256: hash_bytes(&bytes),
        size: bytes.len() as u64,
        mtime_ms,
    };
    (entry, Some(bytes))
}

pub fn compute_fingerprint(root: &Path, options: &ScanOptions) -> Result<FingerprintScan> {
    if !root.is_dir() {
        return Err(FingerprintError::InvalidPath(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let scanner = FileScanner::new(root, options)?;
    let mut scan = FingerprintScan::default();

    for path in scanner.scan() {
        let rel = scanner.relative(&path);
        let (entry, bytes) = fingerprint_file(&path);
        match (&entry, bytes) {
            (FileEntry::Hashed { .. }, Some(bytes)) => {
                let content = String::from_utf8_lossy(&bytes).into_owned();
                scan.sources.push(SourceFile::new(rel.clone(), content));
            }
            (FileEntry::Unreadable { reason }, _) => {
                log::warn!("Unreadable file {rel}: {reason}");
                scan.unreadable.push((rel.clone(), reason.clone()));
            }
            _ => {}
        }
        scan.fingerprint.files.insert(rel, entry);
    }

    log::debug!(
        "Fingerprinted {} files ({} unreadable)",
        scan.fingerprint.len(),
        scan.unreadable.len()
    );
    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    fn hashed(sha: &str) -> FileEntry {
        FileEntry::Hashed {
            sha256: sha.to_string(),
            size: 1,
            mtime_ms: 0,
        }
    }

    #[test]
    fn diff_classifies_paths() {
        let mut old = ProjectFingerprint::default();
        old.files.insert("same.py".into(), hashed("a"));
        old.files.insert("edited.py".into(), hashed("b"));
        old.files.insert("gone.py".into(), hashed("c"));
        let mut new = ProjectFingerprint::default();
        new.files.insert("same.py".into(), hashed("a"));
        new.files.insert("edited.py".into(), hashed("b2"));
        new.files.insert("fresh.py".into(), hashed("d"));

        let d = diff(&old, &new);
        assert_eq!(d.changed.into_iter().collect::<Vec<_>>(), vec!["edited.py"]);
        assert_eq!(d.added.into_iter().collect::<Vec<_>>(), vec!["fresh.py"]);
        assert_eq!(d.removed.into_iter().collect::<Vec<_>>(), vec!["gone.py"]);
    }

    #[test]
    fn unreadable_entries_are_never_unchanged() {
        let mut a = ProjectFingerprint::default();
        a.files.insert(
            "x.py".into(),
            FileEntry::Unreadable {
                reason: "denied".into(),
            },
        );
        let b = a.clone();
        assert!(!a.is_unchanged("x.py", &b));
        assert!(diff(&a, &b).changed.contains("x.py"));
    }

    #[test]
    fn missing_file_fingerprints_as_unreadable() {
        let temp = tempdir().unwrap();
        let (entry, bytes) = fingerprint_file(&temp.path().join("nope.py"));
        assert!(bytes.is_none());
        assert!(matches!(entry, FileEntry::Unreadable { .. }));
    }

    #[test]
    fn whitespace_change_changes_digest() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("a.py");
        fs::write(&file, b"x = 1\n").unwrap();
        let first = compute_fingerprint(temp.path(), &ScanOptions::default()).unwrap();
        fs::write(&file, b"x = 1 \n").unwrap();
        let second = compute_fingerprint(temp.path(), &ScanOptions::default()).unwrap();
        assert!(!second
            .fingerprint
            .is_unchanged("a.py", &first.fingerprint));
    }

    #[test]
    fn missing_root_is_rejected() {
        let temp = tempdir().unwrap();
        let err = compute_fingerprint(&temp.path().join("absent"), &ScanOptions::default())
            .unwrap_err();
        assert!(matches!(err, FingerprintError::InvalidPath(_)));
    }
}
