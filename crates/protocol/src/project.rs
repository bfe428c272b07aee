use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// `<dir-name>-<16 hex>`; the hex part is derived from the canonical root path.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// `root` is expected to be canonicalized by the caller so that `./x` and `/abs/x` agree.
    pub fn from_root(root: &Path) -> Self {
        let display = root.to_string_lossy();
        let name = root
            .file_name()
            .map(|n| sanitize_component(&n.to_string_lossy()))
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| "project".to_string());
        Self(format!("{name}-{:016x}", root_fingerprint(&display)))
    }

    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Safe to use as a file name.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !self.0.starts_with('.')
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn root_fingerprint(root_display: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(root_display.as_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim_matches('_')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_stable_and_file_name_safe() {
        let a = ProjectId::from_root(Path::new("/home/dev/my app"));
        let b = ProjectId::from_root(Path::new("/home/dev/my app"));
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("my_app-"));
        assert!(a.is_valid());
        assert_ne!(a, ProjectId::from_root(Path::new("/home/other/my app")));
    }

    #[test]
    fn root_path_falls_back_to_generic_name() {
        let id = ProjectId::from_root(Path::new("/"));
        assert!(id.as_str().starts_with("project-"));
        assert!(!ProjectId::from_raw("../etc").is_valid());
    }
}
