use crate::lock::acquire_project_write_lock;
use crate::record::sort_summaries;
use crate::store::RecordUpdate;
use crate::{MemoryError, MemoryRecord, MemoryStore, RecordSummary, Result};
use async_trait::async_trait;
use codemend_protocol::{AnalysisReport, ProjectId};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const RECORDS_DIR: &str = "records";
const REPORTS_DIR: &str = "reports";
const LOCKS_DIR: &str = "locks";

/// JSON files under a data directory:
///
/// ```text
/// <root>/records/<project>.json
/// <root>/reports/<project>/<report>.json
/// <root>/locks/<project>.lock
/// ```
pub struct FileMemoryStore {
    root: PathBuf,
}

impl FileMemoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, project_id: &ProjectId) -> PathBuf {
        self.root
            .join(RECORDS_DIR)
            .join(format!("{}.json", project_id.as_str()))
    }

    fn report_dir(&self, project_id: &ProjectId) -> PathBuf {
        self.root.join(REPORTS_DIR).join(project_id.as_str())
    }

    fn report_path(&self, project_id: &ProjectId, report_id: &str) -> PathBuf {
        self.report_dir(project_id).join(format!("{report_id}.json"))
    }

    fn lock_path(&self, project_id: &ProjectId) -> PathBuf {
        self.root
            .join(LOCKS_DIR)
            .join(format!("{}.lock", project_id.as_str()))
    }

    async fn read_record(&self, project_id: &ProjectId) -> Result<Option<MemoryRecord>> {
        read_json(&self.record_path(project_id)).await
    }

    async fn write_record(&self, record: &MemoryRecord) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.record_path(&record.project_id), &bytes).await?;
        self.prune_reports(record).await;
        Ok(())
    }

    /// Drop report files that fell out of the record's history window.
    async fn prune_reports(&self, record: &MemoryRecord) {
        let keep: HashSet<String> = record
            .history
            .iter()
            .map(|r| format!("{}.json", r.report_id))
            .collect();
        let dir = self.report_dir(&record.project_id);
        let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(".json") || keep.contains(&name) {
                continue;
            }
            if let Err(err) = tokio::fs::remove_file(entry.path()).await {
                log::debug!("Failed to prune report {}: {err}", entry.path().display());
            }
        }
    }
}

fn ensure_valid(project_id: &ProjectId) -> Result<()> {
    if project_id.is_valid() {
        Ok(())
    } else {
        Err(MemoryError::InvalidProjectId(project_id.to_string()))
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|err| MemoryError::Corrupt {
            path: path.display().to_string(),
            message: err.to_string(),
        })
}

/// Write to a sibling temp file, fsync, then rename over the target.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let persist = |err: std::io::Error| {
        MemoryError::Persistence(format!("write {}: {err}", path.display()))
    };
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(persist)?;
    }
    let tmp = path.with_extension("json.tmp");
    let mut file = tokio::fs::File::create(&tmp).await.map_err(persist)?;
    file.write_all(bytes).await.map_err(persist)?;
    file.sync_all().await.map_err(persist)?;
    drop(file);
    tokio::fs::rename(&tmp, path).await.map_err(persist)?;
    Ok(())
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn load(&self, project_id: &ProjectId) -> Result<MemoryRecord> {
        ensure_valid(project_id)?;
        self.read_record(project_id)
            .await?
            .ok_or_else(|| MemoryError::NotFound(project_id.to_string()))
    }

    async fn save(&self, record: &MemoryRecord) -> Result<()> {
        ensure_valid(&record.project_id)?;
        let _lock = acquire_project_write_lock(self.lock_path(&record.project_id)).await?;
        self.write_record(record).await
    }

    async fn update(&self, project_id: &ProjectId, apply: RecordUpdate) -> Result<MemoryRecord> {
        ensure_valid(project_id)?;
        let _lock = acquire_project_write_lock(self.lock_path(project_id)).await?;
        let current = self.read_record(project_id).await?;
        let updated = apply(current);
        if &updated.project_id != project_id {
            return Err(MemoryError::Persistence(format!(
                "update for {project_id} produced a record for {}",
                updated.project_id
            )));
        }
        self.write_record(&updated).await?;
        Ok(updated)
    }

    async fn list(&self) -> Result<Vec<RecordSummary>> {
        let dir = self.root.join(RECORDS_DIR);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<MemoryRecord>(&path).await {
                Ok(Some(record)) => summaries.push(record.summary()),
                Ok(None) => {}
                Err(err) => log::warn!("Skipping unreadable memory record: {err}"),
            }
        }
        sort_summaries(&mut summaries);
        Ok(summaries)
    }

    async fn save_report(&self, report: &AnalysisReport) -> Result<()> {
        ensure_valid(&report.project_id)?;
        let path = self.report_path(&report.project_id, &report.report_id);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(MemoryError::Persistence(format!(
                "report {} already exists",
                report.report_id
            )));
        }
        let bytes = serde_json::to_vec_pretty(report)?;
        write_atomic(&path, &bytes).await
    }

    async fn load_report(&self, project_id: &ProjectId, report_id: &str) -> Result<AnalysisReport> {
        ensure_valid(project_id)?;
        if report_id.contains(['/', '\\']) || report_id.starts_with('.') {
            return Err(MemoryError::ReportNotFound {
                project_id: project_id.to_string(),
                report_id: report_id.to_string(),
            });
        }
        read_json(&self.report_path(project_id, report_id))
            .await?
            .ok_or_else(|| MemoryError::ReportNotFound {
                project_id: project_id.to_string(),
                report_id: report_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("records").join("x.json");
        write_atomic(&path, b"{}").await.unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_record_is_reported_not_swallowed() {
        let temp = tempdir().unwrap();
        let store = FileMemoryStore::new(temp.path());
        let id = ProjectId::from_raw("demo-1");
        let path = store.record_path(&id);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, b"{not json").await.unwrap();

        let err = store.load(&id).await.unwrap_err();
        assert!(matches!(err, MemoryError::Corrupt { .. }));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn path_like_ids_are_rejected() {
        let temp = tempdir().unwrap();
        let store = FileMemoryStore::new(temp.path());
        let err = store.load(&ProjectId::from_raw("../escape")).await.unwrap_err();
        assert!(matches!(err, MemoryError::InvalidProjectId(_)));
    }
}
