use crate::{MemoryError, MemoryRecord, RecordSummary, Result};
use async_trait::async_trait;
use codemend_protocol::{AnalysisReport, ProjectId};

pub type RecordUpdate = Box<dyn FnOnce(Option<MemoryRecord>) -> MemoryRecord + Send>;

/// Key-value persistence for project memory. Writes are atomic: a reader sees either the
/// previous committed value or the new one, never a torn file.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Fails with [`MemoryError::NotFound`] when the project has never been analyzed.
    async fn load(&self, project_id: &ProjectId) -> Result<MemoryRecord>;

    async fn save(&self, record: &MemoryRecord) -> Result<()>;

    /// Load-modify-save under the project's writer lock.
    async fn update(&self, project_id: &ProjectId, apply: RecordUpdate) -> Result<MemoryRecord>;

    /// Summaries of every record, most recent first.
    async fn list(&self) -> Result<Vec<RecordSummary>>;

    /// Reports are immutable; saving an id twice is an error.
    async fn save_report(&self, report: &AnalysisReport) -> Result<()>;

    async fn load_report(&self, project_id: &ProjectId, report_id: &str) -> Result<AnalysisReport>;

    async fn load_optional(&self, project_id: &ProjectId) -> Result<Option<MemoryRecord>> {
        match self.load(project_id).await {
            Ok(record) => Ok(Some(record)),
            Err(MemoryError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Latest report linked from the project's record, if any.
    async fn latest_report(&self, project_id: &ProjectId) -> Result<Option<AnalysisReport>> {
        let Some(record) = self.load_optional(project_id).await? else {
            return Ok(None);
        };
        let Some(latest) = record.latest_report else {
            return Ok(None);
        };
        self.load_report(project_id, &latest.report_id).await.map(Some)
    }
}
