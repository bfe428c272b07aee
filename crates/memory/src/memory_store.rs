use crate::record::sort_summaries;
use crate::store::RecordUpdate;
use crate::{MemoryError, MemoryRecord, MemoryStore, RecordSummary, Result};
use async_trait::async_trait;
use codemend_protocol::{AnalysisReport, ProjectId};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Process-local store with the same contract as the file store.
#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<HashMap<ProjectId, MemoryRecord>>,
    reports: Mutex<HashMap<(ProjectId, String), AnalysisReport>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn report_count(&self) -> usize {
        self.reports.lock().await.len()
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn load(&self, project_id: &ProjectId) -> Result<MemoryRecord> {
        self.records
            .lock()
            .await
            .get(project_id)
            .cloned()
            .ok_or_else(|| MemoryError::NotFound(project_id.to_string()))
    }

    async fn save(&self, record: &MemoryRecord) -> Result<()> {
        self.records
            .lock()
            .await
            .insert(record.project_id.clone(), record.clone());
        Ok(())
    }

    async fn update(&self, project_id: &ProjectId, apply: RecordUpdate) -> Result<MemoryRecord> {
        let mut records = self.records.lock().await;
        let updated = apply(records.get(project_id).cloned());
        records.insert(project_id.clone(), updated.clone());
        Ok(updated)
    }

    async fn list(&self) -> Result<Vec<RecordSummary>> {
        let mut summaries: Vec<RecordSummary> = self
            .records
            .lock()
            .await
            .values()
            .map(MemoryRecord::summary)
            .collect();
        sort_summaries(&mut summaries);
        Ok(summaries)
    }

    async fn save_report(&self, report: &AnalysisReport) -> Result<()> {
        let mut reports = self.reports.lock().await;
        let key = (report.project_id.clone(), report.report_id.clone());
        if reports.contains_key(&key) {
            return Err(MemoryError::Persistence(format!(
                "report {} already exists",
                report.report_id
            )));
        }
        reports.insert(key, report.clone());
        Ok(())
    }

    async fn load_report(&self, project_id: &ProjectId, report_id: &str) -> Result<AnalysisReport> {
        self.reports
            .lock()
            .await
            .get(&(project_id.clone(), report_id.to_string()))
            .cloned()
            .ok_or_else(|| MemoryError::ReportNotFound {
                project_id: project_id.to_string(),
                report_id: report_id.to_string(),
            })
    }
}
