use thiserror::Error;

pub type Result<T> = std::result::Result<T, MemoryError>;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("no memory record for project {0}")]
    NotFound(String),

    #[error("report {report_id} not found for project {project_id}")]
    ReportNotFound {
        project_id: String,
        report_id: String,
    },

    #[error("corrupt memory file {path}: {message}")]
    Corrupt { path: String, message: String },

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("invalid project id: {0}")]
    InvalidProjectId(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MemoryError {
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::ReportNotFound { .. })
    }
}
