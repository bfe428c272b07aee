use codemend_protocol::FixResult;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid project path: {0}")]
    InvalidPath(String),

    #[error("Inference service unreachable: {0}")]
    ServiceUnreachable(String),

    #[error("Analysis cancelled before completion")]
    Cancelled,

    #[error("Memory store error: {0}")]
    Memory(#[from] codemend_memory::MemoryError),

    #[error("Fingerprint error: {0}")]
    Fingerprint(#[from] codemend_fingerprint::FingerprintError),

    #[error("Chunker error: {0}")]
    Chunker(#[from] codemend_chunker::ChunkerError),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
pub enum FixError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Output directory must differ from the project directory: {0}")]
    OutputIsTarget(String),

    /// The service went away mid-run; `completed` holds the results produced before that.
    #[error("Inference service unreachable: {message}")]
    ServiceUnreachable {
        message: String,
        completed: Vec<FixResult>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ReportParseError {
    #[error("Not a codemend report: no report header or JSON body found")]
    NotAReport,

    #[error("Invalid issue marker on line {line}: {message}")]
    InvalidMarker { line: usize, message: String },

    #[error("Invalid JSON report: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
