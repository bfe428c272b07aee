//! # Codemend Analysis
//!
//! Everything between a project directory and a report, plus the fix loop on top of it.
//!
//! ```text
//! project root
//!     │
//!     ├──> fingerprint (blocking task) ──> skip unchanged files
//!     ├──> chunk plan ──> jobs (chunk × analysis type)
//!     ├──> bounded workers ──> inference client ──> parser
//!     └──> aggregator (single writer) ──> report ──> memory store
//! ```

mod aggregate;
mod error;
mod fixer;
mod parser;
mod pipeline;
mod prompts;
mod proposal;
mod report;

pub use aggregate::{aggregate, DedupConfig, IssueAggregator};
pub use error::{FixError, PipelineError, ReportParseError, Result};
pub use fixer::{FixApplier, FixConfig};
pub use parser::{parse, ExpectedSchema, ParseFailure, ParseOutcome, ParseStrategy, MIN_DESCRIPTION_CHARS};
pub use pipeline::{AnalysisConfig, AnalysisOutcome, AnalyzeOptions, Analyzer};
pub use prompts::{analysis_prompt, fix_prompt, PriorFindings, ISSUE_SCHEMA};
pub use proposal::{apply_unified_diff, check_proposal, delimiters_balanced, extract_proposal, Proposal};
pub use report::{parse_report_document, render_markdown, ReportDocument, ReportHeader};
