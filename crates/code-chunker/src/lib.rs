//! # Codemend Chunker
//!
//! Splits project files into analysis units that fit a model's context budget.
//!
//! ```text
//! SourceFile[]
//!     │
//!     ├──> Exclude filter (globs / prefixes)
//!     │
//!     ├──> Segmentation (per file)
//!     │    ├─> whole file when it fits the budget
//!     │    └─> line windows otherwise, each repeating `overlap_lines` of context
//!     │
//!     └──> Packing
//!          └─> consecutive items share a chunk while the budget allows
//! ```
//!
//! ## Example
//!
//! ```rust
//! use codemend_chunker::{Chunker, ChunkerConfig};
//! use codemend_protocol::SourceFile;
//!
//! let chunker = Chunker::new(ChunkerConfig::default()).unwrap();
//! let files = vec![SourceFile::new("app.py", "print('hi')\n")];
//! for chunk in chunker.plan(&files).iter() {
//!     println!("chunk {} covers {} lines", chunk.index, chunk.line_count());
//! }
//! ```

mod chunker;
mod config;
mod error;
mod language;
mod types;

pub use chunker::{ChunkIter, ChunkPlan, Chunker};
pub use config::ChunkerConfig;
pub use error::{ChunkerError, Result};
pub use language::{language_for_path, Language};
pub use types::{estimate_tokens, AnalysisChunk, ChunkItem};
