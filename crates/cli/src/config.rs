use anyhow::{bail, Context, Result};
use codemend_analysis::{AnalysisConfig, DedupConfig, FixConfig};
use codemend_chunker::ChunkerConfig;
use codemend_fingerprint::{ScanOptions, DEFAULT_EXCLUDE, DEFAULT_EXTENSIONS, DEFAULT_MAX_FILE_BYTES};
use codemend_inference::{RetryPolicy, DEFAULT_BASE_URL};
use codemend_protocol::{AnalysisType, PathFilter};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "codemend.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub inference: InferenceSection,
    pub analysis: AnalysisSection,
    pub storage: StorageSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InferenceSection {
    pub base_url: String,
    pub analysis_model: String,
    pub fix_model: String,
    pub analysis_temperature: f32,
    pub fix_temperature: f32,
    pub timeout_seconds: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub stream: bool,
    pub num_predict: Option<u32>,
}

impl Default for InferenceSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            analysis_model: "codellama:34b".to_string(),
            fix_model: "codellama:34b".to_string(),
            analysis_temperature: 0.7,
            fix_temperature: 0.2,
            timeout_seconds: 120,
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            stream: false,
            num_predict: Some(4096),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisSection {
    pub extensions: Vec<String>,
    pub exclude: Vec<String>,
    pub max_file_bytes: u64,
    pub max_unit_chars: usize,
    pub overlap_lines: usize,
    pub workers: usize,
    pub min_issues_to_report: usize,
    pub analysis_types: Vec<AnalysisType>,
    pub similarity_threshold: f64,
}

impl Default for AnalysisSection {
    fn default() -> Self {
        let chunker = ChunkerConfig::default();
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            exclude: DEFAULT_EXCLUDE.iter().map(|e| e.to_string()).collect(),
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            max_unit_chars: chunker.max_unit_chars,
            overlap_lines: chunker.overlap_lines,
            workers: 4,
            min_issues_to_report: 2,
            analysis_types: vec![
                AnalysisType::Standard,
                AnalysisType::Security,
                AnalysisType::Performance,
            ],
            similarity_threshold: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    /// Defaults to the platform data directory.
    pub data_dir: Option<PathBuf>,
}

impl Config {
    /// Resolve the configuration file: an explicit `--config` wins, then
    /// `<project>/codemend.toml`, then `./codemend.toml`. No file means defaults.
    pub fn load(explicit: Option<&Path>, project: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            let config = Self::from_file(path)?;
            return Ok((config, Some(path.to_path_buf())));
        }

        let mut candidates = Vec::new();
        if let Some(project) = project {
            candidates.push(project.join(CONFIG_FILE_NAME));
        }
        candidates.push(PathBuf::from(CONFIG_FILE_NAME));
        for candidate in candidates {
            if candidate.is_file() {
                let config = Self::from_file(&candidate)?;
                return Ok((config, Some(candidate)));
            }
        }
        Ok((Self::default(), None))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// `CODEMEND_OLLAMA_URL` takes precedence over `OLLAMA_BASE_URL`.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = non_empty("CODEMEND_OLLAMA_URL").or_else(|| non_empty("OLLAMA_BASE_URL")) {
            self.inference.base_url = url.trim().to_string();
        }
        if let Some(dir) = non_empty("CODEMEND_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(dir.trim()));
        }
    }

    pub fn validate(&self) -> Result<()> {
        let inference = &self.inference;
        if !inference.base_url.starts_with("http://") && !inference.base_url.starts_with("https://") {
            bail!("inference.base_url must be an http(s) URL, got `{}`", inference.base_url);
        }
        if inference.analysis_model.trim().is_empty() || inference.fix_model.trim().is_empty() {
            bail!("inference models must not be empty");
        }
        for (name, value) in [
            ("analysis_temperature", inference.analysis_temperature),
            ("fix_temperature", inference.fix_temperature),
        ] {
            if !(0.0..=2.0).contains(&value) {
                bail!("inference.{name} must be within 0.0..=2.0, got {value}");
            }
        }
        if inference.timeout_seconds == 0 {
            bail!("inference.timeout_seconds must be > 0");
        }
        if inference.max_attempts == 0 {
            bail!("inference.max_attempts must be >= 1");
        }
        if inference.base_delay_ms > inference.max_delay_ms {
            bail!("inference.base_delay_ms must not exceed inference.max_delay_ms");
        }

        let analysis = &self.analysis;
        if analysis.workers == 0 {
            bail!("analysis.workers must be >= 1");
        }
        if analysis.analysis_types.is_empty() {
            bail!("analysis.analysis_types must name at least one pass");
        }
        if !(0.0..=1.0).contains(&analysis.similarity_threshold) {
            bail!(
                "analysis.similarity_threshold must be within 0.0..=1.0, got {}",
                analysis.similarity_threshold
            );
        }
        self.chunker_config()
            .validate()
            .map_err(|err| anyhow::anyhow!("analysis: {err}"))?;
        PathFilter::new(&analysis.exclude)
            .map_err(|err| anyhow::anyhow!("analysis.exclude: {err}"))?;
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.inference.max_attempts,
            base_delay: Duration::from_millis(self.inference.base_delay_ms),
            max_delay: Duration::from_millis(self.inference.max_delay_ms),
            attempt_timeout: Duration::from_secs(self.inference.timeout_seconds),
        }
    }

    fn chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            max_unit_chars: self.analysis.max_unit_chars,
            overlap_lines: self.analysis.overlap_lines,
            exclude: self.analysis.exclude.clone(),
        }
    }

    pub fn analysis_config(&self) -> AnalysisConfig {
        AnalysisConfig {
            scan: ScanOptions {
                extensions: self
                    .analysis
                    .extensions
                    .iter()
                    .map(|e| e.trim_start_matches('.').to_lowercase())
                    .collect(),
                exclude: self.analysis.exclude.clone(),
                max_file_bytes: self.analysis.max_file_bytes,
            },
            chunker: self.chunker_config(),
            model: self.inference.analysis_model.clone(),
            temperature: self.inference.analysis_temperature,
            timeout: Duration::from_secs(self.inference.timeout_seconds),
            workers: self.analysis.workers,
            min_issues: self.analysis.min_issues_to_report,
            analysis_types: self.analysis.analysis_types.clone(),
            dedup: DedupConfig {
                similarity_threshold: self.analysis.similarity_threshold,
            },
        }
    }

    pub fn fix_config(&self, include_unsuggested: bool) -> FixConfig {
        FixConfig {
            model: self.inference.fix_model.clone(),
            temperature: self.inference.fix_temperature,
            timeout: Duration::from_secs(self.inference.timeout_seconds),
            include_unsuggested,
        }
    }

    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|dir| dir.join("codemend")))
            .unwrap_or_else(|| PathBuf::from(".codemend"))
    }
}
