use anyhow::{Context as AnyhowContext, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use codemend_analysis::{
    parse_report_document, render_markdown, AnalyzeOptions, Analyzer, FixApplier, FixError,
};
use codemend_inference::{CancellationToken, InferenceBackend, InferenceClient, OllamaBackend};
use codemend_memory::{FileMemoryStore, MemoryRecord, MemoryStore};
use codemend_protocol::{FixResult, Issue, ProjectId};
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod config;
mod stub;

use config::Config;

#[derive(Parser)]
#[command(name = "codemend")]
#[command(about = "Analyze and fix source trees with a local language model", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to <project>/codemend.toml, then ./codemend.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Memory store directory (overrides CODEMEND_DATA_DIR and the config file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a project directory and write a report
    Analyze(AnalyzeArgs),

    /// Apply fixes from an analysis report into a separate directory
    Fix(FixArgs),

    /// List analyzed projects, most recent first
    List(ListArgs),

    /// List models installed on the inference service
    Models,
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Project directory to analyze
    path: PathBuf,

    /// Reanalyze every file, ignoring stored fingerprints
    #[arg(long)]
    fresh: bool,

    /// Where to write the Markdown report
    #[arg(long, default_value = "analysis_report.md")]
    output: PathBuf,

    /// Keep the partial report when the run is interrupted
    #[arg(long)]
    save_partial: bool,

    /// Print the report as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct FixArgs {
    /// Project directory the report refers to
    path: PathBuf,

    /// Report to fix from (Markdown or JSON); defaults to the latest stored report
    #[arg(long)]
    analysis: Option<PathBuf>,

    /// Directory receiving the fixed files
    #[arg(long, default_value = "fixed_files")]
    output_dir: PathBuf,

    /// Also attempt issues that carry no suggested fix
    #[arg(long)]
    all: bool,

    /// Print fix results as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct ListArgs {
    /// Print summaries as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let project = match &cli.command {
        Commands::Analyze(args) => Some(args.path.as_path()),
        Commands::Fix(args) => Some(args.path.as_path()),
        Commands::List(_) | Commands::Models => None,
    };
    let config = load_config(&cli, project)?;

    match cli.command {
        Commands::Analyze(args) => run_analyze(args, &config).await,
        Commands::Fix(args) => run_fix(args, &config).await,
        Commands::List(args) => run_list(args, &config).await,
        Commands::Models => run_models(&config).await,
    }
}

fn load_config(cli: &Cli, project: Option<&Path>) -> Result<Config> {
    let (mut config, source) = Config::load(cli.config.as_deref(), project)?;
    match source {
        Some(path) => log::debug!("Loaded config from {}", path.display()),
        None => log::debug!("No config file found, using defaults"),
    }
    config.apply_env();
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir = Some(dir.clone());
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn build_client(config: &Config) -> Result<InferenceClient> {
    let backend: Arc<dyn InferenceBackend> = if stub::stub_mode_enabled() {
        log::info!("Using the offline stub reviewer ({}=stub)", stub::MODE_ENV);
        Arc::new(stub::heuristic_backend())
    } else {
        Arc::new(
            OllamaBackend::new(config.inference.base_url.clone())
                .context("Failed to create inference backend")?,
        )
    };
    Ok(InferenceClient::new(backend, config.retry_policy())
        .with_stream(config.inference.stream)
        .with_num_predict(config.inference.num_predict))
}

fn open_store(config: &Config) -> Arc<FileMemoryStore> {
    let dir = config.data_dir();
    log::debug!("Memory store at {}", dir.display());
    Arc::new(FileMemoryStore::new(dir))
}

/// Token cancelled on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling outstanding requests");
            child.cancel();
        }
    });
    token
}

async fn run_analyze(args: AnalyzeArgs, config: &Config) -> Result<()> {
    let client = build_client(config)?;
    let store = open_store(config);
    let analyzer = Analyzer::new(client, store, config.analysis_config());
    let cancel = cancel_on_ctrl_c();

    let options = AnalyzeOptions {
        fresh: args.fresh,
        save_partial: args.save_partial,
    };
    let outcome = analyzer
        .analyze(&args.path, options, &cancel)
        .await
        .with_context(|| format!("Analysis of {} failed", args.path.display()))?;
    let report = &outcome.report;

    write_output(&args.output, render_markdown(report).as_bytes())?;
    log::info!(
        "{} chunk(s), {} request(s), report {}",
        outcome.chunks,
        outcome.requests,
        report.report_id
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        println!(
            "Analysis complete. Found {} issues across {} files.",
            report.total_issues, report.files_analyzed
        );
        if report.partial {
            println!("Coverage is partial: the run was interrupted.");
        }
        println!("Report saved to: {}", args.output.display());
    }
    Ok(())
}

async fn run_fix(args: FixArgs, config: &Config) -> Result<()> {
    let root = std::fs::canonicalize(&args.path)
        .with_context(|| format!("Project path {} not found", args.path.display()))?;
    let project_id = ProjectId::from_root(&root);
    let store = open_store(config);

    let issues = match &args.analysis {
        Some(path) => issues_from_file(path, &project_id)?,
        None => {
            let report = store
                .latest_report(&project_id)
                .await
                .context("Failed to read project memory")?
                .with_context(|| {
                    format!(
                        "No stored analysis for {}; run `codemend analyze` first or pass --analysis",
                        root.display()
                    )
                })?;
            log::info!("Fixing from stored report {}", report.report_id);
            report.issues
        }
    };

    let client = build_client(config)?;
    let applier = FixApplier::new(client, config.fix_config(args.all));
    let cancel = cancel_on_ctrl_c();

    let (results, failure) = match applier
        .apply_fixes(&issues, &root, &args.output_dir, &cancel)
        .await
    {
        Ok(results) => (results, None),
        Err(FixError::ServiceUnreachable { message, completed }) => {
            (completed, Some(anyhow::anyhow!("Inference service unreachable: {message}")))
        }
        Err(err) => return Err(err).context("Fix run failed"),
    };

    if !results.is_empty() {
        record_fixes(store.as_ref(), &project_id, &root, results.clone()).await?;
    }
    if let Some(err) = failure {
        return Err(err.context(format!("{} fix result(s) were recorded before the failure", results.len())));
    }

    let applied = results.iter().filter(|r| r.applied).count();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in &results {
            print_fix_result(result);
        }
        println!(
            "Applied {applied} of {} fixes. Fixed files written to: {}",
            results.len(),
            args.output_dir.display()
        );
    }
    Ok(())
}

fn issues_from_file(path: &Path, project_id: &ProjectId) -> Result<Vec<Issue>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Analysis file {} not found", path.display()))?;
    let document = parse_report_document(&text)
        .with_context(|| format!("Failed to parse analysis file {}", path.display()))?;
    if let Some(header) = &document.header {
        if header.project_id != project_id.as_str() {
            log::warn!(
                "Report {} was produced for {}, not this project",
                header.report_id,
                header.project_root
            );
        }
    }
    Ok(document.issues)
}

async fn record_fixes(
    store: &dyn MemoryStore,
    project_id: &ProjectId,
    root: &Path,
    results: Vec<FixResult>,
) -> Result<()> {
    let id = project_id.clone();
    let root = root.display().to_string();
    store
        .update(
            project_id,
            Box::new(move |current: Option<MemoryRecord>| {
                let mut record = current.unwrap_or_else(|| MemoryRecord::new(id, root));
                record.record_fixes(results);
                record
            }),
        )
        .await
        .context("Failed to record fix results")?;
    Ok(())
}

fn print_fix_result(result: &FixResult) {
    match (&result.output_path, &result.error) {
        (Some(path), _) if result.applied => {
            println!("applied   {} ({}) -> {path}", result.issue_id, result.file_path);
        }
        (_, error) => println!(
            "rejected  {} ({}): {}",
            result.issue_id,
            result.file_path,
            error.as_deref().unwrap_or("unknown reason")
        ),
    }
}

async fn run_list(args: ListArgs, config: &Config) -> Result<()> {
    let store = open_store(config);
    let summaries = store.list().await.context("Failed to list project memory")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }
    if summaries.is_empty() {
        println!("No analyses recorded yet.");
        return Ok(());
    }
    for summary in &summaries {
        println!("{}  {}", summary.project_id, summary.project_root);
        println!(
            "    updated {}, {} analyses, {} issues in {} files, {}/{} fixes applied",
            format_time(summary.updated_at_unix_ms),
            summary.analyses,
            summary.total_issues,
            summary.files_analyzed,
            summary.fixes_applied,
            summary.fix_attempts
        );
        if let Some(report_id) = &summary.latest_report_id {
            println!("    latest report {report_id}");
        }
    }
    Ok(())
}

async fn run_models(config: &Config) -> Result<()> {
    let client = build_client(config)?;
    let models = client.list_models().await.with_context(|| {
        format!("Failed to list models from {}", config.inference.base_url)
    })?;
    if models.is_empty() {
        println!("No models installed.");
    }
    for model in models {
        match model.size {
            Some(size) => println!("{}  ({:.1} GB)", model.name, size as f64 / 1e9),
            None => println!("{}", model.name),
        }
    }
    Ok(())
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}

fn format_time(unix_ms: u64) -> String {
    i64::try_from(unix_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| unix_ms.to_string())
}
