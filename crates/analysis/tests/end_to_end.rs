use codemend_analysis::{
    render_markdown, AnalysisConfig, AnalyzeOptions, Analyzer, FixApplier, FixConfig,
};
use codemend_chunker::ChunkerConfig;
use codemend_inference::{CancellationToken, GenerateRequest, InferenceClient, RetryPolicy, StubBackend};
use codemend_memory::{InMemoryStore, MemoryRecord, MemoryStore};
use codemend_protocol::{IssueCategory, Severity};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        attempt_timeout: Duration::from_secs(10),
    }
}

/// Reviewer stand-in: flags credentials, bare excepts and stray console logging in the
/// numbered listing of the prompt.
fn review(request: &GenerateRequest) -> codemend_inference::Result<String> {
    let mut issues = Vec::new();
    let mut current_file: Option<String> = None;
    for line in request.prompt.lines() {
        if let Some(rest) = line.strip_prefix("### FILE: ") {
            let path = rest.split(" (lines").next().unwrap_or(rest).trim();
            current_file = Some(path.to_string());
            continue;
        }
        let (Some(file), Some((number, code))) = (current_file.as_ref(), line.split_once(" | ")) else {
            continue;
        };
        let Ok(number) = number.trim().parse::<u32>() else {
            continue;
        };
        if code.contains("PASSWORD = '") {
            issues.push(json!({
                "file": file, "line": number, "category": "security", "severity": "critical",
                "description": "Hard-coded credential in source",
                "suggested_fix": "Read the password from the APP_PASSWORD environment variable",
            }));
        }
        if code.trim() == "except:" {
            issues.push(json!({
                "file": file, "line": number, "category": "error-handling", "severity": "high",
                "description": "Bare except swallows every error",
                "suggested_fix": "Catch the specific exception and log it",
            }));
        }
        if code.contains("console.log(") {
            issues.push(json!({
                "file": file, "line": number, "category": "other", "severity": "low",
                "description": "Debug logging left in production code",
            }));
        }
    }
    Ok(json!({ "issues": issues }).to_string())
}

/// Fixer stand-in: rewrites the credential line of whatever code it is shown.
fn fix(request: &GenerateRequest) -> codemend_inference::Result<String> {
    let code = request
        .prompt
        .split("ORIGINAL CODE:\n```python\n")
        .nth(1)
        .and_then(|rest| rest.split("```").next())
        .unwrap_or_default();
    let fixed = code.replace(
        "PASSWORD = 'hunter2'",
        "PASSWORD = os.environ[\"APP_PASSWORD\"]",
    );
    Ok(format!("```python\n{fixed}```"))
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn three_file_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(
        dir.path(),
        "app.py",
        "import os\nPASSWORD = 'hunter2'\n\ndef connect():\n    try:\n        return open_db(PASSWORD)\n    except:\n        return None\n",
    );
    write(dir.path(), "web/util.js", "export function add(a, b) {\n  console.log(a, b);\n  return a + b;\n}\n");
    write(dir.path(), "src/lib.rs", "pub fn double(x: u32) -> u32 {\n    x * 2\n}\n");
    dir
}

fn analyzer(store: Arc<InMemoryStore>, workers: usize) -> Analyzer {
    let client = InferenceClient::new(Arc::new(StubBackend::new(review)), policy());
    let config = AnalysisConfig {
        workers,
        ..AnalysisConfig::default()
    };
    Analyzer::new(client, store, config)
}

#[tokio::test]
async fn analyze_skip_and_fix_three_files() {
    let project = three_file_project();
    let store = Arc::new(InMemoryStore::new());
    let analyzer = analyzer(store.clone(), 4);
    let cancel = CancellationToken::new();

    let first = analyzer
        .analyze(project.path(), AnalyzeOptions::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(first.report.files_analyzed, 3);
    assert_eq!(first.report.total_issues, 3);
    assert_eq!(first.report.issues[0].severity, Severity::Critical);
    assert_eq!(first.report.issues[0].category, IssueCategory::Security);
    assert_eq!(first.report.issues[0].file_path, "app.py");
    assert!(first.skipped_files.is_empty());

    write(project.path(), "web/util.js", "export function add(a, b) {\n  return a + b;\n}\n");
    write(project.path(), "src/lib.rs", "pub fn triple(x: u32) -> u32 {\n    x * 3\n}\n");

    let second = analyzer
        .analyze(project.path(), AnalyzeOptions::default(), &cancel)
        .await
        .unwrap();
    assert_eq!(second.skipped_files, vec!["app.py".to_string()]);
    assert_eq!(second.report.files_skipped, 1);
    assert_eq!(second.report.files_analyzed, 2);
    // app.py findings are carried forward; the console.log finding is gone.
    assert_eq!(second.report.total_issues, 2);
    assert!(second.report.issues.iter().all(|i| i.file_path == "app.py"));
    assert_eq!(second.record.history.len(), 2);

    let fixes = TempDir::new().unwrap();
    let applier = FixApplier::new(
        InferenceClient::new(Arc::new(StubBackend::new(fix)), policy()),
        FixConfig::default(),
    );
    let results = applier
        .apply_fixes(&second.report.issues, project.path(), fixes.path(), &cancel)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);

    let credential = &second.report.issues[0];
    let applied: Vec<_> = results.iter().filter(|r| r.applied).collect();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].issue_id, credential.id);
    let rejected = results.iter().find(|r| !r.applied).unwrap();
    assert!(rejected.error.as_deref().unwrap_or_default().contains("identical"));

    let fixed = std::fs::read_to_string(fixes.path().join("app.py")).unwrap();
    assert!(fixed.contains("os.environ[\"APP_PASSWORD\"]"));
    let original = std::fs::read_to_string(project.path().join("app.py")).unwrap();
    assert!(original.contains("PASSWORD = 'hunter2'"));

    let record = store
        .update(
            &second.report.project_id,
            Box::new(move |current: Option<MemoryRecord>| {
                let mut record = current.unwrap();
                record.record_fixes(results);
                record
            }),
        )
        .await
        .unwrap();
    assert_eq!(record.fix_attempts.len(), 2);
    assert_eq!(record.summary().fixes_applied, 1);
}

/// Rendered report with the per-run id and timestamp masked out.
fn stable_markdown(report: &codemend_protocol::AnalysisReport) -> String {
    render_markdown(report)
        .replace(&report.report_id, "<report>")
        .lines()
        .filter(|line| !line.starts_with("- Generated:"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::test]
async fn worker_count_does_not_change_the_report() {
    let project = TempDir::new().unwrap();
    for n in 0..10 {
        write(project.path(), &format!("pkg/mod_{n}.py"), "PASSWORD = 'hunter2'\nx = 1\n");
    }
    let options = AnalyzeOptions {
        fresh: true,
        save_partial: false,
    };
    let cancel = CancellationToken::new();
    // Budget fits one file per chunk, so the workers really interleave.
    let chunker = ChunkerConfig {
        max_unit_chars: 40,
        ..ChunkerConfig::default()
    };

    let run = |workers: usize| {
        let client = InferenceClient::new(Arc::new(StubBackend::new(review)), policy());
        let config = AnalysisConfig {
            workers,
            chunker: chunker.clone(),
            ..AnalysisConfig::default()
        };
        Analyzer::new(client, Arc::new(InMemoryStore::new()), config)
    };

    let sequential = run(1).analyze(project.path(), options, &cancel).await.unwrap();
    let concurrent = run(4).analyze(project.path(), options, &cancel).await.unwrap();

    assert_eq!(sequential.chunks, 10);
    assert_eq!(concurrent.chunks, 10);
    assert_eq!(sequential.report.total_issues, 10);
    assert_ne!(sequential.report.report_id, concurrent.report.report_id);
    assert_eq!(sequential.report.issues, concurrent.report.issues);
    assert_eq!(
        stable_markdown(&sequential.report),
        stable_markdown(&concurrent.report)
    );
}

#[tokio::test]
async fn fresh_runs_are_idempotent_and_still_recorded() {
    let project = three_file_project();
    let store = Arc::new(InMemoryStore::new());
    let analyzer = analyzer(store.clone(), 2);
    let options = AnalyzeOptions {
        fresh: true,
        save_partial: false,
    };
    let cancel = CancellationToken::new();

    let a = analyzer.analyze(project.path(), options, &cancel).await.unwrap();
    let b = analyzer.analyze(project.path(), options, &cancel).await.unwrap();
    assert_eq!(a.report.issues, b.report.issues);
    assert!(b.skipped_files.is_empty());
    assert_eq!(b.record.history.len(), 2);
    assert_eq!(store.report_count().await, 2);

    let latest = store
        .latest_report(&b.report.project_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.report_id, b.report.report_id);
}
