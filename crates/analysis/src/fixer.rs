use crate::error::FixError;
use crate::proposal::{extract_proposal, Proposal};
use crate::prompts::fix_prompt;
use codemend_chunker::Language;
use codemend_fingerprint::hash_bytes;
use codemend_inference::{CancellationToken, InferenceClient, InferenceErrorKind};
use codemend_protocol::{normalize_rel_path, FixResult, Issue};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct FixConfig {
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
    /// Also attempt issues the analysis did not attach a suggested fix to.
    pub include_unsuggested: bool,
}

impl Default for FixConfig {
    fn default() -> Self {
        Self {
            model: "codellama:34b".to_string(),
            temperature: 0.2,
            timeout: Duration::from_secs(120),
            include_unsuggested: false,
        }
    }
}

/// Produces fixed copies of project files under a separate output directory.
pub struct FixApplier {
    client: InferenceClient,
    config: FixConfig,
}

impl FixApplier {
    pub fn new(client: InferenceClient, config: FixConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &FixConfig {
        &self.config
    }

    /// Attempt every eligible issue, one request each, grouped per file in the given order.
    ///
    /// Accepted fixes to the same file compound. Files in `target_dir` are only read.
    pub async fn apply_fixes(
        &self,
        issues: &[Issue],
        target_dir: &Path,
        output_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Vec<FixResult>, FixError> {
        let target = tokio::fs::canonicalize(target_dir)
            .await
            .map_err(|err| FixError::InvalidPath(format!("{}: {err}", target_dir.display())))?;
        tokio::fs::create_dir_all(output_dir).await?;
        let output = tokio::fs::canonicalize(output_dir).await?;
        if output == target {
            return Err(FixError::OutputIsTarget(output.display().to_string()));
        }

        let groups = group_by_file(issues, self.config.include_unsuggested);
        let total: usize = groups.iter().map(|(_, g)| g.len()).sum();
        log::info!("Attempting {total} fix(es) across {} file(s)", groups.len());

        let mut results = Vec::with_capacity(total);
        for (rel_path, group) in groups {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(err) = self
                .fix_file(&rel_path, &group, &target, &output, cancel, &mut results)
                .await
            {
                return Err(match err {
                    FixError::ServiceUnreachable { message, .. } => FixError::ServiceUnreachable {
                        message,
                        completed: results,
                    },
                    other => other,
                });
            }
        }

        let applied = results.iter().filter(|r| r.applied).count();
        log::info!("{applied} of {} fix(es) applied", results.len());
        Ok(results)
    }

    async fn fix_file(
        &self,
        rel_path: &str,
        issues: &[&Issue],
        target: &Path,
        output: &Path,
        cancel: &CancellationToken,
        results: &mut Vec<FixResult>,
    ) -> Result<(), FixError> {
        let Some(relative) = safe_relative(rel_path) else {
            for issue in issues {
                results.push(FixResult::rejected(
                    &issue.id,
                    rel_path,
                    "",
                    None,
                    "path escapes the project directory",
                ));
            }
            return Ok(());
        };

        let source = target.join(&relative);
        let mut working = match tokio::fs::read_to_string(&source).await {
            Ok(content) => content,
            Err(err) => {
                log::warn!("Cannot read {}: {err}", source.display());
                for issue in issues {
                    results.push(FixResult::rejected(
                        &issue.id,
                        rel_path,
                        "",
                        None,
                        format!("cannot read file: {err}"),
                    ));
                }
                return Ok(());
            }
        };
        let language = Language::from_path(rel_path);
        let destination = output.join(&relative);

        for issue in issues {
            if cancel.is_cancelled() {
                break;
            }
            let base_sha = hash_bytes(working.as_bytes());
            let prompt = fix_prompt(rel_path, &working, issue);
            let reply = match self
                .client
                .request(
                    &prompt,
                    &self.config.model,
                    self.config.temperature,
                    self.config.timeout,
                    cancel,
                )
                .await
            {
                Ok(reply) => reply,
                Err(err) if err.kind == InferenceErrorKind::Cancelled => break,
                Err(err) if err.kind == InferenceErrorKind::ConnectionRefused => {
                    return Err(FixError::ServiceUnreachable {
                        message: err.to_string(),
                        completed: Vec::new(),
                    });
                }
                Err(err) => {
                    log::warn!("Fix request for {} failed: {err}", issue.id);
                    results.push(FixResult::rejected(
                        &issue.id,
                        rel_path,
                        base_sha,
                        None,
                        format!("inference failed: {err}"),
                    ));
                    continue;
                }
            };

            match extract_proposal(&reply, &working, language) {
                Proposal::Content(content) => {
                    if let Err(err) = write_atomic(&destination, content.as_bytes()).await {
                        log::warn!("Cannot write {}: {err}", destination.display());
                        results.push(FixResult::rejected(
                            &issue.id,
                            rel_path,
                            base_sha,
                            Some(content),
                            format!("write failed: {err}"),
                        ));
                        continue;
                    }
                    log::info!("Applied fix {} to {}", issue.id, destination.display());
                    results.push(FixResult::applied(
                        &issue.id,
                        rel_path,
                        base_sha,
                        destination.display().to_string(),
                        content.clone(),
                    ));
                    working = content;
                }
                Proposal::Rejected { reason, raw } => {
                    log::warn!("Rejected fix {} for {rel_path}: {reason}", issue.id);
                    results.push(FixResult::rejected(&issue.id, rel_path, base_sha, raw, reason));
                }
            }
        }
        Ok(())
    }
}

fn group_by_file(issues: &[Issue], include_unsuggested: bool) -> Vec<(String, Vec<&Issue>)> {
    let mut groups: Vec<(String, Vec<&Issue>)> = Vec::new();
    for issue in issues {
        if issue.suggested_fix.is_none() && !include_unsuggested {
            continue;
        }
        let path = normalize_rel_path(&issue.file_path);
        match groups.iter_mut().find(|(p, _)| *p == path) {
            Some((_, group)) => group.push(issue),
            None => groups.push((path, vec![issue])),
        }
    }
    groups
}

fn safe_relative(rel_path: &str) -> Option<PathBuf> {
    let path = Path::new(rel_path);
    if rel_path.is_empty() || path.is_absolute() {
        return None;
    }
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        .then(|| path.to_path_buf())
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".codemend.tmp");
    let tmp = path.with_file_name(tmp_name);
    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    if let Err(err) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use codemend_inference::{RetryPolicy, StubBackend};
    use codemend_protocol::{IssueCategory, LineRange, Severity};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    fn issue(path: &str, line: u32, text: &str) -> Issue {
        Issue::new(path, Some(LineRange::single(line)), IssueCategory::Other, Severity::Medium, text)
            .with_suggested_fix("do the obvious thing")
    }

    #[test]
    fn unsafe_paths_are_refused() {
        assert!(safe_relative("../etc/passwd").is_none());
        assert!(safe_relative("/etc/passwd").is_none());
        assert!(safe_relative("src/app.py").is_some());
    }

    #[test]
    fn grouping_keeps_first_seen_order_and_filters_unsuggested() {
        let issues = vec![
            issue("b.py", 1, "first issue in b"),
            issue("a.py", 1, "first issue in a"),
            Issue::new("a.py", None, IssueCategory::Other, Severity::Low, "no fix attached here"),
            issue("b.py", 9, "second issue in b"),
        ];
        let groups = group_by_file(&issues, false);
        let shape: Vec<(&str, usize)> = groups.iter().map(|(p, g)| (p.as_str(), g.len())).collect();
        assert_eq!(shape, vec![("b.py", 2), ("a.py", 1)]);
        assert_eq!(group_by_file(&issues, true)[1].1.len(), 2);
    }

    #[tokio::test]
    async fn fixes_compound_and_original_is_untouched() {
        let project = tempdir().unwrap();
        let out = tempdir().unwrap();
        std::fs::write(project.path().join("count.py"), "a = 1\nb = 2\n").unwrap();

        // Each reply bumps the first number it finds in the prompt's original code.
        let backend = StubBackend::new(|req| {
            let code = req
                .prompt
                .split("ORIGINAL CODE:\n```python\n")
                .nth(1)
                .and_then(|rest| rest.split("```").next())
                .unwrap_or_default()
                .to_string();
            Ok(format!("```python\n{}```", code.replacen("= ", "= 1", 1)))
        });
        let client = InferenceClient::new(Arc::new(backend), policy());
        let applier = FixApplier::new(client, FixConfig::default());
        let issues = vec![issue("count.py", 1, "first bump needed"), issue("count.py", 2, "second bump needed")];

        let results = applier
            .apply_fixes(&issues, project.path(), out.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.applied));
        assert_ne!(results[0].original_sha256, results[1].original_sha256);

        let fixed = std::fs::read_to_string(out.path().join("count.py")).unwrap();
        assert_eq!(fixed, "a = 111\nb = 2\n");
        let original = std::fs::read_to_string(project.path().join("count.py")).unwrap();
        assert_eq!(original, "a = 1\nb = 2\n");
    }

    #[tokio::test]
    async fn rejected_proposals_are_recorded_not_written() {
        let project = tempdir().unwrap();
        let out = tempdir().unwrap();
        std::fs::write(project.path().join("app.js"), "function f() { return 1; }\n").unwrap();

        let backend = StubBackend::fixed("```js\nfunction f() { return 1;\n```");
        let client = InferenceClient::new(Arc::new(backend), policy());
        let applier = FixApplier::new(client, FixConfig::default());
        let results = applier
            .apply_fixes(&[issue("app.js", 1, "returns a constant")], project.path(), out.path(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert!(!results[0].applied);
        assert!(results[0].error.as_deref().unwrap_or_default().contains("unbalanced"));
        assert!(!out.path().join("app.js").exists());
    }

    #[tokio::test]
    async fn write_failure_is_a_rejected_result_and_earlier_fixes_survive() {
        let project = tempdir().unwrap();
        let out = tempdir().unwrap();
        std::fs::write(project.path().join("a.py"), "a = 1\n").unwrap();
        std::fs::write(project.path().join("b.py"), "b = 1\n").unwrap();
        // A non-empty directory where b.py's fixed copy should land.
        std::fs::create_dir_all(out.path().join("b.py/x")).unwrap();

        let backend = StubBackend::new(|req| {
            let code = req
                .prompt
                .split("ORIGINAL CODE:\n```python\n")
                .nth(1)
                .and_then(|rest| rest.split("```").next())
                .unwrap_or_default()
                .to_string();
            Ok(format!("```python\n{}```", code.replace("= 1", "= 2")))
        });
        let client = InferenceClient::new(Arc::new(backend), policy());
        let applier = FixApplier::new(client, FixConfig::default());
        let issues = vec![issue("a.py", 1, "value should be two"), issue("b.py", 1, "value should be two")];

        let results = applier
            .apply_fixes(&issues, project.path(), out.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].applied);
        assert_eq!(results[0].file_path, "a.py");
        assert!(!results[1].applied);
        assert_eq!(results[1].file_path, "b.py");
        assert!(results[1].error.as_deref().unwrap_or_default().starts_with("write failed"));
        assert_eq!(results[1].proposed_content.as_deref(), Some("b = 2\n"));

        assert_eq!(std::fs::read_to_string(out.path().join("a.py")).unwrap(), "a = 2\n");
        assert!(out.path().join("b.py").is_dir());
        assert!(!out.path().join("b.py.codemend.tmp").exists());
    }

    #[tokio::test]
    async fn output_dir_must_differ_from_target() {
        let project = tempdir().unwrap();
        let client = InferenceClient::new(Arc::new(StubBackend::fixed("x")), policy());
        let applier = FixApplier::new(client, FixConfig::default());
        let err = applier
            .apply_fixes(&[], project.path(), project.path(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FixError::OutputIsTarget(_)));
    }
}
