//! Offline heuristic reviewer behind `CODEMEND_INFERENCE_MODE=stub`.
//!
//! Answers analysis prompts with JSON issues found by a handful of line rules and fix
//! prompts with the file rewritten to read credentials from the environment. Output is
//! a pure function of the prompt.

use codemend_inference::{GenerateRequest, StubBackend};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

pub const MODE_ENV: &str = "CODEMEND_INFERENCE_MODE";

static CREDENTIAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)^(\s*)([a-z_]*(?:password|passwd|secret|api_key|token)[a-z_]*)\s*=\s*['"][^'"]+['"]"#)
        .expect("valid credential pattern")
});
static BARE_EXCEPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*except\s*:\s*$").expect("valid except pattern"));
static EVAL_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\beval\s*\(").expect("valid eval pattern"));
static DEBUG_LOG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bconsole\.log\s*\(").expect("valid console pattern"));

pub fn stub_mode_enabled() -> bool {
    std::env::var(MODE_ENV)
        .map(|v| v.eq_ignore_ascii_case("stub"))
        .unwrap_or(false)
}

pub fn heuristic_backend() -> StubBackend {
    StubBackend::new(|request| Ok(respond(request)))
        .with_models(&["stub-reviewer:latest"])
}

pub fn respond(request: &GenerateRequest) -> String {
    match fix_target(&request.prompt) {
        Some((language, code)) => fixed_file(language, code),
        None => review(&request.prompt),
    }
}

fn review(prompt: &str) -> String {
    let mut issues: Vec<Value> = Vec::new();
    let mut file: Option<&str> = None;
    for line in prompt.lines() {
        if let Some(rest) = line.strip_prefix("### FILE: ") {
            file = Some(rest.split(" (lines").next().unwrap_or(rest).trim());
            continue;
        }
        let (Some(file), Some((number, code))) = (file, line.split_once(" | ")) else {
            continue;
        };
        let Ok(number) = number.trim().parse::<u32>() else {
            continue;
        };

        if CREDENTIAL.is_match(code) {
            issues.push(json!({
                "file": file,
                "line": number,
                "category": "security",
                "severity": "critical",
                "description": "Hard-coded credential committed to source control",
                "suggested_fix": "Read the value from an environment variable instead",
            }));
        }
        if BARE_EXCEPT.is_match(code) {
            issues.push(json!({
                "file": file,
                "line": number,
                "category": "error-handling",
                "severity": "high",
                "description": "Bare except clause swallows every exception",
                "suggested_fix": "Catch the specific exception types and log the failure",
            }));
        }
        if EVAL_CALL.is_match(code) {
            issues.push(json!({
                "file": file,
                "line": number,
                "category": "security",
                "severity": "high",
                "description": "eval() executes arbitrary code from its argument",
            }));
        }
        if DEBUG_LOG.is_match(code) {
            issues.push(json!({
                "file": file,
                "line": number,
                "category": "other",
                "severity": "low",
                "description": "Debug logging left in production code",
            }));
        }
    }
    json!({ "issues": issues }).to_string()
}

/// Language tag and original code of a fix prompt.
fn fix_target(prompt: &str) -> Option<(&str, &str)> {
    let rest = prompt.split_once("ORIGINAL CODE:\n```")?.1;
    let (language, body) = rest.split_once('\n')?;
    let end = body.rfind("```\n\nFIXED CODE:")?;
    Some((language.trim(), &body[..end]))
}

fn fixed_file(language: &str, code: &str) -> String {
    let mut out = String::new();
    let mut changed = false;
    for line in code.lines() {
        match CREDENTIAL.captures(line) {
            Some(caps) if language == "python" => {
                let name = &caps[2];
                out.push_str(&format!(
                    "{}{name} = os.environ[\"{}\"]",
                    &caps[1],
                    name.to_uppercase()
                ));
                changed = true;
            }
            _ => out.push_str(line),
        }
        out.push('\n');
    }
    if changed && !code.lines().any(|l| l.trim() == "import os") {
        out.insert_str(0, "import os\n");
    }
    format!("```{language}\n{out}```")
}
