//! Extracting a proposed file from a fix reply and deciding whether it is usable.

use codemend_chunker::Language;

/// Proposed replacement content, computed against the working text of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proposal {
    Content(String),
    Rejected { reason: String, raw: Option<String> },
}

pub fn extract_proposal(reply: &str, working: &str, language: Language) -> Proposal {
    let reply = reply.trim();
    if reply.is_empty() {
        return Proposal::Rejected {
            reason: "empty fix output".to_string(),
            raw: None,
        };
    }

    let candidate = if let Some(diff) = diff_text(reply) {
        match apply_unified_diff(working, &diff) {
            Ok(content) => content,
            Err(reason) => {
                return Proposal::Rejected {
                    reason: format!("diff does not apply: {reason}"),
                    raw: Some(diff),
                }
            }
        }
    } else if let Some(block) = largest_code_block(reply) {
        block
    } else {
        reply.to_string()
    };

    match check_proposal(working, &candidate, language) {
        Ok(()) => Proposal::Content(with_trailing_newline(working, candidate)),
        Err(reason) => Proposal::Rejected {
            reason,
            raw: Some(candidate),
        },
    }
}

fn with_trailing_newline(working: &str, mut candidate: String) -> String {
    if working.ends_with('\n') && !candidate.ends_with('\n') {
        candidate.push('\n');
    }
    candidate
}

/// Sanity checks run before anything is written.
pub fn check_proposal(original: &str, proposed: &str, language: Language) -> Result<(), String> {
    if proposed.trim().is_empty() {
        return Err("empty fix output".to_string());
    }
    if same_text(original, proposed) {
        return Err("fix output is identical to the input".to_string());
    }
    if checks_delimiters(language)
        && delimiters_balanced(original, language)
        && !delimiters_balanced(proposed, language)
    {
        return Err("fix output has unbalanced delimiters".to_string());
    }
    Ok(())
}

fn same_text(a: &str, b: &str) -> bool {
    let a: Vec<&str> = a.trim_end().lines().map(str::trim_end).collect();
    let b: Vec<&str> = b.trim_end().lines().map(str::trim_end).collect();
    a == b
}

fn checks_delimiters(language: Language) -> bool {
    language.uses_brace_delimiters() || language == Language::Python
}

/// Bracket balance outside string literals and comments.
pub fn delimiters_balanced(text: &str, language: Language) -> bool {
    let hash_comments = matches!(
        language,
        Language::Python | Language::Ruby | Language::Bash | Language::Yaml | Language::Toml
    );
    let mut stack: Vec<char> = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\'' if language == Language::Rust => {
                // Char literal or lifetime; only `'x'` and `'\n'` forms are skipped.
                let mut ahead = chars.clone();
                match (ahead.next(), ahead.next()) {
                    (Some('\\'), _) => {
                        chars.next();
                        chars.next();
                        for inner in chars.by_ref() {
                            if inner == '\'' {
                                break;
                            }
                        }
                    }
                    (Some(_), Some('\'')) => {
                        chars.next();
                        chars.next();
                    }
                    _ => {}
                }
            }
            '"' | '\'' | '`' => {
                let quote = ch;
                while let Some(inner) = chars.next() {
                    if inner == '\\' {
                        chars.next();
                    } else if inner == quote || (inner == '\n' && quote != '`') {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for inner in chars.by_ref() {
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
            }
            '#' if hash_comments => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
            }
            '(' | '[' | '{' => stack.push(ch),
            ')' | ']' | '}' => {
                let open = match ch {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(open) {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty()
}

/// Largest fenced block; replies sometimes quote a small snippet before the full file.
pub fn largest_code_block(reply: &str) -> Option<String> {
    let mut best: Option<String> = None;
    let mut current: Option<Vec<&str>> = None;
    for line in reply.lines() {
        if line.trim_start().starts_with("```") {
            match current.take() {
                Some(lines) => {
                    let block = lines.join("\n");
                    if best.as_ref().map_or(true, |b| block.len() > b.len()) {
                        best = Some(block);
                    }
                }
                None => current = Some(Vec::new()),
            }
        } else if let Some(lines) = current.as_mut() {
            lines.push(line);
        }
    }
    best.filter(|b| !b.trim().is_empty())
}

fn diff_text(reply: &str) -> Option<String> {
    let body = fenced_diff(reply).unwrap_or_else(|| reply.to_string());
    let has_hunk = body.lines().any(|l| l.starts_with("@@ "));
    let has_headers = body.lines().any(|l| l.starts_with("--- ")) && body.lines().any(|l| l.starts_with("+++ "));
    (has_hunk && has_headers).then_some(body)
}

fn fenced_diff(reply: &str) -> Option<String> {
    let mut lines = reply.lines();
    while let Some(line) = lines.next() {
        let tag = line.trim_start();
        if tag.starts_with("```diff") || tag.starts_with("```patch") {
            let block: Vec<&str> = lines
                .by_ref()
                .take_while(|l| !l.trim_start().starts_with("```"))
                .collect();
            return Some(block.join("\n"));
        }
    }
    None
}

#[derive(Debug)]
struct Hunk<'d> {
    old_start: usize,
    lines: Vec<(char, &'d str)>,
}

fn parse_hunk_header(line: &str) -> Option<usize> {
    // @@ -12,5 +12,6 @@
    let rest = line.strip_prefix("@@ -")?;
    let old = rest.split_whitespace().next()?;
    old.split(',').next()?.parse().ok()
}

fn parse_hunks(diff: &str) -> Result<Vec<Hunk<'_>>, String> {
    let mut hunks: Vec<Hunk<'_>> = Vec::new();
    for line in diff.lines() {
        if line.starts_with("@@") {
            let old_start = parse_hunk_header(line)
                .ok_or_else(|| format!("malformed hunk header `{line}`"))?;
            hunks.push(Hunk {
                old_start,
                lines: Vec::new(),
            });
            continue;
        }
        let Some(hunk) = hunks.last_mut() else {
            continue;
        };
        if line.starts_with("--- ") || line.starts_with("+++ ") || line.starts_with('\\') {
            continue;
        }
        match line.chars().next() {
            Some(kind @ (' ' | '-' | '+')) => hunk.lines.push((kind, &line[1..])),
            None => hunk.lines.push((' ', "")),
            Some(_) => return Err(format!("unexpected diff line `{line}`")),
        }
    }
    if hunks.is_empty() {
        return Err("no hunks".to_string());
    }
    Ok(hunks)
}

fn block_matches(original: &[&str], at: usize, block: &[&str]) -> bool {
    at + block.len() <= original.len()
        && original[at..at + block.len()]
            .iter()
            .zip(block)
            .all(|(a, b)| a.trim_end() == b.trim_end())
}

/// Apply a unified diff to `original`. Hunks are located by their header line first and by
/// searching forward for their context when the header is off.
pub fn apply_unified_diff(original: &str, diff: &str) -> Result<String, String> {
    let source: Vec<&str> = original.lines().collect();
    let hunks = parse_hunks(diff)?;
    let mut out: Vec<&str> = Vec::with_capacity(source.len());
    let mut cursor = 0usize;

    for hunk in &hunks {
        let old: Vec<&str> = hunk
            .lines
            .iter()
            .filter(|(kind, _)| *kind != '+')
            .map(|(_, text)| *text)
            .collect();
        let hinted = hunk.old_start.saturating_sub(1).min(source.len());
        let at = if hinted >= cursor && block_matches(&source, hinted, &old) {
            hinted
        } else {
            (cursor..=source.len())
                .find(|at| block_matches(&source, *at, &old))
                .ok_or_else(|| format!("context for hunk at line {} not found", hunk.old_start))?
        };

        out.extend_from_slice(&source[cursor..at]);
        out.extend(
            hunk.lines
                .iter()
                .filter(|(kind, _)| *kind != '-')
                .map(|(_, text)| *text),
        );
        cursor = at + old.len();
    }
    out.extend_from_slice(&source[cursor..]);

    let mut text = out.join("\n");
    if original.ends_with('\n') {
        text.push('\n');
    }
    Ok(text)
}
