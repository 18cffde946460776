//! Line-level view of a unified-diff patch.
//!
//! GitHub returns per-file patches as bare hunks (`@@ -a,b +c,d @@ ctx`)
//! without the `diff --git` / `---` / `+++` preamble, but full diffs are
//! accepted too: file headers are skipped rather than counted as changes.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static HUNK_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@ ?(.*)$").expect("valid hunk regex")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("malformed hunk header at line {line}: {text}")]
    MalformedHunk { line: usize, text: String },
}

/// Added and removed lines of a patch, with the `+`/`-` marker stripped.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PatchLines<'a> {
    pub added: Vec<&'a str>,
    pub removed: Vec<&'a str>,
    /// Trailing context of each hunk header (often the enclosing function).
    pub hunk_contexts: Vec<&'a str>,
}

/// Split a patch into added/removed lines.
///
/// Fails only when a line starts with `@@` but is not a valid hunk header.
pub fn split_patch(patch: &str) -> Result<PatchLines<'_>, PatchError> {
    let mut lines = PatchLines::default();

    for (i, line) in patch.lines().enumerate() {
        if line.starts_with("@@") {
            let caps = HUNK_HEADER
                .captures(line)
                .ok_or_else(|| PatchError::MalformedHunk {
                    line: i + 1,
                    text: line.chars().take(80).collect(),
                })?;
            if let Some(ctx) = caps.get(5) {
                let ctx = ctx.as_str().trim();
                if !ctx.is_empty() {
                    lines.hunk_contexts.push(ctx);
                }
            }
        } else if is_file_header(line) {
            continue;
        } else if let Some(rest) = line.strip_prefix('+') {
            lines.added.push(rest);
        } else if let Some(rest) = line.strip_prefix('-') {
            lines.removed.push(rest);
        }
    }

    Ok(lines)
}

fn is_file_header(line: &str) -> bool {
    ["--- a/", "+++ b/", "--- /dev/null", "+++ /dev/null"]
        .iter()
        .any(|prefix| line.starts_with(prefix))
}
