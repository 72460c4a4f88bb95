//! Extraction of per-file patches from raw assistant text.
//!
//! Assistant replies are messy: a single message can interleave prose,
//! multiple unified diffs, and markdown fences, and the headers inside may
//! carry quoting, `a/`/`b/` prefixes, or trailing timestamp metadata. This
//! module scans such text and yields one self-consistent [`DiffPatch`] per
//! file, skipping (and logging) anything it cannot confidently parse.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};

use crate::patch::{DiffPatch, NULL_DEVICE};

/// A line that can start a new file's patch inside a multi-file chunk.
static FILE_HEADER_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(?:--- (?:"?a/|/dev/null)|diff --git )"#).expect("valid regex")
});

/// Hunk marker: `@@ -l[,c] +l[,c] @@` with optional trailing section text.
static HUNK_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@@ -\d+(?:,\d+)? \+\d+(?:,\d+)? @@").expect("valid regex"));

/// Scan raw assistant text and extract every per-file patch it contains.
///
/// Never fails: chunks without a recoverable file path are omitted from the
/// result and reported through `tracing`. When the text contains fenced
/// ```` ```diff ````/```` ```patch ```` blocks, only their contents are
/// scanned; otherwise the whole text is treated as candidate diff material.
pub fn extract(raw_text: &str) -> Vec<DiffPatch> {
    let text = raw_text.replace("\r\n", "\n");

    let regions = fenced_diff_regions(&text);
    let mut patches = Vec::new();
    if regions.is_empty() {
        collect_patches(&text, &mut patches);
    } else {
        for region in &regions {
            collect_patches(region, &mut patches);
        }
    }
    debug!("extracted {} patch(es) from assistant text", patches.len());
    patches
}

/// Find the contents of fenced blocks tagged `diff` or `patch`.
///
/// Single forward pass with a stack of open fences, so each bare closing
/// fence pairs with the most recent (innermost) compatible opening one.
/// Handles multiple sequential fenced blocks without mismatched nesting.
fn fenced_diff_regions(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut regions = Vec::new();
    // Line index just after each yet-unclosed opening fence
    let mut open: Vec<usize> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();
        let Some(tag) = trimmed.strip_prefix("```") else {
            continue;
        };
        let tag = tag.trim().to_ascii_lowercase();
        if tag == "diff" || tag == "patch" {
            open.push(i + 1);
        } else if tag.is_empty() {
            if let Some(start) = open.pop() {
                if start <= i {
                    regions.push(lines[start..i].join("\n"));
                }
            }
        }
    }
    regions
}

/// Split candidate text into per-file chunks and turn each into a patch.
fn collect_patches(text: &str, patches: &mut Vec<DiffPatch>) {
    for chunk in split_file_chunks(text) {
        if let Some(patch) = build_patch(&chunk) {
            patches.push(patch);
        }
    }
}

/// Split diff text into chunks, one per file.
///
/// A new chunk begins at a file-header-start line only once the chunk
/// accumulated so far already holds both a `--- ` and a `+++ ` header; this
/// is what distinguishes "start of the next file's patch" from a context
/// line that happens to begin with the same characters.
fn split_file_chunks(text: &str) -> Vec<Vec<&str>> {
    let mut chunks: Vec<Vec<&str>> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut has_from = false;
    let mut has_to = false;

    for line in text.split('\n') {
        if has_from && has_to && FILE_HEADER_START.is_match(line) {
            chunks.push(std::mem::take(&mut current));
            has_from = false;
            has_to = false;
        }
        if line.starts_with("--- ") {
            has_from = true;
        } else if line.starts_with("+++ ") {
            has_to = true;
        }
        current.push(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Turn one chunk of lines into a [`DiffPatch`], or `None` if the chunk has
/// no usable file path or no patch body.
fn build_patch(lines: &[&str]) -> Option<DiffPatch> {
    let mut git_paths: Option<(String, String)> = None;
    let mut minus_path: Option<String> = None;
    let mut plus_path: Option<String> = None;

    for line in lines {
        if git_paths.is_none() {
            if let Some(paths) = parse_diff_git_line(line) {
                git_paths = Some(paths);
                continue;
            }
        }
        if minus_path.is_none() {
            if let Some(rest) = line.strip_prefix("--- ") {
                minus_path = Some(clean_header_path(rest));
                continue;
            }
        }
        if plus_path.is_none() {
            if let Some(rest) = line.strip_prefix("+++ ") {
                plus_path = Some(clean_header_path(rest));
            }
        }
    }

    let from_path = git_paths.as_ref().map(|(f, _)| f.clone()).or(minus_path);
    let to_path = git_paths.map(|(_, t)| t).or(plus_path);

    let file_path = match (&from_path, &to_path) {
        (Some(f), _) if f != NULL_DEVICE => f.clone(),
        (_, Some(t)) if t != NULL_DEVICE => t.clone(),
        _ => {
            info!("skipping diff chunk without a usable file path");
            return None;
        }
    };

    // A rename keeps the applier pointed at the on-disk (original) path;
    // the destination travels separately.
    let new_file_path = match (&from_path, &to_path) {
        (Some(f), Some(t))
            if f != NULL_DEVICE && t != NULL_DEVICE && f != t && *f == file_path =>
        {
            Some(t.clone())
        }
        _ => None,
    };

    let body = locate_body(lines, &file_path)?;
    let rename_from = new_file_path.as_ref().map(|_| file_path.as_str());

    let mut body: Vec<String> = normalize_body_headers(&body, rename_from);
    while body.last().is_some_and(|l| l.trim().is_empty()) {
        body.pop();
    }
    if body.is_empty() {
        info!("skipping diff chunk for {file_path} with an empty body");
        return None;
    }

    debug!("extracted patch for {file_path}");
    Some(DiffPatch {
        file_path,
        content: body.join("\n") + "\n",
        new_file_path,
    })
}

/// Locate the actual patch body inside a chunk.
///
/// Prefers the `--- ` header line (pulling in an immediately preceding
/// `diff --git` line); a headerless chunk that still carries a hunk marker
/// gets minimal headers synthesized ahead of the hunk content.
fn locate_body(lines: &[&str], file_path: &str) -> Option<Vec<String>> {
    let minus_idx = lines.iter().position(|l| l.starts_with("--- "));
    let has_plus = lines.iter().any(|l| l.starts_with("+++ "));

    if let (Some(idx), true) = (minus_idx, has_plus) {
        let start = if idx > 0 && lines[idx - 1].starts_with("diff --git ") {
            idx - 1
        } else {
            idx
        };
        return Some(lines[start..].iter().map(|l| l.to_string()).collect());
    }

    let hunk_idx = lines.iter().position(|l| HUNK_HEADER.is_match(l));
    match hunk_idx {
        Some(idx) => {
            let mut body = vec![format!("--- a/{file_path}"), format!("+++ b/{file_path}")];
            body.extend(lines[idx..].iter().map(|l| l.to_string()));
            Some(body)
        }
        None => {
            info!("skipping diff chunk for {file_path} with no headers and no hunks");
            None
        }
    }
}

/// Rewrite the header lines ahead of the first hunk into canonical form,
/// reapplying the quote/prefix/metadata stripping so the emitted patch is
/// self-consistent regardless of the assistant's formatting quirks. For a
/// rename, `rename_from` points the `+++` side back at the original path.
fn normalize_body_headers(body: &[String], rename_from: Option<&str>) -> Vec<String> {
    let first_hunk = body
        .iter()
        .position(|l| l.starts_with("@@"))
        .unwrap_or(body.len());

    body.iter()
        .enumerate()
        .map(|(i, line)| {
            if i >= first_hunk {
                return line.clone();
            }
            if let Some((from, to)) = parse_diff_git_line(line) {
                return format!("diff --git a/{from} b/{to}");
            }
            if let Some(rest) = line.strip_prefix("--- ") {
                let path = clean_header_path(rest);
                return if path == NULL_DEVICE {
                    format!("--- {NULL_DEVICE}")
                } else {
                    format!("--- a/{path}")
                };
            }
            if let Some(rest) = line.strip_prefix("+++ ") {
                let path = match rename_from {
                    Some(original) => original.to_string(),
                    None => clean_header_path(rest),
                };
                return if path == NULL_DEVICE {
                    format!("+++ {NULL_DEVICE}")
                } else {
                    format!("+++ b/{path}")
                };
            }
            line.clone()
        })
        .collect()
}

/// Parse `diff --git a/X b/Y` (with optionally quoted paths) into cleaned
/// `(from, to)` paths.
fn parse_diff_git_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("diff --git ")?;
    let (from_raw, rest) = take_path_token(rest)?;
    let (to_raw, _) = take_path_token(rest.trim_start())?;
    if from_raw.is_empty() || to_raw.is_empty() {
        return None;
    }
    Some((clean_header_path(from_raw), clean_header_path(to_raw)))
}

/// Take one (possibly quoted) path token off the front of `s`.
fn take_path_token(s: &str) -> Option<(&str, &str)> {
    if let Some(inner) = s.strip_prefix('"') {
        let end = inner.find('"')?;
        Some((&inner[..end], &inner[end + 1..]))
    } else if s.is_empty() {
        None
    } else {
        match s.find(' ') {
            Some(i) => Some((&s[..i], &s[i..])),
            None => Some((s, "")),
        }
    }
}

/// Strip quotes, `a/`/`b/` prefixes, and tab-separated trailing metadata
/// (timestamps and the like) from a header path. The null-device marker is
/// preserved verbatim so new/delete classification stays possible.
fn clean_header_path(raw: &str) -> String {
    let mut s = raw.trim();
    if let Some(i) = s.find('\t') {
        s = s[..i].trim();
    }
    let s = if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        &s[1..s.len() - 1]
    } else {
        s
    };
    if s == NULL_DEVICE {
        return s.to_string();
    }
    s.strip_prefix("a/")
        .or_else(|| s.strip_prefix("b/"))
        .unwrap_or(s)
        .to_string()
}
