//! Application of one extracted patch to one original file's content.
//!
//! The patch body is folded into search/replace blocks, each block is
//! located in the original content by sliding a whitespace-tolerant window
//! forward from a cursor, and the resolved blocks are spliced bottom-up so
//! earlier positions never shift underneath later splices. Any failure
//! aborts the whole call; a half-patched file is never returned.

use tracing::debug;

use crate::error::{PatchError, Result};

/// Placeholder substituted for wholly-blank lines during comparison, so
/// blank-line handling is uniform regardless of stray whitespace. Contains
/// NULs so no normalized content line can collide with it.
const BLANK_LINE_TOKEN: &str = "\u{0}blank\u{0}";

/// One contiguous edit operation parsed out of the patch body.
#[derive(Debug, Clone, Default)]
struct SearchBlock {
    /// Normalized lines expected to exist in the original at the match point
    search_lines: Vec<String>,
    /// Lines to emit in their place
    replace_lines: Vec<ReplaceLine>,
    /// Whether the block holds a real change (a block of pure reused
    /// context is discarded)
    has_change: bool,
}

#[derive(Debug, Clone)]
struct ReplaceLine {
    /// Literal line body to emit when `search_index` is unset
    content: String,
    /// When set, emit the original (un-normalized) file line at
    /// `start + search_index` instead of `content`. Matching is
    /// whitespace-fuzzy; this is what keeps reused context lines
    /// byte-identical to the original.
    search_index: Option<usize>,
}

/// Resolved position of a block in the original line sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockStart {
    /// Insert at the very top, consuming no original content. Only legal
    /// for an empty search block before anything else has matched.
    Top,
    At(usize),
}

#[derive(Debug)]
struct ResolvedBlock {
    block: SearchBlock,
    start: BlockStart,
}

/// Apply a unified-diff patch body to `original`, returning the new file
/// content.
///
/// With `strict_whitespace` false (the default in the host tool), context
/// and deletion lines match the original ignoring all internal whitespace;
/// with it true, lines must match exactly. Either way, reused context is
/// emitted from the original file, never from the patch, so matching
/// tolerance can not reformat untouched lines.
pub fn apply(original: &str, patch: &str, strict_whitespace: bool) -> Result<String> {
    let original = original.replace("\r\n", "\n");
    let patch = patch.replace("\r\n", "\n");

    let original_lines: Vec<&str> = original.split('\n').collect();
    let normalized: Vec<String> = original_lines
        .iter()
        .map(|l| normalize_line(l, strict_whitespace))
        .collect();

    let blocks = parse_blocks(&patch, strict_whitespace);
    debug!("applying {} search/replace block(s)", blocks.len());
    let resolved = resolve_blocks(blocks, &normalized)?;
    Ok(splice_blocks(&original_lines, resolved))
}

/// Normalize one line for comparison: wholly-blank lines become the blank
/// sentinel; otherwise internal whitespace is stripped unless matching is
/// strict.
fn normalize_line(line: &str, strict: bool) -> String {
    if line.trim().is_empty() {
        BLANK_LINE_TOKEN.to_string()
    } else if strict {
        line.to_string()
    } else {
        line.chars().filter(|c| !c.is_whitespace()).collect()
    }
}

fn is_file_header(line: &str) -> bool {
    line.starts_with("diff --git ")
        || line.starts_with("index ")
        || line.starts_with("--- ")
        || line.starts_with("+++ ")
        || line == "---"
        || line == "+++"
}

/// Fold the patch lines into search/replace blocks.
///
/// Three line kinds drive the accumulation: hunk headers flush the current
/// block; additions extend `replace_lines`; deletion/context lines extend
/// `search_lines` (flushing first when the previous line was an addition,
/// which is what separates consecutive independent edits not split by a
/// hunk header). Context lines also get a `ReplaceLine` pointing back at
/// their own search position so the original formatting round-trips.
fn parse_blocks(patch: &str, strict: bool) -> Vec<SearchBlock> {
    let mut blocks: Vec<SearchBlock> = Vec::new();
    let mut current = SearchBlock::default();
    let mut last_was_addition = false;

    for line in patch.split('\n') {
        if is_file_header(line) {
            continue;
        }
        if line.starts_with("@@") {
            flush_block(&mut blocks, &mut current);
            last_was_addition = false;
            continue;
        }
        if let Some(added) = line.strip_prefix('+') {
            current.replace_lines.push(ReplaceLine {
                content: added.to_string(),
                search_index: None,
            });
            current.has_change = true;
            last_was_addition = true;
            continue;
        }

        // Deletion or context
        if last_was_addition {
            flush_block(&mut blocks, &mut current);
            last_was_addition = false;
        }
        if let Some(removed) = line.strip_prefix('-') {
            current.search_lines.push(normalize_line(removed, strict));
            current.has_change = true;
        } else {
            let text = line.strip_prefix(' ').unwrap_or(line);
            current.search_lines.push(normalize_line(text, strict));
            current.replace_lines.push(ReplaceLine {
                content: text.to_string(),
                search_index: Some(current.search_lines.len() - 1),
            });
        }
    }
    // The final flush also disposes of the degenerate trailing block a
    // patch's own trailing newline produces (a lone blank-sentinel search
    // with no change in it).
    flush_block(&mut blocks, &mut current);
    blocks
}

fn flush_block(blocks: &mut Vec<SearchBlock>, current: &mut SearchBlock) {
    let block = std::mem::take(current);
    if block.has_change {
        blocks.push(block);
    }
}

/// Resolve each block's match position, in document order.
///
/// A cursor starts at line 0 and only ever moves forward: each block takes
/// the first window at or after the cursor whose normalized lines equal its
/// search lines, then the cursor advances past that window. A block with no
/// window left is `SearchBlockNotFound`; an empty search block after the
/// cursor has moved demands the synthetic top position behind the cursor,
/// which is an `OrderingViolation`.
fn resolve_blocks(
    blocks: Vec<SearchBlock>,
    normalized_original: &[String],
) -> Result<Vec<ResolvedBlock>> {
    let mut resolved = Vec::with_capacity(blocks.len());
    let mut cursor = 0usize;
    let mut any_matched = false;

    for block in blocks {
        if block.search_lines.is_empty() {
            if any_matched || cursor != 0 {
                return Err(PatchError::OrderingViolation { found: 0, cursor });
            }
            any_matched = true;
            resolved.push(ResolvedBlock {
                block,
                start: BlockStart::Top,
            });
            continue;
        }

        let len = block.search_lines.len();
        let mut found = None;
        if normalized_original.len() >= len {
            for i in cursor..=normalized_original.len() - len {
                if normalized_original[i..i + len] == block.search_lines[..] {
                    found = Some(i);
                    break;
                }
            }
        }
        match found {
            Some(i) => {
                cursor = i + len;
                any_matched = true;
                resolved.push(ResolvedBlock {
                    block,
                    start: BlockStart::At(i),
                });
            }
            None => {
                return Err(PatchError::SearchBlockNotFound {
                    expected: display_search_lines(&block.search_lines),
                });
            }
        }
    }
    Ok(resolved)
}

/// Render search lines for diagnostics, mapping the blank sentinel back to
/// an empty line.
fn display_search_lines(search_lines: &[String]) -> String {
    search_lines
        .iter()
        .map(|l| if l == BLANK_LINE_TOKEN { "" } else { l.as_str() })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Splice the resolved blocks into a working copy of the original lines,
/// bottom-up, so each splice leaves the positions of earlier blocks intact.
fn splice_blocks(original_lines: &[&str], resolved: Vec<ResolvedBlock>) -> String {
    let mut lines: Vec<String> = original_lines.iter().map(|l| (*l).to_string()).collect();

    let mut ordered = resolved;
    // Top sorts below position 0 so a prepend splices last and lands at
    // the very top.
    ordered.sort_by_key(|r| {
        std::cmp::Reverse(match r.start {
            BlockStart::Top => -1i64,
            BlockStart::At(i) => i as i64,
        })
    });

    for r in ordered {
        let (start, consumed) = match r.start {
            BlockStart::Top => (0, 0),
            BlockStart::At(i) => (i, r.block.search_lines.len()),
        };
        let replacement: Vec<String> = r
            .block
            .replace_lines
            .iter()
            .map(|rl| match rl.search_index {
                Some(si) => original_lines
                    .get(start + si)
                    .map(|l| (*l).to_string())
                    .unwrap_or_else(|| rl.content.clone()),
                None => rl.content.clone(),
            })
            .collect();
        lines.splice(start..start + consumed, replacement);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_delete_and_insert() {
        let original = "line1\nline2\nline3\n";
        let patch = "--- a/f.txt\n+++ b/f.txt\n@@ -1,3 +1,4 @@\n line1\n-line2\n+lineX\n+lineY\n line3\n";
        let result = apply(original, patch, false).unwrap();
        assert_eq!(result, "line1\nlineX\nlineY\nline3\n");
    }

    #[test]
    fn test_apply_multiple_hunks() {
        let original = "fn first() {\n    let x = 1;\n}\nfn second() {\n    let y = 3;\n}\n";
        let patch = "--- a/f.rs\n+++ b/f.rs\n@@ -1,3 +1,3 @@\n fn first() {\n-    let x = 1;\n+    let x = 2;\n }\n@@ -4,3 +4,3 @@\n fn second() {\n-    let y = 3;\n+    let y = 4;\n }\n";
        let result = apply(original, patch, false).unwrap();
        assert_eq!(
            result,
            "fn first() {\n    let x = 2;\n}\nfn second() {\n    let y = 4;\n}\n"
        );
    }

    #[test]
    fn test_apply_no_match_is_error() {
        let original = "alpha\nbeta\n";
        let patch = "@@ -1 +1 @@\n-gamma\n+delta\n";
        match apply(original, patch, false) {
            Err(PatchError::SearchBlockNotFound { expected }) => {
                assert!(expected.contains("gamma"));
            }
            other => panic!("Expected SearchBlockNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_apply_whitespace_tolerant_by_default() {
        // The patch's context and deletion lines carry different
        // indentation than the file; content-only matching still finds them
        let original = "fn main() {\n        do_it( a, b );\n}\n";
        let patch = "@@ -1,3 +1,3 @@\n fn main() {\n-    do_it(a, b);\n+    do_other(a, b);\n }\n";
        let result = apply(original, patch, false).unwrap();
        assert_eq!(result, "fn main() {\n    do_other(a, b);\n}\n");
    }

    #[test]
    fn test_apply_strict_whitespace_rejects_mismatch() {
        let original = "fn main() {\n        do_it( a, b );\n}\n";
        let patch = "@@ -1,3 +1,3 @@\n fn main() {\n-    do_it(a, b);\n+    do_other(a, b);\n }\n";
        match apply(original, patch, true) {
            Err(PatchError::SearchBlockNotFound { .. }) => {}
            other => panic!("Expected SearchBlockNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_apply_strict_whitespace_accepts_exact() {
        let original = "fn main() {\n    do_it(a, b);\n}\n";
        let patch = "@@ -1,3 +1,3 @@\n fn main() {\n-    do_it(a, b);\n+    do_other(a, b);\n }\n";
        let result = apply(original, patch, true).unwrap();
        assert_eq!(result, "fn main() {\n    do_other(a, b);\n}\n");
    }

    #[test]
    fn test_context_lines_keep_original_formatting() {
        // Context in the patch is reformatted relative to the file; the
        // output must reuse the file's bytes for those lines, not the
        // patch's.
        let original = "\tweird\t spacing \nmiddle\nend\n";
        let patch = "@@ -1,3 +1,3 @@\n weird spacing\n-middle\n+MIDDLE\n end\n";
        let result = apply(original, patch, false).unwrap();
        assert_eq!(result, "\tweird\t spacing \nMIDDLE\nend\n");
    }

    #[test]
    fn test_blank_line_round_trips_byte_identical() {
        // The "blank" middle line actually holds two spaces; reproducing it
        // through search_index keeps those bytes.
        let original = "a\n  \nb\n";
        let patch = "@@ -1,3 +1,4 @@\n a\n \n+new\n b\n";
        let result = apply(original, patch, false).unwrap();
        assert_eq!(result, "a\n  \nnew\nb\n");
    }

    #[test]
    fn test_apply_is_idempotent_for_identical_search_replace() {
        let original = "one\ntwo\nthree\n";
        let patch = "@@ -2 +2 @@\n-two\n+two\n";
        let result = apply(original, patch, false).unwrap();
        assert_eq!(result, original);
    }

    #[test]
    fn test_cursor_matches_repeated_content_in_order() {
        // Both blocks search for "beta"; the cursor ensures the first block
        // takes the first occurrence and the second block the later one.
        let original = "alpha\nbeta\ngamma\nbeta\n";
        let patch = "@@ -2 +2 @@\n-beta\n+BETA\n@@ -4 +4 @@\n-beta\n+beta2\n";
        let result = apply(original, patch, false).unwrap();
        assert_eq!(result, "alpha\nBETA\ngamma\nbeta2\n");
    }

    #[test]
    fn test_out_of_order_blocks_are_rejected() {
        // The second block's content only occurs before the first block's
        // match; applying it there would violate document order.
        let original = "early\nlate\n";
        let patch = "@@ -2 +2 @@\n-late\n+LATE\n@@ -1 +1 @@\n-early\n+EARLY\n";
        match apply(original, patch, false) {
            Err(PatchError::SearchBlockNotFound { expected }) => {
                assert!(expected.contains("early"));
            }
            other => panic!("Expected SearchBlockNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_pure_insertion_prepends() {
        let original = "existing\n";
        let patch = "--- a/f\n+++ b/f\n@@ -0,0 +1,2 @@\n+hello\n+world\n";
        let result = apply(original, patch, false).unwrap();
        assert_eq!(result, "hello\nworld\nexisting\n");
    }

    #[test]
    fn test_create_file_from_empty_original() {
        let original = "";
        let patch = "--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1,2 @@\n+first\n+second\n";
        let result = apply(original, patch, false).unwrap();
        assert_eq!(result, "first\nsecond\n");
    }

    #[test]
    fn test_anchorless_insertion_after_a_match_is_ordering_violation() {
        // A second all-addition block has no anchor; honoring it would mean
        // inserting at the top, behind the already advanced cursor.
        let original = "a\nb\n";
        let patch = "@@ -1 +1 @@\n-a\n+A\n@@ -0,0 +1 @@\n+top\n";
        match apply(original, patch, false) {
            Err(PatchError::OrderingViolation { found, cursor }) => {
                assert_eq!(found, 0);
                assert!(cursor > 0);
            }
            other => panic!("Expected OrderingViolation, got {:?}", other),
        }
    }

    #[test]
    fn test_delete_entire_content() {
        let original = "a\nb\n";
        let patch = "--- a/f\n+++ /dev/null\n@@ -1,2 +0,0 @@\n-a\n-b\n";
        let result = apply(original, patch, false).unwrap();
        assert_eq!(result, "");
    }

    #[test]
    fn test_no_trailing_newline_original() {
        let original = "one\ntwo";
        let patch = "@@ -2 +2 @@\n-two\n+TWO\n";
        let result = apply(original, patch, false).unwrap();
        assert_eq!(result, "one\nTWO");
    }

    #[test]
    fn test_crlf_inputs_are_normalized() {
        let original = "a\r\nb\r\n";
        let patch = "@@ -1 +1 @@\r\n-a\r\n+A\r\n";
        let result = apply(original, patch, false).unwrap();
        assert_eq!(result, "A\nb\n");
    }

    #[test]
    fn test_consecutive_edits_without_hunk_header_split_into_blocks() {
        // A context/deletion line directly after additions starts a new
        // block even without an intervening @@ header.
        let original = "k1\nv1\nk2\nv2\n";
        let patch = "@@ -1,4 +1,4 @@\n-v1\n+V1\n-v2\n+V2\n";
        let result = apply(original, patch, false).unwrap();
        assert_eq!(result, "k1\nV1\nk2\nV2\n");
    }

    #[test]
    fn test_header_lines_inside_patch_are_ignored() {
        let original = "x\n";
        let patch = "diff --git a/f b/f\nindex 0000000..1111111 100644\n--- a/f\n+++ b/f\n@@ -1 +1 @@\n-x\n+y\n";
        let result = apply(original, patch, false).unwrap();
        assert_eq!(result, "y\n");
    }

    #[test]
    fn test_failed_apply_returns_no_content() {
        // First block applies cleanly, second fails: the whole call errors
        // and nothing half-patched comes back.
        let original = "a\nb\n";
        let patch = "@@ -1 +1 @@\n-a\n+A\n@@ -2 +2 @@\n-missing\n+M\n";
        assert!(apply(original, patch, false).is_err());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn unique_lines() -> impl Strategy<Value = Vec<String>> {
            proptest::collection::vec("[a-z]{1,8}", 1..12).prop_map(|lines| {
                lines
                    .into_iter()
                    .enumerate()
                    .map(|(i, l)| format!("{l}{i}"))
                    .collect()
            })
        }

        proptest! {
            #[test]
            fn prop_identical_search_replace_is_idempotent(
                lines in unique_lines(),
                idx in any::<prop::sample::Index>(),
            ) {
                let original = lines.join("\n") + "\n";
                let target = &lines[idx.index(lines.len())];
                let patch = format!("@@ -1 +1 @@\n-{target}\n+{target}\n");
                let result = apply(&original, &patch, false).unwrap();
                prop_assert_eq!(result, original);
            }

            #[test]
            fn prop_single_line_replacement_round_trips(
                lines in unique_lines(),
                idx in any::<prop::sample::Index>(),
                replacement in "[A-Z]{1,8}",
            ) {
                let original = lines.join("\n") + "\n";
                let target = idx.index(lines.len());
                let patch = format!("@@ -1 +1 @@\n-{}\n+{replacement}\n", lines[target]);

                let mut expected_lines = lines.clone();
                expected_lines[target] = replacement;
                let expected = expected_lines.join("\n") + "\n";

                let result = apply(&original, &patch, false).unwrap();
                prop_assert_eq!(result, expected);
            }
        }
    }
}
