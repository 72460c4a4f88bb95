//! The per-file patch record shared by extraction and application.

use serde::{Deserialize, Serialize};

/// Conventional diff header path meaning "this side of the diff does not
/// exist" (signals file creation or deletion).
pub const NULL_DEVICE: &str = "/dev/null";

/// One file's worth of patch text, extracted from assistant output.
///
/// The record crosses the editor/relay boundary in the host tool, so it
/// serializes; the engine itself never does I/O with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffPatch {
    /// Path the patch targets. For deletions and renames this is the
    /// original path; it is never the null-device marker.
    pub file_path: String,
    /// Self-contained unified diff body for this one file. Always ends
    /// with exactly one trailing newline.
    pub content: String,
    /// Destination path, present only when the patch represents a rename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_file_path: Option<String>,
}

/// What a patch does to its target file, derived from the headers inside
/// [`DiffPatch::content`] rather than stored separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatchKind {
    /// The `---` side is the null device: the file is being created.
    Create,
    /// The `+++` side is the null device: the file is being deleted.
    Delete,
    /// Both sides are real paths and differ.
    Rename,
    /// An in-place edit of an existing file.
    Modify,
}

impl DiffPatch {
    /// Classify the patch by inspecting its file headers.
    pub fn kind(&self) -> PatchKind {
        if self.new_file_path.is_some() {
            return PatchKind::Rename;
        }
        for line in self.content.lines() {
            if line.starts_with("@@") {
                break;
            }
            if let Some(rest) = line.strip_prefix("--- ") {
                if rest.trim() == NULL_DEVICE {
                    return PatchKind::Create;
                }
            } else if let Some(rest) = line.strip_prefix("+++ ") {
                if rest.trim() == NULL_DEVICE {
                    return PatchKind::Delete;
                }
            }
        }
        PatchKind::Modify
    }
}
