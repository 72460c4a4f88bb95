//! Unified diff extraction and application for chat-assistant output.
//!
//! Replies from web chat assistants are unreliable patch carriers: they mix
//! prose with one or more diffs, wrap them in markdown fences, hallucinate
//! line numbers, and mangle whitespace. This crate turns such raw text into
//! per-file [`DiffPatch`] records and applies each one to the corresponding
//! original file content deterministically, without ever silently
//! corrupting a file.
//!
//! # Architecture
//!
//! This is an infrastructure crate:
//! - Depends on: nothing inside the workspace (pure in-memory computation,
//!   no I/O)
//! - Used by: the editor command layer, which reads files before calling in
//!   and writes results back afterwards
//!
//! # Usage
//!
//! ```rust,ignore
//! use chatwright_udiff::{apply, extract};
//!
//! // Pull per-file patches out of the assistant's reply
//! let patches = extract(&assistant_reply);
//!
//! for patch in &patches {
//!     let original = read_file(&patch.file_path)?;
//!     match apply(&original, &patch.content, false) {
//!         Ok(new_content) => write_file(&patch.file_path, &new_content)?,
//!         Err(err) => report(&patch.file_path, err), // caller picks a fallback
//!     }
//! }
//! ```
//!
//! Extraction never fails (unparseable chunks are skipped and logged);
//! application fails per file with a typed [`PatchError`] and never returns
//! half-patched content.

mod applier;
mod error;
mod extractor;
mod patch;

pub use applier::apply;
pub use error::{PatchError, Result};
pub use extractor::extract;
pub use patch::{DiffPatch, PatchKind, NULL_DEVICE};
