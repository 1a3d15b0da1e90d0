//! Locating a proposed edit inside a document snapshot.
//!
//! The location is a derived value: callers recompute it whenever the
//! pending edit or the document changes, and never cache it. Both sides
//! change independently (the agent proposes an edit to a file the user is
//! not viewing; the user later switches to it, or edits it by hand).

/// 1-indexed line range of a located edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditLocation {
    pub start_line: usize,
    pub end_line: usize,
}

/// Find the first occurrence of `old_text` in `document`.
///
/// Returns `None` when the document has diverged and the edit no longer
/// applies. An empty `old_text` has no anchor and is also reported absent.
#[must_use]
pub fn locate(old_text: &str, document: &str) -> Option<EditLocation> {
    if old_text.is_empty() {
        return None;
    }
    let offset = document.find(old_text)?;
    let start_line = document[..offset].matches('\n').count() + 1;
    let end_line = start_line + old_text.matches('\n').count();
    Some(EditLocation {
        start_line,
        end_line,
    })
}
