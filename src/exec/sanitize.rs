// src/exec/sanitize.rs

//! Cleanup of raw process output before it is stored.

/// "Cursor horizontal absolute, column 1". Log viewers render it as a stray
/// `G`.
const CURSOR_TO_COLUMN_ONE: &str = "\x1b[1G";

/// Remove control sequences that log viewers cannot render.
///
/// Removal repeats until nothing is left to remove, so that splicing cannot
/// produce a new occurrence: the function is idempotent.
pub fn strip_unusable_control_characters(text: &str) -> String {
    let mut out = text.replace(CURSOR_TO_COLUMN_ONE, "");
    while out.contains(CURSOR_TO_COLUMN_ONE) {
        out = out.replace(CURSOR_TO_COLUMN_ONE, "");
    }
    out
}
