//! Archive path canonicalisation.
//!
//! Tar entry names come in several spellings (`etc/passwd`,
//! `./etc/passwd`, `/etc/passwd`). Two canonical forms are used
//! everywhere: a bare *entry key* for equality against a user request,
//! and a slash-prefixed *display* form for `list` output.

/// Canonicalise an archive entry name (or a user request) for equality
/// comparison: one leading `./` is stripped, then all leading `/`.
/// Applied identically to both sides of the comparison.
pub fn entry_key(path: &str) -> &str {
    let path = path.strip_prefix("./").unwrap_or(path);
    path.trim_start_matches('/')
}

/// Canonicalise a path for display in `list` output: one leading `./`
/// is stripped, then a leading `/` is prepended if absent.
///
/// Examples: `bin/sh` → `/bin/sh`, `./bin/sh` → `/bin/sh`,
/// `/bin/sh` → `/bin/sh`.
pub fn display_path(path: &str) -> String {
    let path = path.strip_prefix("./").unwrap_or(path);
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}
