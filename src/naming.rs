//! Filename rules for described screenshots
//!
//! Turns untrusted model output into a filesystem-safe slug and owns the
//! `-ss<ext>` marker that keeps renamed files from being processed twice.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Maximum slug length in characters
pub const MAX_SLUG_LEN: usize = 50;

/// Marker placed between the slug and the extension
pub const PROCESSED_MARKER: &str = "-ss";

/// Sanitize a free-text description into a slug:
/// - Lower-case
/// - Drop everything except ASCII letters, digits, whitespace, `-` and `_`
/// - Collapse separator runs into a single hyphen, trim hyphens at both ends
/// - Limit length to 50 characters
///
/// The result matches `^[a-z0-9-]{0,50}$` and may be empty.
pub fn sanitize(text: &str) -> String {
    let mut slug = String::with_capacity(text.len().min(MAX_SLUG_LEN * 2));
    let mut pending_hyphen = false;

    for c in text.to_lowercase().chars() {
        match c {
            c if c.is_ascii_lowercase() || c.is_ascii_digit() => {
                if pending_hyphen && !slug.is_empty() {
                    slug.push('-');
                }
                pending_hyphen = false;
                slug.push(c);
            }
            c if c.is_whitespace() || c == '-' || c == '_' => pending_hyphen = true,
            _ => {}
        }
    }

    if slug.len() > MAX_SLUG_LEN {
        // Only ASCII is left at this point, so byte truncation is safe
        slug.truncate(MAX_SLUG_LEN);
        while slug.ends_with('-') {
            slug.pop();
        }
    }

    slug
}

/// Dotted extension of a path (`.png`), or an empty string when there is none
fn dotted_extension(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

/// The processed suffix for a given dotted extension, e.g. `-ss.png`
pub fn processed_suffix(dotted_ext: &str) -> String {
    format!("{}{}", PROCESSED_MARKER, dotted_ext)
}

/// Whether the file name already carries the processed suffix for its extension
pub fn is_processed(path: &Path) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    name.ends_with(&processed_suffix(&dotted_extension(path)))
}

/// `<slug>-ss<ext>` next to the original file
pub fn renamed_path(original: &Path, slug: &str) -> PathBuf {
    let new_name = format!("{}{}", slug, processed_suffix(&dotted_extension(original)));
    match original.parent() {
        Some(parent) => parent.join(new_name),
        None => PathBuf::from(new_name),
    }
}

/// Name used when a description sanitizes to nothing
pub fn fallback_slug(now: DateTime<Local>) -> String {
    format!("screenshot-{}", now.format("%Y%m%d-%H%M%S"))
}
