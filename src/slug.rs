//! Filesystem-safe names derived from video titles.

use unicode_normalization::UnicodeNormalization;

/// Normalize a title into a lowercase, hyphenated file stem.
///
/// The title is NFKD-decomposed and everything outside ASCII is dropped,
/// which strips diacritics. Characters outside `[a-zA-Z0-9- ]` are removed,
/// the rest is lowercased and trimmed, and spaces become hyphens. A title
/// with nothing left falls back to `"video"`, so the result is never empty.
pub fn slugify(title: &str) -> String {
    let folded: String = title.nfkd().filter(char::is_ascii).collect();
    let kept: String = folded
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | ' '))
        .collect();
    let slug = kept.to_ascii_lowercase().trim().replace(' ', "-");

    if slug.is_empty() { "video".to_string() } else { slug }
}
