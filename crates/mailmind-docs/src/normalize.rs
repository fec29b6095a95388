//! Bullet normalization. User-typed rules and LLM-emitted patches mix
//! quotation marks, non-breaking spaces, and casing; comparisons must not
//! care, and the stored form must be canonical.

use unicode_normalization::UnicodeNormalization;

/// Canonical stored form: `- <content>.` with NFKC-folded content.
pub fn canonical_bullet(raw: &str) -> String {
    let content = strip_bullet(raw);
    let mut content: String = content.nfkc().collect();
    if !content.ends_with('.') {
        content.push('.');
    }
    format!("- {content}")
}

/// Comparison key: NFKC, case-insensitive, bullet- and period-agnostic.
pub fn compare_key(raw: &str) -> String {
    let content = strip_bullet(raw);
    let folded: String = content.nfkc().collect();
    folded.trim_end_matches('.').trim().to_lowercase()
}

fn strip_bullet(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed.strip_prefix("- ").unwrap_or(trimmed).trim()
}
