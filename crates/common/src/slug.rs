//! Suburb-name normalization.
//!
//! The slug is both the cache key component and the basis for the upstream
//! path guesses, so it must be deterministic and idempotent.

/// Normalize free text into a lowercase, hyphen-joined ASCII slug.
///
/// `"  Saint-Étienne & Co "` becomes `"saint-etienne-and-co"`.
pub fn normalize_slug(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase().replace('&', "and");
    let ascii = deunicode::deunicode(&lowered).to_lowercase();

    let mut slug = String::with_capacity(ascii.len());
    let mut pending_separator = false;

    for ch in ascii.chars() {
        match ch {
            'a'..='z' | '0'..='9' => {
                if pending_separator && !slug.is_empty() {
                    slug.push('-');
                }
                pending_separator = false;
                slug.push(ch);
            }
            '-' => pending_separator = true,
            c if c.is_whitespace() => pending_separator = true,
            _ => {}
        }
    }

    slug
}
