//! Candidate path generation.
//!
//! The dataset's file naming is not documented, so several cheap encodings
//! of the suburb name are tried in a fixed order rather than asserting one.

use common::normalize_slug;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Unreserved path-segment characters are left as is.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

fn encode_segment(raw: &str) -> String {
    utf8_percent_encode(raw, PATH_SEGMENT).to_string()
}

/// Ordered, deduplicated relative paths `{STATE}/{name}.{extension}`.
///
/// Order: hyphenated slug, percent-encoded raw text, underscored slug,
/// loose lowercase variant. Empty names and an empty state yield nothing.
pub fn candidate_paths(suburb: &str, state: &str, extension: &str) -> Vec<String> {
    let state = encode_segment(&state.trim().to_ascii_uppercase());
    if state.is_empty() {
        return Vec::new();
    }

    let raw = suburb.trim();
    let slug = normalize_slug(raw);
    let loose = raw.to_lowercase().replace(' ', "-");

    let names = [
        slug.clone(),
        encode_segment(raw),
        slug.replace('-', "_"),
        encode_segment(&loose),
    ];

    let mut paths: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if name.is_empty() {
            continue;
        }
        let path = format!("{state}/{name}.{extension}");
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}
