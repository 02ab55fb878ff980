//! Exact-match address index over one feature collection.
//!
//! Matching is exact on the normalized form only. A miss is an expected
//! outcome: callers fall back to the suburb-level summary.

use std::collections::HashMap;
use std::sync::OnceLock;

use common::{FeatureCollection, FeatureRecord};
use regex::Regex;

use crate::summary::PropertyKeys;

fn unit_slash() -> &'static Regex {
    static UNIT_SLASH: OnceLock<Regex> = OnceLock::new();
    UNIT_SLASH.get_or_init(|| {
        Regex::new(r"\b(\d+[a-z]?)\s*/\s*(\d+[a-z]?)\b").expect("unit/number pattern is valid")
    })
}

fn expand_abbreviation(token: &str) -> &str {
    match token {
        "st" => "street",
        "rd" => "road",
        "ave" => "avenue",
        "ct" => "court",
        "pl" => "place",
        "ln" => "lane",
        "dr" => "drive",
        other => other,
    }
}

/// Canonical address key: lowercase, `N/M` as `unit N M`, punctuation
/// stripped, whitespace collapsed, street-type abbreviations expanded.
pub fn normalize_address(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let units = unit_slash().replace_all(&lowered, " unit $1 $2 ");
    let cleaned: String = units
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let mut tokens: Vec<&str> = Vec::new();
    for token in cleaned.split_whitespace() {
        // "Unit 3/12" would otherwise become "unit unit 3 12".
        if token == "unit" && tokens.last() == Some(&"unit") {
            continue;
        }
        tokens.push(expand_abbreviation(token));
    }
    tokens.join(" ")
}

/// Normalized address to record. Rebuilt for every payload.
#[derive(Debug, Default)]
pub struct AddressIndex<'a> {
    by_address: HashMap<String, &'a FeatureRecord>,
}

impl<'a> AddressIndex<'a> {
    pub fn build(collection: &'a FeatureCollection) -> Self {
        Self::build_with(collection, &PropertyKeys::default())
    }

    /// Records without an address are skipped; duplicate keys keep the last.
    pub fn build_with(collection: &'a FeatureCollection, keys: &PropertyKeys) -> Self {
        let mut by_address = HashMap::with_capacity(collection.len());
        for record in &collection.features {
            let Some(address) = keys.address(record) else {
                continue;
            };
            let normalized = normalize_address(&address);
            if !normalized.is_empty() {
                by_address.insert(normalized, record);
            }
        }
        Self { by_address }
    }

    pub fn get(&self, street: &str) -> Option<&'a FeatureRecord> {
        let normalized = normalize_address(street);
        if normalized.is_empty() {
            return None;
        }
        self.by_address.get(&normalized).copied()
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}

/// One-shot match: build the index and look up `street`.
pub fn match_address<'a>(
    collection: &'a FeatureCollection,
    street: &str,
) -> Option<&'a FeatureRecord> {
    AddressIndex::build(collection).get(street)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collection(addresses: &[(&str, &str)]) -> FeatureCollection {
        let features = addresses
            .iter()
            .map(|(address, tech)| {
                serde_json::from_value(json!({
                    "properties": {"address": address, "tech": tech}
                }))
                .unwrap()
            })
            .collect();
        FeatureCollection {
            features,
            ..FeatureCollection::default()
        }
    }

    #[test]
    fn test_normalize_abbreviations_and_punctuation() {
        assert_eq!(normalize_address("12 Smith St."), "12 smith street");
        assert_eq!(normalize_address("4  Gympie   Rd,  Chermside"), "4 gympie road chermside");
        assert_eq!(normalize_address("1 Park Ave"), "1 park avenue");
        assert_eq!(normalize_address("9 Elm Ct"), "9 elm court");
        assert_eq!(normalize_address("2 Rose Pl"), "2 rose place");
        assert_eq!(normalize_address("3 Lovers Ln"), "3 lovers lane");
        assert_eq!(normalize_address("7 Ocean Dr"), "7 ocean drive");
    }

    #[test]
    fn test_normalize_unit_slash() {
        assert_eq!(normalize_address("3/12 Smith St"), "unit 3 12 smith street");
        assert_eq!(normalize_address("3 / 12 Smith Street"), "unit 3 12 smith street");
        assert_eq!(normalize_address("Unit 3/12 Smith St"), "unit 3 12 smith street");
        assert_eq!(normalize_address("3a/12 Smith St"), "unit 3a 12 smith street");
    }

    #[test]
    fn test_word_slash_word_is_not_a_unit() {
        assert_eq!(normalize_address("Smith St/Jones Rd"), "smith street jones road");
        assert_eq!(normalize_address("Lot 5 Smith/Jones Ct"), "lot 5 smith jones court");
    }

    #[test]
    fn test_normalize_is_stable() {
        let once = normalize_address("3/12 O'Brien St, Chermside QLD");
        assert_eq!(normalize_address(&once), once);
    }

    #[test]
    fn test_match_exact_after_normalization() {
        let data = collection(&[
            ("12 Smith Street", "FTTP"),
            ("3/14 Gympie Road", "FTTN"),
        ]);

        let hit = match_address(&data, "12 smith st").expect("should match");
        assert_eq!(hit.property_text("tech").as_deref(), Some("FTTP"));

        let unit = match_address(&data, "3/14 Gympie Rd").expect("unit should match");
        assert_eq!(unit.property_text("tech").as_deref(), Some("FTTN"));
    }

    #[test]
    fn test_no_partial_matching() {
        let data = collection(&[("12 Smith Street", "FTTP")]);
        assert!(match_address(&data, "12 Smith").is_none());
        assert!(match_address(&data, "120 Smith Street").is_none());
        assert!(match_address(&data, "").is_none());
    }

    #[test]
    fn test_duplicate_keys_last_write_wins() {
        let data = collection(&[("5 Main St", "FTTN"), ("5 Main Street", "FTTP")]);
        let index = AddressIndex::build(&data);
        assert_eq!(index.len(), 1);
        assert_eq!(
            index.get("5 main st").unwrap().property_text("tech").as_deref(),
            Some("FTTP")
        );
    }

    #[test]
    fn test_records_without_address_are_skipped() {
        let mut data = collection(&[("1 Smith St", "HFC")]);
        data.features
            .push(serde_json::from_value(json!({"properties": {"tech": "FTTP"}})).unwrap());
        assert_eq!(AddressIndex::build(&data).len(), 1);
    }
}
