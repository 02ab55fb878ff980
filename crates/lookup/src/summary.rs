//! Feature aggregation: per-technology counts with one example address each.
//!
//! Upstream records use several names for the same concept, so property
//! access is driven by ordered key lists ([`PropertyKeys`]) rather than
//! per-field code.

use std::collections::BTreeMap;

use common::{FeatureCollection, FeatureRecord, TechnologyCategory};
use serde::Serialize;
use serde_json::Value;

/// Ordered property names tried against each record, first non-empty wins.
#[derive(Debug, Clone, Copy)]
pub struct PropertyKeys {
    pub technology: &'static [&'static str],
    /// Consulted only when no `technology` key yields a value.
    pub technology_fallback: &'static [&'static str],
    pub address: &'static [&'static str],
}

impl Default for PropertyKeys {
    fn default() -> Self {
        Self {
            technology: &[
                "tech",
                "technology",
                "tech_type",
                "techType",
                "connection_type",
                "nbn_tech",
            ],
            technology_fallback: &["service_type", "serviceType", "access_technology"],
            address: &[
                "address",
                "full_address",
                "formatted_address",
                "addr",
                "name",
            ],
        }
    }
}

impl PropertyKeys {
    pub fn technology_label(&self, record: &FeatureRecord) -> Option<String> {
        record
            .first_property(self.technology)
            .or_else(|| record.first_property(self.technology_fallback))
    }

    pub fn address(&self, record: &FeatureRecord) -> Option<String> {
        record.first_property(self.address)
    }
}

/// Keyword sets, checked in order; the first category with a hit wins.
fn keyword_table() -> [(TechnologyCategory, &'static [&'static str]); 8] {
    [
        (
            TechnologyCategory::NonNbn,
            &["non-nbn", "non nbn", "non_nbn", "not nbn", "none"],
        ),
        (
            TechnologyCategory::Fttp,
            &["fttp", "ftth", "fibre to the premises", "fiber to the premises"],
        ),
        (
            TechnologyCategory::Fttn,
            &["fttn", "fibre to the node", "fiber to the node"],
        ),
        (
            TechnologyCategory::Fttc,
            &["fttc", "fibre to the curb", "fibre to the kerb", "fiber to the curb"],
        ),
        (
            TechnologyCategory::Fttb,
            &["fttb", "fibre to the building", "fiber to the building"],
        ),
        (
            TechnologyCategory::Hfc,
            &["hfc", "hybrid fibre", "hybrid fiber", "cable"],
        ),
        (TechnologyCategory::FixedWireless, &["wireless"]),
        (
            TechnologyCategory::Satellite,
            &["satellite", "sky muster", "skymuster"],
        ),
    ]
}

/// Map a raw label onto a category. Unrecognized labels are kept verbatim.
pub fn classify_label(label: &str) -> TechnologyCategory {
    let lowered = label.to_lowercase();
    keyword_table()
        .into_iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(category, _)| category)
        .unwrap_or_else(|| TechnologyCategory::Other(label.trim().to_string()))
}

/// Category of one record; records with no label count as Non-NBN.
pub fn categorize(record: &FeatureRecord, keys: &PropertyKeys) -> TechnologyCategory {
    keys.technology_label(record)
        .map(|label| classify_label(&label))
        .unwrap_or(TechnologyCategory::NonNbn)
}

/// Short location string from the first coordinate pair of a geometry.
fn geometry_fingerprint(geometry: &Value) -> Option<String> {
    let mut coords = geometry.get("coordinates")?.as_array()?;
    while let Some(inner) = coords.first().and_then(Value::as_array) {
        coords = inner;
    }
    let lon = coords.first()?.as_f64()?;
    let lat = coords.get(1)?.as_f64()?;
    Some(format!("{lat:.5}, {lon:.5}"))
}

fn example_for(record: &FeatureRecord, keys: &PropertyKeys) -> String {
    keys.address(record)
        .or_else(|| geometry_fingerprint(&record.geometry))
        .unwrap_or_else(|| "unknown location".to_string())
}

/// Derived per-collection summary. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub counts_by_category: BTreeMap<TechnologyCategory, usize>,
    pub example_address_by_category: BTreeMap<TechnologyCategory, String>,
    pub total: usize,
}

impl Summary {
    pub fn count(&self, category: &TechnologyCategory) -> usize {
        self.counts_by_category.get(category).copied().unwrap_or(0)
    }

    /// Most common category; ties go to the earlier category.
    pub fn dominant(&self) -> Option<(&TechnologyCategory, usize)> {
        self.counts_by_category
            .iter()
            .fold(None, |best, (category, &count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((category, count)),
            })
    }
}

pub fn summarize(collection: &FeatureCollection) -> Summary {
    summarize_with(collection, &PropertyKeys::default())
}

/// Deterministic for a given record order: examples are first-seen only.
pub fn summarize_with(collection: &FeatureCollection, keys: &PropertyKeys) -> Summary {
    let mut summary = Summary::default();

    for record in &collection.features {
        let category = categorize(record, keys);
        if !summary.example_address_by_category.contains_key(&category) {
            summary
                .example_address_by_category
                .insert(category.clone(), example_for(record, keys));
        }
        *summary.counts_by_category.entry(category).or_insert(0) += 1;
    }

    summary.total = summary.counts_by_category.values().sum();
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(properties: Value, geometry: Value) -> FeatureRecord {
        serde_json::from_value(json!({"properties": properties, "geometry": geometry}))
            .expect("test record should parse")
    }

    fn collection(records: Vec<FeatureRecord>) -> FeatureCollection {
        FeatureCollection {
            features: records,
            ..FeatureCollection::default()
        }
    }

    #[test]
    fn test_classify_known_labels() {
        assert_eq!(classify_label("FTTP"), TechnologyCategory::Fttp);
        assert_eq!(classify_label("fttn"), TechnologyCategory::Fttn);
        assert_eq!(classify_label("Fibre to the Curb"), TechnologyCategory::Fttc);
        assert_eq!(classify_label("HFC"), TechnologyCategory::Hfc);
        assert_eq!(classify_label("FTTB"), TechnologyCategory::Fttb);
        assert_eq!(classify_label("WIRELESS"), TechnologyCategory::FixedWireless);
        assert_eq!(classify_label("Fixed Wireless"), TechnologyCategory::FixedWireless);
        assert_eq!(classify_label("SATELLITE"), TechnologyCategory::Satellite);
        assert_eq!(classify_label("Non-NBN"), TechnologyCategory::NonNbn);
    }

    #[test]
    fn test_unknown_label_is_preserved() {
        assert_eq!(
            classify_label("Mobile 5G"),
            TechnologyCategory::Other("Mobile 5G".into())
        );
    }

    #[test]
    fn test_label_key_priority_and_fallback() {
        let keys = PropertyKeys::default();

        let both = record(json!({"technology": "HFC", "tech": "FTTP"}), Value::Null);
        assert_eq!(categorize(&both, &keys), TechnologyCategory::Fttp);

        let fallback = record(json!({"service_type": "Satellite"}), Value::Null);
        assert_eq!(categorize(&fallback, &keys), TechnologyCategory::Satellite);

        let blank = record(json!({"tech": "", "address": "1 Smith St"}), Value::Null);
        assert_eq!(categorize(&blank, &keys), TechnologyCategory::NonNbn);
    }

    #[test]
    fn test_counts_and_first_examples() {
        let summary = summarize(&collection(vec![
            record(json!({"tech": "FTTN", "address": "1 Gympie Rd"}), Value::Null),
            record(json!({"tech": "FTTP", "address": "2 Hamilton Rd"}), Value::Null),
            record(json!({"tech": "FTTN", "address": "3 Gympie Rd"}), Value::Null),
        ]));

        assert_eq!(summary.count(&TechnologyCategory::Fttn), 2);
        assert_eq!(summary.count(&TechnologyCategory::Fttp), 1);
        assert_eq!(summary.total, 3);
        assert_eq!(
            summary.example_address_by_category[&TechnologyCategory::Fttn],
            "1 Gympie Rd"
        );
        assert_eq!(summary.dominant(), Some((&TechnologyCategory::Fttn, 2)));
    }

    #[test]
    fn test_geometry_fingerprint_fallback() {
        let summary = summarize(&collection(vec![
            record(
                json!({"tech": "HFC"}),
                json!({"type": "Point", "coordinates": [153.031234, -27.385678]}),
            ),
            record(
                json!({"tech": "FTTB"}),
                json!({"type": "Polygon", "coordinates": [[[151.2, -33.8], [151.3, -33.9]]]}),
            ),
            record(json!({"tech": "FTTC"}), Value::Null),
        ]));

        assert_eq!(
            summary.example_address_by_category[&TechnologyCategory::Hfc],
            "-27.38568, 153.03123"
        );
        assert_eq!(
            summary.example_address_by_category[&TechnologyCategory::Fttb],
            "-33.80000, 151.20000"
        );
        assert_eq!(
            summary.example_address_by_category[&TechnologyCategory::Fttc],
            "unknown location"
        );
    }

    #[test]
    fn test_deterministic_across_calls() {
        let input = collection(vec![
            record(json!({"tech": "Mobile 5G", "address": "9 Edge St"}), Value::Null),
            record(json!({"tech": "FTTP", "address": "1 Smith St"}), Value::Null),
            record(json!({"tech": "FTTP", "address": "5 Smith St"}), Value::Null),
            record(json!({}), Value::Null),
        ]);

        let first = summarize(&input);
        for _ in 0..5 {
            assert_eq!(summarize(&input), first);
        }
        assert_eq!(first.total, input.len());
        assert_eq!(first.count(&TechnologyCategory::NonNbn), 1);
        assert_eq!(
            first.count(&TechnologyCategory::Other("Mobile 5G".into())),
            1
        );
    }

    #[test]
    fn test_summary_serializes_with_labels() {
        let summary = summarize(&collection(vec![record(
            json!({"tech": "WIRELESS", "address": "7 Ridge Rd"}),
            Value::Null,
        )]));
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value["counts_by_category"]["Fixed Wireless"], 1);
        assert_eq!(value["total"], 1);
    }
}
