//! Domain types shared by the client, cache, and lookup service.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::slug::normalize_slug;

// ── Location key ──────────────────────────────────────────────────────

/// Composite cache key: uppercased state code + normalized suburb slug.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationKey {
    pub suburb_slug: String,
    pub state_code: String,
}

impl LocationKey {
    /// Derive the key from raw suburb and state text.
    pub fn resolve(suburb: &str, state: &str) -> Self {
        Self {
            suburb_slug: normalize_slug(suburb),
            state_code: state.trim().to_ascii_uppercase(),
        }
    }

    /// Primary key used in the persistent store (`QLD/chermside`).
    pub fn storage_key(&self) -> String {
        format!("{}/{}", self.state_code, self.suburb_slug)
    }

    /// A key with an empty slug or state cannot address anything upstream.
    pub fn is_addressable(&self) -> bool {
        !self.suburb_slug.is_empty() && !self.state_code.is_empty()
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.state_code, self.suburb_slug)
    }
}

// ── Feature payload ───────────────────────────────────────────────────

/// Per-location document listing individually addressed records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Snapshot generation time as published by the dataset, if any.
    #[serde(
        default,
        alias = "generated",
        alias = "generatedAt",
        deserialize_with = "scalar_as_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub generated_at: Option<String>,
    pub features: Vec<FeatureRecord>,
}

impl FeatureCollection {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Raw unit from the upstream dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    #[serde(default, deserialize_with = "null_as_empty_map")]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub geometry: Value,
}

impl FeatureRecord {
    /// Text value of one property. Strings are trimmed, numbers and bools
    /// are stringified, empty strings and other shapes yield `None`.
    pub fn property_text(&self, key: &str) -> Option<String> {
        match self.properties.get(key)? {
            Value::String(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// First non-empty value among `keys`, tried in order.
    pub fn first_property(&self, keys: &[&str]) -> Option<String> {
        keys.iter().find_map(|key| self.property_text(key))
    }
}

fn scalar_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn null_as_empty_map<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

// ── Cache entry ───────────────────────────────────────────────────────

/// One cached snapshot per location. Replaced wholesale on refetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: LocationKey,
    pub fetched_at: DateTime<Utc>,
    pub generated_at: Option<String>,
    pub source_url: String,
    pub payload: FeatureCollection,
}

impl CacheEntry {
    pub fn new(
        key: LocationKey,
        fetched_at: DateTime<Utc>,
        source_url: String,
        payload: FeatureCollection,
    ) -> Self {
        Self {
            key,
            fetched_at,
            generated_at: payload.generated_at.clone(),
            source_url,
            payload,
        }
    }

    /// Fresh iff `now - fetched_at < ttl`.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.fetched_at < ttl
    }
}

// ── Technology category ───────────────────────────────────────────────

/// Connection technology. Unrecognized labels are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TechnologyCategory {
    Fttp,
    Fttn,
    Fttc,
    Hfc,
    Fttb,
    FixedWireless,
    Satellite,
    NonNbn,
    Other(String),
}

impl TechnologyCategory {
    pub fn label(&self) -> &str {
        match self {
            Self::Fttp => "FTTP",
            Self::Fttn => "FTTN",
            Self::Fttc => "FTTC",
            Self::Hfc => "HFC",
            Self::Fttb => "FTTB",
            Self::FixedWireless => "Fixed Wireless",
            Self::Satellite => "Satellite",
            Self::NonNbn => "Non-NBN",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for TechnologyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for TechnologyCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}
