/// Identifier & Hash Service.
///
/// Every persistent object in MemoGarden carries a prefixed identifier:
/// `soil_` for facts and system relations (Soil-resident, immutable),
/// `core_` for entities and active user relations (Core-resident, mutable).
/// This module is the only place that mints identifiers, computes canonical
/// hashes, and converts between wall-clock time and the integer "day since
/// epoch" used by the time-horizon arithmetic in [`crate::relations`].
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use crate::error::{GardenError, GardenResult};

/// The storage layer an identifier belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// Soil: the immutable fact timeline.
    Soil,
    /// Core: the mutable entity registry.
    Core,
}

impl Layer {
    pub fn prefix(self) -> &'static str {
        match self {
            Layer::Soil => "soil",
            Layer::Core => "core",
        }
    }
}

/// Mint a new prefixed identifier for the given layer.
///
/// Format: `<prefix>_<opaque>`, where opaque is a UUIDv4 rendered without
/// hyphens, matching the compact form this crate's identifiers use on the
/// wire.
pub fn new_id(layer: Layer) -> String {
    let opaque = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", layer.prefix(), opaque)
}

/// Parse a caller-supplied identifier into its layer and opaque part.
///
/// Accepts only identifiers that carry a recognized prefix. Callers that
/// accept bare (unprefixed) identifiers should use [`normalize`] instead,
/// which falls back to a caller-declared expected layer.
pub fn parse_id(raw: &str) -> GardenResult<(Layer, &str)> {
    if let Some(rest) = raw.strip_prefix("soil_") {
        return Ok((Layer::Soil, rest));
    }
    if let Some(rest) = raw.strip_prefix("core_") {
        return Ok((Layer::Core, rest));
    }
    Err(GardenError::validation_field(
        "id",
        format!("unknown identifier prefix in '{raw}'"),
    ))
}

/// Normalize a bare-or-prefixed identifier into its canonical prefixed form
/// for the given expected layer. Reads accept either form; writes always
/// store the prefixed form, produced by this function.
pub fn normalize(raw: &str, expected: Layer) -> String {
    if raw.starts_with("soil_") || raw.starts_with("core_") {
        raw.to_string()
    } else {
        format!("{}_{}", expected.prefix(), raw)
    }
}

/// Rewrite a prefixed identifier's layer tag to `to`, preserving its opaque
/// suffix. Used when an object migrates layers (a fossilized user relation
/// keeps its `core_` suffix as a `soil_` system relation's id).
pub fn reprefix(id: &str, to: Layer) -> String {
    let suffix = id
        .strip_prefix("soil_")
        .or_else(|| id.strip_prefix("core_"))
        .unwrap_or(id);
    format!("{}_{}", to.prefix(), suffix)
}

/// Canonicalize a JSON value for hashing: sorted object keys, compact
/// separators, stable numeric formatting, UTF-8 preserved.
///
/// `serde_json::Value` with the `preserve_order` feature keeps insertion
/// order in maps, so this walks the tree and rebuilds every object with its
/// keys sorted lexicographically before serializing compactly. Two values
/// built from the same logical fields in different insertion order produce
/// identical canonical bytes.
pub fn canonical_json(value: &JsonValue) -> String {
    serde_json::to_string(&sort_keys(value)).expect("canonicalized JSON always serializes")
}

fn sort_keys(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut entries: Vec<(&String, &JsonValue)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = serde_json::Map::new();
            for (k, v) in entries {
                sorted.insert(k.clone(), sort_keys(v));
            }
            JsonValue::Object(sorted)
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// `hash(object) = SHA-256( canonical_json(payload) + "|" + prior_hash_or_empty )`
///
/// Deterministic under re-serialization: objects with the same recorded
/// fields and the same prior hash always produce the same digest,
/// irrespective of field insertion order or numeric encoding, because the
/// input is first routed through [`canonical_json`].
pub fn hash_bytes(payload: &JsonValue, prior_hash: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(payload).as_bytes());
    hasher.update(b"|");
    hasher.update(prior_hash.unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}

/// Fixed epoch for day-arithmetic: 2020-01-01 UTC.
fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid fixed epoch date")
}

/// Integer days since the fixed epoch, for the given wall-clock instant.
pub fn day_of(instant: DateTime<Utc>) -> i64 {
    (instant.date_naive() - epoch()).num_days()
}

/// The current day, per the authoritative wall clock.
pub fn current_day() -> i64 {
    day_of(Utc::now())
}

/// Convert a day number back to a UTC date.
pub fn day_to_date(day: i64) -> NaiveDate {
    epoch() + chrono::Duration::days(day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_id_carries_expected_prefix() {
        let id = new_id(Layer::Soil);
        assert!(id.starts_with("soil_"));
        let id = new_id(Layer::Core);
        assert!(id.starts_with("core_"));
    }

    #[test]
    fn parse_id_rejects_unknown_prefix() {
        assert!(parse_id("widget_123").is_err());
        assert_eq!(parse_id("core_abc").unwrap(), (Layer::Core, "abc"));
    }

    #[test]
    fn normalize_accepts_bare_or_prefixed() {
        assert_eq!(normalize("abc", Layer::Core), "core_abc");
        assert_eq!(normalize("core_abc", Layer::Core), "core_abc");
        assert_eq!(normalize("soil_abc", Layer::Core), "soil_abc");
    }

    #[test]
    fn reprefix_preserves_opaque_suffix() {
        assert_eq!(reprefix("core_abc123", Layer::Soil), "soil_abc123");
        assert_eq!(reprefix("soil_abc123", Layer::Core), "core_abc123");
    }

    #[test]
    fn canonical_json_is_insensitive_to_key_order() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn hash_bytes_is_deterministic_and_chain_sensitive() {
        let payload = json!({"amount": 10, "description": "a"});
        let h1 = hash_bytes(&payload, None);
        let h2 = hash_bytes(&payload, None);
        assert_eq!(h1, h2);

        let h3 = hash_bytes(&payload, Some(&h1));
        assert_ne!(h1, h3);
    }

    #[test]
    fn day_arithmetic_round_trips() {
        let epoch_day = day_of(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(epoch_day, 0);
        let day = day_of(Utc.with_ymd_and_hms(2020, 1, 11, 0, 0, 0).unwrap());
        assert_eq!(day, 10);
        assert_eq!(day_to_date(10), NaiveDate::from_ymd_opt(2020, 1, 11).unwrap());
    }
}
