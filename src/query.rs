/// Shared filter grammar and pagination for entity and fact queries.
///
/// A bare value means equality, `{any: [...]}` means
/// membership (logical OR), and `{not: value}` means negation. Filters apply
/// to top-level fields and a declared subset of payload fields; this module
/// doesn't know which fields are declared searchable — that's the caller's
/// concern (see [`crate::soil::store`] and [`crate::core_store::store`]).
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A single field filter, parsed from the wire shape described above.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldFilter {
    Any { any: Vec<JsonValue> },
    Not { not: JsonValue },
    Equals(JsonValue),
}

impl FieldFilter {
    pub fn matches(&self, actual: Option<&JsonValue>) -> bool {
        match self {
            FieldFilter::Any { any } => actual.is_some_and(|v| any.contains(v)),
            FieldFilter::Not { not } => actual != Some(not),
            FieldFilter::Equals(expected) => actual == Some(expected),
        }
    }
}

/// A full filter set: field name -> filter condition, implicitly ANDed.
pub type Filters = std::collections::BTreeMap<String, FieldFilter>;

pub fn matches_all(filters: &Filters, record: &JsonValue) -> bool {
    filters
        .iter()
        .all(|(field, filter)| filter.matches(get_field(record, field).as_ref()))
}

/// Dotted-path field lookup, used for both top-level entity/fact fields and
/// a subset of payload fields.
pub fn get_field<'a>(value: &'a JsonValue, field: &str) -> Option<JsonValue> {
    let mut current: &JsonValue = value;
    for part in field.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current.clone())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Opaque continuation-token payload. Callers receive it base64-encoded and
/// must treat it as opaque; implementations must accept tokens they
/// previously emitted and resume at the same logical cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Continuation {
    /// Sort key of the last record returned (e.g. `updated_at` or
    /// `realized_at`, ISO-8601).
    pub last_key: String,
    /// Identifier of the last record returned, to break ties deterministically.
    pub last_id: String,
    /// Effort mode snapshot the search was running under, so a resumed
    /// `deep` search isn't silently served from a `quick` cache.
    pub effort: String,
}

impl Continuation {
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).expect("continuation always serializes");
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Option<Self> {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(token)
            .ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// Effort mode for search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effort {
    Quick,
    Standard,
    Deep,
}

impl std::fmt::Display for Effort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Effort::Quick => "quick",
            Effort::Standard => "standard",
            Effort::Deep => "deep",
        };
        write!(f, "{s}")
    }
}

/// Search coverage level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coverage {
    Names,
    Content,
    Full,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_value_is_equality() {
        let filter: FieldFilter = serde_json::from_value(json!("active")).unwrap();
        assert!(filter.matches(Some(&json!("active"))));
        assert!(!filter.matches(Some(&json!("inactive"))));
    }

    #[test]
    fn any_is_membership() {
        let filter: FieldFilter = serde_json::from_value(json!({"any": ["a", "b"]})).unwrap();
        assert!(filter.matches(Some(&json!("a"))));
        assert!(!filter.matches(Some(&json!("c"))));
    }

    #[test]
    fn not_is_negation() {
        let filter: FieldFilter = serde_json::from_value(json!({"not": "a"})).unwrap();
        assert!(filter.matches(Some(&json!("b"))));
        assert!(!filter.matches(Some(&json!("a"))));
    }

    #[test]
    fn continuation_round_trips() {
        let c = Continuation {
            last_key: "2026-01-01T00:00:00Z".to_string(),
            last_id: "core_abc".to_string(),
            effort: "standard".to_string(),
        };
        let token = c.encode();
        let decoded = Continuation::decode(&token).unwrap();
        assert_eq!(decoded.last_id, "core_abc");
    }

    #[test]
    fn nested_field_lookup() {
        let value = json!({"data": {"amount": 10}});
        assert_eq!(get_field(&value, "data.amount"), Some(json!(10)));
    }
}
