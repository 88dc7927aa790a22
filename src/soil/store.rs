/// The Fact Store (Soil): append-only typed records with integrity hashing,
/// fidelity states, supersession links, and immutable structural relations.
///
/// Backed by a `DashMap` for lock-free concurrent reads, matching this
/// crate's storage-layer idiom: current state is indexed by id, with a
/// secondary index enforcing `(kind, source, target)` uniqueness on system
/// relations.
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value as JsonValue;

use crate::error::GardenError;
use crate::ids::{self, Layer};
use crate::query::{matches_all, Coverage, Effort, Filters};

use super::types::{Fact, FactSearchHit, FactType, Fidelity, SystemRelation, SystemRelationKind};

/// Soil's own fault type: storage-local validation and lookup failures,
/// kept distinct from [`GardenError`] so this module never has to know
/// about the wire-level error taxonomy. Converted at the component
/// boundary via the `From` impl below.
#[derive(thiserror::Error, Debug, Clone)]
pub enum SoilError {
    #[error("validation error: {message}")]
    Validation {
        message: String,
        details: Option<JsonValue>,
    },
    #[error("not found: {identifier}")]
    NotFound { identifier: String },
}

impl SoilError {
    fn validation_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        let field = field.into();
        let reason = reason.into();
        SoilError::Validation {
            message: format!("{field}: {reason}"),
            details: Some(serde_json::json!({ "field": field, "reason": reason })),
        }
    }

    fn not_found(identifier: impl Into<String>) -> Self {
        SoilError::NotFound {
            identifier: identifier.into(),
        }
    }
}

impl From<SoilError> for GardenError {
    fn from(e: SoilError) -> Self {
        match e {
            SoilError::Validation { message, details } => GardenError::Validation { message, details },
            SoilError::NotFound { identifier } => GardenError::NotFound { identifier },
        }
    }
}

pub type SoilResult<T> = Result<T, SoilError>;

/// Validate a fact payload against its type's minimal required-field schema.
///
/// Full user-defined schema registration is out of core scope; the
/// core still rejects payloads missing the fields every known type tag
/// requires, so `validation_error` is reachable and testable without that
/// registry.
fn validate_payload(fact_type: FactType, data: &JsonValue) -> SoilResult<()> {
    let required: &[&str] = match fact_type {
        FactType::Note => &["description"],
        FactType::Message => &["body"],
        FactType::Email => &["subject", "body"],
        FactType::ToolCall => &["tool_name"],
        FactType::EntityDelta => &["entity_uuid", "entity_type", "commit"],
        FactType::SystemEvent => &["kind"],
        FactType::Action => &["actor", "verb"],
        FactType::ActionResult => &["request_id"],
    };
    let obj = data
        .as_object()
        .ok_or_else(|| SoilError::validation_field("data", "payload must be a JSON object"))?;
    for field in required {
        if !obj.contains_key(*field) {
            return Err(SoilError::validation_field(
                *field,
                format!("required for fact type {fact_type}"),
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct FactStore {
    facts: DashMap<String, Fact>,
    /// `(kind, source, target)` -> relation id, enforcing uniqueness.
    relation_index: DashMap<(SystemRelationKind, String, String), String>,
    relations: DashMap<String, SystemRelation>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new fact. `canonical_at` defaults to `realized_at` when the
    /// caller doesn't supply one in `data["canonical_at"]`.
    pub fn add_fact(
        &self,
        fact_type: FactType,
        data: JsonValue,
        metadata: Option<JsonValue>,
    ) -> SoilResult<Fact> {
        validate_payload(fact_type, &data)?;
        let realized_at = Utc::now();
        let canonical_at = data
            .get("canonical_at")
            .and_then(|v| v.as_str())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(realized_at);

        let id = ids::new_id(Layer::Soil);
        let integrity_hash = ids::hash_bytes(&data, None);
        let fact = Fact {
            id: id.clone(),
            fact_type,
            realized_at,
            canonical_at,
            integrity_hash,
            fidelity: Fidelity::Full,
            superseded_by: None,
            superseded_at: None,
            fossilized_at: None,
            data,
            metadata: metadata.unwrap_or(JsonValue::Null),
        };
        self.facts.insert(id, fact.clone());
        Ok(fact)
    }

    /// Insert a fact as-is, bypassing validation and hash computation.
    /// Used only to replay a fact journaled by a previous process.
    pub fn restore_fact(&self, fact: Fact) {
        self.facts.insert(fact.id.clone(), fact);
    }

    /// Insert a system relation as-is, bypassing id minting. Used only to
    /// replay a relation journaled by a previous process.
    pub fn restore_system_relation(&self, relation: SystemRelation) {
        let key = (relation.kind, relation.source.clone(), relation.target.clone());
        self.relation_index.insert(key, relation.id.clone());
        self.relations.insert(relation.id.clone(), relation);
    }

    pub fn get_fact(&self, id: &str) -> SoilResult<Fact> {
        let id = ids::normalize(id, Layer::Soil);
        self.facts
            .get(&id)
            .map(|f| f.clone())
            .ok_or_else(|| SoilError::not_found(id))
    }

    /// List facts matching a filter set, newest-`realized_at`-first.
    pub fn list_facts(&self, filters: &Filters) -> Vec<Fact> {
        let mut out: Vec<Fact> = self
            .facts
            .iter()
            .map(|e| e.value().clone())
            .filter(|fact| {
                let projected = serde_json::json!({
                    "id": fact.id,
                    "fact_type": fact.fact_type,
                    "fidelity": fact.fidelity,
                    "superseded_by": fact.superseded_by,
                    "data": fact.data,
                    "metadata": fact.metadata,
                });
                matches_all(filters, &projected)
            })
            .collect();
        out.sort_by(|a, b| b.realized_at.cmp(&a.realized_at));
        out
    }

    /// Write a new fact whose payload supersedes `id`, and update the
    /// original's `superseded_by` in the same logical step (the Transaction
    /// Coordinator wraps both writes in one Soil transaction).
    pub fn amend_fact(&self, id: &str, new_payload: JsonValue) -> SoilResult<Fact> {
        let id = ids::normalize(id, Layer::Soil);
        let original = self
            .facts
            .get(&id)
            .map(|f| f.clone())
            .ok_or_else(|| SoilError::not_found(&id))?;

        let mut payload = new_payload;
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("supersedes".to_string(), JsonValue::String(id.clone()));
        }
        let amendment = self.add_fact(original.fact_type, payload, None)?;

        if let Some(mut entry) = self.facts.get_mut(&id) {
            entry.superseded_by = Some(amendment.id.clone());
            entry.superseded_at = Some(Utc::now());
        }
        Ok(amendment)
    }

    /// Advance a fact's fidelity one step, recording `fossilized_at` the
    /// first time it leaves `Full`. No-op (returns the fact unchanged) if
    /// already `Tombstone`.
    pub fn degrade_fidelity(&self, id: &str) -> SoilResult<Fact> {
        let id = ids::normalize(id, Layer::Soil);
        let mut entry = self
            .facts
            .get_mut(&id)
            .ok_or_else(|| SoilError::not_found(&id))?;
        if let Some(next) = entry.fidelity.degrade() {
            if entry.fidelity == Fidelity::Full {
                entry.fossilized_at = Some(Utc::now());
            }
            entry.fidelity = next;
        }
        Ok(entry.clone())
    }

    /// Insert a system relation. Re-submitting an existing
    /// `(kind, source, target)` triple is a no-op that returns the existing
    /// relation's identifier, so re-adding the same edge is a no-op.
    pub fn add_system_relation(
        &self,
        kind: SystemRelationKind,
        source: (String, String),
        target: (String, String),
        evidence: Option<JsonValue>,
    ) -> SystemRelation {
        self.add_system_relation_with_id(ids::new_id(Layer::Soil), kind, source, target, evidence)
    }

    /// Insert a system relation under a caller-chosen id rather than minting
    /// a fresh one. Used when an object migrates layers on fossilization: the
    /// resulting system relation keeps the expiring user relation's opaque
    /// suffix (`core_<suffix>` becomes `soil_<suffix>`) instead of losing that
    /// identity to a newly minted one. Still idempotent on the same
    /// `(kind, source, target)` triple.
    pub fn add_system_relation_with_id(
        &self,
        id: String,
        kind: SystemRelationKind,
        source: (String, String),
        target: (String, String),
        evidence: Option<JsonValue>,
    ) -> SystemRelation {
        let key = (kind, source.0.clone(), target.0.clone());
        if let Some(existing_id) = self.relation_index.get(&key) {
            return self.relations.get(existing_id.value()).unwrap().clone();
        }

        let relation = SystemRelation {
            id: id.clone(),
            kind,
            source: source.0,
            source_type: source.1,
            target: target.0,
            target_type: target.1,
            created_at: ids::current_day(),
            evidence,
            metadata: JsonValue::Null,
        };
        self.relations.insert(id.clone(), relation.clone());
        self.relation_index.insert(key, id);
        relation
    }

    pub fn get_system_relation(&self, id: &str) -> SoilResult<SystemRelation> {
        self.relations
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| SoilError::not_found(id))
    }

    /// All system relations with the given source, used by `track`/`explore`.
    pub fn relations_from(&self, source: &str) -> Vec<SystemRelation> {
        self.relations
            .iter()
            .filter(|e| e.value().source == source)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn relations_to(&self, target: &str) -> Vec<SystemRelation> {
        self.relations
            .iter()
            .filter(|e| e.value().target == target)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn fact_count(&self) -> usize {
        self.facts.len()
    }

    pub fn count_by_fidelity(&self) -> std::collections::HashMap<Fidelity, usize> {
        let mut counts = std::collections::HashMap::new();
        for entry in self.facts.iter() {
            *counts.entry(entry.value().fidelity).or_insert(0) += 1;
        }
        counts
    }

    /// Textual fields a coverage level indexes for a given fact, title-
    /// equivalents first so `names` coverage alone still finds the obvious
    /// match.
    fn indexed_text(&self, fact: &Fact, coverage: Coverage) -> Vec<String> {
        let mut fields = vec![fact.fact_type.to_string()];
        let name_fields = ["title", "subject", "name", "tool_name"];
        for key in name_fields {
            if let Some(v) = fact.data.get(key).and_then(|v| v.as_str()) {
                fields.push(v.to_string());
            }
        }
        if matches!(coverage, Coverage::Content | Coverage::Full) {
            for key in ["description", "body", "content"] {
                if let Some(v) = fact.data.get(key).and_then(|v| v.as_str()) {
                    fields.push(v.to_string());
                }
            }
        }
        if matches!(coverage, Coverage::Full) {
            if let Some(obj) = fact.metadata.as_object() {
                for v in obj.values() {
                    if let Some(s) = v.as_str() {
                        fields.push(s.to_string());
                    }
                }
            }
        }
        fields
    }

    /// Case-insensitive substring search over the fields `coverage` indexes,
    /// scored by raw occurrence count. `quick` effort caps the scanned set
    /// to the most recent 200 facts; `standard`/`deep` scan everything.
    /// This crate has no persistent cache to consult, so `quick` degrades
    /// gracefully to a bounded scan rather than a cache hit.
    pub fn search_facts(
        &self,
        query: &str,
        coverage: Coverage,
        effort: Effort,
    ) -> Vec<FactSearchHit> {
        let needle = query.to_lowercase();
        let mut candidates = self.list_facts(&Filters::new());
        if matches!(effort, Effort::Quick) {
            candidates.truncate(200);
        }

        let mut hits: Vec<FactSearchHit> = candidates
            .into_iter()
            .filter_map(|fact| {
                let score: f64 = self
                    .indexed_text(&fact, coverage)
                    .iter()
                    .map(|field| field.to_lowercase().matches(&needle).count() as f64)
                    .sum();
                if score > 0.0 {
                    Some(FactSearchHit { fact, score })
                } else {
                    None
                }
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_then_get_round_trips_payload() {
        let store = FactStore::new();
        let fact = store
            .add_fact(FactType::Note, json!({"description": "x"}), None)
            .unwrap();
        assert!(fact.id.starts_with("soil_"));
        let fetched = store.get_fact(&fact.id).unwrap();
        assert_eq!(
            ids::canonical_json(&fetched.data),
            ids::canonical_json(&json!({"description": "x"}))
        );
    }

    #[test]
    fn add_fact_rejects_missing_required_field() {
        let store = FactStore::new();
        let err: GardenError = store.add_fact(FactType::Note, json!({}), None).unwrap_err().into();
        assert_eq!(err.code(), crate::error::ErrorCode::ValidationError);
    }

    #[test]
    fn amend_links_supersession_both_ways() {
        let store = FactStore::new();
        let f1 = store
            .add_fact(FactType::Note, json!({"description": "x"}), None)
            .unwrap();
        let f2 = store
            .amend_fact(&f1.id, json!({"description": "y"}))
            .unwrap();

        assert_eq!(f2.data["supersedes"], json!(f1.id));
        let f1_after = store.get_fact(&f1.id).unwrap();
        assert_eq!(f1_after.superseded_by, Some(f2.id.clone()));

        let filters = Filters::new();
        let not_superseded: Vec<_> = store
            .list_facts(&filters)
            .into_iter()
            .filter(|f| f.superseded_by.is_none())
            .collect();
        assert!(!not_superseded.iter().any(|f| f.id == f1.id));
    }

    #[test]
    fn duplicate_system_relation_is_idempotent() {
        let store = FactStore::new();
        let r1 = store.add_system_relation(
            SystemRelationKind::ResultOf,
            ("soil_a".to_string(), "action_result".to_string()),
            ("soil_b".to_string(), "action".to_string()),
            None,
        );
        let r2 = store.add_system_relation(
            SystemRelationKind::ResultOf,
            ("soil_a".to_string(), "action_result".to_string()),
            ("soil_b".to_string(), "action".to_string()),
            None,
        );
        assert_eq!(r1.id, r2.id);
    }

    #[test]
    fn fidelity_only_moves_forward() {
        let store = FactStore::new();
        let f = store
            .add_fact(FactType::Note, json!({"description": "x"}), None)
            .unwrap();
        assert_eq!(f.fidelity, Fidelity::Full);
        let f = store.degrade_fidelity(&f.id).unwrap();
        assert_eq!(f.fidelity, Fidelity::Summary);
        assert!(f.fossilized_at.is_some());
        let f = store.degrade_fidelity(&f.id).unwrap();
        assert_eq!(f.fidelity, Fidelity::Stub);
        let f = store.degrade_fidelity(&f.id).unwrap();
        assert_eq!(f.fidelity, Fidelity::Tombstone);
        let f = store.degrade_fidelity(&f.id).unwrap();
        assert_eq!(f.fidelity, Fidelity::Tombstone);
    }
}
