/// Data types for the Core entity registry: the hash-chained [`Entity`] and
/// the decaying [`UserRelation`].
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Transaction,
    Recurrence,
    Artifact,
    Label,
    Operator,
    Agent,
    Scope,
    ConversationLog,
    ContextFrame,
    View,
    ViewMerge,
}

impl EntityType {
    /// Substantive types update a frame's `containers` on access; primitive
    /// types do not. This table is fixed for now; it could become
    /// data-driven later.
    pub fn is_substantive(self) -> bool {
        matches!(
            self,
            EntityType::Artifact
                | EntityType::Transaction
                | EntityType::Recurrence
                | EntityType::ConversationLog
                | EntityType::Scope
        )
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityType::Transaction => "transaction",
            EntityType::Recurrence => "recurrence",
            EntityType::Artifact => "artifact",
            EntityType::Label => "label",
            EntityType::Operator => "operator",
            EntityType::Agent => "agent",
            EntityType::Scope => "scope",
            EntityType::ConversationLog => "conversation_log",
            EntityType::ContextFrame => "context_frame",
            EntityType::View => "view",
            EntityType::ViewMerge => "view_merge",
        };
        write!(f, "{s}")
    }
}

/// A mutable, hash-chained object in Core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub entity_type: EntityType,
    /// `H(data, type, previous_hash)`.
    pub hash: String,
    /// Null iff `version == 1`.
    pub previous_hash: Option<String>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub group_id: Option<String>,
    pub superseded_by: Option<String>,
    pub derived_from: Vec<String>,
    pub data: JsonValue,
    /// Set by `forget`; the entity remains readable by id, but is excluded
    /// from default queries.
    pub forgotten: bool,
}

impl Entity {
    /// Recompute the chain hash over the current `(data, type, previous_hash)`
    /// triple, for hash-chain verification.
    pub fn recompute_hash(&self) -> String {
        compute_entity_hash(&self.data, self.entity_type, self.previous_hash.as_deref())
    }
}

pub fn compute_entity_hash(
    data: &JsonValue,
    entity_type: EntityType,
    previous_hash: Option<&str>,
) -> String {
    let payload = serde_json::json!({ "data": data, "type": entity_type.to_string() });
    crate::ids::hash_bytes(&payload, previous_hash)
}

/// Set/unset instructions for an edit. `set` values of `null` mean
/// "unknown", never "delete" — clearing a field requires `unset`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EditOps {
    #[serde(default)]
    pub set: std::collections::BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub unset: Vec<String>,
}

impl EditOps {
    /// Apply these ops to `base`, returning the merged payload.
    pub fn apply(&self, base: &JsonValue) -> JsonValue {
        let mut obj = base.as_object().cloned().unwrap_or_default();
        for (path, value) in &self.set {
            obj.insert(path.clone(), value.clone());
        }
        for path in &self.unset {
            obj.remove(path);
        }
        JsonValue::Object(obj)
    }
}

/// A mutable, decaying directed edge in Core. Moves to Soil (and the
/// `soil_` prefix) on fossilization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRelation {
    pub id: String,
    pub kind: String,
    pub source: String,
    pub source_type: String,
    pub target: String,
    pub target_type: String,
    /// Integer day since the fixed epoch on which this relation is no
    /// longer alive absent a refreshing access.
    pub time_horizon: i64,
    pub last_access_at: i64,
    pub created_at: i64,
    pub evidence: Option<JsonValue>,
    pub metadata: JsonValue,
}

impl UserRelation {
    pub fn alive(&self, current_day: i64) -> bool {
        self.time_horizon >= current_day
    }
}
