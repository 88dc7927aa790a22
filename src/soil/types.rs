/// Data types for the Soil fact store: [`Fact`], [`Fidelity`], and the
/// immutable [`SystemRelation`] edges between facts and entities.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Discriminated fact type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactType {
    Note,
    Message,
    Email,
    ToolCall,
    EntityDelta,
    SystemEvent,
    Action,
    ActionResult,
}

impl std::fmt::Display for FactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FactType::Note => "note",
            FactType::Message => "message",
            FactType::Email => "email",
            FactType::ToolCall => "tool_call",
            FactType::EntityDelta => "entity_delta",
            FactType::SystemEvent => "system_event",
            FactType::Action => "action",
            FactType::ActionResult => "action_result",
        };
        write!(f, "{s}")
    }
}

/// Fidelity state. Monotone in this order: a fact's fidelity never moves
/// backward. `Tombstone` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fidelity {
    Full,
    Summary,
    Stub,
    Tombstone,
}

impl Fidelity {
    /// The next fidelity state in the degradation order, or `None` if
    /// already terminal.
    pub fn degrade(self) -> Option<Fidelity> {
        match self {
            Fidelity::Full => Some(Fidelity::Summary),
            Fidelity::Summary => Some(Fidelity::Stub),
            Fidelity::Stub => Some(Fidelity::Tombstone),
            Fidelity::Tombstone => None,
        }
    }
}

/// An immutable entry in the Soil timeline.
///
/// Once written, no field changes except `superseded_by`, `superseded_at`,
/// `fidelity`, and `fossilized_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: String,
    pub fact_type: FactType,
    /// Wall-clock time when recorded. Immutable.
    pub realized_at: DateTime<Utc>,
    /// Caller-supplied subjective time. Defaults to `realized_at`, and is
    /// immutable once set.
    pub canonical_at: DateTime<Utc>,
    /// SHA-256 hash over the canonical payload.
    pub integrity_hash: String,
    pub fidelity: Fidelity,
    /// Identifier of the fact that superseded this one, if amended.
    pub superseded_by: Option<String>,
    pub superseded_at: Option<DateTime<Utc>>,
    /// Set when fidelity first degrades from `Full`.
    pub fossilized_at: Option<DateTime<Utc>>,
    /// Type-specific, schema-validated payload.
    pub data: JsonValue,
    /// Unvalidated extensions.
    pub metadata: JsonValue,
}

impl Fact {
    /// Recompute the integrity hash from the stored payload, for
    /// verification on read.
    pub fn recompute_integrity_hash(&self) -> String {
        crate::ids::hash_bytes(&self.data, None)
    }
}

/// Kind of an immutable, structural system relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemRelationKind {
    Triggers,
    Cites,
    RepliesTo,
    DerivesFrom,
    Contains,
    Continues,
    Supersedes,
    ResultOf,
    /// A fossilized user relation, recorded as an immutable structural fact.
    ExplicitLink,
}

/// An immutable directed edge recorded in Soil. Uniqueness on
/// `(kind, source, target)`; duplicate inserts are no-ops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemRelation {
    pub id: String,
    pub kind: SystemRelationKind,
    pub source: String,
    pub source_type: String,
    pub target: String,
    pub target_type: String,
    /// Days since the fixed epoch (2020-01-01 UTC).
    pub created_at: i64,
    pub evidence: Option<JsonValue>,
    pub metadata: JsonValue,
}

impl SystemRelation {
    /// The `(kind, source, target)` uniqueness key.
    pub fn unique_key(&self) -> (SystemRelationKind, &str, &str) {
        (self.kind, self.source.as_str(), self.target.as_str())
    }
}

/// Search result coverage/effort knobs live in [`crate::query`]; this is the
/// per-fact projection `search_facts` returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactSearchHit {
    pub fact: Fact,
    pub score: f64,
}
