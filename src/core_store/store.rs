/// The Entity Store (Core): hash-chained mutable records with optimistic
/// locking, reachable via `create`/`get`/`edit`/`forget`/`query`.
///
/// Every successful mutation returns, alongside the new [`Entity`] state, an
/// [`EntityDeltaRecord`] describing the mutation. The Entity Store never
/// writes that delta into Soil itself — that atomic pairing is the
/// Transaction Coordinator's job — it only computes what the
/// delta must contain.
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value as JsonValue;

use crate::error::GardenError;
use crate::ids::{self, Layer};
use crate::query::{matches_all, Filters};

use super::types::{compute_entity_hash, EditOps, Entity, EntityType};

/// The Entity Store's own fault type: validation, lookup, and optimistic-lock
/// failures local to Core, converted to [`GardenError`] at the component
/// boundary via the `From` impl below.
#[derive(thiserror::Error, Debug, Clone)]
pub enum CoreStoreError {
    #[error("validation error: {message}")]
    Validation {
        message: String,
        details: Option<JsonValue>,
    },
    #[error("not found: {identifier}")]
    NotFound { identifier: String },
    #[error("lock conflict: {message}")]
    LockConflict {
        message: String,
        expected_hash: String,
        actual_hash: String,
        entity_id: String,
    },
}

impl CoreStoreError {
    fn validation_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        let field = field.into();
        let reason = reason.into();
        CoreStoreError::Validation {
            message: format!("{field}: {reason}"),
            details: Some(serde_json::json!({ "field": field, "reason": reason })),
        }
    }

    fn not_found(identifier: impl Into<String>) -> Self {
        CoreStoreError::NotFound {
            identifier: identifier.into(),
        }
    }

    fn lock_conflict(entity_id: impl Into<String>, expected_hash: impl Into<String>, actual_hash: impl Into<String>) -> Self {
        let entity_id = entity_id.into();
        let expected_hash = expected_hash.into();
        let actual_hash = actual_hash.into();
        CoreStoreError::LockConflict {
            message: format!(
                "hash mismatch for {entity_id}: expected {expected_hash}, found {actual_hash}"
            ),
            expected_hash,
            actual_hash,
            entity_id,
        }
    }
}

impl From<CoreStoreError> for GardenError {
    fn from(e: CoreStoreError) -> Self {
        match e {
            CoreStoreError::Validation { message, details } => GardenError::Validation { message, details },
            CoreStoreError::NotFound { identifier } => GardenError::NotFound { identifier },
            CoreStoreError::LockConflict {
                message,
                expected_hash,
                actual_hash,
                entity_id,
            } => GardenError::LockConflict {
                message,
                expected_hash: Some(expected_hash),
                actual_hash: Some(actual_hash),
                entity_id: Some(entity_id),
            },
        }
    }
}

pub type CoreStoreResult<T> = Result<T, CoreStoreError>;

/// Which prior commits an [`EntityDeltaRecord`] descends from: `Create` has
/// none, `Edit` has exactly one, `Merge` has several (for future merge
/// operations, left open via `derived_from`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind")]
pub enum Parent {
    Create,
    Edit { parent: String },
    Merge { parents: Vec<String> },
}

/// The delta a mutation produces, destined for the Soil `EntityDelta` fact
/// that must land in the same coordinated transaction as the Core write.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EntityDeltaRecord {
    pub entity_uuid: String,
    pub entity_type: EntityType,
    pub commit: String,
    pub parent: Parent,
    pub ops: EditOps,
}

fn validate_payload(entity_type: EntityType, data: &JsonValue) -> CoreStoreResult<()> {
    let required: &[&str] = match entity_type {
        EntityType::Transaction => &["amount", "description"],
        EntityType::Artifact => &["title"],
        EntityType::Label => &["name"],
        EntityType::Scope => &["name"],
        _ => &[],
    };
    let obj = data
        .as_object()
        .ok_or_else(|| CoreStoreError::validation_field("data", "payload must be a JSON object"))?;
    for field in required {
        if !obj.contains_key(*field) {
            return Err(CoreStoreError::validation_field(
                *field,
                format!("required for entity type {entity_type}"),
            ));
        }
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct EntityStore {
    entities: DashMap<String, Entity>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_entity(
        &self,
        entity_type: EntityType,
        data: JsonValue,
        derived_from: Vec<String>,
    ) -> CoreStoreResult<(Entity, EntityDeltaRecord)> {
        let (entity, delta) = self.stage_create(entity_type, data, derived_from)?;
        self.commit_entity(entity.clone());
        Ok((entity, delta))
    }

    /// Compute the entity this create would produce, without writing it.
    /// The Transaction Coordinator uses this to get an `EntityDeltaRecord`
    /// for the Soil write that must land before the Core write commits.
    pub fn stage_create(
        &self,
        entity_type: EntityType,
        data: JsonValue,
        derived_from: Vec<String>,
    ) -> CoreStoreResult<(Entity, EntityDeltaRecord)> {
        validate_payload(entity_type, &data)?;
        let hash = compute_entity_hash(&data, entity_type, None);
        let now = Utc::now();
        let id = ids::new_id(Layer::Core);
        let entity = Entity {
            id: id.clone(),
            entity_type,
            hash: hash.clone(),
            previous_hash: None,
            version: 1,
            created_at: now,
            updated_at: now,
            group_id: None,
            superseded_by: None,
            derived_from,
            data,
            forgotten: false,
        };

        let delta = EntityDeltaRecord {
            entity_uuid: id,
            entity_type,
            commit: hash,
            parent: Parent::Create,
            ops: EditOps::default(),
        };
        Ok((entity, delta))
    }

    /// Write a staged entity into Core. Callers that already hold the
    /// Coordinator's Core writer slot call this after the paired Soil write
    /// has committed.
    pub fn commit_entity(&self, entity: Entity) {
        self.entities.insert(entity.id.clone(), entity);
    }

    pub fn get_entity(&self, id: &str) -> CoreStoreResult<Entity> {
        let id = ids::normalize(id, Layer::Core);
        self.entities
            .get(&id)
            .map(|e| e.clone())
            .ok_or_else(|| CoreStoreError::not_found(id))
    }

    /// Apply `ops` to the entity, failing with `lock_conflict` if
    /// `based_on_hash` doesn't match the entity's current hash.
    pub fn edit_entity(
        &self,
        id: &str,
        ops: EditOps,
        based_on_hash: &str,
    ) -> CoreStoreResult<(Entity, EntityDeltaRecord)> {
        let (entity, delta) = self.stage_edit(id, ops, based_on_hash)?;
        self.commit_entity(entity.clone());
        Ok((entity, delta))
    }

    /// Compute the entity an edit would produce, without writing it. See
    /// [`Self::stage_create`] for why the Coordinator needs this split.
    pub fn stage_edit(
        &self,
        id: &str,
        ops: EditOps,
        based_on_hash: &str,
    ) -> CoreStoreResult<(Entity, EntityDeltaRecord)> {
        let id = ids::normalize(id, Layer::Core);
        let current = self
            .entities
            .get(&id)
            .map(|e| e.clone())
            .ok_or_else(|| CoreStoreError::not_found(&id))?;

        if current.hash != based_on_hash {
            return Err(CoreStoreError::lock_conflict(&id, based_on_hash, &current.hash));
        }

        let new_data = ops.apply(&current.data);
        let new_hash = compute_entity_hash(&new_data, current.entity_type, Some(&current.hash));

        let mut entity = current.clone();
        entity.previous_hash = Some(current.hash.clone());
        entity.hash = new_hash.clone();
        entity.version += 1;
        entity.updated_at = Utc::now();
        entity.data = new_data;

        let delta = EntityDeltaRecord {
            entity_uuid: id,
            entity_type: entity.entity_type,
            commit: new_hash,
            parent: Parent::Edit {
                parent: current.hash,
            },
            ops,
        };
        Ok((entity, delta))
    }

    /// Soft-delete: sets a marker in `data`, bumps the hash chain like any
    /// other edit. The entity remains readable by id for history traversal.
    pub fn forget_entity(&self, id: &str) -> CoreStoreResult<(Entity, EntityDeltaRecord)> {
        let (entity, delta) = self.stage_forget(id)?;
        self.commit_entity(entity.clone());
        Ok((entity, delta))
    }

    pub fn stage_forget(&self, id: &str) -> CoreStoreResult<(Entity, EntityDeltaRecord)> {
        let id = ids::normalize(id, Layer::Core);
        let based_on_hash = self.get_entity(&id)?.hash;
        let mut ops = EditOps::default();
        ops.set
            .insert("_forgotten".to_string(), JsonValue::Bool(true));
        let (mut entity, delta) = self.stage_edit(&id, ops, &based_on_hash)?;
        entity.forgotten = true;
        Ok((entity, delta))
    }

    /// Query entities matching `filters`, excluding forgotten entities by
    /// default, ordered by `updated_at` descending unless `order_by` names
    /// another top-level field.
    pub fn query_entities(
        &self,
        filters: &Filters,
        include_forgotten: bool,
        limit: Option<usize>,
        offset: usize,
    ) -> Vec<Entity> {
        let mut out: Vec<Entity> = self
            .entities
            .iter()
            .map(|e| e.value().clone())
            .filter(|e| include_forgotten || !e.forgotten)
            .filter(|e| {
                let projected = serde_json::json!({
                    "id": e.id,
                    "entity_type": e.entity_type,
                    "group_id": e.group_id,
                    "data": e.data,
                });
                matches_all(filters, &projected)
            })
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let mut out: Vec<Entity> = out.into_iter().skip(offset).collect();
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        out
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn count_by_type(&self) -> std::collections::HashMap<EntityType, usize> {
        let mut counts = std::collections::HashMap::new();
        for entry in self.entities.iter() {
            *counts.entry(entry.value().entity_type).or_insert(0) += 1;
        }
        counts
    }

    /// Every hash-chain entry that should exist as a Soil `EntityDelta`
    /// (used by the Transaction Coordinator's startup consistency check).
    pub fn chain_heads(&self) -> Vec<(String, String, Option<String>)> {
        self.entities
            .iter()
            .map(|e| (e.value().id.clone(), e.value().hash.clone(), e.value().previous_hash.clone()))
            .collect()
    }
}
