/// Core: the mutable, hash-chained entity registry.
///
/// Each [`types::Entity`] carries a chain hash over
/// `(data, type, previous_hash)`; mutation requires the caller's
/// `based_on_hash` to match the current head, or the edit fails with
/// `lock_conflict`.
pub mod store;
pub mod types;

pub use store::{CoreStoreError, CoreStoreResult, EntityDeltaRecord, EntityStore, Parent};
pub use types::{compute_entity_hash, EditOps, Entity, EntityType, UserRelation};
