/// Transaction Coordinator: the only component allowed to commit a Core
/// entity mutation, because every such mutation must be paired with an
/// `EntityDelta` fact in Soil inside one coordinated transaction. Commit
/// order is Soil, then Core — an orphaned delta is repairable; a Core
/// mutation with no delta is not.
use std::io;
use std::path::Path;
use std::sync::{Mutex, RwLock};
use std::time::{Duration, Instant};

use serde_json::Value as JsonValue;

use crate::core_store::{Entity, EntityDeltaRecord, EntityStore, EntityType, Parent};
use crate::error::{GardenError, GardenResult};
use crate::persistence::{self, LockGuard, LockState};
use crate::relations::SweepReport;
use crate::soil::{Fact, FactStore, FactType, SystemRelation};

/// One line of the Soil journal: either a fact or a system relation, the two
/// record kinds [`crate::soil::FactStore`] owns.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum SoilJournalEntry {
    Fact(Fact),
    SystemRelation(SystemRelation),
}

/// Process-wide health signal, updated only by the coordinator and the
/// startup check. Reads are lock-free snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    Normal,
    Inconsistent,
    ReadOnly,
    SafeMode,
}

/// Report produced by [`Coordinator::startup_check`].
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ConsistencyReport {
    pub orphaned_deltas: Vec<String>,
    pub broken_chains: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_deltas.is_empty() && self.broken_chains.is_empty()
    }
}

pub struct Coordinator {
    pub soil: FactStore,
    pub entities: EntityStore,
    soil_writer: Mutex<()>,
    core_writer: Mutex<()>,
    status: RwLock<SystemStatus>,
    busy_timeout: Duration,
    soil_journal: Option<Mutex<persistence::Journal<SoilJournalEntry>>>,
    core_journal: Option<Mutex<persistence::Journal<Entity>>>,
    /// Held only to keep the lock files `RUNNING` for the Coordinator's
    /// lifetime; released (marked `CLEAN`) on drop.
    _soil_lock: Option<LockGuard>,
    _core_lock: Option<LockGuard>,
}

/// Acquire `mutex`, polling until `timeout` elapses, matching the
/// bounded-wait-then-`lock_conflict` contract for writer slots.
/// Storage here is in-process `DashMap`s rather than a file-backed engine,
/// so the slot only needs to serialize the handful of steps in a
/// coordinated transaction, not an actual disk flush.
fn acquire_with_timeout<'a>(
    mutex: &'a Mutex<()>,
    timeout: Duration,
    database: &str,
) -> GardenResult<std::sync::MutexGuard<'a, ()>> {
    let deadline = Instant::now() + timeout;
    loop {
        match mutex.try_lock() {
            Ok(guard) => return Ok(guard),
            Err(std::sync::TryLockError::Poisoned(_)) => {
                return Err(GardenError::internal(format!("{database} writer slot poisoned")))
            }
            Err(std::sync::TryLockError::WouldBlock) => {
                if Instant::now() >= deadline {
                    return Err(GardenError::busy_timeout(database));
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }
}

impl Coordinator {
    pub fn new(busy_timeout: Duration) -> Self {
        Coordinator {
            soil: FactStore::new(),
            entities: EntityStore::new(),
            soil_writer: Mutex::new(()),
            core_writer: Mutex::new(()),
            status: RwLock::new(SystemStatus::Normal),
            busy_timeout,
            soil_journal: None,
            core_journal: None,
            _soil_lock: None,
            _core_lock: None,
        }
    }

    /// Build a Coordinator backed by durable journals at `soil_path` and
    /// `core_path`, replaying their existing contents into fresh stores.
    /// A record's last occurrence in a journal wins on replay, since each
    /// append is keyed by the same id a later amendment/edit reuses.
    pub fn open(busy_timeout: Duration, soil_path: &Path, core_path: &Path) -> io::Result<Self> {
        let soil_opened = persistence::Journal::<SoilJournalEntry>::open(soil_path)?;
        let core_opened = persistence::Journal::<Entity>::open(core_path)?;

        if soil_opened.lock_state == LockState::Unclean {
            tracing::warn!(path = %soil_path.display(), "soil journal was not shut down cleanly; replaying existing entries");
        }
        if core_opened.lock_state == LockState::Unclean {
            tracing::warn!(path = %core_path.display(), "core journal was not shut down cleanly; replaying existing entries");
        }

        let soil = FactStore::new();
        for entry in soil_opened.records {
            match entry {
                SoilJournalEntry::Fact(fact) => soil.restore_fact(fact),
                SoilJournalEntry::SystemRelation(relation) => soil.restore_system_relation(relation),
            }
        }
        let entities = EntityStore::new();
        for entity in core_opened.records {
            entities.commit_entity(entity);
        }

        Ok(Coordinator {
            soil,
            entities,
            soil_writer: Mutex::new(()),
            core_writer: Mutex::new(()),
            status: RwLock::new(SystemStatus::Normal),
            busy_timeout,
            soil_journal: Some(Mutex::new(soil_opened.journal)),
            core_journal: Some(Mutex::new(core_opened.journal)),
            _soil_lock: Some(soil_opened.lock_guard),
            _core_lock: Some(core_opened.lock_guard),
        })
    }

    /// Append `fact` to the Soil journal, if one is open. A no-op for a
    /// pure in-memory Coordinator (built via [`Coordinator::new`]).
    fn flush_soil_fact(&self, fact: &Fact) -> GardenResult<()> {
        let Some(journal) = &self.soil_journal else {
            return Ok(());
        };
        journal
            .lock()
            .expect("soil journal lock not poisoned")
            .append(&SoilJournalEntry::Fact(fact.clone()))
            .map_err(|e| GardenError::internal(format!("failed to flush Soil fact: {e}")))
    }

    fn flush_soil_relation(&self, relation: &SystemRelation) -> GardenResult<()> {
        let Some(journal) = &self.soil_journal else {
            return Ok(());
        };
        journal
            .lock()
            .expect("soil journal lock not poisoned")
            .append(&SoilJournalEntry::SystemRelation(relation.clone()))
            .map_err(|e| GardenError::internal(format!("failed to flush Soil relation: {e}")))
    }

    /// Append `entity` to the Core journal, if one is open.
    fn flush_core_entity(&self, entity: &Entity) -> GardenResult<()> {
        let Some(journal) = &self.core_journal else {
            return Ok(());
        };
        journal
            .lock()
            .expect("core journal lock not poisoned")
            .append(entity)
            .map_err(|e| GardenError::internal(format!("failed to flush Core entity: {e}")))
    }

    /// Flush the effects of a fossilization sweep: the system relation minted
    /// for each fossilized user relation and the post-degradation state of
    /// each affected fact. Called by [`crate::Garden::sweep`], which (unlike
    /// entity/fact mutations) talks to the stores directly rather than
    /// through a coordinated-transaction method on this type.
    pub(crate) fn flush_sweep_report(&self, report: &SweepReport) {
        for relation_id in &report.fossilized_relations {
            let soil_id = crate::ids::reprefix(relation_id, crate::ids::Layer::Soil);
            if let Ok(relation) = self.soil.get_system_relation(&soil_id) {
                let _ = self.flush_soil_relation(&relation);
            }
        }
        for fact_id in &report.degraded_facts {
            if let Ok(fact) = self.soil.get_fact(fact_id) {
                let _ = self.flush_soil_fact(&fact);
            }
        }
    }

    pub fn status(&self) -> SystemStatus {
        *self.status.read().expect("status lock not poisoned")
    }

    pub fn set_status(&self, status: SystemStatus) {
        let previous = self.status();
        *self.status.write().expect("status lock not poisoned") = status;
        if status == previous {
            return;
        }
        let diagnostic_id = uuid::Uuid::new_v4().to_string();
        match status {
            SystemStatus::Normal => {
                tracing::info!(?previous, ?status, diagnostic_id, "system status transition")
            }
            SystemStatus::Inconsistent => {
                tracing::warn!(?previous, ?status, diagnostic_id, "system status transition")
            }
            SystemStatus::ReadOnly | SystemStatus::SafeMode => {
                tracing::error!(?previous, ?status, diagnostic_id, "system status transition")
            }
        }
    }

    fn guard_writable(&self) -> GardenResult<()> {
        match self.status() {
            SystemStatus::ReadOnly => Err(GardenError::permission_denied(
                "system is in read_only mode",
            )),
            SystemStatus::SafeMode => Err(GardenError::permission_denied(
                "system is in safe_mode; only diagnostics are available",
            )),
            SystemStatus::Normal | SystemStatus::Inconsistent => Ok(()),
        }
    }

    fn delta_payload(delta: &EntityDeltaRecord, context: &[String]) -> JsonValue {
        serde_json::json!({
            "entity_uuid": delta.entity_uuid,
            "entity_type": delta.entity_type.to_string(),
            "commit": delta.commit,
            "parent": delta.parent,
            "ops": delta.ops,
            "context": context,
        })
    }

    /// Run the staged entity mutation + paired `EntityDelta` fact as one
    /// coordinated transaction: Soil commits first, then Core.
    fn run_coordinated(
        &self,
        staged: GardenResult<(Entity, EntityDeltaRecord)>,
        context: Vec<String>,
    ) -> GardenResult<(Entity, Fact)> {
        self.guard_writable()?;
        let (entity, delta) = staged?;

        let _soil_slot = acquire_with_timeout(&self.soil_writer, self.busy_timeout, "soil")?;
        let _core_slot = acquire_with_timeout(&self.core_writer, self.busy_timeout, "core")?;

        let delta_fact = self
            .soil
            .add_fact(FactType::EntityDelta, Self::delta_payload(&delta, &context), None)
            .map_err(GardenError::from)?;
        self.flush_soil_fact(&delta_fact)?;

        self.entities.commit_entity(entity.clone());
        self.flush_core_entity(&entity)?;
        Ok((entity, delta_fact))
    }

    pub fn create_entity(
        &self,
        entity_type: EntityType,
        data: JsonValue,
        derived_from: Vec<String>,
        context: Vec<String>,
    ) -> GardenResult<(Entity, Fact)> {
        self.run_coordinated(
            self.entities
                .stage_create(entity_type, data, derived_from)
                .map_err(GardenError::from),
            context,
        )
    }

    pub fn edit_entity(
        &self,
        id: &str,
        ops: crate::core_store::EditOps,
        based_on_hash: &str,
        context: Vec<String>,
    ) -> GardenResult<(Entity, Fact)> {
        self.run_coordinated(
            self.entities.stage_edit(id, ops, based_on_hash).map_err(GardenError::from),
            context,
        )
    }

    pub fn forget_entity(&self, id: &str, context: Vec<String>) -> GardenResult<(Entity, Fact)> {
        self.run_coordinated(self.entities.stage_forget(id).map_err(GardenError::from), context)
    }

    /// Soil-only transaction: `add`/`amend` on facts never touch Core.
    pub fn add_fact(
        &self,
        fact_type: FactType,
        data: JsonValue,
        metadata: Option<JsonValue>,
    ) -> GardenResult<Fact> {
        self.guard_writable()?;
        let _slot = acquire_with_timeout(&self.soil_writer, self.busy_timeout, "soil")?;
        let fact = self.soil.add_fact(fact_type, data, metadata).map_err(GardenError::from)?;
        self.flush_soil_fact(&fact)?;
        Ok(fact)
    }

    pub fn amend_fact(&self, id: &str, new_payload: JsonValue) -> GardenResult<Fact> {
        self.guard_writable()?;
        let _slot = acquire_with_timeout(&self.soil_writer, self.busy_timeout, "soil")?;
        let amendment = self.soil.amend_fact(id, new_payload).map_err(GardenError::from)?;
        self.flush_soil_fact(&amendment)?;
        // `amend_fact` also mutated the original's `superseded_by`/
        // `superseded_at` in place; flush its new state so replay sees it.
        if let Ok(original) = self.soil.get_fact(id) {
            self.flush_soil_fact(&original)?;
        }
        Ok(amendment)
    }

    /// Startup consistency scan: every `EntityDelta` must have a
    /// matching Core entity at its `commit` hash, and every entity whose
    /// `previous_hash` is non-null must be explained by a delta chain back
    /// to creation. Violations set `inconsistent` but never block startup.
    pub fn startup_check(&self) -> ConsistencyReport {
        let mut report = ConsistencyReport::default();

        let deltas = self.soil.list_facts(&crate::query::Filters::new());
        for fact in deltas.iter().filter(|f| f.fact_type == FactType::EntityDelta) {
            let Some(commit) = fact.data.get("commit").and_then(|v| v.as_str()) else {
                continue;
            };
            let Some(entity_uuid) = fact.data.get("entity_uuid").and_then(|v| v.as_str()) else {
                continue;
            };
            match self.entities.get_entity(entity_uuid) {
                Ok(entity) if entity.hash == commit || entity.previous_hash.as_deref() == Some(commit) => {}
                _ => report.orphaned_deltas.push(fact.id.clone()),
            }
        }

        for (id, hash, _previous) in self.entities.chain_heads() {
            if let Ok(entity) = self.entities.get_entity(&id) {
                if entity.recompute_hash() != hash {
                    report.broken_chains.push(id);
                }
            }
        }

        if report.is_clean() {
            self.set_status(SystemStatus::Normal);
        } else {
            self.set_status(SystemStatus::Inconsistent);
        }
        report
    }

    /// Replay a single orphaned `EntityDelta` against Core, used by `repair`.
    /// Only supports the `Edit`/`Create` shapes this crate itself produces.
    pub fn repair_delta(&self, delta_fact_id: &str) -> GardenResult<Entity> {
        let fact = self.soil.get_fact(delta_fact_id)?;
        if fact.fact_type != FactType::EntityDelta {
            return Err(GardenError::validation_field(
                "delta_fact_id",
                "fact is not an EntityDelta",
            ));
        }
        let entity_uuid = fact
            .data
            .get("entity_uuid")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GardenError::internal("EntityDelta fact missing entity_uuid"))?;
        let ops: crate::core_store::EditOps = fact
            .data
            .get("ops")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();

        let parent: Parent = fact
            .data
            .get("parent")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or(Parent::Create);

        let _core_slot = acquire_with_timeout(&self.core_writer, self.busy_timeout, "core")?;
        match parent {
            Parent::Create => {
                let entity_type: EntityType = serde_json::from_value(
                    fact.data
                        .get("entity_type")
                        .cloned()
                        .unwrap_or(JsonValue::String("artifact".to_string())),
                )
                .unwrap_or(EntityType::Artifact);
                let (entity, _) = self.entities.stage_create(entity_type, ops.apply(&JsonValue::Null), vec![])?;
                self.entities.commit_entity(entity.clone());
                self.flush_core_entity(&entity)?;
                Ok(entity)
            }
            Parent::Edit { parent } => {
                let (entity, _) = self.entities.stage_edit(entity_uuid, ops, &parent)?;
                self.entities.commit_entity(entity.clone());
                self.flush_core_entity(&entity)?;
                Ok(entity)
            }
            Parent::Merge { .. } => Err(GardenError::internal(
                "repair of merge deltas is not supported",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn coordinator() -> Coordinator {
        Coordinator::new(Duration::from_secs(5))
    }

    #[test]
    fn coordinated_create_writes_delta_before_entity_is_visible() {
        let coord = coordinator();
        let (entity, delta_fact) = coord
            .create_entity(
                EntityType::Artifact,
                json!({"title": "t"}),
                vec![],
                vec!["core_scope_x".to_string()],
            )
            .unwrap();
        assert_eq!(delta_fact.fact_type, FactType::EntityDelta);
        assert_eq!(delta_fact.data["entity_uuid"], json!(entity.id));
        assert_eq!(delta_fact.data["context"], json!(["core_scope_x"]));

        let fetched = coord.entities.get_entity(&entity.id).unwrap();
        assert_eq!(fetched.hash, entity.hash);
    }

    #[test]
    fn read_only_status_blocks_writes() {
        let coord = coordinator();
        coord.set_status(SystemStatus::ReadOnly);
        let err = coord
            .create_entity(EntityType::Artifact, json!({"title": "t"}), vec![], vec![])
            .unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::PermissionDenied);
    }

    #[test]
    fn startup_check_reports_clean_state_for_matching_chain() {
        let coord = coordinator();
        coord
            .create_entity(EntityType::Artifact, json!({"title": "t"}), vec![], vec![])
            .unwrap();
        let report = coord.startup_check();
        assert!(report.is_clean());
        assert_eq!(coord.status(), SystemStatus::Normal);
    }

    #[test]
    fn startup_check_flags_orphaned_delta() {
        let coord = coordinator();
        coord
            .soil
            .add_fact(
                FactType::EntityDelta,
                json!({"entity_uuid": "core_missing", "entity_type": "artifact", "commit": "deadbeef"}),
                None,
            )
            .unwrap();
        let report = coord.startup_check();
        assert_eq!(report.orphaned_deltas.len(), 1);
        assert_eq!(coord.status(), SystemStatus::Inconsistent);
    }

    #[test]
    fn repair_replays_orphaned_edit_delta_against_core() {
        let coord = coordinator();
        let (entity, _) = coord
            .create_entity(EntityType::Artifact, json!({"title": "t"}), vec![], vec![])
            .unwrap();

        // Simulate the chaos scenario: Soil EntityDelta committed, Core flush
        // never happened (here: a fresh store without the edit applied).
        let mut ops = crate::core_store::EditOps::default();
        ops.set.insert("title".to_string(), json!("updated"));
        let staged = coord.entities.stage_edit(&entity.id, ops.clone(), &entity.hash).unwrap();
        let delta_fact = coord
            .soil
            .add_fact(
                FactType::EntityDelta,
                json!({
                    "entity_uuid": entity.id,
                    "entity_type": "artifact",
                    "commit": staged.1.commit,
                    "parent": {"kind": "edit", "parent": entity.hash},
                    "ops": ops,
                }),
                None,
            )
            .unwrap();

        let report = coord.startup_check();
        assert!(!report.is_clean());

        let repaired = coord.repair_delta(&delta_fact.id).unwrap();
        assert_eq!(repaired.data["title"], json!("updated"));

        let report = coord.startup_check();
        assert!(report.is_clean());
    }
}
