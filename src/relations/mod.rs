/// Relation & Time-Horizon Engine.
///
/// Owns the active (Core-resident) [`UserRelation`] edges, their
/// access-refresh arithmetic, fact-significance aggregation, and the
/// fossilization sweep that retires expired relations into Soil system
/// relations and degrades orphaned facts.
use dashmap::DashMap;
use serde_json::Value as JsonValue;

use crate::core_store::UserRelation;
use crate::error::{GardenError, GardenResult};
use crate::ids::{self, Layer};
use crate::query::{matches_all, Filters};
use crate::soil::{FactStore, SystemRelationKind};

/// `new_time_horizon = max(time_horizon, current_day) + ceil(delta * 1.2)`.
const SAFETY_COEFFICIENT: f64 = 1.2;

#[derive(Debug, Default)]
pub struct RelationEngine {
    relations: DashMap<String, UserRelation>,
}

/// Outcome of one [`RelationEngine::sweep`] pass.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SweepReport {
    pub fossilized_relations: Vec<String>,
    pub degraded_facts: Vec<String>,
    pub dry_run: bool,
}

impl RelationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link(
        &self,
        kind: impl Into<String>,
        source: impl Into<String>,
        source_type: impl Into<String>,
        target: impl Into<String>,
        target_type: impl Into<String>,
        initial_horizon: i64,
        evidence: Option<JsonValue>,
    ) -> UserRelation {
        let today = ids::current_day();
        let id = ids::new_id(Layer::Core);
        let relation = UserRelation {
            id: id.clone(),
            kind: kind.into(),
            source: source.into(),
            source_type: source_type.into(),
            target: target.into(),
            target_type: target_type.into(),
            time_horizon: initial_horizon,
            last_access_at: today,
            created_at: today,
            evidence,
            metadata: JsonValue::Null,
        };
        self.relations.insert(id, relation.clone());
        relation
    }

    pub fn get_relation(&self, id: &str) -> GardenResult<UserRelation> {
        let id = ids::normalize(id, Layer::Core);
        self.relations
            .get(&id)
            .map(|r| r.clone())
            .ok_or_else(|| GardenError::not_found(id))
    }

    /// Advance `time_horizon` under an access event, using the
    /// formula. Called by `query_relation`/`track`/`explore` reads, not by
    /// plain lookups that don't represent user attention.
    pub fn access_refresh(&self, id: &str) -> GardenResult<UserRelation> {
        let id = ids::normalize(id, Layer::Core);
        let mut entry = self
            .relations
            .get_mut(&id)
            .ok_or_else(|| GardenError::not_found(&id))?;

        let today = ids::current_day();
        let delta = (today - entry.last_access_at).max(0);
        let extension = ((delta as f64) * SAFETY_COEFFICIENT).ceil() as i64;
        entry.time_horizon = entry.time_horizon.max(today) + extension;
        entry.last_access_at = today;
        Ok(entry.clone())
    }

    pub fn unlink(&self, id: &str) -> GardenResult<()> {
        let id = ids::normalize(id, Layer::Core);
        self.relations
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| GardenError::not_found(id))
    }

    /// Mutate `evidence`/`metadata`. `kind`, `source`, and `target` are
    /// immutable for the lifetime of a user relation.
    pub fn edit_relation(
        &self,
        id: &str,
        evidence: Option<JsonValue>,
        metadata: Option<JsonValue>,
    ) -> GardenResult<UserRelation> {
        let id = ids::normalize(id, Layer::Core);
        let mut entry = self
            .relations
            .get_mut(&id)
            .ok_or_else(|| GardenError::not_found(&id))?;
        if let Some(evidence) = evidence {
            entry.evidence = Some(evidence);
        }
        if let Some(metadata) = metadata {
            entry.metadata = metadata;
        }
        Ok(entry.clone())
    }

    pub fn query_relations(&self, filters: &Filters) -> Vec<UserRelation> {
        self.relations
            .iter()
            .map(|e| e.value().clone())
            .filter(|r| {
                let projected = serde_json::json!({
                    "kind": r.kind,
                    "source": r.source,
                    "target": r.target,
                });
                matches_all(filters, &projected)
            })
            .collect()
    }

    fn relations_targeting(&self, target: &str) -> Vec<UserRelation> {
        self.relations
            .iter()
            .filter(|e| e.value().target == target)
            .map(|e| e.value().clone())
            .collect()
    }

    /// Maximum `time_horizon` among alive inbound user relations, or `None`
    /// if the fact is orphaned (no alive inbound relation at all).
    pub fn fact_significance(&self, target: &str, current_day: i64) -> Option<i64> {
        self.relations_targeting(target)
            .into_iter()
            .filter(|r| r.alive(current_day))
            .map(|r| r.time_horizon)
            .max()
    }

    /// One fossilization pass. In `dry_run` mode, reports what would be
    /// fossilized/degraded without mutating either store.
    pub fn sweep(&self, facts: &FactStore, current_day: i64, dry_run: bool) -> SweepReport {
        let mut report = SweepReport {
            dry_run,
            ..Default::default()
        };

        let expired: Vec<UserRelation> = self
            .relations
            .iter()
            .map(|e| e.value().clone())
            .filter(|r| r.time_horizon < current_day)
            .collect();

        for relation in expired {
            report.fossilized_relations.push(relation.id.clone());
            if dry_run {
                continue;
            }
            // Preserve the expiring relation's opaque suffix rather than
            // minting a fresh Soil id, so its identity survives the move
            // from Core to Soil.
            let soil_id = ids::reprefix(&relation.id, Layer::Soil);
            facts.add_system_relation_with_id(
                soil_id,
                SystemRelationKind::ExplicitLink,
                (relation.source.clone(), relation.source_type.clone()),
                (relation.target.clone(), relation.target_type.clone()),
                relation.evidence.clone(),
            );
            self.relations.remove(&relation.id);
        }

        for fact in facts.list_facts(&Filters::new()) {
            if fact.fidelity != crate::soil::Fidelity::Full {
                continue;
            }
            if fact.superseded_by.is_some() {
                continue;
            }
            if self.fact_significance(&fact.id, current_day).is_some() {
                continue;
            }
            report.degraded_facts.push(fact.id.clone());
            if !dry_run {
                let _ = facts.degrade_fidelity(&fact.id);
            }
        }

        report
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soil::FactType;
    use serde_json::json;

    #[test]
    fn link_and_access_refresh_extends_horizon() {
        let engine = RelationEngine::new();
        let today = ids::current_day();
        let relation = engine.link(
            "explicit_link",
            "core_a",
            "artifact",
            "core_b",
            "artifact",
            today + 7,
            None,
        );
        assert!(relation.alive(today));

        // Simulate three days of no access by backdating last_access_at.
        {
            let mut entry = engine.relations.get_mut(&relation.id).unwrap();
            entry.last_access_at = today - 3;
        }
        let refreshed = engine.access_refresh(&relation.id).unwrap();
        assert_eq!(refreshed.last_access_at, today);
        // delta = 3, extension = ceil(3 * 1.2) = 4
        assert_eq!(refreshed.time_horizon, (today + 7).max(today) + 4);
    }

    #[test]
    fn fact_with_no_inbound_relation_is_orphaned() {
        let engine = RelationEngine::new();
        let today = ids::current_day();
        assert_eq!(engine.fact_significance("soil_x", today), None);

        engine.link("explicit_link", "core_a", "artifact", "soil_x", "note", today + 1, None);
        assert_eq!(engine.fact_significance("soil_x", today), Some(today + 1));
    }

    #[test]
    fn sweep_fossilizes_expired_relation_into_soil() {
        let engine = RelationEngine::new();
        let facts = FactStore::new();
        let today = ids::current_day();
        let relation = engine.link(
            "explicit_link",
            "core_a",
            "artifact",
            "core_b",
            "artifact",
            today - 1,
            Some(json!({"note": "expired"})),
        );

        let report = engine.sweep(&facts, today, false);
        assert_eq!(report.fossilized_relations, vec![relation.id.clone()]);
        assert!(engine.get_relation(&relation.id).is_err());

        let system_relations = facts.relations_from("core_a");
        assert_eq!(system_relations.len(), 1);
        assert_eq!(system_relations[0].kind, SystemRelationKind::ExplicitLink);
        assert_eq!(system_relations[0].id, ids::reprefix(&relation.id, Layer::Soil));
    }

    #[test]
    fn sweep_dry_run_reports_without_mutating() {
        let engine = RelationEngine::new();
        let facts = FactStore::new();
        let today = ids::current_day();
        let relation = engine.link(
            "explicit_link",
            "core_a",
            "artifact",
            "core_b",
            "artifact",
            today - 1,
            None,
        );

        let report = engine.sweep(&facts, today, true);
        assert_eq!(report.fossilized_relations, vec![relation.id.clone()]);
        assert!(engine.get_relation(&relation.id).is_ok());
        assert!(facts.relations_from("core_a").is_empty());
    }

    #[test]
    fn sweep_degrades_orphaned_fact_fidelity() {
        let engine = RelationEngine::new();
        let facts = FactStore::new();
        let fact = facts
            .add_fact(FactType::Note, json!({"description": "lonely"}), None)
            .unwrap();
        let today = ids::current_day();

        let report = engine.sweep(&facts, today, false);
        assert_eq!(report.degraded_facts, vec![fact.id.clone()]);
        let refreshed = facts.get_fact(&fact.id).unwrap();
        assert_eq!(refreshed.fidelity, crate::soil::Fidelity::Summary);
    }
}
