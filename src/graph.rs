/// Lineage and neighborhood traversal over Core entities and Soil relations:
/// `track` walks `derived_from` edges back to their roots, `explore` does a
/// bounded breadth-first walk over both `UserRelation` (Core) and
/// `SystemRelation` (Soil) edges.
///
/// Grounded in this crate's earlier causal-graph traversal: the same
/// depth/radius caps and visited-set cycle guard, generalized from a single
/// edge kind to the relation-kind/direction filtering below.
use std::collections::{HashSet, VecDeque};

use crate::core_store::EntityStore;
use crate::error::{GardenError, GardenResult};
use crate::soil::FactStore;

/// One step of ancestry, returned by [`track`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LineageNode {
    pub id: String,
    pub depth: u32,
}

/// Walk `derived_from` edges backward from `id`, stopping at `max_depth` and
/// never revisiting a node (guards against diamonds and cycles produced by a
/// buggy caller).
pub fn track(entities: &EntityStore, id: &str, max_depth: u32) -> GardenResult<Vec<LineageNode>> {
    let start = entities.get_entity(id)?;
    let mut visited = HashSet::new();
    visited.insert(start.id.clone());
    let mut frontier = vec![(start.id.clone(), start.derived_from.clone())];
    let mut out = Vec::new();
    let mut depth = 0u32;

    while !frontier.is_empty() && depth < max_depth {
        depth += 1;
        let mut next = Vec::new();
        for (_, parents) in frontier {
            for parent_id in parents {
                if !visited.insert(parent_id.clone()) {
                    continue;
                }
                let Ok(parent) = entities.get_entity(&parent_id) else {
                    continue;
                };
                out.push(LineageNode {
                    id: parent.id.clone(),
                    depth,
                });
                next.push((parent.id.clone(), parent.derived_from.clone()));
            }
        }
        frontier = next;
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Both,
}

/// Hard caps regardless of the caller's requested `radius`/`max_nodes`,
/// mirroring `track`'s own `TRACK_MAX_DEPTH`.
pub const EXPLORE_MAX_RADIUS: u32 = 10;
pub const EXPLORE_MAX_NODES: usize = 2000;

/// One node reached by [`explore`], with the hop distance from the origin.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExploreNode {
    pub id: String,
    pub node_type: String,
    pub radius: u32,
}

/// Breadth-first walk over Soil system relations and Core user relations,
/// bounded by `radius` hops and `max_nodes` total, optionally filtered to a
/// set of relation kinds (by their wire name).
pub fn explore(
    facts: &FactStore,
    relations: &[crate::core_store::UserRelation],
    origin: &str,
    direction: Direction,
    radius: u32,
    max_nodes: usize,
    kind_filter: Option<&HashSet<String>>,
) -> GardenResult<Vec<ExploreNode>> {
    if radius == 0 {
        return Err(GardenError::validation_field("radius", "must be at least 1"));
    }
    if radius > EXPLORE_MAX_RADIUS {
        return Err(GardenError::validation_field(
            "radius",
            format!("must not exceed {EXPLORE_MAX_RADIUS}"),
        ));
    }
    if max_nodes > EXPLORE_MAX_NODES {
        return Err(GardenError::validation_field(
            "max_nodes",
            format!("must not exceed {EXPLORE_MAX_NODES}"),
        ));
    }

    let mut visited = HashSet::new();
    visited.insert(origin.to_string());
    let mut queue = VecDeque::new();
    queue.push_back((origin.to_string(), 0u32));
    let mut out = Vec::new();

    while let Some((current, hop)) = queue.pop_front() {
        if hop >= radius || out.len() >= max_nodes {
            continue;
        }

        let mut neighbors: Vec<(String, String, String)> = Vec::new();

        if matches!(direction, Direction::Outgoing | Direction::Both) {
            for rel in facts.relations_from(&current) {
                neighbors.push((rel.kind.to_string(), rel.target, rel.target_type));
            }
            for rel in relations.iter().filter(|r| r.source == current) {
                neighbors.push((rel.kind.clone(), rel.target.clone(), rel.target_type.clone()));
            }
        }
        if matches!(direction, Direction::Incoming | Direction::Both) {
            for rel in facts.relations_to(&current) {
                neighbors.push((rel.kind.to_string(), rel.source, rel.source_type));
            }
            for rel in relations.iter().filter(|r| r.target == current) {
                neighbors.push((rel.kind.clone(), rel.source.clone(), rel.source_type.clone()));
            }
        }

        for (kind, neighbor_id, neighbor_type) in neighbors {
            if let Some(allowed) = kind_filter {
                if !allowed.contains(&kind) {
                    continue;
                }
            }
            if !visited.insert(neighbor_id.clone()) {
                continue;
            }
            if out.len() >= max_nodes {
                break;
            }
            out.push(ExploreNode {
                id: neighbor_id.clone(),
                node_type: neighbor_type,
                radius: hop + 1,
            });
            queue.push_back((neighbor_id, hop + 1));
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_store::{EntityStore, EntityType};
    use crate::soil::{FactStore, SystemRelationKind};
    use serde_json::json;

    #[test]
    fn track_follows_derived_from_to_the_root() {
        let entities = EntityStore::new();
        let (root, _) = entities
            .create_entity(EntityType::Artifact, json!({"title": "root"}), vec![])
            .unwrap();
        let (mid, _) = entities
            .create_entity(
                EntityType::Artifact,
                json!({"title": "mid"}),
                vec![root.id.clone()],
            )
            .unwrap();
        let (leaf, _) = entities
            .create_entity(
                EntityType::Artifact,
                json!({"title": "leaf"}),
                vec![mid.id.clone()],
            )
            .unwrap();

        let lineage = track(&entities, &leaf.id, 10).unwrap();
        assert_eq!(lineage.len(), 2);
        assert_eq!(lineage[0].id, mid.id);
        assert_eq!(lineage[0].depth, 1);
        assert_eq!(lineage[1].id, root.id);
        assert_eq!(lineage[1].depth, 2);
    }

    #[test]
    fn track_respects_max_depth() {
        let entities = EntityStore::new();
        let (root, _) = entities
            .create_entity(EntityType::Artifact, json!({"title": "root"}), vec![])
            .unwrap();
        let (leaf, _) = entities
            .create_entity(
                EntityType::Artifact,
                json!({"title": "leaf"}),
                vec![root.id.clone()],
            )
            .unwrap();

        let lineage = track(&entities, &leaf.id, 0).unwrap();
        assert!(lineage.is_empty());
    }

    #[test]
    fn explore_walks_soil_relations_within_radius() {
        let facts = FactStore::new();
        let a = facts
            .add_fact(crate::soil::FactType::Note, json!({"description": "a"}), None)
            .unwrap();
        let b = facts
            .add_fact(crate::soil::FactType::Note, json!({"description": "b"}), None)
            .unwrap();
        let c = facts
            .add_fact(crate::soil::FactType::Note, json!({"description": "c"}), None)
            .unwrap();
        facts.add_system_relation(
            SystemRelationKind::Cites,
            (a.id.clone(), "note".to_string()),
            (b.id.clone(), "note".to_string()),
            None,
        );
        facts.add_system_relation(
            SystemRelationKind::Cites,
            (b.id.clone(), "note".to_string()),
            (c.id.clone(), "note".to_string()),
            None,
        );

        let nodes = explore(&facts, &[], &a.id, Direction::Outgoing, 1, 10, None).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].id, b.id);

        let nodes = explore(&facts, &[], &a.id, Direction::Outgoing, 2, 10, None).unwrap();
        assert_eq!(nodes.len(), 2);
        assert!(nodes.iter().any(|n| n.id == c.id));
    }

    #[test]
    fn explore_rejects_zero_radius() {
        let facts = FactStore::new();
        let err = explore(&facts, &[], "soil_x", Direction::Both, 0, 10, None).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ValidationError);
    }

    #[test]
    fn explore_rejects_radius_above_hard_cap() {
        let facts = FactStore::new();
        let err = explore(&facts, &[], "soil_x", Direction::Both, EXPLORE_MAX_RADIUS + 1, 10, None).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ValidationError);
    }

    #[test]
    fn explore_rejects_max_nodes_above_hard_cap() {
        let facts = FactStore::new();
        let err = explore(&facts, &[], "soil_x", Direction::Both, 1, EXPLORE_MAX_NODES + 1, None).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ValidationError);
    }
}
