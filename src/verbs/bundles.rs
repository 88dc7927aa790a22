/// Verb bundle handlers: the six families dispatched by op prefix (core, soil,
/// relations, context, track, search). Each handler takes the raw `params`
/// JSON for its op and the captured context-frame containers for the
/// EntityDelta's `context` field, and returns the JSON `result` payload.
use serde_json::{json, Value as JsonValue};

use crate::context::OwnerType;
use crate::core_store::{EditOps, EntityType};
use crate::error::{GardenError, GardenResult};
use crate::graph::{self, Direction};
use crate::query::{Coverage, Effort, Filters};
use crate::soil::FactType;
use crate::Garden;

fn field<'a>(params: &'a JsonValue, name: &str) -> GardenResult<&'a JsonValue> {
    params
        .get(name)
        .ok_or_else(|| GardenError::validation_field(name, "required parameter missing"))
}

fn str_field<'a>(params: &'a JsonValue, name: &str) -> GardenResult<&'a str> {
    field(params, name)?
        .as_str()
        .ok_or_else(|| GardenError::validation_field(name, "must be a string"))
}

fn entity_type_field(params: &JsonValue, name: &str) -> GardenResult<EntityType> {
    let raw = str_field(params, name)?;
    serde_json::from_value(JsonValue::String(raw.to_string()))
        .map_err(|_| GardenError::validation_field(name, format!("unknown entity type '{raw}'")))
}

fn owner_type_field(params: &JsonValue, name: &str) -> GardenResult<OwnerType> {
    let raw = str_field(params, name)?;
    serde_json::from_value(JsonValue::String(raw.to_string()))
        .map_err(|_| GardenError::validation_field(name, format!("unknown owner type '{raw}'")))
}

/// The effective captured-containers context for a mutation: the acting
/// owner's primary-scope frame if one exists, else their personal frame
/// (the automatic-capture rule for mutations). Also reused by the dispatcher
/// to snapshot an actor's active context frame into the `Action` fact.
pub(crate) fn captured_context(garden: &Garden, owner_uuid: &str, owner_type: OwnerType) -> Vec<String> {
    let Ok(frame) = garden.context.get_or_create_frame(&garden.coordinator.entities, owner_uuid, owner_type) else {
        return Vec::new();
    };
    let Ok(data) = serde_json::from_value::<crate::context::FrameData>(frame.data) else {
        return Vec::new();
    };
    if let Some(scope) = &data.primary_scope {
        if let Ok(scope_frame) = garden
            .context
            .get_or_create_frame(&garden.coordinator.entities, scope, OwnerType::Scope)
        {
            if let Ok(scope_data) = serde_json::from_value::<crate::context::FrameData>(scope_frame.data) {
                return scope_data.containers;
            }
        }
    }
    data.containers
}

// ---- Core bundle ----------------------------------------------------

pub fn core_create(garden: &Garden, actor_id: &str, owner_type: OwnerType, params: &JsonValue) -> GardenResult<JsonValue> {
    let entity_type = entity_type_field(params, "entity_type")?;
    let data = field(params, "data")?.clone();
    let derived_from = params
        .get("derived_from")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    let context = captured_context(garden, actor_id, owner_type);
    let (entity, _delta_fact) = garden
        .coordinator
        .create_entity(entity_type, data, derived_from, context)?;

    if entity_type.is_substantive() {
        if let Ok(frame) = garden
            .context
            .get_or_create_frame(&garden.coordinator.entities, actor_id, owner_type)
        {
            garden
                .context
                .touch_container(&garden.coordinator.entities, &frame.id, &entity.id, entity_type)
                .ok();
        }
    }
    Ok(serde_json::to_value(entity)?)
}

pub fn core_get(garden: &Garden, id: &str) -> GardenResult<JsonValue> {
    Ok(serde_json::to_value(garden.coordinator.entities.get_entity(id)?)?)
}

pub fn core_edit(garden: &Garden, actor_id: &str, owner_type: OwnerType, params: &JsonValue) -> GardenResult<JsonValue> {
    let id = str_field(params, "id")?;
    let based_on_hash = str_field(params, "based_on_hash")?;
    let set = params
        .get("set")
        .cloned()
        .map(|v| serde_json::from_value(v).unwrap_or_default())
        .unwrap_or_default();
    let unset = params
        .get("unset")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let ops = EditOps { set, unset };

    let context = captured_context(garden, actor_id, owner_type);
    let (entity, _delta_fact) = garden.coordinator.edit_entity(id, ops, based_on_hash, context)?;
    Ok(serde_json::to_value(entity)?)
}

pub fn core_forget(garden: &Garden, actor_id: &str, owner_type: OwnerType, params: &JsonValue) -> GardenResult<JsonValue> {
    let id = str_field(params, "id")?;
    let context = captured_context(garden, actor_id, owner_type);
    let (entity, _delta_fact) = garden.coordinator.forget_entity(id, context)?;
    Ok(serde_json::to_value(entity)?)
}

pub fn core_query(garden: &Garden, params: &JsonValue) -> GardenResult<JsonValue> {
    let filters: Filters = params
        .get("filters")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .unwrap_or_default();
    let include_forgotten = params.get("include_forgotten").and_then(|v| v.as_bool()).unwrap_or(false);
    let limit = params.get("limit").and_then(|v| v.as_u64()).map(|n| n as usize);
    let offset = params.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;

    let entities = garden
        .coordinator
        .entities
        .query_entities(&filters, include_forgotten, limit, offset);
    Ok(json!({ "entities": entities }))
}

// ---- Soil bundle ------------------------------------------------------

pub fn soil_add(garden: &Garden, params: &JsonValue) -> GardenResult<JsonValue> {
    let fact_type: FactType = serde_json::from_value(field(params, "fact_type")?.clone())
        .map_err(|_| GardenError::validation_field("fact_type", "unknown fact type"))?;
    let data = field(params, "data")?.clone();
    let metadata = params.get("metadata").cloned();
    let fact = garden.coordinator.add_fact(fact_type, data, metadata)?;
    Ok(serde_json::to_value(fact)?)
}

pub fn soil_amend(garden: &Garden, params: &JsonValue) -> GardenResult<JsonValue> {
    let id = str_field(params, "id")?;
    let new_payload = field(params, "data")?.clone();
    let fact = garden.coordinator.amend_fact(id, new_payload)?;
    Ok(serde_json::to_value(fact)?)
}

pub fn soil_get(garden: &Garden, id: &str) -> GardenResult<JsonValue> {
    Ok(serde_json::to_value(garden.coordinator.soil.get_fact(id)?)?)
}

pub fn soil_query(garden: &Garden, params: &JsonValue) -> GardenResult<JsonValue> {
    let filters: Filters = params
        .get("filters")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .unwrap_or_default();
    let facts = garden.coordinator.soil.list_facts(&filters);
    Ok(json!({ "facts": facts }))
}

// ---- Relations bundle --------------------------------------------------

pub fn relations_link(garden: &Garden, params: &JsonValue) -> GardenResult<JsonValue> {
    let kind = str_field(params, "kind")?;
    let source = str_field(params, "source")?;
    let source_type = str_field(params, "source_type")?;
    let target = str_field(params, "target")?;
    let target_type = str_field(params, "target_type")?;
    let initial_horizon = params
        .get("initial_horizon")
        .and_then(|v| v.as_i64())
        .unwrap_or_else(|| crate::ids::current_day() + 7);
    let evidence = params.get("evidence").cloned();

    let relation = garden
        .relations
        .link(kind, source, source_type, target, target_type, initial_horizon, evidence);
    Ok(serde_json::to_value(relation)?)
}

pub fn relations_unlink(garden: &Garden, id: &str) -> GardenResult<JsonValue> {
    garden.relations.unlink(id)?;
    Ok(json!({ "unlinked": id }))
}

pub fn relations_edit(garden: &Garden, params: &JsonValue) -> GardenResult<JsonValue> {
    let id = str_field(params, "id")?;
    let evidence = params.get("evidence").cloned();
    let metadata = params.get("metadata").cloned();
    let relation = garden.relations.edit_relation(id, evidence, metadata)?;
    Ok(serde_json::to_value(relation)?)
}

pub fn relations_get(garden: &Garden, id: &str) -> GardenResult<JsonValue> {
    // A direct `get_relation` is a read, not an attention signal on its
    // own; `query_relation` (below) is what refreshes the horizon.
    Ok(serde_json::to_value(garden.relations.get_relation(id)?)?)
}

pub fn relations_query(garden: &Garden, params: &JsonValue) -> GardenResult<JsonValue> {
    let filters: Filters = params
        .get("filters")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .unwrap_or_default();
    let mut relations = garden.relations.query_relations(&filters);
    for relation in &mut relations {
        if let Ok(refreshed) = garden.relations.access_refresh(&relation.id) {
            *relation = refreshed;
        }
    }
    Ok(json!({ "relations": relations }))
}

pub fn relations_explore(garden: &Garden, params: &JsonValue) -> GardenResult<JsonValue> {
    let origin = str_field(params, "origin")?;
    let direction = match params.get("direction").and_then(|v| v.as_str()).unwrap_or("both") {
        "outgoing" => Direction::Outgoing,
        "incoming" => Direction::Incoming,
        _ => Direction::Both,
    };
    let radius = params.get("radius").and_then(|v| v.as_u64()).unwrap_or(2) as u32;
    let max_nodes = params.get("max_nodes").and_then(|v| v.as_u64()).unwrap_or(200) as usize;
    let kind_filter = params.get("kinds").and_then(|v| v.as_array()).map(|arr| {
        arr.iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect::<std::collections::HashSet<_>>()
    });

    // The active user-relation edges live behind the engine's DashMap; a
    // filterless `query_relations` snapshot is the neighbor source explore
    // needs alongside the fossilized system relations in Soil.
    let active_relations = garden.relations.query_relations(&Filters::new());
    let nodes = graph::explore(
        &garden.coordinator.soil,
        &active_relations,
        origin,
        direction,
        radius,
        max_nodes,
        kind_filter.as_ref(),
    )?;
    Ok(json!({ "nodes": nodes }))
}

// ---- Context bundle -----------------------------------------------------

pub fn context_enter(garden: &Garden, params: &JsonValue) -> GardenResult<JsonValue> {
    let owner_uuid = str_field(params, "owner_uuid")?;
    let owner_type = owner_type_field(params, "owner_type")?;
    let scope = str_field(params, "scope")?;
    let frame = garden
        .context
        .enter(&garden.coordinator.entities, owner_uuid, owner_type, scope)?;
    Ok(serde_json::to_value(frame)?)
}

pub fn context_focus(garden: &Garden, params: &JsonValue) -> GardenResult<JsonValue> {
    let owner_uuid = str_field(params, "owner_uuid")?;
    let owner_type = owner_type_field(params, "owner_type")?;
    let scope = str_field(params, "scope")?;
    let frame = garden
        .context
        .focus(&garden.coordinator.entities, owner_uuid, owner_type, scope)?;
    Ok(serde_json::to_value(frame)?)
}

pub fn context_leave(garden: &Garden, params: &JsonValue) -> GardenResult<JsonValue> {
    let owner_uuid = str_field(params, "owner_uuid")?;
    let owner_type = owner_type_field(params, "owner_type")?;
    let scope = str_field(params, "scope")?;
    let frame = garden
        .context
        .leave(&garden.coordinator.entities, owner_uuid, owner_type, scope)?;
    Ok(serde_json::to_value(frame)?)
}

pub fn context_rejoin(garden: &Garden, params: &JsonValue) -> GardenResult<JsonValue> {
    let child_frame_id = str_field(params, "child_frame_id")?;
    let parent = garden.context.rejoin(&garden.coordinator.entities, child_frame_id)?;
    Ok(serde_json::to_value(parent)?)
}

// ---- Track bundle --------------------------------------------------------

/// Hard cap regardless of the caller's requested depth.
const TRACK_MAX_DEPTH: u32 = 1000;

pub fn track(garden: &Garden, params: &JsonValue) -> GardenResult<JsonValue> {
    let id = str_field(params, "id")?;
    let max_depth = params
        .get("max_depth")
        .and_then(|v| v.as_u64())
        .map(|n| (n as u32).min(TRACK_MAX_DEPTH))
        .unwrap_or(TRACK_MAX_DEPTH);
    let lineage = graph::track(&garden.coordinator.entities, id, max_depth)?;
    Ok(json!({ "lineage": lineage }))
}

// ---- Search bundle --------------------------------------------------------

pub fn search(garden: &Garden, params: &JsonValue) -> GardenResult<JsonValue> {
    let query = str_field(params, "query")?;
    let coverage = match params.get("coverage").and_then(|v| v.as_str()).unwrap_or("content") {
        "names" => Coverage::Names,
        "full" => Coverage::Full,
        _ => Coverage::Content,
    };
    let effort = match params.get("effort").and_then(|v| v.as_str()).unwrap_or("standard") {
        "quick" => Effort::Quick,
        "deep" => Effort::Deep,
        _ => Effort::Standard,
    };
    let hits = garden.coordinator.soil.search_facts(query, coverage, effort);
    Ok(json!({ "hits": hits }))
}
