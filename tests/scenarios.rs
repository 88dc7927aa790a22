//! End-to-end scenarios driven through the verb dispatcher, exercising the
//! coordinator, relation engine, and context engine together rather than any
//! one module in isolation.
use memogarden::core_store::EntityType;
use memogarden::query::Filters;
use memogarden::soil::FactType;
use memogarden::verbs::{Actor, ActorKind, Dispatcher, VerbRequest};
use memogarden::Garden;
use serde_json::json;

fn garden() -> Garden {
    Garden::new(std::time::Duration::from_secs(5), 7, 5)
}

fn operator(id: &str) -> Actor {
    Actor {
        id: id.to_string(),
        kind: ActorKind::Operator,
    }
}

fn req(actor: &Actor, op: &str, params: serde_json::Value) -> VerbRequest {
    VerbRequest {
        op: op.to_string(),
        params,
        actor: actor.clone(),
        parent_action_id: None,
    }
}

#[test]
fn create_edit_and_lock_conflict_round_trip() {
    let garden = garden();
    let dispatcher = Dispatcher::new(&garden);
    let actor = operator("core_operator_1");

    let created = dispatcher.dispatch(req(
        &actor,
        "core.create",
        json!({"entity_type": "artifact", "data": {"title": "first note"}}),
    ));
    assert!(created.ok);
    let entity = created.result.unwrap();
    let id = entity["id"].as_str().unwrap().to_string();
    let hash = entity["hash"].as_str().unwrap().to_string();

    let edited = dispatcher.dispatch(req(
        &actor,
        "core.edit",
        json!({"id": id, "based_on_hash": hash, "set": {"title": "revised note"}}),
    ));
    assert!(edited.ok);
    assert_eq!(edited.result.as_ref().unwrap()["data"]["title"], json!("revised note"));
    assert_eq!(edited.result.as_ref().unwrap()["version"], json!(2));

    // A second edit racing against the now-stale first hash loses.
    let stale_edit = dispatcher.dispatch(req(
        &actor,
        "core.edit",
        json!({"id": id, "based_on_hash": hash, "set": {"title": "conflicting note"}}),
    ));
    assert!(!stale_edit.ok);
    assert_eq!(stale_edit.error.unwrap().code, "lock_conflict");

    // Fetching by id still reflects the winning edit, not the loser.
    let fetched = dispatcher.dispatch(req(&actor, "core.get", json!({"id": id})));
    assert_eq!(fetched.result.unwrap()["data"]["title"], json!("revised note"));
}

#[test]
fn amend_supersedes_original_fact_and_keeps_its_id_stable() {
    let garden = garden();
    let dispatcher = Dispatcher::new(&garden);
    let actor = operator("core_operator_1");

    let added = dispatcher.dispatch(req(
        &actor,
        "soil.add",
        json!({"fact_type": "note", "data": {"description": "saw a typo"}}),
    ));
    assert!(added.ok);
    let original = added.result.unwrap();
    let original_id = original["id"].as_str().unwrap().to_string();
    assert!(original["superseded_by"].is_null());

    let amended = dispatcher.dispatch(req(
        &actor,
        "soil.amend",
        json!({"id": original_id, "data": {"description": "saw a typo, now corrected"}}),
    ));
    assert!(amended.ok);
    let replacement = amended.result.unwrap();
    let replacement_id = replacement["id"].as_str().unwrap().to_string();
    assert_ne!(replacement_id, original_id);
    assert_eq!(replacement["data"]["description"], json!("saw a typo, now corrected"));

    // The original is still fetchable at its stable id, now marked superseded.
    let refetched = dispatcher.dispatch(req(&actor, "soil.get", json!({"id": original_id})));
    assert!(refetched.ok);
    let refetched = refetched.result.unwrap();
    assert_eq!(refetched["superseded_by"], json!(replacement_id));
    assert!(refetched["superseded_at"].is_string());
}

#[test]
fn linking_and_sweeping_fossilizes_an_expired_relation_into_soil() {
    let garden = garden();
    let dispatcher = Dispatcher::new(&garden);
    let actor = operator("core_operator_1");

    let a = dispatcher.dispatch(req(
        &actor,
        "core.create",
        json!({"entity_type": "artifact", "data": {"title": "a"}}),
    ));
    let b = dispatcher.dispatch(req(
        &actor,
        "core.create",
        json!({"entity_type": "artifact", "data": {"title": "b"}}),
    ));
    let a_id = a.result.unwrap()["id"].as_str().unwrap().to_string();
    let b_id = b.result.unwrap()["id"].as_str().unwrap().to_string();

    let today = memogarden::ids::current_day();
    let linked = dispatcher.dispatch(req(
        &actor,
        "relations.link",
        json!({
            "kind": "relates_to",
            "source": a_id,
            "source_type": "artifact",
            "target": b_id,
            "target_type": "artifact",
            "initial_horizon": today - 1,
        }),
    ));
    assert!(linked.ok);

    assert_eq!(garden.stats().active_user_relations, 1);

    let report = garden.sweep(false);
    assert_eq!(report.fossilized_relations.len(), 1);
    assert_eq!(garden.stats().active_user_relations, 0);

    let system_relations = garden.coordinator.soil.relations_from(&a_id);
    assert_eq!(system_relations.len(), 1);
    assert_eq!(system_relations[0].target, b_id);
}

#[test]
fn mutations_automatically_capture_the_actors_recent_containers() {
    let garden = garden();
    let dispatcher = Dispatcher::new(&garden);
    let actor = operator("core_operator_ctx");

    let first = dispatcher.dispatch(req(
        &actor,
        "core.create",
        json!({"entity_type": "artifact", "data": {"title": "first"}}),
    ));
    let first_id = first.result.unwrap()["id"].as_str().unwrap().to_string();

    let second = dispatcher.dispatch(req(
        &actor,
        "core.create",
        json!({"entity_type": "artifact", "data": {"title": "second"}}),
    ));
    let second_id = second.result.unwrap()["id"].as_str().unwrap().to_string();

    let deltas = garden
        .coordinator
        .soil
        .list_facts(&Filters::new())
        .into_iter()
        .filter(|f| f.fact_type == FactType::EntityDelta)
        .collect::<Vec<_>>();

    let second_delta = deltas
        .iter()
        .find(|f| f.data["entity_uuid"] == json!(second_id))
        .expect("second create must have recorded an EntityDelta");
    let context = second_delta.data["context"].as_array().unwrap();
    assert!(context.iter().any(|v| v == &json!(first_id)));
}

#[test]
fn repair_replays_an_orphaned_delta_left_by_a_simulated_crash() {
    let garden = garden();

    let (entity, _) = garden
        .coordinator
        .create_entity(EntityType::Artifact, json!({"title": "t"}), vec![], vec![])
        .unwrap();

    // Simulate the crash-between-commits chaos scenario directly against the
    // coordinator's two stores: the Soil delta is staged and written, but the
    // paired Core commit never happens before the process "dies".
    let mut ops = memogarden::core_store::EditOps::default();
    ops.set.insert("title".to_string(), json!("after crash"));
    let staged = garden.coordinator.entities.stage_edit(&entity.id, ops.clone(), &entity.hash).unwrap();
    let delta_fact = garden
        .coordinator
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

    // Restarting finds the break and refuses to silently ignore it.
    let report = garden.startup_check();
    assert!(!report.is_clean());
    assert_eq!(report.orphaned_deltas, vec![delta_fact.id.clone()]);

    garden.coordinator.repair_delta(&delta_fact.id).unwrap();

    let repaired = garden.coordinator.entities.get_entity(&entity.id).unwrap();
    assert_eq!(repaired.data["title"], json!("after crash"));

    let clean_report = garden.startup_check();
    assert!(clean_report.is_clean());
}

#[test]
fn read_only_mode_blocks_mutations_but_not_reads() {
    let garden = garden();
    let dispatcher = Dispatcher::new(&garden);
    let actor = operator("core_operator_1");

    let created = dispatcher.dispatch(req(
        &actor,
        "core.create",
        json!({"entity_type": "artifact", "data": {"title": "t"}}),
    ));
    let id = created.result.unwrap()["id"].as_str().unwrap().to_string();

    garden.coordinator.set_status(memogarden::coordinator::SystemStatus::ReadOnly);

    let blocked = dispatcher.dispatch(req(
        &actor,
        "core.create",
        json!({"entity_type": "artifact", "data": {"title": "u"}}),
    ));
    assert!(!blocked.ok);
    assert_eq!(blocked.error.unwrap().code, "permission_denied");

    let still_readable = dispatcher.dispatch(req(&actor, "core.get", json!({"id": id})));
    assert!(still_readable.ok);
}
