/// Audit layer: every verb invocation (other than the audit writes
/// themselves) is bracketed by an `Action` fact and an `ActionResult` fact
/// linked by a `result_of` system relation.
use serde_json::Value as JsonValue;

use crate::coordinator::Coordinator;
use crate::error::GardenResult;
use crate::soil::{Fact, FactType, SystemRelationKind};

use super::envelope::{Actor, ErrorBody};

/// Field names never recorded verbatim in an Action fact's `params`.
const SENSITIVE_KEYS: &[&str] = &["password", "secret", "token", "api_key", "private_key"];

fn redact(params: &JsonValue) -> JsonValue {
    match params {
        JsonValue::Object(obj) => {
            let mut redacted = serde_json::Map::new();
            for (k, v) in obj {
                if SENSITIVE_KEYS.iter().any(|s| k.to_lowercase().contains(s)) {
                    redacted.insert(k.clone(), JsonValue::String("[redacted]".to_string()));
                } else {
                    redacted.insert(k.clone(), redact(v));
                }
            }
            JsonValue::Object(redacted)
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

/// Record the `Action` fact before a handler runs. Returns the fact's
/// identifier, used as the `request_id` threaded through the response
/// envelope and the eventual `ActionResult`. `parent_action_id` links a
/// nested invocation (e.g. a subagent acting under an in-flight agent verb)
/// to its parent; `context_frame` is the actor's captured context-frame
/// containers at submission time.
pub fn record_action(
    coordinator: &Coordinator,
    actor: &Actor,
    op: &str,
    params: &JsonValue,
    parent_action_id: Option<&str>,
    context_frame: &[String],
) -> GardenResult<Fact> {
    coordinator.add_fact(
        FactType::Action,
        serde_json::json!({
            "actor": actor.id,
            "actor_kind": actor.kind,
            "verb": op,
            "params": redact(params),
            "parent_action_id": parent_action_id,
            "context_frame": context_frame,
        }),
        None,
    )
}

/// Record the `ActionResult` fact after a handler runs, linked to its
/// `Action` by a `result_of` system relation. `panic_trace` is the captured
/// payload of a handler panic caught at the dispatcher boundary; it lands in
/// `details.trace` on the fact but never in the `GardenError` itself, so it
/// never reaches the response envelope.
pub fn record_result(
    coordinator: &Coordinator,
    action: &Fact,
    outcome: Result<&JsonValue, &crate::error::GardenError>,
    panic_trace: Option<&str>,
    duration: std::time::Duration,
) -> GardenResult<Fact> {
    let duration_ms = duration.as_millis() as u64;
    let data = match outcome {
        Ok(result) => serde_json::json!({
            "request_id": action.id,
            "ok": true,
            "result": result,
            "duration_ms": duration_ms,
        }),
        Err(e) => {
            let mut data = serde_json::json!({
                "request_id": action.id,
                "ok": false,
                "error": ErrorBody::from(e),
                "duration_ms": duration_ms,
            });
            if let Some(trace) = panic_trace {
                data["details"] = serde_json::json!({ "trace": trace });
            }
            data
        }
    };
    let result_fact = coordinator.add_fact(FactType::ActionResult, data, None)?;
    coordinator.soil.add_system_relation(
        SystemRelationKind::ResultOf,
        (result_fact.id.clone(), "action_result".to_string()),
        (action.id.clone(), "action".to_string()),
        None,
    );
    Ok(result_fact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verbs::envelope::ActorKind;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn action_params_redact_sensitive_fields() {
        let coord = Coordinator::new(Duration::from_secs(5));
        let actor = Actor {
            id: "core_op".to_string(),
            kind: ActorKind::Operator,
        };
        let action = record_action(
            &coord,
            &actor,
            "core.create",
            &json!({"title": "t", "password": "hunter2"}),
            None,
            &[],
        )
        .unwrap();
        assert_eq!(action.data["params"]["password"], json!("[redacted]"));
        assert_eq!(action.data["params"]["title"], json!("t"));
    }

    #[test]
    fn result_links_to_action_by_result_of() {
        let coord = Coordinator::new(Duration::from_secs(5));
        let actor = Actor {
            id: "core_op".to_string(),
            kind: ActorKind::Operator,
        };
        let action = record_action(&coord, &actor, "core.get", &json!({}), None, &[]).unwrap();
        let result_value = json!({"id": "core_x"});
        let result = record_result(&coord, &action, Ok(&result_value), None, Duration::from_millis(1)).unwrap();

        let relations = coord.soil.relations_from(&result.id);
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].target, action.id);
    }
}
