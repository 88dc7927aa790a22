/// Verb Dispatcher & Audit Layer: the single submission point
/// for every operation, enforcing the
/// `received → authenticated → validated → audited_begin → executing →
/// audited_end → committed → published` state machine and bracketing every
/// non-audit invocation with Action/ActionResult facts.
pub mod audit;
pub mod bundles;
pub mod envelope;

use tracing::{debug, warn};

use crate::context::OwnerType;
use crate::events::GardenEvent;
use crate::Garden;

pub use envelope::{Actor, ActorKind, ErrorBody, VerbRequest, VerbResponse};

/// Known event kinds published after a successful commit, keyed by op
/// prefix (e.g. `artifact_delta`, `context_updated`,
/// `frame_updated` as examples; this table generalizes that mapping).
fn event_kind_for(op: &str) -> Option<&'static str> {
    match op {
        op if op.starts_with("core.") && op != "core.get" && op != "core.query" => {
            Some("artifact_delta")
        }
        op if op.starts_with("context.") => Some("context_updated"),
        _ => None,
    }
}

pub struct Dispatcher<'a> {
    garden: &'a Garden,
}

impl<'a> Dispatcher<'a> {
    pub fn new(garden: &'a Garden) -> Self {
        Dispatcher { garden }
    }

    pub fn dispatch(&self, request: VerbRequest) -> VerbResponse {
        debug!(op = %request.op, actor = %request.actor.id, "received");

        // `authenticated`: actor identity is established by the (external,
        // out-of-scope) auth middleware before a request reaches here;
        // this crate only records the actor it was handed.
        debug!(op = %request.op, "authenticated");

        if request.op.is_empty() {
            let err = crate::error::GardenError::validation_field("op", "must not be empty");
            return VerbResponse::err(request.actor.clone(), "unvalidated".to_string(), &err);
        }
        debug!(op = %request.op, "validated");

        let owner_type = self.owner_type(&request);
        let context_frame = bundles::captured_context(self.garden, request.actor.id.as_str(), owner_type);
        let action = match audit::record_action(
            &self.garden.coordinator,
            &request.actor,
            &request.op,
            &request.params,
            request.parent_action_id.as_deref(),
            &context_frame,
        ) {
            Ok(fact) => fact,
            Err(e) => {
                warn!(error = %e, "failed to write Action fact; surfacing without audit");
                return VerbResponse::err(request.actor.clone(), "no_audit".to_string(), &e);
            }
        };
        debug!(op = %request.op, request_id = %action.id, "audited_begin");

        debug!(op = %request.op, request_id = %action.id, "executing");
        let started = std::time::Instant::now();
        let (outcome, panic_trace) =
            match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| self.execute(&request))) {
                Ok(result) => (result, None),
                Err(payload) => {
                    let message = panic_message(&payload);
                    warn!(op = %request.op, request_id = %action.id, panic = %message, "handler panicked");
                    (
                        Err(crate::error::GardenError::internal_with_diagnostic(
                            "handler panicked",
                            action.id.clone(),
                        )),
                        Some(message),
                    )
                }
            };
        let duration = started.elapsed();

        let result_fact = audit::record_result(
            &self.garden.coordinator,
            &action,
            outcome.as_ref().map_err(|e| e),
            panic_trace.as_deref(),
            duration,
        );
        debug!(op = %request.op, request_id = %action.id, "audited_end");

        let response = match &outcome {
            Ok(value) => {
                debug!(op = %request.op, request_id = %action.id, "committed");
                VerbResponse::ok(request.actor.clone(), action.id.clone(), value.clone())
            }
            Err(e) => VerbResponse::err(request.actor.clone(), action.id.clone(), e),
        };

        if let Err(e) = result_fact {
            warn!(error = %e, "failed to write ActionResult fact");
        }

        if outcome.is_ok() {
            if let Some(kind) = event_kind_for(&request.op) {
                self.garden.events.publish(
                    &self.garden.coordinator.soil,
                    GardenEvent {
                        kind: kind.to_string(),
                        payload: response.result.clone().unwrap_or(serde_json::Value::Null),
                    },
                );
            }
        }
        debug!(op = %request.op, request_id = %action.id, "published");

        response
    }

    fn owner_type(&self, request: &VerbRequest) -> OwnerType {
        match request.actor.kind {
            ActorKind::Operator => OwnerType::Operator,
            ActorKind::Agent | ActorKind::Subagent => OwnerType::Agent,
        }
    }

    fn execute(&self, request: &VerbRequest) -> crate::error::GardenResult<serde_json::Value> {
        let owner_type = self.owner_type(request);
        let actor_id = request.actor.id.as_str();
        let params = &request.params;

        match request.op.as_str() {
            "core.create" => bundles::core_create(self.garden, actor_id, owner_type, params),
            "core.get" => bundles::core_get(self.garden, require_str(params, "id")?),
            "core.edit" => bundles::core_edit(self.garden, actor_id, owner_type, params),
            "core.forget" => bundles::core_forget(self.garden, actor_id, owner_type, params),
            "core.query" => bundles::core_query(self.garden, params),

            "soil.add" => bundles::soil_add(self.garden, params),
            "soil.amend" => bundles::soil_amend(self.garden, params),
            "soil.get" => bundles::soil_get(self.garden, require_str(params, "id")?),
            "soil.query" => bundles::soil_query(self.garden, params),

            "relations.link" => bundles::relations_link(self.garden, params),
            "relations.unlink" => bundles::relations_unlink(self.garden, require_str(params, "id")?),
            "relations.edit_relation" => bundles::relations_edit(self.garden, params),
            "relations.get_relation" => bundles::relations_get(self.garden, require_str(params, "id")?),
            "relations.query_relation" => bundles::relations_query(self.garden, params),
            "relations.explore" => bundles::relations_explore(self.garden, params),

            "context.enter" => bundles::context_enter(self.garden, params),
            "context.focus" => bundles::context_focus(self.garden, params),
            "context.leave" => bundles::context_leave(self.garden, params),
            "context.rejoin" => bundles::context_rejoin(self.garden, params),

            "track" => bundles::track(self.garden, params),
            "search" => bundles::search(self.garden, params),

            other => Err(crate::error::GardenError::validation_field(
                "op",
                format!("unknown verb '{other}'"),
            )),
        }
    }
}

fn require_str<'a>(params: &'a serde_json::Value, name: &str) -> crate::error::GardenResult<&'a str> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| crate::error::GardenError::validation_field(name, "required parameter missing"))
}

/// Best-effort extraction of a panic payload's message, for the diagnostic
/// trace recorded alongside a caught handler panic.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Filters;
    use crate::Garden;
    use serde_json::json;

    fn operator_request(op: &str, params: serde_json::Value) -> VerbRequest {
        VerbRequest {
            op: op.to_string(),
            params,
            actor: Actor {
                id: "core_operator_1".to_string(),
                kind: ActorKind::Operator,
            },
            parent_action_id: None,
        }
    }

    #[test]
    fn create_then_get_round_trip_through_dispatcher() {
        let garden = Garden::new(std::time::Duration::from_secs(5), 7, 5);
        let dispatcher = Dispatcher::new(&garden);

        let response = dispatcher.dispatch(operator_request(
            "core.create",
            json!({"entity_type": "artifact", "data": {"title": "t"}}),
        ));
        assert!(response.ok);
        let id = response.result.unwrap()["id"].as_str().unwrap().to_string();

        let response = dispatcher.dispatch(operator_request("core.get", json!({"id": id})));
        assert!(response.ok);
    }

    #[test]
    fn panic_message_prefers_the_payload_string_over_a_placeholder() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*payload), "boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42_i32);
        assert_eq!(panic_message(&*payload), "non-string panic payload");
    }

    #[test]
    fn unknown_verb_is_a_validation_error_with_audit_trail() {
        let garden = Garden::new(std::time::Duration::from_secs(5), 7, 5);
        let dispatcher = Dispatcher::new(&garden);
        let response = dispatcher.dispatch(operator_request("nonsense.verb", json!({})));
        assert!(!response.ok);
        assert_eq!(response.error.unwrap().code, "validation_error");

        let actions = garden
            .coordinator
            .soil
            .list_facts(&Filters::new())
            .into_iter()
            .filter(|f| f.fact_type == crate::soil::FactType::Action)
            .count();
        assert_eq!(actions, 1);
    }
}
