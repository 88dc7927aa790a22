/// Request/response envelope for the single verb-submission surface
/// every request carries `op` and `params`; every response
/// carries `ok`, `actor`, `timestamp`, and exactly one of `result`/`error`.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::GardenError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Operator,
    Agent,
    /// An agent invocation nested under another agent's action, tracked via
    /// `VerbRequest::parent_action_id`.
    Subagent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub kind: ActorKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerbRequest {
    pub op: String,
    #[serde(default)]
    pub params: JsonValue,
    pub actor: Actor,
    /// The `Action` fact id of the invocation this one is nested under, if
    /// any (e.g. a subagent acting on behalf of an in-flight agent verb).
    #[serde(default)]
    pub parent_action_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub details: Option<JsonValue>,
}

impl From<&GardenError> for ErrorBody {
    fn from(e: &GardenError) -> Self {
        ErrorBody {
            code: e.code().to_string(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerbResponse {
    pub ok: bool,
    pub actor: Actor,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl VerbResponse {
    pub fn ok(actor: Actor, request_id: String, result: JsonValue) -> Self {
        VerbResponse {
            ok: true,
            actor,
            timestamp: Utc::now(),
            request_id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(actor: Actor, request_id: String, error: &GardenError) -> Self {
        VerbResponse {
            ok: false,
            actor,
            timestamp: Utc::now(),
            request_id,
            result: None,
            error: Some(error.into()),
        }
    }
}
