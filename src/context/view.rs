/// [`ViewData`]: the JSON shape stored in a `View` entity's `data` field.
///
/// A View is a coalesced run of mutation events against one primary scope.
/// `prev` chains Views within a frame into a stream, newest first from
/// `FrameData::view_head`.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationEvent {
    pub entity_id: String,
    pub verb: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewData {
    pub frame_id: String,
    pub prev: Option<String>,
    pub primary_scope: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub events: Vec<MutationEvent>,
}

impl ViewData {
    pub fn new(frame_id: String, prev: Option<String>, primary_scope: Option<String>) -> Self {
        let now = Utc::now();
        ViewData {
            frame_id,
            prev,
            primary_scope,
            started_at: now,
            last_activity_at: now,
            events: Vec::new(),
        }
    }

    /// Whether a mutation targeting `primary_scope` at time `now` coalesces
    /// into this View, per the coalescence rule below.
    pub fn coalesces(&self, primary_scope: Option<&str>, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        self.primary_scope.as_deref() == primary_scope && now - self.last_activity_at <= timeout
    }

    pub fn push_event(&mut self, event: MutationEvent) {
        self.last_activity_at = event.at;
        self.events.push(event);
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).expect("ViewData always serializes")
    }
}

/// The JSON shape stored in a `ViewMerge` entity's `data` field, recorded on
/// `rejoin` into both the parent and child streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewMergeData {
    pub parent_frame: String,
    pub child_frame: String,
    pub child_final_view: Option<String>,
    pub merged_at: DateTime<Utc>,
}
