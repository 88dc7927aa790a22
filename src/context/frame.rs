/// [`FrameData`]: the JSON shape stored in a `ContextFrame` entity's `data`
/// field. The Context Engine is the only code that interprets
/// this shape; to the Entity Store it's an opaque payload like any other.
use serde::{Deserialize, Serialize};

/// Who a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerType {
    Operator,
    Agent,
    Scope,
}

impl std::fmt::Display for OwnerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OwnerType::Operator => "operator",
            OwnerType::Agent => "agent",
            OwnerType::Scope => "scope",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameData {
    pub owner_uuid: String,
    pub owner_type: OwnerType,
    /// Ordered, most-recent-first, length bounded to `context_bound_n`.
    pub containers: Vec<String>,
    pub active_scopes: Vec<String>,
    pub primary_scope: Option<String>,
    pub view_head: Option<String>,
    pub parent_frame: Option<String>,
    /// Scope frames stop accepting View appends between `leave` and the next
    /// `enter` by any member; this flag implements that suspension.
    pub suspended: bool,
}

impl FrameData {
    pub fn new(owner_uuid: String, owner_type: OwnerType) -> Self {
        FrameData {
            owner_uuid,
            owner_type,
            containers: Vec::new(),
            active_scopes: Vec::new(),
            primary_scope: None,
            view_head: None,
            parent_frame: None,
            suspended: false,
        }
    }

    /// Move `id` to the front of `containers`, trimming from the tail to
    /// `bound`. No-op for non-substantive types; callers check that before
    /// calling.
    pub fn touch(&mut self, id: &str, bound: usize) {
        self.containers.retain(|existing| existing != id);
        self.containers.insert(0, id.to_string());
        self.containers.truncate(bound);
    }

    pub fn enter_scope(&mut self, scope: &str) {
        if !self.active_scopes.iter().any(|s| s == scope) {
            self.active_scopes.push(scope.to_string());
        }
        if self.primary_scope.is_none() {
            self.primary_scope = Some(scope.to_string());
        }
    }

    pub fn focus_scope(&mut self, scope: &str) -> bool {
        if self.active_scopes.iter().any(|s| s == scope) {
            self.primary_scope = Some(scope.to_string());
            true
        } else {
            false
        }
    }

    /// Removes `scope` from the active set. If it was primary, primary
    /// becomes null rather than falling back to some other active scope.
    pub fn leave_scope(&mut self, scope: &str) {
        self.active_scopes.retain(|s| s != scope);
        if self.primary_scope.as_deref() == Some(scope) {
            self.primary_scope = None;
        }
    }
}
