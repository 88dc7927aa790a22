/// Context Engine: per-owner attention tracking.
///
/// ContextFrames, Views, and ViewMerges are ordinary Core entities — the
/// engine's own state is just an owner-to-frame index plus the coalescence
/// clock, layered on top of [`EntityStore`].
pub mod frame;
pub mod view;

use chrono::Utc;
use dashmap::DashMap;

use crate::core_store::{EditOps, EntityStore, EntityType};
use crate::error::{GardenError, GardenResult};

pub use frame::{FrameData, OwnerType};
pub use view::{MutationEvent, ViewData, ViewMergeData};

pub struct ContextEngine {
    frames_by_owner: DashMap<(String, OwnerType), String>,
    bound_n: usize,
    coalescence_timeout: chrono::Duration,
}

fn frame_data_of(entity: &crate::core_store::Entity) -> GardenResult<FrameData> {
    serde_json::from_value(entity.data.clone())
        .map_err(|e| GardenError::internal(format!("corrupt ContextFrame payload: {e}")))
}

fn view_data_of(entity: &crate::core_store::Entity) -> GardenResult<ViewData> {
    serde_json::from_value(entity.data.clone())
        .map_err(|e| GardenError::internal(format!("corrupt View payload: {e}")))
}

impl ContextEngine {
    pub fn new(bound_n: usize, coalescence_timeout_secs: i64) -> Self {
        ContextEngine {
            frames_by_owner: DashMap::new(),
            bound_n,
            coalescence_timeout: chrono::Duration::seconds(coalescence_timeout_secs),
        }
    }

    /// Exactly one frame per `(owner_uuid, owner_type)`;
    /// creates it on first registration.
    pub fn get_or_create_frame(
        &self,
        entities: &EntityStore,
        owner_uuid: &str,
        owner_type: OwnerType,
    ) -> GardenResult<crate::core_store::Entity> {
        let key = (owner_uuid.to_string(), owner_type);
        if let Some(id) = self.frames_by_owner.get(&key) {
            return entities.get_entity(&id);
        }
        let data = FrameData::new(owner_uuid.to_string(), owner_type);
        let payload = serde_json::to_value(&data).expect("FrameData always serializes");
        let (entity, _) = entities.create_entity(EntityType::ContextFrame, payload, vec![])?;
        self.frames_by_owner.insert(key, entity.id.clone());
        Ok(entity)
    }

    fn edit_frame(
        &self,
        entities: &EntityStore,
        frame_id: &str,
        mutate: impl FnOnce(&mut FrameData),
    ) -> GardenResult<crate::core_store::Entity> {
        let current = entities.get_entity(frame_id)?;
        let mut data = frame_data_of(&current)?;
        mutate(&mut data);
        let payload = serde_json::to_value(&data).expect("FrameData always serializes");
        let (entity, _) = entities.edit_entity(frame_id, whole_payload_ops(&payload), &current.hash)?;
        Ok(entity)
    }

    /// Substantive-type access: move `container_id` to the front of the
    /// frame's `containers`, trimming to the configured bound. Primitive
    /// types never reach here.
    pub fn touch_container(
        &self,
        entities: &EntityStore,
        frame_id: &str,
        container_id: &str,
        entity_type: EntityType,
    ) -> GardenResult<crate::core_store::Entity> {
        if !entity_type.is_substantive() {
            return entities.get_entity(frame_id);
        }
        let bound = self.bound_n;
        self.edit_frame(entities, frame_id, |data| data.touch(container_id, bound))
    }

    pub fn enter(
        &self,
        entities: &EntityStore,
        owner_uuid: &str,
        owner_type: OwnerType,
        scope: &str,
    ) -> GardenResult<crate::core_store::Entity> {
        let frame = self.get_or_create_frame(entities, owner_uuid, owner_type)?;
        self.edit_frame(entities, &frame.id, |data| data.enter_scope(scope))
    }

    pub fn focus(
        &self,
        entities: &EntityStore,
        owner_uuid: &str,
        owner_type: OwnerType,
        scope: &str,
    ) -> GardenResult<crate::core_store::Entity> {
        let frame = self.get_or_create_frame(entities, owner_uuid, owner_type)?;
        let current = entities.get_entity(&frame.id)?;
        let mut data = frame_data_of(&current)?;
        if !data.focus_scope(scope) {
            return Err(GardenError::validation_field(
                "scope",
                "scope must be active before it can become primary",
            ));
        }
        let payload = serde_json::to_value(&data).expect("FrameData always serializes");
        let (entity, _) = entities.edit_entity(&frame.id, whole_payload_ops(&payload), &current.hash)?;
        Ok(entity)
    }

    pub fn leave(
        &self,
        entities: &EntityStore,
        owner_uuid: &str,
        owner_type: OwnerType,
        scope: &str,
    ) -> GardenResult<crate::core_store::Entity> {
        let frame = self.get_or_create_frame(entities, owner_uuid, owner_type)?;
        self.edit_frame(entities, &frame.id, |data| data.leave_scope(scope))?;

        // Suspend the scope's own frame until a member re-enters.
        if let Some(scope_frame_id) = self.frames_by_owner.get(&(scope.to_string(), OwnerType::Scope)) {
            let _ = self.edit_frame(entities, &scope_frame_id, |data| data.suspended = true);
        }
        entities.get_entity(&frame.id)
    }

    /// Fork a subordinate frame for `child_uuid`, seeded with a snapshot of
    /// `parent_uuid`'s current `containers`. No further automatic
    /// inheritance after the fork.
    pub fn fork(
        &self,
        entities: &EntityStore,
        parent_uuid: &str,
        parent_type: OwnerType,
        child_uuid: &str,
    ) -> GardenResult<crate::core_store::Entity> {
        let parent_frame = self.get_or_create_frame(entities, parent_uuid, parent_type)?;
        let parent_data = frame_data_of(&parent_frame)?;

        let mut child_data = FrameData::new(child_uuid.to_string(), OwnerType::Agent);
        child_data.containers = parent_data.containers.clone();
        child_data.parent_frame = Some(parent_frame.id.clone());

        let payload = serde_json::to_value(&child_data).expect("FrameData always serializes");
        let (entity, _) = entities.create_entity(EntityType::ContextFrame, payload, vec![parent_frame.id])?;
        self.frames_by_owner
            .insert((child_uuid.to_string(), OwnerType::Agent), entity.id.clone());
        Ok(entity)
    }

    /// Merge a subordinate frame back into its parent: append a ViewMerge
    /// entity referencing the child's final View to both streams, then
    /// destroy the child frame. The parent's `containers` are not absorbed.
    pub fn rejoin(
        &self,
        entities: &EntityStore,
        child_frame_id: &str,
    ) -> GardenResult<crate::core_store::Entity> {
        let child = entities.get_entity(child_frame_id)?;
        let child_data = frame_data_of(&child)?;
        let parent_id = child_data
            .parent_frame
            .clone()
            .ok_or_else(|| GardenError::validation_field("frame_id", "not a subordinate frame"))?;

        let merge = ViewMergeData {
            parent_frame: parent_id.clone(),
            child_frame: child_frame_id.to_string(),
            child_final_view: child_data.view_head.clone(),
            merged_at: Utc::now(),
        };
        let payload = serde_json::to_value(&merge).expect("ViewMergeData always serializes");
        let (merge_entity, _) = entities.create_entity(
            EntityType::ViewMerge,
            payload,
            vec![parent_id.clone(), child_frame_id.to_string()],
        )?;

        self.edit_frame(entities, &parent_id, |data| {
            data.view_head = Some(merge_entity.id.clone())
        })?;

        let owner_key = (child_data.owner_uuid.clone(), child_data.owner_type);
        self.frames_by_owner.remove(&owner_key);
        entities.forget_entity(child_frame_id)?;

        entities.get_entity(&parent_id)
    }

    /// Append a mutation event to the current View of `frame_id`, starting a
    /// new View if coalescence fails (explicit break, inactivity timeout, or
    /// scope change).
    pub fn append_mutation(
        &self,
        entities: &EntityStore,
        frame_id: &str,
        primary_scope: Option<&str>,
        event: MutationEvent,
    ) -> GardenResult<crate::core_store::Entity> {
        let frame = entities.get_entity(frame_id)?;
        let frame_data = frame_data_of(&frame)?;
        if frame_data.suspended {
            return Ok(frame);
        }

        let current_view = match &frame_data.view_head {
            Some(view_id) => entities.get_entity(view_id).ok(),
            None => None,
        };

        let coalesces = current_view
            .as_ref()
            .map(|v| {
                let view_data = view_data_of(v).ok();
                view_data
                    .map(|d| d.coalesces(primary_scope, event.at, self.coalescence_timeout))
                    .unwrap_or(false)
            })
            .unwrap_or(false);

        if let (true, Some(view_entity)) = (coalesces, current_view) {
            let mut data = view_data_of(&view_entity)?;
            data.push_event(event);
            let json = data.to_json();
            let mut ops = EditOps::default();
            ops.set.insert("events".into(), json["events"].clone());
            ops.set
                .insert("last_activity_at".into(), json["last_activity_at"].clone());
            entities.edit_entity(&view_entity.id, ops, &view_entity.hash)?;
            return entities.get_entity(frame_id);
        }

        let mut new_view = ViewData::new(
            frame_id.to_string(),
            frame_data.view_head.clone(),
            primary_scope.map(str::to_string),
        );
        new_view.push_event(event);
        let (view_entity, _) = entities.create_entity(
            EntityType::View,
            new_view.to_json(),
            frame_data.view_head.clone().into_iter().collect(),
        )?;
        self.edit_frame(entities, frame_id, |data| {
            data.view_head = Some(view_entity.id.clone())
        })
    }
}

/// Build an [`EditOps`] that replaces every top-level field of `payload`,
/// used where the engine rewrites a whole FrameData/ViewData struct at once.
fn whole_payload_ops(payload: &serde_json::Value) -> EditOps {
    let mut ops = EditOps::default();
    if let Some(obj) = payload.as_object() {
        for (k, v) in obj {
            ops.set.insert(k.clone(), v.clone());
        }
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_store::EntityType;
    use chrono::Utc;

    #[test]
    fn enter_without_existing_active_scope_becomes_primary() {
        let entities = EntityStore::new();
        let engine = ContextEngine::new(7, 5);
        let frame = engine
            .enter(&entities, "op1", OwnerType::Operator, "scope_a")
            .unwrap();
        let data = frame_data_of(&frame).unwrap();
        assert_eq!(data.primary_scope.as_deref(), Some("scope_a"));
    }

    #[test]
    fn leave_clears_primary_only_if_it_was_primary() {
        let entities = EntityStore::new();
        let engine = ContextEngine::new(7, 5);
        engine
            .enter(&entities, "op1", OwnerType::Operator, "scope_a")
            .unwrap();
        let frame = engine
            .leave(&entities, "op1", OwnerType::Operator, "scope_a")
            .unwrap();
        let data = frame_data_of(&frame).unwrap();
        assert!(data.primary_scope.is_none());
        assert!(data.active_scopes.is_empty());
    }

    #[test]
    fn touch_container_respects_bound_and_only_substantive_types() {
        let entities = EntityStore::new();
        let engine = ContextEngine::new(2, 5);
        let frame = engine
            .get_or_create_frame(&entities, "op1", OwnerType::Operator)
            .unwrap();

        engine
            .touch_container(&entities, &frame.id, "core_a", EntityType::Artifact)
            .unwrap();
        engine
            .touch_container(&entities, &frame.id, "core_b", EntityType::Artifact)
            .unwrap();
        let after = engine
            .touch_container(&entities, &frame.id, "core_c", EntityType::Artifact)
            .unwrap();
        let data = frame_data_of(&after).unwrap();
        assert_eq!(data.containers, vec!["core_c", "core_b"]);

        let ignored = engine
            .touch_container(&entities, &frame.id, "core_label", EntityType::Label)
            .unwrap();
        let data = frame_data_of(&ignored).unwrap();
        assert_eq!(data.containers, vec!["core_c", "core_b"]);
    }

    #[test]
    fn fork_snapshots_parent_containers_then_rejoin_destroys_child() {
        let entities = EntityStore::new();
        let engine = ContextEngine::new(7, 5);
        let parent = engine
            .get_or_create_frame(&entities, "op1", OwnerType::Operator)
            .unwrap();
        engine
            .touch_container(&entities, &parent.id, "core_a", EntityType::Artifact)
            .unwrap();

        let child = engine.fork(&entities, "op1", OwnerType::Operator, "agent1").unwrap();
        let child_data = frame_data_of(&child).unwrap();
        assert_eq!(child_data.containers, vec!["core_a"]);

        engine
            .append_mutation(
                &entities,
                &child.id,
                None,
                MutationEvent {
                    entity_id: "core_x".into(),
                    verb: "edit".into(),
                    at: Utc::now(),
                },
            )
            .unwrap();

        let rejoined_parent = engine.rejoin(&entities, &child.id).unwrap();
        let parent_data = frame_data_of(&rejoined_parent).unwrap();
        assert!(parent_data.view_head.is_some());

        let fetched_child = entities.get_entity(&child.id).unwrap();
        assert!(fetched_child.forgotten);
    }
}
