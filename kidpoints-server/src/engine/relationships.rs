//! Parent/child relationship predicates used by every authorization check.

use super::error::WorkflowResult;
use super::repo::{Storage, UnitOfWork};

pub fn is_parent_of(
    uow: &mut dyn UnitOfWork,
    parent_id: i32,
    child_id: i32,
) -> WorkflowResult<bool> {
    if parent_id == child_id {
        return Ok(false);
    }
    uow.relationship_exists(parent_id, child_id)
}

/// True if some child is related to both `parent_a` and `parent_b`.
pub fn has_shared_child(
    uow: &mut dyn UnitOfWork,
    parent_a: i32,
    parent_b: i32,
) -> WorkflowResult<bool> {
    let children = uow.children_of(parent_a)?;
    if children.is_empty() {
        return Ok(false);
    }
    uow.parent_of_any(parent_b, &children)
}

/// Family visibility of a definition: its owner, or a co-parent of one of the
/// owner's children.
pub fn family_visible(
    uow: &mut dyn UnitOfWork,
    actor_id: i32,
    owner_id: i32,
) -> WorkflowResult<bool> {
    if actor_id == owner_id {
        return Ok(true);
    }
    has_shared_child(uow, actor_id, owner_id)
}

/// Read-only resolver for callers outside a unit of work (handler-level
/// access checks on listings).
#[derive(Clone)]
pub struct RelationshipResolver<S> {
    store: S,
}

impl<S: Storage> RelationshipResolver<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn is_parent_of(&self, parent_id: i32, child_id: i32) -> WorkflowResult<bool> {
        self.store
            .read("is_parent_of", move |uow| is_parent_of(uow, parent_id, child_id))
            .await
    }

    pub async fn has_shared_child(&self, parent_a: i32, parent_b: i32) -> WorkflowResult<bool> {
        self.store
            .read("has_shared_child", move |uow| {
                has_shared_child(uow, parent_a, parent_b)
            })
            .await
    }
}
