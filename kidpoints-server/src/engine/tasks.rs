//! Task definitions and the `assigned -> submitted -> approved | rejected`
//! lifecycle of each assignment.

use chrono::Utc;
use kidpoints_shared::auth::Role;
use kidpoints_shared::domain::{Decision, TaskStatus, TransactionType};
use tracing::{info, warn};

use super::error::{WorkflowError, WorkflowResult};
use super::ledger::append_checked;
use super::model::{DefinitionInput, NewLedgerEntry, TaskDefinition, TaskTransition, UserTask};
use super::relationships::{family_visible, is_parent_of};
use super::repo::{Storage, UnitOfWork};
use super::{require_role, require_user, validate_definition};

/// Result of [`TaskWorkflow::verify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub user_task: UserTask,
    /// Ledger entry crediting the child; only set on approval.
    pub entry_id: Option<i32>,
}

#[derive(Clone)]
pub struct TaskWorkflow<S> {
    store: S,
}

impl<S: Storage> TaskWorkflow<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn create_definition(
        &self,
        parent_id: i32,
        input: DefinitionInput,
    ) -> WorkflowResult<TaskDefinition> {
        validate_definition(&input)?;
        self.store
            .transact("task_create", move |uow| {
                let parent = require_user(uow, parent_id, "user")?;
                require_role(&parent, Role::Parent, "only parents create tasks")?;
                let task = uow.insert_task(&input, parent_id, Utc::now())?;
                info!(task_id = task.id, parent_id, points = task.point_value, "task: created");
                Ok(task)
            })
            .await
    }

    pub async fn get_definition(&self, task_id: i32) -> WorkflowResult<TaskDefinition> {
        self.store
            .read("task_get", move |uow| {
                uow.find_task(task_id)?.ok_or(WorkflowError::NotFound("task"))
            })
            .await
    }

    /// Definitions are frozen while any child has an open assignment of them.
    pub async fn update_definition(
        &self,
        actor_id: i32,
        task_id: i32,
        input: DefinitionInput,
    ) -> WorkflowResult<TaskDefinition> {
        validate_definition(&input)?;
        self.store
            .transact("task_update", move |uow| {
                let task = editable_task(uow, actor_id, task_id)?;
                let task = uow.update_task(task.id, &input, Utc::now())?;
                info!(task_id, actor_id, "task: updated");
                Ok(task)
            })
            .await
    }

    pub async fn delete_definition(&self, actor_id: i32, task_id: i32) -> WorkflowResult<()> {
        self.store
            .transact("task_delete", move |uow| {
                editable_task(uow, actor_id, task_id)?;
                if !uow.delete_task(task_id)? {
                    return Err(WorkflowError::NotFound("task"));
                }
                info!(task_id, actor_id, "task: deleted");
                Ok(())
            })
            .await
    }

    /// Creates a new `assigned` instance of `task_id` for `child_id`.
    pub async fn assign(
        &self,
        child_id: i32,
        task_id: i32,
        assigner_id: i32,
    ) -> WorkflowResult<UserTask> {
        self.store
            .transact("task_assign", move |uow| {
                let task = uow.find_task(task_id)?.ok_or(WorkflowError::NotFound("task"))?;
                let child = require_user(uow, child_id, "child")?;
                if child.role != Role::Child {
                    return Err(WorkflowError::NotFound("child"));
                }
                let assigner = require_user(uow, assigner_id, "user")?;
                require_role(&assigner, Role::Parent, "only parents assign tasks")?;
                if !is_parent_of(uow, assigner_id, child_id)?
                    || !family_visible(uow, assigner_id, task.created_by)?
                {
                    warn!(assigner_id, child_id, task_id, "task: assignment denied");
                    return Err(WorkflowError::Forbidden(
                        "task is not visible to this parent for this child",
                    ));
                }
                if let Some(open) = uow.find_active_assignment(child_id, task_id)? {
                    return Err(WorkflowError::Conflict(format!(
                        "task {task_id} already {} for child {child_id} (assignment {})",
                        open.status, open.id
                    )));
                }
                let user_task = uow.insert_user_task(task_id, child_id, assigner_id, Utc::now())?;
                info!(
                    user_task_id = user_task.id,
                    task_id, child_id, assigner_id, "task: assigned"
                );
                Ok(user_task)
            })
            .await
    }

    /// The owning child marks an assigned task as done.
    pub async fn submit(&self, user_task_id: i32, child_id: i32) -> WorkflowResult<UserTask> {
        self.store
            .transact("task_submit", move |uow| {
                let user_task = uow
                    .find_user_task(user_task_id)?
                    .ok_or(WorkflowError::NotFound("task assignment"))?;
                if user_task.child_id != child_id {
                    warn!(user_task_id, child_id, "task: submit by non-owner denied");
                    return Err(WorkflowError::Forbidden("assignment belongs to another child"));
                }
                let change = TaskTransition::Submit { at: Utc::now() };
                let updated = transition(uow, &user_task, TaskStatus::Assigned, &change)?;
                info!(user_task_id, child_id, "task: submitted");
                Ok(updated)
            })
            .await
    }

    /// Approves or rejects a submitted task. Approval credits the task's point
    /// value to the child in the same unit of work as the status change. Only
    /// a parent of the child may decide, and the definition must be visible to
    /// them, as for assignment.
    pub async fn verify(
        &self,
        user_task_id: i32,
        actor_id: i32,
        decision: Decision,
    ) -> WorkflowResult<Verification> {
        self.store
            .transact("task_verify", move |uow| {
                let user_task = uow
                    .find_user_task(user_task_id)?
                    .ok_or(WorkflowError::NotFound("task assignment"))?;
                let task = uow.find_task(user_task.task_id)?;
                let visible = match &task {
                    Some(task) => family_visible(uow, actor_id, task.created_by)?,
                    None => true,
                };
                if !visible || !is_parent_of(uow, actor_id, user_task.child_id)? {
                    warn!(user_task_id, actor_id, "task: verification denied");
                    return Err(WorkflowError::Forbidden("not authorized for this child"));
                }
                let change = TaskTransition::Verify {
                    decision,
                    by: actor_id,
                    at: Utc::now(),
                };
                let updated = transition(uow, &user_task, TaskStatus::Submitted, &change)?;
                // Open assignments pin their definition, so a submitted task always has one.
                let task = task.ok_or(WorkflowError::NotFound("task"))?;
                let entry_id = match decision {
                    Decision::Approved => Some(append_checked(
                        uow,
                        &NewLedgerEntry {
                            child_id: user_task.child_id,
                            change_amount: task.point_value,
                            transaction_type: TransactionType::TaskCompletion,
                            created_by: actor_id,
                            notes: Some(task.name.clone()),
                            related_user_task_id: Some(user_task_id),
                            related_user_reward_id: None,
                        },
                    )?),
                    Decision::Rejected => None,
                };
                info!(
                    user_task_id,
                    actor_id,
                    %decision,
                    points = task.point_value,
                    ?entry_id,
                    "task: verified"
                );
                Ok(Verification {
                    user_task: updated,
                    entry_id,
                })
            })
            .await
    }

    pub async fn list_for_child(&self, child_id: i32) -> WorkflowResult<Vec<UserTask>> {
        self.store
            .read("task_list_for_child", move |uow| {
                require_user(uow, child_id, "child")?;
                uow.list_user_tasks_for_child(child_id)
            })
            .await
    }
}

fn editable_task(
    uow: &mut dyn UnitOfWork,
    actor_id: i32,
    task_id: i32,
) -> WorkflowResult<TaskDefinition> {
    let task = uow.find_task(task_id)?.ok_or(WorkflowError::NotFound("task"))?;
    if !family_visible(uow, actor_id, task.created_by)? {
        warn!(task_id, actor_id, "task: edit denied");
        return Err(WorkflowError::Forbidden("task belongs to another family"));
    }
    let open = uow.count_active_assignments(task_id)?;
    if open > 0 {
        return Err(WorkflowError::Conflict(format!(
            "task {task_id} has {open} open assignment(s)"
        )));
    }
    Ok(task)
}

fn transition(
    uow: &mut dyn UnitOfWork,
    user_task: &UserTask,
    from: TaskStatus,
    change: &TaskTransition,
) -> WorkflowResult<UserTask> {
    let invalid = |current: TaskStatus| WorkflowError::InvalidState {
        entity: "task assignment",
        current: current.to_string(),
        expected: from.as_str(),
    };
    if user_task.status != from {
        return Err(invalid(user_task.status));
    }
    match uow.transition_user_task(user_task.id, from, change)? {
        Some(updated) => Ok(updated),
        None => {
            let current = uow
                .find_user_task(user_task.id)?
                .map(|t| t.status)
                .unwrap_or(change.target());
            Err(invalid(current))
        }
    }
}
