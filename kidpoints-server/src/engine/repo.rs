//! Storage seams of the engine: one narrow trait per entity, all of them
//! called from inside a unit of work that [`Storage`] runs.

use std::future::Future;

use chrono::{DateTime, Utc};
use kidpoints_shared::domain::TaskStatus;

use super::error::WorkflowResult;
use super::model::{
    ClaimReview, DefinitionInput, Invitation, LedgerEntry, NewInvitation, NewLedgerEntry,
    Relationship, RewardClaim, RewardDefinition, TaskDefinition, TaskTransition, User, UserTask,
};

pub trait UserRepo {
    fn find_user(&mut self, id: i32) -> WorkflowResult<Option<User>>;
}

pub trait RelationshipRepo {
    fn relationship_exists(&mut self, parent_id: i32, child_id: i32) -> WorkflowResult<bool>;
    fn children_of(&mut self, parent_id: i32) -> WorkflowResult<Vec<i32>>;
    /// True if `parent_id` is related to any of `children`.
    fn parent_of_any(&mut self, parent_id: i32, children: &[i32]) -> WorkflowResult<bool>;
    fn insert_relationship(&mut self, parent_id: i32, child_id: i32)
    -> WorkflowResult<Relationship>;
}

pub trait TaskRepo {
    fn find_task(&mut self, id: i32) -> WorkflowResult<Option<TaskDefinition>>;
    fn insert_task(
        &mut self,
        input: &DefinitionInput,
        created_by: i32,
        at: DateTime<Utc>,
    ) -> WorkflowResult<TaskDefinition>;
    fn update_task(
        &mut self,
        id: i32,
        input: &DefinitionInput,
        at: DateTime<Utc>,
    ) -> WorkflowResult<TaskDefinition>;
    fn delete_task(&mut self, id: i32) -> WorkflowResult<bool>;
}

pub trait UserTaskRepo {
    fn find_user_task(&mut self, id: i32) -> WorkflowResult<Option<UserTask>>;
    fn find_active_assignment(
        &mut self,
        child_id: i32,
        task_id: i32,
    ) -> WorkflowResult<Option<UserTask>>;
    fn count_active_assignments(&mut self, task_id: i32) -> WorkflowResult<i64>;
    fn insert_user_task(
        &mut self,
        task_id: i32,
        child_id: i32,
        assigned_by: i32,
        at: DateTime<Utc>,
    ) -> WorkflowResult<UserTask>;
    /// Applies `change` only while the row is still `from`; returns the updated
    /// row, or `None` when the status guard did not match.
    fn transition_user_task(
        &mut self,
        id: i32,
        from: TaskStatus,
        change: &TaskTransition,
    ) -> WorkflowResult<Option<UserTask>>;
    fn list_user_tasks_for_child(&mut self, child_id: i32) -> WorkflowResult<Vec<UserTask>>;
}

pub trait RewardRepo {
    fn find_reward(&mut self, id: i32) -> WorkflowResult<Option<RewardDefinition>>;
    fn insert_reward(
        &mut self,
        input: &DefinitionInput,
        created_by: i32,
        at: DateTime<Utc>,
    ) -> WorkflowResult<RewardDefinition>;
    fn update_reward(
        &mut self,
        id: i32,
        input: &DefinitionInput,
        at: DateTime<Utc>,
    ) -> WorkflowResult<RewardDefinition>;
    fn delete_reward(&mut self, id: i32) -> WorkflowResult<bool>;
}

pub trait UserRewardRepo {
    fn find_claim(&mut self, id: i32) -> WorkflowResult<Option<RewardClaim>>;
    fn insert_claim(
        &mut self,
        reward_id: i32,
        child_id: i32,
        points: i32,
        at: DateTime<Utc>,
    ) -> WorkflowResult<RewardClaim>;
    /// Applies `review` only while the claim is still pending.
    fn review_pending_claim(
        &mut self,
        id: i32,
        review: &ClaimReview,
    ) -> WorkflowResult<Option<RewardClaim>>;
    fn list_claims_for_child(&mut self, child_id: i32) -> WorkflowResult<Vec<RewardClaim>>;
}

/// Append-only: entries are never updated or deleted.
pub trait LedgerRepo {
    fn append_entry(&mut self, entry: &NewLedgerEntry, at: DateTime<Utc>) -> WorkflowResult<i32>;
    fn sum_for_child(&mut self, child_id: i32) -> WorkflowResult<i64>;
    fn list_entries(
        &mut self,
        child_id: i32,
        offset: i64,
        limit: i64,
    ) -> WorkflowResult<Vec<LedgerEntry>>;
}

pub trait InvitationRepo {
    fn find_invitation(&mut self, code: &str) -> WorkflowResult<Option<Invitation>>;
    fn insert_invitation(&mut self, new: &NewInvitation) -> WorkflowResult<Invitation>;
    /// Flips `active -> used`; false when another redeemer got there first.
    fn mark_invitation_used(
        &mut self,
        code: &str,
        used_by: i32,
        at: DateTime<Utc>,
    ) -> WorkflowResult<bool>;
    fn mark_invitation_expired(&mut self, code: &str) -> WorkflowResult<bool>;
}

/// Everything a workflow step may touch inside one atomic unit.
pub trait UnitOfWork:
    UserRepo
    + RelationshipRepo
    + TaskRepo
    + UserTaskRepo
    + RewardRepo
    + UserRewardRepo
    + LedgerRepo
    + InvitationRepo
{
}

impl<T> UnitOfWork for T where
    T: UserRepo
        + RelationshipRepo
        + TaskRepo
        + UserTaskRepo
        + RewardRepo
        + UserRewardRepo
        + LedgerRepo
        + InvitationRepo
{
}

/// A storage backend able to run units of work.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Runs `work` in one write transaction. An `Err` from `work`, a storage
    /// failure, or dropping the returned future before it resolves rolls the
    /// whole unit back.
    fn transact<T, F>(
        &self,
        op: &'static str,
        work: F,
    ) -> impl Future<Output = WorkflowResult<T>> + Send
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn UnitOfWork) -> WorkflowResult<T> + Send + 'static;

    /// Runs read-only `work` without taking the write lock.
    fn read<T, F>(
        &self,
        op: &'static str,
        work: F,
    ) -> impl Future<Output = WorkflowResult<T>> + Send
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn UnitOfWork) -> WorkflowResult<T> + Send + 'static;
}
