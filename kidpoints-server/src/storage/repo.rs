//! Diesel implementation of the engine's repository traits over one borrowed
//! SQLite connection. Transaction boundaries belong to the caller.

use chrono::{DateTime, Utc};
use diesel::dsl::sum;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use kidpoints_shared::domain::{ClaimStatus, Decision, InvitationStatus, TaskStatus};

use super::models::{
    InvitationRow, NewInvitationRow, NewPointTransaction, NewRelationship, NewReward, NewTask,
    NewUserReward, NewUserTask, PointTransactionRow, RelationshipRow, RewardRow, TaskRow,
    UserRewardRow, UserRow, UserTaskRow,
};
use super::schema::{
    invitation_codes, point_transactions, rewards, tasks, user_relationships, user_rewards,
    user_tasks, users,
};
use crate::engine::model::{
    ClaimReview, DefinitionInput, Invitation, LedgerEntry, NewInvitation, NewLedgerEntry,
    Relationship, RewardClaim, RewardDefinition, TaskDefinition, TaskTransition, User, UserTask,
};
use crate::engine::repo::{
    InvitationRepo, LedgerRepo, RelationshipRepo, RewardRepo, TaskRepo, UserRepo, UserRewardRepo,
    UserTaskRepo,
};
use crate::engine::{WorkflowError, WorkflowResult};

const ACTIVE_TASK_STATUSES: [&str; 2] = [
    TaskStatus::Assigned.as_str(),
    TaskStatus::Submitted.as_str(),
];

pub(crate) struct SqliteUnit<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SqliteUnit<'c> {
    pub(crate) fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }
}

fn is_unique_violation(e: &DieselError) -> bool {
    matches!(
        e,
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)
    )
}

impl UserRepo for SqliteUnit<'_> {
    fn find_user(&mut self, id: i32) -> WorkflowResult<Option<User>> {
        users::table
            .find(id)
            .select(UserRow::as_select())
            .first::<UserRow>(self.conn)
            .optional()?
            .map(User::try_from)
            .transpose()
    }
}

impl RelationshipRepo for SqliteUnit<'_> {
    fn relationship_exists(&mut self, parent_id: i32, child_id: i32) -> WorkflowResult<bool> {
        let count: i64 = user_relationships::table
            .filter(user_relationships::parent_id.eq(parent_id))
            .filter(user_relationships::child_id.eq(child_id))
            .count()
            .get_result(self.conn)?;
        Ok(count > 0)
    }

    fn children_of(&mut self, parent_id: i32) -> WorkflowResult<Vec<i32>> {
        Ok(user_relationships::table
            .filter(user_relationships::parent_id.eq(parent_id))
            .select(user_relationships::child_id)
            .load(self.conn)?)
    }

    fn parent_of_any(&mut self, parent_id: i32, children: &[i32]) -> WorkflowResult<bool> {
        if children.is_empty() {
            return Ok(false);
        }
        let count: i64 = user_relationships::table
            .filter(user_relationships::parent_id.eq(parent_id))
            .filter(user_relationships::child_id.eq_any(children.to_vec()))
            .count()
            .get_result(self.conn)?;
        Ok(count > 0)
    }

    fn insert_relationship(
        &mut self,
        parent_id: i32,
        child_id: i32,
    ) -> WorkflowResult<Relationship> {
        let row = diesel::insert_into(user_relationships::table)
            .values(&NewRelationship {
                parent_id,
                child_id,
                created_at: Utc::now().naive_utc(),
            })
            .returning(RelationshipRow::as_returning())
            .get_result::<RelationshipRow>(self.conn)
            .map_err(|e| {
                if is_unique_violation(&e) {
                    WorkflowError::AlreadyRelated
                } else {
                    e.into()
                }
            })?;
        Ok(row.into())
    }
}

impl TaskRepo for SqliteUnit<'_> {
    fn find_task(&mut self, id: i32) -> WorkflowResult<Option<TaskDefinition>> {
        Ok(tasks::table
            .find(id)
            .select(TaskRow::as_select())
            .first::<TaskRow>(self.conn)
            .optional()?
            .map(TaskDefinition::from))
    }

    fn insert_task(
        &mut self,
        input: &DefinitionInput,
        created_by: i32,
        at: DateTime<Utc>,
    ) -> WorkflowResult<TaskDefinition> {
        let at = at.naive_utc();
        let row = diesel::insert_into(tasks::table)
            .values(&NewTask {
                name: &input.name,
                description: input.description.as_deref(),
                point_value: input.points,
                created_by,
                created_at: at,
                updated_at: at,
            })
            .returning(TaskRow::as_returning())
            .get_result::<TaskRow>(self.conn)?;
        Ok(row.into())
    }

    fn update_task(
        &mut self,
        id: i32,
        input: &DefinitionInput,
        at: DateTime<Utc>,
    ) -> WorkflowResult<TaskDefinition> {
        let row = diesel::update(tasks::table.find(id))
            .set((
                tasks::name.eq(&input.name),
                tasks::description.eq(input.description.as_deref()),
                tasks::point_value.eq(input.points),
                tasks::updated_at.eq(at.naive_utc()),
            ))
            .returning(TaskRow::as_returning())
            .get_result::<TaskRow>(self.conn)
            .optional()?
            .ok_or(WorkflowError::NotFound("task"))?;
        Ok(row.into())
    }

    fn delete_task(&mut self, id: i32) -> WorkflowResult<bool> {
        let deleted = diesel::delete(tasks::table.find(id)).execute(self.conn)?;
        Ok(deleted > 0)
    }
}

impl UserTaskRepo for SqliteUnit<'_> {
    fn find_user_task(&mut self, id: i32) -> WorkflowResult<Option<UserTask>> {
        user_tasks::table
            .find(id)
            .select(UserTaskRow::as_select())
            .first::<UserTaskRow>(self.conn)
            .optional()?
            .map(UserTask::try_from)
            .transpose()
    }

    fn find_active_assignment(
        &mut self,
        child_id: i32,
        task_id: i32,
    ) -> WorkflowResult<Option<UserTask>> {
        user_tasks::table
            .filter(user_tasks::child_id.eq(child_id))
            .filter(user_tasks::task_id.eq(task_id))
            .filter(user_tasks::status.eq_any(ACTIVE_TASK_STATUSES))
            .select(UserTaskRow::as_select())
            .first::<UserTaskRow>(self.conn)
            .optional()?
            .map(UserTask::try_from)
            .transpose()
    }

    fn count_active_assignments(&mut self, task_id: i32) -> WorkflowResult<i64> {
        Ok(user_tasks::table
            .filter(user_tasks::task_id.eq(task_id))
            .filter(user_tasks::status.eq_any(ACTIVE_TASK_STATUSES))
            .count()
            .get_result(self.conn)?)
    }

    fn insert_user_task(
        &mut self,
        task_id: i32,
        child_id: i32,
        assigned_by: i32,
        at: DateTime<Utc>,
    ) -> WorkflowResult<UserTask> {
        let row = diesel::insert_into(user_tasks::table)
            .values(&NewUserTask {
                task_id,
                child_id,
                status: TaskStatus::Assigned.as_str(),
                assigned_by,
                assigned_at: at.naive_utc(),
            })
            .returning(UserTaskRow::as_returning())
            .get_result::<UserTaskRow>(self.conn)
            .map_err(|e| {
                if is_unique_violation(&e) {
                    WorkflowError::Conflict(format!(
                        "task {task_id} already active for child {child_id}"
                    ))
                } else {
                    e.into()
                }
            })?;
        row.try_into()
    }

    fn transition_user_task(
        &mut self,
        id: i32,
        from: TaskStatus,
        change: &TaskTransition,
    ) -> WorkflowResult<Option<UserTask>> {
        let target = change.target().as_str();
        let guarded = user_tasks::table
            .filter(user_tasks::id.eq(id))
            .filter(user_tasks::status.eq(from.as_str()));
        let updated = match change {
            TaskTransition::Submit { at } => diesel::update(guarded)
                .set((
                    user_tasks::status.eq(target),
                    user_tasks::submitted_at.eq(Some(at.naive_utc())),
                ))
                .execute(self.conn)?,
            TaskTransition::Verify { decision, by, at } => {
                let completed_at =
                    matches!(decision, Decision::Approved).then_some(at.naive_utc());
                diesel::update(guarded)
                    .set((
                        user_tasks::status.eq(target),
                        user_tasks::verified_by.eq(Some(*by)),
                        user_tasks::verified_at.eq(Some(at.naive_utc())),
                        user_tasks::completed_at.eq(completed_at),
                    ))
                    .execute(self.conn)?
            }
        };
        if updated == 0 {
            return Ok(None);
        }
        self.find_user_task(id)
    }

    fn list_user_tasks_for_child(&mut self, child_id: i32) -> WorkflowResult<Vec<UserTask>> {
        user_tasks::table
            .filter(user_tasks::child_id.eq(child_id))
            .order((user_tasks::assigned_at.desc(), user_tasks::id.desc()))
            .select(UserTaskRow::as_select())
            .load::<UserTaskRow>(self.conn)?
            .into_iter()
            .map(UserTask::try_from)
            .collect()
    }
}

impl RewardRepo for SqliteUnit<'_> {
    fn find_reward(&mut self, id: i32) -> WorkflowResult<Option<RewardDefinition>> {
        Ok(rewards::table
            .find(id)
            .select(RewardRow::as_select())
            .first::<RewardRow>(self.conn)
            .optional()?
            .map(RewardDefinition::from))
    }

    fn insert_reward(
        &mut self,
        input: &DefinitionInput,
        created_by: i32,
        at: DateTime<Utc>,
    ) -> WorkflowResult<RewardDefinition> {
        let at = at.naive_utc();
        let row = diesel::insert_into(rewards::table)
            .values(&NewReward {
                name: &input.name,
                description: input.description.as_deref(),
                point_cost: input.points,
                created_by,
                created_at: at,
                updated_at: at,
            })
            .returning(RewardRow::as_returning())
            .get_result::<RewardRow>(self.conn)?;
        Ok(row.into())
    }

    fn update_reward(
        &mut self,
        id: i32,
        input: &DefinitionInput,
        at: DateTime<Utc>,
    ) -> WorkflowResult<RewardDefinition> {
        let row = diesel::update(rewards::table.find(id))
            .set((
                rewards::name.eq(&input.name),
                rewards::description.eq(input.description.as_deref()),
                rewards::point_cost.eq(input.points),
                rewards::updated_at.eq(at.naive_utc()),
            ))
            .returning(RewardRow::as_returning())
            .get_result::<RewardRow>(self.conn)
            .optional()?
            .ok_or(WorkflowError::NotFound("reward"))?;
        Ok(row.into())
    }

    fn delete_reward(&mut self, id: i32) -> WorkflowResult<bool> {
        let deleted = diesel::delete(rewards::table.find(id)).execute(self.conn)?;
        Ok(deleted > 0)
    }
}

impl UserRewardRepo for SqliteUnit<'_> {
    fn find_claim(&mut self, id: i32) -> WorkflowResult<Option<RewardClaim>> {
        user_rewards::table
            .find(id)
            .select(UserRewardRow::as_select())
            .first::<UserRewardRow>(self.conn)
            .optional()?
            .map(RewardClaim::try_from)
            .transpose()
    }

    fn insert_claim(
        &mut self,
        reward_id: i32,
        child_id: i32,
        points: i32,
        at: DateTime<Utc>,
    ) -> WorkflowResult<RewardClaim> {
        diesel::insert_into(user_rewards::table)
            .values(&NewUserReward {
                reward_id,
                child_id,
                status: ClaimStatus::Pending.as_str(),
                points_deducted: points,
                claimed_at: at.naive_utc(),
            })
            .returning(UserRewardRow::as_returning())
            .get_result::<UserRewardRow>(self.conn)?
            .try_into()
    }

    fn review_pending_claim(
        &mut self,
        id: i32,
        review: &ClaimReview,
    ) -> WorkflowResult<Option<RewardClaim>> {
        let updated = diesel::update(
            user_rewards::table
                .filter(user_rewards::id.eq(id))
                .filter(user_rewards::status.eq(ClaimStatus::Pending.as_str())),
        )
        .set((
            user_rewards::status.eq(review.target().as_str()),
            user_rewards::reviewed_by.eq(Some(review.by)),
            user_rewards::reviewed_at.eq(Some(review.at.naive_utc())),
        ))
        .execute(self.conn)?;
        if updated == 0 {
            return Ok(None);
        }
        self.find_claim(id)
    }

    fn list_claims_for_child(&mut self, child_id: i32) -> WorkflowResult<Vec<RewardClaim>> {
        user_rewards::table
            .filter(user_rewards::child_id.eq(child_id))
            .order((user_rewards::claimed_at.desc(), user_rewards::id.desc()))
            .select(UserRewardRow::as_select())
            .load::<UserRewardRow>(self.conn)?
            .into_iter()
            .map(RewardClaim::try_from)
            .collect()
    }
}

impl LedgerRepo for SqliteUnit<'_> {
    fn append_entry(&mut self, entry: &NewLedgerEntry, at: DateTime<Utc>) -> WorkflowResult<i32> {
        Ok(diesel::insert_into(point_transactions::table)
            .values(&NewPointTransaction {
                user_id: entry.child_id,
                change_amount: entry.change_amount,
                transaction_type: entry.transaction_type.as_str(),
                related_user_task_id: entry.related_user_task_id,
                related_user_reward_id: entry.related_user_reward_id,
                created_by: entry.created_by,
                notes: entry.notes.as_deref(),
                created_at: at.naive_utc(),
            })
            .returning(point_transactions::id)
            .get_result::<i32>(self.conn)?)
    }

    fn sum_for_child(&mut self, child_id: i32) -> WorkflowResult<i64> {
        let total: Option<i64> = point_transactions::table
            .filter(point_transactions::user_id.eq(child_id))
            .select(sum(point_transactions::change_amount))
            .first(self.conn)?;
        Ok(total.unwrap_or(0))
    }

    fn list_entries(
        &mut self,
        child_id: i32,
        offset: i64,
        limit: i64,
    ) -> WorkflowResult<Vec<LedgerEntry>> {
        point_transactions::table
            .filter(point_transactions::user_id.eq(child_id))
            .order((
                point_transactions::created_at.desc(),
                point_transactions::id.desc(),
            ))
            .offset(offset)
            .limit(limit)
            .select(PointTransactionRow::as_select())
            .load::<PointTransactionRow>(self.conn)?
            .into_iter()
            .map(LedgerEntry::try_from)
            .collect()
    }
}

impl InvitationRepo for SqliteUnit<'_> {
    fn find_invitation(&mut self, code: &str) -> WorkflowResult<Option<Invitation>> {
        invitation_codes::table
            .filter(invitation_codes::code.eq(code))
            .select(InvitationRow::as_select())
            .first::<InvitationRow>(self.conn)
            .optional()?
            .map(Invitation::try_from)
            .transpose()
    }

    fn insert_invitation(&mut self, new: &NewInvitation) -> WorkflowResult<Invitation> {
        diesel::insert_into(invitation_codes::table)
            .values(&NewInvitationRow {
                code: &new.code,
                child_id: new.child_id,
                created_by: new.created_by,
                status: InvitationStatus::Active.as_str(),
                expires_at: new.expires_at.naive_utc(),
                created_at: new.created_at.naive_utc(),
            })
            .returning(InvitationRow::as_returning())
            .get_result::<InvitationRow>(self.conn)
            .map_err(|e| {
                if is_unique_violation(&e) {
                    WorkflowError::Conflict("invitation code already exists".into())
                } else {
                    e.into()
                }
            })?
            .try_into()
    }

    fn mark_invitation_used(
        &mut self,
        code: &str,
        used_by: i32,
        at: DateTime<Utc>,
    ) -> WorkflowResult<bool> {
        let updated = diesel::update(
            invitation_codes::table
                .filter(invitation_codes::code.eq(code))
                .filter(invitation_codes::status.eq(InvitationStatus::Active.as_str())),
        )
        .set((
            invitation_codes::status.eq(InvitationStatus::Used.as_str()),
            invitation_codes::used_by.eq(Some(used_by)),
            invitation_codes::used_at.eq(Some(at.naive_utc())),
        ))
        .execute(self.conn)?;
        Ok(updated > 0)
    }

    fn mark_invitation_expired(&mut self, code: &str) -> WorkflowResult<bool> {
        let updated = diesel::update(
            invitation_codes::table
                .filter(invitation_codes::code.eq(code))
                .filter(invitation_codes::status.eq(InvitationStatus::Active.as_str())),
        )
        .set(invitation_codes::status.eq(InvitationStatus::Expired.as_str()))
        .execute(self.conn)?;
        Ok(updated > 0)
    }
}
