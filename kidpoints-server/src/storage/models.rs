use crate::engine::WorkflowError;
use crate::engine::model::{
    Invitation, LedgerEntry, Relationship, RewardClaim, RewardDefinition, TaskDefinition, User,
    UserTask,
};
use crate::storage::schema::{
    invitation_codes, point_transactions, rewards, tasks, user_relationships, user_rewards,
    user_tasks, users,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;
use std::str::FromStr;

fn utc(ts: NaiveDateTime) -> DateTime<Utc> {
    ts.and_utc()
}

fn parse_tag<T>(raw: &str) -> Result<T, WorkflowError>
where
    T: FromStr<Err = kidpoints_shared::domain::UnknownVariant>,
{
    raw.parse::<T>().map_err(WorkflowError::internal)
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserRow {
    pub id: i32,
    pub username: String,
    pub display_name: String,
    pub role: String,
    pub password_hash: String,
    pub created_at: NaiveDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = WorkflowError;
    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            role: parse_tag(&row.role)?,
            username: row.username,
            display_name: row.display_name,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub display_name: &'a str,
    pub role: &'a str,
    pub password_hash: &'a str,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = user_relationships)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RelationshipRow {
    pub id: i32,
    pub parent_id: i32,
    pub child_id: i32,
    pub created_at: NaiveDateTime,
}

impl From<RelationshipRow> for Relationship {
    fn from(row: RelationshipRow) -> Self {
        Relationship {
            id: row.id,
            parent_id: row.parent_id,
            child_id: row.child_id,
            created_at: utc(row.created_at),
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = user_relationships)]
pub struct NewRelationship {
    pub parent_id: i32,
    pub child_id: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TaskRow {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub point_value: i32,
    pub created_by: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<TaskRow> for TaskDefinition {
    fn from(row: TaskRow) -> Self {
        TaskDefinition {
            id: row.id,
            name: row.name,
            description: row.description,
            point_value: row.point_value,
            created_by: row.created_by,
            created_at: utc(row.created_at),
            updated_at: utc(row.updated_at),
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTask<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub point_value: i32,
    pub created_by: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = user_tasks)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserTaskRow {
    pub id: i32,
    pub task_id: i32,
    pub child_id: i32,
    pub status: String,
    pub assigned_by: i32,
    pub verified_by: Option<i32>,
    pub assigned_at: NaiveDateTime,
    pub submitted_at: Option<NaiveDateTime>,
    pub verified_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
}

impl TryFrom<UserTaskRow> for UserTask {
    type Error = WorkflowError;
    fn try_from(row: UserTaskRow) -> Result<Self, Self::Error> {
        Ok(UserTask {
            id: row.id,
            task_id: row.task_id,
            child_id: row.child_id,
            status: parse_tag(&row.status)?,
            assigned_by: row.assigned_by,
            verified_by: row.verified_by,
            assigned_at: utc(row.assigned_at),
            submitted_at: row.submitted_at.map(utc),
            verified_at: row.verified_at.map(utc),
            completed_at: row.completed_at.map(utc),
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = user_tasks)]
pub struct NewUserTask<'a> {
    pub task_id: i32,
    pub child_id: i32,
    pub status: &'a str,
    pub assigned_by: i32,
    pub assigned_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = rewards)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RewardRow {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub point_cost: i32,
    pub created_by: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<RewardRow> for RewardDefinition {
    fn from(row: RewardRow) -> Self {
        RewardDefinition {
            id: row.id,
            name: row.name,
            description: row.description,
            point_cost: row.point_cost,
            created_by: row.created_by,
            created_at: utc(row.created_at),
            updated_at: utc(row.updated_at),
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = rewards)]
pub struct NewReward<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub point_cost: i32,
    pub created_by: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = user_rewards)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserRewardRow {
    pub id: i32,
    pub reward_id: i32,
    pub child_id: i32,
    pub status: String,
    pub points_deducted: i32,
    pub reviewed_by: Option<i32>,
    pub claimed_at: NaiveDateTime,
    pub reviewed_at: Option<NaiveDateTime>,
}

impl TryFrom<UserRewardRow> for RewardClaim {
    type Error = WorkflowError;
    fn try_from(row: UserRewardRow) -> Result<Self, Self::Error> {
        Ok(RewardClaim {
            id: row.id,
            reward_id: row.reward_id,
            child_id: row.child_id,
            status: parse_tag(&row.status)?,
            points_deducted: row.points_deducted,
            reviewed_by: row.reviewed_by,
            claimed_at: utc(row.claimed_at),
            reviewed_at: row.reviewed_at.map(utc),
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = user_rewards)]
pub struct NewUserReward<'a> {
    pub reward_id: i32,
    pub child_id: i32,
    pub status: &'a str,
    pub points_deducted: i32,
    pub claimed_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = point_transactions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PointTransactionRow {
    pub id: i32,
    pub user_id: i32,
    pub change_amount: i32,
    pub transaction_type: String,
    pub related_user_task_id: Option<i32>,
    pub related_user_reward_id: Option<i32>,
    pub created_by: i32,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
}

impl TryFrom<PointTransactionRow> for LedgerEntry {
    type Error = WorkflowError;
    fn try_from(row: PointTransactionRow) -> Result<Self, Self::Error> {
        Ok(LedgerEntry {
            id: row.id,
            child_id: row.user_id,
            change_amount: row.change_amount,
            transaction_type: parse_tag(&row.transaction_type)?,
            related_user_task_id: row.related_user_task_id,
            related_user_reward_id: row.related_user_reward_id,
            created_by: row.created_by,
            notes: row.notes,
            created_at: utc(row.created_at),
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = point_transactions)]
pub struct NewPointTransaction<'a> {
    pub user_id: i32,
    pub change_amount: i32,
    pub transaction_type: &'a str,
    pub related_user_task_id: Option<i32>,
    pub related_user_reward_id: Option<i32>,
    pub created_by: i32,
    pub notes: Option<&'a str>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = invitation_codes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct InvitationRow {
    pub id: i32,
    pub code: String,
    pub child_id: i32,
    pub created_by: i32,
    pub status: String,
    pub expires_at: NaiveDateTime,
    pub used_by: Option<i32>,
    pub used_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

impl TryFrom<InvitationRow> for Invitation {
    type Error = WorkflowError;
    fn try_from(row: InvitationRow) -> Result<Self, Self::Error> {
        Ok(Invitation {
            id: row.id,
            status: parse_tag(&row.status)?,
            code: row.code,
            child_id: row.child_id,
            created_by: row.created_by,
            expires_at: utc(row.expires_at),
            used_by: row.used_by,
            used_at: row.used_at.map(utc),
            created_at: utc(row.created_at),
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = invitation_codes)]
pub struct NewInvitationRow<'a> {
    pub code: &'a str,
    pub child_id: i32,
    pub created_by: i32,
    pub status: &'a str,
    pub expires_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}
