//! Engine records to wire DTOs. Timestamps go out as RFC3339 UTC.

use chrono::{DateTime, Utc};
use kidpoints_shared::api;

use crate::engine::model::{
    Invitation, LedgerEntry, Relationship, RewardClaim, RewardDefinition, TaskDefinition, UserTask,
};

fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

impl From<TaskDefinition> for api::TaskDefinitionDto {
    fn from(t: TaskDefinition) -> Self {
        Self {
            id: t.id,
            name: t.name,
            description: t.description,
            point_value: t.point_value,
            created_by: t.created_by,
        }
    }
}

impl From<UserTask> for api::UserTaskDto {
    fn from(t: UserTask) -> Self {
        Self {
            id: t.id,
            task_id: t.task_id,
            child_id: t.child_id,
            status: t.status,
            assigned_by: t.assigned_by,
            verified_by: t.verified_by,
            assigned_at: ts(t.assigned_at),
            submitted_at: t.submitted_at.map(ts),
            verified_at: t.verified_at.map(ts),
            completed_at: t.completed_at.map(ts),
        }
    }
}

impl From<RewardDefinition> for api::RewardDefinitionDto {
    fn from(r: RewardDefinition) -> Self {
        Self {
            id: r.id,
            name: r.name,
            description: r.description,
            point_cost: r.point_cost,
            created_by: r.created_by,
        }
    }
}

impl From<RewardClaim> for api::ClaimDto {
    fn from(c: RewardClaim) -> Self {
        Self {
            id: c.id,
            reward_id: c.reward_id,
            child_id: c.child_id,
            status: c.status,
            points_deducted: c.points_deducted,
            reviewed_by: c.reviewed_by,
            claimed_at: ts(c.claimed_at),
            reviewed_at: c.reviewed_at.map(ts),
        }
    }
}

impl From<LedgerEntry> for api::LedgerEntryDto {
    fn from(e: LedgerEntry) -> Self {
        Self {
            id: e.id,
            change_amount: e.change_amount,
            transaction_type: e.transaction_type,
            related_user_task_id: e.related_user_task_id,
            related_user_reward_id: e.related_user_reward_id,
            created_by: e.created_by,
            notes: e.notes,
            created_at: ts(e.created_at),
        }
    }
}

impl From<Invitation> for api::InvitationDto {
    fn from(i: Invitation) -> Self {
        Self {
            code: i.code,
            child_id: i.child_id,
            expires_at: ts(i.expires_at),
        }
    }
}

impl From<Relationship> for api::RelationshipDto {
    fn from(r: Relationship) -> Self {
        Self {
            id: r.id,
            parent_id: r.parent_id,
            child_id: r.child_id,
        }
    }
}
