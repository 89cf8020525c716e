//! Records the engine reads and writes through its storage traits.

use chrono::{DateTime, Utc};
use kidpoints_shared::auth::Role;
use kidpoints_shared::domain::{
    ClaimStatus, Decision, InvitationStatus, TaskStatus, TransactionType,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i32,
    pub username: String,
    pub display_name: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: i32,
    pub parent_id: i32,
    pub child_id: i32,
    pub created_at: DateTime<Utc>,
}

/// Name, description and point figure shared by task and reward definitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionInput {
    pub name: String,
    pub description: Option<String>,
    /// Point value for tasks, point cost for rewards.
    pub points: i32,
}

impl DefinitionInput {
    pub fn new(name: impl Into<String>, description: Option<String>, points: i32) -> Self {
        Self {
            name: name.into(),
            description,
            points,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub point_value: i32,
    pub created_by: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserTask {
    pub id: i32,
    pub task_id: i32,
    pub child_id: i32,
    pub status: TaskStatus,
    pub assigned_by: i32,
    pub verified_by: Option<i32>,
    pub assigned_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskTransition {
    Submit {
        at: DateTime<Utc>,
    },
    Verify {
        decision: Decision,
        by: i32,
        at: DateTime<Utc>,
    },
}

impl TaskTransition {
    pub fn target(&self) -> TaskStatus {
        match self {
            TaskTransition::Submit { .. } => TaskStatus::Submitted,
            TaskTransition::Verify {
                decision: Decision::Approved,
                ..
            } => TaskStatus::Approved,
            TaskTransition::Verify {
                decision: Decision::Rejected,
                ..
            } => TaskStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardDefinition {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub point_cost: i32,
    pub created_by: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One child's claim against a reward definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardClaim {
    pub id: i32,
    pub reward_id: i32,
    pub child_id: i32,
    pub status: ClaimStatus,
    /// Reward cost captured when the claim was made.
    pub points_deducted: i32,
    pub reviewed_by: Option<i32>,
    pub claimed_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClaimReview {
    pub decision: Decision,
    pub by: i32,
    pub at: DateTime<Utc>,
}

impl ClaimReview {
    pub fn target(&self) -> ClaimStatus {
        match self.decision {
            Decision::Approved => ClaimStatus::Approved,
            Decision::Rejected => ClaimStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: i32,
    pub child_id: i32,
    pub change_amount: i32,
    pub transaction_type: TransactionType,
    pub related_user_task_id: Option<i32>,
    pub related_user_reward_id: Option<i32>,
    pub created_by: i32,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    pub child_id: i32,
    pub change_amount: i32,
    pub transaction_type: TransactionType,
    pub created_by: i32,
    pub notes: Option<String>,
    pub related_user_task_id: Option<i32>,
    pub related_user_reward_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    pub id: i32,
    pub code: String,
    pub child_id: i32,
    pub created_by: i32,
    pub status: InvitationStatus,
    pub expires_at: DateTime<Utc>,
    pub used_by: Option<i32>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInvitation {
    pub code: String,
    pub child_id: i32,
    pub created_by: i32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}
