use serde::{Deserialize, Serialize};

use crate::auth::Role;
use crate::domain::{ClaimStatus, Decision, TaskStatus, TransactionType};

pub const API_V1_PREFIX: &str = "/api/v1";

// Auth
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthReq {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResp {
    pub token: String,
    pub user_id: i32,
    pub role: Role,
}

// Task definitions and assignments
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskDefinitionReq {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub point_value: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskDefinitionDto {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub point_value: i32,
    pub created_by: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssignReq {
    pub child_id: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DecisionReq {
    pub decision: Decision,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserTaskDto {
    pub id: i32,
    pub task_id: i32,
    pub child_id: i32,
    pub status: TaskStatus,
    pub assigned_by: i32,
    pub verified_by: Option<i32>,
    pub assigned_at: String, // RFC3339 UTC
    pub submitted_at: Option<String>,
    pub verified_at: Option<String>,
    pub completed_at: Option<String>,
}

// Reward definitions and claims
#[derive(Debug, Serialize, Deserialize)]
pub struct RewardDefinitionReq {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub point_cost: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RewardDefinitionDto {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub point_cost: i32,
    pub created_by: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClaimDto {
    pub id: i32,
    pub reward_id: i32,
    pub child_id: i32,
    pub status: ClaimStatus,
    pub points_deducted: i32,
    pub reviewed_by: Option<i32>,
    pub claimed_at: String, // RFC3339 UTC
    pub reviewed_at: Option<String>,
}

// Points
#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceDto {
    pub child_id: i32,
    pub balance: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdjustPointsReq {
    pub delta: i32,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LedgerEntryDto {
    pub id: i32,
    pub change_amount: i32,
    pub transaction_type: TransactionType,
    pub related_user_task_id: Option<i32>,
    pub related_user_reward_id: Option<i32>,
    pub created_by: i32,
    pub notes: Option<String>,
    pub created_at: String, // RFC3339 UTC
}

// Invitations
#[derive(Debug, Serialize, Deserialize)]
pub struct InvitationDto {
    pub code: String,
    pub child_id: i32,
    pub expires_at: String, // RFC3339 UTC
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RedeemReq {
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RelationshipDto {
    pub id: i32,
    pub parent_id: i32,
    pub child_id: i32,
}
