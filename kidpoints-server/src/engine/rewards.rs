//! Reward definitions and the `pending -> approved | rejected` lifecycle of
//! each claim.
//!
//! Claiming only checks the balance; points leave the ledger when a parent
//! approves, after a second balance check inside the approving unit of work.
//! Rejection therefore never has anything to refund.

use chrono::Utc;
use kidpoints_shared::auth::Role;
use kidpoints_shared::domain::{ClaimStatus, Decision, TransactionType};
use tracing::{info, warn};

use super::error::{WorkflowError, WorkflowResult};
use super::ledger::{append_checked, balance};
use super::model::{ClaimReview, DefinitionInput, NewLedgerEntry, RewardClaim, RewardDefinition};
use super::relationships::{family_visible, is_parent_of};
use super::repo::{Storage, UnitOfWork};
use super::{require_role, require_user, validate_definition};

/// Result of [`RewardWorkflow::review`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Review {
    pub claim: RewardClaim,
    /// Ledger entry debiting the child; only set on approval.
    pub entry_id: Option<i32>,
}

#[derive(Clone)]
pub struct RewardWorkflow<S> {
    store: S,
}

impl<S: Storage> RewardWorkflow<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub async fn create_definition(
        &self,
        parent_id: i32,
        input: DefinitionInput,
    ) -> WorkflowResult<RewardDefinition> {
        validate_definition(&input)?;
        self.store
            .transact("reward_create", move |uow| {
                let parent = require_user(uow, parent_id, "user")?;
                require_role(&parent, Role::Parent, "only parents create rewards")?;
                let reward = uow.insert_reward(&input, parent_id, Utc::now())?;
                info!(
                    reward_id = reward.id,
                    parent_id,
                    cost = reward.point_cost,
                    "reward: created"
                );
                Ok(reward)
            })
            .await
    }

    pub async fn get_definition(&self, reward_id: i32) -> WorkflowResult<RewardDefinition> {
        self.store
            .read("reward_get", move |uow| {
                uow.find_reward(reward_id)?
                    .ok_or(WorkflowError::NotFound("reward"))
            })
            .await
    }

    /// Pending claims keep the cost they were made at.
    pub async fn update_definition(
        &self,
        actor_id: i32,
        reward_id: i32,
        input: DefinitionInput,
    ) -> WorkflowResult<RewardDefinition> {
        validate_definition(&input)?;
        self.store
            .transact("reward_update", move |uow| {
                editable_reward(uow, actor_id, reward_id)?;
                let reward = uow.update_reward(reward_id, &input, Utc::now())?;
                info!(reward_id, actor_id, cost = reward.point_cost, "reward: updated");
                Ok(reward)
            })
            .await
    }

    pub async fn delete_definition(&self, actor_id: i32, reward_id: i32) -> WorkflowResult<()> {
        self.store
            .transact("reward_delete", move |uow| {
                editable_reward(uow, actor_id, reward_id)?;
                if !uow.delete_reward(reward_id)? {
                    return Err(WorkflowError::NotFound("reward"));
                }
                info!(reward_id, actor_id, "reward: deleted");
                Ok(())
            })
            .await
    }

    /// Opens a pending claim at the reward's current cost.
    pub async fn claim(&self, child_id: i32, reward_id: i32) -> WorkflowResult<RewardClaim> {
        self.store
            .transact("reward_claim", move |uow| {
                let child = require_user(uow, child_id, "child")?;
                require_role(&child, Role::Child, "only children claim rewards")?;
                let reward = uow
                    .find_reward(reward_id)?
                    .ok_or(WorkflowError::NotFound("reward"))?;
                if !is_parent_of(uow, reward.created_by, child_id)? {
                    warn!(child_id, reward_id, "reward: claim outside family denied");
                    return Err(WorkflowError::Forbidden("reward is not offered to this child"));
                }
                let current = balance(uow, child_id)?;
                let required = i64::from(reward.point_cost);
                if current < required {
                    return Err(WorkflowError::InsufficientPoints {
                        balance: current,
                        required,
                    });
                }
                let claim = uow.insert_claim(reward_id, child_id, reward.point_cost, Utc::now())?;
                info!(
                    claim_id = claim.id,
                    child_id,
                    reward_id,
                    cost = reward.point_cost,
                    balance = current,
                    "reward: claimed"
                );
                Ok(claim)
            })
            .await
    }

    /// Approves or rejects a pending claim. Approval debits the snapshot cost
    /// and fails with `InsufficientPoints`, leaving the claim pending, if the
    /// balance no longer covers it. Only a parent of the claiming child may
    /// review.
    pub async fn review(
        &self,
        claim_id: i32,
        actor_id: i32,
        decision: Decision,
    ) -> WorkflowResult<Review> {
        self.store
            .transact("reward_review", move |uow| {
                let claim = uow
                    .find_claim(claim_id)?
                    .ok_or(WorkflowError::NotFound("claim"))?;
                let owner = uow.find_reward(claim.reward_id)?.map(|r| r.created_by);
                let visible = match owner {
                    Some(owner) => family_visible(uow, actor_id, owner)?,
                    None => true,
                };
                if !visible || !is_parent_of(uow, actor_id, claim.child_id)? {
                    warn!(claim_id, actor_id, "reward: review denied");
                    return Err(WorkflowError::Forbidden("not authorized for this child"));
                }
                if claim.status != ClaimStatus::Pending {
                    return Err(invalid_state(claim.status));
                }
                let entry_id = match decision {
                    Decision::Approved => Some(append_checked(
                        uow,
                        &NewLedgerEntry {
                            child_id: claim.child_id,
                            change_amount: -claim.points_deducted,
                            transaction_type: TransactionType::RewardRedemption,
                            created_by: actor_id,
                            notes: None,
                            related_user_task_id: None,
                            related_user_reward_id: Some(claim_id),
                        },
                    )?),
                    Decision::Rejected => None,
                };
                let review = ClaimReview {
                    decision,
                    by: actor_id,
                    at: Utc::now(),
                };
                let Some(updated) = uow.review_pending_claim(claim_id, &review)? else {
                    // Status moved under us; the ledger write above rolls back with this error.
                    let current = uow
                        .find_claim(claim_id)?
                        .map(|c| c.status)
                        .unwrap_or(review.target());
                    return Err(invalid_state(current));
                };
                info!(
                    claim_id,
                    actor_id,
                    %decision,
                    points = claim.points_deducted,
                    ?entry_id,
                    "reward: reviewed"
                );
                Ok(Review {
                    claim: updated,
                    entry_id,
                })
            })
            .await
    }

    pub async fn list_for_child(&self, child_id: i32) -> WorkflowResult<Vec<RewardClaim>> {
        self.store
            .read("reward_list_for_child", move |uow| {
                require_user(uow, child_id, "child")?;
                uow.list_claims_for_child(child_id)
            })
            .await
    }
}

fn editable_reward(
    uow: &mut dyn UnitOfWork,
    actor_id: i32,
    reward_id: i32,
) -> WorkflowResult<RewardDefinition> {
    let reward = uow
        .find_reward(reward_id)?
        .ok_or(WorkflowError::NotFound("reward"))?;
    if !family_visible(uow, actor_id, reward.created_by)? {
        warn!(reward_id, actor_id, "reward: edit denied");
        return Err(WorkflowError::Forbidden("reward belongs to another family"));
    }
    Ok(reward)
}

fn invalid_state(current: ClaimStatus) -> WorkflowError {
    WorkflowError::InvalidState {
        entity: "claim",
        current: current.to_string(),
        expected: ClaimStatus::Pending.as_str(),
    }
}
