//! Single-use, time-boxed codes that attach a second parent to a child.

use chrono::{Duration, Utc};
use kidpoints_shared::auth::Role;
use kidpoints_shared::domain::InvitationStatus;
use rand::Rng;
use tracing::{info, warn};

use super::error::{WorkflowError, WorkflowResult};
use super::model::{Invitation, NewInvitation, Relationship};
use super::relationships::is_parent_of;
use super::repo::Storage;
use super::require_user;

/// Unambiguous code characters: no `0`/`O` or `1`/`I`.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_ATTEMPTS: usize = 5;

pub const DEFAULT_CODE_LENGTH: usize = 8;
pub const DEFAULT_TTL_HOURS: i64 = 48;

#[derive(Debug, Clone, Copy)]
pub struct InvitationPolicy {
    pub ttl: Duration,
    pub code_length: usize,
}

impl Default for InvitationPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
            code_length: DEFAULT_CODE_LENGTH,
        }
    }
}

pub fn generate_code<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

enum Redemption {
    Joined(Relationship),
    Expired,
}

#[derive(Clone)]
pub struct Invitations<S> {
    store: S,
    policy: InvitationPolicy,
}

impl<S: Storage> Invitations<S> {
    pub fn new(store: S, policy: InvitationPolicy) -> Self {
        Self { store, policy }
    }

    /// Issues a fresh code for `child_id`. Only an existing parent may invite.
    pub async fn issue(&self, parent_id: i32, child_id: i32) -> WorkflowResult<Invitation> {
        let policy = self.policy;
        self.store
            .transact("invitation_issue", move |uow| {
                let child = require_user(uow, child_id, "child")?;
                if child.role != Role::Child {
                    return Err(WorkflowError::NotFound("child"));
                }
                if !is_parent_of(uow, parent_id, child_id)? {
                    warn!(parent_id, child_id, "invitation: issue by non-parent denied");
                    return Err(WorkflowError::Forbidden("not a parent of this child"));
                }
                let now = Utc::now();
                let mut rng = rand::thread_rng();
                for _ in 0..CODE_ATTEMPTS {
                    let code = generate_code(&mut rng, policy.code_length);
                    if uow.find_invitation(&code)?.is_some() {
                        continue;
                    }
                    let invitation = uow.insert_invitation(&NewInvitation {
                        code,
                        child_id,
                        created_by: parent_id,
                        expires_at: now + policy.ttl,
                        created_at: now,
                    })?;
                    info!(
                        invitation_id = invitation.id,
                        parent_id,
                        child_id,
                        expires_at = %invitation.expires_at,
                        "invitation: issued"
                    );
                    return Ok(invitation);
                }
                Err(WorkflowError::Conflict(
                    "could not allocate a unique invitation code".into(),
                ))
            })
            .await
    }

    /// Attaches `joining_parent_id` to the code's child. The code flips to
    /// `used` only while still `active`, so of several concurrent redeemers
    /// exactly one succeeds and the rest see `InvalidCode`.
    pub async fn redeem(&self, joining_parent_id: i32, code: &str) -> WorkflowResult<Relationship> {
        let code = normalize_code(code);
        let outcome = self
            .store
            .transact("invitation_redeem", move |uow| {
                let invitation = uow
                    .find_invitation(&code)?
                    .ok_or(WorkflowError::InvalidCode)?;
                if invitation.status != InvitationStatus::Active {
                    return Err(WorkflowError::InvalidCode);
                }
                let now = Utc::now();
                if invitation.expires_at <= now {
                    uow.mark_invitation_expired(&code)?;
                    return Ok(Redemption::Expired);
                }
                let joiner = require_user(uow, joining_parent_id, "user")?;
                if joiner.role != Role::Parent {
                    return Err(WorkflowError::NotParentRole);
                }
                if is_parent_of(uow, joining_parent_id, invitation.child_id)? {
                    return Err(WorkflowError::AlreadyRelated);
                }
                if !uow.mark_invitation_used(&code, joining_parent_id, now)? {
                    return Err(WorkflowError::InvalidCode);
                }
                let relationship = uow.insert_relationship(joining_parent_id, invitation.child_id)?;
                info!(
                    invitation_id = invitation.id,
                    parent_id = joining_parent_id,
                    child_id = invitation.child_id,
                    "invitation: redeemed"
                );
                Ok(Redemption::Joined(relationship))
            })
            .await?;
        match outcome {
            Redemption::Joined(relationship) => Ok(relationship),
            Redemption::Expired => Err(WorkflowError::InvalidCode),
        }
    }
}
