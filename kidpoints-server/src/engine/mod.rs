//! Transactional workflow engine: task and reward state machines, the point
//! ledger, invitation codes, and the relationship checks that guard them.
//!
//! Every state transition runs as one [`Storage::transact`] unit, so the
//! authorization check, the state check, the status write and the paired
//! ledger write commit or roll back together.

pub mod error;
pub mod invitations;
pub mod ledger;
pub mod model;
pub mod relationships;
pub mod repo;
pub mod rewards;
pub mod tasks;

pub use error::{WorkflowError, WorkflowResult};
pub use invitations::{InvitationPolicy, Invitations};
pub use ledger::Ledger;
pub use relationships::RelationshipResolver;
pub use repo::{Storage, UnitOfWork};
pub use rewards::RewardWorkflow;
pub use tasks::TaskWorkflow;

use kidpoints_shared::auth::Role;
use model::{DefinitionInput, User};

/// All workflow components over one storage backend.
#[derive(Clone)]
pub struct Engine<S> {
    pub relationships: RelationshipResolver<S>,
    pub ledger: Ledger<S>,
    pub tasks: TaskWorkflow<S>,
    pub rewards: RewardWorkflow<S>,
    pub invitations: Invitations<S>,
}

impl<S: Storage> Engine<S> {
    pub fn new(store: S, invitation_policy: InvitationPolicy) -> Self {
        Self {
            relationships: RelationshipResolver::new(store.clone()),
            ledger: Ledger::new(store.clone()),
            tasks: TaskWorkflow::new(store.clone()),
            rewards: RewardWorkflow::new(store.clone()),
            invitations: Invitations::new(store, invitation_policy),
        }
    }
}

pub(crate) fn require_user(
    uow: &mut dyn UnitOfWork,
    user_id: i32,
    what: &'static str,
) -> WorkflowResult<User> {
    uow.find_user(user_id)?.ok_or(WorkflowError::NotFound(what))
}

pub(crate) fn require_role(user: &User, role: Role, denial: &'static str) -> WorkflowResult<()> {
    if user.role == role {
        Ok(())
    } else {
        tracing::warn!(user_id = user.id, role = %user.role, required = %role, "role check failed");
        Err(WorkflowError::Forbidden(denial))
    }
}

pub(crate) fn validate_definition(input: &DefinitionInput) -> WorkflowResult<()> {
    if input.name.trim().is_empty() {
        return Err(WorkflowError::invalid("name must not be empty"));
    }
    if input.points <= 0 {
        return Err(WorkflowError::invalid("points must be positive"));
    }
    Ok(())
}
