//! Point ledger. A child's balance is always the sum of their ledger rows;
//! nothing caches it.

use chrono::Utc;
use kidpoints_shared::auth::Role;
use kidpoints_shared::domain::TransactionType;
use tracing::{info, warn};

use super::error::{WorkflowError, WorkflowResult};
use super::model::{LedgerEntry, NewLedgerEntry};
use super::relationships::is_parent_of;
use super::repo::{Storage, UnitOfWork};
use super::require_user;

/// Upper bound for one page of history.
pub const HISTORY_MAX_PER_PAGE: usize = 100;

pub fn balance(uow: &mut dyn UnitOfWork, child_id: i32) -> WorkflowResult<i64> {
    uow.sum_for_child(child_id)
}

/// Appends one entry. Debits are checked against the balance read in the same
/// unit, so the entry is refused rather than driving the balance negative.
pub fn append_checked(uow: &mut dyn UnitOfWork, entry: &NewLedgerEntry) -> WorkflowResult<i32> {
    if entry.change_amount == 0 {
        return Err(WorkflowError::invalid("ledger entries must move points"));
    }
    if entry.change_amount < 0 {
        let current = balance(uow, entry.child_id)?;
        let required = -i64::from(entry.change_amount);
        if current < required {
            return Err(WorkflowError::InsufficientPoints {
                balance: current,
                required,
            });
        }
    }
    uow.append_entry(entry, Utc::now())
}

/// Row offset of 1-based `page`; pages past `i64` rows are refused.
fn history_offset(page: usize, per_page: i64) -> WorkflowResult<i64> {
    i64::try_from(page.max(1) - 1)
        .ok()
        .and_then(|p| p.checked_mul(per_page))
        .ok_or_else(|| WorkflowError::invalid(format!("page {page} is out of range")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adjustment {
    pub entry_id: i32,
    pub balance: i64,
}

#[derive(Clone)]
pub struct Ledger<S> {
    store: S,
}

impl<S: Storage> Ledger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Appends a single entry in its own unit of work.
    pub async fn append_entry(&self, entry: NewLedgerEntry) -> WorkflowResult<i32> {
        self.store
            .transact("ledger_append", move |uow| {
                require_user(uow, entry.child_id, "child")?;
                append_checked(uow, &entry)
            })
            .await
    }

    pub async fn balance(&self, child_id: i32) -> WorkflowResult<i64> {
        self.store
            .read("ledger_balance", move |uow| {
                require_user(uow, child_id, "child")?;
                balance(uow, child_id)
            })
            .await
    }

    /// Newest entries first. `page` starts at 1.
    pub async fn history(
        &self,
        child_id: i32,
        page: usize,
        per_page: usize,
    ) -> WorkflowResult<Vec<LedgerEntry>> {
        let per_page = per_page.clamp(1, HISTORY_MAX_PER_PAGE) as i64;
        let offset = history_offset(page, per_page)?;
        self.store
            .read("ledger_history", move |uow| {
                require_user(uow, child_id, "child")?;
                uow.list_entries(child_id, offset, per_page)
            })
            .await
    }

    /// Parent-initiated credit or debit, recorded as `manual_adjustment`.
    pub async fn adjust(
        &self,
        actor_id: i32,
        child_id: i32,
        delta: i32,
        notes: Option<String>,
    ) -> WorkflowResult<Adjustment> {
        self.store
            .transact("ledger_adjust", move |uow| {
                let child = require_user(uow, child_id, "child")?;
                if child.role != Role::Child {
                    return Err(WorkflowError::NotFound("child"));
                }
                if !is_parent_of(uow, actor_id, child_id)? {
                    warn!(actor_id, child_id, "ledger: adjustment by non-parent denied");
                    return Err(WorkflowError::Forbidden("not a parent of this child"));
                }
                let entry = NewLedgerEntry {
                    child_id,
                    change_amount: delta,
                    transaction_type: TransactionType::ManualAdjustment,
                    created_by: actor_id,
                    notes,
                    related_user_task_id: None,
                    related_user_reward_id: None,
                };
                let entry_id = append_checked(uow, &entry)?;
                let new_balance = balance(uow, child_id)?;
                info!(
                    actor_id,
                    child_id,
                    delta,
                    entry_id,
                    balance = new_balance,
                    "ledger: manual adjustment"
                );
                Ok(Adjustment {
                    entry_id,
                    balance: new_balance,
                })
            })
            .await
    }
}
