use chrono::Duration;
use kidpoints_server::engine::model::{DefinitionInput, NewLedgerEntry};
use kidpoints_server::engine::{Engine, InvitationPolicy, Storage, WorkflowError};
use kidpoints_server::server::{RelationshipConfig, UserConfig};
use kidpoints_server::storage::Store;
use kidpoints_shared::auth::Role;
use kidpoints_shared::domain::{
    ClaimStatus, Decision, InvitationStatus, TaskStatus, TransactionType,
};

/// mum is tim's and ana's parent; dad has no children yet; zoe and max are a
/// separate family.
struct Family {
    store: Store,
    engine: Engine<Store>,
    mum: i32,
    dad: i32,
    zoe: i32,
    tim: i32,
    ana: i32,
    max: i32,
    _tempdir: tempfile::TempDir,
}

fn user(username: &str, role: Role) -> UserConfig {
    UserConfig {
        username: username.into(),
        display_name: None,
        password_hash: "not-a-real-hash".into(),
        role,
    }
}

fn rel(parent: &str, child: &str) -> RelationshipConfig {
    RelationshipConfig {
        parent: parent.into(),
        child: child.into(),
    }
}

impl Family {
    async fn new() -> Self {
        Self::with_policy(InvitationPolicy::default()).await
    }

    async fn with_policy(policy: InvitationPolicy) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("family.db");
        let store = Store::connect_sqlite(db_path.to_str().unwrap())
            .await
            .expect("db");
        store
            .seed_from_config(
                &[
                    user("mum", Role::Parent),
                    user("dad", Role::Parent),
                    user("zoe", Role::Parent),
                    user("tim", Role::Child),
                    user("ana", Role::Child),
                    user("max", Role::Child),
                ],
                &[rel("mum", "tim"), rel("mum", "ana"), rel("zoe", "max")],
            )
            .await
            .expect("seed");
        let id = |name: &'static str| {
            let store = store.clone();
            async move {
                store
                    .find_credentials(name)
                    .await
                    .unwrap()
                    .expect("seeded user")
                    .user
                    .id
            }
        };
        Family {
            mum: id("mum").await,
            dad: id("dad").await,
            zoe: id("zoe").await,
            tim: id("tim").await,
            ana: id("ana").await,
            max: id("max").await,
            engine: Engine::new(store.clone(), policy),
            store,
            _tempdir: dir,
        }
    }

    async fn task(&self, owner: i32, points: i32) -> i32 {
        self.engine
            .tasks
            .create_definition(owner, DefinitionInput::new("Dishes", None, points))
            .await
            .unwrap()
            .id
    }

    async fn reward(&self, owner: i32, cost: i32) -> i32 {
        self.engine
            .rewards
            .create_definition(owner, DefinitionInput::new("Ice cream", None, cost))
            .await
            .unwrap()
            .id
    }

    /// Assigns, submits and approves one task worth `points` for `child`.
    async fn earn(&self, child: i32, points: i32) -> i32 {
        let task_id = self.task(self.mum, points).await;
        let ut = self.engine.tasks.assign(child, task_id, self.mum).await.unwrap();
        self.engine.tasks.submit(ut.id, child).await.unwrap();
        self.engine
            .tasks
            .verify(ut.id, self.mum, Decision::Approved)
            .await
            .unwrap();
        ut.id
    }

    async fn balance(&self, child: i32) -> i64 {
        self.engine.ledger.balance(child).await.unwrap()
    }
}

#[tokio::test]
async fn approval_credits_points_once() {
    let f = Family::new().await;
    let task_id = f.task(f.mum, 100).await;
    let ut = f.engine.tasks.assign(f.tim, task_id, f.mum).await.unwrap();
    assert_eq!(ut.status, TaskStatus::Assigned);
    let ut = f.engine.tasks.submit(ut.id, f.tim).await.unwrap();
    assert_eq!(ut.status, TaskStatus::Submitted);
    assert!(ut.submitted_at.is_some());

    let v = f
        .engine
        .tasks
        .verify(ut.id, f.mum, Decision::Approved)
        .await
        .unwrap();
    assert_eq!(v.user_task.status, TaskStatus::Approved);
    assert_eq!(v.user_task.verified_by, Some(f.mum));
    assert!(v.user_task.completed_at.is_some());
    assert!(v.entry_id.is_some());
    assert_eq!(f.balance(f.tim).await, 100);

    let history = f.engine.ledger.history(f.tim, 1, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].change_amount, 100);
    assert_eq!(history[0].transaction_type, TransactionType::TaskCompletion);
    assert_eq!(history[0].related_user_task_id, Some(ut.id));
    assert_eq!(history[0].created_by, f.mum);

    let again = f.engine.tasks.verify(ut.id, f.mum, Decision::Approved).await;
    assert!(matches!(again, Err(WorkflowError::InvalidState { .. })));
    assert_eq!(f.balance(f.tim).await, 100);
}

#[tokio::test]
async fn rejection_awards_nothing() {
    let f = Family::new().await;
    let task_id = f.task(f.mum, 30).await;
    let ut = f.engine.tasks.assign(f.tim, task_id, f.mum).await.unwrap();
    f.engine.tasks.submit(ut.id, f.tim).await.unwrap();
    let v = f
        .engine
        .tasks
        .verify(ut.id, f.mum, Decision::Rejected)
        .await
        .unwrap();
    assert_eq!(v.user_task.status, TaskStatus::Rejected);
    assert_eq!(v.user_task.completed_at, None);
    assert_eq!(v.entry_id, None);
    assert_eq!(f.balance(f.tim).await, 0);

    // A terminal assignment no longer blocks a fresh one.
    f.engine.tasks.assign(f.tim, task_id, f.mum).await.unwrap();
}

#[tokio::test]
async fn state_machine_rejects_out_of_order_steps() {
    let f = Family::new().await;
    let task_id = f.task(f.mum, 10).await;
    let ut = f.engine.tasks.assign(f.tim, task_id, f.mum).await.unwrap();

    let early = f.engine.tasks.verify(ut.id, f.mum, Decision::Approved).await;
    assert!(matches!(
        early,
        Err(WorkflowError::InvalidState { expected: "submitted", .. })
    ));

    let by_sibling = f.engine.tasks.submit(ut.id, f.ana).await;
    assert!(matches!(by_sibling, Err(WorkflowError::Forbidden(_))));

    f.engine.tasks.submit(ut.id, f.tim).await.unwrap();
    let twice = f.engine.tasks.submit(ut.id, f.tim).await;
    assert!(matches!(twice, Err(WorkflowError::InvalidState { .. })));

    let missing = f.engine.tasks.submit(9_999, f.tim).await;
    assert!(matches!(missing, Err(WorkflowError::NotFound(_))));
}

#[tokio::test]
async fn duplicate_active_assignment_conflicts() {
    let f = Family::new().await;
    let task_id = f.task(f.mum, 10).await;
    let ut = f.engine.tasks.assign(f.tim, task_id, f.mum).await.unwrap();
    let dup = f.engine.tasks.assign(f.tim, task_id, f.mum).await;
    assert!(matches!(dup, Err(WorkflowError::Conflict(_))));

    f.engine.tasks.submit(ut.id, f.tim).await.unwrap();
    let dup = f.engine.tasks.assign(f.tim, task_id, f.mum).await;
    assert!(matches!(dup, Err(WorkflowError::Conflict(_))));

    // Other children are unaffected.
    f.engine.tasks.assign(f.ana, task_id, f.mum).await.unwrap();
}

#[tokio::test]
async fn assignment_requires_parent_of_child() {
    let f = Family::new().await;
    let task_id = f.task(f.mum, 10).await;
    let res = f.engine.tasks.assign(f.max, task_id, f.mum).await;
    assert!(matches!(res, Err(WorkflowError::Forbidden(_))));

    let zoes = f.task(f.zoe, 10).await;
    let res = f.engine.tasks.assign(f.tim, zoes, f.mum).await;
    assert!(matches!(res, Err(WorkflowError::Forbidden(_))));

    let res = f.engine.tasks.assign(f.tim, 9_999, f.mum).await;
    assert!(matches!(res, Err(WorkflowError::NotFound("task"))));

    let by_child = f
        .engine
        .tasks
        .create_definition(f.tim, DefinitionInput::new("Nap", None, 5))
        .await;
    assert!(matches!(by_child, Err(WorkflowError::Forbidden(_))));
}

#[tokio::test]
async fn definitions_validate_input() {
    let f = Family::new().await;
    let zero = f
        .engine
        .tasks
        .create_definition(f.mum, DefinitionInput::new("Dishes", None, 0))
        .await;
    assert!(matches!(zero, Err(WorkflowError::Invalid(_))));
    let blank = f
        .engine
        .rewards
        .create_definition(f.mum, DefinitionInput::new("  ", None, 5))
        .await;
    assert!(matches!(blank, Err(WorkflowError::Invalid(_))));
}

#[tokio::test]
async fn outsiders_cannot_verify() {
    let f = Family::new().await;
    let task_id = f.task(f.mum, 10).await;
    let ut = f.engine.tasks.assign(f.tim, task_id, f.mum).await.unwrap();
    f.engine.tasks.submit(ut.id, f.tim).await.unwrap();

    for actor in [f.zoe, f.dad, f.tim] {
        let res = f.engine.tasks.verify(ut.id, actor, Decision::Approved).await;
        assert!(matches!(res, Err(WorkflowError::Forbidden(_))), "{actor}");
    }
    assert_eq!(f.balance(f.tim).await, 0);
}

#[tokio::test]
async fn active_assignments_freeze_task_definition() {
    let f = Family::new().await;
    let task_id = f.task(f.mum, 10).await;
    let ut = f.engine.tasks.assign(f.tim, task_id, f.mum).await.unwrap();

    let edit = DefinitionInput::new("Dishes (big)", None, 20);
    let res = f
        .engine
        .tasks
        .update_definition(f.mum, task_id, edit.clone())
        .await;
    assert!(matches!(res, Err(WorkflowError::Conflict(_))));
    let res = f.engine.tasks.delete_definition(f.mum, task_id).await;
    assert!(matches!(res, Err(WorkflowError::Conflict(_))));

    f.engine.tasks.submit(ut.id, f.tim).await.unwrap();
    f.engine
        .tasks
        .verify(ut.id, f.mum, Decision::Approved)
        .await
        .unwrap();
    let updated = f
        .engine
        .tasks
        .update_definition(f.mum, task_id, edit)
        .await
        .unwrap();
    assert_eq!(updated.point_value, 20);

    let res = f.engine.tasks.delete_definition(f.zoe, task_id).await;
    assert!(matches!(res, Err(WorkflowError::Forbidden(_))));
    f.engine
        .tasks
        .delete_definition(f.mum, task_id)
        .await
        .unwrap();
    assert!(matches!(
        f.engine.tasks.get_definition(task_id).await,
        Err(WorkflowError::NotFound("task"))
    ));
    // History survives the definition.
    assert_eq!(f.balance(f.tim).await, 10);
    assert_eq!(f.engine.tasks.list_for_child(f.tim).await.unwrap().len(), 1);
}

#[tokio::test]
async fn claim_then_approve_debits_snapshot_cost() {
    let f = Family::new().await;
    f.earn(f.tim, 100).await;
    let reward_id = f.reward(f.mum, 60).await;

    let claim = f.engine.rewards.claim(f.tim, reward_id).await.unwrap();
    assert_eq!(claim.status, ClaimStatus::Pending);
    assert_eq!(claim.points_deducted, 60);
    let reward = f.engine.rewards.get_definition(reward_id).await.unwrap();
    assert_eq!(reward.point_cost, 60);
    assert_eq!(reward.created_by, f.mum);
    // Claiming alone does not move points.
    assert_eq!(f.balance(f.tim).await, 100);

    // Price changes after the claim do not affect it.
    f.engine
        .rewards
        .update_definition(f.mum, reward_id, DefinitionInput::new("Ice cream", None, 90))
        .await
        .unwrap();

    let review = f
        .engine
        .rewards
        .review(claim.id, f.mum, Decision::Approved)
        .await
        .unwrap();
    assert_eq!(review.claim.status, ClaimStatus::Approved);
    assert_eq!(review.claim.reviewed_by, Some(f.mum));
    assert!(review.entry_id.is_some());
    assert_eq!(f.balance(f.tim).await, 40);

    let history = f.engine.ledger.history(f.tim, 1, 10).await.unwrap();
    assert_eq!(history[0].change_amount, -60);
    assert_eq!(history[0].transaction_type, TransactionType::RewardRedemption);
    assert_eq!(history[0].related_user_reward_id, Some(claim.id));

    let again = f.engine.rewards.review(claim.id, f.mum, Decision::Rejected).await;
    assert!(matches!(again, Err(WorkflowError::InvalidState { .. })));
}

#[tokio::test]
async fn rejected_claim_leaves_balance() {
    let f = Family::new().await;
    f.earn(f.tim, 50).await;
    let reward_id = f.reward(f.mum, 50).await;
    let claim = f.engine.rewards.claim(f.tim, reward_id).await.unwrap();
    let review = f
        .engine
        .rewards
        .review(claim.id, f.mum, Decision::Rejected)
        .await
        .unwrap();
    assert_eq!(review.claim.status, ClaimStatus::Rejected);
    assert_eq!(review.entry_id, None);
    assert_eq!(f.balance(f.tim).await, 50);
}

#[tokio::test]
async fn second_approval_fails_when_balance_is_spent() {
    let f = Family::new().await;
    f.earn(f.tim, 100).await;
    let reward_id = f.reward(f.mum, 60).await;
    let first = f.engine.rewards.claim(f.tim, reward_id).await.unwrap();
    let second = f.engine.rewards.claim(f.tim, reward_id).await.unwrap();

    f.engine
        .rewards
        .review(first.id, f.mum, Decision::Approved)
        .await
        .unwrap();
    let res = f
        .engine
        .rewards
        .review(second.id, f.mum, Decision::Approved)
        .await;
    assert_eq!(
        res.unwrap_err(),
        WorkflowError::InsufficientPoints {
            balance: 40,
            required: 60
        }
    );
    assert_eq!(f.balance(f.tim).await, 40);
    let claims = f.engine.rewards.list_for_child(f.tim).await.unwrap();
    let still = claims.iter().find(|c| c.id == second.id).unwrap();
    assert_eq!(still.status, ClaimStatus::Pending);
}

#[tokio::test]
async fn claim_checks_balance_and_family() {
    let f = Family::new().await;
    f.earn(f.tim, 10).await;
    let reward_id = f.reward(f.mum, 50).await;
    let res = f.engine.rewards.claim(f.tim, reward_id).await;
    assert_eq!(
        res.unwrap_err(),
        WorkflowError::InsufficientPoints {
            balance: 10,
            required: 50
        }
    );

    let zoes = f.reward(f.zoe, 1).await;
    let res = f.engine.rewards.claim(f.tim, zoes).await;
    assert!(matches!(res, Err(WorkflowError::Forbidden(_))));

    let res = f.engine.rewards.claim(f.mum, reward_id).await;
    assert!(matches!(res, Err(WorkflowError::Forbidden(_))));
}

#[tokio::test]
async fn deleted_reward_cannot_be_claimed_but_pending_claims_resolve() {
    let f = Family::new().await;
    f.earn(f.tim, 100).await;
    let reward_id = f.reward(f.mum, 30).await;
    let claim = f.engine.rewards.claim(f.tim, reward_id).await.unwrap();

    f.engine
        .rewards
        .delete_definition(f.mum, reward_id)
        .await
        .unwrap();
    let res = f.engine.rewards.claim(f.tim, reward_id).await;
    assert!(matches!(res, Err(WorkflowError::NotFound("reward"))));
    assert!(matches!(
        f.engine.rewards.get_definition(reward_id).await,
        Err(WorkflowError::NotFound("reward"))
    ));

    let review = f
        .engine
        .rewards
        .review(claim.id, f.mum, Decision::Approved)
        .await
        .unwrap();
    assert_eq!(review.claim.status, ClaimStatus::Approved);
    assert_eq!(f.balance(f.tim).await, 70);
}

#[tokio::test]
async fn manual_adjustments_never_go_negative() {
    let f = Family::new().await;
    let up = f
        .engine
        .ledger
        .adjust(f.mum, f.tim, 25, Some("birthday".into()))
        .await
        .unwrap();
    assert_eq!(up.balance, 25);

    let res = f.engine.ledger.adjust(f.mum, f.tim, -30, None).await;
    assert_eq!(
        res.unwrap_err(),
        WorkflowError::InsufficientPoints {
            balance: 25,
            required: 30
        }
    );
    let down = f.engine.ledger.adjust(f.mum, f.tim, -25, None).await.unwrap();
    assert_eq!(down.balance, 0);

    let zero = f.engine.ledger.adjust(f.mum, f.tim, 0, None).await;
    assert!(matches!(zero, Err(WorkflowError::Invalid(_))));
    let outsider = f.engine.ledger.adjust(f.zoe, f.tim, 5, None).await;
    assert!(matches!(outsider, Err(WorkflowError::Forbidden(_))));

    let history = f.engine.ledger.history(f.tim, 1, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(
        history
            .iter()
            .all(|e| e.transaction_type == TransactionType::ManualAdjustment)
    );
    assert_eq!(history[1].notes.as_deref(), Some("birthday"));
}

#[tokio::test]
async fn balance_always_equals_ledger_sum() {
    let f = Family::new().await;
    f.earn(f.tim, 40).await;
    f.earn(f.tim, 35).await;
    f.engine.ledger.adjust(f.mum, f.tim, -15, None).await.unwrap();
    let reward_id = f.reward(f.mum, 20).await;
    let claim = f.engine.rewards.claim(f.tim, reward_id).await.unwrap();
    f.engine
        .rewards
        .review(claim.id, f.mum, Decision::Approved)
        .await
        .unwrap();
    f.earn(f.ana, 5).await;

    let history = f.engine.ledger.history(f.tim, 1, 100).await.unwrap();
    let sum: i64 = history.iter().map(|e| i64::from(e.change_amount)).sum();
    assert_eq!(sum, f.balance(f.tim).await);
    assert_eq!(sum, 40);

    // Paging walks the same rows newest first.
    let page1 = f.engine.ledger.history(f.tim, 1, 2).await.unwrap();
    let page2 = f.engine.ledger.history(f.tim, 2, 2).await.unwrap();
    assert_eq!(page1.len(), 2);
    assert_eq!(page2.len(), 2);
    assert_eq!(page1[0].id, history[0].id);
    assert_eq!(page2[1].id, history[3].id);
}

fn manual_entry(child_id: i32, created_by: i32, change_amount: i32) -> NewLedgerEntry {
    NewLedgerEntry {
        child_id,
        change_amount,
        transaction_type: TransactionType::ManualAdjustment,
        created_by,
        notes: None,
        related_user_task_id: None,
        related_user_reward_id: None,
    }
}

#[tokio::test]
async fn append_entry_refuses_overdraft() {
    let f = Family::new().await;
    let ledger = &f.engine.ledger;
    ledger.append_entry(manual_entry(f.tim, f.mum, 30)).await.unwrap();
    let res = ledger.append_entry(manual_entry(f.tim, f.mum, -31)).await;
    assert_eq!(
        res.unwrap_err(),
        WorkflowError::InsufficientPoints {
            balance: 30,
            required: 31
        }
    );
    ledger.append_entry(manual_entry(f.tim, f.mum, -30)).await.unwrap();
    assert_eq!(f.balance(f.tim).await, 0);

    let zero = ledger.append_entry(manual_entry(f.tim, f.mum, 0)).await;
    assert!(matches!(zero, Err(WorkflowError::Invalid(_))));
    let nobody = ledger.append_entry(manual_entry(9_999, f.mum, 5)).await;
    assert!(matches!(nobody, Err(WorkflowError::NotFound("child"))));
}

#[tokio::test]
async fn failed_unit_of_work_rolls_back_ledger_write() {
    let f = Family::new().await;
    let entry = manual_entry(f.tim, f.mum, 500);
    let res: Result<(), WorkflowError> = f
        .store
        .transact("test_rollback", move |uow| {
            uow.append_entry(&entry, chrono::Utc::now())?;
            Err(WorkflowError::Conflict("abort".into()))
        })
        .await;
    assert!(matches!(res, Err(WorkflowError::Conflict(_))));
    assert_eq!(f.balance(f.tim).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_caller_rolls_back_unit_in_flight() {
    let f = Family::new().await;
    let entry = manual_entry(f.tim, f.mum, 500);
    let (appended_tx, appended_rx) = tokio::sync::oneshot::channel::<()>();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

    let unit = f.store.transact("held_unit", move |uow| {
        uow.append_entry(&entry, chrono::Utc::now())?;
        let _ = appended_tx.send(());
        // Hold the transaction open until the caller is gone.
        let _ = release_rx.recv();
        Ok(())
    });
    let mut unit = Box::pin(unit);
    tokio::select! {
        res = &mut unit => panic!("unit finished while held: {res:?}"),
        appended = appended_rx => appended.unwrap(),
    }
    let timed_out = tokio::time::timeout(std::time::Duration::from_millis(50), &mut unit).await;
    assert!(timed_out.is_err());
    drop(unit);
    release_tx.send(()).unwrap();

    // The next writer waits for the held unit's lock, so it observes the outcome.
    let after = f.engine.ledger.adjust(f.mum, f.tim, 1, None).await.unwrap();
    assert_eq!(after.balance, 1);
    let history = f.engine.ledger.history(f.tim, 1, 10).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn invitation_adds_co_parent() {
    let f = Family::new().await;
    let task_id = f.task(f.mum, 15).await;
    let invitation = f.engine.invitations.issue(f.mum, f.tim).await.unwrap();
    assert_eq!(invitation.code.len(), 8);
    assert_eq!(invitation.status, InvitationStatus::Active);

    // Codes are case-insensitive on input.
    let relationship = f
        .engine
        .invitations
        .redeem(f.dad, &invitation.code.to_lowercase())
        .await
        .unwrap();
    assert_eq!(relationship.parent_id, f.dad);
    assert_eq!(relationship.child_id, f.tim);
    assert!(f.engine.relationships.is_parent_of(f.dad, f.tim).await.unwrap());
    assert!(f.engine.relationships.has_shared_child(f.dad, f.mum).await.unwrap());
    assert!(!f.engine.relationships.is_parent_of(f.dad, f.ana).await.unwrap());

    // The new co-parent sees mum's definitions and can verify tim's work.
    let ut = f.engine.tasks.assign(f.tim, task_id, f.dad).await.unwrap();
    f.engine.tasks.submit(ut.id, f.tim).await.unwrap();
    f.engine
        .tasks
        .verify(ut.id, f.dad, Decision::Approved)
        .await
        .unwrap();
    assert_eq!(f.balance(f.tim).await, 15);

    let reused = f.engine.invitations.redeem(f.zoe, &invitation.code).await;
    assert_eq!(reused.unwrap_err(), WorkflowError::InvalidCode);
}

#[tokio::test]
async fn co_parent_of_a_sibling_cannot_decide_for_other_children() {
    let f = Family::new().await;
    let invitation = f.engine.invitations.issue(f.mum, f.ana).await.unwrap();
    f.engine
        .invitations
        .redeem(f.zoe, &invitation.code)
        .await
        .unwrap();

    f.earn(f.tim, 40).await;
    let task_id = f.task(f.mum, 50).await;
    let ut = f.engine.tasks.assign(f.tim, task_id, f.mum).await.unwrap();
    f.engine.tasks.submit(ut.id, f.tim).await.unwrap();
    let reward_id = f.reward(f.mum, 30).await;
    let claim = f.engine.rewards.claim(f.tim, reward_id).await.unwrap();

    let verify = f.engine.tasks.verify(ut.id, f.zoe, Decision::Approved).await;
    assert!(matches!(verify, Err(WorkflowError::Forbidden(_))));
    let review = f
        .engine
        .rewards
        .review(claim.id, f.zoe, Decision::Approved)
        .await;
    assert!(matches!(review, Err(WorkflowError::Forbidden(_))));
    assert_eq!(f.balance(f.tim).await, 40);

    // Zoe still decides for the child she was invited to.
    let ana_task = f.engine.tasks.assign(f.ana, task_id, f.zoe).await.unwrap();
    f.engine.tasks.submit(ana_task.id, f.ana).await.unwrap();
    f.engine
        .tasks
        .verify(ana_task.id, f.zoe, Decision::Approved)
        .await
        .unwrap();
    assert_eq!(f.balance(f.ana).await, 50);
}

#[tokio::test]
async fn invitation_error_cases() {
    let f = Family::new().await;
    let res = f.engine.invitations.issue(f.zoe, f.tim).await;
    assert!(matches!(res, Err(WorkflowError::Forbidden(_))));

    let invitation = f.engine.invitations.issue(f.mum, f.tim).await.unwrap();
    let by_child = f.engine.invitations.redeem(f.max, &invitation.code).await;
    assert_eq!(by_child.unwrap_err(), WorkflowError::NotParentRole);
    let by_existing = f.engine.invitations.redeem(f.mum, &invitation.code).await;
    assert_eq!(by_existing.unwrap_err(), WorkflowError::AlreadyRelated);
    let unknown = f.engine.invitations.redeem(f.dad, "ZZZZZZZZ").await;
    assert_eq!(unknown.unwrap_err(), WorkflowError::InvalidCode);

    // Failed attempts leave the code usable.
    f.engine
        .invitations
        .redeem(f.dad, &invitation.code)
        .await
        .unwrap();
}

#[tokio::test]
async fn expired_invitation_is_marked_and_refused() {
    let f = Family::with_policy(InvitationPolicy {
        ttl: Duration::zero(),
        ..InvitationPolicy::default()
    })
    .await;
    let invitation = f.engine.invitations.issue(f.mum, f.tim).await.unwrap();
    let res = f.engine.invitations.redeem(f.dad, &invitation.code).await;
    assert_eq!(res.unwrap_err(), WorkflowError::InvalidCode);

    let code = invitation.code.clone();
    let stored = f
        .store
        .read("test_invitation", move |uow| uow.find_invitation(&code))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, InvitationStatus::Expired);
    assert!(!f.engine.relationships.is_parent_of(f.dad, f.tim).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approvals_credit_once() {
    let f = Family::new().await;
    let task_id = f.task(f.mum, 100).await;
    let ut = f.engine.tasks.assign(f.tim, task_id, f.mum).await.unwrap();
    f.engine.tasks.submit(ut.id, f.tim).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let tasks = f.engine.tasks.clone();
        let (ut_id, mum) = (ut.id, f.mum);
        handles.push(tokio::spawn(async move {
            tasks.verify(ut_id, mum, Decision::Approved).await
        }));
    }
    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(WorkflowError::InvalidState { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(f.balance(f.tim).await, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claim_approvals_never_overdraw() {
    let f = Family::new().await;
    f.earn(f.tim, 100).await;
    let reward_id = f.reward(f.mum, 60).await;
    let a = f.engine.rewards.claim(f.tim, reward_id).await.unwrap();
    let b = f.engine.rewards.claim(f.tim, reward_id).await.unwrap();

    let handles: Vec<_> = [a.id, b.id]
        .into_iter()
        .map(|claim_id| {
            let rewards = f.engine.rewards.clone();
            let mum = f.mum;
            tokio::spawn(async move { rewards.review(claim_id, mum, Decision::Approved).await })
        })
        .collect();
    let mut ok = 0;
    let mut short = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(WorkflowError::InsufficientPoints { .. }) => short += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!((ok, short), (1, 1));
    assert_eq!(f.balance(f.tim).await, 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_redeem_has_single_winner() {
    let f = Family::new().await;
    let invitation = f.engine.invitations.issue(f.mum, f.ana).await.unwrap();

    let handles: Vec<_> = [f.dad, f.zoe]
        .into_iter()
        .map(|parent| {
            let invitations = f.engine.invitations.clone();
            let code = invitation.code.clone();
            tokio::spawn(async move { invitations.redeem(parent, &code).await })
        })
        .collect();
    let mut winners = Vec::new();
    for h in handles {
        match h.await.unwrap() {
            Ok(rel) => winners.push(rel.parent_id),
            Err(WorkflowError::InvalidCode) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(winners.len(), 1);
    let loser = if winners[0] == f.dad { f.zoe } else { f.dad };
    assert!(!f.engine.relationships.is_parent_of(loser, f.ana).await.unwrap());
}
