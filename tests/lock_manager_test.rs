use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;

mod common;
use common::init_logging;

use crabdb::common::types::Rid;
use crabdb::transaction::concurrency::{
    AbortReason, IsolationLevel, LockManager, LockMode, TransactionManager, TransactionState,
};

const TABLE_A: u32 = 0;
const TABLE_B: u32 = 1;

fn setup() -> (Arc<LockManager>, Arc<TransactionManager>) {
    init_logging();
    let lock_manager = Arc::new(LockManager::new(Duration::from_millis(10)));
    let txn_manager = Arc::new(TransactionManager::new(lock_manager.clone()));
    (lock_manager, txn_manager)
}

fn reason_of(result: Result<bool, crabdb::TransactionAbort>) -> AbortReason {
    result.expect_err("expected a transaction abort").reason
}

#[test]
fn test_compatible_modes_grant_immediately() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    let t3 = tm.begin(IsolationLevel::RepeatableRead);

    // IS, IX and another IS coexist on the same table.
    assert!(lm.lock_table(&t1, LockMode::IntentionShared, TABLE_A)?);
    assert!(lm.lock_table(&t2, LockMode::IntentionExclusive, TABLE_A)?);
    assert!(lm.lock_table(&t3, LockMode::IntentionShared, TABLE_A)?);

    // Shared row locks under the intention locks.
    assert!(lm.lock_row(&t1, LockMode::Shared, TABLE_A, Rid::new(1, 1))?);
    assert!(lm.lock_row(&t2, LockMode::Exclusive, TABLE_A, Rid::new(1, 2))?);

    assert!(lm.unlock_row(&t1, TABLE_A, Rid::new(1, 1), false)?);
    assert!(lm.unlock_row(&t2, TABLE_A, Rid::new(1, 2), false)?);
    assert!(lm.unlock_table(&t1, TABLE_A)?);
    assert!(lm.unlock_table(&t2, TABLE_A)?);
    assert!(lm.unlock_table(&t3, TABLE_A)?);
    Ok(())
}

#[test]
fn test_same_mode_relock_returns_false() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE_A)?);
    assert!(!lm.lock_table(&t1, LockMode::Shared, TABLE_A)?);
    assert!(lm.unlock_table(&t1, TABLE_A)?);
    Ok(())
}

#[test]
fn test_repeatable_read_aborts_lock_on_shrinking() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE_A)?);
    assert!(lm.unlock_table(&t1, TABLE_A)?);
    assert_eq!(t1.state(), TransactionState::Shrinking);

    let reason = reason_of(lm.lock_table(&t1, LockMode::Shared, TABLE_B));
    assert_eq!(reason, AbortReason::LockOnShrinking);
    assert_eq!(t1.state(), TransactionState::Aborted);
    tm.abort(&t1);
    Ok(())
}

#[test]
fn test_repeatable_read_intention_release_also_shrinks() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::IntentionShared, TABLE_A)?);
    assert!(lm.unlock_table(&t1, TABLE_A)?);
    assert_eq!(t1.state(), TransactionState::Shrinking);
    tm.abort(&t1);
    Ok(())
}

#[test]
fn test_read_committed_allows_shared_while_shrinking() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::ReadCommitted);

    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE_A)?);
    assert!(lm.unlock_table(&t1, TABLE_A)?);
    assert_eq!(t1.state(), TransactionState::Shrinking);

    // IS/S stay legal while shrinking under READ COMMITTED...
    assert!(lm.lock_table(&t1, LockMode::IntentionShared, TABLE_B)?);
    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE_A)?);

    // ...but growth-side modes abort.
    let reason = reason_of(lm.lock_table(&t1, LockMode::IntentionExclusive, TABLE_B));
    assert_eq!(reason, AbortReason::LockOnShrinking);
    tm.abort(&t1);
    Ok(())
}

#[test]
fn test_read_uncommitted_rejects_shared_modes() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::ReadUncommitted);

    let reason = reason_of(lm.lock_table(&t1, LockMode::Shared, TABLE_A));
    assert_eq!(reason, AbortReason::LockSharedOnReadUncommitted);
    tm.abort(&t1);

    // X and IX are the only legal table modes.
    let t2 = tm.begin(IsolationLevel::ReadUncommitted);
    assert!(lm.lock_table(&t2, LockMode::IntentionExclusive, TABLE_A)?);
    assert!(lm.lock_row(&t2, LockMode::Exclusive, TABLE_A, Rid::new(1, 1))?);
    assert!(lm.unlock_row(&t2, TABLE_A, Rid::new(1, 1), false)?);
    assert!(lm.unlock_table(&t2, TABLE_A)?);
    tm.commit(&t2);
    Ok(())
}

#[test]
fn test_row_lock_hierarchy_enforcement() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);

    // No table lock at all.
    let reason = reason_of(lm.lock_row(&t1, LockMode::Shared, TABLE_A, Rid::new(1, 1)));
    assert_eq!(reason, AbortReason::TableLockNotPresent);
    tm.abort(&t1);

    // IS covers row S but not row X.
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&t2, LockMode::IntentionShared, TABLE_A)?);
    assert!(lm.lock_row(&t2, LockMode::Shared, TABLE_A, Rid::new(1, 1))?);
    let reason = reason_of(lm.lock_row(&t2, LockMode::Exclusive, TABLE_A, Rid::new(1, 2)));
    assert_eq!(reason, AbortReason::TableLockNotPresent);
    tm.abort(&t2);

    // Intention locks are never legal on rows.
    let t3 = tm.begin(IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&t3, LockMode::IntentionExclusive, TABLE_A)?);
    let reason = reason_of(lm.lock_row(
        &t3,
        LockMode::IntentionShared,
        TABLE_A,
        Rid::new(1, 1),
    ));
    assert_eq!(reason, AbortReason::AttemptedIntentionLockOnRow);
    tm.abort(&t3);
    Ok(())
}

#[test]
fn test_unlock_ordering_and_missing_locks() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);

    // Unlocking something never locked aborts.
    let reason = reason_of(lm.unlock_table(&t1, TABLE_A));
    assert_eq!(reason, AbortReason::AttemptedUnlockButNoLockHeld);
    tm.abort(&t1);

    // A table cannot be unlocked while its rows are still locked.
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&t2, LockMode::IntentionExclusive, TABLE_A)?);
    assert!(lm.lock_row(&t2, LockMode::Exclusive, TABLE_A, Rid::new(2, 2))?);
    let reason = reason_of(lm.unlock_table(&t2, TABLE_A));
    assert_eq!(reason, AbortReason::TableUnlockedBeforeUnlockingRows);
    tm.abort(&t2);
    Ok(())
}

#[test]
fn test_incompatible_upgrade_aborts() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Exclusive, TABLE_A)?);
    let reason = reason_of(lm.lock_table(&t1, LockMode::Shared, TABLE_A));
    assert_eq!(reason, AbortReason::IncompatibleUpgrade);
    tm.abort(&t1);
    Ok(())
}

#[test]
fn test_upgrade_takes_priority_over_waiters() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE_A)?);

    // T2 queues behind T1's S lock, wanting X.
    let t2_granted = {
        let lm = lm.clone();
        let t2 = t2.clone();
        std::thread::spawn(move || lm.lock_table(&t2, LockMode::Exclusive, TABLE_A))
    };
    std::thread::sleep(Duration::from_millis(100));

    // T1's upgrade S -> X overtakes the waiting T2 and is granted at once.
    assert!(lm.lock_table(&t1, LockMode::Exclusive, TABLE_A)?);
    assert_eq!(t1.table_lock_mode(TABLE_A), Some(LockMode::Exclusive));
    assert!(!t2_granted.is_finished());

    // Only T1's release lets T2 through.
    assert!(lm.unlock_table(&t1, TABLE_A)?);
    assert!(t2_granted.join().unwrap()?);
    assert_eq!(t2.table_lock_mode(TABLE_A), Some(LockMode::Exclusive));

    assert!(lm.unlock_table(&t2, TABLE_A)?);
    tm.commit(&t1);
    tm.commit(&t2);
    Ok(())
}

#[test]
fn test_upgrade_conflict_aborts_second_upgrader() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE_A)?);
    assert!(lm.lock_table(&t2, LockMode::Shared, TABLE_A)?);

    // T2's upgrade waits on T1's S lock.
    let t2_upgrade = {
        let lm = lm.clone();
        let t2 = t2.clone();
        std::thread::spawn(move || lm.lock_table(&t2, LockMode::Exclusive, TABLE_A))
    };
    std::thread::sleep(Duration::from_millis(100));

    // While T2's upgrade is in flight, T1's own upgrade attempt aborts.
    let reason = reason_of(lm.lock_table(&t1, LockMode::Exclusive, TABLE_A));
    assert_eq!(reason, AbortReason::UpgradeConflict);
    assert_eq!(t1.state(), TransactionState::Aborted);

    // Releasing the aborted T1 unblocks the upgrader.
    tm.abort(&t1);
    assert!(t2_upgrade.join().unwrap()?);
    assert_eq!(t2.table_lock_mode(TABLE_A), Some(LockMode::Exclusive));
    tm.commit(&t2);
    Ok(())
}

#[test]
fn test_fifo_grants_behind_exclusive() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    let t3 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Exclusive, TABLE_A)?);

    let waiters: Vec<_> = [t2.clone(), t3.clone()]
        .into_iter()
        .map(|txn| {
            let lm = lm.clone();
            std::thread::spawn(move || lm.lock_table(&txn, LockMode::Shared, TABLE_A))
        })
        .collect();
    std::thread::sleep(Duration::from_millis(100));

    // Both S requests wait behind the X lock, then both are granted after
    // the release (compatible with each other).
    assert!(lm.unlock_table(&t1, TABLE_A)?);
    for waiter in waiters {
        assert!(waiter.join().unwrap()?);
    }
    assert_eq!(t2.table_lock_mode(TABLE_A), Some(LockMode::Shared));
    assert_eq!(t3.table_lock_mode(TABLE_A), Some(LockMode::Shared));

    tm.commit(&t1);
    tm.commit(&t2);
    tm.commit(&t3);
    Ok(())
}

#[test]
fn test_commit_releases_everything() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::IntentionExclusive, TABLE_A)?);
    assert!(lm.lock_row(&t1, LockMode::Exclusive, TABLE_A, Rid::new(1, 1))?);

    // T2 waits for the row.
    let t2_granted = {
        let (lm, t2) = (lm.clone(), t2.clone());
        std::thread::spawn(move || {
            lm.lock_table(&t2, LockMode::IntentionShared, TABLE_A).unwrap();
            lm.lock_row(&t2, LockMode::Shared, TABLE_A, Rid::new(1, 1))
        })
    };
    std::thread::sleep(Duration::from_millis(100));

    // Commit releases the row and table locks without a precondition dance.
    tm.commit(&t1);
    assert!(t2_granted.join().unwrap()?);
    assert_eq!(t1.table_lock_mode(TABLE_A), None);
    tm.commit(&t2);
    Ok(())
}

#[test]
fn test_wait_for_graph_edges() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    let t3 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Exclusive, TABLE_A)?);
    for txn in [t2.clone(), t3.clone()] {
        let lm = lm.clone();
        std::thread::spawn(move || {
            let _ = lm.lock_table(&txn, LockMode::Shared, TABLE_A);
        });
    }
    std::thread::sleep(Duration::from_millis(100));

    // Both waiters point at the holder, sorted by waiter id.
    assert_eq!(lm.edge_list(), vec![(t2.id(), t1.id()), (t3.id(), t1.id())]);

    tm.commit(&t1);
    std::thread::sleep(Duration::from_millis(100));
    assert!(lm.edge_list().is_empty());
    tm.commit(&t2);
    tm.commit(&t3);
    Ok(())
}

#[test]
fn test_deadlock_detection_aborts_youngest() -> Result<()> {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE_A)?);
    assert!(lm.lock_table(&t2, LockMode::Shared, TABLE_B)?);

    // T1 wants X on B (held S by T2); T2 wants X on A (held S by T1).
    let t1_wait = {
        let (lm, t1) = (lm.clone(), t1.clone());
        std::thread::spawn(move || lm.lock_table(&t1, LockMode::Exclusive, TABLE_B))
    };
    let t2_wait = {
        let (lm, t2) = (lm.clone(), t2.clone());
        std::thread::spawn(move || lm.lock_table(&t2, LockMode::Exclusive, TABLE_A))
    };
    std::thread::sleep(Duration::from_millis(100));

    // One deterministic tick: the youngest transaction on the cycle dies.
    let victims = lm.detect_once(&tm);
    assert_eq!(victims, vec![t2.id()]);
    assert_eq!(t2.state(), TransactionState::Aborted);

    // The victim's waiting acquire unwinds with `false`.
    assert!(!t2_wait.join().unwrap()?);

    // Releasing the victim's locks lets the survivor finish.
    tm.abort(&t2);
    assert!(t1_wait.join().unwrap()?);
    assert_eq!(t1.table_lock_mode(TABLE_B), Some(LockMode::Exclusive));
    tm.commit(&t1);
    Ok(())
}

#[test]
fn test_background_detector_resolves_deadlock() -> Result<()> {
    let (lm, tm) = setup();
    lm.start_cycle_detection(tm.clone());

    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE_A)?);
    assert!(lm.lock_table(&t2, LockMode::Shared, TABLE_B)?);

    let t1_wait = {
        let (lm, t1) = (lm.clone(), t1.clone());
        std::thread::spawn(move || lm.lock_table(&t1, LockMode::Exclusive, TABLE_B))
    };
    let t2_wait = {
        let (lm, t2, tm) = (lm.clone(), t2.clone(), tm.clone());
        std::thread::spawn(move || {
            let granted = lm.lock_table(&t2, LockMode::Exclusive, TABLE_A)?;
            if !granted {
                // Woken as the deadlock victim: tear down so the
                // survivor can proceed.
                tm.abort(&t2);
            }
            Ok::<bool, crabdb::TransactionAbort>(granted)
        })
    };

    // The detector runs every 10ms; the survivor must come through.
    assert!(t1_wait.join().unwrap()?);
    assert!(!t2_wait.join().unwrap()?);
    assert_eq!(t2.state(), TransactionState::Aborted);

    tm.commit(&t1);
    lm.stop_cycle_detection();
    Ok(())
}
