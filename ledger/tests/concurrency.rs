//! Concurrency and invariant tests for the vault ledger.
//!
//! Many threads hit one engine at once. Whatever the interleaving, the vault
//! total must come out equal to the sum of the per-user balances, and no
//! increment of the shared total may be lost.

use std::sync::{Arc, Barrier};
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use vault_ledger::config::UNITS_PER_COIN;
use vault_ledger::{AccountingEngine, Address, Identity, LedgerDb, LedgerError};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn setup() -> Arc<AccountingEngine> {
    let engine = AccountingEngine::new(LedgerDb::open_temporary().expect("temp db"));
    engine.initialize_vault(&Identity::new_unique()).expect("vault init");
    Arc::new(engine)
}

/// Creates `count` users, each funded with `native` units and holding an
/// initialized deposit record.
fn onboard(engine: &AccountingEngine, count: usize, native: u64) -> Vec<Identity> {
    (0..count)
        .map(|_| {
            let user = Identity::new_unique();
            engine
                .db()
                .credit_native(&Address::from(&user), native)
                .unwrap();
            engine.initialize_deposit(&user).unwrap();
            user
        })
        .collect()
}

fn assert_books_balanced(engine: &AccountingEngine) {
    let report = engine.audit().unwrap();
    assert!(report.balanced, "unbalanced books: {report:?}");
}

// ---------------------------------------------------------------------------
// 1. Concurrent Deposits
// ---------------------------------------------------------------------------

#[test]
fn three_concurrent_deposits_are_all_counted() {
    let engine = setup();
    let users = onboard(&engine, 3, 2 * UNITS_PER_COIN);
    let start_total = engine.fetch_vault().unwrap().total_balance;
    let barrier = Arc::new(Barrier::new(users.len()));

    let handles: Vec<_> = users
        .iter()
        .copied()
        .map(|user| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.deposit(&user, UNITS_PER_COIN).unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("depositor thread panicked");
    }

    assert_eq!(
        engine.fetch_vault().unwrap().total_balance,
        start_total + 3 * UNITS_PER_COIN
    );
    for user in &users {
        assert_eq!(engine.fetch_user_deposit(user).unwrap().balance, UNITS_PER_COIN);
    }
    assert_eq!(engine.custody_balance().unwrap(), 3 * UNITS_PER_COIN);
    assert_books_balanced(&engine);
}

#[test]
fn many_threads_many_small_deposits() {
    const THREADS: usize = 8;
    const ROUNDS: u64 = 25;

    let engine = setup();
    let users = onboard(&engine, THREADS, ROUNDS * 10);

    let handles: Vec<_> = users
        .iter()
        .copied()
        .map(|user| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    engine.deposit(&user, 10).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("depositor thread panicked");
    }

    assert_eq!(
        engine.fetch_vault().unwrap().total_balance,
        THREADS as u64 * ROUNDS * 10
    );
    assert_books_balanced(&engine);
}

// ---------------------------------------------------------------------------
// 2. Mixed Deposits and Withdrawals
// ---------------------------------------------------------------------------

#[test]
fn concurrent_deposits_and_withdrawals_conserve_funds() {
    const THREADS: usize = 6;
    const FUNDING: u64 = 1_000;

    let engine = setup();
    let users = onboard(&engine, THREADS, FUNDING);

    let handles: Vec<_> = users
        .iter()
        .copied()
        .enumerate()
        .map(|(i, user)| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for round in 0..40u64 {
                    let amount = 1 + (round + i as u64) % 7;
                    let result = if round % 3 == 2 {
                        engine.withdraw(&user, amount)
                    } else {
                        engine.deposit(&user, amount)
                    };
                    match result {
                        Ok(_) | Err(LedgerError::InsufficientFunds { .. }) => {}
                        Err(err) => panic!("unexpected failure: {err}"),
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker thread panicked");
    }

    assert_books_balanced(&engine);
    for user in &users {
        let recorded = engine.fetch_user_deposit(user).unwrap().balance;
        let wallet = engine.native_balance(&Address::from(user)).unwrap();
        assert_eq!(recorded + wallet, FUNDING, "funds created or destroyed");
    }
}

#[test]
fn racing_withdrawals_never_overdraw() {
    let engine = setup();
    let user = onboard(&engine, 1, 100)[0];
    engine.deposit(&user, 100).unwrap();
    let barrier = Arc::new(Barrier::new(4));

    // Four threads each try to take 40 out of a balance of 100.
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.withdraw(&user, 40).is_ok()
            })
        })
        .collect();
    let successes = handles
        .into_iter()
        .map(|h| h.join().expect("withdraw thread panicked"))
        .filter(|ok| *ok)
        .count();

    assert_eq!(successes, 2);
    assert_eq!(engine.fetch_user_deposit(&user).unwrap().balance, 20);
    assert_eq!(engine.fetch_vault().unwrap().total_balance, 20);
}

#[test]
fn concurrent_record_initialization_succeeds_once() {
    let engine = setup();
    let user = Identity::new_unique();
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.initialize_deposit(&user)
            })
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("init thread panicked"))
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, LedgerError::AlreadyInitialized { .. })));
}

// ---------------------------------------------------------------------------
// 3. Randomized Invariant Walk
// ---------------------------------------------------------------------------

/// Random operations against random users. After every step the books
/// must balance and no underflow may ever surface.
#[test]
fn random_walk_preserves_invariants() {
    let engine = setup();
    let mut rng = StdRng::seed_from_u64(0x5eed_0f_7a17);
    let users = onboard(&engine, 5, 10_000);
    let mut expected = [0u64; 5];

    for _ in 0..400 {
        let idx = rng.gen_range(0..users.len());
        let user = &users[idx];
        let amount = rng.gen_range(0..1_500u64);

        if rng.gen_bool(0.5) {
            match engine.deposit(user, amount) {
                Ok(_) => expected[idx] += amount,
                Err(LedgerError::InvalidAmount(0)) => assert_eq!(amount, 0),
                Err(LedgerError::TransferFailed(_)) => {
                    assert!(amount > 10_000 - expected[idx]);
                }
                Err(err) => panic!("unexpected deposit failure: {err}"),
            }
        } else {
            match engine.withdraw(user, amount) {
                Ok(_) => expected[idx] -= amount,
                Err(LedgerError::InvalidAmount(0)) => assert_eq!(amount, 0),
                Err(LedgerError::InsufficientFunds { available, requested }) => {
                    assert_eq!(available, expected[idx]);
                    assert!(requested > available);
                }
                Err(LedgerError::Underflow { .. }) => panic!("underflow surfaced"),
                Err(err) => panic!("unexpected withdraw failure: {err}"),
            }
        }

        let report = engine.audit().unwrap();
        assert!(report.balanced, "unbalanced books: {report:?}");
        assert_eq!(report.total_balance, expected.iter().sum::<u64>());
    }

    for (user, balance) in users.iter().zip(expected) {
        assert_eq!(engine.fetch_user_deposit(user).unwrap().balance, balance);
    }
}

/// Over-withdrawal by one unit at every reachable balance is always the
/// insufficient-funds error, never underflow.
#[test]
fn over_withdrawal_is_never_underflow() {
    let engine = setup();
    let user = onboard(&engine, 1, 64)[0];

    for step in 0..8u64 {
        let balance = engine.fetch_user_deposit(&user).unwrap().balance;
        let err = engine.withdraw(&user, balance + 1).unwrap_err();
        assert!(
            matches!(err, LedgerError::InsufficientFunds { .. }),
            "step {step}: {err:?}"
        );
        engine.deposit(&user, 8).unwrap();
    }

    let err = engine.withdraw(&user, u64::MAX).unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
    assert_books_balanced(&engine);
}
