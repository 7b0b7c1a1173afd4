mod common;

use common::{config, engine_with, fx_signal, outcome, FX};
use decision_core::{Clock, Direction};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Barrier;
use std::time::{Duration, Instant};

const PRODUCERS: usize = 8;
const SIGNALS_PER_PRODUCER: usize = 30;

#[test]
fn producers_and_closer_never_deadlock() {
    let mut config = config();
    config.locks.timeout = Duration::from_millis(200);
    let lock_timeout = config.locks.timeout;
    let (engine, clock) = engine_with(config);
    let done = AtomicBool::new(false);

    let started = Instant::now();
    std::thread::scope(|scope| {
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let engine = &engine;
                scope.spawn(move || {
                    for i in 0..SIGNALS_PER_PRODUCER {
                        let symbol = FX[(p + i) % 2];
                        let mut signal =
                            fx_signal(&format!("producer-{p}"), symbol, 0.9, (p * 1000 + i) as i64);
                        if i % 3 == 0 {
                            signal.direction = Direction::Short;
                            signal.stop = dec!(1.1040);
                            signal.target = None;
                        }
                        let result = engine.evaluate_batch(vec![signal]);
                        assert_eq!(result.len(), 1);
                    }
                })
            })
            .collect();

        // Closes whatever is open, walking the arbiter -> exposure chain
        // while producers walk ledger -> arbiter -> exposure.
        let closer = {
            let engine = &engine;
            let clock = &clock;
            let done = &done;
            scope.spawn(move || {
                while !done.load(Ordering::Acquire) {
                    if let Ok(claims) = engine.arbiter().claims() {
                        for claim in claims.iter() {
                            let symbol = match &claim.key {
                                decision_engine::ConflictKey::Slot { symbol, .. } => symbol.clone(),
                                decision_engine::ConflictKey::Resource { name } => name.clone(),
                            };
                            let _ = engine.on_trade_closed(&outcome(
                                claim.holder.clone(),
                                &claim.strategy_id,
                                &symbol,
                                dec!(0.1),
                                clock.now(),
                            ));
                        }
                    }
                    let _ = engine.snapshot();
                    std::thread::yield_now();
                }
            })
        };

        for producer in producers {
            producer.join().unwrap();
        }
        done.store(true, Ordering::Release);
        closer.join().unwrap();
    });
    let elapsed = started.elapsed();

    let total = PRODUCERS * SIGNALS_PER_PRODUCER;
    assert_eq!(engine.ledger().len().unwrap(), total);
    assert!(
        elapsed < lock_timeout * u32::try_from(total).unwrap(),
        "took {elapsed:?}"
    );

    let seqs: Vec<u64> = engine.ledger().history().unwrap().iter().map(|e| e.seq).collect();
    assert_eq!(seqs, (1..=total as u64).collect::<Vec<_>>());

    let exposure = engine.snapshot().unwrap().exposure;
    let effective_symbol = dec!(2.0) * dec!(0.9);
    for side in exposure.symbols.values() {
        assert!(side.total() <= effective_symbol);
    }
    assert!(exposure.portfolio >= Decimal::ZERO);
}

#[test]
fn strategy_limit_holds_across_symbols_under_contention() {
    let mut config = config();
    config.exposure.max_strategy_risk_pct = dec!(2.0);
    config.exposure.max_symbol_risk_pct = dec!(5.0);
    let effective = dec!(2.0) * dec!(0.9);
    let (engine, _) = engine_with(config);

    std::thread::scope(|scope| {
        for (t, symbol) in FX.iter().enumerate() {
            let engine = &engine;
            scope.spawn(move || {
                for i in 0..10 {
                    let mut signal = fx_signal("shared", symbol, 0.9, (t * 100 + i) as i64);
                    if i % 2 == 1 {
                        signal.direction = Direction::Short;
                        signal.stop = dec!(1.1040);
                        signal.target = None;
                    }
                    engine.evaluate_batch(vec![signal]);
                }
            });
        }
    });

    let exposure = engine.snapshot().unwrap().exposure;
    assert!(exposure.strategies["shared"] <= effective);
    assert!(exposure.strategies["shared"] > Decimal::ZERO);
}

#[test]
fn best_concurrent_signal_wins_whoever_submits_first() {
    for low_first in [true, false] {
        let mut config = config();
        config.arbitration.window = Duration::from_millis(250);
        let (engine, _) = engine_with(config);
        let low = fx_signal("breakout", "EURUSD", 0.65, 1);
        let high = fx_signal("momentum", "EURUSD", 0.95, 2);
        let high_uid = high.decision_uid();
        let (first, second) = if low_first { (low, high) } else { (high, low) };
        let barrier = Barrier::new(2);

        let (a, b) = std::thread::scope(|scope| {
            let early = scope.spawn(|| {
                barrier.wait();
                engine.evaluate_batch(vec![first])
            });
            let late = scope.spawn(|| {
                barrier.wait();
                std::thread::sleep(Duration::from_millis(20));
                engine.evaluate_batch(vec![second])
            });
            (early.join().unwrap(), late.join().unwrap())
        });
        let (low_eval, high_eval) = if low_first { (&a[0], &b[0]) } else { (&b[0], &a[0]) };

        assert!(high_eval.decision.is_approved(), "low_first={low_first}: {:?}", high_eval.decision);
        assert_eq!(
            low_eval.decision.reject_reason(),
            Some(&decision_core::RejectReason::ConflictLost {
                winner: high_uid.clone()
            }),
            "low_first={low_first}"
        );
        assert!(!low_eval.replayed && !high_eval.replayed);
        assert_eq!(engine.ledger().len().unwrap(), 2);
        assert_eq!(engine.arbiter().claims().unwrap()[0].holder, high_uid);
    }
}
