#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use decision_core::{
    AssetClass, DecisionUid, Direction, EngineConfig, InstrumentSpec, ManualClock, NoFeatures,
    QualityInputs, Signal, SignalTags, TradeOutcome,
};
use decision_engine::DecisionEngine;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub const FX: [&str; 5] = ["EURUSD", "GBPUSD", "USDJPY", "AUDUSD", "NZDUSD"];

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

/// 100k account, five FX majors plus one index, correlation cap wide open.
pub fn config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.account.equity = dec!(100000);
    config.exposure.max_correlated_risk_pct = dec!(50);
    for symbol in FX {
        config.instruments.insert(
            symbol.to_string(),
            InstrumentSpec::new(AssetClass::Fx, dec!(100000), dec!(0.0040)),
        );
    }
    config.instruments.insert(
        "ES".to_string(),
        InstrumentSpec::new(AssetClass::Index, dec!(50), dec!(10))
            .with_lots(Decimal::ONE, Decimal::ONE, dec!(100)),
    );
    config
}

pub fn engine_with(config: EngineConfig) -> (Arc<DecisionEngine>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start()));
    let engine = DecisionEngine::new(config, Arc::new(NoFeatures), clock.clone()).unwrap();
    (Arc::new(engine), clock)
}

/// FX long with a 40-pip stop and every quality input set to `quality`.
pub fn fx_signal(strategy: &str, symbol: &str, quality: f64, secs: i64) -> Signal {
    Signal {
        symbol: symbol.to_string(),
        direction: Direction::Long,
        entry: dec!(1.1000),
        stop: dec!(1.0960),
        target: Some(dec!(1.1100)),
        strategy_id: strategy.to_string(),
        inputs: QualityInputs {
            signal_strength: Some(quality),
            structural_alignment: Some(quality),
            order_flow_quality: Some(quality),
            regime_fit: Some(quality),
            historical_performance: Some(quality),
        },
        tags: SignalTags::default(),
        timestamp: start() + Duration::seconds(secs),
    }
}

pub fn outcome(uid: DecisionUid, strategy: &str, symbol: &str, pnl: Decimal, at: DateTime<Utc>) -> TradeOutcome {
    TradeOutcome {
        decision_uid: uid,
        strategy_id: strategy.to_string(),
        symbol: symbol.to_string(),
        pnl_pct: pnl,
        closed_at: at,
    }
}
