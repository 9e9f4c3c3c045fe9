//! Maps a [`Prediction`] to a fully specified [`Signal`] under risk policy.
//! Pure given the prediction, current market snapshot, risk parameters and
//! account-equity estimate; side effects (publish, ledger-upsert) happen
//! downstream of this component.
use chrono::{Duration, Utc};
use risk_manager::RiskManager;
use signal_core::{
    Class, CoreError, CoreResult, MarketCondition, MarketSnapshot, Prediction, Side, Signal,
    SignalStatus, SignalStrength,
};

const MIN_RR_RATIO: f64 = 1.5;
const DEFAULT_EXPIRY_HOURS: i64 = 4;

fn sl_tp_multipliers(condition: MarketCondition) -> (f64, f64) {
    match condition {
        MarketCondition::HighVolatility => (2.5, 4.0),
        MarketCondition::Uptrend | MarketCondition::Downtrend => (2.0, 3.5),
        MarketCondition::Sideways | MarketCondition::Mixed => (1.5, 3.0),
    }
}

/// Count of independent indicators agreeing with `side`, informational
/// only — never gates signal construction.
pub fn technical_confluence(side: Side, ma20_minus_ma50: f64, rsi: f64, macd_hist: f64) -> u32 {
    let mut count = 0;
    let ma_aligned = match side {
        Side::Buy => ma20_minus_ma50 > 0.0,
        Side::Sell => ma20_minus_ma50 < 0.0,
    };
    if ma_aligned {
        count += 1;
    }
    let rsi_ok = match side {
        Side::Buy => rsi < 70.0,
        Side::Sell => rsi > 30.0,
    };
    if rsi_ok {
        count += 1;
    }
    let macd_aligned = match side {
        Side::Buy => macd_hist > 0.0,
        Side::Sell => macd_hist < 0.0,
    };
    if macd_aligned {
        count += 1;
    }
    count
}

pub struct ConstructionInputs<'a> {
    pub prediction: &'a Prediction,
    pub equity: f64,
    pub min_confidence_threshold: f64,
    pub ma20_minus_ma50: f64,
    pub rsi: f64,
    pub macd_hist: f64,
    pub fundamental_score: f64,
    /// Currently open positions across the whole book, for the
    /// `max_open_positions` cap.
    pub open_position_count: usize,
}

fn round_to_lot_step(size_frac: f64, lot_step: f64) -> f64 {
    if lot_step <= 0.0 {
        return size_frac;
    }
    (size_frac / lot_step).floor() * lot_step
}

/// Turns a prediction into a Signal under risk policy, or a `PolicyReject`
/// when the prediction doesn't clear confidence, RR, allowlist, open-position,
/// correlation, or exposure gates.
pub fn construct(risk: &RiskManager, inputs: &ConstructionInputs) -> CoreResult<Signal> {
    let prediction = inputs.prediction;
    let confidence = prediction.confidence();
    if confidence < inputs.min_confidence_threshold {
        return Err(CoreError::PolicyReject(format!(
            "confidence {confidence:.3} below threshold {:.3}",
            inputs.min_confidence_threshold
        )));
    }

    let params = risk.snapshot();
    if !params.instruments_enabled.is_empty() && !params.instruments_enabled.iter().any(|s| s == &prediction.symbol) {
        return Err(CoreError::PolicyReject(format!(
            "{} is not in the enabled instrument list",
            prediction.symbol
        )));
    }
    if inputs.open_position_count >= params.max_open_positions as usize {
        return Err(CoreError::PolicyReject(format!(
            "open position count {} at or above max_open_positions {}",
            inputs.open_position_count, params.max_open_positions
        )));
    }

    let side = match prediction.argmax() {
        Class::Up => Side::Buy,
        Class::Down => Side::Sell,
        Class::Flat => {
            return Err(CoreError::PolicyReject("flat prediction, no signal".into()));
        }
    };

    let market = &prediction.market;
    let entry = match side {
        Side::Buy => market.ask,
        Side::Sell => market.bid,
    };
    let risk_unit = market.atr14.max(1e-9);
    let (sl_mult, tp_mult) = sl_tp_multipliers(market.condition);

    let (stop, target) = match side {
        Side::Buy => (entry - sl_mult * risk_unit, entry + tp_mult * risk_unit),
        Side::Sell => (entry + sl_mult * risk_unit, entry - tp_mult * risk_unit),
    };

    let rr_ratio = (target - entry).abs() / (entry - stop).abs().max(1e-12);
    if rr_ratio < MIN_RR_RATIO {
        return Err(CoreError::PolicyReject(format!(
            "rr_ratio {rr_ratio:.3} below minimum {MIN_RR_RATIO}"
        )));
    }

    let concentration = risk.exposure_concentration(&prediction.symbol);
    if concentration >= params.max_correlation {
        return Err(CoreError::PolicyReject(format!(
            "{} shares a currency at {concentration:.3} exposure concentration, at or above max_correlation {:.3}",
            prediction.symbol, params.max_correlation
        )));
    }

    let mut sizing = risk.calculate_position_size(&prediction.symbol, entry, stop, inputs.equity)?;
    sizing.size_frac = round_to_lot_step(sizing.size_frac, params.lot_step);
    if sizing.size_frac <= 0.0 {
        return Err(CoreError::PolicyReject(format!(
            "{} size rounds to zero at lot_step {}",
            prediction.symbol, params.lot_step
        )));
    }

    let strength_score = 0.7 * confidence + 0.3 * (rr_ratio / 3.0).min(1.0);
    let strength = SignalStrength::from_score(strength_score);

    let confluence = technical_confluence(side, inputs.ma20_minus_ma50, inputs.rsi, inputs.macd_hist);

    let now = Utc::now();
    let signal = Signal {
        id: uuid::Uuid::new_v4().to_string(),
        created_at: now,
        last_update: now,
        symbol: prediction.symbol.clone(),
        side,
        strength,
        entry,
        stop,
        target,
        confidence,
        rr_ratio,
        timeframe: prediction.timeframe,
        expiry: now + Duration::hours(DEFAULT_EXPIRY_HOURS),
        market_condition: market.condition,
        technical_confluence: confluence,
        fundamental_score: inputs.fundamental_score,
        position_size_frac: sizing.size_frac,
        max_risk_frac: params.max_risk_per_trade,
        status: SignalStatus::Active,
    };

    if !signal.invariants_hold() {
        return Err(CoreError::Fatal(format!(
            "constructed signal violates invariants: {signal:?}"
        )));
    }

    Ok(signal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_core::RiskParameters;

    fn risk() -> RiskManager {
        RiskManager::new(RiskParameters {
            max_risk_per_trade: 0.01,
            max_daily_drawdown: 0.05,
            max_correlation: 0.7,
            max_exposure_per_instrument: 0.2,
            max_exposure_per_currency: 0.35,
            max_volume_per_trade: 1000.0,
            max_open_positions: 10,
            instruments_enabled: vec!["EURUSD".into()],
            lot_step: 0.01,
        })
    }

    fn prediction(probs: [f64; 3], condition: MarketCondition) -> Prediction {
        Prediction {
            symbol: "EURUSD".into(),
            timeframe: signal_core::Timeframe::H1,
            probs,
            sub_scores: vec![],
            market: MarketSnapshot {
                bid: 1.0998,
                ask: 1.1000,
                atr14: 0.0010,
                condition,
            },
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn buy_signal_has_valid_invariants() {
        let pred = prediction([0.1, 0.1, 0.8], MarketCondition::Uptrend);
        let inputs = ConstructionInputs {
            prediction: &pred,
            equity: 10_000.0,
            min_confidence_threshold: 0.6,
            ma20_minus_ma50: 0.001,
            rsi: 55.0,
            macd_hist: 0.0002,
            fundamental_score: 0.5,
            open_position_count: 0,
        };
        let signal = construct(&risk(), &inputs).unwrap();
        assert_eq!(signal.side, Side::Buy);
        assert!(signal.invariants_hold());
        assert!(signal.rr_ratio >= MIN_RR_RATIO);
    }

    #[test]
    fn low_confidence_is_policy_reject() {
        let pred = prediction([0.3, 0.35, 0.35], MarketCondition::Sideways);
        let inputs = ConstructionInputs {
            prediction: &pred,
            equity: 10_000.0,
            min_confidence_threshold: 0.6,
            ma20_minus_ma50: 0.0,
            rsi: 50.0,
            macd_hist: 0.0,
            fundamental_score: 0.5,
            open_position_count: 0,
        };
        let err = construct(&risk(), &inputs).unwrap_err();
        assert!(err.is_policy_reject());
    }

    #[test]
    fn flat_argmax_yields_no_signal() {
        let pred = prediction([0.2, 0.7, 0.1], MarketCondition::Sideways);
        let inputs = ConstructionInputs {
            prediction: &pred,
            equity: 10_000.0,
            min_confidence_threshold: 0.5,
            ma20_minus_ma50: 0.0,
            rsi: 50.0,
            macd_hist: 0.0,
            fundamental_score: 0.5,
            open_position_count: 0,
        };
        let err = construct(&risk(), &inputs).unwrap_err();
        assert!(err.is_policy_reject());
    }

    #[test]
    fn sell_signal_levels_on_correct_side() {
        let pred = prediction([0.8, 0.1, 0.1], MarketCondition::HighVolatility);
        let inputs = ConstructionInputs {
            prediction: &pred,
            equity: 10_000.0,
            min_confidence_threshold: 0.5,
            ma20_minus_ma50: -0.001,
            rsi: 25.0,
            macd_hist: -0.0003,
            fundamental_score: 0.4,
            open_position_count: 0,
        };
        let signal = construct(&risk(), &inputs).unwrap();
        assert_eq!(signal.side, Side::Sell);
        assert!(signal.target < signal.entry && signal.entry < signal.stop);
    }

    #[test]
    fn symbol_outside_allowlist_is_policy_reject() {
        let pred = {
            let mut p = prediction([0.1, 0.1, 0.8], MarketCondition::Uptrend);
            p.symbol = "USDJPY".into();
            p
        };
        let inputs = ConstructionInputs {
            prediction: &pred,
            equity: 10_000.0,
            min_confidence_threshold: 0.6,
            ma20_minus_ma50: 0.001,
            rsi: 55.0,
            macd_hist: 0.0002,
            fundamental_score: 0.5,
            open_position_count: 0,
        };
        let err = construct(&risk(), &inputs).unwrap_err();
        assert!(err.is_policy_reject());
    }

    #[test]
    fn max_open_positions_rejects_when_book_is_full() {
        let pred = prediction([0.1, 0.1, 0.8], MarketCondition::Uptrend);
        let inputs = ConstructionInputs {
            prediction: &pred,
            equity: 10_000.0,
            min_confidence_threshold: 0.6,
            ma20_minus_ma50: 0.001,
            rsi: 55.0,
            macd_hist: 0.0002,
            fundamental_score: 0.5,
            open_position_count: 10,
        };
        let err = construct(&risk(), &inputs).unwrap_err();
        assert!(err.is_policy_reject());
    }

    #[test]
    fn concentrated_currency_exposure_is_policy_reject() {
        let rm = risk();
        rm.record_exposure("EURUSD", 0.34);
        let pred = prediction([0.1, 0.1, 0.8], MarketCondition::Uptrend);
        let inputs = ConstructionInputs {
            prediction: &pred,
            equity: 10_000.0,
            min_confidence_threshold: 0.6,
            ma20_minus_ma50: 0.001,
            rsi: 55.0,
            macd_hist: 0.0002,
            fundamental_score: 0.5,
            open_position_count: 0,
        };
        let err = construct(&rm, &inputs).unwrap_err();
        assert!(err.is_policy_reject());
    }
}
