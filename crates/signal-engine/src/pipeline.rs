//! The per-symbol tick body: fetch bars, score, construct a signal, validate
//! it against the rest of the book, and publish it. Handed to `Scheduler` as
//! its `pipeline` closure; one call per symbol per tick.
use chrono::Utc;
use ea_transport::EaServer;
use ensemble::EnsembleCombiner;
use feature_engineer::{engineer_features, FeatureStats, INDICATOR_LOOKBACK};
use market_data::MarketDataAdapter;
use multi_timeframe::{Bias, MultiTimeframeValidator};
use portfolio_ledger::{PendingSignal, PortfolioLedger};
use risk_manager::{CircuitBreakerState, RiskManager};
use rust_decimal::prelude::ToPrimitive;
use signal_constructor::ConstructionInputs;
use signal_core::{CoreError, CoreResult, MarketCondition, MarketSnapshot, Signal, Timeframe};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

/// Bars requested beyond the feature engineer's strict minimum, so the tail
/// indicator window (RSI/MACD/ADX) isn't starved on the very first call.
const SEQUENCE_LENGTH: usize = 10;
const HORIZON: usize = 5;
const HISTORY_BARS: usize = INDICATOR_LOOKBACK + SEQUENCE_LENGTH + HORIZON + 50;
const BIAS_TIMEFRAMES: [Timeframe; 3] = [Timeframe::M15, Timeframe::H4, Timeframe::D1];
const BIAS_BARS: usize = 60;
const PRIMARY_TIMEFRAME: Timeframe = Timeframe::H1;

pub struct PipelineContext {
    pub adapter: Arc<dyn MarketDataAdapter>,
    pub ensemble: Arc<EnsembleCombiner>,
    pub risk: Arc<RiskManager>,
    pub validator: Arc<MultiTimeframeValidator>,
    pub ledger: Arc<PortfolioLedger>,
    pub ea_server: Arc<EaServer>,
    pub active_signals: Arc<Mutex<Vec<Signal>>>,
    pub bulletin_board: Arc<bulletin_board::BulletinBoard>,
    pub magic_number: i64,
    pub min_confidence_threshold: f64,
    pub circuit_breaker: Arc<CircuitBreakerState>,
    pub max_consecutive_losses: u32,
    /// Z-score/min-max stats fit once on a training batch and reused at
    /// every inference call, per the feature engineer's fit-once contract.
    pub feature_stats: FeatureStats,
    pub max_bar_staleness: StdDuration,
}

/// Classifies the current regime from trend strength (ADX), direction
/// (MA20-MA50 sign) and relative volatility (ATR as a fraction of price).
/// Mirrors the threshold style `signal_constructor::sl_tp_multipliers`
/// switches on, just run in the opposite direction (bars -> condition).
fn classify_condition(bars: &[signal_core::Bar]) -> MarketCondition {
    use feature_engineer::indicators::{adx, atr, sma};
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let last_close = *closes.last().unwrap_or(&1.0);

    let atr_pct = atr(bars, 14).last().copied().unwrap_or(0.0) / last_close.max(1e-9);
    if atr_pct > 0.008 {
        return MarketCondition::HighVolatility;
    }

    let adx14 = adx(bars, 14).adx.last().copied().unwrap_or(0.0);
    let ma20 = sma(&closes, 20).last().copied().unwrap_or(last_close);
    let ma50 = sma(&closes, 50).last().copied().unwrap_or(last_close);

    if adx14 < 15.0 {
        MarketCondition::Sideways
    } else if ma20 > ma50 {
        MarketCondition::Uptrend
    } else if ma20 < ma50 {
        MarketCondition::Downtrend
    } else {
        MarketCondition::Mixed
    }
}

fn ma_spread(bars: &[signal_core::Bar]) -> f64 {
    use feature_engineer::indicators::sma;
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let ma20 = sma(&closes, 20).last().copied().unwrap_or(0.0);
    let ma50 = sma(&closes, 50).last().copied().unwrap_or(0.0);
    ma20 - ma50
}

async fn other_timeframe_biases(
    adapter: &Arc<dyn MarketDataAdapter>,
    symbol: &str,
) -> HashMap<String, Bias> {
    let mut biases = HashMap::new();
    for tf in BIAS_TIMEFRAMES {
        match adapter.historical(symbol, tf, BIAS_BARS, None).await {
            Ok(bars) if bars.len() >= 50 => {
                biases.insert(format!("{tf:?}"), Bias::from_spread(ma_spread(&bars)));
            }
            Ok(_) => tracing::debug!(symbol, ?tf, "not enough bars for bias"),
            Err(e) => tracing::warn!(symbol, ?tf, error = %e, "failed to fetch bias timeframe"),
        }
    }
    biases
}

pub async fn run_symbol(ctx: Arc<PipelineContext>, symbol: String) -> CoreResult<()> {
    let bars = ctx
        .adapter
        .historical(&symbol, PRIMARY_TIMEFRAME, HISTORY_BARS, None)
        .await?;

    if let Some(last) = bars.last() {
        let staleness = (Utc::now() - last.timestamp)
            .to_std()
            .unwrap_or(StdDuration::ZERO);
        if staleness > ctx.max_bar_staleness {
            return Err(CoreError::DataQuality(format!(
                "{symbol}: last bar is {staleness:?} old, exceeds max_bar_staleness {:?}",
                ctx.max_bar_staleness
            )));
        }
    }

    let (rows, _stats) = engineer_features(&bars, SEQUENCE_LENGTH, HORIZON, Some(&ctx.feature_stats));
    let row = rows.last().ok_or_else(|| {
        CoreError::NotReady(format!("{symbol}: fewer than {HISTORY_BARS} usable bars"))
    })?;

    let t = bars.len() - 1;
    let condition = classify_condition(&bars[..=t]);
    let quote = ctx.adapter.current(&symbol).await?;
    let market = MarketSnapshot {
        bid: quote.bid,
        ask: quote.ask,
        atr14: {
            use feature_engineer::indicators::atr;
            atr(&bars[..=t], 14).last().copied().unwrap_or(0.0)
        },
        condition,
    };

    let prediction = ctx.ensemble.predict(&symbol, PRIMARY_TIMEFRAME, row, market)?;

    let closes: Vec<f64> = bars[..=t].iter().map(|b| b.close).collect();
    let rsi = {
        use feature_engineer::indicators::rsi;
        rsi(&closes, 14).last().copied().unwrap_or(50.0)
    };
    let macd_hist = {
        use feature_engineer::indicators::macd;
        macd(&closes, 12, 26, 9).histogram.last().copied().unwrap_or(0.0)
    };

    let equity = ctx.ledger.equity().to_f64().unwrap_or(0.0);

    let breaker_check = ctx.circuit_breaker.evaluate(
        equity,
        ctx.risk.snapshot().max_daily_drawdown,
        ctx.max_consecutive_losses,
    );
    if breaker_check.halted() {
        return Err(CoreError::PolicyReject(format!(
            "circuit breaker halted: {:?}",
            breaker_check.breakers_triggered
        )));
    }

    let inputs = ConstructionInputs {
        prediction: &prediction,
        equity,
        min_confidence_threshold: ctx.min_confidence_threshold,
        ma20_minus_ma50: ma_spread(&bars[..=t]),
        rsi,
        macd_hist,
        fundamental_score: 0.5,
        open_position_count: ctx.ledger.open_positions().len(),
    };
    let candidate = signal_constructor::construct(&ctx.risk, &inputs)?;

    let candidate_bias = Bias::from_spread(inputs.ma20_minus_ma50);
    let other_biases = other_timeframe_biases(&ctx.adapter, &symbol).await;

    let mut active = ctx.active_signals.lock().unwrap();
    ctx.validator.validate(&candidate, candidate_bias, &other_biases, &active)?;
    let accepted = ctx.validator.apply_concurrency_cap(&active, vec![candidate]);
    let Some(signal) = accepted.into_iter().next() else {
        return Err(CoreError::PolicyReject(format!("{symbol}: no concurrency slot available")));
    };

    active.push(signal.clone());
    active.retain(|s| s.is_active(Utc::now()));
    let snapshot = active.clone();
    drop(active);

    ctx.ledger.register_pending_signal(
        &signal.id,
        PendingSignal {
            symbol: signal.symbol.clone(),
            side: signal.side,
            volume: signal.position_size_frac,
            stop: Some(signal.stop),
            target: Some(signal.target),
        },
    );
    ctx.risk.record_exposure(&signal.symbol, signal.position_size_frac);

    let delivered = ctx.ea_server.publish_signal(&signal, ctx.magic_number);
    tracing::info!(symbol = %signal.symbol, side = ?signal.side, delivered, "signal published");

    ctx.bulletin_board.update_signals(&snapshot).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_core::Bar;

    fn bar(close: f64, t: chrono::DateTime<Utc>) -> Bar {
        Bar { timestamp: t, open: close, high: close + 0.001, low: close - 0.001, close, volume: 100.0 }
    }

    #[test]
    fn classify_condition_flags_high_volatility() {
        let now = Utc::now();
        let mut bars = Vec::new();
        let mut price = 1.1;
        for i in 0..60 {
            price += if i % 2 == 0 { 0.02 } else { -0.018 };
            bars.push(bar(price, now + chrono::Duration::minutes(i)));
        }
        assert_eq!(classify_condition(&bars), MarketCondition::HighVolatility);
    }

    #[test]
    fn classify_condition_flags_uptrend_on_steady_rise() {
        let now = Utc::now();
        let bars: Vec<Bar> = (0..80)
            .map(|i| bar(1.1 + i as f64 * 0.0005, now + chrono::Duration::minutes(i)))
            .collect();
        assert_eq!(classify_condition(&bars), MarketCondition::Uptrend);
    }
}
