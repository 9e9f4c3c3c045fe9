//! Cross-checks a candidate signal against the same symbol at other
//! timeframes, enforces the dedupe window, and caps global concurrency.
//! Pure decision logic; the caller supplies bias-per-timeframe and the
//! currently-active signal set.
use chrono::{DateTime, Duration, Utc};
use signal_core::{CoreError, CoreResult, Signal, SignalStrength};
use std::collections::HashMap;

/// Directional bias at one timeframe: sign of the MA20-MA50 spread (or,
/// where available, the sign of the ensemble score at that timeframe).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bias {
    Bullish,
    Bearish,
    Flat,
}

impl Bias {
    pub fn from_spread(ma20_minus_ma50: f64) -> Self {
        if ma20_minus_ma50 > 0.0 {
            Bias::Bullish
        } else if ma20_minus_ma50 < 0.0 {
            Bias::Bearish
        } else {
            Bias::Flat
        }
    }
}

pub struct ValidatorConfig {
    pub min_confluent_timeframes: usize,
    pub dedupe_window: Duration,
    pub max_concurrent_signals: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_confluent_timeframes: 2,
            dedupe_window: Duration::hours(2),
            max_concurrent_signals: 20,
        }
    }
}

pub struct MultiTimeframeValidator {
    config: ValidatorConfig,
}

impl MultiTimeframeValidator {
    pub fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// At least `min_confluent_timeframes` of the supplied biases must match
    /// the candidate's own directional bias.
    pub fn confluence_holds(&self, candidate_bias: Bias, biases: &HashMap<String, Bias>) -> bool {
        if candidate_bias == Bias::Flat {
            return false;
        }
        let agreeing = biases.values().filter(|b| **b == candidate_bias).count();
        agreeing >= self.config.min_confluent_timeframes
    }

    /// Rejects if any active or recently-active signal for the same symbol
    /// was issued within `dedupe_window` of `candidate.created_at`.
    pub fn dedupe_check(&self, candidate: &Signal, recent: &[Signal]) -> CoreResult<()> {
        let conflict = recent.iter().any(|other| {
            other.symbol == candidate.symbol
                && other.id != candidate.id
                && (candidate.created_at - other.created_at).abs() < self.config.dedupe_window
        });
        if conflict {
            return Err(CoreError::PolicyReject(format!(
                "dedupe: {} already has a signal within {} min",
                candidate.symbol,
                self.config.dedupe_window.num_minutes()
            )));
        }
        Ok(())
    }

    /// Validates a single candidate against bias confluence and dedupe; does
    /// not apply the global cap, which operates over a batch.
    pub fn validate(
        &self,
        candidate: &Signal,
        candidate_bias: Bias,
        other_timeframe_biases: &HashMap<String, Bias>,
        recent_signals: &[Signal],
    ) -> CoreResult<()> {
        if !self.confluence_holds(candidate_bias, other_timeframe_biases) {
            return Err(CoreError::PolicyReject(format!(
                "insufficient timeframe confluence for {}",
                candidate.symbol
            )));
        }
        self.dedupe_check(candidate, recent_signals)
    }

    /// Enforces `max_concurrent_signals` system-wide: given the currently
    /// active signals plus a batch of new candidates, returns the subset of
    /// candidates to publish. Ties broken by newer `created_at`.
    pub fn apply_concurrency_cap(&self, active: &[Signal], candidates: Vec<Signal>) -> Vec<Signal> {
        let slots = self.config.max_concurrent_signals.saturating_sub(active.len());
        if slots == 0 {
            return Vec::new();
        }
        let mut ranked = candidates;
        ranked.sort_by(|a, b| {
            rank_key(b)
                .partial_cmp(&rank_key(a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.created_at.cmp(&a.created_at))
        });
        ranked.truncate(slots);
        ranked
    }
}

fn strength_rank(s: SignalStrength) -> u8 {
    match s {
        SignalStrength::Weak => 0,
        SignalStrength::Moderate => 1,
        SignalStrength::Strong => 2,
        SignalStrength::VeryStrong => 3,
    }
}

fn rank_key(signal: &Signal) -> f64 {
    strength_rank(signal.strength) as f64 * 10.0 + signal.confidence
}

fn now_signal(symbol: &str, created_at: DateTime<Utc>, strength: SignalStrength, confidence: f64) -> Signal {
    Signal {
        id: format!("{symbol}-{}", created_at.timestamp_nanos_opt().unwrap_or_default()),
        created_at,
        last_update: created_at,
        symbol: symbol.to_string(),
        side: signal_core::Side::Buy,
        strength,
        entry: 1.1,
        stop: 1.09,
        target: 1.13,
        confidence,
        rr_ratio: 2.0,
        timeframe: signal_core::Timeframe::H1,
        expiry: created_at + Duration::hours(4),
        market_condition: signal_core::MarketCondition::Uptrend,
        technical_confluence: 2,
        fundamental_score: 0.5,
        position_size_frac: 0.01,
        max_risk_frac: 0.01,
        status: signal_core::SignalStatus::Active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confluence_requires_minimum_agreeing_timeframes() {
        let validator = MultiTimeframeValidator::new(ValidatorConfig {
            min_confluent_timeframes: 2,
            ..Default::default()
        });
        let mut biases = HashMap::new();
        biases.insert("M15".to_string(), Bias::Bullish);
        biases.insert("H4".to_string(), Bias::Bearish);
        assert!(!validator.confluence_holds(Bias::Bullish, &biases));

        biases.insert("D1".to_string(), Bias::Bullish);
        assert!(validator.confluence_holds(Bias::Bullish, &biases));
    }

    #[test]
    fn dedupe_rejects_recent_duplicate() {
        let validator = MultiTimeframeValidator::new(ValidatorConfig::default());
        let t0 = Utc::now();
        let first = now_signal("EURUSD", t0, SignalStrength::Strong, 0.8);
        let second = now_signal("EURUSD", t0 + Duration::minutes(30), SignalStrength::Strong, 0.8);
        assert!(validator.dedupe_check(&second, &[first]).is_err());
    }

    #[test]
    fn dedupe_allows_after_window_elapses() {
        let validator = MultiTimeframeValidator::new(ValidatorConfig::default());
        let t0 = Utc::now();
        let first = now_signal("EURUSD", t0, SignalStrength::Strong, 0.8);
        let second = now_signal("EURUSD", t0 + Duration::hours(3), SignalStrength::Strong, 0.8);
        assert!(validator.dedupe_check(&second, &[first]).is_ok());
    }

    #[test]
    fn cap_keeps_strongest_and_breaks_ties_by_recency() {
        let validator = MultiTimeframeValidator::new(ValidatorConfig {
            max_concurrent_signals: 3,
            ..Default::default()
        });
        let t0 = Utc::now();
        let candidates = vec![
            now_signal("A", t0, SignalStrength::VeryStrong, 0.9),
            now_signal("B", t0 + Duration::seconds(1), SignalStrength::VeryStrong, 0.9),
            now_signal("C", t0 + Duration::seconds(2), SignalStrength::Strong, 0.8),
            now_signal("D", t0 + Duration::seconds(3), SignalStrength::Moderate, 0.7),
            now_signal("E", t0 + Duration::seconds(4), SignalStrength::Weak, 0.6),
        ];
        let kept = validator.apply_concurrency_cap(&[], candidates);
        assert_eq!(kept.len(), 3);
        let symbols: Vec<_> = kept.iter().map(|s| s.symbol.clone()).collect();
        assert_eq!(symbols, vec!["B", "A", "C"]);
    }

    #[test]
    fn cap_returns_empty_when_already_full() {
        let validator = MultiTimeframeValidator::new(ValidatorConfig {
            max_concurrent_signals: 1,
            ..Default::default()
        });
        let active = vec![now_signal("X", Utc::now(), SignalStrength::Weak, 0.5)];
        let candidates = vec![now_signal("Y", Utc::now(), SignalStrength::VeryStrong, 0.95)];
        let kept = validator.apply_concurrency_cap(&active, candidates);
        assert!(kept.is_empty());
    }
}
