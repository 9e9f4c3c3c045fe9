//! Pure eviction policy, separated from the writer so it can be tested
//! without touching the filesystem.
use chrono::{DateTime, Duration, Utc};
use signal_core::Signal;

pub struct EvictionConfig {
    pub max_signal_age: Duration,
    pub max_signals: usize,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            max_signal_age: Duration::hours(24),
            max_signals: 200,
        }
    }
}

/// Splits the incoming set into what stays Active and what has expired
/// this round, applying the age cutoff and the concurrency cap in order.
pub fn partition(signals: &[Signal], now: DateTime<Utc>, config: &EvictionConfig) -> (Vec<Signal>, Vec<Signal>) {
    let mut active = Vec::new();
    let mut expired = Vec::new();

    for signal in signals {
        let mut signal = signal.clone();
        let too_old = now - signal.created_at > config.max_signal_age;
        let time_expired = signal.expiry < now;
        if time_expired {
            signal.status = signal_core::SignalStatus::Expired;
        }
        if too_old || time_expired {
            expired.push(signal);
        } else {
            active.push(signal);
        }
    }

    active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    if active.len() > config.max_signals {
        let overflow = active.split_off(config.max_signals);
        expired.extend(overflow);
    }

    (active, expired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use signal_core::{MarketCondition, Side, SignalStatus, SignalStrength, Timeframe};

    fn signal(symbol: &str, created_at: DateTime<Utc>, expiry: DateTime<Utc>) -> Signal {
        Signal {
            id: format!("{symbol}-{}", created_at.timestamp_nanos_opt().unwrap_or_default()),
            created_at,
            last_update: created_at,
            symbol: symbol.to_string(),
            side: Side::Buy,
            strength: SignalStrength::Strong,
            entry: 1.1,
            stop: 1.09,
            target: 1.13,
            confidence: 0.8,
            rr_ratio: 2.0,
            timeframe: Timeframe::H1,
            expiry,
            market_condition: MarketCondition::Uptrend,
            technical_confluence: 2,
            fundamental_score: 0.5,
            position_size_frac: 0.01,
            max_risk_frac: 0.01,
            status: SignalStatus::Active,
        }
    }

    #[test]
    fn past_expiry_moves_to_expired() {
        let now = Utc::now();
        let s = signal("EURUSD", now - Duration::hours(1), now - Duration::minutes(1));
        let (active, expired) = partition(&[s], now, &EvictionConfig::default());
        assert!(active.is_empty());
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].status, SignalStatus::Expired);
    }

    #[test]
    fn too_old_is_evicted_even_if_not_yet_expired() {
        let now = Utc::now();
        let s = signal("EURUSD", now - Duration::hours(25), now + Duration::hours(1));
        let (active, expired) = partition(&[s], now, &EvictionConfig::default());
        assert!(active.is_empty());
        assert_eq!(expired.len(), 1);
    }

    #[test]
    fn cap_keeps_newest_by_created_at() {
        let now = Utc::now();
        let signals: Vec<Signal> = (0..5)
            .map(|i| signal(&format!("SYM{i}"), now - Duration::minutes(i), now + Duration::hours(1)))
            .collect();
        let config = EvictionConfig { max_signal_age: Duration::hours(24), max_signals: 3 };
        let (active, expired) = partition(&signals, now, &config);
        assert_eq!(active.len(), 3);
        assert_eq!(expired.len(), 2);
        assert_eq!(active[0].symbol, "SYM0");
    }
}
