use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Timeframe of a bar series or scheduler pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn to_minutes(&self) -> i64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        }
    }
}

/// One OHLCV observation on one timeframe. Immutable once created by the
/// market-data adapter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Structural validity per spec §3: `high >= max(open, close) >=
    /// min(open, close) >= low`, `volume >= 0`, all fields finite.
    pub fn is_valid(&self) -> bool {
        if ![self.open, self.high, self.low, self.close, self.volume]
            .iter()
            .all(|v| v.is_finite())
        {
            return false;
        }
        let hi = self.open.max(self.close);
        let lo = self.open.min(self.close);
        self.high >= hi && hi >= lo && lo >= self.low && self.volume >= 0.0
    }
}

/// Three-class discrete label derived from forward return over horizon H.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    Down,
    Flat,
    Up,
}

/// Three aligned artifacts produced by the feature engineer for one instant,
/// plus the training label when available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRow {
    pub timestamp: DateTime<Utc>,
    /// Flat z-scored indicator vector (price ratios, MAs, oscillators,
    /// pattern slots).
    pub indicator_vector: Vec<f64>,
    /// Last N bars of min-max normalised OHLCV, row-major `(N, 5)`.
    pub sequence: Vec<[f64; 5]>,
    /// Multichannel window: `{close, rsi, macd_line, macd_hist}` per bar,
    /// min-maxed against this window only.
    pub indicator_window: Vec<[f64; 4]>,
    pub label: Option<Label>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Class {
    Down,
    Flat,
    Up,
}

impl Class {
    pub fn from_probs(probs: &[f64; 3]) -> Self {
        let (idx, _) = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap();
        match idx {
            0 => Class::Down,
            1 => Class::Flat,
            _ => Class::Up,
        }
    }
}

/// Output of the ensemble combiner: the final class-probability distribution
/// plus the sub-scores that fed the meta-model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub probs: [f64; 3], // [DOWN, FLAT, UP], sums to 1
    pub sub_scores: Vec<[f64; 3]>,
    pub market: MarketSnapshot,
    pub generated_at: DateTime<Utc>,
}

impl Prediction {
    pub fn argmax(&self) -> Class {
        Class::from_probs(&self.probs)
    }

    pub fn confidence(&self) -> f64 {
        self.probs.iter().cloned().fold(f64::MIN, f64::max)
    }
}

/// Market state snapshot consulted by the signal constructor and validator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub bid: f64,
    pub ask: f64,
    pub atr14: f64,
    pub condition: MarketCondition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketCondition {
    Uptrend,
    Downtrend,
    Sideways,
    HighVolatility,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStrength {
    Weak,
    Moderate,
    Strong,
    VeryStrong,
}

impl SignalStrength {
    /// `s = 0.7*confidence + 0.3*min(rr_ratio/3, 1)` per spec §4.4.
    pub fn from_score(s: f64) -> Self {
        if s >= 0.9 {
            SignalStrength::VeryStrong
        } else if s >= 0.8 {
            SignalStrength::Strong
        } else if s >= 0.7 {
            SignalStrength::Moderate
        } else {
            SignalStrength::Weak
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    Active,
    Expired,
}

/// A fully specified trade recommendation. Created by the signal
/// constructor; mutated only to change `status` or `last_update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub symbol: String,
    pub side: Side,
    pub strength: SignalStrength,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    pub confidence: f64,
    pub rr_ratio: f64,
    pub timeframe: Timeframe,
    pub expiry: DateTime<Utc>,
    pub market_condition: MarketCondition,
    pub technical_confluence: u32,
    pub fundamental_score: f64,
    pub position_size_frac: f64,
    pub max_risk_frac: f64,
    pub status: SignalStatus,
}

impl Signal {
    /// §3 invariant: for BUY, `stop < entry < target`; for SELL, `target <
    /// entry < stop`. Always `rr_ratio >= 1.5`.
    pub fn invariants_hold(&self) -> bool {
        let levels_ok = match self.side {
            Side::Buy => self.stop < self.entry && self.entry < self.target,
            Side::Sell => self.target < self.entry && self.entry < self.stop,
        };
        levels_ok && self.rr_ratio >= 1.5
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == SignalStatus::Active && self.expiry > now
    }
}

/// An open position, exclusively owned and mutated by the portfolio ledger
/// from inbound EA account-status/trade-result messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticket: i64,
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub open_price: f64,
    pub current_price: f64,
    pub stop: Option<f64>,
    pub target: Option<f64>,
    pub open_time: DateTime<Utc>,
    pub commission: Decimal,
    pub swap: Decimal,
}

impl Position {
    pub fn unrealized_pnl(&self) -> f64 {
        let diff = match self.side {
            Side::Buy => self.current_price - self.open_price,
            Side::Sell => self.open_price - self.current_price,
        };
        diff * self.volume
    }
}

/// Same shape as `Position` plus close fields. Appended, never modified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub ticket: i64,
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub open_price: f64,
    pub close_price: f64,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub realized_pnl: Decimal,
    pub duration_secs: i64,
}

/// Aggregate derived from the ledger at query time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    pub balance: Decimal,
    pub equity: Decimal,
    pub margin: Decimal,
    pub free_margin: Decimal,
    pub margin_level: Decimal,
    pub open_position_count: usize,
    pub day_pnl: Decimal,
    pub week_pnl: Decimal,
    pub month_pnl: Decimal,
    pub max_drawdown: Decimal,
    pub win_rate: f64,
    pub profit_factor: f64,
}

/// Operator-controlled limits, loaded at startup and hot-reloadable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskParameters {
    pub max_risk_per_trade: f64,
    pub max_daily_drawdown: f64,
    pub max_correlation: f64,
    pub max_exposure_per_instrument: f64,
    pub max_exposure_per_currency: f64,
    pub max_volume_per_trade: f64,
    pub max_open_positions: u32,
    pub instruments_enabled: Vec<String>,
    /// Broker's minimum volume increment; sizes are rounded down to a
    /// multiple of this before publication (spec §4.4).
    pub lot_step: f64,
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self {
            max_risk_per_trade: 0.01,
            max_daily_drawdown: 0.05,
            max_correlation: 0.7,
            max_exposure_per_instrument: 0.2,
            max_exposure_per_currency: 0.35,
            max_volume_per_trade: 0.1,
            max_open_positions: 10,
            instruments_enabled: Vec::new(),
            lot_step: 0.01,
        }
    }
}

/// EA wire message tag, per spec §3/§6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EaMessageType {
    Signal,
    Command,
    TradeResult,
    AccountStatus,
    Heartbeat,
    Error,
    EaInfo,
}

/// Tagged record exchanged over the EA TCP transport. `data` is left as
/// `serde_json::Value` at this layer; `ea-transport` narrows it per `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EaMessage {
    #[serde(rename = "type")]
    pub message_type: EaMessageType,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// `SIGNAL` payload sent to an EA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalPayload {
    pub signal_id: String,
    pub instrument: String,
    pub action: EaAction,
    pub volume: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<f64>,
    pub magic_number: i64,
    pub comment: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EaAction {
    Buy,
    Sell,
    Close,
    CloseAll,
}

/// `TRADE_RESULT` payload received from an EA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeResultPayload {
    pub signal_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<i64>,
    pub success: bool,
    pub error_code: i32,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_price: Option<f64>,
    pub execution_time: DateTime<Utc>,
    pub slippage: f64,
}

/// `ACCOUNT_STATUS` payload received from an EA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountStatusPayload {
    pub balance: f64,
    pub equity: f64,
    pub margin: f64,
    pub free_margin: f64,
    pub margin_level: f64,
    pub profit: f64,
    pub open_positions: i32,
}

/// `EA_INFO` payload sent on connect (see SPEC_FULL.md §B).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EaInfoPayload {
    pub name: String,
    pub version: String,
    pub account: String,
    pub broker: String,
}

/// Opaque feature map passed to a scoring model's `predict`/`train`; keyed
/// by feature name so meta-model concatenation stays order-independent.
pub type FeatureMap = HashMap<String, f64>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_bar() -> Bar {
        Bar {
            timestamp: Utc::now(),
            open: 1.1000,
            high: 1.1020,
            low: 1.0990,
            close: 1.1010,
            volume: 100.0,
        }
    }

    #[test]
    fn bar_valid_ohlc_passes() {
        assert!(sample_bar().is_valid());
    }

    #[test]
    fn bar_inverted_high_low_fails() {
        let mut b = sample_bar();
        b.high = 1.0980;
        assert!(!b.is_valid());
    }

    #[test]
    fn buy_signal_invariants() {
        let now = Utc::now();
        let s = Signal {
            id: "s1".into(),
            created_at: now,
            last_update: now,
            symbol: "EURUSD".into(),
            side: Side::Buy,
            strength: SignalStrength::Strong,
            entry: 1.1000,
            stop: 1.0950,
            target: 1.1100,
            confidence: 0.8,
            rr_ratio: 2.0,
            timeframe: Timeframe::H1,
            expiry: now + Duration::hours(4),
            market_condition: MarketCondition::Uptrend,
            technical_confluence: 2,
            fundamental_score: 0.5,
            position_size_frac: 0.01,
            max_risk_frac: 0.01,
            status: SignalStatus::Active,
        };
        assert!(s.invariants_hold());
        assert!(s.is_active(now));
    }

    #[test]
    fn sell_signal_with_bad_rr_fails_invariant() {
        let now = Utc::now();
        let s = Signal {
            id: "s2".into(),
            created_at: now,
            last_update: now,
            symbol: "EURUSD".into(),
            side: Side::Sell,
            strength: SignalStrength::Weak,
            entry: 1.1000,
            stop: 1.1010,
            target: 1.0990,
            confidence: 0.6,
            rr_ratio: 1.0, // below 1.5 threshold
            timeframe: Timeframe::H1,
            expiry: now + Duration::hours(4),
            market_condition: MarketCondition::Sideways,
            technical_confluence: 1,
            fundamental_score: 0.5,
            position_size_frac: 0.01,
            max_risk_frac: 0.01,
            status: SignalStatus::Active,
        };
        assert!(!s.invariants_hold());
    }
}
