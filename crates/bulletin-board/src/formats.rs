//! Fixed-field-order, fixed-precision renderers. Same input always
//! produces byte-identical output so `update_signals` is idempotent.
use signal_core::Signal;

fn price(v: f64) -> String {
    format!("{v:.5}")
}

fn volume(v: f64) -> String {
    format!("{v:.2}")
}

/// Broker-side CSV: `Magic,Symbol,Signal,EntryPrice,StopLoss,TakeProfit,LotSize,Timestamp`.
/// Column order is part of the external contract (§6) and must not change.
pub fn broker_csv(signals: &[Signal], magic_number: i64) -> String {
    let mut out = String::from("Magic,Symbol,Signal,EntryPrice,StopLoss,TakeProfit,LotSize,Timestamp\n");
    for s in signals {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{}\n",
            magic_number,
            s.symbol,
            side_tag(s),
            price(s.entry),
            price(s.stop),
            price(s.target),
            volume(s.position_size_frac),
            s.created_at.to_rfc3339(),
        ));
    }
    out
}

/// Broker CSV plus `Confidence,RR,Expiry,Comment`.
pub fn enhanced_csv(signals: &[Signal], magic_number: i64) -> String {
    let mut out = String::from(
        "Magic,Symbol,Signal,EntryPrice,StopLoss,TakeProfit,LotSize,Timestamp,Confidence,RR,Expiry,Comment\n",
    );
    for s in signals {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{:.4},{:.2},{},\"{:?} confluence={}\"\n",
            magic_number,
            s.symbol,
            side_tag(s),
            price(s.entry),
            price(s.stop),
            price(s.target),
            volume(s.position_size_frac),
            s.created_at.to_rfc3339(),
            s.confidence,
            s.rr_ratio,
            s.expiry.to_rfc3339(),
            s.strength,
            s.technical_confluence,
        ));
    }
    out
}

/// Unified CSV carrying every §3 Signal field, full fidelity.
pub fn unified_csv(signals: &[Signal]) -> String {
    let mut out = String::from(
        "id,created_at,symbol,side,strength,entry,stop,target,confidence,rr_ratio,timeframe,expiry,market_condition,technical_confluence,fundamental_score,position_size_frac,max_risk_frac,status\n",
    );
    for s in signals {
        out.push_str(&format!(
            "{},{},{},{},{:?},{},{},{},{:.4},{:.2},{:?},{},{:?},{},{:.4},{:.4},{:.4},{:?}\n",
            s.id,
            s.created_at.to_rfc3339(),
            s.symbol,
            side_tag(s),
            s.strength,
            price(s.entry),
            price(s.stop),
            price(s.target),
            s.confidence,
            s.rr_ratio,
            s.timeframe,
            s.expiry.to_rfc3339(),
            s.market_condition,
            s.technical_confluence,
            s.fundamental_score,
            s.position_size_frac,
            s.max_risk_frac,
            s.status,
        ));
    }
    out
}

pub fn json_snapshot(signals: &[Signal]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(signals)
}

fn side_tag(s: &Signal) -> &'static str {
    match s.side {
        signal_core::Side::Buy => "BUY",
        signal_core::Side::Sell => "SELL",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use signal_core::{MarketCondition, Side, SignalStatus, SignalStrength, Timeframe};

    fn sample() -> Signal {
        let now = Utc::now();
        Signal {
            id: "sig-1".into(),
            created_at: now,
            last_update: now,
            symbol: "EURUSD".into(),
            side: Side::Buy,
            strength: SignalStrength::Strong,
            entry: 1.10001,
            stop: 1.09,
            target: 1.13,
            confidence: 0.812345,
            rr_ratio: 2.3456,
            timeframe: Timeframe::H1,
            expiry: now,
            market_condition: MarketCondition::Uptrend,
            technical_confluence: 2,
            fundamental_score: 0.5,
            position_size_frac: 0.015,
            max_risk_frac: 0.01,
            status: SignalStatus::Active,
        }
    }

    #[test]
    fn broker_csv_has_exact_header_and_column_order() {
        let csv = broker_csv(&[sample()], 20260728);
        let header = csv.lines().next().unwrap();
        assert_eq!(header, "Magic,Symbol,Signal,EntryPrice,StopLoss,TakeProfit,LotSize,Timestamp");
    }

    #[test]
    fn prices_are_formatted_to_five_decimal_places() {
        let csv = broker_csv(&[sample()], 1);
        assert!(csv.contains("1.10001"));
    }

    #[test]
    fn volume_is_formatted_to_two_decimal_places() {
        assert_eq!(volume(0.015), "0.01");
        assert_eq!(volume(0.1), "0.10");
    }

    #[test]
    fn rendering_is_deterministic_for_identical_input() {
        let a = broker_csv(&[sample()], 1);
        let b = broker_csv(&[sample()], 1);
        assert_eq!(a, b);
    }
}
