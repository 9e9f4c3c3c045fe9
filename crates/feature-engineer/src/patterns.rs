//! Candlestick pattern catalogue.
//!
//! Full pattern libraries used elsewhere in trading systems enumerate on the
//! order of 60 named patterns, usually via an external dependency. Unknown
//! or undetectable patterns here contribute a zero-valued slot rather than
//! an exception — a handful of structurally simple patterns are detected
//! directly; everything else stays zero. The ensemble absorbs missingness
//! well, so there is no attempt to re-implement the full catalogue.
use signal_core::Bar;

pub const PATTERN_NAMES: [&str; 8] = [
    "doji",
    "hammer",
    "shooting_star",
    "bullish_engulfing",
    "bearish_engulfing",
    "bullish_harami",
    "bearish_harami",
    "piercing_line",
];

pub const PATTERN_COUNT: usize = PATTERN_NAMES.len();

fn body(b: &Bar) -> f64 {
    (b.close - b.open).abs()
}

fn range(b: &Bar) -> f64 {
    (b.high - b.low).max(1e-12)
}

fn is_doji(b: &Bar) -> bool {
    body(b) / range(b) < 0.1
}

fn is_hammer(b: &Bar) -> bool {
    let lower_wick = b.open.min(b.close) - b.low;
    let upper_wick = b.high - b.open.max(b.close);
    lower_wick > body(b) * 2.0 && upper_wick < body(b)
}

fn is_shooting_star(b: &Bar) -> bool {
    let upper_wick = b.high - b.open.max(b.close);
    let lower_wick = b.open.min(b.close) - b.low;
    upper_wick > body(b) * 2.0 && lower_wick < body(b)
}

fn is_bullish_engulfing(prev: &Bar, cur: &Bar) -> bool {
    prev.close < prev.open && cur.close > cur.open && cur.close > prev.open && cur.open < prev.close
}

fn is_bearish_engulfing(prev: &Bar, cur: &Bar) -> bool {
    prev.close > prev.open && cur.close < cur.open && cur.close < prev.open && cur.open > prev.close
}

fn is_bullish_harami(prev: &Bar, cur: &Bar) -> bool {
    prev.close < prev.open && body(cur) < body(prev) && cur.open > prev.close && cur.close < prev.open
}

fn is_bearish_harami(prev: &Bar, cur: &Bar) -> bool {
    prev.close > prev.open && body(cur) < body(prev) && cur.open < prev.close && cur.close > prev.open
}

fn is_piercing_line(prev: &Bar, cur: &Bar) -> bool {
    prev.close < prev.open
        && cur.close > cur.open
        && cur.open < prev.low
        && cur.close > (prev.open + prev.close) / 2.0
        && cur.close < prev.open
}

/// Returns a fixed-width vector of 0.0/1.0 pattern-detected slots for the
/// bar at index `idx`, in `PATTERN_NAMES` order. Out-of-range or ambiguous
/// detections are zero, never an exception.
pub fn detect_at(bars: &[Bar], idx: usize) -> [f64; PATTERN_COUNT] {
    let mut out = [0.0; PATTERN_COUNT];
    if idx >= bars.len() {
        return out;
    }
    let cur = &bars[idx];
    out[0] = is_doji(cur) as u8 as f64;
    out[1] = is_hammer(cur) as u8 as f64;
    out[2] = is_shooting_star(cur) as u8 as f64;
    if idx > 0 {
        let prev = &bars[idx - 1];
        out[3] = is_bullish_engulfing(prev, cur) as u8 as f64;
        out[4] = is_bearish_engulfing(prev, cur) as u8 as f64;
        out[5] = is_bullish_harami(prev, cur) as u8 as f64;
        out[6] = is_bearish_harami(prev, cur) as u8 as f64;
        out[7] = is_piercing_line(prev, cur) as u8 as f64;
    }
    out
}
