use crate::indicators::{adx, atr, bollinger_bands, macd, obv, rsi, sma, stochastic};
use crate::patterns::{self, PATTERN_COUNT};
use serde::{Deserialize, Serialize};
use signal_core::{Bar, CoreError, CoreResult, FeatureRow, Label};
use std::path::Path;

/// Bars of indicator warm-up history required before the first feature row,
/// per this engine's longest lookback (ADX/MACD slow EMA).
pub const INDICATOR_LOOKBACK: usize = 200;
pub const CORE_INDICATOR_COUNT: usize = 14;
pub const INDICATOR_VECTOR_LEN: usize = CORE_INDICATOR_COUNT + PATTERN_COUNT;

const MIN_RETURN_EPSILON: f64 = 0.001;

/// Per-column normalisation statistics fit on a training batch and reused
/// at inference, per this engine's split-normalisation rule: the flat
/// indicator vector is z-scored, the sequence is min-maxed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureStats {
    pub means: [f64; INDICATOR_VECTOR_LEN],
    pub stds: [f64; INDICATOR_VECTOR_LEN],
    pub seq_min: [f64; 5],
    pub seq_max: [f64; 5],
}

impl FeatureStats {
    /// Persists fitted stats to disk, mirroring `LinearClassifier::save`.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        let json = serde_json::to_string(self)
            .map_err(|e| CoreError::Fatal(format!("serialize feature stats: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| CoreError::TransientIo(format!("write {}: {e}", path.display())))
    }

    pub fn load(path: &Path) -> CoreResult<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| CoreError::TransientIo(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&json).map_err(|e| CoreError::Fatal(format!("deserialize feature stats: {e}")))
    }
}

impl Default for FeatureStats {
    fn default() -> Self {
        Self {
            means: [0.0; INDICATOR_VECTOR_LEN],
            stds: [1.0; INDICATOR_VECTOR_LEN],
            seq_min: [0.0; 5],
            seq_max: [1.0; 5],
        }
    }
}

fn raw_core_indicators(bars: &[Bar], t: usize) -> [f64; CORE_INDICATOR_COUNT] {
    let window = &bars[..=t];
    let closes: Vec<f64> = window.iter().map(|b| b.close).collect();

    let sma20 = sma(&closes, 20).last().copied().unwrap_or(closes[t]);
    let sma50 = sma(&closes, 50).last().copied().unwrap_or(closes[t]);
    let rsi14 = rsi(&closes, 14).last().copied().unwrap_or(50.0);
    let macd_r = macd(&closes, 12, 26, 9);
    let macd_hist = macd_r.histogram.last().copied().unwrap_or(0.0);
    let bb = bollinger_bands(&closes, 20, 2.0);
    let bb_pct_b = match (bb.upper.last(), bb.lower.last()) {
        (Some(&u), Some(&l)) if (u - l).abs() > 1e-12 => (closes[t] - l) / (u - l),
        _ => 0.5,
    };
    let atr14 = atr(window, 14).last().copied().unwrap_or(0.0);
    let stoch = stochastic(window, 14, 3);
    let stoch_k = stoch.k.last().copied().unwrap_or(50.0);
    let stoch_d = stoch.d.last().copied().unwrap_or(50.0);
    let adx_r = adx(window, 14);
    let adx14 = adx_r.adx.last().copied().unwrap_or(0.0);
    let obv_series = obv(window);
    let obv_delta = if obv_series.len() >= 2 {
        obv_series[obv_series.len() - 1] - obv_series[obv_series.len() - 2]
    } else {
        0.0
    };
    let momentum10 = if t >= 10 { closes[t] - closes[t - 10] } else { 0.0 };
    let roc10 = if t >= 10 && closes[t - 10].abs() > 1e-12 {
        (closes[t] - closes[t - 10]) / closes[t - 10]
    } else {
        0.0
    };

    [
        closes[t] / sma20.max(1e-12) - 1.0,
        closes[t] / sma50.max(1e-12) - 1.0,
        rsi14 / 100.0,
        macd_hist,
        bb_pct_b,
        atr14 / closes[t].max(1e-12),
        stoch_k / 100.0,
        stoch_d / 100.0,
        adx14 / 100.0,
        momentum10,
        roc10,
        obv_delta.signum(),
        (closes[t] - window.iter().map(|b| b.close).fold(f64::MIN, f64::max)).abs(),
        window.len() as f64,
    ]
    .map(|v| if v.is_finite() { v } else { 0.0 })
}

fn minmax_sequence(bars: &[Bar], t: usize, n: usize) -> Vec<[f64; 5]> {
    let start = t + 1 - n;
    let window = &bars[start..=t];
    let mut mins = [f64::INFINITY; 5];
    let mut maxs = [f64::NEG_INFINITY; 5];
    for b in window {
        let row = [b.open, b.high, b.low, b.close, b.volume];
        for i in 0..5 {
            mins[i] = mins[i].min(row[i]);
            maxs[i] = maxs[i].max(row[i]);
        }
    }
    window
        .iter()
        .map(|b| {
            let row = [b.open, b.high, b.low, b.close, b.volume];
            let mut out = [0.0; 5];
            for i in 0..5 {
                let span = (maxs[i] - mins[i]).max(1e-12);
                out[i] = (row[i] - mins[i]) / span;
            }
            out
        })
        .collect()
}

fn indicator_window(bars: &[Bar], t: usize, n: usize) -> Vec<[f64; 4]> {
    let start = t + 1 - n;
    let window = &bars[..=t];
    let closes: Vec<f64> = window.iter().map(|b| b.close).collect();
    let rsi_series = rsi(&closes, 14);
    let macd_r = macd(&closes, 12, 26, 9);

    let close_window = &bars[start..=t];
    let cmin = close_window.iter().map(|b| b.close).fold(f64::INFINITY, f64::min);
    let cmax = close_window
        .iter()
        .map(|b| b.close)
        .fold(f64::NEG_INFINITY, f64::max);
    let cspan = (cmax - cmin).max(1e-12);

    let rsi_off = window.len().saturating_sub(rsi_series.len());

    (start..=t)
        .map(|i| {
            let close_n = (bars[i].close - cmin) / cspan;
            let rsi_v = if i >= rsi_off {
                rsi_series.get(i - rsi_off).copied().unwrap_or(50.0)
            } else {
                50.0
            };
            let macd_off = window.len().saturating_sub(macd_r.macd_line.len());
            let macd_line = if i >= macd_off {
                macd_r.macd_line.get(i - macd_off).copied().unwrap_or(0.0)
            } else {
                0.0
            };
            let hist_off = window.len().saturating_sub(macd_r.histogram.len());
            let macd_hist = if i >= hist_off {
                macd_r.histogram.get(i - hist_off).copied().unwrap_or(0.0)
            } else {
                0.0
            };
            [close_n, rsi_v / 100.0, macd_line, macd_hist]
        })
        .collect()
}

fn label_for(bars: &[Bar], t: usize, horizon: usize, epsilon: f64) -> Label {
    let r = (bars[t + horizon].close - bars[t].close) / bars[t].close.max(1e-12);
    if r > epsilon {
        Label::Up
    } else if r < -epsilon {
        Label::Down
    } else {
        Label::Flat
    }
}

fn fit_stats(rows: &[(usize, [f64; INDICATOR_VECTOR_LEN], Vec<[f64; 5]>)]) -> FeatureStats {
    if rows.is_empty() {
        return FeatureStats::default();
    }
    let mut means = [0.0; INDICATOR_VECTOR_LEN];
    let mut stds = [0.0; INDICATOR_VECTOR_LEN];
    let count = rows.len() as f64;
    for (_, v, _) in rows {
        for i in 0..INDICATOR_VECTOR_LEN {
            means[i] += v[i] / count;
        }
    }
    for (_, v, _) in rows {
        for i in 0..INDICATOR_VECTOR_LEN {
            stds[i] += (v[i] - means[i]).powi(2) / count;
        }
    }
    for s in stds.iter_mut() {
        *s = s.sqrt().max(1e-6);
    }

    let mut seq_min = [f64::INFINITY; 5];
    let mut seq_max = [f64::NEG_INFINITY; 5];
    for (_, _, seq) in rows {
        for row in seq {
            for i in 0..5 {
                seq_min[i] = seq_min[i].min(row[i]);
                seq_max[i] = seq_max[i].max(row[i]);
            }
        }
    }
    FeatureStats {
        means,
        stds,
        seq_min,
        seq_max,
    }
}

/// Turn a bar window into aligned `(indicator_vector, sequence,
/// indicator_window, label)` rows. Pure function of the input bars plus
/// `sequence_length` and `horizon`.
///
/// When `stats` is `None`, statistics are fit on this batch (training mode):
/// every row must still have a label, so the window stops `horizon` bars
/// short of the end. When `Some`, the supplied stats are reused (inference
/// mode) and rows extend all the way to the newest bar — a label isn't
/// needed to score it, only to train on it — so the freshest row is never
/// `horizon` bars stale.
///
/// Insufficient bars return an empty vector, never an error — this mirrors
/// the adapter's no-op-on-missing-data contract.
pub fn engineer_features(
    bars: &[Bar],
    sequence_length: usize,
    horizon: usize,
    stats: Option<&FeatureStats>,
) -> (Vec<FeatureRow>, FeatureStats) {
    let is_inference = stats.is_some();
    let horizon_required = if is_inference { 0 } else { horizon };
    let required = sequence_length + horizon_required + INDICATOR_LOOKBACK;
    if bars.len() < required || sequence_length == 0 {
        return (Vec::new(), stats.cloned().unwrap_or_default());
    }

    let t_min = INDICATOR_LOOKBACK + sequence_length - 1;
    let t_max = if is_inference { bars.len() - 1 } else { bars.len() - 1 - horizon };
    if t_max < t_min {
        return (Vec::new(), stats.cloned().unwrap_or_default());
    }

    let mut raw = Vec::with_capacity(t_max - t_min + 1);
    for t in t_min..=t_max {
        let indicators = raw_core_indicators(bars, t);
        let pattern = patterns::detect_at(bars, t);
        let mut full = [0.0; INDICATOR_VECTOR_LEN];
        full[..CORE_INDICATOR_COUNT].copy_from_slice(&indicators);
        full[CORE_INDICATOR_COUNT..].copy_from_slice(&pattern);
        let seq = minmax_sequence(bars, t, sequence_length);
        raw.push((t, full, seq));
    }

    let resolved_stats = stats.cloned().unwrap_or_else(|| fit_stats(&raw));

    let rows = raw
        .into_iter()
        .map(|(t, raw_vec, seq)| {
            let mut zscored = vec![0.0; INDICATOR_VECTOR_LEN];
            for i in 0..INDICATOR_VECTOR_LEN {
                zscored[i] = (raw_vec[i] - resolved_stats.means[i]) / resolved_stats.stds[i];
            }
            let window = indicator_window(bars, t, sequence_length);
            let label = if t + horizon < bars.len() {
                Some(label_for(bars, t, horizon, MIN_RETURN_EPSILON))
            } else {
                None
            };
            FeatureRow {
                timestamp: bars[t].timestamp,
                indicator_vector: zscored,
                sequence: seq,
                indicator_window: window,
                label,
            }
        })
        .collect();

    (rows, resolved_stats)
}
