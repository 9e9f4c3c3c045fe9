use serde::{Deserialize, Serialize};
use signal_core::{CoreError, CoreResult, Label};
use std::path::Path;

/// Softmax one-vs-all linear classifier shared by the three base scorers.
/// Not itself a public capability — each scorer extracts a fixed-width
/// summary feature vector from its own artifact shape and delegates here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearClassifier {
    pub feature_dim: usize,
    pub weights: Vec<[f64; 3]>, // feature_dim rows
    pub bias: [f64; 3],
    pub ready: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainMetrics {
    pub accuracy: f64,
    pub loss: f64,
    pub samples: usize,
    pub epochs: usize,
}

fn label_index(l: Label) -> usize {
    match l {
        Label::Down => 0,
        Label::Flat => 1,
        Label::Up => 2,
    }
}

fn softmax(logits: [f64; 3]) -> [f64; 3] {
    let max = logits.iter().cloned().fold(f64::MIN, f64::max);
    let exps = [
        (logits[0] - max).exp(),
        (logits[1] - max).exp(),
        (logits[2] - max).exp(),
    ];
    let sum: f64 = exps.iter().sum::<f64>().max(1e-12);
    [exps[0] / sum, exps[1] / sum, exps[2] / sum]
}

impl LinearClassifier {
    pub fn new(feature_dim: usize) -> Self {
        Self {
            feature_dim,
            weights: vec![[0.0; 3]; feature_dim],
            bias: [0.0; 3],
            ready: false,
        }
    }

    pub fn logits(&self, x: &[f64]) -> [f64; 3] {
        let mut out = self.bias;
        for (xi, w) in x.iter().zip(self.weights.iter()) {
            out[0] += xi * w[0];
            out[1] += xi * w[1];
            out[2] += xi * w[2];
        }
        out
    }

    pub fn predict(&self, x: &[f64]) -> CoreResult<[f64; 3]> {
        if !self.ready {
            return Err(CoreError::NotReady(
                "linear classifier predicted before train/load".into(),
            ));
        }
        if x.len() != self.feature_dim {
            return Err(CoreError::ShapeError(format!(
                "expected feature_dim {}, got {}",
                self.feature_dim,
                x.len()
            )));
        }
        Ok(softmax(self.logits(x)))
    }

    /// Fixed-epoch batch gradient descent, fully deterministic given the
    /// same inputs (no RNG is used — the determinism contract is met
    /// trivially rather than via a seed).
    pub fn train(&mut self, xs: &[Vec<f64>], ys: &[Label]) -> CoreResult<TrainMetrics> {
        if xs.len() != ys.len() || xs.is_empty() {
            return Err(CoreError::ShapeError(
                "train requires equal non-empty x/y lengths".into(),
            ));
        }
        if xs[0].len() != self.feature_dim {
            return Err(CoreError::ShapeError(format!(
                "expected feature_dim {}, got {}",
                self.feature_dim,
                xs[0].len()
            )));
        }

        const EPOCHS: usize = 50;
        const LR: f64 = 0.05;
        let n = xs.len() as f64;

        for _ in 0..EPOCHS {
            let mut grad_w = vec![[0.0_f64; 3]; self.feature_dim];
            let mut grad_b = [0.0_f64; 3];

            for (x, &y) in xs.iter().zip(ys.iter()) {
                let probs = softmax(self.logits(x));
                let target = label_index(y);
                for c in 0..3 {
                    let err = probs[c] - if c == target { 1.0 } else { 0.0 };
                    grad_b[c] += err / n;
                    for (gw, xi) in grad_w.iter_mut().zip(x.iter()) {
                        gw[c] += err * xi / n;
                    }
                }
            }

            for c in 0..3 {
                self.bias[c] -= LR * grad_b[c];
            }
            for (w, gw) in self.weights.iter_mut().zip(grad_w.iter()) {
                for c in 0..3 {
                    w[c] -= LR * gw[c];
                }
            }
        }

        self.ready = true;

        let mut correct = 0usize;
        let mut loss = 0.0;
        for (x, &y) in xs.iter().zip(ys.iter()) {
            let probs = softmax(self.logits(x));
            let target = label_index(y);
            let (argmax, _) = probs
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
                .unwrap();
            if argmax == target {
                correct += 1;
            }
            loss -= probs[target].max(1e-12).ln();
        }

        Ok(TrainMetrics {
            accuracy: correct as f64 / xs.len() as f64,
            loss: loss / xs.len() as f64,
            samples: xs.len(),
            epochs: EPOCHS,
        })
    }

    pub fn save(&self, path: &Path) -> CoreResult<()> {
        let json = serde_json::to_string(self)
            .map_err(|e| CoreError::Fatal(format!("serialize classifier: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| CoreError::TransientIo(format!("write {}: {e}", path.display())))
    }

    pub fn load(path: &Path) -> CoreResult<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| CoreError::TransientIo(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&json).map_err(|e| CoreError::Fatal(format!("deserialize classifier: {e}")))
    }
}
