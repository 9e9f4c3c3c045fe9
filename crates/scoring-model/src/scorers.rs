use crate::linear::{LinearClassifier, TrainMetrics};
use crate::ScoringModel;
use signal_core::{Class, CoreResult, Label};
use std::path::Path;

/// Base scorer over the flat indicator vector (the "gradient-boosted tree"
/// slot in the capability contract — implemented here as a deterministic
/// linear classifier so the crate carries no ML runtime dependency).
#[derive(Debug, Clone)]
pub struct VectorScorer {
    classifier: LinearClassifier,
}

impl VectorScorer {
    pub fn new(feature_dim: usize) -> Self {
        Self {
            classifier: LinearClassifier::new(feature_dim),
        }
    }
}

impl ScoringModel<[f64]> for VectorScorer {
    fn predict(&self, input: &[f64]) -> CoreResult<(Class, [f64; 3])> {
        let probs = self.classifier.predict(input)?;
        Ok((Class::from_probs(&probs), probs))
    }

    fn train(&mut self, inputs: &[&[f64]], labels: &[Label]) -> CoreResult<TrainMetrics> {
        let owned: Vec<Vec<f64>> = inputs.iter().map(|x| x.to_vec()).collect();
        self.classifier.train(&owned, labels)
    }

    fn save(&self, path: &Path) -> CoreResult<()> {
        self.classifier.save(path)
    }

    fn load(&mut self, path: &Path) -> CoreResult<()> {
        self.classifier = LinearClassifier::load(path)?;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.classifier.ready
    }
}

const SUMMARY_DIM: usize = 6;

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    (mean, var.sqrt())
}

fn sequence_summary(seq: &[[f64; 5]]) -> [f64; SUMMARY_DIM] {
    if seq.is_empty() {
        return [0.0; SUMMARY_DIM];
    }
    let closes: Vec<f64> = seq.iter().map(|r| r[3]).collect();
    let volumes: Vec<f64> = seq.iter().map(|r| r[4]).collect();
    let (close_mean, close_std) = mean_std(&closes);
    let (vol_mean, _) = mean_std(&volumes);
    let close_slope = closes.last().unwrap() - closes.first().unwrap();
    let range_mean = seq.iter().map(|r| r[1] - r[2]).sum::<f64>() / seq.len() as f64;
    [
        close_slope,
        vol_mean,
        range_mean,
        close_mean,
        close_std,
        *closes.last().unwrap(),
    ]
}

/// Base scorer over the rolling OHLCV sequence (the "recurrent sequence
/// model" slot).
#[derive(Debug, Clone)]
pub struct SequenceScorer {
    classifier: LinearClassifier,
}

impl SequenceScorer {
    pub fn new() -> Self {
        Self {
            classifier: LinearClassifier::new(SUMMARY_DIM),
        }
    }
}

impl Default for SequenceScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoringModel<[[f64; 5]]> for SequenceScorer {
    fn predict(&self, input: &[[f64; 5]]) -> CoreResult<(Class, [f64; 3])> {
        let summary = sequence_summary(input);
        let probs = self.classifier.predict(&summary)?;
        Ok((Class::from_probs(&probs), probs))
    }

    fn train(&mut self, inputs: &[&[[f64; 5]]], labels: &[Label]) -> CoreResult<TrainMetrics> {
        let owned: Vec<Vec<f64>> = inputs.iter().map(|s| sequence_summary(s).to_vec()).collect();
        self.classifier.train(&owned, labels)
    }

    fn save(&self, path: &Path) -> CoreResult<()> {
        self.classifier.save(path)
    }

    fn load(&mut self, path: &Path) -> CoreResult<()> {
        self.classifier = LinearClassifier::load(path)?;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.classifier.ready
    }
}

fn window_summary(window: &[[f64; 4]]) -> [f64; SUMMARY_DIM] {
    if window.is_empty() {
        return [0.0; SUMMARY_DIM];
    }
    let closes: Vec<f64> = window.iter().map(|r| r[0]).collect();
    let rsis: Vec<f64> = window.iter().map(|r| r[1]).collect();
    let macds: Vec<f64> = window.iter().map(|r| r[2]).collect();
    let hists: Vec<f64> = window.iter().map(|r| r[3]).collect();
    let (rsi_mean, _) = mean_std(&rsis);
    let (macd_mean, _) = mean_std(&macds);
    let (hist_mean, _) = mean_std(&hists);
    let (close_mean, close_std) = mean_std(&closes);
    [
        closes.last().unwrap() - closes.first().unwrap(),
        rsi_mean - 0.5,
        macd_mean,
        hist_mean,
        close_std,
        close_mean,
    ]
}

/// Base scorer over the multichannel indicator window (the "convolutional
/// model" slot).
#[derive(Debug, Clone)]
pub struct WindowScorer {
    classifier: LinearClassifier,
}

impl WindowScorer {
    pub fn new() -> Self {
        Self {
            classifier: LinearClassifier::new(SUMMARY_DIM),
        }
    }
}

impl Default for WindowScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoringModel<[[f64; 4]]> for WindowScorer {
    fn predict(&self, input: &[[f64; 4]]) -> CoreResult<(Class, [f64; 3])> {
        let summary = window_summary(input);
        let probs = self.classifier.predict(&summary)?;
        Ok((Class::from_probs(&probs), probs))
    }

    fn train(&mut self, inputs: &[&[[f64; 4]]], labels: &[Label]) -> CoreResult<TrainMetrics> {
        let owned: Vec<Vec<f64>> = inputs.iter().map(|w| window_summary(w).to_vec()).collect();
        self.classifier.train(&owned, labels)
    }

    fn save(&self, path: &Path) -> CoreResult<()> {
        self.classifier.save(path)
    }

    fn load(&mut self, path: &Path) -> CoreResult<()> {
        self.classifier = LinearClassifier::load(path)?;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.classifier.ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_scorer_not_ready_before_train() {
        let scorer = VectorScorer::new(4);
        let err = scorer.predict(&[0.0, 1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, signal_core::CoreError::NotReady(_)));
    }

    #[test]
    fn vector_scorer_shape_error_on_mismatch() {
        let mut scorer = VectorScorer::new(4);
        let xs = vec![vec![0.0, 1.0, 2.0, 3.0]];
        scorer.classifier.train(&xs, &[Label::Up]).unwrap();
        let refs: Vec<&[f64]> = vec![&[0.0, 1.0][..]];
        let err = scorer.predict(refs[0]).unwrap_err();
        assert!(matches!(err, signal_core::CoreError::ShapeError(_)));
    }

    #[test]
    fn sequence_scorer_trains_and_predicts() {
        let mut scorer = SequenceScorer::new();
        let up_seq: Vec<[f64; 5]> = vec![[0.0, 1.1, 0.9, 1.0, 100.0], [0.0, 1.3, 1.0, 1.2, 110.0]];
        let down_seq: Vec<[f64; 5]> = vec![[0.0, 1.1, 0.9, 1.0, 100.0], [0.0, 0.9, 0.6, 0.7, 90.0]];
        let inputs: Vec<&[[f64; 5]]> = vec![&up_seq, &down_seq];
        let labels = vec![Label::Up, Label::Down];
        let metrics = scorer.train(&inputs, &labels).unwrap();
        assert_eq!(metrics.samples, 2);
        let (_, probs) = scorer.predict(&up_seq).unwrap();
        assert!((probs.iter().sum::<f64>() - 1.0).abs() < 1e-6);
    }
}
