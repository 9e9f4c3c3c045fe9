//! Runs the three base scorers on their respective artifacts, concatenates
//! `(argmax_i, probs_i)` per model into a fixed-width meta-feature, and
//! passes it to a meta-model whose output is the final probability vector.
//!
//! Averaging the three base outputs would lose information on disagreement
//! patterns (e.g. the sequence model confidently DOWN while the vector
//! model is FLAT); the meta-learner absorbs that correlation structure
//! instead, per this design's rationale for a learned combiner over a
//! fixed-weight blend.
use chrono::Utc;
use scoring_model::linear::{LinearClassifier, TrainMetrics};
use scoring_model::{ScoringModel, SequenceScorer, VectorScorer, WindowScorer};
use signal_core::{CoreResult, FeatureRow, Label, MarketSnapshot, Prediction, Timeframe};
use std::path::Path;

/// 3 sub-models * (1 argmax-as-onehot + 3 probs) = 12-wide meta-feature.
const META_FEATURE_DIM: usize = 12;

pub struct EnsembleCombiner {
    pub vector_model: VectorScorer,
    pub sequence_model: SequenceScorer,
    pub window_model: WindowScorer,
    meta_model: LinearClassifier,
}

fn onehot(class: signal_core::Class) -> f64 {
    match class {
        signal_core::Class::Down => 0.0,
        signal_core::Class::Flat => 0.5,
        signal_core::Class::Up => 1.0,
    }
}

impl EnsembleCombiner {
    pub fn new(vector_feature_dim: usize) -> Self {
        Self {
            vector_model: VectorScorer::new(vector_feature_dim),
            sequence_model: SequenceScorer::new(),
            window_model: WindowScorer::new(),
            meta_model: LinearClassifier::new(META_FEATURE_DIM),
        }
    }

    fn meta_feature(&self, row: &FeatureRow) -> CoreResult<([f64; META_FEATURE_DIM], Vec<[f64; 3]>)> {
        let (vc, vp) = self.vector_model.predict(&row.indicator_vector)?;
        let (sc, sp) = self.sequence_model.predict(&row.sequence)?;
        let (wc, wp) = self.window_model.predict(&row.indicator_window)?;

        let mut feat = [0.0; META_FEATURE_DIM];
        feat[0] = onehot(vc);
        feat[1..4].copy_from_slice(&vp);
        feat[4] = onehot(sc);
        feat[5..8].copy_from_slice(&sp);
        feat[8] = onehot(wc);
        feat[9..12].copy_from_slice(&wp);

        Ok((feat, vec![vp, sp, wp]))
    }

    /// Runs the full ensemble on one feature row and produces the final
    /// prediction. `min_confidence_threshold` is not enforced here — per
    /// this component's contract, confidence gating is the caller's
    /// (signal constructor's) job.
    pub fn predict(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        row: &FeatureRow,
        market: MarketSnapshot,
    ) -> CoreResult<Prediction> {
        let (meta_feat, sub_scores) = self.meta_feature(row)?;
        let probs = self.meta_model.predict(&meta_feat)?;
        Ok(Prediction {
            symbol: symbol.to_string(),
            timeframe,
            probs,
            sub_scores,
            market,
            generated_at: Utc::now(),
        })
    }

    /// Trains all three base scorers and the meta-model in sequence. Base
    /// scorers must be trained first so the meta-feature used to train the
    /// meta-model reflects post-training sub-scores.
    pub fn train(&mut self, rows: &[FeatureRow]) -> CoreResult<EnsembleTrainMetrics> {
        let labeled: Vec<&FeatureRow> = rows.iter().filter(|r| r.label.is_some()).collect();
        if labeled.is_empty() {
            return Err(signal_core::CoreError::DataQuality(
                "no labeled rows to train ensemble".into(),
            ));
        }
        let labels: Vec<Label> = labeled.iter().map(|r| r.label.unwrap()).collect();

        let vector_inputs: Vec<&[f64]> = labeled.iter().map(|r| r.indicator_vector.as_slice()).collect();
        let vector_metrics = self.vector_model.train(&vector_inputs, &labels)?;

        let sequence_inputs: Vec<&[[f64; 5]]> = labeled.iter().map(|r| r.sequence.as_slice()).collect();
        let sequence_metrics = self.sequence_model.train(&sequence_inputs, &labels)?;

        let window_inputs: Vec<&[[f64; 4]]> = labeled.iter().map(|r| r.indicator_window.as_slice()).collect();
        let window_metrics = self.window_model.train(&window_inputs, &labels)?;

        let mut meta_xs = Vec::with_capacity(labeled.len());
        for row in &labeled {
            let (feat, _) = self.meta_feature(row)?;
            meta_xs.push(feat.to_vec());
        }
        let meta_metrics = self.meta_model.train(&meta_xs, &labels)?;

        Ok(EnsembleTrainMetrics {
            vector: vector_metrics,
            sequence: sequence_metrics,
            window: window_metrics,
            meta: meta_metrics,
        })
    }

    pub fn save(&self, dir: &Path) -> CoreResult<()> {
        std::fs::create_dir_all(dir)
            .map_err(|e| signal_core::CoreError::TransientIo(format!("create {}: {e}", dir.display())))?;
        self.vector_model.save(&dir.join("vector.json"))?;
        self.sequence_model.save(&dir.join("sequence.json"))?;
        self.window_model.save(&dir.join("window.json"))?;
        self.meta_model.save(&dir.join("meta.json"))
    }

    pub fn load(&mut self, dir: &Path) -> CoreResult<()> {
        self.vector_model.load(&dir.join("vector.json"))?;
        self.sequence_model.load(&dir.join("sequence.json"))?;
        self.window_model.load(&dir.join("window.json"))?;
        self.meta_model = LinearClassifier::load(&dir.join("meta.json"))?;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.vector_model.is_ready()
            && self.sequence_model.is_ready()
            && self.window_model.is_ready()
            && self.meta_model.ready
    }
}

#[derive(Debug, Clone)]
pub struct EnsembleTrainMetrics {
    pub vector: TrainMetrics,
    pub sequence: TrainMetrics,
    pub window: TrainMetrics,
    pub meta: TrainMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;
    use feature_engineer_test_support::*;

    mod feature_engineer_test_support {
        use signal_core::{FeatureRow, Label};
        use chrono::Utc;

        pub fn row(dir: f64, label: Label) -> FeatureRow {
            let seq: Vec<[f64; 5]> = (0..10)
                .map(|i| [0.0, 1.0 + dir * i as f64 * 0.01, 0.9, 1.0 + dir * i as f64 * 0.01, 100.0])
                .collect();
            let win: Vec<[f64; 4]> = (0..10)
                .map(|i| [dir * i as f64 * 0.01, 0.5 + dir * 0.1, dir * 0.01, dir * 0.005])
                .collect();
            FeatureRow {
                timestamp: Utc::now(),
                indicator_vector: vec![dir; 6],
                sequence: seq,
                indicator_window: win,
                label: Some(label),
            }
        }
    }

    #[test]
    fn ensemble_trains_and_predicts_with_unit_probs() {
        let mut combiner = EnsembleCombiner::new(6);
        let rows = vec![
            row(1.0, Label::Up),
            row(-1.0, Label::Down),
            row(1.0, Label::Up),
            row(-1.0, Label::Down),
        ];
        combiner.train(&rows).unwrap();
        assert!(combiner.is_ready());

        let market = MarketSnapshot {
            bid: 1.1,
            ask: 1.1002,
            atr14: 0.002,
            condition: signal_core::MarketCondition::Uptrend,
        };
        let pred = combiner
            .predict("EURUSD", Timeframe::H1, &rows[0], market)
            .unwrap();
        assert!((pred.probs.iter().sum::<f64>() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn predict_before_train_is_not_ready() {
        let combiner = EnsembleCombiner::new(6);
        let r = row(1.0, Label::Up);
        let market = MarketSnapshot {
            bid: 1.1,
            ask: 1.1002,
            atr14: 0.002,
            condition: signal_core::MarketCondition::Sideways,
        };
        let err = combiner
            .predict("EURUSD", Timeframe::H1, &r, market)
            .unwrap_err();
        assert!(matches!(err, signal_core::CoreError::NotReady(_)));
    }
}
