//! Scoring models are defined by their capability set — train/predict/
//! save/load — not by inheritance. Each base scorer below satisfies
//! [`ScoringModel`] over its own artifact shape (flat vector, sequence,
//! indicator window); the ensemble crate hosts the meta-model that
//! concatenates their outputs.
pub mod linear;
pub mod scorers;

use linear::TrainMetrics;
use signal_core::{Class, CoreResult, Label};
use std::path::Path;

/// Capability contract shared by every base scoring model, per the
/// train/predict/save/load contract. `Input` is the artifact shape the
/// model consumes (`&[f64]` for the flat indicator vector, `&[[f64; 5]]`
/// for the sequence, `&[[f64; 4]]` for the indicator window).
pub trait ScoringModel<Input: ?Sized>: Send + Sync {
    /// Deterministic for a fixed loaded artifact and input; fails with
    /// `NotReady` if called before train/load, `ShapeError` on a shape
    /// mismatch.
    fn predict(&self, input: &Input) -> CoreResult<(Class, [f64; 3])>;

    fn train(&mut self, inputs: &[&Input], labels: &[Label]) -> CoreResult<TrainMetrics>;

    fn save(&self, path: &Path) -> CoreResult<()>;

    fn load(&mut self, path: &Path) -> CoreResult<()>;

    fn is_ready(&self) -> bool;
}

pub use scorers::{SequenceScorer, VectorScorer, WindowScorer};
