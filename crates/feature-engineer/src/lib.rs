//! Pure transform from a bar window into the indicator vector, sequence and
//! indicator window artifacts consumed by the scoring models.
pub mod features;
pub mod indicators;
pub mod patterns;

pub use features::{engineer_features, FeatureStats, CORE_INDICATOR_COUNT, INDICATOR_LOOKBACK, INDICATOR_VECTOR_LEN};
