pub mod circuit_breaker;
pub mod sizing;

pub use circuit_breaker::{CircuitBreakerCheck, CircuitBreakerState};
pub use sizing::{PositionSizeCalculation, RiskManager};
