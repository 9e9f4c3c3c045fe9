use thiserror::Error;

/// Error taxonomy shared across every component of the engine.
///
/// Propagation is the caller's job; this enum only names the kind. See each
/// component's module docs for how a given variant is handled at that
/// boundary.
#[derive(Debug, Error, Clone)]
pub enum CoreError {
    #[error("transient io: {0}")]
    TransientIo(String),

    #[error("data quality: {0}")]
    DataQuality(String),

    #[error("not ready: {0}")]
    NotReady(String),

    #[error("shape error: {0}")]
    ShapeError(String),

    /// Not a failure — a normal "no signal" outcome from risk or validator policy.
    #[error("policy reject: {0}")]
    PolicyReject(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("cancelled")]
    Cancelled,

    #[error("fatal: {0}")]
    Fatal(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn is_policy_reject(&self) -> bool {
        matches!(self, CoreError::PolicyReject(_))
    }

    pub fn is_retryable_next_tick(&self) -> bool {
        matches!(self, CoreError::TransientIo(_) | CoreError::DataQuality(_))
    }
}
