pub mod error;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use types::*;
