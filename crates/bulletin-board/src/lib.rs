pub mod eviction;
pub mod formats;
pub mod writer;

pub use eviction::EvictionConfig;
pub use writer::{BulletinBoard, BulletinBoardConfig};
