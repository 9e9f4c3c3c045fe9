pub mod connection;
pub mod frame;
pub mod server;

pub use connection::{ConnectionHandle, ConnectionLifecycle, ConnectionRegistry, ConnectionState};
pub use server::{EaServer, EaTransportConfig, MessageSubscriber};
