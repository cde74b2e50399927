//! Connection pool for plugin RPC clients

pub mod connections;
pub mod types;

pub(crate) use connections::check_health;
pub use connections::ConnectionPool;
pub use types::{Connection, ConnectionStatus};
