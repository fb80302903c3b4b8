pub mod manager;
pub mod memory;
pub mod state;
pub mod transport;

pub use manager::ConnectionManager;
pub use memory::MemoryConnector;
pub use state::{CloseReason, ConnectionState, ReconnectPolicy, RetryDecision, NORMAL_CLOSURE};
pub use transport::{Connector, LinkEvent, LinkNotice, Outbound, WsConnector};
