//! WebSocket transport: a single connection actor plus its handle.

pub mod backoff;
pub mod connection;
pub mod queue;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use connection::{ConnectionState, ConnectionStatus, Delivery, TransportEvent};
pub use queue::{OutboundQueue, QueuePressure};
pub use transport::Transport;
