pub mod memory;
pub mod tcp;
pub mod traits;

pub use memory::{memory_transport, MemoryConnector, MemoryListener};
pub use tcp::TcpConnector;
pub use traits::{TransportConnector, TransportStream};
