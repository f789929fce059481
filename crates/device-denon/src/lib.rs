pub mod description;
pub mod discovery;
pub mod http;
pub mod protocol;
pub mod receiver;
pub mod telnet;

pub use discovery::{discover_receivers, DiscoveredReceiver, DEFAULT_DISCOVERY_TIMEOUT};
pub use receiver::{DenonReceiver, DenonReceiverFactory, DEFAULT_TIMEOUT};
