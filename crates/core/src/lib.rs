pub mod commands;
pub mod entity;
pub mod error;
pub mod events;
pub mod models;
pub mod registry;
pub mod session;
pub mod traits;
pub mod volume;

pub use error::*;
pub use events::*;
pub use models::*;
pub use registry::DeviceRegistry;
pub use session::DeviceSession;
pub use traits::*;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
