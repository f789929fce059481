pub mod api;
pub mod handler;
pub mod mdns;
pub mod messages;
pub mod metadata;
pub mod server;

pub use api::IntegrationApi;
pub use handler::IntegrationHandler;
pub use mdns::MdnsAdvertisement;
pub use messages::*;
pub use metadata::DriverMetadata;
pub use server::{Handled, IntegrationServer, PendingSetup};
