use crate::messages::{AvailableEntity, DriverSetupRequest, EntityCommand, EntityState, RemoteEvent, SetupAction, UserData};
use async_trait::async_trait;
use avr_core::StatusCode;

/// Driver side of the integration protocol.
///
/// The server answers protocol-level requests itself (version, metadata,
/// device state) and delegates everything entity or setup related here.
#[async_trait]
pub trait IntegrationHandler: Send + Sync {
    /// Lifecycle event of the remote
    async fn on_event(&self, event: RemoteEvent);

    fn available_entities(&self) -> Vec<AvailableEntity>;

    /// Current attributes of the subscribed entities
    fn entity_states(&self) -> Vec<EntityState>;

    async fn subscribe_entities(&self, entity_ids: Vec<String>) -> StatusCode;

    async fn unsubscribe_entities(&self, entity_ids: Vec<String>) -> StatusCode;

    async fn entity_command(&self, command: EntityCommand) -> StatusCode;

    /// Start (or restart) the setup flow
    async fn setup_driver(&self, request: DriverSetupRequest) -> SetupAction;

    async fn set_driver_user_data(&self, data: UserData) -> SetupAction;
}
