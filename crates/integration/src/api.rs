use crate::messages::{DeviceState, EventCategory, Outgoing, SetupAction};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

const EVENT_CAPACITY: usize = 256;

/// Handle for pushing events to every connected remote.
///
/// Cheap to clone. Events sent while no remote is connected are dropped.
#[derive(Clone)]
pub struct IntegrationApi {
    events: broadcast::Sender<String>,
    device_state: Arc<RwLock<DeviceState>>,
}

impl Default for IntegrationApi {
    fn default() -> Self {
        Self::new()
    }
}

impl IntegrationApi {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            events,
            device_state: Arc::new(RwLock::new(DeviceState::Disconnected)),
        }
    }

    /// Serialized events for one connection
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.events.subscribe()
    }

    pub fn device_state(&self) -> DeviceState {
        *self.device_state.read()
    }

    pub fn device_state_event(&self) -> Outgoing {
        Outgoing::event(
            "device_state",
            EventCategory::Device,
            json!({ "state": self.device_state() }),
        )
    }

    pub fn set_device_state(&self, state: DeviceState) {
        *self.device_state.write() = state;
        debug!("Device state: {:?}", state);
        self.broadcast(self.device_state_event());
    }

    /// Publish changed attributes of an entity
    pub fn entity_change(&self, entity_id: &str, entity_type: &str, attributes: Map<String, Value>) {
        trace!("[{}] entity_change {:?}", entity_id, attributes);
        self.broadcast(Outgoing::event(
            "entity_change",
            EventCategory::Entity,
            json!({
                "entity_id": entity_id,
                "entity_type": entity_type,
                "attributes": attributes,
            }),
        ));
    }

    /// Announce that a setup step is running
    pub fn driver_setup_progress(&self) {
        self.broadcast(Outgoing::event(
            "driver_setup_change",
            EventCategory::Device,
            json!({ "event_type": "SETUP", "state": "SETUP" }),
        ));
    }

    pub fn driver_setup_change(&self, action: &SetupAction) {
        self.broadcast(Outgoing::event(
            "driver_setup_change",
            EventCategory::Device,
            action.to_event_data(),
        ));
    }

    fn broadcast(&self, message: Outgoing) {
        // No receiver means no connected remote
        let _ = self.events.send(message.to_json());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::SetupError;

    fn next(rx: &mut broadcast::Receiver<String>) -> Value {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    #[test]
    fn test_device_state_is_broadcast() {
        let api = IntegrationApi::new();
        let mut rx = api.subscribe();
        assert_eq!(api.device_state(), DeviceState::Disconnected);

        api.set_device_state(DeviceState::Connected);
        assert_eq!(api.device_state(), DeviceState::Connected);
        let event = next(&mut rx);
        assert_eq!(event["msg"], "device_state");
        assert_eq!(event["cat"], "DEVICE");
        assert_eq!(event["msg_data"]["state"], "CONNECTED");
    }

    #[test]
    fn test_entity_change() {
        let api = IntegrationApi::new();
        let mut rx = api.subscribe();
        let mut attributes = Map::new();
        attributes.insert("state".into(), json!("ON"));

        api.entity_change("media_player.AVR1", "media_player", attributes);
        let event = next(&mut rx);
        assert_eq!(event["kind"], "event");
        assert_eq!(event["cat"], "ENTITY");
        assert_eq!(event["msg_data"]["entity_id"], "media_player.AVR1");
        assert_eq!(event["msg_data"]["attributes"]["state"], "ON");
    }

    #[test]
    fn test_setup_events() {
        let api = IntegrationApi::new();
        let mut rx = api.subscribe();

        api.driver_setup_progress();
        api.driver_setup_change(&SetupAction::Error(SetupError::NotFound));
        assert_eq!(next(&mut rx)["msg_data"]["state"], "SETUP");
        let error = next(&mut rx);
        assert_eq!(error["msg"], "driver_setup_change");
        assert_eq!(error["msg_data"]["error"], "NOT_FOUND");
    }

    #[test]
    fn test_send_without_receivers() {
        let api = IntegrationApi::new();
        api.set_device_state(DeviceState::Error);
        assert_eq!(api.clone().device_state(), DeviceState::Error);
    }
}
