//! Entities exposed to the remote and the contract they share.

pub mod attributes;
pub mod media_player;
pub mod remote;
pub mod select;
pub mod sensor;

pub use attributes::{key_update_helper, AttributeStore, Attributes, Params};
pub use media_player::MediaPlayer;
pub use remote::Remote;
pub use select::{Select, SelectKind};
pub use sensor::{Sensor, SensorKind};

use crate::error::StatusCode;
use crate::events::DeviceUpdate;
use crate::models::AvrState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    MediaPlayer,
    Remote,
    Select,
    Sensor,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::MediaPlayer => "media_player",
            EntityType::Remote => "remote",
            EntityType::Select => "select",
            EntityType::Sensor => "sensor",
        }
    }
}

/// An entity backed by one device session.
///
/// `filter_changed_attributes` only computes the difference against the last
/// published attributes; callers publish the result and then commit it with
/// `update_attributes`.
#[async_trait]
pub trait EntityAdapter: Send + Sync {
    fn id(&self) -> &str;

    fn entity_type(&self) -> EntityType;

    fn device_id(&self) -> &str;

    fn name(&self) -> &str;

    fn features(&self) -> Vec<&'static str>;

    fn device_class(&self) -> Option<&'static str> {
        None
    }

    fn options(&self) -> Option<Value> {
        None
    }

    /// Copy of the last published attributes
    fn attributes(&self) -> Attributes;

    fn state_from_avr(&self, state: AvrState) -> &'static str;

    async fn command(&self, cmd_id: &str, params: &Params) -> StatusCode;

    fn filter_changed_attributes(&self, update: &DeviceUpdate) -> Attributes;

    fn update_attributes(&self, changed: &Attributes);
}

/// `{type}.{device_id}` or `{type}.{subtype}.{device_id}`.
pub fn create_entity_id(device_id: &str, entity_type: EntityType, subtype: Option<&str>) -> String {
    match subtype {
        Some(subtype) => format!("{}.{}.{}", entity_type.as_str(), subtype, device_id),
        None => format!("{}.{}", entity_type.as_str(), device_id),
    }
}

/// Everything after the first `.`, or `None` if the id has no dot.
pub fn avr_from_entity_id(entity_id: &str) -> Option<&str> {
    entity_id.split_once('.').map(|(_, device_id)| device_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avr_from_entity_id() {
        assert_eq!(avr_from_entity_id(""), None);
        assert_eq!(avr_from_entity_id("media_player_denon_avr_1"), None);
        assert_eq!(avr_from_entity_id("media_player.denon_avr_1"), Some("denon_avr_1"));
        assert_eq!(avr_from_entity_id(".denon_avr_1"), Some("denon_avr_1"));
        assert_eq!(avr_from_entity_id("media_player."), Some(""));
    }

    #[test]
    fn test_create_entity_id() {
        assert_eq!(
            create_entity_id("AVR123", EntityType::MediaPlayer, None),
            "media_player.AVR123"
        );
        assert_eq!(
            create_entity_id("AVR123", EntityType::Select, Some("input_source")),
            "select.input_source.AVR123"
        );
        let id = create_entity_id("AVR123", EntityType::Remote, None);
        assert_eq!(avr_from_entity_id(&id), Some("AVR123"));
    }
}
