use super::attributes::{int_param, key_update_helper, str_param, AttributeStore, Attributes, Params, STATE};
use super::media_player::MediaPlayer;
use super::{create_entity_id, EntityAdapter, EntityType};
use crate::commands::SIMPLE_COMMANDS;
use crate::error::StatusCode;
use crate::events::DeviceUpdate;
use crate::models::AvrState;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;

const SEND_CMD: &str = "send_cmd";
const SEND_CMD_SEQUENCE: &str = "send_cmd_sequence";
const RESERVED_PREFIX: &str = "remote.";

/// Remote entity; forwards everything to the media player of the same receiver.
pub struct Remote {
    id: String,
    name: String,
    media_player: Arc<MediaPlayer>,
    attributes: AttributeStore,
}

impl Remote {
    pub fn new(media_player: Arc<MediaPlayer>) -> Self {
        let mut attributes = Attributes::new();
        attributes.insert(STATE.into(), json!(AvrState::Unavailable.as_str()));

        Self {
            id: create_entity_id(media_player.device_id(), EntityType::Remote, None),
            name: format!("{} Remote", media_player.name()),
            media_player,
            attributes: AttributeStore::new(attributes),
        }
    }

    fn checked_command<'a>(&self, cmd_id: &str, command: Option<&'a str>) -> Result<&'a str, StatusCode> {
        match command {
            None | Some("") => {
                error!("[{}] Command parameter is missing for {}", self.id, cmd_id);
                Err(StatusCode::BadRequest)
            }
            Some(command) if command.starts_with(RESERVED_PREFIX) => {
                error!("[{}] Command {} is not allowed for {}", self.id, command, cmd_id);
                Err(StatusCode::BadRequest)
            }
            Some(command) => Ok(command),
        }
    }

    async fn send(&self, command: &str, repeat: i64) -> StatusCode {
        let mut result = StatusCode::Ok;
        for _ in 0..repeat {
            let status = self.media_player.command(command, &Params::new()).await;
            if !status.is_ok() {
                result = status;
            }
        }
        result
    }
}

#[async_trait]
impl EntityAdapter for Remote {
    fn id(&self) -> &str {
        &self.id
    }

    fn entity_type(&self) -> EntityType {
        EntityType::Remote
    }

    fn device_id(&self) -> &str {
        self.media_player.device_id()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn features(&self) -> Vec<&'static str> {
        vec!["send_cmd", "on_off", "toggle"]
    }

    fn options(&self) -> Option<Value> {
        Some(json!({ "simple_commands": SIMPLE_COMMANDS }))
    }

    fn attributes(&self) -> Attributes {
        self.attributes.snapshot()
    }

    fn state_from_avr(&self, state: AvrState) -> &'static str {
        match state {
            AvrState::On | AvrState::Playing | AvrState::Paused => "ON",
            AvrState::Off => "OFF",
            AvrState::Unavailable => "UNAVAILABLE",
            AvrState::Unknown => "UNKNOWN",
        }
    }

    async fn command(&self, cmd_id: &str, params: &Params) -> StatusCode {
        match cmd_id {
            "on" | "off" | "toggle" => return self.media_player.command(cmd_id, params).await,
            _ => {}
        }

        if cmd_id.starts_with(RESERVED_PREFIX) {
            error!("[{}] Command {} is not allowed", self.id, cmd_id);
            return StatusCode::BadRequest;
        }

        let repeat = int_param(params, "repeat", 1).max(1);

        match cmd_id {
            SEND_CMD => match self.checked_command(cmd_id, str_param(params, "command")) {
                Ok(command) => self.send(command, repeat).await,
                Err(status) => status,
            },
            SEND_CMD_SEQUENCE => {
                let sequence = params
                    .get("sequence")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();

                let mut success = true;
                for entry in &sequence {
                    match self.checked_command(cmd_id, entry.as_str()) {
                        Ok(command) => success &= self.send(command, repeat).await.is_ok(),
                        Err(_) => success = false,
                    }
                }
                if success {
                    StatusCode::Ok
                } else {
                    StatusCode::BadRequest
                }
            }
            // Anything else is passed to the receiver as is
            _ => self.media_player.command(cmd_id, params).await,
        }
    }

    fn filter_changed_attributes(&self, update: &DeviceUpdate) -> Attributes {
        let original = self.attributes.snapshot();
        let mut changed = Attributes::new();
        if let Some(state) = update.state {
            key_update_helper(STATE, json!(self.state_from_avr(state)), &mut changed, &original);
        }
        changed
    }

    fn update_attributes(&self, changed: &Attributes) {
        self.attributes.merge(changed);
    }
}
