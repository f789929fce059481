//! Message types of the remote's integration websocket protocol
//!
//! Every frame is a JSON envelope:
//!
//! - requests: `{"kind": "req", "id": 3, "msg": "get_driver_version", "msg_data": {..}}`
//! - responses: `{"kind": "resp", "req_id": 3, "code": 200, "msg": "driver_version", "msg_data": {..}}`
//! - events: `{"kind": "event", "msg": "entity_change", "cat": "ENTITY", "msg_data": {..}}`
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Invalid message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported request {0}")]
    UnknownRequest(String),

    #[error("Unsupported event {0}")]
    UnknownEvent(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Req,
    Resp,
    Event,
}

/// Envelope of an incoming frame, before the payload is interpreted.
#[derive(Debug, Deserialize)]
pub struct Envelope {
    pub kind: MessageKind,
    #[serde(default)]
    pub id: Option<u32>,
    pub msg: String,
    #[serde(default)]
    pub msg_data: Value,
}

impl Envelope {
    pub fn parse(text: &str) -> Result<Self, MessageError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Payload as `T`; a missing payload reads as an empty object.
    fn data<T: DeserializeOwned>(&self) -> Result<T, MessageError> {
        let data = match &self.msg_data {
            Value::Null => Value::Object(Map::new()),
            data => data.clone(),
        };
        Ok(serde_json::from_value(data)?)
    }
}

/// Requests sent by the remote.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    GetDriverVersion,
    GetDriverMetadata,
    GetDeviceState,
    GetAvailableEntities,
    GetEntityStates,
    SubscribeEvents(EntityIds),
    UnsubscribeEvents(EntityIds),
    EntityCommand(EntityCommand),
    SetupDriver(DriverSetupRequest),
    SetDriverUserData(UserData),
}

impl Request {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, MessageError> {
        let request = match envelope.msg.as_str() {
            "get_driver_version" => Request::GetDriverVersion,
            "get_driver_metadata" => Request::GetDriverMetadata,
            "get_device_state" => Request::GetDeviceState,
            "get_available_entities" => Request::GetAvailableEntities,
            "get_entity_states" => Request::GetEntityStates,
            "subscribe_events" => Request::SubscribeEvents(envelope.data()?),
            "unsubscribe_events" => Request::UnsubscribeEvents(envelope.data()?),
            "entity_command" => Request::EntityCommand(envelope.data()?),
            "setup_driver" => Request::SetupDriver(envelope.data()?),
            "set_driver_user_data" => Request::SetDriverUserData(envelope.data()?),
            other => return Err(MessageError::UnknownRequest(other.to_string())),
        };
        Ok(request)
    }
}

/// Events sent by the remote.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteEvent {
    Connect,
    Disconnect,
    EnterStandby,
    ExitStandby,
    AbortDriverSetup,
}

impl RemoteEvent {
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, MessageError> {
        match envelope.msg.as_str() {
            "connect" => Ok(RemoteEvent::Connect),
            "disconnect" => Ok(RemoteEvent::Disconnect),
            "enter_standby" => Ok(RemoteEvent::EnterStandby),
            "exit_standby" => Ok(RemoteEvent::ExitStandby),
            "abort_driver_setup" => Ok(RemoteEvent::AbortDriverSetup),
            other => Err(MessageError::UnknownEvent(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct EntityIds {
    #[serde(default)]
    pub entity_ids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct EntityCommand {
    pub entity_id: String,
    #[serde(default)]
    pub entity_type: Option<String>,
    pub cmd_id: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct DriverSetupRequest {
    #[serde(default)]
    pub reconfigure: bool,
    #[serde(default)]
    pub setup_data: Map<String, Value>,
}

/// Answer of the user to a setup page.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum UserData {
    Input { input_values: Map<String, Value> },
    Confirmation { confirm: bool },
}

impl UserData {
    /// Text value of an input field; booleans and numbers are stringified.
    pub fn value(&self, key: &str) -> Option<String> {
        let UserData::Input { input_values } = self else {
            return None;
        };
        match input_values.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        matches!(self, UserData::Input { input_values } if input_values.contains_key(key))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceState {
    Connected,
    Connecting,
    #[default]
    Disconnected,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    Device,
    Entity,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SetupError {
    NotFound,
    ConnectionRefused,
    AuthorizationError,
    Timeout,
    Other,
}

/// Outcome of a setup step, turned into `driver_setup_change` events.
#[derive(Clone, Debug, PartialEq)]
pub enum SetupAction {
    /// Show a page with input fields
    UserInput { title: String, settings: Value },
    Complete,
    Error(SetupError),
}

impl SetupAction {
    pub fn to_event_data(&self) -> Value {
        match self {
            SetupAction::UserInput { title, settings } => json!({
                "event_type": "SETUP",
                "state": "WAIT_USER_ACTION",
                "require_user_action": {
                    "input": {
                        "title": { "en": title },
                        "settings": settings,
                    }
                }
            }),
            SetupAction::Complete => json!({ "event_type": "STOP", "state": "OK" }),
            SetupAction::Error(error) => json!({
                "event_type": "STOP",
                "state": "ERROR",
                "error": error,
            }),
        }
    }
}

/// Entity definition returned by `get_available_entities`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AvailableEntity {
    pub entity_id: String,
    pub entity_type: String,
    pub device_id: String,
    pub name: Value,
    pub features: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
    pub attributes: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EntityState {
    pub entity_id: String,
    pub entity_type: String,
    pub device_id: String,
    pub attributes: Map<String, Value>,
}

/// Outgoing frames.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outgoing {
    Resp {
        req_id: u32,
        code: u16,
        msg: String,
        msg_data: Value,
    },
    Event {
        msg: String,
        cat: EventCategory,
        msg_data: Value,
    },
}

impl Outgoing {
    pub fn response(req_id: u32, code: u16, msg: impl Into<String>, msg_data: Value) -> Self {
        Outgoing::Resp {
            req_id,
            code,
            msg: msg.into(),
            msg_data,
        }
    }

    /// Plain acknowledgement of a request
    pub fn result(req_id: u32, code: u16) -> Self {
        Self::response(req_id, code, "result", json!({}))
    }

    /// Sent once, right after the remote connects
    pub fn authentication() -> Self {
        Self::response(0, 200, "authentication", json!({}))
    }

    pub fn event(msg: impl Into<String>, cat: EventCategory, msg_data: Value) -> Self {
        Outgoing::Event {
            msg: msg.into(),
            cat,
            msg_data,
        }
    }

    pub fn to_json(&self) -> String {
        // Serializing plain data into a string does not fail
        serde_json::to_string(self).unwrap_or_default()
    }
}
