use super::attributes::{key_update_helper, AttributeStore, Attributes, Params, STATE};
use super::{create_entity_id, EntityAdapter, EntityType};
use crate::error::StatusCode;
use crate::events::DeviceUpdate;
use crate::models::{AvrState, DeviceConfig};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

pub const VALUE: &str = "value";
pub const UNIT: &str = "unit";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SensorKind {
    VolumeDb,
    SoundMode,
    InputSource,
    Mute,
    Dimmer,
    EcoMode,
    SleepTimer,
    AudioDelay,
    MonitorOutput,
}

impl SensorKind {
    pub const ALWAYS: [SensorKind; 4] = [
        SensorKind::VolumeDb,
        SensorKind::SoundMode,
        SensorKind::InputSource,
        SensorKind::Mute,
    ];

    pub const TELNET: [SensorKind; 5] = [
        SensorKind::Dimmer,
        SensorKind::EcoMode,
        SensorKind::SleepTimer,
        SensorKind::AudioDelay,
        SensorKind::MonitorOutput,
    ];

    pub fn subtype(&self) -> &'static str {
        match self {
            SensorKind::VolumeDb => "volume_db",
            SensorKind::SoundMode => "sound_mode",
            SensorKind::InputSource => "input_source",
            SensorKind::Mute => "mute",
            SensorKind::Dimmer => "dimmer",
            SensorKind::EcoMode => "eco_mode",
            SensorKind::SleepTimer => "sleep_timer",
            SensorKind::AudioDelay => "audio_delay",
            SensorKind::MonitorOutput => "monitor_output",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            SensorKind::VolumeDb => "Volume",
            SensorKind::SoundMode => "Sound Mode",
            SensorKind::InputSource => "Input Source",
            SensorKind::Mute => "Mute",
            SensorKind::Dimmer => "Dimmer",
            SensorKind::EcoMode => "Eco Mode",
            SensorKind::SleepTimer => "Sleep Timer",
            SensorKind::AudioDelay => "Audio Delay",
            SensorKind::MonitorOutput => "Monitor Output",
        }
    }

    fn unit(&self) -> Option<&'static str> {
        match self {
            SensorKind::VolumeDb => Some("dB"),
            SensorKind::SleepTimer => Some("min"),
            SensorKind::AudioDelay => Some("ms"),
            _ => None,
        }
    }

    /// Sensor value contained in an update, if any.
    fn value(&self, update: &DeviceUpdate) -> Option<Value> {
        let settings = update.settings.as_ref();
        match self {
            SensorKind::VolumeDb => update
                .volume_db
                .map(|db| json!((db * 10.0).round() / 10.0)),
            SensorKind::SoundMode => update.sound_mode.clone().map(Value::from),
            SensorKind::InputSource => update.source.clone().map(Value::from),
            SensorKind::Mute => update
                .muted
                .map(|muted| json!(format!("Mute {}", if muted { "On" } else { "Off" }))),
            SensorKind::Dimmer => settings.map(|s| {
                json!(format!("Dimmer {}", s.dimmer.as_deref().unwrap_or("Off")))
            }),
            SensorKind::EcoMode => {
                settings.map(|s| json!(format!("ECO {}", s.eco_mode.as_deref().unwrap_or("Off"))))
            }
            SensorKind::SleepTimer => settings.map(|s| match s.sleep_timer {
                Some(minutes) if minutes > 0 => json!(format!("Sleep {}", minutes)),
                _ => json!("Sleep Off"),
            }),
            SensorKind::AudioDelay => settings.map(|s| json!(s.audio_delay.unwrap_or(0))),
            SensorKind::MonitorOutput => settings
                .and_then(|s| s.monitor_output.clone())
                .map(Value::from),
        }
    }
}

/// Read-only sensor showing one receiver value.
pub struct Sensor {
    id: String,
    device_id: String,
    name: String,
    kind: SensorKind,
    attributes: AttributeStore,
}

impl Sensor {
    pub fn new(config: &DeviceConfig, kind: SensorKind) -> Self {
        let mut attributes = Attributes::new();
        attributes.insert(STATE.into(), json!(AvrState::Unavailable.as_str()));
        attributes.insert(VALUE.into(), Value::Null);
        attributes.insert(UNIT.into(), Value::from(kind.unit()));

        Self {
            id: create_entity_id(&config.id, EntityType::Sensor, Some(kind.subtype())),
            device_id: config.id.clone(),
            name: format!("{} {}", config.name, kind.label()),
            kind,
            attributes: AttributeStore::new(attributes),
        }
    }

    /// Sensors applicable to a receiver configuration.
    pub fn for_config(config: &DeviceConfig) -> Vec<Sensor> {
        let mut kinds = SensorKind::ALWAYS.to_vec();
        if config.use_telnet {
            kinds.extend(SensorKind::TELNET);
        }
        kinds.into_iter().map(|kind| Sensor::new(config, kind)).collect()
    }
}

#[async_trait]
impl EntityAdapter for Sensor {
    fn id(&self) -> &str {
        &self.id
    }

    fn entity_type(&self) -> EntityType {
        EntityType::Sensor
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn features(&self) -> Vec<&'static str> {
        Vec::new()
    }

    fn device_class(&self) -> Option<&'static str> {
        Some("custom")
    }

    fn options(&self) -> Option<Value> {
        match self.kind {
            SensorKind::VolumeDb => Some(json!({"custom_unit": "dB", "decimals": 1})),
            SensorKind::AudioDelay => Some(json!({"custom_unit": "ms", "decimals": 0})),
            _ => None,
        }
    }

    fn attributes(&self) -> Attributes {
        self.attributes.snapshot()
    }

    fn state_from_avr(&self, state: AvrState) -> &'static str {
        match state {
            AvrState::Unavailable => "UNAVAILABLE",
            AvrState::Unknown => "UNKNOWN",
            _ => "ON",
        }
    }

    async fn command(&self, cmd_id: &str, _params: &Params) -> StatusCode {
        debug!("[{}] Sensors do not accept commands: {}", self.id, cmd_id);
        StatusCode::NotImplemented
    }

    fn filter_changed_attributes(&self, update: &DeviceUpdate) -> Attributes {
        let original = self.attributes.snapshot();
        let mut changed = Attributes::new();

        if let Some(state @ (AvrState::Unavailable | AvrState::Unknown)) = update.state {
            key_update_helper(STATE, json!(self.state_from_avr(state)), &mut changed, &original);
            return changed;
        }

        if let Some(state) = update.state {
            key_update_helper(STATE, json!(self.state_from_avr(state)), &mut changed, &original);
        }
        if let Some(value) = self.kind.value(update) {
            key_update_helper(STATE, json!("ON"), &mut changed, &original);
            key_update_helper(VALUE, value, &mut changed, &original);
        }
        changed
    }

    fn update_attributes(&self, changed: &Attributes) {
        self.attributes.merge(changed);
    }
}
