use super::attributes::{bool_param, key_update_helper, str_param, AttributeStore, Attributes, Params, STATE};
use super::{create_entity_id, EntityAdapter, EntityType};
use crate::error::StatusCode;
use crate::events::DeviceUpdate;
use crate::models::{AvrState, DeviceConfig, Setting};
use crate::session::{DeviceSession, SessionState};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use tracing::{error, info, warn};

pub const CURRENT_OPTION: &str = "current_option";
pub const OPTIONS: &str = "options";

const EMPTY_VALUE: &str = "--";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SelectKind {
    SoundMode,
    InputSource,
    Setting(Setting),
}

impl SelectKind {
    pub fn subtype(&self) -> &'static str {
        match self {
            SelectKind::SoundMode => "sound_mode",
            SelectKind::InputSource => "input_source",
            SelectKind::Setting(Setting::Dimmer) => "dimmer",
            SelectKind::Setting(Setting::EcoMode) => "eco_mode",
            SelectKind::Setting(Setting::MonitorOutput) => "monitor_output",
            SelectKind::Setting(Setting::SpeakerPreset) => "speaker_preset",
            SelectKind::Setting(Setting::DynamicVolume) => "dynamic_volume",
            SelectKind::Setting(Setting::ReferenceLevelOffset) => "reference_level_offset",
            SelectKind::Setting(Setting::DiracFilter) => "dirac_filter",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            SelectKind::SoundMode => "Sound Mode",
            SelectKind::InputSource => "Input Source",
            SelectKind::Setting(Setting::Dimmer) => "Dimmer",
            SelectKind::Setting(Setting::EcoMode) => "Eco Mode",
            SelectKind::Setting(Setting::MonitorOutput) => "Monitor Output",
            SelectKind::Setting(Setting::SpeakerPreset) => "Speaker Preset",
            SelectKind::Setting(Setting::DynamicVolume) => "Dynamic Volume",
            SelectKind::Setting(Setting::ReferenceLevelOffset) => "Reference Level Offset",
            SelectKind::Setting(Setting::DiracFilter) => "Dirac Filter",
        }
    }

    /// Selects applicable to a receiver configuration.
    pub fn for_config(config: &DeviceConfig) -> Vec<SelectKind> {
        let mut kinds = Vec::new();
        if config.support_sound_mode {
            kinds.push(SelectKind::SoundMode);
        }
        kinds.push(SelectKind::InputSource);
        kinds.extend(
            [
                Setting::ReferenceLevelOffset,
                Setting::DynamicVolume,
                Setting::Dimmer,
                Setting::EcoMode,
                Setting::MonitorOutput,
                Setting::SpeakerPreset,
                Setting::DiracFilter,
            ]
            .map(SelectKind::Setting),
        );
        kinds.retain(|kind| config.use_telnet || !kind.requires_telnet());
        kinds
    }

    /// Values only reported over the Telnet connection
    pub fn requires_telnet(&self) -> bool {
        matches!(
            self,
            SelectKind::Setting(Setting::MonitorOutput | Setting::SpeakerPreset | Setting::DiracFilter)
        )
    }

    /// Current option and option list from an update, `None` where not included.
    fn values(&self, update: &DeviceUpdate) -> (Option<String>, Option<Vec<String>>) {
        match self {
            SelectKind::SoundMode => (update.sound_mode.clone(), update.sound_mode_list.clone()),
            SelectKind::InputSource => (update.source.clone(), update.source_list.clone()),
            SelectKind::Setting(setting) => (
                update
                    .settings
                    .as_ref()
                    .and_then(|s| s.get(*setting))
                    .map(str::to_string),
                update.settings.as_ref().map(|_| owned(setting.options())),
            ),
        }
    }

    fn current_values(&self, state: &SessionState) -> (Option<String>, Vec<String>) {
        match self {
            SelectKind::SoundMode => (state.sound_mode.clone(), state.sound_mode_list.clone()),
            SelectKind::InputSource => (state.source.clone(), state.source_list.clone()),
            SelectKind::Setting(setting) => (
                state.settings.get(*setting).map(str::to_string),
                owned(setting.options()),
            ),
        }
    }
}

fn owned(options: &[&str]) -> Vec<String> {
    options.iter().map(|o| o.to_string()).collect()
}

/// Option after (or before) `current`, wrapping around only with `cycle`.
pub fn neighbour_option<'a>(
    options: &'a [String],
    current: &str,
    forward: bool,
    cycle: bool,
) -> Option<&'a str> {
    let index = options.iter().position(|o| o == current)?;
    let target = if forward {
        match index + 1 {
            i if i < options.len() => i,
            _ if cycle => 0,
            _ => return None,
        }
    } else {
        match index.checked_sub(1) {
            Some(i) => i,
            None if cycle => options.len() - 1,
            None => return None,
        }
    };
    options.get(target).map(String::as_str)
}

/// Select entity for a source, sound mode or receiver setting.
pub struct Select {
    id: String,
    device_id: String,
    name: String,
    kind: SelectKind,
    session: Weak<DeviceSession>,
    attributes: AttributeStore,
}

impl Select {
    pub fn new(session: &Arc<DeviceSession>, kind: SelectKind) -> Self {
        let config = session.config();
        let mut attributes = Attributes::new();
        attributes.insert(STATE.into(), json!(AvrState::Unavailable.as_str()));
        attributes.insert(CURRENT_OPTION.into(), Value::Null);
        attributes.insert(OPTIONS.into(), Value::Null);

        Self {
            id: create_entity_id(&config.id, EntityType::Select, Some(kind.subtype())),
            device_id: config.id.clone(),
            name: format!("{} {}", config.name, kind.label()),
            kind,
            session: Arc::downgrade(session),
            attributes: AttributeStore::new(attributes),
        }
    }

    async fn select(&self, session: &DeviceSession, option: &str) -> StatusCode {
        match self.kind {
            SelectKind::SoundMode => session.select_sound_mode(option).await,
            SelectKind::InputSource => session.select_source(option).await,
            SelectKind::Setting(setting) => {
                if !setting.options().contains(&option) {
                    warn!("[{}] Invalid option {}", self.id, option);
                    return StatusCode::BadRequest;
                }
                session.set_setting(setting, option).await
            }
        }
    }
}

#[async_trait]
impl EntityAdapter for Select {
    fn id(&self) -> &str {
        &self.id
    }

    fn entity_type(&self) -> EntityType {
        EntityType::Select
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

    fn attributes(&self) -> Attributes {
        self.attributes.snapshot()
    }

    fn state_from_avr(&self, state: AvrState) -> &'static str {
        // A select has no OFF state
        match state {
            AvrState::Unavailable => "UNAVAILABLE",
            AvrState::Unknown => "UNKNOWN",
            _ => "ON",
        }
    }

    async fn command(&self, cmd_id: &str, params: &Params) -> StatusCode {
        let Some(session) = self.session.upgrade() else {
            return StatusCode::ServiceUnavailable;
        };

        let current = session.snapshot();
        if current.state == AvrState::Off && self.kind != SelectKind::InputSource {
            info!("[{}] Skipping {} because receiver is off", self.id, cmd_id);
            return StatusCode::Ok;
        }

        let (value, options) = self.kind.current_values(&current);
        let target = match cmd_id {
            "select_option" => match str_param(params, "option") {
                Some(option) => Some(option.to_string()),
                None => {
                    warn!("[{}] No option provided for select_option", self.id);
                    return StatusCode::BadRequest;
                }
            },
            "select_first" => options.first().cloned(),
            "select_last" => options.last().cloned(),
            "select_next" | "select_previous" => {
                let cycle = bool_param(params, "cycle", false);
                let forward = cmd_id == "select_next";
                value
                    .as_deref()
                    .and_then(|v| neighbour_option(&options, v, forward, cycle))
                    .map(str::to_string)
            }
            _ => {
                warn!("[{}] Unknown command {}", self.id, cmd_id);
                return StatusCode::BadRequest;
            }
        };

        match target {
            Some(option) => self.select(&session, &option).await,
            None => {
                error!("[{}] No option to select for {}", self.id, cmd_id);
                StatusCode::BadRequest
            }
        }
    }

    fn filter_changed_attributes(&self, update: &DeviceUpdate) -> Attributes {
        let original = self.attributes.snapshot();
        let mut changed = Attributes::new();

        if let Some(state) = update.state {
            key_update_helper(STATE, json!(self.state_from_avr(state)), &mut changed, &original);
        }

        let (mut current, options) = self.kind.values(update);
        if update.state == Some(AvrState::Off) && self.kind != SelectKind::InputSource {
            current = Some(EMPTY_VALUE.to_string());
        }

        key_update_helper(CURRENT_OPTION, Value::from(current), &mut changed, &original);
        key_update_helper(OPTIONS, Value::from(options), &mut changed, &original);
        changed
    }

    fn update_attributes(&self, changed: &Attributes) {
        self.attributes.merge(changed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReceiverSettings;
    use crate::test_utils::{MockFactory, MockReceiver};

    fn list(values: &[&str]) -> Vec<String> {
        owned(values)
    }

    async fn connected() -> (Arc<MockReceiver>, Arc<DeviceSession>) {
        let receiver = MockReceiver::playing();
        receiver.update_snapshot(|s| {
            s.settings = ReceiverSettings {
                dimmer: Some("Dim".into()),
                ..Default::default()
            }
        });
        let session = DeviceSession::new(
            DeviceConfig::new("AVR123", "Living room", "192.168.1.20"),
            MockFactory::shared(&receiver),
        );
        session.connect().await.unwrap();
        (receiver, session)
    }

    fn cycle(value: bool) -> Params {
        let mut params = Params::new();
        params.insert("cycle".into(), json!(value));
        params
    }

    #[test]
    fn test_neighbour_option() {
        let options = list(&["A", "B", "C"]);
        assert_eq!(neighbour_option(&options, "A", true, false), Some("B"));
        assert_eq!(neighbour_option(&options, "C", true, false), None);
        assert_eq!(neighbour_option(&options, "C", true, true), Some("A"));
        assert_eq!(neighbour_option(&options, "B", false, false), Some("A"));
        assert_eq!(neighbour_option(&options, "A", false, false), None);
        assert_eq!(neighbour_option(&options, "A", false, true), Some("C"));
        assert_eq!(neighbour_option(&options, "X", true, true), None);
        assert_eq!(neighbour_option(&[], "A", true, true), None);
    }

    #[test]
    fn test_kinds_for_config() {
        let mut config = DeviceConfig::new("AVR123", "Living room", "192.168.1.20");
        let kinds = SelectKind::for_config(&config);
        assert_eq!(kinds.len(), 9);
        assert_eq!(kinds[0], SelectKind::SoundMode);

        config.use_telnet = false;
        config.support_sound_mode = false;
        let kinds = SelectKind::for_config(&config);
        assert_eq!(kinds.len(), 5);
        assert!(!kinds.contains(&SelectKind::SoundMode));
        assert!(kinds.iter().all(|kind| !kind.requires_telnet()));
    }

    #[tokio::test]
    async fn test_identity() {
        let (_receiver, session) = connected().await;
        let select = Select::new(&session, SelectKind::InputSource);
        assert_eq!(select.id(), "select.input_source.AVR123");
        assert_eq!(select.name(), "Living room Input Source");
    }

    #[tokio::test]
    async fn test_next_previous_and_bounds() {
        let (receiver, session) = connected().await;
        let select = Select::new(&session, SelectKind::InputSource);

        // Current source is NET in CD, NET, TV
        assert_eq!(select.command("select_next", &cycle(false)).await, StatusCode::Ok);
        assert_eq!(select.command("select_previous", &cycle(false)).await, StatusCode::Ok);
        assert_eq!(select.command("select_first", &Params::new()).await, StatusCode::Ok);
        assert_eq!(select.command("select_last", &Params::new()).await, StatusCode::Ok);
        assert_eq!(
            receiver.commands(),
            vec!["set_input TV", "set_input CD", "set_input CD", "set_input TV"]
        );

        let dimmer = Select::new(&session, SelectKind::Setting(Setting::Dimmer));
        // Dim -> Dark -> Off; Off is last
        assert_eq!(dimmer.command("select_next", &cycle(false)).await, StatusCode::Ok);
        receiver.update_snapshot(|s| s.settings.dimmer = Some("Off".into()));
        session.refresh().await;
        assert_eq!(dimmer.command("select_next", &cycle(false)).await, StatusCode::BadRequest);
        assert_eq!(dimmer.command("select_next", &cycle(true)).await, StatusCode::Ok);
        assert_eq!(
            receiver.commands()[4..],
            ["set_setting Dimmer Dark".to_string(), "set_setting Dimmer Bright".to_string()]
        );
    }

    #[tokio::test]
    async fn test_select_option_validation() {
        let (receiver, session) = connected().await;
        let eco = Select::new(&session, SelectKind::Setting(Setting::EcoMode));

        let mut params = Params::new();
        params.insert("option".into(), json!("Auto"));
        assert_eq!(eco.command("select_option", &params).await, StatusCode::Ok);

        params.insert("option".into(), json!("Turbo"));
        assert_eq!(eco.command("select_option", &params).await, StatusCode::BadRequest);
        assert_eq!(eco.command("select_option", &Params::new()).await, StatusCode::BadRequest);
        assert_eq!(eco.command("select_random", &Params::new()).await, StatusCode::BadRequest);
        assert_eq!(receiver.commands(), vec!["set_setting EcoMode Auto"]);
    }

    #[tokio::test]
    async fn test_only_input_source_while_off() {
        let (receiver, session) = connected().await;
        receiver.set_power("STANDBY", "off");
        session.refresh().await;

        let sound_mode = Select::new(&session, SelectKind::SoundMode);
        let input = Select::new(&session, SelectKind::InputSource);

        assert_eq!(sound_mode.command("select_first", &Params::new()).await, StatusCode::Ok);
        assert_eq!(input.command("select_first", &Params::new()).await, StatusCode::Ok);
        assert_eq!(receiver.commands(), vec!["set_input CD"]);
    }

    #[tokio::test]
    async fn test_filter() {
        let (_receiver, session) = connected().await;
        let select = Select::new(&session, SelectKind::SoundMode);

        let changed = select.filter_changed_attributes(&session.snapshot().to_update());
        assert_eq!(changed.get(STATE), Some(&json!("ON")));
        assert_eq!(changed.get(CURRENT_OPTION), Some(&json!("STEREO")));
        assert_eq!(changed.get(OPTIONS), Some(&json!(["MOVIE", "MUSIC", "STEREO"])));
        select.update_attributes(&changed);

        let changed = select.filter_changed_attributes(&DeviceUpdate::with_state(AvrState::Off));
        assert_eq!(changed.len(), 1);
        assert_eq!(changed.get(CURRENT_OPTION), Some(&json!("--")));

        let volume = DeviceUpdate {
            volume: Some(10.0),
            ..Default::default()
        };
        assert!(select.filter_changed_attributes(&volume).is_empty());
    }
}
