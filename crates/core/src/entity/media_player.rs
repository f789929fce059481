use super::attributes::{f64_param, key_update_helper, str_param, AttributeStore, Attributes, Params, STATE};
use super::{create_entity_id, EntityAdapter, EntityType};
use crate::commands::{media_command, MediaCommand, SIMPLE_COMMANDS};
use crate::error::StatusCode;
use crate::events::DeviceUpdate;
use crate::models::AvrState;
use crate::session::DeviceSession;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use tracing::{info, warn};

pub const VOLUME: &str = "volume";
pub const MUTED: &str = "muted";
pub const SOURCE: &str = "source";
pub const SOURCE_LIST: &str = "source_list";
pub const SOUND_MODE: &str = "sound_mode";
pub const SOUND_MODE_LIST: &str = "sound_mode_list";
pub const MEDIA_ARTIST: &str = "media_artist";
pub const MEDIA_ALBUM: &str = "media_album";
pub const MEDIA_TITLE: &str = "media_title";
pub const MEDIA_IMAGE_URL: &str = "media_image_url";
pub const MEDIA_TYPE: &str = "media_type";

const FEATURE_SELECT_SOUND_MODE: &str = "select_sound_mode";

const BASE_FEATURES: &[&str] = &[
    "on_off",
    "toggle",
    "volume",
    "volume_up_down",
    "mute_toggle",
    "play_pause",
    "next",
    "previous",
    "media_title",
    "media_artist",
    "media_album",
    "media_image_url",
    "media_type",
    "select_source",
    "dpad",
    "menu",
    "context_menu",
    "info",
];

/// Media player entity of a receiver, the main entity of every device.
pub struct MediaPlayer {
    id: String,
    device_id: String,
    name: String,
    session: Weak<DeviceSession>,
    sound_mode: bool,
    attributes: AttributeStore,
}

impl MediaPlayer {
    pub fn new(session: &Arc<DeviceSession>) -> Self {
        let config = session.config();
        let mut attributes = Attributes::new();
        attributes.insert(STATE.into(), json!(AvrState::Unavailable.as_str()));
        attributes.insert(VOLUME.into(), json!(0.0));
        attributes.insert(MUTED.into(), json!(false));
        for key in [MEDIA_IMAGE_URL, MEDIA_TITLE, MEDIA_ARTIST, MEDIA_ALBUM, SOURCE] {
            attributes.insert(key.into(), json!(""));
        }
        attributes.insert(SOURCE_LIST.into(), json!([]));
        // Sound mode support comes from the configuration, the receiver may not be connected yet
        if config.support_sound_mode {
            attributes.insert(SOUND_MODE.into(), json!(""));
            attributes.insert(SOUND_MODE_LIST.into(), json!([]));
        }

        Self {
            id: create_entity_id(&config.id, EntityType::MediaPlayer, None),
            device_id: config.id.clone(),
            name: config.name.clone(),
            session: Arc::downgrade(session),
            sound_mode: config.support_sound_mode,
            attributes: AttributeStore::new(attributes),
        }
    }

    fn is_muted(&self) -> bool {
        self.attributes
            .get(MUTED)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

#[async_trait]
impl EntityAdapter for MediaPlayer {
    fn id(&self) -> &str {
        &self.id
    }

    fn entity_type(&self) -> EntityType {
        EntityType::MediaPlayer
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn features(&self) -> Vec<&'static str> {
        let mut features = BASE_FEATURES.to_vec();
        if self.sound_mode {
            features.push(FEATURE_SELECT_SOUND_MODE);
        }
        features
    }

    fn device_class(&self) -> Option<&'static str> {
        Some("receiver")
    }

    fn options(&self) -> Option<Value> {
        Some(json!({ "simple_commands": SIMPLE_COMMANDS }))
    }

    fn attributes(&self) -> Attributes {
        self.attributes.snapshot()
    }

    fn state_from_avr(&self, state: AvrState) -> &'static str {
        state.as_str()
    }

    async fn command(&self, cmd_id: &str, params: &Params) -> StatusCode {
        info!("[{}] Got command request: {} {:?}", self.id, cmd_id, params);

        let Some(session) = self.session.upgrade() else {
            warn!("[{}] No receiver session", self.id);
            return StatusCode::ServiceUnavailable;
        };
        let Some(command) = media_command(cmd_id) else {
            return StatusCode::NotImplemented;
        };

        match command {
            MediaCommand::On => session.power_on().await,
            MediaCommand::Off => session.power_off().await,
            MediaCommand::Toggle => session.power_toggle().await,
            MediaCommand::PlayPause => session.play_pause().await,
            MediaCommand::Next => session.next().await,
            MediaCommand::Previous => session.previous().await,
            MediaCommand::Volume => match f64_param(params, "volume") {
                Some(volume) => session.set_volume_level(volume).await,
                None => StatusCode::BadRequest,
            },
            MediaCommand::VolumeUp => session.volume_up().await,
            MediaCommand::VolumeDown => session.volume_down().await,
            MediaCommand::MuteToggle => session.mute(!self.is_muted()).await,
            MediaCommand::Mute => session.mute(true).await,
            MediaCommand::Unmute => session.mute(false).await,
            MediaCommand::SelectSource => match str_param(params, "source") {
                Some(source) => session.select_source(source).await,
                None => StatusCode::BadRequest,
            },
            MediaCommand::SelectSoundMode if !self.sound_mode => StatusCode::NotImplemented,
            MediaCommand::SelectSoundMode => match str_param(params, "mode") {
                Some(mode) => session.select_sound_mode(mode).await,
                None => StatusCode::BadRequest,
            },
            MediaCommand::Raw(command) => session.send_command(command).await,
        }
    }

    fn filter_changed_attributes(&self, update: &DeviceUpdate) -> Attributes {
        let original = self.attributes.snapshot();
        let mut changed = Attributes::new();

        if let Some(state) = update.state {
            key_update_helper(STATE, json!(self.state_from_avr(state)), &mut changed, &original);
        }

        let fields = [
            (MEDIA_ARTIST, Value::from(update.artist.clone())),
            (MEDIA_ALBUM, Value::from(update.album.clone())),
            (MEDIA_IMAGE_URL, Value::from(update.artwork.clone())),
            (MEDIA_TITLE, Value::from(update.title.clone())),
            (MUTED, Value::from(update.muted)),
            (SOURCE, Value::from(update.source.clone())),
            (VOLUME, Value::from(update.volume)),
            (SOURCE_LIST, Value::from(update.source_list.clone())),
        ];
        for (key, value) in fields {
            key_update_helper(key, value, &mut changed, &original);
        }

        if self.sound_mode {
            key_update_helper(SOUND_MODE, Value::from(update.sound_mode.clone()), &mut changed, &original);
            key_update_helper(
                SOUND_MODE_LIST,
                Value::from(update.sound_mode_list.clone()),
                &mut changed,
                &original,
            );
        }

        if changed.get(STATE).and_then(Value::as_str) == Some(AvrState::Off.as_str()) {
            for key in [MEDIA_IMAGE_URL, MEDIA_ALBUM, MEDIA_ARTIST, MEDIA_TITLE, MEDIA_TYPE, SOURCE] {
                changed.insert(key.into(), json!(""));
            }
        }

        changed
    }

    fn update_attributes(&self, changed: &Attributes) {
        self.attributes.merge(changed);
    }
}
