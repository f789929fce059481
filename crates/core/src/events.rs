use crate::models::{AvrState, ReceiverSettings, ReceiverSnapshot};
use crate::volume::volume_to_percent;

/// Normalized changes published by a device session.
///
/// Only the fields that are `Some` were refreshed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeviceUpdate {
    pub state: Option<AvrState>,
    /// Volume in percent, 0..100
    pub volume: Option<f64>,
    pub volume_db: Option<f64>,
    pub muted: Option<bool>,
    pub source: Option<String>,
    pub source_list: Option<Vec<String>>,
    pub sound_mode: Option<String>,
    pub sound_mode_list: Option<Vec<String>>,
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub artwork: Option<String>,
    pub settings: Option<ReceiverSettings>,
}

impl DeviceUpdate {
    pub fn with_state(state: AvrState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    /// Every field of a receiver snapshot, used after a full refresh.
    pub fn from_snapshot(state: AvrState, snapshot: &ReceiverSnapshot) -> Self {
        Self {
            state: Some(state),
            volume: snapshot.volume_db.map(volume_to_percent),
            volume_db: snapshot.volume_db,
            muted: Some(snapshot.muted),
            source: snapshot.input_func.clone(),
            source_list: Some(snapshot.input_func_list.clone()),
            sound_mode: snapshot.sound_mode.clone(),
            sound_mode_list: Some(snapshot.sound_mode_list.clone()),
            artist: snapshot.artist.clone(),
            title: snapshot.title.clone(),
            album: snapshot.album.clone(),
            artwork: snapshot.image_url.clone(),
            settings: Some(snapshot.settings.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == DeviceUpdate::default()
    }
}

/// Lifecycle and state events of a device session.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Connected { device_id: String },
    Disconnected { device_id: String },
    Error { device_id: String, message: String },
    Update { device_id: String, update: DeviceUpdate },
}

impl SessionEvent {
    pub fn device_id(&self) -> &str {
        match self {
            SessionEvent::Connected { device_id }
            | SessionEvent::Disconnected { device_id }
            | SessionEvent::Error { device_id, .. }
            | SessionEvent::Update { device_id, .. } => device_id,
        }
    }
}
