use serde::{Deserialize, Serialize};

/// Persisted configuration of one receiver.
///
/// Missing flags fall back to the defaults below when loading an older file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique identifier of the receiver (its serial number)
    pub id: String,
    /// Friendly name shown in the UI
    pub name: String,
    /// IP address or hostname
    pub address: String,
    #[serde(default = "default_true")]
    pub support_sound_mode: bool,
    #[serde(default)]
    pub show_all_inputs: bool,
    /// Use the Telnet event stream instead of plain HTTP polling
    #[serde(default = "default_true")]
    pub use_telnet: bool,
    #[serde(default)]
    pub update_audyssey: bool,
    #[serde(default)]
    pub zone2: bool,
    #[serde(default)]
    pub zone3: bool,
}

fn default_true() -> bool {
    true
}

impl DeviceConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            support_sound_mode: true,
            show_all_inputs: false,
            use_telnet: true,
            update_audyssey: false,
            zone2: false,
            zone3: false,
        }
    }
}

/// Normalized receiver state, independent of the receiver's own vocabulary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AvrState {
    #[default]
    Unknown,
    Unavailable,
    Off,
    On,
    Playing,
    Paused,
}

impl AvrState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvrState::Unknown => "UNKNOWN",
            AvrState::Unavailable => "UNAVAILABLE",
            AvrState::Off => "OFF",
            AvrState::On => "ON",
            AvrState::Playing => "PLAYING",
            AvrState::Paused => "PAUSED",
        }
    }

    /// Map the control library's playback state ("on", "off", "playing", "paused").
    pub fn from_library_state(state: Option<&str>) -> Self {
        match state.map(str::to_ascii_lowercase).as_deref() {
            Some("on") => AvrState::On,
            Some("off") => AvrState::Off,
            Some("playing") => AvrState::Playing,
            Some("paused") => AvrState::Paused,
            _ => AvrState::Unknown,
        }
    }

    /// Map a power parameter as reported by the receiver ("ON", "STANDBY", "OFF").
    pub fn from_power(power: &str) -> Option<Self> {
        match power.trim().to_ascii_uppercase().as_str() {
            "ON" => Some(AvrState::On),
            "STANDBY" | "OFF" => Some(AvrState::Off),
            _ => None,
        }
    }

    /// Power state wins over the playback state.
    pub fn from_snapshot(snapshot: &ReceiverSnapshot) -> Self {
        match snapshot.power.as_deref().and_then(AvrState::from_power) {
            Some(AvrState::Off) => AvrState::Off,
            _ => AvrState::from_library_state(snapshot.state.as_deref()),
        }
    }
}

/// Identity reported by the receiver after setup.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReceiverInfo {
    pub host: String,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub model_name: Option<String>,
    pub serial_number: Option<String>,
}

/// Receiver settings exposed through select and sensor entities.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReceiverSettings {
    pub dimmer: Option<String>,
    pub eco_mode: Option<String>,
    pub monitor_output: Option<String>,
    pub speaker_preset: Option<String>,
    pub dynamic_volume: Option<String>,
    pub reference_level_offset: Option<String>,
    pub dirac_filter: Option<String>,
    /// Sleep timer in minutes, `Some(0)` when switched off
    pub sleep_timer: Option<u32>,
    /// Audio delay in milliseconds
    pub audio_delay: Option<u32>,
}

impl ReceiverSettings {
    pub fn get(&self, setting: Setting) -> Option<&str> {
        match setting {
            Setting::Dimmer => self.dimmer.as_deref(),
            Setting::EcoMode => self.eco_mode.as_deref(),
            Setting::MonitorOutput => self.monitor_output.as_deref(),
            Setting::SpeakerPreset => self.speaker_preset.as_deref(),
            Setting::DynamicVolume => self.dynamic_volume.as_deref(),
            Setting::ReferenceLevelOffset => self.reference_level_offset.as_deref(),
            Setting::DiracFilter => self.dirac_filter.as_deref(),
        }
    }
}

/// A receiver setting with a fixed set of options.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Setting {
    Dimmer,
    EcoMode,
    MonitorOutput,
    SpeakerPreset,
    DynamicVolume,
    ReferenceLevelOffset,
    DiracFilter,
}

impl Setting {
    /// Option labels in the order the receiver cycles through them.
    pub fn options(&self) -> &'static [&'static str] {
        match self {
            Setting::Dimmer => &["Bright", "Dim", "Dark", "Off"],
            Setting::EcoMode => &["On", "Auto", "Off"],
            Setting::MonitorOutput => &["Auto", "Monitor 1", "Monitor 2"],
            Setting::SpeakerPreset => &["1", "2"],
            Setting::DynamicVolume => &["Off", "Light", "Medium", "Heavy"],
            Setting::ReferenceLevelOffset => &["0dB", "+5dB", "+10dB", "+15dB"],
            Setting::DiracFilter => &["Slot 1", "Slot 2", "Slot 3", "Off"],
        }
    }
}

/// Last values read from the receiver by the control library.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReceiverSnapshot {
    /// Raw power parameter: "ON", "STANDBY" or "OFF"
    pub power: Option<String>,
    /// Raw playback state: "on", "off", "playing" or "paused"
    pub state: Option<String>,
    /// Master volume in dB, -80.0 to +18.0
    pub volume_db: Option<f64>,
    pub muted: bool,
    pub input_func: Option<String>,
    pub input_func_list: Vec<String>,
    pub sound_mode: Option<String>,
    pub sound_mode_list: Vec<String>,
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub image_url: Option<String>,
    pub settings: ReceiverSettings,
}

/// Raw push notification from the receiver: zone, event code and parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawEvent {
    pub zone: String,
    pub event: String,
    pub parameter: String,
}

impl RawEvent {
    pub fn new(zone: impl Into<String>, event: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            event: event.into(),
            parameter: parameter.into(),
        }
    }
}
