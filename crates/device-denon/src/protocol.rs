//! Denon/Marantz control protocol.
//!
//! Receivers speak the same ASCII commands over Telnet (CR terminated lines)
//! and over the HTTP `formiPhoneAppDirect.xml` endpoint. Status lines pushed
//! over Telnet mirror the command that would set the value, e.g. `MV505`
//! is both "volume is 50.5" and "set volume to 50.5".

use avr_core::volume::{absolute_volume_to_relative, relative_volume_to_absolute};
use avr_core::{RawEvent, ReceiverSnapshot, Setting};

pub const MAIN_ZONE: &str = "Main";

/// Event codes, longest first so that `NSE` wins over `NS`
const EVENTS: &[&str] = &[
    "DIM", "ECO", "NSA", "NSE", "SLP", "CV", "DC", "HD", "MN", "MS", "MU", "MV", "NS", "PS", "PV",
    "PW", "SD", "SI", "SP", "SS", "SV", "SY", "TF", "TM", "TP", "VS", "ZM",
];

const ZONES: &[(&str, &str)] = &[("Z2", "Zone2"), ("Z3", "Zone3")];

/// Split one Telnet status line into zone, event code and parameter.
pub fn parse_line(line: &str) -> Option<RawEvent> {
    let line = line.trim_matches(|c| c == '\r' || c == '\n');
    if line.is_empty() {
        return None;
    }

    for (prefix, zone) in ZONES {
        if let Some(parameter) = line.strip_prefix(prefix) {
            return Some(RawEvent::new(*zone, *prefix, parameter));
        }
    }

    EVENTS
        .iter()
        .find(|event| line.starts_with(*event))
        .map(|event| RawEvent::new(MAIN_ZONE, *event, &line[event.len()..]))
}

/// Decode an `MV` parameter into dB. `MAX` lines and garbage yield `None`.
///
/// Two digits are whole steps on the absolute scale, a third digit is the
/// half step: `50` is -30.0 dB and `505` is -29.5 dB.
pub fn parse_volume(parameter: &str) -> Option<f64> {
    let digits = parameter.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let raw: f64 = digits.parse().ok()?;
    let absolute = match digits.len() {
        1 | 2 => raw,
        3 => raw / 10.0,
        _ => return None,
    };
    Some(absolute_volume_to_relative(absolute))
}

/// Encode an absolute master volume command, rounded to half steps.
pub fn volume_command(volume_db: f64) -> String {
    let absolute = (relative_volume_to_absolute(volume_db) * 2.0).round() / 2.0;
    if absolute.fract() > 0.0 {
        format!("MV{:02}5", absolute.trunc() as u32)
    } else {
        format!("MV{:02}", absolute as u32)
    }
}

type CodeTable = &'static [(&'static str, &'static str)];

const DIMMER: CodeTable = &[("BRI", "Bright"), ("DIM", "Dim"), ("DAR", "Dark"), ("OFF", "Off")];
const ECO_MODE: CodeTable = &[("ON", "On"), ("AUTO", "Auto"), ("OFF", "Off")];
const MONITOR_OUTPUT: CodeTable = &[("AUTO", "Auto"), ("1", "Monitor 1"), ("2", "Monitor 2")];
const SPEAKER_PRESET: CodeTable = &[("1", "1"), ("2", "2")];
const DYNAMIC_VOLUME: CodeTable = &[("OFF", "Off"), ("LIT", "Light"), ("MED", "Medium"), ("HEV", "Heavy")];
const REFERENCE_LEVEL: CodeTable = &[("0", "0dB"), ("5", "+5dB"), ("10", "+10dB"), ("15", "+15dB")];
const DIRAC_FILTER: CodeTable = &[("1", "Slot 1"), ("2", "Slot 2"), ("3", "Slot 3"), ("OFF", "Off")];

fn table(setting: Setting) -> CodeTable {
    match setting {
        Setting::Dimmer => DIMMER,
        Setting::EcoMode => ECO_MODE,
        Setting::MonitorOutput => MONITOR_OUTPUT,
        Setting::SpeakerPreset => SPEAKER_PRESET,
        Setting::DynamicVolume => DYNAMIC_VOLUME,
        Setting::ReferenceLevelOffset => REFERENCE_LEVEL,
        Setting::DiracFilter => DIRAC_FILTER,
    }
}

pub fn setting_label(setting: Setting, code: &str) -> Option<&'static str> {
    let code = code.trim();
    table(setting)
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .map(|(_, label)| *label)
}

/// Command setting a receiver option, `None` for an unknown option label.
pub fn setting_command(setting: Setting, value: &str) -> Option<String> {
    let (code, _) = table(setting).iter().find(|(_, label)| *label == value)?;
    let command = match setting {
        Setting::Dimmer => format!("DIM {}", code),
        Setting::EcoMode => format!("ECO{}", code),
        Setting::MonitorOutput => format!("VSMONI{}", code),
        Setting::SpeakerPreset => format!("SPPR {}", code),
        Setting::DynamicVolume => format!("PSDYNVOL {}", code),
        Setting::ReferenceLevelOffset => format!("PSREFLEV {}", code),
        Setting::DiracFilter => format!("PSDIRAC {}", code),
    };
    Some(command)
}

/// Sound mode groups offered for selection.
pub const SOUND_MODE_LIST: &[&str] = &[
    "MUSIC",
    "MOVIE",
    "GAME",
    "AUTO",
    "DIRECT",
    "PURE DIRECT",
    "DOLBY DIGITAL",
    "DTS SURROUND",
    "AURO3D",
    "MCH STEREO",
    "STEREO",
    "VIRTUAL",
    "ALL ZONE STEREO",
];

const SOUND_MODE_ALIASES: &[(&str, &str)] = &[
    ("PLII MUSIC", "MUSIC"),
    ("PLIIX MUSIC", "MUSIC"),
    ("DOLBY PL2 MUSIC", "MUSIC"),
    ("DTS NEO:6 MUSIC", "MUSIC"),
    ("ROCK ARENA", "MUSIC"),
    ("JAZZ CLUB", "MUSIC"),
    ("CLASSIC CONCERT", "MUSIC"),
    ("PLII MOVIE", "MOVIE"),
    ("PLIIX MOVIE", "MOVIE"),
    ("DOLBY PL2 MOVIE", "MOVIE"),
    ("DTS NEO:6 CINEMA", "MOVIE"),
    ("MONO MOVIE", "MOVIE"),
    ("PLII GAME", "GAME"),
    ("DOLBY PL2 GAME", "GAME"),
    ("MULTI CH STEREO", "MCH STEREO"),
    ("MULTI CH IN", "MCH STEREO"),
    ("PURE_DIRECT", "PURE DIRECT"),
];

/// Map a raw `MS` parameter to its sound mode group.
pub fn match_sound_mode(raw: &str) -> String {
    let raw = raw.trim().to_ascii_uppercase();
    if SOUND_MODE_LIST.contains(&raw.as_str()) {
        return raw;
    }
    if let Some((_, group)) = SOUND_MODE_ALIASES.iter().find(|(alias, _)| *alias == raw) {
        return group.to_string();
    }
    if raw.starts_with("DOLBY") {
        return "DOLBY DIGITAL".to_string();
    }
    if raw.starts_with("DTS") {
        return "DTS SURROUND".to_string();
    }
    raw
}

/// Input as listed by the receiver: protocol code and display name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputSource {
    pub code: String,
    pub name: String,
}

impl InputSource {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
        }
    }
}

pub fn input_name(sources: &[InputSource], code: &str) -> String {
    sources
        .iter()
        .find(|s| s.code.eq_ignore_ascii_case(code))
        .map(|s| s.name.clone())
        .unwrap_or_else(|| code.to_string())
}

/// Protocol code of an input, looked up by display name or code.
pub fn input_code<'a>(sources: &'a [InputSource], source: &str) -> Option<&'a str> {
    sources
        .iter()
        .find(|s| s.name == source || s.code == source)
        .map(|s| s.code.as_str())
}

fn power_state(power: &str) -> &'static str {
    if power == "ON" {
        "on"
    } else {
        "off"
    }
}

fn display_text(text: &str) -> Option<String> {
    let text = text.trim_matches(|c: char| c.is_control() || c.is_whitespace());
    (!text.is_empty()).then(|| text.to_string())
}

/// Fold a main zone status line into the cached receiver state.
///
/// Returns `false` for events that carry nothing the cache tracks.
pub fn apply_event(snapshot: &mut ReceiverSnapshot, sources: &[InputSource], event: &RawEvent) -> bool {
    if event.zone != MAIN_ZONE {
        return false;
    }
    let parameter = event.parameter.as_str();
    let settings = &mut snapshot.settings;

    match event.event.as_str() {
        "PW" | "ZM" => {
            let power = match parameter {
                "ON" => "ON",
                "STANDBY" => "STANDBY",
                "OFF" => "OFF",
                _ => return false,
            };
            snapshot.power = Some(power.to_string());
            snapshot.state = Some(power_state(power).to_string());
        }
        "MV" => match parse_volume(parameter) {
            Some(volume_db) => snapshot.volume_db = Some(volume_db),
            None => return false,
        },
        "MU" => snapshot.muted = parameter == "ON",
        "SI" => snapshot.input_func = Some(input_name(sources, parameter)),
        "MS" => snapshot.sound_mode = Some(match_sound_mode(parameter)),
        "DIM" => settings.dimmer = setting_label(Setting::Dimmer, parameter).map(String::from),
        "ECO" => settings.eco_mode = setting_label(Setting::EcoMode, parameter).map(String::from),
        "SLP" => {
            settings.sleep_timer = match parameter.trim() {
                "OFF" => Some(0),
                minutes => minutes.parse().ok(),
            }
        }
        "VS" => match parameter.strip_prefix("MONI") {
            Some(code) => {
                settings.monitor_output = setting_label(Setting::MonitorOutput, code).map(String::from)
            }
            None => return false,
        },
        "SP" => match parameter.strip_prefix("PR") {
            Some(code) => {
                settings.speaker_preset = setting_label(Setting::SpeakerPreset, code).map(String::from)
            }
            None => return false,
        },
        "PS" => {
            if let Some(code) = parameter.strip_prefix("DYNVOL") {
                settings.dynamic_volume = setting_label(Setting::DynamicVolume, code).map(String::from);
            } else if let Some(code) = parameter.strip_prefix("REFLEV") {
                settings.reference_level_offset =
                    setting_label(Setting::ReferenceLevelOffset, code).map(String::from);
            } else if let Some(code) = parameter.strip_prefix("DIRAC") {
                settings.dirac_filter = setting_label(Setting::DiracFilter, code).map(String::from);
            } else if let Some(delay) = parameter.strip_prefix("DELAY") {
                settings.audio_delay = delay.trim().parse().ok();
            } else {
                return false;
            }
        }
        "NSE" => {
            let mut chars = parameter.chars();
            let index = chars.next().and_then(|c| c.to_digit(10));
            let text = display_text(chars.as_str());
            match index {
                Some(1) => snapshot.title = text,
                Some(2) => snapshot.artist = text,
                Some(4) => snapshot.album = text,
                _ => return false,
            }
        }
        _ => return false,
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        let cases = [
            ("PWON\r", Some(("Main", "PW", "ON"))),
            ("MV505", Some(("Main", "MV", "505"))),
            ("MVMAX 98", Some(("Main", "MV", "MAX 98"))),
            ("NSE1Song title", Some(("Main", "NSE", "1Song title"))),
            ("NSA0", Some(("Main", "NSA", "0"))),
            ("DIM BRI", Some(("Main", "DIM", " BRI"))),
            ("PSDYNVOL LIT", Some(("Main", "PS", "DYNVOL LIT"))),
            ("Z2ON", Some(("Zone2", "Z2", "ON"))),
            ("Z355", Some(("Zone3", "Z3", "55"))),
            ("XYZ", None),
            ("", None),
        ];

        for (line, expected) in cases {
            let expected = expected.map(|(zone, event, parameter)| RawEvent::new(zone, event, parameter));
            assert_eq!(parse_line(line), expected, "line {:?}", line);
        }
    }

    #[test]
    fn test_volume_codec() {
        assert_eq!(parse_volume("50"), Some(-30.0));
        assert_eq!(parse_volume("505"), Some(-29.5));
        assert_eq!(parse_volume("05"), Some(-75.0));
        assert_eq!(parse_volume("99"), Some(18.0));
        assert_eq!(parse_volume("MAX 98"), None);
        assert_eq!(parse_volume(""), None);

        assert_eq!(volume_command(-30.0), "MV50");
        assert_eq!(volume_command(-29.5), "MV505");
        assert_eq!(volume_command(-29.7), "MV505");
        assert_eq!(volume_command(-75.0), "MV05");
        assert_eq!(volume_command(-100.0), "MV00");
        assert_eq!(volume_command(25.0), "MV98");
    }

    #[test]
    fn test_setting_commands() {
        assert_eq!(setting_command(Setting::Dimmer, "Dark").as_deref(), Some("DIM DAR"));
        assert_eq!(setting_command(Setting::EcoMode, "Auto").as_deref(), Some("ECOAUTO"));
        assert_eq!(setting_command(Setting::MonitorOutput, "Monitor 2").as_deref(), Some("VSMONI2"));
        assert_eq!(setting_command(Setting::SpeakerPreset, "1").as_deref(), Some("SPPR 1"));
        assert_eq!(setting_command(Setting::DynamicVolume, "Heavy").as_deref(), Some("PSDYNVOL HEV"));
        assert_eq!(setting_command(Setting::ReferenceLevelOffset, "+10dB").as_deref(), Some("PSREFLEV 10"));
        assert_eq!(setting_command(Setting::DiracFilter, "Off").as_deref(), Some("PSDIRAC OFF"));
        assert_eq!(setting_command(Setting::Dimmer, "Blinding"), None);
    }

    #[test]
    fn test_match_sound_mode() {
        assert_eq!(match_sound_mode("STEREO"), "STEREO");
        assert_eq!(match_sound_mode("pure direct"), "PURE DIRECT");
        assert_eq!(match_sound_mode("DOLBY ATMOS"), "DOLBY DIGITAL");
        assert_eq!(match_sound_mode("DTS:X"), "DTS SURROUND");
        assert_eq!(match_sound_mode("MULTI CH STEREO"), "MCH STEREO");
        assert_eq!(match_sound_mode("NEURAL:X"), "NEURAL:X");
    }

    #[test]
    fn test_apply_event() {
        let sources = vec![InputSource::new("SAT/CBL", "Cable Box")];
        let mut snapshot = ReceiverSnapshot::default();

        let lines = [
            "PWSTANDBY",
            "MV455",
            "MUON",
            "SISAT/CBL",
            "MSDOLBY SURROUND",
            "DIM DIM",
            "ECOAUTO",
            "SLP060",
            "VSMONI1",
            "SPPR 2",
            "PSDYNVOL MED",
            "PSREFLEV 5",
            "PSDIRAC 3",
            "PSDELAY 030",
            "NSE1\u{1}Blue in Green",
            "NSE2Miles Davis",
            "NSE4Kind of Blue",
        ];
        for line in lines {
            let event = parse_line(line).unwrap();
            assert!(apply_event(&mut snapshot, &sources, &event), "line {:?}", line);
        }

        assert_eq!(snapshot.power.as_deref(), Some("STANDBY"));
        assert_eq!(snapshot.state.as_deref(), Some("off"));
        assert_eq!(snapshot.volume_db, Some(-34.5));
        assert!(snapshot.muted);
        assert_eq!(snapshot.input_func.as_deref(), Some("Cable Box"));
        assert_eq!(snapshot.sound_mode.as_deref(), Some("DOLBY DIGITAL"));
        assert_eq!(snapshot.title.as_deref(), Some("Blue in Green"));
        assert_eq!(snapshot.artist.as_deref(), Some("Miles Davis"));
        assert_eq!(snapshot.album.as_deref(), Some("Kind of Blue"));

        let settings = &snapshot.settings;
        assert_eq!(settings.dimmer.as_deref(), Some("Dim"));
        assert_eq!(settings.eco_mode.as_deref(), Some("Auto"));
        assert_eq!(settings.sleep_timer, Some(60));
        assert_eq!(settings.monitor_output.as_deref(), Some("Monitor 1"));
        assert_eq!(settings.speaker_preset.as_deref(), Some("2"));
        assert_eq!(settings.dynamic_volume.as_deref(), Some("Medium"));
        assert_eq!(settings.reference_level_offset.as_deref(), Some("+5dB"));
        assert_eq!(settings.dirac_filter.as_deref(), Some("Slot 3"));
        assert_eq!(settings.audio_delay, Some(30));
    }

    #[test]
    fn test_apply_event_ignores_other_zones_and_unknown_lines() {
        let mut snapshot = ReceiverSnapshot::default();
        for line in ["Z2ON", "MVMAX 98", "PSMULTEQ:AUDYSSEY", "NSA1Item", "SSINFAISFSV 441"] {
            let event = parse_line(line).unwrap();
            assert!(!apply_event(&mut snapshot, &[], &event), "line {:?}", line);
        }
        assert_eq!(snapshot, ReceiverSnapshot::default());

        let event = parse_line("SLPOFF").unwrap();
        assert!(apply_event(&mut snapshot, &[], &event));
        assert_eq!(snapshot.settings.sleep_timer, Some(0));
    }
}
