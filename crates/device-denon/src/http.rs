/// HTTP access to the receiver's `goform` endpoints
use crate::description::{parse_description, DeviceDescription};
use crate::protocol::{input_name, match_sound_mode, setting_label, InputSource};
use avr_core::{ReceiverError, Setting};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Client, Url};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, trace, warn};

const MAIN_ZONE_STATUS: &str = "/goform/formMainZone_MainZoneXml.xml";
const NET_AUDIO_STATUS: &str = "/goform/formNetAudio_StatusXml.xml";
const COMMAND_ENDPOINT: &str = "/goform/formiPhoneAppDirect.xml";

/// Description locations, newer AVR-X models first
const DESCRIPTION_LOCATIONS: &[(u16, &str)] = &[
    (8080, "/description.xml"),
    (60006, "/upnp/desc/aios_device/aios_device.xml"),
    (80, "/description.xml"),
];

/// Main zone values read from `formMainZone_MainZoneXml.xml`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MainZoneStatus {
    pub friendly_name: Option<String>,
    pub power: Option<String>,
    pub input_func: Option<String>,
    /// Empty when the receiver does not list its inputs
    pub sources: Vec<InputSource>,
    pub volume_db: Option<f64>,
    pub muted: Option<bool>,
    pub sound_mode: Option<String>,
    pub eco_mode: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NowPlaying {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

pub struct DenonHttp {
    host: String,
    client: Client,
}

impl DenonHttp {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
            warn!("Cannot configure HTTP client, using defaults: {}", e);
            Client::new()
        });

        Self {
            host: host.into(),
            client,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    async fn get(&self, url: &str) -> Result<String, ReceiverError> {
        trace!("GET {}", url);

        let response = self.client.get(url).send().await.map_err(|e| classify(url, e))?;
        if !response.status().is_success() {
            return Err(ReceiverError::Protocol(format!(
                "{} returned status {}",
                url,
                response.status()
            )));
        }
        response.text().await.map_err(|e| classify(url, e))
    }

    /// Fetch the UPnP description, trying the known locations in turn.
    pub async fn description(&self) -> Result<DeviceDescription, ReceiverError> {
        let mut last_error = None;

        for (port, path) in DESCRIPTION_LOCATIONS {
            let url = format!("http://{}:{}{}", self.host, port, path);
            match self.get(&url).await {
                Ok(xml) => return parse_description(&xml),
                Err(e) => {
                    debug!("No description at {}: {}", url, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ReceiverError::Protocol(format!("No device description for {}", self.host))
        }))
    }

    pub async fn main_zone_status(&self, show_all_inputs: bool) -> Result<MainZoneStatus, ReceiverError> {
        let xml = self.get(&format!("http://{}{}", self.host, MAIN_ZONE_STATUS)).await?;
        parse_main_zone(&xml, show_all_inputs)
    }

    pub async fn now_playing(&self) -> Result<NowPlaying, ReceiverError> {
        let xml = self.get(&format!("http://{}{}", self.host, NET_AUDIO_STATUS)).await?;
        parse_now_playing(&xml)
    }

    /// Cover art of the current network audio track.
    ///
    /// The receiver serves it under a fixed path; the query changes with the
    /// track so that clients do not keep a stale image.
    pub fn artwork_url(&self, now_playing: &NowPlaying) -> String {
        use std::hash::{Hash, Hasher};

        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        now_playing.title.hash(&mut hasher);
        now_playing.artist.hash(&mut hasher);
        now_playing.album.hash(&mut hasher);
        format!("http://{}/NetAudio/art.asp-jpg?{:x}", self.host, hasher.finish())
    }

    /// Send a protocol command through `formiPhoneAppDirect.xml`.
    pub async fn send_command(&self, command: &str) -> Result<(), ReceiverError> {
        let base = format!("http://{}{}", self.host, COMMAND_ENDPOINT);
        let mut url = Url::parse(&base)
            .map_err(|e| ReceiverError::Network(format!("Invalid receiver address {}: {}", self.host, e)))?;
        url.set_query(Some(command));

        self.get(url.as_str()).await.map(|_| ())
    }
}

fn classify(url: &str, e: reqwest::Error) -> ReceiverError {
    if e.is_timeout() {
        ReceiverError::Timeout(format!("{}: {}", url, e))
    } else if e.is_connect() || e.is_request() {
        ReceiverError::Network(format!("{}: {}", url, e))
    } else {
        ReceiverError::Protocol(format!("{}: {}", url, e))
    }
}

/// Collect `<Element><value>..</value></Element>` lists by element name.
fn parse_values(xml: &str) -> Result<HashMap<String, Vec<String>>, ReceiverError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut values: HashMap<String, Vec<String>> = HashMap::new();
    let mut path: Vec<String> = Vec::new();
    let mut text: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name == "value" {
                    text = Some(String::new());
                }
                path.push(name);
            }
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"value" {
                    if let Some(parent) = path.last() {
                        values.entry(parent.clone()).or_default().push(String::new());
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(text) = text.as_mut() {
                    text.push_str(&e.unescape().unwrap_or_default());
                }
            }
            Ok(Event::End(_)) => {
                if path.pop().as_deref() == Some("value") {
                    if let (Some(parent), Some(value)) = (path.last(), text.take()) {
                        values.entry(parent.clone()).or_default().push(value);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ReceiverError::Protocol(format!(
                    "Invalid status XML at position {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
            _ => {}
        }
    }

    Ok(values)
}

fn first(values: &HashMap<String, Vec<String>>, key: &str) -> Option<String> {
    values
        .get(key)
        .and_then(|v| v.first())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn parse_main_zone(xml: &str, show_all_inputs: bool) -> Result<MainZoneStatus, ReceiverError> {
    let values = parse_values(xml)?;

    let codes = values.get("InputFuncList").cloned().unwrap_or_default();
    let renamed = values.get("RenameSource").cloned().unwrap_or_default();
    let deleted = values.get("SourceDelete").cloned().unwrap_or_default();

    let sources: Vec<InputSource> = codes
        .iter()
        .enumerate()
        .filter(|(i, _)| show_all_inputs || deleted.get(*i).map(|d| d.trim() != "DEL").unwrap_or(true))
        .map(|(i, code)| {
            let name = renamed
                .get(i)
                .map(|n| n.trim())
                .filter(|n| !n.is_empty())
                .unwrap_or(code.trim());
            InputSource::new(code.trim(), name)
        })
        .collect();

    let power = first(&values, "ZonePower").or_else(|| first(&values, "Power"));
    let input_func = first(&values, "InputFuncSelect").map(|code| input_name(&sources, &code));

    Ok(MainZoneStatus {
        friendly_name: first(&values, "FriendlyName"),
        power: power.map(|p| p.to_ascii_uppercase()),
        input_func,
        sources,
        volume_db: first(&values, "MasterVolume").and_then(|v| v.parse().ok()),
        muted: first(&values, "Mute").map(|m| m.eq_ignore_ascii_case("on")),
        sound_mode: first(&values, "selectSurround").map(|m| match_sound_mode(&m)),
        eco_mode: first(&values, "ECOMode")
            .and_then(|m| setting_label(Setting::EcoMode, &m))
            .map(String::from),
    })
}

pub fn parse_now_playing(xml: &str) -> Result<NowPlaying, ReceiverError> {
    let values = parse_values(xml)?;
    let lines = values.get("szLine").cloned().unwrap_or_default();
    let line = |index: usize| {
        lines
            .get(index)
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
    };

    Ok(NowPlaying {
        title: line(1),
        artist: line(2),
        album: line(4),
    })
}
