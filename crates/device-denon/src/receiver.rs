use crate::http::{DenonHttp, MainZoneStatus};
use crate::protocol::{
    apply_event, input_code, parse_line, setting_command, volume_command, InputSource, SOUND_MODE_LIST,
};
use crate::telnet::{TelnetConnection, TELNET_PORT};
use async_trait::async_trait;
use avr_core::{
    DeviceConfig, EventSink, ReceiverControl, ReceiverError, ReceiverFactory, ReceiverInfo, ReceiverSnapshot,
    Setting,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Inputs assumed when the receiver does not list its own
const DEFAULT_SOURCES: &[(&str, &str)] = &[
    ("CD", "CD"),
    ("DVD", "DVD"),
    ("BD", "Blu-ray"),
    ("TV", "TV Audio"),
    ("SAT/CBL", "CBL/SAT"),
    ("MPLAY", "Media Player"),
    ("GAME", "Game"),
    ("AUX1", "AUX"),
    ("NET", "Online Music"),
    ("TUNER", "Tuner"),
    ("PHONO", "Phono"),
    ("BT", "Bluetooth"),
    ("USB/IPOD", "iPod/USB"),
];

/// Inputs with now playing information
const NET_SOURCES: &[&str] = &[
    "NET", "NETHOME", "SERVER", "IRADIO", "IRP", "FVP", "USB/IPOD", "USB", "IPD", "BT", "SPOTIFY", "PANDORA",
    "SIRIUSXM", "FLICKR", "NAPSTER", "LASTFM",
];

const STATUS_QUERIES: &[&str] = &[
    "PW?",
    "ZM?",
    "MV?",
    "MU?",
    "SI?",
    "MS?",
    "DIM ?",
    "ECO?",
    "SLP?",
    "VSMONI ?",
    "SPPR ?",
    "PSDYNVOL ?",
    "PSREFLEV ?",
    "PSDELAY ?",
    "PSDIRAC ?",
];

const AUDYSSEY_QUERIES: &[&str] = &["PSMULTEQ: ?", "PSDYNEQ ?"];

#[derive(Default)]
struct Cache {
    snapshot: ReceiverSnapshot,
    sources: Vec<InputSource>,
}

fn handle_line(cache: &Mutex<Cache>, sink: &Mutex<Option<EventSink>>, line: &str) {
    let Some(event) = parse_line(line) else {
        trace!("Ignoring Telnet line {}", line);
        return;
    };

    {
        let mut cache = cache.lock();
        let Cache { snapshot, sources } = &mut *cache;
        apply_event(snapshot, sources, &event);
    }

    if let Some(sink) = sink.lock().as_ref() {
        // A closed sink means the session is gone; nothing to deliver to
        let _ = sink.send(event);
    }
}

/// Denon/Marantz receiver controlled over HTTP, with Telnet for push events.
pub struct DenonReceiver {
    config: DeviceConfig,
    timeout: Duration,
    telnet_port: u16,
    http: DenonHttp,
    info: Mutex<ReceiverInfo>,
    cache: Arc<Mutex<Cache>>,
    sink: Arc<Mutex<Option<EventSink>>>,
    telnet: Mutex<Option<Arc<TelnetConnection>>>,
}

impl DenonReceiver {
    pub fn new(config: DeviceConfig, timeout: Duration) -> Self {
        let info = ReceiverInfo {
            host: config.address.clone(),
            name: Some(config.name.clone()),
            ..Default::default()
        };

        Self {
            http: DenonHttp::new(config.address.clone(), timeout),
            config,
            timeout,
            telnet_port: TELNET_PORT,
            info: Mutex::new(info),
            cache: Arc::new(Mutex::new(Cache::default())),
            sink: Arc::new(Mutex::new(None)),
            telnet: Mutex::new(None),
        }
    }

    #[cfg(test)]
    fn with_telnet_port(mut self, port: u16) -> Self {
        self.telnet_port = port;
        self
    }

    /// Telnet host: the configured address without an HTTP port
    fn telnet_host(&self) -> &str {
        let address = self.config.address.as_str();
        match address.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => host,
            _ => address,
        }
    }

    fn telnet_connection(&self) -> Option<Arc<TelnetConnection>> {
        self.telnet.lock().as_ref().filter(|t| t.is_connected()).cloned()
    }

    fn apply_status(&self, status: MainZoneStatus) {
        let mut cache = self.cache.lock();

        if !status.sources.is_empty() {
            cache.sources = status.sources;
        } else if cache.sources.is_empty() {
            cache.sources = DEFAULT_SOURCES
                .iter()
                .map(|(code, name)| InputSource::new(*code, *name))
                .collect();
        }
        let input_func_list: Vec<String> = cache.sources.iter().map(|s| s.name.clone()).collect();

        let snapshot = &mut cache.snapshot;
        snapshot.input_func_list = input_func_list;
        // Receivers without surround modes leave out selectSurround
        if status.sound_mode.is_some() {
            snapshot.sound_mode_list = SOUND_MODE_LIST.iter().map(|m| m.to_string()).collect();
            snapshot.sound_mode = status.sound_mode;
        }
        if let Some(power) = status.power {
            snapshot.state = Some(if power == "ON" { "on" } else { "off" }.to_string());
            snapshot.power = Some(power);
        }
        if status.input_func.is_some() {
            snapshot.input_func = status.input_func;
        }
        if status.volume_db.is_some() {
            snapshot.volume_db = status.volume_db;
        }
        if let Some(muted) = status.muted {
            snapshot.muted = muted;
        }
        if status.eco_mode.is_some() {
            snapshot.settings.eco_mode = status.eco_mode;
        }
    }

    fn is_net_source(&self) -> bool {
        let cache = self.cache.lock();
        let Some(input) = cache.snapshot.input_func.as_deref() else {
            return false;
        };
        let code = input_code(&cache.sources, input).unwrap_or(input);
        NET_SOURCES.iter().any(|s| s.eq_ignore_ascii_case(code))
    }

    /// Media metadata and playback state of network audio inputs.
    ///
    /// Other inputs report no playback state, the receiver is just `on`.
    async fn update_now_playing(&self) {
        let powered = self.cache.lock().snapshot.power.as_deref() == Some("ON");
        let net_source = powered && self.is_net_source();

        if !net_source {
            let mut cache = self.cache.lock();
            let snapshot = &mut cache.snapshot;
            snapshot.title = None;
            snapshot.artist = None;
            snapshot.album = None;
            snapshot.image_url = None;
            if powered {
                snapshot.state = Some("on".to_string());
            }
            return;
        }

        match self.http.now_playing().await {
            Ok(now_playing) => {
                let image_url = self.http.artwork_url(&now_playing);
                let mut cache = self.cache.lock();
                let snapshot = &mut cache.snapshot;
                let state = if now_playing.title.is_some() { "playing" } else { "paused" };
                snapshot.state = Some(state.to_string());
                snapshot.image_url = now_playing.title.is_some().then_some(image_url);
                snapshot.title = now_playing.title;
                snapshot.artist = now_playing.artist;
                snapshot.album = now_playing.album;
            }
            Err(e) => debug!("[{}] Cannot read now playing: {}", self.config.id, e),
        }
    }

    async fn query(&self, connection: &TelnetConnection, queries: &[&str]) {
        for query in queries {
            if let Err(e) = connection.send(query).await {
                warn!("[{}] Telnet query {} failed: {}", self.config.id, query, e);
                return;
            }
        }
    }

    /// Send a command over Telnet when connected, HTTP otherwise.
    async fn send(&self, command: &str) -> Result<(), ReceiverError> {
        if let Some(connection) = self.telnet_connection() {
            // The receiver echoes the new state over Telnet
            return connection.send(command).await;
        }

        self.http.send_command(command).await?;
        if let Some(event) = parse_line(command) {
            let mut cache = self.cache.lock();
            let Cache { snapshot, sources } = &mut *cache;
            apply_event(snapshot, sources, &event);
        }
        Ok(())
    }
}

#[async_trait]
impl ReceiverControl for DenonReceiver {
    async fn setup(&self) -> Result<(), ReceiverError> {
        let description = match self.http.description().await {
            Ok(description) => Some(description),
            Err(e) => {
                warn!("[{}] No device description from {}: {}", self.config.id, self.config.address, e);
                None
            }
        };

        let status = self.http.main_zone_status(self.config.show_all_inputs).await?;

        let description = description.unwrap_or_default();
        let info = ReceiverInfo {
            host: self.config.address.clone(),
            name: status.friendly_name.clone().or(description.friendly_name),
            manufacturer: description.manufacturer,
            model_name: description
                .model_name
                .map(|m| m.trim_start_matches('*').trim().to_string()),
            serial_number: description.serial_number,
        };
        debug!("[{}] Receiver identity: {:?}", self.config.id, info);
        *self.info.lock() = info;

        self.apply_status(status);
        Ok(())
    }

    /// Refresh the cache. With Telnet the main zone state follows the push
    /// stream, so only the now playing data is read.
    ///
    /// This runs for every push event and must not send Telnet queries: their
    /// replies are push events themselves.
    async fn update(&self) -> Result<(), ReceiverError> {
        if self.telnet_connection().is_none() {
            let status = self.http.main_zone_status(self.config.show_all_inputs).await?;
            self.apply_status(status);
        }

        self.update_now_playing().await;
        Ok(())
    }

    async fn telnet_connect(&self) -> Result<(), ReceiverError> {
        let cache = Arc::clone(&self.cache);
        let sink = Arc::clone(&self.sink);
        let connection = TelnetConnection::connect(self.telnet_host(), self.telnet_port, self.timeout, move |line| {
            handle_line(&cache, &sink, line)
        })
        .await?;
        let connection = Arc::new(connection);

        if let Some(previous) = self.telnet.lock().replace(Arc::clone(&connection)) {
            debug!("[{}] Replacing previous Telnet connection", self.config.id);
            drop(previous);
        }

        self.query(&connection, STATUS_QUERIES).await;
        let zones: Vec<&str> = [(self.config.zone2, "Z2?"), (self.config.zone3, "Z3?")]
            .into_iter()
            .filter_map(|(enabled, query)| enabled.then_some(query))
            .collect();
        self.query(&connection, &zones).await;
        if self.config.update_audyssey {
            self.query(&connection, AUDYSSEY_QUERIES).await;
        }
        Ok(())
    }

    async fn telnet_disconnect(&self) -> Result<(), ReceiverError> {
        let connection = self.telnet.lock().take();
        if let Some(connection) = connection {
            connection.close().await;
        }
        Ok(())
    }

    fn telnet_connected(&self) -> bool {
        self.telnet_connection().is_some()
    }

    fn set_event_sink(&self, sink: Option<EventSink>) {
        *self.sink.lock() = sink;
    }

    fn info(&self) -> ReceiverInfo {
        self.info.lock().clone()
    }

    fn snapshot(&self) -> ReceiverSnapshot {
        self.cache.lock().snapshot.clone()
    }

    async fn power_on(&self) -> Result<(), ReceiverError> {
        self.send("ZMON").await
    }

    async fn power_off(&self) -> Result<(), ReceiverError> {
        self.send("ZMOFF").await
    }

    async fn volume_up(&self) -> Result<(), ReceiverError> {
        self.send("MVUP").await
    }

    async fn volume_down(&self) -> Result<(), ReceiverError> {
        self.send("MVDOWN").await
    }

    async fn set_volume(&self, volume_db: f64) -> Result<(), ReceiverError> {
        self.send(&volume_command(volume_db)).await
    }

    async fn mute(&self, muted: bool) -> Result<(), ReceiverError> {
        self.send(if muted { "MUON" } else { "MUOFF" }).await
    }

    async fn set_input(&self, source: &str) -> Result<(), ReceiverError> {
        let code = {
            let cache = self.cache.lock();
            input_code(&cache.sources, source).map(str::to_string)
        };
        match code {
            Some(code) => self.send(&format!("SI{}", code)).await,
            None => Err(ReceiverError::InvalidInput(source.to_string())),
        }
    }

    async fn set_sound_mode(&self, mode: &str) -> Result<(), ReceiverError> {
        if !SOUND_MODE_LIST.contains(&mode) {
            return Err(ReceiverError::Command(format!("Unknown sound mode {}", mode)));
        }
        self.send(&format!("MS{}", mode)).await
    }

    async fn toggle_play_pause(&self) -> Result<(), ReceiverError> {
        self.send("NS94").await
    }

    async fn next_track(&self) -> Result<(), ReceiverError> {
        self.send("NS9D").await
    }

    async fn previous_track(&self) -> Result<(), ReceiverError> {
        self.send("NS9E").await
    }

    async fn set_setting(&self, setting: Setting, value: &str) -> Result<(), ReceiverError> {
        match setting_command(setting, value) {
            Some(command) => self.send(&command).await,
            None => Err(ReceiverError::Command(format!("Unsupported {:?} value {}", setting, value))),
        }
    }

    async fn send_command(&self, command: &str) -> Result<(), ReceiverError> {
        self.send(command).await
    }
}

/// Creates a fresh [`DenonReceiver`] for every connection attempt.
pub struct DenonReceiverFactory {
    timeout: Duration,
}

impl DenonReceiverFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for DenonReceiverFactory {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl ReceiverFactory for DenonReceiverFactory {
    fn create(&self, config: &DeviceConfig) -> Arc<dyn ReceiverControl> {
        Arc::new(DenonReceiver::new(config.clone(), self.timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use avr_core::{AvrState, DeviceSession, RawEvent};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    const STATUS: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<item>
<FriendlyName><value>Living Room</value></FriendlyName>
<Power><value>ON</value></Power>
<InputFuncList><value>CD</value><value>NET</value></InputFuncList>
<RenameSource><value>Compact Disc</value><value></value></RenameSource>
<SourceDelete><value>USE</value><value>USE</value></SourceDelete>
<InputFuncSelect><value>CD</value></InputFuncSelect>
<selectSurround><value>STEREO</value></selectSurround>
<MasterVolume><value>-40.0</value></MasterVolume>
<Mute><value>off</value></Mute>
</item>"#;

    const NET_PLAYING: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<item>
<Power><value>ON</value></Power>
<InputFuncList><value>CD</value><value>NET</value></InputFuncList>
<RenameSource><value></value><value></value></RenameSource>
<SourceDelete><value>USE</value><value>USE</value></SourceDelete>
<InputFuncSelect><value>NET</value></InputFuncSelect>
<MasterVolume><value>-40.0</value></MasterVolume>
<szLine><value>Now Playing</value><value>So What</value><value>Miles Davis</value><value></value><value>Kind of Blue</value></szLine>
</item>"#;

    const NET_IDLE: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<item>
<Power><value>ON</value></Power>
<InputFuncList><value>CD</value><value>NET</value></InputFuncList>
<RenameSource><value></value><value></value></RenameSource>
<SourceDelete><value>USE</value><value>USE</value></SourceDelete>
<InputFuncSelect><value>NET</value></InputFuncSelect>
</item>"#;

    /// Minimal HTTP server answering every request with `body`, recording request lines.
    async fn serve_http(body: &'static str) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    let request = String::from_utf8_lossy(&request);
                    let _ = tx.send(request.lines().next().unwrap_or_default().to_string());

                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });

        (addr, rx)
    }

    fn receiver(address: &str) -> DenonReceiver {
        let mut config = DeviceConfig::new("AVR123", "Living room", address);
        config.use_telnet = false;
        DenonReceiver::new(config, Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_setup_reads_status_over_http() {
        let (addr, _requests) = serve_http(STATUS).await;
        let receiver = receiver(&addr);

        receiver.setup().await.unwrap();

        let info = receiver.info();
        assert_eq!(info.name.as_deref(), Some("Living Room"));
        assert_eq!(info.serial_number, None);

        let snapshot = receiver.snapshot();
        assert_eq!(snapshot.power.as_deref(), Some("ON"));
        assert_eq!(snapshot.state.as_deref(), Some("on"));
        assert_eq!(snapshot.volume_db, Some(-40.0));
        assert_eq!(snapshot.input_func.as_deref(), Some("Compact Disc"));
        assert_eq!(snapshot.input_func_list, vec!["Compact Disc", "NET"]);
        assert_eq!(snapshot.sound_mode.as_deref(), Some("STEREO"));
        assert!(snapshot.sound_mode_list.contains(&"MOVIE".to_string()));
        // CD has no now playing data
        assert_eq!(snapshot.title, None);
    }

    #[tokio::test]
    async fn test_net_source_playback_state() {
        let (addr, _requests) = serve_http(NET_PLAYING).await;
        let playing = receiver(&addr);
        playing.setup().await.unwrap();
        assert_eq!(playing.snapshot().state.as_deref(), Some("on"));

        playing.update().await.unwrap();
        let snapshot = playing.snapshot();
        assert_eq!(snapshot.state.as_deref(), Some("playing"));
        assert_eq!(snapshot.title.as_deref(), Some("So What"));
        assert_eq!(snapshot.artist.as_deref(), Some("Miles Davis"));
        assert_eq!(AvrState::from_snapshot(&snapshot), AvrState::Playing);

        let (idle_addr, _idle_requests) = serve_http(NET_IDLE).await;
        let idle = receiver(&idle_addr);
        idle.setup().await.unwrap();
        idle.update().await.unwrap();
        let snapshot = idle.snapshot();
        assert_eq!(snapshot.state.as_deref(), Some("paused"));
        assert_eq!(snapshot.title, None);
        assert_eq!(AvrState::from_snapshot(&snapshot), AvrState::Paused);
    }

    #[tokio::test]
    async fn test_no_sound_modes_without_surround_status() {
        let (addr, _requests) = serve_http(NET_IDLE).await;
        let receiver = receiver(&addr);
        receiver.setup().await.unwrap();

        let snapshot = receiver.snapshot();
        assert_eq!(snapshot.sound_mode, None);
        assert!(snapshot.sound_mode_list.is_empty());
    }

    #[tokio::test]
    async fn test_http_commands_update_cache() {
        let (addr, mut requests) = serve_http(STATUS).await;
        let receiver = receiver(&addr);
        receiver.setup().await.unwrap();
        while requests.try_recv().is_ok() {}

        receiver.set_volume(-29.5).await.unwrap();
        receiver.set_input("NET").await.unwrap();
        receiver.set_setting(Setting::Dimmer, "Dim").await.unwrap();

        assert_eq!(
            requests.recv().await.unwrap(),
            "GET /goform/formiPhoneAppDirect.xml?MV505 HTTP/1.1"
        );
        assert_eq!(
            requests.recv().await.unwrap(),
            "GET /goform/formiPhoneAppDirect.xml?SINET HTTP/1.1"
        );
        assert_eq!(
            requests.recv().await.unwrap(),
            "GET /goform/formiPhoneAppDirect.xml?DIM%20DIM HTTP/1.1"
        );

        let snapshot = receiver.snapshot();
        assert_eq!(snapshot.volume_db, Some(-29.5));
        assert_eq!(snapshot.input_func.as_deref(), Some("NET"));
        assert_eq!(snapshot.settings.dimmer.as_deref(), Some("Dim"));
    }

    #[tokio::test]
    async fn test_invalid_input_and_options() {
        let (addr, _requests) = serve_http(STATUS).await;
        let receiver = receiver(&addr);
        receiver.setup().await.unwrap();

        let err = receiver.set_input("Turntable").await.unwrap_err();
        assert_eq!(err.to_string(), "No mapping for input source Turntable");
        assert!(matches!(
            receiver.set_sound_mode("LOUD").await,
            Err(ReceiverError::Command(_))
        ));
        assert!(matches!(
            receiver.set_setting(Setting::EcoMode, "Turbo").await,
            Err(ReceiverError::Command(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_receiver() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let receiver = receiver(&addr);
        assert!(matches!(receiver.setup().await, Err(ReceiverError::Network(_))));
        assert!(matches!(receiver.power_on().await, Err(ReceiverError::Network(_))));
    }

    #[tokio::test]
    async fn test_telnet_events_reach_cache_and_sink() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (queries_tx, mut queries) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            write_half.write_all(b"PWON\rMV455\rSLP030\r").await.unwrap();

            let mut reader = tokio::io::BufReader::new(read_half);
            let mut line = Vec::new();
            while tokio::io::AsyncBufReadExt::read_until(&mut reader, b'\r', &mut line)
                .await
                .unwrap_or(0)
                > 0
            {
                let _ = queries_tx.send(String::from_utf8_lossy(&line).trim_end().to_string());
                line.clear();
            }
        });

        let receiver = receiver("127.0.0.1").with_telnet_port(port);
        let (tx, mut rx) = mpsc::unbounded_channel();
        receiver.set_event_sink(Some(tx));

        receiver.telnet_connect().await.unwrap();
        assert!(receiver.telnet_connected());

        assert_eq!(rx.recv().await, Some(RawEvent::new("Main", "PW", "ON")));
        assert_eq!(rx.recv().await, Some(RawEvent::new("Main", "MV", "455")));
        assert_eq!(rx.recv().await, Some(RawEvent::new("Main", "SLP", "030")));

        let snapshot = receiver.snapshot();
        assert_eq!(snapshot.power.as_deref(), Some("ON"));
        assert_eq!(snapshot.volume_db, Some(-34.5));
        assert_eq!(snapshot.settings.sleep_timer, Some(30));

        assert_eq!(queries.recv().await.as_deref(), Some("PW?"));

        // Commands go over Telnet while it is connected
        receiver.mute(true).await.unwrap();
        let mut sent = Vec::new();
        while let Some(query) = queries.recv().await {
            sent.push(query.clone());
            if query == "MUON" {
                break;
            }
        }
        assert!(sent.contains(&"PSDIRAC ?".to_string()));

        receiver.telnet_disconnect().await.unwrap();
        assert!(!receiver.telnet_connected());
    }

    struct LoopbackFactory {
        telnet_port: u16,
    }

    impl ReceiverFactory for LoopbackFactory {
        fn create(&self, config: &DeviceConfig) -> Arc<dyn ReceiverControl> {
            Arc::new(DenonReceiver::new(config.clone(), Duration::from_secs(2)).with_telnet_port(self.telnet_port))
        }
    }

    #[tokio::test]
    async fn test_audyssey_replies_do_not_trigger_queries() {
        let (addr, _requests) = serve_http(STATUS).await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let telnet_port = listener.local_addr().unwrap().port();
        let dyneq_queries = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&dyneq_queries);
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            let mut reader = tokio::io::BufReader::new(read_half);
            let mut line = Vec::new();
            while tokio::io::AsyncBufReadExt::read_until(&mut reader, b'\r', &mut line)
                .await
                .unwrap_or(0)
                > 0
            {
                let reply: &[u8] = match String::from_utf8_lossy(&line).trim_end() {
                    "PSDYNEQ ?" => {
                        counter.fetch_add(1, Ordering::SeqCst);
                        b"PSDYNEQ ON\r"
                    }
                    "PSMULTEQ: ?" => b"PSMULTEQ:AUDYSSEY\r",
                    "PW?" => b"PWON\r",
                    _ => b"",
                };
                if write_half.write_all(reply).await.is_err() {
                    return;
                }
                line.clear();
            }
        });

        let config = DeviceConfig {
            update_audyssey: true,
            ..DeviceConfig::new("AVR123", "Living room", &addr)
        };
        let session = DeviceSession::new(config, Arc::new(LoopbackFactory { telnet_port }));
        session.connect().await.unwrap();
        assert!(session.is_connected());

        for _ in 0..300 {
            if dyneq_queries.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(dyneq_queries.load(Ordering::SeqCst), 1);

        // The replies are handled as push events; none of them may query again
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(dyneq_queries.load(Ordering::SeqCst), 1);

        session.disconnect().await;
    }

    #[test]
    fn test_telnet_host_strips_http_port() {
        assert_eq!(receiver("192.168.1.20").telnet_host(), "192.168.1.20");
        assert_eq!(receiver("192.168.1.20:8080").telnet_host(), "192.168.1.20");
        assert_eq!(receiver("avr.local").telnet_host(), "avr.local");
    }
}
