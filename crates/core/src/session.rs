//! Live connection to one receiver and its normalized state.
//!
//! The push-event pump runs as its own task next to `connect()`,
//! `disconnect()` and the command methods. Every path that awaits the
//! receiver re-checks afterwards that the same handle is still current.

use crate::error::{ReceiverError, StatusCode};
use crate::events::{DeviceUpdate, SessionEvent};
use crate::models::{AvrState, DeviceConfig, RawEvent, ReceiverInfo, ReceiverSettings, Setting};
use crate::traits::{ReceiverControl, ReceiverFactory};
use crate::volume::{percent_to_volume, volume_to_percent};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Normalized receiver state as seen by the entities.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionState {
    pub state: AvrState,
    /// Volume in percent, 0..100
    pub volume: f64,
    pub volume_db: Option<f64>,
    pub muted: bool,
    pub source: Option<String>,
    pub source_list: Vec<String>,
    pub sound_mode: Option<String>,
    pub sound_mode_list: Vec<String>,
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub artwork: Option<String>,
    pub settings: ReceiverSettings,
}

impl SessionState {
    fn unavailable() -> Self {
        Self {
            state: AvrState::Unavailable,
            ..Default::default()
        }
    }

    fn apply(&mut self, update: &DeviceUpdate) {
        if let Some(state) = update.state {
            self.state = state;
        }
        if let Some(volume) = update.volume {
            self.volume = volume;
        }
        if update.volume_db.is_some() {
            self.volume_db = update.volume_db;
        }
        if let Some(muted) = update.muted {
            self.muted = muted;
        }
        if update.source.is_some() {
            self.source = update.source.clone();
        }
        if let Some(list) = &update.source_list {
            self.source_list = list.clone();
        }
        if update.sound_mode.is_some() {
            self.sound_mode = update.sound_mode.clone();
        }
        if let Some(list) = &update.sound_mode_list {
            self.sound_mode_list = list.clone();
        }
        if update.artist.is_some() {
            self.artist = update.artist.clone();
        }
        if update.title.is_some() {
            self.title = update.title.clone();
        }
        if update.album.is_some() {
            self.album = update.album.clone();
        }
        if update.artwork.is_some() {
            self.artwork = update.artwork.clone();
        }
        if let Some(settings) = &update.settings {
            self.settings = settings.clone();
        }
    }

    /// All known values as one update.
    pub fn to_update(&self) -> DeviceUpdate {
        DeviceUpdate {
            state: Some(self.state),
            volume: Some(self.volume),
            volume_db: self.volume_db,
            muted: Some(self.muted),
            source: self.source.clone(),
            source_list: Some(self.source_list.clone()),
            sound_mode: self.sound_mode.clone(),
            sound_mode_list: Some(self.sound_mode_list.clone()),
            artist: self.artist.clone(),
            title: self.title.clone(),
            album: self.album.clone(),
            artwork: self.artwork.clone(),
            settings: Some(self.settings.clone()),
        }
    }
}

/// Set-once flag released on drop.
struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlagGuard(flag))
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn same_handle(a: &Arc<dyn ReceiverControl>, b: &Arc<dyn ReceiverControl>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Owns the connection to one receiver and publishes its state changes.
pub struct DeviceSession {
    id: String,
    config: Mutex<DeviceConfig>,
    factory: Arc<dyn ReceiverFactory>,
    handle: Mutex<Option<Arc<dyn ReceiverControl>>>,
    info: Mutex<ReceiverInfo>,
    state: Mutex<SessionState>,
    connecting: AtomicBool,
    getting_data: AtomicBool,
    /// Bumped by every `disconnect()`, under the handle lock
    disconnects: AtomicU64,
    events: broadcast::Sender<SessionEvent>,
    event_pump: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceSession {
    pub fn new(config: DeviceConfig, factory: Arc<dyn ReceiverFactory>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let info = ReceiverInfo {
            host: config.address.clone(),
            name: Some(config.name.clone()),
            ..Default::default()
        };

        Arc::new(Self {
            id: config.id.clone(),
            config: Mutex::new(config),
            factory,
            handle: Mutex::new(None),
            info: Mutex::new(info),
            state: Mutex::new(SessionState::unavailable()),
            connecting: AtomicBool::new(false),
            getting_data: AtomicBool::new(false),
            disconnects: AtomicU64::new(0),
            events,
            event_pump: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> DeviceConfig {
        self.config.lock().clone()
    }

    pub fn info(&self) -> ReceiverInfo {
        self.info.lock().clone()
    }

    pub fn state(&self) -> AvrState {
        self.state.lock().state
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Subscribe to the session's events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine, the entities will pick up the state later
        let _ = self.events.send(event);
    }

    fn current_handle(&self) -> Option<Arc<dyn ReceiverControl>> {
        self.handle.lock().clone()
    }

    fn is_current(&self, receiver: &Arc<dyn ReceiverControl>) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|current| same_handle(current, receiver))
    }

    fn publish(&self, update: DeviceUpdate) {
        self.state.lock().apply(&update);
        self.emit(SessionEvent::Update {
            device_id: self.id.clone(),
            update,
        });
    }

    /// Connect to the receiver and start listening for push events.
    ///
    /// Connecting an already connected session only refreshes its state.
    /// A failed attempt leaves the session disconnected and `Unavailable`.
    pub async fn connect(self: &Arc<Self>) -> Result<(), ReceiverError> {
        if self.is_connected() {
            debug!("[{}] Already connected, refreshing state", self.id);
            self.spawn_refresh();
            return Ok(());
        }

        let Some(_connecting) = FlagGuard::acquire(&self.connecting) else {
            debug!("[{}] Connection attempt already in progress", self.id);
            return Ok(());
        };

        let config = self.config();
        let disconnects = self.disconnects.load(Ordering::SeqCst);
        info!("[{}] Connecting to receiver at {}", self.id, config.address);

        let receiver = self.factory.create(&config);
        let initial = async {
            receiver.setup().await?;
            receiver.update().await
        };
        if let Err(e) = initial.await {
            error!("[{}] Cannot connect to receiver at {}: {}", self.id, config.address, e);
            *self.state.lock() = SessionState::unavailable();
            self.emit(SessionEvent::Error {
                device_id: self.id.clone(),
                message: e.to_string(),
            });
            return Err(e);
        }

        {
            let mut handle = self.handle.lock();
            if self.disconnects.load(Ordering::SeqCst) != disconnects {
                debug!("[{}] Disconnect requested while connecting, dropping receiver", self.id);
                return Ok(());
            }
            *handle = Some(Arc::clone(&receiver));
        }

        let info = receiver.info();
        info!(
            "[{}] Connected to {} {} ({}) at {}",
            self.id,
            info.manufacturer.as_deref().unwrap_or("unknown manufacturer"),
            info.model_name.as_deref().unwrap_or("unknown model"),
            info.serial_number.as_deref().unwrap_or("no serial"),
            info.host
        );
        *self.info.lock() = info.clone();

        if config.use_telnet {
            self.subscribe_events(&receiver).await;
        }

        if !self.is_current(&receiver) {
            // The Telnet connection may have opened after disconnect() closed it
            debug!("[{}] Disconnected while connecting", self.id);
            receiver.set_event_sink(None);
            if let Err(e) = receiver.telnet_disconnect().await {
                debug!("[{}] Ignoring Telnet close error: {}", self.id, e);
            }
            return Ok(());
        }

        let snapshot = receiver.snapshot();
        let state = AvrState::from_snapshot(&snapshot);
        {
            let mut current = SessionState::unavailable();
            current.apply(&DeviceUpdate::from_snapshot(state, &snapshot));
            *self.state.lock() = current;
        }

        match info.serial_number {
            Some(_) => self.emit(SessionEvent::Connected {
                device_id: self.id.clone(),
            }),
            None => error!(
                "[{}] Receiver at {} did not report a serial number",
                self.id,
                info.host
            ),
        }

        Ok(())
    }

    async fn subscribe_events(self: &Arc<Self>, receiver: &Arc<dyn ReceiverControl>) {
        let (tx, rx) = mpsc::unbounded_channel();
        receiver.set_event_sink(Some(tx));

        let pump = tokio::spawn(event_pump(Arc::downgrade(self), rx));
        if let Some(previous) = self.event_pump.lock().replace(pump) {
            previous.abort();
        }

        if let Err(e) = receiver.telnet_connect().await {
            warn!("[{}] Telnet connection failed, no push events: {}", self.id, e);
            return;
        }
        if let Err(e) = receiver.update().await {
            warn!("[{}] Update after Telnet connect failed: {}", self.id, e);
        }
    }

    /// Drop the connection. Publishes `Disconnected` once per live connection.
    pub async fn disconnect(&self) {
        let receiver = {
            let mut handle = self.handle.lock();
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            handle.take()
        };
        if let Some(pump) = self.event_pump.lock().take() {
            pump.abort();
        }
        *self.state.lock() = SessionState::unavailable();

        let Some(receiver) = receiver else {
            debug!("[{}] Not connected", self.id);
            return;
        };

        info!("[{}] Disconnecting", self.id);
        receiver.set_event_sink(None);
        if let Err(e) = receiver.telnet_disconnect().await {
            debug!("[{}] Ignoring Telnet close error: {}", self.id, e);
        }

        self.emit(SessionEvent::Disconnected {
            device_id: self.id.clone(),
        });
    }

    async fn on_push_event(self: &Arc<Self>, event: RawEvent) {
        let Some(receiver) = self.current_handle() else {
            trace!("[{}] Dropping event {:?}, not connected", self.id, event);
            return;
        };

        if let Err(e) = receiver.update().await {
            error!("[{}] Update after {} event failed: {}", self.id, event.event, e);
            return;
        }
        if !self.is_current(&receiver) {
            debug!("[{}] Disconnected during {} event", self.id, event.event);
            return;
        }

        trace!(
            "[{}] {} event {} {}",
            self.id,
            event.zone,
            event.event,
            event.parameter
        );

        match event.event.as_str() {
            "MV" => {
                if let Some(volume_db) = receiver.snapshot().volume_db {
                    self.publish(DeviceUpdate {
                        volume: Some(volume_to_percent(volume_db)),
                        volume_db: Some(volume_db),
                        ..Default::default()
                    });
                }
            }
            "PW" => match AvrState::from_power(&event.parameter) {
                Some(state) => self.publish(DeviceUpdate::with_state(state)),
                None => debug!("[{}] Unknown power parameter {}", self.id, event.parameter),
            },
            _ => self.spawn_refresh(),
        }
    }

    fn spawn_refresh(self: &Arc<Self>) {
        let session = Arc::clone(self);
        tokio::spawn(async move { session.refresh().await });
    }

    /// Full state refresh; a call while another one is running does nothing.
    pub async fn refresh(&self) {
        let Some(_getting_data) = FlagGuard::acquire(&self.getting_data) else {
            debug!("[{}] Refresh already in progress", self.id);
            return;
        };

        let Some(receiver) = self.current_handle() else {
            return;
        };

        if let Err(e) = receiver.update().await {
            error!("[{}] Refresh failed: {}", self.id, e);
            return;
        }
        if !self.is_current(&receiver) {
            debug!("[{}] Disconnected during refresh", self.id);
            return;
        }

        let snapshot = receiver.snapshot();
        let state = AvrState::from_snapshot(&snapshot);
        self.publish(DeviceUpdate::from_snapshot(state, &snapshot));
    }

    async fn run_command<F, Fut>(&self, name: &str, op: F) -> StatusCode
    where
        F: FnOnce(Arc<dyn ReceiverControl>) -> Fut,
        Fut: Future<Output = Result<(), ReceiverError>>,
    {
        let Some(receiver) = self.current_handle() else {
            warn!("[{}] Cannot send {}, receiver not connected", self.id, name);
            return StatusCode::ServiceUnavailable;
        };

        debug!("[{}] Sending {}", self.id, name);
        match op(receiver).await {
            Ok(()) => StatusCode::Ok,
            Err(e) => {
                error!("[{}] {} failed: {}", self.id, name, e);
                e.status_code()
            }
        }
    }

    pub async fn power_on(&self) -> StatusCode {
        self.run_command("power on", |r| async move { r.power_on().await })
            .await
    }

    pub async fn power_off(&self) -> StatusCode {
        self.run_command("power off", |r| async move { r.power_off().await })
            .await
    }

    pub async fn power_toggle(&self) -> StatusCode {
        match self.state() {
            AvrState::Off => self.power_on().await,
            _ => self.power_off().await,
        }
    }

    pub async fn volume_up(&self) -> StatusCode {
        self.run_command("volume up", |r| async move { r.volume_up().await })
            .await
    }

    pub async fn volume_down(&self) -> StatusCode {
        self.run_command("volume down", |r| async move { r.volume_down().await })
            .await
    }

    /// Set the volume in percent (0..100).
    pub async fn set_volume_level(&self, percent: f64) -> StatusCode {
        let volume_db = percent_to_volume(percent);
        self.run_command("volume", |r| async move { r.set_volume(volume_db).await })
            .await
    }

    pub async fn play_pause(&self) -> StatusCode {
        self.run_command("play/pause", |r| async move { r.toggle_play_pause().await })
            .await
    }

    pub async fn next(&self) -> StatusCode {
        self.run_command("next", |r| async move { r.next_track().await })
            .await
    }

    pub async fn previous(&self) -> StatusCode {
        self.run_command("previous", |r| async move { r.previous_track().await })
            .await
    }

    pub async fn mute(&self, muted: bool) -> StatusCode {
        self.run_command("mute", |r| async move { r.mute(muted).await })
            .await
    }

    pub async fn mute_toggle(&self) -> StatusCode {
        let muted = self.state.lock().muted;
        self.mute(!muted).await
    }

    pub async fn select_source(&self, source: &str) -> StatusCode {
        let source = source.to_string();
        self.run_command("select source", |r| async move { r.set_input(&source).await })
            .await
    }

    pub async fn select_sound_mode(&self, mode: &str) -> StatusCode {
        let mode = mode.to_string();
        self.run_command("select sound mode", |r| async move {
            r.set_sound_mode(&mode).await
        })
        .await
    }

    pub async fn set_setting(&self, setting: Setting, value: &str) -> StatusCode {
        let value = value.to_string();
        self.run_command("setting", |r| async move { r.set_setting(setting, &value).await })
            .await
    }

    /// Send a raw protocol command such as `MNCUP`.
    pub async fn send_command(&self, command: &str) -> StatusCode {
        let command = command.to_string();
        self.run_command("raw command", |r| async move { r.send_command(&command).await })
            .await
    }
}

async fn event_pump(session: Weak<DeviceSession>, mut rx: mpsc::UnboundedReceiver<RawEvent>) {
    while let Some(event) = rx.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        session.on_push_event(event).await;
    }
}
