//! In-memory receiver used by the unit tests.

use crate::error::ReceiverError;
use crate::models::{DeviceConfig, RawEvent, ReceiverInfo, ReceiverSnapshot, Setting};
use crate::traits::{EventSink, ReceiverControl, ReceiverFactory};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

pub struct MockReceiver {
    info: Mutex<ReceiverInfo>,
    snapshot: Mutex<ReceiverSnapshot>,
    sink: Mutex<Option<EventSink>>,
    telnet: AtomicBool,
    setup_calls: AtomicUsize,
    update_calls: AtomicUsize,
    update_gate: Mutex<Option<Arc<Notify>>>,
    setup_error: Mutex<Option<ReceiverError>>,
    update_error: Mutex<Option<ReceiverError>>,
    command_error: Mutex<Option<ReceiverError>>,
    telnet_close_fails: AtomicBool,
    commands: Mutex<Vec<String>>,
}

impl MockReceiver {
    /// Receiver that is on and playing "T" by "A".
    pub fn playing() -> Arc<Self> {
        let snapshot = ReceiverSnapshot {
            power: Some("ON".to_string()),
            state: Some("playing".to_string()),
            volume_db: Some(-40.0),
            muted: false,
            input_func: Some("NET".to_string()),
            input_func_list: vec!["CD".to_string(), "NET".to_string(), "TV".to_string()],
            sound_mode: Some("STEREO".to_string()),
            sound_mode_list: vec!["MOVIE".to_string(), "MUSIC".to_string(), "STEREO".to_string()],
            artist: Some("A".to_string()),
            title: Some("T".to_string()),
            album: Some("L".to_string()),
            image_url: Some("http://192.168.1.20/art.jpg".to_string()),
            ..Default::default()
        };

        Arc::new(Self {
            info: Mutex::new(ReceiverInfo {
                host: "192.168.1.20".to_string(),
                name: Some("Living room".to_string()),
                manufacturer: Some("Denon".to_string()),
                model_name: Some("AVR-X2700H".to_string()),
                serial_number: Some("AVR123".to_string()),
            }),
            snapshot: Mutex::new(snapshot),
            sink: Mutex::new(None),
            telnet: AtomicBool::new(false),
            setup_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            update_gate: Mutex::new(None),
            setup_error: Mutex::new(None),
            update_error: Mutex::new(None),
            command_error: Mutex::new(None),
            telnet_close_fails: AtomicBool::new(false),
            commands: Mutex::new(Vec::new()),
        })
    }

    pub fn set_serial(&self, serial: Option<&str>) {
        self.info.lock().serial_number = serial.map(str::to_string);
    }

    pub fn set_power(&self, power: &str, state: &str) {
        let mut snapshot = self.snapshot.lock();
        snapshot.power = Some(power.to_string());
        snapshot.state = Some(state.to_string());
    }

    pub fn set_volume_db(&self, volume_db: f64) {
        self.snapshot.lock().volume_db = Some(volume_db);
    }

    pub fn set_title(&self, title: &str) {
        self.snapshot.lock().title = Some(title.to_string());
    }

    pub fn update_snapshot(&self, f: impl FnOnce(&mut ReceiverSnapshot)) {
        f(&mut self.snapshot.lock());
    }

    pub fn fail_next_setup(&self, error: ReceiverError) {
        *self.setup_error.lock() = Some(error);
    }

    pub fn fail_next_update(&self, error: ReceiverError) {
        *self.update_error.lock() = Some(error);
    }

    pub fn fail_next_command(&self, error: ReceiverError) {
        *self.command_error.lock() = Some(error);
    }

    pub fn fail_telnet_disconnect(&self) {
        self.telnet_close_fails.store(true, Ordering::SeqCst);
    }

    pub fn set_update_gate(&self, gate: Option<Arc<Notify>>) {
        *self.update_gate.lock() = gate;
    }

    pub fn setup_count(&self) -> usize {
        self.setup_calls.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn has_event_sink(&self) -> bool {
        self.sink.lock().is_some()
    }

    pub fn take_event_sink(&self) -> Option<EventSink> {
        self.sink.lock().take()
    }

    pub fn push_event(&self, event: RawEvent) {
        if let Some(sink) = self.sink.lock().as_ref() {
            let _ = sink.send(event);
        }
    }

    fn record(&self, command: String) -> Result<(), ReceiverError> {
        if let Some(error) = self.command_error.lock().take() {
            return Err(error);
        }
        self.commands.lock().push(command);
        Ok(())
    }
}

#[async_trait]
impl ReceiverControl for MockReceiver {
    async fn setup(&self) -> Result<(), ReceiverError> {
        self.setup_calls.fetch_add(1, Ordering::SeqCst);
        match self.setup_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn update(&self) -> Result<(), ReceiverError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.update_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.update_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn telnet_connect(&self) -> Result<(), ReceiverError> {
        self.telnet.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn telnet_disconnect(&self) -> Result<(), ReceiverError> {
        self.telnet.store(false, Ordering::SeqCst);
        if self.telnet_close_fails.load(Ordering::SeqCst) {
            return Err(ReceiverError::Network("connection reset".into()));
        }
        Ok(())
    }

    fn telnet_connected(&self) -> bool {
        self.telnet.load(Ordering::SeqCst)
    }

    fn set_event_sink(&self, sink: Option<EventSink>) {
        *self.sink.lock() = sink;
    }

    fn info(&self) -> ReceiverInfo {
        self.info.lock().clone()
    }

    fn snapshot(&self) -> ReceiverSnapshot {
        self.snapshot.lock().clone()
    }

    async fn power_on(&self) -> Result<(), ReceiverError> {
        self.record("power_on".to_string())
    }

    async fn power_off(&self) -> Result<(), ReceiverError> {
        self.record("power_off".to_string())
    }

    async fn volume_up(&self) -> Result<(), ReceiverError> {
        self.record("volume_up".to_string())
    }

    async fn volume_down(&self) -> Result<(), ReceiverError> {
        self.record("volume_down".to_string())
    }

    async fn set_volume(&self, volume_db: f64) -> Result<(), ReceiverError> {
        self.record(format!("set_volume {:.1}", volume_db))
    }

    async fn mute(&self, muted: bool) -> Result<(), ReceiverError> {
        self.record(format!("mute {}", muted))
    }

    async fn set_input(&self, source: &str) -> Result<(), ReceiverError> {
        self.record(format!("set_input {}", source))
    }

    async fn set_sound_mode(&self, mode: &str) -> Result<(), ReceiverError> {
        self.record(format!("set_sound_mode {}", mode))
    }

    async fn toggle_play_pause(&self) -> Result<(), ReceiverError> {
        self.record("play_pause".to_string())
    }

    async fn next_track(&self) -> Result<(), ReceiverError> {
        self.record("next".to_string())
    }

    async fn previous_track(&self) -> Result<(), ReceiverError> {
        self.record("previous".to_string())
    }

    async fn set_setting(&self, setting: Setting, value: &str) -> Result<(), ReceiverError> {
        self.record(format!("set_setting {:?} {}", setting, value))
    }

    async fn send_command(&self, command: &str) -> Result<(), ReceiverError> {
        self.record(format!("send {}", command))
    }
}

/// Factory handing out the same mock for every connection attempt.
pub struct MockFactory {
    receiver: Arc<MockReceiver>,
}

impl MockFactory {
    pub fn shared(receiver: &Arc<MockReceiver>) -> Arc<dyn ReceiverFactory> {
        Arc::new(Self {
            receiver: Arc::clone(receiver),
        })
    }
}

impl ReceiverFactory for MockFactory {
    fn create(&self, _config: &DeviceConfig) -> Arc<dyn ReceiverControl> {
        self.receiver.clone()
    }
}
