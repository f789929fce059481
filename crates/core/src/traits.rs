use crate::error::ReceiverError;
use crate::models::{DeviceConfig, RawEvent, ReceiverInfo, ReceiverSnapshot, Setting};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Sink receiving every raw push event of a receiver.
pub type EventSink = mpsc::UnboundedSender<RawEvent>;

/// Control of a single physical receiver (Denon, Marantz).
///
/// Implementations own the wire protocol. State getters return the values of
/// the last `update()` or push event and never block.
#[async_trait]
pub trait ReceiverControl: Send + Sync {
    /// Initial connection: read identity, input and sound mode lists
    async fn setup(&self) -> Result<(), ReceiverError>;

    /// Refresh the cached receiver state
    async fn update(&self) -> Result<(), ReceiverError>;

    /// Open the Telnet push channel
    async fn telnet_connect(&self) -> Result<(), ReceiverError>;

    /// Close the Telnet push channel
    async fn telnet_disconnect(&self) -> Result<(), ReceiverError>;

    fn telnet_connected(&self) -> bool;

    /// Register (or clear with `None`) the sink for all push events
    fn set_event_sink(&self, sink: Option<EventSink>);

    fn info(&self) -> ReceiverInfo;

    fn snapshot(&self) -> ReceiverSnapshot;

    async fn power_on(&self) -> Result<(), ReceiverError>;

    async fn power_off(&self) -> Result<(), ReceiverError>;

    async fn volume_up(&self) -> Result<(), ReceiverError>;

    async fn volume_down(&self) -> Result<(), ReceiverError>;

    /// Set the master volume in dB (-80.0 to +18.0)
    async fn set_volume(&self, volume_db: f64) -> Result<(), ReceiverError>;

    async fn mute(&self, muted: bool) -> Result<(), ReceiverError>;

    /// Select an input source; unknown sources fail with `InvalidInput`
    async fn set_input(&self, source: &str) -> Result<(), ReceiverError>;

    async fn set_sound_mode(&self, mode: &str) -> Result<(), ReceiverError>;

    async fn toggle_play_pause(&self) -> Result<(), ReceiverError>;

    async fn next_track(&self) -> Result<(), ReceiverError>;

    async fn previous_track(&self) -> Result<(), ReceiverError>;

    async fn set_setting(&self, setting: Setting, value: &str) -> Result<(), ReceiverError>;

    /// Send a raw protocol command, e.g. `MNCUP`
    async fn send_command(&self, command: &str) -> Result<(), ReceiverError>;
}

/// Creates receiver handles; one handle per connection attempt.
pub trait ReceiverFactory: Send + Sync {
    fn create(&self, config: &DeviceConfig) -> Arc<dyn ReceiverControl>;
}
