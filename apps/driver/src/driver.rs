//! Orchestration between the remote, the configured receivers and their entities.

use crate::setup_flow::{DeviceConfigurator, ReceiverDiscovery, SetupFlow};
use anyhow::Result;
use async_trait::async_trait;
use avr_core::entity::{avr_from_entity_id, EntityAdapter, MediaPlayer, Remote, Select, SelectKind, Sensor};
use avr_core::{AvrState, DeviceConfig, DeviceRegistry, DeviceSession, DeviceUpdate, ReceiverFactory, SessionEvent, StatusCode};
use avr_integration::{
    AvailableEntity, DeviceState, DriverSetupRequest, EntityCommand, EntityState, IntegrationApi,
    IntegrationHandler, RemoteEvent, SetupAction, UserData,
};
use avr_persistence::Devices;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const POLL_INTERVAL: Duration = Duration::from_secs(10);
const EXIT_STANDBY_DELAY: Duration = Duration::from_secs(2);

/// The integration driver. Cheap to clone.
#[derive(Clone)]
pub struct Driver {
    inner: Arc<Inner>,
}

struct Inner {
    api: IntegrationApi,
    registry: DeviceRegistry,
    devices: Arc<Devices>,
    factory: Arc<dyn ReceiverFactory>,
    setup: SetupFlow,
    /// Every entity of every configured receiver, by entity id
    entities: RwLock<HashMap<String, Arc<dyn EntityAdapter>>>,
    subscribed: RwLock<HashSet<String>>,
    /// Session event listener per device
    listeners: Mutex<HashMap<String, JoinHandle<()>>>,
    standby: AtomicBool,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for (_, listener) in self.listeners.lock().drain() {
            listener.abort();
        }
    }
}

impl Driver {
    pub fn new(
        api: IntegrationApi,
        devices: Arc<Devices>,
        factory: Arc<dyn ReceiverFactory>,
        discovery: Arc<dyn ReceiverDiscovery>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                registry: DeviceRegistry::new(),
                devices,
                setup: SetupFlow::new(factory.clone(), discovery),
                factory,
                entities: RwLock::new(HashMap::new()),
                subscribed: RwLock::new(HashSet::new()),
                listeners: Mutex::new(HashMap::new()),
                standby: AtomicBool::new(false),
            }),
        }
    }

    #[cfg(test)]
    pub fn registry(&self) -> &DeviceRegistry {
        &self.inner.registry
    }

    #[cfg(test)]
    pub fn in_standby(&self) -> bool {
        self.inner.standby.load(Ordering::SeqCst)
    }

    /// Create sessions and entities for every stored receiver, without connecting.
    pub fn load_configured(&self) {
        for config in self.inner.devices.all() {
            self.create_device(config);
        }
        info!(
            "{} receiver(s) configured: {:?}",
            self.inner.registry.len(),
            self.inner.registry.ids()
        );
    }

    /// Session and entities of a receiver; replaces an existing one with the same id.
    fn create_device(&self, config: DeviceConfig) -> Arc<DeviceSession> {
        if self.inner.registry.contains(&config.id) {
            self.remove_device(&config.id);
        }
        debug!("Adding receiver {} ({})", config.id, config.address);

        let session = DeviceSession::new(config.clone(), self.inner.factory.clone());
        let media_player = Arc::new(MediaPlayer::new(&session));
        let mut entities: Vec<Arc<dyn EntityAdapter>> = vec![
            media_player.clone(),
            Arc::new(Remote::new(media_player)),
        ];
        entities.extend(
            SelectKind::for_config(&config)
                .into_iter()
                .map(|kind| Arc::new(Select::new(&session, kind)) as Arc<dyn EntityAdapter>),
        );
        entities.extend(
            Sensor::for_config(&config)
                .into_iter()
                .map(|sensor| Arc::new(sensor) as Arc<dyn EntityAdapter>),
        );

        {
            let mut index = self.inner.entities.write();
            for entity in entities {
                index.insert(entity.id().to_string(), entity);
            }
        }

        self.inner.registry.insert(session.clone());
        self.spawn_listener(&session);
        session
    }

    /// Drop the session and entities of a receiver and disconnect it in the background.
    fn remove_device(&self, device_id: &str) {
        if let Some(listener) = self.inner.listeners.lock().remove(device_id) {
            listener.abort();
        }

        let removed: Vec<String> = {
            let mut index = self.inner.entities.write();
            let ids: Vec<String> = index
                .values()
                .filter(|entity| entity.device_id() == device_id)
                .map(|entity| entity.id().to_string())
                .collect();
            for id in &ids {
                index.remove(id);
            }
            ids
        };
        self.inner.subscribed.write().retain(|id| !removed.contains(id));

        if let Some(session) = self.inner.registry.remove(device_id) {
            info!("Removed receiver {}", device_id);
            tokio::spawn(async move { session.disconnect().await });
        }
    }

    fn clear(&self) {
        for (_, listener) in self.inner.listeners.lock().drain() {
            listener.abort();
        }
        self.inner.entities.write().clear();
        self.inner.subscribed.write().clear();

        for session in self.inner.registry.clear() {
            info!("Removed receiver {}", session.id());
            tokio::spawn(async move { session.disconnect().await });
        }
    }

    /// Forward session events of one device until it is removed.
    fn spawn_listener(&self, session: &Arc<DeviceSession>) {
        let mut events = session.subscribe();
        let device_id = session.id().to_string();
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);

        let listener = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(inner) = inner.upgrade() else { break };
                        Driver { inner }.handle_session_event(event);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Listener lagging, {} session event(s) dropped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        if let Some(previous) = self.inner.listeners.lock().insert(device_id, listener) {
            previous.abort();
        }
    }

    fn handle_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Connected { device_id } => {
                debug!("Receiver connected: {}", device_id);
                self.inner.api.set_device_state(DeviceState::Connected);
                if let Some(session) = self.inner.registry.get(&device_id) {
                    self.publish_update(&device_id, &session.snapshot().to_update());
                }
            }
            SessionEvent::Disconnected { device_id } => {
                debug!("Receiver disconnected: {}", device_id);
                self.publish_update(&device_id, &DeviceUpdate::with_state(AvrState::Unavailable));
                self.inner.api.set_device_state(DeviceState::Disconnected);
            }
            SessionEvent::Error { device_id, message } => {
                error!("Receiver {} error: {}", device_id, message);
                self.publish_update(&device_id, &DeviceUpdate::with_state(AvrState::Unavailable));
                self.inner.api.set_device_state(DeviceState::Error);
            }
            SessionEvent::Update { device_id, update } => self.publish_update(&device_id, &update),
        }
    }

    /// Diff an update against every subscribed entity of the device and publish the changes.
    fn publish_update(&self, device_id: &str, update: &DeviceUpdate) {
        for entity in self.subscribed_entities(Some(device_id)) {
            let changed = entity.filter_changed_attributes(update);
            if changed.is_empty() {
                continue;
            }
            self.inner
                .api
                .entity_change(entity.id(), entity.entity_type().as_str(), changed.clone());
            entity.update_attributes(&changed);
        }
    }

    fn subscribed_entities(&self, device_id: Option<&str>) -> Vec<Arc<dyn EntityAdapter>> {
        let subscribed = self.inner.subscribed.read();
        let mut entities: Vec<Arc<dyn EntityAdapter>> = self
            .inner
            .entities
            .read()
            .values()
            .filter(|entity| subscribed.contains(entity.id()))
            .filter(|entity| device_id.map_or(true, |id| entity.device_id() == id))
            .cloned()
            .collect();
        entities.sort_by(|a, b| a.id().cmp(b.id()));
        entities
    }

    fn entity(&self, entity_id: &str) -> Option<Arc<dyn EntityAdapter>> {
        self.inner.entities.read().get(entity_id).cloned()
    }

    pub fn connect_all(&self) {
        for session in self.inner.registry.all() {
            tokio::spawn(async move {
                if let Err(e) = session.connect().await {
                    warn!("Cannot connect to {}: {}", session.id(), e);
                }
            });
        }
    }

    pub fn disconnect_all(&self) {
        for session in self.inner.registry.all() {
            tokio::spawn(async move { session.disconnect().await });
        }
    }

    /// Disconnect every receiver and wait for it
    pub async fn shutdown(&self) {
        for session in self.inner.registry.all() {
            session.disconnect().await;
        }
    }

    /// Refresh every connected receiver every `interval`, unless the remote is in standby.
    pub fn spawn_poller(&self, interval: Duration) -> JoinHandle<()> {
        let inner = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else { break };
                if inner.standby.load(Ordering::SeqCst) {
                    continue;
                }
                for session in inner.registry.all() {
                    if session.is_connected() {
                        tokio::spawn(async move { session.refresh().await });
                    }
                }
            }
        })
    }

    /// Subscribe one entity, connecting its receiver if needed.
    fn subscribe_entity(&self, entity_id: &str) -> bool {
        let entity = match self.entity(entity_id) {
            Some(entity) => entity,
            None => {
                // Receiver configured after the entities were listed
                let config = avr_from_entity_id(entity_id).and_then(|device_id| self.inner.devices.get(device_id));
                let Some(config) = config else {
                    error!("Failed to subscribe entity {}: no receiver configuration found", entity_id);
                    return false;
                };
                self.create_device(config);
                match self.entity(entity_id) {
                    Some(entity) => entity,
                    None => return false,
                }
            }
        };

        self.inner.subscribed.write().insert(entity_id.to_string());
        let Some(session) = self.inner.registry.get(entity.device_id()) else {
            return false;
        };

        if session.is_connected() {
            let update = session.snapshot().to_update();
            entity.update_attributes(&entity.filter_changed_attributes(&update));
            // Full state, the remote may have missed earlier changes
            self.inner
                .api
                .entity_change(entity.id(), entity.entity_type().as_str(), entity.attributes());
        } else {
            tokio::spawn(async move {
                if let Err(e) = session.connect().await {
                    warn!("Cannot connect to {}: {}", session.id(), e);
                }
            });
        }
        true
    }

    fn available_entity(entity: &Arc<dyn EntityAdapter>) -> AvailableEntity {
        AvailableEntity {
            entity_id: entity.id().to_string(),
            entity_type: entity.entity_type().as_str().to_string(),
            device_id: entity.device_id().to_string(),
            name: json!({ "en": entity.name() }),
            features: entity.features().into_iter().map(str::to_string).collect(),
            device_class: entity.device_class().map(str::to_string),
            options: entity.options(),
            attributes: entity.attributes(),
        }
    }
}

#[async_trait]
impl IntegrationHandler for Driver {
    async fn on_event(&self, event: RemoteEvent) {
        match event {
            RemoteEvent::Connect => {
                self.inner.api.set_device_state(DeviceState::Connected);
                self.connect_all();
            }
            RemoteEvent::Disconnect => {
                self.disconnect_all();
                self.inner.api.set_device_state(DeviceState::Disconnected);
            }
            RemoteEvent::EnterStandby => {
                debug!("Enter standby event: disconnecting receiver(s)");
                self.inner.standby.store(true, Ordering::SeqCst);
                self.disconnect_all();
            }
            RemoteEvent::ExitStandby => {
                debug!("Exit standby event: connecting receiver(s)");
                self.inner.standby.store(false, Ordering::SeqCst);
                let driver = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(EXIT_STANDBY_DELAY).await;
                    driver.connect_all();
                });
            }
            RemoteEvent::AbortDriverSetup => self.inner.setup.abort(),
        }
    }

    fn available_entities(&self) -> Vec<AvailableEntity> {
        let mut entities: Vec<AvailableEntity> = self
            .inner
            .entities
            .read()
            .values()
            .map(Self::available_entity)
            .collect();
        entities.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        entities
    }

    fn entity_states(&self) -> Vec<EntityState> {
        self.subscribed_entities(None)
            .into_iter()
            .map(|entity| EntityState {
                entity_id: entity.id().to_string(),
                entity_type: entity.entity_type().as_str().to_string(),
                device_id: entity.device_id().to_string(),
                attributes: entity.attributes(),
            })
            .collect()
    }

    async fn subscribe_entities(&self, entity_ids: Vec<String>) -> StatusCode {
        let mut status = StatusCode::Ok;
        for entity_id in entity_ids {
            if !self.subscribe_entity(&entity_id) {
                status = StatusCode::NotFound;
            }
        }
        status
    }

    async fn unsubscribe_entities(&self, entity_ids: Vec<String>) -> StatusCode {
        let mut devices = HashSet::new();
        {
            let mut subscribed = self.inner.subscribed.write();
            for entity_id in &entity_ids {
                subscribed.remove(entity_id);
                if let Some(entity) = self.entity(entity_id) {
                    devices.insert(entity.device_id().to_string());
                }
            }
        }

        for device_id in devices {
            if !self.subscribed_entities(Some(&device_id)).is_empty() {
                continue;
            }
            if let Some(session) = self.inner.registry.get(&device_id) {
                debug!("No subscribed entities left, disconnecting {}", device_id);
                tokio::spawn(async move { session.disconnect().await });
            }
        }
        StatusCode::Ok
    }

    async fn entity_command(&self, command: EntityCommand) -> StatusCode {
        let Some(entity) = self.entity(&command.entity_id) else {
            warn!("Entity {} is not configured, ignoring command {}", command.entity_id, command.cmd_id);
            return StatusCode::NotFound;
        };
        info!("[{}] Command {} {:?}", command.entity_id, command.cmd_id, command.params);
        entity.command(&command.cmd_id, &command.params).await
    }

    async fn setup_driver(&self, request: DriverSetupRequest) -> SetupAction {
        self.inner.setup.start(request).await
    }

    async fn set_driver_user_data(&self, data: UserData) -> SetupAction {
        self.inner.setup.user_data(data, self).await
    }
}

#[async_trait]
impl DeviceConfigurator for Driver {
    async fn clear_devices(&self) -> Result<()> {
        self.clear();
        self.inner.devices.clear().await
    }

    async fn add_device(&self, config: DeviceConfig) -> Result<()> {
        self.inner.devices.add(config.clone()).await?;
        self.create_device(config);
        Ok(())
    }
}
