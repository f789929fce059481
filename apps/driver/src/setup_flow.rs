//! Driver setup: manual address entry or SSDP discovery, then receiver choice.

use anyhow::Result;
use async_trait::async_trait;
use avr_core::{DeviceConfig, ReceiverError, ReceiverFactory, ReceiverInfo};
use avr_device_denon::{discover_receivers, DiscoveredReceiver, DEFAULT_DISCOVERY_TIMEOUT};
use avr_integration::{DriverSetupRequest, SetupAction, SetupError, UserData};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupStep {
    Init,
    ConfigurationMode,
    DeviceChoice,
}

#[async_trait]
pub trait ReceiverDiscovery: Send + Sync {
    async fn discover(&self) -> Result<Vec<DiscoveredReceiver>>;
}

/// SSDP discovery on the local network
pub struct SsdpDiscovery;

#[async_trait]
impl ReceiverDiscovery for SsdpDiscovery {
    async fn discover(&self) -> Result<Vec<DiscoveredReceiver>> {
        discover_receivers(DEFAULT_DISCOVERY_TIMEOUT).await
    }
}

/// Configuration changes requested by the setup flow.
#[async_trait]
pub trait DeviceConfigurator: Send + Sync {
    /// Forget every configured receiver
    async fn clear_devices(&self) -> Result<()>;

    /// Persist a new receiver and create its entities
    async fn add_device(&self, config: DeviceConfig) -> Result<()>;
}

/// Identity and capabilities read while probing an address.
#[derive(Clone, Debug, PartialEq)]
struct IdentifiedReceiver {
    info: ReceiverInfo,
    support_sound_mode: bool,
}

impl IdentifiedReceiver {
    fn label(&self, address: &str) -> String {
        format!(
            "{} ({}) [{}]",
            self.info.name.as_deref().unwrap_or("Denon AVR"),
            self.info.model_name.as_deref().unwrap_or("unknown model"),
            address
        )
    }
}

pub struct SetupFlow {
    step: Mutex<SetupStep>,
    factory: Arc<dyn ReceiverFactory>,
    discovery: Arc<dyn ReceiverDiscovery>,
}

impl SetupFlow {
    pub fn new(factory: Arc<dyn ReceiverFactory>, discovery: Arc<dyn ReceiverDiscovery>) -> Self {
        Self {
            step: Mutex::new(SetupStep::Init),
            factory,
            discovery,
        }
    }

    pub fn step(&self) -> SetupStep {
        *self.step.lock()
    }

    fn set_step(&self, step: SetupStep) {
        *self.step.lock() = step;
    }

    /// Restart the setup and ask for an address.
    pub async fn start(&self, request: DriverSetupRequest) -> SetupAction {
        debug!("Starting driver setup (reconfigure: {})", request.reconfigure);
        self.set_step(SetupStep::ConfigurationMode);

        SetupAction::UserInput {
            title: "Setup mode".into(),
            settings: json!([
                {
                    "id": "info",
                    "label": { "en": "" },
                    "field": { "label": { "value": { "en":
                        "Leave blank to use auto-discovery and click _Next_. \
                         The device must be on the same network as the remote."
                    } } }
                },
                {
                    "id": "address",
                    "label": { "en": "IP address" },
                    "field": { "text": { "value": "" } }
                }
            ]),
        }
    }

    pub async fn user_data(&self, data: UserData, configurator: &dyn DeviceConfigurator) -> SetupAction {
        match self.step() {
            SetupStep::ConfigurationMode if data.contains("address") => {
                self.configuration_mode(&data, configurator).await
            }
            SetupStep::DeviceChoice if data.contains("choice") => self.device_choice(&data, configurator).await,
            step => {
                error!("No or invalid user response in step {:?}: {:?}", step, data);
                SetupAction::Error(SetupError::Other)
            }
        }
    }

    pub fn abort(&self) {
        info!("Setup was aborted");
        self.set_step(SetupStep::Init);
    }

    async fn configuration_mode(&self, data: &UserData, configurator: &dyn DeviceConfigurator) -> SetupAction {
        if let Err(e) = configurator.clear_devices().await {
            error!("Cannot clear configuration: {:#}", e);
            return SetupAction::Error(SetupError::Other);
        }

        let address = data.value("address").unwrap_or_default().trim().to_string();
        let mut items = Vec::new();

        if !address.is_empty() {
            debug!("Starting manual driver setup for {}", address);
            match self.identify(&address, false).await {
                Ok(receiver) => items.push(dropdown_item(&address, &receiver.label(&address))),
                Err(e) => {
                    error!("Cannot connect to manually entered address {}: {}", address, e);
                    return SetupAction::Error(setup_error(&e));
                }
            }
        } else {
            debug!("Starting auto-discovery driver setup");
            match self.discovery.discover().await {
                Ok(receivers) => {
                    for receiver in receivers {
                        let label = format!(
                            "{} ({}) [{}]",
                            receiver.friendly_name.as_deref().unwrap_or("Denon AVR"),
                            receiver.model_name.as_deref().unwrap_or("unknown model"),
                            receiver.host
                        );
                        items.push(dropdown_item(&receiver.host, &label));
                    }
                }
                Err(e) => error!("Discovery failed: {:#}", e),
            }
        }

        let Some(first) = items.first().map(|item| item["id"].clone()) else {
            warn!("No receivers found");
            return SetupAction::Error(SetupError::NotFound);
        };

        self.set_step(SetupStep::DeviceChoice);
        SetupAction::UserInput {
            title: "Please choose your Denon AVR".into(),
            settings: json!([
                {
                    "id": "choice",
                    "label": { "en": "Choose your Denon AVR" },
                    "field": { "dropdown": { "value": first, "items": items } }
                },
                {
                    "id": "show_all_inputs",
                    "label": { "en": "Show all sources" },
                    "field": { "checkbox": { "value": false } }
                },
                {
                    "id": "connection_mode",
                    "label": { "en": "Connection mode" },
                    "field": { "dropdown": { "value": "use_telnet", "items": [
                        { "id": "use_telnet", "label": { "en": "Use Telnet connection" } },
                        { "id": "use_http", "label": { "en": "Use HTTP connection" } }
                    ] } }
                },
                {
                    "id": "info",
                    "label": { "en": "Please note:" },
                    "field": { "label": { "value": { "en":
                        "Using telnet provides realtime updates for many values but certain receivers \
                         allow a single connection only! If you enable this setting, other apps or \
                         systems may no longer work."
                    } } }
                }
            ]),
        }
    }

    async fn device_choice(&self, data: &UserData, configurator: &dyn DeviceConfigurator) -> SetupAction {
        let host = data.value("choice").unwrap_or_default();
        let show_all_inputs = data.value("show_all_inputs").as_deref() == Some("true");
        let use_telnet = data.value("connection_mode").as_deref() != Some("use_http");
        debug!("Chosen receiver: {}. Retrieving device information", host);

        let receiver = match self.identify(&host, show_all_inputs).await {
            Ok(receiver) => receiver,
            Err(e) => {
                error!("Cannot connect to {}: {}", host, e);
                return SetupAction::Error(setup_error(&e));
            }
        };

        let Some(serial_number) = receiver.info.serial_number.clone() else {
            error!("Could not get serial number of host {}: required to create a unique device", host);
            return SetupAction::Error(SetupError::Other);
        };

        let config = DeviceConfig {
            support_sound_mode: receiver.support_sound_mode,
            show_all_inputs,
            use_telnet,
            zone2: data.value("zone2").as_deref() == Some("true"),
            zone3: data.value("zone3").as_deref() == Some("true"),
            ..DeviceConfig::new(
                serial_number,
                receiver.info.name.clone().unwrap_or_else(|| host.clone()),
                host.clone(),
            )
        };
        let name = config.name.clone();

        if let Err(e) = configurator.add_device(config).await {
            error!("Cannot store configuration: {:#}", e);
            return SetupAction::Error(SetupError::Other);
        }

        self.set_step(SetupStep::Init);
        info!("Setup successfully completed for {}", name);
        SetupAction::Complete
    }

    /// Read the identity of a receiver over HTTP, without Telnet.
    async fn identify(&self, address: &str, show_all_inputs: bool) -> Result<IdentifiedReceiver, ReceiverError> {
        let config = DeviceConfig {
            show_all_inputs,
            use_telnet: false,
            ..DeviceConfig::new(address, address, address)
        };
        let receiver = self.factory.create(&config);
        receiver.setup().await?;

        Ok(IdentifiedReceiver {
            info: receiver.info(),
            support_sound_mode: !receiver.snapshot().sound_mode_list.is_empty(),
        })
    }
}

fn dropdown_item(id: &str, label: &str) -> Value {
    json!({ "id": id, "label": { "en": label } })
}

fn setup_error(error: &ReceiverError) -> SetupError {
    match error {
        ReceiverError::Network(_) => SetupError::ConnectionRefused,
        ReceiverError::Timeout(_) => SetupError::Timeout,
        _ => SetupError::Other,
    }
}
