use crate::metadata::DriverMetadata;
use anyhow::{Context, Result};
use mdns_sd::{ServiceDaemon, ServiceInfo};
use tracing::{debug, info};

pub const SERVICE_TYPE: &str = "_uc-integration._tcp.local.";

/// mDNS advertisement of the integration server, withdrawn on drop.
pub struct MdnsAdvertisement {
    daemon: ServiceDaemon,
    fullname: String,
}

impl MdnsAdvertisement {
    pub fn publish(metadata: &DriverMetadata, port: u16) -> Result<Self> {
        let daemon = ServiceDaemon::new().context("Failed to create mDNS service daemon")?;

        let host_name = format!("{}.local.", metadata.driver_id);
        let properties = txt_properties(metadata);
        let service = ServiceInfo::new(SERVICE_TYPE, &metadata.driver_id, &host_name, "", port, &properties[..])
            .context("Invalid mDNS service info")?
            .enable_addr_auto();

        let fullname = service.get_fullname().to_string();
        daemon
            .register(service)
            .with_context(|| format!("Failed to register {}", fullname))?;
        info!("Published {} on port {}", fullname, port);

        Ok(Self { daemon, fullname })
    }
}

impl Drop for MdnsAdvertisement {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            debug!("Failed to unregister {}: {}", self.fullname, e);
        }
        self.daemon.shutdown().ok();
    }
}

fn txt_properties(metadata: &DriverMetadata) -> Vec<(&str, &str)> {
    let mut properties = vec![("name", metadata.display_name()), ("ver", metadata.version.as_str())];
    if let Some(developer) = metadata.developer() {
        properties.push(("developer", developer));
    }
    properties
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_txt_properties() {
        let metadata: DriverMetadata = serde_json::from_value(json!({
            "driver_id": "denonavr",
            "version": "0.6.3",
            "name": { "en": "Denon AVR" },
            "developer": { "name": "Integration developers" }
        }))
        .unwrap();

        assert_eq!(
            txt_properties(&metadata),
            vec![("name", "Denon AVR"), ("ver", "0.6.3"), ("developer", "Integration developers")]
        );
    }
}
