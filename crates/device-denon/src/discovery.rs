/// SSDP discovery of Denon/Marantz receivers
///
/// Sends M-SEARCH requests to the UPnP multicast group, fetches the
/// description of every responder and keeps the Denon and Marantz devices.
use crate::description::{parse_description, DeviceDescription};
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

const SSDP_ADDR: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(239, 255, 255, 250), 1900);
const SSDP_MX: u8 = 2;

pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);

const SEARCH_TARGETS: &[&str] = &[
    "urn:schemas-upnp-org:device:MediaRenderer:1",
    "urn:schemas-upnp-org:device:MediaServer:1",
    "urn:schemas-denon-com:device:AiosDevice:1",
];

/// A receiver found on the network.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscoveredReceiver {
    pub host: String,
    pub friendly_name: Option<String>,
    pub model_name: Option<String>,
    pub manufacturer: Option<String>,
    pub serial_number: Option<String>,
    pub presentation_url: Option<String>,
}

impl DiscoveredReceiver {
    fn from_description(host: String, description: DeviceDescription) -> Self {
        Self {
            host,
            friendly_name: description.friendly_name,
            model_name: description.model_name,
            manufacturer: description.manufacturer,
            serial_number: description.serial_number,
            presentation_url: description.presentation_url,
        }
    }
}

/// Discover receivers, listening for SSDP responses during `timeout`.
pub async fn discover_receivers(timeout: Duration) -> Result<Vec<DiscoveredReceiver>> {
    info!("Starting SSDP discovery ({:?})", timeout);

    let socket = create_ssdp_socket()?;
    send_msearch(&socket).await?;

    let mut locations: Vec<(String, String)> = Vec::new();
    let mut seen = HashSet::new();
    let deadline = tokio::time::Instant::now() + timeout;
    let mut buf = [0u8; 2048];

    loop {
        let received = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await;
        let (len, addr) = match received {
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                warn!("Socket error during discovery: {}", e);
                continue;
            }
            Err(_) => break,
        };

        let response = String::from_utf8_lossy(&buf[..len]);
        trace!("SSDP response from {}: {}", addr, response);

        if let Some(location) = parse_location(&response) {
            if seen.insert(location.clone()) {
                locations.push((addr.ip().to_string(), location));
            }
        }
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .context("Failed to create HTTP client")?;

    let mut receivers: Vec<DiscoveredReceiver> = Vec::new();
    for (host, location) in locations {
        if receivers.iter().any(|r| r.host == host) {
            continue;
        }
        match fetch_description(&client, &location).await {
            Ok(description) if description.is_supported() => {
                info!(
                    "Found {} {} at {}",
                    description.manufacturer.as_deref().unwrap_or_default(),
                    description.model_name.as_deref().unwrap_or_default(),
                    host
                );
                receivers.push(DiscoveredReceiver::from_description(host, description));
            }
            Ok(description) => {
                debug!(
                    "Ignoring {} device at {}",
                    description.manufacturer.as_deref().unwrap_or("unknown"),
                    host
                );
            }
            Err(e) => debug!("Cannot read description {}: {:#}", location, e),
        }
    }

    info!("Discovery complete, found {} receiver(s)", receivers.len());
    Ok(receivers)
}

async fn fetch_description(client: &reqwest::Client, location: &str) -> Result<DeviceDescription> {
    let xml = client
        .get(location)
        .send()
        .await
        .context("Request failed")?
        .error_for_status()?
        .text()
        .await?;
    Ok(parse_description(&xml)?)
}

/// Multicast capable socket for M-SEARCH requests and their unicast answers.
fn create_ssdp_socket() -> Result<UdpSocket> {
    let socket = socket2::Socket::new(
        socket2::Domain::IPV4,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )
    .context("Failed to create SSDP socket")?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.set_multicast_ttl_v4(2)?;

    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    socket
        .bind(&bind_addr.into())
        .context("Failed to bind SSDP socket")?;

    let socket = UdpSocket::from_std(socket.into()).context("Failed to register SSDP socket")?;
    debug!("SSDP socket bound to {}", socket.local_addr()?);
    Ok(socket)
}

async fn send_msearch(socket: &UdpSocket) -> Result<()> {
    for target in SEARCH_TARGETS {
        let request = msearch_request(target);
        socket
            .send_to(request.as_bytes(), SSDP_ADDR)
            .await
            .with_context(|| format!("Failed to send M-SEARCH for {}", target))?;
        debug!("Sent M-SEARCH for {}", target);
    }
    Ok(())
}

fn msearch_request(target: &str) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\
         \r\n",
        SSDP_ADDR, SSDP_MX, target
    )
}

/// `LOCATION` header of an SSDP response.
fn parse_location(response: &str) -> Option<String> {
    response.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("location")
            .then(|| value.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}
