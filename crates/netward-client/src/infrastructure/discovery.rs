//! mDNS discovery of sensors on the local network.
//!
//! Sensors advertise `_netward._tcp.local.` with two TXT properties:
//! `name` (display name) and `id` (stable sensor identity).
//!
//! # How mDNS browsing works (for beginners)
//!
//! Multicast DNS lets devices answer DNS questions on the LAN without a DNS
//! server.  Browsing sends a multicast query for the service type; every
//! sensor replies with its instance name, address, port and TXT records.
//! `mdns-sd` runs the socket work on its own thread and hands us resolved
//! services through a channel, which we drain until the timeout expires.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use netward_core::DiscoveredSensor;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Service type sensors advertise.
pub const SERVICE_TYPE: &str = "_netward._tcp.local.";

/// Error type for discovery operations.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The mDNS daemon could not start (no usable interface, socket error).
    #[error("mDNS daemon failed to start: {0}")]
    Daemon(String),

    /// The browse query could not be issued.
    #[error("mDNS browse for {service_type} failed: {reason}")]
    Browse {
        service_type: String,
        reason: String,
    },
}

/// Browses for `service_type` for `timeout` and returns every sensor that
/// resolved, one entry per address.
///
/// # Errors
///
/// Returns [`DiscoveryError`] if the daemon or the browse cannot start.  An
/// empty network is not an error; it yields an empty list.
pub async fn discover(
    service_type: &str,
    timeout: Duration,
) -> Result<Vec<DiscoveredSensor>, DiscoveryError> {
    let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::Daemon(e.to_string()))?;
    let receiver = daemon
        .browse(service_type)
        .map_err(|e| DiscoveryError::Browse {
            service_type: service_type.to_string(),
            reason: e.to_string(),
        })?;
    info!(%service_type, timeout_secs = timeout.as_secs(), "browsing for sensors");

    let deadline = tokio::time::Instant::now() + timeout;
    let mut found: Vec<DiscoveredSensor> = Vec::new();
    loop {
        match tokio::time::timeout_at(deadline, receiver.recv_async()).await {
            Err(_elapsed) => break,
            Ok(Err(_closed)) => break,
            Ok(Ok(ServiceEvent::ServiceResolved(service))) => {
                if let Some(sensor) = sensor_from_service(&service, service_type) {
                    if !found.iter().any(|s| s.address == sensor.address) {
                        debug!(name = %sensor.name, address = %sensor.address, "sensor resolved");
                        found.push(sensor);
                    }
                }
            }
            Ok(Ok(other)) => trace!(event = ?other, "mDNS event"),
        }
    }

    if let Err(e) = daemon.shutdown() {
        warn!(error = %e, "mDNS daemon did not shut down cleanly");
    }
    info!(count = found.len(), "discovery finished");
    Ok(found)
}

fn sensor_from_service(service: &ServiceInfo, service_type: &str) -> Option<DiscoveredSensor> {
    sensor_from_parts(
        service.get_fullname(),
        service_type,
        service.get_addresses().iter().copied(),
        service.get_port(),
        service.get_property_val_str("name"),
        service.get_property_val_str("id"),
    )
}

/// Builds a sensor entry from resolved mDNS data.  IPv4 is preferred over
/// IPv6 when both are present.  Returns `None` without any address.
fn sensor_from_parts(
    fullname: &str,
    service_type: &str,
    addresses: impl Iterator<Item = IpAddr>,
    port: u16,
    name: Option<&str>,
    id: Option<&str>,
) -> Option<DiscoveredSensor> {
    let mut addresses: Vec<IpAddr> = addresses.collect();
    addresses.sort_by_key(|ip| (ip.is_ipv6(), *ip));
    let ip = *addresses.first()?;

    let instance = fullname
        .strip_suffix(service_type)
        .map(|s| s.trim_end_matches('.'))
        .unwrap_or(fullname);
    let name = name
        .filter(|n| !n.is_empty())
        .unwrap_or(instance)
        .to_string();

    Some(DiscoveredSensor {
        name,
        sensor_id: id.filter(|i| !i.is_empty()).map(str::to_string),
        address: SocketAddr::new(ip, port).to_string(),
    })
}
