//! Network device discovery and publication.
//!
//! [`DeviceWatcher`] enumerates the root namespace's candidate interfaces,
//! turns each into a [`NetworkDevice`] with its published attributes, and
//! replaces the node's advertised set through a [`DevicePublisher`]. The
//! set is recomputed on a coarse timer and on debounced kernel link
//! notifications, and every publication carries the complete set.
//!
//! Interfaces are excluded when claiming them would break the node or the
//! orchestrator: the interface carrying the default route, names that are
//! not valid DNS-1123 labels (device names become API object fields),
//! loopbacks, and veth pairs (virtual, typically owned by the CNI).

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::DriverConfig;
use crate::error::Result;
use crate::netdev::sysfs::SysfsReader;
use crate::netdev::{HostInventory, LinkEvent, LinkInfo, RdmaOps};
use crate::traits::{CloudInterface, CloudMetadata, DevicePublisher};

/// One attribute value on a published device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    String(String),
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        AttributeValue::Int(i64::from(value))
    }
}

/// An allocatable network device as published to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDevice {
    /// Interface name; doubles as the device identifier in allocations.
    pub name: String,
    /// Published attributes, keyed by attribute name.
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

/// Validates a DNS-1123 label: lowercase alphanumerics and `-`, starting
/// and ending alphanumeric, at most 63 characters.
pub fn is_dns1123_label(name: &str) -> bool {
    if name.is_empty() || name.len() > 63 {
        return false;
    }
    let bytes = name.as_bytes();
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
        return false;
    }
    bytes.iter().all(|&b| alnum(b) || b == b'-')
}

/// Periodic and event-driven device discovery.
pub struct DeviceWatcher {
    config: DriverConfig,
    inventory: Arc<dyn HostInventory>,
    sysfs: SysfsReader,
    rdma: Arc<dyn RdmaOps>,
    cloud: Arc<dyn CloudMetadata>,
    publisher: Arc<dyn DevicePublisher>,
    events: mpsc::Receiver<LinkEvent>,
    shutdown: watch::Receiver<bool>,
}

impl DeviceWatcher {
    /// Creates a watcher wired to its collaborators.
    ///
    /// # Arguments
    ///
    /// * `config` - Timing knobs (publish interval, event debounce)
    /// * `inventory` - Root-namespace link enumeration
    /// * `sysfs` - Per-interface sysfs reads (SR-IOV counts)
    /// * `rdma` - RDMA companion lookups for the `rdma` attribute
    /// * `cloud` - Provider metadata, fetched once at startup
    /// * `publisher` - Sink for the published device set
    /// * `events` - Kernel link-change notifications
    /// * `shutdown` - Flips to `true` when the agent is stopping
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DriverConfig,
        inventory: Arc<dyn HostInventory>,
        sysfs: SysfsReader,
        rdma: Arc<dyn RdmaOps>,
        cloud: Arc<dyn CloudMetadata>,
        publisher: Arc<dyn DevicePublisher>,
        events: mpsc::Receiver<LinkEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            inventory,
            sysfs,
            rdma,
            cloud,
            publisher,
            events,
            shutdown,
        }
    }

    /// Runs discovery until shutdown.
    ///
    /// Publishes once immediately, then again on every republish-timer
    /// tick and after every debounced burst of link events.
    pub async fn run(mut self) -> Result<()> {
        let cloud = self.cloud.interfaces().await;
        if !cloud.is_empty() {
            info!(interfaces = cloud.len(), "Using cloud provider interface metadata");
        }

        let mut ticker = interval(self.config.publish_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval fires immediately on the first tick; consume it so the
        // loop's leading publish is the only startup publication.
        ticker.tick().await;

        loop {
            self.publish_once(&cloud).await;

            tokio::select! {
                // Agent shutdown (or the sender side went away)
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        info!("Device discovery stopping");
                        return Ok(());
                    }
                }

                // Coarse republish timer
                _ = ticker.tick() => {}

                // Kernel link notification: wait out the burst, then drain
                event = self.events.recv() => {
                    match event {
                        Some(event) => {
                            debug!(ifindex = event.ifindex, "Link change notification");
                            sleep(self.config.link_event_debounce).await;
                            while self.events.try_recv().is_ok() {}
                        }
                        None => {
                            warn!("Link event stream closed, discovery stopping");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Computes and publishes the current device set. Failures are logged;
    /// the next trigger retries from scratch.
    async fn publish_once(&self, cloud: &[CloudInterface]) {
        match self.discover(cloud) {
            Ok(devices) => {
                debug!(devices = devices.len(), "Publishing node network devices");
                if let Err(e) = self.publisher.publish(devices).await {
                    error!(error = %e, "Failed to publish device set");
                }
            }
            Err(e) => error!(error = %e, "Failed to enumerate network devices"),
        }
    }

    /// Enumerates the root namespace and builds the publishable device set.
    fn discover(&self, cloud: &[CloudInterface]) -> Result<Vec<NetworkDevice>> {
        let gateway_index = match self.inventory.default_route_ifindex() {
            Ok(index) => index,
            Err(e) => {
                info!(error = %e, "Could not determine default-route interface");
                None
            }
        };

        let mut devices = Vec::new();
        for link in self.inventory.links()? {
            if Some(link.index) == gateway_index {
                debug!(iface = %link.name, "Excluding default-route interface");
                continue;
            }
            if !is_dns1123_label(&link.name) {
                debug!(iface = %link.name, "Excluding interface with unpublishable name");
                continue;
            }
            if link.loopback {
                continue;
            }
            if link.is_veth() {
                debug!(iface = %link.name, "Excluding veth interface");
                continue;
            }
            let addresses = match self.inventory.link_addresses(link.index) {
                Ok(addresses) => addresses,
                Err(e) => {
                    warn!(iface = %link.name, error = %e, "Failed to read addresses, skipping interface");
                    continue;
                }
            };
            devices.push(self.device_from_link(&link, &addresses, cloud));
        }
        Ok(devices)
    }

    /// Builds the published attribute set for one interface.
    fn device_from_link(
        &self,
        link: &LinkInfo,
        addresses: &[String],
        cloud: &[CloudInterface],
    ) -> NetworkDevice {
        let mut attributes: BTreeMap<String, AttributeValue> = BTreeMap::new();
        attributes.insert("name".to_string(), link.name.as_str().into());

        if let Some(first) = addresses.first() {
            attributes.insert("ip".to_string(), first.as_str().into());
            if let Some(mac) = &link.mac {
                attributes.insert("mac".to_string(), mac.as_str().into());
            }
            attributes.insert("mtu".to_string(), link.mtu.into());
        }

        if let Some(mac) = &link.mac {
            if let Some(provider) = cloud.iter().find(|c| c.mac.eq_ignore_ascii_case(mac)) {
                attributes.insert("cloudNetwork".to_string(), provider.network.as_str().into());
            }
        }

        attributes.insert("encapsulation".to_string(), link.encap.as_str().into());
        attributes.insert("state".to_string(), link.oper_state.as_str().into());
        attributes.insert(
            "alias".to_string(),
            link.alias.clone().unwrap_or_default().into(),
        );
        attributes.insert("type".to_string(), link.type_name().into());

        attributes.insert(
            "rdma".to_string(),
            self.rdma.device_for(&link.name).is_some().into(),
        );
        let total_vfs = self.sysfs.sriov_total_vfs(&link.name);
        attributes.insert("sriov".to_string(), (total_vfs > 0).into());
        if total_vfs > 0 {
            attributes.insert(
                "sriov_vfs".to_string(),
                self.sysfs.sriov_num_vfs(&link.name).into(),
            );
        }

        NetworkDevice {
            name: link.name.clone(),
            attributes,
        }
    }
}
