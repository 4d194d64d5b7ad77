//! Sandbox lifecycle coordinator.
//!
//! Implements [`SandboxHooks`] for [`NetworkDriver`]: when a sandbox with a
//! recorded allocation starts, its devices move into the sandbox's network
//! namespace one by one; when it stops, whatever can be reclaimed moves
//! back and the record is evicted regardless.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::claims::Allocation;
use crate::driver::NetworkDriver;
use crate::error::Result;
use crate::netdev::DeviceMove;
use crate::traits::SandboxHooks;

/// A pod sandbox as reported by the container runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSandbox {
    /// Workload uid; the key into the allocation store.
    pub uid: String,
    pub name: String,
    pub namespace: String,
    /// Kernel namespaces the runtime created for this sandbox.
    #[serde(default)]
    pub namespaces: Vec<SandboxNamespace>,
}

/// One kernel namespace entry of a sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxNamespace {
    /// Namespace type (`network`, `pid`, `ipc`, ...).
    pub kind: String,
    /// Bind-mount or procfs path of the namespace.
    pub path: PathBuf,
}

impl PodSandbox {
    /// Path of the sandbox's network namespace, if the runtime created one.
    ///
    /// Host-network sandboxes carry no usable entry and yield `None`.
    pub fn network_namespace(&self) -> Option<&Path> {
        self.namespaces
            .iter()
            .find(|ns| ns.kind == "network")
            .map(|ns| ns.path.as_path())
            .filter(|path| !path.as_os_str().is_empty())
    }
}

#[async_trait]
impl SandboxHooks for NetworkDriver {
    async fn sandbox_created(&self, sandbox: &PodSandbox) -> Result<()> {
        let Some(allocation) = self.store.get_workload(&sandbox.uid)? else {
            debug!(pod = %sandbox.uid, "No allocation recorded for sandbox");
            return Ok(());
        };

        let Some(netns) = sandbox.network_namespace() else {
            info!(
                pod = %sandbox.uid,
                name = %sandbox.name,
                "Sandbox has no network namespace, not attaching devices"
            );
            return Ok(());
        };

        let driver = self.config.driver_name.as_str();
        for result in &allocation.results {
            let params = allocation.params_for(driver, &result.request)?;

            // Resolve the RDMA companion while the interface is still
            // visible in the root namespace.
            let rdma_dev = self.rdma.device_for(&result.device);

            let mv = DeviceMove {
                source: result.device.clone(),
                netns: netns.to_path_buf(),
                dest: params.name.clone().unwrap_or_else(|| result.device.clone()),
                mtu: params.mtu,
                address: params.address.zip(params.effective_prefix()),
            };
            let moved = match self.mover.inject(&mv) {
                Ok(moved) => moved,
                Err(e) => {
                    error!(
                        pod = %sandbox.uid,
                        device = %result.device,
                        error = %e,
                        "Failed to attach device to sandbox"
                    );
                    return Err(e);
                }
            };
            info!(
                pod = %sandbox.uid,
                device = %result.device,
                name = %moved.name,
                namespace = %netns.display(),
                "Attached device to sandbox"
            );

            if let Some(rdma_dev) = rdma_dev {
                if let Err(e) = self.rdma.move_to(&rdma_dev, netns) {
                    warn!(
                        pod = %sandbox.uid,
                        device = %rdma_dev,
                        error = %e,
                        "Failed to move RDMA companion device, continuing"
                    );
                }
            }
        }
        Ok(())
    }

    async fn sandbox_stopped(&self, sandbox: &PodSandbox) -> Result<()> {
        let Some(allocation) = self.store.get_workload(&sandbox.uid)? else {
            debug!(pod = %sandbox.uid, "No allocation recorded for sandbox");
            return Ok(());
        };

        if let Some(netns) = sandbox.network_namespace() {
            self.reclaim_devices(sandbox, netns, &allocation);
        } else {
            debug!(pod = %sandbox.uid, "Sandbox has no network namespace, nothing to reclaim");
        }

        // The sandbox is gone either way; a record that outlives it would
        // pin devices to a workload uid that can never come back.
        self.store.remove_workload(&sandbox.uid)?;
        Ok(())
    }
}

impl NetworkDriver {
    /// Best-effort device reclamation for a stopping sandbox. Each failure
    /// is logged and the remaining devices are still attempted.
    fn reclaim_devices(&self, sandbox: &PodSandbox, netns: &Path, allocation: &Allocation) {
        let driver = self.config.driver_name.as_str();
        for result in &allocation.results {
            let dest = match allocation.params_for(driver, &result.request) {
                Ok(params) => params.name.unwrap_or_else(|| result.device.clone()),
                Err(e) => {
                    warn!(
                        pod = %sandbox.uid,
                        device = %result.device,
                        error = %e,
                        "Unparseable device configuration at release, assuming original name"
                    );
                    result.device.clone()
                }
            };

            if let Err(e) = self.mover.release(netns, &dest) {
                warn!(
                    pod = %sandbox.uid,
                    device = %dest,
                    namespace = %netns.display(),
                    error = %e,
                    "Failed to release device from sandbox, continuing"
                );
                continue;
            }
            debug!(pod = %sandbox.uid, device = %dest, "Released device from sandbox");

            if let Some(rdma_dev) = self.rdma.device_for(&result.device) {
                if let Err(e) = self.rdma.move_back(&rdma_dev, netns) {
                    warn!(
                        pod = %sandbox.uid,
                        device = %rdma_dev,
                        error = %e,
                        "Failed to reclaim RDMA companion device"
                    );
                }
            }
        }
    }
}
