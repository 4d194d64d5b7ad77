//! Moving physical interfaces between the root and workload namespaces.
//!
//! An interface move is a multi-step netlink dance, and the kernel gives
//! no transaction around it: the link must be taken down, renamed out of
//! the way (the workload may want the name of an interface that also
//! exists on the host), pushed through the namespace boundary, and then
//! re-identified on the far side. [`DeviceMover`] owns that dance in both
//! directions and unwinds completed steps in reverse when a later one
//! fails, so a half-moved device does not stay stranded.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::constants::TEMP_NAME_PREFIX;
use crate::error::{Error, Result};
use crate::netdev::ops::{LinkOps, NsContext};

/// Plan for moving one host interface into a workload namespace.
///
/// `dest` is the name the interface takes inside the namespace; `mtu` and
/// `address` are optional settings requested through claim configuration,
/// applied after the rename and before the link comes up.
#[derive(Debug, Clone)]
pub struct DeviceMove {
    /// Interface name in the root namespace.
    pub source: String,
    /// Path to the target network namespace.
    pub netns: PathBuf,
    /// Interface name inside the target namespace.
    pub dest: String,
    /// MTU to set inside the namespace, if requested.
    pub mtu: Option<u32>,
    /// Address and prefix length to assign inside the namespace, if requested.
    pub address: Option<(IpAddr, u8)>,
}

/// Outcome of a successful [`DeviceMover::inject`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovedDevice {
    /// Name the interface carries inside the workload namespace.
    pub name: String,
    /// Kernel interface index inside the workload namespace.
    pub index: u32,
}

/// Performs interface moves through a [`LinkOps`] backend.
pub struct DeviceMover {
    link: Arc<dyn LinkOps>,
}

impl DeviceMover {
    pub fn new(link: Arc<dyn LinkOps>) -> Self {
        Self { link }
    }

    /// Moves a host interface into a workload namespace.
    ///
    /// Sequence: resolve the link, take it down, rename it to a transit
    /// name, move it through the namespace boundary, re-resolve it on the
    /// far side (the kernel may assign a new index), record the original
    /// host name as the interface alias, rename to the destination name,
    /// apply any requested MTU and address, bring the link up, and resolve
    /// once more under the final name for the returned handle.
    ///
    /// On failure the completed steps are undone in reverse, ending with
    /// the device back in the root namespace under its original name and
    /// administrative state. The unwind itself is best effort; steps that
    /// cannot be undone are logged and skipped.
    pub fn inject(&self, mv: &DeviceMove) -> Result<MovedDevice> {
        let ns = NsContext::Path(&mv.netns);

        let host = self.link.link_by_name(NsContext::Root, &mv.source)?;
        let was_up = host.up;
        let transit = temp_name(host.index);

        self.link.set_down(NsContext::Root, host.index)?;

        if let Err(e) = self.link.set_name(NsContext::Root, host.index, &transit) {
            if was_up {
                let _ = self.link.set_up(NsContext::Root, host.index);
            }
            return Err(e);
        }

        if let Err(e) = self.link.move_link(NsContext::Root, host.index, ns) {
            self.restore_in_root(host.index, &host.name, was_up);
            return Err(e);
        }

        // From here the device lives in the workload namespace. Its index
        // is only meaningful there, so every further step and every unwind
        // goes through the namespace context.
        let inner = match self.link.link_by_name(ns, &transit) {
            Ok(inner) => inner,
            Err(e) => {
                // Without a handle inside the namespace there is nothing
                // left to unwind against.
                warn!(
                    device = %mv.source,
                    namespace = %mv.netns.display(),
                    "Device moved but could not be resolved in its new namespace"
                );
                return Err(e);
            }
        };

        if let Err((e, renamed)) = self.configure(ns, inner.index, mv, &host.name) {
            self.rollback_inject(ns, inner.index, renamed, &transit, &host.name, was_up);
            return Err(e);
        }

        // Fresh handle under the final name; the snapshot held so far
        // predates the rename and flag changes.
        match self.link.link_by_name(ns, &mv.dest) {
            Ok(dev) => {
                debug!(
                    device = %mv.source,
                    name = %dev.name,
                    namespace = %mv.netns.display(),
                    "Moved device into namespace"
                );
                Ok(MovedDevice {
                    name: dev.name,
                    index: dev.index,
                })
            }
            Err(e) => {
                // The link is already up; renaming it back requires taking
                // it down again first.
                let _ = self.link.set_down(ns, inner.index);
                self.rollback_inject(ns, inner.index, true, &transit, &host.name, was_up);
                Err(e)
            }
        }
    }

    /// In-namespace half of the inject sequence. On failure, reports
    /// whether the rename to the destination name already happened so the
    /// caller knows which name to unwind from.
    fn configure(
        &self,
        ns: NsContext<'_>,
        index: u32,
        mv: &DeviceMove,
        host_name: &str,
    ) -> std::result::Result<(), (Error, bool)> {
        self.link
            .set_alias(ns, index, host_name)
            .map_err(|e| (e, false))?;
        self.link
            .set_name(ns, index, &mv.dest)
            .map_err(|e| (e, false))?;
        if let Some(mtu) = mv.mtu {
            self.link.set_mtu(ns, index, mtu).map_err(|e| (e, true))?;
        }
        if let Some((address, prefix)) = mv.address {
            self.link
                .add_address(ns, index, address, prefix)
                .map_err(|e| (e, true))?;
        }
        self.link.set_up(ns, index).map_err(|e| (e, true))?;
        Ok(())
    }

    /// Returns a previously injected interface to the root namespace.
    ///
    /// The original host name is recovered from the interface alias set
    /// during [`inject`](Self::inject). The interface is left down; the
    /// host side decides when to bring reclaimed devices back up.
    pub fn release(&self, netns: &Path, name: &str) -> Result<()> {
        let ns = NsContext::Path(netns);

        let dev = self.link.link_by_name(ns, name)?;
        let was_up = dev.up;
        let transit = temp_name(dev.index);

        self.link.set_down(ns, dev.index)?;

        if let Err(e) = self.link.set_name(ns, dev.index, &transit) {
            if was_up {
                let _ = self.link.set_up(ns, dev.index);
            }
            return Err(e);
        }

        if let Err(e) = self.link.move_link(ns, dev.index, NsContext::Root) {
            if let Err(e2) = self.link.set_name(ns, dev.index, name) {
                warn!(device = name, error = %e2, "Failed to restore name after aborted release");
            } else if was_up {
                let _ = self.link.set_up(ns, dev.index);
            }
            return Err(e);
        }

        let root_dev = match self.link.link_by_name(NsContext::Root, &transit) {
            Ok(dev) => dev,
            Err(e) => {
                return Err(Error::StateRestoreFailed {
                    name: name.to_string(),
                    reason: format!("device not found in root namespace after move: {e}"),
                });
            }
        };

        let original = root_dev.alias.clone().unwrap_or_default();
        if let Err(e) = self.link.set_name(NsContext::Root, root_dev.index, &original) {
            // Push the device back into the workload namespace so a retry
            // starts from a known state.
            self.return_to_namespace(ns, root_dev.index, &transit, name, was_up);
            return Err(Error::StateRestoreFailed {
                name: name.to_string(),
                reason: format!("restore host name {original:?}: {e}"),
            });
        }

        debug!(device = %original, namespace = %netns.display(), "Released device to root namespace");
        Ok(())
    }

    /// Undoes root-namespace steps of a failed inject: the device is still
    /// in the root namespace under the transit name.
    fn restore_in_root(&self, index: u32, host_name: &str, was_up: bool) {
        if let Err(e) = self.link.set_name(NsContext::Root, index, host_name) {
            warn!(device = host_name, error = %e, "Rollback failed to restore device name");
            return;
        }
        if was_up {
            if let Err(e) = self.link.set_up(NsContext::Root, index) {
                warn!(device = host_name, error = %e, "Rollback failed to bring device back up");
            }
        }
    }

    /// Undoes in-namespace steps of a failed inject and pulls the device
    /// back into the root namespace.
    fn rollback_inject(
        &self,
        ns: NsContext<'_>,
        index: u32,
        renamed: bool,
        transit: &str,
        host_name: &str,
        was_up: bool,
    ) {
        if renamed {
            if let Err(e) = self.link.set_name(ns, index, transit) {
                warn!(device = host_name, error = %e, "Rollback failed to restore transit name");
                return;
            }
        }
        if let Err(e) = self.link.move_link(ns, index, NsContext::Root) {
            warn!(
                device = host_name,
                namespace = %ns,
                error = %e,
                "Rollback failed to return device to the root namespace"
            );
            return;
        }
        match self.link.link_by_name(NsContext::Root, transit) {
            Ok(dev) => self.restore_in_root(dev.index, host_name, was_up),
            Err(e) => {
                warn!(device = host_name, error = %e, "Rollback lost track of device after move back");
            }
        }
    }

    /// Failed release recovery: move the device back into the workload
    /// namespace and restore the name and state it had there.
    fn return_to_namespace(
        &self,
        ns: NsContext<'_>,
        root_index: u32,
        transit: &str,
        name: &str,
        was_up: bool,
    ) {
        if let Err(e) = self.link.move_link(NsContext::Root, root_index, ns) {
            warn!(device = name, error = %e, "Failed to return device to workload namespace");
            return;
        }
        match self.link.link_by_name(ns, transit) {
            Ok(dev) => {
                if let Err(e) = self.link.set_name(ns, dev.index, name) {
                    warn!(device = name, error = %e, "Failed to restore name in workload namespace");
                    return;
                }
                if was_up {
                    let _ = self.link.set_up(ns, dev.index);
                }
            }
            Err(e) => {
                warn!(device = name, error = %e, "Lost track of device returned to workload namespace");
            }
        }
    }
}

fn temp_name(index: u32) -> String {
    format!("{TEMP_NAME_PREFIX}{index}")
}
