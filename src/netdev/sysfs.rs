//! Per-interface sysfs reads.
//!
//! SR-IOV virtual-function counts and RDMA companion devices are exposed
//! under `/sys/class/net/<ifname>/device/`. Readers here degrade to "not
//! present" on any error; sysfs layout varies across drivers and a missing
//! file just means the interface lacks the capability.

use std::fs;
use std::path::PathBuf;

use crate::constants::SYSFS_NET_ROOT;

/// Reads interface capability files under a configurable sysfs root.
#[derive(Debug, Clone)]
pub struct SysfsReader {
    root: PathBuf,
}

impl Default for SysfsReader {
    fn default() -> Self {
        Self::with_root(SYSFS_NET_ROOT)
    }
}

impl SysfsReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `root` instead of the system tree. Tests point this at a
    /// temporary directory.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Number of virtual functions the device supports; 0 when the
    /// interface is not SR-IOV capable.
    pub fn sriov_total_vfs(&self, ifname: &str) -> u32 {
        self.read_device_u32(ifname, "sriov_totalvfs")
    }

    /// Number of virtual functions currently configured.
    pub fn sriov_num_vfs(&self, ifname: &str) -> u32 {
        self.read_device_u32(ifname, "sriov_numvfs")
    }

    /// RDMA device backed by this interface, if any.
    pub fn rdma_device(&self, ifname: &str) -> Option<String> {
        if !valid_ifname(ifname) {
            return None;
        }
        let dir = self.root.join(ifname).join("device").join("infiniband");
        let mut names: Vec<String> = fs::read_dir(dir)
            .ok()?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        names.into_iter().next()
    }

    fn read_device_u32(&self, ifname: &str, file: &str) -> u32 {
        if !valid_ifname(ifname) {
            return 0;
        }
        let path = self.root.join(ifname).join("device").join(file);
        fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// Interface names come from the kernel or from allocation records; reject
/// anything that could escape the sysfs root.
fn valid_ifname(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && name != "." && name != ".."
}
