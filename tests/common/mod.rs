//! Shared in-memory fakes for the integration tests.
//!
//! `FakeHost` models kernel links across namespaces behind [`LinkOps`],
//! records every attempted operation, and fails on demand so rollback
//! paths can be exercised. `FakeClaims` and `FakeRdma` stand in for the
//! orchestrator and the RDMA subsystem.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use netclaim::{
    Allocation, DeviceConfig, DeviceResult, DriverConfig, Error, LinkInfo, LinkOps, NetworkDriver,
    NsContext, PodSandbox, RdmaOps, Reservation, ResourceClaim, ResourceClaims, Result,
    SandboxNamespace, DEFAULT_DRIVER_NAME,
};

pub const ROOT: &str = "root";
pub const POD_NS: &str = "/run/netns/pod-a";

// =============================================================================
// Fake kernel host
// =============================================================================

#[derive(Debug, Clone)]
pub struct FakeLink {
    pub index: u32,
    pub name: String,
    pub alias: Option<String>,
    pub mtu: u32,
    pub up: bool,
    pub addresses: Vec<(IpAddr, u8)>,
}

#[derive(Default)]
struct HostState {
    namespaces: HashMap<String, Vec<FakeLink>>,
    log: Vec<String>,
    fail: Vec<String>,
    next_index: u32,
}

impl HostState {
    /// Logs an attempted operation and reports whether it was scripted
    /// to fail. Failing attempts stay in the log so tests can assert on
    /// the point of failure.
    fn attempt(&mut self, entry: String) -> bool {
        let fail = self.fail.iter().any(|f| *f == entry);
        self.log.push(entry);
        fail
    }

    fn position(&self, ns: &str, index: u32) -> Option<usize> {
        self.namespaces
            .get(ns)?
            .iter()
            .position(|l| l.index == index)
    }
}

/// In-memory link database keyed by namespace.
///
/// `move_link` assigns a fresh interface index on every namespace
/// crossing, matching the kernel's freedom to renumber moved links.
#[derive(Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
}

fn ns_key(ns: NsContext<'_>) -> String {
    match ns {
        NsContext::Root => ROOT.to_string(),
        NsContext::Path(p) => p.display().to_string(),
    }
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(HostState {
                next_index: 1,
                ..HostState::default()
            }),
        })
    }

    /// Seeds a link and returns its assigned index.
    pub fn add_link(&self, ns: &str, name: &str, up: bool) -> u32 {
        let mut state = self.state.lock().unwrap();
        let index = state.next_index;
        state.next_index += 1;
        state
            .namespaces
            .entry(ns.to_string())
            .or_default()
            .push(FakeLink {
                index,
                name: name.to_string(),
                alias: None,
                mtu: 1500,
                up,
                addresses: Vec::new(),
            });
        index
    }

    pub fn set_link_alias(&self, ns: &str, name: &str, alias: &str) {
        let mut state = self.state.lock().unwrap();
        let link = state
            .namespaces
            .get_mut(ns)
            .and_then(|links| links.iter_mut().find(|l| l.name == name))
            .expect("seeded link");
        link.alias = Some(alias.to_string());
    }

    /// Scripts the next operation whose log entry equals `entry` to fail.
    pub fn fail(&self, entry: &str) {
        self.state.lock().unwrap().fail.push(entry.to_string());
    }

    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub fn link(&self, ns: &str, name: &str) -> Option<FakeLink> {
        let state = self.state.lock().unwrap();
        state
            .namespaces
            .get(ns)
            .and_then(|links| links.iter().find(|l| l.name == name))
            .cloned()
    }

    pub fn names(&self, ns: &str) -> Vec<String> {
        let state = self.state.lock().unwrap();
        let mut names: Vec<String> = state
            .namespaces
            .get(ns)
            .map(|links| links.iter().map(|l| l.name.clone()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

fn snapshot(link: &FakeLink) -> LinkInfo {
    LinkInfo {
        index: link.index,
        name: link.name.clone(),
        alias: link.alias.clone(),
        mac: Some(format!("02:00:00:00:00:{:02x}", link.index)),
        mtu: link.mtu,
        up: link.up,
        loopback: false,
        oper_state: if link.up { "up" } else { "down" }.to_string(),
        kind: None,
        encap: "ether".to_string(),
    }
}

impl LinkOps for FakeHost {
    fn link_by_name(&self, ns: NsContext<'_>, name: &str) -> Result<LinkInfo> {
        let key = ns_key(ns);
        let mut state = self.state.lock().unwrap();
        if state.attempt(format!("link_by_name {key} {name}")) {
            return Err(Error::LinkNotFound(name.to_string()));
        }
        state
            .namespaces
            .get(&key)
            .and_then(|links| links.iter().find(|l| l.name == name))
            .map(snapshot)
            .ok_or_else(|| Error::LinkNotFound(name.to_string()))
    }

    fn set_up(&self, ns: NsContext<'_>, index: u32) -> Result<()> {
        let key = ns_key(ns);
        let mut state = self.state.lock().unwrap();
        let Some(pos) = state.position(&key, index) else {
            return Err(Error::LinkNotFound(format!("ifindex {index}")));
        };
        let name = state.namespaces[&key][pos].name.clone();
        if state.attempt(format!("set_up {key} {name}")) {
            return Err(Error::link_op("up", &name, "injected fault"));
        }
        state.namespaces.get_mut(&key).unwrap()[pos].up = true;
        Ok(())
    }

    fn set_down(&self, ns: NsContext<'_>, index: u32) -> Result<()> {
        let key = ns_key(ns);
        let mut state = self.state.lock().unwrap();
        let Some(pos) = state.position(&key, index) else {
            return Err(Error::LinkNotFound(format!("ifindex {index}")));
        };
        let name = state.namespaces[&key][pos].name.clone();
        if state.attempt(format!("set_down {key} {name}")) {
            return Err(Error::link_op("down", &name, "injected fault"));
        }
        state.namespaces.get_mut(&key).unwrap()[pos].up = false;
        Ok(())
    }

    fn set_name(&self, ns: NsContext<'_>, index: u32, name: &str) -> Result<()> {
        let key = ns_key(ns);
        let mut state = self.state.lock().unwrap();
        let Some(pos) = state.position(&key, index) else {
            return Err(Error::LinkNotFound(format!("ifindex {index}")));
        };
        let old = state.namespaces[&key][pos].name.clone();
        if state.attempt(format!("set_name {key} {old} -> {name}")) {
            return Err(Error::link_op("rename", &old, "injected fault"));
        }
        if name.is_empty() {
            return Err(Error::link_op("rename", &old, "empty interface name"));
        }
        let taken = state.namespaces[&key]
            .iter()
            .any(|l| l.name == name && l.index != index);
        if taken {
            return Err(Error::RenameCollision {
                name: old,
                target: name.to_string(),
                reason: "name already in use".to_string(),
            });
        }
        state.namespaces.get_mut(&key).unwrap()[pos].name = name.to_string();
        Ok(())
    }

    fn set_alias(&self, ns: NsContext<'_>, index: u32, alias: &str) -> Result<()> {
        let key = ns_key(ns);
        let mut state = self.state.lock().unwrap();
        let Some(pos) = state.position(&key, index) else {
            return Err(Error::LinkNotFound(format!("ifindex {index}")));
        };
        let name = state.namespaces[&key][pos].name.clone();
        if state.attempt(format!("set_alias {key} {name} {alias}")) {
            return Err(Error::link_op("set alias on", &name, "injected fault"));
        }
        state.namespaces.get_mut(&key).unwrap()[pos].alias = Some(alias.to_string());
        Ok(())
    }

    fn set_mtu(&self, ns: NsContext<'_>, index: u32, mtu: u32) -> Result<()> {
        let key = ns_key(ns);
        let mut state = self.state.lock().unwrap();
        let Some(pos) = state.position(&key, index) else {
            return Err(Error::LinkNotFound(format!("ifindex {index}")));
        };
        let name = state.namespaces[&key][pos].name.clone();
        if state.attempt(format!("set_mtu {key} {name} {mtu}")) {
            return Err(Error::link_op("set mtu on", &name, "injected fault"));
        }
        state.namespaces.get_mut(&key).unwrap()[pos].mtu = mtu;
        Ok(())
    }

    fn add_address(
        &self,
        ns: NsContext<'_>,
        index: u32,
        address: IpAddr,
        prefix: u8,
    ) -> Result<()> {
        let key = ns_key(ns);
        let mut state = self.state.lock().unwrap();
        let Some(pos) = state.position(&key, index) else {
            return Err(Error::LinkNotFound(format!("ifindex {index}")));
        };
        let name = state.namespaces[&key][pos].name.clone();
        if state.attempt(format!("add_address {key} {name} {address}/{prefix}")) {
            return Err(Error::link_op("add address on", &name, "injected fault"));
        }
        state.namespaces.get_mut(&key).unwrap()[pos]
            .addresses
            .push((address, prefix));
        Ok(())
    }

    fn move_link(&self, from: NsContext<'_>, index: u32, to: NsContext<'_>) -> Result<()> {
        let from_key = ns_key(from);
        let to_key = ns_key(to);
        let mut state = self.state.lock().unwrap();
        let Some(pos) = state.position(&from_key, index) else {
            return Err(Error::LinkNotFound(format!("ifindex {index}")));
        };
        let name = state.namespaces[&from_key][pos].name.clone();
        if state.attempt(format!("move_link {from_key} {name} -> {to_key}")) {
            return Err(Error::link_op("move", &name, "injected fault"));
        }
        let mut link = state.namespaces.get_mut(&from_key).unwrap().remove(pos);
        link.index = state.next_index;
        state.next_index += 1;
        state.namespaces.entry(to_key).or_default().push(link);
        Ok(())
    }
}

// =============================================================================
// Fake orchestrator and RDMA subsystem
// =============================================================================

/// Claim objects keyed by namespace and name, as the orchestrator would
/// serve them.
#[derive(Default)]
pub struct FakeClaims {
    claims: Mutex<HashMap<(String, String), ResourceClaim>>,
}

impl FakeClaims {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, claim: ResourceClaim) {
        self.claims
            .lock()
            .unwrap()
            .insert((claim.namespace.clone(), claim.name.clone()), claim);
    }
}

#[async_trait]
impl ResourceClaims for FakeClaims {
    async fn get(&self, namespace: &str, name: &str) -> Result<ResourceClaim> {
        self.claims
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| Error::ClaimFetch {
                namespace: namespace.to_string(),
                name: name.to_string(),
                reason: "claim not found".to_string(),
            })
    }
}

/// RDMA companion registry with scriptable move failures.
#[derive(Default)]
pub struct FakeRdma {
    devices: Mutex<HashMap<String, String>>,
    moves: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl FakeRdma {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Associates a network interface with an RDMA device.
    pub fn map(&self, ifname: &str, device: &str) {
        self.devices
            .lock()
            .unwrap()
            .insert(ifname.to_string(), device.to_string());
    }

    /// Makes every subsequent move attempt fail.
    pub fn fail_moves(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn moves(&self) -> Vec<String> {
        self.moves.lock().unwrap().clone()
    }
}

impl RdmaOps for FakeRdma {
    fn device_for(&self, ifname: &str) -> Option<String> {
        self.devices.lock().unwrap().get(ifname).cloned()
    }

    fn move_to(&self, device: &str, ns: &std::path::Path) -> Result<()> {
        self.moves
            .lock()
            .unwrap()
            .push(format!("to {device} {}", ns.display()));
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::link_op("move", device, "injected fault"));
        }
        Ok(())
    }

    fn move_back(&self, device: &str, ns: &std::path::Path) -> Result<()> {
        self.moves
            .lock()
            .unwrap()
            .push(format!("back {device} {}", ns.display()));
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::link_op("move", device, "injected fault"));
        }
        Ok(())
    }
}

// =============================================================================
// Builders
// =============================================================================

pub fn test_driver(
    claims: Arc<FakeClaims>,
    host: Arc<FakeHost>,
    rdma: Arc<FakeRdma>,
) -> NetworkDriver {
    NetworkDriver::new(
        DriverConfig::default().with_node_name("node-a"),
        claims,
        host,
        rdma,
    )
    .expect("driver construction")
}

/// Allocation with one result per `(request, device)` pair, all from the
/// same pool.
pub fn allocation(results: &[(&str, &str)], configs: Vec<DeviceConfig>) -> Allocation {
    Allocation {
        results: results
            .iter()
            .map(|(request, device)| DeviceResult {
                request: request.to_string(),
                pool: "node-a".to_string(),
                device: device.to_string(),
            })
            .collect(),
        configs,
    }
}

/// Configuration blob addressed to this driver.
pub fn driver_config(requests: &[&str], parameters: serde_json::Value) -> DeviceConfig {
    DeviceConfig {
        driver: DEFAULT_DRIVER_NAME.to_string(),
        requests: requests.iter().map(|r| r.to_string()).collect(),
        parameters,
    }
}

pub fn pod_reservation(uid: &str, name: &str) -> Reservation {
    Reservation {
        resource: "pods".to_string(),
        api_group: String::new(),
        name: name.to_string(),
        uid: uid.to_string(),
    }
}

pub fn sandbox(uid: &str, netns: Option<&str>) -> PodSandbox {
    PodSandbox {
        uid: uid.to_string(),
        name: format!("{uid}-pod"),
        namespace: "default".to_string(),
        namespaces: netns
            .map(|path| {
                vec![SandboxNamespace {
                    kind: "network".to_string(),
                    path: PathBuf::from(path),
                }]
            })
            .unwrap_or_default(),
    }
}
