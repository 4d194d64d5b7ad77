//! Kernel device capability traits.
//!
//! The mover and the discovery loop consume these traits instead of calling
//! into netlink directly; [`crate::netdev::netlink::Netlink`] is the
//! production implementation, and tests substitute in-memory fakes keyed by
//! namespace.

use std::net::IpAddr;
use std::path::Path;

use crate::error::Result;

/// Which network namespace an operation applies to.
///
/// Only the network namespace is ever switched — mount namespaces stay
/// untouched, so namespace paths remain openable from any context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NsContext<'a> {
    /// The host's root network namespace.
    Root,
    /// A namespace addressed by path (procfs or bind-mounted).
    Path(&'a Path),
}

impl std::fmt::Display for NsContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NsContext::Root => write!(f, "root"),
            NsContext::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

/// Point-in-time snapshot of one kernel link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    /// Kernel interface index, unique within its namespace.
    pub index: u32,
    pub name: String,
    /// Free-form alias attribute, if set.
    pub alias: Option<String>,
    /// Hardware address in colon-separated hex, when the link has one.
    pub mac: Option<String>,
    pub mtu: u32,
    /// Administrative up flag (`IFF_UP`).
    pub up: bool,
    pub loopback: bool,
    /// Operational state as reported by the kernel (`up`, `down`, ...).
    pub oper_state: String,
    /// Link kind (`veth`, `bridge`, ...); `None` for physical devices.
    pub kind: Option<String>,
    /// Encapsulation derived from the hardware type (`ether`, `loopback`).
    pub encap: String,
}

impl LinkInfo {
    /// Device type string as published to the orchestrator.
    pub fn type_name(&self) -> &str {
        self.kind.as_deref().unwrap_or("device")
    }

    /// Whether this link is one side of a veth pair.
    pub fn is_veth(&self) -> bool {
        self.kind.as_deref() == Some("veth")
    }
}

/// A kernel link-change notification.
///
/// The discovery loop only uses events as a recompute trigger; the index is
/// carried for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkEvent {
    pub ifindex: u32,
}

/// Primitive link operations, addressable in any network namespace.
///
/// Implementations must run namespaced calls without leaking the namespace
/// switch into the caller's thread (see [`crate::netdev::netns`]).
///
/// Error contract: resolution of an absent name fails with
/// [`crate::Error::LinkNotFound`]; a rename onto a taken name fails with
/// [`crate::Error::RenameCollision`]; everything else is a
/// [`crate::Error::LinkOperation`].
pub trait LinkOps: Send + Sync {
    /// Resolves a link by name.
    fn link_by_name(&self, ns: NsContext<'_>, name: &str) -> Result<LinkInfo>;

    /// Sets the link administratively up.
    fn set_up(&self, ns: NsContext<'_>, index: u32) -> Result<()>;

    /// Sets the link administratively down.
    fn set_down(&self, ns: NsContext<'_>, index: u32) -> Result<()>;

    /// Renames the link. Requires the link to be down on devices that
    /// enforce the rename-while-running restriction.
    fn set_name(&self, ns: NsContext<'_>, index: u32, name: &str) -> Result<()>;

    /// Sets the link's alias attribute.
    fn set_alias(&self, ns: NsContext<'_>, index: u32, alias: &str) -> Result<()>;

    /// Sets the link MTU.
    fn set_mtu(&self, ns: NsContext<'_>, index: u32, mtu: u32) -> Result<()>;

    /// Adds a static address to the link.
    fn add_address(&self, ns: NsContext<'_>, index: u32, address: IpAddr, prefix: u8)
        -> Result<()>;

    /// Moves the link from one namespace to another by file-descriptor
    /// reference. The index is relative to `from`; the kernel may assign a
    /// different index in `to`.
    fn move_link(&self, from: NsContext<'_>, index: u32, to: NsContext<'_>) -> Result<()>;
}

/// Root-namespace enumeration used by discovery.
pub trait HostInventory: Send + Sync {
    /// Lists all links in the root namespace.
    fn links(&self) -> Result<Vec<LinkInfo>>;

    /// Addresses assigned to a link, in CIDR notation, global scope first.
    fn link_addresses(&self, index: u32) -> Result<Vec<String>>;

    /// Interface index carrying the node's default route, if any.
    fn default_route_ifindex(&self) -> Result<Option<u32>>;
}

/// RDMA companion device operations. All callers treat these as
/// best-effort: failures are logged, never propagated.
pub trait RdmaOps: Send + Sync {
    /// RDMA device associated with a network interface, if any.
    fn device_for(&self, ifname: &str) -> Option<String>;

    /// Moves an RDMA device from the root namespace into `ns`.
    fn move_to(&self, device: &str, ns: &Path) -> Result<()>;

    /// Moves an RDMA device out of `ns` back to the root namespace.
    fn move_back(&self, device: &str, ns: &Path) -> Result<()>;
}
