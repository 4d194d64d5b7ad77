//! rtnetlink backend for link operations and host enumeration.
//!
//! Every request uses a short-lived socket: the kernel scopes a netlink
//! socket to the network namespace of the thread that created it, so
//! namespaced operations open their socket on the switched thread (see
//! [`with_netns`]) and nothing here shares sockets across namespaces.
//!
//! Requests always carry `NLM_F_ACK`; a request/response exchange ends on
//! the explicit ack (or error), a dump ends on the done marker.

use std::fs::File;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::unix::io::AsRawFd;

use netlink_packet_core::{
    NetlinkHeader, NetlinkMessage, NetlinkPayload, NLM_F_ACK, NLM_F_CREATE, NLM_F_DUMP,
    NLM_F_EXCL, NLM_F_REQUEST,
};
use netlink_packet_route::address::nlas::Nla as AddressNla;
use netlink_packet_route::link::nlas::{Info, InfoKind, Nla as LinkNla, State};
use netlink_packet_route::route::nlas::Nla as RouteNla;
use netlink_packet_route::{AddressMessage, LinkMessage, RouteMessage, RtnlMessage};
use netlink_sys::{protocols::NETLINK_ROUTE, Socket, SocketAddr};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error};

use crate::constants::{NETLINK_RECV_BUFFER, SELF_NETNS_PATH};
use crate::error::{Error, Result};
use crate::netdev::netns::with_netns;
use crate::netdev::ops::{HostInventory, LinkEvent, LinkInfo, LinkOps, NsContext};

/// rtnetlink multicast group for link state changes (RTMGRP_LINK).
const RTMGRP_LINK: u32 = 1;

// ============================================================================
// Socket plumbing
// ============================================================================

/// One request/response rtnetlink exchange.
struct RtnlSocket {
    socket: Socket,
    sequence: u32,
}

impl RtnlSocket {
    /// Opens a socket in the calling thread's network namespace.
    fn connect() -> Result<Self> {
        let mut socket = Socket::new(NETLINK_ROUTE)?;
        socket.bind_auto()?;
        socket.connect(&SocketAddr::new(0, 0))?;
        Ok(Self {
            socket,
            sequence: 0,
        })
    }

    /// Sends `message` and collects the response payloads.
    ///
    /// `extra_flags` is OR-ed into the header on top of
    /// `NLM_F_REQUEST | NLM_F_ACK` (pass `NLM_F_DUMP` for enumerations).
    /// Kernel errors come back as raw OS errors so callers can classify
    /// them against their own error taxonomy.
    fn request(&mut self, message: RtnlMessage, extra_flags: u16) -> io::Result<Vec<RtnlMessage>> {
        self.sequence += 1;
        let mut packet = NetlinkMessage {
            header: NetlinkHeader::default(),
            payload: NetlinkPayload::from(message),
        };
        packet.header.flags = NLM_F_REQUEST | NLM_F_ACK | extra_flags;
        packet.header.sequence_number = self.sequence;
        packet.finalize();

        let mut send_buf = vec![0u8; packet.buffer_len()];
        packet.serialize(&mut send_buf[..]);
        self.socket.send(&send_buf, 0)?;

        let mut responses = Vec::new();
        let mut recv_buf = vec![0u8; NETLINK_RECV_BUFFER];
        loop {
            let len = self.socket.recv(&mut &mut recv_buf[..], 0)?;
            let mut offset = 0;
            while offset < len {
                let msg = NetlinkMessage::<RtnlMessage>::deserialize(&recv_buf[offset..len])
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
                let size = msg.header.length as usize;
                match msg.payload {
                    NetlinkPayload::Done => return Ok(responses),
                    NetlinkPayload::Error(e) if e.code != 0 => {
                        return Err(io::Error::from_raw_os_error(-e.code));
                    }
                    NetlinkPayload::Error(_) | NetlinkPayload::Ack(_) => return Ok(responses),
                    NetlinkPayload::InnerMessage(inner) => responses.push(inner),
                    _ => {}
                }
                if size == 0 {
                    break;
                }
                offset += size;
            }
        }
    }
}

// ============================================================================
// LinkOps implementation
// ============================================================================

/// Production [`LinkOps`] and [`HostInventory`] backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct Netlink;

impl Netlink {
    pub fn new() -> Self {
        Self
    }

    /// Runs `f` with a socket opened in the requested namespace context.
    ///
    /// For [`NsContext::Root`] the socket opens on the calling thread; for
    /// a namespace path the call runs on a dedicated switched thread and
    /// `f` additionally receives the root namespace's file descriptor.
    fn with_socket<T, F>(&self, ns: NsContext<'_>, f: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut RtnlSocket, Option<&File>) -> Result<T> + Send,
    {
        match ns {
            NsContext::Root => {
                let mut socket = RtnlSocket::connect()?;
                f(&mut socket, None)
            }
            NsContext::Path(path) => with_netns(path, |root_ns| {
                let mut socket = RtnlSocket::connect()?;
                f(&mut socket, Some(root_ns))
            }),
        }
    }

    fn set_link(&self, ns: NsContext<'_>, op: &str, index: u32, message: LinkMessage) -> Result<()> {
        self.with_socket(ns, |socket, _| {
            socket
                .request(RtnlMessage::SetLink(message), 0)
                .map_err(|e| Error::link_op(op, format!("ifindex {index}"), e))?;
            Ok(())
        })
    }
}

impl LinkOps for Netlink {
    fn link_by_name(&self, ns: NsContext<'_>, name: &str) -> Result<LinkInfo> {
        self.with_socket(ns, |socket, _| {
            let mut message = LinkMessage::default();
            message.nlas.push(LinkNla::IfName(name.to_string()));
            let responses = socket
                .request(RtnlMessage::GetLink(message), 0)
                .map_err(|e| resolve_error(name, e))?;
            for response in responses {
                if let RtnlMessage::NewLink(link) = response {
                    return Ok(parse_link(&link));
                }
            }
            Err(Error::LinkNotFound(name.to_string()))
        })
    }

    fn set_up(&self, ns: NsContext<'_>, index: u32) -> Result<()> {
        let mut message = LinkMessage::default();
        message.header.index = index;
        message.header.flags |= libc::IFF_UP as u32;
        message.header.change_mask |= libc::IFF_UP as u32;
        self.set_link(ns, "set up", index, message)
    }

    fn set_down(&self, ns: NsContext<'_>, index: u32) -> Result<()> {
        let mut message = LinkMessage::default();
        message.header.index = index;
        message.header.flags &= !(libc::IFF_UP as u32);
        message.header.change_mask |= libc::IFF_UP as u32;
        self.set_link(ns, "set down", index, message)
    }

    fn set_name(&self, ns: NsContext<'_>, index: u32, name: &str) -> Result<()> {
        self.with_socket(ns, |socket, _| {
            let mut message = LinkMessage::default();
            message.header.index = index;
            message.nlas.push(LinkNla::IfName(name.to_string()));
            socket
                .request(RtnlMessage::SetLink(message), 0)
                .map_err(|e| rename_error(index, name, e))?;
            Ok(())
        })
    }

    fn set_alias(&self, ns: NsContext<'_>, index: u32, alias: &str) -> Result<()> {
        let mut message = LinkMessage::default();
        message.header.index = index;
        message.nlas.push(LinkNla::IfAlias(alias.to_string()));
        self.set_link(ns, "set alias on", index, message)
    }

    fn set_mtu(&self, ns: NsContext<'_>, index: u32, mtu: u32) -> Result<()> {
        let mut message = LinkMessage::default();
        message.header.index = index;
        message.nlas.push(LinkNla::Mtu(mtu));
        self.set_link(ns, "set mtu on", index, message)
    }

    fn add_address(
        &self,
        ns: NsContext<'_>,
        index: u32,
        address: IpAddr,
        prefix: u8,
    ) -> Result<()> {
        self.with_socket(ns, |socket, _| {
            let mut message = AddressMessage::default();
            message.header.index = index;
            message.header.prefix_len = prefix;
            match address {
                IpAddr::V4(v4) => {
                    message.header.family = libc::AF_INET as u8;
                    let bytes = v4.octets().to_vec();
                    message.nlas.push(AddressNla::Address(bytes.clone()));
                    message.nlas.push(AddressNla::Local(bytes));
                }
                IpAddr::V6(v6) => {
                    message.header.family = libc::AF_INET6 as u8;
                    message.nlas.push(AddressNla::Address(v6.octets().to_vec()));
                }
            }
            socket
                .request(
                    RtnlMessage::NewAddress(message),
                    NLM_F_CREATE | NLM_F_EXCL,
                )
                .map_err(|e| {
                    Error::link_op(
                        format!("add address {address}/{prefix} to"),
                        format!("ifindex {index}"),
                        e,
                    )
                })?;
            Ok(())
        })
    }

    fn move_link(&self, from: NsContext<'_>, index: u32, to: NsContext<'_>) -> Result<()> {
        self.with_socket(from, |socket, root_ns| {
            // The target namespace is referenced by file descriptor; keep
            // the handle open until the request is acked.
            let target = match to {
                NsContext::Path(path) => {
                    File::open(path).map_err(|e| Error::NamespaceSwitchFailed {
                        path: path.to_path_buf(),
                        reason: e.to_string(),
                    })?
                }
                NsContext::Root => match root_ns {
                    Some(fd) => fd.try_clone().map_err(Error::Io)?,
                    None => File::open(SELF_NETNS_PATH).map_err(Error::Io)?,
                },
            };
            let mut message = LinkMessage::default();
            message.header.index = index;
            message.nlas.push(LinkNla::NetNsFd(target.as_raw_fd()));
            socket
                .request(RtnlMessage::SetLink(message), 0)
                .map_err(|e| Error::link_op("move", format!("ifindex {index}"), e))?;
            Ok(())
        })
    }
}

// ============================================================================
// HostInventory implementation
// ============================================================================

impl HostInventory for Netlink {
    fn links(&self) -> Result<Vec<LinkInfo>> {
        let mut socket = RtnlSocket::connect()?;
        let responses = socket
            .request(RtnlMessage::GetLink(LinkMessage::default()), NLM_F_DUMP)
            .map_err(|e| Error::link_op("enumerate", "root namespace", e))?;
        Ok(responses
            .into_iter()
            .filter_map(|response| match response {
                RtnlMessage::NewLink(link) => Some(parse_link(&link)),
                _ => None,
            })
            .collect())
    }

    fn link_addresses(&self, index: u32) -> Result<Vec<String>> {
        let mut socket = RtnlSocket::connect()?;
        let responses = socket
            .request(
                RtnlMessage::GetAddress(AddressMessage::default()),
                NLM_F_DUMP,
            )
            .map_err(|e| Error::link_op("list addresses of", format!("ifindex {index}"), e))?;

        // (scope, cidr); global scope is 0, so sorting by scope puts
        // routable addresses first.
        let mut found: Vec<(u8, String)> = Vec::new();
        for response in responses {
            let RtnlMessage::NewAddress(message) = response else {
                continue;
            };
            if message.header.index != index {
                continue;
            }
            let mut local = None;
            let mut address = None;
            for nla in &message.nlas {
                match nla {
                    AddressNla::Local(bytes) => local = parse_ip(bytes),
                    AddressNla::Address(bytes) => address = parse_ip(bytes),
                    _ => {}
                }
            }
            if let Some(ip) = local.or(address) {
                found.push((
                    message.header.scope,
                    format!("{ip}/{}", message.header.prefix_len),
                ));
            }
        }
        found.sort_by_key(|(scope, _)| *scope);
        Ok(found.into_iter().map(|(_, cidr)| cidr).collect())
    }

    fn default_route_ifindex(&self) -> Result<Option<u32>> {
        let mut socket = RtnlSocket::connect()?;
        let mut request = RouteMessage::default();
        request.header.address_family = libc::AF_INET as u8;
        let responses = socket
            .request(RtnlMessage::GetRoute(request), NLM_F_DUMP)
            .map_err(|e| Error::link_op("list routes in", "root namespace", e))?;

        for response in responses {
            let RtnlMessage::NewRoute(message) = response else {
                continue;
            };
            if let Some(ifindex) = route_gateway_ifindex(&message) {
                return Ok(Some(ifindex));
            }
        }
        Ok(None)
    }
}

// ============================================================================
// Link monitor
// ============================================================================

/// Subscribes to kernel link notifications and forwards them to `events`.
///
/// Runs on a dedicated thread because the subscription socket read is
/// blocking. A full channel drops the notification, which is harmless: any
/// queued event already triggers a full re-enumeration.
pub fn spawn_link_monitor(events: mpsc::Sender<LinkEvent>) -> Result<()> {
    let mut socket = Socket::new(NETLINK_ROUTE)?;
    socket.bind(&SocketAddr::new(0, RTMGRP_LINK))?;
    std::thread::Builder::new()
        .name("link-monitor".to_string())
        .spawn(move || monitor_loop(socket, events))
        .map_err(Error::Io)?;
    Ok(())
}

fn monitor_loop(mut socket: Socket, events: mpsc::Sender<LinkEvent>) {
    let mut buf = vec![0u8; NETLINK_RECV_BUFFER];
    loop {
        let len = match socket.recv(&mut &mut buf[..], 0) {
            Ok(len) => len,
            Err(e) => {
                error!(error = %e, "Link monitor socket failed");
                return;
            }
        };
        let mut offset = 0;
        while offset < len {
            let msg = match NetlinkMessage::<RtnlMessage>::deserialize(&buf[offset..len]) {
                Ok(msg) => msg,
                Err(e) => {
                    debug!(error = %e, "Undecodable link notification");
                    break;
                }
            };
            let size = msg.header.length as usize;
            if let NetlinkPayload::InnerMessage(
                RtnlMessage::NewLink(link) | RtnlMessage::DelLink(link),
            ) = msg.payload
            {
                let event = LinkEvent {
                    ifindex: link.header.index,
                };
                match events.try_send(event) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Closed(_)) => return,
                }
            }
            if size == 0 {
                break;
            }
            offset += size;
        }
    }
}

// ============================================================================
// Message parsing
// ============================================================================

/// Flattens a kernel link message into [`LinkInfo`].
fn parse_link(message: &LinkMessage) -> LinkInfo {
    let flags = message.header.flags;
    let mut info = LinkInfo {
        index: message.header.index,
        name: String::new(),
        alias: None,
        mac: None,
        mtu: 0,
        up: flags & (libc::IFF_UP as u32) != 0,
        loopback: flags & (libc::IFF_LOOPBACK as u32) != 0,
        oper_state: "unknown".to_string(),
        kind: None,
        encap: encap_name(message.header.link_layer_type).to_string(),
    };
    for nla in &message.nlas {
        match nla {
            LinkNla::IfName(name) => info.name = name.clone(),
            LinkNla::IfAlias(alias) if !alias.is_empty() => info.alias = Some(alias.clone()),
            LinkNla::Mtu(mtu) => info.mtu = *mtu,
            LinkNla::Address(bytes) => info.mac = Some(format_mac(bytes)),
            LinkNla::OperState(state) => info.oper_state = oper_state_name(state).to_string(),
            LinkNla::Info(infos) => {
                for item in infos {
                    if let Info::Kind(kind) = item {
                        info.kind = Some(kind_name(kind));
                    }
                }
            }
            _ => {}
        }
    }
    info
}

/// Interface index of a default route's gateway, if this message is one.
///
/// Multipath routes carry their nexthops in a nested attribute; the first
/// nexthop's interface wins, matching what the kernel prefers for new
/// flows under equal weights.
fn route_gateway_ifindex(message: &RouteMessage) -> Option<u32> {
    if message.header.destination_prefix_length != 0 {
        return None;
    }
    let mut has_gateway = false;
    let mut oif = None;
    let mut multipath_hop = None;
    for nla in &message.nlas {
        match nla {
            RouteNla::Gateway(_) => has_gateway = true,
            RouteNla::Oif(index) => oif = Some(*index),
            RouteNla::MultiPath(bytes) => multipath_hop = first_nexthop_ifindex(bytes),
            _ => {}
        }
    }
    if has_gateway {
        if let Some(index) = oif {
            return Some(index);
        }
    }
    multipath_hop
}

/// Reads the interface index out of the first `rtnexthop` entry:
/// `{ len: u16, flags: u8, hops: u8, ifindex: i32 }`.
fn first_nexthop_ifindex(bytes: &[u8]) -> Option<u32> {
    if bytes.len() < 8 {
        return None;
    }
    let ifindex = i32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    u32::try_from(ifindex).ok().filter(|&i| i != 0)
}

fn parse_ip(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(octets)))
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

fn encap_name(hardware_type: u16) -> &'static str {
    match hardware_type {
        libc::ARPHRD_ETHER => "ether",
        libc::ARPHRD_INFINIBAND => "infiniband",
        libc::ARPHRD_TUNNEL => "ipip",
        libc::ARPHRD_LOOPBACK => "loopback",
        libc::ARPHRD_SIT => "sit",
        libc::ARPHRD_IPGRE => "gre",
        libc::ARPHRD_NONE => "none",
        _ => "unknown",
    }
}

fn oper_state_name(state: &State) -> &'static str {
    match state {
        State::Up => "up",
        State::Down => "down",
        State::Dormant => "dormant",
        State::Testing => "testing",
        State::LowerLayerDown => "lowerlayerdown",
        State::NotPresent => "notpresent",
        _ => "unknown",
    }
}

fn kind_name(kind: &InfoKind) -> String {
    match kind {
        InfoKind::Veth => "veth".to_string(),
        InfoKind::Bridge => "bridge".to_string(),
        InfoKind::Bond => "bond".to_string(),
        InfoKind::Vlan => "vlan".to_string(),
        InfoKind::Vxlan => "vxlan".to_string(),
        InfoKind::Dummy => "dummy".to_string(),
        InfoKind::Tun => "tun".to_string(),
        InfoKind::IpVlan => "ipvlan".to_string(),
        InfoKind::MacVlan => "macvlan".to_string(),
        InfoKind::MacVtap => "macvtap".to_string(),
        InfoKind::Vrf => "vrf".to_string(),
        InfoKind::Other(name) => name.clone(),
        _ => "unknown".to_string(),
    }
}

fn resolve_error(name: &str, e: io::Error) -> Error {
    match e.raw_os_error() {
        Some(code) if code == libc::ENODEV || code == libc::ENOENT => {
            Error::LinkNotFound(name.to_string())
        }
        _ => Error::link_op("resolve", name, e),
    }
}

fn rename_error(index: u32, target: &str, e: io::Error) -> Error {
    match e.raw_os_error() {
        Some(code) if code == libc::EEXIST => Error::RenameCollision {
            name: format!("ifindex {index}"),
            target: target.to_string(),
            reason: e.to_string(),
        },
        _ => Error::link_op("rename", format!("ifindex {index}"), e),
    }
}
